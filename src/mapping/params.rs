//! Built-in parameter mappings.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    AsAny, BoxedValue, BuildContext, Bound, JsonBody, MappingKind, Parameter, ParameterBinder,
    ParameterDeclaration, ParameterMapperFactory, ParameterMetadata, ParameterType, ValueType,
    downcast_metadata,
};
use crate::error::{ActionError, ConfigurationError, HttpRequestError};
use crate::exchange::{ClientCertificate, Exchange, Principal};

/// A query or form parameter, optionally with a default used when absent.
#[derive(Debug, Clone, Default)]
pub struct RequestParam {
    name: Option<String>,
    default: Option<String>,
}

impl RequestParam {
    pub const KIND: MappingKind = MappingKind::new("request-param");

    /// Takes its name from the declaration (`Routes::param_as`).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            default: None,
        }
    }

    /// Converted in place of a missing value.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// A value captured by a `:name` segment of the route pattern.
#[derive(Debug, Clone, Default)]
pub struct PathParam {
    name: Option<String>,
}

impl PathParam {
    pub const KIND: MappingKind = MappingKind::new("path-param");

    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// A request header.
#[derive(Debug, Clone, Default)]
pub struct RequestHeader {
    name: Option<String>,
}

impl RequestHeader {
    pub const KIND: MappingKind = MappingKind::new("request-header");

    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// A request cookie, or a [`ResponseCookie`] the handler may update.
#[derive(Debug, Clone, Default)]
pub struct Cookie {
    name: Option<String>,
}

impl Cookie {
    pub const KIND: MappingKind = MappingKind::new("cookie");

    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// The raw request body, as `Bytes`, `String` or any other body-decodable type.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestBody;

impl RequestBody {
    pub const KIND: MappingKind = MappingKind::new("request-body");
}

/// The authenticated [`Principal`]. Absent and required means `401`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserPrincipal;

impl UserPrincipal {
    pub const KIND: MappingKind = MappingKind::new("user-principal");
}

/// The TLS [`ClientCertificate`]. Absent and required means `401`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientCert;

impl ClientCert {
    pub const KIND: MappingKind = MappingKind::new("client-cert");
}

/// An object the transport injected into the exchange, taken as
/// [`Injected<T>`](super::Injected).
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextObject;

impl ContextObject {
    pub const KIND: MappingKind = MappingKind::new("context-object");
}

macro_rules! parameter_metadata {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ParameterMetadata for $ty {
                fn kind(&self) -> MappingKind {
                    Self::KIND
                }
            }
        )+
    };
}

parameter_metadata!(
    RequestParam,
    PathParam,
    RequestHeader,
    Cookie,
    RequestBody,
    JsonBody,
    UserPrincipal,
    ClientCert,
    ContextObject,
);

/// A cookie handed to the handler for reading and writing.
///
/// Clones share state. After a successful invocation a changed cookie is sent
/// back as `Set-Cookie`; [`clear`](Self::clear) expires it.
#[derive(Debug, Clone)]
pub struct ResponseCookie {
    name: String,
    state: Arc<Mutex<CookieState>>,
}

#[derive(Debug)]
struct CookieState {
    value: Option<String>,
    changed: bool,
}

impl ResponseCookie {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(CookieState {
                value,
                changed: false,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current value: the request's, or whatever the handler set.
    pub fn value(&self) -> Option<String> {
        self.state().value.clone()
    }

    pub fn set(&self, value: impl Into<String>) {
        let mut state = self.state();
        state.value = Some(value.into());
        state.changed = true;
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.value = None;
        state.changed = true;
    }

    /// The `Set-Cookie` value, if the cookie was changed.
    pub fn set_cookie_header(&self) -> Option<String> {
        let state = self.state();
        if !state.changed {
            return None;
        }
        Some(match &state.value {
            Some(value) => format!("{}={}; Path=/", self.name, value),
            None => format!("{}=; Path=/; Max-Age=0", self.name),
        })
    }

    fn state(&self) -> MutexGuard<'_, CookieState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Parameter for ResponseCookie {
    fn parameter_type() -> ParameterType {
        ParameterType::opaque::<ResponseCookie>("ResponseCookie")
    }
}

fn unsupported(kind: MappingKind, ty: &ParameterType) -> ConfigurationError {
    ConfigurationError::UnsupportedParameterType {
        mapping: kind.to_string(),
        type_name: ty.type_name(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextSource {
    Query,
    Path,
    Header,
    Cookie,
}

/// Binds one string-valued request fact through the argument's parser.
struct TextBinder {
    source: TextSource,
    name: String,
    default: Option<String>,
    ty: ParameterType,
}

impl TextBinder {
    fn build(
        kind: MappingKind,
        source: TextSource,
        explicit: Option<&str>,
        default: Option<String>,
        declaration: &ParameterDeclaration,
    ) -> Result<Box<dyn ParameterBinder>, ConfigurationError> {
        let ty = declaration.ty();
        if !ty.supports_text() {
            return Err(unsupported(kind, ty));
        }
        Ok(Box::new(Self {
            source,
            name: declaration.resolve_name(explicit, kind)?,
            default,
            ty: ty.clone(),
        }))
    }

    fn lookup(&self, exchange: &dyn Exchange) -> Option<String> {
        match self.source {
            TextSource::Query => exchange.parameter_value(&self.name).map(str::to_owned),
            TextSource::Path => exchange.path_parameter(&self.name).map(str::to_owned),
            TextSource::Header => exchange.header_value(&self.name).map(str::to_owned),
            TextSource::Cookie => exchange.cookie_value(&self.name),
        }
    }
}

impl ParameterBinder for TextBinder {
    fn bind(&self, exchange: &mut dyn Exchange) -> Result<Bound, ActionError> {
        let raw = self.lookup(exchange).or_else(|| self.default.clone());

        let Some(raw) = raw else {
            if self.source == TextSource::Path {
                return Err(ActionError::internal(format!(
                    "path parameter {} is not declared by the matched route",
                    self.name
                )));
            }
            return self
                .ty
                .absent()
                .map(Bound::new)
                .ok_or_else(|| HttpRequestError::missing_parameter(&self.name).into());
        };

        self.ty.parse(&raw).map(Bound::new).ok_or_else(|| {
            HttpRequestError::bad_request(format!(
                "Invalid value '{raw}' for parameter {}: expected {}",
                self.name,
                self.ty.type_name()
            ))
            .into()
        })
    }

    fn requires_parameter(&self) -> bool {
        self.source == TextSource::Query && !self.ty.is_optional() && self.default.is_none()
    }
}

pub struct RequestParamFactory;

impl ParameterMapperFactory for RequestParamFactory {
    fn create(
        &self,
        metadata: &dyn ParameterMetadata,
        declaration: &ParameterDeclaration,
        _context: &BuildContext<'_>,
    ) -> Result<Box<dyn ParameterBinder>, ConfigurationError> {
        let param = downcast_metadata::<RequestParam>(metadata.as_any(), RequestParam::KIND)?;
        TextBinder::build(
            RequestParam::KIND,
            TextSource::Query,
            param.name.as_deref(),
            param.default.clone(),
            declaration,
        )
    }
}

pub struct PathParamFactory;

impl ParameterMapperFactory for PathParamFactory {
    fn create(
        &self,
        metadata: &dyn ParameterMetadata,
        declaration: &ParameterDeclaration,
        _context: &BuildContext<'_>,
    ) -> Result<Box<dyn ParameterBinder>, ConfigurationError> {
        let param = downcast_metadata::<PathParam>(metadata.as_any(), PathParam::KIND)?;
        TextBinder::build(
            PathParam::KIND,
            TextSource::Path,
            param.name.as_deref(),
            None,
            declaration,
        )
    }
}

pub struct RequestHeaderFactory;

impl ParameterMapperFactory for RequestHeaderFactory {
    fn create(
        &self,
        metadata: &dyn ParameterMetadata,
        declaration: &ParameterDeclaration,
        _context: &BuildContext<'_>,
    ) -> Result<Box<dyn ParameterBinder>, ConfigurationError> {
        let header = downcast_metadata::<RequestHeader>(metadata.as_any(), RequestHeader::KIND)?;
        TextBinder::build(
            RequestHeader::KIND,
            TextSource::Header,
            header.name.as_deref(),
            None,
            declaration,
        )
    }
}

struct ResponseCookieBinder {
    name: String,
}

impl ParameterBinder for ResponseCookieBinder {
    fn bind(&self, exchange: &mut dyn Exchange) -> Result<Bound, ActionError> {
        let cookie = ResponseCookie::new(self.name.clone(), exchange.cookie_value(&self.name));
        Ok(Bound::retaining(Box::new(cookie.clone()), Box::new(cookie)))
    }

    fn on_complete(&self, exchange: &mut dyn Exchange, retained: &BoxedValue) {
        let header = retained
            .downcast_ref::<ResponseCookie>()
            .and_then(ResponseCookie::set_cookie_header);
        if let Some(header) = header {
            exchange.set_response_header("Set-Cookie", &header);
        }
    }
}

pub struct CookieFactory;

impl ParameterMapperFactory for CookieFactory {
    fn create(
        &self,
        metadata: &dyn ParameterMetadata,
        declaration: &ParameterDeclaration,
        _context: &BuildContext<'_>,
    ) -> Result<Box<dyn ParameterBinder>, ConfigurationError> {
        let cookie = downcast_metadata::<Cookie>(metadata.as_any(), Cookie::KIND)?;
        if declaration.ty().is::<ResponseCookie>() {
            let name = declaration.resolve_name(cookie.name.as_deref(), Cookie::KIND)?;
            return Ok(Box::new(ResponseCookieBinder { name }));
        }
        TextBinder::build(
            Cookie::KIND,
            TextSource::Cookie,
            cookie.name.as_deref(),
            None,
            declaration,
        )
    }
}

struct BodyBinder {
    ty: ParameterType,
    label: &'static str,
}

impl ParameterBinder for BodyBinder {
    fn bind(&self, exchange: &mut dyn Exchange) -> Result<Bound, ActionError> {
        let body = exchange.request_body()?;
        if body.is_empty() {
            if let Some(absent) = self.ty.absent() {
                return Ok(Bound::new(absent));
            }
        }
        self.ty
            .decode(&body)
            .map(Bound::new)
            .map_err(|reason| HttpRequestError::bad_request(format!("{}: {reason}", self.label)).into())
    }
}

pub struct RequestBodyFactory;

impl ParameterMapperFactory for RequestBodyFactory {
    fn create(
        &self,
        _metadata: &dyn ParameterMetadata,
        declaration: &ParameterDeclaration,
        _context: &BuildContext<'_>,
    ) -> Result<Box<dyn ParameterBinder>, ConfigurationError> {
        let ty = declaration.ty();
        if !ty.supports_body() {
            return Err(unsupported(RequestBody::KIND, ty));
        }
        Ok(Box::new(BodyBinder {
            ty: ty.clone(),
            label: "Malformed request body",
        }))
    }
}

/// Parameter side of [`JsonBody`]: `Json<T>`, `Option<Json<T>>` or `serde_json::Value`.
pub struct JsonBodyParamFactory;

impl ParameterMapperFactory for JsonBodyParamFactory {
    fn create(
        &self,
        _metadata: &dyn ParameterMetadata,
        declaration: &ParameterDeclaration,
        _context: &BuildContext<'_>,
    ) -> Result<Box<dyn ParameterBinder>, ConfigurationError> {
        let ty = declaration.ty();
        if ty.value_type() != ValueType::Json || !ty.supports_body() {
            return Err(unsupported(JsonBody::KIND, ty));
        }
        Ok(Box::new(BodyBinder {
            ty: ty.clone(),
            label: "Malformed JSON body",
        }))
    }
}

/// Binds an identity the transport may or may not supply.
struct IdentityBinder<T> {
    optional: bool,
    fetch: fn(&dyn Exchange) -> Option<T>,
    missing: &'static str,
}

impl<T: Send + 'static> ParameterBinder for IdentityBinder<T> {
    fn bind(&self, exchange: &mut dyn Exchange) -> Result<Bound, ActionError> {
        let value = (self.fetch)(exchange);
        match (value, self.optional) {
            (Some(value), false) => Ok(Bound::new(Box::new(value))),
            (value, true) => Ok(Bound::new(Box::new(value))),
            (None, false) => Err(HttpRequestError::unauthorized(self.missing).into()),
        }
    }
}

fn identity_binder<T: Send + 'static>(
    kind: MappingKind,
    ty: &ParameterType,
    fetch: fn(&dyn Exchange) -> Option<T>,
    missing: &'static str,
) -> Result<Box<dyn ParameterBinder>, ConfigurationError> {
    let optional = if ty.is::<T>() {
        false
    } else if ty.is::<Option<T>>() {
        true
    } else {
        return Err(unsupported(kind, ty));
    };
    Ok(Box::new(IdentityBinder {
        optional,
        fetch,
        missing,
    }))
}

pub struct UserPrincipalFactory;

impl ParameterMapperFactory for UserPrincipalFactory {
    fn create(
        &self,
        _metadata: &dyn ParameterMetadata,
        declaration: &ParameterDeclaration,
        _context: &BuildContext<'_>,
    ) -> Result<Box<dyn ParameterBinder>, ConfigurationError> {
        identity_binder::<Principal>(
            UserPrincipal::KIND,
            declaration.ty(),
            |exchange| exchange.user_principal(),
            "Authentication required",
        )
    }
}

pub struct ClientCertFactory;

impl ParameterMapperFactory for ClientCertFactory {
    fn create(
        &self,
        _metadata: &dyn ParameterMetadata,
        declaration: &ParameterDeclaration,
        _context: &BuildContext<'_>,
    ) -> Result<Box<dyn ParameterBinder>, ConfigurationError> {
        identity_binder::<ClientCertificate>(
            ClientCert::KIND,
            declaration.ty(),
            |exchange| exchange.client_certificate(),
            "Client certificate required",
        )
    }
}

struct ContextObjectBinder {
    ty: ParameterType,
}

impl ParameterBinder for ContextObjectBinder {
    fn bind(&self, exchange: &mut dyn Exchange) -> Result<Bound, ActionError> {
        self.ty
            .extract(exchange.extensions())
            .map(Bound::new)
            .ok_or_else(|| {
                ActionError::internal(format!(
                    "no {} in the request context",
                    self.ty.type_name()
                ))
            })
    }
}

pub struct ContextObjectFactory;

impl ParameterMapperFactory for ContextObjectFactory {
    fn create(
        &self,
        _metadata: &dyn ParameterMetadata,
        declaration: &ParameterDeclaration,
        _context: &BuildContext<'_>,
    ) -> Result<Box<dyn ParameterBinder>, ConfigurationError> {
        let ty = declaration.ty();
        if !ty.supports_injection() {
            return Err(unsupported(ContextObject::KIND, ty));
        }
        Ok(Box::new(ContextObjectBinder { ty: ty.clone() }))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use uuid::Uuid;

    use super::*;
    use crate::action::PathPattern;
    use crate::context::PathParams;
    use crate::exchange::RequestExchange;
    use crate::http::{Request, StatusCode};
    use crate::mapping::{Injected, Json};

    fn exchange(raw: &str) -> RequestExchange {
        let (request, _) = Request::parse(raw.as_bytes()).unwrap();
        RequestExchange::new(request)
    }

    fn binder<T: Parameter>(
        factory: &dyn ParameterMapperFactory,
        metadata: &dyn ParameterMetadata,
        name: Option<&str>,
    ) -> Result<Box<dyn ParameterBinder>, ConfigurationError> {
        let pattern = PathPattern::parse("/test").unwrap();
        let context = BuildContext {
            action: "test",
            http_method: "GET",
            pattern: &pattern,
        };
        let declaration = ParameterDeclaration::new(0, name.map(str::to_owned), T::parameter_type());
        factory.create(metadata, &declaration, &context)
    }

    fn bind<T: 'static>(binder: &dyn ParameterBinder, ex: &mut RequestExchange) -> Result<T, ActionError> {
        binder
            .bind(ex)
            .map(|bound| *bound.argument.downcast::<T>().unwrap())
    }

    fn status(err: ActionError) -> StatusCode {
        match err {
            ActionError::Request(e) => e.status(),
            other => panic!("expected a request error, got {other:?}"),
        }
    }

    #[test]
    fn optional_request_param() {
        let b = binder::<Option<String>>(&RequestParamFactory, &RequestParam::named("name"), None).unwrap();
        assert!(!b.requires_parameter());

        let mut ex = exchange("GET /hello?name=Ada HTTP/1.1\r\n\r\n");
        assert_eq!(bind::<Option<String>>(&*b, &mut ex).unwrap(), Some("Ada".into()));

        let mut ex = exchange("GET /hello HTTP/1.1\r\n\r\n");
        assert_eq!(bind::<Option<String>>(&*b, &mut ex).unwrap(), None);
    }

    #[test]
    fn required_request_param_missing_is_400() {
        let b = binder::<i32>(&RequestParamFactory, &RequestParam::new(), Some("page")).unwrap();
        assert!(b.requires_parameter());

        let mut ex = exchange("GET / HTTP/1.1\r\n\r\n");
        match bind::<i32>(&*b, &mut ex) {
            Err(ActionError::Request(e)) => {
                assert_eq!(e.status(), StatusCode::BadRequest);
                assert_eq!(e.message(), "Missing required parameter page");
            }
            _ => panic!("expected a missing parameter error"),
        }
    }

    #[test]
    fn default_value_fills_in() {
        let meta = RequestParam::named("size").default_value("20");
        let b = binder::<i64>(&RequestParamFactory, &meta, None).unwrap();
        assert!(!b.requires_parameter());
        let mut ex = exchange("GET / HTTP/1.1\r\n\r\n");
        assert_eq!(bind::<i64>(&*b, &mut ex).unwrap(), 20);
    }

    #[test]
    fn invalid_value_names_value_and_type() {
        let b = binder::<Uuid>(&PathParamFactory, &PathParam::named("id"), None).unwrap();
        let mut ex = exchange("GET /users/not-a-uuid HTTP/1.1\r\n\r\n");
        let mut params = PathParams::new();
        params.insert("id".to_owned(), "not-a-uuid".to_owned());
        ex.set_path_parameters(params);

        match bind::<Uuid>(&*b, &mut ex) {
            Err(ActionError::Request(e)) => {
                assert_eq!(e.status(), StatusCode::BadRequest);
                assert!(e.message().contains("not-a-uuid"));
                assert!(e.message().contains("UUID"));
            }
            _ => panic!("expected a conversion error"),
        }
    }

    #[test]
    fn undeclared_path_param_is_internal() {
        let b = binder::<String>(&PathParamFactory, &PathParam::named("id"), None).unwrap();
        let mut ex = exchange("GET /users/1 HTTP/1.1\r\n\r\n");
        assert!(matches!(bind::<String>(&*b, &mut ex), Err(ActionError::Internal(_))));
    }

    #[test]
    fn text_mappings_reject_opaque_types() {
        let err = binder::<Bytes>(&RequestParamFactory, &RequestParam::named("x"), None)
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::UnsupportedParameterType { .. }));
    }

    #[test]
    fn cookie_without_any_name_is_rejected() {
        let err = binder::<String>(&CookieFactory, &Cookie::new(), None).err().unwrap();
        assert!(matches!(err, ConfigurationError::MissingName { .. }));
    }

    #[test]
    fn header_takes_declared_name() {
        let b = binder::<String>(&RequestHeaderFactory, &RequestHeader::new(), Some("x-trace")).unwrap();
        let mut ex = exchange("GET / HTTP/1.1\r\nX-Trace: abc\r\n\r\n");
        assert_eq!(bind::<String>(&*b, &mut ex).unwrap(), "abc");
    }

    #[test]
    fn response_cookie_is_written_on_complete() {
        let b = binder::<ResponseCookie>(&CookieFactory, &Cookie::named("visits"), None).unwrap();
        let mut ex = exchange("GET / HTTP/1.1\r\nCookie: visits=2\r\n\r\n");

        let bound = b.bind(&mut ex).unwrap();
        let cookie = bound.argument.downcast_ref::<ResponseCookie>().unwrap();
        assert_eq!(cookie.value().as_deref(), Some("2"));
        cookie.set("3");

        b.on_complete(&mut ex, bound.retained.as_ref().unwrap());
        assert_eq!(
            ex.response().headers().get("set-cookie"),
            Some("visits=3; Path=/")
        );
    }

    #[test]
    fn unchanged_response_cookie_writes_nothing() {
        let cookie = ResponseCookie::new("a", Some("1".into()));
        assert_eq!(cookie.set_cookie_header(), None);
        cookie.clear();
        assert_eq!(cookie.set_cookie_header().as_deref(), Some("a=; Path=/; Max-Age=0"));
    }

    #[test]
    fn json_body_decodes_or_rejects() {
        #[derive(serde::Deserialize)]
        struct Order {
            qty: u32,
        }
        let b = binder::<Json<Order>>(&JsonBodyParamFactory, &JsonBody, None).unwrap();

        let mut ex = exchange("POST / HTTP/1.1\r\nContent-Length: 9\r\n\r\n{\"qty\":4}");
        assert_eq!(bind::<Json<Order>>(&*b, &mut ex).unwrap().0.qty, 4);

        let mut ex = exchange("POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\n{qty");
        assert_eq!(status(bind::<Json<Order>>(&*b, &mut ex).err().unwrap()), StatusCode::BadRequest);

        assert!(binder::<String>(&JsonBodyParamFactory, &JsonBody, None).is_err());
    }

    #[test]
    fn json_body_accepts_only_json_types() {
        assert_eq!(<Option<Json<i32>>>::parameter_type().value_type(), ValueType::Json);
        assert!(binder::<Option<Json<i32>>>(&JsonBodyParamFactory, &JsonBody, None).is_ok());
        assert!(binder::<serde_json::Value>(&JsonBodyParamFactory, &JsonBody, None).is_ok());

        // Decodable from a body, but not JSON.
        assert!(binder::<Bytes>(&JsonBodyParamFactory, &JsonBody, None).is_err());
        assert!(binder::<Option<String>>(&JsonBodyParamFactory, &JsonBody, None).is_err());
    }

    #[test]
    fn raw_body_as_text_or_bytes() {
        let b = binder::<String>(&RequestBodyFactory, &RequestBody, None).unwrap();
        let mut ex = exchange("POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
        assert_eq!(bind::<String>(&*b, &mut ex).unwrap(), "hello");

        let b = binder::<Option<Bytes>>(&RequestBodyFactory, &RequestBody, None).unwrap();
        let mut ex = exchange("POST / HTTP/1.1\r\n\r\n");
        assert_eq!(bind::<Option<Bytes>>(&*b, &mut ex).unwrap(), None);
    }

    #[test]
    fn principal_required_or_optional() {
        let required = binder::<Principal>(&UserPrincipalFactory, &UserPrincipal, None).unwrap();
        let optional = binder::<Option<Principal>>(&UserPrincipalFactory, &UserPrincipal, None).unwrap();

        let mut anonymous = exchange("GET / HTTP/1.1\r\n\r\n");
        assert_eq!(
            status(bind::<Principal>(&*required, &mut anonymous).err().unwrap()),
            StatusCode::Unauthorized
        );
        assert_eq!(bind::<Option<Principal>>(&*optional, &mut anonymous).unwrap(), None);

        let mut ex = exchange("GET / HTTP/1.1\r\n\r\n").with_principal(Principal::new("ada"));
        assert_eq!(bind::<Principal>(&*required, &mut ex).unwrap().name(), "ada");

        assert!(binder::<String>(&UserPrincipalFactory, &UserPrincipal, None).is_err());
    }

    #[test]
    fn client_certificate_missing_is_401() {
        let b = binder::<ClientCertificate>(&ClientCertFactory, &ClientCert, None).unwrap();
        let mut ex = exchange("GET / HTTP/1.1\r\n\r\n");
        assert_eq!(status(bind::<ClientCertificate>(&*b, &mut ex).err().unwrap()), StatusCode::Unauthorized);

        let mut ex = exchange("GET / HTTP/1.1\r\n\r\n")
            .with_client_certificate(ClientCertificate::new("CN=svc", vec![0x30]));
        assert_eq!(bind::<ClientCertificate>(&*b, &mut ex).unwrap().subject(), "CN=svc");
    }

    #[test]
    fn context_objects_come_from_extensions() {
        #[derive(Clone)]
        struct Tenant(&'static str);

        let b = binder::<Injected<Tenant>>(&ContextObjectFactory, &ContextObject, None).unwrap();
        let mut ex = exchange("GET / HTTP/1.1\r\n\r\n").with_extension(Tenant("acme"));
        assert_eq!(bind::<Injected<Tenant>>(&*b, &mut ex).unwrap().0.0, "acme");

        let mut bare = exchange("GET / HTTP/1.1\r\n\r\n");
        assert!(matches!(bind::<Injected<Tenant>>(&*b, &mut bare), Err(ActionError::Internal(_))));
    }
}
