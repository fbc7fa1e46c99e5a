//! Built-in return mappings.

use std::io::Write;

use super::{
    AsAny, BoxedValue, BuildContext, MappingKind, ReturnBinder, ReturnMapperFactory, ReturnMetadata,
    ReturnType, downcast_metadata,
};
use crate::error::{ActionError, ConfigurationError};
use crate::exchange::Exchange;
use crate::http::StatusCode;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

/// Writes the return value as the response body.
#[derive(Debug, Clone, Default)]
pub struct ContentBody {
    content_type: Option<String>,
}

impl ContentBody {
    pub const KIND: MappingKind = MappingKind::new("content-body");

    /// `text/plain; charset=utf-8`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
        }
    }
}

/// JSON body. As a return mapping it serializes the value; as a parameter
/// mapping it deserializes the request body.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody;

impl JsonBody {
    pub const KIND: MappingKind = MappingKind::new("json-body");
}

/// The return value is the `Location` of a `302` redirect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendRedirect;

impl SendRedirect {
    pub const KIND: MappingKind = MappingKind::new("send-redirect");
}

/// The return value becomes a response header.
#[derive(Debug, Clone)]
pub struct ResponseHeader {
    name: String,
}

impl ResponseHeader {
    pub const KIND: MappingKind = MappingKind::new("response-header");

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Fixed response status. A non-void return value is also written as text.
#[derive(Debug, Clone, Copy)]
pub struct HttpStatus(pub StatusCode);

impl HttpStatus {
    pub const KIND: MappingKind = MappingKind::new("http-status");
}

macro_rules! return_metadata {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ReturnMetadata for $ty {
                fn kind(&self) -> MappingKind {
                    Self::KIND
                }
            }
        )+
    };
}

return_metadata!(ContentBody, JsonBody, SendRedirect, ResponseHeader, HttpStatus);

fn unsupported(kind: MappingKind, ty: &ReturnType) -> ConfigurationError {
    ConfigurationError::UnsupportedReturnType {
        mapping: kind.to_string(),
        type_name: ty.type_name(),
    }
}

fn require_text(kind: MappingKind, ty: &ReturnType) -> Result<(), ConfigurationError> {
    if ty.supports_text() {
        Ok(())
    } else {
        Err(unsupported(kind, ty))
    }
}

fn text_of(ty: &ReturnType, value: &BoxedValue) -> Result<String, ActionError> {
    ty.to_text(&**value).ok_or_else(|| {
        ActionError::internal(format!("return value is not a {}", ty.type_name()))
    })
}

fn write_bytes(
    exchange: &mut dyn Exchange,
    content_type: &str,
    bytes: &[u8],
) -> Result<(), ActionError> {
    exchange.write_body(content_type, &mut |out: &mut dyn Write| out.write_all(bytes))?;
    Ok(())
}

struct TextBodyWriter {
    ty: ReturnType,
    content_type: String,
}

impl ReturnBinder for TextBodyWriter {
    fn write(&self, value: BoxedValue, exchange: &mut dyn Exchange) -> Result<(), ActionError> {
        let text = text_of(&self.ty, &value)?;
        write_bytes(exchange, &self.content_type, text.as_bytes())
    }
}

pub struct ContentBodyFactory;

impl ReturnMapperFactory for ContentBodyFactory {
    fn create(
        &self,
        metadata: &dyn ReturnMetadata,
        return_type: &ReturnType,
        _context: &BuildContext<'_>,
    ) -> Result<Box<dyn ReturnBinder>, ConfigurationError> {
        let body = downcast_metadata::<ContentBody>(metadata.as_any(), ContentBody::KIND)?;
        require_text(ContentBody::KIND, return_type)?;
        Ok(Box::new(TextBodyWriter {
            ty: return_type.clone(),
            content_type: body.content_type.as_deref().unwrap_or(TEXT_PLAIN).to_owned(),
        }))
    }
}

struct JsonWriter {
    ty: ReturnType,
}

impl ReturnBinder for JsonWriter {
    fn write(&self, value: BoxedValue, exchange: &mut dyn Exchange) -> Result<(), ActionError> {
        let json = self.ty.to_json(&*value).ok_or_else(|| {
            ActionError::internal(format!("return value is not a {}", self.ty.type_name()))
        })??;
        write_bytes(exchange, APPLICATION_JSON, &json)
    }
}

pub struct JsonBodyFactory;

impl ReturnMapperFactory for JsonBodyFactory {
    fn create(
        &self,
        _metadata: &dyn ReturnMetadata,
        return_type: &ReturnType,
        _context: &BuildContext<'_>,
    ) -> Result<Box<dyn ReturnBinder>, ConfigurationError> {
        if !return_type.supports_json() {
            return Err(unsupported(JsonBody::KIND, return_type));
        }
        Ok(Box::new(JsonWriter {
            ty: return_type.clone(),
        }))
    }
}

struct RedirectWriter {
    ty: ReturnType,
}

impl ReturnBinder for RedirectWriter {
    fn write(&self, value: BoxedValue, exchange: &mut dyn Exchange) -> Result<(), ActionError> {
        let location = text_of(&self.ty, &value)?;
        exchange.send_redirect(&location);
        Ok(())
    }
}

pub struct SendRedirectFactory;

impl ReturnMapperFactory for SendRedirectFactory {
    fn create(
        &self,
        _metadata: &dyn ReturnMetadata,
        return_type: &ReturnType,
        _context: &BuildContext<'_>,
    ) -> Result<Box<dyn ReturnBinder>, ConfigurationError> {
        require_text(SendRedirect::KIND, return_type)?;
        Ok(Box::new(RedirectWriter {
            ty: return_type.clone(),
        }))
    }
}

struct HeaderWriter {
    name: String,
    ty: ReturnType,
}

impl ReturnBinder for HeaderWriter {
    fn write(&self, value: BoxedValue, exchange: &mut dyn Exchange) -> Result<(), ActionError> {
        let text = text_of(&self.ty, &value)?;
        exchange.set_response_header(&self.name, &text);
        Ok(())
    }
}

pub struct ResponseHeaderFactory;

impl ReturnMapperFactory for ResponseHeaderFactory {
    fn create(
        &self,
        metadata: &dyn ReturnMetadata,
        return_type: &ReturnType,
        _context: &BuildContext<'_>,
    ) -> Result<Box<dyn ReturnBinder>, ConfigurationError> {
        let header = downcast_metadata::<ResponseHeader>(metadata.as_any(), ResponseHeader::KIND)?;
        if header.name.is_empty() {
            return Err(ConfigurationError::MissingName {
                mapping: ResponseHeader::KIND.to_string(),
                index: 0,
            });
        }
        require_text(ResponseHeader::KIND, return_type)?;
        Ok(Box::new(HeaderWriter {
            name: header.name.clone(),
            ty: return_type.clone(),
        }))
    }
}

struct StatusWriter {
    status: StatusCode,
    ty: ReturnType,
}

impl ReturnBinder for StatusWriter {
    fn write(&self, value: BoxedValue, exchange: &mut dyn Exchange) -> Result<(), ActionError> {
        exchange.set_status(self.status);
        if self.ty.is_void() {
            return Ok(());
        }
        let text = text_of(&self.ty, &value)?;
        write_bytes(exchange, TEXT_PLAIN, text.as_bytes())
    }
}

pub struct HttpStatusFactory;

impl ReturnMapperFactory for HttpStatusFactory {
    fn create(
        &self,
        metadata: &dyn ReturnMetadata,
        return_type: &ReturnType,
        _context: &BuildContext<'_>,
    ) -> Result<Box<dyn ReturnBinder>, ConfigurationError> {
        let HttpStatus(status) = *downcast_metadata::<HttpStatus>(metadata.as_any(), HttpStatus::KIND)?;
        if !return_type.is_void() {
            require_text(HttpStatus::KIND, return_type)?;
        }
        Ok(Box::new(StatusWriter {
            status,
            ty: return_type.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::PathPattern;
    use crate::exchange::RequestExchange;
    use crate::http::Request;
    use crate::mapping::{Json, Reply};

    fn exchange() -> RequestExchange {
        let (request, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        RequestExchange::new(request)
    }

    fn writer<R: Reply>(
        factory: &dyn ReturnMapperFactory,
        metadata: &dyn ReturnMetadata,
    ) -> Result<Box<dyn ReturnBinder>, ConfigurationError> {
        let pattern = PathPattern::parse("/").unwrap();
        let context = BuildContext {
            action: "test",
            http_method: "GET",
            pattern: &pattern,
        };
        factory.create(metadata, &R::return_type(), &context)
    }

    #[test]
    fn content_body_defaults_to_plain_text() {
        let w = writer::<String>(&ContentBodyFactory, &ContentBody::new()).unwrap();
        let mut ex = exchange();
        w.write(Box::new(String::from("Hello, Ada")), &mut ex).unwrap();

        let res = ex.into_response();
        assert_eq!(res.headers().get("content-type"), Some(TEXT_PLAIN));
        assert_eq!(res.body_text(), "Hello, Ada");
    }

    #[test]
    fn content_body_with_custom_type() {
        let w = writer::<i64>(&ContentBodyFactory, &ContentBody::with_type("text/csv")).unwrap();
        let mut ex = exchange();
        w.write(Box::new(7_i64), &mut ex).unwrap();
        assert_eq!(ex.response().headers().get("content-type"), Some("text/csv"));
        assert_eq!(ex.response().body_text(), "7");
    }

    #[test]
    fn json_body_serializes() {
        #[derive(serde::Serialize)]
        struct User {
            name: &'static str,
        }
        let w = writer::<Json<User>>(&JsonBodyFactory, &JsonBody).unwrap();
        let mut ex = exchange();
        w.write(Box::new(Json(User { name: "ada" })), &mut ex).unwrap();
        assert_eq!(ex.response().headers().get("content-type"), Some(APPLICATION_JSON));
        assert_eq!(ex.response().body_text(), r#"{"name":"ada"}"#);
    }

    #[test]
    fn json_needs_a_serializable_type() {
        let err = writer::<url::Url>(&JsonBodyFactory, &JsonBody).err().unwrap();
        assert!(matches!(err, ConfigurationError::UnsupportedReturnType { .. }));
    }

    #[test]
    fn redirect_uses_the_value_as_location() {
        let w = writer::<&'static str>(&SendRedirectFactory, &SendRedirect).unwrap();
        let mut ex = exchange();
        w.write(Box::new("/login"), &mut ex).unwrap();
        assert_eq!(ex.response().status(), StatusCode::Found);
        assert_eq!(ex.response().headers().get("location"), Some("/login"));
    }

    #[test]
    fn header_return() {
        let w = writer::<String>(&ResponseHeaderFactory, &ResponseHeader::named("ETag")).unwrap();
        let mut ex = exchange();
        w.write(Box::new(String::from("\"v1\"")), &mut ex).unwrap();
        assert_eq!(ex.response().headers().get("etag"), Some("\"v1\""));
    }

    #[test]
    fn status_on_void_and_text() {
        let w = writer::<()>(&HttpStatusFactory, &HttpStatus(StatusCode::NoContent)).unwrap();
        let mut ex = exchange();
        w.write(Box::new(()), &mut ex).unwrap();
        assert_eq!(ex.response().status(), StatusCode::NoContent);
        assert!(ex.response().body_bytes().is_empty());

        let w = writer::<String>(&HttpStatusFactory, &HttpStatus(StatusCode::Created)).unwrap();
        let mut ex = exchange();
        w.write(Box::new(String::from("made")), &mut ex).unwrap();
        assert_eq!(ex.response().status(), StatusCode::Created);
        assert_eq!(ex.response().body_text(), "made");
    }

    #[test]
    fn void_cannot_be_a_body() {
        assert!(writer::<()>(&ContentBodyFactory, &ContentBody::new()).is_err());
    }
}
