//! Actions: one HTTP method and path pattern bound to one controller method.
//!
//! An [`Action`] is produced by the builder (see [`Controller`]) and never
//! changes afterwards. It owns the binders for every handler argument, the
//! writer for the return value and a closure that calls the handler on the
//! shared controller.
//!
//! Path patterns are `/`-separated segments, each a literal or a `:name`
//! capture, with an optional `?name` suffix:
//!
//! | Pattern           | Matches                     | Captured        |
//! |-------------------|-----------------------------|-----------------|
//! | `/users`          | `/users`, `/users/`         | *(none)*        |
//! | `/users/:id`      | `/users/42`                 | `id → "42"`     |
//! | `/search?q`       | `/search?q=rust` only       | *(none)*        |

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

use percent_encoding::percent_decode_str;

use crate::context::PathParams;
use crate::error::{ActionError, ConfigurationError, HttpRequestError};
use crate::exchange::Exchange;
use crate::mapping::{
    AsAny, BoxedValue, MappingKind, ParameterBinder, ReturnBinder, RouteMetadata, downcast_metadata,
};

mod builder;
mod handler;

pub use builder::{Controller, ControllerSet, MethodDeclaration, Routes, build_actions};
pub(crate) use builder::PendingController;
pub use handler::{Arguments, Handler};

// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Parameter(String),
}

/// Compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
    required_query: Option<String>,
}

impl PathPattern {
    /// Parses `/users/:id` style patterns, with an optional `?name` suffix.
    ///
    /// Trailing and repeated slashes are ignored, so `/users/` and `/users`
    /// compile to the same pattern.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::InvalidRoute`] when the pattern does not start
    /// with `/`, has an empty or repeated `:name`, or an empty `?` suffix.
    ///
    /// # Examples
    ///
    /// ```
    /// use actionroute::action::PathPattern;
    ///
    /// let pattern = PathPattern::parse("/users/:id/").unwrap();
    /// assert_eq!(pattern.to_string(), "/users/:id");
    /// let params = pattern.matches("/users/Ada%20L").unwrap().unwrap();
    /// assert_eq!(params.get("id"), Some("Ada L"));
    /// assert!(pattern.matches("/users").is_none());
    /// ```
    pub fn parse(pattern: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidRoute {
            pattern: pattern.to_owned(),
            reason: reason.to_owned(),
        };

        if !pattern.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let (path, required_query) = match pattern.split_once('?') {
            Some((_, "")) => return Err(invalid("empty query parameter name")),
            Some((path, name)) => (path, Some(name.to_owned())),
            None => (pattern, None),
        };

        let mut seen = HashSet::new();
        let mut segments = Vec::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            match segment.strip_prefix(':') {
                Some("") => return Err(invalid("empty path parameter name")),
                Some(name) if !seen.insert(name) => {
                    return Err(invalid("path parameter declared twice"));
                }
                Some(name) => segments.push(Segment::Parameter(name.to_owned())),
                None => segments.push(Segment::Literal(segment.to_owned())),
            }
        }

        Ok(Self {
            segments,
            required_query,
        })
    }

    /// Captures path parameters if `path` has the same shape as the pattern.
    ///
    /// Captured values are percent-decoded; a value that is not UTF-8 once
    /// decoded is a `400`. Only the path is checked; see
    /// [`accepts_query`](Self::accepts_query).
    pub fn matches(&self, path: &str) -> Option<Result<PathParams, HttpRequestError>> {
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if path_segments.len() != self.segments.len() {
            return None;
        }

        let mut captured = Vec::new();
        for (segment, value) in self.segments.iter().zip(path_segments) {
            match segment {
                Segment::Literal(literal) => {
                    if literal != value {
                        return None;
                    }
                }
                Segment::Parameter(name) => captured.push((name, value)),
            }
        }

        let mut params = PathParams::new();
        for (name, raw) in captured {
            match percent_decode_str(raw).decode_utf8() {
                Ok(value) => params.insert(name.clone(), value.into_owned()),
                Err(_) => {
                    return Some(Err(HttpRequestError::bad_request(format!(
                        "Invalid value '{raw}' for parameter {name}: not UTF-8 once decoded"
                    ))));
                }
            }
        }
        Some(Ok(params))
    }

    /// `false` if the pattern's `?name` parameter is missing from the request.
    pub fn accepts_query(&self, exchange: &dyn Exchange) -> bool {
        self.required_query
            .as_deref()
            .is_none_or(|name| exchange.parameter_value(name).is_some())
    }

    /// The `?name` suffix, if any.
    pub fn required_query(&self) -> Option<&str> {
        self.required_query.as_deref()
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Parameter(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            f.write_str("/")?;
        }
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => write!(f, "/{literal}")?,
                Segment::Parameter(name) => write!(f, "/:{name}")?,
            }
        }
        if let Some(name) = &self.required_query {
            write!(f, "?{name}")?;
        }
        Ok(())
    }
}

/// Identity of an action within a registry: `GET /users/:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionKey {
    method: String,
    pattern: String,
}

impl ActionKey {
    pub fn new(method: impl Into<String>, pattern: &PathPattern) -> Self {
        Self {
            method: method.into(),
            pattern: pattern.to_string(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.pattern)
    }
}

/// What an [`ActionFactory`] extracts from route metadata.
#[derive(Debug, Clone)]
pub struct RouteBinding {
    pub method: String,
    pub pattern: PathPattern,
}

/// Turns route metadata into a method and pattern.
///
/// Register one with [`MapperRegistry::register_action`](crate::mapping::MapperRegistry::register_action)
/// to make a new verb routable.
pub trait ActionFactory: Send + Sync {
    fn create(&self, metadata: &dyn RouteMetadata) -> Result<RouteBinding, ConfigurationError>;
}

/// Route metadata naming a fixed HTTP method.
pub trait VerbRoute: RouteMetadata + Sized {
    const METHOD: &'static str;

    fn pattern(&self) -> &str;
}

macro_rules! verb_route {
    ($($(#[$doc:meta])* $name:ident => $method:literal, $kind:literal;)+) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, PartialEq, Eq)]
            pub struct $name(pub String);

            impl $name {
                pub const KIND: MappingKind = MappingKind::new($kind);

                pub fn new(pattern: impl Into<String>) -> Self {
                    Self(pattern.into())
                }
            }

            impl RouteMetadata for $name {
                fn kind(&self) -> MappingKind {
                    Self::KIND
                }
            }

            impl VerbRoute for $name {
                const METHOD: &'static str = $method;

                fn pattern(&self) -> &str {
                    &self.0
                }
            }
        )+
    };
}

verb_route! {
    /// `GET <pattern>`
    Get => "GET", "get";
    /// `POST <pattern>`
    Post => "POST", "post";
    /// `PUT <pattern>`
    Put => "PUT", "put";
    /// `DELETE <pattern>`
    Delete => "DELETE", "delete";
}

/// [`ActionFactory`] for any [`VerbRoute`].
pub struct HttpVerbFactory<T>(PhantomData<fn() -> T>);

impl<T> HttpVerbFactory<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for HttpVerbFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: VerbRoute + 'static> ActionFactory for HttpVerbFactory<T> {
    fn create(&self, metadata: &dyn RouteMetadata) -> Result<RouteBinding, ConfigurationError> {
        let route = downcast_metadata::<T>(metadata.as_any(), metadata.kind())?;
        Ok(RouteBinding {
            method: T::METHOD.to_owned(),
            pattern: PathPattern::parse(route.pattern())?,
        })
    }
}

/// Login and role checks run before any argument is bound.
#[derive(Debug, Clone, Default)]
pub(crate) struct Access {
    pub(crate) login: bool,
    pub(crate) roles: Vec<String>,
}

impl Access {
    fn check(&self, exchange: &dyn Exchange) -> Result<(), HttpRequestError> {
        if !self.login && self.roles.is_empty() {
            return Ok(());
        }
        if !exchange.is_user_logged_in() {
            return Err(HttpRequestError::unauthorized("Authentication required"));
        }
        if !self.roles.is_empty() && !self.roles.iter().any(|r| exchange.is_user_in_role(r)) {
            return Err(HttpRequestError::forbidden("Insufficient role"));
        }
        Ok(())
    }
}

pub(crate) type Invoker =
    Box<dyn Fn(Arguments) -> Result<BoxedValue, ActionError> + Send + Sync + 'static>;

/// One routable controller method.
pub struct Action {
    key: ActionKey,
    pattern: PathPattern,
    controller: String,
    name: String,
    binders: Vec<Box<dyn ParameterBinder>>,
    return_binder: Option<Box<dyn ReturnBinder>>,
    requires_parameter: bool,
    access: Access,
    invoker: Invoker,
}

impl Action {
    pub(crate) fn new(
        binding: RouteBinding,
        controller: String,
        name: String,
        binders: Vec<Box<dyn ParameterBinder>>,
        return_binder: Option<Box<dyn ReturnBinder>>,
        access: Access,
        invoker: Invoker,
    ) -> Self {
        let requires_parameter = binding.pattern.required_query().is_some()
            || binders.iter().any(|binder| binder.requires_parameter());
        Self {
            key: ActionKey::new(binding.method, &binding.pattern),
            pattern: binding.pattern,
            controller,
            name,
            binders,
            return_binder,
            requires_parameter,
            access,
            invoker,
        }
    }

    pub fn key(&self) -> &ActionKey {
        &self.key
    }

    pub fn http_method(&self) -> &str {
        self.key.method()
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn controller_name(&self) -> &str {
        &self.controller
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Used to break ties between actions matching the same request.
    pub fn requires_parameter(&self) -> bool {
        self.requires_parameter
    }

    /// `Controller::method`
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.controller, self.name)
    }

    /// Checks access, binds every argument in order, calls the handler,
    /// writes the return value and finally runs the binders' completion hooks.
    ///
    /// Binding stops at the first failing binder.
    pub fn invoke(&self, exchange: &mut dyn Exchange) -> Result<(), ActionError> {
        self.access.check(exchange)?;

        let mut arguments = Vec::with_capacity(self.binders.len());
        let mut retained = Vec::with_capacity(self.binders.len());
        for binder in &self.binders {
            let bound = binder.bind(exchange)?;
            arguments.push(bound.argument);
            retained.push(bound.retained);
        }

        let value = (self.invoker)(Arguments::new(arguments))?;
        if let Some(return_binder) = &self.return_binder {
            return_binder.write(value, exchange)?;
        }

        for (binder, retained) in self.binders.iter().zip(&retained) {
            if let Some(retained) = retained {
                binder.on_complete(exchange, retained);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("key", &self.key)
            .field("handler", &self.qualified_name())
            .field("parameters", &self.binders.len())
            .field("requires_parameter", &self.requires_parameter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::RequestExchange;
    use crate::http::{Request, StatusCode};

    fn pattern(raw: &str) -> PathPattern {
        PathPattern::parse(raw).unwrap()
    }

    #[test]
    fn parse_root() {
        let p = pattern("/");
        assert_eq!(p.to_string(), "/");
        assert!(p.matches("/").is_some());
        assert!(p.matches("/x").is_none());
    }

    #[test]
    fn parse_trailing_slash_stripped() {
        assert_eq!(pattern("/users/"), pattern("/users"));
    }

    #[test]
    fn parse_rejects_bad_patterns() {
        for bad in ["users", "/users/:", "/a/:id/:id", "/search?"] {
            assert!(
                matches!(PathPattern::parse(bad), Err(ConfigurationError::InvalidRoute { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn param_extracts_values() {
        let p = pattern("/users/:user/posts/:post");
        let params = p.matches("/users/ada/posts/9/").unwrap().unwrap();
        assert_eq!(params.get("user"), Some("ada"));
        assert_eq!(params.get("post"), Some("9"));
        assert_eq!(p.parameter_names().collect::<Vec<_>>(), vec!["user", "post"]);
    }

    #[test]
    fn captured_values_are_percent_decoded() {
        let p = pattern("/files/:name");
        let params = p.matches("/files/r%C3%A9sum%C3%A9%2Fv2.txt").unwrap().unwrap();
        assert_eq!(params.get("name"), Some("résumé/v2.txt"));

        let err = p.matches("/files/%FF%FE").unwrap().unwrap_err();
        assert_eq!(err.status(), StatusCode::BadRequest);
        assert!(err.message().contains("%FF%FE"), "{}", err.message());
    }

    #[test]
    fn wrong_segment_count_or_literal() {
        let p = pattern("/users/:id");
        assert!(p.matches("/users").is_none());
        assert!(p.matches("/users/1/extra").is_none());
        assert!(p.matches("/groups/1").is_none());
    }

    #[test]
    fn query_requirement() {
        let p = pattern("/search?q");
        assert_eq!(p.to_string(), "/search?q");
        assert_eq!(p.required_query(), Some("q"));

        let (with, _) = Request::parse(b"GET /search?q=rust HTTP/1.1\r\n\r\n").unwrap();
        let (without, _) = Request::parse(b"GET /search HTTP/1.1\r\n\r\n").unwrap();
        assert!(p.accepts_query(&RequestExchange::new(with)));
        assert!(!p.accepts_query(&RequestExchange::new(without)));
        assert!(pattern("/search").accepts_query(&RequestExchange::new(
            Request::parse(b"GET /search HTTP/1.1\r\n\r\n").unwrap().0
        )));
    }

    #[test]
    fn keys_compare_normalized_patterns() {
        let a = ActionKey::new("GET", &pattern("/users/:id/"));
        let b = ActionKey::new("GET", &pattern("//users/:id"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "GET /users/:id");
        assert_ne!(a, ActionKey::new("POST", &pattern("/users/:id")));
    }

    #[test]
    fn verb_factory_parses_pattern() {
        let binding = HttpVerbFactory::<Delete>::new()
            .create(&Delete::new("/users/:id"))
            .unwrap();
        assert_eq!(binding.method, "DELETE");
        assert_eq!(binding.pattern, pattern("/users/:id"));

        assert!(HttpVerbFactory::<Get>::new().create(&Get::new("nope")).is_err());
        assert!(HttpVerbFactory::<Get>::new().create(&Post::new("/x")).is_err());
    }
}
