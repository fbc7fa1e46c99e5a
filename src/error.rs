//! Error taxonomy for building actions and for dispatching requests.
//!
//! Build time:
//!
//! - [`ConfigurationError`]: a single broken declaration (bad metadata,
//!   unsupported parameter type, duplicate route, controller without actions).
//! - [`CompositeConfigurationError`]: every configuration error of a
//!   registration pass, collected so one run reports all of them.
//!
//! Request time:
//!
//! - [`HttpRequestError`]: an expected rejection with a status code and a
//!   message that is safe to show the client.
//! - [`HttpActionError`]: an expected rejection that renders its own response
//!   (redirects, `304 Not Modified`).
//! - [`ActionError`]: what binders and handlers return; anything that is not
//!   one of the two kinds above is [`ActionError::Internal`] and reaches the
//!   client only as a generic `500`.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::exchange::Exchange;
use crate::http::StatusCode;

/// A declaration that cannot be turned into a working action.
///
/// Raised only while building and registering actions; never reaches a client.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("parameter #{index} of type {type_name} has no parameter mapping")]
    MissingParameterMapping {
        index: usize,
        type_name: &'static str,
    },

    #[error("{mapping} mapping #{index} has no matching handler argument (handler takes {arity})")]
    UnmappedMetadata {
        mapping: String,
        index: usize,
        arity: usize,
    },

    #[error("{mapping} cannot convert a request value to {type_name}")]
    UnsupportedParameterType {
        mapping: String,
        type_name: &'static str,
    },

    #[error("{mapping} on parameter #{index} has no name and none can be derived")]
    MissingName { mapping: String, index: usize },

    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidRoute { pattern: String, reason: String },

    #[error("more than one routing mapping ({first}, {second})")]
    MultipleRoutes { first: String, second: String },

    #[error("more than one return mapping ({first}, {second})")]
    MultipleReturns { first: String, second: String },

    #[error("returns {type_name} but declares no return mapping")]
    MissingReturnMapping { type_name: &'static str },

    #[error("{mapping} cannot write a return value of type {type_name}")]
    UnsupportedReturnType {
        mapping: String,
        type_name: &'static str,
    },

    #[error("no {category} factory registered for mapping {kind}")]
    NoFactory { category: &'static str, kind: String },

    #[error("duplicate route {route} (already bound to {existing})")]
    DuplicateRoute { route: String, existing: String },

    #[error("controller {controller} has no actions")]
    ControllerHasNoActions { controller: String },

    #[error("action registry is sealed; actions cannot be added once requests are served")]
    RegistrySealed,

    #[error("{0}")]
    Invalid(String),
}

/// Accumulates every configuration error of a registration pass.
///
/// Each entry pairs a context (usually `Controller::method`) with the error raised
/// there. Building code pushes into it and keeps going; the caller turns it
/// into a single `Result` at the end with [`into_result`](Self::into_result).
#[derive(Debug, Default)]
pub struct CompositeConfigurationError {
    errors: Vec<(String, ConfigurationError)>,
}

impl CompositeConfigurationError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one failure under `context`.
    pub fn push(&mut self, context: impl Into<String>, error: ConfigurationError) {
        self.errors.push((context.into(), error));
    }

    /// Moves every failure of `other` into `self`.
    pub fn extend_from(&mut self, other: CompositeConfigurationError) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Iterates `(context, error)` pairs in the order they were recorded.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigurationError)> {
        self.errors.iter().map(|(ctx, err)| (ctx.as_str(), err))
    }

    /// `Ok(())` when nothing was recorded, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for CompositeConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration error(s)", self.errors.len())?;
        for (context, error) in &self.errors {
            write!(f, "\n  - {context}: {error}")?;
        }
        Ok(())
    }
}

impl StdError for CompositeConfigurationError {}

/// A well-formed rejection of one request.
///
/// The message is shown to the client as-is, so it must not carry internals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct HttpRequestError {
    status: StatusCode,
    message: String,
}

impl HttpRequestError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    /// `400 Missing required parameter <name>`.
    pub fn missing_parameter(name: &str) -> Self {
        Self::bad_request(format!("Missing required parameter {name}"))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A request rejection that writes its own response.
///
/// The router calls [`render`](Self::render) instead of its generic
/// `send_error` translation.
pub trait HttpActionError: StdError + Send + Sync + 'static {
    /// Status the rendered response carries.
    fn status(&self) -> StatusCode;

    /// Writes the response. Defaults to `send_error(status, Display)`.
    fn render(&self, exchange: &mut dyn Exchange) {
        let message = self.to_string();
        exchange.send_error(self.status(), Some(&message));
    }
}

/// Sends the client elsewhere with `302 Found`.
#[derive(Debug, Clone, Error)]
#[error("redirect to {location}")]
pub struct HttpRedirectError {
    location: String,
}

impl HttpRedirectError {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }
}

impl HttpActionError for HttpRedirectError {
    fn status(&self) -> StatusCode {
        StatusCode::Found
    }

    fn render(&self, exchange: &mut dyn Exchange) {
        exchange.send_redirect(&self.location);
    }
}

/// `304 Not Modified`, optionally echoing the resource's `Last-Modified`.
#[derive(Debug, Clone, Default, Error)]
#[error("not modified")]
pub struct HttpNotModifiedError {
    last_modified: Option<String>,
}

impl HttpNotModifiedError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_modified(mut self, http_date: impl Into<String>) -> Self {
        self.last_modified = Some(http_date.into());
        self
    }
}

impl HttpActionError for HttpNotModifiedError {
    fn status(&self) -> StatusCode {
        StatusCode::NotModified
    }

    fn render(&self, exchange: &mut dyn Exchange) {
        if let Some(date) = &self.last_modified {
            exchange.set_response_header("Last-Modified", date);
        }
        exchange.set_status(StatusCode::NotModified);
    }
}

/// Failure of a parameter binder, a handler or a return binder.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Expected rejection, translated 1:1 into a response.
    #[error(transparent)]
    Request(#[from] HttpRequestError),

    /// Expected rejection with a custom renderer.
    #[error("{0}")]
    Action(Box<dyn HttpActionError>),

    /// Anything else. Logged, then answered with a generic `500`.
    #[error("{0}")]
    Internal(#[source] Box<dyn StdError + Send + Sync>),
}

impl ActionError {
    /// Wraps a custom-rendering rejection.
    pub fn action(error: impl HttpActionError) -> Self {
        Self::Action(Box::new(error))
    }

    /// Wraps an unanticipated failure.
    pub fn internal(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Internal(error.into())
    }
}

impl From<HttpRedirectError> for ActionError {
    fn from(error: HttpRedirectError) -> Self {
        Self::action(error)
    }
}

impl From<HttpNotModifiedError> for ActionError {
    fn from(error: HttpNotModifiedError) -> Self {
        Self::action(error)
    }
}

impl From<std::io::Error> for ActionError {
    fn from(error: std::io::Error) -> Self {
        Self::internal(error)
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(error: serde_json::Error) -> Self {
        Self::internal(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_collects_everything() {
        let mut all = CompositeConfigurationError::new();
        assert!(all.is_empty());

        let mut first = CompositeConfigurationError::new();
        first.push("Users::list", ConfigurationError::RegistrySealed);
        first.push(
            "Users::show",
            ConfigurationError::MissingReturnMapping { type_name: "String" },
        );
        all.extend_from(first);
        all.push(
            "Orders",
            ConfigurationError::ControllerHasNoActions {
                controller: "Orders".into(),
            },
        );

        assert_eq!(all.len(), 3);
        let contexts: Vec<_> = all.iter().map(|(ctx, _)| ctx).collect();
        assert_eq!(contexts, vec!["Users::list", "Users::show", "Orders"]);

        let text = all.to_string();
        assert!(text.starts_with("3 configuration error(s)"));
        assert!(text.contains("Orders: controller Orders has no actions"));
        assert!(all.into_result().is_err());
    }

    #[test]
    fn empty_composite_is_ok() {
        assert!(CompositeConfigurationError::new().into_result().is_ok());
    }

    #[test]
    fn missing_parameter_message() {
        let err = HttpRequestError::missing_parameter("name");
        assert_eq!(err.status(), StatusCode::BadRequest);
        assert_eq!(err.message(), "Missing required parameter name");
    }

    #[test]
    fn conversions_pick_the_right_kind() {
        let err: ActionError = HttpRequestError::forbidden("nope").into();
        assert!(matches!(err, ActionError::Request(_)));

        let err: ActionError = HttpRedirectError::new("/login").into();
        assert!(matches!(&err, ActionError::Action(e) if e.status() == StatusCode::Found));

        let err: ActionError =
            std::io::Error::new(std::io::ErrorKind::Other, "disk on fire").into();
        assert!(matches!(err, ActionError::Internal(_)));
    }
}
