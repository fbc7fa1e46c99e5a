//! The normalized request/response view every action works against.
//!
//! Transports implement [`Exchange`] once; binders, return writers and the
//! router only ever see `&mut dyn Exchange`. [`RequestExchange`] is the
//! implementation backing the bundled TCP server and the tests.

use std::collections::HashSet;
use std::io::{self, Write};

use bytes::Bytes;

use crate::context::{Extensions, PathParams};
use crate::http::StatusCode;

mod request;

pub use request::RequestExchange;

/// Callback that produces a response body into the transport's writer.
pub type BodyWriter<'a> = &'a mut dyn FnMut(&mut dyn Write) -> io::Result<()>;

/// One HTTP request/response pair, already parsed by a transport.
///
/// Request accessors are borrowed reads of buffered data; response methods
/// record what the transport eventually sends.
pub trait Exchange {
    /// The request verb, compared verbatim against route methods.
    fn http_method(&self) -> &str;

    /// The request path past the mount point of the action registry.
    fn path_info(&self) -> &str;

    /// A query (or form) parameter.
    fn parameter_value(&self, name: &str) -> Option<&str>;

    /// A request header, looked up case-insensitively.
    fn header_value(&self, name: &str) -> Option<&str>;

    /// A request cookie. The default reads the `Cookie` header.
    fn cookie_value(&self, name: &str) -> Option<String> {
        self.header_value("cookie")
            .and_then(|header| cookie_from_header(header, name))
            .map(str::to_owned)
    }

    /// Stores the values captured by the matched route pattern.
    fn set_path_parameters(&mut self, params: PathParams);

    /// A value captured by the matched route pattern.
    fn path_parameter(&self, name: &str) -> Option<&str>;

    /// The buffered request body.
    fn request_body(&mut self) -> io::Result<Bytes>;

    /// Objects injected by the transport for this request.
    fn extensions(&self) -> &Extensions;

    /// Writes the response body with the given content type.
    fn write_body(&mut self, content_type: &str, writer: BodyWriter<'_>) -> io::Result<()>;

    fn set_response_header(&mut self, key: &str, value: &str);

    fn set_status(&mut self, status: StatusCode);

    fn send_redirect(&mut self, location: &str);

    fn send_error(&mut self, status: StatusCode, message: Option<&str>);

    /// The authenticated user, if any.
    fn user_principal(&self) -> Option<Principal>;

    fn is_user_logged_in(&self) -> bool {
        self.user_principal().is_some()
    }

    fn is_user_in_role(&self, role: &str) -> bool {
        self.user_principal().is_some_and(|p| p.has_role(role))
    }

    /// The TLS client certificate presented on this connection, if any.
    fn client_certificate(&self) -> Option<ClientCertificate>;
}

/// An authenticated user and the roles granted to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    name: String,
    roles: HashSet<String>,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// A client certificate as handed over by the TLS terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertificate {
    der: Bytes,
    subject: String,
}

impl ClientCertificate {
    pub fn new(subject: impl Into<String>, der: impl Into<Bytes>) -> Self {
        Self {
            der: der.into(),
            subject: subject.into(),
        }
    }

    /// Distinguished name of the certificate subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// DER encoding of the certificate.
    pub fn der(&self) -> &Bytes {
        &self.der
    }
}

/// Finds `name` in a `Cookie: a=1; b=2` header value.
pub fn cookie_from_header<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name).then(|| value.trim().trim_matches('"'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_lookup() {
        let header = "session=abc123; theme=\"dark\";flag=";
        assert_eq!(cookie_from_header(header, "session"), Some("abc123"));
        assert_eq!(cookie_from_header(header, "theme"), Some("dark"));
        assert_eq!(cookie_from_header(header, "flag"), Some(""));
        assert_eq!(cookie_from_header(header, "missing"), None);
    }

    #[test]
    fn principal_roles() {
        let user = Principal::new("ada").with_role("admin");
        assert_eq!(user.name(), "ada");
        assert!(user.has_role("admin"));
        assert!(!user.has_role("auditor"));
    }
}
