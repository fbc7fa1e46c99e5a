use std::collections::HashMap;
use std::io;

use bytes::Bytes;

use super::{BodyWriter, ClientCertificate, Exchange, Principal};
use crate::context::{Extensions, PathParams};
use crate::http::request::parse_urlencoded;
use crate::http::{Request, Response, StatusCode};

/// [`Exchange`] over a parsed [`Request`], collecting a [`Response`].
///
/// Query parameters come first; for `application/x-www-form-urlencoded`
/// bodies the form fields are consulted as well. Identity (principal and
/// client certificate) and extensions are supplied by whoever authenticated
/// the connection.
///
/// # Examples
///
/// ```
/// use actionroute::exchange::{Exchange, RequestExchange};
/// use actionroute::http::Request;
///
/// let raw = b"GET /api/users/7?verbose=true HTTP/1.1\r\nHost: x\r\n\r\n";
/// let (request, _) = Request::parse(raw).unwrap();
/// let exchange = RequestExchange::mounted(request, "/api");
///
/// assert_eq!(exchange.path_info(), "/users/7");
/// assert_eq!(exchange.parameter_value("verbose"), Some("true"));
/// ```
#[derive(Debug)]
pub struct RequestExchange {
    request: Request,
    path_info: String,
    form: HashMap<String, String>,
    path_params: PathParams,
    extensions: Extensions,
    principal: Option<Principal>,
    certificate: Option<ClientCertificate>,
    response: Response,
}

impl RequestExchange {
    /// An exchange for a registry mounted at the root.
    pub fn new(request: Request) -> Self {
        Self::mounted(request, "")
    }

    /// An exchange for a registry mounted at `mount`; the mount prefix is
    /// stripped from the path seen by the router.
    pub fn mounted(request: Request, mount: &str) -> Self {
        let mount = mount.trim_end_matches('/');
        let path_info = request
            .path()
            .strip_prefix(mount)
            .unwrap_or(request.path())
            .to_owned();
        let form = if request.is_form() {
            parse_urlencoded(request.body())
        } else {
            HashMap::new()
        };

        Self {
            request,
            path_info,
            form,
            path_params: PathParams::new(),
            extensions: Extensions::new(),
            principal: None,
            certificate: None,
            response: Response::new(StatusCode::Ok),
        }
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    #[must_use]
    pub fn with_client_certificate(mut self, certificate: ClientCertificate) -> Self {
        self.certificate = Some(certificate);
        self
    }

    /// Makes `value` available to `ContextObject` parameters.
    #[must_use]
    pub fn with_extension<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The response written so far.
    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn into_response(self) -> Response {
        self.response
    }
}

impl Exchange for RequestExchange {
    fn http_method(&self) -> &str {
        self.request.method().as_str()
    }

    fn path_info(&self) -> &str {
        &self.path_info
    }

    fn parameter_value(&self, name: &str) -> Option<&str> {
        self.request
            .query_param(name)
            .or_else(|| self.form.get(name).map(String::as_str))
    }

    fn header_value(&self, name: &str) -> Option<&str> {
        self.request.headers().get(name)
    }

    fn set_path_parameters(&mut self, params: PathParams) {
        self.path_params = params;
    }

    fn path_parameter(&self, name: &str) -> Option<&str> {
        self.path_params.get(name)
    }

    fn request_body(&mut self) -> io::Result<Bytes> {
        Ok(self.request.body().clone())
    }

    fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    fn write_body(&mut self, content_type: &str, writer: BodyWriter<'_>) -> io::Result<()> {
        let mut body = Vec::new();
        writer(&mut body)?;
        self.response.set_header("Content-Type", content_type);
        self.response.set_body(body);
        Ok(())
    }

    fn set_response_header(&mut self, key: &str, value: &str) {
        if key.eq_ignore_ascii_case("set-cookie") {
            self.response.add_header(key, value);
        } else {
            self.response.set_header(key, value);
        }
    }

    fn set_status(&mut self, status: StatusCode) {
        self.response.set_status(status);
    }

    fn send_redirect(&mut self, location: &str) {
        self.response.set_status(StatusCode::Found);
        self.response.set_header("Location", location);
        self.response.set_body(Vec::new());
    }

    fn send_error(&mut self, status: StatusCode, message: Option<&str>) {
        let message = message.unwrap_or(status.canonical_reason());
        self.response.set_status(status);
        self.response
            .set_header("Content-Type", "text/plain; charset=utf-8");
        self.response.set_body(message);
    }

    fn user_principal(&self) -> Option<Principal> {
        self.principal.clone()
    }

    fn client_certificate(&self) -> Option<ClientCertificate> {
        self.certificate.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(raw: &str) -> RequestExchange {
        let (request, _) = Request::parse(raw.as_bytes()).unwrap();
        RequestExchange::new(request)
    }

    #[test]
    fn mount_prefix_is_stripped() {
        let (request, _) = Request::parse(b"GET /api/hello HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(RequestExchange::mounted(request, "/api/").path_info(), "/hello");
    }

    #[test]
    fn form_fields_are_parameters() {
        let ex = exchange(
            "POST /login?next=/home HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 17\r\n\r\nuser=ada&pw=s3cr3",
        );
        assert_eq!(ex.parameter_value("next"), Some("/home"));
        assert_eq!(ex.parameter_value("user"), Some("ada"));
        assert_eq!(ex.parameter_value("pw"), Some("s3cr3"));
    }

    #[test]
    fn cookies_come_from_header() {
        let ex = exchange("GET / HTTP/1.1\r\nCookie: a=1; b=two\r\n\r\n");
        assert_eq!(ex.cookie_value("b").as_deref(), Some("two"));
        assert_eq!(ex.cookie_value("c"), None);
    }

    #[test]
    fn send_error_writes_plain_text() {
        let mut ex = exchange("GET / HTTP/1.1\r\n\r\n");
        ex.send_error(StatusCode::NotFound, Some("No route for GET /"));
        let res = ex.into_response();
        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(res.body_text(), "No route for GET /");
    }

    #[test]
    fn redirect_sets_location() {
        let mut ex = exchange("GET / HTTP/1.1\r\n\r\n");
        ex.send_redirect("/login");
        assert_eq!(ex.response().status(), StatusCode::Found);
        assert_eq!(ex.response().headers().get("location"), Some("/login"));
    }

    #[test]
    fn set_cookie_headers_accumulate() {
        let mut ex = exchange("GET / HTTP/1.1\r\n\r\n");
        ex.set_response_header("Set-Cookie", "a=1");
        ex.set_response_header("Set-Cookie", "b=2");
        ex.set_response_header("X-Mode", "one");
        ex.set_response_header("X-Mode", "two");
        let headers = ex.response().headers();
        assert_eq!(headers.get_all("set-cookie").count(), 2);
        assert_eq!(headers.get("x-mode"), Some("two"));
    }

    #[test]
    fn roles_follow_the_principal() {
        let ex = exchange("GET / HTTP/1.1\r\n\r\n");
        assert!(!ex.is_user_logged_in());
        let ex = ex.with_principal(Principal::new("ada").with_role("admin"));
        assert!(ex.is_user_logged_in());
        assert!(ex.is_user_in_role("admin"));
        assert!(!ex.is_user_in_role("root"));
    }
}
