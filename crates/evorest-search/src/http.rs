//! Data plane: the actual calls made against the SUT.

use std::time::Duration;

use evorest_core::HttpVerb;

use crate::error::TransportError;

/// Redirects followed before a call counts as an infinite loop.
pub const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub verb: HttpVerb,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// `(content type, payload)`.
    pub entity: Option<(String, String)>,
    pub accept: Option<String>,
}

impl HttpRequest {
    pub fn new(verb: HttpVerb, url: impl Into<String>) -> Self {
        HttpRequest {
            verb,
            url: url.into(),
            headers: Vec::new(),
            entity: None,
            accept: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub location: Option<String>,
    pub body: String,
}

/// Performs one blocking HTTP exchange.
///
/// Timeouts and redirect loops must be reported as
/// [`TransportError::Timeout`] and [`TransportError::RedirectLoop`]; the
/// evaluator treats every other error as fatal.
pub trait HttpTransport {
    fn execute(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] over a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Other {
                url: String::new(),
                reason: format!("cannot build HTTP client: {}", err),
            })?;
        Ok(ReqwestTransport { client })
    }
}

fn method_of(verb: HttpVerb) -> reqwest::Method {
    match verb {
        HttpVerb::Get => reqwest::Method::GET,
        HttpVerb::Post => reqwest::Method::POST,
        HttpVerb::Put => reqwest::Method::PUT,
        HttpVerb::Patch => reqwest::Method::PATCH,
        HttpVerb::Delete => reqwest::Method::DELETE,
        HttpVerb::Options => reqwest::Method::OPTIONS,
        HttpVerb::Head => reqwest::Method::HEAD,
        HttpVerb::Trace => reqwest::Method::TRACE,
    }
}

fn classify(url: &str, err: reqwest::Error) -> TransportError {
    let url = url.to_string();
    if err.is_timeout() {
        TransportError::Timeout { url }
    } else if err.is_redirect() {
        TransportError::RedirectLoop { url }
    } else {
        TransportError::Other {
            url,
            reason: err.to_string(),
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut req = self.client.request(method_of(request.verb), &request.url);
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(accept) = &request.accept {
            req = req.header("Accept", accept.as_str());
        }
        if let Some((content_type, payload)) = &request.entity {
            req = req
                .header("Content-Type", content_type.as_str())
                .body(payload.clone());
        }

        let response = req.send().map_err(|err| classify(&request.url, err))?;
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let status = response.status().as_u16();
        let content_type = header("content-type");
        let location = header("location");
        let body = response.text().map_err(|err| classify(&request.url, err))?;
        tracing::debug!(url = %request.url, status, "SUT call done");
        Ok(HttpResponse {
            status,
            content_type,
            location,
            body,
        })
    }
}
