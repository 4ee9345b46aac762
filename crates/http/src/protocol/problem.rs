//! RFC 7807 problem-details bodies.
//!
//! Every error surfaced to a client is an `application/problem+json`
//! document. Status/title pairs for the common statuses are precomputed;
//! `detail` is optional and free-form.

use crate::protocol::response::{decimal_value, Body, Response};
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::StatusCode;
use serde::Serialize;

const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// Fallback body if serialization ever fails; kept well-formed so clients
/// always receive valid JSON.
const FALLBACK_BODY: &[u8] =
    br#"{"type":"about:blank","title":"Internal Server Error","status":500}"#;

#[derive(Debug, Clone, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    type_uri: &'static str,
    title: &'static str,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance: Option<String>,
}

impl ProblemDetails {
    pub fn new(status: StatusCode) -> Self {
        Self {
            type_uri: "about:blank",
            title: title_for(status),
            status: status.as_u16(),
            detail: None,
            instance: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST).with_detail(detail)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND).with_detail("The requested resource was not found")
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED)
            .with_detail("The method is not allowed for the requested resource")
    }

    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR).with_detail(detail)
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn title(&self) -> &'static str {
        self.title
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Renders the problem as a complete response with content type and
    /// exact content length attached.
    pub fn to_response(&self) -> Response<'static> {
        let body = serde_json::to_vec(self).unwrap_or_else(|_| FALLBACK_BODY.to_vec());
        Response::new(self.status())
            .header(CONTENT_TYPE, HeaderValue::from_static(PROBLEM_CONTENT_TYPE))
            .header(CONTENT_LENGTH, decimal_value(body.len() as u64))
            .body(Body::from(body))
    }
}

/// Precomputed short titles for the statuses the runtime emits itself.
fn title_for(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        415 => "Unsupported Media Type",
        500 => "Internal Server Error",
        _ => status.canonical_reason().unwrap_or("Error"),
    }
}
