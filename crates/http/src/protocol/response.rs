//! Response construction and serialization.
//!
//! A [`Response`] carries a status, an ordered header list and a body that
//! is either owned bytes or a view into the request arena. `serialize_into`
//! writes the complete HTTP/1.1 message into the connection's write buffer;
//! the body may be elided for HEAD exchanges while `Content-Length` keeps
//! describing it.

use crate::buffer::IoBuffer;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;

/// Response body: empty, arena- or static-backed view, or owned bytes.
#[derive(Debug, Clone)]
pub enum Body<'a> {
    Empty,
    Slice(&'a [u8]),
    Bytes(Bytes),
}

impl Body<'_> {
    pub fn len(&self) -> usize {
        match self {
            Body::Empty => 0,
            Body::Slice(slice) => slice.len(),
            Body::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Body::Empty => &[],
            Body::Slice(slice) => slice,
            Body::Bytes(bytes) => bytes,
        }
    }
}

impl<'a> From<&'a str> for Body<'a> {
    fn from(s: &'a str) -> Self {
        Body::Slice(s.as_bytes())
    }
}

impl<'a> From<&'a [u8]> for Body<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Body::Slice(bytes)
    }
}

impl From<String> for Body<'_> {
    fn from(s: String) -> Self {
        Body::Bytes(Bytes::from(s))
    }
}

impl From<Vec<u8>> for Body<'_> {
    fn from(v: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(v))
    }
}

impl From<Bytes> for Body<'_> {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

/// An HTTP/1.1 response.
#[derive(Debug)]
pub struct Response<'a> {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Body<'a>,
}

impl<'a> Response<'a> {
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: Vec::with_capacity(8), body: Body::Empty }
    }

    /// 200 with a `text/plain` body.
    pub fn ok(body: impl Into<Body<'a>>) -> Self {
        Self::new(StatusCode::OK)
            .header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))
            .body(body)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(mut self, body: impl Into<Body<'a>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.push((name, value));
    }

    pub fn has_header(&self, name: &HeaderName) -> bool {
        self.headers.iter().any(|(n, _)| n == name)
    }

    pub fn header_value(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Serializes the message into `buf` in insertion-header order.
    ///
    /// With `include_body` false only the head is written; callers use this
    /// for HEAD responses where `Content-Length` still reflects the body.
    pub fn serialize_into(&self, buf: &mut IoBuffer, include_body: bool) {
        buf.extend_from_slice(b"HTTP/1.1 ");
        buf.extend_from_slice(self.status.as_str().as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(self.status.canonical_reason().unwrap_or("Unknown").as_bytes());
        buf.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            buf.extend_from_slice(name.as_str().as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");

        if include_body {
            buf.extend_from_slice(self.body.as_slice());
        }
    }
}

/// Formats `n` in decimal into a stack buffer and passes the digits on.
/// Avoids a heap-allocating `format!` on the per-response path.
pub(crate) fn decimal_value(n: u64) -> HeaderValue {
    let mut digits = [0u8; 20];
    let mut at = digits.len();
    let mut n = n;
    loop {
        at -= 1;
        digits[at] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    HeaderValue::from_bytes(&digits[at..]).expect("decimal digits are a valid header value")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONNECTION, CONTENT_LENGTH};

    fn serialized(response: &Response<'_>, include_body: bool) -> String {
        let mut buf = IoBuffer::new();
        response.serialize_into(&mut buf, include_body);
        String::from_utf8(buf.readable().to_vec()).unwrap()
    }

    #[test]
    fn serializes_status_line_headers_and_body() {
        let response = Response::ok("hello")
            .header(CONTENT_LENGTH, decimal_value(5))
            .header(CONNECTION, HeaderValue::from_static("keep-alive"));

        let text = serialized(&response, true);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-type: text/plain; charset=utf-8\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.contains("connection: keep-alive\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn elides_body_when_asked() {
        let response = Response::ok("hello").header(CONTENT_LENGTH, decimal_value(5));
        let text = serialized(&response, false);
        assert!(text.ends_with("\r\n\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert_eq!(response.body_len(), 5);
    }

    #[test]
    fn preserves_header_insertion_order() {
        let response = Response::new(StatusCode::NO_CONTENT)
            .header(HeaderName::from_static("x-first"), HeaderValue::from_static("1"))
            .header(HeaderName::from_static("x-second"), HeaderValue::from_static("2"));
        let text = serialized(&response, true);
        let first = text.find("x-first").unwrap();
        let second = text.find("x-second").unwrap();
        assert!(first < second);
    }

    #[test]
    fn decimal_value_formats_u64() {
        assert_eq!(decimal_value(0).to_str().unwrap(), "0");
        assert_eq!(decimal_value(42).to_str().unwrap(), "42");
        assert_eq!(decimal_value(u64::MAX).to_str().unwrap(), "18446744073709551615");
    }
}
