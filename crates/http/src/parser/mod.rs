//! Incremental HTTP/1.1 request parser.
//!
//! The parser is fed spans from the connection's read buffer and reports
//! how many prefix bytes it consumed, so the buffer can discard exactly
//! that much and keep pipelined follow-up requests intact. Request-scoped
//! bytes (the head and the decoded body) live in parser-owned storage whose
//! capacity is retained across `reset`, and [`HttpParser::request`] hands
//! out borrowed views that stay valid until the next reset.
//!
//! States: request head (request line + header block, accepted with CRLF or
//! bare LF line ends) -> body (`Content-Length` or chunked) -> complete,
//! with a failed sink state once an error has been reported.

mod chunked;

use crate::config::ParserLimits;
use crate::ensure;
use crate::protocol::request::HeaderSlot;
use crate::protocol::{Field, HeadersView, ParseError, Request};
use chunked::ChunkedDecoder;
use http::{Method, Version};
use std::mem::MaybeUninit;
use tracing::trace;

/// Capacity of the httparse scratch array; the configured header-count
/// limit is enforced separately and must be below this.
const MAX_HEADERS_PARSE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Head,
    Body,
    Chunked,
    Complete,
    Failed,
}

pub struct HttpParser {
    limits: ParserLimits,
    state: ParseState,
    head: Vec<u8>,
    head_scan: usize,
    first_line_end: Option<usize>,
    method: Method,
    uri: (u32, u32),
    version: Version,
    slots: Vec<HeaderSlot>,
    body: Vec<u8>,
    body_remaining: u64,
    chunked: Option<ChunkedDecoder>,
    expect_continue: bool,
}

impl HttpParser {
    pub fn new(limits: ParserLimits) -> Self {
        Self {
            limits,
            state: ParseState::Head,
            head: Vec::with_capacity(1024),
            head_scan: 0,
            first_line_end: None,
            method: Method::GET,
            uri: (0, 0),
            version: Version::HTTP_11,
            slots: Vec::with_capacity(16),
            body: Vec::new(),
            body_remaining: 0,
            chunked: None,
            expect_continue: false,
        }
    }

    /// Consumes a prefix of `data` and returns its length.
    ///
    /// Callers feed the readable span of their buffer and discard the
    /// consumed prefix after each call. Once a request is complete no
    /// further bytes are consumed until `reset`.
    pub fn parse(&mut self, data: &[u8]) -> Result<usize, ParseError> {
        let result = self.parse_inner(data);
        if result.is_err() {
            self.state = ParseState::Failed;
        }
        result
    }

    fn parse_inner(&mut self, data: &[u8]) -> Result<usize, ParseError> {
        let mut consumed = 0;

        loop {
            match self.state {
                ParseState::Head => {
                    // Robustness: ignore empty lines preceding the request
                    // line (RFC 7230 section 3.5).
                    while self.head.is_empty()
                        && consumed < data.len()
                        && (data[consumed] == b'\r' || data[consumed] == b'\n')
                    {
                        consumed += 1;
                    }
                    if consumed == data.len() {
                        return Ok(consumed);
                    }

                    let budget = self.limits.max_header_bytes - self.head.len();
                    let take = (data.len() - consumed).min(budget);
                    self.head.extend_from_slice(&data[consumed..consumed + take]);

                    if self.first_line_end.is_none() {
                        self.first_line_end =
                            self.head[self.head_scan..].iter().position(|&b| b == b'\n').map(|at| self.head_scan + at);
                    }

                    match find_head_end(&self.head, self.head_scan) {
                        Some(end) => {
                            let overshoot = self.head.len() - end;
                            self.head.truncate(end);
                            consumed += take - overshoot;
                            trace!(head_bytes = end, "request head complete");
                            self.parse_head()?;
                        }
                        None => {
                            consumed += take;
                            self.head_scan = self.head.len().saturating_sub(3);
                            ensure!(
                                self.head.len() < self.limits.max_header_bytes,
                                ParseError::HeaderSectionTooLarge {
                                    current: self.head.len(),
                                    limit: self.limits.max_header_bytes,
                                }
                            );
                            ensure!(
                                self.first_line_end.is_some()
                                    || self.head.len() <= self.limits.max_request_line_bytes,
                                ParseError::RequestLineTooLong {
                                    limit: self.limits.max_request_line_bytes,
                                }
                            );
                            return Ok(consumed);
                        }
                    }
                }

                ParseState::Body => {
                    let take = (self.body_remaining.min((data.len() - consumed) as u64)) as usize;
                    self.body.extend_from_slice(&data[consumed..consumed + take]);
                    self.body_remaining -= take as u64;
                    consumed += take;
                    if self.body_remaining == 0 {
                        self.state = ParseState::Complete;
                    }
                    if consumed == data.len() || self.state == ParseState::Complete {
                        return Ok(consumed);
                    }
                }

                ParseState::Chunked => {
                    let decoder = self.chunked.as_mut().expect("chunked state has a decoder");
                    let (used, finished) =
                        decoder.decode(&data[consumed..], &mut self.body, self.limits.max_body_bytes)?;
                    consumed += used;
                    if finished {
                        self.chunked = None;
                        self.state = ParseState::Complete;
                    }
                    return Ok(consumed);
                }

                ParseState::Complete | ParseState::Failed => return Ok(consumed),
            }
        }
    }

    /// Parses the buffered head with httparse and records header name/value
    /// ranges relative to the head storage.
    fn parse_head(&mut self) -> Result<(), ParseError> {
        let limits = self.limits;

        let line_len = match self.first_line_end {
            Some(end) => self.head[..end].strip_suffix(b"\r").map(|l| l.len()).unwrap_or(end),
            None => self.head.len(),
        };
        ensure!(
            line_len <= limits.max_request_line_bytes,
            ParseError::RequestLineTooLong { limit: limits.max_request_line_bytes }
        );

        let (method, uri, version, slots) = {
            let mut req = httparse::Request::new(&mut []);
            let mut headers: [MaybeUninit<httparse::Header>; MAX_HEADERS_PARSE] =
                unsafe { MaybeUninit::uninit().assume_init() };

            let status = req.parse_with_uninit_headers(&self.head, &mut headers).map_err(|e| match e {
                httparse::Error::TooManyHeaders => {
                    ParseError::TooManyHeaders { limit: limits.max_header_count }
                }
                e => ParseError::invalid_request(e.to_string()),
            })?;

            match status {
                httparse::Status::Complete(_) => {}
                httparse::Status::Partial => {
                    return Err(ParseError::invalid_request("truncated request head"))
                }
            }

            ensure!(
                req.headers.len() <= limits.max_header_count,
                ParseError::TooManyHeaders { limit: limits.max_header_count }
            );

            let version = match req.version {
                Some(0) => Version::HTTP_10,
                Some(1) => Version::HTTP_11,
                // http2/3 are negotiated elsewhere; a request line claiming
                // them over cleartext is malformed for this listener.
                other => return Err(ParseError::InvalidVersion(other)),
            };

            let method_token = req.method.ok_or(ParseError::InvalidMethod)?;
            let method =
                Method::from_bytes(method_token.as_bytes()).map_err(|_| ParseError::InvalidMethod)?;

            let path = req.path.ok_or_else(|| ParseError::invalid_request("missing request target"))?;
            ensure!(path.len() <= limits.max_uri_bytes, ParseError::UriTooLong { limit: limits.max_uri_bytes });
            ensure!(path.is_ascii(), ParseError::invalid_request("non-ascii request target"));

            let base = self.head.as_ptr() as usize;
            let uri_start = (path.as_ptr() as usize - base) as u32;
            let uri = (uri_start, uri_start + path.len() as u32);

            let mut slots = Vec::with_capacity(req.headers.len());
            for header in req.headers.iter() {
                let name_start = header.name.as_ptr() as usize - base;
                let name = (name_start as u32, (name_start + header.name.len()) as u32);

                let value_start = header.value.as_ptr() as usize - base;
                let mut value = (value_start as u32, (value_start + header.value.len()) as u32);
                trim_lws(&self.head, &mut value);

                slots.push(HeaderSlot {
                    name,
                    value,
                    field: Field::from_name(header.name.as_bytes()),
                });
            }

            (method, uri, version, slots)
        };

        self.method = method;
        self.uri = uri;
        self.version = version;
        self.slots = slots;

        self.decide_framing()
    }

    /// Body framing per RFC 7230 section 3.3: exact `Content-Length`,
    /// chunked transfer coding, or neither. Both at once is rejected.
    fn decide_framing(&mut self) -> Result<(), ParseError> {
        let te = self.field_value(Field::TransferEncoding);
        let cl = self.field_value(Field::ContentLength);

        self.state = match (te, cl) {
            (None, None) => ParseState::Complete,

            (Some(te_value), None) => {
                let chunked = te_value
                    .rsplit(',')
                    .next()
                    .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
                    .unwrap_or(false);
                if chunked {
                    self.chunked = Some(ChunkedDecoder::new());
                    ParseState::Chunked
                } else {
                    ParseState::Complete
                }
            }

            (None, Some(cl_value)) => {
                let length = cl_value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ParseError::invalid_content_length(format!("value {cl_value} is not u64")))?;
                ensure!(
                    length <= self.limits.max_body_bytes,
                    ParseError::BodyTooLarge { limit: self.limits.max_body_bytes }
                );
                if length == 0 {
                    ParseState::Complete
                } else {
                    self.body_remaining = length;
                    self.body.reserve(length.min(1024 * 1024) as usize);
                    ParseState::Body
                }
            }

            (Some(_), Some(_)) => return Err(ParseError::ConflictingFraming),
        };

        if matches!(self.state, ParseState::Body | ParseState::Chunked) {
            if let Some(expect) = self.field_value(Field::Expect) {
                // "100-continue" per RFC 7231 section 5.1.1; match the
                // prefix the way clients actually send it.
                self.expect_continue = expect.len() >= 4 && expect[..4].eq_ignore_ascii_case("100-");
            }
        }

        Ok(())
    }

    fn field_value(&self, field: Field) -> Option<&str> {
        self.slots
            .iter()
            .find(|slot| slot.field == Some(field))
            .and_then(|slot| {
                std::str::from_utf8(&self.head[slot.value.0 as usize..slot.value.1 as usize]).ok()
            })
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Complete
    }

    /// True once any byte of the current request has been seen; used to
    /// pick the read deadline over the idle deadline when parking.
    pub fn in_progress(&self) -> bool {
        self.state != ParseState::Head || !self.head.is_empty()
    }

    /// True while a body is outstanding for a request that asked for
    /// `Expect: 100-continue`.
    pub fn wants_continue(&self) -> bool {
        self.expect_continue && matches!(self.state, ParseState::Body | ParseState::Chunked)
    }

    /// Borrowed view of the completed request. Valid until `reset`.
    pub fn request(&self) -> Request<'_> {
        debug_assert!(self.is_complete());
        let (start, end) = (self.uri.0 as usize, self.uri.1 as usize);
        // SAFETY: the request target was checked to be ASCII in parse_head.
        let uri = unsafe { std::str::from_utf8_unchecked(&self.head[start..end]) };
        Request::new(
            &self.method,
            uri,
            self.version,
            HeadersView::new(&self.head, &self.slots),
            &self.body,
        )
    }

    /// Returns the parser to its initial state, retaining storage capacity.
    pub fn reset(&mut self) {
        self.state = ParseState::Head;
        self.head.clear();
        self.head_scan = 0;
        self.first_line_end = None;
        self.uri = (0, 0);
        self.slots.clear();
        self.body.clear();
        self.body_remaining = 0;
        self.chunked = None;
        self.expect_continue = false;
    }
}

/// Finds the end of the head: an LF followed by an (optionally CR-prefixed)
/// LF. Returns the index one past the terminator.
fn find_head_end(head: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < head.len() {
        if head[i] == b'\n' {
            match head.get(i + 1) {
                Some(b'\n') => return Some(i + 2),
                Some(b'\r') => {
                    if let Some(b'\n') = head.get(i + 2) {
                        return Some(i + 3);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn trim_lws(head: &[u8], span: &mut (u32, u32)) {
    while span.0 < span.1 && matches!(head[span.0 as usize], b' ' | b'\t') {
        span.0 += 1;
    }
    while span.1 > span.0 && matches!(head[span.1 as usize - 1], b' ' | b'\t') {
        span.1 -= 1;
    }
}
