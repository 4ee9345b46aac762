//! Borrowed views over a parsed request.
//!
//! The parser owns the request-scoped byte storage; [`Request`] and
//! [`HeadersView`] borrow it and stay valid until the parser is reset. No
//! request field is heap-allocated per request.

use crate::arena::MonotonicArena;
use http::{Method, Version};

/// Well-known header names addressed by index instead of string lookup.
///
/// Resolved once per header when the head is parsed; lookups against these
/// compare a single byte. Unknown names fall back to case-insensitive
/// string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Accept,
    AcceptEncoding,
    AcceptLanguage,
    Authorization,
    CacheControl,
    Connection,
    ContentLength,
    ContentType,
    Cookie,
    Date,
    Expect,
    Host,
    Origin,
    Referer,
    Server,
    TransferEncoding,
    UserAgent,
}

impl Field {
    /// Resolves a header name to its index, case-insensitively.
    pub fn from_name(name: &[u8]) -> Option<Field> {
        let field = match name.len() {
            4 => match name {
                n if n.eq_ignore_ascii_case(b"host") => Field::Host,
                n if n.eq_ignore_ascii_case(b"date") => Field::Date,
                _ => return None,
            },
            6 => match name {
                n if n.eq_ignore_ascii_case(b"accept") => Field::Accept,
                n if n.eq_ignore_ascii_case(b"cookie") => Field::Cookie,
                n if n.eq_ignore_ascii_case(b"server") => Field::Server,
                n if n.eq_ignore_ascii_case(b"origin") => Field::Origin,
                n if n.eq_ignore_ascii_case(b"expect") => Field::Expect,
                _ => return None,
            },
            7 => match name {
                n if n.eq_ignore_ascii_case(b"referer") => Field::Referer,
                _ => return None,
            },
            10 => match name {
                n if n.eq_ignore_ascii_case(b"connection") => Field::Connection,
                n if n.eq_ignore_ascii_case(b"user-agent") => Field::UserAgent,
                _ => return None,
            },
            12 => match name {
                n if n.eq_ignore_ascii_case(b"content-type") => Field::ContentType,
                _ => return None,
            },
            13 => match name {
                n if n.eq_ignore_ascii_case(b"authorization") => Field::Authorization,
                n if n.eq_ignore_ascii_case(b"cache-control") => Field::CacheControl,
                _ => return None,
            },
            14 => match name {
                n if n.eq_ignore_ascii_case(b"content-length") => Field::ContentLength,
                _ => return None,
            },
            15 => match name {
                n if n.eq_ignore_ascii_case(b"accept-encoding") => Field::AcceptEncoding,
                n if n.eq_ignore_ascii_case(b"accept-language") => Field::AcceptLanguage,
                _ => return None,
            },
            17 => match name {
                n if n.eq_ignore_ascii_case(b"transfer-encoding") => Field::TransferEncoding,
                _ => return None,
            },
            _ => return None,
        };
        Some(field)
    }
}

/// Byte ranges of one header's name and value inside the head storage,
/// with the known-header index resolved up front.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeaderSlot {
    pub(crate) name: (u32, u32),
    pub(crate) value: (u32, u32),
    pub(crate) field: Option<Field>,
}

/// Ordered, case-insensitive view of the request headers.
#[derive(Debug, Clone, Copy)]
pub struct HeadersView<'a> {
    head: &'a [u8],
    slots: &'a [HeaderSlot],
}

impl<'a> HeadersView<'a> {
    pub(crate) fn new(head: &'a [u8], slots: &'a [HeaderSlot]) -> Self {
        Self { head, slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// First value for a well-known header.
    pub fn get_field(&self, field: Field) -> Option<&'a str> {
        self.slots
            .iter()
            .find(|slot| slot.field == Some(field))
            .and_then(|slot| as_str(self.head, slot.value))
    }

    /// First value for `name`, case-insensitively. Known names take the
    /// indexed fast path.
    pub fn get(&self, name: &str) -> Option<&'a str> {
        if let Some(field) = Field::from_name(name.as_bytes()) {
            return self.get_field(field);
        }
        self.slots
            .iter()
            .find(|slot| range(self.head, slot.name).eq_ignore_ascii_case(name.as_bytes()))
            .and_then(|slot| as_str(self.head, slot.value))
    }

    /// All values for `name` in insertion order.
    pub fn get_all(&self, name: &'a str) -> impl Iterator<Item = &'a str> + '_ {
        let field = Field::from_name(name.as_bytes());
        self.slots
            .iter()
            .filter(move |slot| match field {
                Some(f) => slot.field == Some(f),
                None => range(self.head, slot.name).eq_ignore_ascii_case(name.as_bytes()),
            })
            .filter_map(|slot| as_str(self.head, slot.value))
    }

    /// Duplicate field values combined with ", " per RFC 7230, allocated in
    /// `arena`. `Set-Cookie` is exempt from combining and yields its first
    /// value only.
    pub fn combined<'r>(&self, name: &'a str, arena: &'r MonotonicArena) -> Option<&'r str> {
        if name.eq_ignore_ascii_case("set-cookie") {
            return self.get(name).map(|v| arena.alloc_str(v));
        }
        let mut out: Option<String> = None;
        for value in self.get_all(name) {
            match &mut out {
                Some(acc) => {
                    acc.push_str(", ");
                    acc.push_str(value);
                }
                None => out = Some(value.to_string()),
            }
        }
        out.map(|joined| arena.alloc_str(&joined))
    }

    /// Iterates `(name, value)` pairs in insertion order, original casing.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.slots.iter().filter_map(|slot| {
            let name = as_str(self.head, slot.name)?;
            let value = as_str(self.head, slot.value)?;
            Some((name, value))
        })
    }
}

fn range(head: &[u8], (start, end): (u32, u32)) -> &[u8] {
    &head[start as usize..end as usize]
}

fn as_str(head: &[u8], span: (u32, u32)) -> Option<&str> {
    // Header values may legally carry obs-text bytes; such values are
    // treated as absent rather than exposed as broken strings.
    std::str::from_utf8(range(head, span)).ok()
}

/// A parsed request, borrowed from the parser's request-scoped storage.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    method: &'a Method,
    uri: &'a str,
    version: Version,
    headers: HeadersView<'a>,
    body: &'a [u8],
}

impl<'a> Request<'a> {
    pub(crate) fn new(
        method: &'a Method,
        uri: &'a str,
        version: Version,
        headers: HeadersView<'a>,
        body: &'a [u8],
    ) -> Self {
        Self { method, uri, version, headers, body }
    }

    pub fn method(&self) -> &Method {
        self.method
    }

    /// Request target as sent, including any query string.
    pub fn uri(&self) -> &'a str {
        self.uri
    }

    /// Path portion of the target, query stripped.
    pub fn path(&self) -> &'a str {
        match self.uri.find('?') {
            Some(at) => &self.uri[..at],
            None => self.uri,
        }
    }

    pub fn query(&self) -> Option<&'a str> {
        self.uri.find('?').map(|at| &self.uri[at + 1..])
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeadersView<'a> {
        &self.headers
    }

    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// Whether the connection must close after this exchange.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close`;
    /// HTTP/1.0 defaults to close unless `Connection: keep-alive`.
    pub fn connection_close(&self) -> bool {
        let default_close = self.version == Version::HTTP_10;
        match self.headers.get_field(Field::Connection) {
            Some(value) => {
                if contains_token(value, "close") {
                    true
                } else if contains_token(value, "keep-alive") {
                    false
                } else {
                    default_close
                }
            }
            None => default_close,
        }
    }
}

fn contains_token(value: &str, token: &str) -> bool {
    value.split(',').any(|part| part.trim().eq_ignore_ascii_case(token))
}
