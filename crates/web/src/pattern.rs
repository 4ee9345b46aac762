//! Path patterns: literal and parameter segments with a priority score.
//!
//! Patterns are parsed once when the routing table is built, from constant
//! strings; any parse error aborts startup. A pattern is an ordered list of
//! segments, each fully literal or a single `{name}` parameter, plus a
//! trailing-slash flag that must match the request exactly. The priority
//! score orders competing matches: more literals win, and among equals the
//! pattern with fewer parameters wins.

use crate::params::PathParams;
use thiserror::Error;

/// Maximum number of path segments in a pattern or a routable request.
pub const MAX_SEGMENTS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("path pattern must not be empty")]
    Empty,

    #[error("path pattern {0:?} must start with '/'")]
    MissingLeadingSlash(String),

    #[error("path pattern {0:?} exceeds the segment limit")]
    TooManySegments(String),

    #[error("path pattern {0:?} contains an empty segment")]
    EmptySegment(String),

    #[error("path pattern {0:?} has an unbalanced brace in segment {1:?}")]
    UnbalancedBrace(String, String),

    #[error("path pattern {0:?} has an empty parameter name")]
    EmptyParam(String),

    #[error("path pattern {0:?} has nested braces in segment {1:?}")]
    NestedBrace(String, String),

    #[error("path pattern {0:?} has an invalid literal segment {1:?}")]
    InvalidLiteral(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    trailing_slash: bool,
    literal_count: u32,
    param_count: u32,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }
        if !pattern.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash(pattern.to_string()));
        }

        let trailing_slash = pattern.len() > 1 && pattern.ends_with('/');
        let core = &pattern[1..pattern.len() - usize::from(trailing_slash)];

        let mut segments = Vec::new();
        if !core.is_empty() {
            for segment in core.split('/') {
                segments.push(parse_segment(pattern, segment)?);
                if segments.len() > MAX_SEGMENTS {
                    return Err(PatternError::TooManySegments(pattern.to_string()));
                }
            }
        }

        let param_count = segments.iter().filter(|s| matches!(s, Segment::Param(_))).count() as u32;
        let literal_count = segments.len() as u32 - param_count;

        Ok(Self { raw: pattern.to_string(), segments, trailing_slash, literal_count, param_count })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn trailing_slash(&self) -> bool {
        self.trailing_slash
    }

    /// True when every segment is literal; such patterns are eligible for
    /// the hash-keyed fast path.
    pub fn is_static(&self) -> bool {
        self.param_count == 0
    }

    /// Priority of this pattern among competing matches. Higher wins.
    pub fn score(&self) -> u32 {
        self.literal_count * 16 + (MAX_SEGMENTS as u32 - self.param_count)
    }

    /// Whether `path` (query already stripped) matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        self.walk(path, |_, _| {})
    }

    /// Matches and records parameter captures into `params`. Captures are
    /// views into `path`; nothing is copied.
    pub fn capture<'s, 'r>(&'s self, path: &'r str, params: &mut PathParams<'s, 'r>) -> bool {
        params.clear();
        let matched = self.walk(path, |name, value| params.push(name, value));
        if !matched {
            params.clear();
        }
        matched
    }

    fn walk<'s, 'r>(&'s self, path: &'r str, mut capture: impl FnMut(&'s str, &'r str)) -> bool {
        let mut request_segments = [""; MAX_SEGMENTS];
        let Some((count, trailing)) = split_request_path(path, &mut request_segments) else {
            return false;
        };

        if count != self.segments.len() || trailing != self.trailing_slash {
            return false;
        }

        for (segment, request) in self.segments.iter().zip(&request_segments[..count]) {
            match segment {
                Segment::Literal(literal) => {
                    if literal != request {
                        return false;
                    }
                }
                Segment::Param(name) => {
                    if request.is_empty() {
                        return false;
                    }
                    capture(name, request);
                }
            }
        }
        true
    }
}

fn parse_segment(pattern: &str, segment: &str) -> Result<Segment, PatternError> {
    if segment.is_empty() {
        return Err(PatternError::EmptySegment(pattern.to_string()));
    }

    if let Some(rest) = segment.strip_prefix('{') {
        let Some(name) = rest.strip_suffix('}') else {
            return Err(PatternError::UnbalancedBrace(pattern.to_string(), segment.to_string()));
        };
        if name.is_empty() {
            return Err(PatternError::EmptyParam(pattern.to_string()));
        }
        if name.contains('{') || name.contains('}') {
            return Err(PatternError::NestedBrace(pattern.to_string(), segment.to_string()));
        }
        return Ok(Segment::Param(name.to_string()));
    }

    if segment.contains('{') || segment.contains('}') {
        // A brace anywhere else means the segment mixes literal and
        // parameter text.
        return Err(PatternError::UnbalancedBrace(pattern.to_string(), segment.to_string()));
    }

    if !valid_literal(segment) {
        return Err(PatternError::InvalidLiteral(pattern.to_string(), segment.to_string()));
    }

    Ok(Segment::Literal(segment.to_string()))
}

/// Literal segments are printable ASCII; non-ASCII must arrive
/// percent-encoded, and every '%' must introduce two hex digits.
fn valid_literal(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if !(0x21..=0x7e).contains(&b) {
            return false;
        }
        if b == b'%' {
            let encoded = bytes.get(i + 1).is_some_and(|b| b.is_ascii_hexdigit())
                && bytes.get(i + 2).is_some_and(|b| b.is_ascii_hexdigit());
            if !encoded {
                return false;
            }
            i += 2;
        }
        i += 1;
    }
    true
}

/// Splits a request path into its segments. Returns `None` when the path
/// cannot match any pattern (no leading slash or too many segments).
fn split_request_path<'r>(
    path: &'r str,
    out: &mut [&'r str; MAX_SEGMENTS],
) -> Option<(usize, bool)> {
    if !path.starts_with('/') {
        return None;
    }
    let trailing = path.len() > 1 && path.ends_with('/');
    let core = &path[1..path.len() - usize::from(trailing)];
    if core.is_empty() {
        return Some((0, trailing));
    }

    let mut count = 0;
    for segment in core.split('/') {
        if count == MAX_SEGMENTS {
            return None;
        }
        out[count] = segment;
        count += 1;
    }
    Some((count, trailing))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(s: &str) -> PathPattern {
        PathPattern::parse(s).unwrap()
    }

    #[test]
    fn parses_literals_and_params() {
        let p = pattern("/orders/{orderId}/items/{itemId}");
        assert_eq!(p.segments().len(), 4);
        assert!(!p.is_static());
        assert_eq!(
            p.segments()[1],
            Segment::Param("orderId".to_string())
        );
    }

    #[test]
    fn parse_errors() {
        assert_eq!(PathPattern::parse(""), Err(PatternError::Empty));
        assert!(matches!(
            PathPattern::parse("users/me"),
            Err(PatternError::MissingLeadingSlash(_))
        ));
        assert!(matches!(
            PathPattern::parse("/users/{id"),
            Err(PatternError::UnbalancedBrace(_, _))
        ));
        assert!(matches!(PathPattern::parse("/users/{}"), Err(PatternError::EmptyParam(_))));
        assert!(matches!(
            PathPattern::parse("/users/{{id}}"),
            Err(PatternError::NestedBrace(_, _))
        ));
        assert!(matches!(
            PathPattern::parse("/users/caf\u{e9}"),
            Err(PatternError::InvalidLiteral(_, _))
        ));
        assert!(matches!(PathPattern::parse("/a//b"), Err(PatternError::EmptySegment(_))));
        assert!(matches!(
            PathPattern::parse("/users/x{id}"),
            Err(PatternError::UnbalancedBrace(_, _))
        ));
    }

    #[test]
    fn percent_encoded_literals_are_accepted() {
        assert!(PathPattern::parse("/caf%C3%A9").is_ok());
        assert!(matches!(
            PathPattern::parse("/caf%zz"),
            Err(PatternError::InvalidLiteral(_, _))
        ));
    }

    #[test]
    fn trailing_slash_policy() {
        assert!(!pattern("/a/b").matches("/a/b/"));
        assert!(pattern("/a/b").matches("/a/b"));
        assert!(pattern("/a/b/").matches("/a/b/"));
        assert!(!pattern("/a/b/").matches("/a/b"));
    }

    #[test]
    fn root_matches_root_only() {
        let root = pattern("/");
        assert!(root.matches("/"));
        assert!(!root.matches("/a"));
    }

    #[test]
    fn params_accept_any_nonempty_segment() {
        let p = pattern("/users/{id}");
        assert!(p.matches("/users/42"));
        assert!(p.matches("/users/anything-at-all"));
        assert!(!p.matches("/users"));
        assert!(!p.matches("/users/42/posts"));
    }

    #[test]
    fn capture_records_views_into_the_path() {
        let p = pattern("/orders/{orderId}/items/{itemId}");
        let path = "/orders/abc/items/99";
        let mut params = PathParams::empty();

        assert!(p.capture(path, &mut params));
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("orderId"), Some("abc"));
        assert_eq!(params.get("itemId"), Some("99"));

        // Zero-copy: values point into the request path.
        let value = params.get("orderId").unwrap();
        assert_eq!(value.as_ptr(), path[8..].as_ptr());
    }

    #[test]
    fn failed_capture_leaves_no_partial_params() {
        let p = pattern("/a/{x}/c");
        let mut params = PathParams::empty();
        assert!(!p.capture("/a/b/zzz", &mut params));
        assert!(params.is_empty());
    }

    #[test]
    fn score_prefers_literals() {
        let static_pattern = pattern("/users/me");
        let param_pattern = pattern("/users/{id}");
        assert!(static_pattern.score() > param_pattern.score());

        // All-literal two segments: 2*16 + 16; one param: 16 + 15.
        assert_eq!(static_pattern.score(), 48);
        assert_eq!(param_pattern.score(), 31);
    }

    #[test]
    fn too_many_segments_rejected() {
        let deep = format!("/{}", vec!["a"; MAX_SEGMENTS + 1].join("/"));
        assert!(matches!(PathPattern::parse(&deep), Err(PatternError::TooManySegments(_))));
    }
}
