//! Decoder for chunked transfer encoding (RFC 7230 section 4.1).
//!
//! Byte-at-a-time state machine over the input span; decoded chunk data is
//! appended to the parser's contiguous body storage. Chunk extensions are
//! skipped, trailer fields are consumed and discarded. Both CRLF and bare
//! LF line ends are accepted.

use crate::protocol::ParseError;
use ChunkedState::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Read the chunk size in hex
    Size,
    /// Whitespace after the size
    SizeLws,
    /// Skip chunk extensions
    Extension,
    /// LF finishing the size line
    SizeLf,
    /// Chunk data
    Body,
    /// CR after chunk data
    BodyCr,
    /// LF after chunk data
    BodyLf,
    /// Start of a trailer line; a blank line here ends the body
    TrailerStart,
    /// Inside a trailer line
    Trailer,
    /// LF finishing a trailer line
    TrailerLf,
    /// LF finishing the terminating blank line
    EndLf,
    /// All chunks consumed
    End,
}

#[derive(Debug)]
pub(crate) struct ChunkedDecoder {
    state: ChunkedState,
    remaining: u64,
}

impl ChunkedDecoder {
    pub(crate) fn new() -> Self {
        Self { state: Size, remaining: 0 }
    }

    /// Decodes as much of `src` as possible, appending chunk data to `out`.
    ///
    /// Returns `(consumed, finished)`: the prefix length of `src` that was
    /// used and whether the final chunk has been fully read. The decoded
    /// body is bounded by `max_body`.
    pub(crate) fn decode(
        &mut self,
        src: &[u8],
        out: &mut Vec<u8>,
        max_body: u64,
    ) -> Result<(usize, bool), ParseError> {
        let mut pos = 0;

        while pos < src.len() {
            if self.state == End {
                break;
            }

            if self.state == Body {
                let take = (self.remaining.min((src.len() - pos) as u64)) as usize;
                if (out.len() + take) as u64 > max_body {
                    return Err(ParseError::BodyTooLarge { limit: max_body });
                }
                out.extend_from_slice(&src[pos..pos + take]);
                self.remaining -= take as u64;
                pos += take;
                if self.remaining == 0 {
                    self.state = BodyCr;
                }
                continue;
            }

            let byte = src[pos];
            pos += 1;
            self.state = self.step(byte)?;
        }

        Ok((pos, self.state == End))
    }

    fn step(&mut self, byte: u8) -> Result<ChunkedState, ParseError> {
        match self.state {
            Size => match byte {
                b @ b'0'..=b'9' => self.push_size_digit((b - b'0') as u64),
                b @ b'a'..=b'f' => self.push_size_digit((b + 10 - b'a') as u64),
                b @ b'A'..=b'F' => self.push_size_digit((b + 10 - b'A') as u64),
                b'\t' | b' ' => Ok(SizeLws),
                b';' => Ok(Extension),
                b'\r' => Ok(SizeLf),
                b'\n' => Ok(self.size_line_done()),
                _ => Err(ParseError::invalid_chunk("invalid chunk size byte")),
            },
            SizeLws => match byte {
                b'\t' | b' ' => Ok(SizeLws),
                b';' => Ok(Extension),
                b'\r' => Ok(SizeLf),
                b'\n' => Ok(self.size_line_done()),
                _ => Err(ParseError::invalid_chunk("invalid byte after chunk size")),
            },
            Extension => match byte {
                b'\r' => Ok(SizeLf),
                b'\n' => Ok(self.size_line_done()),
                _ => Ok(Extension),
            },
            SizeLf => match byte {
                b'\n' => Ok(self.size_line_done()),
                _ => Err(ParseError::invalid_chunk("expected LF after chunk size")),
            },
            Body => unreachable!("body bytes are consumed in bulk"),
            BodyCr => match byte {
                b'\r' => Ok(BodyLf),
                b'\n' => Ok(Size),
                _ => Err(ParseError::invalid_chunk("expected CRLF after chunk data")),
            },
            BodyLf => match byte {
                b'\n' => Ok(Size),
                _ => Err(ParseError::invalid_chunk("expected LF after chunk data")),
            },
            TrailerStart => match byte {
                b'\r' => Ok(EndLf),
                b'\n' => Ok(End),
                _ => Ok(Trailer),
            },
            Trailer => match byte {
                b'\r' => Ok(TrailerLf),
                b'\n' => Ok(TrailerStart),
                _ => Ok(Trailer),
            },
            TrailerLf => match byte {
                b'\n' => Ok(TrailerStart),
                _ => Err(ParseError::invalid_chunk("expected LF after trailer")),
            },
            EndLf => match byte {
                b'\n' => Ok(End),
                _ => Err(ParseError::invalid_chunk("expected LF ending the trailer section")),
            },
            End => Ok(End),
        }
    }

    fn push_size_digit(&mut self, digit: u64) -> Result<ChunkedState, ParseError> {
        self.remaining = self
            .remaining
            .checked_mul(16)
            .and_then(|n| n.checked_add(digit))
            .ok_or_else(|| ParseError::invalid_chunk("chunk size overflow"))?;
        Ok(Size)
    }

    /// After the size line: non-zero size reads data, zero size enters the
    /// trailer section.
    fn size_line_done(&mut self) -> ChunkedState {
        if self.remaining > 0 {
            Body
        } else {
            TrailerStart
        }
    }
}
