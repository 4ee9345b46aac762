//! Per-connection state machine.
//!
//! A connection moves between reading, dispatching, writing and closing.
//! `drive` is called on every readiness or timer event and works until it
//! would block: it resumes a pending response flush, pulls bytes into the
//! read buffer, feeds the parser, dispatches completed requests through the
//! service, serializes the response and drains it. Keep-alive iterations
//! reset only the arena and the parser; bytes of pipelined follow-up
//! requests stay in the read buffer and are handled before the connection
//! parks again.

use crate::arena::MonotonicArena;
use crate::buffer::IoBuffer;
use crate::config::ParserLimits;
use crate::date::DateService;
use crate::metrics::CloseReason;
use crate::parser::HttpParser;
use crate::protocol::response::decimal_value;
use crate::protocol::{ProblemDetails, Response};
use crate::service::Service;
use http::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, DATE, SERVER};
use http::Method;
use mio::net::TcpStream;
use mio::{Interest, Token};
use std::io::{Read, Write};
use tracing::{debug, trace};

const READ_CHUNK: usize = 4096;

/// Why a parked connection is waiting, which picks its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkKind {
    /// Between requests; idle timeout applies.
    Idle,
    /// Mid-request read; read timeout applies.
    MidRequest,
    /// Response drain; write timeout applies.
    Write,
}

/// Result of one drive pass.
#[derive(Debug)]
pub enum DriveOutcome {
    Park { interest: Interest, kind: ParkKind },
    Close(CloseReason),
}

enum Flush {
    Done,
    Parked,
    Error(std::io::Error),
}

enum Fill {
    Data,
    Parked,
    Eof,
    Error(std::io::Error),
}

/// Default response headers attached before serialization.
pub struct ResponseDefaults<'a> {
    pub date: &'a DateService,
    pub server: &'a HeaderValue,
}

pub struct ConnectionDriver {
    stream: TcpStream,
    token: Token,
    read_buf: IoBuffer,
    write_buf: IoBuffer,
    parser: HttpParser,
    arena: MonotonicArena,
    close_requested: bool,
    /// A final response sits (partially) in the write buffer.
    response_pending: bool,
    continue_sent: bool,
}

impl ConnectionDriver {
    pub fn new(stream: TcpStream, token: Token, limits: ParserLimits) -> Self {
        Self {
            stream,
            token,
            read_buf: IoBuffer::new(),
            write_buf: IoBuffer::new(),
            parser: HttpParser::new(limits),
            arena: MonotonicArena::new(),
            close_requested: false,
            response_pending: false,
            continue_sent: false,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// True when no request or response is in flight.
    pub fn is_idle(&self) -> bool {
        self.write_buf.is_empty() && self.read_buf.is_empty() && !self.parser.in_progress()
    }

    /// Runs the state machine until it blocks or the connection is done.
    ///
    /// With `shutting_down` set, completed exchanges are answered with
    /// `Connection: close` and the connection is torn down after the
    /// response drains.
    pub fn drive(
        &mut self,
        service: &dyn Service,
        defaults: &ResponseDefaults<'_>,
        shutting_down: bool,
    ) -> DriveOutcome {
        // Resume a response (or interim 100-continue) that could not drain.
        if !self.write_buf.is_empty() {
            match self.flush_write() {
                Flush::Parked => {
                    return DriveOutcome::Park { interest: Interest::WRITABLE, kind: ParkKind::Write }
                }
                Flush::Error(e) => {
                    debug!(cause = %e, "write failed, closing connection");
                    return DriveOutcome::Close(CloseReason::WriteError);
                }
                Flush::Done => {
                    if self.response_pending {
                        self.response_pending = false;
                        if self.close_requested {
                            return DriveOutcome::Close(CloseReason::CloseHeader);
                        }
                        self.finish_exchange();
                    }
                }
            }
        }

        loop {
            if !self.read_buf.is_empty() {
                let consumed = match self.parser.parse(self.read_buf.readable()) {
                    Ok(n) => n,
                    Err(e) => {
                        debug!(cause = %e, "request parse failed");
                        let problem = ProblemDetails::bad_request(e.to_string());
                        let mut response = problem.to_response();
                        finalize_response(&mut response, true, defaults);
                        response.serialize_into(&mut self.write_buf, true);
                        // Best effort: the 400 may not fully drain, the
                        // connection is going away either way.
                        let _ = self.flush_write();
                        return DriveOutcome::Close(CloseReason::ParseError);
                    }
                };
                self.read_buf.consume(consumed);
            }

            if self.parser.wants_continue() && !self.continue_sent {
                self.continue_sent = true;
                self.write_buf.extend_from_slice(b"HTTP/1.1 100 Continue\r\n\r\n");
                match self.flush_write() {
                    Flush::Parked => {
                        return DriveOutcome::Park {
                            interest: Interest::WRITABLE,
                            kind: ParkKind::Write,
                        }
                    }
                    Flush::Error(e) => {
                        debug!(cause = %e, "interim response write failed");
                        return DriveOutcome::Close(CloseReason::WriteError);
                    }
                    Flush::Done => {}
                }
            }

            if self.parser.is_complete() {
                let close_conn = {
                    let request = self.parser.request();
                    let close = request.connection_close() || shutting_down;
                    let include_body = request.method() != Method::HEAD;
                    trace!(method = %request.method(), uri = request.uri(), "dispatching request");

                    let mut response = service.handle(&request, &self.arena);
                    finalize_response(&mut response, close, defaults);
                    response.serialize_into(&mut self.write_buf, include_body);
                    close
                };

                self.close_requested = close_conn;
                self.response_pending = true;

                match self.flush_write() {
                    Flush::Parked => {
                        return DriveOutcome::Park {
                            interest: Interest::WRITABLE,
                            kind: ParkKind::Write,
                        }
                    }
                    Flush::Error(e) => {
                        debug!(cause = %e, "response write failed");
                        return DriveOutcome::Close(CloseReason::WriteError);
                    }
                    Flush::Done => {
                        self.response_pending = false;
                        if close_conn {
                            return DriveOutcome::Close(CloseReason::CloseHeader);
                        }
                        self.finish_exchange();
                        // Pipelined bytes, if any, are parsed on the next
                        // loop iteration before the connection parks.
                    }
                }
            } else {
                match self.fill_read() {
                    Fill::Data => {}
                    Fill::Parked => {
                        let kind = if self.parser.in_progress() {
                            ParkKind::MidRequest
                        } else {
                            ParkKind::Idle
                        };
                        return DriveOutcome::Park { interest: Interest::READABLE, kind };
                    }
                    Fill::Eof => return DriveOutcome::Close(CloseReason::ReadEof),
                    Fill::Error(e) => {
                        debug!(cause = %e, "read failed, closing connection");
                        return DriveOutcome::Close(CloseReason::ReadError);
                    }
                }
            }
        }
    }

    /// Keep-alive boundary: request-scoped state is dropped, buffered
    /// pipelined bytes and the connection itself survive.
    fn finish_exchange(&mut self) {
        self.close_requested = false;
        self.continue_sent = false;
        self.arena.reset();
        self.parser.reset();
    }

    fn flush_write(&mut self) -> Flush {
        while !self.write_buf.is_empty() {
            match self.stream.write(self.write_buf.readable()) {
                Ok(0) => {
                    return Flush::Error(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "socket write returned zero",
                    ))
                }
                Ok(n) => self.write_buf.consume(n),
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return Flush::Parked,
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Flush::Error(e),
            }
        }
        Flush::Done
    }

    fn fill_read(&mut self) -> Fill {
        loop {
            let span = self.read_buf.writable(READ_CHUNK);
            return match self.stream.read(span) {
                Ok(0) => Fill::Eof,
                Ok(n) => {
                    self.read_buf.commit(n);
                    Fill::Data
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Fill::Parked,
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => Fill::Error(e),
            };
        }
    }
}

/// Attaches the default headers the wire contract promises on every
/// response: exact `Content-Length`, `Connection`, `Date`, `Server`.
/// Handler-set headers win.
fn finalize_response(response: &mut Response<'_>, close: bool, defaults: &ResponseDefaults<'_>) {
    if !response.has_header(&CONTENT_LENGTH) {
        response.set_header(CONTENT_LENGTH, decimal_value(response.body_len() as u64));
    }
    if !response.has_header(&CONNECTION) {
        let value =
            if close { HeaderValue::from_static("close") } else { HeaderValue::from_static("keep-alive") };
        response.set_header(CONNECTION, value);
    }
    if !response.has_header(&DATE) {
        response.set_header(DATE, defaults.date.header_value());
    }
    if !response.has_header(&SERVER) {
        response.set_header(SERVER, defaults.server.clone());
    }
}
