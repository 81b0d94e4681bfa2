//! Assembly of one REST request from parsed HTTP events.
//!
//! The HTTP codec delivers a head followed by body chunks and a terminal
//! event. [`RequestAssembler`] fuses them into an [`AssembledRequest`] and
//! enforces that only one request per connection is being assembled or
//! handled at a time.
//!
//! ```text
//! Idle --head--> HeadersReceived --chunk--> BodyAccumulating
//!   ^                  |                          |
//!   |                  +----------end-------------+--> Complete
//!   +------------------------finish()-------------------+
//! ```

use bytes::{Bytes, BytesMut};
use hyper::header::{HeaderMap, EXPECT};
use hyper::{Method, Uri, Version};

use crate::rest::error::RestError;
use crate::rest::request::RestRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Idle,
    HeadersReceived,
    BodyAccumulating,
    /// A request was emitted and is being handled.
    Complete,
}

/// Request line and headers of an HTTP request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn from_parts(parts: &hyper::http::request::Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: parts.headers.clone(),
        }
    }

    pub fn expects_continue(&self) -> bool {
        self.headers
            .get(EXPECT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    }

    /// The same head once the interim response has been sent.
    pub fn without_expectation(mut self) -> Self {
        self.headers.remove(EXPECT);
        self
    }
}

#[derive(Debug)]
pub enum HttpEvent {
    Head(RequestHead),
    Chunk(Bytes),
    /// Body ended normally.
    End,
    /// Body could not be decoded; terminal.
    DecodeFailure(String),
}

/// Raw HTTP request fused with its parsed REST form.
#[derive(Debug)]
pub struct AssembledRequest {
    pub head: RequestHead,
    pub body: Bytes,
    pub request: RestRequest,
}

#[derive(Debug)]
pub enum AssemblyAction {
    /// Keep feeding events.
    Pending,
    /// Peer awaits an interim `100 Continue` before sending the body.
    Continue,
    /// Answer with a client error; the assembler is idle again.
    Reject(RestError),
    Emit(AssembledRequest),
    /// Invariant violated; the connection must be closed.
    Fatal(RestError),
}

#[derive(Debug)]
pub struct RequestAssembler {
    state: AssemblyState,
    pending: Option<(RequestHead, RestRequest)>,
    body: BytesMut,
}

impl RequestAssembler {
    pub fn new() -> Self {
        Self {
            state: AssemblyState::Idle,
            pending: None,
            body: BytesMut::new(),
        }
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    pub fn on_event(&mut self, event: HttpEvent) -> AssemblyAction {
        match event {
            HttpEvent::Head(head) => self.on_head(head),
            HttpEvent::Chunk(chunk) => self.on_chunk(chunk),
            HttpEvent::End => self.on_end(),
            HttpEvent::DecodeFailure(cause) => {
                self.reset();
                AssemblyAction::Reject(RestError::Decode(cause))
            }
        }
    }

    /// Returns to idle once the emitted request has been answered.
    pub fn finish(&mut self) {
        if self.state == AssemblyState::Complete {
            self.state = AssemblyState::Idle;
        }
    }

    /// Drops any half-assembled request.
    pub fn connection_inactive(&mut self) {
        if self.state != AssemblyState::Idle {
            tracing::debug!(state = ?self.state, "Discarding partially assembled request");
        }
        self.reset();
    }

    fn on_head(&mut self, head: RequestHead) -> AssemblyAction {
        if self.state != AssemblyState::Idle {
            let state = self.state;
            self.reset();
            return AssemblyAction::Fatal(RestError::Protocol(format!(
                "request {} {} started while the previous one is {state:?}",
                head.method, head.uri
            )));
        }
        if head.expects_continue() {
            return AssemblyAction::Continue;
        }
        match RestRequest::new(head.method.as_str(), head.uri.path()) {
            Ok(request) => {
                self.pending = Some((head, request));
                self.state = AssemblyState::HeadersReceived;
                AssemblyAction::Pending
            }
            Err(e) => {
                self.reset();
                AssemblyAction::Reject(e.into())
            }
        }
    }

    fn on_chunk(&mut self, chunk: Bytes) -> AssemblyAction {
        match self.state {
            AssemblyState::HeadersReceived | AssemblyState::BodyAccumulating => {
                self.body.extend_from_slice(&chunk);
                self.state = AssemblyState::BodyAccumulating;
                AssemblyAction::Pending
            }
            state => {
                self.reset();
                AssemblyAction::Fatal(RestError::Protocol(format!(
                    "request content received while {state:?}"
                )))
            }
        }
    }

    fn on_end(&mut self) -> AssemblyAction {
        match (self.state, self.pending.take()) {
            (AssemblyState::HeadersReceived | AssemblyState::BodyAccumulating, Some((head, request))) => {
                self.state = AssemblyState::Complete;
                AssemblyAction::Emit(AssembledRequest {
                    head,
                    body: self.body.split().freeze(),
                    request,
                })
            }
            (state, _) => {
                self.reset();
                AssemblyAction::Fatal(RestError::Protocol(format!(
                    "end of request content received while {state:?}"
                )))
            }
        }
    }

    fn reset(&mut self) {
        self.state = AssemblyState::Idle;
        self.pending = None;
        self.body.clear();
    }
}

impl Default for RequestAssembler {
    fn default() -> Self {
        Self::new()
    }
}
