//! Correlation of inbound replies with outstanding requests.
//!
//! Replies are matched, in order of preference:
//!
//! 1. by the echoed `request_id`, when the server sends one;
//! 2. by `command_type`, to the oldest outstanding request of that kind;
//! 3. otherwise to the oldest outstanding request.
//!
//! Anything left over goes to the unsolicited channel.

use crate::connection::FrameHandler;
use crate::transport::TransportError;
use bytes::Bytes;
use link_schema::{CommandType, ErrorCode, Inbound, MessageT, ServerReply, ServerReplyT};
use link_wire::WireError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Why a request did not produce a reply
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// The connection failed or was closed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The reply frame could not be decoded
    #[error("malformed frame: {0}")]
    Malformed(#[from] WireError),

    /// The server answered with an error
    #[error("server error {code}: {message}")]
    Server {
        /// Error code reported by the server
        code: ErrorCode,
        /// Error text reported by the server
        message: String,
    },

    /// No reply arrived within the request timeout
    #[error("request timed out")]
    Timeout,

    /// The request was dropped before a reply arrived
    #[error("request cancelled")]
    Cancelled,
}

/// A received reply frame, validated on arrival
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFrame {
    frame: Bytes,
}

impl ReplyFrame {
    /// Lazy view over the frame
    pub fn view(&self) -> Result<ServerReply<'_>, WireError> {
        ServerReply::decode(&self.frame, 0)
    }

    /// Reply text, if any
    pub fn message(&self) -> Result<Option<&str>, WireError> {
        self.view()?.message()
    }

    /// Whether the reply is a bare acknowledgement
    pub fn is_ack(&self) -> Result<bool, WireError> {
        Ok(self.view()?.is_ack())
    }

    /// Owned copy of every field
    pub fn unpack(&self) -> Result<ServerReplyT, WireError> {
        self.view()?.unpack()
    }

    /// Raw frame bytes
    pub fn bytes(&self) -> &Bytes {
        &self.frame
    }
}

/// Frames that did not answer an outstanding request
#[derive(Debug, Clone, PartialEq)]
pub enum Unsolicited {
    /// Command pushed by the server
    Command(MessageT),
    /// Reply with no matching request
    Reply(ReplyFrame),
    /// Undecodable frame received while nothing was outstanding
    Malformed {
        /// Decode failure
        error: WireError,
        /// Raw frame
        frame: Bytes,
    },
}

/// Outcome delivered to a waiting request
pub type ReplyResult = Result<ReplyFrame, DispatchError>;

/// One outstanding request
#[derive(Debug)]
pub struct PendingEntry {
    /// Command kind of the request
    pub kind: CommandType,
    reply_tx: oneshot::Sender<ReplyResult>,
}

impl PendingEntry {
    fn complete(self, id: u64, result: ReplyResult) {
        if self.reply_tx.send(result).is_err() {
            debug!("Request {} was abandoned before its reply arrived", id);
        }
    }
}

#[derive(Debug, Default)]
struct PendingInner {
    next_id: u64,
    entries: BTreeMap<u64, PendingEntry>,
}

/// Outstanding requests, oldest first
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<PendingInner>>,
}

impl PendingRequests {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PendingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a request of `kind`, returning its id and the reply receiver
    pub fn register(&self, kind: CommandType) -> (u64, oneshot::Receiver<ReplyResult>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.entries.insert(id, PendingEntry { kind, reply_tx });
        trace!("Registered request {} ({})", id, kind);
        (id, reply_rx)
    }

    /// Forget a request; returns whether it was still outstanding
    pub fn cancel(&self, id: u64) -> bool {
        let removed = self.lock().entries.remove(&id).is_some();
        if removed {
            debug!("Cancelled request {}", id);
        }
        removed
    }

    /// Number of outstanding requests
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether nothing is outstanding
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Remove the request a reply answers, if any.
    ///
    /// A `request_id` that is not outstanding matches nothing, even when
    /// other requests are waiting. An unrecognised kind carries no
    /// information and falls through to the oldest request.
    pub fn take_matching(
        &self,
        request_id: Option<u64>,
        kind: Option<CommandType>,
    ) -> Option<(u64, PendingEntry)> {
        let kind = kind.filter(|kind| *kind != CommandType::Unknown);
        let mut inner = self.lock();
        let id = match (request_id, kind) {
            (Some(id), _) => inner.entries.contains_key(&id).then_some(id),
            (None, Some(kind)) => inner
                .entries
                .iter()
                .find(|(_, entry)| entry.kind == kind)
                .map(|(id, _)| *id),
            (None, None) => inner.entries.keys().next().copied(),
        }?;
        inner.entries.remove(&id).map(|entry| (id, entry))
    }

    /// Remove the oldest outstanding request
    pub fn take_oldest(&self) -> Option<(u64, PendingEntry)> {
        self.lock().entries.pop_first()
    }

    /// Fail every outstanding request with `error`
    pub fn fail_all(&self, error: DispatchError) {
        let entries = std::mem::take(&mut self.lock().entries);
        if !entries.is_empty() {
            warn!("Failing {} outstanding requests: {}", entries.len(), error);
        }
        for (id, entry) in entries {
            entry.complete(id, Err(error.clone()));
        }
    }
}

/// Fields of a reply needed for matching
struct ReplyHeader {
    request_id: Option<u64>,
    kind: Option<CommandType>,
    failure: Option<DispatchError>,
}

impl ReplyHeader {
    fn read(reply: &ServerReply<'_>) -> Result<Self, WireError> {
        let failure = match reply.error()? {
            Some(error) => Some(DispatchError::Server {
                code: error.code()?,
                message: error.message()?.unwrap_or_default().to_string(),
            }),
            None => None,
        };
        Ok(Self {
            request_id: reply.request_id()?,
            kind: reply.command_type()?,
            failure,
        })
    }
}

/// Routes inbound frames to waiting requests or the unsolicited channel
#[derive(Debug, Clone)]
pub struct InboundRouter {
    pending: PendingRequests,
    unsolicited: mpsc::UnboundedSender<Unsolicited>,
}

impl InboundRouter {
    /// Create a router over `pending`
    pub fn new(pending: PendingRequests, unsolicited: mpsc::UnboundedSender<Unsolicited>) -> Self {
        Self {
            pending,
            unsolicited,
        }
    }

    fn deliver(&self, item: Unsolicited) {
        if self.unsolicited.send(item).is_err() {
            debug!("Unsolicited receiver dropped, discarding frame");
        }
    }

    fn route_reply(&self, frame: Bytes, header: ReplyHeader) {
        let Some((id, entry)) = self.pending.take_matching(header.request_id, header.kind) else {
            debug!(
                "Reply matches no outstanding request (request_id={:?}, kind={:?})",
                header.request_id, header.kind
            );
            self.deliver(Unsolicited::Reply(ReplyFrame { frame }));
            return;
        };

        let result = match header.failure {
            Some(failure) => Err(failure),
            None => Ok(ReplyFrame { frame }),
        };
        trace!("Resolving request {} ({})", id, entry.kind);
        entry.complete(id, result);
    }

    fn route_malformed(&self, error: WireError, frame: Bytes) {
        warn!("Received malformed frame of {} bytes: {}", frame.len(), error);
        match self.pending.take_oldest() {
            Some((id, entry)) => entry.complete(id, Err(DispatchError::Malformed(error))),
            None => self.deliver(Unsolicited::Malformed { error, frame }),
        }
    }
}

impl FrameHandler for InboundRouter {
    fn on_frame(&self, frame: Bytes) {
        let routed = match Inbound::classify(&frame) {
            Ok(Inbound::Command(message)) => message.unpack().map(Unsolicited::Command).map(Ok),
            Ok(Inbound::Reply(reply)) => ReplyHeader::read(&reply).map(Err),
            Err(e) => Err(e),
        };

        match routed {
            Ok(Ok(command)) => self.deliver(command),
            Ok(Err(header)) => self.route_reply(frame, header),
            Err(error) => self.route_malformed(error, frame),
        }
    }

    fn on_closed(&self, error: Option<TransportError>) {
        self.pending
            .fail_all(DispatchError::Transport(error.unwrap_or(TransportError::Closed)));
    }
}
