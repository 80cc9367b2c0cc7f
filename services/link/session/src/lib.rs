//! TCP connection, frame transport and request/reply dispatch for the viewer link.
//!
//! This crate owns the live side of the protocol: one persistent connection
//! per [`Client`], size-prefixed framing on the byte stream, and correlation
//! of inbound replies with the requests waiting on them.
//!
//! ## Features
//!
//! - **TCP Transport**: connect with timeout, size-prefixed frames
//! - **Ordered Delivery**: every frame reaches the handler in arrival order
//! - **Reply Correlation**: by echoed request id, command kind, or FIFO
//! - **Unsolicited Frames**: server pushes and unmatched replies are never dropped
//! - **No Auto-reconnect**: a closed connection stays closed; the owner decides
//!
//! ## Example
//!
//! ```rust,no_run
//! use link_session::{Client, ClientConfig, ConnectionConfig, Unsolicited};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), link_session::DispatchError> {
//! let config = ClientConfig {
//!     connection: ConnectionConfig {
//!         addr: "127.0.0.1:7000".to_string(),
//!         ..ConnectionConfig::default()
//!     },
//!     request_timeout: Some(Duration::from_secs(10)),
//!     ..ClientConfig::default()
//! };
//!
//! let (client, mut unsolicited) = Client::connect(config).await?;
//!
//! let reply = client.list_procedures().await?;
//! println!("procedures: {:?}", reply.message()?);
//!
//! // Frames nobody asked for
//! tokio::spawn(async move {
//!     while let Some(frame) = unsolicited.recv().await {
//!         match frame {
//!             Unsolicited::Command(message) => println!("pushed {}", message.command_type),
//!             Unsolicited::Reply(reply) => println!("stray reply {:?}", reply.message()),
//!             Unsolicited::Malformed { error, .. } => println!("bad frame: {}", error),
//!         }
//!     }
//! });
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod transport;

// Re-export main types
pub use client::{Client, ClientConfig};
pub use connection::{
    Connection, ConnectionConfig, ConnectionState, ConnectionStats, FrameHandler,
};
pub use dispatcher::{
    DispatchError, InboundRouter, PendingEntry, PendingRequests, ReplyFrame, ReplyResult,
    Unsolicited,
};
pub use transport::{connect_tcp, recv_frame, write_frame, FrameDecoder, TransportError};
