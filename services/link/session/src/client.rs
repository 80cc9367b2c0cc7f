//! Request/reply client over a single link connection.

use crate::connection::{Connection, ConnectionConfig, ConnectionState, ConnectionStats};
use crate::dispatcher::{DispatchError, InboundRouter, PendingRequests, ReplyFrame, Unsolicited};
use crate::transport::TransportError;
use bytes::Bytes;
use link_schema::{AppendMeshT, CommandType, FileArgT, MessageT, TargetType};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Connection settings
    pub connection: ConnectionConfig,
    /// Session id stamped on outgoing commands; generated when `None`
    pub instance_id: Option<String>,
    /// Sender class stamped on outgoing commands
    pub client_type: TargetType,
    /// How long to wait for each reply; `None` waits indefinitely
    pub request_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            instance_id: None,
            client_type: TargetType::Web,
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Removes a request from the pending set unless it already completed
struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.id);
    }
}

/// Link client: sends commands and awaits their replies
#[derive(Debug)]
pub struct Client {
    connection: Connection,
    pending: PendingRequests,
    instance_id: String,
    client_type: TargetType,
    request_timeout: Option<Duration>,
}

impl Client {
    /// Connect to the server.
    ///
    /// Returns the client and the receiver for frames that answer no request.
    pub async fn connect(
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Unsolicited>), DispatchError> {
        let instance_id = config
            .instance_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let pending = PendingRequests::new();
        let (unsolicited_tx, unsolicited_rx) = mpsc::unbounded_channel();
        let router = InboundRouter::new(pending.clone(), unsolicited_tx);
        let connection = Connection::connect(config.connection, router).await?;

        info!(
            "Link client {} connected to {}",
            instance_id,
            connection.addr()
        );

        let client = Self {
            connection,
            pending,
            instance_id,
            client_type: config.client_type,
            request_timeout: config.request_timeout,
        };
        Ok((client, unsolicited_rx))
    }

    /// Send a command and wait for its reply.
    ///
    /// The command is stamped with a fresh `request_id`, and with this
    /// client's instance id when it has none. Dropping the returned future
    /// abandons the request.
    pub async fn request(&self, mut message: MessageT) -> Result<ReplyFrame, DispatchError> {
        if !self.connection.is_open() {
            return Err(TransportError::NotReady.into());
        }
        self.check_payload(&message)?;
        if message.instance_id.is_none() {
            message.instance_id = Some(self.instance_id.clone());
        }

        let (id, reply_rx) = self.pending.register(message.command_type);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        message.request_id = Some(id);

        debug!("Sending {} as request {}", message.command_type, id);
        self.connection.send(message.encode())?;

        let received = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, reply_rx)
                .await
                .map_err(|_| DispatchError::Timeout)?,
            None => reply_rx.await,
        };
        received.map_err(|_| DispatchError::Cancelled)?
    }

    /// Send a command without waiting for a reply
    pub fn notify(&self, mut message: MessageT) -> Result<(), DispatchError> {
        self.check_payload(&message)?;
        if message.instance_id.is_none() {
            message.instance_id = Some(self.instance_id.clone());
        }
        self.connection.send(message.encode())?;
        Ok(())
    }

    /// Reject a binary payload that cannot fit in one frame before encoding it
    fn check_payload(&self, message: &MessageT) -> Result<(), TransportError> {
        let payload = message.binary_data.as_ref().map_or(0, |data| data.len());
        if payload > self.connection.max_frame_size() {
            return Err(TransportError::FrameTooLarge(payload));
        }
        Ok(())
    }

    fn command(&self, command_type: CommandType) -> MessageT {
        MessageT::command(self.instance_id.as_str(), command_type)
            .with_client_type(self.client_type)
    }

    /// Ask the server for its procedure list
    pub async fn list_procedures(&self) -> Result<ReplyFrame, DispatchError> {
        self.request(self.command(CommandType::ListProcedures)).await
    }

    /// Upload a model file
    pub async fn load_file(&self, file: FileArgT, data: Bytes) -> Result<ReplyFrame, DispatchError> {
        let message = MessageT {
            file_object: Some(file),
            binary_data: Some(data),
            ..self.command(CommandType::LoadFile)
        };
        self.request(message).await
    }

    /// Add a mesh to the scene
    pub async fn append_mesh(&self, mesh: AppendMeshT) -> Result<ReplyFrame, DispatchError> {
        let message = MessageT {
            mesh_info: Some(mesh),
            ..self.command(CommandType::AppendMesh)
        };
        self.request(message).await
    }

    /// Clear the scene
    pub async fn clear_scene(&self) -> Result<ReplyFrame, DispatchError> {
        self.request(self.command(CommandType::ClearScene)).await
    }

    /// Session id stamped on outgoing commands
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Number of requests awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Connection state
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Connection statistics
    pub fn stats(&self) -> ConnectionStats {
        self.connection.stats()
    }

    /// Close the connection; outstanding requests fail with a transport error
    pub fn close(&self) {
        self.connection.close();
    }

    /// Wait until the connection has closed
    pub async fn closed(&self) {
        self.connection.closed().await;
    }
}
