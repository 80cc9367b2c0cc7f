//! Server reply envelope and the error it may carry.

use crate::enums::{read_enum, read_optional_enum, CommandType, ErrorCode, WireEnum};
use bytes::Bytes;
use link_wire::{
    encode, root, size_prefixed_root, Builder, Offset, Pack, Result, Table, TableView, WireTable,
    IDENTIFIER_LEN,
};
use serde::{Deserialize, Serialize};

/// File identifier of reply frames
pub const SERVER_REPLY_IDENTIFIER: &[u8; IDENTIFIER_LEN] = b"VLRP";

/// A coded failure reported by the server
#[derive(Debug, Clone, Copy)]
pub struct Error<'a> {
    table: Table<'a>,
}

impl<'a> TableView<'a> for Error<'a> {
    fn from_table(table: Table<'a>) -> Self {
        Self { table }
    }
}

impl<'a> Error<'a> {
    /// Field id of `code`
    pub const VT_CODE: u16 = 0;
    /// Field id of `message`
    pub const VT_MESSAGE: u16 = 1;

    /// Failure class
    pub fn code(&self) -> Result<ErrorCode> {
        read_enum(&self.table, Self::VT_CODE)
    }

    /// Human-readable description
    pub fn message(&self) -> Result<Option<&'a str>> {
        self.table.get_str(Self::VT_MESSAGE)
    }

    /// Resolve every field into an owned value
    pub fn unpack(&self) -> Result<ErrorT> {
        Ok(ErrorT {
            code: self.code()?,
            message: self.message()?.map(str::to_string),
        })
    }
}

/// Owned form of [`Error`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorT {
    /// Failure class
    pub code: ErrorCode,
    /// Human-readable description
    pub message: Option<String>,
}

impl Pack for ErrorT {
    fn pack(&self, builder: &mut Builder) -> Offset<WireTable> {
        let message = self.message.as_deref().map(|m| builder.create_string(m));

        builder.start_table();
        builder.push_slot(
            Error::VT_CODE,
            self.code.to_wire(),
            ErrorCode::DEFAULT.to_wire(),
        );
        if let Some(message) = message {
            builder.push_offset(Error::VT_MESSAGE, message);
        }
        builder.end_table()
    }
}

/// Reply envelope sent by the server
///
/// A reply with neither `message` nor `error` is a plain acknowledgement.
#[derive(Debug, Clone, Copy)]
pub struct ServerReply<'a> {
    table: Table<'a>,
}

impl<'a> TableView<'a> for ServerReply<'a> {
    const IDENTIFIER: Option<&'static [u8; IDENTIFIER_LEN]> = Some(SERVER_REPLY_IDENTIFIER);

    fn from_table(table: Table<'a>) -> Self {
        Self { table }
    }
}

impl<'a> ServerReply<'a> {
    /// Field id of `message`
    pub const VT_MESSAGE: u16 = 0;
    /// Field id of `error`
    pub const VT_ERROR: u16 = 1;
    /// Field id of `request_id`
    pub const VT_REQUEST_ID: u16 = 2;
    /// Field id of `command_type`
    pub const VT_COMMAND_TYPE: u16 = 3;

    /// Decode a reply frame starting at `offset`
    pub fn decode(buf: &'a [u8], offset: usize) -> Result<Self> {
        root(buf, offset)
    }

    /// Decode a size-prefixed reply frame
    pub fn decode_size_prefixed(buf: &'a [u8]) -> Result<Self> {
        size_prefixed_root(buf)
    }

    /// Human-readable message
    pub fn message(&self) -> Result<Option<&'a str>> {
        self.table.get_str(Self::VT_MESSAGE)
    }

    /// Server-reported failure
    pub fn error(&self) -> Result<Option<Error<'a>>> {
        Ok(self.table.get_table(Self::VT_ERROR)?.map(Error::from_table))
    }

    /// Request id echoed by servers that support correlation
    pub fn request_id(&self) -> Result<Option<u64>> {
        self.table.get_optional(Self::VT_REQUEST_ID)
    }

    /// Kind of command this reply answers, when the server says so
    pub fn command_type(&self) -> Result<Option<CommandType>> {
        read_optional_enum(&self.table, Self::VT_COMMAND_TYPE)
    }

    /// Whether the reply is a bare acknowledgement
    pub fn is_ack(&self) -> bool {
        !self.table.has_field(Self::VT_MESSAGE) && !self.table.has_field(Self::VT_ERROR)
    }

    /// Resolve every field into an owned value
    pub fn unpack(&self) -> Result<ServerReplyT> {
        Ok(ServerReplyT {
            message: self.message()?.map(str::to_string),
            error: self.error()?.map(|e| e.unpack()).transpose()?,
            request_id: self.request_id()?,
            command_type: self.command_type()?,
        })
    }
}

/// Owned form of [`ServerReply`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerReplyT {
    /// Human-readable message
    pub message: Option<String>,
    /// Server-reported failure
    pub error: Option<ErrorT>,
    /// Echoed request id
    pub request_id: Option<u64>,
    /// Kind of command answered
    pub command_type: Option<CommandType>,
}

impl ServerReplyT {
    /// Bare acknowledgement
    pub fn ack() -> Self {
        Self::default()
    }

    /// Successful reply with a message
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Failed reply
    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: Some(ErrorT {
                code,
                message: Some(message.into()),
            }),
            ..Self::default()
        }
    }

    /// Echo a request id and command kind back to the client
    pub fn answering(mut self, request_id: Option<u64>, command_type: CommandType) -> Self {
        self.request_id = request_id;
        self.command_type = Some(command_type);
        self
    }

    /// Whether the reply is a bare acknowledgement
    pub fn is_ack(&self) -> bool {
        self.message.is_none() && self.error.is_none()
    }

    /// Encode as a complete frame
    pub fn encode(&self) -> Bytes {
        encode(self)
    }
}

impl Pack for ServerReplyT {
    const IDENTIFIER: Option<&'static [u8; IDENTIFIER_LEN]> = Some(SERVER_REPLY_IDENTIFIER);

    fn pack(&self, builder: &mut Builder) -> Offset<WireTable> {
        let message = self.message.as_deref().map(|m| builder.create_string(m));
        let error = self.error.as_ref().map(|e| e.pack(builder));

        builder.start_table();
        if let Some(request_id) = self.request_id {
            builder.push_slot_always(ServerReply::VT_REQUEST_ID, request_id);
        }
        if let Some(message) = message {
            builder.push_offset(ServerReply::VT_MESSAGE, message);
        }
        if let Some(error) = error {
            builder.push_offset(ServerReply::VT_ERROR, error);
        }
        if let Some(command_type) = self.command_type {
            builder.push_slot_always(ServerReply::VT_COMMAND_TYPE, command_type.to_wire());
        }
        builder.end_table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_wire::{buffer_has_identifier, Builder, WireError};

    #[test]
    fn test_ack_has_no_fields() {
        let bytes = ServerReplyT::ack().encode();
        let reply = ServerReply::decode(&bytes, 0).unwrap();

        assert!(reply.is_ack());
        assert_eq!(reply.message().unwrap(), None);
        assert!(reply.error().unwrap().is_none());
        assert_eq!(reply.request_id().unwrap(), None);
        assert_eq!(reply.command_type().unwrap(), None);
        assert_eq!(reply.unpack().unwrap(), ServerReplyT::ack());
    }

    #[test]
    fn test_failure_round_trip() {
        let sent = ServerReplyT::failure(ErrorCode::ProcedureNotFound, "no such node 'Box'")
            .answering(Some(7), CommandType::ListProcedures);
        let bytes = sent.encode();
        assert!(buffer_has_identifier(&bytes, SERVER_REPLY_IDENTIFIER, false));

        let reply = ServerReply::decode(&bytes, 0).unwrap();
        let error = reply.error().unwrap().unwrap();
        assert_eq!(error.code().unwrap(), ErrorCode::ProcedureNotFound);
        assert_eq!(error.message().unwrap(), Some("no such node 'Box'"));
        assert_eq!(reply.request_id().unwrap(), Some(7));
        assert_eq!(reply.unpack().unwrap(), sent);
    }

    #[test]
    fn test_reply_from_older_server() {
        // an older server writes only the message field and no identifier
        let mut builder = Builder::new();
        let message = builder.create_string("[\"Box\",\"Sphere\"]");
        builder.start_table();
        builder.push_offset(ServerReply::VT_MESSAGE, message);
        let root_offset = builder.end_table();
        builder.finish(root_offset, None);

        let reply = ServerReply::decode(builder.finished_data(), 0).unwrap();
        assert_eq!(reply.message().unwrap(), Some("[\"Box\",\"Sphere\"]"));
        assert_eq!(reply.request_id().unwrap(), None);
        assert_eq!(reply.command_type().unwrap(), None);
        assert!(!reply.is_ack());
    }

    #[test]
    fn test_reply_from_newer_server() {
        let mut builder = Builder::new();
        let message = builder.create_string("scene cleared");
        let trace_id = builder.create_string("7f3a");
        builder.start_table();
        builder.push_slot_always(ServerReply::VT_REQUEST_ID, 5u64);
        builder.push_offset(ServerReply::VT_MESSAGE, message);
        builder.push_offset(11, trace_id);
        builder.push_slot_always(10, 1.5f64);
        builder.push_slot_always(ServerReply::VT_COMMAND_TYPE, CommandType::ClearScene.to_wire());
        let root_offset = builder.end_table();
        builder.finish(root_offset, Some(SERVER_REPLY_IDENTIFIER));

        let reply = ServerReply::decode(builder.finished_data(), 0).unwrap();
        assert_eq!(
            reply.unpack().unwrap(),
            ServerReplyT::ok("scene cleared").answering(Some(5), CommandType::ClearScene)
        );
        assert!(!reply.is_ack());
    }

    #[test]
    fn test_truncated_reply_is_malformed() {
        let bytes = ServerReplyT::ok("done").encode();
        assert!(matches!(
            ServerReply::decode(&bytes[..8], 0),
            Err(WireError::TooShort { .. })
        ));
    }

    #[test]
    fn test_size_prefixed_reply() {
        let sent = ServerReplyT::ok("loaded");
        let bytes = link_wire::encode_size_prefixed(&sent);
        let reply = ServerReply::decode_size_prefixed(&bytes).unwrap();
        assert_eq!(reply.unpack().unwrap(), sent);
    }
}
