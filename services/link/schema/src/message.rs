//! Command envelope sent by clients (and pushed by the server to viewers).

use crate::enums::{read_enum, CommandType, TargetType, WireEnum};
use crate::payload::{AppendMesh, AppendMeshT, FileArg, FileArgT};
use bytes::Bytes;
use link_wire::{
    encode_with_capacity, root, size_prefixed_root, Builder, Offset, Pack, Result, Table,
    TableView, WireTable, IDENTIFIER_LEN,
};
use serde::{Deserialize, Serialize};

/// File identifier of command frames
pub const MESSAGE_IDENTIFIER: &[u8; IDENTIFIER_LEN] = b"VLMS";

/// Command envelope
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    table: Table<'a>,
}

impl<'a> TableView<'a> for Message<'a> {
    const IDENTIFIER: Option<&'static [u8; IDENTIFIER_LEN]> = Some(MESSAGE_IDENTIFIER);

    fn from_table(table: Table<'a>) -> Self {
        Self { table }
    }
}

impl<'a> Message<'a> {
    /// Field id of `instance_id`
    pub const VT_INSTANCE_ID: u16 = 0;
    /// Field id of `command_type`
    pub const VT_COMMAND_TYPE: u16 = 1;
    /// Field id of `target_group`
    pub const VT_TARGET_GROUP: u16 = 2;
    /// Field id of `client_type`
    pub const VT_CLIENT_TYPE: u16 = 3;
    /// Field id of `file_object`
    pub const VT_FILE_OBJECT: u16 = 4;
    /// Field id of `binary_data`
    pub const VT_BINARY_DATA: u16 = 5;
    /// Field id of `mesh_info`
    pub const VT_MESH_INFO: u16 = 6;
    /// Field id of `request_id`
    pub const VT_REQUEST_ID: u16 = 7;

    /// Decode a command frame starting at `offset`
    pub fn decode(buf: &'a [u8], offset: usize) -> Result<Self> {
        root(buf, offset)
    }

    /// Decode a size-prefixed command frame
    pub fn decode_size_prefixed(buf: &'a [u8]) -> Result<Self> {
        size_prefixed_root(buf)
    }

    /// Originating client session
    pub fn instance_id(&self) -> Result<Option<&'a str>> {
        self.table.get_str(Self::VT_INSTANCE_ID)
    }

    /// Requested action; unknown raw values read as `CommandType::Unknown`
    pub fn command_type(&self) -> Result<CommandType> {
        read_enum(&self.table, Self::VT_COMMAND_TYPE)
    }

    /// Recipient class
    pub fn target_group(&self) -> Result<TargetType> {
        read_enum(&self.table, Self::VT_TARGET_GROUP)
    }

    /// Sender class
    pub fn client_type(&self) -> Result<TargetType> {
        read_enum(&self.table, Self::VT_CLIENT_TYPE)
    }

    /// File argument
    pub fn file_object(&self) -> Result<Option<FileArg<'a>>> {
        Ok(self
            .table
            .get_table(Self::VT_FILE_OBJECT)?
            .map(FileArg::from_table))
    }

    /// Raw payload, borrowed from the frame
    pub fn binary_data(&self) -> Result<Option<&'a [u8]>> {
        Ok(self
            .table
            .get_vector::<u8>(Self::VT_BINARY_DATA)?
            .map(|v| v.bytes()))
    }

    /// Mesh-append payload
    pub fn mesh_info(&self) -> Result<Option<AppendMesh<'a>>> {
        Ok(self
            .table
            .get_table(Self::VT_MESH_INFO)?
            .map(AppendMesh::from_table))
    }

    /// Correlation id assigned by the sender
    pub fn request_id(&self) -> Result<Option<u64>> {
        self.table.get_optional(Self::VT_REQUEST_ID)
    }

    /// Resolve every field into an owned value
    pub fn unpack(&self) -> Result<MessageT> {
        Ok(MessageT {
            instance_id: self.instance_id()?.map(str::to_string),
            command_type: self.command_type()?,
            target_group: self.target_group()?,
            client_type: self.client_type()?,
            file_object: self.file_object()?.map(|f| f.unpack()).transpose()?,
            binary_data: self.binary_data()?.map(Bytes::copy_from_slice),
            mesh_info: self.mesh_info()?.map(|m| m.unpack()).transpose()?,
            request_id: self.request_id()?,
        })
    }
}

/// Owned form of [`Message`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageT {
    /// Originating client session
    pub instance_id: Option<String>,
    /// Requested action
    pub command_type: CommandType,
    /// Recipient class
    pub target_group: TargetType,
    /// Sender class
    pub client_type: TargetType,
    /// File argument
    pub file_object: Option<FileArgT>,
    /// Raw payload
    pub binary_data: Option<Bytes>,
    /// Mesh-append payload
    pub mesh_info: Option<AppendMeshT>,
    /// Correlation id
    pub request_id: Option<u64>,
}

impl MessageT {
    /// A web client command addressed to the server
    pub fn command(instance_id: impl Into<String>, command_type: CommandType) -> Self {
        Self {
            instance_id: Some(instance_id.into()),
            command_type,
            target_group: TargetType::Server,
            client_type: TargetType::Web,
            ..Self::default()
        }
    }

    /// Ask the server for its procedures (the node list)
    pub fn list_procedures(instance_id: impl Into<String>) -> Self {
        Self::command(instance_id, CommandType::ListProcedures)
    }

    /// Upload a model file
    pub fn load_file(instance_id: impl Into<String>, file: FileArgT, data: Bytes) -> Self {
        Self {
            file_object: Some(file),
            binary_data: Some(data),
            ..Self::command(instance_id, CommandType::LoadFile)
        }
    }

    /// Add a mesh to the scene
    pub fn append_mesh(instance_id: impl Into<String>, mesh: AppendMeshT) -> Self {
        Self {
            mesh_info: Some(mesh),
            ..Self::command(instance_id, CommandType::AppendMesh)
        }
    }

    /// Clear the scene
    pub fn clear_scene(instance_id: impl Into<String>) -> Self {
        Self::command(instance_id, CommandType::ClearScene)
    }

    /// Override the sender class
    pub fn with_client_type(mut self, client_type: TargetType) -> Self {
        self.client_type = client_type;
        self
    }

    /// Encode as a complete frame
    pub fn encode(&self) -> Bytes {
        // reserve room for the payload up front so large uploads grow once
        let payload = self.binary_data.as_ref().map_or(0, |data| data.len());
        encode_with_capacity(self, payload + 1024)
    }
}

impl Pack for MessageT {
    const IDENTIFIER: Option<&'static [u8; IDENTIFIER_LEN]> = Some(MESSAGE_IDENTIFIER);

    fn pack(&self, builder: &mut Builder) -> Offset<WireTable> {
        let instance_id = self.instance_id.as_deref().map(|s| builder.create_string(s));
        let file_object = self.file_object.as_ref().map(|f| f.pack(builder));
        let binary_data = self.binary_data.as_deref().map(|d| builder.create_vector(d));
        let mesh_info = self.mesh_info.as_ref().map(|m| m.pack(builder));

        builder.start_table();
        if let Some(request_id) = self.request_id {
            builder.push_slot_always(Message::VT_REQUEST_ID, request_id);
        }
        if let Some(instance_id) = instance_id {
            builder.push_offset(Message::VT_INSTANCE_ID, instance_id);
        }
        if let Some(file_object) = file_object {
            builder.push_offset(Message::VT_FILE_OBJECT, file_object);
        }
        if let Some(binary_data) = binary_data {
            builder.push_offset(Message::VT_BINARY_DATA, binary_data);
        }
        if let Some(mesh_info) = mesh_info {
            builder.push_offset(Message::VT_MESH_INFO, mesh_info);
        }
        builder.push_slot(
            Message::VT_COMMAND_TYPE,
            self.command_type.to_wire(),
            CommandType::DEFAULT.to_wire(),
        );
        builder.push_slot(
            Message::VT_TARGET_GROUP,
            self.target_group.to_wire(),
            TargetType::DEFAULT.to_wire(),
        );
        builder.push_slot(
            Message::VT_CLIENT_TYPE,
            self.client_type.to_wire(),
            TargetType::DEFAULT.to_wire(),
        );
        builder.end_table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::FileType;
    use crate::payload::MeshT;
    use link_wire::WireError;

    #[test]
    fn test_list_procedures_fields() {
        let sent = MessageT::list_procedures("session-1");
        let bytes = sent.encode();
        let message = Message::decode(&bytes, 0).unwrap();

        assert_eq!(message.command_type().unwrap(), CommandType::ListProcedures);
        assert_eq!(message.target_group().unwrap(), TargetType::Server);
        assert_eq!(message.client_type().unwrap(), TargetType::Web);
        assert_eq!(message.instance_id().unwrap(), Some("session-1"));
        assert!(message.file_object().unwrap().is_none());
        assert!(message.mesh_info().unwrap().is_none());
        assert!(message.binary_data().unwrap().is_none());
        assert_eq!(message.request_id().unwrap(), None);
    }

    #[test]
    fn test_load_file_borrows_payload() {
        let data = Bytes::from(vec![0x49, 0x53, 0x4F, 0x2D]);
        let sent = MessageT::load_file(
            "session-2",
            FileArgT::new("model.ifc", FileType::Ifc),
            data.clone(),
        );
        let bytes = sent.encode();
        let message = Message::decode(&bytes, 0).unwrap();

        let payload = message.binary_data().unwrap().unwrap();
        assert_eq!(payload, &data[..]);
        // the slice points into the frame, no copy was made
        let frame_range = bytes.as_ptr_range();
        assert!(frame_range.contains(&payload.as_ptr()));

        assert_eq!(message.unpack().unwrap(), sent);
    }

    #[test]
    fn test_append_mesh_round_trip() {
        let mut sent = MessageT::append_mesh(
            "session-3",
            AppendMeshT {
                name: Some("slab".into()),
                mesh: Some(MeshT {
                    vertices: Some(vec![0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 2.0, 2.0, 0.0]),
                    normals: Some(vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]),
                    indices: Some(vec![0, 1, 2]),
                }),
                replace: false,
            },
        );
        sent.request_id = Some(41);
        let bytes = sent.encode();
        let message = Message::decode(&bytes, 0).unwrap();

        assert_eq!(message.command_type().unwrap(), CommandType::AppendMesh);
        assert_eq!(message.request_id().unwrap(), Some(41));
        assert_eq!(message.unpack().unwrap(), sent);
    }

    #[test]
    fn test_size_prefixed_message() {
        let sent = MessageT::clear_scene("session-4");
        let bytes = link_wire::encode_size_prefixed(&sent);
        let message = Message::decode_size_prefixed(&bytes).unwrap();
        assert_eq!(message.unpack().unwrap(), sent);
    }

    #[test]
    fn test_all_defaults_round_trip() {
        let sent = MessageT::default();
        let bytes = sent.encode();
        let message = Message::decode(&bytes, 0).unwrap();
        assert_eq!(message.instance_id().unwrap(), None);
        assert_eq!(message.unpack().unwrap(), sent);
    }

    #[test]
    fn test_message_from_newer_client() {
        // a newer writer adds fields 10 and 12 after the known ones
        let mut builder = Builder::new();
        let extension = builder.create_string("viewport=2");
        let instance_id = builder.create_string("session-9");
        builder.start_table();
        builder.push_slot_always(12, 0xdead_beef_u32);
        builder.push_slot_always(Message::VT_REQUEST_ID, 42u64);
        builder.push_offset(10, extension);
        builder.push_offset(Message::VT_INSTANCE_ID, instance_id);
        builder.push_slot_always(Message::VT_COMMAND_TYPE, CommandType::ClearScene.to_wire());
        builder.push_slot_always(Message::VT_CLIENT_TYPE, TargetType::Python.to_wire());
        let root_offset = builder.end_table();
        builder.finish(root_offset, Some(MESSAGE_IDENTIFIER));

        let message = Message::decode(builder.finished_data(), 0).unwrap();
        assert_eq!(
            message.unpack().unwrap(),
            MessageT {
                instance_id: Some("session-9".to_string()),
                command_type: CommandType::ClearScene,
                client_type: TargetType::Python,
                request_id: Some(42),
                ..MessageT::default()
            }
        );
    }

    #[test]
    fn test_unknown_command_type_is_error_class() {
        let mut builder = Builder::new();
        builder.start_table();
        builder.push_slot_always(Message::VT_COMMAND_TYPE, 77u8);
        let root_offset = builder.end_table();
        builder.finish(root_offset, Some(MESSAGE_IDENTIFIER));

        let message = Message::decode(builder.finished_data(), 0).unwrap();
        assert_eq!(message.command_type().unwrap(), CommandType::Unknown);
    }

    #[test]
    fn test_truncated_message_is_malformed() {
        let bytes = MessageT::list_procedures("x").encode();
        assert!(matches!(
            Message::decode(&bytes[..4], 0),
            Err(WireError::TooShort { .. })
        ));
        match Message::decode(&bytes[..bytes.len() / 2], 0) {
            Err(_) => {}
            Ok(message) => assert!(message.unpack().is_err()),
        }
    }
}
