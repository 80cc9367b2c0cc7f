//! Message, reply and payload types of the viewer link protocol.
//!
//! Every table comes in two forms:
//!
//! - a wire-view (`Message<'a>`, `ServerReply<'a>`, ...) that borrows a
//!   received frame and resolves fields lazily, and
//! - an owned value (`MessageT`, `ServerReplyT`, ...) with every field
//!   resolved, safe to keep after the frame is gone.
//!
//! Views turn into owned values with `unpack`; owned values are written with
//! [`link_wire::Pack`].
//!
//! ## Schema
//!
//! ```text
//! table FileArg     { name: string; file_type: FileType = IFC; }
//! table Mesh        { vertices: [float]; normals: [float]; indices: [uint]; }
//! table AppendMesh  { name: string; mesh: Mesh; replace: bool = false; }
//! table Error       { code: ErrorCode = UNSPECIFIED; message: string; }
//! table ServerReply { message: string; error: Error;
//!                     request_id: ulong = null; command_type: CommandType = null; }  // "VLRP"
//! table Message     { instance_id: string; command_type: CommandType;
//!                     target_group: TargetType; client_type: TargetType;
//!                     file_object: FileArg; binary_data: [ubyte];
//!                     mesh_info: AppendMesh; request_id: ulong = null; }            // "VLMS"
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod enums;
pub mod inbound;
pub mod message;
pub mod payload;
pub mod reply;

// Re-export main types
pub use enums::{CommandType, ErrorCode, FileType, TargetType, UnknownVariant, WireEnum};
pub use inbound::Inbound;
pub use message::{Message, MessageT, MESSAGE_IDENTIFIER};
pub use payload::{AppendMesh, AppendMeshT, FileArg, FileArgT, Mesh, MeshT};
pub use reply::{Error, ErrorT, ServerReply, ServerReplyT, SERVER_REPLY_IDENTIFIER};
