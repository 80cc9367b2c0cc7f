//! Classification of frames received from the server.

use crate::message::Message;
use crate::reply::ServerReply;
use link_wire::{has_identifier, Result};

/// A decoded inbound frame
#[derive(Debug, Clone, Copy)]
pub enum Inbound<'a> {
    /// Command pushed by the server (for example a mesh for the viewer)
    Command(Message<'a>),
    /// Reply to an earlier command
    Reply(ServerReply<'a>),
}

impl<'a> Inbound<'a> {
    /// Decode `frame`, using its identifier to pick the root type.
    ///
    /// Frames without the command identifier are treated as replies, which
    /// keeps identifier-less frames from older servers working.
    pub fn classify(frame: &'a [u8]) -> Result<Self> {
        if has_identifier::<Message>(frame, false) {
            Message::decode(frame, 0).map(Inbound::Command)
        } else {
            ServerReply::decode(frame, 0).map(Inbound::Reply)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::CommandType;
    use crate::message::MessageT;
    use crate::reply::ServerReplyT;
    use link_wire::WireError;

    #[test]
    fn test_classify_command() {
        let bytes = MessageT::clear_scene("viewer").encode();
        match Inbound::classify(&bytes).unwrap() {
            Inbound::Command(message) => {
                assert_eq!(message.command_type().unwrap(), CommandType::ClearScene)
            }
            Inbound::Reply(_) => panic!("expected a command"),
        }
    }

    #[test]
    fn test_classify_reply() {
        let bytes = ServerReplyT::ok("ready").encode();
        match Inbound::classify(&bytes).unwrap() {
            Inbound::Reply(reply) => assert_eq!(reply.message().unwrap(), Some("ready")),
            Inbound::Command(_) => panic!("expected a reply"),
        }
    }

    #[test]
    fn test_classify_short_frame() {
        assert!(matches!(
            Inbound::classify(&[1, 2, 3]),
            Err(WireError::TooShort { .. })
        ));
    }
}
