//! Request dispatch
//!
//! Builds the reply for one inbound request. Stateless and free of I/O so
//! it is testable without a socket; the session loop owns the actual send.

use super::message::{reply_id, Message, MessageKind, MSG_ID_GET_VERSION, MSG_ID_TEST};
use super::VERSION_WORD;

/// Build the reply for `request`, or `None` for an unregistered identifier.
///
/// Payload content is never inspected: a `Test` request is acknowledged no
/// matter what it carries, and a `GetVersion` request with a stray payload
/// is answered all the same.
pub fn respond(request: &Message) -> Option<Message> {
    match request.kind() {
        MessageKind::Test => Some(Message::new(reply_id(MSG_ID_TEST), Vec::new())),
        MessageKind::GetVersion => {
            Some(Message::new(reply_id(MSG_ID_GET_VERSION), vec![VERSION_WORD]))
        }
        MessageKind::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_respond_to_test() {
        // Payload [0, 1] is ignored; the reply is an empty 0x99991.
        let reply = respond(&Message::new(MSG_ID_TEST, vec![0, 1])).unwrap();
        assert_eq!(reply.id, 0x99991);
        assert!(reply.payload.is_empty());
        assert_eq!(reply.payload_size(), 0);
    }

    #[test]
    fn test_respond_to_get_version() {
        let reply = respond(&Message::get_version()).unwrap();
        assert_eq!(reply.id, 0x10001);
        assert_eq!(reply.payload, vec![0x00001701]);
        assert_eq!(reply.payload_size(), 4);
    }

    #[test]
    fn test_respond_to_unknown() {
        assert!(respond(&Message::new(0xDEAD, Vec::new())).is_none());
        assert!(respond(&Message::new(0xDEAD, vec![1, 2, 3])).is_none());
    }

    #[test]
    fn test_payload_content_is_ignored() {
        let empty = respond(&Message::test(Vec::new())).unwrap();
        let full = respond(&Message::test((0..512).collect())).unwrap();
        assert_eq!(empty, full);

        // A GetVersion with a stray payload is still answered.
        let reply = respond(&Message::new(MSG_ID_GET_VERSION, vec![42])).unwrap();
        assert_eq!(reply.payload, vec![VERSION_WORD]);
    }

    #[test]
    fn test_replies_are_not_redispatched() {
        // A stray reply frame resolves to Unknown and draws no response.
        let reply = respond(&Message::get_version()).unwrap();
        assert!(respond(&reply).is_none());
    }
}
