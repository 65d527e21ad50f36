//! The envelope: the single message record exchanged with browsers and
//! replicated between instances.
//!
//! # JSON shape
//!
//! Every envelope is a JSON object with four fields:
//!
//! ```json
//! {
//!   "action": "send-message",
//!   "message": "hello",
//!   "target": {"id": "9b1c...", "name": "general", "private": false},
//!   "sender": {"id": "u1", "name": "Taro"}
//! }
//! ```
//!
//! `target` and `sender` are `null` when an action does not use them.  What
//! `message` means depends on the action:
//!
//! | Action              | `message` carries                       |
//! |---------------------|-----------------------------------------|
//! | `send-message`      | the chat text                           |
//! | `join-room`         | the name of the room to join or create  |
//! | `leave-room`        | the id of the room to leave             |
//! | `join-room-private` | the id of the identity to pair with     |
//! | `room-joined`       | unused                                  |
//! | `user-join`         | unused (`sender` is the identity)       |
//! | `user-left`         | unused (`sender` is the identity)       |

use serde::{Deserialize, Serialize};

use crate::domain::identity::Identity;
use crate::domain::room::RoomRecord;

/// Suffix of the notice broadcast to existing members when someone joins a
/// public room; the joiner's display name is prepended.
pub const WELCOME_SUFFIX: &str = "joined the room";

/// The action tag of an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Chat text addressed to every member of `target`.
    SendMessage,
    /// Request to join (creating if needed) the public room named `message`.
    JoinRoom,
    /// Request to leave the room whose id is `message`.
    LeaveRoom,
    /// Request a private room with the identity whose id is `message`.
    ///
    /// Also the invitation hubs exchange over the presence topic.
    JoinRoomPrivate,
    /// Acknowledges that the receiving session is now a member of `target`.
    RoomJoined,
    /// Presence: `sender` came online somewhere.
    #[serde(rename = "user-join")]
    UserJoined,
    /// Presence: `sender` went offline.
    UserLeft,
    /// Any action string this build does not know.  Dispatchers ignore it.
    #[default]
    #[serde(other)]
    Unknown,
}

impl Action {
    /// Returns the wire name of the action, for log messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::SendMessage => "send-message",
            Action::JoinRoom => "join-room",
            Action::LeaveRoom => "leave-room",
            Action::JoinRoomPrivate => "join-room-private",
            Action::RoomJoined => "room-joined",
            Action::UserJoined => "user-join",
            Action::UserLeft => "user-left",
            Action::Unknown => "unknown",
        }
    }
}

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// What the envelope asks for or announces.
    #[serde(default)]
    pub action: Action,
    /// Free text; meaning depends on `action` (see the module docs).
    #[serde(default)]
    pub message: String,
    /// Room the envelope refers to, if any.
    #[serde(default)]
    pub target: Option<RoomRecord>,
    /// Identity the envelope is attributed to, if any.
    #[serde(default)]
    pub sender: Option<Identity>,
}

impl Envelope {
    /// Chat text from `sender` to every member of `room`.
    pub fn chat(room: RoomRecord, sender: Identity, text: impl Into<String>) -> Self {
        Self {
            action: Action::SendMessage,
            message: text.into(),
            target: Some(room),
            sender: Some(sender),
        }
    }

    /// System notice sent to existing members of a public room when
    /// `joiner_name` joins it.  It carries no sender.
    pub fn welcome(room: RoomRecord, joiner_name: &str) -> Self {
        Self {
            action: Action::SendMessage,
            message: format!("{joiner_name} {WELCOME_SUFFIX}"),
            target: Some(room),
            sender: None,
        }
    }

    /// Join acknowledgement.  `inviter` is `None` for self-initiated joins.
    pub fn room_joined(room: RoomRecord, inviter: Option<Identity>) -> Self {
        Self {
            action: Action::RoomJoined,
            message: String::new(),
            target: Some(room),
            sender: inviter,
        }
    }

    /// Presence announcement for an identity that came online.
    pub fn user_joined(identity: Identity) -> Self {
        Self {
            action: Action::UserJoined,
            sender: Some(identity),
            ..Self::default()
        }
    }

    /// Presence announcement for an identity that went offline.
    pub fn user_left(identity: Identity) -> Self {
        Self {
            action: Action::UserLeft,
            sender: Some(identity),
            ..Self::default()
        }
    }

    /// Private-room invitation published by `inviter` for `invitee_id`.
    pub fn private_invite(room: RoomRecord, inviter: Identity, invitee_id: &str) -> Self {
        Self {
            action: Action::JoinRoomPrivate,
            message: invitee_id.to_string(),
            target: Some(room),
            sender: Some(inviter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_names_match_protocol() {
        let cases = [
            (Action::SendMessage, "\"send-message\""),
            (Action::JoinRoom, "\"join-room\""),
            (Action::LeaveRoom, "\"leave-room\""),
            (Action::JoinRoomPrivate, "\"join-room-private\""),
            (Action::RoomJoined, "\"room-joined\""),
            (Action::UserJoined, "\"user-join\""),
            (Action::UserLeft, "\"user-left\""),
        ];
        for (action, expected) in cases {
            assert_eq!(serde_json::to_string(&action).unwrap(), expected);
            assert_eq!(format!("\"{}\"", action.as_str()), expected);
        }
    }

    #[test]
    fn test_unknown_action_string_decodes_to_unknown() {
        let action: Action = serde_json::from_str("\"typing\"").unwrap();
        assert_eq!(action, Action::Unknown);
    }

    #[test]
    fn test_welcome_notice_text() {
        let env = Envelope::welcome(RoomRecord::new("general", false), "Jiro");
        assert_eq!(env.message, "Jiro joined the room");
        assert_eq!(env.action, Action::SendMessage);
        assert!(env.sender.is_none());
    }

    #[test]
    fn test_private_invite_carries_invitee_in_message() {
        let room = RoomRecord::new("u2u1", true);
        let env = Envelope::private_invite(room.clone(), Identity::new("u1", "Taro"), "u2");
        assert_eq!(env.action, Action::JoinRoomPrivate);
        assert_eq!(env.message, "u2");
        assert_eq!(env.target, Some(room));
        assert_eq!(env.sender.unwrap().id, "u1");
    }

    #[test]
    fn test_user_joined_has_empty_message_and_no_target() {
        let env = Envelope::user_joined(Identity::new("u1", "Taro"));
        assert!(env.message.is_empty());
        assert!(env.target.is_none());
    }
}
