//! Room records and naming rules.
//!
//! A room has two keys:
//!
//! - its **name**, the human key clients use to join ("general", "lobby"), and
//! - its **id**, a UUID that envelopes carry in their `target` field.
//!
//! # Why derive the id from the name?
//!
//! Instances share no memory.  When two instances independently materialise
//! the room "general" they must agree on its id, otherwise an envelope relayed
//! from one instance would reference a room the other instance does not know.
//! A UUID v5 over the room name gives every instance the same id without a
//! lookup round trip.  Records loaded from the room directory keep whatever id
//! the directory stored.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for public room ids derived from the name.
const ROOM_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x1d, 0x3a, 0x52, 0x94, 0x0e, 0x4c, 0x7b, 0x8f, 0x21, 0x5a, 0xc3, 0x77, 0xe0, 0x19, 0xd4,
]);

/// Namespace for private room ids.  Kept apart from [`ROOM_NAMESPACE`] so a
/// public room squatting a private room's name never shares its id.
const PRIVATE_ROOM_NAMESPACE: Uuid = Uuid::from_bytes([
    0x2f, 0x84, 0xc0, 0x19, 0x5e, 0x73, 0x4a, 0x06, 0xb1, 0x9d, 0x08, 0x6e, 0xe2, 0x4b, 0x31, 0xa7,
]);

/// Identity and privacy of a room.
///
/// This is both the room directory's record type and the `target` reference
/// carried inside an [`crate::Envelope`].
///
/// # Serde representation
///
/// ```json
/// {"id":"9b1c...","name":"general","private":false}
/// ```
///
/// Clients only need to send `id` when referencing a room they already joined;
/// `name` and `private` default when absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomRecord {
    /// Stable room identifier.
    pub id: Uuid,
    /// Human key used to look the room up or create it.
    #[serde(default)]
    pub name: String,
    /// `true` for invitation-only rooms.
    #[serde(default)]
    pub private: bool,
}

impl RoomRecord {
    /// Creates a record whose id is derived from `name` and `private`.
    ///
    /// ```rust
    /// use roomcast_core::RoomRecord;
    ///
    /// let a = RoomRecord::new("general", false);
    /// let b = RoomRecord::new("general", false);
    /// assert_eq!(a.id, b.id);
    /// ```
    pub fn new(name: impl Into<String>, private: bool) -> Self {
        let name = name.into();
        let namespace = if private {
            &PRIVATE_ROOM_NAMESPACE
        } else {
            &ROOM_NAMESPACE
        };
        Self {
            id: Uuid::new_v5(namespace, name.as_bytes()),
            name,
            private,
        }
    }
}

/// Returns the deterministic name of the private room between two identities.
///
/// The invitee's id comes first, so the room requested by A for B is named
/// `B.id + A.id`.  Any instance that sees the invitation can compute the same
/// name on its own.
pub fn private_room_name(invitee_id: &str, inviter_id: &str) -> String {
    format!("{invitee_id}{inviter_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_is_stable_for_same_name() {
        assert_eq!(
            RoomRecord::new("lobby", false).id,
            RoomRecord::new("lobby", false).id
        );
    }

    #[test]
    fn test_room_id_differs_for_different_names() {
        assert_ne!(
            RoomRecord::new("lobby", false).id,
            RoomRecord::new("general", false).id
        );
    }

    #[test]
    fn test_private_and_public_rooms_of_same_name_have_different_ids() {
        assert_ne!(
            RoomRecord::new("u2u1", true).id,
            RoomRecord::new("u2u1", false).id
        );
    }

    #[test]
    fn test_private_room_name_puts_invitee_first() {
        assert_eq!(private_room_name("u2", "u1"), "u2u1");
    }

    #[test]
    fn test_room_record_deserializes_from_id_only() {
        // Arrange
        let id = Uuid::new_v4();
        let json = format!(r#"{{"id":"{id}"}}"#);

        // Act
        let record: RoomRecord = serde_json::from_str(&json).unwrap();

        // Assert
        assert_eq!(record.id, id);
        assert!(record.name.is_empty());
        assert!(!record.private);
    }

    #[test]
    fn test_room_record_rejects_malformed_id() {
        let result: Result<RoomRecord, _> = serde_json::from_str(r#"{"id":"not-a-uuid"}"#);
        assert!(result.is_err());
    }
}
