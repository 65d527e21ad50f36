//! In-memory directories, seeded from the `[[users]]` section of the config
//! file.
//!
//! These are the directories a single-binary deployment runs with.  A real
//! account store plugs in by implementing the same traits.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use roomcast_core::{Identity, RoomRecord};
use uuid::Uuid;

use crate::application::directory::{DirectoryError, IdentityDirectory, RoomDirectory};

/// One account known to [`MemoryIdentityDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub identity: Identity,
    /// Login name, unique across the directory.
    pub username: String,
    /// Opaque credential.  Verified in front of this service, never here.
    pub credential: String,
}

/// Identity directory held in memory.  Keeps insertion order for `list_all`.
#[derive(Debug, Default)]
pub struct MemoryIdentityDirectory {
    users: RwLock<Vec<DirectoryUser>>,
}

impl MemoryIdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a directory from existing accounts.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DuplicateUsername`] if two accounts share a
    /// username.
    pub fn with_users(users: impl IntoIterator<Item = DirectoryUser>) -> Result<Self, DirectoryError> {
        let dir = Self::new();
        for user in users {
            dir.insert(user)?;
        }
        Ok(dir)
    }

    /// Adds an account with a caller-chosen id.
    pub fn insert(&self, user: DirectoryUser) -> Result<(), DirectoryError> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if users.iter().any(|u| u.username == user.username) {
            return Err(DirectoryError::DuplicateUsername(user.username));
        }
        users.push(user);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdentityDirectory for MemoryIdentityDirectory {
    fn lookup_by_username(&self, username: &str) -> Result<Option<Identity>, DirectoryError> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        Ok(users
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.identity.clone()))
    }

    fn lookup_by_id(&self, id: &str) -> Result<Option<Identity>, DirectoryError> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        Ok(users
            .iter()
            .find(|u| u.identity.id == id)
            .map(|u| u.identity.clone()))
    }

    fn list_all(&self) -> Result<Vec<Identity>, DirectoryError> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        Ok(users.iter().map(|u| u.identity.clone()).collect())
    }

    fn create(
        &self,
        name: &str,
        username: &str,
        credential: &str,
    ) -> Result<String, DirectoryError> {
        let id = Uuid::new_v4().to_string();
        self.insert(DirectoryUser {
            identity: Identity::new(id.clone(), name),
            username: username.to_string(),
            credential: credential.to_string(),
        })?;
        Ok(id)
    }
}

/// Room directory held in memory, keyed by room name.
#[derive(Debug, Default)]
pub struct MemoryRoomDirectory {
    rooms: RwLock<HashMap<String, RoomRecord>>,
}

impl MemoryRoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoomDirectory for MemoryRoomDirectory {
    fn find_by_name(&self, name: &str) -> Result<Option<RoomRecord>, DirectoryError> {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rooms.get(name).cloned())
    }

    fn create(&self, room: &RoomRecord) -> Result<(), DirectoryError> {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        if rooms.contains_key(&room.name) {
            return Err(DirectoryError::DuplicateRoom(room.name.clone()));
        }
        rooms.insert(room.name.clone(), room.clone());
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, name: &str, username: &str) -> DirectoryUser {
        DirectoryUser {
            identity: Identity::new(id, name),
            username: username.to_string(),
            credential: String::new(),
        }
    }

    #[test]
    fn test_lookup_by_username_and_id() {
        // Arrange
        let dir = MemoryIdentityDirectory::with_users([user("u1", "Taro", "taro")]).unwrap();

        // Act / Assert
        assert_eq!(
            dir.lookup_by_username("taro").unwrap(),
            Some(Identity::new("u1", "Taro"))
        );
        assert_eq!(dir.lookup_by_id("u1").unwrap().unwrap().name, "Taro");
        assert_eq!(dir.lookup_by_id("u9").unwrap(), None);
    }

    #[test]
    fn test_create_assigns_fresh_uuid() {
        let dir = MemoryIdentityDirectory::new();

        let id = dir.create("Jiro", "jiro", "secret").unwrap();

        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(dir.lookup_by_id(&id).unwrap().unwrap().name, "Jiro");
    }

    #[test]
    fn test_create_rejects_duplicate_username() {
        let dir = MemoryIdentityDirectory::new();
        dir.create("Jiro", "jiro", "a").unwrap();

        let result = dir.create("Other Jiro", "jiro", "b");

        assert!(matches!(result, Err(DirectoryError::DuplicateUsername(u)) if u == "jiro"));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_list_all_keeps_insertion_order() {
        let dir = MemoryIdentityDirectory::with_users([
            user("u2", "Jiro", "jiro"),
            user("u1", "Taro", "taro"),
        ])
        .unwrap();
        let names: Vec<String> = dir.list_all().unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, ["Jiro", "Taro"]);
    }

    #[test]
    fn test_room_directory_create_then_find() {
        // Arrange
        let dir = MemoryRoomDirectory::new();
        let room = RoomRecord::new("lobby", false);

        // Act
        dir.create(&room).unwrap();

        // Assert
        assert_eq!(dir.find_by_name("lobby").unwrap(), Some(room.clone()));
        assert!(matches!(dir.create(&room), Err(DirectoryError::DuplicateRoom(_))));
        assert_eq!(dir.find_by_name("other").unwrap(), None);
    }
}
