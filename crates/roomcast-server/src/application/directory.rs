//! Directory ports: where identities and durable room records come from.
//!
//! Both directories are synchronous.  The hub calls them from its own loop,
//! logs failures, and never retries: a directory outage degrades presence and
//! warm starts, it does not stop the server.

use roomcast_core::{Identity, RoomRecord};
use thiserror::Error;

/// Errors raised by a directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// An identity with this username already exists.
    #[error("username '{0}' is already taken")]
    DuplicateUsername(String),

    /// A room with this name already exists.
    #[error("room '{0}' already exists")]
    DuplicateRoom(String),

    /// The backing store could not be reached.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Source of identities.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityDirectory: Send + Sync {
    /// Finds an identity by login name.
    fn lookup_by_username(&self, username: &str) -> Result<Option<Identity>, DirectoryError>;

    /// Finds an identity by id.
    fn lookup_by_id(&self, id: &str) -> Result<Option<Identity>, DirectoryError>;

    /// Returns every identity; seeds the hub's presence list.
    fn list_all(&self) -> Result<Vec<Identity>, DirectoryError>;

    /// Registers a new identity and returns its id.
    fn create(&self, name: &str, username: &str, credential: &str)
        -> Result<String, DirectoryError>;
}

/// Durable room records, consulted when a room is not yet running.
#[cfg_attr(test, mockall::automock)]
pub trait RoomDirectory: Send + Sync {
    /// Finds a room record by name.
    fn find_by_name(&self, name: &str) -> Result<Option<RoomRecord>, DirectoryError>;

    /// Stores a newly created room.
    fn create(&self, room: &RoomRecord) -> Result<(), DirectoryError>;
}
