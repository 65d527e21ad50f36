//! The identity of a connected user.

use serde::{Deserialize, Serialize};

/// A user identity as issued by the identity directory.
///
/// Identities are immutable once issued.  The `id` is an opaque, globally
/// unique token (the bundled directory issues UUID strings, but nothing in the
/// engine parses it); `name` is the display name shown to other users.
///
/// # Serde representation
///
/// ```json
/// {"id":"4f7c...","name":"Taro"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque unique token.
    #[serde(default)]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

impl Identity {
    /// Creates an identity from its id and display name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}
