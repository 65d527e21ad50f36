//! Domain records for roomcast.
//!
//! This module contains pure data with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is called the **domain** (or "entities" layer).  Domain code:
//!
//! - Contains the core vocabulary of the application.
//! - Has **no** imports from network libraries, database drivers, or async
//!   runtimes.
//! - Can be compiled and tested anywhere without any external setup.
//!
//! Here the vocabulary is small: an [`identity::Identity`] is somebody who can
//! connect, and a [`room::RoomRecord`] is a place they can talk.  Neither type
//! owns any state that changes after construction; the actors in
//! `roomcast-server` own the mutable parts (memberships, registries).

/// Identity values supplied by the identity directory.
pub mod identity;

/// Room records and the deterministic naming rules for rooms.
pub mod room;
