//! Pub/sub bridge adapters.
//!
//! | Adapter          | When to use                                        |
//! |------------------|----------------------------------------------------|
//! | [`MemoryPubSub`] | one process (a single instance, or tests)          |
//! | [`RelayPubSub`]  | several processes sharing a `roomcast-relay` broker |

pub mod memory;
pub mod relay;

pub use memory::MemoryPubSub;
pub use relay::RelayPubSub;
