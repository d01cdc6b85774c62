//! Conversation session persistence.
//!
//! Each session is one JSON file under `data/sessions/`, keyed by a UUID.
//! Appends go through a per-session async mutex so concurrent requests on
//! the same conversation never lose a message to a read-modify-write race.

mod store;

pub use store::{ChatMessage, ChatSessionStore, ChatStoreError, Sender, SessionSummary};
