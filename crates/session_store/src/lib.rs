//! Append-only JSONL persistence for conversation checkpoints.
//!
//! Each conversation owns one file under `<cwd>/.agent/sessions/`. The first
//! line is a [`SessionHeader`]; every following line is a [`SessionEntry`]
//! linked to its predecessor through `parent_id`.

mod error;
mod paths;
mod schema;
mod store;

pub use error::{LineProblem, SessionStoreError};
pub use paths::{session_file_name, session_root};
pub use schema::{
    Checkpoint, EntryRecordType, SessionEntry, SessionEntryKind, SessionHeader, SessionRecordType,
};
pub use store::SessionStore;
