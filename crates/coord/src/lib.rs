pub mod clock;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod merge;
pub mod notify;
pub mod staleness;
pub mod store;

pub use coordinator::{Collaboration, CommitReport};
pub use error::{CoordError, LockError, MergeError, StoreError};
