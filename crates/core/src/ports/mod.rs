pub mod git;
pub mod discovery;
pub mod persistence;
pub mod time;

// Re-exports
pub use git::*;
pub use discovery::*;
pub use persistence::*;
pub use time::*;
