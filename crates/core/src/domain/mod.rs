pub mod repo;
pub mod status;
pub mod operation;
pub mod commit;
pub mod events;

// Re-exports for convenience
pub use repo::*;
pub use status::*;
pub use operation::*;
pub use commit::*;
pub use events::*;
