pub mod git;
pub mod discovery;
pub mod watch;
pub mod persistence;
pub mod log_forward;
