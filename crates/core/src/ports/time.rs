/// Clock abstraction for testability
pub trait Clock: Send + Sync {
    /// Current Unix timestamp in milliseconds
    fn now_millis(&self) -> i64;
}

/// System clock implementation
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}
