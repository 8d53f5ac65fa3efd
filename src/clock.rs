use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

/// Milliseconds since the Unix epoch
pub type Timestamp = u64;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Timestamp;
}

pub type SharedClock = Arc<dyn Clock + 'static>;

fn system_now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn new_shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> Timestamp {
        system_now_ms()
    }
}

/// Wall clock anchored once and then advanced by tokio's clock
///
/// Under a paused tokio runtime this follows virtual time, which keeps
/// tracker timestamps consistent with the timers driving the pollers.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeClock {
    base_ms: Timestamp,
    base: tokio::time::Instant,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self::starting_at(system_now_ms())
    }

    pub fn starting_at(base_ms: Timestamp) -> Self {
        Self {
            base_ms,
            base: tokio::time::Instant::now(),
        }
    }

    pub fn new_shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now_ms(&self) -> Timestamp {
        self.base_ms + self.base.elapsed().as_millis() as Timestamp
    }
}
