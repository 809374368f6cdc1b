use time::OffsetDateTime;

/// Source of the current time, injected so token lifetimes are testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[cfg(test)]
pub mod test_clock {
    use super::*;
    use std::sync::Mutex;
    use time::Duration;

    /// Manually advanced clock for expiry-boundary tests.
    pub struct ManualClock(Mutex<OffsetDateTime>);

    impl ManualClock {
        pub fn starting_at(at: OffsetDateTime) -> Self {
            Self(Mutex::new(at))
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> OffsetDateTime {
            *self.0.lock().unwrap()
        }
    }
}
