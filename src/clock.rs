use chrono::{Local, NaiveDateTime};

/// Source of the current instant. Meeting times are stored as naive local
/// values, so the clock speaks the same language.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Pinned instant, used by `--now` and by tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Picks the fixed clock when an override instant was supplied.
pub fn from_override(at: Option<NaiveDateTime>) -> Box<dyn Clock + Send + Sync> {
    match at {
        Some(instant) => Box::new(FixedClock(instant)),
        None => Box::new(SystemClock),
    }
}
