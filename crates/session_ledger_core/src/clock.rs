//! crates/session_ledger_core/src/clock.rs
//!
//! Wall-clock port. Rolling windows are measured from "now", which tests pin.

use chrono::{Local, NaiveDateTime};

pub trait Clock: Send + Sync {
    /// Local date and time used to anchor the rolling windows.
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}
