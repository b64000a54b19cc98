//! Clocks and timestamp helpers.

use chrono::{NaiveDateTime, SecondsFormat, TimeDelta, Utc};
use std::cell::Cell;
use std::rc::Rc;
use ulid::Ulid;

/// Source of the instant used to build snapshot keys.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock in UTC. Local time repeats an hour when daylight saving ends,
/// which would let a later key sort before an earlier one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Hand-driven clock. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn set(&self, at: NaiveDateTime) {
        self.now.set(at);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.now.set(self.now.get() + TimeDelta::seconds(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        self.now.get()
    }
}

/// RFC 3339 UTC timestamp with second precision (e.g. `2024-01-01T09:30:00Z`).
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new(at(9, 30, 0));
        let handle = clock.clone();
        handle.advance_secs(61);
        assert_eq!(clock.now(), at(9, 31, 1));
        clock.set(at(23, 59, 59));
        assert_eq!(handle.now(), at(23, 59, 59));
    }

    #[test]
    fn test_system_clock_keys_stay_ordered_across_fall_back() {
        use crate::core::keys::KeyStyle;
        // 01:30 EDT and 01:10 EST on 2024-11-03: the second is 40 minutes later.
        let before = NaiveDate::from_ymd_opt(2024, 11, 3)
            .unwrap()
            .and_hms_opt(5, 30, 0)
            .unwrap();
        let after = before + TimeDelta::minutes(40);
        let k1 = KeyStyle::Compact.format(before);
        let k2 = KeyStyle::Compact.format(after);
        assert!(k1 < k2, "{k1} should sort before {k2}");
    }

    #[test]
    fn test_system_clock_is_utc() {
        let utc = Utc::now().naive_utc();
        let clock = SystemClock.now();
        assert!((clock - utc).num_seconds().abs() <= 5);
    }

    #[test]
    fn test_now_rfc3339_format() {
        let ts = now_rfc3339();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn test_new_event_id_is_valid_ulid() {
        let id = new_event_id();
        assert!(Ulid::from_string(&id).is_ok());
        assert_ne!(id, new_event_id());
    }
}
