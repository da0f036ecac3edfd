//! Wall-clock timestamps and the router's clock source.
//!
//! [`Timestamp`] is the seconds + nanoseconds time type used everywhere a
//! point in time or an interval is stored: timer expirations, send-buffer
//! insertion stamps, blacklist update times. [`Clock`] is the source the
//! router reads time from; tests swap in a manually advanced clock so that
//! multi-second protocol timeouts can be exercised without sleeping.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const NSEC_PER_SEC: u32 = 1_000_000_000;
const NSEC_PER_MSEC: u32 = 1_000_000;

/// A point in time (or an interval) with nanosecond resolution.
///
/// Stored as whole seconds plus a nanosecond remainder in `0..1e9`.
/// Negative intervals keep the invariant by borrowing from the seconds
/// field, so ordering and arithmetic stay exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp {
    sec: i64,
    nsec: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { sec: 0, nsec: 0 };

    pub fn new(sec: i64, nsec: u32) -> Timestamp {
        let mut t = Timestamp {
            sec: sec + (nsec / NSEC_PER_SEC) as i64,
            nsec: nsec % NSEC_PER_SEC,
        };
        t.normalize();
        t
    }

    /// The current wall-clock time.
    pub fn now() -> Timestamp {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp::new(d.as_secs() as i64, d.subsec_nanos()),
            Err(_) => Timestamp::ZERO,
        }
    }

    pub fn from_msec(ms: i64) -> Timestamp {
        Timestamp::new(ms.div_euclid(1000), (ms.rem_euclid(1000) as u32) * NSEC_PER_MSEC)
    }

    pub fn from_sec(sec: i64) -> Timestamp {
        Timestamp { sec, nsec: 0 }
    }

    pub fn sec(&self) -> i64 {
        self.sec
    }

    pub fn nsec(&self) -> u32 {
        self.nsec
    }

    pub fn msec(&self) -> u32 {
        self.nsec / NSEC_PER_MSEC
    }

    /// Whole milliseconds since the epoch (or interval length in ms).
    pub fn msecval(&self) -> i64 {
        self.sec * 1000 + (self.nsec / NSEC_PER_MSEC) as i64
    }

    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    fn normalize(&mut self) {
        debug_assert!(self.nsec < NSEC_PER_SEC);
    }
}

impl From<Duration> for Timestamp {
    fn from(d: Duration) -> Timestamp {
        Timestamp::new(d.as_secs() as i64, d.subsec_nanos())
    }
}

impl Add for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: Timestamp) -> Timestamp {
        let mut sec = self.sec + rhs.sec;
        let mut nsec = self.nsec + rhs.nsec;
        if nsec >= NSEC_PER_SEC {
            nsec -= NSEC_PER_SEC;
            sec += 1;
        }
        Timestamp { sec, nsec }
    }
}

impl AddAssign for Timestamp {
    fn add_assign(&mut self, rhs: Timestamp) {
        *self = *self + rhs;
    }
}

impl Sub for Timestamp {
    type Output = Timestamp;
    fn sub(self, rhs: Timestamp) -> Timestamp {
        let mut sec = self.sec - rhs.sec;
        let nsec = if self.nsec >= rhs.nsec {
            self.nsec - rhs.nsec
        } else {
            sec -= 1;
            self.nsec + NSEC_PER_SEC - rhs.nsec
        };
        Timestamp { sec, nsec }
    }
}

impl SubAssign for Timestamp {
    fn sub_assign(&mut self, rhs: Timestamp) {
        *self = *self - rhs;
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Trailing zeros are trimmed down to millisecond precision, the
        // way the subsecond part is conventionally printed in configs.
        if self.nsec % NSEC_PER_MSEC == 0 {
            write!(f, "{}.{:03}", self.sec, self.nsec / NSEC_PER_MSEC)
        } else {
            write!(f, "{}.{:09}", self.sec, self.nsec)
        }
    }
}

/// Parses `sec` or `sec.subsec` with 1-9 subsecond digits.
impl FromStr for Timestamp {
    type Err = ();

    fn from_str(s: &str) -> Result<Timestamp, ()> {
        let (sec_str, frac_str) = match s.split_once('.') {
            Some((a, b)) => (a, b),
            None => (s, ""),
        };
        let sec: i64 = sec_str.parse().map_err(|_| ())?;
        if frac_str.is_empty() {
            return Ok(Timestamp::from_sec(sec));
        }
        if frac_str.len() > 9 || !frac_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(());
        }
        let mut nsec: u32 = frac_str.parse().map_err(|_| ())?;
        for _ in frac_str.len()..9 {
            nsec *= 10;
        }
        Ok(Timestamp::new(sec, nsec))
    }
}

enum ClockSource {
    System,
    Manual(Mutex<Timestamp>),
}

/// The router's time source.
///
/// `Clock::system()` reads the wall clock. `Clock::manual()` starts at an
/// arbitrary fixed point and only moves when [`Clock::advance`] is called,
/// which lets tests march through multi-second protocol timeouts
/// deterministically. Cloning shares the underlying source.
#[derive(Clone)]
pub struct Clock {
    source: Arc<ClockSource>,
}

impl Clock {
    pub fn system() -> Clock {
        Clock { source: Arc::new(ClockSource::System) }
    }

    pub fn manual() -> Clock {
        Clock {
            source: Arc::new(ClockSource::Manual(Mutex::new(Timestamp::from_sec(1_000_000)))),
        }
    }

    pub fn now(&self) -> Timestamp {
        match &*self.source {
            ClockSource::System => Timestamp::now(),
            ClockSource::Manual(t) => *t.lock().expect("clock lock poisoned"),
        }
    }

    /// Advances a manual clock; has no effect on the system clock.
    pub fn advance(&self, delta: Timestamp) {
        if let ClockSource::Manual(t) = &*self.source {
            let mut t = t.lock().expect("clock lock poisoned");
            *t = *t + delta;
        }
    }

    pub fn advance_msec(&self, ms: i64) {
        self.advance(Timestamp::from_msec(ms));
    }

    pub fn is_manual(&self) -> bool {
        matches!(&*self.source, ClockSource::Manual(_))
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.source {
            ClockSource::System => write!(f, "Clock::system"),
            ClockSource::Manual(_) => write!(f, "Clock::manual({})", self.now()),
        }
    }
}

impl Default for Clock {
    fn default() -> Clock {
        Clock::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_borrows_nanoseconds() {
        let a = Timestamp::new(2, 100);
        let b = Timestamp::new(1, 200);
        let d = a - b;
        assert_eq!(d.sec(), 0);
        assert_eq!(d.nsec(), NSEC_PER_SEC - 100);
        assert_eq!(b + d, a);
    }

    #[test]
    fn msec_round_trip() {
        let t = Timestamp::from_msec(45_250);
        assert_eq!(t.sec(), 45);
        assert_eq!(t.msec(), 250);
        assert_eq!(t.msecval(), 45_250);
    }

    #[test]
    fn parse_and_display() {
        let t: Timestamp = "12.500".parse().unwrap();
        assert_eq!(t, Timestamp::from_msec(12_500));
        assert_eq!(t.to_string(), "12.500");
        assert!("1.x".parse::<Timestamp>().is_err());
        assert!("1.1234567890".parse::<Timestamp>().is_err());
    }

    #[test]
    fn manual_clock_advances() {
        let c = Clock::manual();
        let t0 = c.now();
        c.advance_msec(45_000);
        assert_eq!((c.now() - t0).msecval(), 45_000);
    }
}
