//! Simulation time: fixed-step and realtime modes, plus the RTC overlay.
//!
//! Fixed-step is the deterministic default; every scan advances the
//! timestamp by exactly `dt`. Realtime samples the host monotonic clock.
//! Scan preparation previews the next timestamp without mutating the
//! clock so an abandoned debug step leaves time untouched.

use std::time::Instant;

use crate::error::ApiError;

/// Default fixed-step scan period in seconds.
pub const DEFAULT_DT: f64 = 0.1;

/// How the scan scheduler advances simulated time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeMode {
    /// Deterministic: every scan advances by exactly `dt` seconds.
    FixedStep {
        /// Simulated seconds per scan.
        dt: f64,
    },
    /// Timestamps follow the host monotonic clock.
    Realtime,
}

impl Default for TimeMode {
    fn default() -> Self {
        TimeMode::FixedStep { dt: DEFAULT_DT }
    }
}

/// Scan clock owned by the interpreter.
#[derive(Debug, Clone)]
pub struct Clock {
    mode: TimeMode,
    timestamp: f64,
    session_start: Option<Instant>,
}

impl Clock {
    /// New clock at timestamp zero.
    pub fn new(mode: TimeMode) -> Self {
        Clock {
            mode,
            timestamp: 0.0,
            session_start: None,
        }
    }

    /// Active time mode.
    pub const fn mode(&self) -> TimeMode {
        self.mode
    }

    /// Switch modes. Realtime sessions restart on the next scan.
    pub fn set_mode(&mut self, mode: TimeMode) {
        self.mode = mode;
        self.session_start = None;
    }

    /// Timestamp of the last committed scan.
    pub const fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Zero the clock for a RUN transition.
    pub fn reset(&mut self) {
        self.timestamp = 0.0;
        self.session_start = None;
    }

    /// Preview the timestamp and elapsed dt of the scan being prepared,
    /// without committing either.
    pub fn preview(&mut self) -> (f64, f64) {
        match self.mode {
            TimeMode::FixedStep { dt } => (self.timestamp + dt, dt),
            TimeMode::Realtime => {
                let start = *self.session_start.get_or_insert_with(Instant::now);
                let now = start.elapsed().as_secs_f64();
                // Timestamps never step backwards, even if the mode was
                // switched mid-session.
                let now = now.max(self.timestamp);
                (now, now - self.timestamp)
            }
        }
    }

    /// Commit a previewed timestamp at snapshot time.
    pub fn commit(&mut self, timestamp: f64) {
        self.timestamp = timestamp;
    }
}

/// Civil wall-clock date-time for the RTC overlay.
///
/// The engine stores the value registered via `set_rtc` as the origin of
/// simulation time and derives the current fields by adding the elapsed
/// simulated seconds, rolling days, months and leap years.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RtcDateTime {
    /// Civil year.
    pub year: i32,
    /// Month, 1-12.
    pub month: u32,
    /// Day of month, 1-based.
    pub day: u32,
    /// Hour, 0-23.
    pub hour: u32,
    /// Minute, 0-59.
    pub minute: u32,
    /// Second, 0-59.
    pub second: u32,
}

impl RtcDateTime {
    /// Validated constructor.
    pub fn new(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    ) -> Result<Self, ApiError> {
        if !(1..=12).contains(&month) {
            return Err(ApiError::InvalidDateTime("month must be 1-12"));
        }
        if day < 1 || day > days_in_month(year, month) {
            return Err(ApiError::InvalidDateTime("day outside month"));
        }
        if hour > 23 {
            return Err(ApiError::InvalidDateTime("hour must be 0-23"));
        }
        if minute > 59 {
            return Err(ApiError::InvalidDateTime("minute must be 0-59"));
        }
        if second > 59 {
            return Err(ApiError::InvalidDateTime("second must be 0-59"));
        }
        Ok(RtcDateTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
    }

    /// This date-time advanced by whole seconds, with civil rollover.
    pub fn add_seconds(&self, secs: u64) -> RtcDateTime {
        let mut out = *self;
        let total = self.second as u64 + secs;
        out.second = (total % 60) as u32;
        let total = self.minute as u64 + total / 60;
        out.minute = (total % 60) as u32;
        let total = self.hour as u64 + total / 60;
        out.hour = (total % 24) as u32;
        let mut days = total / 24;
        while days > 0 {
            let remaining_this_month = days_in_month(out.year, out.month) - out.day;
            if days <= remaining_this_month as u64 {
                out.day += days as u32;
                break;
            }
            days -= remaining_this_month as u64 + 1;
            out.day = 1;
            out.month += 1;
            if out.month > 12 {
                out.month = 1;
                out.year += 1;
            }
        }
        out
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        _ => 28,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_step_preview_is_exact() {
        let mut clock = Clock::new(TimeMode::FixedStep { dt: 0.1 });
        let (ts, dt) = clock.preview();
        assert_eq!((ts, dt), (0.1, 0.1));
        // preview does not advance
        let (ts2, _) = clock.preview();
        assert_eq!(ts2, 0.1);
        clock.commit(ts);
        assert_eq!(clock.timestamp(), 0.1);
        assert_eq!(clock.preview().0, 0.2);
    }

    #[test]
    fn rtc_rolls_over_midnight_and_month() {
        let rtc = RtcDateTime::new(2024, 2, 28, 23, 59, 30).unwrap();
        let next = rtc.add_seconds(45);
        assert_eq!((next.month, next.day), (2, 29)); // 2024 is a leap year
        assert_eq!((next.hour, next.minute, next.second), (0, 0, 15));

        let rtc = RtcDateTime::new(2023, 12, 31, 23, 59, 59).unwrap();
        let next = rtc.add_seconds(1);
        assert_eq!((next.year, next.month, next.day), (2024, 1, 1));
    }

    #[test]
    fn rtc_validates_fields() {
        assert!(RtcDateTime::new(2024, 13, 1, 0, 0, 0).is_err());
        assert!(RtcDateTime::new(2023, 2, 29, 0, 0, 0).is_err());
        assert!(RtcDateTime::new(2024, 2, 29, 0, 0, 0).is_ok());
    }
}
