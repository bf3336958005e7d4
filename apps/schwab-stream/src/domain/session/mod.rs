//! Session Window
//!
//! The daily wall-clock interval during which streaming may run. Outside the
//! window the session controller refuses to connect and terminates.

use chrono::{DateTime, NaiveTime, TimeZone};

/// Invalid session window bounds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("session start {start} must be before end {end}")]
pub struct SessionWindowError {
    /// Requested start.
    pub start: NaiveTime,
    /// Requested end.
    pub end: NaiveTime,
}

/// Daily `[start, end)` interval in local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl SessionWindow {
    /// Create a window.
    ///
    /// # Errors
    ///
    /// Returns an error unless `start < end`. Windows spanning midnight are
    /// not supported.
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, SessionWindowError> {
        if start >= end {
            return Err(SessionWindowError { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window opening time.
    #[must_use]
    pub const fn start(&self) -> NaiveTime {
        self.start
    }

    /// Window closing time.
    #[must_use]
    pub const fn end(&self) -> NaiveTime {
        self.end
    }

    /// Whether `time` falls inside the window.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }

    /// Today's closing instant if `now` is inside the window, else `None`.
    #[must_use]
    pub fn deadline<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        if !self.contains(now.time()) {
            return None;
        }
        now.date_naive()
            .and_time(self.end)
            .and_local_timezone(now.timezone())
            .earliest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use test_case::test_case;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window() -> SessionWindow {
        SessionWindow::new(t(6, 30), t(13, 0)).unwrap()
    }

    #[test]
    fn rejects_inverted_bounds() {
        assert!(SessionWindow::new(t(13, 0), t(6, 30)).is_err());
        assert!(SessionWindow::new(t(9, 0), t(9, 0)).is_err());
    }

    #[test_case(6, 29 => false ; "before open")]
    #[test_case(6, 30 => true ; "at open")]
    #[test_case(12, 59 => true ; "before close")]
    #[test_case(13, 0 => false ; "at close")]
    #[test_case(18, 0 => false ; "evening")]
    fn contains(h: u32, m: u32) -> bool {
        window().contains(t(h, m))
    }

    #[test]
    fn deadline_is_today_at_end() {
        let tz = FixedOffset::west_opt(7 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 12, 18, 9, 15, 0).unwrap();
        let deadline = window().deadline(&now).unwrap();
        assert_eq!(deadline, tz.with_ymd_and_hms(2024, 12, 18, 13, 0, 0).unwrap());
    }

    #[test]
    fn no_deadline_outside_window() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let early = tz.with_ymd_and_hms(2024, 12, 18, 5, 0, 0).unwrap();
        let late = tz.with_ymd_and_hms(2024, 12, 18, 14, 0, 0).unwrap();
        assert!(window().deadline(&early).is_none());
        assert!(window().deadline(&late).is_none());
    }
}
