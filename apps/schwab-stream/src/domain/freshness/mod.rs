//! Sink Freshness
//!
//! Freshness facts for the two sinks and the two-strikes rule that turns a
//! stream of evaluations into alerts.
//!
//! A period is a violation when any of these hold:
//! - underlying stale in the cache
//! - no fresh option symbols in the cache
//! - underlying stale in the durable log
//! - no fresh option symbols in the durable log
//!
//! An alert fires only on the second consecutive violation, after which the
//! gate disarms. Three violations in a row therefore fire exactly once.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::domain::quote::QuoteRecord;

// =============================================================================
// Criteria
// =============================================================================

/// What counts as fresh for each sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessCriteria {
    /// Underlying symbol (e.g. `$SPX`).
    pub underlying: String,
    /// Prefix shared by every option symbol (e.g. `SPXW`).
    pub option_prefix: String,
    /// Maximum record age in the cache.
    pub cache_window: Duration,
    /// Maximum record age in the durable log.
    pub log_window: Duration,
}

impl Default for FreshnessCriteria {
    fn default() -> Self {
        Self {
            underlying: "$SPX".to_string(),
            option_prefix: "SPXW".to_string(),
            cache_window: Duration::from_secs(60),
            log_window: Duration::from_secs(120),
        }
    }
}

// =============================================================================
// Per-sink Facts
// =============================================================================

/// The two freshness facts for one sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SinkFreshness {
    /// An underlying record exists within the window.
    pub underlying_fresh: bool,
    /// Distinct option symbols updated within the window.
    pub fresh_options: usize,
}

impl SinkFreshness {
    /// Evaluate a set of records against a window.
    ///
    /// A record is fresh when `now - received_at <= window`.
    #[must_use]
    pub fn from_records<'a, I>(
        records: I,
        underlying: &str,
        option_prefix: &str,
        window: Duration,
        now_ms: i64,
    ) -> Self
    where
        I: IntoIterator<Item = &'a QuoteRecord>,
    {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let mut underlying_fresh = false;
        let mut options = HashSet::new();

        for record in records {
            if now_ms.saturating_sub(record.received_at()) > window_ms {
                continue;
            }
            if record.symbol() == underlying {
                underlying_fresh = true;
            } else if record.symbol().starts_with(option_prefix) {
                options.insert(record.symbol());
            }
        }

        Self {
            underlying_fresh,
            fresh_options: options.len(),
        }
    }

    /// Whether either fact fails.
    #[must_use]
    pub const fn is_violation(&self) -> bool {
        !self.underlying_fresh || self.fresh_options == 0
    }
}

// =============================================================================
// Report
// =============================================================================

/// Freshness of both sinks for one evaluation period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FreshnessReport {
    /// Cache facts.
    pub cache: SinkFreshness,
    /// Durable log facts.
    pub log: SinkFreshness,
}

impl FreshnessReport {
    /// Logical OR of the four checks.
    #[must_use]
    pub const fn is_violation(&self) -> bool {
        self.cache.is_violation() || self.log.is_violation()
    }
}

impl fmt::Display for FreshnessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache: underlying fresh {}, options fresh {} | log: underlying fresh {}, options fresh {}",
            self.cache.underlying_fresh,
            self.cache.fresh_options,
            self.log.underlying_fresh,
            self.log.fresh_options
        )
    }
}

// =============================================================================
// Two-strikes Gate
// =============================================================================

/// Alert hysteresis: fire on the second consecutive violation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertGate {
    pending: bool,
}

impl AlertGate {
    /// New disarmed gate.
    #[must_use]
    pub const fn new() -> Self {
        Self { pending: false }
    }

    /// Whether the previous period was an unalerted violation.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending
    }

    /// Record one period's outcome. Returns `true` when an alert must fire.
    pub const fn observe(&mut self, violation: bool) -> bool {
        if violation && self.pending {
            self.pending = false;
            true
        } else {
            self.pending = violation;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::Map;
    use test_case::test_case;

    const NOW: i64 = 1_700_000_000_000;

    fn rec(symbol: &str, age_secs: i64) -> QuoteRecord {
        QuoteRecord::new(NOW - age_secs * 1000, symbol, Map::new())
    }

    fn cache_facts(records: &[QuoteRecord]) -> SinkFreshness {
        SinkFreshness::from_records(records, "$SPX", "SPXW", Duration::from_secs(60), NOW)
    }

    #[test]
    fn underlying_61s_old_is_stale() {
        let facts = cache_facts(&[rec("$SPX", 61), rec("SPXW  241218C05000000", 5)]);
        assert!(!facts.underlying_fresh);
        assert_eq!(facts.fresh_options, 1);
        assert!(facts.is_violation());
    }

    #[test]
    fn window_is_inclusive() {
        let facts = cache_facts(&[rec("$SPX", 60)]);
        assert!(facts.underlying_fresh);
    }

    #[test]
    fn options_counted_by_distinct_symbol() {
        let facts = cache_facts(&[
            rec("$SPX", 1),
            rec("SPXW  241218C05000000", 1),
            rec("SPXW  241218C05000000", 2),
            rec("SPXW  241218P05000000", 3),
            rec("SPXW  241218P05005000", 90),
            rec("SPY", 1),
        ]);
        assert!(facts.underlying_fresh);
        assert_eq!(facts.fresh_options, 2);
        assert!(!facts.is_violation());
    }

    #[test_case(true, 3, true, 3 => false ; "all fresh")]
    #[test_case(false, 3, true, 3 => true ; "cache underlying stale")]
    #[test_case(true, 0, true, 3 => true ; "cache options empty")]
    #[test_case(true, 3, false, 3 => true ; "log underlying stale")]
    #[test_case(true, 3, true, 0 => true ; "log options empty")]
    fn violation_is_any_check(cu: bool, co: usize, lu: bool, lo: usize) -> bool {
        FreshnessReport {
            cache: SinkFreshness { underlying_fresh: cu, fresh_options: co },
            log: SinkFreshness { underlying_fresh: lu, fresh_options: lo },
        }
        .is_violation()
    }

    fn alerts(sequence: &[bool]) -> usize {
        let mut gate = AlertGate::new();
        sequence.iter().filter(|&&v| gate.observe(v)).count()
    }

    #[test]
    fn single_violation_then_clean_never_fires() {
        assert_eq!(alerts(&[true, false]), 0);
        assert_eq!(alerts(&[true, false, true, false]), 0);
    }

    #[test]
    fn two_consecutive_fire_once() {
        assert_eq!(alerts(&[true, true]), 1);
    }

    #[test]
    fn three_consecutive_fire_once() {
        assert_eq!(alerts(&[true, true, true]), 1);
    }

    #[test]
    fn four_consecutive_fire_twice() {
        assert_eq!(alerts(&[true, true, true, true]), 2);
    }

    #[test]
    fn first_violation_arms_gate() {
        let mut gate = AlertGate::new();
        assert!(!gate.observe(true));
        assert!(gate.is_pending());
        assert!(!gate.observe(false));
        assert!(!gate.is_pending());
    }

    proptest! {
        #[test]
        fn alert_only_after_two_violations(sequence in prop::collection::vec(any::<bool>(), 0..64)) {
            let mut gate = AlertGate::new();
            let mut run = 0usize;
            for violation in sequence {
                run = if violation { run + 1 } else { 0 };
                let fired = gate.observe(violation);
                prop_assert_eq!(fired, violation && run % 2 == 0);
            }
        }
    }
}
