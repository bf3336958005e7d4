//! Strike-Grid Symbol Generation
//!
//! Computes the option subscription set for one connection from the current
//! reference price of the underlying.
//!
//! The grid is snapped outward to multiples of the strike step:
//!
//! ```text
//! low  = floor((price - width) / step) * step
//! high = ceil((price + width) / step) * step
//! ```
//!
//! Every grid point from `low` to `high` inclusive yields a call and a put,
//! in that order. Symbols use the venue's fixed-width layout:
//! `<root padded to 6><YYMMDD><C|P><strike x 1000, 8 digits>`.

use chrono::NaiveDate;

/// Upper bound on grid points for a single connection.
pub const MAX_GRID_POINTS: usize = 10_000;

/// [`MAX_GRID_POINTS`] as a float bound on grid intervals.
const MAX_GRID_INTERVALS: f64 = 10_000.0;

/// Width the option root is padded to.
const ROOT_WIDTH: usize = 6;

// =============================================================================
// Errors
// =============================================================================

/// Invalid strike-grid inputs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StrikeGridError {
    /// Step must be strictly positive.
    #[error("strike step must be positive, got {0}")]
    NonPositiveStep(f64),

    /// Width must not be negative.
    #[error("range width must not be negative, got {0}")]
    NegativeRange(f64),

    /// Inputs must be finite numbers.
    #[error("non-finite grid input: {0}")]
    NonFinite(&'static str),

    /// The snapped grid extends below zero.
    #[error("grid low bound {0} is below zero")]
    NegativeStrike(f64),

    /// The grid would exceed [`MAX_GRID_POINTS`].
    #[error("grid of {0} points exceeds the limit of {MAX_GRID_POINTS}")]
    TooManyPoints(usize),
}

// =============================================================================
// Option Right
// =============================================================================

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionRight {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

impl OptionRight {
    /// Single-letter code used in the symbol.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::Call => 'C',
            Self::Put => 'P',
        }
    }
}

// =============================================================================
// Strike Grid
// =============================================================================

/// Evenly spaced strikes around a reference price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrikeGrid {
    low: f64,
    high: f64,
    step: f64,
    points: usize,
}

impl StrikeGrid {
    /// Snap a grid around `reference_price`.
    ///
    /// # Errors
    ///
    /// Fails fast on a non-positive step, a negative width, non-finite
    /// inputs, a grid reaching below zero, or an oversized grid.
    pub fn around(reference_price: f64, range_width: f64, step: f64) -> Result<Self, StrikeGridError> {
        if !reference_price.is_finite() {
            return Err(StrikeGridError::NonFinite("reference_price"));
        }
        if !range_width.is_finite() {
            return Err(StrikeGridError::NonFinite("range_width"));
        }
        if !step.is_finite() {
            return Err(StrikeGridError::NonFinite("step"));
        }
        if step <= 0.0 {
            return Err(StrikeGridError::NonPositiveStep(step));
        }
        if range_width < 0.0 {
            return Err(StrikeGridError::NegativeRange(range_width));
        }

        let low = ((reference_price - range_width) / step).floor() * step;
        let high = ((reference_price + range_width) / step).ceil() * step;

        if low < 0.0 {
            return Err(StrikeGridError::NegativeStrike(low));
        }

        let intervals = ((high - low) / step).round();
        if !intervals.is_finite() || intervals >= MAX_GRID_INTERVALS {
            return Err(StrikeGridError::TooManyPoints(MAX_GRID_POINTS));
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let points = intervals as usize + 1;

        Ok(Self {
            low,
            high,
            step,
            points,
        })
    }

    /// Lowest strike.
    #[must_use]
    pub const fn low(&self) -> f64 {
        self.low
    }

    /// Highest strike.
    #[must_use]
    pub const fn high(&self) -> f64 {
        self.high
    }

    /// Strike spacing.
    #[must_use]
    pub const fn step(&self) -> f64 {
        self.step
    }

    /// Number of distinct strikes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.points
    }

    /// A grid always holds at least one strike.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Strikes from low to high.
    #[allow(clippy::cast_precision_loss)]
    pub fn strikes(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.points).map(move |i| self.low + i as f64 * self.step)
    }
}

// =============================================================================
// Symbol Generator
// =============================================================================

/// Builds option symbols for a strike grid.
#[derive(Debug, Clone)]
pub struct OptionSymbolGenerator {
    root: String,
}

impl OptionSymbolGenerator {
    /// Create a generator for an option root (e.g. `SPXW`).
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// Option root this generator encodes.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Generate the call/put symbols for every strike of the grid around
    /// `reference_price`.
    ///
    /// # Errors
    ///
    /// Returns [`StrikeGridError`] for degenerate inputs.
    pub fn generate(
        &self,
        reference_price: f64,
        range_width: f64,
        step: f64,
        expiry: NaiveDate,
    ) -> Result<Vec<String>, StrikeGridError> {
        let grid = StrikeGrid::around(reference_price, range_width, step)?;
        let mut symbols = Vec::with_capacity(grid.len() * 2);

        for strike in grid.strikes() {
            for right in [OptionRight::Call, OptionRight::Put] {
                symbols.push(self.symbol(expiry, right, strike));
            }
        }

        Ok(symbols)
    }

    /// Encode a single option symbol.
    #[must_use]
    pub fn symbol(&self, expiry: NaiveDate, right: OptionRight, strike: f64) -> String {
        format!(
            "{root:<width$}{date}{right}{milli:08}",
            root = self.root,
            width = ROOT_WIDTH,
            date = expiry.format("%y%m%d"),
            right = right.code(),
            milli = strike_millis(strike),
        )
    }
}

/// Strike in integer thousandths.
#[allow(clippy::cast_possible_truncation)]
fn strike_millis(strike: f64) -> i64 {
    (strike * 1000.0).round() as i64
}

// =============================================================================
// Tests
// =============================================================================
