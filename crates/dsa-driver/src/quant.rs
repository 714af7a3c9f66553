//! Fixed-point requantization.
//!
//! Converts a 32-bit accumulator back to int8 with a multiplier and a shift:
//!
//! ```text
//! product = i64(acc) * i64(mult)                 // |product| <= 2^62
//! scaled  = round_shift(product, shift, rounding)
//! out     = clamp(scaled, -128, 127)
//! ```
//!
//! The rounding rule and whether `shift` may be negative are not fixed by
//! the accelerator's interface, so both are carried in [`RequantPolicy`].
//! The default (`HalfUp`, `RightOnly`) is the rule the accelerator's
//! reference test generator uses: `(p + (1 << (s - 1))) >> s` with an
//! arithmetic shift and no shift for `s == 0`.

use crate::error::{DsaError, Result};
use serde::{Deserialize, Serialize};

/// Largest shift magnitude accepted in either direction.
pub const MAX_SHIFT: i32 = 31;

/// Tie-breaking rule for the rounding right shift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Add `2^(s-1)` then arithmetic shift: ties go toward +∞.
    #[default]
    HalfUp,
    /// Ties go away from zero; symmetric for negative products.
    HalfAwayFromZero,
    /// Plain arithmetic shift (truncation toward −∞).
    Floor,
}

/// Meaning of the sign of `dst_shift`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftConvention {
    /// `dst_shift` is a right shift in `0..=31`; negative values are rejected.
    #[default]
    RightOnly,
    /// Positive = right shift, negative = left shift, range `-31..=31`.
    Signed,
}

/// Rounding rule plus shift convention for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequantPolicy {
    /// Tie-breaking rule for right shifts.
    #[serde(default)]
    pub rounding: Rounding,
    /// Sign convention of the shift.
    #[serde(default)]
    pub shift: ShiftConvention,
}

impl RequantPolicy {
    /// Policy with the given rounding and the default shift convention.
    pub const fn with_rounding(rounding: Rounding) -> Self {
        Self {
            rounding,
            shift: ShiftConvention::RightOnly,
        }
    }

    /// Range of shifts this policy accepts.
    pub const fn shift_range(&self) -> std::ops::RangeInclusive<i32> {
        match self.shift {
            ShiftConvention::RightOnly => 0..=MAX_SHIFT,
            ShiftConvention::Signed => -MAX_SHIFT..=MAX_SHIFT,
        }
    }

    /// Reject a shift outside [`Self::shift_range`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantization` naming the shift and the legal range.
    pub fn check_shift(&self, shift: i32) -> Result<()> {
        let range = self.shift_range();
        if range.contains(&shift) {
            Ok(())
        } else {
            Err(DsaError::invalid_quantization(format!(
                "shift {shift} outside {}..={} ({:?})",
                range.start(),
                range.end(),
                self.shift
            )))
        }
    }
}

/// Scale one accumulator without the final saturation.
///
/// The engine adds the output zero point and applies the activation clamp to
/// this value. `shift` must already have passed [`RequantPolicy::check_shift`];
/// out-of-range shifts are clamped to ±31 rather than panicking.
pub fn scale(acc: i32, mult: i32, shift: i32, policy: RequantPolicy) -> i64 {
    let product = i64::from(acc) * i64::from(mult);
    let shift = shift.clamp(-MAX_SHIFT, MAX_SHIFT);
    match shift {
        0 => product,
        s if s > 0 => round_shift(product, s.unsigned_abs(), policy.rounding),
        s => product.saturating_mul(1_i64 << s.unsigned_abs()),
    }
}

/// Requantize one accumulator to int8.
///
/// Pure; same inputs always give the same output. Values beyond the int8
/// range clamp to -128 / 127, never wrap.
pub fn requantize(acc: i32, mult: i32, shift: i32, policy: RequantPolicy) -> i8 {
    saturate_i8(scale(acc, mult, shift, policy))
}

/// Clamp into the int8 range.
#[allow(clippy::cast_possible_truncation)]
pub fn saturate_i8(value: i64) -> i8 {
    value.clamp(i64::from(i8::MIN), i64::from(i8::MAX)) as i8
}

/// Clamp a wide accumulator into the accelerator's 32-bit accumulator.
#[allow(clippy::cast_possible_truncation)]
pub fn saturate_acc(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

// 1 <= s <= 31 and |p| <= 2^62, so `p ± 2^(s-1)` cannot overflow.
fn round_shift(p: i64, s: u32, rounding: Rounding) -> i64 {
    let half = 1_i64 << (s - 1);
    match rounding {
        Rounding::HalfUp => (p + half) >> s,
        Rounding::HalfAwayFromZero => {
            if p >= 0 {
                (p + half) >> s
            } else {
                -((-p + half) >> s)
            }
        }
        Rounding::Floor => p >> s,
    }
}

/// Pick `(mult, shift)` so that `max_abs * mult / 2^shift` lands as close
/// to 127 as possible without exceeding it.
///
/// Searches shifts `0..=31` for the largest multiplier; multipliers that do
/// not fit in `i32` are skipped. `max_abs == 0` yields the identity `(1, 0)`.
pub fn derive_requant_params(max_abs: i64) -> (i32, i32) {
    let max_abs = max_abs.unsigned_abs();
    if max_abs == 0 {
        return (1, 0);
    }

    let mut best = (1_i32, 0_i32);
    for s in 0..=MAX_SHIFT {
        let mult = (127_u64 << s) / max_abs;
        let Ok(mult) = i32::try_from(mult) else {
            continue;
        };
        if mult > best.0 {
            best = (mult, s);
        }
    }
    best
}
