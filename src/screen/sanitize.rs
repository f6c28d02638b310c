//! Raw-record sanitation.
//!
//! The feeds disagree on units and none of them can be trusted field by
//! field, so this is the single place malformed market data gets absorbed.
//! `sanitize` is a pure function and never fails: whatever arrives, the
//! output snapshot is physically consistent and every number is finite.

use tracing::debug;

use crate::types::{RawRecord, SanitizedSnapshot};

// ---------------------------------------------------------------------------
// Unit profiles
// ---------------------------------------------------------------------------

/// Volume unit a source usually reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VolumeUnit {
    /// Raw share count
    Shares,
    /// Lots of 100 shares
    Lots,
}

impl VolumeUnit {
    fn flipped(self) -> Self {
        match self {
            VolumeUnit::Shares => VolumeUnit::Lots,
            VolumeUnit::Lots => VolumeUnit::Shares,
        }
    }

    fn to_shares(self, volume: f64) -> f64 {
        match self {
            VolumeUnit::Shares => volume,
            VolumeUnit::Lots => volume * LOT_SIZE,
        }
    }
}

/// Most common unit pairing for a source: the volume unit it reports and the
/// multiplier that converts its amount field to yuan. A hint, not a
/// guarantee; the turnover inference below corrects mismatches.
#[derive(Debug, Clone, Copy)]
struct SourceProfile {
    volume_unit: VolumeUnit,
    amount_to_yuan: f64,
}

fn profile_for(source: &str) -> SourceProfile {
    match source {
        "sina" => SourceProfile {
            volume_unit: VolumeUnit::Shares,
            amount_to_yuan: 1.0,
        },
        "tencent" => SourceProfile {
            volume_unit: VolumeUnit::Lots,
            amount_to_yuan: 10_000.0,
        },
        "tushare" => SourceProfile {
            volume_unit: VolumeUnit::Lots,
            amount_to_yuan: 1_000.0,
        },
        _ => SourceProfile {
            volume_unit: VolumeUnit::Shares,
            amount_to_yuan: 1.0,
        },
    }
}

// ---------------------------------------------------------------------------
// Empirical breakpoints
// ---------------------------------------------------------------------------

/// Shares per lot on A-share exchanges.
const LOT_SIZE: f64 = 100.0;

/// A turnover rate cannot exceed 100% of float; a candidate above this means
/// the float share count was reported in ten-thousands.
const TURNOVER_OVERFLOW_LIMIT: f64 = 100.0;

/// Divisor applied when the candidate overflows the limit.
const SHARE_COUNT_WAN_DIVISOR: f64 = 10_000.0;

/// Below this rate the volume-unit hint is suspect and the alternate pairing
/// is tried.
const TURNOVER_SUSPECT_FLOOR: f64 = 0.5;

/// The re-guessed rate is accepted only at or above this floor.
const TURNOVER_ACCEPT_FLOOR: f64 = 0.1;

/// Upper clamp for the volume ratio; anything past it is feed garbage.
const VOLUME_RATIO_LIMIT: f64 = 100.0;

// The four breakpoints above are calibrated against observed feed behavior,
// not first principles. Known residual error: a genuinely quiet instrument
// from a shares-reporting source lands under the suspect floor, gets
// re-guessed into the lots pairing, and comes out a hundredfold too high.
// Do not retune without fresh calibration data.

// ---------------------------------------------------------------------------
// Field scrubbing
// ---------------------------------------------------------------------------

/// Additive quantities: present, finite, and strictly positive, else 0.
fn positive_or_zero(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => 0.0,
    }
}

/// OHLC fields fall back to the given price when unusable.
fn positive_or(value: Option<f64>, fallback: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => fallback,
    }
}

// ---------------------------------------------------------------------------
// Turnover inference
// ---------------------------------------------------------------------------

/// Rate under one unit pairing, with the over-limit float correction applied.
fn candidate_rate(volume: f64, float_shares: f64, unit: VolumeUnit) -> f64 {
    let mut rate = unit.to_shares(volume) / float_shares * 100.0;
    if rate > TURNOVER_OVERFLOW_LIMIT {
        rate /= SHARE_COUNT_WAN_DIVISOR;
    }
    rate
}

/// Best-effort turnover rate in percent, clamped to [0, 100].
///
/// Two-stage: compute under the profile hint with the overflow correction,
/// then, if the result is suspiciously low, recompute under the flipped
/// volume pairing and keep that answer only when it lands in a plausible
/// band. Inputs must already be scrubbed (finite, non-negative).
fn infer_turnover_rate(volume: f64, float_shares: f64, hint: VolumeUnit) -> f64 {
    if volume <= 0.0 || float_shares <= 0.0 {
        return 0.0;
    }

    let first = candidate_rate(volume, float_shares, hint);
    let rate = if first < TURNOVER_SUSPECT_FLOOR {
        let retry = candidate_rate(volume, float_shares, hint.flipped());
        if (TURNOVER_ACCEPT_FLOOR..=TURNOVER_OVERFLOW_LIMIT).contains(&retry) {
            retry
        } else {
            first
        }
    } else {
        first
    };

    rate.clamp(0.0, TURNOVER_OVERFLOW_LIMIT)
}

// ---------------------------------------------------------------------------
// Sanitation
// ---------------------------------------------------------------------------

/// Produce a physically consistent snapshot from whatever the feed sent.
///
/// Missing, NaN, infinite, and negative inputs are absorbed field by field:
/// additive quantities fall back to 0, open/high/low fall back to the
/// session price. Amount is normalized to yuan via the source profile.
/// The snapshot's `is_valid` flag is the only signal that data was too
/// damaged to screen.
pub fn sanitize(record: &RawRecord) -> SanitizedSnapshot {
    let profile = profile_for(&record.source);

    let price = positive_or_zero(record.price);
    let pre_close = positive_or_zero(record.pre_close);
    let open = positive_or(record.open, price);
    let high = positive_or(record.high, price);
    let low = positive_or(record.low, price);

    let volume = positive_or_zero(record.volume);
    let float_shares = positive_or_zero(record.float_shares);
    let avg_volume = positive_or_zero(record.avg_volume_5d);

    // Scrubbed after conversion: the unit multiplier can push a finite
    // feed value over f64 range.
    let amount = positive_or_zero(record.amount.map(|a| a * profile.amount_to_yuan));

    let turnover_rate = infer_turnover_rate(volume, float_shares, profile.volume_unit);

    // Current and average volume share the source's unit, so the ratio
    // needs no conversion.
    let volume_ratio = if avg_volume > 0.0 {
        (volume / avg_volume).clamp(0.0, VOLUME_RATIO_LIMIT)
    } else {
        0.0
    };

    let change_percent = if pre_close > 0.0 {
        (price - pre_close) / pre_close * 100.0
    } else {
        0.0
    };

    let is_valid = price > 0.0 && pre_close > 0.0 && turnover_rate > 0.0 && volume_ratio > 0.0;
    if !is_valid {
        debug!(
            instrument = %record.instrument,
            source = %record.source,
            price,
            turnover_rate,
            volume_ratio,
            "Snapshot failed validity check"
        );
    }

    SanitizedSnapshot {
        instrument: record.instrument.clone(),
        price,
        pre_close,
        open,
        high,
        low,
        amount,
        turnover_rate,
        volume_ratio,
        change_percent,
        is_valid,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
