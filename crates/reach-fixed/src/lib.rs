//! Fixed-point numeric types for deterministic cross-platform arithmetic.
//!
//! All engine-facing numeric state (money, rates, durations, throughput)
//! passes through these types instead of `f32`/`f64`. Operations never
//! panic on overflow: they saturate at the type's boundary and the caller
//! is expected to track saturation via [`SaturationFlags`].
//!
//! Floating-point conversions exist only at ingress (`from_f64`-style
//! constructors) and explicitly reject NaN/Infinity. Nothing downstream of
//! construction performs a float operation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Q32.32 fixed point (signed 64-bit, scale 2^32).
///
/// Used for monetary and unitless values requiring sub-cent precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedQ32_32(i64);

impl FixedQ32_32 {
    const FRACTIONAL_BITS: u32 = 32;
    const SCALE_F64: f64 = (1u64 << 32) as f64;

    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1i64 << 32);

    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn to_raw(self) -> i64 {
        self.0
    }

    /// Construct from a decimal value. Rejects NaN/Infinity and values that
    /// would not fit the `i64` backing store once scaled.
    #[must_use]
    pub fn from_f64(value: f64) -> Option<Self> {
        if value.is_nan() || value.is_infinite() {
            return None;
        }
        let scaled = value * Self::SCALE_F64;
        if scaled > i64::MAX as f64 || scaled < i64::MIN as f64 {
            return None;
        }
        Some(Self(scaled as i64))
    }

    /// Debug/display-only conversion; never used on the digest path.
    #[must_use]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE_F64
    }

    #[must_use]
    pub const fn from_i64(value: i64) -> Option<Self> {
        if value > (i64::MAX >> Self::FRACTIONAL_BITS) || value < (i64::MIN >> Self::FRACTIONAL_BITS) {
            return None;
        }
        Some(Self(value << Self::FRACTIONAL_BITS))
    }

    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    #[must_use]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    #[must_use]
    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        let a = i128::from(self.0);
        let b = i128::from(rhs.0);
        let product = (a * b) >> Self::FRACTIONAL_BITS;
        if product > i128::from(i64::MAX) || product < i128::from(i64::MIN) {
            return None;
        }
        Some(Self(product as i64))
    }

    #[must_use]
    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        if rhs.0 == 0 {
            return None;
        }
        let a = i128::from(self.0) << Self::FRACTIONAL_BITS;
        let b = i128::from(rhs.0);
        let quotient = a / b;
        if quotient > i128::from(i64::MAX) || quotient < i128::from(i64::MIN) {
            return None;
        }
        Some(Self(quotient as i64))
    }

    #[must_use]
    pub fn saturating_add(self, rhs: Self) -> (Self, bool) {
        match self.checked_add(rhs) {
            Some(v) => (v, false),
            None => (if rhs.0 > 0 { Self(i64::MAX) } else { Self(i64::MIN) }, true),
        }
    }

    #[must_use]
    pub fn saturating_mul(self, rhs: Self) -> (Self, bool) {
        match self.checked_mul(rhs) {
            Some(v) => (v, false),
            None => {
                let sign = (self.0 < 0) ^ (rhs.0 < 0);
                (if sign { Self(i64::MIN) } else { Self(i64::MAX) }, true)
            }
        }
    }
}

impl fmt::Display for FixedQ32_32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.10}", self.to_f64())
    }
}

/// Basis points (unsigned 16-bit). `10000` represents 100%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedBps(u16);

impl FixedBps {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1);
    pub const PERCENT: Self = Self(100);
    pub const ONE_HUNDRED_PERCENT: Self = Self(10_000);

    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn to_raw(self) -> u16 {
        self.0
    }

    #[must_use]
    pub fn from_percent(percent: f64) -> Option<Self> {
        if percent.is_nan() || percent.is_infinite() || percent < 0.0 {
            return None;
        }
        let bps = (percent * 100.0).round();
        if bps > f64::from(u16::MAX) {
            return None;
        }
        Some(Self(bps as u16))
    }

    #[must_use]
    pub fn to_percent(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    #[must_use]
    pub fn saturating_add(self, rhs: Self) -> (Self, bool) {
        match self.checked_add(rhs) {
            Some(v) => (v, false),
            None => (Self(u16::MAX), true),
        }
    }
}

impl fmt::Display for FixedBps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bps ({:.2}%)", self.0, self.to_percent())
    }
}

/// Parts-per-million (unsigned 32-bit). `1_000_000` represents 100%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedPpm(u32);

impl FixedPpm {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1);
    pub const PERCENT: Self = Self(10_000);
    pub const ONE_HUNDRED_PERCENT: Self = Self(1_000_000);

    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn from_ratio(ratio: f64) -> Option<Self> {
        if !(0.0..=1.0).contains(&ratio) {
            return None;
        }
        let ppm = (ratio * 1_000_000.0).round();
        if ppm > f64::from(u32::MAX) {
            return None;
        }
        Some(Self(ppm as u32))
    }

    #[must_use]
    pub fn to_ratio(self) -> f64 {
        f64::from(self.0) / 1_000_000.0
    }

    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    #[must_use]
    pub fn saturating_add(self, rhs: Self) -> (Self, bool) {
        match self.checked_add(rhs) {
            Some(v) => (v, false),
            None => (Self(u32::MAX), true),
        }
    }
}

impl fmt::Display for FixedPpm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ppm ({:.4}%)", self.0, self.to_ratio() * 100.0)
    }
}

/// Duration in microseconds (unsigned 64-bit). Always elapsed-since-start;
/// the core never produces negative durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedDuration(u64);

impl FixedDuration {
    pub const ZERO: Self = Self(0);
    pub const ONE_MICROSECOND: Self = Self(1);
    pub const ONE_MILLISECOND: Self = Self(1_000);
    pub const ONE_SECOND: Self = Self(1_000_000);
    pub const ONE_MINUTE: Self = Self(60_000_000);

    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    #[must_use]
    pub const fn from_millis(millis: u64) -> Option<Self> {
        match millis.checked_mul(1_000) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[must_use]
    pub const fn from_seconds(seconds: u64) -> Option<Self> {
        match seconds.checked_mul(1_000_000) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[must_use]
    pub const fn to_micros(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn to_millis(self) -> u64 {
        self.0 / 1_000
    }

    #[must_use]
    pub const fn to_seconds(self) -> u64 {
        self.0 / 1_000_000
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    #[must_use]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    #[must_use]
    pub fn saturating_add(self, rhs: Self) -> (Self, bool) {
        match self.checked_add(rhs) {
            Some(v) => (v, false),
            None => (Self(u64::MAX), true),
        }
    }

    /// Saturates to zero on underflow rather than wrapping.
    #[must_use]
    pub fn saturating_sub(self, rhs: Self) -> (Self, bool) {
        match self.checked_sub(rhs) {
            Some(v) => (v, false),
            None => (Self::ZERO, true),
        }
    }
}

impl fmt::Display for FixedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000 {
            write!(f, "{}.{:06}s", self.0 / 1_000_000, self.0 % 1_000_000)
        } else if self.0 >= 1_000 {
            write!(f, "{}.{:03}ms", self.0 / 1_000, self.0 % 1_000)
        } else {
            write!(f, "{}µs", self.0)
        }
    }
}

/// Throughput in micro-operations per second (unsigned 64-bit).
/// `1_000_000` represents 1 op/sec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedThroughput(u64);

impl FixedThroughput {
    const SCALE: f64 = 1_000_000.0;

    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_micro_ops_per_sec(micro_ops: u64) -> Self {
        Self(micro_ops)
    }

    #[must_use]
    pub fn from_ops_per_sec(ops: f64) -> Option<Self> {
        if ops.is_nan() || ops.is_infinite() || ops < 0.0 {
            return None;
        }
        let micro_ops = (ops * Self::SCALE).round();
        if micro_ops > u64::MAX as f64 {
            return None;
        }
        Some(Self(micro_ops as u64))
    }

    #[must_use]
    pub fn to_ops_per_sec(self) -> f64 {
        self.0 as f64 / Self::SCALE
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    #[must_use]
    pub fn saturating_add(self, rhs: Self) -> (Self, bool) {
        match self.checked_add(rhs) {
            Some(v) => (v, false),
            None => (Self(u64::MAX), true),
        }
    }
}

impl fmt::Display for FixedThroughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} ops/sec", self.to_ops_per_sec())
    }
}

/// Sticky saturation tracker. Any fixed-point operation that saturates
/// instead of producing its exact result sets the corresponding bit here;
/// the containing metrics struct carries one instance for the life of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaturationFlags(u8);

impl SaturationFlags {
    pub const NONE: Self = Self(0);
    pub const Q32_32: Self = Self(1 << 0);
    pub const BPS: Self = Self(1 << 1);
    pub const PPM: Self = Self(1 << 2);
    pub const DURATION: Self = Self(1 << 3);
    pub const THROUGHPUT: Self = Self(1 << 4);

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}
