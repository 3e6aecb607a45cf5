//! Q16.16 and Q8.24 fixed-point scalar newtypes (spec §3, §4.1).
//!
//! Both formats share a 32-bit signed carrier; they differ only in where the
//! binary point sits. Conversion between them is a signed shift of 8 bits
//! with round-to-nearest-even on narrowing (spec §4.1).

use crate::dvm;
use crate::fault::FaultFlags;

/// One whole unit in Q16.16 (`1 << 16`).
pub const ONE_Q16: i32 = 1 << 16;
/// One half in Q16.16, used as the canonical RNE halfway constant at this scale.
pub const HALF_Q16: i32 = 1 << 15;
/// One whole unit in Q8.24 (`1 << 24`).
pub const ONE_Q24: i32 = 1 << 24;

/// Number of fractional bits separating the two formats.
const SHIFT: u32 = 8;

/// A Q16.16 signed fixed-point scalar: 16 integer bits, 16 fractional bits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Q16_16(pub i32);

/// A Q8.24 signed fixed-point scalar: 8 integer bits, 24 fractional bits.
///
/// Used where gradients need finer resolution near zero than Q16.16's 16
/// fractional bits provide, at the cost of a narrower integer range (±128).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Q8_24(pub i32);

impl Q16_16 {
    pub const ONE: Self = Self(ONE_Q16);
    pub const ZERO: Self = Self(0);

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Widen to Q8.24 by shifting left 8 bits. This can exceed the Q8.24
    /// integer range (±128) even though the spec describes widening as
    /// infallible in the general shift sense; we route through `clamp32` as
    /// a defensive backstop and surface it via `faults` rather than
    /// silently wrapping.
    pub fn widen_to_q8_24(self, faults: &mut FaultFlags) -> Q8_24 {
        Q8_24(dvm::clamp32((self.0 as i64) << SHIFT, faults))
    }

    pub fn add(self, other: Self, faults: &mut FaultFlags) -> Self {
        Self(dvm::add(self.0, other.0, faults))
    }

    pub fn sub(self, other: Self, faults: &mut FaultFlags) -> Self {
        Self(dvm::sub(self.0, other.0, faults))
    }

    pub fn mul(self, other: Self, faults: &mut FaultFlags) -> Self {
        Self(dvm::mul(self.0, other.0, faults))
    }

    pub fn div(self, other: Self, faults: &mut FaultFlags) -> Self {
        Self(dvm::div_q(self.0, other.0, 16, faults))
    }
}

impl Q8_24 {
    pub const ONE: Self = Self(ONE_Q24);
    pub const ZERO: Self = Self(0);

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Narrow to Q16.16 by an arithmetic right shift of 8 bits with
    /// round-to-nearest-even, saturating on overflow/underflow.
    pub fn narrow_to_q16_16(self, faults: &mut FaultFlags) -> Q16_16 {
        Q16_16(dvm::round_shift_rne(self.0 as i64, SHIFT, faults))
    }

    pub fn add(self, other: Self, faults: &mut FaultFlags) -> Self {
        Self(dvm::add(self.0, other.0, faults))
    }

    pub fn sub(self, other: Self, faults: &mut FaultFlags) -> Self {
        Self(dvm::sub(self.0, other.0, faults))
    }

    pub fn mul(self, other: Self, faults: &mut FaultFlags) -> Self {
        Self(dvm::round_shift_rne(self.0 as i64 * other.0 as i64, 24, faults))
    }

    pub fn div(self, other: Self, faults: &mut FaultFlags) -> Self {
        Self(dvm::div_q(self.0, other.0, 24, faults))
    }
}

impl From<Q16_16> for i32 {
    fn from(value: Q16_16) -> Self {
        value.0
    }
}

impl From<Q8_24> for i32 {
    fn from(value: Q8_24) -> Self {
        value.0
    }
}
