//! Numeric coefficient contract
//!
//! The multiplication engine is generic over the coefficient ring. It asks
//! very little of it: additive-monoid operations in place, a closed product,
//! a fused multiply-accumulate, and construction from small literals. The
//! monomial is the hash key, so coefficients never need to be hashable.
//!
//! Arbitrary-precision integers and rationals come from the `num` stack
//! (`num-bigint` / `num-rational`); machine `i64` and `f64` are provided for
//! cheap experiments and mirror what the arbitrary-precision paths do.
//!
//! ## The fraction fast path
//!
//! For fraction types the multiplier rescales both operands to a common
//! denominator up front, multiplies integral values, and divides the result
//! once at the end. The hooks for that are part of this trait
//! ([`Coefficient::denominator`], [`Coefficient::scaled_to`],
//! [`Coefficient::unscale`]) with no-op defaults for integral types, so the
//! dispatch needs no specialisation: `HAS_DENOMINATOR` selects the path at
//! compile time.

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::ops::{AddAssign, SubAssign};

use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Zero};
use serde::{de::DeserializeOwned, Serialize};

/// Ring of coefficients a series can carry.
pub trait Coefficient:
    Clone
    + PartialEq
    + Debug
    + Send
    + Sync
    + Zero
    + One
    + for<'a> AddAssign<&'a Self>
    + for<'a> SubAssign<&'a Self>
    + Serialize
    + DeserializeOwned
    + 'static
{
    /// Whether values of this type carry a denominator (enables the common
    /// rescaling fast path of the multiplier).
    const HAS_DENOMINATOR: bool = false;

    /// Value of a small integer literal.
    fn from_i64(n: i64) -> Self;

    /// In-place negation.
    fn negate(&mut self);

    /// Closed product by reference.
    fn mul_ref(&self, rhs: &Self) -> Self;

    /// Fused `self += a · b`.
    #[inline]
    fn addmul(&mut self, a: &Self, b: &Self) {
        *self += &a.mul_ref(b);
    }

    /// Denominator of the value, for fraction types only.
    fn denominator(&self) -> Option<BigInt> {
        None
    }

    /// `(lcm / den) · num` as a value with denominator one. Identity for
    /// integral types.
    fn scaled_to(&self, _lcm: &BigInt) -> Self {
        self.clone()
    }

    /// Exact division by the rescaling factor at finalisation. No-op for
    /// integral types.
    fn unscale(&mut self, _lcm: &BigInt) {}
}

impl Coefficient for i64 {
    #[inline]
    fn from_i64(n: i64) -> Self {
        n
    }

    #[inline]
    fn negate(&mut self) {
        *self = self.wrapping_neg();
    }

    #[inline]
    fn mul_ref(&self, rhs: &Self) -> Self {
        self * rhs
    }
}

impl Coefficient for f64 {
    #[inline]
    fn from_i64(n: i64) -> Self {
        n as f64
    }

    #[inline]
    fn negate(&mut self) {
        *self = -*self;
    }

    #[inline]
    fn mul_ref(&self, rhs: &Self) -> Self {
        self * rhs
    }
}

impl Coefficient for BigInt {
    #[inline]
    fn from_i64(n: i64) -> Self {
        BigInt::from(n)
    }

    fn negate(&mut self) {
        *self = -std::mem::take(self);
    }

    #[inline]
    fn mul_ref(&self, rhs: &Self) -> Self {
        self * rhs
    }

    fn addmul(&mut self, a: &Self, b: &Self) {
        *self += a * b;
    }
}

impl Coefficient for BigRational {
    const HAS_DENOMINATOR: bool = true;

    fn from_i64(n: i64) -> Self {
        BigRational::from_integer(BigInt::from(n))
    }

    fn negate(&mut self) {
        *self = -self.clone();
    }

    #[inline]
    fn mul_ref(&self, rhs: &Self) -> Self {
        self * rhs
    }

    fn denominator(&self) -> Option<BigInt> {
        Some(self.denom().clone())
    }

    fn scaled_to(&self, lcm: &BigInt) -> Self {
        // `lcm` is a multiple of every operand denominator, the division is
        // exact.
        BigRational::new_raw(lcm / self.denom() * self.numer(), BigInt::one())
    }

    fn unscale(&mut self, lcm: &BigInt) {
        // Re-normalising constructor: reduces num/lcm to lowest terms.
        *self = BigRational::new(self.numer().clone(), lcm.clone());
    }
}

/// Least common multiple of all denominators in a coefficient sequence.
///
/// Returns `None` when the type carries no denominators or the sequence is
/// empty; a zero denominator (malformed input, e.g. a hand-crafted
/// deserialized value) yields `Some(Err-like zero)` that callers must check.
pub fn denominator_lcm<'a, C, I>(cfs: I) -> Option<BigInt>
where
    C: Coefficient + 'a,
    I: Iterator<Item = &'a C>,
{
    if !C::HAS_DENOMINATOR {
        return None;
    }
    let mut lcm = BigInt::one();
    let mut any = false;
    for cf in cfs {
        let den = cf.denominator()?;
        if den.is_zero() {
            return Some(BigInt::zero());
        }
        lcm = lcm.lcm(&den);
        any = true;
    }
    if any {
        Some(lcm)
    } else {
        None
    }
}
