//! Polynomial surface: aliases, truncation policy, end-to-end scenarios
//!
//! A polynomial here is simply a [`Series`] whose keys are monomials; this
//! module adds the pieces that make the series engine usable as a polynomial
//! library:
//!
//! - the public aliases ([`IntPoly`], [`RatPoly`]) with arbitrary-precision
//!   coefficients over packed keys, which is the configuration the large
//!   published benchmarks run on;
//! - the process-wide **auto-truncation policy**: an optional total- or
//!   partial-degree bound every subsequent multiplication honours through
//!   the multiplier's skip hook, plus [`truncated_mul`] for a one-shot bound
//!   that leaves the process-wide setting alone.
//!
//! Setting a truncation policy never affects addition or subtraction, only
//! products (and powers, which are repeated products).

#![forbid(unsafe_code)]

use std::sync::RwLock;

use num_bigint::BigInt;
use num_rational::BigRational;
use once_cell::sync::Lazy;

use crate::coeff::Coefficient;
use crate::monomial::{MonomialKey, PackedMonomial};
use crate::multiplier::{MultiplyError, SeriesMultiplier};
use crate::series::{Series, SeriesError};

/// A polynomial is a series over monomial keys.
pub type Polynomial<C, K> = Series<C, K>;

/// Arbitrary-precision integer polynomial over packed keys.
pub type IntPoly = Polynomial<BigInt, PackedMonomial>;

/// Arbitrary-precision rational polynomial over packed keys.
pub type RatPoly = Polynomial<BigRational, PackedMonomial>;

/// Degree bound applied by multiplication when auto-truncation is active.
///
/// With `symbols: None` the bound applies to the total degree; otherwise only
/// the named symbols contribute (names a series does not carry contribute
/// nothing).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TruncationPolicy {
    /// Largest degree kept in any product term.
    pub degree: i128,
    /// Optional restriction to a named subset of symbols.
    pub symbols: Option<Vec<String>>,
}

static AUTO_TRUNCATION: Lazy<RwLock<Option<TruncationPolicy>>> = Lazy::new(|| RwLock::new(None));

/// Bound every subsequent product to total degree `degree`.
pub fn set_auto_truncate_degree(degree: i128) {
    *AUTO_TRUNCATION.write().expect("truncation lock") =
        Some(TruncationPolicy { degree, symbols: None });
}

/// Bound every subsequent product to degree `degree` in the named symbols.
pub fn set_auto_truncate_partial_degree(degree: i128, symbols: Vec<String>) {
    *AUTO_TRUNCATION.write().expect("truncation lock") =
        Some(TruncationPolicy { degree, symbols: Some(symbols) });
}

/// Clear the process-wide truncation policy.
pub fn unset_auto_truncate_degree() {
    *AUTO_TRUNCATION.write().expect("truncation lock") = None;
}

/// Current process-wide truncation policy, if any.
pub fn get_auto_truncate_degree() -> Option<TruncationPolicy> {
    AUTO_TRUNCATION.read().expect("truncation lock").clone()
}

/// Policy consulted by the multiplier at preparation time.
pub(crate) fn active_truncation() -> Option<TruncationPolicy> {
    get_auto_truncate_degree()
}

/// One-shot truncated product under an explicit policy; the process-wide
/// setting is not consulted and not modified.
pub fn truncated_mul<C: Coefficient, K: MonomialKey>(
    a: &Series<C, K>,
    b: &Series<C, K>,
    policy: TruncationPolicy,
) -> Result<Series<C, K>, MultiplyError> {
    let (a, b) = Series::aligned(a, b).map_err(|e| match e {
        SeriesError::Key(k) => MultiplyError::Key(k),
        SeriesError::Table(t) => MultiplyError::Table(t),
    })?;
    SeriesMultiplier::truncated(a.as_ref(), b.as_ref(), policy)?.execute()
}
