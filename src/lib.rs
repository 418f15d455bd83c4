//! Crate root: public surface, core aliases, and engine-wide invariants
//!
//! This crate is a multiplication engine for large, sparse multivariate
//! polynomials (and series-like structures built from the same parts):
//! ordered symbol sets, Kronecker-packed or plain exponent-vector monomials,
//! open-addressed term tables, and a statistically-sized, cache-blocked,
//! thread-parallel multiplier.
//!
//! ## Invariants (engine-wide)
//!
//! - **Symbol discipline.** Every term of a series is compatible with the
//!   series' symbol set; the positional meaning of exponents is fixed by the
//!   set's order. Binary operations reconcile differing sets by lifting both
//!   operands through the ordered merge before any arithmetic happens.
//!
//! - **Term discipline.** No stored term has a zero coefficient and no two
//!   stored terms share a monomial. Operations that can cancel terms drop
//!   them rather than keep zeros.
//!
//! - **Determinism.** Table iteration, the size estimator's sampling (fixed
//!   PRNG seed) and the parallel merge order are all deterministic, so a
//!   product computed with `P` threads is equal, term for term and
//!   coefficient for coefficient, to the single-threaded product.
//!
//! - **No partial results.** Every fallible operation either returns the
//!   complete result or an error; a failed multiplication leaves the
//!   operands untouched and exposes no intermediate state. We **forbid
//!   unsafe** throughout the crate.
//!
//! ## Quick tour
//!
//! ```
//! use sparse_poly::IntPoly;
//!
//! let x = IntPoly::from_symbol("x").unwrap();
//! let y = IntPoly::from_symbol("y").unwrap();
//! let f = (&(&x + &y) + 1).try_pow(3).unwrap();
//! let g = f.try_mul(&f).unwrap();
//! assert_eq!(g.len(), 28); // every monomial of total degree ≤ 6
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Ordered symbol sets and their merge maps.
pub mod symbols;
/// Kronecker codec (packed-exponent encoding, per-arity limits table).
pub mod kronecker;
/// Monomial keys: the packed and unpacked variants behind one contract.
pub mod monomial;
/// Term store: open-addressed table with exposed probing primitives.
pub mod table;
/// Numeric coefficient contract and the `num`-backed implementations.
pub mod coeff;
/// Series container and additive arithmetic.
pub mod series;
/// Blocked multiplier: estimator, kernel, parallel accumulation.
pub mod multiplier;
/// Polynomial aliases and the auto-truncation policy.
pub mod polynomial;
/// Process-wide performance tuning (block size, threads, memory init).
pub mod tuning;
/// Portable and binary persistence of series.
pub mod s11n;

// ============================================================================
// Canonical aliases and root-level re-exports (centralization)
// ============================================================================

pub use crate::coeff::Coefficient;
pub use crate::kronecker::KeyError;
pub use crate::monomial::{MonomialKey, PackedMonomial, VecMonomial};
pub use crate::multiplier::{MultiplyError, SeriesMultiplier};
pub use crate::polynomial::{
    get_auto_truncate_degree, set_auto_truncate_degree, set_auto_truncate_partial_degree,
    truncated_mul, unset_auto_truncate_degree, IntPoly, Polynomial, RatPoly, TruncationPolicy,
};
pub use crate::s11n::SerError;
pub use crate::series::{Series, SeriesError};
pub use crate::symbols::{MergeSide, SymbolError, SymbolMerge, SymbolSet};
pub use crate::table::{TableError, Term, TermTable};
pub use crate::tuning::TuningError;
