//! Kronecker codec: packed-exponent encoding for monomials
//!
//! The codec is a bijection between bounded exponent vectors and a contiguous
//! range of `i64`. A vector `(e_0, …, e_{n−1})` with every component inside
//! the per-arity box `[L, U]` maps to the single code
//!
//! ```text
//! c = Σ_i (e_i − L) · 2^{i·b} + h_min
//! ```
//!
//! where `b` is the arity-dependent bit width, `L = −2^{b−1}`,
//! `U = 2^{b−1} − 1` and `h_min` is the code of the all-`L` vector. With this
//! layout the product of two monomials is plain integer addition of their
//! codes, which is what makes the packed representation the fast path of the
//! whole multiplication engine.
//!
//! ## Limits table
//!
//! For every arity `n` the widest usable bit width is found once, at first
//! use, by growing `b` until `h_min`, `h_max` or their difference stops being
//! representable in `i64`. The resulting tuples `(b, L, U, h_min, h_max)` are
//! published through [`limits`] and shared by all threads (the table is
//! initialised behind a `Lazy`). Arity 0 is represented by the code `0`.
//!
//! ## Contract
//!
//! - `decode(encode(v), v.len()) == v` for every vector inside the box;
//! - encoding rejects vectors with out-of-box components or arity beyond
//!   [`max_arity`];
//! - decoding rejects codes outside `[h_min, h_max]` for the stated arity.

#![forbid(unsafe_code)]

use num_bigint::BigInt;
use num_traits::{One, Pow, ToPrimitive};
use once_cell::sync::Lazy;

/// Signed machine integer used as the packed code.
pub type Code = i64;

/// Bit budget of the code type (sign bit excluded).
const NBITS: u32 = Code::BITS - 1;

/// Errors surfaced by the codec and by monomial key operations built on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// The arity exceeds what the code type can host.
    #[error("arity {0} exceeds the maximum packable arity")]
    ExcessiveArity(usize),
    /// A component of the vector to be encoded is outside the per-arity box.
    #[error("exponent {value} at position {pos} is outside [{lower}, {upper}]")]
    ComponentOutOfBounds {
        /// Offending exponent.
        value: i64,
        /// Position of the offending exponent.
        pos: usize,
        /// Per-arity lower bound.
        lower: i64,
        /// Per-arity upper bound.
        upper: i64,
    },
    /// The code to be decoded is outside `[h_min, h_max]` for the arity.
    #[error("code {0} is out of range for arity {1}")]
    CodeOutOfBounds(Code, usize),
    /// A monomial product left the supported exponent range.
    #[error("monomial multiplication overflows the supported exponent range")]
    Overflow,
    /// A key was used with a symbol set it is not compatible with.
    #[error("monomial of arity {key} is incompatible with a symbol set of size {set}")]
    Incompatible {
        /// Arity carried by the key.
        key: usize,
        /// Size of the symbol set.
        set: usize,
    },
}

/// Published per-arity bounds of the codec.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ArityLimits {
    /// Bit width `b` allotted to each component.
    pub bits: u32,
    /// Per-component lower bound `L = −2^{b−1}`.
    pub lower: i64,
    /// Per-component upper bound `U = 2^{b−1} − 1`.
    pub upper: i64,
    /// Smallest representable code.
    pub h_min: i64,
    /// Largest representable code.
    pub h_max: i64,
    /// `h_max − h_min`.
    pub span: i64,
}

/// `(2^{b·m} − 1) / (2^b − 1)`, the repunit factor of both range bounds.
fn repunit(bits: u32, arity: u32) -> BigInt {
    let radix = Pow::pow(&BigInt::from(2), bits);
    (Pow::pow(&radix, arity) - BigInt::one()) / (radix - BigInt::one())
}

/// `h_min(b, m)` over arbitrary-precision integers.
fn h_min_big(bits: u32, arity: u32) -> BigInt {
    repunit(bits, arity) * -Pow::pow(&BigInt::from(2), bits - 1)
}

/// `h_max(b, m)` over arbitrary-precision integers.
fn h_max_big(bits: u32, arity: u32) -> BigInt {
    repunit(bits, arity) * (Pow::pow(&BigInt::from(2), bits - 1) - BigInt::one())
}

/// Widest usable limits for `arity`-component vectors, or `None` when not
/// even one bit per component is representable.
fn determine_limits(arity: u32) -> Option<ArityLimits> {
    let mut best: Option<ArityLimits> = None;
    for bits in 1..=NBITS {
        let h_min = h_min_big(bits, arity);
        let h_max = h_max_big(bits, arity);
        let span = &h_max - &h_min;
        match (h_min.to_i64(), h_max.to_i64(), span.to_i64()) {
            (Some(h_min), Some(h_max), Some(span)) => {
                best = Some(ArityLimits {
                    bits,
                    lower: -(1i64 << (bits - 1)),
                    upper: (1i64 << (bits - 1)) - 1,
                    h_min,
                    h_max,
                    span,
                });
            }
            _ => break,
        }
    }
    best
}

/// One entry per arity, index 0 being the empty vector.
static LIMITS: Lazy<Vec<ArityLimits>> = Lazy::new(|| {
    let mut table = vec![ArityLimits { bits: 0, lower: 0, upper: 0, h_min: 0, h_max: 0, span: 0 }];
    for arity in 1..NBITS {
        match determine_limits(arity) {
            Some(l) => table.push(l),
            None => break,
        }
    }
    table
});

/// Largest arity the codec supports.
#[inline]
pub fn max_arity() -> usize {
    LIMITS.len() - 1
}

/// Published limits for `arity`, or an error past [`max_arity`].
#[inline]
pub fn limits(arity: usize) -> Result<&'static ArityLimits, KeyError> {
    LIMITS.get(arity).ok_or(KeyError::ExcessiveArity(arity))
}

/// Encode an exponent vector into a single code.
pub fn encode(exponents: &[i64]) -> Result<Code, KeyError> {
    let arity = exponents.len();
    let lim = limits(arity)?;
    if arity == 0 {
        return Ok(0);
    }
    for (pos, &e) in exponents.iter().enumerate() {
        if e < lim.lower || e > lim.upper {
            return Err(KeyError::ComponentOutOfBounds {
                value: e,
                pos,
                lower: lim.lower,
                upper: lim.upper,
            });
        }
    }
    // The running sum stays below `span`, which is representable, so plain
    // i64 arithmetic cannot overflow here.
    let mut code = exponents[0] - lim.lower;
    let mut shift = lim.bits;
    for &e in &exponents[1..] {
        code += (e - lim.lower) << shift;
        shift += lim.bits;
    }
    Ok(code + lim.h_min)
}

/// Decode a code back into its exponent vector.
pub fn decode(code: Code, arity: usize) -> Result<Vec<i64>, KeyError> {
    let lim = limits(arity)?;
    if arity == 0 {
        if code != 0 {
            return Err(KeyError::CodeOutOfBounds(code, arity));
        }
        return Ok(Vec::new());
    }
    if code < lim.h_min || code > lim.h_max {
        return Err(KeyError::CodeOutOfBounds(code, arity));
    }
    let offset = (code - lim.h_min) as u64;
    let mut out = Vec::with_capacity(arity);
    let mut shift = lim.bits;
    out.push(((offset & ((1u64 << shift) - 1)) as i64) + lim.lower);
    for _ in 1..arity {
        let mask = (1u64 << (shift + lim.bits)) - 1;
        out.push((((offset & mask) >> shift) as i64) + lim.lower);
        shift += lim.bits;
    }
    Ok(out)
}
