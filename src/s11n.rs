//! Series serialization
//!
//! Persisted layout: the symbol set, then the term count, then one
//! `(key, coefficient)` pair per term — packed keys persist their single
//! code, unpacked keys their exponent vector. Two encodings share this one
//! data model and differ only in how the primitive numeric fields are
//! written:
//!
//! - **portable**: JSON text (`serde_json`);
//! - **binary**: compact little-endian framing (`bincode`).
//!
//! Both round-trip exactly. The term order written out is the table's stable
//! iteration order; reading re-inserts the terms, so the reconstructed series
//! compares equal term for term.
//!
//! Deserialization trusts nothing: the symbol set must be ordered and
//! distinct, every key must be compatible with it, keys must be distinct, and
//! coefficients must be nonzero with nonzero denominators. Violations map to
//! a precise [`SerError`] instead of a malformed series.

#![forbid(unsafe_code)]

use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::coeff::Coefficient;
use crate::kronecker::KeyError;
use crate::monomial::MonomialKey;
use crate::series::{Series, SeriesError};
use crate::symbols::{SymbolError, SymbolSet};
use crate::table::TermTable;

/// Errors surfaced while persisting or reading back a series.
#[derive(Debug, thiserror::Error)]
pub enum SerError {
    /// Portable (JSON) encoding or decoding failure.
    #[error("portable encoding: {0}")]
    Portable(#[from] serde_json::Error),
    /// Binary encoding or decoding failure.
    #[error("binary encoding: {0}")]
    Binary(#[from] bincode::Error),
    /// A persisted key failed validation against the symbol set.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// The persisted symbol set is not ordered and distinct.
    #[error(transparent)]
    Symbols(#[from] SymbolError),
    /// Term insertion failed.
    #[error(transparent)]
    Series(#[from] SeriesError),
    /// Two persisted terms share one monomial.
    #[error("duplicate monomial in persisted series")]
    DuplicateTerm,
    /// A persisted term carries a zero coefficient.
    #[error("zero coefficient in persisted series")]
    ZeroCoefficient,
    /// A persisted rational coefficient carries a zero denominator.
    #[error("zero denominator in persisted series")]
    ZeroDenominator,
}

/// The one serde data model both encodings share.
#[derive(Serialize, Deserialize)]
struct SeriesRepr<W, C> {
    symbols: Vec<String>,
    terms: Vec<(W, C)>,
}

fn to_repr<C: Coefficient, K: MonomialKey>(s: &Series<C, K>) -> SeriesRepr<K::Wire, C> {
    SeriesRepr {
        symbols: s.symbol_set().names().to_vec(),
        terms: s.terms().map(|t| (t.key.to_wire(), t.cf.clone())).collect(),
    }
}

fn from_repr<C: Coefficient, K: MonomialKey>(
    repr: SeriesRepr<K::Wire, C>,
) -> Result<Series<C, K>, SerError> {
    let symbols = SymbolSet::new(repr.symbols)?;
    let mut table: TermTable<K, C> =
        TermTable::with_term_capacity(repr.terms.len()).map_err(SeriesError::from)?;
    for (wire, cf) in repr.terms {
        let key = K::from_wire(wire, &symbols)?;
        if cf.is_zero() {
            return Err(SerError::ZeroCoefficient);
        }
        if let Some(den) = cf.denominator() {
            if den.is_zero() {
                return Err(SerError::ZeroDenominator);
            }
        }
        if table.get(&key).is_some() {
            return Err(SerError::DuplicateTerm);
        }
        table.accumulate(key, &cf).map_err(SeriesError::from)?;
    }
    Ok(Series::from_parts(symbols, table))
}

/// Serialize to the portable (JSON) encoding.
pub fn to_portable<C: Coefficient, K: MonomialKey>(s: &Series<C, K>) -> Result<String, SerError> {
    Ok(serde_json::to_string(&to_repr(s))?)
}

/// Read back a series from the portable encoding.
pub fn from_portable<C: Coefficient, K: MonomialKey>(text: &str) -> Result<Series<C, K>, SerError> {
    from_repr(serde_json::from_str::<SeriesRepr<K::Wire, C>>(text)?)
}

/// Serialize to the binary encoding.
pub fn to_binary<C: Coefficient, K: MonomialKey>(s: &Series<C, K>) -> Result<Vec<u8>, SerError> {
    Ok(bincode::serialize(&to_repr(s))?)
}

/// Read back a series from the binary encoding.
pub fn from_binary<C: Coefficient, K: MonomialKey>(bytes: &[u8]) -> Result<Series<C, K>, SerError> {
    from_repr(bincode::deserialize::<SeriesRepr<K::Wire, C>>(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monomial::{PackedMonomial, VecMonomial};
    use crate::symbols::SymbolSet;
    use num_bigint::BigInt;
    use num_rational::BigRational;

    type SP = Series<BigInt, PackedMonomial>;
    type SV = Series<BigInt, VecMonomial>;

    fn sample() -> SP {
        let x = SP::from_symbol("x").unwrap();
        let y = SP::from_symbol("y").unwrap();
        let base = &(&x + &y) + 1;
        base.try_pow(4).unwrap()
    }

    #[test]
    fn portable_round_trip_packed() {
        let s = sample();
        let text = to_portable(&s).unwrap();
        let back: SP = from_portable(&text).unwrap();
        assert_eq!(back, s);
        assert_eq!(back.symbol_set(), s.symbol_set());
    }

    #[test]
    fn binary_round_trip_packed() {
        let s = sample();
        let bytes = to_binary(&s).unwrap();
        let back: SP = from_binary(&bytes).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn round_trip_unpacked_keys() {
        let x = SV::from_symbol("x").unwrap();
        let y = SV::from_symbol("y").unwrap();
        let s = (&(&x - &y) + 5).try_pow(3).unwrap();
        let back: SV = from_portable(&to_portable(&s).unwrap()).unwrap();
        assert_eq!(back, s);
        let back: SV = from_binary(&to_binary(&s).unwrap()).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn round_trip_rational() {
        type SR = Series<BigRational, PackedMonomial>;
        let r = |n: i64, d: i64| BigRational::new(BigInt::from(n), BigInt::from(d));
        let x = SR::from_symbol("x").unwrap();
        let s = &x.scale(&r(3, 7)) + &SR::constant(r(-1, 6));
        let back: SR = from_portable(&to_portable(&s).unwrap()).unwrap();
        assert_eq!(back, s);
        let back: SR = from_binary(&to_binary(&s).unwrap()).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn empty_series_round_trips_with_its_set() {
        let s = SP::zero(SymbolSet::from_names(["a", "b", "c"]));
        let back: SP = from_portable(&to_portable(&s).unwrap()).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.symbol_set().len(), 3);
    }

    #[test]
    fn malformed_symbol_set_is_rejected() {
        let text = r#"{"symbols":["b","a"],"terms":[]}"#;
        assert!(matches!(
            from_portable::<i64, PackedMonomial>(text),
            Err(SerError::Symbols(_))
        ));
        let text = r#"{"symbols":["a","a"],"terms":[]}"#;
        assert!(from_portable::<i64, PackedMonomial>(text).is_err());
    }

    #[test]
    fn duplicate_and_zero_terms_are_rejected() {
        let dup = r#"{"symbols":["x"],"terms":[[1,2],[1,3]]}"#;
        assert!(matches!(
            from_portable::<i64, PackedMonomial>(dup),
            Err(SerError::DuplicateTerm)
        ));
        let zero = r#"{"symbols":["x"],"terms":[[1,0]]}"#;
        assert!(matches!(
            from_portable::<i64, PackedMonomial>(zero),
            Err(SerError::ZeroCoefficient)
        ));
    }

    #[test]
    fn out_of_range_code_is_rejected() {
        let text = format!(
            r#"{{"symbols":["x","y"],"terms":[[{},1]]}}"#,
            i64::MAX
        );
        assert!(matches!(
            from_portable::<i64, PackedMonomial>(&text),
            Err(SerError::Key(KeyError::CodeOutOfBounds(..)))
        ));
    }

    #[test]
    fn wrong_arity_vector_is_rejected() {
        let text = r#"{"symbols":["x","y"],"terms":[[[1],4]]}"#;
        assert!(matches!(
            from_portable::<i64, VecMonomial>(text),
            Err(SerError::Key(KeyError::Incompatible { .. }))
        ));
    }
}
