//! Monomial keys: packed and unpacked exponent vectors
//!
//! Both key types implement one shared contract, [`MonomialKey`]. A series is
//! generic over the key type and the multiplier never needs dynamic dispatch:
//! the variant is chosen at construction and fixed from then on.
//!
//! - [`PackedMonomial`] holds a single Kronecker code (see [`crate::kronecker`]).
//!   Its product is one integer addition.
//! - [`VecMonomial`] holds the exponents verbatim. Its product is a
//!   component-wise checked addition; the safe exponent range is the full
//!   `i64`.
//!
//! The hot multiplication loop never calls the checked product. Instead the
//! multiplier screens both operands once with [`MonomialKey::check_mul_bounds`]
//! (component-wise min/max of one operand plus the other must stay inside the
//! supported box) and then uses [`MonomialKey::mul_unchecked`] per pair. The
//! two paths agree on every input the screen admits.

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::hash::{Hash, Hasher};

use serde::{de::DeserializeOwned, Serialize};

use crate::kronecker::{self, Code, KeyError};
use crate::symbols::{MergeSide, SymbolMerge, SymbolSet};

/// Contract shared by the two monomial representations.
pub trait MonomialKey:
    Clone + PartialEq + Eq + Hash + Debug + Send + Sync + Sized + 'static
{
    /// Wire representation used by the serialization layer.
    type Wire: Serialize + DeserializeOwned;

    /// Wire form of the key (packed code or exponent vector).
    fn to_wire(&self) -> Self::Wire;

    /// Rebuild and validate a key from its wire form, for a series over `set`.
    fn from_wire(wire: Self::Wire, set: &SymbolSet) -> Result<Self, KeyError>;

    /// The monomial with all exponents zero, for the given set.
    fn unit(set: &SymbolSet) -> Result<Self, KeyError>;

    /// Build a key from an explicit exponent vector.
    fn from_exponents(exponents: &[i64]) -> Result<Self, KeyError>;

    /// Exponent vector of the key (decoding if packed).
    fn exponents(&self) -> Vec<i64>;

    /// Number of exponents carried by the key.
    fn arity(&self) -> usize;

    /// Whether the key can belong to a series over `set`.
    fn is_compatible(&self, set: &SymbolSet) -> bool;

    /// Whether all exponents are zero.
    fn is_unit(&self) -> bool;

    /// Hash value used by the term table.
    fn key_hash(&self) -> u64;

    /// Checked product. Fails with [`KeyError::Overflow`] when a component of
    /// the result leaves the supported range.
    fn try_mul(&self, rhs: &Self, set: &SymbolSet) -> Result<Self, KeyError>;

    /// Unchecked product. Callers must have screened the operands with
    /// [`MonomialKey::check_mul_bounds`] first.
    fn mul_unchecked(&self, rhs: &Self) -> Self;

    /// Screen two operand key sets: every pairwise product must stay inside
    /// the supported range. The screen is component-wise, so it admits
    /// exactly the pairs [`MonomialKey::try_mul`] would accept, for all pairs
    /// at once.
    fn check_mul_bounds<'a, I1, I2>(keys1: I1, keys2: I2, set: &SymbolSet) -> Result<(), KeyError>
    where
        I1: Iterator<Item = &'a Self>,
        I2: Iterator<Item = &'a Self>;

    /// Lift the key into a merged symbol set, zero-filling new positions.
    fn merge_symbols(&self, merge: &SymbolMerge, side: MergeSide) -> Result<Self, KeyError>;

    /// Sum of all exponents.
    fn total_degree(&self) -> i128;

    /// Sum of the exponents at the given (ordered) positions.
    fn partial_degree(&self, positions: &[usize]) -> i128;
}

// ---------------------------------------------------------------------------
// Packed variant
// ---------------------------------------------------------------------------

/// Kronecker-packed monomial: one signed code plus the implied arity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackedMonomial {
    code: Code,
    arity: u32,
}

impl PackedMonomial {
    /// Rebuild a key from its wire code, validating against `set`.
    pub fn from_code(code: Code, set: &SymbolSet) -> Result<Self, KeyError> {
        let lim = kronecker::limits(set.len())?;
        if set.len() > 0 && (code < lim.h_min || code > lim.h_max) {
            return Err(KeyError::CodeOutOfBounds(code, set.len()));
        }
        if set.is_empty() && code != 0 {
            return Err(KeyError::CodeOutOfBounds(code, 0));
        }
        Ok(Self { code, arity: set.len() as u32 })
    }

    /// The packed code.
    #[inline]
    pub fn code(&self) -> Code {
        self.code
    }
}

impl Hash for PackedMonomial {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.key_hash());
    }
}

impl MonomialKey for PackedMonomial {
    type Wire = Code;

    fn to_wire(&self) -> Code {
        self.code
    }

    fn from_wire(wire: Code, set: &SymbolSet) -> Result<Self, KeyError> {
        Self::from_code(wire, set)
    }

    fn unit(set: &SymbolSet) -> Result<Self, KeyError> {
        // The all-zero vector always encodes to 0.
        kronecker::limits(set.len())?;
        Ok(Self { code: 0, arity: set.len() as u32 })
    }

    fn from_exponents(exponents: &[i64]) -> Result<Self, KeyError> {
        Ok(Self { code: kronecker::encode(exponents)?, arity: exponents.len() as u32 })
    }

    fn exponents(&self) -> Vec<i64> {
        // Valid by construction, so the decode cannot fail.
        kronecker::decode(self.code, self.arity as usize).unwrap_or_default()
    }

    #[inline]
    fn arity(&self) -> usize {
        self.arity as usize
    }

    #[inline]
    fn is_compatible(&self, set: &SymbolSet) -> bool {
        self.arity as usize == set.len()
            && kronecker::limits(self.arity as usize)
                .map(|l| self.arity == 0 || (self.code >= l.h_min && self.code <= l.h_max))
                .unwrap_or(false)
    }

    #[inline]
    fn is_unit(&self) -> bool {
        self.code == 0
    }

    #[inline]
    fn key_hash(&self) -> u64 {
        self.code as u64
    }

    fn try_mul(&self, rhs: &Self, set: &SymbolSet) -> Result<Self, KeyError> {
        if !self.is_compatible(set) || !rhs.is_compatible(set) {
            return Err(KeyError::Incompatible {
                key: self.arity.max(rhs.arity) as usize,
                set: set.len(),
            });
        }
        let lim = kronecker::limits(set.len())?;
        let (ea, eb) = (self.exponents(), rhs.exponents());
        let mut sum = Vec::with_capacity(ea.len());
        for (a, b) in ea.iter().zip(eb.iter()) {
            let s = a + b;
            if s < lim.lower || s > lim.upper {
                return Err(KeyError::Overflow);
            }
            sum.push(s);
        }
        // In range per component, so re-encoding cannot fail.
        Ok(Self { code: kronecker::encode(&sum)?, arity: self.arity })
    }

    #[inline]
    fn mul_unchecked(&self, rhs: &Self) -> Self {
        // With both operands screened, the component sums stay inside the box
        // and the code of the product is exactly the sum of the codes.
        Self { code: self.code + rhs.code, arity: self.arity }
    }

    fn check_mul_bounds<'a, I1, I2>(keys1: I1, keys2: I2, set: &SymbolSet) -> Result<(), KeyError>
    where
        I1: Iterator<Item = &'a Self>,
        I2: Iterator<Item = &'a Self>,
    {
        let arity = set.len();
        let lim = kronecker::limits(arity)?;
        if arity == 0 {
            return Ok(());
        }
        // Component-wise min/max of each operand.
        let mut acc1: Option<(Vec<i64>, Vec<i64>)> = None;
        for k in keys1 {
            if !k.is_compatible(set) {
                return Err(KeyError::Incompatible { key: k.arity(), set: arity });
            }
            accumulate_bounds(&mut acc1, &k.exponents());
        }
        let mut acc2: Option<(Vec<i64>, Vec<i64>)> = None;
        for k in keys2 {
            if !k.is_compatible(set) {
                return Err(KeyError::Incompatible { key: k.arity(), set: arity });
            }
            accumulate_bounds(&mut acc2, &k.exponents());
        }
        let (Some((min1, max1)), Some((min2, max2))) = (acc1, acc2) else {
            return Ok(());
        };
        for i in 0..arity {
            let lo = min1[i] as i128 + min2[i] as i128;
            let hi = max1[i] as i128 + max2[i] as i128;
            if lo < lim.lower as i128 || hi > lim.upper as i128 {
                return Err(KeyError::Overflow);
            }
        }
        Ok(())
    }

    fn merge_symbols(&self, merge: &SymbolMerge, side: MergeSide) -> Result<Self, KeyError> {
        let map = merge.map(side);
        if map.len() != self.arity as usize {
            return Err(KeyError::Incompatible { key: self.arity as usize, set: map.len() });
        }
        let old = self.exponents();
        let mut lifted = vec![0i64; merge.merged.len()];
        for (i, &pos) in map.iter().enumerate() {
            lifted[pos] = old[i];
        }
        Self::from_exponents(&lifted)
    }

    fn total_degree(&self) -> i128 {
        self.exponents().iter().map(|&e| e as i128).sum()
    }

    fn partial_degree(&self, positions: &[usize]) -> i128 {
        let e = self.exponents();
        positions.iter().map(|&p| e[p] as i128).sum()
    }
}

// ---------------------------------------------------------------------------
// Unpacked variant
// ---------------------------------------------------------------------------

/// Plain exponent-vector monomial. The supported exponent range is all of
/// `i64`; products are rejected when a component sum leaves it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VecMonomial {
    exponents: Vec<i64>,
}

impl Hash for VecMonomial {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.key_hash());
    }
}

impl MonomialKey for VecMonomial {
    type Wire = Vec<i64>;

    fn to_wire(&self) -> Vec<i64> {
        self.exponents.clone()
    }

    fn from_wire(wire: Vec<i64>, set: &SymbolSet) -> Result<Self, KeyError> {
        if wire.len() != set.len() {
            return Err(KeyError::Incompatible { key: wire.len(), set: set.len() });
        }
        Ok(Self { exponents: wire })
    }

    fn unit(set: &SymbolSet) -> Result<Self, KeyError> {
        Ok(Self { exponents: vec![0; set.len()] })
    }

    fn from_exponents(exponents: &[i64]) -> Result<Self, KeyError> {
        Ok(Self { exponents: exponents.to_vec() })
    }

    fn exponents(&self) -> Vec<i64> {
        self.exponents.clone()
    }

    #[inline]
    fn arity(&self) -> usize {
        self.exponents.len()
    }

    #[inline]
    fn is_compatible(&self, set: &SymbolSet) -> bool {
        self.exponents.len() == set.len()
    }

    #[inline]
    fn is_unit(&self) -> bool {
        self.exponents.iter().all(|&e| e == 0)
    }

    fn key_hash(&self) -> u64 {
        // Multiplicative fold; cheap and stable across runs.
        let mut h = 0xcbf2_9ce4_8422_2325u64;
        for &e in &self.exponents {
            h = (h ^ e as u64).wrapping_mul(0x0000_0100_0000_01b3);
        }
        h
    }

    fn try_mul(&self, rhs: &Self, set: &SymbolSet) -> Result<Self, KeyError> {
        if !self.is_compatible(set) || !rhs.is_compatible(set) {
            return Err(KeyError::Incompatible {
                key: self.arity().max(rhs.arity()),
                set: set.len(),
            });
        }
        let mut out = Vec::with_capacity(self.exponents.len());
        for (a, b) in self.exponents.iter().zip(rhs.exponents.iter()) {
            out.push(a.checked_add(*b).ok_or(KeyError::Overflow)?);
        }
        Ok(Self { exponents: out })
    }

    fn mul_unchecked(&self, rhs: &Self) -> Self {
        let exponents = self
            .exponents
            .iter()
            .zip(rhs.exponents.iter())
            .map(|(a, b)| a.wrapping_add(*b))
            .collect();
        Self { exponents }
    }

    fn check_mul_bounds<'a, I1, I2>(keys1: I1, keys2: I2, set: &SymbolSet) -> Result<(), KeyError>
    where
        I1: Iterator<Item = &'a Self>,
        I2: Iterator<Item = &'a Self>,
    {
        let arity = set.len();
        let mut acc1: Option<(Vec<i64>, Vec<i64>)> = None;
        for k in keys1 {
            if !k.is_compatible(set) {
                return Err(KeyError::Incompatible { key: k.arity(), set: arity });
            }
            accumulate_bounds(&mut acc1, &k.exponents);
        }
        let mut acc2: Option<(Vec<i64>, Vec<i64>)> = None;
        for k in keys2 {
            if !k.is_compatible(set) {
                return Err(KeyError::Incompatible { key: k.arity(), set: arity });
            }
            accumulate_bounds(&mut acc2, &k.exponents);
        }
        let (Some((min1, max1)), Some((min2, max2))) = (acc1, acc2) else {
            return Ok(());
        };
        for i in 0..arity {
            let lo = min1[i] as i128 + min2[i] as i128;
            let hi = max1[i] as i128 + max2[i] as i128;
            if lo < i64::MIN as i128 || hi > i64::MAX as i128 {
                return Err(KeyError::Overflow);
            }
        }
        Ok(())
    }

    fn merge_symbols(&self, merge: &SymbolMerge, side: MergeSide) -> Result<Self, KeyError> {
        let map = merge.map(side);
        if map.len() != self.exponents.len() {
            return Err(KeyError::Incompatible { key: self.exponents.len(), set: map.len() });
        }
        let mut lifted = vec![0i64; merge.merged.len()];
        for (i, &pos) in map.iter().enumerate() {
            lifted[pos] = self.exponents[i];
        }
        Ok(Self { exponents: lifted })
    }

    fn total_degree(&self) -> i128 {
        self.exponents.iter().map(|&e| e as i128).sum()
    }

    fn partial_degree(&self, positions: &[usize]) -> i128 {
        positions.iter().map(|&p| self.exponents[p] as i128).sum()
    }
}

/// Fold a vector into a running component-wise (min, max) pair.
fn accumulate_bounds(acc: &mut Option<(Vec<i64>, Vec<i64>)>, exponents: &[i64]) {
    match acc {
        None => *acc = Some((exponents.to_vec(), exponents.to_vec())),
        Some((min, max)) => {
            for (i, &e) in exponents.iter().enumerate() {
                if e < min[i] {
                    min[i] = e;
                }
                if e > max[i] {
                    max[i] = e;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kronecker::limits;

    fn set(names: &[&str]) -> SymbolSet {
        SymbolSet::from_names(names.iter().copied())
    }

    #[test]
    fn unit_keys() {
        let s = set(&["x", "y", "z"]);
        let p = PackedMonomial::unit(&s).unwrap();
        assert!(p.is_unit());
        assert!(p.is_compatible(&s));
        assert_eq!(p.exponents(), vec![0, 0, 0]);
        let v = VecMonomial::unit(&s).unwrap();
        assert!(v.is_unit());
        assert_eq!(v.exponents(), vec![0, 0, 0]);
    }

    #[test]
    fn packed_checked_product_matches_vectors() {
        let s = set(&["x", "y"]);
        let a = PackedMonomial::from_exponents(&[2, -3]).unwrap();
        let b = PackedMonomial::from_exponents(&[5, 7]).unwrap();
        let ab = a.try_mul(&b, &s).unwrap();
        assert_eq!(ab.exponents(), vec![7, 4]);
        assert_eq!(ab, a.mul_unchecked(&b));
    }

    #[test]
    fn packed_product_overflow() {
        let s = set(&["x", "y", "z"]);
        let lim = *limits(3).unwrap();
        let big = PackedMonomial::from_exponents(&[lim.upper, 0, 0]).unwrap();
        let one = PackedMonomial::from_exponents(&[1, 0, 0]).unwrap();
        assert_eq!(big.try_mul(&one, &s), Err(KeyError::Overflow));
        // One step below the edge is fine.
        let almost = PackedMonomial::from_exponents(&[lim.upper - 1, 0, 0]).unwrap();
        assert_eq!(almost.try_mul(&one, &s).unwrap().exponents()[0], lim.upper);
        // Same at the lower edge.
        let low = PackedMonomial::from_exponents(&[lim.lower, 0, 0]).unwrap();
        let neg = PackedMonomial::from_exponents(&[-1, 0, 0]).unwrap();
        assert_eq!(low.try_mul(&neg, &s), Err(KeyError::Overflow));
    }

    #[test]
    fn bounds_screen_agrees_with_checked_product() {
        let s = set(&["x", "y", "z"]);
        let lim = *limits(3).unwrap();
        let k1 = [
            PackedMonomial::from_exponents(&[lim.upper, 0, 3]).unwrap(),
            PackedMonomial::from_exponents(&[1, 2, 3]).unwrap(),
        ];
        let k2 = [PackedMonomial::from_exponents(&[0, 1, 0]).unwrap()];
        // max1 + max2 = upper for x, fine.
        assert!(PackedMonomial::check_mul_bounds(k1.iter(), k2.iter(), &s).is_ok());
        let k2 = [PackedMonomial::from_exponents(&[1, 0, 0]).unwrap()];
        assert_eq!(
            PackedMonomial::check_mul_bounds(k1.iter(), k2.iter(), &s),
            Err(KeyError::Overflow)
        );
        // An empty operand is never out of bounds.
        assert!(PackedMonomial::check_mul_bounds(k1.iter(), std::iter::empty(), &s).is_ok());
    }

    #[test]
    fn vec_checked_product_and_overflow() {
        let s = set(&["x", "y"]);
        let a = VecMonomial::from_exponents(&[i64::MAX, 1]).unwrap();
        let b = VecMonomial::from_exponents(&[1, 1]).unwrap();
        assert_eq!(a.try_mul(&b, &s), Err(KeyError::Overflow));
        let c = VecMonomial::from_exponents(&[-4, 11]).unwrap();
        assert_eq!(b.try_mul(&c, &s).unwrap().exponents(), vec![-3, 12]);
    }

    #[test]
    fn incompatible_set_is_rejected() {
        let s2 = set(&["x", "y"]);
        let s3 = set(&["x", "y", "z"]);
        let a = PackedMonomial::from_exponents(&[1, 2]).unwrap();
        assert!(a.is_compatible(&s2));
        assert!(!a.is_compatible(&s3));
        assert!(matches!(
            a.try_mul(&a, &s3),
            Err(KeyError::Incompatible { .. })
        ));
    }

    #[test]
    fn merge_lifts_with_zero_fill() {
        let a = set(&["x", "z"]);
        let b = set(&["y"]);
        let m = a.merge(&b);
        let k = PackedMonomial::from_exponents(&[3, 9]).unwrap();
        let lifted = k.merge_symbols(&m, MergeSide::Left).unwrap();
        // Merged order: x, y, z.
        assert_eq!(lifted.exponents(), vec![3, 0, 9]);
        let kv = VecMonomial::from_exponents(&[5]).unwrap();
        let lifted = kv.merge_symbols(&m, MergeSide::Right).unwrap();
        assert_eq!(lifted.exponents(), vec![0, 5, 0]);
    }

    #[test]
    fn degrees() {
        let k = PackedMonomial::from_exponents(&[2, -1, 4]).unwrap();
        assert_eq!(k.total_degree(), 5);
        assert_eq!(k.partial_degree(&[0, 2]), 6);
        let v = VecMonomial::from_exponents(&[2, -1, 4]).unwrap();
        assert_eq!(v.total_degree(), 5);
        assert_eq!(v.partial_degree(&[1]), -1);
    }

    #[test]
    fn packed_hash_is_the_code() {
        let k = PackedMonomial::from_exponents(&[1, 2, 3]).unwrap();
        assert_eq!(k.key_hash(), k.code() as u64);
    }

    #[test]
    fn wire_round_trip_through_code() {
        let s = set(&["x", "y", "z"]);
        let k = PackedMonomial::from_exponents(&[-2, 5, 1]).unwrap();
        let back = PackedMonomial::from_code(k.code(), &s).unwrap();
        assert_eq!(back, k);
        // A code outside the arity's range is rejected on the way in.
        let lim = *limits(3).unwrap();
        assert!(PackedMonomial::from_code(lim.h_max.checked_add(1).unwrap(), &s).is_err());
    }
}
