//! Series: a symbol set plus a term table
//!
//! [`Series`] is the algebraic object the arithmetic is defined on: a finite
//! sum of terms with distinct monomials over a fixed, ordered symbol set.
//! It is a plain value type with deep-copy semantics; the term table is
//! exclusively owned.
//!
//! ## Binary dispatch
//!
//! Binary operations first reconcile the operands' symbol sets: when the
//! sets differ, both operands are lifted through the ordered merge (new
//! positions are zero-filled), then:
//!
//! - `+` / `−` iterate the smaller operand into a copy of the larger one,
//!   accumulating in place and dropping terms that cancel to zero;
//! - `×` hands both operands to the blocked multiplier
//!   (see [`crate::multiplier`]).
//!
//! Every fallible step has a `try_*` entry point; the operator sugar wraps
//! those and panics on failure (same split as the result-returning and
//! legacy wrappers elsewhere in the crate).

#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use crate::coeff::Coefficient;
use crate::kronecker::KeyError;
use crate::monomial::MonomialKey;
use crate::multiplier::{MultiplyError, SeriesMultiplier};
use crate::symbols::{MergeSide, SymbolSet};
use crate::table::{TableError, Term, TermTable};

/// Errors surfaced by series construction and arithmetic.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SeriesError {
    /// A term's key does not belong to the series' symbol set.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// The term table refused an operation.
    #[error(transparent)]
    Table(#[from] TableError),
}

/// A finite sum of coefficient–monomial terms over a fixed symbol set.
#[derive(Clone, Debug)]
pub struct Series<C, K> {
    symbols: SymbolSet,
    table: TermTable<K, C>,
}

impl<C: Coefficient, K: MonomialKey> Series<C, K> {
    /// Empty (zero) series over `symbols`.
    pub fn zero(symbols: SymbolSet) -> Self {
        Self { symbols, table: TermTable::new() }
    }

    /// Constant series over the empty symbol set. A zero constant yields the
    /// empty series.
    pub fn constant(cf: C) -> Self {
        let mut s = Self::zero(SymbolSet::empty());
        if !cf.is_zero() {
            let key = K::unit(&s.symbols).expect("arity 0 is always packable");
            s.table.accumulate(key, &cf).expect("insert into fresh table");
        }
        s
    }

    /// Univariate unit series: one term, coefficient one, exponent one.
    pub fn from_symbol(name: impl Into<String>) -> Result<Self, SeriesError> {
        let symbols = SymbolSet::single(name);
        let key = K::from_exponents(&[1])?;
        let mut s = Self::zero(symbols);
        s.table.accumulate(key, &C::one())?;
        Ok(s)
    }

    /// Rebuild from parts; used by the serialization layer.
    pub(crate) fn from_parts(symbols: SymbolSet, table: TermTable<K, C>) -> Self {
        Self { symbols, table }
    }

    /// Number of terms.
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the series is zero (no terms; the symbol set may be non-empty).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The series' symbol set.
    #[inline]
    pub fn symbol_set(&self) -> &SymbolSet {
        &self.symbols
    }

    /// Iterate terms in the table's stable order.
    pub fn terms(&self) -> impl Iterator<Item = &Term<C, K>> {
        self.table.iter()
    }

    /// Coefficient of `key`, if the term is present.
    pub fn coefficient(&self, key: &K) -> Option<&C> {
        self.table.get(key)
    }

    /// Accumulate one term, validating key compatibility.
    pub fn insert(&mut self, term: Term<C, K>) -> Result<(), SeriesError> {
        if !term.key.is_compatible(&self.symbols) {
            return Err(KeyError::Incompatible {
                key: term.key.arity(),
                set: self.symbols.len(),
            }
            .into());
        }
        self.table.accumulate(term.key, &term.cf)?;
        Ok(())
    }

    /// Lift every term into the merged set the given side maps into.
    pub fn lift(
        &self,
        merge: &crate::symbols::SymbolMerge,
        side: MergeSide,
    ) -> Result<Self, SeriesError> {
        let mut out = Self::zero(merge.merged.clone());
        for t in self.table.iter() {
            let key = t.key.merge_symbols(merge, side)?;
            out.table.accumulate(key, &t.cf)?;
        }
        Ok(out)
    }

    /// Bring two series onto one symbol set, lifting only when needed.
    pub fn aligned<'a>(
        a: &'a Self,
        b: &'a Self,
    ) -> Result<(Cow<'a, Self>, Cow<'a, Self>), SeriesError> {
        if a.symbols == b.symbols {
            return Ok((Cow::Borrowed(a), Cow::Borrowed(b)));
        }
        let merge = a.symbols.merge(&b.symbols);
        Ok((
            Cow::Owned(a.lift(&merge, MergeSide::Left)?),
            Cow::Owned(b.lift(&merge, MergeSide::Right)?),
        ))
    }

    /// Checked addition.
    pub fn try_add(&self, rhs: &Self) -> Result<Self, SeriesError> {
        let (a, b) = Self::aligned(self, rhs)?;
        Ok(Self::add_merged(a.as_ref(), b.as_ref(), false)?)
    }

    /// Checked subtraction.
    pub fn try_sub(&self, rhs: &Self) -> Result<Self, SeriesError> {
        let (a, b) = Self::aligned(self, rhs)?;
        Ok(Self::add_merged(a.as_ref(), b.as_ref(), true)?)
    }

    /// Checked multiplication through the blocked multiplier.
    pub fn try_mul(&self, rhs: &Self) -> Result<Self, MultiplyError> {
        let (a, b) = Self::aligned(self, rhs).map_err(|e| match e {
            SeriesError::Key(k) => MultiplyError::Key(k),
            SeriesError::Table(t) => MultiplyError::Table(t),
        })?;
        SeriesMultiplier::new(a.as_ref(), b.as_ref())?.execute()
    }

    /// `±rhs` accumulated into a copy of the larger operand; both operands
    /// share one symbol set here.
    fn add_merged(a: &Self, b: &Self, subtract: bool) -> Result<Self, TableError> {
        debug_assert_eq!(a.symbols, b.symbols);
        if a.len() >= b.len() {
            let mut out = a.clone();
            for t in b.table.iter() {
                if subtract {
                    out.table.accumulate_sub(t.key.clone(), &t.cf)?;
                } else {
                    out.table.accumulate(t.key.clone(), &t.cf)?;
                }
            }
            Ok(out)
        } else {
            // Iterate the smaller operand `a` into a copy of `b`; for a
            // subtraction the copy is negated first.
            let mut out = b.clone();
            if subtract {
                out.negate_in_place();
            }
            for t in a.table.iter() {
                out.table.accumulate(t.key.clone(), &t.cf)?;
            }
            Ok(out)
        }
    }

    /// Negate every coefficient in place.
    pub fn negate_in_place(&mut self) {
        let keys: Vec<K> = self.table.iter().map(|t| t.key.clone()).collect();
        for k in keys {
            let slot = self
                .table
                .find_in_bucket(&k, self.table.bucket_of(&k))
                .expect("key just observed");
            self.table.coeff_mut(slot).expect("occupied slot").negate();
        }
    }

    /// Multiply every coefficient by a scalar; a zero scalar empties the
    /// series while keeping its symbol set.
    pub fn scale(&self, cf: &C) -> Self {
        let mut out = Self::zero(self.symbols.clone());
        if cf.is_zero() {
            return out;
        }
        for t in self.table.iter() {
            let scaled = t.cf.mul_ref(cf);
            if !scaled.is_zero() {
                out.table
                    .accumulate(t.key.clone(), &scaled)
                    .expect("distinct keys cannot collide");
            }
        }
        out
    }

    /// Power by repeated multiplication (binary exponentiation).
    ///
    /// `pow(0)` is the unit series over the same symbol set.
    pub fn try_pow(&self, mut n: u32) -> Result<Self, MultiplyError> {
        let mut acc = {
            let mut one = Self::zero(self.symbols.clone());
            let key = K::unit(&one.symbols).map_err(MultiplyError::Key)?;
            one.table
                .accumulate(key, &C::one())
                .map_err(MultiplyError::Table)?;
            one
        };
        if n == 0 {
            return Ok(acc);
        }
        let mut base = self.clone();
        loop {
            if n & 1 == 1 {
                acc = acc.try_mul(&base)?;
            }
            n >>= 1;
            if n == 0 {
                break;
            }
            base = base.try_mul(&base)?;
        }
        Ok(acc)
    }
}

impl<C: Coefficient, K: MonomialKey> PartialEq for Series<C, K> {
    /// Series are equal when they carry the same terms after lifting both to
    /// the merged symbol set.
    fn eq(&self, other: &Self) -> bool {
        let Ok((a, b)) = Self::aligned(self, other) else {
            return false;
        };
        if a.len() != b.len() {
            return false;
        }
        let equal = a.table.iter().all(|t| b.table.get(&t.key) == Some(&t.cf));
        equal
    }
}

// ---------------------------------------------------------------------------
// Operator sugar (panicking wrappers over the try_* entry points)
// ---------------------------------------------------------------------------

impl<C: Coefficient, K: MonomialKey> Add for &Series<C, K> {
    type Output = Series<C, K>;
    fn add(self, rhs: Self) -> Series<C, K> {
        self.try_add(rhs).expect("series addition failed")
    }
}

impl<C: Coefficient, K: MonomialKey> Sub for &Series<C, K> {
    type Output = Series<C, K>;
    fn sub(self, rhs: Self) -> Series<C, K> {
        self.try_sub(rhs).expect("series subtraction failed")
    }
}

impl<C: Coefficient, K: MonomialKey> Mul for &Series<C, K> {
    type Output = Series<C, K>;
    fn mul(self, rhs: Self) -> Series<C, K> {
        self.try_mul(rhs).expect("series multiplication failed")
    }
}

impl<C: Coefficient, K: MonomialKey> Add for Series<C, K> {
    type Output = Series<C, K>;
    fn add(self, rhs: Self) -> Series<C, K> {
        &self + &rhs
    }
}

impl<C: Coefficient, K: MonomialKey> Sub for Series<C, K> {
    type Output = Series<C, K>;
    fn sub(self, rhs: Self) -> Series<C, K> {
        &self - &rhs
    }
}

impl<C: Coefficient, K: MonomialKey> Mul for Series<C, K> {
    type Output = Series<C, K>;
    fn mul(self, rhs: Self) -> Series<C, K> {
        &self * &rhs
    }
}

impl<C: Coefficient, K: MonomialKey> Neg for Series<C, K> {
    type Output = Series<C, K>;
    fn neg(mut self) -> Series<C, K> {
        self.negate_in_place();
        self
    }
}

impl<C: Coefficient, K: MonomialKey> AddAssign<&Series<C, K>> for Series<C, K> {
    fn add_assign(&mut self, rhs: &Series<C, K>) {
        *self = self.try_add(rhs).expect("series addition failed");
    }
}

impl<C: Coefficient, K: MonomialKey> SubAssign<&Series<C, K>> for Series<C, K> {
    fn sub_assign(&mut self, rhs: &Series<C, K>) {
        *self = self.try_sub(rhs).expect("series subtraction failed");
    }
}

impl<C: Coefficient, K: MonomialKey> MulAssign<&Series<C, K>> for Series<C, K> {
    fn mul_assign(&mut self, rhs: &Series<C, K>) {
        *self = self.try_mul(rhs).expect("series multiplication failed");
    }
}

// Numeric-literal right operands lift to a constant series.

impl<C: Coefficient, K: MonomialKey> Add<i64> for &Series<C, K> {
    type Output = Series<C, K>;
    fn add(self, rhs: i64) -> Series<C, K> {
        self + &Series::constant(C::from_i64(rhs))
    }
}

impl<C: Coefficient, K: MonomialKey> Sub<i64> for &Series<C, K> {
    type Output = Series<C, K>;
    fn sub(self, rhs: i64) -> Series<C, K> {
        self - &Series::constant(C::from_i64(rhs))
    }
}

impl<C: Coefficient, K: MonomialKey> Mul<i64> for &Series<C, K> {
    type Output = Series<C, K>;
    fn mul(self, rhs: i64) -> Series<C, K> {
        self.scale(&C::from_i64(rhs))
    }
}

impl<C: Coefficient, K: MonomialKey> AddAssign<i64> for Series<C, K> {
    fn add_assign(&mut self, rhs: i64) {
        *self = &*self + rhs;
    }
}

impl<C: Coefficient, K: MonomialKey> SubAssign<i64> for Series<C, K> {
    fn sub_assign(&mut self, rhs: i64) {
        *self = &*self - rhs;
    }
}

impl<C: Coefficient, K: MonomialKey> MulAssign<i64> for Series<C, K> {
    fn mul_assign(&mut self, rhs: i64) {
        *self = &*self * rhs;
    }
}

impl<C: Coefficient, K: MonomialKey> Add<i64> for Series<C, K> {
    type Output = Series<C, K>;
    fn add(self, rhs: i64) -> Series<C, K> {
        &self + rhs
    }
}

impl<C: Coefficient, K: MonomialKey> Sub<i64> for Series<C, K> {
    type Output = Series<C, K>;
    fn sub(self, rhs: i64) -> Series<C, K> {
        &self - rhs
    }
}

impl<C: Coefficient, K: MonomialKey> Mul<i64> for Series<C, K> {
    type Output = Series<C, K>;
    fn mul(self, rhs: i64) -> Series<C, K> {
        &self * rhs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monomial::PackedMonomial;
    use num_bigint::BigInt;

    type S = Series<BigInt, PackedMonomial>;

    fn sym(name: &str) -> S {
        S::from_symbol(name).unwrap()
    }

    #[test]
    fn constructors() {
        let x = sym("x");
        assert_eq!(x.len(), 1);
        assert_eq!(x.symbol_set().names(), &["x".to_string()]);
        let c = S::constant(BigInt::from(5));
        assert_eq!(c.len(), 1);
        assert!(c.symbol_set().is_empty());
        assert!(S::constant(BigInt::from(0)).is_empty());
        let z = S::zero(SymbolSet::from_names(["x", "y"]));
        assert!(z.is_empty());
        assert_eq!(z.symbol_set().len(), 2);
    }

    #[test]
    fn addition_merges_symbol_sets() {
        let x = sym("x");
        let y = sym("y");
        let s = &x + &y;
        assert_eq!(s.len(), 2);
        assert_eq!(s.symbol_set().names(), &["x".to_string(), "y".to_string()]);
        // x lifted into {x, y} has exponents (1, 0).
        let key = PackedMonomial::from_exponents(&[1, 0]).unwrap();
        assert_eq!(s.coefficient(&key), Some(&BigInt::from(1)));
    }

    #[test]
    fn addition_cancels_to_zero() {
        let x = sym("x");
        let minus = -x.clone();
        let sum = &x + &minus;
        assert!(sum.is_empty());
        assert_eq!(sum.symbol_set().names(), &["x".to_string()]);
    }

    #[test]
    fn subtraction_both_orders() {
        let x = sym("x");
        let y = sym("y");
        let a = &(&x + &y) + 1; // x + y + 1
        let b = &x + 2; // x + 2
        let d = &a - &b; // y - 1
        assert_eq!(d.len(), 2);
        let unit = PackedMonomial::from_exponents(&[0, 0]).unwrap();
        assert_eq!(d.coefficient(&unit), Some(&BigInt::from(-1)));
        // Smaller lhs exercises the negated-copy path.
        let d2 = &b - &a; // 1 - y
        assert_eq!(d2.len(), 2);
        assert_eq!(d2.coefficient(&unit), Some(&BigInt::from(1)));
        assert_eq!(&d + &d2, S::zero(SymbolSet::empty()));
    }

    #[test]
    fn equality_across_symbol_sets() {
        // x + 0*y equals x.
        let x = sym("x");
        let lift = &(&x + &sym("y")) - &sym("y");
        assert_eq!(lift.symbol_set().len(), 2);
        assert_eq!(lift, x);
        assert_ne!(sym("x"), sym("y"));
    }

    #[test]
    fn scalar_operations() {
        let x = sym("x");
        let s = &(&x * 3) + 7;
        assert_eq!(s.len(), 2);
        let zero = &s * 0;
        assert!(zero.is_empty());
        assert_eq!(zero.symbol_set().names(), &["x".to_string()]);
    }

    #[test]
    fn insert_validates_compatibility() {
        let mut s = S::zero(SymbolSet::from_names(["x", "y"]));
        let bad = PackedMonomial::from_exponents(&[1]).unwrap();
        assert!(s.insert(Term::new(BigInt::from(1), bad)).is_err());
        let good = PackedMonomial::from_exponents(&[1, 2]).unwrap();
        s.insert(Term::new(BigInt::from(3), good.clone())).unwrap();
        s.insert(Term::new(BigInt::from(-3), good.clone())).unwrap();
        assert!(s.is_empty());
    }

    #[test]
    fn pow_zero_and_small() {
        let x = sym("x");
        let one = x.try_pow(0).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one.symbol_set().names(), &["x".to_string()]);
        let sq = (&x + 1).try_pow(2).unwrap(); // x^2 + 2x + 1
        assert_eq!(sq.len(), 3);
        let key = PackedMonomial::from_exponents(&[1]).unwrap();
        assert_eq!(sq.coefficient(&key), Some(&BigInt::from(2)));
    }

    #[test]
    fn compound_assignment() {
        let x = sym("x");
        let mut s = x.clone();
        s += &sym("y");
        s -= &sym("y");
        assert_eq!(s, x);
        s *= &(&x + 1);
        assert_eq!(s.len(), 2); // x^2 + x
        s += 5;
        s -= 4;
        s *= 2;
        let unit = PackedMonomial::from_exponents(&[0, 0]).unwrap();
        assert_eq!(s.coefficient(&unit), Some(&BigInt::from(2)));
    }
}
