//! Term store: coefficient–monomial pairs in an open-addressed table
//!
//! [`TermTable`] is the hash map every series owns: monomial key to numeric
//! coefficient, open addressing with linear probing and backward-shift
//! deletion. Bucket counts are zero or a power of two and the rehash on
//! growth is deterministic given the insertion sequence, so iteration order
//! is reproducible run to run (and unchanged between mutating operations).
//!
//! Besides the safe entry points the table deliberately exposes its low-level
//! probing primitives — [`TermTable::bucket_of`], [`TermTable::find_in_bucket`],
//! [`TermTable::unique_insert`], [`TermTable::update_size`],
//! [`TermTable::increase_size`] — because the multiplication kernel drives
//! them directly: during a blocked multiplication the caller knows the key is
//! absent and has already reserved room, so the per-insert load-factor
//! bookkeeping would only cost cycles.
//!
//! ## Invariants
//!
//! - After any *safe* mutating operation, `len / bucket_count ≤ max_load_factor`.
//!   The raw primitives suspend this invariant; callers restore it through
//!   [`TermTable::update_size`] / [`TermTable::increase_size`].
//! - No stored term has a zero coefficient and no two stored terms share a
//!   key. The safe entry points enforce this; the raw primitives trust the
//!   caller.

#![forbid(unsafe_code)]

use rayon::prelude::*;

use crate::coeff::Coefficient;
use crate::monomial::MonomialKey;
use crate::tuning;

/// One coefficient–monomial pair.
///
/// The key alone identifies the term inside a table; the coefficient is the
/// attached value. A term with a zero coefficient is *ignorable* (it never
/// enters a table), a term with the all-zero monomial is *unitary*.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Term<C, K> {
    /// Numeric coefficient.
    pub cf: C,
    /// Monomial key.
    pub key: K,
}

impl<C: Coefficient, K: MonomialKey> Term<C, K> {
    /// Build a term.
    #[inline]
    pub fn new(cf: C, key: K) -> Self {
        Self { cf, key }
    }

    /// Whether the term can be dropped from any series.
    #[inline]
    pub fn is_ignorable(&self) -> bool {
        self.cf.is_zero()
    }

    /// Whether the monomial part is the unit (all exponents zero).
    #[inline]
    pub fn is_unitary(&self) -> bool {
        self.key.is_unit()
    }
}

/// Errors surfaced by the term table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TableError {
    /// The bucket array cannot grow any further.
    #[error("term table exceeds the maximum addressable size")]
    Capacity,
    /// An unchecked insert found no free slot.
    #[error("unique insert into a full table")]
    Full,
    /// Rejected load factor configuration.
    #[error("max load factor must be in (0, 1] (got {0})")]
    BadLoadFactor(f64),
}

/// Largest permitted bucket count; doubling stops past this.
const MAX_BUCKETS: usize = usize::MAX / 2 + 1; // the top power of two

/// Bucket arrays at least this large are zero-initialised in parallel when
/// the `parallel_memory_set` tuning flag is on.
const PARALLEL_INIT_THRESHOLD: usize = 1 << 16;

/// Open-addressed map from monomial key to coefficient.
#[derive(Clone, Debug)]
pub struct TermTable<K, C> {
    buckets: Vec<Option<Term<C, K>>>,
    len: usize,
    max_load: f64,
}

impl<K: MonomialKey, C: Coefficient> Default for TermTable<K, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MonomialKey, C: Coefficient> TermTable<K, C> {
    /// Empty table with no buckets.
    pub fn new() -> Self {
        Self { buckets: Vec::new(), len: 0, max_load: 0.75 }
    }

    /// Table pre-sized so `n` terms fit without rehashing.
    pub fn with_term_capacity(n: usize) -> Result<Self, TableError> {
        let mut t = Self::new();
        if n > 0 {
            let wanted = ((n as f64 / t.max_load).ceil() as usize).max(1);
            t.buckets = Self::alloc_buckets(wanted.next_power_of_two().min(MAX_BUCKETS));
        }
        Ok(t)
    }

    /// Number of stored terms.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the table stores no terms.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of buckets (zero or a power of two).
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Current `len / bucket_count` (zero for a bucketless table).
    #[inline]
    pub fn load_factor(&self) -> f64 {
        if self.buckets.is_empty() {
            0.0
        } else {
            self.len as f64 / self.buckets.len() as f64
        }
    }

    /// Configured ceiling for [`TermTable::load_factor`].
    #[inline]
    pub fn max_load_factor(&self) -> f64 {
        self.max_load
    }

    /// Set the load-factor ceiling. Values outside `(0, 1]` are rejected.
    pub fn set_max_load_factor(&mut self, mlf: f64) -> Result<(), TableError> {
        if !(mlf > 0.0 && mlf <= 1.0) {
            return Err(TableError::BadLoadFactor(mlf));
        }
        self.max_load = mlf;
        Ok(())
    }

    /// Home bucket of `key` (0 for a bucketless table).
    #[inline]
    pub fn bucket_of(&self, key: &K) -> usize {
        if self.buckets.is_empty() {
            0
        } else {
            (key.key_hash() as usize) & (self.buckets.len() - 1)
        }
    }

    /// Probe for `key` starting at its home `bucket`; returns the slot index.
    pub fn find_in_bucket(&self, key: &K, bucket: usize) -> Option<usize> {
        let n = self.buckets.len();
        if n == 0 {
            return None;
        }
        let mask = n - 1;
        let mut slot = bucket & mask;
        for _ in 0..n {
            match &self.buckets[slot] {
                None => return None,
                Some(t) if t.key == *key => return Some(slot),
                Some(_) => slot = (slot + 1) & mask,
            }
        }
        None
    }

    /// Convenience lookup through the probing primitives.
    pub fn get(&self, key: &K) -> Option<&C> {
        let slot = self.find_in_bucket(key, self.bucket_of(key))?;
        self.buckets[slot].as_ref().map(|t| &t.cf)
    }

    /// Shared view of a slot found via [`TermTable::find_in_bucket`].
    #[inline]
    pub fn slot(&self, slot: usize) -> Option<&Term<C, K>> {
        self.buckets.get(slot).and_then(Option::as_ref)
    }

    /// Mutable coefficient of an occupied slot.
    #[inline]
    pub fn coeff_mut(&mut self, slot: usize) -> Option<&mut C> {
        self.buckets.get_mut(slot).and_then(Option::as_mut).map(|t| &mut t.cf)
    }

    /// Insert a term whose key is known to be absent, probing from `bucket`,
    /// without rehashing and without touching the size counter.
    ///
    /// Callers settle the books afterwards with [`TermTable::update_size`]
    /// and restore the load-factor invariant themselves.
    pub fn unique_insert(&mut self, term: Term<C, K>, bucket: usize) -> Result<usize, TableError> {
        let n = self.buckets.len();
        if n == 0 {
            return Err(TableError::Full);
        }
        let mask = n - 1;
        let mut slot = bucket & mask;
        for _ in 0..n {
            if self.buckets[slot].is_none() {
                self.buckets[slot] = Some(term);
                return Ok(slot);
            }
            slot = (slot + 1) & mask;
        }
        Err(TableError::Full)
    }

    /// Adjust the size counter after a run of unchecked insertions.
    #[inline]
    pub fn update_size(&mut self, len: usize) {
        self.len = len;
    }

    /// Grow the bucket array (at least doubling) and rehash deterministically.
    pub fn increase_size(&mut self) -> Result<(), TableError> {
        let new_count = match self.buckets.len() {
            0 => 1,
            n if n >= MAX_BUCKETS => return Err(TableError::Capacity),
            n => n * 2,
        };
        let mut new_buckets = Self::alloc_buckets(new_count);
        let mask = new_count - 1;
        for term in self.buckets.drain(..).flatten() {
            let mut slot = (term.key.key_hash() as usize) & mask;
            loop {
                if new_buckets[slot].is_none() {
                    new_buckets[slot] = Some(term);
                    break;
                }
                slot = (slot + 1) & mask;
            }
        }
        self.buckets = new_buckets;
        Ok(())
    }

    /// Safe insert: accumulate into an existing term or insert a new one,
    /// dropping the term when the accumulated coefficient reaches zero.
    pub fn accumulate(&mut self, key: K, cf: &C) -> Result<(), TableError> {
        let bucket = self.bucket_of(&key);
        if let Some(slot) = self.find_in_bucket(&key, bucket) {
            let c = self.coeff_mut(slot).expect("occupied slot");
            *c += cf;
            if c.is_zero() {
                self.buckets[slot] = None;
                self.restore_after_removal(slot);
                self.len -= 1;
            }
            return Ok(());
        }
        if cf.is_zero() {
            return Ok(());
        }
        self.grow_for_one()?;
        let bucket = self.bucket_of(&key);
        self.unique_insert(Term::new(cf.clone(), key), bucket)?;
        self.len += 1;
        Ok(())
    }

    /// Like [`TermTable::accumulate`] with subtraction.
    pub fn accumulate_sub(&mut self, key: K, cf: &C) -> Result<(), TableError> {
        let bucket = self.bucket_of(&key);
        if let Some(slot) = self.find_in_bucket(&key, bucket) {
            let c = self.coeff_mut(slot).expect("occupied slot");
            *c -= cf;
            if c.is_zero() {
                self.buckets[slot] = None;
                self.restore_after_removal(slot);
                self.len -= 1;
            }
            return Ok(());
        }
        if cf.is_zero() {
            return Ok(());
        }
        self.grow_for_one()?;
        let bucket = self.bucket_of(&key);
        let mut neg = cf.clone();
        neg.negate();
        self.unique_insert(Term::new(neg, key), bucket)?;
        self.len += 1;
        Ok(())
    }

    /// Fused multiply-accumulate of `c1 · c2` into the term at `key`.
    ///
    /// This is the multiplier's inner-loop primitive: on a hit the product is
    /// accumulated in place (a coefficient that cancels to zero is left for a
    /// later [`TermTable::prune_zero`] sweep); on a miss the product term is
    /// inserted, growing the table if the load factor demands it.
    pub fn addmul_term(&mut self, key: K, c1: &C, c2: &C) -> Result<(), TableError> {
        let bucket = self.bucket_of(&key);
        if let Some(slot) = self.find_in_bucket(&key, bucket) {
            self.coeff_mut(slot).expect("occupied slot").addmul(c1, c2);
            return Ok(());
        }
        let prod = c1.mul_ref(c2);
        if prod.is_zero() {
            return Ok(());
        }
        self.grow_for_one()?;
        let bucket = self.bucket_of(&key);
        self.unique_insert(Term::new(prod, key), bucket)?;
        self.len += 1;
        Ok(())
    }

    /// Apply `f` to every stored coefficient, fanning out over the rayon pool.
    pub fn par_update_coeffs<F>(&mut self, f: F)
    where
        F: Fn(&mut C) + Sync,
        C: Send,
        K: Send,
    {
        self.buckets.par_iter_mut().for_each(|b| {
            if let Some(t) = b {
                f(&mut t.cf);
            }
        });
    }

    /// Apply `f` to every stored coefficient on the calling thread.
    pub fn update_coeffs<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut C),
    {
        for b in &mut self.buckets {
            if let Some(t) = b {
                f(&mut t.cf);
            }
        }
    }

    /// Remove a term by key, returning its coefficient.
    pub fn remove(&mut self, key: &K) -> Option<C> {
        let slot = self.find_in_bucket(key, self.bucket_of(key))?;
        let term = self.buckets[slot].take().expect("occupied slot");
        self.restore_after_removal(slot);
        self.len -= 1;
        Some(term.cf)
    }

    /// Drop all terms, keeping the bucket array.
    pub fn clear(&mut self) {
        for b in &mut self.buckets {
            *b = None;
        }
        self.len = 0;
    }

    /// Iterate stored terms in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = &Term<C, K>> {
        self.buckets.iter().filter_map(Option::as_ref)
    }

    /// Consume the table, yielding terms in bucket order.
    pub fn into_iter_terms(self) -> impl Iterator<Item = Term<C, K>> {
        self.buckets.into_iter().flatten()
    }

    /// Drop terms whose coefficient is zero (after external mutation of
    /// coefficients through [`TermTable::coeff_mut`]). Rebuilds the bucket
    /// array in one pass; the rehash is deterministic.
    pub fn prune_zero(&mut self) {
        if self.len == 0 {
            return;
        }
        let count = self.buckets.len();
        let old = std::mem::replace(&mut self.buckets, Self::alloc_buckets(count));
        let mask = count - 1;
        let mut len = 0usize;
        for term in old.into_iter().flatten() {
            if term.cf.is_zero() {
                continue;
            }
            let mut slot = (term.key.key_hash() as usize) & mask;
            while self.buckets[slot].is_some() {
                slot = (slot + 1) & mask;
            }
            self.buckets[slot] = Some(term);
            len += 1;
        }
        self.len = len;
    }

    /// Backward-shift compaction after emptying `slot`.
    fn restore_after_removal(&mut self, mut hole: usize) {
        let n = self.buckets.len();
        let mask = n - 1;
        let mut probe = hole;
        loop {
            probe = (probe + 1) & mask;
            let home = match &self.buckets[probe] {
                None => break,
                Some(t) => (t.key.key_hash() as usize) & mask,
            };
            // The entry can fill the hole iff its home lies outside the
            // circular interval (hole, probe].
            if ((probe.wrapping_sub(home)) & mask) >= ((probe.wrapping_sub(hole)) & mask) {
                self.buckets.swap(hole, probe);
                hole = probe;
            }
        }
    }

    fn grow_for_one(&mut self) -> Result<(), TableError> {
        while self.buckets.is_empty()
            || (self.len + 1) as f64 / self.buckets.len() as f64 > self.max_load
        {
            self.increase_size()?;
        }
        Ok(())
    }

    fn alloc_buckets(n: usize) -> Vec<Option<Term<C, K>>> {
        if n >= PARALLEL_INIT_THRESHOLD && tuning::get_parallel_memory_set() {
            (0..n).into_par_iter().map(|_| None).collect()
        } else {
            std::iter::repeat_with(|| None).take(n).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monomial::PackedMonomial;
    use crate::monomial::MonomialKey as _;

    type T = TermTable<PackedMonomial, i64>;

    fn key(e: &[i64]) -> PackedMonomial {
        PackedMonomial::from_exponents(e).unwrap()
    }

    #[test]
    fn empty_table() {
        let t = T::new();
        assert_eq!(t.len(), 0);
        assert_eq!(t.bucket_count(), 0);
        assert_eq!(t.load_factor(), 0.0);
        assert!(t.get(&key(&[1, 2])).is_none());
    }

    #[test]
    fn accumulate_inserts_and_merges() {
        let mut t = T::new();
        t.accumulate(key(&[1, 0]), &3).unwrap();
        t.accumulate(key(&[0, 1]), &4).unwrap();
        t.accumulate(key(&[1, 0]), &5).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(&key(&[1, 0])), Some(&8));
        assert_eq!(t.get(&key(&[0, 1])), Some(&4));
        // Accumulating to zero drops the term.
        t.accumulate(key(&[0, 1]), &-4).unwrap();
        assert_eq!(t.len(), 1);
        assert!(t.get(&key(&[0, 1])).is_none());
        // Inserting an explicit zero is a no-op.
        t.accumulate(key(&[2, 2]), &0).unwrap();
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn load_factor_invariant_holds_under_growth() {
        let mut t = T::new();
        for i in 0..500 {
            t.accumulate(key(&[i, -i]), &1).unwrap();
            assert!(t.load_factor() <= t.max_load_factor());
            assert!(t.bucket_count().is_power_of_two());
        }
        assert_eq!(t.len(), 500);
        for i in 0..500 {
            assert_eq!(t.get(&key(&[i, -i])), Some(&1));
        }
    }

    #[test]
    fn raw_primitives_round_trip() {
        let mut t = T::with_term_capacity(8).unwrap();
        let k = key(&[3, 1]);
        let b = t.bucket_of(&k);
        assert!(t.find_in_bucket(&k, b).is_none());
        let slot = t.unique_insert(Term::new(7, k.clone()), b).unwrap();
        t.update_size(1);
        assert_eq!(t.len(), 1);
        assert_eq!(t.find_in_bucket(&k, b), Some(slot));
        assert_eq!(t.slot(slot).unwrap().cf, 7);
    }

    #[test]
    fn growth_is_deterministic() {
        let build = || {
            let mut t = T::new();
            for i in 0..200 {
                t.accumulate(key(&[i % 17, i]), &(i + 1)).unwrap();
            }
            t.iter().map(|term| (term.key.clone(), term.cf)).collect::<Vec<_>>()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn removal_backward_shift_keeps_probes_reachable() {
        let mut t = T::with_term_capacity(64).unwrap();
        // Force a probe chain: arity-1 codes are the exponents themselves,
        // so consecutive codes land in consecutive buckets.
        let n = t.bucket_count() as i64;
        let keys: Vec<_> = (0..6).map(|i| key(&[i * n])).collect();
        for (i, k) in keys.iter().enumerate() {
            t.accumulate(k.clone(), &(i as i64 + 1)).unwrap();
        }
        // All six collide on bucket 0 and chain linearly.
        assert_eq!(t.remove(&keys[2]), Some(3));
        for (i, k) in keys.iter().enumerate() {
            if i == 2 {
                assert!(t.get(k).is_none());
            } else {
                assert_eq!(t.get(k), Some(&(i as i64 + 1)));
            }
        }
        assert_eq!(t.len(), 5);
    }

    #[test]
    fn removal_chain_wraps_around_the_bucket_array() {
        let mut t = T::with_term_capacity(8).unwrap();
        let n = t.bucket_count() as i64;
        // Home bucket n-1 for all three: the chain wraps to buckets 0 and 1.
        let keys: Vec<_> = (0..3).map(|i| key(&[n - 1 + i * n])).collect();
        for (i, k) in keys.iter().enumerate() {
            t.accumulate(k.clone(), &(i as i64 + 10)).unwrap();
        }
        assert_eq!(t.remove(&keys[0]), Some(10));
        assert_eq!(t.get(&keys[1]), Some(&11));
        assert_eq!(t.get(&keys[2]), Some(&12));
    }

    #[test]
    fn prune_zero_sweeps_externally_zeroed_terms() {
        let mut t = T::new();
        for i in 0..40 {
            t.accumulate(key(&[i]), &(i % 3)).unwrap();
        }
        // i % 3 == 0 never entered; zero the coefficients of i % 3 == 2 by hand.
        let keys: Vec<_> = (0..40).filter(|i| i % 3 == 2).map(|i| key(&[i])).collect();
        for k in &keys {
            let slot = t.find_in_bucket(k, t.bucket_of(k)).unwrap();
            *t.coeff_mut(slot).unwrap() = 0;
        }
        t.prune_zero();
        for k in &keys {
            assert!(t.get(k).is_none());
        }
        for i in (0..40).filter(|i| i % 3 == 1) {
            assert_eq!(t.get(&key(&[i])), Some(&1));
        }
    }

    #[test]
    fn unique_insert_on_full_table_errors() {
        let mut t = T::new();
        assert_eq!(t.unique_insert(Term::new(1, key(&[0])), 0), Err(TableError::Full));
    }

    #[test]
    fn stable_iteration_between_mutations() {
        let mut t = T::new();
        for i in 0..50 {
            t.accumulate(key(&[i, 0]), &1).unwrap();
        }
        let a: Vec<_> = t.iter().map(|term| term.key.clone()).collect();
        let b: Vec<_> = t.iter().map(|term| term.key.clone()).collect();
        assert_eq!(a, b);
    }
}
