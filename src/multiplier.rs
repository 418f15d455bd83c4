//! Blocked series multiplier
//!
//! ## Overview
//! This module is the performance core of the crate: given two series over
//! one symbol set it produces their product through a five-stage pipeline,
//! every stage designed so the hot loop touches nothing but term pointers,
//! monomial codes and destination buckets:
//!
//! 1. **Prepare.** The larger operand goes first; `v1`/`v2` are vectors of
//!    borrowed term references into the operand tables. For fraction
//!    coefficients, both operands are rescaled once to the common denominator
//!    `L = lcm` of every input denominator, so the loop multiplies integral
//!    values and a single exact division by `L²` finishes the job.
//! 2. **Estimate.** A statistical sampler predicts the output size before any
//!    result allocation: random pair products are inserted into a scratch
//!    table until the first duplicate, and the birthday-paradox relation
//!    between the duplicate distance and the output size turns the mean
//!    distance over ten trials into a size estimate.
//! 3. **Blocked kernel.** The index rectangle is walked in cache-sized
//!    blocks; a caller-supplied monotone `skip` predicate short-circuits the
//!    inner loop (degree truncation rides on this hook).
//! 4. **Parallel accumulation.** The rows of `v1` are statically partitioned
//!    into contiguous slices, one per worker; each worker owns a private
//!    partial table pre-reserved from the estimate and runs the blocked
//!    kernel against all of `v2` with no synchronisation. The first failure
//!    is captured, siblings observe a shared flag and bail at their next
//!    multiplication, and no partial result escapes.
//! 5. **Finalise.** Partials merge pairwise in slice order (addition is
//!    associative and commutative for the supported coefficient rings, so
//!    the result is independent of the thread count), cancelled terms are
//!    pruned, and the rational path divides every coefficient by `L²`.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use num_bigint::BigInt;
use num_traits::Zero;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::coeff::{denominator_lcm, Coefficient};
use crate::kronecker::KeyError;
use crate::monomial::MonomialKey;
use crate::polynomial::{self, TruncationPolicy};
use crate::series::Series;
use crate::symbols::SymbolSet;
use crate::table::{TableError, TermTable};
use crate::tuning;

/// Number of sampling trials run by the size estimator.
const ESTIMATION_TRIALS: u128 = 10;

/// Estimation multiplier `c`: caps each trial at `√(|A|·|B|/c)` samples and
/// scales the squared mean back up.
const ESTIMATION_MULTIPLIER: u128 = 2;

/// Fixed PRNG seed: estimation is reproducible run to run.
const ESTIMATION_SEED: u64 = 0x5ba2_97e1_c0de_cafe;

/// Errors surfaced by series multiplication.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MultiplyError {
    /// The operands' symbol sets differ (callers lift before multiplying).
    #[error("operands have different symbol sets")]
    IncompatibleSymbols,
    /// Monomial overflow or key/set mismatch.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// Term-table failure (capacity, load factor).
    #[error(transparent)]
    Table(#[from] TableError),
    /// A rational coefficient carried a zero denominator (malformed input).
    #[error("zero denominator in a rational coefficient")]
    ZeroDenominator,
    /// The estimator's sample counter overflowed.
    #[error("overflow in the estimation counter")]
    CounterOverflow,
    /// A sibling worker failed first; this worker returned early.
    #[error("multiplication interrupted by a sibling failure")]
    Interrupted,
}

/// Coefficient views of one operand: borrowed for integral rings, owned
/// temporaries when the fraction path rescaled them.
enum OperandCoeffs<'a, C> {
    Borrowed(Vec<&'a C>),
    Scaled(Vec<C>),
}

impl<'a, C: Coefficient> OperandCoeffs<'a, C> {
    #[inline]
    fn get(&self, i: usize) -> &C {
        match self {
            OperandCoeffs::Borrowed(v) => v[i],
            OperandCoeffs::Scaled(v) => &v[i],
        }
    }

    fn permuted(&self, perm: &[usize]) -> Self {
        match self {
            OperandCoeffs::Borrowed(v) => {
                OperandCoeffs::Borrowed(perm.iter().map(|&j| v[j]).collect())
            }
            OperandCoeffs::Scaled(v) => {
                OperandCoeffs::Scaled(perm.iter().map(|&j| v[j].clone()).collect())
            }
        }
    }
}

/// Precomputed degree data for the truncation `skip` predicate.
struct TruncationPlan {
    limit: i128,
    d1: Vec<i128>,
    d2: Vec<i128>,
}

/// One multiplication in flight: borrowed term views plus the plan derived
/// from them. The borrows are valid only for the duration of the call.
pub struct SeriesMultiplier<'a, C: Coefficient, K: MonomialKey> {
    symbols: &'a SymbolSet,
    keys1: Vec<&'a K>,
    keys2: Vec<&'a K>,
    cfs1: OperandCoeffs<'a, C>,
    cfs2: OperandCoeffs<'a, C>,
    unscale_by: Option<BigInt>,
    trunc: Option<TruncationPlan>,
}

impl<'a, C: Coefficient, K: MonomialKey> SeriesMultiplier<'a, C, K> {
    /// Prepare a multiplication, consulting the process-wide auto-truncation
    /// policy of the polynomial layer.
    pub fn new(a: &'a Series<C, K>, b: &'a Series<C, K>) -> Result<Self, MultiplyError> {
        Self::with_policy(a, b, polynomial::active_truncation())
    }

    /// Prepare a multiplication with an explicit truncation policy,
    /// bypassing the process-wide setting.
    pub fn truncated(
        a: &'a Series<C, K>,
        b: &'a Series<C, K>,
        policy: TruncationPolicy,
    ) -> Result<Self, MultiplyError> {
        Self::with_policy(a, b, Some(policy))
    }

    fn with_policy(
        a: &'a Series<C, K>,
        b: &'a Series<C, K>,
        policy: Option<TruncationPolicy>,
    ) -> Result<Self, MultiplyError> {
        if a.symbol_set() != b.symbol_set() {
            return Err(MultiplyError::IncompatibleSymbols);
        }
        // The larger series drives the outer loop and the thread partition.
        let (p1, p2) = if a.len() < b.len() { (b, a) } else { (a, b) };
        let keys1: Vec<&K> = p1.terms().map(|t| &t.key).collect();
        let keys2: Vec<&K> = p2.terms().map(|t| &t.key).collect();
        let (cfs1, cfs2, unscale_by) = if C::HAS_DENOMINATOR {
            let lcm = denominator_lcm::<C, _>(p1.terms().map(|t| &t.cf).chain(p2.terms().map(|t| &t.cf)));
            match lcm {
                Some(l) if l.is_zero() => return Err(MultiplyError::ZeroDenominator),
                Some(l) => {
                    let s1 = p1.terms().map(|t| t.cf.scaled_to(&l)).collect();
                    let s2 = p2.terms().map(|t| t.cf.scaled_to(&l)).collect();
                    let sq = &l * &l;
                    (OperandCoeffs::Scaled(s1), OperandCoeffs::Scaled(s2), Some(sq))
                }
                None => (
                    OperandCoeffs::Borrowed(p1.terms().map(|t| &t.cf).collect()),
                    OperandCoeffs::Borrowed(p2.terms().map(|t| &t.cf).collect()),
                    None,
                ),
            }
        } else {
            (
                OperandCoeffs::Borrowed(p1.terms().map(|t| &t.cf).collect()),
                OperandCoeffs::Borrowed(p2.terms().map(|t| &t.cf).collect()),
                None,
            )
        };
        let mut m = Self { symbols: a.symbol_set(), keys1, keys2, cfs1, cfs2, unscale_by, trunc: None };
        if let Some(policy) = policy {
            m.install_truncation(policy);
        }
        Ok(m)
    }

    /// Precompute degree vectors and sort the smaller operand so the skip
    /// predicate is monotone in `j`.
    fn install_truncation(&mut self, policy: TruncationPolicy) {
        // Names absent from the symbol set contribute no degree.
        let positions = policy
            .symbols
            .as_ref()
            .map(|names| {
                let mut p: Vec<usize> =
                    names.iter().filter_map(|n| self.symbols.position(n)).collect();
                p.sort_unstable();
                p.dedup();
                p
            });
        let degree_of = |k: &K| match &positions {
            None => k.total_degree(),
            Some(p) => k.partial_degree(p),
        };
        let d1: Vec<i128> = self.keys1.iter().map(|k| degree_of(k)).collect();
        let d2: Vec<i128> = self.keys2.iter().map(|k| degree_of(k)).collect();
        let mut perm: Vec<usize> = (0..d2.len()).collect();
        perm.sort_by_key(|&j| d2[j]);
        self.keys2 = perm.iter().map(|&j| self.keys2[j]).collect();
        self.cfs2 = self.cfs2.permuted(&perm);
        let d2: Vec<i128> = perm.iter().map(|&j| d2[j]).collect();
        self.trunc = Some(TruncationPlan { limit: policy.degree, d1, d2 });
    }

    /// The skip predicate of the blocked kernel; monotone in `j` because
    /// `d2` is sorted ascending when a truncation plan is installed.
    #[inline]
    fn skip(&self, i: usize, j: usize) -> bool {
        match &self.trunc {
            None => false,
            Some(t) => t.d1[i] + t.d2[j] > t.limit,
        }
    }

    /// Run the multiplication with the process-wide thread configuration.
    pub fn execute(&self) -> Result<Series<C, K>, MultiplyError> {
        self.execute_with_threads(self.decide_threads())
    }

    fn decide_threads(&self) -> usize {
        let requested = tuning::get_thread_count();
        if requested <= 1 || self.keys1.is_empty() {
            return 1;
        }
        let work = self.keys1.len() as u128 * self.keys2.len() as u128;
        let min_work = tuning::get_min_work_per_thread().max(1) as u128;
        let by_work = (work / min_work).max(1).min(self.keys1.len() as u128) as usize;
        requested.min(by_work)
    }

    /// Run the multiplication with an explicit worker count.
    pub(crate) fn execute_with_threads(
        &self,
        threads: usize,
    ) -> Result<Series<C, K>, MultiplyError> {
        let (n1, n2) = (self.keys1.len(), self.keys2.len());
        if n1 == 0 || n2 == 0 {
            return Ok(Series::zero(self.symbols.clone()));
        }
        K::check_mul_bounds(self.keys1.iter().copied(), self.keys2.iter().copied(), self.symbols)?;
        let estimate = self.estimate_final_series_size()?;
        tracing::debug!(n1, n2, estimate, threads, "series multiplication");
        let mut table = if threads <= 1 {
            let mut t = TermTable::with_term_capacity(estimate)?;
            self.multiply_range(&mut t, 0, n1, None)?;
            t
        } else {
            self.multiply_parallel(threads, estimate)?
        };
        table.prune_zero();
        if let Some(l) = &self.unscale_by {
            if threads > 1 {
                table.par_update_coeffs(|c| c.unscale(l));
            } else {
                table.update_coeffs(|c| c.unscale(l));
            }
        }
        tracing::debug!(terms = table.len(), "series multiplication done");
        Ok(Series::from_parts(self.symbols.clone(), table))
    }

    /// Blocked accumulation of the slice `[start1, end1) × [0, |v2|)` into
    /// `table`. Workers pass the shared abort flag; the single-threaded path
    /// passes `None`.
    fn multiply_range(
        &self,
        table: &mut TermTable<K, C>,
        start1: usize,
        end1: usize,
        abort: Option<&AtomicBool>,
    ) -> Result<(), MultiplyError> {
        let mut mult = |i: usize, j: usize| -> Result<(), MultiplyError> {
            if let Some(flag) = abort {
                if flag.load(Ordering::Relaxed) {
                    return Err(MultiplyError::Interrupted);
                }
            }
            let key = self.keys1[i].mul_unchecked(self.keys2[j]);
            table.addmul_term(key, self.cfs1.get(i), self.cfs2.get(j))?;
            Ok(())
        };
        blocked_multiplication(&mut mult, start1, end1, 0, self.keys2.len(), &|i, j| {
            self.skip(i, j)
        })
    }

    /// Static partition across workers, private partial tables, deterministic
    /// merge in slice order.
    fn multiply_parallel(
        &self,
        threads: usize,
        estimate: usize,
    ) -> Result<TermTable<K, C>, MultiplyError> {
        let n1 = self.keys1.len();
        let chunk = n1.div_ceil(threads);
        let ranges: Vec<(usize, usize)> = (0..threads)
            .map(|t| (t * chunk, ((t + 1) * chunk).min(n1)))
            .filter(|(s, e)| s < e)
            .collect();
        let per_worker = estimate / ranges.len();
        let abort = AtomicBool::new(false);
        let first_error: Mutex<Option<MultiplyError>> = Mutex::new(None);
        let record = |e: MultiplyError| {
            let mut guard = first_error.lock().expect("error slot lock");
            if guard.is_none() {
                *guard = Some(e);
            }
            abort.store(true, Ordering::SeqCst);
        };
        let partials: Vec<Option<TermTable<K, C>>> = ranges
            .par_iter()
            .map(|&(start, end)| {
                let mut table = match TermTable::with_term_capacity(per_worker) {
                    Ok(t) => t,
                    Err(e) => {
                        record(e.into());
                        return None;
                    }
                };
                match self.multiply_range(&mut table, start, end, Some(&abort)) {
                    Ok(()) => Some(table),
                    Err(MultiplyError::Interrupted) => None,
                    Err(e) => {
                        record(e);
                        None
                    }
                }
            })
            .collect();
        if let Some(e) = first_error.lock().expect("error slot lock").take() {
            return Err(e);
        }
        let mut iter = partials.into_iter().flatten();
        let mut main = iter.next().expect("at least one partial");
        for partial in iter {
            for term in partial.into_iter_terms() {
                main.accumulate(term.key, &term.cf)?;
            }
        }
        Ok(main)
    }

    /// Statistical output-size estimate (§ overview, stage 2).
    ///
    /// Ten trials: shuffle index vectors into both operands, multiply pairs
    /// along the rotating diagonal into a scratch table, and stop a trial at
    /// the first duplicate insertion (or at the `√(|A|·|B|/c)` cap). The
    /// estimate is `mean² · c`. Empty operands short-circuit to zero. The
    /// active skip predicate is honoured: skipped pairs produce no sample.
    pub(crate) fn estimate_final_series_size(&self) -> Result<usize, MultiplyError> {
        let (size1, size2) = (self.keys1.len(), self.keys2.len());
        if size1 == 0 || size2 == 0 {
            return Ok(0);
        }
        let max_m = isqrt(size1 as u128 * size2 as u128 / ESTIMATION_MULTIPLIER);
        let attempts_cap = size1 as u128 * size2 as u128;
        let mut idx1: Vec<usize> = (0..size1).collect();
        let mut idx2: Vec<usize> = (0..size2).collect();
        let mut rng = StdRng::seed_from_u64(ESTIMATION_SEED);
        let mut scratch: TermTable<K, C> = TermTable::new();
        let mut total: u128 = 0;
        for _ in 0..ESTIMATION_TRIALS {
            idx1.shuffle(&mut rng);
            idx2.shuffle(&mut rng);
            let mut count: u128 = 0;
            let mut attempts: u128 = 0;
            let (mut p1, mut p2) = (0usize, 0usize);
            while count < max_m {
                if p1 == size1 {
                    // Wrapping around the first operand rotates the second,
                    // so successive sweeps pair different terms.
                    p1 = 0;
                    idx2.rotate_right(1);
                    p2 = 0;
                }
                if p2 == size2 {
                    p2 = 0;
                }
                if attempts == attempts_cap {
                    break;
                }
                attempts += 1;
                let (i, j) = (idx1[p1], idx2[p2]);
                if !self.skip(i, j) {
                    let key = self.keys1[i].mul_unchecked(self.keys2[j]);
                    scratch.addmul_term(key, self.cfs1.get(i), self.cfs2.get(j))?;
                    let bumped =
                        count.checked_add(1).ok_or(MultiplyError::CounterOverflow)?;
                    if scratch.len() as u128 != bumped {
                        // First duplicate: the trial's sample is `count`.
                        break;
                    }
                    count = bumped;
                }
                p1 += 1;
                p2 += 1;
            }
            total = total.checked_add(count).ok_or(MultiplyError::CounterOverflow)?;
            scratch.clear();
        }
        let mean = total / ESTIMATION_TRIALS;
        let estimate = mean
            .checked_mul(mean)
            .and_then(|m| m.checked_mul(ESTIMATION_MULTIPLIER))
            .ok_or(MultiplyError::CounterOverflow)?;
        Ok(usize::try_from(estimate).unwrap_or(usize::MAX))
    }
}

/// Cache-blocked double loop over `[start1, end1) × [start2, end2)`.
///
/// Both ranges split into full blocks of the configured size plus a
/// remainder; the four (regular/remainder)² regions are walked row-major
/// with `i` innermost-but-one. `skip` breaks the inner `j` run only — never
/// the enclosing `j`-block loop — so a monotone predicate short-circuits
/// exactly the tail of each block.
pub(crate) fn blocked_multiplication<M, S>(
    mult: &mut M,
    start1: usize,
    end1: usize,
    start2: usize,
    end2: usize,
    skip: &S,
) -> Result<(), MultiplyError>
where
    M: FnMut(usize, usize) -> Result<(), MultiplyError>,
    S: Fn(usize, usize) -> bool,
{
    debug_assert!(start1 <= end1);
    debug_assert!(start2 <= end2);
    let bsize = tuning::get_multiplication_block_size();
    let nblocks1 = (end1 - start1) / bsize;
    let nblocks2 = (end2 - start2) / bsize;
    let i_ir_start = nblocks1 * bsize + start1;
    let j_ir_start = nblocks2 * bsize + start2;
    for n1 in 0..nblocks1 {
        let i_start = n1 * bsize + start1;
        let i_end = i_start + bsize;
        // regulars × regulars
        for n2 in 0..nblocks2 {
            let j_start = n2 * bsize + start2;
            let j_end = j_start + bsize;
            for i in i_start..i_end {
                for j in j_start..j_end {
                    if skip(i, j) {
                        break;
                    }
                    mult(i, j)?;
                }
            }
        }
        // regulars × remainder
        for i in i_start..i_end {
            for j in j_ir_start..end2 {
                if skip(i, j) {
                    break;
                }
                mult(i, j)?;
            }
        }
    }
    // remainder × regulars
    for n2 in 0..nblocks2 {
        let j_start = n2 * bsize + start2;
        let j_end = j_start + bsize;
        for i in i_ir_start..end1 {
            for j in j_start..j_end {
                if skip(i, j) {
                    break;
                }
                mult(i, j)?;
            }
        }
    }
    // remainder × remainder
    for i in i_ir_start..end1 {
        for j in j_ir_start..end2 {
            if skip(i, j) {
                break;
            }
            mult(i, j)?;
        }
    }
    Ok(())
}

/// Integer square root by Newton iteration.
fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let bits = 128 - n.leading_zeros();
    let mut x = 1u128 << bits.div_ceil(2);
    loop {
        let y = (x + n / x) / 2;
        if y >= x {
            return x;
        }
        x = y;
    }
}
