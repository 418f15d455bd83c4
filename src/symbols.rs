//! Ordered symbol sets
//!
//! A [`SymbolSet`] is the ordered list of variable names shared by every term
//! of a series. The set fixes the arity and the positional meaning of the
//! exponents: position `i` of any exponent vector always refers to
//! `set.name(i)`.
//!
//! ## Invariants
//!
//! - Names are **distinct** and stored in **ascending lexicographic order**.
//!   Every constructor enforces this; a `SymbolSet` observed anywhere else in
//!   the crate can be assumed well-formed.
//! - Merging two sets yields the ordered union together with the index maps
//!   needed to lift exponent vectors from either input set into the union.
//!   Lifting inserts zero exponents at the freshly introduced positions, so
//!   it never changes the monomial a key denotes.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors surfaced while building or combining symbol sets.
#[derive(Debug, thiserror::Error)]
pub enum SymbolError {
    /// A constructor received names that are not strictly increasing.
    #[error("symbol names must be distinct and ordered (offending name: {0:?})")]
    Unordered(String),
    /// A name lookup failed.
    #[error("symbol {0:?} is not part of the set")]
    Unknown(String),
}

/// Ordered set of distinct variable names.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct SymbolSet {
    names: Vec<String>,
}

/// Result of merging two symbol sets: the ordered union plus the positional
/// maps lifting either input into it.
///
/// `map_left[i]` is the position inside `merged` of the `i`-th name of the
/// left input (similarly `map_right`). Both maps are strictly increasing.
#[derive(Clone, Debug)]
pub struct SymbolMerge {
    /// Ordered union of the two input sets.
    pub merged: SymbolSet,
    /// Lift map for the left input.
    pub map_left: Vec<usize>,
    /// Lift map for the right input.
    pub map_right: Vec<usize>,
}

/// Which operand of a [`SymbolMerge`] a key belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergeSide {
    /// The key belongs to the left input set.
    Left,
    /// The key belongs to the right input set.
    Right,
}

impl SymbolMerge {
    /// Lift map for the given side.
    #[inline]
    pub fn map(&self, side: MergeSide) -> &[usize] {
        match side {
            MergeSide::Left => &self.map_left,
            MergeSide::Right => &self.map_right,
        }
    }
}

impl SymbolSet {
    /// Empty set (arity 0).
    pub fn empty() -> Self {
        Self { names: Vec::new() }
    }

    /// Build a set from names that are already distinct and ordered.
    pub fn new<I, S>(names: I) -> Result<Self, SymbolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        for w in names.windows(2) {
            if w[0] >= w[1] {
                return Err(SymbolError::Unordered(w[1].clone()));
            }
        }
        Ok(Self { names })
    }

    /// Build a set from arbitrary names, sorting and deduplicating.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    /// Singleton set.
    pub fn single(name: impl Into<String>) -> Self {
        Self { names: vec![name.into()] }
    }

    /// Number of symbols (the arity of any compatible monomial).
    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name at position `i`, if any.
    #[inline]
    pub fn name(&self, i: usize) -> Option<&str> {
        self.names.get(i).map(String::as_str)
    }

    /// All names, in order.
    #[inline]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Position of `name` in the set.
    #[inline]
    pub fn position(&self, name: &str) -> Option<usize> {
        // The set is ordered, binary search is exact.
        self.names.binary_search_by(|n| n.as_str().cmp(name)).ok()
    }

    /// Resolve a list of names into ordered positions, erroring on unknowns.
    pub fn positions_of(&self, names: &[String]) -> Result<Vec<usize>, SymbolError> {
        let mut out = Vec::with_capacity(names.len());
        for n in names {
            match self.position(n) {
                Some(p) => out.push(p),
                None => return Err(SymbolError::Unknown(n.clone())),
            }
        }
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }

    /// Ordered union of `self` and `other`, with the lift maps for both.
    pub fn merge(&self, other: &SymbolSet) -> SymbolMerge {
        let mut merged = Vec::with_capacity(self.names.len() + other.names.len());
        let mut map_left = Vec::with_capacity(self.names.len());
        let mut map_right = Vec::with_capacity(other.names.len());
        let (mut i, mut j) = (0usize, 0usize);
        while i < self.names.len() || j < other.names.len() {
            let take_left = match (self.names.get(i), other.names.get(j)) {
                (Some(a), Some(b)) => a <= b,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => unreachable!(),
            };
            if take_left {
                if other.names.get(j) == self.names.get(i) {
                    map_right.push(merged.len());
                    j += 1;
                }
                map_left.push(merged.len());
                merged.push(self.names[i].clone());
                i += 1;
            } else {
                map_right.push(merged.len());
                merged.push(other.names[j].clone());
                j += 1;
            }
        }
        SymbolMerge { merged: SymbolSet { names: merged }, map_left, map_right }
    }
}

impl PartialOrd for SymbolSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SymbolSet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.names.cmp(&other.names)
    }
}

impl fmt::Display for SymbolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names.join(", "))
    }
}

impl TryFrom<Vec<String>> for SymbolSet {
    type Error = SymbolError;
    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        SymbolSet::new(names)
    }
}

impl From<SymbolSet> for Vec<String> {
    fn from(s: SymbolSet) -> Vec<String> {
        s.names
    }
}
