#![warn(missing_docs)]
#![doc(test(no_crate_inject))]
#![doc(test(attr(deny(unused, future_incompatible))))]

//! This crate decides *exchangeability* of discrete factors over Boolean random
//! variables: given two potential tables, is there a permutation of one factor's
//! argument list under which its table becomes identical to the other's?
//!
//! Three deciders are provided, because comparing them is the point:
//!
//! - [`is_exchangeable_naive`]: brute force over all `n!` argument permutations.
//! - [`is_exchangeable_filter`]: the same search, guarded by a cheap necessary
//!   condition on potential multisets grouped by assignment signature.
//! - [`is_exchangeable_deft`]: the DEFT algorithm, which intersects per-bucket
//!   position-swap constraints and then backtracks over the surviving candidate
//!   permutations, as described by:
//!
//!   - Luttermann, Braun, Gehrke and Möller, [Efficient Detection of
//!     Exchangeable Factors in Factor Graphs][deft], 2024
//!
//! [deft]: https://arxiv.org/abs/2403.10167
//!
//! The naive and filter deciders act as the ground-truth oracle against which
//! DEFT is validated; all three always agree on the answer, and differ only in
//! how much of the permutation space they have to touch to find it.

use itertools::Itertools;
use lasso::{LargeSpur, MicroSpur, MiniSpur, Spur};
use smallvec::SmallVec;
use sorted_iter::assume::AssumeSortedByItemExt;
use sorted_iter::sorted_iterator::SortedByItem;
use sorted_iter::SortedIterator;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::iter;
use std::mem;
use std::str::FromStr;
use thiserror::Error;

pub mod instance;

/// Types which can be used as variable identifiers in an [`ArgList`].
pub trait VariableId: Sized + Copy + std::hash::Hash + Ord {
    /// SmallVec contains two `usize` fields which overlap with the inline
    /// vector, so argument lists will have minimum size if this array occupies
    /// the same number of bytes.
    ///
    /// It can be declared like this for any implementation, or you can have the
    /// [`variable_id!`] macro do it for you.
    ///
    /// ```ignore
    /// use std::mem::size_of;
    /// type SmallArray = [Self; 2 * size_of::<usize>() / size_of::<Self>()];
    /// ```
    type SmallArray: smallvec::Array<Item = Self> + Clone + std::fmt::Debug + std::hash::Hash + Ord;
}

/// Generates implementations of the [`VariableId`] trait which set the
/// associated `SmallArray` type to the biggest array that will fit within a
/// [`SmallVec`][smallvec::SmallVec]'s minimum size.
///
/// It also generates a test with the given `$testname` that checks that the
/// generated definition is as small as the smallest `SmallVec`.
///
/// This library provides implementations for the basic unsigned integer types
/// using this declaration:
///
/// ```ignore
/// variable_id![unsigned_id_size, u8, u16, u32, u64, usize];
/// ```
#[macro_export]
macro_rules! variable_id {
    ($testname:ident, $($t:ty),*) => {
        $(
            impl $crate::VariableId for $t {
                type SmallArray = [
                    Self;
                    2 * ::std::mem::size_of::<usize>() / ::std::mem::size_of::<Self>()
                ];
            }
        )*

        #[cfg(test)]
        #[test]
        fn $testname() {
            use $crate::ArgList;
            use smallvec::SmallVec;
            use std::mem::size_of;
            $(
                assert_eq!(
                    size_of::<ArgList<$t>>(),
                    size_of::<SmallVec<[(); 0]>>()
                );
            )*
        }
    };
}

variable_id![lasso_id_size, LargeSpur, Spur, MiniSpur, MicroSpur];
variable_id![unsigned_id_size, u8, u16, u32, u64, usize];
variable_id![signed_id_size, i8, i16, i32, i64, isize];

/// An ordered list of Boolean random variables, the argument sequence of a
/// [`Factor`].
///
/// Unlike a variable *set*, order is semantic here: position `j` of the list
/// corresponds to component `j` of every [`Assignment`] in the factor's table.
/// Duplicates are not collapsed.
///
/// This implementation avoids heap allocations for lists containing a number
/// of variables smaller than the length of [`VariableId::SmallArray`].
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ArgList<V: VariableId>(SmallVec<V::SmallArray>);

impl<V: VariableId> ArgList<V> {
    /// Creates an argument list containing the given variables, in the given
    /// order.
    pub fn new(ids: &[V]) -> Self {
        ArgList(SmallVec::from_slice(ids))
    }

    /// The number of arguments in the list.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the list has no arguments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The variable at the given position.
    ///
    /// # Panics
    ///
    /// Panics if `position` is out of bounds.
    pub fn get(&self, position: usize) -> V {
        self.0[position]
    }

    /// Returns an iterator over the arguments in list order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = V> + Clone + '_ {
        self.0.iter().copied()
    }

    /// The position of the given variable in the list, or `None` if it does
    /// not appear.
    ///
    /// ```
    /// use deft::ArgList;
    ///
    /// let args = ArgList::new(&[7u8, 3, 5]);
    /// assert_eq!(args.position(&3), Some(1));
    /// assert_eq!(args.position(&4), None);
    /// ```
    pub fn position(&self, id: &V) -> Option<usize> {
        self.0.iter().position(|v| v == id)
    }
}

impl<V: VariableId + fmt::Debug> fmt::Debug for ArgList<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl<V: VariableId> iter::FromIterator<V> for ArgList<V> {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        ArgList(SmallVec::from_iter(iter))
    }
}

/// A complete assignment of Boolean values to the arguments of a factor,
/// matched positionally to its [`ArgList`].
///
/// Sixteen Booleans fit in the same two machine words that SmallVec needs for
/// its heap pointer, so assignments over up to 16 variables never allocate.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Assignment(SmallVec<[bool; 16]>);

impl Assignment {
    /// Creates an assignment from a slice of values.
    pub fn new(values: &[bool]) -> Self {
        Assignment(SmallVec::from_slice(values))
    }

    /// The number of values in the assignment.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the assignment is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The value at the given position.
    ///
    /// # Panics
    ///
    /// Panics if `position` is out of bounds.
    pub fn get(&self, position: usize) -> bool {
        self.0[position]
    }

    /// Returns an iterator over the values in positional order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = bool> + Clone + '_ {
        self.0.iter().copied()
    }

    /// The signature of this assignment: how many of its values are true and
    /// how many are false.
    ///
    /// ```
    /// use deft::{Assignment, Signature};
    ///
    /// let c = Assignment::new(&[true, false, true]);
    /// assert_eq!(c.signature(), Signature { trues: 2, falses: 1 });
    /// ```
    pub fn signature(&self) -> Signature {
        let trues = self.0.iter().filter(|v| **v).count() as u8;
        Signature {
            trues,
            falses: self.0.len() as u8 - trues,
        }
    }

    /// Rearranges the assignment under a permutation of positions: component
    /// `j` of the result is component `perm[j]` of `self`.
    ///
    /// # Panics
    ///
    /// Panics if `perm` indexes out of bounds.
    pub fn permuted(&self, perm: &[usize]) -> Assignment {
        debug_assert_eq!(perm.len(), self.len());
        perm.iter().map(|&j| self.0[j]).collect()
    }

    /// Enumerates every complete assignment of the given arity, in the
    /// canonical order used throughout this crate: the first argument is most
    /// significant, and `true` sorts before `false`.
    ///
    /// Every component that walks a factor's table uses this order, so bucket
    /// contents, recorded configurations and search traces are reproducible
    /// run over run.
    ///
    /// ```
    /// use deft::Assignment;
    ///
    /// let order: Vec<String> = Assignment::enumerate(2).map(|c| c.to_string()).collect();
    /// assert_eq!(order, ["TT", "TF", "FT", "FF"]);
    /// ```
    pub fn enumerate(
        arity: usize,
    ) -> impl ExactSizeIterator<Item = Assignment> + iter::FusedIterator + Clone {
        assert!((arity as u32) < usize::BITS);
        (0..1usize << arity).map(move |index| {
            (0..arity)
                .map(|position| index >> (arity - 1 - position) & 1 == 0)
                .collect()
        })
    }
}

impl iter::FromIterator<bool> for Assignment {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        Assignment(SmallVec::from_iter(iter))
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for value in self.0.iter() {
            f.write_str(if *value { "T" } else { "F" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The signature of an assignment: its count of true and false values.
///
/// For Boolean arguments the second component is redundant with the first, but
/// keeping the pair leaves room for ranges with more than two values. Ordering
/// is lexicographic on `(trues, falses)`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Signature {
    /// How many components of the assignment are true.
    pub trues: u8,
    /// How many components of the assignment are false.
    pub falses: u8,
}

/// A discrete factor: a named mapping from complete Boolean assignments of an
/// ordered argument list to real-valued potentials.
///
/// A factor is *valid* when every one of the `2^n` assignments over its `n`
/// arguments is present in the table; see [`Factor::is_valid`]. The deciders
/// in this crate never panic on invalid factors, they simply answer `false`,
/// because a missing assignment can never compare equal to anything.
///
/// Cloning a factor deep-copies its table, so every algorithm works on its own
/// copy and callers can re-run a different algorithm on untouched inputs.
///
/// ```
/// use deft::{ArgList, Assignment, Factor};
///
/// let f = Factor::new(
///     "f1",
///     ArgList::new(&[1u8, 2]),
///     Assignment::enumerate(2).zip([1.0, 2.0, 3.0, 4.0]),
/// );
/// assert_eq!(f.arity(), 2);
/// assert_eq!(f.potential(&Assignment::new(&[false, true])), 3.0);
/// assert!(f.is_valid());
/// ```
#[derive(Clone, PartialEq)]
pub struct Factor<V: VariableId> {
    name: String,
    args: ArgList<V>,
    table: HashMap<Assignment, f64>,
}

impl<V: VariableId> Factor<V> {
    /// Creates a factor from a list of `(assignment, potential)` entries.
    ///
    /// If the same assignment appears more than once, the last entry wins.
    pub fn new<I>(name: impl Into<String>, args: ArgList<V>, entries: I) -> Self
    where
        I: IntoIterator<Item = (Assignment, f64)>,
    {
        let mut table = HashMap::new();
        for (assignment, potential) in entries {
            table.insert(assignment, potential);
        }
        Factor {
            name: name.into(),
            args,
            table,
        }
    }

    /// The factor's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The factor's ordered argument list.
    pub fn args(&self) -> &ArgList<V> {
        &self.args
    }

    /// The number of arguments of the factor.
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// The potential mapped to the given assignment, or NaN if the assignment
    /// is not present in the table.
    ///
    /// NaN compares unequal to everything including itself, so lookups on
    /// invalid factors poison every downstream equality test instead of
    /// raising an error.
    pub fn potential(&self, assignment: &Assignment) -> f64 {
        self.table.get(assignment).copied().unwrap_or(f64::NAN)
    }

    /// Returns `true` if every one of the `2^n` assignments over the factor's
    /// arguments is mapped to a potential.
    pub fn is_valid(&self) -> bool {
        Assignment::enumerate(self.arity()).all(|c| self.table.contains_key(&c))
    }

    /// Reorders the argument list under a permutation of positions and
    /// rewrites every assignment key to match, leaving potentials untouched.
    ///
    /// Position `j` of the rearranged factor takes the argument (and the
    /// assignment component) previously at position `perm[j]`; equivalently,
    /// the keys are rewritten by the inverse of the positional move. Applying
    /// `perm` and then its inverse restores the original factor exactly.
    ///
    /// ```
    /// use deft::{ArgList, Assignment, Factor};
    ///
    /// let mut f = Factor::new(
    ///     "f1",
    ///     ArgList::new(&[1u8, 2]),
    ///     Assignment::enumerate(2).zip([1.0, 2.0, 3.0, 4.0]),
    /// );
    /// f.permute(&[1, 0]);
    /// assert_eq!(f.args().iter().collect::<Vec<_>>(), [2, 1]);
    /// // The table moved with the arguments: the meaning is unchanged.
    /// assert_eq!(f.potential(&Assignment::new(&[false, true])), 2.0);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `perm` indexes out of bounds.
    pub fn permute(&mut self, perm: &[usize]) {
        debug_assert_eq!(perm.len(), self.arity());
        debug_assert!(is_permutation(perm));
        self.args = perm.iter().map(|&j| self.args.0[j]).collect();
        let table = mem::take(&mut self.table);
        self.table = table
            .into_iter()
            .map(|(assignment, potential)| (assignment.permuted(perm), potential))
            .collect();
    }
}

impl<V> fmt::Debug for Factor<V>
where
    V: VariableId + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Table entries print in canonical assignment order so that debug
        // output is reproducible; the backing map iterates in hash order.
        struct Entries<'a, V: VariableId>(&'a Factor<V>);

        impl<V: VariableId> fmt::Debug for Entries<'_, V> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut map = f.debug_map();
                for c in Assignment::enumerate(self.0.arity()) {
                    if let Some(potential) = self.0.table.get(&c) {
                        map.entry(&c, potential);
                    }
                }
                map.finish()
            }
        }

        f.debug_struct("Factor")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("table", &Entries(self))
            .finish()
    }
}

fn is_permutation(perm: &[usize]) -> bool {
    let mut seen = perm.to_vec();
    seen.sort_unstable();
    seen.iter().copied().eq(0..perm.len())
}

/// Groups a factor's potentials by the signature of their assignments,
/// reducing each group to a canonically sorted multiset.
///
/// Two exchangeable factors have equal multisets for every signature; the
/// converse does not hold, which is exactly the gap the DEFT constraints
/// close. This shape is what the filter decider compares.
///
/// ```
/// use deft::{buckets, ArgList, Assignment, Factor, Signature};
///
/// let f = Factor::new(
///     "f1",
///     ArgList::new(&[1u8, 2]),
///     Assignment::enumerate(2).zip([1.0, 2.0, 3.0, 4.0]),
/// );
/// let grouped = buckets(&f);
/// assert_eq!(grouped[&Signature { trues: 1, falses: 1 }], [2.0, 3.0]);
/// ```
pub fn buckets<V: VariableId>(factor: &Factor<V>) -> BTreeMap<Signature, Vec<f64>> {
    let mut grouped = BTreeMap::new();
    for c in Assignment::enumerate(factor.arity()) {
        grouped
            .entry(c.signature())
            .or_insert_with(Vec::new)
            .push(factor.potential(&c));
    }
    for values in grouped.values_mut() {
        values.sort_by(|a, b| a.total_cmp(b));
    }
    grouped
}

/// One bucket of a factor: the potentials sharing an assignment signature,
/// together with the configurations that produced them.
///
/// `potentials[i]` is the factor's value at `configurations[i]`; the two
/// sequences are aligned index for index, in canonical enumeration order.
#[derive(Clone, Debug)]
pub struct Bucket {
    /// The signature shared by every configuration in this bucket.
    pub signature: Signature,
    /// The potentials of the bucket, in canonical enumeration order.
    pub potentials: Vec<f64>,
    /// The configurations the potentials were read from, aligned with
    /// `potentials`.
    pub configurations: Vec<Assignment>,
}

/// The buckets of one factor, in a fixed processing order.
#[derive(Clone, Debug)]
pub struct BucketList(Vec<Bucket>);

impl BucketList {
    /// The number of buckets.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no buckets.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns an iterator over the buckets in processing order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Bucket> + Clone + '_ {
        self.0.iter()
    }

    /// Finds the bucket with the given signature, if any.
    pub fn get(&self, signature: Signature) -> Option<&Bucket> {
        // At most n+1 signatures exist for arity n, so a scan beats a map.
        self.0.iter().find(|b| b.signature == signature)
    }
}

/// Groups a factor's table into [`Bucket`]s.
///
/// Buckets appear in first-insertion order under the canonical assignment
/// enumeration. When `sort_by_freedom` is set they are instead ordered by
/// ascending [`degree_of_freedom`], most constraining first, so that
/// constraint intersection prunes as early as possible; the sort is stable, so
/// ties keep their first-insertion order.
pub fn buckets_ordered<V: VariableId>(factor: &Factor<V>, sort_by_freedom: bool) -> BucketList {
    let mut list: Vec<Bucket> = Vec::with_capacity(factor.arity() + 1);
    for c in Assignment::enumerate(factor.arity()) {
        let signature = c.signature();
        let bucket = match list.iter_mut().find(|b| b.signature == signature) {
            Some(bucket) => bucket,
            None => {
                list.push(Bucket {
                    signature,
                    potentials: Vec::new(),
                    configurations: Vec::new(),
                });
                list.last_mut().unwrap()
            }
        };
        bucket.potentials.push(factor.potential(&c));
        bucket.configurations.push(c);
    }
    if sort_by_freedom {
        list.sort_by(|a, b| {
            degree_of_freedom(&a.potentials).total_cmp(&degree_of_freedom(&b.potentials))
        });
    }
    BucketList(list)
}

/// The degree of freedom of a bucket's potential sequence: the product over
/// its distinct values of how often each occurs.
///
/// A bucket of all-distinct values has degree 1 and pins positions hardest; a
/// homogeneous bucket has the highest possible degree and pins nothing.
/// Computed in floating point because the product overflows any integer width
/// long before buckets get large.
///
/// ```
/// use deft::degree_of_freedom;
///
/// assert_eq!(degree_of_freedom(&[3.0, 5.0, 2.0]), 1.0);
/// assert_eq!(degree_of_freedom(&[6.0, 4.0, 6.0]), 2.0);
/// assert_eq!(degree_of_freedom(&[1.0, 1.0, 1.0]), 6.0);
/// ```
pub fn degree_of_freedom(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut product = 1.0;
    let mut run = 0usize;
    for (i, value) in sorted.iter().enumerate() {
        run += 1;
        if i + 1 == sorted.len() || sorted[i + 1].total_cmp(value) != Ordering::Equal {
            product *= run as f64;
            run = 0;
        }
    }
    product
}

fn multiset(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Searches every permutation of `subject`'s argument positions for one under
/// which its table coincides with `target`'s, and applies the first such
/// permutation to `subject` in place.
///
/// Permutations are tried in lexicographic order, so the first match is
/// deterministic. Returns `false`, leaving `subject` untouched, if no
/// permutation works or the arities differ.
///
/// This is the `O(n! · 2^n)` ground truth the bucket-guided decider is
/// validated against; it only scales to eight or so arguments.
///
/// ```
/// use deft::{permute_to_match, ArgList, Assignment, Factor};
///
/// let mut f1 = Factor::new(
///     "f1",
///     ArgList::new(&[1u8, 2]),
///     Assignment::enumerate(2).zip([1.0, 2.0, 3.0, 4.0]),
/// );
/// // The same relationship with the arguments listed the other way around.
/// let f2 = Factor::new(
///     "f2",
///     ArgList::new(&[2u8, 1]),
///     Assignment::enumerate(2).zip([1.0, 3.0, 2.0, 4.0]),
/// );
/// assert!(permute_to_match(&mut f1, &f2));
/// assert_eq!(f1.potential(&Assignment::new(&[true, false])), 3.0);
/// ```
pub fn permute_to_match<V: VariableId>(subject: &mut Factor<V>, target: &Factor<V>) -> bool {
    if subject.arity() != target.arity() {
        return false;
    }
    let n = subject.arity();
    let found = (0..n).permutations(n).find(|perm| {
        Assignment::enumerate(n)
            .all(|c| subject.potential(&c) == target.potential(&c.permuted(perm)))
    });
    match found {
        Some(perm) => {
            subject.permute(&perm);
            true
        }
        None => false,
    }
}

/// Decides exchangeability by brute force.
///
/// Arity mismatch is answered immediately; otherwise the permutation search
/// runs on a deep copy, leaving both inputs untouched.
pub fn is_exchangeable_naive<V: VariableId>(first: &Factor<V>, second: &Factor<V>) -> bool {
    if first.arity() != second.arity() {
        return false;
    }
    let mut own = first.clone();
    permute_to_match(&mut own, second)
}

/// Decides exchangeability by brute force, after rejecting pairs whose
/// [`buckets`] differ.
///
/// Bucket multiset equality is necessary for exchangeability, so the filter
/// never changes the answer; it only skips the factorial search on pairs that
/// cannot possibly match.
pub fn is_exchangeable_filter<V: VariableId>(first: &Factor<V>, second: &Factor<V>) -> bool {
    if first.arity() != second.arity() {
        return false;
    }
    if buckets(first) != buckets(second) {
        return false;
    }
    let mut own = first.clone();
    permute_to_match(&mut own, second)
}

/// How many buckets, in ascending degree-of-freedom order, the DEFT constraint
/// construction inspects before handing over to the backtracking search.
///
/// The final full-table verification makes any limit sound; the limit only
/// trades constraint-propagation work against search work.
/// [`is_exchangeable_deft_with_limit`] accepts other limits.
pub const DEFAULT_BUCKET_LIMIT: usize = 5;

/// Decides exchangeability with the DEFT algorithm using
/// [`DEFAULT_BUCKET_LIMIT`].
///
/// ```
/// use deft::{is_exchangeable_deft, ArgList, Assignment, Factor};
///
/// let f1 = Factor::new(
///     "f1",
///     ArgList::new(&[1u8, 2]),
///     Assignment::enumerate(2).zip([1.0, 2.0, 3.0, 4.0]),
/// );
/// let f2 = Factor::new(
///     "f2",
///     ArgList::new(&[2u8, 1]),
///     Assignment::enumerate(2).zip([1.0, 3.0, 2.0, 4.0]),
/// );
/// assert!(is_exchangeable_deft(&f1, &f2));
/// ```
pub fn is_exchangeable_deft<V: VariableId>(first: &Factor<V>, second: &Factor<V>) -> bool {
    is_exchangeable_deft_with_limit(first, second, DEFAULT_BUCKET_LIMIT)
}

/// Decides exchangeability with the DEFT algorithm, inspecting at most
/// `bucket_limit` buckets during constraint construction.
///
/// A limit of zero skips constraint propagation entirely and degenerates to a
/// verified backtracking search over all position mappings; any limit yields
/// the same answer, because every candidate permutation is re-verified against
/// the full tables before it is accepted.
pub fn is_exchangeable_deft_with_limit<V: VariableId>(
    first: &Factor<V>,
    second: &Factor<V>,
    bucket_limit: usize,
) -> bool {
    if first.arity() != second.arity() {
        return false;
    }
    let own1 = first.clone();
    let own2 = second.clone();
    let constraints = match swap_constraints(&own1, &own2, bucket_limit) {
        Some(constraints) => constraints,
        None => return false,
    };
    search_permutation(&constraints, &own1, &own2)
}

/// A sorted set of argument positions, the candidate targets one position may
/// be mapped to.
///
/// Stored as a sorted, deduplicated inline vector so that the set algebra can
/// run on merge iterators; positions never exceed the factor arity, so `u8`
/// components keep sixteen of them in two machine words.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct PositionSet(SmallVec<[u8; 16]>);

impl PositionSet {
    /// Every position of a factor with the given arity.
    fn full(arity: usize) -> Self {
        PositionSet((0..arity as u8).collect())
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = u8> + SortedByItem + Clone + '_ {
        self.0.iter().copied().assume_sorted_by_item()
    }

    fn intersect_with(&mut self, other: &PositionSet) {
        let merged: SmallVec<[u8; 16]> = self.iter().intersection(other.iter()).collect();
        self.0 = merged;
    }

    fn union_with(&mut self, other: &PositionSet) {
        let merged: SmallVec<[u8; 16]> = self.iter().union(other.iter()).collect();
        self.0 = merged;
    }
}

/// The positions at which each Boolean value occurs within one configuration,
/// sorted ascending.
struct ValuePositions {
    trues: PositionSet,
    falses: PositionSet,
}

impl ValuePositions {
    fn of(row: &Assignment) -> Self {
        let mut trues = SmallVec::new();
        let mut falses = SmallVec::new();
        for (position, value) in row.iter().enumerate() {
            if value {
                trues.push(position as u8);
            } else {
                falses.push(position as u8);
            }
        }
        ValuePositions {
            trues: PositionSet(trues),
            falses: PositionSet(falses),
        }
    }

    fn get(&self, value: bool) -> &PositionSet {
        if value {
            &self.trues
        } else {
            &self.falses
        }
    }
}

/// A map from each argument position of one factor to the set of positions of
/// the other factor it may still be swapped to.
///
/// The map always carries one entry per position; `constrained` distinguishes
/// the initial all-empty state (no information yet) from a genuinely emptied
/// entry (contradiction).
#[derive(Clone, Debug)]
struct SwapConstraints {
    sets: Vec<PositionSet>,
    constrained: bool,
}

impl SwapConstraints {
    fn unconstrained(arity: usize) -> Self {
        SwapConstraints {
            sets: vec![PositionSet::default(); arity],
            constrained: false,
        }
    }

    /// The no-information constraint where every position may map anywhere.
    fn full(arity: usize) -> Self {
        SwapConstraints {
            sets: vec![PositionSet::full(arity); arity],
            constrained: true,
        }
    }

    fn len(&self) -> usize {
        self.sets.len()
    }

    fn set(&self, position: usize) -> &PositionSet {
        &self.sets[position]
    }

    /// Narrows this map by another, key-wise, adopting `other` outright if no
    /// information has been collected yet. Returns `false` as soon as any
    /// entry becomes empty.
    ///
    /// The intersection is driven by this map's keys; both maps always cover
    /// exactly the positions `0..arity`, which is asserted rather than
    /// handled.
    fn constrain(&mut self, other: &SwapConstraints) -> bool {
        assert_eq!(self.sets.len(), other.sets.len());
        if !self.constrained {
            self.clone_from(other);
            return self.sets.iter().all(|set| !set.is_empty());
        }
        for (mine, theirs) in self.sets.iter_mut().zip(&other.sets) {
            mine.intersect_with(theirs);
            if mine.is_empty() {
                return false;
            }
        }
        true
    }
}

/// Builds the position-swap constraints between two factors of equal arity, or
/// `None` if some inspected bucket already rules out exchangeability.
///
/// Buckets of `second` are visited in ascending degree-of-freedom order and at
/// most `bucket_limit` of them contribute; `first`'s buckets are looked up by
/// signature. Configurations are recorded under the same canonical enumeration
/// in both factors, so `second`'s configuration list serves for both sides.
fn swap_constraints<V: VariableId>(
    first: &Factor<V>,
    second: &Factor<V>,
    bucket_limit: usize,
) -> Option<SwapConstraints> {
    let n = first.arity();
    let b1 = buckets_ordered(first, false);
    let b2 = buckets_ordered(second, true);

    let mut factor_set = SwapConstraints::unconstrained(n);
    for ours in b2.iter().take(bucket_limit) {
        let theirs = b1.get(ours.signature)?;
        if multiset(&theirs.potentials) != multiset(&ours.potentials) {
            return None;
        }

        let homogeneous = ours.potentials.windows(2).all(|w| w[0] == w[1]);
        let bucket_set = if homogeneous {
            // Every entry matches every other; this bucket cannot narrow
            // anything, so don't bother walking its cross product.
            SwapConstraints::full(n)
        } else {
            let mut bucket_set = SwapConstraints::unconstrained(n);
            for (index, &value) in ours.potentials.iter().enumerate() {
                let row = &ours.configurations[index];
                let mut item_set = SwapConstraints::unconstrained(n);
                for (k, &other_value) in theirs.potentials.iter().enumerate() {
                    if other_value != value {
                        continue;
                    }
                    let positions = ValuePositions::of(&ours.configurations[k]);
                    for p in 0..n {
                        item_set.sets[p].union_with(positions.get(row.get(p)));
                    }
                }
                item_set.constrained = true;
                if !bucket_set.constrain(&item_set) {
                    return None;
                }
            }
            bucket_set
        };

        if !factor_set.constrain(&bucket_set) {
            return None;
        }
    }

    if !factor_set.constrained {
        // Nothing was inspected (limit zero); fall back to an unconstrained
        // search, which the leaf verification keeps sound.
        factor_set = SwapConstraints::full(n);
    }
    Some(factor_set)
}

/// Backtracks over the candidate position mappings admitted by `constraints`,
/// verifying each complete injective mapping against the full tables.
///
/// Positions are assigned in ascending order and candidates are tried in
/// sorted set order, so the search tree is the same on every run.
fn search_permutation<V: VariableId>(
    constraints: &SwapConstraints,
    reference: &Factor<V>,
    candidate: &Factor<V>,
) -> bool {
    fn descend<V: VariableId>(
        constraints: &SwapConstraints,
        reference: &Factor<V>,
        candidate: &Factor<V>,
        rule: &mut Vec<usize>,
        used: &mut [bool],
    ) -> bool {
        let depth = rule.len();
        if depth == constraints.len() {
            // The used-target pruning makes the complete rule injective, hence
            // a permutation over 0..n.
            debug_assert!(is_permutation(rule));
            let mut perm: Vec<usize> = (0..depth).collect();
            for (position, &target) in rule.iter().enumerate() {
                perm[target] = position;
            }
            let mut moved = candidate.clone();
            moved.permute(&perm);
            return tables_coincide(reference, &moved);
        }
        for target in constraints.set(depth).iter() {
            let target = target as usize;
            if used[target] {
                continue;
            }
            rule.push(target);
            used[target] = true;
            if descend(constraints, reference, candidate, rule, used) {
                return true;
            }
            used[target] = false;
            rule.pop();
        }
        false
    }

    let n = constraints.len();
    let mut rule = Vec::with_capacity(n);
    let mut used = vec![false; n];
    descend(constraints, reference, candidate, &mut rule, &mut used)
}

/// Returns `true` if both factors map every assignment to the same potential.
fn tables_coincide<V: VariableId>(a: &Factor<V>, b: &Factor<V>) -> bool {
    a.arity() == b.arity()
        && Assignment::enumerate(a.arity()).all(|c| a.potential(&c) == b.potential(&c))
}

/// Selects which decider [`is_exchangeable`] dispatches to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Algorithm {
    /// Brute force over all argument permutations.
    Naive,
    /// Brute force behind a bucket-multiset filter.
    Filter,
    /// Bucket-guided constraint propagation plus verified backtracking.
    Deft,
}

/// The error returned when parsing an [`Algorithm`] from an unrecognized name.
#[derive(Debug, Error)]
#[error("unknown algorithm `{0}`; expected `naive`, `filter`, or `deft`")]
pub struct UnknownAlgorithm(String);

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "naive" => Ok(Algorithm::Naive),
            "filter" => Ok(Algorithm::Filter),
            "deft" => Ok(Algorithm::Deft),
            other => Err(UnknownAlgorithm(other.to_owned())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Algorithm::Naive => "naive",
            Algorithm::Filter => "filter",
            Algorithm::Deft => "deft",
        })
    }
}

/// Decides whether two factors are exchangeable with the selected algorithm.
///
/// The inputs are borrowed read-only; every algorithm deep-copies what it
/// mutates, so the same pair can be re-submitted to a different algorithm.
///
/// ```
/// use deft::{is_exchangeable, Algorithm, ArgList, Assignment, Factor};
///
/// let f = Factor::new(
///     "f1",
///     ArgList::new(&[1u8, 2]),
///     Assignment::enumerate(2).zip([1.0, 2.0, 3.0, 4.0]),
/// );
/// for algorithm in [Algorithm::Naive, Algorithm::Filter, Algorithm::Deft] {
///     assert!(is_exchangeable(algorithm, &f, &f.clone()));
/// }
/// ```
pub fn is_exchangeable<V: VariableId>(
    algorithm: Algorithm,
    first: &Factor<V>,
    second: &Factor<V>,
) -> bool {
    match algorithm {
        Algorithm::Naive => is_exchangeable_naive(first, second),
        Algorithm::Filter => is_exchangeable_filter(first, second),
        Algorithm::Deft => is_exchangeable_deft(first, second),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factor(name: &str, args: &[u8], potentials: &[f64]) -> Factor<u8> {
        Factor::new(
            name,
            ArgList::new(args),
            Assignment::enumerate(args.len()).zip(potentials.iter().copied()),
        )
    }

    #[test]
    fn enumeration_is_true_first_and_most_significant_first() {
        let order: Vec<String> = Assignment::enumerate(3).map(|c| c.to_string()).collect();
        assert_eq!(
            order,
            ["TTT", "TTF", "TFT", "TFF", "FTT", "FTF", "FFT", "FFF"]
        );
    }

    #[test]
    fn signatures_count_both_values() {
        let c = Assignment::new(&[true, false, false, true]);
        assert_eq!(c.signature(), Signature { trues: 2, falses: 2 });
        assert_eq!(
            Assignment::new(&[false]).signature(),
            Signature { trues: 0, falses: 1 }
        );
    }

    #[test]
    fn permute_then_inverse_restores_the_factor() {
        let original = factor("f", &[1, 2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let perm = [2usize, 0, 1];
        let mut inverse = [0usize; 3];
        for (j, &p) in perm.iter().enumerate() {
            inverse[p] = j;
        }

        let mut moved = original.clone();
        moved.permute(&perm);
        assert_ne!(moved, original);
        moved.permute(&inverse);
        assert_eq!(moved, original);
    }

    #[test]
    fn bucket_sizes_are_binomial_coefficients() {
        let f = factor("f", &[1, 2, 3, 4], &[1.0; 16]);
        let grouped = buckets(&f);
        let sizes: Vec<usize> = grouped.values().map(Vec::len).collect();
        // Signatures ascend by trues: C(4,0)..C(4,4).
        assert_eq!(sizes, [1, 4, 6, 4, 1]);
    }

    #[test]
    fn ordered_buckets_keep_potentials_and_configurations_aligned() {
        let f = factor("f", &[1, 2], &[10.0, 20.0, 30.0, 40.0]);
        let list = buckets_ordered(&f, false);
        for bucket in list.iter() {
            assert_eq!(bucket.potentials.len(), bucket.configurations.len());
            for (potential, configuration) in bucket.potentials.iter().zip(&bucket.configurations)
            {
                assert_eq!(configuration.signature(), bucket.signature);
                assert_eq!(f.potential(configuration), *potential);
            }
        }
    }

    #[test]
    fn freedom_sort_is_stable_and_ascending() {
        // The repeated value in the middle bucket gives it degree 2; the
        // singleton buckets keep degree 1 and their first-insertion order.
        let f = factor("f", &[1, 2], &[9.0, 5.0, 5.0, 7.0]);
        let list = buckets_ordered(&f, true);
        let signatures: Vec<Signature> = list.iter().map(|b| b.signature).collect();
        assert_eq!(
            signatures,
            [
                Signature { trues: 2, falses: 0 },
                Signature { trues: 0, falses: 2 },
                Signature { trues: 1, falses: 1 },
            ]
        );
    }

    #[test]
    fn value_positions_are_sorted_by_position() {
        let row = Assignment::new(&[false, true, true, false]);
        let positions = ValuePositions::of(&row);
        assert_eq!(positions.get(true).iter().collect::<Vec<_>>(), [1, 2]);
        assert_eq!(positions.get(false).iter().collect::<Vec<_>>(), [0, 3]);
    }

    #[test]
    fn constrain_adopts_then_intersects() {
        let mut constraints = SwapConstraints::unconstrained(2);
        let mut narrow = SwapConstraints::full(2);
        narrow.sets[0] = PositionSet(SmallVec::from_slice(&[1]));

        assert!(constraints.constrain(&SwapConstraints::full(2)));
        assert!(constraints.constrain(&narrow));
        assert_eq!(constraints.set(0).len(), 1);
        assert_eq!(constraints.set(1).len(), 2);

        // Forcing position 0 to the disjoint candidate empties the entry.
        let mut disjoint = SwapConstraints::full(2);
        disjoint.sets[0] = PositionSet(SmallVec::from_slice(&[0]));
        assert!(!constraints.constrain(&disjoint));
    }

    #[test]
    fn homogeneous_factors_constrain_nothing() {
        let f1 = factor("f1", &[1, 2, 3, 4], &[1.0; 16]);
        let f2 = factor("f2", &[5, 6, 7, 8], &[1.0; 16]);
        let constraints = swap_constraints(&f1, &f2, DEFAULT_BUCKET_LIMIT).unwrap();
        for position in 0..4 {
            assert_eq!(constraints.set(position).len(), 4);
        }
    }

    #[test]
    fn distinct_potentials_pin_every_position() {
        // f2 relates to f1 by a three-cycle of its arguments; the buckets with
        // distinct potentials leave a single candidate per position.
        let f1 = factor("f1", &[1, 2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 6.0, 7.0]);
        let f2 = factor("f2", &[4, 5, 6], &[1.0, 3.0, 5.0, 6.0, 2.0, 4.0, 6.0, 7.0]);
        let constraints = swap_constraints(&f1, &f2, DEFAULT_BUCKET_LIMIT).unwrap();
        let candidates: Vec<Vec<u8>> = (0..3)
            .map(|p| constraints.set(p).iter().collect())
            .collect();
        assert_eq!(candidates, [vec![2], vec![0], vec![1]]);
        assert!(search_permutation(&constraints, &f1, &f2));
    }

    #[test]
    fn zero_bucket_limit_still_decides_correctly() {
        let f1 = factor("f1", &[1, 2], &[1.0, 2.0, 3.0, 4.0]);
        let f2 = factor("f2", &[2, 1], &[1.0, 3.0, 2.0, 4.0]);
        let different = factor("f2", &[2, 1], &[1.0, 3.0, 2.0, 5.0]);
        assert!(is_exchangeable_deft_with_limit(&f1, &f2, 0));
        assert!(!is_exchangeable_deft_with_limit(&f1, &different, 0));
    }

    #[test]
    fn invalid_factors_never_match() {
        let partial = Factor::new(
            "partial",
            ArgList::new(&[1u8, 2]),
            [(Assignment::new(&[true, true]), 1.0)],
        );
        assert!(!partial.is_valid());
        assert!(partial.potential(&Assignment::new(&[false, false])).is_nan());
        for algorithm in [Algorithm::Naive, Algorithm::Filter, Algorithm::Deft] {
            assert!(!is_exchangeable(algorithm, &partial, &partial.clone()));
        }
    }

    #[test]
    fn unknown_algorithm_names_fail_to_parse() {
        assert_eq!("deft".parse::<Algorithm>().unwrap(), Algorithm::Deft);
        assert!("DEFT".parse::<Algorithm>().is_err());
        assert!("".parse::<Algorithm>().is_err());
    }
}
