//! Instance files and corpus generation.
//!
//! An instance is a pair of factors written to disk as an opaque binary blob;
//! the only contract is that a written instance reads back equal, bit-exact
//! potentials and argument order included. Variable names are interned while
//! reading, so the factors in memory carry cheap copyable ids and the resolver
//! travels alongside them for anything that needs the names back.
//!
//! The generator produces the benchmark corpus: for each arity there is an
//! `asc` pair (all potentials distinct), a `same` pair (all potentials equal)
//! and a family of `mixed` pairs in between, each in an exchangeable and a
//! non-exchangeable variant.

use crate::{ArgList, Assignment, Factor};
use lasso::{Key, MiniSpur, Rodeo, RodeoResolver};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::iter;
use std::path::Path;
use thiserror::Error;

/// The ways reading or writing an instance file can fail.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The underlying reader or writer failed.
    #[error("instance i/o failed: {0}")]
    Io(#[from] io::Error),

    /// The bytes did not decode as an instance.
    #[error("malformed instance file: {0}")]
    Codec(#[from] bincode::Error),

    /// A factor's potential list does not cover its assignment space.
    #[error("factor `{name}` has {got} potentials, expected {expected}")]
    WrongPotentialCount {
        /// Name of the offending factor.
        name: String,
        /// The `2^n` potentials the argument list calls for.
        expected: usize,
        /// The number of potentials actually present.
        got: usize,
    },

    /// A factor referenced a variable index outside the declared universe.
    #[error("factor `{name}` references undeclared variable #{index}")]
    BadVariableReference {
        /// Name of the offending factor.
        name: String,
        /// The out-of-range index.
        index: usize,
    },
}

/// A pair of factors as loaded from, or destined for, an instance file.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    /// The reference factor.
    pub first: Factor<MiniSpur>,
    /// The factor whose arguments the deciders try to permute into `first`.
    pub second: Factor<MiniSpur>,
}

/// On-disk shape of one factor: argument names are stored once in the
/// enclosing [`RawInstance`] and referenced by index, and potentials are laid
/// out in canonical assignment order so no keys need to be stored at all.
#[derive(Deserialize, Serialize)]
struct RawFactor {
    name: String,
    args: Vec<u16>,
    potentials: Vec<f64>,
}

#[derive(Deserialize, Serialize)]
struct RawInstance {
    /// Every variable name, in interning order, shared by both factors.
    variables: Vec<String>,
    first: RawFactor,
    second: RawFactor,
}

impl RawFactor {
    fn of(factor: &Factor<MiniSpur>) -> RawFactor {
        RawFactor {
            name: factor.name().to_owned(),
            args: factor.args().iter().map(|id| id.into_usize() as u16).collect(),
            potentials: Assignment::enumerate(factor.arity())
                .map(|c| factor.potential(&c))
                .collect(),
        }
    }

    fn into_factor(self, ids: &[MiniSpur]) -> Result<Factor<MiniSpur>, InstanceError> {
        let mut args = Vec::with_capacity(self.args.len());
        for index in self.args {
            let index = index as usize;
            match ids.get(index) {
                Some(id) => args.push(*id),
                None => {
                    return Err(InstanceError::BadVariableReference {
                        name: self.name,
                        index,
                    })
                }
            }
        }
        let expected = 1usize << args.len();
        if self.potentials.len() != expected {
            return Err(InstanceError::WrongPotentialCount {
                name: self.name,
                expected,
                got: self.potentials.len(),
            });
        }
        Ok(Factor::new(
            self.name,
            ArgList::new(&args),
            Assignment::enumerate(args.len()).zip(self.potentials),
        ))
    }
}

/// Writes an instance to the given writer.
///
/// The resolver must be the one the instance's variable ids were interned
/// with; the file stores every name it knows about, in id order, so that
/// reading assigns the same ids back.
pub fn write_instance<W: Write>(
    writer: W,
    resolver: &RodeoResolver<MiniSpur>,
    instance: &Instance,
) -> Result<(), InstanceError> {
    let variables = (0..resolver.len())
        .map(|index| {
            let id = MiniSpur::try_from_usize(index).expect("resolver id out of MiniSpur range");
            resolver.resolve(&id).to_owned()
        })
        .collect();
    let raw = RawInstance {
        variables,
        first: RawFactor::of(&instance.first),
        second: RawFactor::of(&instance.second),
    };
    bincode::serialize_into(writer, &raw)?;
    Ok(())
}

/// Reads an instance from the given reader, interning its variable names.
pub fn read_instance<R: Read>(
    reader: R,
) -> Result<(RodeoResolver<MiniSpur>, Instance), InstanceError> {
    let raw: RawInstance = bincode::deserialize_from(reader)?;
    let mut rodeo: Rodeo<MiniSpur> = Rodeo::new();
    let ids: Vec<MiniSpur> = raw
        .variables
        .iter()
        .map(|name| rodeo.get_or_intern(name))
        .collect();
    let first = raw.first.into_factor(&ids)?;
    let second = raw.second.into_factor(&ids)?;
    Ok((rodeo.into_resolver(), Instance { first, second }))
}

/// Writes an instance to a file; see [`write_instance`].
pub fn save_instance(
    path: impl AsRef<Path>,
    resolver: &RodeoResolver<MiniSpur>,
    instance: &Instance,
) -> Result<(), InstanceError> {
    write_instance(BufWriter::new(File::create(path)?), resolver, instance)
}

/// Reads an instance from a file; see [`read_instance`].
pub fn load_instance(
    path: impl AsRef<Path>,
) -> Result<(RodeoResolver<MiniSpur>, Instance), InstanceError> {
    read_instance(BufReader::new(File::open(path)?))
}

/// The seed the benchmark corpus is generated under.
pub const DEFAULT_SEED: u64 = 123;

/// The arities the corpus sweeps over.
pub const CORPUS_SIZES: [usize; 8] = [2, 4, 6, 8, 10, 12, 14, 16];

/// The probabilities the `mixed` family sweeps over.
pub const MIXED_PROBABILITIES: [f64; 5] = [0.1, 0.2, 0.5, 0.8, 0.9];

/// How the potentials of a generated factor pair are filled in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PotentialKind {
    /// Potentials enumerate `1, 2, …, 2^n` in canonical assignment order.
    Asc,
    /// Every potential is the constant 1.
    Same,
    /// Each potential is 1 with probability `p`, else the next value of a
    /// running counter, so a tunable share of the table collides.
    Mixed {
        /// Probability of writing the constant instead of the counter.
        p: f64,
    },
}

/// Everything that determines one generated instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenParams {
    /// Arity of both factors.
    pub n: usize,
    /// Whether the pair is exchangeable; when false, one potential of the
    /// second factor is perturbed out of range.
    pub iseq: bool,
    /// How the potential table is filled.
    pub kind: PotentialKind,
    /// Seed for the generator's private PRNG.
    pub seed: u64,
}

impl GenParams {
    /// The canonical file name for this instance, e.g. `asc-n=04-true` or
    /// `mixed-n=08-p=0.5-false`.
    pub fn name(&self) -> String {
        match self.kind {
            PotentialKind::Asc => format!("asc-n={:02}-{}", self.n, self.iseq),
            PotentialKind::Same => format!("same-n={:02}-{}", self.n, self.iseq),
            PotentialKind::Mixed { p } => {
                format!("mixed-n={:02}-p={}-{}", self.n, p, self.iseq)
            }
        }
    }
}

/// Generates one instance.
///
/// The second factor starts as a deep copy of the first; a non-exchangeable
/// pair gets one uniformly chosen potential of the second factor replaced by
/// `original + 2^n`, which no unperturbed potential can equal. Both factors'
/// argument orders are then shuffled, with the table keys rewritten to match,
/// so the pair's exchangeability is exactly `params.iseq` but never trivially
/// visible from the argument order.
///
/// All randomness comes from a `StdRng` seeded with `params.seed` and local to
/// this call, so equal parameters produce equal instances.
pub fn generate(params: &GenParams) -> (RodeoResolver<MiniSpur>, Instance) {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut rodeo: Rodeo<MiniSpur> = Rodeo::new();
    let ids: Vec<MiniSpur> = (1..=params.n)
        .map(|i| rodeo.get_or_intern(format!("R{i}")))
        .collect();
    let args = ArgList::new(&ids);
    let cells = 1usize << params.n;

    let mut potentials: Vec<f64> = match params.kind {
        PotentialKind::Asc => (1..=cells).map(|i| i as f64).collect(),
        PotentialKind::Same => vec![1.0; cells],
        PotentialKind::Mixed { p } => {
            let mut counter = 2.0;
            (0..cells)
                .map(|_| {
                    if rng.gen_bool(p) {
                        1.0
                    } else {
                        let value = counter;
                        counter += 1.0;
                        value
                    }
                })
                .collect()
        }
    };

    let first = Factor::new(
        "f1",
        args.clone(),
        Assignment::enumerate(params.n).zip(potentials.iter().copied()),
    );
    if !params.iseq {
        let perturbed = rng.gen_range(0..cells);
        potentials[perturbed] += cells as f64;
    }
    let second = Factor::new(
        "f2",
        args,
        Assignment::enumerate(params.n).zip(potentials.iter().copied()),
    );

    let mut instance = Instance { first, second };
    let mut perm: Vec<usize> = (0..params.n).collect();
    perm.shuffle(&mut rng);
    instance.first.permute(&perm);
    perm.shuffle(&mut rng);
    instance.second.permute(&perm);
    (rodeo.into_resolver(), instance)
}

/// Enumerates the parameters of the full benchmark corpus under one seed:
/// every arity in [`CORPUS_SIZES`] crossed with every potential kind (with
/// [`MIXED_PROBABILITIES`] for the mixed family) and both values of `iseq`.
pub fn corpus(seed: u64) -> impl Iterator<Item = GenParams> {
    CORPUS_SIZES.into_iter().flat_map(move |n| {
        let kinds = iter::once(PotentialKind::Asc)
            .chain(iter::once(PotentialKind::Same))
            .chain(
                MIXED_PROBABILITIES
                    .into_iter()
                    .map(|p| PotentialKind::Mixed { p }),
            );
        kinds.flat_map(move |kind| {
            [true, false]
                .into_iter()
                .map(move |iseq| GenParams { n, iseq, kind, seed })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_corpus_convention() {
        let asc = GenParams {
            n: 4,
            iseq: true,
            kind: PotentialKind::Asc,
            seed: DEFAULT_SEED,
        };
        assert_eq!(asc.name(), "asc-n=04-true");

        let mixed = GenParams {
            n: 12,
            iseq: false,
            kind: PotentialKind::Mixed { p: 0.5 },
            seed: DEFAULT_SEED,
        };
        assert_eq!(mixed.name(), "mixed-n=12-p=0.5-false");
    }

    #[test]
    fn generation_is_deterministic() {
        let params = GenParams {
            n: 6,
            iseq: false,
            kind: PotentialKind::Mixed { p: 0.2 },
            seed: DEFAULT_SEED,
        };
        let (_, a) = generate(&params);
        let (_, b) = generate(&params);
        assert_eq!(a, b);
    }

    #[test]
    fn perturbation_changes_exactly_one_potential() {
        let params = GenParams {
            n: 4,
            iseq: false,
            kind: PotentialKind::Asc,
            seed: DEFAULT_SEED,
        };
        let (_, instance) = generate(&params);
        // Argument orders were shuffled independently, so compare multisets:
        // exactly one of the second factor's potentials has no counterpart.
        let mut remaining: Vec<f64> = Assignment::enumerate(4)
            .map(|c| instance.first.potential(&c))
            .collect();
        let unmatched: Vec<f64> = Assignment::enumerate(4)
            .map(|c| instance.second.potential(&c))
            .filter(|p| match remaining.iter().position(|r| r == p) {
                Some(at) => {
                    remaining.swap_remove(at);
                    false
                }
                None => true,
            })
            .collect();
        assert_eq!(unmatched.len(), 1);
        assert!(unmatched[0] > 16.0);
    }

    #[test]
    fn round_trip_preserves_the_instance() {
        let params = GenParams {
            n: 5,
            iseq: true,
            kind: PotentialKind::Mixed { p: 0.5 },
            seed: DEFAULT_SEED,
        };
        let (resolver, instance) = generate(&params);
        let mut buffer = Vec::new();
        write_instance(&mut buffer, &resolver, &instance).unwrap();
        let (read_resolver, read_back) = read_instance(buffer.as_slice()).unwrap();
        assert_eq!(read_back, instance);
        assert_eq!(read_resolver.len(), resolver.len());
    }

    #[test]
    fn corpus_sweeps_every_parameter_combination() {
        let all: Vec<GenParams> = corpus(DEFAULT_SEED).collect();
        // 8 arities × (asc + same + 5 mixed) × 2 parities.
        assert_eq!(all.len(), 8 * 7 * 2);
        assert!(all.iter().any(|p| p.name() == "same-n=16-false"));
    }
}
