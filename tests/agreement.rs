//! The brute-force deciders are the ground truth; this suite checks that the
//! bucket-guided decider never disagrees with them over the generated corpus
//! at every arity small enough for the factorial search to finish.

use deft::instance::{generate, GenParams, PotentialKind, DEFAULT_SEED};
use deft::{is_exchangeable, Algorithm};

macro_rules! check_size {
    ($($name:ident)*) => {
        $(
        #[test]
        fn $name() {
            check((stringify!($name).as_bytes().last().unwrap() - b'0') as usize);
        }
        )*
    }
}

check_size! {
    agreement_over_2
    agreement_over_3
    agreement_over_4
    agreement_over_5
    agreement_over_6
}

fn check(n: usize) {
    let kinds = [
        PotentialKind::Asc,
        PotentialKind::Same,
        PotentialKind::Mixed { p: 0.1 },
        PotentialKind::Mixed { p: 0.5 },
        PotentialKind::Mixed { p: 0.9 },
    ];

    for kind in kinds {
        for iseq in [true, false] {
            let params = GenParams {
                n,
                iseq,
                kind,
                seed: DEFAULT_SEED,
            };
            let (_, instance) = generate(&params);

            let naive = is_exchangeable(Algorithm::Naive, &instance.first, &instance.second);
            let filter = is_exchangeable(Algorithm::Filter, &instance.first, &instance.second);
            let deft = is_exchangeable(Algorithm::Deft, &instance.first, &instance.second);

            // The deciders must agree with each other...
            assert_eq!(naive, filter, "filter diverged on {}", params.name());
            assert_eq!(naive, deft, "deft diverged on {}", params.name());
            // ...and with the way the instance was constructed.
            assert_eq!(naive, iseq, "wrong verdict on {}", params.name());
        }
    }
}
