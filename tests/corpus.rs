use deft::instance::{generate, load_instance, save_instance, GenParams, PotentialKind, DEFAULT_SEED};
use deft::{is_exchangeable_deft, is_exchangeable_deft_with_limit};
use tempfile::tempdir;

fn sample_params() -> Vec<GenParams> {
    let mut sample = Vec::new();
    for kind in [
        PotentialKind::Asc,
        PotentialKind::Same,
        PotentialKind::Mixed { p: 0.2 },
        PotentialKind::Mixed { p: 0.8 },
    ] {
        for iseq in [true, false] {
            for n in [2, 5, 8] {
                sample.push(GenParams {
                    n,
                    iseq,
                    kind,
                    seed: DEFAULT_SEED,
                });
            }
        }
    }
    sample
}

#[test]
fn instances_survive_the_disk_round_trip() {
    let dir = tempdir().unwrap();
    for params in sample_params() {
        let (resolver, instance) = generate(&params);
        let path = dir.path().join(params.name());
        save_instance(&path, &resolver, &instance).unwrap();

        let (read_resolver, read_back) = load_instance(&path).unwrap();
        assert_eq!(read_back, instance, "{} changed on disk", params.name());

        // The names read back too, under the same ids.
        for (position, id) in instance.first.args().iter().enumerate() {
            assert_eq!(
                read_resolver.resolve(&read_back.first.args().get(position)),
                resolver.resolve(&id),
            );
        }
    }
}

#[test]
fn missing_files_are_reported_as_errors() {
    let dir = tempdir().unwrap();
    assert!(load_instance(dir.path().join("no-such-instance")).is_err());
}

#[test]
fn truncated_files_are_reported_as_errors() {
    let dir = tempdir().unwrap();
    let params = GenParams {
        n: 4,
        iseq: true,
        kind: PotentialKind::Asc,
        seed: DEFAULT_SEED,
    };
    let (resolver, instance) = generate(&params);
    let path = dir.path().join(params.name());
    save_instance(&path, &resolver, &instance).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let truncated = dir.path().join("truncated");
    std::fs::write(&truncated, &bytes[..bytes.len() / 2]).unwrap();
    assert!(load_instance(&truncated).is_err());
}

#[test]
fn every_bucket_limit_reaches_the_same_verdict() {
    for params in sample_params() {
        let (_, instance) = generate(&params);
        let expected = is_exchangeable_deft(&instance.first, &instance.second);
        assert_eq!(expected, params.iseq, "{}", params.name());
        for limit in [0, 1, 3, 17] {
            assert_eq!(
                is_exchangeable_deft_with_limit(&instance.first, &instance.second, limit),
                expected,
                "limit {} diverged on {}",
                limit,
                params.name(),
            );
        }
    }
}
