use anyhow::{Context, Result};
use clap::Parser;
use deft::instance::load_instance;
use deft::{is_exchangeable, Algorithm};
use std::path::PathBuf;
use std::time::Instant;

/// How many times the decision is repeated behind the reported mean.
const RUNS: u32 = 3;

/// Decides exchangeability of one instance file and prints
/// `MEAN_TIME_NS,ISEQ_BOOL` on a single stdout line.
///
/// Nothing else is ever written to stdout; errors go to stderr with a
/// non-zero exit. Wall-clock timeouts are the invoking driver's business.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Instance file holding the factor pair.
    path: PathBuf,

    /// Decision algorithm: naive, filter, or deft.
    algo: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let algorithm: Algorithm = args.algo.parse()?;
    let (_resolver, instance) = load_instance(&args.path)
        .with_context(|| format!("cannot load instance {}", args.path.display()))?;

    let mut verdict = false;
    let start = Instant::now();
    for _ in 0..RUNS {
        verdict = is_exchangeable(algorithm, &instance.first, &instance.second);
    }
    let mean_ns = start.elapsed().as_nanos() / u128::from(RUNS);

    println!("{},{}", mean_ns, verdict);
    Ok(())
}
