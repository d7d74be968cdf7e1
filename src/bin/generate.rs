use anyhow::{Context, Result};
use clap::Parser;
use deft::instance::{corpus, generate, save_instance, DEFAULT_SEED};
use std::fs;
use std::path::PathBuf;

/// Writes the benchmark corpus of instance files under their canonical names.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Directory the instance files are written into.
    #[arg(long, default_value = "instances")]
    out: PathBuf,

    /// Restrict generation to these arities, comma separated.
    #[arg(long, value_delimiter = ',')]
    sizes: Option<Vec<usize>>,

    /// Seed for instance generation.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    fs::create_dir_all(&args.out)
        .with_context(|| format!("cannot create {}", args.out.display()))?;

    let mut written = 0usize;
    for params in corpus(args.seed) {
        if let Some(sizes) = &args.sizes {
            if !sizes.contains(&params.n) {
                continue;
            }
        }
        let (resolver, instance) = generate(&params);
        let path = args.out.join(params.name());
        save_instance(&path, &resolver, &instance)
            .with_context(|| format!("cannot write {}", path.display()))?;
        written += 1;
    }

    println!("wrote {} instances into {}", written, args.out.display());
    Ok(())
}
