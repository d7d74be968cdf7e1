use anyhow::{bail, Context, Result};
use clap::Parser;
use csv_core::{ReadFieldResult, ReaderBuilder};
use statrs::statistics::{Data, Distribution, Max, Min, OrderStatistics};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::str;

/// Summarizes a results file of per-instance runtimes.
///
/// The input has `instance,n,iseq,type,algo,time` rows where `time` is either
/// milliseconds or the literal `timeout`. Rows are grouped by everything but
/// the instance, and each surviving group is reduced to
/// `type,n,iseq,algo,min,max,mean,median,std` on stdout. A group containing
/// even one timeout says nothing about its distribution, so it is dropped
/// entirely.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Results file to aggregate.
    results: PathBuf,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
struct GroupKey {
    kind: String,
    n: u32,
    iseq: bool,
    algo: String,
}

#[derive(Default)]
struct Group {
    times: Vec<f64>,
    timed_out: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let file = File::open(&args.results)
        .with_context(|| format!("cannot open {}", args.results.display()))?;
    let groups = collect_groups(file)?;
    print!("{}", render(groups));
    Ok(())
}

fn collect_groups<I: Read>(mut input: I) -> Result<BTreeMap<GroupKey, Group>> {
    let mut inputbuf = [0; 16384];
    let mut fieldbuf = [0; 1024];
    let mut fieldlen = 0;
    let mut record = Vec::new();
    let mut groups = BTreeMap::new();
    let mut csv = ReaderBuilder::new().build();

    loop {
        let read = input.read(&mut inputbuf)?;
        let mut bytes = &inputbuf[..read];
        loop {
            let (result, nin, nout) = csv.read_field(bytes, &mut fieldbuf[fieldlen..]);
            bytes = &bytes[nin..];
            fieldlen += nout;
            match result {
                ReadFieldResult::InputEmpty => break,
                ReadFieldResult::OutputFull => {
                    bail!("field too long on line {}", csv.line());
                }
                ReadFieldResult::Field { record_end } => {
                    let field = str::from_utf8(&fieldbuf[..fieldlen])
                        .with_context(|| format!("line {} is not utf-8", csv.line()))?;
                    record.push(field.to_owned());
                    fieldlen = 0;

                    if record_end {
                        tally(&record, &mut groups)
                            .with_context(|| format!("bad record on line {}", csv.line()))?;
                        record.clear();
                    }
                }
                ReadFieldResult::End => return Ok(groups),
            }
        }
    }
}

fn tally(record: &[String], groups: &mut BTreeMap<GroupKey, Group>) -> Result<()> {
    if record.first().map(String::as_str) == Some("instance") {
        return Ok(());
    }
    let [_, n, iseq, kind, algo, time] = record else {
        bail!("expected 6 fields, got {}", record.len());
    };

    let key = GroupKey {
        kind: kind.clone(),
        n: n.parse()?,
        iseq: iseq.parse()?,
        algo: algo.clone(),
    };
    let group = groups.entry(key).or_default();
    if time == "timeout" {
        group.timed_out = true;
    } else {
        group.times.push(time.parse()?);
    }
    Ok(())
}

fn render(groups: BTreeMap<GroupKey, Group>) -> String {
    let mut out = String::from("type,n,iseq,algo,min,max,mean,median,std\n");
    for (key, group) in groups {
        if group.timed_out {
            continue;
        }
        let mut data = Data::new(group.times);
        let mean = data.mean().expect("group is never empty");
        let std = data.std_dev().unwrap_or(f64::NAN);
        let median = data.median();
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            key.kind,
            key.n,
            key.iseq,
            key.algo,
            data.min(),
            data.max(),
            mean,
            median,
            std,
        )
        .expect("writing to a string cannot fail");
    }
    out
}
