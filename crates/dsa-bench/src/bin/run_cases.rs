//! Randomised regression runner.
//!
//! Generates cases across every operand variant (S8/S16 lhs, row/column rhs,
//! per-tensor/per-channel, with and without bias), runs each once on the
//! selected backend and prints an accuracy summary. Failing cases can be
//! written out as JSON, next to an accumulator dump, and replayed with
//! `dsa run`.
//!
//! Usage:
//!   cargo run --bin run_cases
//!   cargo run --bin run_cases -- --iterations 1000 --seed 7
//!   cargo run --bin run_cases -- --backend mmio --device /dev/uio0
//!   cargo run --bin run_cases -- --save-failures failures/

use anyhow::{anyhow, Context, Result};
use dsa_driver::{
    run_case, select_backend, BackendSelection, BiasMode, CaseGenerator, GenOptions, LhsType,
    RhsLayout, SuiteReport, TestCase,
};
use rand::Rng;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const DEFAULT_ITERATIONS: usize = 200;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let iterations = parse_arg(&args, "--iterations")?.unwrap_or(DEFAULT_ITERATIONS);
    let seed: u64 = parse_arg(&args, "--seed")?.unwrap_or_else(|| rand::thread_rng().gen());
    let selection: BackendSelection = flag_value(&args, "--backend")
        .map(|s| s.parse::<BackendSelection>().map_err(|e| anyhow!(e)))
        .transpose()?
        .unwrap_or_default();
    let device = flag_value(&args, "--device").unwrap_or(dsa_driver::backends::DEFAULT_DEVICE);
    let save_dir = flag_value(&args, "--save-failures").map(PathBuf::from);

    let mut backend = select_backend(selection, device)?;

    println!("Randomised GEMM regression");
    println!("==========================");
    println!("Backend    : {}", backend.backend_type());
    println!("Iterations : {iterations}");
    println!("Seed       : {seed:#x}");
    println!();

    // one generator per operand variant, seeds derived from the run seed
    let mut generators = Vec::new();
    for (i, lhs_dtype) in [LhsType::S8, LhsType::S16].into_iter().enumerate() {
        for (j, rhs_layout) in [RhsLayout::RowMajor, RhsLayout::ColumnMajor].into_iter().enumerate() {
            for (l, per_channel) in [false, true].into_iter().enumerate() {
                let variant = (i * 4 + j * 2 + l) as u64;
                generators.push(CaseGenerator::new(GenOptions {
                    lhs_dtype,
                    rhs_layout,
                    per_channel,
                    bias: bias_for(variant),
                    max_dim: 32,
                    seed: Some(seed.wrapping_add(variant)),
                    ..GenOptions::default()
                })?);
            }
        }
    }

    let mut suite = SuiteReport::new();
    let t0 = Instant::now();
    for i in 0..iterations {
        let n_gen = generators.len();
        let case = generators[i % n_gen].generate();
        let report = run_case(backend.as_mut(), &case);
        if !report.passed() {
            println!("  ✗ {report}");
            for line in report.lines().iter().filter(|l| l.starts_with("[FAIL]")).take(4) {
                println!("      {line}");
            }
            if let Some(dir) = &save_dir {
                std::fs::create_dir_all(dir)?;
                let path = dir.join(format!("{}.json", case.name));
                case.save(&path).with_context(|| format!("saving {}", path.display()))?;
                let debug = dir.join(format!("{}.debug.txt", case.name));
                TestCase::save_debug(std::slice::from_ref(&case), &debug)
                    .with_context(|| format!("saving {}", debug.display()))?;
                println!("      saved {} and {}", path.display(), debug.display());
            }
        }
        suite.push(report);
    }
    let elapsed = t0.elapsed();

    let (ok, total) = suite.element_counts();
    println!();
    println!("Accuracy");
    println!("--------");
    println!("  cases    : {}/{}  ({:.2}%)", suite.passed(), suite.cases().len(), suite.accuracy() * 100.0);
    println!("  elements : {ok}/{total}");
    println!("  wall     : {:.2?}  ({:.1?} / case)", elapsed, elapsed / iterations.max(1) as u32);
    println!();
    println!("{}", suite.summary());

    if suite.exit_code() != 0 {
        std::process::exit(suite.exit_code());
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T>(args: &[String], flag: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    flag_value(args, flag)
        .map(|v| v.parse().map_err(|e| anyhow!("bad value `{v}` for {flag}: {e}")))
        .transpose()
}

/// Cycle no bias, zero bias and random bias across the operand variants.
const fn bias_for(variant: u64) -> BiasMode {
    match variant % 3 {
        0 => BiasMode::None,
        1 => BiasMode::Zero,
        _ => BiasMode::Random { range: 10_000 },
    }
}
