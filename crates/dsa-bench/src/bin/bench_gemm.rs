//! GEMM throughput benchmark: software reference vs register-driven path.
//!
//! Square K = N = M problems with random S8 operands and per-row bias. The
//! MMIO column runs against the emulated device unless `--hw DEVICE` is
//! given, so on a workstation it measures driver overhead (staging,
//! register programming, polling, readback) on top of the reference kernel.
//!
//! Usage:
//!   cargo run --release --bin bench_gemm
//!   cargo run --release --bin bench_gemm -- --sizes 8,32,96 --iterations 50
//!   cargo run --release --bin bench_gemm -- --hw /dev/uio0

use anyhow::{Context, Result};
use dsa_driver::{select_backend, BackendSelection, GemmBackend, Lhs, MatmulConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const DEFAULT_SIZES: [usize; 5] = [4, 16, 32, 64, 128];
const DEFAULT_ITERATIONS: usize = 20;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let iterations = match flag_value(&args, "--iterations") {
        Some(v) => v.parse::<usize>().with_context(|| format!("bad value `{v}` for --iterations"))?,
        None => DEFAULT_ITERATIONS,
    }
    .max(1);
    let sizes = match flag_value(&args, "--sizes") {
        Some(v) => parse_sizes(v)?,
        None => DEFAULT_SIZES.to_vec(),
    };
    let hw = flag_value(&args, "--hw");

    let mut software = select_backend(BackendSelection::Software, "")?;
    let mut mmio = match hw {
        Some(device) => select_backend(BackendSelection::Mmio, device)?,
        None => select_backend(BackendSelection::Emulated, "")?,
    };

    println!("GEMM throughput");
    println!("===============");
    println!("Reference : {}", software.backend_type());
    println!("MMIO      : {}  ({})", mmio.backend_type(), mmio.capabilities());
    println!("Iterations: {iterations}");
    println!();
    println!(
        "  {:>5}  {:>12}  {:>10}  {:>12}  {:>10}  {:>8}",
        "size", "ref µs", "ref MMAC/s", "mmio µs", "mmio MMAC/s", "match"
    );

    let mut rng = StdRng::seed_from_u64(0xD5A);
    for &size in &sizes {
        if size == 0 {
            continue;
        }
        let lhs: Vec<i8> = (0..size * size).map(|_| rng.gen()).collect();
        let rhs: Vec<i8> = (0..size * size).map(|_| rng.gen()).collect();
        let bias: Vec<i32> = (0..size).map(|_| rng.gen_range(-10_000..=10_000)).collect();
        let problem = Problem { size, lhs: &lhs, rhs: &rhs, bias: &bias };

        let (ref_us, ref_out) = problem.time(software.as_mut(), iterations)?;
        let macs = (size * size * size) as f64;
        match problem.time(mmio.as_mut(), iterations) {
            Ok((mmio_us, mmio_out)) => println!(
                "  {:>5}  {:>12.1}  {:>10.1}  {:>12.1}  {:>10.1}  {:>8}",
                size,
                ref_us,
                macs / ref_us,
                mmio_us,
                macs / mmio_us,
                if ref_out == mmio_out { "✓" } else { "✗" }
            ),
            Err(e) => println!(
                "  {:>5}  {:>12.1}  {:>10.1}  {:>12}  {:>10}  {:>8}    ({e})",
                size,
                ref_us,
                macs / ref_us,
                "-",
                "-",
                "-"
            ),
        }
    }

    Ok(())
}

struct Problem<'a> {
    size: usize,
    lhs: &'a [i8],
    rhs: &'a [i8],
    bias: &'a [i32],
}

impl Problem<'_> {
    /// Mean µs per GEMM and the output of the last run.
    fn time(&self, backend: &mut dyn GemmBackend, iterations: usize) -> Result<(f64, Vec<i8>)> {
        let d = self.size as u32;
        let mut dst = vec![0i8; self.size * self.size];
        let mut run = |dst: &mut [i8]| {
            let mut cfg = MatmulConfig::new(d, d, d, Lhs::S8(self.lhs), self.rhs, dst)
                .with_bias(self.bias)
                .with_requant(1 << 14, 20);
            backend.execute(&mut cfg)
        };

        // warmup
        run(&mut dst)?;
        let t0 = Instant::now();
        for _ in 0..iterations {
            run(&mut dst)?;
        }
        let us = t0.elapsed().as_secs_f64() * 1e6 / iterations as f64;
        Ok((us, dst))
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_sizes(list: &str) -> Result<Vec<usize>> {
    list.split(',')
        .map(|s| {
            s.trim()
                .parse::<usize>()
                .with_context(|| format!("bad size `{s}` in --sizes"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_parse_strictly() {
        assert_eq!(parse_sizes("8, 32,96").unwrap(), vec![8, 32, 96]);
        assert!(parse_sizes("8,x").is_err());
        assert!(parse_sizes("").is_err());
    }
}
