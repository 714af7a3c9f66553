// SPDX-License-Identifier: AGPL-3.0-only

//! Full Validation Suite: execution contract of the DSA GEMM
//!
//! Runs every contract check against a backend: the in-process emulator by
//! default, or a real device with `--hw`.
//!
//! ## Checks
//!
//! | # | Property | Pass condition |
//! |---|----------|----------------|
//! | 1 | Identity | `[[1,2],[3,4]] × I` with `mult = 1<<s`, `shift = s` returns lhs |
//! | 2 | Bias | `[10,-10]` shifts rows; `±1000` saturates to 127 / -128 |
//! | 3 | Zeros | all-zero operands give all-zero output |
//! | 4 | Zero dimension | K, N or M = 0 fails with INVALID_DIMENSIONS, dst untouched |
//! | 5 | Extent | exactly K×M written, stride gaps untouched |
//! | 6 | Determinism | 10 repeated runs byte-identical |
//! | 7 | Rounding | half-up, half-away, floor exact at .5 for both signs |
//! | 8 | Shift convention | signed shift left-shifts; right-only rejects negative |
//! | 9 | Per-channel | row-specific multiplier and shift |
//! |10 | Parity | 50 random cases byte-identical to the software reference |
//! |11 | Faults | device error / hang surface as DEVICE_FAULT / TIMEOUT, dst untouched |
//! |12 | SRAM | oversized job reports RESOURCE_EXHAUSTED |
//!
//! ## Usage
//!
//!   cargo run --bin validate_all                       # emulated device
//!   cargo run --bin validate_all -- --hw /dev/uio0     # hardware
//!   cargo run --bin validate_all -- --verbose          # detail for each check

use anyhow::Result;
use dsa_driver::{
    execute_on, run_case, select_backend, BackendSelection, CaseGenerator, EmulatedDsa,
    ExecutionStatus, Fault, GemmBackend, GenOptions, Lhs, LhsType, MatmulConfig, MmioBackend,
    MmioOptions, RequantPolicy, RhsLayout, Rounding, ShiftConvention, SoftwareBackend, TestCase,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const SENTINEL: i8 = 0x5a;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let hw = args.windows(2).find(|w| w[0] == "--hw").map(|w| w[1].clone());
    let verbose = args.iter().any(|a| a == "--verbose");

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  DSA GEMM Validation Suite                                   ║");
    println!("║  12 execution-contract checks                                ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let mut suite = ValidationSuite::new(hw, verbose);
    match suite.target() {
        Ok(backend) => {
            println!("Mode   : {}", backend.backend_type());
            println!("Device : {}", backend.capabilities());
        }
        Err(e) => {
            println!("Device open failed: {e}");
            println!("Re-run without --hw to use the emulated device.");
            std::process::exit(1);
        }
    }
    if suite.hw.is_none() {
        println!("Note: pass --hw DEVICE to validate real hardware");
    }
    println!();

    // ── 1: Identity ─────────────────────────────────────────────────────────
    suite.run("V1: Identity GEMM returns lhs for shifts 0..30", |s| {
        let mut backend = s.target()?;
        let failed: Vec<i32> = [0, 1, 8, 16, 24, 30]
            .into_iter()
            .filter(|&shift| !run_case(backend.as_mut(), &TestCase::identity(shift)).passed())
            .collect();
        Ok(ValidationResult {
            passed: failed.is_empty(),
            message: format!("failing shifts: {failed:?}"),
        })
    });

    // ── 2: Bias ─────────────────────────────────────────────────────────────
    suite.run("V2: Per-row bias shifts rows and saturates", |s| {
        let mut backend = s.target()?;
        let rows = run_case(backend.as_mut(), &TestCase::bias_rows());
        let sat = run_case(backend.as_mut(), &TestCase::bias_saturation());
        Ok(ValidationResult {
            passed: rows.passed() && sat.passed(),
            message: format!("{rows} | {sat}"),
        })
    });

    // ── 3: Zeros ────────────────────────────────────────────────────────────
    suite.run("V3: All-zero operands give all-zero output", |s| {
        let mut backend = s.target()?;
        let lhs = [0i8; 64];
        let rhs = [0i8; 64];
        let mut dst = [SENTINEL; 64];
        let status = execute_on(
            backend.as_mut(),
            &mut MatmulConfig::new(8, 8, 8, Lhs::S8(&lhs), &rhs, &mut dst).with_requant(77, 5),
        );
        Ok(ValidationResult {
            passed: status.is_success() && dst.iter().all(|&v| v == 0),
            message: format!("status {status}"),
        })
    });

    // ── 4: Zero dimension ───────────────────────────────────────────────────
    suite.run("V4: Zero dimension fails before any write", |s| {
        let mut backend = s.target()?;
        let lhs = [1i8; 4];
        let rhs = [1i8; 4];
        let mut statuses = Vec::new();
        let mut untouched = true;
        for (k, n, m) in [(0, 2, 2), (2, 0, 2), (2, 2, 0)] {
            let mut dst = [SENTINEL; 4];
            statuses.push(execute_on(
                backend.as_mut(),
                &mut MatmulConfig::new(k, n, m, Lhs::S8(&lhs), &rhs, &mut dst),
            ));
            untouched &= dst == [SENTINEL; 4];
        }
        Ok(ValidationResult {
            passed: untouched && statuses.iter().all(|&st| st == ExecutionStatus::InvalidDimensions),
            message: format!("statuses {statuses:?}, dst untouched: {untouched}"),
        })
    });

    // ── 5: Extent ───────────────────────────────────────────────────────────
    suite.run("V5: Exactly K×M elements written, stride gaps kept", |s| {
        let mut backend = s.target()?;
        let lhs = [1i8, 2, 3, 4, 5, 6];
        let rhs = [1i8; 6];
        let mut dst = [SENTINEL; 12];
        let status = execute_on(
            backend.as_mut(),
            &mut MatmulConfig::new(3, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst).with_strides(0, 0, 3),
        );
        let expected = [3, 3, SENTINEL, 7, 7, SENTINEL, 11, 11, SENTINEL, SENTINEL, SENTINEL, SENTINEL];
        Ok(ValidationResult {
            passed: status.is_success() && dst == expected,
            message: format!("status {status}, dst {dst:?}"),
        })
    });

    // ── 6: Determinism ──────────────────────────────────────────────────────
    suite.run("V6: Repeated runs are byte-identical", |s| {
        let mut backend = s.target()?;
        let case = CaseGenerator::new(GenOptions {
            min_dim: 8,
            max_dim: 16,
            seed: Some(6),
            ..GenOptions::default()
        })?
        .generate();
        let mut first = vec![0i8; case.dst_len()];
        backend.execute(&mut case.config(&mut first))?;
        let mut same = 0;
        for _ in 0..10 {
            let mut again = vec![0i8; case.dst_len()];
            backend.execute(&mut case.config(&mut again))?;
            same += usize::from(again == first);
        }
        Ok(ValidationResult {
            passed: same == 10,
            message: format!("{same}/10 runs identical"),
        })
    });

    // ── 7: Rounding ─────────────────────────────────────────────────────────
    suite.run("V7: Rounding modes exact at .5 boundaries", |s| {
        let mut backend = s.target()?;
        let lhs = [-5i8, -3, -1, 1, 3, 5];
        let rhs = [1i8];
        let mut mismatches = Vec::new();
        for (rounding, expected) in [
            (Rounding::HalfUp, [-2i8, -1, 0, 1, 2, 3]),
            (Rounding::HalfAwayFromZero, [-3, -2, -1, 1, 2, 3]),
            (Rounding::Floor, [-3, -2, -1, 0, 1, 2]),
        ] {
            let mut dst = [0i8; 6];
            let status = execute_on(
                backend.as_mut(),
                &mut MatmulConfig::new(6, 1, 1, Lhs::S8(&lhs), &rhs, &mut dst)
                    .with_requant(1, 1)
                    .with_policy(RequantPolicy::with_rounding(rounding)),
            );
            if status == ExecutionStatus::Unsupported {
                return Ok(ValidationResult {
                    passed: false,
                    message: format!("SKIP device lacks {rounding:?}"),
                });
            }
            if !status.is_success() || dst != expected {
                mismatches.push(format!("{rounding:?}: {status} {dst:?}"));
            }
        }
        Ok(ValidationResult {
            passed: mismatches.is_empty(),
            message: mismatches.join("; "),
        })
    });

    // ── 8: Shift convention ─────────────────────────────────────────────────
    suite.run("V8: Signed shift left-shifts, right-only rejects it", |s| {
        let mut backend = s.target()?;
        let lhs = [3i8];
        let rhs = [1i8];
        let mut dst = [SENTINEL];
        let rejected = execute_on(
            backend.as_mut(),
            &mut MatmulConfig::new(1, 1, 1, Lhs::S8(&lhs), &rhs, &mut dst).with_requant(1, -2),
        );
        let signed = RequantPolicy {
            shift: ShiftConvention::Signed,
            ..RequantPolicy::default()
        };
        let status = execute_on(
            backend.as_mut(),
            &mut MatmulConfig::new(1, 1, 1, Lhs::S8(&lhs), &rhs, &mut dst)
                .with_requant(1, -2)
                .with_policy(signed),
        );
        if status == ExecutionStatus::Unsupported {
            return Ok(ValidationResult {
                passed: false,
                message: "SKIP device lacks signed shift".into(),
            });
        }
        Ok(ValidationResult {
            passed: rejected == ExecutionStatus::InvalidQuantization && status.is_success() && dst == [12],
            message: format!("right-only: {rejected}, signed: {status} {dst:?}"),
        })
    });

    // ── 9: Per-channel ──────────────────────────────────────────────────────
    suite.run("V9: Per-channel requant uses row parameters", |s| {
        let mut backend = s.target()?;
        let lhs = [1i8, 2, 3, 4];
        let rhs = [1i8, 0, 0, 1];
        let mults = [1i32, 3];
        let shifts = [0i32, 1];
        let mut dst = [0i8; 4];
        let status = execute_on(
            backend.as_mut(),
            &mut MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst).with_per_channel(&mults, &shifts),
        );
        if status == ExecutionStatus::Unsupported {
            return Ok(ValidationResult {
                passed: false,
                message: "SKIP device lacks per-channel".into(),
            });
        }
        Ok(ValidationResult {
            passed: status.is_success() && dst == [1, 2, 5, 6],
            message: format!("status {status}, dst {dst:?}"),
        })
    });

    // ── 10: Parity ──────────────────────────────────────────────────────────
    suite.run("V10: 50 random cases match the software reference", |s| {
        let mut backend = s.target()?;
        let mut reference = SoftwareBackend::new();
        let variants = [
            (LhsType::S8, false, RhsLayout::RowMajor),
            (LhsType::S16, false, RhsLayout::RowMajor),
            (LhsType::S8, true, RhsLayout::ColumnMajor),
            (LhsType::S16, true, RhsLayout::ColumnMajor),
            (LhsType::S8, true, RhsLayout::RowMajor),
        ];
        let mut matched = 0;
        let mut total = 0;
        for (i, (lhs_dtype, per_channel, rhs_layout)) in variants.into_iter().enumerate() {
            let cases = CaseGenerator::new(GenOptions {
                lhs_dtype,
                per_channel,
                rhs_layout,
                max_dim: 24,
                seed: Some(1000 + i as u64),
                ..GenOptions::default()
            })?;
            for case in cases.take(10) {
                let mut got = vec![0i8; case.dst_len()];
                let mut want = vec![0i8; case.dst_len()];
                let status = execute_on(backend.as_mut(), &mut case.config(&mut got));
                reference.execute(&mut case.config(&mut want))?;
                total += 1;
                matched += usize::from(status.is_success() && got == want && want == case.expected);
            }
        }
        Ok(ValidationResult {
            passed: matched == total,
            message: format!("{matched}/{total} cases byte-identical"),
        })
    });

    // ── 11: Faults ──────────────────────────────────────────────────────────
    suite.run("V11: Device error and hang leave dst untouched", |s| {
        if s.hw.is_some() {
            return Ok(ValidationResult {
                passed: false,
                message: "SKIP faults are injected on the emulated device only".into(),
            });
        }
        let options = MmioOptions::default().with_poll_timeout(Duration::from_millis(20));
        let mut backend = MmioBackend::new(EmulatedDsa::new(), options)?;
        let lhs = [1i8, 2, 3, 4];
        let rhs = [1i8, 0, 0, 1];
        let mut results = Vec::new();
        for fault in [Fault::Error(0x13), Fault::Hang] {
            backend.bus_mut().inject(fault);
            let mut dst = [SENTINEL; 4];
            let status =
                execute_on(&mut backend, &mut MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst));
            results.push((status, dst == [SENTINEL; 4]));
        }
        Ok(ValidationResult {
            passed: results
                == [(ExecutionStatus::DeviceFault, true), (ExecutionStatus::Timeout, true)],
            message: format!("{results:?}"),
        })
    });

    // ── 12: SRAM ────────────────────────────────────────────────────────────
    suite.run("V12: Oversized job reports RESOURCE_EXHAUSTED", |s| {
        let mut backend: Box<dyn GemmBackend> = match &s.hw {
            Some(_) => s.target()?,
            None => Box::new(MmioBackend::new(
                EmulatedDsa::new().with_sram_size(1024),
                MmioOptions::default(),
            )?),
        };
        let caps = backend.capabilities().clone();
        // square job whose lhs alone fills SRAM
        let dim = (caps.sram_bytes as f64).sqrt().ceil() as usize + 1;
        if dim > caps.max_dim as usize {
            return Ok(ValidationResult {
                passed: false,
                message: format!("SKIP {dim}×{dim} exceeds max_dim {}", caps.max_dim),
            });
        }
        let lhs = vec![1i8; dim * dim];
        let rhs = vec![1i8; dim * dim];
        let mut dst = vec![SENTINEL; dim * dim];
        let d = dim as u32;
        let status =
            execute_on(backend.as_mut(), &mut MatmulConfig::new(d, d, d, Lhs::S8(&lhs), &rhs, &mut dst));
        Ok(ValidationResult {
            passed: status == ExecutionStatus::ResourceExhausted && dst.iter().all(|&v| v == SENTINEL),
            message: format!("{dim}×{dim} on {} bytes: {status}", caps.sram_bytes),
        })
    });

    suite.finish();
    Ok(())
}

// ─── Suite ────────────────────────────────────────────────────────────────────

struct ValidationResult {
    passed: bool,
    message: String,
}

struct ValidationSuite {
    hw:      Option<String>,
    verbose: bool,
    passed:  usize,
    failed:  usize,
    skipped: usize,
}

impl ValidationSuite {
    fn new(hw: Option<String>, verbose: bool) -> Self {
        Self { hw, verbose, passed: 0, failed: 0, skipped: 0 }
    }

    /// Backend under test: the device given with `--hw`, else the emulator.
    fn target(&self) -> Result<Box<dyn GemmBackend>> {
        Ok(match &self.hw {
            Some(device) => select_backend(BackendSelection::Mmio, device)?,
            None => select_backend(BackendSelection::Emulated, "")?,
        })
    }

    fn run<F>(&mut self, name: &str, f: F)
    where
        F: FnOnce(&Self) -> Result<ValidationResult>,
    {
        print!("  {name:<60} ");
        let result = f(self);
        match result {
            Ok(ValidationResult { passed: true, message }) => {
                println!("✓ PASS");
                if self.verbose { println!("         {message}"); }
                self.passed += 1;
            }
            Ok(ValidationResult { passed: false, message }) => {
                if message.starts_with("SKIP") {
                    println!("─ SKIP");
                    if self.verbose { println!("         {message}"); }
                    self.skipped += 1;
                } else {
                    println!("✗ FAIL");
                    println!("         {message}");
                    self.failed += 1;
                }
            }
            Err(e) => {
                println!("✗ ERROR");
                println!("         {e}");
                self.failed += 1;
            }
        }
    }

    fn finish(&self) {
        let total = self.passed + self.failed + self.skipped;
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!(
            "Result: {} passed, {} failed, {} skipped  ({}/{})",
            self.passed, self.failed, self.skipped,
            self.passed, total
        );
        if self.failed == 0 {
            println!("All checks passed ✓");
        } else {
            println!("VALIDATION FAILED — {} check(s) require attention", self.failed);
            std::process::exit(1);
        }
    }
}
