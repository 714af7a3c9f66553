//! `dsa`: command-line interface for the quantized matmul accelerator.
//!
//! ```text
//! USAGE:
//!   dsa run [CASE.json]...           Execute test cases and compare outputs
//!   dsa gen --out FILE               Generate random test cases
//!           [--debug-out FILE]       ...and dump their accumulators
//!   dsa info                         Capabilities of the selected backend
//!   dsa regs                         Register map and bit definitions
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dsa_chip::regs::{self, ctrl, features, flags, status};
use dsa_chip::window;
use dsa_driver::backends::DEFAULT_DEVICE;
use dsa_driver::{
    run_case, select_backend_with, BackendSelection, BiasMode, CaseGenerator, GemmBackend,
    GenOptions, LhsType, MmioOptions, RhsLayout, SuiteReport, TestCase,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dsa", about = "Quantized INT8 matmul accelerator CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Execute test cases and compare every output element.
    Run {
        /// Case files (one case or an array). Built-in cases when empty.
        cases: Vec<PathBuf>,
        #[command(flatten)]
        target: Target,
        /// Only print failures and the summary.
        #[arg(short, long)]
        quiet: bool,
    },
    /// Generate random test cases with expected outputs.
    Gen {
        /// Output JSON file.
        #[arg(short, long)]
        out: PathBuf,
        /// Also write each case's unquantized accumulators and
        /// requantization parameters to this text file.
        #[arg(long, value_name = "FILE")]
        debug_out: Option<PathBuf>,
        /// Number of cases.
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
        /// RNG seed (random when omitted).
        #[arg(long)]
        seed: Option<u64>,
        /// Smallest K / N / M.
        #[arg(long, default_value_t = 1)]
        min_dim: u32,
        /// Largest K / N / M.
        #[arg(long, default_value_t = 16)]
        max_dim: u32,
        /// lhs element type.
        #[arg(long, value_enum, default_value_t = LhsArg::S8)]
        lhs: LhsArg,
        /// One multiplier / shift per output row.
        #[arg(long)]
        per_channel: bool,
        /// Bias generation.
        #[arg(long, value_enum, default_value_t = BiasArg::Random)]
        bias: BiasArg,
        /// Magnitude bound for random bias.
        #[arg(long, default_value_t = 10_000, value_parser = clap::value_parser!(i32).range(0..))]
        bias_range: i32,
        /// rhs storage order.
        #[arg(long, value_enum, default_value_t = LayoutArg::Row)]
        rhs_layout: LayoutArg,
    },
    /// Print capabilities of the selected backend.
    Info {
        #[command(flatten)]
        target: Target,
    },
    /// Print the register map.
    Regs,
}

#[derive(clap::Args)]
struct Target {
    /// auto, software, mmio or emulated.
    #[arg(short, long, default_value = "auto")]
    backend: BackendSelection,
    /// Device node, optionally with a base offset: PATH[@BASE].
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    device: String,
    /// Completion timeout for MMIO jobs.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl Target {
    fn open(&self) -> Result<Box<dyn GemmBackend>> {
        let mut options = MmioOptions::default();
        if let Some(ms) = self.timeout_ms {
            options = options.with_poll_timeout(Duration::from_millis(ms));
        }
        select_backend_with(self.backend, &self.device, options)
            .with_context(|| format!("opening {:?} backend on {}", self.backend, self.device))
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LhsArg {
    S8,
    S16,
}

#[derive(Clone, Copy, ValueEnum)]
enum BiasArg {
    None,
    Zero,
    Random,
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    Row,
    Column,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Run {
            cases,
            target,
            quiet,
        } => cmd_run(&cases, &target, quiet)?,
        Cmd::Gen {
            out,
            debug_out,
            count,
            seed,
            min_dim,
            max_dim,
            lhs,
            per_channel,
            bias,
            bias_range,
            rhs_layout,
        } => {
            let options = GenOptions {
                min_dim,
                max_dim,
                lhs_dtype: match lhs {
                    LhsArg::S8 => LhsType::S8,
                    LhsArg::S16 => LhsType::S16,
                },
                per_channel,
                bias: match bias {
                    BiasArg::None => BiasMode::None,
                    BiasArg::Zero => BiasMode::Zero,
                    BiasArg::Random => BiasMode::Random { range: bias_range },
                },
                rhs_layout: match rhs_layout {
                    LayoutArg::Row => RhsLayout::RowMajor,
                    LayoutArg::Column => RhsLayout::ColumnMajor,
                },
                seed,
            };
            cmd_gen(&out, debug_out.as_deref(), count, options)?;
        }
        Cmd::Info { target } => cmd_info(&target)?,
        Cmd::Regs => cmd_regs(),
    }

    Ok(())
}

fn cmd_run(paths: &[PathBuf], target: &Target, quiet: bool) -> Result<()> {
    let cases = if paths.is_empty() {
        TestCase::builtin()
    } else {
        let mut cases = Vec::new();
        for path in paths {
            let loaded = TestCase::load(path).with_context(|| format!("loading {}", path.display()))?;
            cases.extend(loaded);
        }
        cases
    };
    tracing::debug!("Running {} case(s)", cases.len());

    let mut backend = target.open()?;
    println!("Backend: {}  ({})", backend.backend_type(), backend.capabilities());
    println!();

    let mut suite = SuiteReport::new();
    for case in &cases {
        let report = run_case(backend.as_mut(), case);
        println!("{report}");
        for line in report.lines() {
            if !quiet || line.starts_with("[FAIL]") {
                println!("    {line}");
            }
        }
        suite.push(report);
    }

    println!();
    println!("{}", suite.summary());
    if suite.exit_code() != 0 {
        std::process::exit(suite.exit_code());
    }
    Ok(())
}

fn cmd_gen(out: &Path, debug_out: Option<&Path>, count: usize, options: GenOptions) -> Result<()> {
    let mut generator = CaseGenerator::new(options)?;
    let cases: Vec<TestCase> = (0..count).map(|_| generator.generate()).collect();
    TestCase::save_all(&cases, out).with_context(|| format!("writing {}", out.display()))?;
    println!("Wrote {count} case(s) to {} (seed {:#x})", out.display(), generator.seed());
    if let Some(path) = debug_out {
        TestCase::save_debug(&cases, path).with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote accumulator dump to {}", path.display());
    }
    Ok(())
}

fn cmd_info(target: &Target) -> Result<()> {
    let backend = target.open()?;
    let c = backend.capabilities();
    println!("Backend      : {}", backend.backend_type());
    println!("Ready        : {}", backend.is_ready());
    println!("Device ID    : {:#010x}", c.device_id);
    println!("Version      : {}.{}", c.version.0, c.version.1);
    if c.sram_bytes == usize::MAX {
        println!("SRAM         : unbounded");
    } else {
        println!("SRAM         : {} KB", c.sram_bytes / 1024);
    }
    println!("Max dim      : {}", c.max_dim);
    println!("Features     : {}", c.feature_names().join(", "));
    Ok(())
}

fn cmd_regs() {
    println!(
        "Control window @ {:#07x} ({} bytes), SRAM window @ {:#07x}",
        window::ctrl::OFFSET,
        window::ctrl::SIZE,
        window::sram::OFFSET
    );
    println!();
    for reg in &regs::MAP {
        println!("  {:#05x}  {:<16} {:?}", reg.offset, reg.name, reg.access);
    }

    println!();
    let bits: [(&str, &[(&str, u32)]); 4] = [
        ("CTRL", &[("START", ctrl::START), ("RESET", ctrl::RESET), ("IRQ_EN", ctrl::IRQ_EN)]),
        (
            "STATUS",
            &[("BUSY", status::BUSY), ("DONE", status::DONE), ("ERROR", status::ERROR)],
        ),
        (
            "FEATURES",
            &[
                ("LHS_S16", features::LHS_S16),
                ("PER_CHANNEL", features::PER_CHANNEL),
                ("RHS_COL_MAJOR", features::RHS_COL_MAJOR),
                ("SIGNED_SHIFT", features::SIGNED_SHIFT),
                ("ROUND_AWAY", features::ROUND_AWAY),
                ("ROUND_FLOOR", features::ROUND_FLOOR),
            ],
        ),
        (
            "FLAGS",
            &[
                ("BIAS_EN", flags::BIAS_EN),
                ("RHS_COL_MAJOR", flags::RHS_COL_MAJOR),
                ("SIGNED_SHIFT", flags::SIGNED_SHIFT),
                ("ROUND", flags::ROUND_MASK << flags::ROUND_SHIFT),
            ],
        ),
    ];
    for (reg, fields) in bits {
        let list: Vec<String> = fields.iter().map(|(n, b)| format!("{n}={b:#x}")).collect();
        println!("  {reg:<9} {}", list.join("  "));
    }
}
