//! Test cases: owned operand data plus the expected output.
//!
//! Cases are stored as JSON so failing random cases can be saved and
//! replayed on any backend. [`CaseGenerator`] produces random cases whose
//! expected output is computed independently of the execution engines,
//! with 64-bit accumulators and the quantization unit.

use crate::config::{Lhs, MatmulConfig, RhsLayout};
use crate::error::{DsaError, Result};
use crate::quant::{self, RequantPolicy};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// lhs elements of a case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "data", rename_all = "lowercase")]
pub enum LhsData {
    /// Signed 8-bit
    S8(Vec<i8>),
    /// Signed 16-bit
    S16(Vec<i16>),
}

impl LhsData {
    fn as_lhs(&self) -> Lhs<'_> {
        match self {
            Self::S8(v) => Lhs::S8(v),
            Self::S16(v) => Lhs::S16(v),
        }
    }
}

/// Requantization parameters of a case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Requant {
    /// One multiplier / shift for the whole output
    PerTensor {
        /// Multiplier
        mult: i32,
        /// Shift
        shift: i32,
    },
    /// One multiplier / shift per output row
    PerChannel {
        /// Multipliers, K entries
        mults: Vec<i32>,
        /// Shifts, K entries
        shifts: Vec<i32>,
    },
}

const fn default_act_min() -> i8 {
    i8::MIN
}

const fn default_act_max() -> i8 {
    i8::MAX
}

/// One GEMM with fixed inputs and its expected K×M output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Name shown in reports
    pub name: String,
    /// Output rows
    pub k: u32,
    /// Inner dimension
    pub n: u32,
    /// Output columns
    pub m: u32,
    /// K×N, dense row-major
    pub lhs: LhsData,
    /// N×M, dense, stored per `rhs_layout`
    pub rhs: Vec<i8>,
    /// Storage order of `rhs`
    #[serde(default)]
    pub rhs_layout: RhsLayout,
    /// Optional bias, K entries
    #[serde(default)]
    pub bias: Option<Vec<i32>>,
    /// Requantization parameters
    pub requant: Requant,
    /// lhs zero point
    #[serde(default)]
    pub lhs_offset: i32,
    /// rhs zero point
    #[serde(default)]
    pub rhs_offset: i32,
    /// Output zero point
    #[serde(default)]
    pub dst_offset: i32,
    /// Lower output clamp
    #[serde(default = "default_act_min")]
    pub act_min: i8,
    /// Upper output clamp
    #[serde(default = "default_act_max")]
    pub act_max: i8,
    /// Rounding and shift convention
    #[serde(default)]
    pub policy: RequantPolicy,
    /// K×M, dense row-major
    pub expected: Vec<i8>,
    /// Unquantized K×M accumulators (bias included), when the generator
    /// recorded them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accumulators: Option<Vec<i64>>,
}

impl TestCase {
    /// Dense output length, K×M.
    pub fn dst_len(&self) -> usize {
        (self.k as usize).saturating_mul(self.m as usize)
    }

    /// Check that every vector length agrees with K, N and M.
    ///
    /// Run before sizing any buffer from the dimensions.
    ///
    /// # Errors
    ///
    /// - `InvalidDimensions` if an element count overflows or a vector is
    ///   longer than its dimensions allow
    /// - `BufferTooSmall` naming the first vector that is too short
    pub fn check(&self) -> Result<()> {
        let (k, n, m) = (self.k as usize, self.n as usize, self.m as usize);
        let area = |a: usize, b: usize| {
            a.checked_mul(b).ok_or_else(|| {
                DsaError::invalid_dimensions(self.k, self.n, self.m, "element count overflows usize")
            })
        };

        let lhs_len = match &self.lhs {
            LhsData::S8(v) => v.len(),
            LhsData::S16(v) => v.len(),
        };
        let mut lengths = vec![
            ("lhs", area(k, n)?, lhs_len),
            ("rhs", area(n, m)?, self.rhs.len()),
            ("expected", area(k, m)?, self.expected.len()),
        ];
        if let Some(bias) = &self.bias {
            lengths.push(("bias", k, bias.len()));
        }
        if let Requant::PerChannel { mults, shifts } = &self.requant {
            lengths.push(("mults", k, mults.len()));
            lengths.push(("shifts", k, shifts.len()));
        }
        if let Some(acc) = &self.accumulators {
            lengths.push(("accumulators", area(k, m)?, acc.len()));
        }

        for (operand, required, actual) in lengths {
            if actual < required {
                return Err(DsaError::buffer_too_small(operand, required, actual));
            }
            if actual > required {
                return Err(DsaError::invalid_dimensions(
                    self.k,
                    self.n,
                    self.m,
                    format!("`{operand}` has {actual} elements, expected {required}"),
                ));
            }
        }
        Ok(())
    }

    /// Build an execution config that reads this case and writes `dst`.
    pub fn config<'a>(&'a self, dst: &'a mut [i8]) -> MatmulConfig<'a> {
        let mut cfg = MatmulConfig::new(self.k, self.n, self.m, self.lhs.as_lhs(), &self.rhs, dst)
            .with_rhs_layout(self.rhs_layout)
            .with_offsets(self.lhs_offset, self.rhs_offset, self.dst_offset)
            .with_activation(self.act_min, self.act_max)
            .with_policy(self.policy);
        if let Some(bias) = &self.bias {
            cfg = cfg.with_bias(bias);
        }
        match &self.requant {
            Requant::PerTensor { mult, shift } => cfg.with_requant(*mult, *shift),
            Requant::PerChannel { mults, shifts } => cfg.with_per_channel(mults, shifts),
        }
    }

    /// Expected value of output element (`row`, `col`).
    pub fn expected_at(&self, row: usize, col: usize) -> Option<i8> {
        self.expected.get(row * self.m as usize + col).copied()
    }

    /// Parse one case or an array of cases.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the text is neither, or the [`check`]
    /// error of the first inconsistent case.
    ///
    /// [`check`]: TestCase::check
    pub fn from_json(text: &str) -> Result<Vec<Self>> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            Many(Vec<TestCase>),
            One(Box<TestCase>),
        }

        let cases = match serde_json::from_str(text)? {
            OneOrMany::Many(cases) => cases,
            OneOrMany::One(case) => vec![*case],
        };
        for case in &cases {
            case.check()?;
        }
        Ok(cases)
    }

    /// Load the cases in a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Serialization` if it does
    /// not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let cases = Self::from_json(&text)?;
        tracing::debug!("Loaded {} case(s) from {}", cases.len(), path.as_ref().display());
        Ok(cases)
    }

    /// Save this case as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Serialization` on failure.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Save several cases as one JSON array.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Serialization` on failure.
    pub fn save_all(cases: &[Self], path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(cases)?)?;
        Ok(())
    }

    /// Accumulator matrix and requantization parameters, for comparing
    /// against a failing device run by eye.
    pub const fn accumulator_dump(&self) -> AccumulatorDump<'_> {
        AccumulatorDump(self)
    }

    /// Write the accumulator dumps of `cases` to a text file.
    ///
    /// # Errors
    ///
    /// Returns `Io` on failure.
    pub fn save_debug(cases: &[Self], path: impl AsRef<Path>) -> Result<()> {
        let text: Vec<String> = cases.iter().map(|c| c.accumulator_dump().to_string()).collect();
        std::fs::write(path, text.join("\n"))?;
        Ok(())
    }

    /// `[[1,2],[3,4]] × I` with an identity requantization: output equals lhs.
    pub fn identity(shift: i32) -> Self {
        Self {
            name: format!("identity-shift{shift}"),
            k: 2,
            n: 2,
            m: 2,
            lhs: LhsData::S8(vec![1, 2, 3, 4]),
            rhs: vec![1, 0, 0, 1],
            rhs_layout: RhsLayout::RowMajor,
            bias: Some(vec![0, 0]),
            requant: Requant::PerTensor {
                mult: 1 << shift,
                shift,
            },
            lhs_offset: 0,
            rhs_offset: 0,
            dst_offset: 0,
            act_min: i8::MIN,
            act_max: i8::MAX,
            policy: RequantPolicy::default(),
            expected: vec![1, 2, 3, 4],
            accumulators: None,
        }
    }

    /// Identity product with per-row bias `[10, -10]`.
    pub fn bias_rows() -> Self {
        Self {
            name: "bias-rows".into(),
            bias: Some(vec![10, -10]),
            expected: vec![11, 12, -7, -6],
            ..Self::identity(8)
        }
    }

    /// Bias large enough to saturate both rows.
    pub fn bias_saturation() -> Self {
        Self {
            name: "bias-saturation".into(),
            bias: Some(vec![1000, -1000]),
            expected: vec![127, 127, -128, -128],
            ..Self::identity(8)
        }
    }

    /// The fixed cases every backend must pass.
    pub fn builtin() -> Vec<Self> {
        vec![
            Self::identity(0),
            Self::identity(16),
            Self::bias_rows(),
            Self::bias_saturation(),
        ]
    }
}

/// Text dump of a case's accumulators, see [`TestCase::accumulator_dump`]
#[derive(Debug, Clone, Copy)]
pub struct AccumulatorDump<'a>(&'a TestCase);

impl fmt::Display for AccumulatorDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let case = self.0;
        writeln!(
            f,
            "{}: unquantized accumulators (K={}, N={}, M={})",
            case.name, case.k, case.n, case.m
        )?;
        match &case.accumulators {
            Some(acc) if case.m > 0 => {
                for (r, row) in acc.chunks(case.m as usize).enumerate() {
                    let cells: Vec<String> = row.iter().map(|v| format!("{v:8}")).collect();
                    writeln!(f, "row {r}: {}", cells.join(" "))?;
                }
            }
            _ => writeln!(f, "(not recorded)")?,
        }
        writeln!(f)?;
        match &case.requant {
            Requant::PerTensor { mult, shift } => {
                writeln!(f, "per-tensor: dst_mult={mult}, dst_shift={shift}")
            }
            Requant::PerChannel { mults, shifts } => {
                writeln!(f, "per-channel:")?;
                for (r, (mult, shift)) in mults.iter().zip(shifts).enumerate() {
                    writeln!(f, "  row {r}: dst_mult={mult}, dst_shift={shift}")?;
                }
                Ok(())
            }
        }
    }
}

/// How generated cases fill the bias
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiasMode {
    /// No bias buffer
    None,
    /// All-zero bias buffer
    Zero,
    /// Uniform in `-range..=range`
    Random {
        /// Magnitude bound
        range: i32,
    },
}

/// Element type for generated lhs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LhsType {
    /// Signed 8-bit
    #[default]
    S8,
    /// Signed 16-bit
    S16,
}

/// Random case parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenOptions {
    /// Smallest K / N / M
    pub min_dim: u32,
    /// Largest K / N / M
    pub max_dim: u32,
    /// lhs element type
    pub lhs_dtype: LhsType,
    /// Derive one multiplier / shift per output row
    pub per_channel: bool,
    /// Bias generation
    pub bias: BiasMode,
    /// rhs storage order
    pub rhs_layout: RhsLayout,
    /// RNG seed; `None` draws one from the OS
    pub seed: Option<u64>,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            min_dim: 1,
            max_dim: 16,
            lhs_dtype: LhsType::S8,
            per_channel: false,
            bias: BiasMode::Random { range: 10_000 },
            rhs_layout: RhsLayout::RowMajor,
            seed: None,
        }
    }
}

/// Seeded random case generator
#[derive(Debug)]
pub struct CaseGenerator {
    rng: StdRng,
    options: GenOptions,
    seed: u64,
    produced: u64,
}

impl CaseGenerator {
    /// Create a generator.
    ///
    /// # Errors
    ///
    /// - `InvalidDimensions` if `min_dim` is zero or above `max_dim`
    /// - `InvalidQuantization` for a negative random bias range
    pub fn new(options: GenOptions) -> Result<Self> {
        if options.min_dim == 0 || options.min_dim > options.max_dim {
            return Err(DsaError::invalid_dimensions(
                options.min_dim,
                options.max_dim,
                0,
                "generator needs 1 <= min_dim <= max_dim",
            ));
        }
        if let BiasMode::Random { range } = options.bias {
            if range < 0 {
                return Err(DsaError::invalid_quantization(format!(
                    "bias range {range} is negative"
                )));
            }
        }
        let seed = options.seed.unwrap_or_else(rand::random);
        tracing::debug!("Case generator seed {seed:#018x}");
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            options,
            seed,
            produced: 0,
        })
    }

    /// Seed in use (record it to reproduce a run).
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Produce the next case.
    pub fn generate(&mut self) -> TestCase {
        let (lo, hi) = (self.options.min_dim, self.options.max_dim);
        let k = self.rng.gen_range(lo..=hi);
        let n = self.rng.gen_range(lo..=hi);
        let m = self.rng.gen_range(lo..=hi);
        let (ku, nu, mu) = (k as usize, n as usize, m as usize);

        let lhs_wide: Vec<i32> = match self.options.lhs_dtype {
            LhsType::S8 => (0..ku * nu).map(|_| i32::from(self.rng.gen::<i8>())).collect(),
            LhsType::S16 => (0..ku * nu).map(|_| i32::from(self.rng.gen::<i16>())).collect(),
        };
        // logical rhs, row-major N×M
        let rhs_rows: Vec<i8> = (0..nu * mu).map(|_| self.rng.gen()).collect();
        let bias: Option<Vec<i32>> = match self.options.bias {
            BiasMode::None => None,
            BiasMode::Zero => Some(vec![0; ku]),
            BiasMode::Random { range } => {
                Some((0..ku).map(|_| self.rng.gen_range(-range..=range)).collect())
            }
        };

        let acc: Vec<i64> = (0..ku * mu)
            .map(|idx| {
                let (r, c) = (idx / mu, idx % mu);
                let dot: i64 = (0..nu)
                    .map(|i| i64::from(lhs_wide[r * nu + i]) * i64::from(rhs_rows[i * mu + c]))
                    .sum();
                dot + bias.as_ref().map_or(0, |b| i64::from(b[r]))
            })
            .collect();

        let policy = RequantPolicy::default();
        let row_max = |r: usize| acc[r * mu..(r + 1) * mu].iter().map(|a| a.abs()).max().unwrap_or(0);
        let requant = if self.options.per_channel {
            let (mults, shifts) = (0..ku).map(|r| quant::derive_requant_params(row_max(r))).unzip();
            Requant::PerChannel { mults, shifts }
        } else {
            let max_abs = (0..ku).map(row_max).max().unwrap_or(0);
            let (mult, shift) = quant::derive_requant_params(max_abs);
            Requant::PerTensor { mult, shift }
        };

        let expected = acc
            .iter()
            .enumerate()
            .map(|(idx, &a)| {
                let (mult, shift) = match &requant {
                    Requant::PerTensor { mult, shift } => (*mult, *shift),
                    Requant::PerChannel { mults, shifts } => (mults[idx / mu], shifts[idx / mu]),
                };
                quant::requantize(quant::saturate_acc(a), mult, shift, policy)
            })
            .collect();

        let rhs = match self.options.rhs_layout {
            RhsLayout::RowMajor => rhs_rows,
            RhsLayout::ColumnMajor => (0..mu * nu).map(|idx| rhs_rows[(idx % nu) * mu + idx / nu]).collect(),
        };

        #[allow(clippy::cast_possible_truncation)]
        let lhs = match self.options.lhs_dtype {
            LhsType::S8 => LhsData::S8(lhs_wide.iter().map(|&v| v as i8).collect()),
            LhsType::S16 => LhsData::S16(lhs_wide.iter().map(|&v| v as i16).collect()),
        };

        self.produced += 1;
        TestCase {
            name: format!("gen-{:016x}-{}", self.seed, self.produced),
            k,
            n,
            m,
            lhs,
            rhs,
            rhs_layout: self.options.rhs_layout,
            bias,
            requant,
            lhs_offset: 0,
            rhs_offset: 0,
            dst_offset: 0,
            act_min: i8::MIN,
            act_max: i8::MAX,
            policy,
            expected,
            accumulators: Some(acc),
        }
    }
}

impl Iterator for CaseGenerator {
    type Item = TestCase;

    fn next(&mut self) -> Option<TestCase> {
        Some(self.generate())
    }
}
