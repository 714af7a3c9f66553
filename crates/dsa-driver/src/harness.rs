//! Test harness: run cases on a backend and aggregate the results.
//!
//! Each case runs exactly once into a freshly zeroed `dst`. Elements are
//! compared only when execution succeeds; a failed status is recorded and
//! comparison is skipped. Cases whose vector lengths disagree with their
//! dimensions are reported without reaching the backend.

use crate::backend::GemmBackend;
use crate::execute::execute_on;
use crate::status::ExecutionStatus;
use crate::testcase::TestCase;
use std::fmt;
use std::time::{Duration, Instant};

/// One compared output element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementCheck {
    /// Output row
    pub row: usize,
    /// Output column
    pub col: usize,
    /// Value the backend wrote
    pub actual: i8,
    /// Value the case expects
    pub expected: i8,
}

impl ElementCheck {
    /// True when the backend wrote the expected value.
    pub const fn passed(&self) -> bool {
        self.actual == self.expected
    }
}

impl fmt::Display for ElementCheck {
    #[allow(clippy::cast_sign_loss)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (tag, op) = if self.passed() { ("PASS", "==") } else { ("FAIL", "!=") };
        write!(
            f,
            "[{tag}] dst[{}][{}]: {:#04x} {op} {:#04x}",
            self.row, self.col, self.actual as u8, self.expected as u8
        )
    }
}

/// Outcome of one case
#[derive(Debug, Clone)]
pub struct CaseReport {
    /// Case name
    pub name: String,
    /// Status returned by the backend
    pub status: ExecutionStatus,
    /// Per-element comparisons, empty unless `status` is success
    pub checks: Vec<ElementCheck>,
    /// Number of elements the case expects
    pub expected_len: usize,
    /// Wall-clock time of the execute call
    pub elapsed: Duration,
    /// Why the case was rejected before execution
    pub rejected: Option<String>,
}

impl CaseReport {
    /// Mismatching elements.
    pub fn failures(&self) -> impl Iterator<Item = &ElementCheck> {
        self.checks.iter().filter(|c| !c.passed())
    }

    /// Success status and every expected element matched.
    pub fn passed(&self) -> bool {
        self.status.is_success()
            && self.checks.len() == self.expected_len
            && self.failures().next().is_none()
    }

    /// Report lines: one per element, or one for a failed status.
    pub fn lines(&self) -> Vec<String> {
        if let Some(reason) = &self.rejected {
            return vec![format!("[FAIL] {}: rejected: {reason}", self.name)];
        }
        if !self.status.is_success() {
            return vec![format!("[FAIL] {}: execute returned {}", self.name, self.status)];
        }
        let mut lines: Vec<String> = self.checks.iter().map(ToString::to_string).collect();
        if self.checks.len() != self.expected_len {
            lines.push(format!(
                "[FAIL] {}: compared {} of {} elements",
                self.name,
                self.checks.len(),
                self.expected_len
            ));
        }
        lines
    }
}

impl fmt::Display for CaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed() { "PASS" } else { "FAIL" };
        write!(
            f,
            "{verdict} {}: {}, {} mismatched, {:.1?}",
            self.name,
            self.status,
            self.failures().count(),
            self.elapsed
        )
    }
}

/// Run `case` once on `backend` and compare the output.
pub fn run_case<B: GemmBackend + ?Sized>(backend: &mut B, case: &TestCase) -> CaseReport {
    if let Err(e) = case.check() {
        tracing::warn!("{}: {e}", case.name);
        return CaseReport {
            name: case.name.clone(),
            status: ExecutionStatus::from(&e),
            checks: Vec::new(),
            expected_len: case.expected.len(),
            elapsed: Duration::ZERO,
            rejected: Some(e.to_string()),
        };
    }

    let mut dst = vec![0i8; case.dst_len()];
    let start = Instant::now();
    let status = execute_on(backend, &mut case.config(&mut dst));
    let elapsed = start.elapsed();

    let m = case.m as usize;
    let checks = if status.is_success() {
        dst.iter()
            .enumerate()
            .filter_map(|(idx, &actual)| {
                let (row, col) = (idx / m, idx % m);
                case.expected_at(row, col).map(|expected| ElementCheck {
                    row,
                    col,
                    actual,
                    expected,
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    let report = CaseReport {
        name: case.name.clone(),
        status,
        checks,
        expected_len: case.dst_len(),
        elapsed,
        rejected: None,
    };
    tracing::debug!("{report}");
    report
}

/// Aggregated results of several cases
#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    cases: Vec<CaseReport>,
}

impl SuiteReport {
    /// Empty report.
    pub const fn new() -> Self {
        Self { cases: Vec::new() }
    }

    /// Run every case on `backend`.
    pub fn run<'c, B: GemmBackend + ?Sized>(
        backend: &mut B,
        cases: impl IntoIterator<Item = &'c TestCase>,
    ) -> Self {
        let mut suite = Self::new();
        for case in cases {
            suite.push(run_case(backend, case));
        }
        suite
    }

    /// Add one case result.
    pub fn push(&mut self, report: CaseReport) {
        self.cases.push(report);
    }

    /// All case results, in run order.
    pub fn cases(&self) -> &[CaseReport] {
        &self.cases
    }

    /// Failed case results.
    pub fn failed_cases(&self) -> impl Iterator<Item = &CaseReport> {
        self.cases.iter().filter(|c| !c.passed())
    }

    /// Cases that passed.
    pub fn passed(&self) -> usize {
        self.cases.iter().filter(|c| c.passed()).count()
    }

    /// Cases that failed.
    pub fn failed(&self) -> usize {
        self.cases.len() - self.passed()
    }

    /// (matching, compared) element counts across all cases.
    pub fn element_counts(&self) -> (usize, usize) {
        self.cases.iter().fold((0, 0), |(ok, total), c| {
            (ok + c.checks.iter().filter(|e| e.passed()).count(), total + c.checks.len())
        })
    }

    /// Fraction of cases that passed, 1.0 for an empty suite.
    #[allow(clippy::cast_precision_loss)]
    pub fn accuracy(&self) -> f64 {
        if self.cases.is_empty() {
            1.0
        } else {
            self.passed() as f64 / self.cases.len() as f64
        }
    }

    /// Process exit code: 0 when every case passed, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        i32::from(self.failed() > 0)
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        let (ok, total) = self.element_counts();
        format!(
            "{} passed, {} failed ({ok}/{total} elements matched)",
            self.passed(),
            self.failed()
        )
    }
}
