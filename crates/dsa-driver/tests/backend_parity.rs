//! Integration tests for backend parity
//!
//! The register-driven path (against the emulator, or real hardware) must be
//! byte-identical to the software reference.

use dsa_driver::{
    run_case, select_backend, BackendSelection, BackendType, BiasMode, CaseGenerator, EmulatedDsa,
    GemmBackend, GenOptions, LhsType, MmioBackend, MmioOptions, RhsLayout, SoftwareBackend,
    TestCase,
};

fn emulated() -> MmioBackend<EmulatedDsa> {
    MmioBackend::new(EmulatedDsa::new().with_latency(3), MmioOptions::default())
        .expect("emulator backend")
}

fn cases(options: GenOptions, count: usize) -> Vec<TestCase> {
    CaseGenerator::new(options).expect("generator").take(count).collect()
}

/// Run the same cases on two backends and compare the raw outputs.
fn assert_parity(a: &mut dyn GemmBackend, b: &mut dyn GemmBackend, cases: &[TestCase]) {
    for case in cases {
        let mut dst_a = vec![0i8; case.dst_len()];
        let mut dst_b = vec![0i8; case.dst_len()];
        a.execute(&mut case.config(&mut dst_a))
            .unwrap_or_else(|e| panic!("{} on {}: {e}", case.name, a.backend_type()));
        b.execute(&mut case.config(&mut dst_b))
            .unwrap_or_else(|e| panic!("{} on {}: {e}", case.name, b.backend_type()));
        assert_eq!(dst_a, dst_b, "output mismatch in {}", case.name);
        assert_eq!(dst_a, case.expected, "expected mismatch in {}", case.name);
    }
}

#[test]
fn test_parity_s8_row_major() {
    let opts = GenOptions {
        seed: Some(0x5eed_0001),
        ..GenOptions::default()
    };
    assert_parity(&mut SoftwareBackend::new(), &mut emulated(), &cases(opts, 25));
}

#[test]
fn test_parity_s16_column_major() {
    let opts = GenOptions {
        lhs_dtype: LhsType::S16,
        rhs_layout: RhsLayout::ColumnMajor,
        seed: Some(0x5eed_0002),
        ..GenOptions::default()
    };
    assert_parity(&mut SoftwareBackend::new(), &mut emulated(), &cases(opts, 25));
}

#[test]
fn test_parity_per_channel() {
    let opts = GenOptions {
        per_channel: true,
        bias: BiasMode::Zero,
        seed: Some(0x5eed_0003),
        ..GenOptions::default()
    };
    assert_parity(&mut SoftwareBackend::new(), &mut emulated(), &cases(opts, 25));
}

#[test]
fn test_parity_without_bias() {
    let opts = GenOptions {
        bias: BiasMode::None,
        rhs_layout: RhsLayout::ColumnMajor,
        per_channel: true,
        seed: Some(0x5eed_0004),
        ..GenOptions::default()
    };
    assert_parity(&mut SoftwareBackend::new(), &mut emulated(), &cases(opts, 10));
}

#[test]
fn test_builtin_cases_on_emulator() {
    let mut backend = emulated();
    for case in TestCase::builtin() {
        let report = run_case(&mut backend, &case);
        assert!(report.passed(), "{report}");
    }
    assert_eq!(backend.bus().jobs_completed(), 4);
}

#[test]
fn test_emulated_selection_reports_type() {
    let backend = select_backend(BackendSelection::Emulated, "").expect("emulated backend");
    assert!(backend.is_ready());
    assert_eq!(backend.backend_type(), BackendType::Emulated);
}

#[test]
#[ignore] // Requires DSA hardware behind /dev/uio0
fn test_hardware_software_parity() {
    let mut hw = select_backend(BackendSelection::Mmio, "/dev/uio0").expect("MMIO backend");
    println!("Hardware: {}", hw.capabilities());
    let opts = GenOptions {
        max_dim: 32,
        seed: Some(0x5eed_00ff),
        ..GenOptions::default()
    };
    assert_parity(&mut SoftwareBackend::new(), hw.as_mut(), &cases(opts, 50));
    println!("✅ Hardware matches the software reference");
}
