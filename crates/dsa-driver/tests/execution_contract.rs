//! Execution contract tests
//!
//! Every backend: exactly K×M elements written, failures leave `dst`
//! untouched, status codes are stable.

use dsa_driver::{
    execute, execute_on, DsaError, EmulatedDsa, ExecutionStatus, Fault, GemmBackend, Lhs,
    MatmulConfig, MmioBackend, MmioOptions, RequantPolicy, Rounding, SoftwareBackend,
};
use std::time::Duration;

const SENTINEL: i8 = 0x5a;

fn backends() -> Vec<Box<dyn GemmBackend>> {
    vec![
        Box::new(SoftwareBackend::new()),
        Box::new(
            MmioBackend::new(EmulatedDsa::new().with_latency(2), MmioOptions::default())
                .expect("emulator backend"),
        ),
    ]
}

fn fast_timeout() -> MmioOptions {
    MmioOptions::default()
        .with_poll_timeout(Duration::from_millis(10))
        .with_poll_interval(Duration::from_micros(50))
}

#[test]
fn test_exactly_k_by_m_written() {
    let lhs = [1i8, 2, 3, 4, 5, 6];
    let rhs = [1i8, 1, 1, 1, 1, 1];
    for mut backend in backends() {
        // dst stride 4 for M = 2, plus a tail
        let mut dst = [SENTINEL; 10];
        let mut cfg =
            MatmulConfig::new(2, 3, 2, Lhs::S8(&lhs), &rhs, &mut dst).with_strides(0, 0, 4);
        backend.execute(&mut cfg).expect("execute");
        assert_eq!(
            dst,
            [6, 6, SENTINEL, SENTINEL, 15, 15, SENTINEL, SENTINEL, SENTINEL, SENTINEL],
            "{}",
            backend.backend_type()
        );
    }
}

#[test]
fn test_zero_inputs_zero_outputs() {
    let lhs = [0i8; 12];
    let rhs = [0i8; 12];
    for mut backend in backends() {
        let mut dst = [SENTINEL; 9];
        let status = execute_on(
            backend.as_mut(),
            &mut MatmulConfig::new(3, 4, 3, Lhs::S8(&lhs), &rhs, &mut dst)
                .with_requant(1 << 20, 20),
        );
        assert_eq!(status, ExecutionStatus::Success);
        assert_eq!(dst, [0; 9]);
    }
}

#[test]
fn test_zero_dimension_rejected_before_write() {
    let lhs = [1i8; 4];
    let rhs = [1i8; 4];
    for dims in [(0, 2, 2), (2, 0, 2), (2, 2, 0)] {
        for mut backend in backends() {
            let mut dst = [SENTINEL; 4];
            let status = execute_on(
                backend.as_mut(),
                &mut MatmulConfig::new(dims.0, dims.1, dims.2, Lhs::S8(&lhs), &rhs, &mut dst),
            );
            assert_eq!(status, ExecutionStatus::InvalidDimensions);
            assert_eq!(status.code(), 1);
            assert_eq!(dst, [SENTINEL; 4]);
        }
    }
}

#[test]
fn test_short_buffers_rejected() {
    let lhs = [1i8; 3];
    let rhs = [1i8; 4];
    let mut dst = [SENTINEL; 4];
    let status = execute(&mut MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst));
    assert_eq!(status, ExecutionStatus::NullBuffer);
    assert_eq!(dst, [SENTINEL; 4]);

    let lhs = [1i8; 4];
    let mut dst = [SENTINEL; 3];
    let status = execute(&mut MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst));
    assert_eq!(status, ExecutionStatus::NullBuffer);
    assert_eq!(dst, [SENTINEL; 3]);
}

#[test]
fn test_identity_for_several_shifts() {
    let lhs = [1i8, 2, 3, 4];
    let rhs = [1i8, 0, 0, 1];
    for shift in [0, 1, 8, 16, 24, 30] {
        for mut backend in backends() {
            let mut dst = [0i8; 4];
            let mut cfg = MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst)
                .with_requant(1 << shift, shift);
            backend.execute(&mut cfg).expect("execute");
            assert_eq!(dst, [1, 2, 3, 4], "shift {shift}");
        }
    }
}

#[test]
fn test_bias_shifts_rows() {
    let lhs = [1i8, 2, 3, 4];
    let rhs = [1i8, 0, 0, 1];
    for (bias, expected) in [
        ([10i32, -10], [11i8, 12, -7, -6]),
        ([200, -200], [127, 127, -128, -128]),
    ] {
        for mut backend in backends() {
            let mut dst = [0i8; 4];
            let mut cfg = MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst)
                .with_bias(&bias)
                .with_requant(1 << 8, 8);
            backend.execute(&mut cfg).expect("execute");
            assert_eq!(dst, expected);
        }
    }
}

#[test]
fn test_saturation_is_exact() {
    let lhs = [127i8; 8];
    let rhs = [127i8; 8];
    let neg = [-128i8; 8];
    for mut backend in backends() {
        let mut dst = [0i8; 1];
        backend
            .execute(&mut MatmulConfig::new(1, 8, 1, Lhs::S8(&lhs), &rhs, &mut dst))
            .expect("execute");
        assert_eq!(dst, [127]);
        backend
            .execute(&mut MatmulConfig::new(1, 8, 1, Lhs::S8(&neg), &rhs, &mut dst))
            .expect("execute");
        assert_eq!(dst, [-128]);
    }
}

#[test]
fn test_repeated_calls_identical() {
    let lhs: Vec<i8> = (0..64).map(|i| (i * 37 % 256 - 128) as i8).collect();
    let rhs: Vec<i8> = (0..64).map(|i| (i * 91 % 256 - 128) as i8).collect();
    for mut backend in backends() {
        let mut run = || {
            let mut dst = [0i8; 64];
            let mut cfg =
                MatmulConfig::new(8, 8, 8, Lhs::S8(&lhs), &rhs, &mut dst).with_requant(3, 10);
            backend.execute(&mut cfg).expect("execute");
            dst
        };
        let first = run();
        for _ in 0..5 {
            assert_eq!(first, run());
        }
    }
}

#[test]
fn test_rounding_policy_programmed_on_device() {
    let lhs = [-5i8, -3, 3, 5];
    let rhs = [1i8];
    for rounding in [Rounding::HalfUp, Rounding::HalfAwayFromZero, Rounding::Floor] {
        let policy = RequantPolicy::with_rounding(rounding);
        let mut sw = [0i8; 4];
        let mut emu = [0i8; 4];
        let mut software = SoftwareBackend::new();
        let mut emulated =
            MmioBackend::new(EmulatedDsa::new(), MmioOptions::default()).expect("emulator backend");
        for (backend, dst) in [
            (&mut software as &mut dyn GemmBackend, &mut sw),
            (&mut emulated as &mut dyn GemmBackend, &mut emu),
        ] {
            let mut cfg = MatmulConfig::new(4, 1, 1, Lhs::S8(&lhs), &rhs, dst)
                .with_requant(1, 1)
                .with_policy(policy);
            backend.execute(&mut cfg).expect("execute");
        }
        assert_eq!(sw, emu, "{rounding:?}");
    }
}

#[test]
fn test_device_error_leaves_dst_untouched() {
    let mut emu = EmulatedDsa::new();
    emu.inject(Fault::Error(0x7));
    let mut backend = MmioBackend::new(emu, MmioOptions::default()).expect("emulator backend");
    let lhs = [1i8, 2, 3, 4];
    let rhs = [1i8, 0, 0, 1];
    let mut dst = [SENTINEL; 4];
    let status = execute_on(
        &mut backend,
        &mut MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst),
    );
    assert_eq!(status, ExecutionStatus::DeviceFault);
    assert_eq!(dst, [SENTINEL; 4]);

    // fault is one-shot
    let status = execute_on(
        &mut backend,
        &mut MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst),
    );
    assert_eq!(status, ExecutionStatus::Success);
    assert_eq!(dst, [1, 2, 3, 4]);
}

#[test]
fn test_hang_times_out_without_write() {
    let mut emu = EmulatedDsa::new();
    emu.inject(Fault::Hang);
    let mut backend = MmioBackend::new(emu, fast_timeout()).expect("emulator backend");
    let lhs = [1i8];
    let rhs = [1i8];
    let mut dst = [SENTINEL];
    let err = backend
        .execute(&mut MatmulConfig::new(1, 1, 1, Lhs::S8(&lhs), &rhs, &mut dst))
        .expect_err("hung job");
    assert!(matches!(err, DsaError::Timeout { duration_ms: 10 }));
    assert_eq!(ExecutionStatus::from(&err), ExecutionStatus::Timeout);
    assert_eq!(dst, [SENTINEL]);
}

#[test]
fn test_sram_too_small_is_resource_exhausted() {
    let emu = EmulatedDsa::new().with_sram_size(256);
    let mut backend = MmioBackend::new(emu, MmioOptions::default()).expect("emulator backend");
    let lhs = [1i8; 16 * 16];
    let rhs = [1i8; 16 * 16];
    let mut dst = [SENTINEL; 16 * 16];
    let status = execute_on(
        &mut backend,
        &mut MatmulConfig::new(16, 16, 16, Lhs::S8(&lhs), &rhs, &mut dst),
    );
    assert_eq!(status, ExecutionStatus::ResourceExhausted);
    assert!(dst.iter().all(|&v| v == SENTINEL));
}

#[test]
fn test_device_limits_are_unsupported_or_invalid() {
    let emu = EmulatedDsa::new().with_max_dim(4).with_features(0);
    let mut backend = MmioBackend::new(emu, MmioOptions::default()).expect("emulator backend");
    let lhs = [1i8; 25];
    let rhs = [1i8; 25];
    let mut dst = [SENTINEL; 25];
    let status = execute_on(
        &mut backend,
        &mut MatmulConfig::new(5, 5, 1, Lhs::S8(&lhs), &rhs, &mut dst),
    );
    assert_eq!(status, ExecutionStatus::InvalidDimensions);

    let wide = [1i16; 4];
    let status = execute_on(
        &mut backend,
        &mut MatmulConfig::new(2, 2, 2, Lhs::S16(&wide), &rhs, &mut dst),
    );
    assert_eq!(status, ExecutionStatus::Unsupported);
    assert!(dst.iter().all(|&v| v == SENTINEL));
}
