//! Status-code entry points
//!
//! Firmware-style callers want one call and one code back. These wrap the
//! `GemmBackend` trait: the code is 0 on success, and on failure `dst` is
//! either untouched (validation, device errors before readback) or holds the
//! complete result.

use crate::backend::GemmBackend;
use crate::backends::software::reference_gemm;
use crate::config::MatmulConfig;
use crate::status::ExecutionStatus;

/// Run `config` on the software reference and return its status code.
pub fn execute(config: &mut MatmulConfig<'_>) -> ExecutionStatus {
    report(reference_gemm(config))
}

/// Run `config` on `backend` and return its status code.
pub fn execute_on<B: GemmBackend + ?Sized>(
    backend: &mut B,
    config: &mut MatmulConfig<'_>,
) -> ExecutionStatus {
    report(backend.execute(config))
}

fn report(result: crate::Result<()>) -> ExecutionStatus {
    match result {
        Ok(()) => ExecutionStatus::Success,
        Err(e) => {
            let status = ExecutionStatus::from(&e);
            tracing::warn!("execute failed with {status}: {e}");
            status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{EmulatedDsa, MmioBackend, MmioOptions};
    use crate::config::Lhs;

    #[test]
    fn success_is_code_zero() {
        let lhs = [1i8, 2, 3, 4];
        let rhs = [1i8, 0, 0, 1];
        let mut dst = [0i8; 4];
        let status = execute(&mut MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst));
        assert_eq!(status, ExecutionStatus::Success);
        assert_eq!(status.code(), 0);
        assert_eq!(dst, [1, 2, 3, 4]);
    }

    #[test]
    fn failure_is_nonzero_and_dst_untouched() {
        let lhs = [1i8; 4];
        let rhs = [1i8; 4];
        let mut dst = [-1i8; 4];
        let status = execute(&mut MatmulConfig::new(2, 0, 2, Lhs::S8(&lhs), &rhs, &mut dst));
        assert_eq!(status, ExecutionStatus::InvalidDimensions);
        assert_ne!(status.code(), 0);
        assert_eq!(dst, [-1; 4]);
    }

    #[test]
    fn dyn_backend_accepted() {
        let mut backend: Box<dyn GemmBackend> =
            Box::new(MmioBackend::new(EmulatedDsa::new(), MmioOptions::default()).unwrap());
        let lhs = [2i8];
        let rhs = [3i8];
        let mut dst = [0i8; 1];
        let status =
            execute_on(backend.as_mut(), &mut MatmulConfig::new(1, 1, 1, Lhs::S8(&lhs), &rhs, &mut dst));
        assert!(status.is_success());
        assert_eq!(dst, [6]);
    }
}
