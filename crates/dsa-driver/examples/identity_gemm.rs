//! Identity and bias GEMM on the software reference
//!
//! Runs `[[1,2],[3,4]] × I` with an identity requantization, then the same
//! product with per-row bias, and prints both outputs.

use dsa_driver::{execute, Lhs, MatmulConfig};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("dsa_driver=debug")
        .init();

    println!("🧮 DSA identity GEMM\n");

    let lhs = [1i8, 2, 3, 4];
    let rhs = [1i8, 0, 0, 1];

    let mut dst = [0i8; 4];
    let status = execute(
        &mut MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst).with_requant(1 << 16, 16),
    );
    println!("identity:  {status}  {:?}", rows(&dst));

    let bias = [10i32, -10];
    let mut dst = [0i8; 4];
    let status = execute(
        &mut MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst)
            .with_bias(&bias)
            .with_requant(1 << 8, 8),
    );
    println!("bias ±10:  {status}  {:?}", rows(&dst));

    let bias = [1000i32, -1000];
    let mut dst = [0i8; 4];
    let status = execute(
        &mut MatmulConfig::new(2, 2, 2, Lhs::S8(&lhs), &rhs, &mut dst)
            .with_bias(&bias)
            .with_requant(1 << 8, 8),
    );
    println!("saturated: {status}  {:?}", rows(&dst));
}

fn rows(dst: &[i8]) -> Vec<&[i8]> {
    dst.chunks(2).collect()
}
