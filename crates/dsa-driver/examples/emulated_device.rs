//! Drive the register-level emulator
//!
//! Runs random cases through the MMIO backend on an emulated device, then
//! injects a device error and a hang to show how failures surface.

use dsa_driver::{
    run_case, CaseGenerator, EmulatedDsa, Fault, GemmBackend, GenOptions, MmioBackend,
    MmioOptions, Result, SuiteReport, TestCase,
};
use std::time::Duration;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("dsa_driver=info")
        .init();

    println!("🧠 DSA emulated device\n");

    let options = MmioOptions::default().with_poll_timeout(Duration::from_millis(50));
    let mut backend = MmioBackend::new(EmulatedDsa::new().with_latency(4), options)?;
    println!("{}\n", backend.capabilities());

    let generator = CaseGenerator::new(GenOptions {
        seed: Some(2024),
        per_channel: true,
        ..GenOptions::default()
    })?;
    let cases: Vec<TestCase> = generator.take(10).collect();
    let suite = SuiteReport::run(&mut backend, &cases);
    for report in suite.cases() {
        println!("  {report}");
    }
    println!("\n{}", suite.summary());

    println!("\n💥 Injecting ERR_CODE 0x2a");
    backend.bus_mut().inject(Fault::Error(0x2a));
    println!("  {}", run_case(&mut backend, &TestCase::bias_rows()));

    println!("\n⏳ Injecting a hang");
    backend.bus_mut().inject(Fault::Hang);
    println!("  {}", run_case(&mut backend, &TestCase::bias_rows()));

    println!("\n🔁 After reset");
    println!("  {}", run_case(&mut backend, &TestCase::bias_rows()));
    println!("\n✅ {} job(s) completed on the emulator", backend.bus().jobs_completed());

    Ok(())
}
