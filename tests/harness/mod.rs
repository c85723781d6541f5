// tests/harness/mod.rs
//
// Integration testing harness for e2e-mock-manager.
// Supplies in-memory real collaborators and a manager wired over them.

pub mod fake_services;
pub mod test_harness;

pub use test_harness::TestHarness;
