//! End-to-end tests of the LeafBridge gateway
//!
//! This test suite validates:
//! - The registration round trip from first message to flushed buffer
//! - Pass-through and leaf tag handling on the inbound path
//! - Buffer overflow policies and rejection handling
//! - Per-device ordering under concurrent traffic and confirmations
//! - Credential signing against a workload socket

pub mod test_utils;

#[cfg(test)]
mod registration_flow_tests;

#[cfg(test)]
mod routing_tests;

#[cfg(test)]
mod ordering_tests;
