//! The nflow synthetic `NetFlow` v5 generator.
//!
//! This library supports the `nflow-generator` binary found elsewhere in this
//! project: configuration loading, the per-collector generators and their
//! flow sessions, the SNMP mock boundary and the orchestrator that runs them
//! all.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod generator;
pub mod orchestrator;
pub mod snmp;
