//! The nflow payloads
//!
//! This library builds the NetFlow v5 datagrams sent by the nflow generator:
//! the traffic profile catalog, the wire codec, the process-wide export
//! counters and the synthesizer that ties them together.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

pub mod clock;
pub mod netflow;
pub mod synth;
pub mod traffic;

pub use clock::ExportClock;
pub use netflow::{Header, Packet, Record};
pub use synth::{FlowSpec, Synthesizer};
pub use traffic::TrafficType;

/// Errors produced by this crate
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The traffic type label is not in the catalog
    #[error("Unrecognized traffic type: {0:?}")]
    UnrecognizedTrafficType(String),
    /// A buffer being decoded is shorter than its header claims
    #[error("Truncated NetFlow v5 datagram: expected {expected} bytes, found {found}")]
    Truncated {
        /// Bytes required by the header's record count
        expected: usize,
        /// Bytes available
        found: usize,
    },
    /// A buffer being decoded is not NetFlow v5
    #[error("Unsupported NetFlow version {0}")]
    Version(u16),
}
