//! Library crate for cert-scan-rs: TLS certificate inventory across IPv4 ranges.
pub mod gate;
pub mod logging;
pub mod output;
pub mod ports;
pub mod prober;
pub mod range;
pub mod resolver;
pub mod scanner;
pub mod types;
