//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the bus settings (serial device, baud rate,
//! adapter latency, protocol version) from a TOML file and writes them back.
//! A missing file yields the defaults, so a fresh install works unconfigured.

pub mod config;
