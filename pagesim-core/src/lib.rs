// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Deterministic page-load time estimation.
//!
//! Given a dependency graph of network requests and CPU tasks captured from a
//! page load, the simulator predicts the total elapsed time of the load under
//! a chosen set of network conditions. It models TCP slow start, TLS
//! handshakes, per-connection reuse, the browser's global request concurrency
//! limit, and throughput sharing across in-flight requests.
//!
//! The simulation performs no I/O and never consults a wall clock: identical
//! inputs produce bit-identical outputs.

pub use config::Config;
pub use connection::TcpConnection;
pub use graph::{Node, NodeId, PageGraph};
pub use simulator::{Error, Estimate, Simulator};

pub mod config;
pub mod connection;
pub mod graph;
pub mod simulator;

/// Estimates the total load time of `graph` in milliseconds under the
/// network conditions in `config`.
pub fn estimate(graph: &PageGraph, config: &Config) -> Result<Estimate, Error> {
    Simulator::new(graph, *config).estimate()
}
