// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Discrete-event scheduler driving a [`PageGraph`] to completion.
//!
//! The loop admits ready nodes subject to the global concurrency cap and the
//! one-request-per-connection rule, splits the configured throughput equally
//! across everything in flight, asks every in-flight node how long it would
//! take to finish at its current share, advances the clock to the earliest of
//! those completions, and applies exactly that much progress to the rest.
//! Progress is measured twice on purpose: once without a deadline to find the
//! next completion, once with it so non-finishers only advance as far as the
//! step allows. The congestion window grows in whole round trips, so the
//! second query can overrun its deadline; the overrun is carried per node as
//! a debt (`overshoot`) repaid before new progress counts.
//!
//! Iteration over the ready, in-flight, and connection sets follows insertion
//! order, which makes replays of the same graph bit-identical.

use crate::{
    config::Config,
    connection::TcpConnection,
    graph::{ConnectionId, NetworkRecord, Node, NodeId, NodeKind, PageGraph},
};
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

/// Iteration bound after which a simulation is declared divergent
pub const MAXIMUM_ITERATIONS: usize = 10_000;

/// Failures of the scheduler. Both indicate a malformed input or a bug in
/// the caller rather than a recoverable condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A node of this kind was driven down the network progression path.
    #[error("{0:?} nodes cannot be progressed as network requests")]
    UnsupportedNodeKind(NodeKind),
    /// The scheduler stopped before every reachable node completed, either
    /// by exceeding [`MAXIMUM_ITERATIONS`] or by running out of runnable
    /// nodes while some remained (a dependency cycle).
    #[error("simulation stalled before every reachable node completed")]
    SimulationDivergence,
}

/// Progress bookkeeping for one node, kept while it is in flight and
/// returned with the [`Estimate`] once the simulation completes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeTiming {
    /// Simulation clock when the node was admitted, in milliseconds
    pub start_time_ms: f64,
    /// Simulation clock when the node completed, in milliseconds
    pub end_time_ms: Option<f64>,
    /// Bytes credited to the node over its lifetime
    pub bytes_downloaded: f64,
    /// Time committed to the node's transfer so far
    time_elapsed_ms: f64,
    /// Transfer time credited beyond the end of an earlier step; repaid
    /// before new progress counts
    time_elapsed_overshoot_ms: f64,
    /// Most recent deadline-free completion estimate
    estimated_time_elapsed_ms: f64,
}

impl NodeTiming {
    fn started_at(start_time_ms: f64) -> Self {
        Self {
            start_time_ms,
            end_time_ms: None,
            bytes_downloaded: 0.0,
            time_elapsed_ms: 0.0,
            time_elapsed_overshoot_ms: 0.0,
            estimated_time_elapsed_ms: 0.0,
        }
    }
}

/// Outcome of a simulated page load.
#[derive(Clone, Debug)]
pub struct Estimate {
    /// Predicted total load time in milliseconds
    pub total_elapsed_ms: f64,
    /// Per-node admission and completion times, in completion order
    pub timings: IndexMap<NodeId, NodeTiming>,
}

/// Simulates one page load over a borrowed [`PageGraph`].
#[derive(Debug)]
pub struct Simulator<'a> {
    graph: &'a PageGraph,
    throughput_bps: f64,
    maximum_concurrent_requests: usize,
    connections: IndexMap<ConnectionId, TcpConnection>,
    ready: IndexSet<NodeId>,
    in_flight: IndexSet<NodeId>,
    completed: IndexSet<NodeId>,
    connections_in_use: IndexSet<ConnectionId>,
    timings: IndexMap<NodeId, NodeTiming>,
    reachable: usize,
    total_elapsed_ms: f64,
}

impl<'a> Simulator<'a> {
    /// Prepares a simulation of `graph` under `config`: one connection per
    /// distinct connection id, concurrency capped by how many connections
    /// the link can keep saturated.
    pub fn new(graph: &'a PageGraph, config: Config) -> Self {
        let mut reachable = 0;
        let mut records_by_connection: IndexMap<ConnectionId, Vec<&NetworkRecord>> =
            IndexMap::new();
        graph.traverse(|_, node| {
            reachable += 1;
            if let Node::Network(record) = node {
                records_by_connection
                    .entry(record.connection_id)
                    .or_default()
                    .push(record);
            }
        });

        let connections = records_by_connection
            .into_iter()
            .map(|(id, records)| {
                let secure = records[0].scheme.is_secure();
                let measured_ms = records
                    .iter()
                    .filter_map(|record| record.response_time_ms)
                    .filter(|time_ms| time_ms.is_finite())
                    .fold(f64::INFINITY, f64::min);
                let response_time_ms = if measured_ms.is_finite() {
                    measured_ms
                } else {
                    config.default_response_time_ms
                };

                let connection = TcpConnection::new(
                    config.rtt_ms,
                    config.throughput_bps,
                    response_time_ms,
                    secure,
                );
                (id, connection)
            })
            .collect::<IndexMap<_, _>>();

        let maximum_concurrent_requests = config.maximum_concurrent_requests.min(
            TcpConnection::maximum_saturated_connections(config.rtt_ms, config.throughput_bps),
        );

        debug!(
            reachable,
            connections = connections.len(),
            maximum_concurrent_requests,
            "prepared simulation"
        );

        Self {
            graph,
            throughput_bps: config.throughput_bps,
            maximum_concurrent_requests,
            connections,
            ready: IndexSet::new(),
            in_flight: IndexSet::new(),
            completed: IndexSet::new(),
            connections_in_use: IndexSet::new(),
            timings: IndexMap::new(),
            reachable,
            total_elapsed_ms: 0.0,
        }
    }

    /// Runs the load to completion and returns the predicted total time
    /// together with the per-node timeline.
    pub fn estimate(mut self) -> Result<Estimate, Error> {
        self.ready.insert(self.graph.root());

        let mut iterations = 0;
        while !self.ready.is_empty() || !self.in_flight.is_empty() {
            iterations += 1;
            if iterations > MAXIMUM_ITERATIONS {
                return Err(Error::SimulationDivergence);
            }

            for node in self.ready.iter().copied().collect::<Vec<_>>() {
                self.start_node_if_possible(node);
            }

            self.balance_throughput();

            let mut step_ms = f64::INFINITY;
            for node in self.in_flight.iter().copied().collect::<Vec<_>>() {
                step_ms = step_ms.min(self.estimate_time_remaining(node));
            }

            self.total_elapsed_ms += step_ms;

            for node in self.in_flight.iter().copied().collect::<Vec<_>>() {
                self.advance_node(node, step_ms)?;
            }
        }

        // ready and in-flight both drained; anything missing was cut off
        // from the root by an unsatisfiable dependency
        if self.completed.len() < self.reachable {
            return Err(Error::SimulationDivergence);
        }

        debug!(
            total_elapsed_ms = self.total_elapsed_ms,
            iterations, "simulation complete"
        );

        Ok(Estimate {
            total_elapsed_ms: self.total_elapsed_ms,
            timings: self.timings,
        })
    }

    /// Admission: network nodes take a free connection under the global
    /// cap; CPU nodes take a slot only.
    fn start_node_if_possible(&mut self, node: NodeId) {
        if self.in_flight.len() >= self.maximum_concurrent_requests {
            return;
        }

        if let Node::Network(record) = self.graph.node(node) {
            if self.connections_in_use.contains(&record.connection_id) {
                return;
            }
            self.connections_in_use.insert(record.connection_id);
        }

        self.ready.shift_remove(&node);
        self.in_flight.insert(node);
        self.timings
            .insert(node, NodeTiming::started_at(self.total_elapsed_ms));
    }

    /// Splits the configured throughput equally across everything in flight
    /// and applies the share to each connection in use.
    fn balance_throughput(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }

        let share_bps = self.throughput_bps / self.in_flight.len() as f64;
        for id in &self.connections_in_use {
            let connection = self
                .connections
                .get_mut(id)
                .expect("every connection in use was created at startup");
            connection.set_throughput(share_bps);
        }
    }

    /// Deadline-free completion estimate for an in-flight node, recorded on
    /// its timing so the advance phase compares against the same value.
    fn estimate_time_remaining(&mut self, node: NodeId) -> f64 {
        let timing = *self
            .timings
            .get(&node)
            .expect("every in-flight node has a timing");

        let estimated_ms = match self.graph.node(node) {
            Node::Cpu(task) => task.duration_ms - timing.time_elapsed_ms,
            Node::Network(record) => {
                let connection = self
                    .connections
                    .get(&record.connection_id)
                    .expect("every network node has a connection");
                let progress = connection.simulate_download_until(
                    record.transfer_size as f64 - timing.bytes_downloaded,
                    timing.time_elapsed_ms,
                    f64::INFINITY,
                );
                progress.time_elapsed_ms + timing.time_elapsed_overshoot_ms
            }
        };

        self.timings
            .get_mut(&node)
            .expect("every in-flight node has a timing")
            .estimated_time_elapsed_ms = estimated_ms;
        estimated_ms
    }

    fn advance_node(&mut self, node: NodeId, step_ms: f64) -> Result<(), Error> {
        match self.graph.node(node) {
            Node::Cpu(_) => {
                self.advance_cpu_node(node, step_ms);
                Ok(())
            }
            Node::Network(_) => self.advance_network_node(node, step_ms),
        }
    }

    /// CPU work is consumed exclusively: it advances by exactly the step
    /// length until its recorded duration is spent.
    fn advance_cpu_node(&mut self, node: NodeId, step_ms: f64) {
        let timing = self
            .timings
            .get_mut(&node)
            .expect("every in-flight node has a timing");

        timing.time_elapsed_ms += step_ms;
        if timing.estimated_time_elapsed_ms == step_ms {
            self.complete_node(node);
        }
    }

    /// Applies `step_ms` of progress to an in-flight network node,
    /// committing the returned congestion window onto its connection.
    fn advance_network_node(&mut self, node: NodeId, step_ms: f64) -> Result<(), Error> {
        let record = match self.graph.node(node) {
            Node::Network(record) => record,
            other => return Err(Error::UnsupportedNodeKind(other.kind())),
        };

        let timing = *self
            .timings
            .get(&node)
            .expect("every in-flight node has a timing");
        let connection = self
            .connections
            .get_mut(&record.connection_id)
            .expect("every network node has a connection");

        let progress = connection.simulate_download_until(
            record.transfer_size as f64 - timing.bytes_downloaded,
            timing.time_elapsed_ms,
            step_ms - timing.time_elapsed_overshoot_ms,
        );
        connection.set_congestion_window(progress.congestion_window);

        let finished = timing.estimated_time_elapsed_ms == step_ms;
        if finished {
            connection.set_warmed(true);
        }

        let timing = self
            .timings
            .get_mut(&node)
            .expect("every in-flight node has a timing");
        timing.time_elapsed_ms += progress.time_elapsed_ms;
        timing.bytes_downloaded += progress.bytes_downloaded;

        if finished {
            self.connections_in_use.shift_remove(&record.connection_id);
            self.complete_node(node);
        } else {
            timing.time_elapsed_overshoot_ms += progress.time_elapsed_ms - step_ms;
            debug_assert!(
                timing.time_elapsed_overshoot_ms >= 0.0,
                "overshoot is a non-negative debt"
            );
        }

        Ok(())
    }

    /// Moves a node to the completed set and readies every dependent whose
    /// dependencies have all completed.
    fn complete_node(&mut self, node: NodeId) {
        self.in_flight.shift_remove(&node);
        self.completed.insert(node);

        // re-insert at the back so the timing map iterates in completion
        // order rather than admission order
        let mut timing = self
            .timings
            .shift_remove(&node)
            .expect("every in-flight node has a timing");
        timing.end_time_ms = Some(self.total_elapsed_ms);
        self.timings.insert(node, timing);

        for &dependent in self.graph.dependents(node) {
            if self.completed.contains(&dependent) || self.in_flight.contains(&dependent) {
                continue;
            }
            if self
                .graph
                .dependencies(dependent)
                .iter()
                .all(|dependency| self.completed.contains(dependency))
            {
                self.ready.insert(dependent);
            }
        }
    }
}
