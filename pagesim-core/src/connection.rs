// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Transfer-time model of a single TCP connection.
//!
//! The model answers one question: how long does it take to move a given
//! number of bytes over this connection, starting from its current handshake
//! and congestion-window state? Queries never mutate the connection; the
//! scheduler decides which returned state to commit, so the same question can
//! be asked once without a deadline (to find the next completion across the
//! field) and once with one (to apply exactly that much progress).
//!
//! All arithmetic is f64 milliseconds and bytes. The scheduler's completion
//! tie-break compares estimates for exact equality, which requires the
//! deadline-free and deadline-bound queries to share one arithmetic path.

/// Congestion window at the start of a transfer, in segments
pub const INITIAL_CONGESTION_WINDOW: f64 = 10.0;

/// TCP maximum segment size, in bytes
pub const TCP_SEGMENT_SIZE: f64 = 1460.0;

/// Outcome of a [`TcpConnection::simulate_download_until`] query.
///
/// The connection itself is left untouched; callers commit
/// `congestion_window` back with [`TcpConnection::set_congestion_window`]
/// when the progress is real rather than exploratory.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransferProgress {
    /// Whole round trips consumed, including the handshake
    pub round_trips: u32,
    /// Milliseconds elapsed: residual time-to-first-byte plus download time
    pub time_elapsed_ms: f64,
    /// Bytes moved, clamped to the requested amount
    pub bytes_downloaded: f64,
    /// Congestion window after the transfer, in segments
    pub congestion_window: f64,
}

/// A single simulated TCP connection.
///
/// Tracks the state that survives between transfers: whether the connection
/// has been warmed by a completed transfer, its current congestion window,
/// and the throughput share the scheduler last granted it.
#[derive(Clone, Debug)]
pub struct TcpConnection {
    rtt_ms: f64,
    throughput_bps: f64,
    response_time_ms: f64,
    secure: bool,
    warmed: bool,
    congestion_window: f64,
}

impl TcpConnection {
    pub fn new(rtt_ms: f64, throughput_bps: f64, response_time_ms: f64, secure: bool) -> Self {
        debug_assert!(rtt_ms > 0.0, "round-trip time must be positive");
        debug_assert!(throughput_bps >= 0.0, "throughput must be non-negative");
        debug_assert!(
            response_time_ms >= 0.0,
            "server response time must be non-negative"
        );

        Self {
            rtt_ms,
            throughput_bps,
            response_time_ms,
            secure,
            warmed: false,
            congestion_window: INITIAL_CONGESTION_WINDOW,
        }
    }

    /// Number of connections the link can keep making forward progress on:
    /// each needs at least one segment per round trip.
    pub fn maximum_saturated_connections(rtt_ms: f64, throughput_bps: f64) -> usize {
        let round_trips_per_second = 1000.0 / rtt_ms;
        let bytes_per_second_per_connection = round_trips_per_second * TCP_SEGMENT_SIZE;
        let minimum_throughput_per_connection = bytes_per_second_per_connection * 8.0;
        (throughput_bps / minimum_throughput_per_connection).floor() as usize
    }

    /// Bandwidth-delay product of the connection expressed in segments.
    ///
    /// Recomputed on every query: the scheduler reassigns throughput shares
    /// as other transfers start and finish.
    fn maximum_congestion_window(&self) -> f64 {
        let bytes_per_second = self.throughput_bps / 8.0;
        let seconds_per_round_trip = self.rtt_ms / 1000.0;
        let bytes_per_round_trip = bytes_per_second * seconds_per_round_trip;
        (bytes_per_round_trip / TCP_SEGMENT_SIZE).floor()
    }

    /// Whether a transfer has completed on this connection before.
    pub fn is_warm(&self) -> bool {
        self.warmed
    }

    /// Congestion window the next transfer starts from, in segments.
    pub fn congestion_window(&self) -> f64 {
        self.congestion_window
    }

    pub fn set_throughput(&mut self, throughput_bps: f64) {
        debug_assert!(throughput_bps >= 0.0, "throughput must be non-negative");
        self.throughput_bps = throughput_bps;
    }

    pub fn set_congestion_window(&mut self, congestion_window: f64) {
        self.congestion_window = congestion_window;
    }

    pub fn set_warmed(&mut self, warmed: bool) {
        debug_assert!(warmed || !self.warmed, "warmed is monotonic");
        self.warmed = warmed;
    }

    /// Simulates downloading `bytes_to_download` over this connection.
    ///
    /// `time_already_elapsed_ms` is the time charged to this transfer's
    /// time-to-first-byte phase by earlier partial steps; once it covers the
    /// whole TTFB, continuation queries skip the handshake and the free
    /// initial window. `maximum_time_to_elapse_ms` is a deadline on the
    /// download phase (pass `f64::INFINITY` to run to completion); because
    /// the window grows in whole round trips, the returned time may overrun
    /// the deadline by up to one RTT, and the caller accounts for the
    /// difference.
    pub fn simulate_download_until(
        &self,
        bytes_to_download: f64,
        time_already_elapsed_ms: f64,
        maximum_time_to_elapse_ms: f64,
    ) -> TransferProgress {
        let two_way_latency_ms = self.rtt_ms;
        let one_way_latency_ms = two_way_latency_ms / 2.0;
        let maximum_congestion_window = self.maximum_congestion_window();

        let handshake_ms = if self.warmed {
            // request only
            one_way_latency_ms
        } else {
            // SYN, SYN-ACK, ACK + request; TLS adds ClientHello/ServerHello,
            // one round trip under False Start
            3.0 * one_way_latency_ms
                + if self.secure {
                    two_way_latency_ms
                } else {
                    0.0
                }
        };

        let time_to_first_byte_ms = handshake_ms + self.response_time_ms + one_way_latency_ms;
        let ttfb_remaining_ms = (time_to_first_byte_ms - time_already_elapsed_ms).max(0.0);
        let maximum_download_time_ms = maximum_time_to_elapse_ms - ttfb_remaining_ms;

        let mut congestion_window = self.congestion_window.min(maximum_congestion_window);
        let mut round_trips = (ttfb_remaining_ms / two_way_latency_ms).ceil() as u32;
        let mut total_bytes_downloaded = 0.0;

        if ttfb_remaining_ms > 0.0 {
            // first step of the transfer: the initial window rides on the
            // handshake completion
            total_bytes_downloaded = congestion_window * TCP_SEGMENT_SIZE;
        } else {
            round_trips = 0;
        }

        let mut download_time_elapsed_ms = 0.0;
        let mut bytes_remaining = bytes_to_download - total_bytes_downloaded;

        while bytes_remaining > 0.0 && download_time_elapsed_ms <= maximum_download_time_ms {
            round_trips += 1;
            download_time_elapsed_ms += two_way_latency_ms;
            congestion_window = (congestion_window * 2.0)
                .min(maximum_congestion_window)
                .max(1.0);

            let window_bytes = congestion_window * TCP_SEGMENT_SIZE;
            total_bytes_downloaded += window_bytes;
            bytes_remaining -= window_bytes;
        }

        TransferProgress {
            round_trips,
            time_elapsed_ms: ttfb_remaining_ms + download_time_elapsed_ms,
            bytes_downloaded: total_bytes_downloaded.min(bytes_to_download).max(0.0),
            congestion_window,
        }
    }
}
