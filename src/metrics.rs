/*
 * Copyright 2022 The Regents of the University of California
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

//! Prometheus metrics
//!
//! The series names and label names here are contractual; dashboards and
//! alerting depend on them.

use std::io::{Error, ErrorKind, Read, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use prometheus::{Encoder, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// The metric families exported by the signal finder
pub struct Metrics {
    registry: Registry,
    /// Epoch time of the last signal seen in each bin
    pub last_bin_freq_time: GaugeVec,
    /// Last signal frequency requested from each worker, in Hz
    pub worker_record_request: GaugeVec,
    /// Peak power per bin, in dB
    pub freq_power: GaugeVec,
    /// Bins that appeared relative to the previous frame
    pub new_bins: IntCounterVec,
    /// Bins that disappeared relative to the previous frame
    pub old_bins: IntCounterVec,
    /// Count of signals detected in each bin
    pub bin_freq_count: IntCounterVec,
    /// Number of frames processed
    pub frame_counter: IntCounter,
}

impl Metrics {
    /// Creates and registers all metric families
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let last_bin_freq_time = GaugeVec::new(
            Opts::new("last_bin_freq_time", "epoch time last signal in each bin"),
            &["bin_mhz"],
        )?;
        let worker_record_request = GaugeVec::new(
            Opts::new("worker_record_request", "record requests made to workers"),
            &["worker"],
        )?;
        let freq_power = GaugeVec::new(
            Opts::new("freq_power", "bin frequencies and db over time"),
            &["bin_freq"],
        )?;
        let new_bins = IntCounterVec::new(
            Opts::new("new_bins", "frequencies of new bins"),
            &["bin_freq"],
        )?;
        let old_bins = IntCounterVec::new(
            Opts::new("old_bins", "frequencies of old bins"),
            &["bin_freq"],
        )?;
        let bin_freq_count = IntCounterVec::new(
            Opts::new("bin_freq_count", "count of signals in each bin"),
            &["bin_mhz"],
        )?;
        let frame_counter = IntCounter::new("frame_counter", "number of frames processed")?;

        registry.register(Box::new(last_bin_freq_time.clone()))?;
        registry.register(Box::new(worker_record_request.clone()))?;
        registry.register(Box::new(freq_power.clone()))?;
        registry.register(Box::new(new_bins.clone()))?;
        registry.register(Box::new(old_bins.clone()))?;
        registry.register(Box::new(bin_freq_count.clone()))?;
        registry.register(Box::new(frame_counter.clone()))?;

        Ok(Metrics {
            registry,
            last_bin_freq_time,
            worker_record_request,
            freq_power,
            new_bins,
            old_bins,
            bin_freq_count,
            frame_counter,
        })
    }

    /// Renders all series in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::new(ErrorKind::Other, e))?;
        String::from_utf8(buffer).map_err(|e| Error::new(ErrorKind::InvalidData, e))
    }
}

/// Serves the metrics in Prometheus text format until the stop flag is set
///
/// Any path is answered; the scrape path is a deployment choice.
pub fn run_metrics_server(
    metrics: Arc<Metrics>,
    port: u16,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let server = tiny_http::Server::http(("0.0.0.0", port))
        .map_err(|e| Error::new(ErrorKind::AddrInUse, e.to_string()))?;
    debug!("metrics server listening on port {}", port);
    while !stop.load(Ordering::Relaxed) {
        let request = match server.recv_timeout(Duration::from_millis(500)) {
            Ok(Some(mut request)) => {
                // Drain any request body before answering
                let mut sink = Vec::new();
                let _ = request.as_reader().read_to_end(&mut sink);
                request
            }
            Ok(None) => continue,
            Err(e) => {
                warn!("metrics server receive error: {}", e);
                continue;
            }
        };
        let response = match metrics.render() {
            Ok(text) => tiny_http::Response::from_string(text).with_status_code(200),
            Err(e) => tiny_http::Response::from_string(e.to_string()).with_status_code(500),
        };
        if let Err(e) = request.respond(response) {
            debug!("metrics response failed: {}", e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_contractual_names_render() {
        let metrics = Metrics::new().unwrap();
        metrics.frame_counter.inc();
        metrics.freq_power.with_label_values(&["150.0"]).set(-20.0);
        metrics.new_bins.with_label_values(&["150.0"]).inc();
        let text = metrics.render().unwrap();
        assert!(text.contains("frame_counter 1"));
        assert!(text.contains("freq_power{bin_freq=\"150.0\"} -20"));
        assert!(text.contains("new_bins{bin_freq=\"150.0\"} 1"));
    }
}
