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

//! Recorder dispatch
//!
//! After every frame with detected bins, the dispatcher ranks the bins seen
//! over the recent history, asks each recorder for its frequency exclusions,
//! and issues record requests to eligible workers. A failing recorder is
//! left out for the round; the next frame re-evaluates everything.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::bins::{BinCenter, BinHistory, BinSet};
use crate::metrics::Metrics;
use crate::MB;

/// An exclusion range in Hz; an unbounded edge is None
pub type FreqRange = (Option<f64>, Option<f64>);

/// True if a frequency falls inside any of the ranges
pub fn freq_excluded(freq_hz: f64, ranges: &[FreqRange]) -> bool {
    ranges.iter().any(|(lo, hi)| {
        lo.map_or(true, |lo| freq_hz >= lo) && hi.map_or(true, |hi| freq_hz <= hi)
    })
}

/// Parses a recorder's `freq_excluded` JSON value
///
/// The value must be an array of `[lo, hi]` pairs where either element may
/// be null or absent. Anything else is rejected.
pub fn parse_freq_excluded(value: &serde_json::Value) -> Option<Vec<FreqRange>> {
    let pairs = value.as_array()?;
    let mut ranges = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let pair = pair.as_array()?;
        if pair.len() > 2 {
            return None;
        }
        let edge = |index: usize| match pair.get(index) {
            None | Some(serde_json::Value::Null) => Some(None),
            Some(value) => value.as_f64().map(Some),
        };
        ranges.push((edge(0)?, edge(1)?));
    }
    Some(ranges)
}

/// Issues one request to a recorder's v1 API and returns the status code
///
/// Transport failures and timeouts return None and are logged at debug.
pub fn recorder_req(recorder: &str, recorder_args: &str, timeout_secs: u64) -> Option<u16> {
    let url = format!("{}/v1/{}", recorder.trim_end_matches('/'), recorder_args);
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .build();
    match agent.get(&url).call() {
        Ok(response) => {
            debug!("{} -> {}", url, response.status());
            Some(response.status())
        }
        Err(ureq::Error::Status(code, _)) => {
            debug!("{} -> {}", url, code);
            Some(code)
        }
        Err(e) => {
            debug!("{} failed: {}", url, e);
            None
        }
    }
}

/// Ranks the flattened history and keeps the most recorded-worthy signals
///
/// Signals are ordered by how often they appear, ties broken toward the
/// lower frequency, and the top `max_signals` unique centers returned.
pub fn choose_record_signal(signals: &[BinCenter], max_signals: usize) -> Vec<BinCenter> {
    let mut counts: BTreeMap<BinCenter, usize> = BTreeMap::new();
    for signal in signals {
        *counts.entry(*signal).or_insert(0) += 1;
    }
    let mut ranked: Vec<(BinCenter, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(max_signals)
        .map(|(signal, _)| signal)
        .collect()
}

/// Assigns ranked signals to recorders
///
/// Signals are visited in rank order; each goes to the first recorder (in
/// ascending base-URL order) that still has capacity and does not exclude
/// the signal's frequency. No recorder receives more than
/// `max_recorder_signals` assignments.
pub fn choose_recorders<'a>(
    signals: &[BinCenter],
    exclusions: &'a BTreeMap<String, Vec<FreqRange>>,
    max_recorder_signals: usize,
) -> Vec<(BinCenter, &'a str)> {
    let mut assigned: BTreeMap<&str, usize> = BTreeMap::new();
    let mut assignments = Vec::new();
    for signal in signals {
        for (recorder, ranges) in exclusions {
            let count = assigned.entry(recorder.as_str()).or_insert(0);
            if *count >= max_recorder_signals {
                continue;
            }
            if freq_excluded(signal.hz() as f64, ranges) {
                continue;
            }
            assignments.push((*signal, recorder.as_str()));
            *count += 1;
            break;
        }
    }
    assignments
}

/// Chooses signals and recorders after each detected frame and issues the
/// record requests
pub struct Dispatcher {
    recorders: Vec<String>,
    record_bw_msps: u64,
    record_secs: u64,
    max_recorder_signals: usize,
    history: BinHistory,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    /// Creates a dispatcher over the configured recorder base URLs
    pub fn new(
        recorders: Vec<String>,
        record_bw_msps: u64,
        record_secs: u64,
        max_recorder_signals: usize,
        history_depth: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Dispatcher {
            recorders,
            record_bw_msps,
            record_secs,
            max_recorder_signals,
            history: BinHistory::new(history_depth),
            metrics,
        }
    }

    /// Folds a frame's bin set into the history and runs a dispatch round
    ///
    /// Frames with no detected bins change nothing.
    pub fn observe_frame(&mut self, bins: &BinSet) {
        if bins.is_empty() {
            return;
        }
        self.history.push(bins.clone());
        self.run_round();
    }

    /// One dispatch round over the current history
    fn run_round(&self) {
        let exclusions = self.fetch_exclusions();
        if exclusions.is_empty() {
            return;
        }
        let flattened = self.history.flattened();
        let record_signals = choose_record_signal(
            &flattened,
            exclusions.len() * self.max_recorder_signals,
        );
        for (signal, recorder) in
            choose_recorders(&record_signals, &exclusions, self.max_recorder_signals)
        {
            let record_bps = self.record_bw_msps * MB;
            let record_samples = record_bps * self.record_secs;
            let recorder_args = format!(
                "record/{}/{}/{}",
                signal.hz(),
                record_samples,
                record_bps
            );
            info!("requesting {} from {}", recorder_args, recorder);
            match recorder_req(recorder, &recorder_args, self.record_secs) {
                Some(status) if (200..300).contains(&status) => {
                    self.metrics
                        .worker_record_request
                        .with_label_values(&[recorder])
                        .set(signal.hz() as f64);
                }
                Some(status) => debug!("recorder {} refused: {}", recorder, status),
                None => {}
            }
        }
    }

    /// Fetches the exclusion list of every configured recorder
    ///
    /// Recorders that fail, answer non-200, or answer without a
    /// `freq_excluded` key are left out of the round.
    fn fetch_exclusions(&self) -> BTreeMap<String, Vec<FreqRange>> {
        let mut exclusions = BTreeMap::new();
        for recorder in &self.recorders {
            let url = format!("{}/v1/info", recorder.trim_end_matches('/'));
            let agent = ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(self.record_secs))
                .build();
            let body: serde_json::Value = match agent.get(&url).call() {
                Ok(response) => match response.into_json() {
                    Ok(body) => body,
                    Err(e) => {
                        debug!("recorder {} sent bad info: {}", recorder, e);
                        continue;
                    }
                },
                Err(e) => {
                    debug!("recorder {} info failed: {}", recorder, e);
                    continue;
                }
            };
            let excluded = match body.get("freq_excluded") {
                Some(value) => value,
                None => continue,
            };
            match parse_freq_excluded(excluded) {
                Some(ranges) => {
                    exclusions.insert(recorder.clone(), ranges);
                }
                None => debug!("recorder {} sent bad freq_excluded", recorder),
            }
        }
        exclusions
    }
}
