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

//! FFT scan records and their grouping into sweep frames
//!
//! The scanner publishes newline-delimited JSON objects, each carrying one
//! set of FFT buckets. All records that share one `sweep_start` value form a
//! frame; a frame is closed when a record with a strictly greater
//! `sweep_start` arrives.

use std::collections::BTreeMap;
use std::io::{Error, ErrorKind, Result};

use serde::Deserialize;

/// One FFT bucket observation
#[derive(Debug, Clone, PartialEq)]
pub struct FftRecord {
    /// Observation time, in seconds since the epoch
    pub ts: f64,
    /// Bucket frequency, in hertz
    pub freq: f64,
    /// Bucket power, in dB
    pub db: f64,
    /// Start time of the sweep this record belongs to
    pub sweep_start: f64,
}

/// The scanner configuration attached to every record
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScanConfig {
    /// Low edge of the scanned range, in hertz
    pub freq_start: f64,
    /// High edge of the scanned range, in hertz
    pub freq_end: f64,
}

/// The wire format of one scan line
#[derive(Debug, Deserialize)]
struct ScanLine {
    ts: f64,
    sweep_start: f64,
    buckets: BTreeMap<String, f64>,
    config: ScanConfig,
}

/// A closed frame: all records from one sweep
#[derive(Debug, Default, Clone)]
pub struct Frame {
    /// The sweep these records belong to
    pub sweep_start: f64,
    /// The records, in arrival order
    pub records: Vec<FftRecord>,
}

impl Frame {
    /// Returns true if this frame contains no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Parses a batch of newline-split scan lines into records
///
/// Any malformed line (bad JSON, missing key, non-numeric bucket frequency)
/// fails the whole batch. On success the scanner configuration of the last
/// line is returned along with the records.
pub fn parse_batch(lines: &[&str]) -> Result<(Vec<FftRecord>, Option<ScanConfig>)> {
    let mut records = Vec::new();
    let mut config = None;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: ScanLine = serde_json::from_str(line)
            .map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
        for (freq, db) in &parsed.buckets {
            let freq: f64 = freq.parse().map_err(|_| {
                Error::new(
                    ErrorKind::InvalidData,
                    format!("non-numeric bucket frequency {:?}", freq),
                )
            })?;
            records.push(FftRecord {
                ts: parsed.ts,
                freq,
                db: *db,
                sweep_start: parsed.sweep_start,
            });
        }
        config = Some(parsed.config);
    }
    Ok((records, config))
}

/// Groups records into frames by sweep boundary
///
/// Records accumulate until a record with a sweep start greater than the
/// current one arrives. At that point all buffered records belonging to the
/// current sweep are returned as a closed frame and the rest are retained.
#[derive(Debug, Default)]
pub struct SweepBuffer {
    records: Vec<FftRecord>,
    last_sweep_start: f64,
}

impl SweepBuffer {
    /// Creates an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// The sweep start of the currently open frame
    pub fn last_sweep_start(&self) -> f64 {
        self.last_sweep_start
    }

    /// Adds a batch of records, closing a frame if the batch crosses a sweep
    /// boundary
    pub fn push_batch(&mut self, batch: Vec<FftRecord>) -> Option<Frame> {
        let max_sweep_start = batch
            .iter()
            .map(|record| record.sweep_start)
            .fold(f64::NEG_INFINITY, f64::max);
        self.records.extend(batch);
        if max_sweep_start == f64::NEG_INFINITY || max_sweep_start == self.last_sweep_start {
            return None;
        }
        let closing = self.last_sweep_start;
        let (closed, open): (Vec<FftRecord>, Vec<FftRecord>) = self
            .records
            .drain(..)
            .partition(|record| record.sweep_start == closing);
        self.records = open;
        self.last_sweep_start = max_sweep_start;
        Some(Frame {
            sweep_start: closing,
            records: closed,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(freq: f64, sweep_start: f64) -> FftRecord {
        FftRecord {
            ts: sweep_start,
            freq,
            db: -80.0,
            sweep_start,
        }
    }

    #[test]
    fn test_parse_one_line() {
        let line = r#"{"ts": 10.0, "sweep_start": 9.0,
            "buckets": {"100000000": -50.5, "100010000": -51.0},
            "config": {"freq_start": 100e6, "freq_end": 200e6}}"#;
        let (records, config) = parse_batch(&[line]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].freq, 100e6);
        assert_eq!(records[0].db, -50.5);
        assert_eq!(records[0].sweep_start, 9.0);
        assert_eq!(
            config,
            Some(ScanConfig {
                freq_start: 100e6,
                freq_end: 200e6
            })
        );
    }

    #[test]
    fn test_parse_bad_line_fails_batch() {
        let good = r#"{"ts": 1.0, "sweep_start": 1.0, "buckets": {"1": -1.0},
            "config": {"freq_start": 0.0, "freq_end": 1.0}}"#;
        let bad = r#"{"ts": 1.0, bogus"#;
        assert!(parse_batch(&[good, bad]).is_err());
    }

    #[test]
    fn test_parse_missing_key_fails_batch() {
        let missing = r#"{"ts": 1.0, "buckets": {},
            "config": {"freq_start": 0.0, "freq_end": 1.0}}"#;
        assert!(parse_batch(&[missing]).is_err());
    }

    #[test]
    fn test_first_boundary_closes_empty_frame() {
        let mut buffer = SweepBuffer::new();
        let frame = buffer.push_batch(vec![record(100e6, 1.0)]).unwrap();
        assert!(frame.is_empty());
        assert_eq!(buffer.last_sweep_start(), 1.0);
    }

    #[test]
    fn test_boundary_closes_current_sweep() {
        let mut buffer = SweepBuffer::new();
        buffer.push_batch(vec![record(100e6, 1.0)]);
        assert!(buffer.push_batch(vec![record(110e6, 1.0)]).is_none());
        let frame = buffer
            .push_batch(vec![record(120e6, 1.0), record(100e6, 2.0)])
            .unwrap();
        assert_eq!(frame.sweep_start, 1.0);
        assert_eq!(frame.records.len(), 3);
        assert!(frame.records.iter().all(|r| r.sweep_start == 1.0));
        assert_eq!(buffer.last_sweep_start(), 2.0);
    }

    #[test]
    fn test_interleaved_tail_is_retained() {
        // Records of sweep 2 arrive before the last record of sweep 1
        let mut buffer = SweepBuffer::new();
        buffer.push_batch(vec![record(100e6, 1.0)]);
        let frame = buffer
            .push_batch(vec![record(130e6, 2.0), record(110e6, 1.0)])
            .unwrap();
        // Both sweep-1 records close together; the sweep-2 record waits
        assert_eq!(frame.sweep_start, 1.0);
        assert_eq!(frame.records.len(), 2);
        assert!(frame.records.iter().all(|r| r.sweep_start == 1.0));
        let frame = buffer.push_batch(vec![record(140e6, 3.0)]).unwrap();
        assert_eq!(frame.sweep_start, 2.0);
        assert_eq!(frame.records.len(), 1);
        assert_eq!(frame.records[0].freq, 130e6);
    }
}
