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

//! End-to-end tests of the process stage: spool files in, frames, metrics,
//! and rotation out

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use sigfinder::detector::{Detector, DetectorParams};
use sigfinder::dispatch::Dispatcher;
use sigfinder::live::LiveFile;
use sigfinder::metrics::Metrics;
use sigfinder::rotate::{CompressHandle, CompressPool};
use sigfinder::scheduler::Scheduler;
use sigfinder::snapshot::PeakSnapshot;
use sigfinder::spool::SpoolWriter;
use sigfinder::stages::process::{run_process_stage, ProcessReport, ProcessSetup};
use sigfinder::steps::peaks::PeakParams;
use sigfinder::SCAN_FRES;

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

/// One scan line covering 100-200 MHz at the noise floor, with a triangular
/// bump around `peak_mhz`
fn sweep_line(sweep_start: f64, peak_mhz: f64) -> String {
    let ts = epoch_secs();
    let mut buckets = Vec::new();
    let mut freq = 100e6;
    while freq <= 200e6 {
        let distance = ((freq - peak_mhz * 1e6) / SCAN_FRES).abs();
        let db = if distance < 12.0 {
            -20.0 - distance * 5.0
        } else {
            -80.0
        };
        buckets.push(format!("\"{}\": {}", freq, db));
        freq += SCAN_FRES;
    }
    format!(
        "{{\"ts\": {}, \"sweep_start\": {}, \"buckets\": {{{}}}, \
         \"config\": {{\"freq_start\": 100e6, \"freq_end\": 200e6}}}}\n",
        ts,
        sweep_start,
        buckets.join(", ")
    )
}

struct Harness {
    dir: tempfile::TempDir,
    live: LiveFile,
    metrics: Arc<Metrics>,
    processor: JoinHandle<std::io::Result<ProcessReport>>,
}

impl Harness {
    /// Starts a process stage over a temporary directory
    fn start(rotate_secs: u64, compress: CompressHandle) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let live = LiveFile::create(&dir.path().join("live_file")).unwrap();
        let metrics = Arc::new(Metrics::new().unwrap());
        let detector = Detector::new(
            DetectorParams {
                bin_mhz: 20.0,
                record_bw_msps: 20.0,
                peaks: PeakParams {
                    width: 10.0,
                    prominence: 2.0,
                    threshold: -35.0,
                },
                db_rolling_factor: 0.0,
                running_fft_secs: 900,
                nfftplots: 10,
                fftlog: None,
            },
            Arc::clone(&metrics),
            Arc::new(PeakSnapshot::new()),
            None,
        );
        let dispatcher = Dispatcher::new(Vec::new(), 20, 2, 1, 5, Arc::clone(&metrics));
        let setup = ProcessSetup {
            log_path: dir.path().join("scan.log"),
            buff_file: dir.path().join("scanfftbuffer.txt.zst"),
            rotate_secs,
            nlog: 10,
            live: live.clone(),
            proxy_running: Arc::new(AtomicBool::new(true)),
            scheduler: Arc::new(Scheduler::new()),
            compress,
            detector,
            dispatcher,
            metrics: Arc::clone(&metrics),
            poll_sleep: Duration::from_millis(20),
        };
        let processor = thread::spawn(move || run_process_stage(setup));
        Harness {
            dir,
            live,
            metrics,
            processor,
        }
    }

    fn log_path(&self) -> PathBuf {
        self.dir.path().join("scan.log")
    }

    /// Publishes one spool file and waits for the processor to drain it
    fn publish(&self, text: &str) {
        let visible = self.dir.path().join("scanfftbuffer.txt.zst");
        let deadline = Instant::now() + Duration::from_secs(10);
        while visible.exists() {
            assert!(Instant::now() < deadline, "processor never drained spool");
            thread::sleep(Duration::from_millis(10));
        }
        let mut writer = SpoolWriter::new(self.dir.path()).unwrap();
        writer.write(text.as_bytes()).unwrap();
        writer.publish().unwrap();
        while visible.exists() {
            assert!(Instant::now() < deadline, "processor never drained spool");
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Removes the sentinel and returns the processor's report
    fn stop(self) -> (ProcessReport, Arc<Metrics>, tempfile::TempDir) {
        self.live.remove().unwrap();
        let report = self.processor.join().unwrap().unwrap();
        (report, self.metrics, self.dir)
    }
}

#[test]
fn test_two_sweeps_frame_boundary() {
    let harness = Harness::start(3600, CompressHandle::disconnected());
    harness.publish(&sweep_line(1000.0, 110.0));
    harness.publish(&sweep_line(1001.0, 130.0));
    harness.publish(&sweep_line(1002.0, 150.0));
    let log_path = harness.log_path();
    let (report, metrics, _dir) = harness.stop();

    // Boundary 0 -> 1000 closes an empty frame; the next two close the
    // sweeps with peaks at 110 and 130 MHz
    assert_eq!(report.frames, 3);
    assert_eq!(report.spools, 3);
    let text = metrics.render().unwrap();
    assert!(text.contains("frame_counter 3"));
    assert!(text.contains("new_bins{bin_freq=\"110.0\"} 1"));
    assert!(text.contains("new_bins{bin_freq=\"130.0\"} 1"));
    assert!(text.contains("old_bins{bin_freq=\"110.0\"} 1"));
    assert!(text.contains("freq_power{bin_freq=\"130.0\"} -20"));

    // Every complete line reached the scan log
    let log = fs::read_to_string(log_path).unwrap();
    assert_eq!(log.lines().count(), 3);
    assert!(log.contains("\"sweep_start\": 1000"));
}

#[test]
fn test_split_delivery_is_equivalent() {
    // The same sweep delivered in two spool files, split mid-line
    let harness = Harness::start(3600, CompressHandle::disconnected());
    let line = sweep_line(1000.0, 110.0);
    let (head, tail) = line.split_at(line.len() / 2);
    harness.publish(head);
    harness.publish(tail);
    harness.publish(&sweep_line(1001.0, 110.0));
    let (report, metrics, _dir) = harness.stop();

    assert_eq!(report.frames, 2);
    let text = metrics.render().unwrap();
    assert!(text.contains("new_bins{bin_freq=\"110.0\"} 1"));
    assert!(text.contains("freq_power{bin_freq=\"110.0\"} -20"));
}

#[test]
fn test_malformed_line_skips_batch_only() {
    let harness = Harness::start(3600, CompressHandle::disconnected());
    harness.publish("{\"ts\": 1.0, bogus\n");
    harness.publish(&sweep_line(1000.0, 110.0));
    harness.publish(&sweep_line(1001.0, 130.0));
    let (report, metrics, _dir) = harness.stop();

    // The bad batch is dropped; later batches process normally
    assert_eq!(report.frames, 2);
    let text = metrics.render().unwrap();
    assert!(text.contains("new_bins{bin_freq=\"110.0\"} 1"));
}

#[test]
fn test_stale_records_are_dropped() {
    let harness = Harness::start(3600, CompressHandle::disconnected());
    // A record 120 s in the past, then a fresh boundary record
    let stale = format!(
        "{{\"ts\": {}, \"sweep_start\": 1000, \"buckets\": {{\"150000000\": -20.0}}, \
         \"config\": {{\"freq_start\": 100e6, \"freq_end\": 200e6}}}}\n",
        epoch_secs() - 120.0
    );
    harness.publish(&stale);
    harness.publish(&sweep_line(1001.0, 110.0));
    harness.publish(&sweep_line(1002.0, 130.0));
    let (report, metrics, _dir) = harness.stop();

    // The stale record never joined a frame, so sweep 1001 is the first
    // closed frame with records
    assert_eq!(report.frames, 2);
    let text = metrics.render().unwrap();
    assert!(text.contains("new_bins{bin_freq=\"110.0\"} 1"));
    assert!(!text.contains("bin_freq=\"150.0\""));
}

#[test]
fn test_rotation_produces_compressed_ring() {
    let pool = CompressPool::new(1);
    let harness = Harness::start(0, pool.handle());
    harness.publish(&sweep_line(1000.0, 110.0));
    // Let the log age past the rotation interval, then cross a boundary
    thread::sleep(Duration::from_millis(1100));
    harness.publish(&sweep_line(1001.0, 130.0));
    let log_path = harness.log_path();
    let rotated = log_path.with_file_name("scan.log.1");
    let compressed = log_path.with_file_name("scan.log.1.zst");
    let deadline = Instant::now() + Duration::from_secs(10);
    while !rotated.exists() && !compressed.exists() {
        assert!(Instant::now() < deadline, "rotation never happened");
        thread::sleep(Duration::from_millis(20));
    }
    let (_report, _metrics, _dir) = harness.stop();
    pool.shutdown();
    assert!(compressed.exists());
    assert!(!rotated.exists());
    // A fresh scan.log was opened after rotation
    assert!(log_path.exists());
}
