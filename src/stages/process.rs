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

//! The process stage: spool files to detected frames
//!
//! Per open scan log the stage cycles OPEN, DRAIN, ROTATE. DRAIN pulls
//! spool files as the proxy publishes them, appends complete lines to the
//! scan log, groups records into sweep frames, and runs the detector and
//! dispatcher on every closed frame. When the log has been open longer than
//! the rotation interval the compressed ring is shifted and the log handed
//! to a background compression worker.

use std::fs::{self, OpenOptions};
use std::io::{Result, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{error, info};

use crate::detector::Detector;
use crate::dispatch::Dispatcher;
use crate::frame::{parse_batch, ScanConfig, SweepBuffer};
use crate::live::LiveFile;
use crate::metrics::Metrics;
use crate::rotate::{self, CompressHandle};
use crate::scheduler::Scheduler;
use crate::spool;
use crate::FFT_BUFFER_TIME;

/// Records further than this from the wall clock are dropped
const MAX_TS_SKEW: f64 = 60.0;

/// The setup for the process stage
pub struct ProcessSetup {
    /// Path of the scan log
    pub log_path: PathBuf,
    /// Path of the visible spool file
    pub buff_file: PathBuf,
    /// Seconds the scan log stays open before rotation
    pub rotate_secs: u64,
    /// How many compressed logs the rotation ring keeps
    pub nlog: usize,
    /// The liveness sentinel
    pub live: LiveFile,
    /// Cleared by the proxy thread when it exits
    pub proxy_running: Arc<AtomicBool>,
    /// The periodic job queue, run between spool polls
    pub scheduler: Arc<Scheduler>,
    /// Where rotated logs are sent for compression
    pub compress: CompressHandle,
    /// The signal detector
    pub detector: Detector,
    /// The recorder dispatcher
    pub dispatcher: Dispatcher,
    /// The metric families
    pub metrics: Arc<Metrics>,
    /// Sleep between spool polls
    pub poll_sleep: Duration,
}

/// What the process stage did before exiting
#[derive(Debug, Default)]
pub struct ProcessReport {
    /// Closed frames processed
    pub frames: u64,
    /// Spool files drained
    pub spools: u64,
}

/// Splits buffered text into complete lines and the trailing partial line
fn split_complete(buffered: String) -> (String, String) {
    match buffered.rfind('\n') {
        Some(index) => {
            let tail = buffered[index + 1..].to_string();
            let mut complete = buffered;
            complete.truncate(index + 1);
            (complete, tail)
        }
        None => (String::new(), buffered),
    }
}

/// Seconds since the epoch
fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

/// Runs the processor until shutdown or until the proxy stops
pub fn run_process_stage(mut setup: ProcessSetup) -> Result<ProcessReport> {
    let mut report = ProcessReport::default();
    let mut txt_buf = String::new();
    let mut sweeps = SweepBuffer::new();
    let mut scan_config: Option<ScanConfig> = None;
    let mut fft_packets: u64 = 0;
    let mut lastfreq: f64 = 0.0;
    let mut last_heartbeat = Instant::now();
    let heartbeat_every = FFT_BUFFER_TIME * 2;

    loop {
        if setup.log_path.exists() {
            info!("{} exists, will append", setup.log_path.display());
        } else {
            info!("opening {}", setup.log_path.display());
        }
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&setup.log_path)?;
        let opened = Instant::now();
        let mut rotate_now = false;

        while !rotate_now {
            if !setup.live.exists() {
                info!("liveness sentinel removed, processor exiting");
                return Ok(report);
            }
            if !setup.proxy_running.load(Ordering::Relaxed) {
                error!("FFT proxy stopped running");
                return Ok(report);
            }
            if last_heartbeat.elapsed() > heartbeat_every {
                info!(
                    "received {} FFT packets, last freq {} MHz",
                    fft_packets,
                    lastfreq / 1e6
                );
                fft_packets = 0;
                last_heartbeat = Instant::now();
            }

            if !setup.buff_file.exists() {
                setup.scheduler.run_pending();
                thread::sleep(setup.poll_sleep);
                continue;
            }
            if let Ok(meta) = fs::metadata(&setup.buff_file) {
                info!("read {} bytes of FFT data", meta.len());
            }
            let text = match spool::read_spool(&setup.buff_file) {
                Ok(text) => text,
                Err(e) => {
                    error!("could not read spool file: {}", e);
                    let _ = fs::remove_file(&setup.buff_file);
                    continue;
                }
            };
            fs::remove_file(&setup.buff_file)?;
            fft_packets += 1;
            report.spools += 1;
            txt_buf.push_str(&text);

            let (complete, tail) = split_complete(std::mem::take(&mut txt_buf));
            txt_buf = tail;
            if complete.is_empty() {
                continue;
            }
            log.write_all(complete.as_bytes())?;

            let lines: Vec<&str> = complete.lines().collect();
            let (records, config) = match parse_batch(&lines) {
                Ok(batch) => batch,
                Err(e) => {
                    error!("dropping batch of {} lines: {}", lines.len(), e);
                    continue;
                }
            };
            if config.is_some() {
                scan_config = config;
            }

            let now = epoch_secs();
            let records: Vec<_> = records
                .into_iter()
                .filter(|record| (now - record.ts).abs() < MAX_TS_SKEW)
                .collect();
            if let Some(last) = records.last() {
                lastfreq = last.freq;
            }

            let frame = match sweeps.push_batch(records) {
                Some(frame) => frame,
                None => continue,
            };
            let config = match scan_config {
                Some(config) => config,
                None => continue,
            };
            setup.metrics.frame_counter.inc();
            report.frames += 1;
            if !frame.is_empty() {
                info!(
                    "frame with sweep_start {}s ago",
                    (now - frame.sweep_start).round()
                );
            }
            let (bins, _resampled) = setup.detector.process_frame(&frame, &config, now)?;
            setup.dispatcher.observe_frame(&bins);
            if opened.elapsed().as_secs() > setup.rotate_secs {
                rotate_now = true;
            }
        }

        drop(log);
        info!("rotating {}", setup.log_path.display());
        if let Err(e) = rotate_and_submit(&setup) {
            // The next rotation retries
            error!("rotation of {} failed: {}", setup.log_path.display(), e);
        }
    }
}

/// Shifts the compressed ring, parks the log as `<log>.1`, and queues its
/// compression
fn rotate_and_submit(setup: &ProcessSetup) -> Result<()> {
    rotate::rotate_file_n(&setup.log_path, setup.nlog)?;
    let rotated = rotate::rotated_log(&setup.log_path);
    fs::rename(&setup.log_path, &rotated)?;
    setup.compress.submit(rotated);
    Ok(())
}
