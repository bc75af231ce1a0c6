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

//! Per-frame signal detection
//!
//! For every closed frame the detector resamples onto the fixed grid,
//! smooths the dB curve, finds peaks, maps them to monitoring bins, folds
//! the frame into the running average, and updates the metrics. Given the
//! same frame, state, and parameters it always produces the same bins,
//! resampled frame, and metric deltas.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::{Result, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::bins::{get_center, BinCenter, BinSet};
use crate::frame::{Frame, ScanConfig};
use crate::metrics::Metrics;
use crate::snapshot::PeakSnapshot;
use crate::steps::peaks::{find_peaks, PeakParams};
use crate::steps::resample::{resample, ResampledFrame};
use crate::steps::smooth::rolling_mean;
use crate::trigger::PeakTrigger;
use crate::SCAN_FRES;

/// Detection parameters
#[derive(Debug, Clone)]
pub struct DetectorParams {
    /// Monitoring bin width, in MHz
    pub bin_mhz: f64,
    /// Recorder bandwidth, in MB samples per second
    pub record_bw_msps: f64,
    /// Peak acceptance parameters
    pub peaks: PeakParams,
    /// Trailing window of the dB smoother; zero or negative disables it
    pub db_rolling_factor: f64,
    /// Age limit of the running average window, in seconds
    pub running_fft_secs: u64,
    /// How many recent frames to keep for the plot renderer
    pub nfftplots: usize,
    /// Where to write the latest resampled frame, if anywhere
    pub fftlog: Option<PathBuf>,
}

/// One grid observation in the running average window
#[derive(Debug, Clone, Copy)]
struct RunningPoint {
    ts: f64,
    key: i64,
    db: f64,
}

/// The time-windowed buffer behind the long-term mean spectrum
#[derive(Debug, Default)]
struct RunningFft {
    points: VecDeque<RunningPoint>,
}

impl RunningFft {
    /// Drops points older than the cutoff
    fn purge(&mut self, cutoff: f64) {
        self.points.retain(|point| point.ts >= cutoff);
    }

    /// Appends all grid points of a resampled frame
    fn append(&mut self, frame: &ResampledFrame) {
        for (freq, db) in frame.freqs.iter().zip(&frame.dbs) {
            self.points.push_back(RunningPoint {
                ts: frame.ts,
                key: (freq * 1e6 / SCAN_FRES).round() as i64,
                db: *db,
            });
        }
    }

    /// The mean dB per grid frequency over the window
    fn mean_spectrum(&self) -> Vec<(f64, f64)> {
        let mut cells: BTreeMap<i64, (f64, u32)> = BTreeMap::new();
        for point in &self.points {
            let cell = cells.entry(point.key).or_insert((0.0, 0));
            cell.0 += point.db;
            cell.1 += 1;
        }
        cells
            .into_iter()
            .map(|(key, (sum, count))| (key as f64 * SCAN_FRES / 1e6, sum / f64::from(count)))
            .collect()
    }
}

/// The signal detector
///
/// Owns all cross-frame state: the running average window, the previous
/// frame's bin set, and the recent frames kept for the plot renderer.
pub struct Detector {
    params: DetectorParams,
    running: RunningFft,
    running_mean: Vec<(f64, f64)>,
    lastbins: BinSet,
    plots: VecDeque<(Vec<f64>, Vec<f64>)>,
    metrics: Arc<Metrics>,
    snapshot: Arc<PeakSnapshot>,
    trigger: Option<PeakTrigger>,
}

impl Detector {
    /// Creates a detector with empty state
    pub fn new(
        params: DetectorParams,
        metrics: Arc<Metrics>,
        snapshot: Arc<PeakSnapshot>,
        trigger: Option<PeakTrigger>,
    ) -> Self {
        Detector {
            params,
            running: RunningFft::default(),
            running_mean: Vec::new(),
            lastbins: BinSet::new(),
            plots: VecDeque::new(),
            metrics,
            snapshot,
            trigger,
        }
    }

    /// The bin set of the most recent frame
    pub fn lastbins(&self) -> &BinSet {
        &self.lastbins
    }

    /// The mean spectrum over the running average window, for the plot
    /// renderer
    pub fn running_mean(&self) -> &[(f64, f64)] {
        &self.running_mean
    }

    /// The last frames' curves kept for the plot renderer, oldest first
    pub fn recent_plots(&self) -> &VecDeque<(Vec<f64>, Vec<f64>)> {
        &self.plots
    }

    /// Processes one closed frame
    ///
    /// Returns the detected bin set and the resampled frame. An empty frame
    /// produces an empty bin set and leaves all state and metrics untouched.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        config: &ScanConfig,
        now: f64,
    ) -> Result<(BinSet, ResampledFrame)> {
        let mut resampled = resample(&frame.records);
        if resampled.is_empty() {
            return Ok((BinSet::new(), resampled));
        }

        let window = self.params.db_rolling_factor;
        if window > 0.0 {
            rolling_mean(&mut resampled.dbs, window as usize);
        }

        self.check_grid(&resampled);

        if let Some(path) = self.params.fftlog.clone() {
            write_fftlog(&path, &resampled)?;
        }

        let peak_indices = find_peaks(&resampled.dbs, &self.params.peaks);

        if !peak_indices.is_empty() {
            if let Some(trigger) = &self.trigger {
                trigger.blink();
            }
        }

        self.running
            .purge(now - self.params.running_fft_secs as f64);
        self.running.append(&resampled);
        self.running_mean = self.running.mean_spectrum();

        let freq_start_mhz = config.freq_start / 1e6;
        // Recording windows must also fit below the top of the scanned range
        let max_center_mhz = config.freq_end / 1e6 - self.params.record_bw_msps / 2.0;
        let mut monitor_bins = BinSet::new();
        let mut peak_dbs = BTreeMap::new();
        for index in peak_indices {
            let peak_freq = resampled.freqs[index];
            let peak_db = resampled.dbs[index];
            let center = get_center(
                peak_freq,
                freq_start_mhz,
                self.params.bin_mhz,
                self.params.record_bw_msps,
            );
            let center = if center.mhz() > max_center_mhz {
                BinCenter::from_mhz(max_center_mhz)
            } else {
                center
            };
            info!(
                "detected peak at {} MHz {} dB, assigned bin frequency {} MHz",
                peak_freq, peak_db, center
            );
            let label = center.to_string();
            self.metrics
                .bin_freq_count
                .with_label_values(&[label.as_str()])
                .inc();
            self.metrics
                .last_bin_freq_time
                .with_label_values(&[label.as_str()])
                .set(resampled.ts);
            monitor_bins.insert(center);
            peak_dbs.insert(center, peak_db);
        }
        info!(
            "current bins {} to {} MHz: {:?}",
            resampled.freqs.first().unwrap_or(&0.0),
            resampled.freqs.last().unwrap_or(&0.0),
            peak_dbs
        );

        self.snapshot
            .publish(peak_dbs.iter().map(|(bin, db)| (*bin, *db)).collect());

        let new_bins: Vec<_> = monitor_bins.difference(&self.lastbins).copied().collect();
        if !new_bins.is_empty() {
            info!("new bins: {:?}", new_bins);
        }
        let old_bins: Vec<_> = self.lastbins.difference(&monitor_bins).copied().collect();
        if !old_bins.is_empty() {
            info!("old bins: {:?}", old_bins);
        }
        for (bin, db) in &peak_dbs {
            let label = bin.to_string();
            self.metrics
                .freq_power
                .with_label_values(&[label.as_str()])
                .set(*db);
        }
        for bin in &new_bins {
            let label = bin.to_string();
            self.metrics
                .new_bins
                .with_label_values(&[label.as_str()])
                .inc();
        }
        for bin in &old_bins {
            let label = bin.to_string();
            self.metrics
                .old_bins
                .with_label_values(&[label.as_str()])
                .inc();
        }

        self.lastbins = monitor_bins.clone();

        if self.params.nfftplots > 0 {
            self.plots
                .push_back((resampled.freqs.clone(), resampled.dbs.clone()));
            while self.plots.len() > self.params.nfftplots {
                self.plots.pop_front();
            }
        }

        Ok((monitor_bins, resampled))
    }

    /// Warns when the frame is sampled more coarsely than the grid expects
    fn check_grid(&self, resampled: &ResampledFrame) {
        let diffs: Vec<f64> = resampled.freqs.windows(2).map(|w| w[1] - w[0]).collect();
        if diffs.is_empty() {
            return;
        }
        let min = diffs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = diffs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
        info!(
            "new frame with {} samples, frequency sample differences min {} mean {} max {}",
            resampled.len(),
            min,
            mean,
            max
        );
        if mean > min * 2.0 {
            warn!("mean frequency diff larger than minimum - increase scanner sample rate");
        }
    }
}

/// Writes the resampled frame as tab-separated `freq  db` lines
///
/// The file appears atomically: a dotfile sibling is written first and then
/// renamed over the destination.
fn write_fftlog(path: &Path, frame: &ResampledFrame) -> Result<()> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let hidden = path.with_file_name(format!(".{}", name));
    {
        let mut file = fs::File::create(&hidden)?;
        for (freq, db) in frame.freqs.iter().zip(&frame.dbs) {
            writeln!(file, "{}\t{}", freq, db)?;
        }
    }
    fs::rename(&hidden, path)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::FftRecord;
    use crate::steps::peaks::PeakParams;

    fn params() -> DetectorParams {
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
        }
    }

    fn detector(params: DetectorParams) -> Detector {
        Detector::new(
            params,
            Arc::new(Metrics::new().unwrap()),
            Arc::new(PeakSnapshot::new()),
            None,
        )
    }

    fn config() -> ScanConfig {
        ScanConfig {
            freq_start: 100e6,
            freq_end: 200e6,
        }
    }

    /// A full sweep at the floor with a triangular bump around `peak_mhz`
    fn sweep(sweep_start: f64, peak_mhz: f64, peak_db: f64) -> Frame {
        let mut records = Vec::new();
        let mut freq = 100e6;
        while freq <= 200e6 {
            let distance = ((freq - peak_mhz * 1e6) / SCAN_FRES).abs();
            let db = if distance < 12.0 {
                peak_db - distance * (peak_db + 80.0) / 12.0
            } else {
                -80.0
            };
            records.push(FftRecord {
                ts: sweep_start + 1.0,
                freq,
                db,
                sweep_start,
            });
            freq += SCAN_FRES;
        }
        Frame {
            sweep_start,
            records,
        }
    }

    #[test]
    fn test_empty_frame() {
        let mut detector = detector(params());
        let (bins, resampled) = detector
            .process_frame(&Frame::default(), &config(), 1000.0)
            .unwrap();
        assert!(bins.is_empty());
        assert!(resampled.is_empty());
        let text = detector.metrics.render().unwrap();
        assert!(!text.contains("freq_power{"));
        assert!(!text.contains("bin_freq_count{"));
    }

    #[test]
    fn test_single_peak_maps_to_bin() {
        let mut detector = detector(params());
        let frame = sweep(1000.0, 150.0, -20.0);
        let (bins, _) = detector.process_frame(&frame, &config(), 1001.0).unwrap();
        let expected: BinSet = [crate::bins::BinCenter::from_mhz(150.0)]
            .iter()
            .copied()
            .collect();
        assert_eq!(bins, expected);
        let text = detector.metrics.render().unwrap();
        assert!(text.contains("freq_power{bin_freq=\"150.0\"} -20"));
        assert!(text.contains("new_bins{bin_freq=\"150.0\"} 1"));
        let snapshot = detector.snapshot.read();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].1, -20.0);
    }

    #[test]
    fn test_bin_clamped_below_range_top() {
        let mut detector = detector(params());
        let mut frame = sweep(1.0, 193.0, -20.0);
        frame.records.retain(|r| r.freq <= 195e6);
        let config = ScanConfig {
            freq_start: 100e6,
            freq_end: 195e6,
        };
        let (bins, _) = detector.process_frame(&frame, &config, 2.0).unwrap();
        let centers: Vec<f64> = bins.iter().map(|bin| bin.mhz()).collect();
        assert_eq!(centers, vec![185.0]);
    }

    #[test]
    fn test_new_and_old_bins_across_frames() {
        let mut detector = detector(params());
        detector
            .process_frame(&sweep(1.0, 110.0, -20.0), &config(), 2.0)
            .unwrap();
        detector
            .process_frame(&sweep(2.0, 130.0, -20.0), &config(), 3.0)
            .unwrap();
        let text = detector.metrics.render().unwrap();
        assert!(text.contains("new_bins{bin_freq=\"110.0\"} 1"));
        assert!(text.contains("new_bins{bin_freq=\"130.0\"} 1"));
        assert!(text.contains("old_bins{bin_freq=\"110.0\"} 1"));
    }

    #[test]
    fn test_deterministic_given_same_inputs() {
        let frame = sweep(1.0, 150.0, -20.0);
        let mut first = detector(params());
        let mut second = detector(params());
        let a = first.process_frame(&frame, &config(), 2.0).unwrap();
        let b = second.process_frame(&frame, &config(), 2.0).unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
        assert_eq!(
            first.metrics.render().unwrap(),
            second.metrics.render().unwrap()
        );
    }

    #[test]
    fn test_running_window_purges_old_points() {
        let mut detector = detector(params());
        detector
            .process_frame(&sweep(1.0, 110.0, -20.0), &config(), 2.0)
            .unwrap();
        let cells = detector.running_mean().len();
        // Far in the future every old point is gone; only the new frame stays
        detector
            .process_frame(&sweep(5000.0, 110.0, -20.0), &config(), 5001.0)
            .unwrap();
        assert_eq!(detector.running_mean().len(), cells);
    }

    #[test]
    fn test_plot_history_bounded() {
        let mut params = params();
        params.nfftplots = 2;
        let mut detector = detector(params);
        for i in 0..5 {
            let start = f64::from(i);
            detector
                .process_frame(&sweep(start, 110.0, -20.0), &config(), start + 1.0)
                .unwrap();
        }
        assert_eq!(detector.recent_plots().len(), 2);
    }

    #[test]
    fn test_fftlog_written_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let fftlog = dir.path().join("fft.tsv");
        let mut params = params();
        params.fftlog = Some(fftlog.clone());
        let mut detector = detector(params);
        detector
            .process_frame(&sweep(1.0, 110.0, -20.0), &config(), 2.0)
            .unwrap();
        let text = fs::read_to_string(&fftlog).unwrap();
        assert!(text.lines().count() > 1000);
        assert!(!dir.path().join(".fft.tsv").exists());
    }
}
