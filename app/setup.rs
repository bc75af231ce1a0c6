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

use std::error::Error;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tempfile::TempDir;

use sigfinder::control::ControlSetup;
use sigfinder::detector::{Detector, DetectorParams};
use sigfinder::dispatch::Dispatcher;
use sigfinder::live::LiveFile;
use sigfinder::metrics::Metrics;
use sigfinder::rotate::CompressPool;
use sigfinder::scheduler::Scheduler;
use sigfinder::snapshot::PeakSnapshot;
use sigfinder::spool;
use sigfinder::stages::process::ProcessSetup;
use sigfinder::stages::proxy::ProxySetup;
use sigfinder::steps::peaks::PeakParams;
use sigfinder::trigger::PeakTrigger;
use sigfinder::FFT_BUFFER_TIME;

use super::args::Args;

/// Number of background log compression workers
const COMPRESS_WORKERS: usize = 2;

/// The assembled runtime, built from the command-line arguments
///
/// A Setup is created from the command-line arguments (Args)
pub struct Setup {
    /// The proxy stage setup
    pub proxy: ProxySetup,
    /// The process stage setup
    pub process: ProcessSetup,
    /// The control surface setup
    pub control: ControlSetup,
    /// The metric families
    pub metrics: Arc<Metrics>,
    /// The background compression workers
    pub compress_pool: CompressPool,
    /// The liveness sentinel
    pub live: LiveFile,
    /// Prometheus exporter port
    pub promport: u16,
    /// Holds the liveness sentinel's directory for the life of the run
    pub live_dir: TempDir,
}

impl Setup {
    pub fn from_args(args: Args, zmq: &zmq::Context) -> Result<Self, Box<dyn Error>> {
        if let Some(fftgraph) = &args.fftgraph {
            warn!(
                "FFT graphs at {} (keeping {}) are produced by the external renderer; \
                 this service only feeds it",
                fftgraph.display(),
                args.nfftgraph
            );
        }

        let metrics = Arc::new(Metrics::new()?);
        let snapshot = Arc::new(PeakSnapshot::new());
        let scheduler = Arc::new(Scheduler::new());
        let trigger = PeakTrigger::from_env();

        let detector = Detector::new(
            DetectorParams {
                bin_mhz: f64::from(args.bin_mhz),
                record_bw_msps: args.record_bw_msps as f64,
                peaks: PeakParams {
                    width: f64::from(args.width),
                    prominence: args.prominence,
                    threshold: args.threshold,
                },
                db_rolling_factor: args.db_rolling_factor,
                running_fft_secs: args.running_fft_secs,
                nfftplots: args.nfftplots,
                fftlog: args.fftlog,
            },
            Arc::clone(&metrics),
            Arc::clone(&snapshot),
            trigger,
        );

        let dispatcher = Dispatcher::new(
            args.recorder,
            args.record_bw_msps,
            args.record_secs,
            args.max_recorder_signals,
            args.history,
            Arc::clone(&metrics),
        );

        let live_dir = tempfile::tempdir()?;
        let live = LiveFile::create(&live_dir.path().join("live_file"))?;

        let compress_pool = CompressPool::new(COMPRESS_WORKERS);

        let proxy = ProxySetup {
            context: zmq.clone(),
            logaddr: args.logaddr,
            logport: args.logport,
            buff_path: args.buff_path.clone(),
            buffer_time: FFT_BUFFER_TIME,
            poll_timeout: Duration::from_secs(1),
            live: live.clone(),
        };

        let process = ProcessSetup {
            log_path: args.log,
            buff_file: spool::buff_file(&args.buff_path),
            rotate_secs: args.rotatesecs,
            nlog: args.nlog,
            live: live.clone(),
            proxy_running: Arc::new(AtomicBool::new(true)),
            scheduler: Arc::clone(&scheduler),
            compress: compress_pool.handle(),
            detector,
            dispatcher,
            metrics: Arc::clone(&metrics),
            poll_sleep: Duration::from_secs(1),
        };

        let control = ControlSetup {
            port: args.port,
            scheduler,
            snapshot,
        };

        Ok(Setup {
            proxy,
            process,
            control,
            metrics,
            compress_pool,
            live,
            promport: args.promport,
            live_dir,
        })
    }
}
