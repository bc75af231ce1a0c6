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

//!
//! Top-level signal finding interface
//!

use std::fs;
use std::io::{Error, ErrorKind, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_utils::thread;
use log::{error, info};

use crate::stages::process::{run_process_stage, ProcessReport, ProcessSetup};
use crate::stages::proxy::{run_proxy_stage, ProxyReport, ProxySetup};

/// Setup for a signal finding run
pub struct FindSignalsSetup {
    /// The proxy stage setup
    pub proxy: ProxySetup,
    /// The process stage setup
    pub process: ProcessSetup,
}

/// Information about a completed signal finding run
#[derive(Debug)]
pub struct Report {
    /// Packets the proxy received
    pub packets: u64,
    /// Spool buffers the proxy published
    pub buffers: u64,
    /// Spool buffers the processor drained
    pub spools: u64,
    /// Closed frames processed
    pub frames: u64,
    /// Total run time
    pub run_time: Duration,
    /// Threads used, including the caller's
    pub threads: usize,
}

/// Runs the proxy and processor until shutdown and returns information
/// about the run
///
/// The proxy gets its own thread; the processor runs on the caller's
/// thread. Both stop when the liveness sentinel disappears, and the
/// processor also stops if the proxy dies.
pub fn find_signals(setup: FindSignalsSetup) -> Result<Report> {
    let FindSignalsSetup { proxy, process } = setup;

    // A leftover buffer from a previous run would confuse the rendezvous
    if process.buff_file.exists() {
        fs::remove_file(&process.buff_file)?;
    }

    let start_time = Instant::now();
    let proxy_running = Arc::clone(&process.proxy_running);
    let live = process.live.clone();

    let (proxy_report, process_report): (ProxyReport, ProcessReport) = thread::scope(|scope| {
        let proxy_thread = scope
            .builder()
            .name("fft-proxy".to_string())
            .spawn(move |_| {
                let result = run_proxy_stage(proxy);
                proxy_running.store(false, Ordering::Relaxed);
                match &result {
                    Ok(_) => info!("proxy thread clean exit"),
                    Err(e) => error!("proxy thread error: {}", e),
                }
                result
            })
            .expect("Failed to spawn proxy thread");

        let process_report = run_process_stage(process);

        // The processor may have exited on its own; make sure the proxy
        // follows before joining it
        if let Err(e) = live.remove() {
            error!("could not remove liveness sentinel: {}", e);
        }
        let proxy_report = match proxy_thread.join() {
            Ok(report) => report,
            Err(_) => Err(Error::new(ErrorKind::Other, "The proxy thread has panicked")),
        };
        process_report.and_then(|process| proxy_report.map(|proxy| (proxy, process)))
    })
    .expect("Unjoined thread panic")?;

    Ok(Report {
        packets: proxy_report.packets,
        buffers: proxy_report.buffers,
        spools: process_report.spools,
        frames: process_report.frames,
        run_time: Instant::now().duration_since(start_time),
        threads: 2,
    })
}
