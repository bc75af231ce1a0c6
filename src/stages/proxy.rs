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

//! The proxy stage: scanner publisher to spool files
//!
//! Subscribes to the FFT publisher over ZeroMQ and writes every received
//! packet verbatim into the compressed spool. Once a buffer period has
//! passed and the previous buffer has been consumed, the current file is
//! published for the processor.

use std::io::Result;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::live::LiveFile;
use crate::spool::SpoolWriter;

/// The setup for the proxy stage
pub struct ProxySetup {
    /// The ZeroMQ context shared with the rest of the process
    pub context: zmq::Context,
    /// Host of the FFT publisher
    pub logaddr: String,
    /// Port of the FFT publisher
    pub logport: u16,
    /// Directory spool files are written in
    pub buff_path: PathBuf,
    /// How long packets accumulate before a buffer is published
    pub buffer_time: Duration,
    /// Sleep between polls of an idle socket
    pub poll_timeout: Duration,
    /// The liveness sentinel
    pub live: LiveFile,
}

/// What the proxy stage did before exiting
#[derive(Debug, Default)]
pub struct ProxyReport {
    /// Packets received from the publisher
    pub packets: u64,
    /// Spool files published for the processor
    pub buffers: u64,
}

/// Runs the proxy until the liveness sentinel disappears
pub fn run_proxy_stage(setup: ProxySetup) -> Result<ProxyReport> {
    let addr = format!("tcp://{}:{}", setup.logaddr, setup.logport);
    info!("connecting to {}", addr);
    let socket = loop {
        match subscribe(&setup.context, &addr) {
            Ok(socket) => break socket,
            Err(e) => {
                warn!("subscribe to {} failed, retrying: {}", addr, e);
                if !setup.live.exists() {
                    return Ok(ProxyReport::default());
                }
                thread::sleep(setup.poll_timeout);
            }
        }
    };

    let mut writer = SpoolWriter::new(&setup.buff_path)?;
    let mut report = ProxyReport::default();
    let mut last_publish = Instant::now();
    loop {
        let shutdown = !setup.live.exists();
        match socket.recv_bytes(zmq::DONTWAIT) {
            Ok(packet) => {
                writer.write(&packet)?;
                report.packets += 1;
                if (shutdown || last_publish.elapsed() > setup.buffer_time)
                    && !writer.visible_exists()
                {
                    if report.buffers == 0 {
                        info!("recording first FFT packet");
                    }
                    writer.publish()?;
                    report.buffers += 1;
                    last_publish = Instant::now();
                }
            }
            Err(zmq::Error::EAGAIN) => {
                if !shutdown {
                    thread::sleep(setup.poll_timeout);
                }
            }
            Err(e) => {
                debug!("receive from {} failed: {}", addr, e);
                if !shutdown {
                    thread::sleep(setup.poll_timeout);
                }
            }
        }
        if shutdown {
            // Hand over whatever is buffered, unless a published file is
            // still waiting
            if writer.bytes_in() > 0 && !writer.visible_exists() {
                writer.publish()?;
                report.buffers += 1;
            }
            info!(
                "proxy exiting after {} packets in {} buffers",
                report.packets, report.buffers
            );
            return Ok(report);
        }
    }
}

/// Opens a SUB socket connected to the publisher, subscribed to everything
fn subscribe(context: &zmq::Context, addr: &str) -> zmq::Result<zmq::Socket> {
    let socket = context.socket(zmq::SUB)?;
    socket.connect(addr)?;
    socket.set_subscribe(b"")?;
    Ok(socket)
}
