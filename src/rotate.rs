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

//! Scan log rotation and background compression
//!
//! Rotation shifts the compressed ring `scan.log.1.zst` … `scan.log.N.zst`,
//! renames the live log to `scan.log.1`, and hands it to a small pool of
//! compression workers. Each worker produces the `.zst` sibling and removes
//! the uncompressed input.

use std::fs::{self, File};
use std::io::{BufWriter, Result, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use log::{debug, error, info};

/// Compression level for rotated logs
const ROTATE_LEVEL: i32 = 3;

/// Appends a suffix to a path without touching its extension
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// The numbered compressed ring member, `<log>.<n>.zst`
pub fn ring_member(log: &Path, n: usize) -> PathBuf {
    with_suffix(log, &format!(".{}.zst", n))
}

/// The rotated-but-not-yet-compressed log, `<log>.1`
pub fn rotated_log(log: &Path) -> PathBuf {
    with_suffix(log, ".1")
}

/// Shifts the compressed ring up by one, dropping the oldest member
///
/// After this, `<log>.1.zst` is free for the next compression job.
pub fn rotate_file_n(log: &Path, keep: usize) -> Result<()> {
    let oldest = ring_member(log, keep);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..keep).rev() {
        let from = ring_member(log, n);
        if from.exists() {
            fs::rename(&from, &ring_member(log, n + 1))?;
        }
    }
    Ok(())
}

/// Compresses `input` to `<input>.zst` and removes the input
pub fn compress_file(input: &Path) -> Result<()> {
    let output = with_suffix(input, ".zst");
    let mut source = File::open(input)?;
    let mut encoder = zstd::Encoder::new(BufWriter::new(File::create(&output)?), ROTATE_LEVEL)?;
    std::io::copy(&mut source, &mut encoder)?;
    encoder.finish()?.flush()?;
    fs::remove_file(input)?;
    debug!("compressed {} to {}", input.display(), output.display());
    Ok(())
}

/// A bounded pool of background compression workers
pub struct CompressPool {
    tx: Option<Sender<PathBuf>>,
    workers: Vec<JoinHandle<()>>,
}

impl CompressPool {
    /// Starts `workers` compression threads
    pub fn new(workers: usize) -> Self {
        let (tx, rx) = bounded::<PathBuf>(workers);
        let workers = (0..workers)
            .map(|n| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("compress {}", n))
                    .spawn(move || {
                        for path in rx.iter() {
                            if let Err(e) = compress_file(&path) {
                                error!("failed to compress {}: {}", path.display(), e);
                            }
                        }
                    })
                    .expect("failed to spawn compression worker")
            })
            .collect();
        CompressPool {
            tx: Some(tx),
            workers,
        }
    }

    /// Returns a handle jobs can be submitted through
    pub fn handle(&self) -> CompressHandle {
        CompressHandle {
            tx: self.tx.clone(),
        }
    }

    /// Waits for queued jobs to finish and stops the workers
    pub fn shutdown(mut self) {
        drop(self.tx.take());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("a compression worker panicked");
            }
        }
        info!("compression workers stopped");
    }
}

/// A cloneable submission handle for the compression pool
#[derive(Clone)]
pub struct CompressHandle {
    tx: Option<Sender<PathBuf>>,
}

impl CompressHandle {
    /// Queues a file for background compression
    ///
    /// Blocks briefly if all workers are busy and the queue is full.
    pub fn submit(&self, path: PathBuf) {
        if let Some(tx) = &self.tx {
            if tx.send(path).is_err() {
                error!("compression pool is gone, dropping job");
            }
        }
    }

    /// A handle that silently drops jobs, for tests and tools that do not
    /// compress
    pub fn disconnected() -> Self {
        CompressHandle { tx: None }
    }
}
