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

//! Compressed spool files handed from the proxy to the processor
//!
//! The proxy streams received packets into a Zstandard-compressed file with a
//! dotfile-prefixed name. Publishing finishes the compressor and renames the
//! hidden file to the visible name in one step, so the processor only ever
//! observes complete files. The visible name existing means a buffer is ready
//! and the producer must not touch it.

use std::fs::{self, File};
use std::io::{BufWriter, Result, Write};
use std::path::{Path, PathBuf};

/// Name of the visible spool file
pub const BUFF_FILE: &str = "scanfftbuffer.txt.zst";

/// Compression level for spool files
const SPOOL_LEVEL: i32 = 3;

/// Returns the visible spool path under a buffer directory
pub fn buff_file(buff_path: &Path) -> PathBuf {
    buff_path.join(BUFF_FILE)
}

/// Returns the hidden sibling of the visible spool path
fn hidden_file(buff_path: &Path) -> PathBuf {
    buff_path.join(format!(".{}", BUFF_FILE))
}

/// Streams bytes into a hidden compressed spool file and atomically publishes
/// complete buffers under the visible name
pub struct SpoolWriter {
    hidden: PathBuf,
    visible: PathBuf,
    encoder: Option<zstd::Encoder<'static, BufWriter<File>>>,
    bytes_in: u64,
}

impl SpoolWriter {
    /// Creates a writer in `buff_path`, removing any stale hidden file from a
    /// previous run
    pub fn new(buff_path: &Path) -> Result<Self> {
        let hidden = hidden_file(buff_path);
        if hidden.exists() {
            fs::remove_file(&hidden)?;
        }
        let mut writer = SpoolWriter {
            hidden,
            visible: buff_file(buff_path),
            encoder: None,
            bytes_in: 0,
        };
        writer.open()?;
        Ok(writer)
    }

    fn open(&mut self) -> Result<()> {
        let file = File::create(&self.hidden)?;
        self.encoder = Some(zstd::Encoder::new(BufWriter::new(file), SPOOL_LEVEL)?);
        self.bytes_in = 0;
        Ok(())
    }

    /// True if a published buffer is still waiting for the consumer
    pub fn visible_exists(&self) -> bool {
        self.visible.exists()
    }

    /// Number of uncompressed bytes written since the last publish
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Appends bytes to the current hidden file
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        // The encoder is always present between calls; open() restores it
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.write_all(bytes)?;
            self.bytes_in += bytes.len() as u64;
        }
        Ok(())
    }

    /// Finishes the current file, renames it to the visible name, and starts
    /// a new hidden file
    pub fn publish(&mut self) -> Result<()> {
        if let Some(encoder) = self.encoder.take() {
            let mut inner = encoder.finish()?;
            inner.flush()?;
        }
        fs::rename(&self.hidden, &self.visible)?;
        self.open()
    }
}

/// Reads and decompresses a complete spool file
///
/// The caller removes the file after draining it.
pub fn read_spool(path: &Path) -> Result<String> {
    let bytes = zstd::stream::decode_all(File::open(path)?)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
