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

//! Monitoring bins and the bounded bin history
//!
//! The scanned range is divided into `bin_mhz`-wide slices anchored at the
//! scanner's start frequency. A bin is identified by its center frequency,
//! which is also what recorders are asked to capture.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

/// A monitoring bin, identified by its center frequency
///
/// Centers are held in kilohertz so bins are exact to compare and order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BinCenter(i64);

impl BinCenter {
    /// Creates a bin center from a frequency in MHz
    pub fn from_mhz(mhz: f64) -> Self {
        BinCenter((mhz * 1e3).round() as i64)
    }

    /// The center frequency in MHz
    pub fn mhz(self) -> f64 {
        self.0 as f64 / 1e3
    }

    /// The center frequency in whole hertz
    pub fn hz(self) -> i64 {
        self.0 * 1000
    }
}

impl fmt::Display for BinCenter {
    /// Formats the center in MHz, always with a decimal part, so the same
    /// bin always renders the same metric label
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mhz = self.mhz();
        if mhz.fract() == 0.0 {
            write!(f, "{:.1}", mhz)
        } else {
            write!(f, "{}", mhz)
        }
    }
}

/// The set of bins detected in one frame
pub type BinSet = BTreeSet<BinCenter>;

/// Maps a peak frequency to the center of its monitoring bin
///
/// A peak exactly on a bin boundary belongs to the lower bin. The center is
/// clamped up so a recording window `record_bw_msps` wide starts no lower
/// than the scanner's start frequency.
pub fn get_center(
    peak_mhz: f64,
    freq_start_mhz: f64,
    bin_mhz: f64,
    record_bw_msps: f64,
) -> BinCenter {
    let offset = peak_mhz - freq_start_mhz;
    let mut index = (offset / bin_mhz).floor();
    if index > 0.0 && offset == index * bin_mhz {
        index -= 1.0;
    }
    if index < 0.0 {
        index = 0.0;
    }
    let center = freq_start_mhz + index * bin_mhz + bin_mhz / 2.0;
    let lowest = freq_start_mhz + record_bw_msps / 2.0;
    BinCenter::from_mhz(center.max(lowest))
}

/// The last N non-empty frame bin sets, newest first
#[derive(Debug)]
pub struct BinHistory {
    frames: VecDeque<BinSet>,
    depth: usize,
}

impl BinHistory {
    /// Creates a history holding at most `depth` frames
    pub fn new(depth: usize) -> Self {
        BinHistory {
            frames: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// Prepends a frame's bin set, evicting the oldest beyond the depth
    pub fn push(&mut self, bins: BinSet) {
        self.frames.push_front(bins);
        while self.frames.len() > self.depth {
            self.frames.pop_back();
        }
    }

    /// Number of frames currently held
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True if no frames are held
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// All bins over the held frames, as a multiset in newest-first order
    pub fn flattened(&self) -> Vec<BinCenter> {
        self.frames.iter().flatten().copied().collect()
    }
}
