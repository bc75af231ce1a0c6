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

//! Resampling of a frame onto the fixed frequency grid

use std::collections::BTreeMap;

use crate::frame::FftRecord;
use crate::SCAN_FRES;

/// A frame resampled onto the `SCAN_FRES` grid
///
/// Frequencies are in MHz, strictly ascending and free of duplicates; the dB
/// value of each grid cell is the arithmetic mean of the records that
/// quantized into it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResampledFrame {
    /// Grid frequencies, in MHz, ascending
    pub freqs: Vec<f64>,
    /// Mean dB per grid frequency
    pub dbs: Vec<f64>,
    /// The latest record timestamp in the source frame
    pub ts: f64,
}

impl ResampledFrame {
    /// Returns the number of grid cells
    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    /// Returns true if the frame has no cells
    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }
}

/// Quantizes grid index back to MHz
fn grid_mhz(key: i64) -> f64 {
    key as f64 * SCAN_FRES / 1e6
}

/// Resamples records onto the fixed grid
pub fn resample(records: &[FftRecord]) -> ResampledFrame {
    let mut cells: BTreeMap<i64, (f64, u32)> = BTreeMap::new();
    let mut ts: f64 = 0.0;
    for record in records {
        let key = (record.freq / SCAN_FRES).round() as i64;
        let cell = cells.entry(key).or_insert((0.0, 0));
        cell.0 += record.db;
        cell.1 += 1;
        ts = ts.max(record.ts);
    }
    let mut freqs = Vec::with_capacity(cells.len());
    let mut dbs = Vec::with_capacity(cells.len());
    for (key, (sum, count)) in cells {
        freqs.push(grid_mhz(key));
        dbs.push(sum / f64::from(count));
    }
    ResampledFrame { freqs, dbs, ts }
}
