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

//! The most recent peak bins, shared with the control surface
//!
//! The processor publishes an immutable snapshot each detected frame; the
//! control server copies it out. Single-slot, last write wins.

use std::sync::{Arc, Mutex};

use crate::bins::BinCenter;

/// One detected bin and its peak power
pub type PeakBin = (BinCenter, f64);

/// A single-slot cell holding the latest frame's peak bins
#[derive(Debug, Default)]
pub struct PeakSnapshot {
    slot: Mutex<Arc<Vec<PeakBin>>>,
}

impl PeakSnapshot {
    /// Creates an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot
    pub fn publish(&self, peaks: Vec<PeakBin>) {
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Arc::new(peaks);
    }

    /// Returns the current snapshot
    pub fn read(&self) -> Arc<Vec<PeakBin>> {
        match self.slot.lock() {
            Ok(slot) => Arc::clone(&slot),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}
