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

//! Rolling-mean smoothing of the dB curve

/// Replaces each value with the mean of the trailing window ending at it
///
/// The first `window - 1` values have no full window and are backfilled with
/// the first full-window mean. A window of zero or one leaves the values
/// unchanged, as does a curve shorter than the window.
pub fn rolling_mean(values: &mut [f64], window: usize) {
    if window <= 1 || values.len() < window {
        return;
    }
    let mut smoothed = Vec::with_capacity(values.len());
    let mut sum: f64 = values[..window].iter().sum();
    smoothed.push(sum / window as f64);
    for i in window..values.len() {
        sum += values[i] - values[i - window];
        smoothed.push(sum / window as f64);
    }
    let first = smoothed[0];
    for (i, value) in values.iter_mut().enumerate() {
        *value = if i + 1 < window {
            first
        } else {
            smoothed[i + 1 - window]
        };
    }
}
