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

//! Peak detection over the smoothed dB curve
//!
//! A peak is a local maximum that clears the height threshold, has enough
//! prominence, and is wide enough at half its prominence. Plateaus count as
//! one peak at their midpoint.

/// Peak acceptance parameters
#[derive(Debug, Clone, Copy)]
pub struct PeakParams {
    /// Minimum peak width at half prominence, in grid cells
    pub width: f64,
    /// Minimum prominence, in dB
    pub prominence: f64,
    /// Minimum peak height, in dB
    pub threshold: f64,
}

/// The prominence of one local maximum and the bases it was measured against
struct Prominence {
    value: f64,
    left_base: usize,
    right_base: usize,
}

/// Finds the indices of accepted peaks, in ascending order
pub fn find_peaks(values: &[f64], params: &PeakParams) -> Vec<usize> {
    local_maxima(values)
        .into_iter()
        .filter(|&peak| values[peak] >= params.threshold)
        .filter_map(|peak| {
            let prominence = prominence(values, peak);
            if prominence.value < params.prominence {
                return None;
            }
            if peak_width(values, peak, &prominence) < params.width {
                return None;
            }
            Some(peak)
        })
        .collect()
}

/// Finds all local maxima, reporting a plateau as its midpoint
fn local_maxima(values: &[f64]) -> Vec<usize> {
    let mut maxima = Vec::new();
    if values.len() < 3 {
        return maxima;
    }
    let mut i = 1;
    let last = values.len() - 1;
    while i < last {
        if values[i - 1] < values[i] {
            // Walk over a possible plateau
            let mut ahead = i + 1;
            while ahead < last && values[ahead] == values[i] {
                ahead += 1;
            }
            if values[ahead] < values[i] {
                maxima.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    maxima
}

/// Measures the prominence of a local maximum
///
/// Each side is scanned outward until the curve rises above the peak or the
/// end of the data; the higher of the two side minima limits the prominence.
fn prominence(values: &[f64], peak: usize) -> Prominence {
    let height = values[peak];

    let mut left_min = height;
    let mut left_base = peak;
    for i in (0..peak).rev() {
        if values[i] > height {
            break;
        }
        if values[i] < left_min {
            left_min = values[i];
            left_base = i;
        }
    }

    let mut right_min = height;
    let mut right_base = peak;
    for (i, &value) in values.iter().enumerate().skip(peak + 1) {
        if value > height {
            break;
        }
        if value < right_min {
            right_min = value;
            right_base = i;
        }
    }

    Prominence {
        value: height - left_min.max(right_min),
        left_base,
        right_base,
    }
}

/// Measures the width of a peak at half its prominence, in grid cells
///
/// The crossing points on both slopes are linearly interpolated.
fn peak_width(values: &[f64], peak: usize, prominence: &Prominence) -> f64 {
    let eval_height = values[peak] - prominence.value * 0.5;

    let mut i = peak;
    while i > prominence.left_base && eval_height < values[i] {
        i -= 1;
    }
    let mut left_ip = i as f64;
    if values[i] < eval_height {
        left_ip += (eval_height - values[i]) / (values[i + 1] - values[i]);
    }

    let mut i = peak;
    while i < prominence.right_base && eval_height < values[i] {
        i += 1;
    }
    let mut right_ip = i as f64;
    if values[i] < eval_height {
        right_ip -= (eval_height - values[i]) / (values[i - 1] - values[i]);
    }

    right_ip - left_ip
}

#[cfg(test)]
mod test {
    use super::*;

    const PARAMS: PeakParams = PeakParams {
        width: 2.0,
        prominence: 2.0,
        threshold: -35.0,
    };

    /// A triangular bump rising from `floor` to `top` over `slope_len` cells
    fn bump(len: usize, apex: usize, slope_len: usize, floor: f64, top: f64) -> Vec<f64> {
        let step = (top - floor) / slope_len as f64;
        (0..len)
            .map(|i| {
                let distance = (i as f64 - apex as f64).abs();
                if distance < slope_len as f64 {
                    top - distance * step
                } else {
                    floor
                }
            })
            .collect()
    }

    #[test]
    fn test_no_peaks_in_flat_curve() {
        let values = vec![-80.0; 50];
        assert!(find_peaks(&values, &PARAMS).is_empty());
    }

    #[test]
    fn test_single_peak() {
        let values = bump(100, 50, 10, -80.0, -20.0);
        assert_eq!(find_peaks(&values, &PARAMS), vec![50]);
    }

    #[test]
    fn test_below_threshold_rejected() {
        let values = bump(100, 50, 10, -80.0, -40.0);
        assert!(find_peaks(&values, &PARAMS).is_empty());
    }

    #[test]
    fn test_low_prominence_rejected() {
        let mut params = PARAMS;
        params.prominence = 10.0;
        // A 6 dB ripple on top of a tall plateau region
        let values = bump(100, 50, 3, -26.0, -20.0);
        assert!(find_peaks(&values, &params).is_empty());
    }

    #[test]
    fn test_narrow_peak_rejected() {
        let mut params = PARAMS;
        params.width = 10.0;
        // Half-prominence width of this bump is 4 cells
        let values = bump(100, 50, 4, -80.0, -20.0);
        assert!(find_peaks(&values, &params).is_empty());
    }

    #[test]
    fn test_width_measured_at_half_prominence() {
        let mut params = PARAMS;
        // Slope of 12 cells gives a half-prominence width of 12
        let values = bump(200, 100, 12, -80.0, -20.0);
        params.width = 12.0;
        assert_eq!(find_peaks(&values, &params), vec![100]);
        params.width = 12.5;
        assert!(find_peaks(&values, &params).is_empty());
    }

    #[test]
    fn test_plateau_reports_midpoint() {
        let mut values = vec![-80.0; 50];
        for value in values.iter_mut().take(28).skip(20) {
            *value = -20.0;
        }
        assert_eq!(find_peaks(&values, &PARAMS), vec![23]);
    }

    #[test]
    fn test_two_peaks() {
        let mut values = bump(200, 50, 10, -80.0, -20.0);
        let second = bump(200, 150, 10, -80.0, -25.0);
        for (value, other) in values.iter_mut().zip(second) {
            *value = value.max(other);
        }
        assert_eq!(find_peaks(&values, &PARAMS), vec![50, 150]);
    }
}
