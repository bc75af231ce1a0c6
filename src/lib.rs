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
//! This library watches a stream of FFT power spectra produced by an upstream
//! scanner, detects peaks that represent active RF emissions, groups the
//! peaks into monitoring bins, and dispatches recording requests to SDR
//! recorder workers.
//!

#![warn(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
#![warn(clippy::all)]

use std::time::Duration;

// Public modules
pub mod bins;
pub mod control;
pub mod detector;
pub mod dispatch;
pub mod frame;
pub mod live;
pub mod metrics;
pub mod rotate;
pub mod scheduler;
pub mod snapshot;
pub mod spool;
pub mod stages;
pub mod steps;
pub mod trigger;

// Private modules
mod find_signals;

pub use crate::find_signals::{find_signals, FindSignalsSetup, Report};

/// The fixed frequency grid spacing, in hertz
///
/// Every frame is resampled onto this grid before peak detection, so one grid
/// cell is the unit of the peak width parameter.
pub const SCAN_FRES: f64 = 1e4;

/// Time the proxy accumulates received packets before handing a spool file to
/// the processor
pub const FFT_BUFFER_TIME: Duration = Duration::from_secs(1);

/// Bytes per unit of recorder bandwidth (samples per second per MB of
/// bandwidth)
pub const MB: u64 = 1 << 20;
