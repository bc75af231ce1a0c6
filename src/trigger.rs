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

//! Optional GPIO peak trigger
//!
//! When the `PEAK_TRIGGER` environment variable is `1`, the pin selected by
//! `PIN_TRIGGER` (default 17) blinks for 200 ms whenever a frame contains
//! peaks. The pin is driven through the sysfs GPIO interface. Failures are
//! logged and never stop the pipeline; without `PEAK_TRIGGER` the pipeline
//! is GPIO-free.

use std::env;
use std::fs;
use std::io::Result;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use log::{info, warn};

/// How long the pin stays high on a blink
const BLINK: Duration = Duration::from_millis(200);

/// A GPIO pin blinked when peaks are detected
#[derive(Debug, Clone)]
pub struct PeakTrigger {
    pin: u32,
    value_path: PathBuf,
}

impl PeakTrigger {
    /// Builds the trigger from the environment, or None when disabled
    pub fn from_env() -> Option<Self> {
        if env::var("PEAK_TRIGGER").ok().as_deref() != Some("1") {
            return None;
        }
        let pin = env::var("PIN_TRIGGER")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(17);
        let trigger = PeakTrigger {
            pin,
            value_path: PathBuf::from(format!("/sys/class/gpio/gpio{}/value", pin)),
        };
        match trigger.export() {
            Ok(()) => {
                info!("peak trigger enabled on GPIO pin {}", pin);
                Some(trigger)
            }
            Err(e) => {
                warn!("peak trigger disabled, cannot set up pin {}: {}", pin, e);
                None
            }
        }
    }

    /// Exports the pin and sets it to output
    fn export(&self) -> Result<()> {
        if !self.value_path.exists() {
            fs::write("/sys/class/gpio/export", format!("{}", self.pin))?;
        }
        fs::write(
            format!("/sys/class/gpio/gpio{}/direction", self.pin),
            "out",
        )?;
        Ok(())
    }

    /// Blinks the pin once, on a short-lived thread
    ///
    /// The caller never sleeps; detection latency is unaffected.
    pub fn blink(&self) {
        let value_path = self.value_path.clone();
        let spawned = thread::Builder::new()
            .name("peak trigger".to_string())
            .spawn(move || {
                let drive = |level: &str| fs::write(&value_path, level);
                if let Err(e) = drive("1").and_then(|()| {
                    thread::sleep(BLINK);
                    drive("0")
                }) {
                    warn!("peak trigger write failed: {}", e);
                }
            });
        if let Err(e) = spawned {
            warn!("failed to start peak trigger thread: {}", e);
        }
    }
}
