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

//! Command-line arguments (used only in the sigfinder binary)

use std::path::PathBuf;
use std::str::FromStr;

use clap::{App, Arg};
use simplelog::LevelFilter;

use sigfinder::SCAN_FRES;

#[derive(Debug)]
pub struct Args {
    /// Base path for scan logging
    pub log: PathBuf,
    /// Path to log the last complete FFT frame, if any
    pub fftlog: Option<PathBuf>,
    /// Path the external renderer writes FFT graphs to, if any
    pub fftgraph: Option<PathBuf>,
    /// FFT graphs the renderer keeps
    pub nfftgraph: usize,
    /// Recent frames kept for the renderer
    pub nfftplots: usize,
    /// Scan log rotation interval, in seconds
    pub rotatesecs: u64,
    /// Rotated scan logs to keep
    pub nlog: usize,
    /// Monitoring bin width, in MHz
    pub bin_mhz: u32,
    /// Minimum peak width, in grid cells
    pub width: u32,
    /// Minimum peak height, in dB
    pub threshold: f64,
    /// Minimum peak prominence, in dB
    pub prominence: f64,
    /// Frames of bin history to keep
    pub history: usize,
    /// Recorder base URLs
    pub recorder: Vec<String>,
    /// Recorder bandwidth, in MB samples per second
    pub record_bw_msps: u64,
    /// Recording duration, in seconds
    pub record_secs: u64,
    /// Prometheus exporter port
    pub promport: u16,
    /// Control server port
    pub port: u16,
    /// Host of the FFT publisher
    pub logaddr: String,
    /// Port of the FFT publisher
    pub logport: u16,
    /// Max recordings to request per worker per round
    pub max_recorder_signals: usize,
    /// Running FFT average window, in seconds
    pub running_fft_secs: u64,
    /// Directory for FFT spool files
    pub buff_path: PathBuf,
    /// Trailing window of the dB smoother, or 0 to disable
    pub db_rolling_factor: f64,
    /// Log level
    pub log_level: LevelFilter,
}

impl Args {
    pub fn get() -> Self {
        let width_help = format!(
            "Minimum signal width to detect a peak (multiple of {} MHz, e.g. 10 is {} MHz)",
            SCAN_FRES / 1e6,
            10.0 * SCAN_FRES / 1e6
        );
        let matches = App::new("sigfinder")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Watch an FFT scan stream and find signals")
            .arg(
                Arg::with_name("log")
                    .long("log")
                    .takes_value(true)
                    .default_value("scan.log")
                    .help("Base path for scan logging"),
            )
            .arg(
                Arg::with_name("fftlog")
                    .long("fftlog")
                    .takes_value(true)
                    .value_name("path")
                    .help("If defined, path to log the last complete FFT frame"),
            )
            .arg(
                Arg::with_name("fftgraph")
                    .long("fftgraph")
                    .takes_value(true)
                    .value_name("path")
                    .help(
                        "If defined, path the external renderer writes the graph of the most \
                         recent FFT and detected peaks to",
                    ),
            )
            .arg(
                Arg::with_name("nfftgraph")
                    .long("nfftgraph")
                    .takes_value(true)
                    .default_value("10")
                    .validator(validate::<usize>)
                    .help("Keep last N FFT graphs"),
            )
            .arg(
                Arg::with_name("nfftplots")
                    .long("nfftplots")
                    .takes_value(true)
                    .default_value("10")
                    .validator(validate::<usize>)
                    .help("Last N plots in FFT graphs"),
            )
            .arg(
                Arg::with_name("rotatesecs")
                    .long("rotatesecs")
                    .takes_value(true)
                    .default_value("3600")
                    .validator(validate::<u64>)
                    .help("Rotate scan log after this many seconds"),
            )
            .arg(
                Arg::with_name("nlog")
                    .long("nlog")
                    .takes_value(true)
                    .default_value("10")
                    .validator(validate::<usize>)
                    .help("Keep only this many scan logs"),
            )
            .arg(
                Arg::with_name("bin_mhz")
                    .long("bin_mhz")
                    .takes_value(true)
                    .default_value("20")
                    .validator(validate::<u32>)
                    .help("Monitoring bin width in MHz"),
            )
            .arg(
                Arg::with_name("width")
                    .long("width")
                    .takes_value(true)
                    .default_value("10")
                    .validator(validate::<u32>)
                    .help(&*width_help),
            )
            .arg(
                Arg::with_name("threshold")
                    .long("threshold")
                    .takes_value(true)
                    .allow_hyphen_values(true)
                    .default_value("-35")
                    .validator(validate::<f64>)
                    .help("Minimum signal finding threshold (dB)"),
            )
            .arg(
                Arg::with_name("prominence")
                    .long("prominence")
                    .takes_value(true)
                    .default_value("2")
                    .validator(validate::<f64>)
                    .help("Minimum peak prominence (dB)"),
            )
            .arg(
                Arg::with_name("history")
                    .long("history")
                    .takes_value(true)
                    .default_value("5")
                    .validator(validate::<usize>)
                    .help("Number of frames of signal history to keep"),
            )
            .arg(
                Arg::with_name("recorder")
                    .long("recorder")
                    .takes_value(true)
                    .multiple(true)
                    .number_of_values(1)
                    .value_name("url")
                    .help(
                        "SDR recorder base URLs (e.g. http://host:port/, multiples can be \
                         specified)",
                    ),
            )
            .arg(
                Arg::with_name("record_bw_msps")
                    .long("record_bw_msps")
                    .takes_value(true)
                    .default_value("20")
                    .validator(validate::<u64>)
                    .help("Record bandwidth in n * MB samples per second"),
            )
            .arg(
                Arg::with_name("record_secs")
                    .long("record_secs")
                    .takes_value(true)
                    .default_value("10")
                    .validator(validate::<u64>)
                    .help("Record time duration in seconds"),
            )
            .arg(
                Arg::with_name("promport")
                    .long("promport")
                    .takes_value(true)
                    .default_value("9000")
                    .validator(validate::<u16>)
                    .help("Prometheus exporter port"),
            )
            .arg(
                Arg::with_name("port")
                    .long("port")
                    .takes_value(true)
                    .default_value("80")
                    .validator(validate::<u16>)
                    .help("Control webserver port"),
            )
            .arg(
                Arg::with_name("logaddr")
                    .long("logaddr")
                    .takes_value(true)
                    .default_value("127.0.0.1")
                    .help("Log FFT results from this address"),
            )
            .arg(
                Arg::with_name("logport")
                    .long("logport")
                    .takes_value(true)
                    .default_value("8001")
                    .validator(validate::<u16>)
                    .help("Log FFT results from this port"),
            )
            .arg(
                Arg::with_name("max_recorder_signals")
                    .long("max_recorder_signals")
                    .takes_value(true)
                    .default_value("1")
                    .validator(validate::<usize>)
                    .help("Max number of recordings per worker to request"),
            )
            .arg(
                Arg::with_name("running_fft_secs")
                    .long("running_fft_secs")
                    .takes_value(true)
                    .default_value("900")
                    .validator(validate::<u64>)
                    .help("Number of seconds for running FFT average"),
            )
            .arg(
                Arg::with_name("buff_path")
                    .long("buff_path")
                    .takes_value(true)
                    .default_value("/dev/shm")
                    .help("Path for FFT buffer file"),
            )
            .arg(
                Arg::with_name("db_rolling_factor")
                    .long("db_rolling_factor")
                    .takes_value(true)
                    .default_value("10")
                    .validator(validate::<f64>)
                    .help("Divisor for rolling dB average (or 0 to disable)"),
            )
            .arg(
                Arg::with_name("log_level")
                    .long("log-level")
                    .takes_value(true)
                    .default_value("INFO")
                    .possible_values(&["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
                    .help("The level of logging to enable"),
            )
            .get_matches();

        Args {
            log: PathBuf::from(matches.value_of_os("log").unwrap()),
            fftlog: matches.value_of_os("fftlog").map(PathBuf::from),
            fftgraph: matches.value_of_os("fftgraph").map(PathBuf::from),
            nfftgraph: matches.value_of("nfftgraph").unwrap().parse().unwrap(),
            nfftplots: matches.value_of("nfftplots").unwrap().parse().unwrap(),
            rotatesecs: matches.value_of("rotatesecs").unwrap().parse().unwrap(),
            nlog: matches.value_of("nlog").unwrap().parse().unwrap(),
            bin_mhz: matches.value_of("bin_mhz").unwrap().parse().unwrap(),
            width: matches.value_of("width").unwrap().parse().unwrap(),
            threshold: matches.value_of("threshold").unwrap().parse().unwrap(),
            prominence: matches.value_of("prominence").unwrap().parse().unwrap(),
            history: matches.value_of("history").unwrap().parse().unwrap(),
            recorder: matches
                .values_of("recorder")
                .map(|values| values.map(String::from).collect())
                .unwrap_or_default(),
            record_bw_msps: matches.value_of("record_bw_msps").unwrap().parse().unwrap(),
            record_secs: matches.value_of("record_secs").unwrap().parse().unwrap(),
            promport: matches.value_of("promport").unwrap().parse().unwrap(),
            port: matches.value_of("port").unwrap().parse().unwrap(),
            logaddr: matches.value_of("logaddr").unwrap().to_string(),
            logport: matches.value_of("logport").unwrap().parse().unwrap(),
            max_recorder_signals: matches
                .value_of("max_recorder_signals")
                .unwrap()
                .parse()
                .unwrap(),
            running_fft_secs: matches
                .value_of("running_fft_secs")
                .unwrap()
                .parse()
                .unwrap(),
            buff_path: PathBuf::from(matches.value_of_os("buff_path").unwrap()),
            db_rolling_factor: matches
                .value_of("db_rolling_factor")
                .unwrap()
                .parse()
                .unwrap(),
            log_level: matches.value_of("log_level").unwrap().parse().unwrap(),
        }
    }
}

/// Validates that a string can be parsed into a value of type T
// As required by clap, this function accepts a String.
#[allow(clippy::needless_pass_by_value)]
fn validate<T>(s: String) -> Result<(), String>
where
    T: FromStr,
    T::Err: ToString,
{
    s.parse::<T>().map(|_| ()).map_err(|e| e.to_string())
}
