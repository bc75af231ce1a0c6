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
//! This binary watches a scan stream and finds signals.
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

use std::error::Error;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info};
use signal_hook::{flag::register, SIGHUP, SIGINT};
use simplelog::{Config, SimpleLogger, TermLogger, TerminalMode};

use sigfinder::control::run_control_server;
use sigfinder::metrics::run_metrics_server;
use sigfinder::{find_signals, FindSignalsSetup};

mod args;
mod setup;

use self::args::Args;
use self::setup::Setup;

fn run() -> Result<(), Box<dyn Error>> {
    let args = Args::get();
    // Logging
    let log_status = TermLogger::init(args.log_level, Config::default(), TerminalMode::Stderr)
        .or_else(|_| SimpleLogger::init(args.log_level, Config::default()));
    if let Err(e) = log_status {
        eprintln!("Failed to set up simpler logger: {}", e);
    }

    let zmq_context = zmq::Context::new();
    let Setup {
        proxy,
        process,
        control,
        metrics,
        compress_pool,
        live,
        promport,
        live_dir,
    } = Setup::from_args(args, &zmq_context)?;
    // The sentinel's directory must outlive the pipeline
    let _live_dir = live_dir;

    // SIGINT or SIGHUP requests an orderly shutdown
    let stop_flag = Arc::new(AtomicBool::new(false));
    register(SIGINT, Arc::clone(&stop_flag))?;
    register(SIGHUP, Arc::clone(&stop_flag))?;

    let metrics_thread = thread::Builder::new().name("metrics".to_string()).spawn({
        let metrics = Arc::clone(&metrics);
        let stop = Arc::clone(&stop_flag);
        move || {
            if let Err(e) = run_metrics_server(metrics, promport, stop) {
                error!("metrics server failed: {}", e);
            }
        }
    })?;

    let control_thread = thread::Builder::new().name("control".to_string()).spawn({
        let stop = Arc::clone(&stop_flag);
        move || {
            if let Err(e) = run_control_server(control, stop) {
                error!("control server failed: {}", e);
            }
        }
    })?;

    let pipeline = thread::Builder::new()
        .name("find-signals".to_string())
        .spawn(move || find_signals(FindSignalsSetup { proxy, process }))?;

    while !stop_flag.load(Ordering::Relaxed) && !pipeline.is_finished() {
        thread::sleep(Duration::from_millis(500));
    }

    info!("shutting down");
    live.remove()?;
    match pipeline.join() {
        Ok(Ok(report)) => info!("pipeline finished: {:?}", report),
        Ok(Err(e)) => error!("pipeline failed: {}", e),
        Err(_) => error!("pipeline thread panicked"),
    }
    compress_pool.shutdown();

    stop_flag.store(true, Ordering::Relaxed);
    if metrics_thread.join().is_err() {
        error!("metrics thread panicked");
    }
    if control_thread.join().is_err() {
        error!("control thread panicked");
    }

    Ok(())
}

fn main() {
    match run() {
        Ok(_) => {}
        Err(e) => {
            eprintln!("{}", e);
            process::exit(-1);
        }
    }
}
