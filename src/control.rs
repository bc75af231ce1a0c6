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

//! The operator control surface
//!
//! A small HTTP service: `GET /` shows the current peak bins and a manual
//! record form, `POST /result` requests a recording (one-shot, repeated, or
//! periodic), `GET /requests` lists the scheduled jobs.

use std::io::{Error, ErrorKind, Read, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use tiny_http::Method;

use crate::dispatch::recorder_req;
use crate::scheduler::Scheduler;
use crate::snapshot::PeakSnapshot;
use crate::MB;

/// The setup for the control surface
pub struct ControlSetup {
    /// Port the control server listens on
    pub port: u16,
    /// The job queue periodic recordings are placed in
    pub scheduler: Arc<Scheduler>,
    /// The latest peak bins, for the form page
    pub snapshot: Arc<PeakSnapshot>,
}

/// A manual record request
#[derive(Debug, Deserialize)]
struct ResultForm {
    /// Recorder host
    worker: String,
    /// Signal center frequency, in MHz
    frequency: i64,
    /// Recording bandwidth, in MB samples per second
    bandwidth: i64,
    /// Recording duration, in seconds
    duration: i64,
    /// Extra one-shot repeats, or -1 for a periodic job
    repeat: i64,
}

/// Serves the control surface until the stop flag is set
pub fn run_control_server(setup: ControlSetup, stop: Arc<AtomicBool>) -> Result<()> {
    let server = tiny_http::Server::http(("0.0.0.0", setup.port))
        .map_err(|e| Error::new(ErrorKind::AddrInUse, e.to_string()))?;
    info!("control server listening on port {}", setup.port);
    while !stop.load(Ordering::Relaxed) {
        let mut request = match server.recv_timeout(Duration::from_millis(500)) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                warn!("control server receive error: {}", e);
                continue;
            }
        };
        let mut body = String::new();
        if let Err(e) = request.as_reader().read_to_string(&mut body) {
            debug!("could not read request body: {}", e);
            let _ = request.respond(text_response("error!", 500));
            continue;
        }
        let response = match (request.method(), request.url()) {
            (Method::Get, "/") => text_response(&render_form(&setup.snapshot), 200),
            (Method::Post, "/result") => match handle_result(&setup, &body) {
                Ok(()) => text_response("ok!", 200),
                Err(e) => text_response(&format!("{}", e), 500),
            },
            (Method::Get, "/requests") => {
                text_response(&format!("{:?}", setup.scheduler.jobs()), 200)
            }
            _ => text_response("not found", 404),
        };
        if let Err(e) = request.respond(response) {
            debug!("control response failed: {}", e);
        }
    }
    Ok(())
}

fn text_response(text: &str, status: u16) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/html"[..])
        .expect("static header");
    tiny_http::Response::from_string(text)
        .with_status_code(status)
        .with_header(header)
}

/// Enqueues or performs the requested recording
fn handle_result(setup: &ControlSetup, body: &str) -> Result<()> {
    let form: ResultForm =
        serde_json::from_str(body).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
    if form.frequency <= 0 || form.bandwidth <= 0 || form.duration <= 0 || form.repeat < -1 {
        return Err(Error::new(ErrorKind::InvalidData, "bad record parameters"));
    }
    let recorder = format!("http://{}:8000/", form.worker);
    let signal_hz = (form.frequency as f64 * 1e6) as i64;
    let record_bps = form.bandwidth * MB as i64;
    let record_samples = record_bps * form.duration;
    let recorder_args = format!("record/{}/{}/{}", signal_hz, record_samples, record_bps);
    let timeout = form.duration as u64;

    if form.repeat == -1 {
        let tag = format!("{}{}-{}", recorder, recorder_args, timeout);
        setup.scheduler.every(
            Duration::from_secs(timeout),
            &tag,
            move || {
                recorder_req(&recorder, &recorder_args, timeout);
            },
        );
        return Ok(());
    }

    // One request plus the repeats, spaced by the duration. Runs on its own
    // thread so the control server keeps answering.
    let repeats = form.repeat as u64;
    thread::Builder::new()
        .name("manual record".to_string())
        .spawn(move || {
            for _ in 0..=repeats {
                if recorder_req(&recorder, &recorder_args, timeout).is_none() {
                    warn!("manual record request to {} failed", recorder);
                }
                thread::sleep(Duration::from_secs(timeout));
            }
        })
        .map_err(|e| Error::new(ErrorKind::Other, e))?;
    Ok(())
}

/// Renders the form page with the current peak bins
fn render_form(snapshot: &PeakSnapshot) -> String {
    let mut rows = String::new();
    for (bin, db) in snapshot.read().iter() {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{:.1}</td></tr>\n",
            bin, db
        ));
    }
    format!(
        "<html><body>\n\
         <h2>Current peak bins</h2>\n\
         <table><tr><th>bin (MHz)</th><th>peak (dB)</th></tr>\n{}</table>\n\
         <h2>Request recording</h2>\n\
         <p>POST JSON {{worker, frequency, bandwidth, duration, repeat}} to /result.</p>\n\
         </body></html>\n",
        rows
    )
}
