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

//! A periodic job queue
//!
//! Jobs repeat every N seconds and carry a tag for listing and cancellation.
//! `run_pending` is called by the processor between spool polls; due jobs run
//! on freshly spawned worker threads so a blocking job cannot stall the
//! pipeline.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

/// A repeating job
struct Job {
    tag: String,
    every: Duration,
    next_run: Instant,
    run: Arc<dyn Fn() + Send + Sync>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("tag", &self.tag)
            .field("every", &self.every)
            .finish()
    }
}

/// A queue of repeating, tagged jobs
#[derive(Debug, Default)]
pub struct Scheduler {
    jobs: Mutex<Vec<Job>>,
}

impl Scheduler {
    /// Creates an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a job that runs every `every`, starting one period from now
    pub fn every<F>(&self, every: Duration, tag: &str, run: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let job = Job {
            tag: tag.to_string(),
            every,
            next_run: Instant::now() + every,
            run: Arc::new(run),
        };
        debug!("scheduled job {} every {:?}", job.tag, job.every);
        self.lock().push(job);
    }

    /// Starts every due job on its own worker thread
    pub fn run_pending(&self) {
        let now = Instant::now();
        let due: Vec<(String, Arc<dyn Fn() + Send + Sync>)> = {
            let mut jobs = self.lock();
            jobs.iter_mut()
                .filter(|job| job.next_run <= now)
                .map(|job| {
                    job.next_run = now + job.every;
                    (job.tag.clone(), Arc::clone(&job.run))
                })
                .collect()
        };
        for (tag, run) in due {
            debug!("running job {}", tag);
            if let Err(e) = thread::Builder::new()
                .name(format!("job {}", tag))
                .spawn(move || (*run)())
            {
                warn!("failed to start worker for job {}: {}", tag, e);
            }
        }
    }

    /// Removes all jobs with the given tag, returning how many were removed
    pub fn clear_tag(&self, tag: &str) -> usize {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|job| job.tag != tag);
        before - jobs.len()
    }

    /// Describes the scheduled jobs, one line per job
    pub fn jobs(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|job| format!("every {}s: {}", job.every.as_secs(), job.tag))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Job>> {
        match self.jobs.lock() {
            Ok(jobs) => jobs,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_due_job_fires() {
        let scheduler = Scheduler::new();
        let (tx, rx) = unbounded();
        scheduler.every(Duration::from_secs(0), "t", move || {
            tx.send(()).unwrap();
        });
        scheduler.run_pending();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_not_due_job_does_not_fire() {
        let scheduler = Scheduler::new();
        let (tx, rx) = unbounded();
        scheduler.every(Duration::from_secs(3600), "t", move || {
            tx.send(()).unwrap();
        });
        scheduler.run_pending();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_clear_tag() {
        let scheduler = Scheduler::new();
        scheduler.every(Duration::from_secs(1), "a", || {});
        scheduler.every(Duration::from_secs(1), "a", || {});
        scheduler.every(Duration::from_secs(1), "b", || {});
        assert_eq!(scheduler.clear_tag("a"), 2);
        assert_eq!(scheduler.jobs(), vec!["every 1s: b".to_string()]);
    }
}
