//! Background classification of automatic detection batches.
//!
//! At most one batch is in flight. A submission while a batch is running is
//! refused, not queued, so a slow classifier drops detection ticks instead of
//! stalling the frame loop.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::detect::DetectionCandidate;
use crate::frame::Frame;
use crate::pipeline::{CandidateOutcome, DetectionPipeline};

pub struct BatchJob {
    /// Capture session the frame belongs to.
    pub session: u64,
    pub frame: Frame,
    pub candidates: Vec<DetectionCandidate>,
}

#[derive(Clone, Debug)]
pub struct BatchReport {
    pub session: u64,
    pub frame_seq: u64,
    pub outcomes: Vec<CandidateOutcome>,
}

impl BatchReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_ok()).count()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submit {
    Accepted,
    Busy,
}

pub struct BatchWorker {
    jobs: Option<SyncSender<BatchJob>>,
    in_flight: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl BatchWorker {
    /// Spawn the worker thread. Completed batches are sent on `reports`.
    pub fn spawn(pipeline: Arc<DetectionPipeline>, reports: Sender<BatchReport>) -> Result<Self> {
        let (jobs_tx, jobs_rx) = mpsc::sync_channel::<BatchJob>(1);
        let in_flight = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicBool::new(false));
        let in_flight_thread = in_flight.clone();
        let cancelled_thread = cancelled.clone();
        let join = std::thread::Builder::new()
            .name("leafguard-batch".to_string())
            .spawn(move || {
                run_batches(jobs_rx, pipeline, in_flight_thread, cancelled_thread, reports)
            })
            .context("spawn batch worker")?;
        Ok(Self {
            jobs: Some(jobs_tx),
            in_flight,
            cancelled,
            join: Some(join),
        })
    }

    /// Stop the running batch at the next candidate boundary. Nothing further
    /// is recorded or sprayed for it; the next accepted batch runs normally.
    pub fn cancel(&self) {
        if self.is_busy() {
            log::info!("cancelling in-flight detection batch");
        }
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn try_submit(&self, job: BatchJob) -> Result<Submit> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("batch worker is shut down"))?;
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(Submit::Busy);
        }
        self.cancelled.store(false, Ordering::SeqCst);
        match jobs.try_send(job) {
            Ok(()) => Ok(Submit::Accepted),
            Err(TrySendError::Full(_)) => {
                self.in_flight.store(false, Ordering::SeqCst);
                Ok(Submit::Busy)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.in_flight.store(false, Ordering::SeqCst);
                Err(anyhow!("batch worker thread exited"))
            }
        }
    }

    /// Stop accepting work and wait for the running batch to finish.
    pub fn shutdown(&mut self) {
        self.jobs.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("batch worker panicked");
            }
        }
    }
}

impl Drop for BatchWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_batches(
    jobs: Receiver<BatchJob>,
    pipeline: Arc<DetectionPipeline>,
    in_flight: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    reports: Sender<BatchReport>,
) {
    for job in jobs {
        let outcomes =
            pipeline.process_candidates_until(&job.frame, &job.candidates, &cancelled);
        let report = BatchReport {
            session: job.session,
            frame_seq: job.frame.seq(),
            outcomes,
        };
        if report.failures() > 0 {
            log::warn!(
                "batch for frame {}: {}/{} leaves failed",
                report.frame_seq,
                report.failures(),
                report.outcomes.len()
            );
        } else {
            log::debug!(
                "batch for frame {}: {} leaves processed",
                report.frame_seq,
                report.outcomes.len()
            );
        }
        in_flight.store(false, Ordering::SeqCst);
        if reports.send(report).is_err() {
            break;
        }
    }
}
