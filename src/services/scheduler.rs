//! Cron-driven background jobs.
//!
//! Schedules use the 6-field `cron` syntax (seconds first). Each registered job
//! runs on its own tokio task; a failing run is logged and the job keeps its
//! schedule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    fn schedule(&self) -> &str;

    async fn execute(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    pub is_active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid cron expression '{expression}' for job {job}: {source}")]
    InvalidSchedule {
        job: String,
        expression: String,
        #[source]
        source: cron::error::Error,
    },
    #[error("Job {0} is already registered")]
    DuplicateJob(String),
    #[error("Scheduler is already running")]
    AlreadyRunning,
}

struct ScheduledJob {
    job: Arc<dyn Job>,
    schedule: Schedule,
    status: Arc<RwLock<JobStatus>>,
}

#[derive(Default)]
pub struct JobScheduler {
    jobs: RwLock<Vec<ScheduledJob>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_job(&self, job: Box<dyn Job>) -> Result<(), SchedulerError> {
        let schedule =
            Schedule::from_str(job.schedule()).map_err(|source| SchedulerError::InvalidSchedule {
                job: job.name().to_string(),
                expression: job.schedule().to_string(),
                source,
            })?;

        let mut jobs = self.jobs.write().await;
        if jobs.iter().any(|j| j.job.name() == job.name()) {
            return Err(SchedulerError::DuplicateJob(job.name().to_string()));
        }

        let status = JobStatus {
            name: job.name().to_string(),
            schedule: job.schedule().to_string(),
            is_active: false,
            last_run: None,
            next_run: None,
            last_error: None,
            run_count: 0,
        };
        info!(job = job.name(), schedule = job.schedule(), "Registered job");
        jobs.push(ScheduledJob {
            job: Arc::from(job),
            schedule,
            status: Arc::new(RwLock::new(status)),
        });
        Ok(())
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut shutdown = self.shutdown.lock().await;
        if shutdown.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        let (tx, rx) = watch::channel(false);

        let jobs = self.jobs.read().await;
        let mut handles = self.handles.lock().await;
        for scheduled in jobs.iter() {
            {
                let mut status = scheduled.status.write().await;
                status.is_active = true;
                status.next_run = scheduled.schedule.after(&Utc::now()).next();
            }
            handles.push(tokio::spawn(run_job(
                scheduled.job.clone(),
                scheduled.schedule.clone(),
                scheduled.status.clone(),
                rx.clone(),
            )));
        }

        *shutdown = Some(tx);
        info!(jobs = jobs.len(), "Job scheduler started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let Some(tx) = self.shutdown.lock().await.take() else {
            return Ok(());
        };
        let _ = tx.send(true);

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Job task ended abnormally: {}", e);
            }
        }

        for scheduled in self.jobs.read().await.iter() {
            let mut status = scheduled.status.write().await;
            status.is_active = false;
            status.next_run = None;
        }
        info!("Job scheduler stopped");
        Ok(())
    }

    pub async fn get_job_status(&self) -> HashMap<String, JobStatus> {
        let jobs = self.jobs.read().await;
        let mut out = HashMap::with_capacity(jobs.len());
        for scheduled in jobs.iter() {
            let status = scheduled.status.read().await.clone();
            out.insert(status.name.clone(), status);
        }
        out
    }
}

async fn run_job(
    job: Arc<dyn Job>,
    schedule: Schedule,
    status: Arc<RwLock<JobStatus>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let Some(next) = schedule.after(&Utc::now()).next() else {
            debug!(job = job.name(), "Schedule has no further runs");
            break;
        };
        status.write().await.next_run = Some(next);

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let started = Utc::now();
        let result = job.execute().await;

        let mut s = status.write().await;
        s.last_run = Some(started);
        s.run_count += 1;
        match result {
            Ok(()) => {
                s.last_error = None;
                debug!(job = job.name(), "Job run completed");
            }
            Err(e) => {
                error!(job = job.name(), error = %e, "Job run failed");
                s.last_error = Some(e.to_string());
            }
        }
    }
}
