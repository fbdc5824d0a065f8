// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::context::JobContext;
use crate::error::{JobError, Result};
use crate::health::{determine_health_state, HealthState, JobHealthStatus, JobsHealthStatus};
use crate::job::Job;
use crate::types::{JobDefinition, JobRun, JobStatus, JobType, TriggerSource};
use chrono::Utc;
use netweave_server_db::JobRepository;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Exponential backoff between attempts of one run.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub max_retries: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 3,
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(60),
		}
	}
}

impl RetryPolicy {
	/// Delay before retry `retry_count` (1-based): base * 2^(n-1), capped.
	pub fn delay(&self, retry_count: u32) -> Duration {
		let exp = retry_count.saturating_sub(1).min(31);
		self.base_delay
			.checked_mul(1u32 << exp)
			.unwrap_or(self.max_delay)
			.min(self.max_delay)
	}
}

struct RegisteredJob {
	job: Arc<dyn Job>,
	job_type: JobType,
	cancellation_token: CancellationToken,
}

impl RegisteredJob {
	fn definition(&self) -> JobDefinition {
		JobDefinition {
			id: self.job.id().to_string(),
			name: self.job.name().to_string(),
			description: self.job.description().to_string(),
			job_type: self.job_type.as_str().to_string(),
			interval_secs: match &self.job_type {
				JobType::Periodic { interval } => Some(interval.as_secs() as i64),
				JobType::Startup => None,
			},
			enabled: true,
		}
	}
}

pub struct JobScheduler {
	jobs: BTreeMap<String, RegisteredJob>,
	repository: Arc<JobRepository>,
	retry: RetryPolicy,
	shutdown: CancellationToken,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
	pub fn new(repository: Arc<JobRepository>) -> Self {
		Self::with_shutdown(repository, CancellationToken::new())
	}

	/// Periodic loops stop, and in-flight runs see cancellation, once
	/// `shutdown` fires.
	pub fn with_shutdown(repository: Arc<JobRepository>, shutdown: CancellationToken) -> Self {
		Self {
			jobs: BTreeMap::new(),
			repository,
			retry: RetryPolicy::default(),
			shutdown,
			handles: Mutex::new(Vec::new()),
		}
	}

	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	fn register(&mut self, job: Arc<dyn Job>, job_type: JobType) {
		let id = job.id().to_string();
		self.jobs.insert(
			id,
			RegisteredJob {
				job,
				job_type,
				cancellation_token: self.shutdown.child_token(),
			},
		);
	}

	pub fn register_periodic(&mut self, job: Arc<dyn Job>, interval: Duration) {
		self.register(job, JobType::Periodic { interval });
	}

	pub fn register_startup(&mut self, job: Arc<dyn Job>) {
		self.register(job, JobType::Startup);
	}

	#[instrument(skip(self))]
	pub async fn start(&self) -> Result<()> {
		let mut handles = self.handles.lock().await;

		for (job_id, registered) in &self.jobs {
			self.repository.upsert_definition(&registered.definition()).await?;

			let job = Arc::clone(&registered.job);
			let repository = Arc::clone(&self.repository);
			let token = registered.cancellation_token.clone();
			let shutdown = self.shutdown.clone();
			let retry = self.retry;
			let job_id = job_id.clone();

			let handle = match registered.job_type {
				JobType::Startup => tokio::spawn(async move {
					let _ = run_job_with_retry(&job, &repository, retry, TriggerSource::Startup, &token).await;
				}),
				JobType::Periodic { interval } => tokio::spawn(async move {
					loop {
						tokio::select! {
							_ = tokio::time::sleep(interval) => {
								if token.is_cancelled() {
									continue;
								}
								let _ = run_job_with_retry(
									&job,
									&repository,
									retry,
									TriggerSource::Schedule,
									&token,
								).await;
							}
							_ = shutdown.cancelled() => {
								info!(job_id = %job_id, "Shutting down periodic job");
								break;
							}
						}
					}
				}),
			};
			handles.push(handle);
		}

		info!(job_count = handles.len(), "Job scheduler started");
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn trigger_job(&self, job_id: &str, triggered_by: TriggerSource) -> Result<String> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
		self.repository.upsert_definition(&registered.definition()).await?;

		run_job_with_retry(
			&registered.job,
			&self.repository,
			self.retry,
			triggered_by,
			&registered.cancellation_token,
		)
		.await
	}

	/// Stop scheduling a job. Its current run, if any, sees cancellation.
	#[instrument(skip(self))]
	pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		registered.cancellation_token.cancel();
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.shutdown.cancel();

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}

		info!("Job scheduler shut down");
	}

	pub fn job_ids(&self) -> Vec<String> {
		self.jobs.keys().cloned().collect()
	}

	pub async fn list_runs(&self, job_id: &str, limit: u32) -> Result<Vec<JobRun>> {
		Ok(self.repository.list_runs(job_id, limit).await?)
	}

	#[instrument(skip(self))]
	pub async fn job_status(&self, job_id: &str) -> Option<JobHealthStatus> {
		let registered = self.jobs.get(job_id)?;

		let last_run = self.repository.get_last_run(job_id).await.ok().flatten();
		let consecutive_failures = self
			.repository
			.count_consecutive_failures(job_id)
			.await
			.unwrap_or(0);

		Some(JobHealthStatus {
			job_id: job_id.to_string(),
			name: registered.job.name().to_string(),
			status: determine_health_state(last_run.as_ref(), consecutive_failures),
			last_run: last_run.map(Into::into),
			consecutive_failures,
		})
	}

	#[instrument(skip(self))]
	pub async fn health_status(&self) -> JobsHealthStatus {
		let mut jobs = Vec::new();
		for job_id in self.jobs.keys() {
			if let Some(status) = self.job_status(job_id).await {
				jobs.push(status);
			}
		}

		JobsHealthStatus {
			status: jobs.iter().map(|j| j.status).max().unwrap_or(HealthState::Healthy),
			jobs,
		}
	}
}

async fn run_job_with_retry(
	job: &Arc<dyn Job>,
	repository: &JobRepository,
	retry: RetryPolicy,
	triggered_by: TriggerSource,
	cancellation_token: &CancellationToken,
) -> Result<String> {
	let mut retry_count = 0u32;
	let run_id = uuid::Uuid::new_v4().to_string();

	repository
		.record_run_start(&JobRun {
			id: run_id.clone(),
			job_id: job.id().to_string(),
			status: JobStatus::Running,
			started_at: Utc::now(),
			completed_at: None,
			duration_ms: None,
			error_message: None,
			retry_count,
			triggered_by,
			metadata: None,
		})
		.await?;

	loop {
		let ctx = JobContext {
			run_id: run_id.clone(),
			triggered_by: if retry_count > 0 {
				TriggerSource::Retry
			} else {
				triggered_by
			},
			cancellation_token: cancellation_token.clone(),
		};

		match job.run(&ctx).await {
			Ok(output) => {
				repository
					.record_run_complete(&run_id, JobStatus::Succeeded, None, output.metadata)
					.await?;
				info!(job_id = %job.id(), run_id = %run_id, message = %output.message, "Job completed successfully");
				return Ok(run_id);
			}
			Err(JobError::Cancelled) => {
				repository
					.record_run_complete(&run_id, JobStatus::Cancelled, None, None)
					.await?;
				info!(job_id = %job.id(), run_id = %run_id, "Job cancelled");
				return Err(JobError::Cancelled);
			}
			Err(JobError::Failed { message, retryable }) => {
				if retryable && retry_count < retry.max_retries {
					retry_count += 1;
					let delay = retry.delay(retry_count);
					warn!(
						job_id = %job.id(),
						run_id = %run_id,
						retry_count,
						delay_ms = delay.as_millis() as u64,
						error = %message,
						"Job failed, retrying"
					);
					tokio::select! {
						_ = tokio::time::sleep(delay) => continue,
						_ = cancellation_token.cancelled() => {
							repository
								.record_run_complete(&run_id, JobStatus::Cancelled, Some(message), None)
								.await?;
							return Err(JobError::Cancelled);
						}
					}
				}

				repository
					.record_run_complete(&run_id, JobStatus::Failed, Some(message.clone()), None)
					.await?;
				warn!(job_id = %job.id(), run_id = %run_id, error = %message, "Job failed");
				return Err(JobError::Failed { message, retryable });
			}
			Err(e) => {
				let message = e.to_string();
				repository
					.record_run_complete(&run_id, JobStatus::Failed, Some(message.clone()), None)
					.await?;
				warn!(job_id = %job.id(), run_id = %run_id, error = %message, "Job failed with error");
				return Err(e);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::JobOutput;
	use async_trait::async_trait;
	use netweave_server_db::testing::create_job_test_pool;
	use std::sync::atomic::{AtomicU32, Ordering};

	/// Fails `fail_first` times with the given retryability, then succeeds.
	struct CountingJob {
		id: String,
		fail_first: u32,
		retryable: bool,
		attempts: AtomicU32,
	}

	impl CountingJob {
		fn ok(id: &str) -> Arc<Self> {
			Self::failing(id, 0, true)
		}

		fn failing(id: &str, fail_first: u32, retryable: bool) -> Arc<Self> {
			Arc::new(Self {
				id: id.to_string(),
				fail_first,
				retryable,
				attempts: AtomicU32::new(0),
			})
		}

		fn attempts(&self) -> u32 {
			self.attempts.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl Job for CountingJob {
		fn id(&self) -> &str {
			&self.id
		}

		fn name(&self) -> &str {
			"Counting job"
		}

		fn description(&self) -> &str {
			"counts its attempts"
		}

		async fn run(&self, ctx: &JobContext) -> std::result::Result<JobOutput, JobError> {
			ctx.check_cancelled()?;
			let n = self.attempts.fetch_add(1, Ordering::SeqCst);
			if n < self.fail_first {
				return Err(JobError::Failed {
					message: format!("attempt {n}"),
					retryable: self.retryable,
				});
			}
			Ok(JobOutput::new("done").with_metadata(serde_json::json!({ "attempts": n + 1 })))
		}
	}

	async fn scheduler() -> JobScheduler {
		let pool = create_job_test_pool().await;
		JobScheduler::new(Arc::new(JobRepository::new(pool))).with_retry_policy(RetryPolicy {
			base_delay: Duration::from_millis(1),
			..RetryPolicy::default()
		})
	}

	#[test]
	fn backoff_doubles_and_caps() {
		let policy = RetryPolicy::default();
		assert_eq!(policy.delay(1), Duration::from_secs(1));
		assert_eq!(policy.delay(2), Duration::from_secs(2));
		assert_eq!(policy.delay(3), Duration::from_secs(4));
		assert_eq!(policy.delay(10), Duration::from_secs(60));
		assert_eq!(policy.delay(100), Duration::from_secs(60));
	}

	#[tokio::test]
	async fn registered_jobs_are_listed() {
		let mut s = scheduler().await;
		s.register_periodic(CountingJob::ok("jit-expiry"), Duration::from_secs(3600));
		s.register_startup(CountingJob::ok("publish-reconcile"));
		assert_eq!(s.job_ids(), vec!["jit-expiry".to_string(), "publish-reconcile".to_string()]);
	}

	#[tokio::test]
	async fn unknown_job_is_not_found() {
		let s = scheduler().await;
		match s.trigger_job("nope", TriggerSource::Manual).await.unwrap_err() {
			JobError::NotFound(id) => assert_eq!(id, "nope"),
			e => panic!("expected NotFound, got {e:?}"),
		}
	}

	#[tokio::test]
	async fn retryable_failures_are_retried_within_one_run() {
		let mut s = scheduler().await;
		let job = CountingJob::failing("flaky", 2, true);
		s.register_periodic(job.clone(), Duration::from_secs(3600));

		let run_id = s.trigger_job("flaky", TriggerSource::Manual).await.unwrap();
		assert_eq!(job.attempts(), 3);

		let runs = s.list_runs("flaky", 10).await.unwrap();
		assert_eq!(runs.len(), 1);
		assert_eq!(runs[0].id, run_id);
		assert_eq!(runs[0].status, JobStatus::Succeeded);
		assert_eq!(runs[0].metadata, Some(serde_json::json!({ "attempts": 3 })));
	}

	#[tokio::test]
	async fn retries_stop_after_three() {
		let mut s = scheduler().await;
		let job = CountingJob::failing("broken", u32::MAX, true);
		s.register_periodic(job.clone(), Duration::from_secs(3600));

		let err = s.trigger_job("broken", TriggerSource::Manual).await.unwrap_err();
		assert!(matches!(err, JobError::Failed { retryable: true, .. }));
		assert_eq!(job.attempts(), 4);

		let status = s.job_status("broken").await.unwrap();
		assert_eq!(status.status, HealthState::Degraded);
		assert_eq!(status.consecutive_failures, 1);
	}

	#[tokio::test]
	async fn permanent_failures_are_not_retried() {
		let mut s = scheduler().await;
		let job = CountingJob::failing("fatal", u32::MAX, false);
		s.register_periodic(job.clone(), Duration::from_secs(3600));

		for _ in 0..3 {
			let _ = s.trigger_job("fatal", TriggerSource::Manual).await;
		}
		assert_eq!(job.attempts(), 3);

		let health = s.health_status().await;
		assert_eq!(health.status, HealthState::Unhealthy);
		assert_eq!(health.jobs[0].last_run.as_ref().map(|r| r.status), Some(JobStatus::Failed));
	}

	#[tokio::test]
	async fn cancelled_job_records_cancellation() {
		let mut s = scheduler().await;
		let job = CountingJob::ok("sweep");
		s.register_periodic(job.clone(), Duration::from_secs(3600));

		s.cancel_job("sweep").await.unwrap();
		let err = s.trigger_job("sweep", TriggerSource::Manual).await.unwrap_err();
		assert!(matches!(err, JobError::Cancelled));
		assert_eq!(job.attempts(), 0);
		let runs = s.list_runs("sweep", 1).await.unwrap();
		assert_eq!(runs[0].status, JobStatus::Cancelled);
	}

	#[tokio::test]
	async fn start_runs_startup_and_periodic_jobs_until_shutdown() {
		let mut s = scheduler().await;
		let startup = CountingJob::ok("startup");
		let periodic = CountingJob::ok("tick");
		s.register_startup(startup.clone());
		s.register_periodic(periodic.clone(), Duration::from_millis(10));

		s.start().await.unwrap();
		tokio::time::sleep(Duration::from_millis(200)).await;
		s.shutdown().await;

		assert_eq!(startup.attempts(), 1);
		assert!(periodic.attempts() >= 1);
		let runs = s.list_runs("startup", 10).await.unwrap();
		assert_eq!(runs[0].triggered_by, TriggerSource::Startup);

		let after = periodic.attempts();
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(periodic.attempts(), after, "no runs after shutdown");
		assert_eq!(s.health_status().await.status, HealthState::Healthy);
	}
}
