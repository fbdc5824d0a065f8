// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use netweave_server_jit::JitService;
use netweave_server_jobs::{Job, JobContext, JobError, JobOutput};
use netweave_server_store::Ctx;
use tracing::instrument;

pub struct JitExpiryJob {
	jit: Arc<JitService>,
}

impl JitExpiryJob {
	pub fn new(jit: Arc<JitService>) -> Self {
		Self { jit }
	}
}

#[async_trait]
impl Job for JitExpiryJob {
	fn id(&self) -> &str {
		"jit-expiry"
	}

	fn name(&self) -> &str {
		"JIT Expiry"
	}

	fn description(&self) -> &str {
		"Expire JIT grants past their window and remove their ext-clients"
	}

	#[instrument(skip(self, ctx), fields(job_id = "jit-expiry"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.check_cancelled()?;

		let report = self.jit.sweep_expired(&Ctx::scheduler(), Utc::now()).await;

		tracing::info!(
			grants_expired = report.grants_expired,
			clients_removed = report.clients_removed,
			failed = report.failed,
			"JIT expiry sweep completed"
		);

		// Grants that failed stay in place and are picked up by the retry.
		if report.failed > 0 {
			return Err(JobError::retryable(format!(
				"{} of {} expired grants not torn down",
				report.failed,
				report.failed + report.grants_expired
			)));
		}

		Ok(JobOutput {
			message: format!("Expired {} JIT grants", report.grants_expired),
			metadata: Some(serde_json::json!({
				"grants_expired": report.grants_expired,
				"clients_removed": report.clients_removed,
			})),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::jobs::{test_context, test_fanout};
	use chrono::Duration;
	use netweave_common_core::{PlatformRole, User};
	use netweave_server_jit::{Approval, Notifier};
	use netweave_server_store::testing::seeded_store;

	#[tokio::test]
	async fn expired_grants_are_removed() {
		let (store, net) = seeded_store().await;
		let ctx = Ctx::api("admin");
		store
			.create_user(&ctx, User::new("u", PlatformRole::PlatformUser))
			.await
			.unwrap();
		let store = Arc::new(store);
		let (fanout, _) = test_fanout(store.clone());
		let jit = Arc::new(JitService::new(store.clone(), fanout, Notifier::new(None)));

		let then = Utc::now() - Duration::hours(3);
		jit.enable(&ctx, &net).await.unwrap();
		let request = jit.create_request(&ctx, &net, "u", "", then).await.unwrap();
		jit.approve(&ctx, &request.id, Approval::Hours(1), "admin", then)
			.await
			.unwrap();
		assert_eq!(store.list_grants(&net).await.len(), 1);

		let output = JitExpiryJob::new(jit).run(&test_context()).await.unwrap();
		assert_eq!(output.metadata.unwrap()["grants_expired"], 1);
		assert!(store.list_grants(&net).await.is_empty());
	}

	#[tokio::test]
	async fn cancelled_run_does_nothing() {
		let (store, _) = seeded_store().await;
		let store = Arc::new(store);
		let (fanout, _) = test_fanout(store.clone());
		let job = JitExpiryJob::new(Arc::new(JitService::new(store, fanout, Notifier::new(None))));
		let ctx = test_context();
		ctx.cancellation_token.cancel();
		assert!(matches!(job.run(&ctx).await, Err(JobError::Cancelled)));
	}
}
