// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use netweave_server_jobs::{Job, JobContext, JobError, JobOutput};
use netweave_server_publish::{Fanout, FanoutReport};
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
	/// Only recipients whose last message was never delivered.
	Pending,
	/// Every network, as after a restart.
	Full,
}

pub struct PublishReconcileJob {
	fanout: Arc<Fanout>,
	scope: Scope,
}

impl PublishReconcileJob {
	pub fn pending(fanout: Arc<Fanout>) -> Self {
		Self {
			fanout,
			scope: Scope::Pending,
		}
	}

	pub fn full(fanout: Arc<Fanout>) -> Self {
		Self {
			fanout,
			scope: Scope::Full,
		}
	}

	async fn resync_all(&self, ctx: &JobContext) -> Result<FanoutReport, JobError> {
		let mut total = FanoutReport::default();
		for network in self.fanout.store().list_networks().await {
			ctx.check_cancelled()?;
			let report = self
				.fanout
				.network(&network.id)
				.await
				.map_err(|e| JobError::retryable(format!("resync of {} failed: {e}", network.id)))?;
			total.published += report.published;
			total.suppressed += report.suppressed;
			total.failed += report.failed;
		}
		Ok(total)
	}
}

#[async_trait]
impl Job for PublishReconcileJob {
	fn id(&self) -> &str {
		match self.scope {
			Scope::Pending => "publish-reconcile",
			Scope::Full => "publish-resync",
		}
	}

	fn name(&self) -> &str {
		match self.scope {
			Scope::Pending => "Publish Reconcile",
			Scope::Full => "Publish Resync",
		}
	}

	fn description(&self) -> &str {
		match self.scope {
			Scope::Pending => "Republish updates whose delivery failed",
			Scope::Full => "Publish peer state for every network",
		}
	}

	#[instrument(skip(self, ctx), fields(job_id = self.id()))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.check_cancelled()?;

		let report = match self.scope {
			Scope::Pending => self
				.fanout
				.reconcile()
				.await
				.map_err(|e| JobError::retryable(e.to_string()))?,
			Scope::Full => self.resync_all(ctx).await?,
		};

		if report.published > 0 || report.failed > 0 {
			tracing::info!(
				published = report.published,
				suppressed = report.suppressed,
				failed = report.failed,
				"Publish reconcile completed"
			);
		}

		Ok(JobOutput {
			message: format!("Published {} updates", report.published),
			metadata: Some(serde_json::json!({
				"published": report.published,
				"suppressed": report.suppressed,
				"failed": report.failed,
			})),
		})
	}
}
