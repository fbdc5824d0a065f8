// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::types::TriggerSource;

pub struct JobContext {
	pub run_id: String,
	pub triggered_by: TriggerSource,
	pub cancellation_token: CancellationToken,
}

impl JobContext {
	/// Bail out of a long job between steps.
	pub fn check_cancelled(&self) -> Result<(), JobError> {
		if self.cancellation_token.is_cancelled() {
			return Err(JobError::Cancelled);
		}
		Ok(())
	}
}
