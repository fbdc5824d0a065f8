// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netweave_common_core::ErrorKind;
use netweave_server_db::DbError;

pub type Result<T> = std::result::Result<T, JobError>;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
	#[error("Job not found: {0}")]
	NotFound(String),

	#[error("Job failed: {message}")]
	Failed { message: String, retryable: bool },

	#[error("Job cancelled")]
	Cancelled,

	#[error(transparent)]
	Db(#[from] DbError),
}

impl JobError {
	pub fn retryable(message: impl Into<String>) -> Self {
		JobError::Failed {
			message: message.into(),
			retryable: true,
		}
	}

	pub fn permanent(message: impl Into<String>) -> Self {
		JobError::Failed {
			message: message.into(),
			retryable: false,
		}
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			JobError::NotFound(_) => ErrorKind::NotFound,
			JobError::Failed { retryable: true, .. } => ErrorKind::Transient,
			JobError::Failed { .. } | JobError::Cancelled => ErrorKind::Fatal,
			JobError::Db(e) => e.kind(),
		}
	}
}
