// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netweave_common_core::ErrorKind;
use netweave_server_db::DbError;
use thiserror::Error;

pub type AuditResult<T> = Result<T, AuditError>;

#[derive(Error, Debug)]
pub enum AuditError {
	#[error("event queue is at capacity")]
	QueueFull,

	#[error("sink '{sink}' error: {source}")]
	SinkError {
		sink: String,
		#[source]
		source: AuditSinkError,
	},

	#[error("store error: {0}")]
	Store(#[from] DbError),

	#[error("service is shutting down")]
	Shutdown,
}

impl AuditError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			AuditError::QueueFull => ErrorKind::Transient,
			AuditError::SinkError { source, .. } => match source {
				AuditSinkError::Transient(_) => ErrorKind::Transient,
				AuditSinkError::Permanent(_) => ErrorKind::Fatal,
			},
			AuditError::Store(e) => e.kind(),
			AuditError::Shutdown => ErrorKind::Fatal,
		}
	}
}

#[derive(Error, Debug)]
pub enum AuditSinkError {
	#[error("transient error: {0}")]
	Transient(String),

	#[error("permanent error: {0}")]
	Permanent(String),
}

impl From<DbError> for AuditSinkError {
	fn from(e: DbError) -> Self {
		if e.is_transient() {
			AuditSinkError::Transient(e.to_string())
		} else {
			AuditSinkError::Permanent(e.to_string())
		}
	}
}
