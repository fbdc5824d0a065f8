// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netweave_common_core::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Already exists: {0}")]
	AlreadyExists(String),

	#[error("Conflict: {0}")]
	Conflict(String),

	#[error("Timed out after {0}ms")]
	Timeout(u64),

	#[error("Cancelled")]
	Cancelled,

	#[error("Unavailable: {0}")]
	Unavailable(String),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl DbError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			DbError::NotFound(_) => ErrorKind::NotFound,
			DbError::AlreadyExists(_) => ErrorKind::AlreadyExists,
			DbError::Conflict(_) => ErrorKind::InvariantViolated,
			DbError::Timeout(_) | DbError::Unavailable(_) => ErrorKind::Transient,
			DbError::Sqlx(e) if is_transient_sqlx(e) => ErrorKind::Transient,
			DbError::Sqlx(_)
			| DbError::Cancelled
			| DbError::Internal(_)
			| DbError::Serialization(_) => ErrorKind::Fatal,
		}
	}

	pub fn is_transient(&self) -> bool {
		self.kind() == ErrorKind::Transient
	}
}

pub(crate) fn is_transient_sqlx(e: &sqlx::Error) -> bool {
	match e {
		sqlx::Error::Io(_) => true,
		sqlx::Error::PoolTimedOut => true,
		sqlx::Error::PoolClosed => true,
		sqlx::Error::Database(db_err) => {
			let msg = db_err.message().to_lowercase();
			msg.contains("busy") || msg.contains("locked") || msg.contains("timeout")
		}
		_ => false,
	}
}

pub type Result<T> = std::result::Result<T, DbError>;
