// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification shared by every crate's error enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	NotFound,
	AlreadyExists,
	InvariantViolated,
	Unauthorized,
	Forbidden,
	/// Retried locally with bounded backoff before surfacing.
	Transient,
	Fatal,
}

impl ErrorKind {
	pub fn http_status(&self) -> u16 {
		match self {
			ErrorKind::NotFound => 404,
			ErrorKind::AlreadyExists => 409,
			ErrorKind::InvariantViolated => 400,
			ErrorKind::Unauthorized => 401,
			ErrorKind::Forbidden => 403,
			ErrorKind::Transient => 503,
			ErrorKind::Fatal => 500,
		}
	}

	pub fn is_retryable(&self) -> bool {
		matches!(self, ErrorKind::Transient)
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ErrorKind::NotFound => "not_found",
			ErrorKind::AlreadyExists => "already_exists",
			ErrorKind::InvariantViolated => "invariant_violated",
			ErrorKind::Unauthorized => "unauthorized",
			ErrorKind::Forbidden => "forbidden",
			ErrorKind::Transient => "transient",
			ErrorKind::Fatal => "fatal",
		};
		f.write_str(s)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_codes() {
		assert_eq!(ErrorKind::NotFound.http_status(), 404);
		assert_eq!(ErrorKind::AlreadyExists.http_status(), 409);
		assert_eq!(ErrorKind::InvariantViolated.http_status(), 400);
		assert_eq!(ErrorKind::Forbidden.http_status(), 403);
		assert!(ErrorKind::Transient.is_retryable());
		assert!(!ErrorKind::Fatal.is_retryable());
	}
}
