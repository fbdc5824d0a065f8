// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netweave_common_core::ErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PolicyError>;

#[derive(Debug, Error)]
pub enum PolicyError {
	#[error("node not in snapshot: {0}")]
	UnknownNode(String),

	#[error("user not found: {0}")]
	UnknownUser(String),
}

impl PolicyError {
	pub fn kind(&self) -> ErrorKind {
		ErrorKind::NotFound
	}
}
