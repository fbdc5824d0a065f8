// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netweave_common_core::{ErrorKind, HostId};
use netweave_server_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PublishError>;

#[derive(Debug, Error)]
pub enum PublishError {
	#[error("host {0} has no traffic key")]
	NoTrafficKey(HostId),

	#[error("invalid key: {0}")]
	InvalidKey(String),

	#[error("sealing failed: {0}")]
	Seal(String),

	#[error("serialization failed: {0}")]
	Serialize(#[from] serde_json::Error),

	#[error("broker error: {0}")]
	Broker(#[from] BrokerError),

	#[error("store error: {0}")]
	Store(#[from] StoreError),

	#[error("publisher is shutting down")]
	Shutdown,
}

impl PublishError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			PublishError::NoTrafficKey(_) => ErrorKind::NotFound,
			PublishError::InvalidKey(_) | PublishError::Seal(_) | PublishError::Serialize(_) => {
				ErrorKind::InvariantViolated
			}
			PublishError::Broker(e) if e.is_transient() => ErrorKind::Transient,
			PublishError::Broker(_) | PublishError::Shutdown => ErrorKind::Fatal,
			PublishError::Store(e) => e.kind(),
		}
	}
}

#[derive(Debug, Error)]
pub enum BrokerError {
	#[error("broker unavailable: {0}")]
	Unavailable(String),

	#[error("publish timed out after {0}ms")]
	Timeout(u64),

	#[error("rejected by broker: {0}")]
	Rejected(String),
}

impl BrokerError {
	pub fn is_transient(&self) -> bool {
		matches!(self, BrokerError::Unavailable(_) | BrokerError::Timeout(_))
	}
}
