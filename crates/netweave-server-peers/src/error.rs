// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netweave_common_core::{ErrorKind, NodeId};
use netweave_server_policy::PolicyError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PeersError>;

#[derive(Debug, Error)]
pub enum PeersError {
	#[error("node not found: {0}")]
	UnknownNode(NodeId),

	#[error("ext client not found: {0}")]
	UnknownExtClient(String),

	#[error(transparent)]
	Policy(#[from] PolicyError),
}

impl PeersError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			PeersError::UnknownNode(_) | PeersError::UnknownExtClient(_) => ErrorKind::NotFound,
			PeersError::Policy(e) => e.kind(),
		}
	}
}
