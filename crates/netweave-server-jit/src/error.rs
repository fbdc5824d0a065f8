// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netweave_common_core::{ErrorKind, JitRequestId, JitStatus, NetworkId};
use netweave_server_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, JitError>;

#[derive(Debug, Error)]
pub enum JitError {
	#[error("jit is not enabled on network {0}")]
	NotEnabled(NetworkId),

	#[error("user {user} already has an active grant on {network}")]
	ActiveGrant { network: NetworkId, user: String },

	#[error("user {user} already has a pending request on {network}")]
	PendingRequest { network: NetworkId, user: String },

	#[error("request {id} is {status}, not pending", status = .status.as_str())]
	NotPending { id: JitRequestId, status: JitStatus },

	#[error("expiry must be in the future")]
	InvalidExpiry,

	#[error("user {user} has no access to {network}")]
	AccessDenied { network: NetworkId, user: String },

	#[error(transparent)]
	Store(#[from] StoreError),
}

impl JitError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			JitError::NotEnabled(_) | JitError::AccessDenied { .. } => ErrorKind::Forbidden,
			JitError::ActiveGrant { .. } | JitError::PendingRequest { .. } => ErrorKind::AlreadyExists,
			JitError::NotPending { .. } | JitError::InvalidExpiry => ErrorKind::InvariantViolated,
			JitError::Store(e) => e.kind(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn kinds_map_to_http_classes() {
		let net = NetworkId::from("n1");
		assert_eq!(JitError::NotEnabled(net.clone()).kind(), ErrorKind::Forbidden);
		assert_eq!(
			JitError::PendingRequest {
				network: net,
				user: "u".into()
			}
			.kind(),
			ErrorKind::AlreadyExists
		);
		assert_eq!(JitError::InvalidExpiry.kind().http_status(), ErrorKind::InvariantViolated.http_status());
	}
}
