// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netweave_common_core::ErrorKind;
use netweave_server_store::{Invariant, StoreError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
	#[error(transparent)]
	Store(#[from] StoreError),

	#[error("node {0} has no {1} role")]
	NotInRole(String, &'static str),
}

impl GatewayError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			GatewayError::Store(e) => e.kind(),
			GatewayError::NotInRole(..) => ErrorKind::NotFound,
		}
	}

	pub fn invariant(&self) -> Option<Invariant> {
		match self {
			GatewayError::Store(e) => e.invariant(),
			GatewayError::NotInRole(..) => None,
		}
	}
}

pub(crate) fn conflict<T>(message: impl Into<String>) -> Result<T> {
	Err(StoreError::violated(Invariant::RoleConflict, message).into())
}

pub(crate) fn violated<T>(which: Invariant, message: impl Into<String>) -> Result<T> {
	Err(StoreError::violated(which, message).into())
}
