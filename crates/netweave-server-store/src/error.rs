// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;

use netweave_common_core::ErrorKind;
use netweave_server_db::DbError;

/// Named data-model invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Invariant {
	AddressInCidr,
	AddressUnique,
	RelayConsistency,
	RelayedNotIngress,
	AutoRelayNotRelayed,
	AutoRelaySymmetric,
	InternetGatewayLinux,
	SingleFailover,
	AclTagResolves,
	JitSingleGrant,
	JitGrantWindow,
	DefaultAclPermanent,
	NetworkInUse,
	RoleConflict,
}

impl fmt::Display for Invariant {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Invariant::AddressInCidr => "address_in_cidr",
			Invariant::AddressUnique => "address_unique",
			Invariant::RelayConsistency => "relay_consistency",
			Invariant::RelayedNotIngress => "relayed_not_ingress",
			Invariant::AutoRelayNotRelayed => "auto_relay_not_relayed",
			Invariant::AutoRelaySymmetric => "auto_relay_symmetric",
			Invariant::InternetGatewayLinux => "internet_gateway_linux",
			Invariant::SingleFailover => "single_failover",
			Invariant::AclTagResolves => "acl_tag_resolves",
			Invariant::JitSingleGrant => "jit_single_grant",
			Invariant::JitGrantWindow => "jit_grant_window",
			Invariant::DefaultAclPermanent => "default_acl_permanent",
			Invariant::NetworkInUse => "network_in_use",
			Invariant::RoleConflict => "role_conflict",
		};
		f.write_str(s)
	}
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("not found: {0}")]
	NotFound(String),

	#[error("already exists: {0}")]
	AlreadyExists(String),

	#[error("invariant {which} violated: {message}")]
	InvariantViolated { which: Invariant, message: String },

	#[error("invalid: {0}")]
	Invalid(String),

	#[error("concurrent write: {0}")]
	Conflict(String),

	#[error("no free {family} address left in network {network}")]
	AddressExhausted { network: String, family: &'static str },

	#[error("store backend: {0}")]
	Db(DbError),

	#[error("corrupt record {key}: {source}")]
	Corrupt {
		key: String,
		#[source]
		source: serde_json::Error,
	},
}

impl StoreError {
	pub fn violated(which: Invariant, message: impl Into<String>) -> Self {
		StoreError::InvariantViolated {
			which,
			message: message.into(),
		}
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			StoreError::NotFound(_) => ErrorKind::NotFound,
			StoreError::AlreadyExists(_) => ErrorKind::AlreadyExists,
			StoreError::InvariantViolated { .. }
			| StoreError::Invalid(_)
			| StoreError::Conflict(_)
			| StoreError::AddressExhausted { .. } => ErrorKind::InvariantViolated,
			StoreError::Db(e) => e.kind(),
			StoreError::Corrupt { .. } => ErrorKind::Fatal,
		}
	}

	pub fn invariant(&self) -> Option<Invariant> {
		match self {
			StoreError::InvariantViolated { which, .. } => Some(*which),
			_ => None,
		}
	}
}

impl From<DbError> for StoreError {
	fn from(e: DbError) -> Self {
		match e {
			DbError::NotFound(what) => StoreError::NotFound(what),
			DbError::AlreadyExists(what) => StoreError::AlreadyExists(what),
			DbError::Conflict(what) => StoreError::Conflict(what),
			other => StoreError::Db(other),
		}
	}
}

pub type StoreResult<T> = Result<T, StoreError>;
