// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Strongly typed identities.
//!
//! Cross-entity references (relay, auto-relay, failover, ingress) are always
//! one of these ids, never an owning pointer. Lookups go through the
//! id-keyed maps of the entity store or a [`crate::NetworkSnapshot`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(Uuid);

		impl $name {
			pub fn new() -> Self {
				Self(Uuid::new_v4())
			}

			pub fn from_uuid(uuid: Uuid) -> Self {
				Self(uuid)
			}

			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl Default for $name {
			fn default() -> Self {
				Self::new()
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl std::str::FromStr for $name {
			type Err = uuid::Error;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Ok(Self(s.parse()?))
			}
		}
	};
}

macro_rules! string_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(String);

		impl $name {
			pub fn new(value: impl Into<String>) -> Self {
				Self(value.into())
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl From<&str> for $name {
			fn from(value: &str) -> Self {
				Self(value.to_string())
			}
		}

		impl From<String> for $name {
			fn from(value: String) -> Self {
				Self(value)
			}
		}
	};
}

uuid_id!(
	/// A host's membership in one network.
	NodeId
);
uuid_id!(
	/// A physical or virtual machine.
	HostId
);
uuid_id!(AclId);
uuid_id!(EgressId);
uuid_id!(JitRequestId);
uuid_id!(JitGrantId);
uuid_id!(PostureCheckId);

string_id!(
	/// Network name. Networks are identified by name, not by uuid.
	NetworkId
);
string_id!(UserGroupId);
string_id!(RoleId);
string_id!(
	/// Tag identity, always `"<network>.<name>"`.
	TagId
);

impl TagId {
	pub fn for_network(network: &NetworkId, name: &str) -> Self {
		Self(format!("{}.{}", network, name))
	}

	/// The network part of `"<network>.<name>"`.
	pub fn network(&self) -> Option<&str> {
		self.0.split_once('.').map(|(net, _)| net)
	}

	pub fn name(&self) -> &str {
		self.0.split_once('.').map(|(_, name)| name).unwrap_or(&self.0)
	}
}

impl UserGroupId {
	pub fn network_admin(network: &NetworkId) -> Self {
		Self(format!("{network}-admin-grp"))
	}

	pub fn network_user(network: &NetworkId) -> Self {
		Self(format!("{network}-user-grp"))
	}
}

impl RoleId {
	/// Network admin across every network.
	pub const GLOBAL_NETWORK_ADMIN: &'static str = "global-network-admin";
	pub const GLOBAL_NETWORK_USER: &'static str = "global-network-user";

	pub fn network_admin(network: &NetworkId) -> Self {
		Self(format!("{network}-network-admin"))
	}

	pub fn network_user(network: &NetworkId) -> Self {
		Self(format!("{network}-network-user"))
	}

	pub fn is_global_network_admin(&self) -> bool {
		self.0 == Self::GLOBAL_NETWORK_ADMIN
	}
}
