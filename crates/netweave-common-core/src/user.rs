// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::ids::{NetworkId, RoleId, UserGroupId};

/// Map key meaning "every network".
pub const ALL_NETWORKS: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformRole {
	SuperAdmin,
	Admin,
	PlatformUser,
	ServiceUser,
}

impl PlatformRole {
	pub fn is_admin(&self) -> bool {
		matches!(self, PlatformRole::SuperAdmin | PlatformRole::Admin)
	}
}

/// Permission template, scoped to one network or global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
	pub id: RoleId,
	#[serde(default)]
	pub network: Option<NetworkId>,
	#[serde(default)]
	pub default: bool,
	#[serde(default)]
	pub full_access: bool,
	#[serde(default)]
	pub network_admin: bool,
}

impl Role {
	pub fn network_admin(network: &NetworkId) -> Self {
		Self {
			id: RoleId::network_admin(network),
			network: Some(network.clone()),
			default: true,
			full_access: true,
			network_admin: true,
		}
	}

	pub fn network_user(network: &NetworkId) -> Self {
		Self {
			id: RoleId::network_user(network),
			network: Some(network.clone()),
			default: true,
			full_access: false,
			network_admin: false,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserGroup {
	pub id: UserGroupId,
	pub name: String,
	/// network (or `*`) -> roles granted to every member.
	#[serde(default)]
	pub network_roles: BTreeMap<String, BTreeSet<RoleId>>,
	#[serde(default)]
	pub default: bool,
}

impl UserGroup {
	pub fn new(id: UserGroupId) -> Self {
		Self {
			name: id.to_string(),
			id,
			network_roles: BTreeMap::new(),
			default: false,
		}
	}

	pub fn network_admin_default(network: &NetworkId) -> Self {
		let mut group = Self::new(UserGroupId::network_admin(network));
		group
			.network_roles
			.insert(network.to_string(), BTreeSet::from([RoleId::network_admin(network)]));
		group.default = true;
		group
	}

	pub fn network_user_default(network: &NetworkId) -> Self {
		let mut group = Self::new(UserGroupId::network_user(network));
		group
			.network_roles
			.insert(network.to_string(), BTreeSet::from([RoleId::network_user(network)]));
		group.default = true;
		group
	}

	pub fn roles_in(&self, network: &NetworkId) -> impl Iterator<Item = &RoleId> {
		self
			.network_roles
			.get(network.as_str())
			.into_iter()
			.chain(self.network_roles.get(ALL_NETWORKS))
			.flatten()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
	pub username: String,
	#[serde(default)]
	pub email: Option<String>,
	pub platform_role: PlatformRole,
	#[serde(default)]
	pub network_roles: BTreeMap<String, BTreeSet<RoleId>>,
	#[serde(default)]
	pub groups: BTreeSet<UserGroupId>,
}

impl User {
	pub fn new(username: impl Into<String>, platform_role: PlatformRole) -> Self {
		Self {
			username: username.into(),
			email: None,
			platform_role,
			network_roles: BTreeMap::new(),
			groups: BTreeSet::new(),
		}
	}

	pub fn roles_in(&self, network: &NetworkId) -> impl Iterator<Item = &RoleId> {
		self
			.network_roles
			.get(network.as_str())
			.into_iter()
			.chain(self.network_roles.get(ALL_NETWORKS))
			.flatten()
	}
}
