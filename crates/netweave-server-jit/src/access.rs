// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Who bypasses JIT, and who gets told about requests.

use netweave_common_core::{NetworkId, RoleId, User};
use netweave_server_store::EntityStore;

async fn grants_admin(store: &EntityStore, role: &RoleId, network: &NetworkId) -> bool {
	if *role == RoleId::network_admin(network) || role.is_global_network_admin() {
		return true;
	}
	store
		.get_role(role)
		.await
		.map_or(false, |r| r.network_admin && r.network.as_ref().map_or(true, |n| n == network))
}

/// Platform admins, and users holding a network-admin role for `network`
/// directly or through one of their groups. Roles granted for every
/// network count.
pub async fn is_network_admin(store: &EntityStore, user: &User, network: &NetworkId) -> bool {
	if user.platform_role.is_admin() {
		return true;
	}
	for role in user.roles_in(network) {
		if grants_admin(store, role, network).await {
			return true;
		}
	}
	for group_id in &user.groups {
		let Ok(group) = store.get_group(group_id).await else {
			continue;
		};
		for role in group.roles_in(network) {
			if grants_admin(store, role, network).await {
				return true;
			}
		}
	}
	false
}

/// Platform admins, and users holding any role on `network` directly or
/// through a group.
pub async fn is_member(store: &EntityStore, user: &User, network: &NetworkId) -> bool {
	if user.platform_role.is_admin() || user.roles_in(network).next().is_some() {
		return true;
	}
	for group_id in &user.groups {
		if let Ok(group) = store.get_group(group_id).await {
			if group.roles_in(network).next().is_some() {
				return true;
			}
		}
	}
	false
}

pub async fn network_admins(store: &EntityStore, network: &NetworkId) -> Vec<User> {
	let mut out = Vec::new();
	for user in store.list_users().await {
		if is_network_admin(store, &user, network).await {
			out.push(user);
		}
	}
	out
}
