// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{BTreeMap, BTreeSet};

use netweave_common_core::{
	Acl, AclTagKind, EventAction, ExtClient, NetworkId, NodeId, Role, RoleId, RuleType, User,
	UserGroup, UserGroupId,
};
use netweave_common_core::user::ALL_NETWORKS;
use tracing::{info, instrument};

use crate::acls::strip_acl_refs;
use crate::context::Ctx;
use crate::error::{Invariant, StoreError, StoreResult};
use crate::store::EntityStore;

/// What removing a user touched.
#[derive(Debug, Clone, Default)]
pub struct UserDeletion {
	pub ext_clients_removed: Vec<ExtClient>,
	/// Ingress gateways that lost a client and need a fresh peer list.
	pub ingress_touched: BTreeSet<NodeId>,
	pub networks_touched: BTreeSet<NetworkId>,
}

impl EntityStore {
	pub async fn get_user(&self, username: &str) -> StoreResult<User> {
		self.require::<User>(username).await
	}

	pub async fn find_user(&self, username: &str) -> StoreResult<Option<User>> {
		self.read::<User>(username).await
	}

	pub async fn list_users(&self) -> Vec<User> {
		self.all::<User>().await
	}

	#[instrument(skip(self, ctx, user), fields(username = %user.username))]
	pub async fn create_user(&self, ctx: &Ctx, user: User) -> StoreResult<User> {
		self.check_grants(&user.network_roles, &user.groups).await?;
		self.create(&user).await?;
		self.emit(ctx, EventAction::Create, None, Some(&user)).await;
		Ok(user)
	}

	#[instrument(skip(self, ctx, user), fields(username = %user.username))]
	pub async fn update_user(&self, ctx: &Ctx, user: User) -> StoreResult<User> {
		let old = self.get_user(&user.username).await?;
		self.check_grants(&user.network_roles, &user.groups).await?;
		self.write(&user).await?;
		self.emit(ctx, EventAction::Update, Some(&old), Some(&user)).await;
		Ok(user)
	}

	/// Delete a user, their ext-clients and their place in user policies.
	#[instrument(skip(self, ctx))]
	pub async fn delete_user(&self, ctx: &Ctx, username: &str) -> StoreResult<UserDeletion> {
		let user = self.get_user(username).await?;
		let mut out = UserDeletion::default();

		out.ext_clients_removed = self
			.delete_ext_clients_where(ctx, |c| c.owner.as_deref() == Some(username))
			.await?;
		for client in &out.ext_clients_removed {
			out.ingress_touched.insert(client.ingress_id);
			out.networks_touched.insert(client.network.clone());
		}

		for network in self.list_networks().await {
			let touched = strip_acl_refs(self, ctx, &network.id, &[AclTagKind::User], username).await?;
			if touched > 0 {
				out.networks_touched.insert(network.id);
			}
		}

		let user = self.remove::<User>(&user.username).await?;
		self.emit(ctx, EventAction::Delete, Some(&user), None).await;
		info!(
			ext_clients_removed = out.ext_clients_removed.len(),
			"user deleted"
		);
		Ok(out)
	}

	pub async fn get_group(&self, id: &UserGroupId) -> StoreResult<UserGroup> {
		self.require::<UserGroup>(id.as_str()).await
	}

	pub async fn list_groups(&self) -> Vec<UserGroup> {
		self.all::<UserGroup>().await
	}

	pub async fn create_group(&self, ctx: &Ctx, group: UserGroup) -> StoreResult<UserGroup> {
		self.check_grants(&group.network_roles, &BTreeSet::new()).await?;
		self.create(&group).await?;
		self.emit(ctx, EventAction::Create, None, Some(&group)).await;
		Ok(group)
	}

	pub async fn update_group(&self, ctx: &Ctx, group: UserGroup) -> StoreResult<UserGroup> {
		let old = self.get_group(&group.id).await?;
		self.check_grants(&group.network_roles, &BTreeSet::new()).await?;
		self.write(&group).await?;
		self.emit(ctx, EventAction::Update, Some(&old), Some(&group)).await;
		Ok(group)
	}

	/// Delete a custom group. Members lose it and user policies drop it.
	#[instrument(skip(self, ctx), fields(group = %id))]
	pub async fn delete_group(&self, ctx: &Ctx, id: &UserGroupId) -> StoreResult<UserGroup> {
		let group = self.get_group(id).await?;
		if group.default {
			return Err(StoreError::violated(
				Invariant::RoleConflict,
				format!("default group {id} is managed with its network"),
			));
		}
		for mut user in self.all::<User>().await {
			let old = user.clone();
			if user.groups.remove(id) {
				self.write(&user).await?;
				self.emit(ctx, EventAction::Update, Some(&old), Some(&user)).await;
			}
		}
		for network in self.list_networks().await {
			strip_acl_refs(self, ctx, &network.id, &[AclTagKind::UserGroup], id.as_str()).await?;
		}
		let group = self.remove::<UserGroup>(id.as_str()).await?;
		self.emit(ctx, EventAction::Delete, Some(&group), None).await;
		Ok(group)
	}

	pub async fn get_role(&self, id: &RoleId) -> StoreResult<Role> {
		self.require::<Role>(id.as_str()).await
	}

	pub async fn list_roles(&self) -> Vec<Role> {
		self.all::<Role>().await
	}

	pub async fn create_role(&self, ctx: &Ctx, role: Role) -> StoreResult<Role> {
		if let Some(network) = &role.network {
			self.get_network(network).await?;
		}
		self.create(&role).await?;
		self.emit(ctx, EventAction::Create, None, Some(&role)).await;
		Ok(role)
	}

	pub async fn delete_role(&self, ctx: &Ctx, id: &RoleId) -> StoreResult<Role> {
		let role = self.get_role(id).await?;
		if role.default {
			return Err(StoreError::violated(
				Invariant::RoleConflict,
				format!("default role {id} cannot be deleted"),
			));
		}
		for mut user in self.all::<User>().await {
			if strip_role(&mut user.network_roles, id) {
				self.write(&user).await?;
			}
		}
		for mut group in self.all::<UserGroup>().await {
			if strip_role(&mut group.network_roles, id) {
				self.write(&group).await?;
			}
		}
		let role = self.remove::<Role>(id.as_str()).await?;
		self.emit(ctx, EventAction::Delete, Some(&role), None).await;
		Ok(role)
	}

	/// Every granted role exists and is scoped to the network it is
	/// granted under; every group exists.
	async fn check_grants(
		&self,
		network_roles: &BTreeMap<String, BTreeSet<RoleId>>,
		groups: &BTreeSet<UserGroupId>,
	) -> StoreResult<()> {
		for (network, roles) in network_roles {
			if network != ALL_NETWORKS {
				self.get_network(&NetworkId::new(network.as_str())).await?;
			}
			for role_id in roles {
				let role = self.get_role(role_id).await?;
				let scoped = match &role.network {
					None => true,
					Some(n) => n.as_str() == network,
				};
				if !scoped {
					return Err(StoreError::violated(
						Invariant::RoleConflict,
						format!("role {role_id} cannot be granted under {network}"),
					));
				}
			}
		}
		for group in groups {
			self.get_group(group).await?;
		}
		Ok(())
	}

	/// User policies of a network in creation order.
	pub async fn user_policies(&self, network: &NetworkId) -> Vec<Acl> {
		self.list_acls(network)
			.await
			.into_iter()
			.filter(|a| a.rule_type == RuleType::UserPolicy)
			.collect()
	}
}

fn strip_role(map: &mut BTreeMap<String, BTreeSet<RoleId>>, id: &RoleId) -> bool {
	let mut changed = false;
	for roles in map.values_mut() {
		changed |= roles.remove(id);
	}
	map.retain(|_, roles| !roles.is_empty());
	changed
}
