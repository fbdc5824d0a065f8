// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netweave_common_core::{
	Acl, Egress, EventAction, JitGrant, JitRequest, Network, NetworkId, Node, PostureCheck, Role, Tag,
	User, UserGroup, UserGroupId,
};
use tracing::{info, instrument};

use crate::context::Ctx;
use crate::error::{Invariant, StoreError, StoreResult};
use crate::store::EntityStore;

impl EntityStore {
	pub async fn get_network(&self, id: &NetworkId) -> StoreResult<Network> {
		self.require::<Network>(id.as_str()).await
	}

	pub async fn list_networks(&self) -> Vec<Network> {
		self.all::<Network>().await
	}

	/// Create a network along with its default policies, default user
	/// groups and network roles.
	#[instrument(skip(self, ctx, network), fields(network = %network.id))]
	pub async fn create_network(&self, ctx: &Ctx, network: Network) -> StoreResult<Network> {
		if let Some(range) = network.address_range {
			let overlap = self
				.all::<Network>()
				.await
				.into_iter()
				.find(|n| {
					n.address_range
						.map(|r| r.contains(&range.network()) || range.contains(&r.network()))
						.unwrap_or(false)
				});
			if let Some(other) = overlap {
				return Err(StoreError::Conflict(format!(
					"{range} overlaps network {}",
					other.id
				)));
			}
		}

		self.create(&network).await?;
		self.emit(ctx, EventAction::Create, None, Some(&network)).await;

		for role in [Role::network_admin(&network.id), Role::network_user(&network.id)] {
			if self.read::<Role>(role.id.as_str()).await?.is_none() {
				self.write(&role).await?;
			}
		}
		for group in [
			UserGroup::network_admin_default(&network.id),
			UserGroup::network_user_default(&network.id),
		] {
			if self.read::<UserGroup>(group.id.as_str()).await?.is_none() {
				self.write(&group).await?;
			}
		}
		for acl in [Acl::default_device(&network.id), Acl::default_user(&network.id)] {
			self.create(&acl).await?;
			self.emit(ctx, EventAction::Create, None, Some(&acl)).await;
		}

		info!("network created");
		Ok(network)
	}

	/// Replace mutable settings. The id is immutable.
	#[instrument(skip(self, ctx, network), fields(network = %network.id))]
	pub async fn update_network(&self, ctx: &Ctx, network: Network) -> StoreResult<Network> {
		let _held = self.lock_key(format!("network/{}", network.id)).await;
		let old = self.get_network(&network.id).await?;
		if old.address_range != network.address_range && !self.list_nodes(&network.id).await.is_empty() {
			return Err(StoreError::violated(
				Invariant::NetworkInUse,
				format!("cannot change the range of {} while nodes exist", network.id),
			));
		}
		self.write(&network).await?;
		self.emit(ctx, EventAction::Update, Some(&old), Some(&network)).await;
		Ok(network)
	}

	/// Delete an empty network and everything scoped to it.
	#[instrument(skip(self, ctx), fields(network = %id))]
	pub async fn delete_network(&self, ctx: &Ctx, id: &NetworkId) -> StoreResult<Network> {
		let _held = self.lock_key(format!("network/{id}")).await;
		let network = self.get_network(id).await?;
		let nodes = self.all_in::<Node>(id).await;
		if !nodes.is_empty() {
			return Err(StoreError::violated(
				Invariant::NetworkInUse,
				format!("network {id} still has {} nodes", nodes.len()),
			));
		}

		for acl in self.all_in::<Acl>(id).await {
			self.remove::<Acl>(&acl.id.to_string()).await?;
		}
		for tag in self.all_in::<Tag>(id).await {
			self.remove::<Tag>(tag.id.as_str()).await?;
		}
		for egress in self.all_in::<Egress>(id).await {
			self.remove::<Egress>(&egress.id.to_string()).await?;
		}
		for grant in self.all_in::<JitGrant>(id).await {
			self.remove::<JitGrant>(&grant.id.to_string()).await?;
		}
		for request in self.all_in::<JitRequest>(id).await {
			self.remove::<JitRequest>(&request.id.to_string()).await?;
		}
		for check in self.all_in::<PostureCheck>(id).await {
			self.remove::<PostureCheck>(&check.id.to_string()).await?;
		}
		for role in self.all_in::<Role>(id).await {
			self.remove::<Role>(role.id.as_str()).await?;
		}
		for group in [
			UserGroup::network_admin_default(id),
			UserGroup::network_user_default(id),
		] {
			if self.read::<UserGroup>(group.id.as_str()).await?.is_some() {
				self.remove::<UserGroup>(group.id.as_str()).await?;
			}
		}
		self.forget_network_roles(id).await?;

		self.remove::<Network>(id.as_str()).await?;
		self.emit(ctx, EventAction::Delete, Some(&network), None).await;
		info!("network deleted");
		Ok(network)
	}

	/// Drop role grants for a deleted network from users and groups.
	async fn forget_network_roles(&self, id: &NetworkId) -> StoreResult<()> {
		for mut user in self.all::<User>().await {
			let before = user.groups.len();
			user.groups.retain(|g| {
				*g != UserGroupId::network_admin(id) && *g != UserGroupId::network_user(id)
			});
			if user.network_roles.remove(id.as_str()).is_some() || user.groups.len() != before {
				self.write(&user).await?;
			}
		}
		for mut group in self.all::<UserGroup>().await {
			if group.network_roles.remove(id.as_str()).is_some() {
				self.write(&group).await?;
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{node_in, seeded_store};
	use netweave_common_core::RoleId;

	#[tokio::test]
	async fn create_seeds_defaults() {
		let (store, net) = seeded_store().await;
		let acls = store.list_acls(&net).await;
		assert_eq!(acls.iter().filter(|a| a.default).count(), 2);
		assert!(store.get_role(&RoleId::network_admin(&net)).await.is_ok());
		assert!(store
			.get_group(&UserGroupId::network_user(&net))
			.await
			.is_ok());
	}

	#[tokio::test]
	async fn overlapping_range_conflicts() {
		let (store, _net) = seeded_store().await;
		let err = store
			.create_network(
				&Ctx::startup(),
				Network::new("other", Some("10.0.0.128/25".parse().unwrap())),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, StoreError::Conflict(_)));
	}

	#[tokio::test]
	async fn delete_refuses_while_nodes_exist() {
		let (store, net) = seeded_store().await;
		let node = node_in(&store, &net, "a", "10.0.0.1").await;
		let err = store.delete_network(&Ctx::startup(), &net).await.unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::NetworkInUse));

		store.delete_node(&Ctx::startup(), &node.id).await.unwrap();
		store.delete_network(&Ctx::startup(), &net).await.unwrap();
		assert!(store.list_acls(&net).await.is_empty());
		assert!(store.get_role(&RoleId::network_admin(&net)).await.is_err());
	}
}
