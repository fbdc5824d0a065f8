// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policies, node tags and egress rules.

use std::collections::BTreeSet;

use ipnet::IpNet;
use netweave_common_core::{
	Acl, AclId, AclTagKind, Egress, EgressId, EventAction, ExtClient, NetworkId, Node, NodeId, PostureCheck,
	Tag, TagId,
};
use tracing::{debug, info, instrument};

use crate::context::Ctx;
use crate::error::{Invariant, StoreError, StoreResult};
use crate::store::EntityStore;
use crate::validate::validate_acl;

/// Remove `(kind, value)` tags from every policy of a network. A
/// non-default policy left without a source or destination is deleted.
pub(crate) async fn strip_acl_refs(
	store: &EntityStore,
	ctx: &Ctx,
	network: &NetworkId,
	kinds: &[AclTagKind],
	value: &str,
) -> StoreResult<usize> {
	let mut touched = 0;
	for mut acl in store.all_in::<Acl>(network).await {
		if !kinds.iter().any(|k| acl.references(*k, value)) {
			continue;
		}
		let old = acl.clone();
		let keep = |t: &netweave_common_core::AclTag| !(kinds.contains(&t.kind) && t.value == value);
		acl.src.retain(keep);
		acl.dst.retain(keep);
		touched += 1;

		if !acl.default && (acl.src.is_empty() || acl.dst.is_empty()) {
			store.remove::<Acl>(&acl.id.to_string()).await?;
			store.emit(ctx, EventAction::Delete, Some(&old), None).await;
			debug!(acl = %acl.id, "policy emptied and removed");
		} else {
			store.write(&acl).await?;
			store.emit(ctx, EventAction::Update, Some(&old), Some(&acl)).await;
		}
	}
	Ok(touched)
}

impl EntityStore {
	pub async fn get_acl(&self, id: &AclId) -> StoreResult<Acl> {
		self.require::<Acl>(&id.to_string()).await
	}

	/// Policies of a network in creation order.
	pub async fn list_acls(&self, network: &NetworkId) -> Vec<Acl> {
		let mut acls = self.all_in::<Acl>(network).await;
		acls.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
		acls
	}

	#[instrument(skip(self, ctx, acl), fields(acl = %acl.id, network = %acl.network))]
	pub async fn create_acl(&self, ctx: &Ctx, acl: Acl) -> StoreResult<Acl> {
		let view = self.view(&acl.network).await?;
		validate_acl(&acl, &view)?;
		self.create(&acl).await?;
		self.emit(ctx, EventAction::Create, None, Some(&acl)).await;
		Ok(acl)
	}

	#[instrument(skip(self, ctx, acl), fields(acl = %acl.id))]
	pub async fn update_acl(&self, ctx: &Ctx, acl: Acl) -> StoreResult<Acl> {
		let old = self.get_acl(&acl.id).await?;
		if old.default && (old.rule_type != acl.rule_type || !acl.default) {
			return Err(StoreError::violated(
				Invariant::DefaultAclPermanent,
				format!("default policy {} keeps its type and default flag", acl.name),
			));
		}
		let view = self.view(&acl.network).await?;
		validate_acl(&acl, &view)?;
		self.write(&acl).await?;
		self.emit(ctx, EventAction::Update, Some(&old), Some(&acl)).await;
		Ok(acl)
	}

	#[instrument(skip(self, ctx))]
	pub async fn delete_acl(&self, ctx: &Ctx, id: &AclId) -> StoreResult<Acl> {
		let acl = self.get_acl(id).await?;
		if acl.default {
			return Err(StoreError::violated(
				Invariant::DefaultAclPermanent,
				format!("default policy {} cannot be deleted", acl.name),
			));
		}
		let acl = self.remove::<Acl>(&id.to_string()).await?;
		self.emit(ctx, EventAction::Delete, Some(&acl), None).await;
		Ok(acl)
	}

	pub async fn get_tag(&self, id: &TagId) -> StoreResult<Tag> {
		self.require::<Tag>(id.as_str()).await
	}

	pub async fn list_tags(&self, network: &NetworkId) -> Vec<Tag> {
		self.all_in::<Tag>(network).await
	}

	#[instrument(skip(self, ctx, tag), fields(tag = %tag.id))]
	pub async fn create_tag(&self, ctx: &Ctx, tag: Tag) -> StoreResult<Tag> {
		self.get_network(&tag.network).await?;
		self.create(&tag).await?;
		self.emit(ctx, EventAction::Create, None, Some(&tag)).await;
		Ok(tag)
	}

	/// Delete a tag and strip it from nodes, ext-clients, egress rules
	/// and policies.
	#[instrument(skip(self, ctx), fields(tag = %id))]
	pub async fn delete_tag(&self, ctx: &Ctx, id: &TagId) -> StoreResult<Tag> {
		let tag = self.get_tag(id).await?;

		let tagged: Vec<Node> = self
			.all_in::<Node>(&tag.network)
			.await
			.into_iter()
			.filter(|n| n.tags.contains(id))
			.collect();
		let _held = self.lock_nodes(tagged.iter().map(|n| n.id)).await;
		for mut node in tagged {
			node.tags.remove(id);
			self.write(&node).await?;
		}
		for mut client in self.all_in::<ExtClient>(&tag.network).await {
			if client.tags.remove(id) {
				self.write(&client).await?;
			}
		}
		for mut egress in self.all_in::<Egress>(&tag.network).await {
			if egress.tags.remove(id) {
				self.write(&egress).await?;
			}
		}
		for mut check in self.all_in::<PostureCheck>(&tag.network).await {
			if check.tags.remove(id.as_str()) {
				self.write(&check).await?;
			}
		}
		strip_acl_refs(self, ctx, &tag.network, &[AclTagKind::NodeTag], id.as_str()).await?;

		let tag = self.remove::<Tag>(id.as_str()).await?;
		self.emit(ctx, EventAction::Delete, Some(&tag), None).await;
		Ok(tag)
	}

	pub async fn get_egress(&self, id: &EgressId) -> StoreResult<Egress> {
		self.require::<Egress>(&id.to_string()).await
	}

	pub async fn list_egresses(&self, network: &NetworkId) -> Vec<Egress> {
		self.all_in::<Egress>(network).await
	}

	#[instrument(skip(self, ctx, egress), fields(egress = %egress.id, network = %egress.network))]
	pub async fn create_egress(&self, ctx: &Ctx, egress: Egress) -> StoreResult<Egress> {
		self.check_egress(&egress).await?;
		self.create(&egress).await?;
		self.emit(ctx, EventAction::Create, None, Some(&egress)).await;
		self.refresh_egress_flags(ctx, &egress.network).await?;
		info!("egress created");
		Ok(egress)
	}

	#[instrument(skip(self, ctx, egress), fields(egress = %egress.id))]
	pub async fn update_egress(&self, ctx: &Ctx, egress: Egress) -> StoreResult<Egress> {
		let old = self.get_egress(&egress.id).await?;
		self.check_egress(&egress).await?;
		self.write(&egress).await?;
		self.emit(ctx, EventAction::Update, Some(&old), Some(&egress)).await;
		self.refresh_egress_flags(ctx, &egress.network).await?;
		Ok(egress)
	}

	/// Store the resolved answers of a domain-based egress rule.
	pub async fn set_egress_domain_answers(
		&self,
		ctx: &Ctx,
		id: &EgressId,
		answers: Vec<IpNet>,
	) -> StoreResult<Egress> {
		let mut egress = self.get_egress(id).await?;
		if egress.domain.is_none() {
			return Err(StoreError::Conflict(format!("egress {id} has no domain")));
		}
		egress.domain_ans = answers;
		self.update_egress(ctx, egress).await
	}

	#[instrument(skip(self, ctx))]
	pub async fn delete_egress(&self, ctx: &Ctx, id: &EgressId) -> StoreResult<Egress> {
		let egress = self.get_egress(id).await?;
		strip_acl_refs(
			self,
			ctx,
			&egress.network,
			&[AclTagKind::Egress, AclTagKind::EgressRange],
			&id.to_string(),
		)
		.await?;
		let egress = self.remove::<Egress>(&id.to_string()).await?;
		self.emit(ctx, EventAction::Delete, Some(&egress), None).await;
		self.refresh_egress_flags(ctx, &egress.network).await?;
		Ok(egress)
	}

	async fn check_egress(&self, egress: &Egress) -> StoreResult<()> {
		self.get_network(&egress.network).await?;
		if egress.range.is_none() && egress.domain.is_none() {
			return Err(StoreError::Conflict(format!(
				"egress {} needs a range or a domain",
				egress.name
			)));
		}
		for id in &egress.nodes {
			let node = self.get_node(id).await?;
			if node.network != egress.network {
				return Err(StoreError::NotFound(format!("node {id} in {}", egress.network)));
			}
		}
		Ok(())
	}

	/// Recompute each node's egress-gateway flag from the enabled rules.
	async fn refresh_egress_flags(&self, ctx: &Ctx, network: &NetworkId) -> StoreResult<()> {
		let egresses = self.all_in::<Egress>(network).await;
		let nodes = self.all_in::<Node>(network).await;
		let stale: BTreeSet<NodeId> = nodes
			.iter()
			.filter(|n| n.is_egress_gateway != egresses.iter().any(|e| e.status && e.has_member(n)))
			.map(|n| n.id)
			.collect();
		if stale.is_empty() {
			return Ok(());
		}

		let _held = self.lock_nodes(stale.iter().copied()).await;
		let mut batch = Vec::with_capacity(stale.len());
		for id in &stale {
			let mut node = self.get_node(id).await?;
			node.is_egress_gateway = egresses.iter().any(|e| e.status && e.has_member(&node));
			batch.push(node);
		}
		self.save_nodes(ctx, batch).await
	}
}
