// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::Utc;
use netweave_common_core::posture::{clean_version, ANY};
use netweave_common_core::{
	EventAction, ExtClient, HostOs, NetworkId, NodeId, PostureAttribute, PostureCheck, PostureCheckId,
	PostureReport, PostureState, PostureSubject, TagId, UserGroupId,
};
use tracing::{info, instrument};

use crate::context::Ctx;
use crate::error::{StoreError, StoreResult};
use crate::store::EntityStore;

impl EntityStore {
	pub async fn get_posture_check(&self, id: &PostureCheckId) -> StoreResult<PostureCheck> {
		self.require::<PostureCheck>(&id.to_string()).await
	}

	pub async fn find_posture_check(&self, id: &PostureCheckId) -> Option<PostureCheck> {
		self.read::<PostureCheck>(&id.to_string()).await.ok().flatten()
	}

	pub async fn list_posture_checks(&self, network: &NetworkId) -> Vec<PostureCheck> {
		self.all_in::<PostureCheck>(network).await
	}

	#[instrument(skip(self, ctx, check), fields(check = %check.id, network = %check.network))]
	pub async fn create_posture_check(&self, ctx: &Ctx, mut check: PostureCheck) -> StoreResult<PostureCheck> {
		self.check_posture(&mut check).await?;
		if check.created_by.is_empty() {
			check.created_by = ctx.actor.clone();
		}
		self.create(&check).await?;
		self.emit(ctx, EventAction::Create, None, Some(&check)).await;
		info!(attribute = %check.attribute, "posture check created");
		Ok(check)
	}

	#[instrument(skip(self, ctx, check), fields(check = %check.id))]
	pub async fn update_posture_check(&self, ctx: &Ctx, mut check: PostureCheck) -> StoreResult<PostureCheck> {
		let old = self.get_posture_check(&check.id).await?;
		if old.network != check.network {
			return Err(StoreError::Conflict(format!("posture check {} cannot move networks", check.id)));
		}
		self.check_posture(&mut check).await?;
		check.created_by = old.created_by.clone();
		check.created_at = old.created_at;
		check.updated_at = Utc::now();
		self.write(&check).await?;
		self.emit(ctx, EventAction::Update, Some(&old), Some(&check)).await;
		Ok(check)
	}

	pub async fn set_posture_check_enabled(
		&self,
		ctx: &Ctx,
		id: &PostureCheckId,
		enabled: bool,
	) -> StoreResult<PostureCheck> {
		let mut check = self.get_posture_check(id).await?;
		check.enabled = enabled;
		self.update_posture_check(ctx, check).await
	}

	#[instrument(skip(self, ctx))]
	pub async fn delete_posture_check(&self, ctx: &Ctx, id: &PostureCheckId) -> StoreResult<PostureCheck> {
		let check = self.remove::<PostureCheck>(&id.to_string()).await?;
		self.emit(ctx, EventAction::Delete, Some(&check), None).await;
		Ok(check)
	}

	/// Store the latest evaluation on a node. Returns whether the outcome
	/// differs from the previous one.
	pub async fn record_node_posture(&self, id: &NodeId, state: PostureState) -> StoreResult<bool> {
		let _held = self.lock_nodes([*id]).await;
		let mut node = self.get_node(id).await?;
		let changed = !node.posture.same_outcome(&state);
		node.posture = state;
		self.write(&node).await?;
		Ok(changed)
	}

	/// Store the latest evaluation on an ext-client.
	pub async fn record_ext_client_posture(&self, client_id: &str, state: PostureState) -> StoreResult<bool> {
		let ingress = self.get_ext_client(client_id).await?.ingress_id;
		let _held = self.lock_nodes([ingress]).await;
		let mut client = self.get_ext_client(client_id).await?;
		let changed = !client.posture.same_outcome(&state);
		client.posture = state;
		self.write(&client).await?;
		Ok(changed)
	}

	/// Every node and ext-client of `network` whose last evaluation found
	/// violations, worst first.
	pub async fn posture_violations(&self, network: &NetworkId) -> Vec<PostureReport> {
		let mut out = Vec::new();
		for node in self.list_nodes(network).await {
			if node.posture.is_compliant() {
				continue;
			}
			let name = match self.get_host(&node.host_id).await {
				Ok(host) => host.name,
				Err(_) => node.id.to_string(),
			};
			out.push(PostureReport {
				subject: PostureSubject::Node(node.id),
				name,
				state: node.posture,
			});
		}
		for client in self.all_in::<ExtClient>(network).await {
			if client.posture.is_compliant() {
				continue;
			}
			out.push(PostureReport {
				subject: PostureSubject::ExtClient(client.client_id.clone()),
				name: client.client_id,
				state: client.posture,
			});
		}
		out.sort_by(|a, b| b.state.severity.cmp(&a.state.severity).then_with(|| a.subject.cmp(&b.subject)));
		out
	}

	/// Validate a check and bring its values to canonical form.
	async fn check_posture(&self, check: &mut PostureCheck) -> StoreResult<()> {
		if check.name.trim().is_empty() {
			return Err(StoreError::Invalid("posture check name cannot be empty".to_string()));
		}
		self.get_network(&check.network).await?;
		normalize_values(check)?;
		for tag in check.tags.iter().filter(|t| t.as_str() != ANY) {
			self.get_tag(&TagId::from(tag.as_str())).await?;
		}
		for group in check.user_groups.iter().filter(|g| g.as_str() != ANY) {
			self.get_group(&UserGroupId::from(group.as_str())).await?;
		}
		Ok(())
	}
}

/// Lower-case values, upper-case country codes and reduce version
/// attributes to exactly one cleaned minimum version.
pub fn normalize_values(check: &mut PostureCheck) -> StoreResult<()> {
	let invalid = |msg: String| Err(StoreError::Invalid(msg));
	if check.values.is_empty() {
		return invalid(format!("posture check {} needs at least one value", check.name));
	}
	for value in &mut check.values {
		*value = value.trim().to_lowercase();
	}

	match check.attribute {
		PostureAttribute::ClientLocation => {
			for value in &mut check.values {
				if value.len() != 2 || !value.chars().all(|c| c.is_ascii_alphabetic()) {
					return invalid(format!("'{value}' is not a two-letter country code"));
				}
				*value = value.to_uppercase();
			}
		}
		PostureAttribute::Os => {
			for value in &mut check.values {
				match value.parse::<HostOs>() {
					Ok(os) => *value = os.as_str().to_string(),
					Err(e) => return invalid(e),
				}
			}
		}
		PostureAttribute::AutoUpdate => {
			if check.values.len() != 1 || !matches!(check.values[0].as_str(), "true" | "false") {
				return invalid("auto_update takes a single true or false".to_string());
			}
		}
		PostureAttribute::OsFamily => {}
		PostureAttribute::OsVersion | PostureAttribute::KernelVersion | PostureAttribute::ClientVersion => {
			if check.values.len() != 1 {
				return invalid(format!("{} takes exactly one minimum version", check.attribute));
			}
			let cleaned = clean_version(&check.values[0]).to_string();
			let valid = !cleaned.is_empty()
				&& cleaned
					.split('.')
					.all(|part| part.chars().next().is_some_and(|c| c.is_ascii_digit()));
			if !valid {
				return invalid(format!("'{}' is not a version", check.values[0]));
			}
			check.values[0] = cleaned;
		}
	}
	Ok(())
}
