// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persistence for just-in-time access requests and grants. The
//! workflow itself lives with the JIT service.

use chrono::{DateTime, Utc};
use netweave_common_core::{
	EventAction, JitGrant, JitGrantId, JitRequest, JitRequestId, JitStatus, NetworkId,
};
use tracing::instrument;

use crate::context::Ctx;
use crate::error::StoreResult;
use crate::store::EntityStore;
use crate::validate::validate_grant;

impl EntityStore {
	pub async fn get_request(&self, id: &JitRequestId) -> StoreResult<JitRequest> {
		self.require::<JitRequest>(&id.to_string()).await
	}

	/// Requests of a network, newest first, optionally filtered by status.
	pub async fn list_requests(&self, network: &NetworkId, status: Option<JitStatus>) -> Vec<JitRequest> {
		let mut out: Vec<JitRequest> = self
			.all_in::<JitRequest>(network)
			.await
			.into_iter()
			.filter(|r| status.map_or(true, |s| r.status == s))
			.collect();
		out.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
		out
	}

	/// Insert or replace a request; `action` names the workflow step.
	pub async fn save_request(&self, ctx: &Ctx, action: EventAction, request: &JitRequest) -> StoreResult<()> {
		let old = self.read::<JitRequest>(&request.id.to_string()).await?;
		self.write(request).await?;
		self.emit(ctx, action, old.as_ref(), Some(request)).await;
		Ok(())
	}

	pub async fn list_grants(&self, network: &NetworkId) -> Vec<JitGrant> {
		self.all_in::<JitGrant>(network).await
	}

	pub async fn all_grants(&self) -> Vec<JitGrant> {
		self.all::<JitGrant>().await
	}

	pub async fn grants_for(&self, network: &NetworkId, user: &str) -> Vec<JitGrant> {
		self.caches
			.jit_grants
			.filter(|g| &g.network == network && g.user == user)
			.await
	}

	/// Persist a grant. At most one active grant per user and network.
	#[instrument(skip(self, ctx, grant), fields(network = %grant.network, user = %grant.user))]
	pub async fn save_grant(&self, ctx: &Ctx, grant: &JitGrant, now: DateTime<Utc>) -> StoreResult<()> {
		let _held = self
			.lock_key(format!("jit/{}/{}", grant.network, grant.user))
			.await;
		let existing = self.grants_for(&grant.network, &grant.user).await;
		validate_grant(grant, &existing, now)?;
		self.write(grant).await?;
		self.emit(ctx, EventAction::Create, None, Some(grant)).await;
		Ok(())
	}

	pub async fn delete_grant(&self, ctx: &Ctx, id: &JitGrantId) -> StoreResult<JitGrant> {
		let grant = self.remove::<JitGrant>(&id.to_string()).await?;
		self.emit(ctx, EventAction::Delete, Some(&grant), None).await;
		Ok(grant)
	}
}
