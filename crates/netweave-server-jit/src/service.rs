// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use netweave_common_core::{
	Event, EventAction, ExtClient, JitGrant, JitGrantId, JitRequest, JitRequestId, JitStatus, NetworkId,
	SubjectKind,
};
use netweave_server_publish::Fanout;
use netweave_server_store::{Ctx, EntityStore, StoreError};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::access::{is_member, is_network_admin, network_admins};
use crate::error::{JitError, Result};
use crate::notify::Notifier;

/// How long an approval lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
	Until(DateTime<Utc>),
	/// Clamped to at least one hour.
	Hours(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum JitAccess {
	/// JIT is off for the network.
	NotRequired,
	Admin,
	Granted(JitGrant),
	Denied,
}

impl JitAccess {
	pub fn is_allowed(&self) -> bool {
		!matches!(self, JitAccess::Denied)
	}

	pub fn grant(&self) -> Option<&JitGrant> {
		match self {
			JitAccess::Granted(g) => Some(g),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserJitStatus {
	pub has_access: bool,
	pub grant: Option<JitGrant>,
	pub pending_request: Option<JitRequest>,
}

/// A user's JIT standing on one network they belong to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkJitStatus {
	pub network: NetworkId,
	/// False for admins, who bypass JIT.
	pub jit_enabled: bool,
	#[serde(flatten)]
	pub status: UserJitStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestView {
	#[serde(flatten)]
	pub request: JitRequest,
	pub grant_id: Option<JitGrantId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
	pub grants_expired: usize,
	pub clients_removed: usize,
	pub failed: usize,
}

/// Requests, approvals and denials for one user on one network run one at a
/// time under this key.
fn request_lock(network: &NetworkId, user: &str) -> String {
	format!("jit-request/{network}/{user}")
}

/// Whole hours between `now` and `until`, rounded, at least one.
pub fn rounded_hours(now: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
	let secs = (until - now).num_seconds().max(0);
	((secs + 1800) / 3600).max(1)
}

pub struct JitService {
	store: Arc<EntityStore>,
	fanout: Arc<Fanout>,
	notifier: Notifier,
}

impl JitService {
	pub fn new(store: Arc<EntityStore>, fanout: Arc<Fanout>, notifier: Notifier) -> Self {
		Self {
			store,
			fanout,
			notifier,
		}
	}

	#[instrument(skip(self, ctx), fields(network = %network))]
	pub async fn enable(&self, ctx: &Ctx, network: &NetworkId) -> Result<usize> {
		self.set_enabled(ctx, network, true).await
	}

	#[instrument(skip(self, ctx), fields(network = %network))]
	pub async fn disable(&self, ctx: &Ctx, network: &NetworkId) -> Result<usize> {
		self.set_enabled(ctx, network, false).await
	}

	/// Flip the flag and drop every ext-client of the network, so access
	/// starts from a clean slate either way. Returns the clients removed.
	async fn set_enabled(&self, ctx: &Ctx, network: &NetworkId, enabled: bool) -> Result<usize> {
		let mut net = self.store.get_network(network).await?;
		if net.jit_enabled != enabled {
			net.jit_enabled = enabled;
			self.store.update_network(ctx, net).await?;
		}
		let action = if enabled {
			EventAction::EnableJit
		} else {
			EventAction::DisableJit
		};
		let event = Event::builder(action, SubjectKind::Network, network.as_str())
			.actor(ctx.actor.clone())
			.origin(ctx.origin)
			.name(network.as_str())
			.network(network)
			.build();
		self.store.events().emit(event).await;

		let target = network.clone();
		let removed = self
			.store
			.delete_ext_clients_where(ctx, move |c| c.network == target)
			.await?;
		self.republish(network, &removed).await;
		info!(enabled, clients_removed = removed.len(), "jit toggled");
		Ok(removed.len())
	}

	#[instrument(skip(self, ctx, reason), fields(network = %network, user = %user))]
	pub async fn create_request(
		&self,
		ctx: &Ctx,
		network: &NetworkId,
		user: &str,
		reason: &str,
		now: DateTime<Utc>,
	) -> Result<JitRequest> {
		let net = self.store.get_network(network).await?;
		if !net.jit_enabled {
			return Err(JitError::NotEnabled(network.clone()));
		}

		let _held = self.store.lock_key(request_lock(network, user)).await;
		if self.active_grant(network, user, now).await.is_some() {
			return Err(JitError::ActiveGrant {
				network: network.clone(),
				user: user.to_string(),
			});
		}
		if self.pending_request(network, user).await.is_some() {
			return Err(JitError::PendingRequest {
				network: network.clone(),
				user: user.to_string(),
			});
		}

		let mut request = JitRequest::new(network.clone(), user, reason);
		request.requested_at = now;
		self.store
			.save_request(ctx, EventAction::JitRequest, &request)
			.await?;
		info!(request_id = %request.id, "jit request created");

		let admins = network_admins(&self.store, network).await;
		self.notifier.request_submitted(&request, &admins).await;
		Ok(request)
	}

	/// Approve a pending request. Any active grant the user holds on the
	/// network is replaced by the new one.
	#[instrument(skip(self, ctx), fields(request_id = %id, approver = %approver))]
	pub async fn approve(
		&self,
		ctx: &Ctx,
		id: &JitRequestId,
		approval: Approval,
		approver: &str,
		now: DateTime<Utc>,
	) -> Result<(JitGrant, JitRequest)> {
		let target = self.store.get_request(id).await?;
		let _held = self.store.lock_key(request_lock(&target.network, &target.user)).await;
		let mut request = self.pending(id).await?;
		let (expires_at, hours) = match approval {
			Approval::Until(t) if t <= now => return Err(JitError::InvalidExpiry),
			Approval::Until(t) => (t, rounded_hours(now, t)),
			Approval::Hours(h) => {
				let h = h.max(1);
				(now + Duration::hours(h), h)
			}
		};

		for old in self.store.grants_for(&request.network, &request.user).await {
			if old.is_active_at(now) {
				self.store.delete_grant(ctx, &old.id).await?;
			}
		}

		let grant = JitGrant {
			id: JitGrantId::new(),
			network: request.network.clone(),
			user: request.user.clone(),
			request_id: request.id,
			granted_at: now,
			expires_at,
		};
		self.store.save_grant(ctx, &grant, now).await?;

		request.status = JitStatus::Approved;
		request.approved_by = Some(approver.to_string());
		request.approved_at = Some(now);
		request.duration_hours = hours;
		request.expires_at = Some(expires_at);
		self.store
			.save_request(ctx, EventAction::JitApprove, &request)
			.await?;
		info!(grant_id = %grant.id, hours, "jit request approved");

		let user = self.store.find_user(&request.user).await.ok().flatten();
		self.notifier.approved(user.as_ref(), &grant, &request).await;
		Ok((grant, request))
	}

	#[instrument(skip(self, ctx), fields(request_id = %id, approver = %approver))]
	pub async fn deny(&self, ctx: &Ctx, id: &JitRequestId, approver: &str, now: DateTime<Utc>) -> Result<JitRequest> {
		let target = self.store.get_request(id).await?;
		let _held = self.store.lock_key(request_lock(&target.network, &target.user)).await;
		let mut request = self.pending(id).await?;
		request.status = JitStatus::Denied;
		request.approved_by = Some(approver.to_string());
		request.approved_at = Some(now);
		self.store
			.save_request(ctx, EventAction::JitDeny, &request)
			.await?;
		Ok(request)
	}

	/// End an active grant before its expiry.
	#[instrument(skip(self, ctx), fields(grant_id = %id))]
	pub async fn revoke(&self, ctx: &Ctx, id: &JitGrantId) -> Result<JitGrant> {
		let grant = self
			.store
			.all_grants()
			.await
			.into_iter()
			.find(|g| g.id == *id)
			.ok_or_else(|| StoreError::NotFound(format!("jit grant {id}")))?;
		self.end_grant(ctx, &grant).await?;
		let user = self.store.find_user(&grant.user).await.ok().flatten();
		self.notifier.ended(user.as_ref(), &grant, true).await;
		Ok(grant)
	}

	/// Expire every grant whose window closed at or before `now`.
	#[instrument(skip(self, ctx))]
	pub async fn sweep_expired(&self, ctx: &Ctx, now: DateTime<Utc>) -> SweepReport {
		let mut report = SweepReport::default();
		for grant in self.store.all_grants().await {
			if grant.is_active_at(now) {
				continue;
			}
			match self.end_grant(ctx, &grant).await {
				Ok(removed) => {
					report.grants_expired += 1;
					report.clients_removed += removed;
					let user = self.store.find_user(&grant.user).await.ok().flatten();
					self.notifier.ended(user.as_ref(), &grant, false).await;
				}
				Err(e) => {
					warn!(grant_id = %grant.id, error = %e, "failed to expire grant");
					report.failed += 1;
				}
			}
		}
		if report.grants_expired > 0 || report.failed > 0 {
			info!(?report, "jit sweep done");
		}
		report
	}

	/// Mark the request expired, drop the user's clients on the network and
	/// delete the grant. Returns how many clients went.
	async fn end_grant(&self, ctx: &Ctx, grant: &JitGrant) -> Result<usize> {
		match self.store.get_request(&grant.request_id).await {
			Ok(mut request) if request.status == JitStatus::Approved => {
				request.status = JitStatus::Expired;
				self.store
					.save_request(ctx, EventAction::JitExpire, &request)
					.await?;
			}
			Ok(_) => {}
			Err(e) => warn!(request_id = %grant.request_id, error = %e, "grant has no request"),
		}

		let (network, user) = (grant.network.clone(), grant.user.clone());
		let removed = self
			.store
			.delete_ext_clients_where(ctx, move |c| {
				c.network == network && c.owner.as_deref() == Some(user.as_str())
			})
			.await?;
		self.republish(&grant.network, &removed).await;
		self.store.delete_grant(ctx, &grant.id).await?;
		Ok(removed.len())
	}

	async fn republish(&self, network: &NetworkId, removed: &[ExtClient]) {
		if removed.is_empty() {
			return;
		}
		if let Err(e) = self.fanout.network(network).await {
			warn!(network = %network, error = %e, "peer fan-out after client removal failed");
		}
	}

	/// Admins bypass; otherwise JIT-enabled networks need an active grant.
	pub async fn check_access(&self, network: &NetworkId, user: &str, now: DateTime<Utc>) -> Result<JitAccess> {
		if let Some(u) = self.store.find_user(user).await? {
			if is_network_admin(&self.store, &u, network).await {
				return Ok(JitAccess::Admin);
			}
		}
		let net = self.store.get_network(network).await?;
		if !net.jit_enabled {
			return Ok(JitAccess::NotRequired);
		}
		Ok(match self.active_grant(network, user, now).await {
			Some(g) => JitAccess::Granted(g),
			None => JitAccess::Denied,
		})
	}

	/// [`check_access`](Self::check_access) as a guard.
	pub async fn ensure_access(&self, network: &NetworkId, user: &str, now: DateTime<Utc>) -> Result<JitAccess> {
		let access = self.check_access(network, user, now).await?;
		if !access.is_allowed() {
			return Err(JitError::AccessDenied {
				network: network.clone(),
				user: user.to_string(),
			});
		}
		Ok(access)
	}

	pub async fn user_status(&self, network: &NetworkId, user: &str, now: DateTime<Utc>) -> Result<UserJitStatus> {
		let access = self.check_access(network, user, now).await?;
		Ok(UserJitStatus {
			has_access: access.is_allowed(),
			grant: access.grant().cloned(),
			pending_request: self.pending_request(network, user).await,
		})
	}

	/// JIT standing of `user` on every network they hold a role in. Admins
	/// see JIT as off with access, as do members of networks without JIT.
	pub async fn user_networks_status(&self, user: &str, now: DateTime<Utc>) -> Result<Vec<NetworkJitStatus>> {
		let user = self.store.get_user(user).await?;
		let mut out = Vec::new();
		for network in self.store.list_networks().await {
			if !is_member(&self.store, &user, &network.id).await {
				continue;
			}
			let jit_enabled = network.jit_enabled && !is_network_admin(&self.store, &user, &network.id).await;
			let status = if jit_enabled {
				let grant = self.active_grant(&network.id, &user.username, now).await;
				UserJitStatus {
					has_access: grant.is_some(),
					grant,
					pending_request: self.pending_request(&network.id, &user.username).await,
				}
			} else {
				UserJitStatus {
					has_access: true,
					grant: None,
					pending_request: None,
				}
			};
			out.push(NetworkJitStatus {
				network: network.id,
				jit_enabled,
				status,
			});
		}
		Ok(out)
	}

	/// Requests newest first. `Expired` also matches approved requests whose
	/// window has passed but that the sweeper has not reached yet.
	pub async fn list_requests(
		&self,
		network: &NetworkId,
		status: Option<JitStatus>,
		now: DateTime<Utc>,
	) -> Vec<RequestView> {
		let requests = match status {
			Some(JitStatus::Expired) => self
				.store
				.list_requests(network, None)
				.await
				.into_iter()
				.filter(|r| {
					r.status == JitStatus::Expired
						|| (r.status == JitStatus::Approved && r.expires_at.map_or(false, |t| t <= now))
				})
				.collect(),
			other => self.store.list_requests(network, other).await,
		};
		let grants = self.store.list_grants(network).await;
		requests
			.into_iter()
			.map(|request| {
				let grant_id = grants.iter().find(|g| g.request_id == request.id).map(|g| g.id);
				RequestView { request, grant_id }
			})
			.collect()
	}

	pub async fn network_admins(&self, network: &NetworkId) -> Vec<netweave_common_core::User> {
		network_admins(&self.store, network).await
	}

	async fn pending(&self, id: &JitRequestId) -> Result<JitRequest> {
		let request = self.store.get_request(id).await?;
		if request.status != JitStatus::Pending {
			return Err(JitError::NotPending {
				id: *id,
				status: request.status,
			});
		}
		Ok(request)
	}

	async fn active_grant(&self, network: &NetworkId, user: &str, now: DateTime<Utc>) -> Option<JitGrant> {
		self.store
			.grants_for(network, user)
			.await
			.into_iter()
			.find(|g| g.is_active_at(now))
	}

	async fn pending_request(&self, network: &NetworkId, user: &str) -> Option<JitRequest> {
		self.store
			.list_requests(network, Some(JitStatus::Pending))
			.await
			.into_iter()
			.find(|r| r.user == user)
	}
}
