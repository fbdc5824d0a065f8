// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Just-in-time access: users request time-bounded access to a network,
//! admins approve or deny, and a sweeper tears access down when the
//! window closes.

pub mod access;
pub mod error;
pub mod notify;
mod service;

pub use error::{JitError, Result};
pub use notify::Notifier;
pub use service::{
	rounded_hours, Approval, JitAccess, JitService, NetworkJitStatus, RequestView, SweepReport, UserJitStatus,
};

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;
	use std::sync::Arc;
	use std::time::Duration as StdDuration;

	use chrono::{Duration, Utc};
	use netweave_common_core::{ExtClient, JitStatus, NetworkId, Node, PlatformRole, RoleId, User};
	use netweave_server_publish::{Fanout, MemoryBroker, Publisher, PublisherOptions, ServerKeys, Topic};
	use netweave_server_smtp::{Mailer, MemoryMailer};
	use netweave_server_store::testing::{ingress_in, seeded_store};
	use netweave_server_store::{Ctx, EntityStore};
	use proptest::prelude::*;

	use super::*;

	struct World {
		jit: JitService,
		store: Arc<EntityStore>,
		fanout: Arc<Fanout>,
		broker: Arc<MemoryBroker>,
		mailer: Arc<MemoryMailer>,
		net: NetworkId,
		ingress: Node,
	}

	async fn world() -> World {
		let (store, net) = seeded_store().await;
		let ctx = Ctx::startup();
		let ingress = ingress_in(&store, &net, "gw", "10.0.0.1").await;
		let mut host = store.get_host(&ingress.host_id).await.unwrap();
		host.traffic_key_public = Some(ServerKeys::generate().public_base64());
		store.upsert_host(&ctx, host).await.unwrap();

		let mut admin = User::new("admin", PlatformRole::Admin);
		admin.email = Some("admin@example.com".into());
		let mut user = User::new("u", PlatformRole::PlatformUser);
		user.email = Some("u@example.com".into());
		store.create_user(&ctx, admin).await.unwrap();
		store.create_user(&ctx, user).await.unwrap();

		let store = Arc::new(store);
		let broker = Arc::new(MemoryBroker::new());
		let options = PublisherOptions {
			base_backoff: StdDuration::from_millis(1),
			..PublisherOptions::default()
		};
		let publisher = Arc::new(Publisher::new(broker.clone(), ServerKeys::generate(), options));
		let fanout = Arc::new(Fanout::new(store.clone(), publisher, "0.1.0"));
		let mailer = Arc::new(MemoryMailer::new());
		let jit = JitService::new(store.clone(), fanout.clone(), Notifier::new(Some(mailer.clone() as Arc<dyn Mailer>)));
		World {
			jit,
			store,
			fanout,
			broker,
			mailer,
			net,
			ingress,
		}
	}

	async fn client_for(w: &World, owner: &str, id: &str, addr: &str) {
		let mut client = ExtClient::new(id, w.net.clone(), w.ingress.id, format!("pk-{id}"));
		client.owner = Some(owner.to_string());
		client.address = Some(addr.parse().unwrap());
		w.store.create_ext_client(&Ctx::startup(), client).await.unwrap();
	}

	#[tokio::test]
	async fn request_approve_expire_lifecycle() {
		let w = world().await;
		let ctx = Ctx::api("admin");
		let now = Utc::now();
		w.jit.enable(&ctx, &w.net).await.unwrap();

		let request = w.jit.create_request(&Ctx::api("u"), &w.net, "u", "debugging", now).await.unwrap();
		assert_eq!(w.mailer.sent().len(), 1, "admin notified");
		assert_eq!(w.mailer.sent()[0].to, "admin@example.com");

		let err = w.jit.create_request(&Ctx::api("u"), &w.net, "u", "again", now).await.unwrap_err();
		assert!(matches!(err, JitError::PendingRequest { .. }));

		let (grant, approved) = w
			.jit
			.approve(&ctx, &request.id, Approval::Until(now + Duration::hours(1)), "admin", now)
			.await
			.unwrap();
		assert_eq!(approved.status, JitStatus::Approved);
		assert_eq!(approved.duration_hours, 1);
		assert_eq!(grant.expires_at, now + Duration::hours(1));
		assert!(matches!(w.jit.check_access(&w.net, "u", now).await.unwrap(), JitAccess::Granted(_)));

		let err = w.jit.create_request(&Ctx::api("u"), &w.net, "u", "more", now).await.unwrap_err();
		assert!(matches!(err, JitError::ActiveGrant { .. }));

		client_for(&w, "u", "laptop", "10.0.0.20").await;
		w.broker.take();

		let later = now + Duration::hours(1) + Duration::seconds(1);
		let report = w.jit.sweep_expired(&Ctx::scheduler(), later).await;
		assert_eq!(report.grants_expired, 1);
		assert_eq!(report.clients_removed, 1);
		assert!(w.store.list_ext_clients(&w.net).await.is_empty());
		assert!(w.store.list_grants(&w.net).await.is_empty());
		assert_eq!(w.store.get_request(&request.id).await.unwrap().status, JitStatus::Expired);

		w.fanout.publisher().flush().await;
		let peers_gw = Topic::Peers {
			network: w.net.clone(),
			node: w.ingress.id,
		};
		assert_eq!(w.broker.delivered_to(&peers_gw).len(), 1);
		assert!(w.mailer.sent().iter().any(|m| m.subject == "JIT Access Expired: n1"));

		assert_eq!(w.jit.check_access(&w.net, "u", later).await.unwrap(), JitAccess::Denied);
		assert_eq!(w.jit.check_access(&w.net, "admin", later).await.unwrap(), JitAccess::Admin);
	}

	#[tokio::test]
	async fn requests_need_jit_enabled() {
		let w = world().await;
		let err = w
			.jit
			.create_request(&Ctx::api("u"), &w.net, "u", "", Utc::now())
			.await
			.unwrap_err();
		assert!(matches!(err, JitError::NotEnabled(_)));
		assert_eq!(
			w.jit.check_access(&w.net, "u", Utc::now()).await.unwrap(),
			JitAccess::NotRequired
		);
	}

	#[tokio::test]
	async fn approval_windows() {
		let w = world().await;
		let ctx = Ctx::api("admin");
		let now = Utc::now();
		w.jit.enable(&ctx, &w.net).await.unwrap();

		let request = w.jit.create_request(&ctx, &w.net, "u", "", now).await.unwrap();
		let err = w
			.jit
			.approve(&ctx, &request.id, Approval::Until(now - Duration::minutes(1)), "admin", now)
			.await
			.unwrap_err();
		assert!(matches!(err, JitError::InvalidExpiry));

		let (grant, approved) = w
			.jit
			.approve(&ctx, &request.id, Approval::Hours(0), "admin", now)
			.await
			.unwrap();
		assert_eq!(approved.duration_hours, 1);
		assert_eq!(grant.expires_at - grant.granted_at, Duration::hours(1));

		let err = w
			.jit
			.deny(&ctx, &request.id, "admin", now)
			.await
			.unwrap_err();
		assert!(matches!(err, JitError::NotPending { status: JitStatus::Approved, .. }));
	}

	#[tokio::test]
	async fn deny_and_status() {
		let w = world().await;
		let ctx = Ctx::api("admin");
		let now = Utc::now();
		w.jit.enable(&ctx, &w.net).await.unwrap();

		let request = w.jit.create_request(&ctx, &w.net, "u", "", now).await.unwrap();
		let status = w.jit.user_status(&w.net, "u", now).await.unwrap();
		assert!(!status.has_access);
		assert_eq!(status.pending_request.map(|r| r.id), Some(request.id));

		let denied = w.jit.deny(&ctx, &request.id, "admin", now).await.unwrap();
		assert_eq!(denied.status, JitStatus::Denied);
		assert_eq!(denied.approved_by.as_deref(), Some("admin"));
		assert!(w.jit.user_status(&w.net, "u", now).await.unwrap().pending_request.is_none());
	}

	#[tokio::test]
	async fn toggling_drops_network_clients() {
		let w = world().await;
		let ctx = Ctx::api("admin");
		client_for(&w, "u", "phone", "10.0.0.30").await;
		client_for(&w, "admin", "tablet", "10.0.0.31").await;

		assert_eq!(w.jit.enable(&ctx, &w.net).await.unwrap(), 2);
		assert!(w.store.get_network(&w.net).await.unwrap().jit_enabled);

		client_for(&w, "admin", "tablet", "10.0.0.31").await;
		assert_eq!(w.jit.disable(&ctx, &w.net).await.unwrap(), 1);
		assert!(!w.store.get_network(&w.net).await.unwrap().jit_enabled);
		assert!(w.store.list_ext_clients(&w.net).await.is_empty());
	}

	#[tokio::test]
	async fn revoke_and_expired_listing() {
		let w = world().await;
		let ctx = Ctx::api("admin");
		let now = Utc::now();
		w.jit.enable(&ctx, &w.net).await.unwrap();
		let request = w.jit.create_request(&ctx, &w.net, "u", "", now).await.unwrap();
		let (grant, _) = w
			.jit
			.approve(&ctx, &request.id, Approval::Hours(2), "admin", now)
			.await
			.unwrap();

		let views = w.jit.list_requests(&w.net, Some(JitStatus::Expired), now + Duration::hours(3)).await;
		assert_eq!(views.len(), 1, "approved but past its window");
		assert_eq!(views[0].grant_id, Some(grant.id));
		assert!(w.jit.list_requests(&w.net, Some(JitStatus::Expired), now).await.is_empty());

		w.jit.revoke(&ctx, &grant.id).await.unwrap();
		assert!(w.store.list_grants(&w.net).await.is_empty());
		assert!(w.mailer.sent().iter().any(|m| m.subject == "JIT Access Revoked: n1"));
		assert!(matches!(
			w.jit.ensure_access(&w.net, "u", now).await.unwrap_err(),
			JitError::AccessDenied { .. }
		));
	}

	#[tokio::test]
	async fn mail_failures_do_not_fail_requests() {
		let w = world().await;
		let ctx = Ctx::api("admin");
		w.mailer.fail_all(true);
		w.jit.enable(&ctx, &w.net).await.unwrap();
		assert!(w.jit.create_request(&ctx, &w.net, "u", "", Utc::now()).await.is_ok());
		assert!(w.mailer.sent().is_empty());
	}

	#[tokio::test]
	async fn networks_status_lists_member_networks() {
		let w = world().await;
		let ctx = Ctx::api("admin");
		let now = Utc::now();
		assert!(w.jit.user_networks_status("u", now).await.unwrap().is_empty(), "no role, no networks");

		let mut u = w.store.get_user("u").await.unwrap();
		u.network_roles
			.insert(w.net.to_string(), BTreeSet::from([RoleId::network_user(&w.net)]));
		w.store.update_user(&ctx, u).await.unwrap();

		let open = w.jit.user_networks_status("u", now).await.unwrap();
		assert_eq!(open.len(), 1);
		assert_eq!(open[0].network, w.net);
		assert!(!open[0].jit_enabled);
		assert!(open[0].status.has_access);

		w.jit.enable(&ctx, &w.net).await.unwrap();
		let request = w.jit.create_request(&Ctx::api("u"), &w.net, "u", "", now).await.unwrap();
		let gated = w.jit.user_networks_status("u", now).await.unwrap().remove(0);
		assert!(gated.jit_enabled);
		assert!(!gated.status.has_access);
		assert_eq!(gated.status.pending_request.map(|r| r.id), Some(request.id));

		let (grant, _) = w
			.jit
			.approve(&ctx, &request.id, Approval::Hours(1), "admin", now)
			.await
			.unwrap();
		let granted = w.jit.user_networks_status("u", now).await.unwrap().remove(0);
		assert!(granted.status.has_access);
		assert_eq!(granted.status.grant.map(|g| g.id), Some(grant.id));
		assert!(granted.status.pending_request.is_none());

		let admin = w.jit.user_networks_status("admin", now).await.unwrap();
		assert_eq!(admin.len(), 1);
		assert!(!admin[0].jit_enabled, "admins bypass jit");
		assert!(admin[0].status.has_access);

		assert!(w.jit.user_networks_status("ghost", now).await.is_err());
	}

	fn runtime() -> tokio::runtime::Runtime {
		tokio::runtime::Builder::new_multi_thread()
			.worker_threads(4)
			.enable_all()
			.build()
			.unwrap()
	}

	/// Races `requesters` submissions from one user, then `approvers`
	/// approvals of whichever request won. Returns requests created,
	/// approvals that succeeded, pending requests left and active grants.
	async fn race(requesters: usize, approvers: usize) -> (usize, usize, usize, usize) {
		let w = Arc::new(world().await);
		let now = Utc::now();
		w.jit.enable(&Ctx::api("admin"), &w.net).await.unwrap();

		let mut tasks = tokio::task::JoinSet::new();
		for i in 0..requesters {
			let w = Arc::clone(&w);
			tasks.spawn(async move {
				w.jit
					.create_request(&Ctx::api("u"), &w.net, "u", &format!("attempt {i}"), now)
					.await
			});
		}
		let mut created = Vec::new();
		while let Some(joined) = tasks.join_next().await {
			match joined.unwrap() {
				Ok(request) => created.push(request),
				Err(e) => assert!(matches!(e, JitError::PendingRequest { .. }), "{e}"),
			}
		}
		let pending = w.store.list_requests(&w.net, Some(JitStatus::Pending)).await.len();

		let mut approved = 0;
		if let [request] = created.as_slice() {
			let mut tasks = tokio::task::JoinSet::new();
			for _ in 0..approvers {
				let (w, id) = (Arc::clone(&w), request.id);
				tasks.spawn(async move {
					w.jit
						.approve(&Ctx::api("admin"), &id, Approval::Hours(1), "admin", now)
						.await
				});
			}
			while let Some(joined) = tasks.join_next().await {
				match joined.unwrap() {
					Ok(_) => approved += 1,
					Err(e) => assert!(matches!(e, JitError::NotPending { .. }), "{e}"),
				}
			}
		}

		let active = w
			.store
			.grants_for(&w.net, "u")
			.await
			.into_iter()
			.filter(|g| g.is_active_at(now))
			.count();
		(created.len(), approved, pending, active)
	}

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(16))]

		#[test]
		fn concurrent_requests_and_approvals_settle_on_one_grant(requesters in 2usize..8, approvers in 2usize..6) {
			let (created, approved, pending, active) = runtime().block_on(race(requesters, approvers));
			prop_assert_eq!(created, 1);
			prop_assert_eq!(pending, 1);
			prop_assert_eq!(approved, 1);
			prop_assert_eq!(active, 1);
		}
	}

	proptest! {
		#[test]
		fn rounded_hours_is_at_least_one_and_rounds(secs in 0i64..(90 * 24 * 3600)) {
			let now = Utc::now();
			let h = rounded_hours(now, now + Duration::seconds(secs));
			prop_assert!(h >= 1);
			let exact = secs as f64 / 3600.0;
			prop_assert!((h as f64 - exact).abs() <= 0.5 || (exact < 0.5 && h == 1));
		}
	}
}
