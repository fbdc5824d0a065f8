// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background jobs registered by [`crate::Core::scheduler`].

mod event_retention;
mod flow_cleanup;
mod jit_expiry;
mod job_history_cleanup;
mod license_refresh;
mod metrics_rollup;
mod posture_check;
mod publish_reconcile;
mod status_sweep;

pub use event_retention::EventRetentionJob;
pub use flow_cleanup::FlowCleanupJob;
pub use jit_expiry::JitExpiryJob;
pub use job_history_cleanup::JobHistoryCleanupJob;
pub use license_refresh::LicenseRefreshJob;
pub use metrics_rollup::MetricsRollupJob;
pub use posture_check::PostureCheckJob;
pub use publish_reconcile::PublishReconcileJob;
pub use status_sweep::{StatusSweepJob, DISCONNECT_AFTER_THRESHOLDS};

#[cfg(test)]
pub(crate) fn test_context() -> netweave_server_jobs::JobContext {
	netweave_server_jobs::JobContext {
		run_id: "test-run".to_string(),
		triggered_by: netweave_server_jobs::TriggerSource::Manual,
		cancellation_token: netweave_server_jobs::CancellationToken::new(),
	}
}

#[cfg(test)]
pub(crate) fn test_fanout(
	store: std::sync::Arc<netweave_server_store::EntityStore>,
) -> (
	std::sync::Arc<netweave_server_publish::Fanout>,
	std::sync::Arc<netweave_server_publish::MemoryBroker>,
) {
	use netweave_server_publish::{Fanout, MemoryBroker, Publisher, PublisherOptions, ServerKeys};
	use std::sync::Arc;

	let broker = Arc::new(MemoryBroker::new());
	let options = PublisherOptions {
		base_backoff: std::time::Duration::from_millis(1),
		..PublisherOptions::default()
	};
	let publisher = Arc::new(Publisher::new(broker.clone(), ServerKeys::generate(), options));
	(Arc::new(Fanout::new(store, publisher, "0.1.0")), broker)
}

/// Give the node's host a traffic key so the publisher will address it.
#[cfg(test)]
pub(crate) async fn give_key(store: &netweave_server_store::EntityStore, node: &netweave_common_core::Node) {
	let mut host = store.get_host(&node.host_id).await.unwrap();
	host.traffic_key_public = Some(netweave_server_publish::ServerKeys::generate().public_base64());
	store
		.upsert_host(&netweave_server_store::Ctx::startup(), host)
		.await
		.unwrap();
}
