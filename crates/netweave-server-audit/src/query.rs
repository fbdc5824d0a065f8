// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Read side of the persisted event log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use netweave_common_core::{Event, EventAction, NetworkId, SubjectKind};
use netweave_server_db::{CallPolicy, KvStore, Table};
use tracing::{instrument, warn};

use crate::error::AuditResult;

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
	pub network: Option<NetworkId>,
	pub actor: Option<String>,
	pub action: Option<EventAction>,
	pub subject_kind: Option<SubjectKind>,
	pub subject_id: Option<String>,
	pub from: Option<DateTime<Utc>>,
	pub to: Option<DateTime<Utc>>,
	pub limit: Option<usize>,
}

impl EventFilter {
	fn matches(&self, e: &Event) -> bool {
		if let Some(network) = &self.network {
			if e.network.as_ref() != Some(network) {
				return false;
			}
		}
		if let Some(actor) = &self.actor {
			if &e.actor != actor {
				return false;
			}
		}
		if self.action.is_some_and(|a| a != e.action) {
			return false;
		}
		if self.subject_kind.is_some_and(|k| k != e.subject.kind) {
			return false;
		}
		if let Some(id) = &self.subject_id {
			if &e.subject.id != id {
				return false;
			}
		}
		self.from.map_or(true, |from| e.ts >= from) && self.to.map_or(true, |to| e.ts < to)
	}
}

#[derive(Clone)]
pub struct EventLog {
	kv: Arc<dyn KvStore>,
	policy: CallPolicy,
}

impl EventLog {
	pub fn new(kv: Arc<dyn KvStore>, policy: CallPolicy) -> Self {
		Self { kv, policy }
	}

	/// Newest first.
	#[instrument(skip(self, filter))]
	pub async fn list_events(&self, filter: &EventFilter) -> AuditResult<Vec<Event>> {
		let rows = self.policy.with_retry(|| self.kv.list(Table::Events)).await?;

		let mut events: Vec<Event> = rows
			.into_iter()
			.filter_map(|(key, value)| match serde_json::from_str::<Event>(&value) {
				Ok(e) => Some(e),
				Err(e) => {
					warn!(key = %key, error = %e, "skipping unreadable event");
					None
				}
			})
			.filter(|e| filter.matches(e))
			.collect();

		events.sort_by(|a, b| b.ts.cmp(&a.ts));
		if let Some(limit) = filter.limit {
			events.truncate(limit);
		}
		Ok(events)
	}

	/// Delete every event older than `cutoff`. Returns the number removed.
	#[instrument(skip(self))]
	pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> AuditResult<usize> {
		let rows = self.policy.with_retry(|| self.kv.list(Table::Events)).await?;

		let mut removed = 0;
		for (key, value) in rows {
			let stale = match serde_json::from_str::<Event>(&value) {
				Ok(e) => e.ts < cutoff,
				Err(_) => true,
			};
			if stale && self.policy.with_retry(|| self.kv.delete(Table::Events, &key)).await? {
				removed += 1;
			}
		}
		Ok(removed)
	}

	pub async fn purge_retention(&self, retention_days: i64, now: DateTime<Utc>) -> AuditResult<usize> {
		self.purge_older_than(now - chrono::Duration::days(retention_days)).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sink::kv::KvEventSink;
	use crate::sink::EventSink;
	use netweave_server_db::MemoryKvStore;
	use std::time::Duration;

	fn policy() -> CallPolicy {
		CallPolicy::new(Duration::from_secs(1))
	}

	async fn seed(kv: Arc<dyn KvStore>) {
		let sink = KvEventSink::new(kv, policy());
		let now = Utc::now();
		let n1 = NetworkId::from("n1");
		let n2 = NetworkId::from("n2");
		let events = [
			Event::builder(EventAction::Create, SubjectKind::Node, "a").network(&n1),
			Event::builder(EventAction::Delete, SubjectKind::Node, "b").network(&n1),
			Event::builder(EventAction::JitApprove, SubjectKind::JitRequest, "r").network(&n2).actor("admin"),
		];
		for (i, builder) in events.into_iter().enumerate() {
			let mut event = builder.build();
			event.ts = now - chrono::Duration::days(10 - i as i64 * 5);
			sink.publish(Arc::new(event)).await.unwrap();
		}
	}

	#[tokio::test]
	async fn filters_and_orders_newest_first() {
		let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
		seed(kv.clone()).await;
		let log = EventLog::new(kv, policy());

		let all = log.list_events(&EventFilter::default()).await.unwrap();
		assert_eq!(all.len(), 3);
		assert_eq!(all[0].subject.id, "r");

		let n1 = log
			.list_events(&EventFilter {
				network: Some(NetworkId::from("n1")),
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(n1.len(), 2);

		let deletes = log
			.list_events(&EventFilter {
				action: Some(EventAction::Delete),
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(deletes.len(), 1);
		assert_eq!(deletes[0].subject.id, "b");
	}

	#[tokio::test]
	async fn retention_purges_old_events() {
		let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
		seed(kv.clone()).await;
		let log = EventLog::new(kv, policy());

		let removed = log.purge_retention(7, Utc::now()).await.unwrap();
		assert_eq!(removed, 1);
		assert_eq!(log.list_events(&EventFilter::default()).await.unwrap().len(), 2);
	}
}
