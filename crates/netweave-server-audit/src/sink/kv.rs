// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use netweave_common_core::Event;
use netweave_server_db::{CallPolicy, KvStore, Table};

use crate::error::AuditSinkError;
use crate::sink::EventSink;

/// Persists events into the `events` table.
///
/// Keys start with the RFC 3339 timestamp so a key-ordered scan is also a
/// time-ordered scan.
pub struct KvEventSink {
	kv: Arc<dyn KvStore>,
	policy: CallPolicy,
}

impl KvEventSink {
	pub fn new(kv: Arc<dyn KvStore>, policy: CallPolicy) -> Self {
		Self { kv, policy }
	}
}

pub(crate) fn event_key(event: &Event) -> String {
	format!(
		"{}-{}",
		event.ts.to_rfc3339_opts(SecondsFormat::Micros, true),
		event.id
	)
}

#[async_trait]
impl EventSink for KvEventSink {
	fn name(&self) -> &str {
		"kv"
	}

	async fn publish(&self, event: Arc<Event>) -> Result<(), AuditSinkError> {
		let value = serde_json::to_string(event.as_ref())
			.map_err(|e| AuditSinkError::Permanent(format!("failed to serialize event: {e}")))?;
		let key = event_key(&event);

		self.policy
			.with_retry(|| self.kv.put(Table::Events, &key, &value))
			.await?;
		Ok(())
	}
}
