// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use netweave_common_core::Event;

use crate::error::AuditSinkError;
use crate::sink::EventSink;

/// Mirrors every event into the process log.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl TracingEventSink {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl EventSink for TracingEventSink {
	fn name(&self) -> &str {
		"tracing"
	}

	async fn publish(&self, event: Arc<Event>) -> Result<(), AuditSinkError> {
		tracing::info!(
			target: "netweave::events",
			event_id = %event.id,
			actor = %event.actor,
			action = %event.action,
			subject_kind = %event.subject.kind,
			subject_id = %event.subject.id,
			network = event.network.as_ref().map(|n| n.as_str()).unwrap_or("-"),
			origin = ?event.origin,
			"event"
		);
		Ok(())
	}
}
