// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use netweave_common_core::Event;

use crate::error::AuditSinkError;

pub mod kv;
pub mod tracing;

/// Destination for events drained off the bus.
#[async_trait]
pub trait EventSink: Send + Sync {
	fn name(&self) -> &str;

	async fn publish(&self, event: Arc<Event>) -> Result<(), AuditSinkError>;
}
