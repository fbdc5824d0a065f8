// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event bus and metrics records.
//!
//! Mutations queue an [`netweave_common_core::Event`] on the [`EventService`];
//! one consumer fans it out to the configured [`EventSink`]s. The
//! [`EventLog`] reads persisted events back and applies retention.

pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod query;
pub mod sink;

pub use error::{AuditError, AuditResult, AuditSinkError};
pub use metrics::{MetricsRepo, RollupStats};
pub use pipeline::EventService;
pub use query::{EventFilter, EventLog};
pub use sink::kv::KvEventSink;
pub use sink::tracing::TracingEventSink;
pub use sink::EventSink;

pub use netweave_server_config::{AuditConfig, QueueOverflowPolicy};
