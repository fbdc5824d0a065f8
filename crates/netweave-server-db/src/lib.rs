// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persistence collaborators for the netweave server.
//!
//! - [`KvStore`]: table-namespaced JSON blobs with per-row versions
//!   ([`SqliteKvStore`], [`MemoryKvStore`])
//! - [`FlowSink`]: flow-log rows in daily partitions
//! - [`JobRepository`]: job definitions and run history
//! - [`CallPolicy`]: deadline, cancellation and bounded retry for store calls

pub mod error;
pub mod flows;
pub mod job;
pub mod kv;
pub mod memory;
pub mod pool;
pub mod retry;
pub mod sqlite;
pub mod testing;

pub use error::{DbError, Result};
pub use flows::{
	drop_partitions_older_than, partition_id, FlowPartition, FlowQuery, FlowRecord, FlowSink,
	MemoryFlowSink,
};
pub use job::{JobDefinition, JobRepository, JobRun, JobStatus, TriggerSource};
pub use kv::{KvStore, Table, Versioned};
pub use memory::MemoryKvStore;
pub use pool::{create_memory_pool, create_pool, run_migrations};
pub use retry::CallPolicy;
pub use sqlite::SqliteKvStore;
pub use sqlx::SqlitePool;
