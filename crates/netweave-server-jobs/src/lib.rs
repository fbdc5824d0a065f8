// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background job scheduler for the netweave server.
//!
//! Periodic and startup jobs run with bounded retry, and every run is
//! recorded in SQLite so health can be reported from history.

pub mod context;
pub mod error;
pub mod health;
pub mod job;
pub mod scheduler;
pub mod types;

pub use context::JobContext;
pub use error::{JobError, Result};
pub use health::{HealthState, JobHealthStatus, JobsHealthStatus, LastRunInfo};
pub use job::Job;
pub use netweave_server_db::JobRepository;
pub use scheduler::{JobScheduler, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
pub use types::{JobDefinition, JobOutput, JobRun, JobStatus, JobType, TriggerSource};
