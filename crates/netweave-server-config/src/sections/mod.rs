// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod audit;
mod auth;
mod database;
mod jobs;
mod license;
mod logging;
mod mqtt;
mod server;
mod smtp;

pub use audit::{AuditConfig, AuditConfigLayer, QueueOverflowPolicy, MIN_QUEUE_CAPACITY};
pub use auth::{AuthConfig, AuthConfigLayer, AuthProvider};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use jobs::{JobsConfig, JobsConfigLayer};
pub use license::{LicenseConfig, LicenseConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use mqtt::{MqttConfig, MqttConfigLayer};
pub use server::{Environment, ServerSection, ServerSectionLayer};
pub use smtp::{SmtpConfig, SmtpConfigLayer};
