// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netweave_common_core::ErrorKind;
use netweave_server_audit::AuditError;
use netweave_server_config::ConfigError;
use netweave_server_db::DbError;
use netweave_server_gateway::GatewayError;
use netweave_server_jit::JitError;
use netweave_server_jobs::JobError;
use netweave_server_peers::PeersError;
use netweave_server_policy::PolicyError;
use netweave_server_publish::PublishError;
use netweave_server_store::StoreError;

use crate::license::LicenseError;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Everything a `Core` operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Db(#[from] DbError),

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error(transparent)]
	Audit(#[from] AuditError),

	#[error(transparent)]
	Policy(#[from] PolicyError),

	#[error(transparent)]
	Peers(#[from] PeersError),

	#[error(transparent)]
	Publish(#[from] PublishError),

	#[error(transparent)]
	Gateway(#[from] GatewayError),

	#[error(transparent)]
	Jit(#[from] JitError),

	#[error(transparent)]
	Job(#[from] JobError),

	#[error(transparent)]
	License(#[from] LicenseError),
}

impl CoreError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			CoreError::Config(_) => ErrorKind::Fatal,
			CoreError::Db(e) => e.kind(),
			CoreError::Store(e) => e.kind(),
			CoreError::Audit(e) => e.kind(),
			CoreError::Policy(e) => e.kind(),
			CoreError::Peers(e) => e.kind(),
			CoreError::Publish(e) => e.kind(),
			CoreError::Gateway(e) => e.kind(),
			CoreError::Jit(e) => e.kind(),
			CoreError::Job(e) => e.kind(),
			CoreError::License(e) => e.kind(),
		}
	}
}
