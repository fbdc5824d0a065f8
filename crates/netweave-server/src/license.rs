// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic license validation.
//!
//! The server reports its usage to a validator and caches the outcome
//! under `servercfg/license-status`. The remote accounts service is a
//! collaborator; [`OfflineValidator`] only checks that a key and tenant
//! are present.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netweave_common_core::ErrorKind;
use netweave_server_config::LicenseConfig;
use netweave_server_store::{EntityStore, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

pub const LICENSE_STATUS_KEY: &str = "license-status";

#[derive(Debug, thiserror::Error)]
pub enum LicenseError {
	#[error("license rejected: {0}")]
	Rejected(String),

	#[error("license check unavailable: {0}")]
	Unavailable(String),

	#[error(transparent)]
	Store(#[from] StoreError),
}

impl LicenseError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			LicenseError::Rejected(_) => ErrorKind::Fatal,
			LicenseError::Unavailable(_) => ErrorKind::Transient,
			LicenseError::Store(e) => e.kind(),
		}
	}
}

/// What the server reports alongside its key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
	pub networks: usize,
	pub hosts: usize,
	pub nodes: usize,
	pub ext_clients: usize,
	pub users: usize,
	pub egresses: usize,
}

impl Usage {
	pub async fn collect(store: &EntityStore) -> Self {
		let networks = store.list_networks().await;
		let mut usage = Usage {
			networks: networks.len(),
			hosts: store.list_hosts().await.len(),
			nodes: store.all_nodes().await.len(),
			users: store.list_users().await.len(),
			..Usage::default()
		};
		for network in &networks {
			usage.ext_clients += store.list_ext_clients(&network.id).await.len();
			usage.egresses += store.list_egresses(&network.id).await.len();
		}
		usage
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseStatus {
	pub tenant_id: String,
	/// First bytes of the key's SHA-256, for telling keys apart in logs.
	pub key_fingerprint: String,
	pub usage: Usage,
	pub checked_at: DateTime<Utc>,
	pub valid: bool,
	pub error: Option<String>,
}

#[async_trait]
pub trait LicenseValidator: Send + Sync {
	async fn validate(&self, license: &LicenseConfig, usage: &Usage) -> Result<(), LicenseError>;
}

/// Accepts any non-empty key for a non-empty tenant.
#[derive(Debug, Default)]
pub struct OfflineValidator;

#[async_trait]
impl LicenseValidator for OfflineValidator {
	async fn validate(&self, license: &LicenseConfig, _usage: &Usage) -> Result<(), LicenseError> {
		if license.license_key.expose().trim().is_empty() {
			return Err(LicenseError::Rejected("empty license key".to_string()));
		}
		if license.tenant_id.trim().is_empty() {
			return Err(LicenseError::Rejected("empty tenant id".to_string()));
		}
		Ok(())
	}
}

pub fn key_fingerprint(license: &LicenseConfig) -> String {
	let digest = Sha256::digest(license.license_key.expose().as_bytes());
	hex::encode(&digest[..8])
}

pub struct LicenseMonitor {
	license: Option<LicenseConfig>,
	validator: Arc<dyn LicenseValidator>,
	store: Arc<EntityStore>,
	last: RwLock<Option<LicenseStatus>>,
}

impl LicenseMonitor {
	pub fn new(license: Option<LicenseConfig>, validator: Arc<dyn LicenseValidator>, store: Arc<EntityStore>) -> Self {
		Self {
			license,
			validator,
			store,
			last: RwLock::new(None),
		}
	}

	pub fn is_configured(&self) -> bool {
		self.license.is_some()
	}

	pub async fn last_status(&self) -> Option<LicenseStatus> {
		self.last.read().await.clone()
	}

	/// Validate once and cache the outcome. `Ok(None)` when no license is
	/// configured. A rejection is recorded before it is returned; an
	/// unavailable validator leaves the previous status in place.
	#[instrument(skip(self))]
	pub async fn refresh(&self) -> Result<Option<LicenseStatus>, LicenseError> {
		let Some(license) = &self.license else {
			return Ok(None);
		};
		let usage = Usage::collect(&self.store).await;
		let outcome = self.validator.validate(license, &usage).await;
		if let Err(LicenseError::Unavailable(reason)) = &outcome {
			warn!(reason = %reason, "license validator unavailable, keeping last status");
			return outcome.map(|_| None);
		}

		let status = LicenseStatus {
			tenant_id: license.tenant_id.clone(),
			key_fingerprint: key_fingerprint(license),
			usage,
			checked_at: Utc::now(),
			valid: outcome.is_ok(),
			error: outcome.as_ref().err().map(|e| e.to_string()),
		};
		let encoded = serde_json::to_string(&status).map_err(|e| LicenseError::Unavailable(e.to_string()))?;
		self.store.put_server_config(LICENSE_STATUS_KEY, &encoded).await?;
		*self.last.write().await = Some(status.clone());

		match outcome {
			Ok(()) => {
				info!(tenant_id = %status.tenant_id, fingerprint = %status.key_fingerprint, "license validated");
				Ok(Some(status))
			}
			Err(e) => {
				warn!(tenant_id = %status.tenant_id, error = %e, "license validation failed");
				Err(e)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use netweave_common_secret::SecretString;
	use netweave_server_store::testing::{node_in, seeded_store};

	fn license(key: &str) -> LicenseConfig {
		LicenseConfig {
			license_key: SecretString::from(key),
			tenant_id: "tenant-1".to_string(),
		}
	}

	struct Down;

	#[async_trait]
	impl LicenseValidator for Down {
		async fn validate(&self, _: &LicenseConfig, _: &Usage) -> Result<(), LicenseError> {
			Err(LicenseError::Unavailable("connection refused".into()))
		}
	}

	#[tokio::test]
	async fn unconfigured_license_is_skipped() {
		let (store, _) = seeded_store().await;
		let monitor = LicenseMonitor::new(None, Arc::new(OfflineValidator), Arc::new(store));
		assert!(monitor.refresh().await.unwrap().is_none());
		assert!(monitor.last_status().await.is_none());
	}

	#[tokio::test]
	async fn valid_license_is_cached_with_usage() {
		let (store, net) = seeded_store().await;
		node_in(&store, &net, "a", "10.0.0.1").await;
		let store = Arc::new(store);
		let monitor = LicenseMonitor::new(Some(license("secret")), Arc::new(OfflineValidator), store.clone());

		let status = monitor.refresh().await.unwrap().unwrap();
		assert!(status.valid);
		assert_eq!(status.usage.networks, 1);
		assert_eq!(status.usage.nodes, 1);
		assert_eq!(status.key_fingerprint.len(), 16);

		let cached = store.server_config(LICENSE_STATUS_KEY).await.unwrap().unwrap();
		assert!(!cached.contains("secret"));
		let decoded: LicenseStatus = serde_json::from_str(&cached).unwrap();
		assert_eq!(decoded, status);
	}

	#[tokio::test]
	async fn rejection_is_recorded_and_returned() {
		let (store, _) = seeded_store().await;
		let monitor = LicenseMonitor::new(Some(license("  ")), Arc::new(OfflineValidator), Arc::new(store));
		let err = monitor.refresh().await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Fatal);
		let last = monitor.last_status().await.unwrap();
		assert!(!last.valid);
		assert!(last.error.is_some());
	}

	#[tokio::test]
	async fn unavailable_validator_keeps_previous_status() {
		let (store, _) = seeded_store().await;
		let monitor = LicenseMonitor::new(Some(license("k")), Arc::new(Down), Arc::new(store));
		let err = monitor.refresh().await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Transient);
		assert!(monitor.last_status().await.is_none());
	}
}
