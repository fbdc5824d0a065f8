// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netweave_common_secret::SecretString;
use serde::Deserialize;

/// License settings. Present only when both key and tenant are set.
#[derive(Debug, Clone)]
pub struct LicenseConfig {
	pub license_key: SecretString,
	pub tenant_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LicenseConfigLayer {
	#[serde(default)]
	pub license_key: Option<SecretString>,
	#[serde(default)]
	pub tenant_id: Option<String>,
}

impl LicenseConfigLayer {
	pub fn merge(&mut self, other: LicenseConfigLayer) {
		if other.license_key.is_some() {
			self.license_key = other.license_key;
		}
		if other.tenant_id.is_some() {
			self.tenant_id = other.tenant_id;
		}
	}

	pub fn finalize(self) -> Option<LicenseConfig> {
		Some(LicenseConfig {
			license_key: self.license_key.filter(|k| !k.is_empty())?,
			tenant_id: self.tenant_id?,
		})
	}
}
