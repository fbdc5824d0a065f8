// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authentication settings consumed by the core.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthProvider {
	Google,
	AzureAd,
	Github,
	Oidc,
	Okta,
}

impl std::str::FromStr for AuthProvider {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"google" => Ok(AuthProvider::Google),
			"azure-ad" => Ok(AuthProvider::AzureAd),
			"github" => Ok(AuthProvider::Github),
			"oidc" => Ok(AuthProvider::Oidc),
			"okta" => Ok(AuthProvider::Okta),
			_ => Err(format!("unknown auth provider '{s}'")),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthConfig {
	pub jwt_validity_secs: u64,
	pub provider: Option<AuthProvider>,
}

impl Default for AuthConfig {
	fn default() -> Self {
		AuthConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfigLayer {
	#[serde(default)]
	pub jwt_validity_secs: Option<u64>,
	#[serde(default)]
	pub provider: Option<AuthProvider>,
}

impl AuthConfigLayer {
	pub fn merge(&mut self, other: AuthConfigLayer) {
		if other.jwt_validity_secs.is_some() {
			self.jwt_validity_secs = other.jwt_validity_secs;
		}
		if other.provider.is_some() {
			self.provider = other.provider;
		}
	}

	pub fn finalize(self) -> AuthConfig {
		AuthConfig {
			jwt_validity_secs: self.jwt_validity_secs.unwrap_or(86400),
			provider: self.provider,
		}
	}
}
