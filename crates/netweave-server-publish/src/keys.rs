// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The server's static traffic key pair.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use netweave_common_secret::SecretString;
use netweave_server_store::EntityStore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::info;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{PublishError, Result};

/// Server-config key the key pair is persisted under.
pub const SERVER_KEY_ID: &str = "nm-server-id";

#[derive(Serialize, Deserialize)]
struct StoredKeys {
	private_key: String,
	public_key: String,
}

#[derive(Clone)]
pub struct ServerKeys {
	secret: StaticSecret,
	public: PublicKey,
}

impl fmt::Debug for ServerKeys {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServerKeys")
			.field("public", &self.public_base64())
			.finish_non_exhaustive()
	}
}

impl ServerKeys {
	pub fn generate() -> Self {
		let secret = StaticSecret::random_from_rng(OsRng);
		let public = PublicKey::from(&secret);
		Self { secret, public }
	}

	pub fn from_private_base64(encoded: &SecretString) -> Result<Self> {
		let bytes = decode_key(encoded.expose())?;
		let secret = StaticSecret::from(bytes);
		let public = PublicKey::from(&secret);
		Ok(Self { secret, public })
	}

	pub fn secret(&self) -> &StaticSecret {
		&self.secret
	}

	pub fn public(&self) -> &PublicKey {
		&self.public
	}

	pub fn public_base64(&self) -> String {
		STANDARD.encode(self.public.as_bytes())
	}

	fn private_base64(&self) -> SecretString {
		SecretString::new(STANDARD.encode(self.secret.to_bytes()))
	}

	/// Read the persisted pair, creating and storing one on first boot.
	pub async fn load_or_create(store: &EntityStore) -> Result<Self> {
		if let Some(raw) = store.server_config(SERVER_KEY_ID).await? {
			let stored: StoredKeys = serde_json::from_str(&raw)?;
			let keys = Self::from_private_base64(&SecretString::new(stored.private_key))?;
			if keys.public_base64() != stored.public_key {
				return Err(PublishError::InvalidKey(
					"stored public key does not match private key".to_string(),
				));
			}
			return Ok(keys);
		}

		let keys = Self::generate();
		let private = keys.private_base64();
		let stored = StoredKeys {
			private_key: private.expose().clone(),
			public_key: keys.public_base64(),
		};
		store
			.put_server_config(SERVER_KEY_ID, &serde_json::to_string(&stored)?)
			.await?;
		info!(public_key = %keys.public_base64(), "generated server traffic key");
		Ok(keys)
	}
}

fn decode_key(encoded: &str) -> Result<[u8; 32]> {
	let bytes = STANDARD
		.decode(encoded.trim())
		.map_err(|e| PublishError::InvalidKey(e.to_string()))?;
	<[u8; 32]>::try_from(bytes.as_slice())
		.map_err(|_| PublishError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))
}

/// Parse a host's base64 traffic public key.
pub fn decode_public_key(encoded: &str) -> Result<PublicKey> {
	decode_key(encoded).map(PublicKey::from)
}
