// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authenticated encryption of payloads for one recipient host.
//!
//! A NaCl `crypto_box` (Curve25519, XSalsa20, Poly1305) between the
//! sender's static key and the recipient's traffic key. Each sealed
//! message is `nonce (24 bytes) || tag || ciphertext`, the layout agents
//! open with their own NaCl implementation.

use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::Aead;
use crypto_box::SalsaBox;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{PublishError, Result};

pub const NONCE_LEN: usize = 24;

fn salsa_box(secret: &StaticSecret, public: &PublicKey) -> SalsaBox {
	let public = crypto_box::PublicKey::from(*public.as_bytes());
	let secret = crypto_box::SecretKey::from(secret.to_bytes());
	SalsaBox::new(&public, &secret)
}

pub fn seal(plaintext: &[u8], recipient: &PublicKey, sender: &StaticSecret) -> Result<Vec<u8>> {
	let nonce: [u8; NONCE_LEN] = rand::random();
	let boxed = salsa_box(sender, recipient)
		.encrypt(GenericArray::from_slice(&nonce), plaintext)
		.map_err(|e| PublishError::Seal(e.to_string()))?;

	let mut sealed = Vec::with_capacity(NONCE_LEN + boxed.len());
	sealed.extend_from_slice(&nonce);
	sealed.extend_from_slice(&boxed);
	Ok(sealed)
}

/// Inverse of [`seal`], run by the receiving host.
pub fn open(sealed: &[u8], sender: &PublicKey, recipient: &StaticSecret) -> Result<Vec<u8>> {
	if sealed.len() < NONCE_LEN {
		return Err(PublishError::Seal("message shorter than nonce".to_string()));
	}
	let (nonce, boxed) = sealed.split_at(NONCE_LEN);
	salsa_box(recipient, sender)
		.decrypt(GenericArray::from_slice(nonce), boxed)
		.map_err(|e| PublishError::Seal(e.to_string()))
}
