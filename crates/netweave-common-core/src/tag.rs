// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NetworkId, TagId};

/// Tag definition. Membership is carried on the tagged nodes and
/// ext-clients (`tags` sets), not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
	pub id: TagId,
	pub network: NetworkId,
	pub name: String,
	#[serde(default)]
	pub created_by: String,
	pub created_at: DateTime<Utc>,
}

impl Tag {
	pub fn new(network: NetworkId, name: impl Into<String>) -> Self {
		let name = name.into();
		Self {
			id: TagId::for_network(&network, &name),
			network,
			name,
			created_by: String::new(),
			created_at: Utc::now(),
		}
	}
}
