// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use std::fmt;

/// Derived reachability of a node. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
	Online,
	Offline,
	Warning,
	Error,
	Unknown,
	Disconnected,
}

impl fmt::Display for NodeStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			NodeStatus::Online => "online",
			NodeStatus::Offline => "offline",
			NodeStatus::Warning => "warning",
			NodeStatus::Error => "error",
			NodeStatus::Unknown => "unknown",
			NodeStatus::Disconnected => "disconnected",
		};
		f.write_str(s)
	}
}
