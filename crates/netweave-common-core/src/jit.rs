// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{JitGrantId, JitRequestId, NetworkId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitStatus {
	Pending,
	Approved,
	Denied,
	Expired,
}

impl JitStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			JitStatus::Pending => "pending",
			JitStatus::Approved => "approved",
			JitStatus::Denied => "denied",
			JitStatus::Expired => "expired",
		}
	}
}

impl std::str::FromStr for JitStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(JitStatus::Pending),
			"approved" => Ok(JitStatus::Approved),
			"denied" => Ok(JitStatus::Denied),
			"expired" => Ok(JitStatus::Expired),
			_ => Err(format!("unknown jit status: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JitRequest {
	pub id: JitRequestId,
	pub network: NetworkId,
	pub user: String,
	pub reason: String,
	pub requested_at: DateTime<Utc>,
	pub status: JitStatus,
	#[serde(default)]
	pub approved_by: Option<String>,
	#[serde(default)]
	pub approved_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub duration_hours: i64,
	#[serde(default)]
	pub expires_at: Option<DateTime<Utc>>,
}

impl JitRequest {
	pub fn new(network: NetworkId, user: impl Into<String>, reason: impl Into<String>) -> Self {
		Self {
			id: JitRequestId::new(),
			network,
			user: user.into(),
			reason: reason.into(),
			requested_at: Utc::now(),
			status: JitStatus::Pending,
			approved_by: None,
			approved_at: None,
			duration_hours: 0,
			expires_at: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JitGrant {
	pub id: JitGrantId,
	pub network: NetworkId,
	pub user: String,
	pub request_id: JitRequestId,
	pub granted_at: DateTime<Utc>,
	pub expires_at: DateTime<Utc>,
}

impl JitGrant {
	pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
		self.expires_at > now
	}
}
