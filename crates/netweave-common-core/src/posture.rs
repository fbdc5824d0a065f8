// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Device posture checks and their recorded outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use crate::ids::{NetworkId, NodeId, PostureCheckId, TagId, UserGroupId};

/// Tag or group entry that makes a check apply to every device.
pub const ANY: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostureAttribute {
	Os,
	OsFamily,
	OsVersion,
	KernelVersion,
	AutoUpdate,
	ClientVersion,
	ClientLocation,
}

impl PostureAttribute {
	pub fn as_str(&self) -> &'static str {
		match self {
			PostureAttribute::Os => "os",
			PostureAttribute::OsFamily => "os_family",
			PostureAttribute::OsVersion => "os_version",
			PostureAttribute::KernelVersion => "kernel_version",
			PostureAttribute::AutoUpdate => "auto_update",
			PostureAttribute::ClientVersion => "client_version",
			PostureAttribute::ClientLocation => "client_location",
		}
	}

	/// Attributes whose single value is a minimum version.
	pub fn is_version(&self) -> bool {
		matches!(
			self,
			PostureAttribute::OsVersion | PostureAttribute::KernelVersion | PostureAttribute::ClientVersion
		)
	}
}

impl fmt::Display for PostureAttribute {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
	#[default]
	Unknown,
	Low,
	Medium,
	High,
	Critical,
}

/// A compliance rule on one device attribute, scoped to a network.
///
/// Node devices are in scope through `tags`, user-owned clients through
/// `user_groups`. An empty scope matches nothing; [`ANY`] matches all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostureCheck {
	pub id: PostureCheckId,
	pub network: NetworkId,
	pub name: String,
	#[serde(default)]
	pub description: String,
	pub attribute: PostureAttribute,
	pub values: Vec<String>,
	#[serde(default)]
	pub severity: Severity,
	#[serde(default)]
	pub tags: BTreeSet<String>,
	#[serde(default)]
	pub user_groups: BTreeSet<String>,
	pub enabled: bool,
	#[serde(default)]
	pub created_by: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl PostureCheck {
	pub fn new(
		network: NetworkId,
		name: impl Into<String>,
		attribute: PostureAttribute,
		values: impl IntoIterator<Item = impl Into<String>>,
	) -> Self {
		let now = Utc::now();
		Self {
			id: PostureCheckId::new(),
			network,
			name: name.into(),
			description: String::new(),
			attribute,
			values: values.into_iter().map(Into::into).collect(),
			severity: Severity::Medium,
			tags: BTreeSet::from([ANY.to_string()]),
			user_groups: BTreeSet::from([ANY.to_string()]),
			enabled: true,
			created_by: String::new(),
			created_at: now,
			updated_at: now,
		}
	}

	/// Whether the check is in scope for `device` at all.
	pub fn applies_to(&self, device: &DeviceInfo) -> bool {
		if !self.enabled {
			return false;
		}
		if device.is_user {
			if self.attribute == PostureAttribute::AutoUpdate {
				return false;
			}
			self.user_groups.contains(ANY)
				|| device.user_groups.iter().any(|g| self.user_groups.contains(g.as_str()))
		} else {
			self.tags.contains(ANY) || device.tags.iter().any(|t| self.tags.contains(t.as_str()))
		}
	}
}

/// One failed check on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
	pub check_id: PostureCheckId,
	pub name: String,
	pub attribute: PostureAttribute,
	pub message: String,
	pub severity: Severity,
}

/// Facts a device is judged on. Nodes take them from their host,
/// remote-access clients from what the client app reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
	pub client_location: String,
	pub client_version: String,
	pub os: String,
	pub os_version: String,
	pub os_family: String,
	pub kernel_version: String,
	pub auto_update: bool,
	pub tags: BTreeSet<TagId>,
	pub is_user: bool,
	pub user_groups: BTreeSet<UserGroupId>,
}

/// Device facts reported by a remote-access client app.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientFacts {
	#[serde(default)]
	pub country: String,
	#[serde(default)]
	pub client_version: String,
	#[serde(default)]
	pub os: String,
	#[serde(default)]
	pub os_version: String,
	#[serde(default)]
	pub os_family: String,
	#[serde(default)]
	pub kernel_version: String,
}

/// Latest evaluation result stored on a node or ext-client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostureState {
	#[serde(default)]
	pub violations: Vec<Violation>,
	#[serde(default)]
	pub severity: Severity,
	#[serde(default)]
	pub evaluated_at: Option<DateTime<Utc>>,
}

impl PostureState {
	pub fn is_compliant(&self) -> bool {
		self.violations.is_empty()
	}

	/// Same violations and severity, ignoring when they were computed.
	pub fn same_outcome(&self, other: &PostureState) -> bool {
		self.violations == other.violations && self.severity == other.severity
	}
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PostureSubject {
	Node(NodeId),
	ExtClient(String),
}

/// A non-compliant device in a network listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostureReport {
	pub subject: PostureSubject,
	pub name: String,
	pub state: PostureState,
}

/// Strip the decoration agents put around version strings (`v1.2.3,`).
pub fn clean_version(raw: &str) -> &str {
	let v = raw.trim();
	let v = v.strip_prefix(|c: char| c == 'v' || c == 'V').unwrap_or(v);
	v.trim_matches(|c: char| c == ',' || c == '"' || c == '\'' || c.is_whitespace())
}

/// Dotted numeric comparison. Missing or non-numeric parts count as zero,
/// so `1.2` equals `1.2.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
	let part = |s: Option<&str>| -> u64 {
		s.map(|p| {
			let digits: String = p.chars().take_while(char::is_ascii_digit).collect();
			digits.parse().unwrap_or(0)
		})
		.unwrap_or(0)
	};
	let (mut pa, mut pb) = (a.split('.'), b.split('.'));
	loop {
		match (pa.next(), pb.next()) {
			(None, None) => return Ordering::Equal,
			(x, y) => match part(x).cmp(&part(y)) {
				Ordering::Equal => continue,
				other => return other,
			},
		}
	}
}
