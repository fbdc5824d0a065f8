// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Access control policies.
//!
//! A policy allows traffic from any endpoint matched by `src` to any
//! endpoint matched by `dst`; `Direction::Bi` also allows the reverse.
//! Device policies match nodes and static ext-clients, user policies match
//! users (directly or through groups) against node destinations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AclId, NetworkId, UserGroupId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
	DevicePolicy,
	UserPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
	Uni,
	Bi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
	All,
	Tcp,
	Udp,
	Icmp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclTagKind {
	Node,
	NodeTag,
	Egress,
	EgressRange,
	User,
	UserGroup,
	Wildcard,
}

impl AclTagKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			AclTagKind::Node => "node",
			AclTagKind::NodeTag => "node_tag",
			AclTagKind::Egress => "egress",
			AclTagKind::EgressRange => "egress_range",
			AclTagKind::User => "user",
			AclTagKind::UserGroup => "user_group",
			AclTagKind::Wildcard => "wildcard",
		}
	}

	/// Kinds that name users rather than devices.
	pub fn is_user_kind(&self) -> bool {
		matches!(self, AclTagKind::User | AclTagKind::UserGroup)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AclTag {
	pub kind: AclTagKind,
	pub value: String,
}

impl AclTag {
	pub const WILDCARD: &'static str = "*";

	pub fn new(kind: AclTagKind, value: impl Into<String>) -> Self {
		Self {
			kind,
			value: value.into(),
		}
	}

	pub fn wildcard() -> Self {
		Self::new(AclTagKind::Wildcard, Self::WILDCARD)
	}

	pub fn is_wildcard(&self) -> bool {
		self.kind == AclTagKind::Wildcard || self.value == Self::WILDCARD
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acl {
	pub id: AclId,
	pub name: String,
	pub network: NetworkId,
	pub rule_type: RuleType,
	pub enabled: bool,
	/// Network default policy; created with the network and never deleted.
	#[serde(default)]
	pub default: bool,
	pub protocol: Protocol,
	#[serde(default)]
	pub service_type: String,
	#[serde(default)]
	pub ports: Vec<String>,
	pub direction: Direction,
	pub src: Vec<AclTag>,
	pub dst: Vec<AclTag>,
	#[serde(default)]
	pub created_by: String,
	pub created_at: DateTime<Utc>,
}

impl Acl {
	pub fn new(
		network: NetworkId,
		name: impl Into<String>,
		rule_type: RuleType,
		src: Vec<AclTag>,
		dst: Vec<AclTag>,
	) -> Self {
		Self {
			id: AclId::new(),
			name: name.into(),
			network,
			rule_type,
			enabled: true,
			default: false,
			protocol: Protocol::All,
			service_type: "any".to_string(),
			ports: Vec::new(),
			direction: Direction::Bi,
			src,
			dst,
			created_by: String::new(),
			created_at: Utc::now(),
		}
	}

	/// Default device policy: every device may reach every device.
	pub fn default_device(network: &NetworkId) -> Self {
		let mut acl = Self::new(
			network.clone(),
			"all-nodes",
			RuleType::DevicePolicy,
			vec![AclTag::wildcard()],
			vec![AclTag::wildcard()],
		);
		acl.default = true;
		acl.created_by = "netweave".to_string();
		acl
	}

	/// Default user policy: network admins and users may reach every device.
	pub fn default_user(network: &NetworkId) -> Self {
		let mut acl = Self::new(
			network.clone(),
			"all-users",
			RuleType::UserPolicy,
			vec![
				AclTag::new(AclTagKind::UserGroup, UserGroupId::network_admin(network).as_str()),
				AclTag::new(AclTagKind::UserGroup, UserGroupId::network_user(network).as_str()),
			],
			vec![AclTag::wildcard()],
		);
		acl.default = true;
		acl.direction = Direction::Uni;
		acl.created_by = "netweave".to_string();
		acl
	}

	pub fn references(&self, kind: AclTagKind, value: &str) -> bool {
		self
			.src
			.iter()
			.chain(self.dst.iter())
			.any(|t| t.kind == kind && t.value == value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_policies_cover_both_rule_types() {
		let net = NetworkId::from("n1");
		let device = Acl::default_device(&net);
		let user = Acl::default_user(&net);
		assert!(device.default && user.default);
		assert_eq!(device.rule_type, RuleType::DevicePolicy);
		assert_eq!(user.rule_type, RuleType::UserPolicy);
		assert!(device.src[0].is_wildcard());
		assert!(user.src.iter().all(|t| t.kind == AclTagKind::UserGroup));
	}

	#[test]
	fn node_tag_star_counts_as_wildcard() {
		assert!(AclTag::new(AclTagKind::NodeTag, "*").is_wildcard());
		assert!(!AclTag::new(AclTagKind::NodeTag, "n1.db").is_wildcard());
	}

	#[test]
	fn tag_serializes_kind_in_snake_case() {
		let tag = AclTag::new(AclTagKind::EgressRange, "10.0.0.0/8");
		let json = serde_json::to_string(&tag).unwrap();
		assert_eq!(json, r#"{"kind":"egress_range","value":"10.0.0.0/8"}"#);
	}
}
