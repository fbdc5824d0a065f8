// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ids::{EgressId, NetworkId, NodeId, TagId};
use crate::node::Node;

/// An external CIDR (or resolved domain) routed through a set of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Egress {
	pub id: EgressId,
	pub network: NetworkId,
	pub name: String,
	#[serde(default)]
	pub description: String,
	/// Disabled rules route nothing.
	pub status: bool,
	#[serde(default)]
	pub range: Option<IpNet>,
	#[serde(default)]
	pub domain: Option<String>,
	#[serde(default)]
	pub domain_ans: Vec<IpNet>,
	#[serde(default)]
	pub nodes: BTreeSet<NodeId>,
	/// Nodes carrying any of these tags are members too.
	#[serde(default)]
	pub tags: BTreeSet<TagId>,
	#[serde(default)]
	pub nat: bool,
	pub created_at: DateTime<Utc>,
}

impl Egress {
	pub fn new(network: NetworkId, name: impl Into<String>, range: Option<IpNet>) -> Self {
		Self {
			id: EgressId::new(),
			network,
			name: name.into(),
			description: String::new(),
			status: true,
			range,
			domain: None,
			domain_ans: Vec::new(),
			nodes: BTreeSet::new(),
			tags: BTreeSet::new(),
			nat: true,
			created_at: Utc::now(),
		}
	}

	/// CIDRs this rule advertises: the range, or every resolved domain answer.
	pub fn ranges(&self) -> Vec<IpNet> {
		match self.range {
			Some(range) => vec![range],
			None => self.domain_ans.clone(),
		}
	}

	pub fn has_member(&self, node: &Node) -> bool {
		self.nodes.contains(&node.id) || node.tags.iter().any(|t| self.tags.contains(t))
	}

	pub fn is_default_route(&self) -> bool {
		self.ranges().iter().any(|r| r.prefix_len() == 0)
	}
}
