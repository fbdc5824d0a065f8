// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;

use netweave_common_core::{HostId, NetworkId, NodeId};

/// Broker topics the agents subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Topic {
	/// `update/<network>/<node>`
	NodeUpdate { network: NetworkId, node: NodeId },
	/// `peers/<network>/<node>`
	Peers { network: NetworkId, node: NodeId },
	/// `host/<host>`
	Host(HostId),
	/// `signal/<host>`
	Signal(HostId),
}

impl Topic {
	pub fn parse(s: &str) -> Option<Topic> {
		let parts: Vec<&str> = s.split('/').collect();
		match parts.as_slice() {
			["update", network, node] => Some(Topic::NodeUpdate {
				network: NetworkId::from(*network),
				node: node.parse().ok()?,
			}),
			["peers", network, node] => Some(Topic::Peers {
				network: NetworkId::from(*network),
				node: node.parse().ok()?,
			}),
			["host", host] => Some(Topic::Host(host.parse().ok()?)),
			["signal", host] => Some(Topic::Signal(host.parse().ok()?)),
			_ => None,
		}
	}

	/// The node or host this topic is addressed to.
	pub fn recipient(&self) -> Recipient {
		match self {
			Topic::NodeUpdate { node, .. } | Topic::Peers { node, .. } => Recipient::Node(*node),
			Topic::Host(host) | Topic::Signal(host) => Recipient::Host(*host),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Recipient {
	Node(NodeId),
	Host(HostId),
}

impl fmt::Display for Topic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Topic::NodeUpdate { network, node } => write!(f, "update/{network}/{node}"),
			Topic::Peers { network, node } => write!(f, "peers/{network}/{node}"),
			Topic::Host(host) => write!(f, "host/{host}"),
			Topic::Signal(host) => write!(f, "signal/{host}"),
		}
	}
}
