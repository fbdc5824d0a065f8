// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Single idempotent upgrade pass applied to nodes on load.

use netweave_common_core::{Network, Node, CURRENT_SCHEMA_VERSION};

/// Bring a stored node up to the current schema. Returns whether anything
/// changed, so the caller writes back only real upgrades.
pub fn normalize_node(node: &mut Node, network: Option<&Network>) -> bool {
	if node.schema_version >= CURRENT_SCHEMA_VERSION {
		return false;
	}
	let before = node.clone();

	// v1: relay flags were tracked separately from the back-references.
	if node.relayed_by.is_none() {
		node.is_relayed = false;
	} else {
		node.is_relayed = true;
	}
	if !node.is_relay {
		node.relayed_nodes.clear();
	}

	// v2: keepalive and default-acl moved onto the node.
	if node.persistent_keepalive == 0 {
		if let Some(net) = network {
			node.persistent_keepalive = net.default_keepalive;
		}
	}
	if let Some(net) = network {
		node.default_acl = net.default_acl;
	}

	// v3: failover pairs and internet-gateway clients only make sense
	// with the owning reference or role bit set.
	if node.failed_over_by.is_none() {
		node.fail_over_peers.clear();
	}
	if !node.is_internet_gateway {
		node.inet_node_clients.clear();
	}
	if node.internet_gw_id == Some(node.id) {
		node.internet_gw_id = None;
	}

	node.schema_version = CURRENT_SCHEMA_VERSION;
	*node != before
}
