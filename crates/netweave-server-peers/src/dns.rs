// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Hosts-file rendering of a network's names.

use std::collections::BTreeSet;
use std::net::IpAddr;

use netweave_common_core::NetworkSnapshot;

fn label(name: &str) -> String {
	name.trim()
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '-' })
		.collect()
}

/// `<ip> <name>.<network>` for every node, every enabled ext-client and
/// every custom entry of the network, sorted by name then address.
pub fn render_hosts(snap: &NetworkSnapshot) -> String {
	let network = snap.network.id.as_str();
	let mut rows: BTreeSet<(String, IpAddr)> = BTreeSet::new();

	for node in snap.nodes.values().filter(|n| !n.pending_delete) {
		let Some(host) = snap.host_of(node) else {
			continue;
		};
		for addr in node.addresses() {
			rows.insert((label(&host.name), addr));
		}
	}
	for client in snap.ext_clients.values().filter(|c| c.enabled) {
		let addrs = client
			.address
			.map(IpAddr::V4)
			.into_iter()
			.chain(client.address6.map(IpAddr::V6));
		for addr in addrs {
			rows.insert((label(&client.client_id), addr));
		}
	}
	for entry in &snap.network.dns_entries {
		rows.insert((label(&entry.name), entry.address));
	}

	rows.into_iter()
		.filter(|(name, _)| !name.is_empty())
		.map(|(name, addr)| format!("{addr} {name}.{network}\n"))
		.collect()
}
