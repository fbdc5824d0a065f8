// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Address allocation inside a network's ranges.
//!
//! Nodes take the lowest free host address and ext-clients the highest,
//! so the two pools grow towards each other. An address is free when no
//! node and no ext-client of the network holds it.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};
use netweave_common_core::NetworkSnapshot;

use crate::error::{StoreError, StoreResult};

/// Which end of the range to allocate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
	Up,
	Down,
}

pub(crate) fn used_v4(view: &NetworkSnapshot) -> BTreeSet<Ipv4Addr> {
	view.nodes
		.values()
		.filter_map(|n| n.address)
		.chain(view.ext_clients.values().filter_map(|c| c.address))
		.collect()
}

pub(crate) fn used_v6(view: &NetworkSnapshot) -> BTreeSet<Ipv6Addr> {
	view.nodes
		.values()
		.filter_map(|n| n.address6)
		.chain(view.ext_clients.values().filter_map(|c| c.address6))
		.collect()
}

/// Lock key serializing allocation within one network.
pub(crate) fn lock_key(network: &str) -> String {
	format!("addresses/{network}")
}

/// Fill in whichever of `address`/`address6` is unset and has a range on
/// the network. Addresses the caller already chose are left alone and
/// judged by validation.
pub(crate) fn assign(
	view: &NetworkSnapshot,
	address: &mut Option<Ipv4Addr>,
	address6: &mut Option<Ipv6Addr>,
	fill: Fill,
) -> StoreResult<()> {
	let exhausted = |family| StoreError::AddressExhausted {
		network: view.network.id.to_string(),
		family,
	};
	if address.is_none() {
		if let Some(range) = view.network.address_range {
			*address = Some(free_v4(range, &used_v4(view), fill).ok_or_else(|| exhausted("ipv4"))?);
		}
	}
	if address6.is_none() {
		if let Some(range) = view.network.address_range6 {
			*address6 = Some(free_v6(range, &used_v6(view), fill).ok_or_else(|| exhausted("ipv6"))?);
		}
	}
	Ok(())
}

/// First free host address of `range`. Network and broadcast addresses
/// are skipped for prefixes shorter than /31.
pub fn free_v4(range: Ipv4Net, used: &BTreeSet<Ipv4Addr>, fill: Fill) -> Option<Ipv4Addr> {
	let mut hosts = range.hosts();
	match fill {
		Fill::Up => hosts.find(|a| !used.contains(a)),
		Fill::Down => hosts.rev().find(|a| !used.contains(a)),
	}
}

/// First free address of `range`, never the subnet-router anycast
/// address (all host bits zero) unless the prefix is /128.
pub fn free_v6(range: Ipv6Net, used: &BTreeSet<Ipv6Addr>, fill: Fill) -> Option<Ipv6Addr> {
	let anycast = range.network();
	let free = |a: &Ipv6Addr| !used.contains(a) && (range.prefix_len() == 128 || *a != anycast);
	let mut hosts = range.hosts();
	match fill {
		Fill::Up => hosts.find(free),
		Fill::Down => hosts.rev().find(free),
	}
}
