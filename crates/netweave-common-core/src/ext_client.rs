// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::ids::{AclId, NetworkId, NodeId, TagId};
use crate::posture::{ClientFacts, PostureState};

/// A WireGuard peer attached through an ingress gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtClient {
	pub client_id: String,
	pub network: NetworkId,
	/// Username of the owner, if user-owned.
	#[serde(default)]
	pub owner: Option<String>,
	pub ingress_id: NodeId,
	pub public_key: String,
	pub address: Option<Ipv4Addr>,
	#[serde(default)]
	pub address6: Option<Ipv6Addr>,
	#[serde(default)]
	pub extra_allowed_ips: Vec<IpNet>,
	#[serde(default)]
	pub tags: BTreeSet<TagId>,
	pub enabled: bool,
	/// Set when the client was created by a remote-access app on behalf of a user.
	#[serde(default)]
	pub remote_access_client_id: Option<String>,
	#[serde(default)]
	pub denied_acls: BTreeSet<AclId>,
	#[serde(default)]
	pub facts: ClientFacts,
	#[serde(default)]
	pub posture: PostureState,
	pub last_modified: DateTime<Utc>,
}

impl ExtClient {
	pub fn new(
		client_id: impl Into<String>,
		network: NetworkId,
		ingress_id: NodeId,
		public_key: impl Into<String>,
	) -> Self {
		Self {
			client_id: client_id.into(),
			network,
			owner: None,
			ingress_id,
			public_key: public_key.into(),
			address: None,
			address6: None,
			extra_allowed_ips: Vec::new(),
			tags: BTreeSet::new(),
			enabled: true,
			remote_access_client_id: None,
			denied_acls: BTreeSet::new(),
			facts: ClientFacts::default(),
			posture: PostureState::default(),
			last_modified: Utc::now(),
		}
	}

	/// Static clients are admin-provisioned and take part in device policies
	/// as if they were nodes.
	pub fn is_static(&self) -> bool {
		self.remote_access_client_id.is_none()
	}

	pub fn host_routes(&self) -> Vec<IpNet> {
		let mut out = Vec::with_capacity(2);
		if let Some(v4) = self.address {
			out.push(IpNet::V4(Ipv4Net::from(v4)));
		}
		if let Some(v6) = self.address6 {
			out.push(IpNet::V6(Ipv6Net::from(v6)));
		}
		out
	}

	/// Host routes plus any extra allowed IPs the client advertises.
	pub fn allowed_ips(&self) -> Vec<IpNet> {
		let mut out = self.host_routes();
		out.extend(self.extra_allowed_ips.iter().copied());
		out
	}
}
