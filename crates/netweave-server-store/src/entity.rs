// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Binds each domain type to its table, cache and event subject.

use netweave_common_core::{
	Acl, Egress, ExtClient, Host, JitGrant, JitRequest, Network, NetworkId, Node, PostureCheck, Role,
	SubjectKind, Tag, User, UserGroup,
};
use netweave_server_db::Table;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::Cache;

#[derive(Debug, Default)]
pub(crate) struct Caches {
	pub nodes: Cache<Node>,
	pub hosts: Cache<Host>,
	pub networks: Cache<Network>,
	pub ext_clients: Cache<ExtClient>,
	pub acls: Cache<Acl>,
	pub tags: Cache<Tag>,
	pub egresses: Cache<Egress>,
	pub groups: Cache<UserGroup>,
	pub roles: Cache<Role>,
	pub users: Cache<User>,
	pub jit_requests: Cache<JitRequest>,
	pub jit_grants: Cache<JitGrant>,
	pub posture_checks: Cache<PostureCheck>,
}

pub(crate) trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
	const TABLE: Table;
	const KIND: SubjectKind;

	fn key(&self) -> String;
	fn label(&self) -> String;
	fn network(&self) -> Option<&NetworkId>;
	fn cache(caches: &Caches) -> &Cache<Self>;
}

macro_rules! entity {
	($ty:ty, $table:expr, $kind:expr, $cache:ident, |$e:ident| key: $key:expr, label: $label:expr, network: $net:expr) => {
		impl Entity for $ty {
			const TABLE: Table = $table;
			const KIND: SubjectKind = $kind;

			fn key(&self) -> String {
				let $e = self;
				$key
			}

			fn label(&self) -> String {
				let $e = self;
				$label
			}

			fn network(&self) -> Option<&NetworkId> {
				let $e = self;
				$net
			}

			fn cache(caches: &Caches) -> &Cache<Self> {
				&caches.$cache
			}
		}
	};
}

entity!(Node, Table::Nodes, SubjectKind::Node, nodes,
	|e| key: e.id.to_string(), label: e.id.to_string(), network: Some(&e.network));
entity!(Host, Table::Hosts, SubjectKind::Host, hosts,
	|e| key: e.id.to_string(), label: e.name.clone(), network: None);
entity!(Network, Table::Networks, SubjectKind::Network, networks,
	|e| key: e.id.to_string(), label: e.id.to_string(), network: Some(&e.id));
entity!(ExtClient, Table::ExtClients, SubjectKind::ExtClient, ext_clients,
	|e| key: e.client_id.clone(), label: e.client_id.clone(), network: Some(&e.network));
entity!(Acl, Table::Acls, SubjectKind::Acl, acls,
	|e| key: e.id.to_string(), label: e.name.clone(), network: Some(&e.network));
entity!(Tag, Table::Tags, SubjectKind::Tag, tags,
	|e| key: e.id.to_string(), label: e.name.clone(), network: Some(&e.network));
entity!(Egress, Table::Egresses, SubjectKind::Egress, egresses,
	|e| key: e.id.to_string(), label: e.name.clone(), network: Some(&e.network));
entity!(UserGroup, Table::UserGroups, SubjectKind::UserGroup, groups,
	|e| key: e.id.to_string(), label: e.name.clone(), network: None);
entity!(Role, Table::UserRoles, SubjectKind::Role, roles,
	|e| key: e.id.to_string(), label: e.id.to_string(), network: e.network.as_ref());
entity!(User, Table::Users, SubjectKind::User, users,
	|e| key: e.username.clone(), label: e.username.clone(), network: None);
entity!(JitRequest, Table::JitRequests, SubjectKind::JitRequest, jit_requests,
	|e| key: e.id.to_string(), label: e.user.clone(), network: Some(&e.network));
entity!(JitGrant, Table::JitGrants, SubjectKind::JitGrant, jit_grants,
	|e| key: e.id.to_string(), label: e.user.clone(), network: Some(&e.network));
entity!(PostureCheck, Table::PostureChecks, SubjectKind::PostureCheck, posture_checks,
	|e| key: e.id.to_string(), label: e.name.clone(), network: Some(&e.network));
