// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tag and group membership for one network.
//!
//! Everything here is computed from a [`NetworkSnapshot`] and owns its
//! data, so evaluation never touches live entities.

use std::collections::{BTreeMap, BTreeSet};

use ipnet::IpNet;
use netweave_common_core::{
	AclId, AclTag, AclTagKind, Egress, ExtClient, NetworkSnapshot, Node, NodeId, TagId, UserGroupId,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind {
	Node(NodeId),
	ExtClient {
		ingress: NodeId,
		owner: Option<String>,
		remote_access: bool,
		enabled: bool,
	},
}

/// A policy participant: a node, or an ext-client viewed as one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
	/// Node uuid or ext-client id; this is also the member's own tag.
	pub id: String,
	pub kind: MemberKind,
	pub tags: BTreeSet<TagId>,
	pub routes: Vec<IpNet>,
	pub denied: BTreeSet<AclId>,
}

impl Member {
	pub fn from_node(node: &Node) -> Self {
		Self {
			id: node.id.to_string(),
			kind: MemberKind::Node(node.id),
			tags: node.tags.clone(),
			routes: node.host_routes(),
			denied: BTreeSet::new(),
		}
	}

	pub fn from_ext_client(client: &ExtClient) -> Self {
		Self {
			id: client.client_id.clone(),
			kind: MemberKind::ExtClient {
				ingress: client.ingress_id,
				owner: client.owner.clone(),
				remote_access: !client.is_static(),
				enabled: client.enabled,
			},
			tags: client.tags.clone(),
			routes: client.host_routes(),
			denied: client.denied_acls.clone(),
		}
	}

	pub fn node_id(&self) -> Option<NodeId> {
		match self.kind {
			MemberKind::Node(id) => Some(id),
			MemberKind::ExtClient { .. } => None,
		}
	}

	/// The owning user of a remote-access client.
	pub fn remote_user(&self) -> Option<&str> {
		match &self.kind {
			MemberKind::ExtClient {
				remote_access: true,
				owner: Some(owner),
				..
			} => Some(owner),
			_ => None,
		}
	}

	pub fn is_remote_access(&self) -> bool {
		matches!(self.kind, MemberKind::ExtClient { remote_access: true, .. })
	}

	pub fn attached_to(&self, ingress: &NodeId) -> bool {
		matches!(&self.kind, MemberKind::ExtClient { ingress: i, .. } if i == ingress)
	}

	/// Egress membership is by node id or by a shared tag.
	pub fn in_egress(&self, egress: &Egress) -> bool {
		let by_id = self.node_id().map_or(false, |id| egress.nodes.contains(&id));
		by_id || self.tags.iter().any(|t| egress.tags.contains(t))
	}
}

/// Resolved memberships of one network.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
	members: BTreeMap<String, Member>,
	tags: BTreeMap<String, Vec<String>>,
	groups: BTreeMap<UserGroupId, BTreeSet<String>>,
}

impl Resolver {
	pub fn new(snap: &NetworkSnapshot) -> Self {
		let mut members = BTreeMap::new();
		for node in snap.nodes.values() {
			let m = Member::from_node(node);
			members.insert(m.id.clone(), m);
		}
		for client in snap.ext_clients.values() {
			let m = Member::from_ext_client(client);
			members.insert(m.id.clone(), m);
		}

		let mut tags: BTreeMap<String, Vec<String>> = BTreeMap::new();
		for m in members.values() {
			for tag in &m.tags {
				tags.entry(tag.to_string()).or_default().push(m.id.clone());
			}
			if !m.is_remote_access() {
				tags.entry(AclTag::WILDCARD.to_string())
					.or_default()
					.push(m.id.clone());
			}
		}

		Self {
			members,
			tags,
			groups: group_map(snap),
		}
	}

	pub fn member(&self, id: &str) -> Option<&Member> {
		self.members.get(id)
	}

	pub fn members(&self) -> impl Iterator<Item = &Member> {
		self.members.values()
	}

	/// Members carrying `tag`. The wildcard covers every node and every
	/// non-remote-access ext-client.
	pub fn tag_members(&self, tag: &str) -> impl Iterator<Item = &Member> {
		self.tags
			.get(tag)
			.into_iter()
			.flatten()
			.filter_map(|id| self.members.get(id))
	}

	pub fn group_members(&self, group: &UserGroupId) -> Option<&BTreeSet<String>> {
		self.groups.get(group)
	}

	pub fn groups(&self) -> &BTreeMap<UserGroupId, BTreeSet<String>> {
		&self.groups
	}

	/// Users named by the source side of a user policy.
	pub fn users_in(&self, tags: &[AclTag], snap: &NetworkSnapshot) -> BTreeSet<String> {
		let mut out = BTreeSet::new();
		for tag in tags {
			match tag.kind {
				_ if tag.is_wildcard() => out.extend(snap.users.keys().cloned()),
				AclTagKind::User if snap.users.contains_key(&tag.value) => {
					out.insert(tag.value.clone());
				}
				AclTagKind::UserGroup => {
					if let Some(users) = self.groups.get(&UserGroupId::new(tag.value.as_str())) {
						out.extend(users.iter().cloned());
					}
				}
				_ => {}
			}
		}
		out
	}
}

/// Group id to usernames: direct memberships plus the network's default
/// admin and user groups reached through roles.
pub fn group_map(snap: &NetworkSnapshot) -> BTreeMap<UserGroupId, BTreeSet<String>> {
	let net = &snap.network.id;
	let admin_group = UserGroupId::network_admin(net);
	let user_group = UserGroupId::network_user(net);
	let mut out: BTreeMap<UserGroupId, BTreeSet<String>> = BTreeMap::new();

	for user in snap.users.values() {
		for group in &user.groups {
			out.entry(group.clone()).or_default().insert(user.username.clone());
		}

		let inherited = user
			.groups
			.iter()
			.filter_map(|g| snap.groups.get(g))
			.flat_map(|g| g.roles_in(net));
		let roles: Vec<_> = user.roles_in(net).chain(inherited).collect();

		let is_admin = user.platform_role.is_admin()
			|| roles
				.iter()
				.any(|r| snap.roles.get(*r).map_or(false, |role| role.network_admin));
		let is_user = roles
			.iter()
			.any(|r| snap.roles.get(*r).map_or(true, |role| !role.network_admin));

		if is_admin {
			out.entry(admin_group.clone()).or_default().insert(user.username.clone());
		}
		if is_user {
			out.entry(user_group.clone()).or_default().insert(user.username.clone());
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use netweave_common_core::fixtures::{self, add_ext_client, add_node, node_mut};
	use netweave_common_core::{PlatformRole, RoleId, User, UserGroup};

	fn snap() -> NetworkSnapshot {
		fixtures::network("n1", "10.0.0.0/24".parse().unwrap())
	}

	#[test]
	fn wildcard_excludes_remote_access_clients() {
		let mut s = snap();
		let gw = add_node(&mut s, "gw", "10.0.0.1".parse().unwrap());
		add_ext_client(&mut s, gw, "static", "10.0.0.10".parse().unwrap(), None);
		add_ext_client(&mut s, gw, "phone", "10.0.0.11".parse().unwrap(), Some("u"));

		let r = Resolver::new(&s);
		let ids: BTreeSet<_> = r.tag_members("*").map(|m| m.id.clone()).collect();
		assert!(ids.contains(&gw.to_string()));
		assert!(ids.contains("static"));
		assert!(!ids.contains("phone"));
	}

	#[test]
	fn node_tags_index_members() {
		let mut s = snap();
		let a = add_node(&mut s, "a", "10.0.0.1".parse().unwrap());
		add_node(&mut s, "b", "10.0.0.2".parse().unwrap());
		let tag = TagId::new("n1.db");
		node_mut(&mut s, &a).tags.insert(tag.clone());

		let r = Resolver::new(&s);
		let tagged: Vec<_> = r.tag_members(tag.as_str()).collect();
		assert_eq!(tagged.len(), 1);
		assert_eq!(tagged[0].node_id(), Some(a));
	}

	#[test]
	fn roles_place_users_in_default_groups() {
		let mut s = snap();
		let net = s.network.id.clone();

		let mut admin = User::new("root", PlatformRole::PlatformUser);
		admin.network_roles.insert(
			"*".to_string(),
			BTreeSet::from([RoleId::new(RoleId::GLOBAL_NETWORK_ADMIN)]),
		);
		s.roles.insert(
			RoleId::new(RoleId::GLOBAL_NETWORK_ADMIN),
			netweave_common_core::Role {
				id: RoleId::new(RoleId::GLOBAL_NETWORK_ADMIN),
				network: None,
				default: true,
				full_access: true,
				network_admin: true,
			},
		);

		let mut member = User::new("member", PlatformRole::PlatformUser);
		let mut custom = UserGroup::new(UserGroupId::new("ops"));
		custom
			.network_roles
			.insert("n1".to_string(), BTreeSet::from([RoleId::network_user(&net)]));
		member.groups.insert(custom.id.clone());
		s.groups.insert(custom.id.clone(), custom);

		let boss = User::new("boss", PlatformRole::SuperAdmin);
		for u in [admin, member, boss] {
			s.users.insert(u.username.clone(), u);
		}

		let map = group_map(&s);
		let admins = &map[&UserGroupId::network_admin(&net)];
		assert!(admins.contains("root") && admins.contains("boss"));
		assert!(!admins.contains("member"));
		assert!(map[&UserGroupId::network_user(&net)].contains("member"));
		assert!(map[&UserGroupId::new("ops")].contains("member"));
	}
}
