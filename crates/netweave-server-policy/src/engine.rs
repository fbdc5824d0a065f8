// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;

use ipnet::IpNet;
use netweave_common_core::{
	dedup_rules, Acl, AclTag, AclTagKind, Direction, Egress, EgressId, FwRule, NetworkSnapshot, Node,
	NodeId, Protocol, RuleType,
};
use tracing::trace;

use crate::error::{PolicyError, Result};
use crate::resolver::{Member, Resolver};

/// Evaluates a network's policies against one snapshot.
///
/// Construction resolves tags and groups once; every query after that is
/// a pure function of the snapshot.
pub struct PolicyEngine<'a> {
	snap: &'a NetworkSnapshot,
	resolver: Resolver,
}

impl<'a> PolicyEngine<'a> {
	pub fn new(snap: &'a NetworkSnapshot) -> Self {
		Self {
			snap,
			resolver: Resolver::new(snap),
		}
	}

	pub fn snapshot(&self) -> &'a NetworkSnapshot {
		self.snap
	}

	pub fn resolver(&self) -> &Resolver {
		&self.resolver
	}

	pub fn member(&self, id: &str) -> Option<&Member> {
		self.resolver.member(id)
	}

	pub fn node_member(&self, id: &NodeId) -> Result<&Member> {
		self.resolver
			.member(&id.to_string())
			.ok_or_else(|| PolicyError::UnknownNode(id.to_string()))
	}

	fn default_enabled(&self, rule_type: RuleType) -> bool {
		self.snap.default_policy(rule_type).is_some()
	}

	fn egress(&self, value: &str) -> Vec<&'a Egress> {
		match value.parse::<EgressId>() {
			Ok(id) => self.snap.egresses.get(&id).into_iter().collect(),
			Err(_) => match value.parse::<IpNet>() {
				Ok(net) => self
					.snap
					.egresses
					.values()
					.filter(|e| e.ranges().contains(&net))
					.collect(),
				Err(_) => Vec::new(),
			},
		}
	}

	/// Egress rules named by a destination tag that `m` routes for.
	fn egress_hits(&self, tag: &AclTag, m: &Member) -> Vec<&'a Egress> {
		match tag.kind {
			AclTagKind::Egress | AclTagKind::EgressRange => self
				.egress(&tag.value)
				.into_iter()
				.filter(|e| e.status && m.in_egress(e))
				.collect(),
			_ => Vec::new(),
		}
	}

	/// Whether a device-side tag covers `m`. Unknown references never match.
	fn tag_matches(&self, tag: &AclTag, m: &Member) -> bool {
		if tag.is_wildcard() {
			return !m.is_remote_access();
		}
		match tag.kind {
			AclTagKind::Node => tag.value == m.id,
			AclTagKind::NodeTag => m.tags.iter().any(|t| t.as_str() == tag.value),
			AclTagKind::Egress | AclTagKind::EgressRange => !self.egress_hits(tag, m).is_empty(),
			AclTagKind::User | AclTagKind::UserGroup | AclTagKind::Wildcard => false,
		}
	}

	fn side_matches(&self, tags: &[AclTag], m: &Member) -> bool {
		tags.iter().any(|t| self.tag_matches(t, m))
	}

	/// `policy` lets traffic start at `from` and reach `to`.
	fn permits(&self, policy: &Acl, from: &Member, to: &Member) -> bool {
		if from.denied.contains(&policy.id) || to.denied.contains(&policy.id) {
			return false;
		}
		let forward = self.side_matches(&policy.src, from) && self.side_matches(&policy.dst, to);
		let reverse = policy.direction == Direction::Bi
			&& self.side_matches(&policy.dst, from)
			&& self.side_matches(&policy.src, to);
		forward || reverse
	}

	/// Enabled device policies permitting `from` to reach `to`.
	pub fn allowed_policies(&self, from: &Member, to: &Member) -> Vec<&'a Acl> {
		self.snap
			.policies(RuleType::DevicePolicy)
			.filter(|p| self.permits(p, from, to))
			.collect()
	}

	/// Whether `node` and `peer` must appear in each other's peer lists.
	///
	/// Either direction is enough; the tunnel is needed for one-way
	/// policies too. Remote-access clients are judged by their owner's
	/// user policies.
	pub fn is_peer_allowed(&self, node: &Member, peer: &Member, check_default: bool) -> bool {
		if let Some(owner) = node.remote_user() {
			return self.is_user_allowed(owner, peer);
		}
		if let Some(owner) = peer.remote_user() {
			return self.is_user_allowed(owner, node);
		}
		if check_default && self.default_enabled(RuleType::DevicePolicy) {
			return true;
		}
		let allowed = !self.allowed_policies(node, peer).is_empty()
			|| !self.allowed_policies(peer, node).is_empty();
		trace!(node = %node.id, peer = %peer.id, allowed, "peer policy check");
		allowed
	}

	pub fn is_node_allowed(&self, node: &NodeId, peer: &NodeId, check_default: bool) -> Result<bool> {
		let a = self.node_member(node)?;
		let b = self.node_member(peer)?;
		Ok(self.is_peer_allowed(a, b, check_default))
	}

	/// Enabled user policies whose source names `username`.
	pub fn policies_of_user(&self, username: &str) -> Vec<&'a Acl> {
		self.snap
			.policies(RuleType::UserPolicy)
			.filter(|p| self.resolver.users_in(&p.src, self.snap).contains(username))
			.collect()
	}

	fn user_dst_matches(&self, policy: &Acl, m: &Member) -> bool {
		policy.dst.iter().any(|t| t.is_wildcard() || self.tag_matches(t, m))
	}

	/// Whether `username` may reach `m` through a user policy.
	pub fn is_user_allowed(&self, username: &str, m: &Member) -> bool {
		if self.default_enabled(RuleType::UserPolicy) {
			return true;
		}
		if !self.snap.users.contains_key(username) {
			return false;
		}
		self.policies_of_user(username)
			.into_iter()
			.any(|p| self.user_dst_matches(p, m))
	}

	/// Firewall rules installed on `node`.
	///
	/// Evaluation order:
	/// 1. Device policies, or the default short-circuit rule
	/// 2. User policies, or the default short-circuit rule
	/// 3. Deduplication on `(src, dst, proto, ports)`
	pub fn fw_rules(&self, node: &Node) -> Vec<FwRule> {
		let target = Member::from_node(node);
		let mut rules = Vec::new();

		if self.default_enabled(RuleType::DevicePolicy) {
			rules.extend(self.default_device_rule(node, &target));
		} else {
			for policy in self.snap.policies(RuleType::DevicePolicy) {
				rules.extend(self.device_rules(policy, node, &target));
			}
		}

		if self.default_enabled(RuleType::UserPolicy) {
			rules.extend(self.default_user_rule(&target));
		} else {
			for policy in self.snap.policies(RuleType::UserPolicy) {
				rules.extend(self.user_rules(policy, &target));
			}
		}

		dedup_rules(rules)
	}

	pub fn fw_rules_for(&self, id: &NodeId) -> Result<Vec<FwRule>> {
		let node = self
			.snap
			.node(id)
			.ok_or_else(|| PolicyError::UnknownNode(id.to_string()))?;
		Ok(self.fw_rules(node))
	}

	/// With the default device policy on there are no per-peer rules; one
	/// rule admits the ingress gateways and their clients.
	fn default_device_rule(&self, node: &Node, target: &Member) -> Option<FwRule> {
		let mut src: Vec<IpNet> = self
			.resolver
			.members()
			.filter(|m| !m.attached_to(&node.id) && m.id != target.id)
			.filter(|m| match m.node_id() {
				Some(id) => self.snap.node(&id).map_or(false, |n| n.is_ingress_gateway),
				None => true,
			})
			.flat_map(|m| m.routes.iter().copied())
			.collect();
		src.sort();
		src.dedup();
		if src.is_empty() || target.routes.is_empty() {
			return None;
		}
		Some(FwRule::allow(src, target.routes.clone(), Protocol::All, Vec::new()))
	}

	fn device_rules(&self, policy: &Acl, node: &Node, target: &Member) -> Vec<FwRule> {
		let sources: Vec<&Member> = self
			.resolver
			.members()
			.filter(|m| m.id != target.id && !m.attached_to(&node.id) && !m.is_remote_access())
			.filter(|m| self.permits(policy, m, target))
			.collect();
		if sources.is_empty() {
			return Vec::new();
		}
		let mut src: Vec<IpNet> = sources.iter().flat_map(|m| m.routes.iter().copied()).collect();
		src.sort();
		src.dedup();

		let mut out = Vec::new();
		if !target.routes.is_empty() {
			out.push(FwRule::allow(
				src.clone(),
				target.routes.clone(),
				policy.protocol,
				policy.ports.clone(),
			));
		}
		let egress_dst = self.egress_ranges_in(&policy.dst, target);
		if !egress_dst.is_empty() {
			out.push(FwRule::allow(src, egress_dst, policy.protocol, policy.ports.clone()));
		}
		out
	}

	fn egress_ranges_in(&self, tags: &[AclTag], target: &Member) -> Vec<IpNet> {
		let ranges: BTreeSet<IpNet> = tags
			.iter()
			.flat_map(|t| self.egress_hits(t, target))
			.flat_map(|e| e.ranges())
			.collect();
		ranges.into_iter().collect()
	}

	fn remote_clients(&self) -> impl Iterator<Item = &Member> {
		self.resolver.members().filter(|m| {
			m.is_remote_access()
				&& matches!(m.kind, crate::resolver::MemberKind::ExtClient { enabled: true, .. })
		})
	}

	fn default_user_rule(&self, target: &Member) -> Option<FwRule> {
		let mut src: Vec<IpNet> = self
			.remote_clients()
			.flat_map(|m| m.routes.iter().copied())
			.collect();
		src.sort();
		src.dedup();
		if src.is_empty() || target.routes.is_empty() {
			return None;
		}
		Some(FwRule::allow(src, target.routes.clone(), Protocol::All, Vec::new()))
	}

	fn user_rules(&self, policy: &Acl, target: &Member) -> Vec<FwRule> {
		let direct = policy
			.dst
			.iter()
			.any(|t| t.is_wildcard() || (!is_egress(t) && self.tag_matches(t, target)));
		let egress_dst = self.egress_ranges_in(&policy.dst, target);
		if !direct && egress_dst.is_empty() {
			return Vec::new();
		}

		let users = self.resolver.users_in(&policy.src, self.snap);
		let mut out = Vec::new();
		for client in self.remote_clients() {
			let owned = client.remote_user().map_or(false, |u| users.contains(u));
			if !owned || client.denied.contains(&policy.id) || client.routes.is_empty() {
				continue;
			}
			if direct && !target.routes.is_empty() {
				out.push(FwRule::allow(
					client.routes.clone(),
					target.routes.clone(),
					policy.protocol,
					policy.ports.clone(),
				));
			}
			if !egress_dst.is_empty() {
				out.push(FwRule::allow(
					client.routes.clone(),
					egress_dst.clone(),
					policy.protocol,
					policy.ports.clone(),
				));
			}
		}
		out
	}
}

fn is_egress(tag: &AclTag) -> bool {
	matches!(tag.kind, AclTagKind::Egress | AclTagKind::EgressRange)
}

#[cfg(test)]
mod tests {
	use super::*;
	use netweave_common_core::fixtures::{self, add_ext_client, add_node, node_mut, set_default_policy};
	use netweave_common_core::{PlatformRole, TagId, User, UserGroup, UserGroupId};
	use proptest::prelude::*;

	fn snap() -> NetworkSnapshot {
		fixtures::network("n1", "10.0.0.0/24".parse().unwrap())
	}

	fn closed() -> NetworkSnapshot {
		let mut s = snap();
		set_default_policy(&mut s, RuleType::DevicePolicy, false);
		set_default_policy(&mut s, RuleType::UserPolicy, false);
		s
	}

	fn device(s: &NetworkSnapshot, src: Vec<AclTag>, dst: Vec<AclTag>, direction: Direction) -> Acl {
		let mut acl = Acl::new(s.network.id.clone(), "p", RuleType::DevicePolicy, src, dst);
		acl.direction = direction;
		acl
	}

	fn node_tag(id: &NodeId) -> AclTag {
		AclTag::new(AclTagKind::Node, id.to_string())
	}

	#[test]
	fn default_policy_allows_everything() {
		let mut s = snap();
		let a = add_node(&mut s, "a", "10.0.0.1".parse().unwrap());
		let b = add_node(&mut s, "b", "10.0.0.2".parse().unwrap());
		let engine = PolicyEngine::new(&s);
		assert!(engine.is_node_allowed(&a, &b, true).unwrap());
		// without the short-circuit the default wildcard still matches as a policy
		assert!(engine.is_node_allowed(&a, &b, false).unwrap());
		let a_member = engine.node_member(&a).unwrap();
		let b_member = engine.node_member(&b).unwrap();
		assert!(engine.allowed_policies(a_member, b_member).iter().all(|p| p.default));

		set_default_policy(&mut s, RuleType::DevicePolicy, false);
		let engine = PolicyEngine::new(&s);
		assert!(!engine.is_node_allowed(&a, &b, true).unwrap());
		assert!(!engine.is_node_allowed(&a, &b, false).unwrap());
	}

	#[test]
	fn uni_policy_still_needs_a_peer_both_ways() {
		let mut s = closed();
		let a = add_node(&mut s, "a", "10.0.0.1".parse().unwrap());
		let b = add_node(&mut s, "b", "10.0.0.2".parse().unwrap());
		let c = add_node(&mut s, "c", "10.0.0.3".parse().unwrap());
		s.acls.push(device(&s, vec![node_tag(&a)], vec![node_tag(&b)], Direction::Uni));

		let engine = PolicyEngine::new(&s);
		assert!(engine.is_node_allowed(&a, &b, true).unwrap());
		assert!(engine.is_node_allowed(&b, &a, true).unwrap());
		assert!(!engine.is_node_allowed(&a, &c, true).unwrap());

		let a_member = engine.node_member(&a).unwrap();
		let b_member = engine.node_member(&b).unwrap();
		assert_eq!(engine.allowed_policies(a_member, b_member).len(), 1);
		assert!(engine.allowed_policies(b_member, a_member).is_empty());
	}

	#[test]
	fn rules_follow_direction() {
		let mut s = closed();
		let a = add_node(&mut s, "a", "10.0.0.1".parse().unwrap());
		let b = add_node(&mut s, "b", "10.0.0.2".parse().unwrap());
		s.acls.push(device(&s, vec![node_tag(&a)], vec![node_tag(&b)], Direction::Uni));

		let engine = PolicyEngine::new(&s);
		let on_b = engine.fw_rules_for(&b).unwrap();
		assert_eq!(on_b.len(), 1);
		assert_eq!(on_b[0].src, vec!["10.0.0.1/32".parse::<IpNet>().unwrap()]);
		assert!(engine.fw_rules_for(&a).unwrap().is_empty());
	}

	#[test]
	fn deleted_references_are_skipped() {
		let mut s = closed();
		let a = add_node(&mut s, "a", "10.0.0.1".parse().unwrap());
		let b = add_node(&mut s, "b", "10.0.0.2".parse().unwrap());
		s.acls.push(device(
			&s,
			vec![AclTag::new(AclTagKind::Node, NodeId::new().to_string())],
			vec![AclTag::new(AclTagKind::Egress, EgressId::new().to_string())],
			Direction::Bi,
		));
		let engine = PolicyEngine::new(&s);
		assert!(!engine.is_node_allowed(&a, &b, true).unwrap());
		assert!(engine.fw_rules_for(&a).unwrap().is_empty());
	}

	#[test]
	fn egress_destination_expands_to_members_and_ranges() {
		let mut s = closed();
		let a = add_node(&mut s, "a", "10.0.0.1".parse().unwrap());
		let gw = add_node(&mut s, "gw", "10.0.0.3".parse().unwrap());
		let mut egress = Egress::new(s.network.id.clone(), "lan", Some("192.168.50.0/24".parse().unwrap()));
		egress.nodes.insert(gw);
		let egress_id = egress.id;
		s.egresses.insert(egress.id, egress);
		s.acls.push(device(
			&s,
			vec![node_tag(&a)],
			vec![AclTag::new(AclTagKind::Egress, egress_id.to_string())],
			Direction::Uni,
		));

		let engine = PolicyEngine::new(&s);
		assert!(engine.is_node_allowed(&a, &gw, true).unwrap());
		let rules = engine.fw_rules_for(&gw).unwrap();
		assert!(rules
			.iter()
			.any(|r| r.dst == vec!["192.168.50.0/24".parse::<IpNet>().unwrap()]));
	}

	#[test]
	fn user_policy_through_group_and_tag() {
		let mut s = closed();
		let a = add_node(&mut s, "a", "10.0.0.1".parse().unwrap());
		let b = add_node(&mut s, "b", "10.0.0.2".parse().unwrap());
		let tag = TagId::new("n1.web");
		node_mut(&mut s, &a).tags.insert(tag.clone());

		let group = UserGroup::new(UserGroupId::new("devs"));
		let mut user = User::new("u", PlatformRole::PlatformUser);
		user.groups.insert(group.id.clone());
		s.groups.insert(group.id.clone(), group);
		s.users.insert(user.username.clone(), user);
		s.acls.push(Acl::new(
			s.network.id.clone(),
			"devs-web",
			RuleType::UserPolicy,
			vec![AclTag::new(AclTagKind::UserGroup, "devs")],
			vec![AclTag::new(AclTagKind::NodeTag, tag.as_str())],
		));

		let engine = PolicyEngine::new(&s);
		assert!(engine.is_user_allowed("u", engine.node_member(&a).unwrap()));
		assert!(!engine.is_user_allowed("u", engine.node_member(&b).unwrap()));
		assert!(!engine.is_user_allowed("ghost", engine.node_member(&a).unwrap()));
	}

	#[test]
	fn user_rules_list_client_addresses() {
		let mut s = closed();
		let gw = add_node(&mut s, "gw", "10.0.0.1".parse().unwrap());
		let a = add_node(&mut s, "a", "10.0.0.2".parse().unwrap());
		s.users
			.insert("u".into(), User::new("u", PlatformRole::PlatformUser));
		add_ext_client(&mut s, gw, "phone", "10.0.0.50".parse().unwrap(), Some("u"));
		s.acls.push(Acl::new(
			s.network.id.clone(),
			"u-a",
			RuleType::UserPolicy,
			vec![AclTag::new(AclTagKind::User, "u")],
			vec![node_tag(&a)],
		));

		let engine = PolicyEngine::new(&s);
		let rules = engine.fw_rules_for(&a).unwrap();
		assert_eq!(rules.len(), 1);
		assert_eq!(rules[0].src, vec!["10.0.0.50/32".parse::<IpNet>().unwrap()]);
		assert_eq!(rules[0].dst, vec!["10.0.0.2/32".parse::<IpNet>().unwrap()]);

		let phone = engine.member("phone").unwrap();
		assert!(engine.is_peer_allowed(phone, engine.node_member(&a).unwrap(), true));
		assert!(!engine.is_peer_allowed(phone, engine.node_member(&gw).unwrap(), true));
	}

	#[test]
	fn denied_acl_blocks_client() {
		let mut s = closed();
		let gw = add_node(&mut s, "gw", "10.0.0.1".parse().unwrap());
		let a = add_node(&mut s, "a", "10.0.0.2".parse().unwrap());
		add_ext_client(&mut s, gw, "printer", "10.0.0.60".parse().unwrap(), None);
		let acl = device(&s, vec![AclTag::wildcard()], vec![AclTag::wildcard()], Direction::Bi);
		let acl_id = acl.id;
		s.acls.push(acl);
		s.ext_clients.get_mut("printer").unwrap().denied_acls.insert(acl_id);

		let engine = PolicyEngine::new(&s);
		let printer = engine.member("printer").unwrap();
		assert!(!engine.is_peer_allowed(printer, engine.node_member(&a).unwrap(), true));
		assert!(engine.is_node_allowed(&gw, &a, true).unwrap());
	}

	proptest! {
		#[test]
		fn peer_check_is_symmetric(pairs in proptest::collection::vec((0usize..5, 0usize..5, any::<bool>()), 0..6)) {
			let mut s = closed();
			let ids: Vec<NodeId> = (0..5)
				.map(|i| add_node(&mut s, &format!("h{i}"), format!("10.0.0.{}", i + 1).parse().unwrap()))
				.collect();
			for (src, dst, bi) in pairs {
				let direction = if bi { Direction::Bi } else { Direction::Uni };
				let acl = device(&s, vec![node_tag(&ids[src])], vec![node_tag(&ids[dst])], direction);
				s.acls.push(acl);
			}
			let engine = PolicyEngine::new(&s);
			for a in &ids {
				for b in &ids {
					prop_assert_eq!(
						engine.is_node_allowed(a, b, true).unwrap(),
						engine.is_node_allowed(b, a, true).unwrap()
					);
				}
			}
		}

		#[test]
		fn adding_an_allow_rule_never_removes_a_pair(
			pairs in proptest::collection::vec((0usize..5, 0usize..5, any::<bool>()), 0..6),
			extra in (0usize..5, 0usize..5, any::<bool>()),
		) {
			let mut s = closed();
			let ids: Vec<NodeId> = (0..5)
				.map(|i| add_node(&mut s, &format!("h{i}"), format!("10.0.0.{}", i + 1).parse().unwrap()))
				.collect();
			let rule = |s: &NetworkSnapshot, (src, dst, bi): (usize, usize, bool)| {
				let direction = if bi { Direction::Bi } else { Direction::Uni };
				device(s, vec![node_tag(&ids[src])], vec![node_tag(&ids[dst])], direction)
			};
			for pair in pairs {
				let acl = rule(&s, pair);
				s.acls.push(acl);
			}
			let allowed = |s: &NetworkSnapshot| {
				let engine = PolicyEngine::new(s);
				let mut out = Vec::new();
				for a in &ids {
					for b in &ids {
						if engine.is_node_allowed(a, b, true).unwrap() {
							out.push((*a, *b));
						}
					}
				}
				out
			};

			let before = allowed(&s);
			let acl = rule(&s, extra);
			s.acls.push(acl);
			let after = allowed(&s);
			for pair in &before {
				prop_assert!(after.contains(pair), "{:?} lost after adding a rule", pair);
			}
			prop_assert!(after.contains(&(ids[extra.0], ids[extra.1])));
		}
	}
}
