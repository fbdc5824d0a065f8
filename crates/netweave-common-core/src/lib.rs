// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Domain model for the netweave control plane.
//!
//! Everything in this crate is plain data: identities, entity records,
//! the wire messages pushed to hosts, and [`NetworkSnapshot`], the cloned
//! read model that the policy and peer engines evaluate against.

pub mod acl;
pub mod egress;
pub mod error;
pub mod event;
pub mod ext_client;
pub mod fixtures;
pub mod host;
pub mod ids;
pub mod jit;
pub mod metrics;
pub mod network;
pub mod node;
pub mod posture;
pub mod snapshot;
pub mod status;
pub mod tag;
pub mod user;
pub mod wire;

pub use acl::{Acl, AclTag, AclTagKind, Direction, Protocol, RuleType};
pub use egress::Egress;
pub use error::ErrorKind;
pub use event::{Event, EventAction, EventBuilder, EventDiff, Origin, Subject, SubjectKind};
pub use ext_client::ExtClient;
pub use host::{Host, HostOs};
pub use ids::{AclId, EgressId, HostId, JitGrantId, JitRequestId, NetworkId, NodeId, PostureCheckId, RoleId, TagId,
	UserGroupId,
};
pub use jit::{JitGrant, JitRequest, JitStatus};
pub use metrics::{Metrics, PeerMetric};
pub use network::{DnsEntry, Network};
pub use node::{Node, CURRENT_SCHEMA_VERSION};
pub use posture::{
	ClientFacts, DeviceInfo, PostureAttribute, PostureCheck, PostureReport, PostureState, PostureSubject,
	Severity, Violation,
};
pub use snapshot::NetworkSnapshot;
pub use status::NodeStatus;
pub use tag::Tag;
pub use user::{PlatformRole, Role, User, UserGroup};
pub use wire::{
	dedup_rules, FwRule, HostAction, HostUpdate, NodeAction, NodeUpdate, PeerConfig, PeerRouteInfo,
	PeerUpdate, Signal, SignalAction,
};
