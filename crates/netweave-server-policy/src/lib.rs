// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! ACL evaluation for the netweave control plane.
//!
//! [`Resolver`] turns a [`netweave_common_core::NetworkSnapshot`] into
//! tag and group membership maps; [`PolicyEngine`] answers reachability
//! questions and produces the firewall rules for a node. [`posture`]
//! judges devices against a network's posture checks.

pub mod engine;
pub mod error;
pub mod posture;
pub mod resolver;

pub use engine::PolicyEngine;
pub use error::{PolicyError, Result};
pub use resolver::{group_map, Member, MemberKind, Resolver};
