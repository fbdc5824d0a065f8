// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Role transitions for relay, auto-relay, ingress, egress, internet
//! gateway and failover nodes.
//!
//! Roles are orthogonal flags on a node. Every transition keeps both sides
//! of the cross-node references consistent, commits under the per-node
//! locks of the store and then republishes the affected network.

mod auto_relay;
pub mod error;
mod failover;
mod ingress;
mod internet;
mod relay;
mod service;

pub use error::{GatewayError, Result};
pub use service::{GatewayService, Transition};
