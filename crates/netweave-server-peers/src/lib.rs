// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Peer lists, DNS and status for the netweave control plane.
//!
//! Everything in this crate is computed from a
//! [`netweave_common_core::NetworkSnapshot`]; nothing reads live state.

pub mod computer;
pub mod dns;
pub mod error;
pub mod status;

pub use computer::{PeerComputer, SERVER_KEEPALIVE_SECS};
pub use dns::render_hosts;
pub use error::{PeersError, Result};
pub use status::{StatusEngine, DEFAULT_CHECKIN_THRESHOLD_SECS};
