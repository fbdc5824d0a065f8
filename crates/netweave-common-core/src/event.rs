// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Activity events written on every material mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::ids::NetworkId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
	Create,
	Update,
	Delete,
	Connect,
	Disconnect,
	JitRequest,
	JitApprove,
	JitDeny,
	JitExpire,
	EnableJit,
	DisableJit,
}

impl fmt::Display for EventAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			EventAction::Create => "create",
			EventAction::Update => "update",
			EventAction::Delete => "delete",
			EventAction::Connect => "connect",
			EventAction::Disconnect => "disconnect",
			EventAction::JitRequest => "jit_request",
			EventAction::JitApprove => "jit_approve",
			EventAction::JitDeny => "jit_deny",
			EventAction::JitExpire => "jit_expire",
			EventAction::EnableJit => "enable_jit",
			EventAction::DisableJit => "disable_jit",
		};
		f.write_str(s)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
	Host,
	Node,
	Network,
	ExtClient,
	Acl,
	Tag,
	Egress,
	User,
	UserGroup,
	Role,
	JitRequest,
	JitGrant,
	PostureCheck,
	Relay,
	AutoRelay,
	Ingress,
	InternetGateway,
	FailOver,
	Settings,
}

impl fmt::Display for SubjectKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		// serde names double as display names
		let s = serde_json::to_value(self)
			.ok()
			.and_then(|v| v.as_str().map(str::to_string))
			.unwrap_or_default();
		f.write_str(&s)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
	Api,
	Mqtt,
	Scheduler,
	Startup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
	pub id: String,
	pub name: String,
	pub kind: SubjectKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDiff {
	pub old: serde_json::Value,
	pub new: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	pub id: Uuid,
	pub actor: String,
	pub action: EventAction,
	pub subject: Subject,
	#[serde(default)]
	pub diff: Option<EventDiff>,
	#[serde(default)]
	pub network: Option<NetworkId>,
	pub origin: Origin,
	pub ts: DateTime<Utc>,
}

impl Event {
	pub fn builder(action: EventAction, kind: SubjectKind, subject_id: impl Into<String>) -> EventBuilder {
		EventBuilder::new(action, kind, subject_id)
	}
}

pub struct EventBuilder {
	actor: Option<String>,
	action: EventAction,
	subject: Subject,
	diff: Option<EventDiff>,
	network: Option<NetworkId>,
	origin: Origin,
}

impl EventBuilder {
	pub fn new(action: EventAction, kind: SubjectKind, subject_id: impl Into<String>) -> Self {
		let id = subject_id.into();
		Self {
			actor: None,
			action,
			subject: Subject {
				name: id.clone(),
				id,
				kind,
			},
			diff: None,
			network: None,
			origin: Origin::Api,
		}
	}

	pub fn actor(mut self, actor: impl Into<String>) -> Self {
		self.actor = Some(actor.into());
		self
	}

	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.subject.name = name.into();
		self
	}

	pub fn network(mut self, network: &NetworkId) -> Self {
		self.network = Some(network.clone());
		self
	}

	pub fn origin(mut self, origin: Origin) -> Self {
		self.origin = origin;
		self
	}

	/// Attach before/after states. Values that fail to serialize become null.
	pub fn diff<T: Serialize>(mut self, old: Option<&T>, new: Option<&T>) -> Self {
		let to_value = |v: Option<&T>| {
			v.and_then(|v| serde_json::to_value(v).ok())
				.unwrap_or(serde_json::Value::Null)
		};
		self.diff = Some(EventDiff {
			old: to_value(old),
			new: to_value(new),
		});
		self
	}

	pub fn build(self) -> Event {
		Event {
			id: Uuid::new_v4(),
			actor: self.actor.unwrap_or_else(|| "system".to_string()),
			action: self.action,
			subject: self.subject,
			diff: self.diff,
			network: self.network,
			origin: self.origin,
			ts: Utc::now(),
		}
	}
}
