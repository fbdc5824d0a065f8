// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Best-effort email for the request workflow. A failed or disabled
//! mailer never fails the operation that triggered the message.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use netweave_common_core::{JitGrant, JitRequest, User};
use netweave_server_smtp::{Email, Mailer};
use tracing::{debug, warn};

fn stamp(t: DateTime<Utc>) -> String {
	t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// "5 hours", "2 day(s)", "3 week(s)".
pub fn describe_duration(hours: i64) -> String {
	match hours {
		h if h < 24 => format!("{h} hours"),
		h if h < 24 * 7 => format!("{} day(s)", h / 24),
		h if h < 24 * 30 => format!("{} week(s)", h / (24 * 7)),
		h => format!("{} month(s)", h / (24 * 30)),
	}
}

fn html_list(items: &[(&str, String)]) -> String {
	let rows: String = items
		.iter()
		.map(|(k, v)| format!("<li><strong>{k}:</strong> {v}</li>"))
		.collect();
	format!("<ul>{rows}</ul>")
}

fn text_list(items: &[(&str, String)]) -> String {
	items.iter().map(|(k, v)| format!("{k}: {v}\n")).collect()
}

pub fn request_email(to: &str, request: &JitRequest) -> Email {
	let reason = if request.reason.is_empty() {
		"(none given)".to_string()
	} else {
		request.reason.clone()
	};
	let items = [
		("User", request.user.clone()),
		("Network", request.network.to_string()),
		("Requested At", stamp(request.requested_at)),
		("Reason", reason),
	];
	Email {
		to: to.to_string(),
		subject: format!("JIT Access Request: {} requests access to {}", request.user, request.network),
		text: format!(
			"User {} has requested just-in-time access to network {}.\n\n{}",
			request.user,
			request.network,
			text_list(&items)
		),
		html: format!(
			"<p>User <strong>{}</strong> has requested just-in-time access to network <strong>{}</strong>.</p>{}",
			request.user,
			request.network,
			html_list(&items)
		),
	}
}

pub fn approved_email(to: &str, grant: &JitGrant, request: &JitRequest) -> Email {
	let items = [
		("Network", grant.network.to_string()),
		("Duration", describe_duration(request.duration_hours)),
		("Granted At", stamp(grant.granted_at)),
		("Expires At", stamp(grant.expires_at)),
	];
	Email {
		to: to.to_string(),
		subject: format!("JIT Access Approved: {}", grant.network),
		text: format!(
			"Your request for just-in-time access to network {} has been approved.\n\n{}",
			grant.network,
			text_list(&items)
		),
		html: format!(
			"<p>Your request for just-in-time access to network <strong>{}</strong> has been approved.</p>{}",
			grant.network,
			html_list(&items)
		),
	}
}

pub fn ended_email(to: &str, grant: &JitGrant, revoked: bool) -> Email {
	let (subject, what) = if revoked {
		("Revoked", "has been revoked by an administrator")
	} else {
		("Expired", "has expired")
	};
	let items = [
		("Network", grant.network.to_string()),
		("Granted At", stamp(grant.granted_at)),
		("Expired At", stamp(grant.expires_at)),
	];
	Email {
		to: to.to_string(),
		subject: format!("JIT Access {subject}: {}", grant.network),
		text: format!(
			"Your just-in-time access to network {} {what}.\n\n{}",
			grant.network,
			text_list(&items)
		),
		html: format!(
			"<p>Your just-in-time access to network <strong>{}</strong> {what}.</p>{}",
			grant.network,
			html_list(&items)
		),
	}
}

#[derive(Clone, Default)]
pub struct Notifier {
	mailer: Option<Arc<dyn Mailer>>,
}

impl Notifier {
	pub fn new(mailer: Option<Arc<dyn Mailer>>) -> Self {
		Self { mailer }
	}

	pub fn is_enabled(&self) -> bool {
		self.mailer.is_some()
	}

	async fn deliver(&self, email: Email) {
		let Some(mailer) = &self.mailer else {
			debug!(subject = %email.subject, "mail disabled, skipping");
			return;
		};
		if let Err(e) = mailer.send(&email).await {
			warn!(to = %email.to, subject = %email.subject, error = %e, "notification not sent");
		}
	}

	pub async fn request_submitted(&self, request: &JitRequest, admins: &[User]) {
		for admin in admins {
			if let Some(to) = &admin.email {
				self.deliver(request_email(to, request)).await;
			}
		}
	}

	pub async fn approved(&self, user: Option<&User>, grant: &JitGrant, request: &JitRequest) {
		if let Some(to) = user.and_then(|u| u.email.as_deref()) {
			self.deliver(approved_email(to, grant, request)).await;
		}
	}

	pub async fn ended(&self, user: Option<&User>, grant: &JitGrant, revoked: bool) {
		if let Some(to) = user.and_then(|u| u.email.as_deref()) {
			self.deliver(ended_email(to, grant, revoked)).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;
	use netweave_common_core::{JitGrantId, NetworkId};

	#[test]
	fn durations_read_naturally() {
		assert_eq!(describe_duration(1), "1 hours");
		assert_eq!(describe_duration(48), "2 day(s)");
		assert_eq!(describe_duration(24 * 14), "2 week(s)");
		assert_eq!(describe_duration(24 * 60), "2 month(s)");
	}

	#[test]
	fn expiry_and_revocation_subjects_differ() {
		let now = Utc::now();
		let mut request = JitRequest::new(NetworkId::from("n1"), "u", "");
		request.duration_hours = 2;
		let grant = JitGrant {
			id: JitGrantId::new(),
			network: request.network.clone(),
			user: "u".into(),
			request_id: request.id,
			granted_at: now,
			expires_at: now + Duration::hours(2),
		};
		assert_eq!(ended_email("u@example.com", &grant, false).subject, "JIT Access Expired: n1");
		assert_eq!(ended_email("u@example.com", &grant, true).subject, "JIT Access Revoked: n1");
		assert!(request_email("a@example.com", &request).text.contains("(none given)"));
		assert!(approved_email("u@example.com", &grant, &request).html.contains("2 hours"));
	}
}
