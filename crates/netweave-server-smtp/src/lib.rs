// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outbound email.
//!
//! Callers talk to the [`Mailer`] trait. [`SmtpClient`] sends through an
//! SMTP relay with [`lettre`]; [`MemoryMailer`] keeps messages in memory
//! and is what tests and mail-less deployments use.

use std::sync::Mutex;

use async_trait::async_trait;
use lettre::{
	message::{header::ContentType, Mailbox, MultiPart, SinglePart},
	transport::smtp::authentication::Credentials,
	AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use netweave_server_config::SmtpConfig;
use tracing::{debug, info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum SmtpError {
	#[error("connection failed: {0}")]
	Connection(String),

	#[error("send failed: {0}")]
	Send(String),

	#[error("invalid email address: {0}")]
	Address(String),
}

/// A multipart message with plain text and HTML bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
	pub to: String,
	pub subject: String,
	pub text: String,
	pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
	async fn send(&self, email: &Email) -> Result<(), SmtpError>;
}

pub struct SmtpClient {
	transport: AsyncSmtpTransport<Tokio1Executor>,
	from: Mailbox,
}

impl SmtpClient {
	/// Build the transport. No connection is made until the first send.
	#[instrument(
		name = "smtp_client_new",
		skip(config),
		fields(host = %config.host, port = %config.port, use_tls = %config.use_tls)
	)]
	pub fn new(config: &SmtpConfig) -> Result<Self, SmtpError> {
		let from: Mailbox = format!("{} <{}>", config.from_name, config.from_address)
			.parse()
			.map_err(|e| SmtpError::Address(format!("{e}")))?;

		let builder = if config.use_tls {
			AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
				.map_err(|e| SmtpError::Connection(format!("{e}")))?
		} else {
			AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
		};
		let mut builder = builder.port(config.port);
		if let (Some(username), Some(password)) = (&config.username, &config.password) {
			builder = builder.credentials(Credentials::new(username.clone(), password.expose().clone()));
		}

		debug!("smtp client initialized");
		Ok(Self {
			transport: builder.build(),
			from,
		})
	}

	pub async fn check_health(&self) -> Result<(), SmtpError> {
		self.transport
			.test_connection()
			.await
			.map_err(|e| SmtpError::Connection(format!("{e}")))?;
		Ok(())
	}
}

#[async_trait]
impl Mailer for SmtpClient {
	#[instrument(name = "smtp_send_email", skip(self, email), fields(to = %email.to, subject = %email.subject))]
	async fn send(&self, email: &Email) -> Result<(), SmtpError> {
		let to: Mailbox = email
			.to
			.parse()
			.map_err(|e| SmtpError::Address(format!("{e}")))?;

		let message = Message::builder()
			.from(self.from.clone())
			.to(to)
			.subject(email.subject.as_str())
			.multipart(
				MultiPart::alternative()
					.singlepart(
						SinglePart::builder()
							.header(ContentType::TEXT_PLAIN)
							.body(email.text.clone()),
					)
					.singlepart(
						SinglePart::builder()
							.header(ContentType::TEXT_HTML)
							.body(email.html.clone()),
					),
			)
			.map_err(|e| SmtpError::Send(format!("failed to build message: {e}")))?;

		self.transport
			.send(message)
			.await
			.map_err(|e| SmtpError::Send(format!("{e}")))?;
		info!("email sent");
		Ok(())
	}
}

/// Collects messages instead of sending them.
#[derive(Default)]
pub struct MemoryMailer {
	sent: Mutex<Vec<Email>>,
	fail: Mutex<bool>,
}

impl MemoryMailer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make every following send fail.
	pub fn fail_all(&self, fail: bool) {
		if let Ok(mut f) = self.fail.lock() {
			*f = fail;
		}
	}

	pub fn sent(&self) -> Vec<Email> {
		self.sent.lock().map(|s| s.clone()).unwrap_or_default()
	}
}

#[async_trait]
impl Mailer for MemoryMailer {
	async fn send(&self, email: &Email) -> Result<(), SmtpError> {
		if !is_valid_email(&email.to) {
			return Err(SmtpError::Address(email.to.clone()));
		}
		if self.fail.lock().map(|f| *f).unwrap_or(false) {
			return Err(SmtpError::Connection("memory mailer set to fail".into()));
		}
		if let Ok(mut sent) = self.sent.lock() {
			sent.push(email.clone());
		}
		Ok(())
	}
}

pub fn is_valid_email(email: &str) -> bool {
	email.parse::<Mailbox>().is_ok()
}

#[cfg(test)]
mod tests {
	use super::*;
	use netweave_common_secret::SecretString;
	use proptest::prelude::*;

	fn email(to: &str) -> Email {
		Email {
			to: to.to_string(),
			subject: "Access request".to_string(),
			text: "pending".to_string(),
			html: "<p>pending</p>".to_string(),
		}
	}

	#[test]
	fn address_validation() {
		assert!(is_valid_email("user@example.com"));
		assert!(is_valid_email("Admin <admin@example.com>"));
		assert!(!is_valid_email(""));
		assert!(!is_valid_email("user@"));
		assert!(!is_valid_email("@example.com"));
	}

	#[test]
	fn memory_mailer_records_and_fails_on_demand() {
		let mailer = MemoryMailer::new();
		tokio_test::block_on(mailer.send(&email("a@example.com"))).unwrap();
		assert_eq!(mailer.sent().len(), 1);

		mailer.fail_all(true);
		let err = tokio_test::block_on(mailer.send(&email("b@example.com"))).unwrap_err();
		assert!(matches!(err, SmtpError::Connection(_)));

		let err = tokio_test::block_on(mailer.send(&email("nope"))).unwrap_err();
		assert!(matches!(err, SmtpError::Address(_)));
		assert_eq!(mailer.sent().len(), 1);
	}

	#[tokio::test]
	async fn client_rejects_bad_sender() {
		let config = SmtpConfig {
			host: "localhost".to_string(),
			port: 2525,
			username: Some("user".to_string()),
			password: Some(SecretString::new("hunter2".to_string())),
			from_address: "not an address".to_string(),
			from_name: "Netweave".to_string(),
			use_tls: false,
		};
		assert!(matches!(SmtpClient::new(&config), Err(SmtpError::Address(_))));

		let config = SmtpConfig {
			from_address: "noreply@example.com".to_string(),
			..config
		};
		assert!(SmtpClient::new(&config).is_ok());
	}

	proptest! {
		#[test]
		fn simple_addresses_are_valid(
			local in "[a-z][a-z0-9]{0,20}",
			domain in "[a-z][a-z0-9]{0,12}",
			tld in "(com|org|net|io)"
		) {
			let addr = format!("{local}@{domain}.{tld}");
			prop_assert!(is_valid_email(&addr));
		}

		#[test]
		fn missing_at_is_invalid(s in "[a-zA-Z0-9._-]{1,40}") {
			prop_assert!(!is_valid_email(&s));
		}
	}
}
