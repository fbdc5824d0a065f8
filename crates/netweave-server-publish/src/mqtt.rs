// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! MQTT transport to host agents.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netweave_server_config::MqttConfig;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::topic::Topic;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Publishes sealed payloads with QoS 1. A background task drives the
/// connection and reconnects until the cancel token fires; publishes made
/// while disconnected fail as unavailable so the publisher can retry and
/// reconcile.
pub struct MqttBroker {
	client: AsyncClient,
	connected: Arc<AtomicBool>,
	cancel: CancellationToken,
}

impl MqttBroker {
	#[instrument(skip(config, cancel), fields(port = config.port))]
	pub fn connect(config: &MqttConfig, cancel: CancellationToken) -> Result<Self, BrokerError> {
		let host = config
			.host
			.clone()
			.ok_or_else(|| BrokerError::Rejected("no broker host configured".to_string()))?;

		let mut options = MqttOptions::new(config.client_id.clone(), host.clone(), config.port);
		options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
		if let Some(username) = &config.username {
			let password = config
				.password
				.as_ref()
				.map(|p| p.expose().clone())
				.unwrap_or_default();
			options.set_credentials(username.clone(), password);
		}

		let (client, eventloop) = AsyncClient::new(options, config.queue_capacity.max(1));
		let connected = Arc::new(AtomicBool::new(false));
		tokio::spawn(drive(eventloop, Arc::clone(&connected), cancel.clone(), host));

		Ok(Self {
			client,
			connected,
			cancel,
		})
	}

	pub fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}
}

impl Drop for MqttBroker {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

async fn drive(mut eventloop: EventLoop, connected: Arc<AtomicBool>, cancel: CancellationToken, host: String) {
	loop {
		let polled = tokio::select! {
			_ = cancel.cancelled() => break,
			polled = eventloop.poll() => polled,
		};
		match polled {
			Ok(Event::Incoming(Packet::ConnAck(_))) => {
				connected.store(true, Ordering::SeqCst);
				info!(host = %host, "connected to MQTT broker");
			}
			Ok(Event::Incoming(Packet::Disconnect)) => {
				connected.store(false, Ordering::SeqCst);
				warn!(host = %host, "MQTT broker closed the session");
			}
			Ok(_) => {}
			Err(e) => {
				if connected.swap(false, Ordering::SeqCst) {
					warn!(host = %host, error = %e, "lost MQTT connection");
				} else {
					debug!(host = %host, error = %e, "MQTT connect attempt failed");
				}
				if matches!(e, ConnectionError::RequestsDone) {
					break;
				}
				tokio::select! {
					_ = cancel.cancelled() => break,
					_ = tokio::time::sleep(RECONNECT_DELAY) => {}
				}
			}
		}
	}
	connected.store(false, Ordering::SeqCst);
	debug!(host = %host, "MQTT event loop stopped");
}

#[async_trait]
impl Broker for MqttBroker {
	fn name(&self) -> &str {
		"mqtt"
	}

	async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), BrokerError> {
		if !self.is_connected() {
			return Err(BrokerError::Unavailable("not connected to MQTT broker".to_string()));
		}
		self.client
			.publish(topic.to_string(), QoS::AtLeastOnce, false, payload)
			.await
			.map_err(|e| BrokerError::Unavailable(e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use netweave_common_core::HostId;
	use netweave_server_config::MqttConfigLayer;

	fn config(host: Option<&str>, port: u16) -> MqttConfig {
		MqttConfigLayer {
			host: host.map(str::to_string),
			port: Some(port),
			..Default::default()
		}
		.finalize()
	}

	#[tokio::test]
	async fn host_is_required() {
		let err = MqttBroker::connect(&config(None, 1883), CancellationToken::new()).err();
		assert!(matches!(err, Some(BrokerError::Rejected(_))));
	}

	#[tokio::test]
	async fn publish_before_connack_is_retryable() {
		let cancel = CancellationToken::new();
		// Nothing listens on port 1 on the loopback interface.
		let broker = MqttBroker::connect(&config(Some("127.0.0.1"), 1), cancel.clone()).unwrap();
		assert_eq!(broker.name(), "mqtt");
		assert!(!broker.is_connected());

		let err = broker
			.publish(&Topic::Host(HostId::new()), b"sealed".to_vec())
			.await
			.unwrap_err();
		assert!(err.is_transient());
		cancel.cancel();
	}
}
