//! Bridge builder.
//!
//! Fluent construction of [`AmqpBridge`] instances on top of
//! [`BridgeConfig`] defaults.

use std::time::Duration;

use crate::{AmqpBridge, BridgeConfig, BridgeError, Result, TransportClientPtr};

/// Builder for [`AmqpBridge`].
///
/// A transport client is required; every other setting falls back to
/// [`BridgeConfig::default`].
///
/// # Example
///
/// ```
/// use amqp_bridge::{AmqpBridgeBuilder, MemoryPeer};
/// use std::time::Duration;
///
/// # async fn example() -> amqp_bridge::Result<()> {
/// let peer = MemoryPeer::new();
///
/// let bridge = AmqpBridgeBuilder::new()
///     .transport(peer.client())
///     .container_id("orders-bridge")
///     .reply_timeout(Duration::from_secs(10))
///     .max_buffered(128)
///     .build()?;
///
/// bridge.start("localhost", 5672, None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct AmqpBridgeBuilder {
    // ---
    transport: Option<TransportClientPtr>,
    config: Option<BridgeConfig>,

    container_id: Option<String>,
    reply_handler_support: Option<bool>,
    reply_timeout: Option<Option<Duration>>,
    reply_sweep_interval: Option<Duration>,
    reply_credit: Option<u32>,
    max_buffered: Option<usize>,
    close_timeout: Option<Duration>,
}

impl AmqpBridgeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transport client (required).
    pub fn transport(mut self, transport: TransportClientPtr) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Start from a full configuration instead of the defaults. Individual
    /// setters still override its fields.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn container_id(mut self, id: impl Into<String>) -> Self {
        self.container_id = Some(id.into());
        self
    }

    /// Enable or disable the dynamic reply receiver.
    ///
    /// Default: enabled.
    pub fn reply_handler_support(mut self, enabled: bool) -> Self {
        self.reply_handler_support = Some(enabled);
        self
    }

    /// Deadline for reply registrations.
    ///
    /// Default: 30s.
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(Some(timeout));
        self
    }

    /// Keep reply registrations until matched or the session ends.
    pub fn no_reply_timeout(mut self) -> Self {
        self.reply_timeout = Some(None);
        self
    }

    /// Default: 1s.
    pub fn reply_sweep_interval(mut self, interval: Duration) -> Self {
        self.reply_sweep_interval = Some(interval);
        self
    }

    /// Default: 1000.
    pub fn reply_credit(mut self, credit: u32) -> Self {
        self.reply_credit = Some(credit);
        self
    }

    /// Consumer buffer size and credit window.
    ///
    /// Default: 1000.
    pub fn max_buffered(mut self, max: usize) -> Self {
        self.max_buffered = Some(max);
        self
    }

    /// Default: 5s.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = Some(timeout);
        self
    }

    /// Build the bridge (consumes self). Spawns the session actor, so it
    /// must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidConfig`] if no transport was set or the
    /// resulting configuration does not validate.
    pub fn build(self) -> Result<AmqpBridge> {
        // ---
        let transport = self
            .transport
            .ok_or_else(|| BridgeError::InvalidConfig("transport is required".into()))?;

        let mut config = self.config.unwrap_or_default();

        if let Some(id) = self.container_id {
            config.container_id = id;
        }
        if let Some(enabled) = self.reply_handler_support {
            config.reply_handler_support = enabled;
        }
        if let Some(timeout) = self.reply_timeout {
            config.reply_timeout = timeout;
        }
        if let Some(interval) = self.reply_sweep_interval {
            config.reply_sweep_interval = interval;
        }
        if let Some(credit) = self.reply_credit {
            config.reply_credit = credit;
        }
        if let Some(max) = self.max_buffered {
            config.max_buffered = max;
        }
        if let Some(timeout) = self.close_timeout {
            config.close_timeout = timeout;
        }

        AmqpBridge::new(transport, config)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::MemoryPeer;

    #[tokio::test]
    async fn transport_is_required() {
        // ---
        let result = AmqpBridgeBuilder::new().max_buffered(10).build();
        assert!(matches!(result, Err(BridgeError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn setters_override_config() {
        // ---
        let peer = MemoryPeer::new();
        let bridge = AmqpBridgeBuilder::new()
            .transport(peer.client())
            .config(BridgeConfig::default().with_max_buffered(5))
            .container_id("c1")
            .no_reply_timeout()
            .build()
            .unwrap();

        let config = bridge.config();
        assert_eq!(config.container_id, "c1");
        assert_eq!(config.max_buffered, 5);
        assert_eq!(config.reply_timeout, None);
    }

    #[tokio::test]
    async fn invalid_values_fail_build() {
        // ---
        let peer = MemoryPeer::new();
        let result = AmqpBridgeBuilder::new()
            .transport(peer.client())
            .max_buffered(0)
            .build();
        assert!(matches!(result, Err(BridgeError::InvalidConfig(_))));
    }
}
