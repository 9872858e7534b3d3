//! Bridge configuration.
//!
//! Carries no transport-specific settings: host, port and credentials are
//! passed to [`AmqpBridge::start`](crate::AmqpBridge::start), and the
//! transport client is supplied separately.

use std::time::Duration;

use uuid::Uuid;

use crate::{BridgeError, Result};

/// Default credit window of a consumer, in messages.
pub const DEFAULT_MAX_BUFFERED: usize = 1000;

/// Default credit kept on the dynamic reply receiver.
pub const DEFAULT_REPLY_CREDIT: u32 = 1000;

/// Tunables of one bridge instance.
///
/// # Example
///
/// ```
/// use amqp_bridge::BridgeConfig;
/// use std::time::Duration;
///
/// let config = BridgeConfig::default()
///     .with_container_id("orders-bridge")
///     .with_reply_timeout(Some(Duration::from_secs(5)))
///     .with_max_buffered(64);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    // ---
    /// AMQP container id announced when the connection opens.
    ///
    /// Default: `amqp-bridge-<uuid>`
    pub container_id: String,

    /// Whether `start` negotiates a dynamic reply address.
    ///
    /// When `false`, requests cannot register for replies; sending replies
    /// to other peers still works.
    ///
    /// Default: `true`
    pub reply_handler_support: bool,

    /// How long a reply registration lives before it fails with
    /// [`BridgeError::ReplyTimeout`]. `None` keeps registrations until
    /// matched or the session ends.
    ///
    /// Default: 30 seconds
    pub reply_timeout: Option<Duration>,

    /// How often expired reply registrations are swept.
    ///
    /// Default: 1 second
    pub reply_sweep_interval: Duration,

    /// Credit kept on the dynamic reply receiver.
    ///
    /// Default: 1000
    pub reply_credit: u32,

    /// Initial buffer size and credit window of new consumers.
    ///
    /// Default: 1000
    pub max_buffered: usize,

    /// How long `shutdown` waits for the close handshake before releasing
    /// the connection locally.
    ///
    /// Default: 5 seconds
    pub close_timeout: Duration,

    /// Capacity of the session actor's command queue.
    ///
    /// Default: 64
    pub command_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        // ---
        Self {
            container_id: format!("amqp-bridge-{}", Uuid::new_v4()),
            reply_handler_support: true,
            reply_timeout: Some(Duration::from_secs(30)),
            reply_sweep_interval: Duration::from_secs(1),
            reply_credit: DEFAULT_REPLY_CREDIT,
            max_buffered: DEFAULT_MAX_BUFFERED,
            close_timeout: Duration::from_secs(5),
            command_capacity: 64,
        }
    }
}

impl BridgeConfig {
    pub fn with_container_id(mut self, id: impl Into<String>) -> Self {
        self.container_id = id.into();
        self
    }

    pub fn with_reply_handler_support(mut self, enabled: bool) -> Self {
        self.reply_handler_support = enabled;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_reply_sweep_interval(mut self, interval: Duration) -> Self {
        self.reply_sweep_interval = interval;
        self
    }

    pub fn with_reply_credit(mut self, credit: u32) -> Self {
        self.reply_credit = credit;
        self
    }

    pub fn with_max_buffered(mut self, max: usize) -> Self {
        self.max_buffered = max;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        // ---
        let invalid = |msg: &str| Err(BridgeError::InvalidConfig(msg.to_string()));

        if self.container_id.is_empty() {
            return invalid("container_id must not be empty");
        }
        if self.reply_sweep_interval.is_zero() {
            return invalid("reply_sweep_interval must be non-zero");
        }
        if self.reply_timeout.is_some_and(|t| t.is_zero()) {
            return invalid("reply_timeout must be non-zero; use None to disable");
        }
        if self.reply_handler_support && self.reply_credit == 0 {
            return invalid("reply_credit must be at least 1 when reply handlers are supported");
        }
        if self.max_buffered == 0 {
            return invalid("max_buffered must be at least 1");
        }
        if self.max_buffered > u32::MAX as usize {
            return invalid("max_buffered must fit in a link credit (u32)");
        }
        if self.command_capacity == 0 {
            return invalid("command_capacity must be at least 1");
        }
        Ok(())
    }
}
