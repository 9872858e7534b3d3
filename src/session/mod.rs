//! Transport session lifecycle.
//!
//! One session per bridge. The session actor exclusively owns the AMQP
//! connection, the dynamic reply receiver and the anonymous reply sender.
//! Everything that touches them is sent to the actor as a [`Cmd`] and
//! answered over a oneshot channel, so state transitions never interleave.
//!
//! ```text
//! NotStarted --start--> Starting --ok--> Started --shutdown--> Closing --> Closed
//!                           \
//!                            `--error--> Failed
//! ```
//!
//! The current state and the negotiated reply address are published on a
//! `watch` channel; readers never wait on the actor.

mod actor;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::reply::ReplyRegistry;
use crate::{
    // ---
    Address,
    BridgeConfig,
    BridgeError,
    ConnectOptions,
    ReceiverLink,
    Result,
    SenderPtr,
    TransportClientPtr,
    WireMessage,
};

/// Lifecycle state of a bridge's transport session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    NotStarted,
    Starting,
    Started,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    /// True once the session can no longer carry traffic.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let name = match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What the actor publishes after every transition.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SessionSnapshot {
    pub state: SessionState,
    pub reply_address: Option<Address>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::NotStarted,
            reply_address: None,
        }
    }
}

//
// Actor commands
//

pub(crate) enum Cmd {
    //
    Start {
        options: ConnectOptions,
        resp: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<()>>,
    },
    AttachSender {
        target: Address,
        resp: oneshot::Sender<Result<SenderPtr>>,
    },
    AttachReceiver {
        source: Address,
        credit: u32,
        resp: oneshot::Sender<Result<Box<dyn ReceiverLink>>>,
    },
    Transmit {
        link: SenderPtr,
        message: WireMessage,
        resp: oneshot::Sender<Result<()>>,
    },
    SendReply {
        message: WireMessage,
        resp: oneshot::Sender<Result<()>>,
    },
}

/// Settings the actor reads; taken from [`BridgeConfig`].
#[derive(Clone, Debug)]
pub(crate) struct SessionSettings {
    pub reply_handler_support: bool,
    pub reply_credit: u32,
    pub reply_sweep_interval: Duration,
    pub close_timeout: Duration,
}

impl From<&BridgeConfig> for SessionSettings {
    fn from(config: &BridgeConfig) -> Self {
        // ---
        Self {
            reply_handler_support: config.reply_handler_support,
            reply_credit: config.reply_credit,
            reply_sweep_interval: config.reply_sweep_interval,
            close_timeout: config.close_timeout,
        }
    }
}

/// Cheap, cloneable entry point to the session actor.
///
/// The actor runs until every handle is dropped.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    // ---
    cmd_tx: mpsc::Sender<Cmd>,
    status: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Spawn the actor. Must be called from within a Tokio runtime.
    pub fn spawn(
        client: TransportClientPtr,
        config: &BridgeConfig,
        registry: Arc<ReplyRegistry>,
    ) -> Self {
        // ---
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity);
        let (status_tx, status) = watch::channel(SessionSnapshot::default());

        let actor = actor::Actor::new(
            client,
            SessionSettings::from(config),
            registry,
            cmd_rx,
            status_tx,
        );
        tokio::spawn(actor.run());

        Self { cmd_tx, status }
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn reply_address(&self) -> Option<Address> {
        self.status.borrow().reply_address.clone()
    }

    /// A fresh receiver of session snapshots.
    pub fn status(&self) -> watch::Receiver<SessionSnapshot> {
        self.status.clone()
    }

    /// Fail fast with `InvalidState` unless the session is started.
    pub fn ensure_started(&self, operation: &str) -> Result<()> {
        ensure_started(self.state(), operation)
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<Result<T>>) -> Cmd) -> Result<T> {
        // ---
        let (tx, rx) = oneshot::channel();

        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| BridgeError::SessionClosed)?;

        rx.await.map_err(|_| BridgeError::SessionClosed)?
    }

    pub async fn start(&self, options: ConnectOptions) -> Result<()> {
        self.call(|resp| Cmd::Start { options, resp }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.call(|resp| Cmd::Shutdown { resp }).await
    }

    pub async fn attach_sender(&self, target: Address) -> Result<SenderPtr> {
        self.call(|resp| Cmd::AttachSender { target, resp }).await
    }

    pub async fn attach_receiver(
        &self,
        source: Address,
        credit: u32,
    ) -> Result<Box<dyn ReceiverLink>> {
        // ---
        self.call(|resp| Cmd::AttachReceiver {
            source,
            credit,
            resp,
        })
        .await
    }

    pub async fn transmit(&self, link: SenderPtr, message: WireMessage) -> Result<()> {
        self.call(|resp| Cmd::Transmit { link, message, resp }).await
    }

    pub async fn send_reply(&self, message: WireMessage) -> Result<()> {
        self.call(|resp| Cmd::SendReply { message, resp }).await
    }
}

pub(crate) fn ensure_started(state: SessionState, operation: &str) -> Result<()> {
    // ---
    match state {
        SessionState::Started => Ok(()),
        other => Err(BridgeError::InvalidState(format!(
            "cannot {operation}: session is {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn only_started_passes() {
        // ---
        assert!(ensure_started(SessionState::Started, "send").is_ok());

        for state in [
            SessionState::NotStarted,
            SessionState::Starting,
            SessionState::Closing,
            SessionState::Closed,
            SessionState::Failed,
        ] {
            match ensure_started(state, "send") {
                Err(BridgeError::InvalidState(msg)) => assert!(msg.contains(&state.to_string())),
                other => panic!("expected InvalidState for {state}, got {other:?}"),
            }
        }
    }

    #[test]
    fn terminal_states() {
        // ---
        assert!(!SessionState::Started.is_terminal());
        assert!(!SessionState::NotStarted.is_terminal());
        assert!(SessionState::Closing.is_terminal());
        assert!(SessionState::Failed.is_terminal());
    }
}
