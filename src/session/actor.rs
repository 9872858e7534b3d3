// src/session/actor.rs

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use super::{Cmd, SessionSettings, SessionSnapshot, SessionState};
use crate::reply::ReplyRegistry;
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_trace,
    log_warn,
    Address,
    BridgeError,
    ConnectOptions,
    Connection,
    Delivery,
    Disposition,
    InboundMessage,
    LinkSource,
    ReceiverLink,
    Result,
    SenderPtr,
    TransportClientPtr,
    WireMessage,
};

/// Connection property naming the client product.
pub(crate) const PRODUCT_PROPERTY: &str = "product";
/// Connection property carrying the client version.
pub(crate) const VERSION_PROPERTY: &str = "version";

/// Owns the connection for as long as the session holds it. Dropping the
/// guard disconnects, on every exit path.
struct ConnectionGuard(Box<dyn Connection>);

impl Deref for ConnectionGuard {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl DerefMut for ConnectionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        // ---
        self.0.disconnect();
        log_trace!("connection resources released");
    }
}

enum ActorStep {
    //
    Cmd(Cmd),
    Reply(Option<Delivery>),
    Sweep,
    Closed,
}

/// Background task owning the session's connection.
pub(super) struct Actor {
    // ---
    client: TransportClientPtr,
    settings: SessionSettings,
    registry: Arc<ReplyRegistry>,
    cmd_rx: mpsc::Receiver<Cmd>,
    status_tx: watch::Sender<SessionSnapshot>,

    state: SessionState,
    connection: Option<ConnectionGuard>,
    reply_link: Option<Box<dyn ReceiverLink>>,
    reply_sender: Option<SenderPtr>,
    reply_address: Option<Address>,
}

impl Actor {
    pub(super) fn new(
        client: TransportClientPtr,
        settings: SessionSettings,
        registry: Arc<ReplyRegistry>,
        cmd_rx: mpsc::Receiver<Cmd>,
        status_tx: watch::Sender<SessionSnapshot>,
    ) -> Self {
        // ---
        Self {
            client,
            settings,
            registry,
            cmd_rx,
            status_tx,
            state: SessionState::NotStarted,
            connection: None,
            reply_link: None,
            reply_sender: None,
            reply_address: None,
        }
    }

    pub(super) async fn run(mut self) {
        // ---
        log_debug!("session actor started");

        let mut sweep = time::interval(self.settings.reply_sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            match self.next_step(&mut sweep).await {
                ActorStep::Cmd(cmd) => self.handle_cmd(cmd).await,
                ActorStep::Reply(Some(delivery)) => self.on_reply(delivery),
                ActorStep::Reply(None) => self.on_reply_detached(),
                ActorStep::Sweep => {
                    let evicted = self.registry.evict_expired(Instant::now());
                    if evicted > 0 {
                        log_warn!("{evicted} reply registration(s) expired");
                    }
                }
                ActorStep::Closed => break,
            }
        }

        // every handle is gone; nobody can observe a close result
        if self.connection.take().is_some() {
            log_debug!("session dropped while connected, disconnecting");
        }
        self.registry.fail_all(|| BridgeError::SessionClosed);

        log_debug!("session actor stopped");
    }

    async fn next_step(&mut self, sweep: &mut Interval) -> ActorStep {
        // ---
        tokio::select! {
            cmd = self.cmd_rx.recv() => match cmd {
                Some(cmd) => ActorStep::Cmd(cmd),
                None => ActorStep::Closed,
            },
            delivery = next_reply(&mut self.reply_link) => ActorStep::Reply(delivery),
            _ = sweep.tick() => ActorStep::Sweep,
        }
    }

    async fn handle_cmd(&mut self, cmd: Cmd) {
        // ---
        match cmd {
            Cmd::Start { options, resp } => {
                let result = self.do_start(options).await;
                let _ = resp.send(result);
            }
            Cmd::Shutdown { resp } => {
                let result = self.do_shutdown().await;
                let _ = resp.send(result);
            }
            Cmd::AttachSender { target, resp } => {
                let result = self.do_attach_sender(target).await;
                let _ = resp.send(result);
            }
            Cmd::AttachReceiver {
                source,
                credit,
                resp,
            } => {
                let result = self.do_attach_receiver(source, credit).await;
                let _ = resp.send(result);
            }
            Cmd::Transmit {
                link,
                message,
                resp,
            } => {
                let result = self.do_transmit(&link, message).await;
                let _ = resp.send(result);
            }
            Cmd::SendReply { message, resp } => {
                let result = match self.reply_sender.clone() {
                    Some(link) => self.do_transmit(&link, message).await,
                    None => Err(self.not_started("send reply")),
                };
                let _ = resp.send(result);
            }
        }
    }

    fn publish(&mut self, state: SessionState) {
        // ---
        self.state = state;
        let snapshot = SessionSnapshot {
            state,
            reply_address: self.reply_address.clone(),
        };
        self.status_tx.send_replace(snapshot);
        log_debug!("session state: {state}");
    }

    fn not_started(&self, operation: &str) -> BridgeError {
        // ---
        match super::ensure_started(self.state, operation) {
            Err(err) => err,
            Ok(()) => BridgeError::InvalidState(format!("cannot {operation}: no reply sender")),
        }
    }

    fn started_connection(&mut self, operation: &str) -> Result<&mut ConnectionGuard> {
        // ---
        super::ensure_started(self.state, operation)?;
        self.connection
            .as_mut()
            .ok_or_else(|| BridgeError::InvalidState(format!("cannot {operation}: no connection")))
    }

    async fn do_start(&mut self, options: ConnectOptions) -> Result<()> {
        // ---
        if self.state != SessionState::NotStarted {
            return Err(BridgeError::InvalidState(format!(
                "cannot start: session is {}",
                self.state
            )));
        }
        self.publish(SessionState::Starting);

        match self.open_session(options).await {
            Ok(()) => {
                self.publish(SessionState::Started);
                log_info!(
                    "session started, reply address: {}",
                    self.reply_address
                        .as_ref()
                        .map_or("<none>", Address::as_str)
                );
                Ok(())
            }
            Err(err) => {
                self.release();
                self.publish(SessionState::Failed);
                log_error!("session failed to start: {err}");
                Err(err)
            }
        }
    }

    async fn open_session(&mut self, options: ConnectOptions) -> Result<()> {
        // ---
        let mut connection = self
            .client
            .connect(&options)
            .await
            .map_err(|err| match err {
                BridgeError::ConnectFailure(_) => err,
                other => BridgeError::ConnectFailure(other.to_string()),
            })?;

        connection.set_properties(connection_properties());
        let connection = self.connection.insert(ConnectionGuard(connection));

        connection.open().await.map_err(open_failure)?;
        log_trace!("connection open complete");

        let sender = connection.create_sender(None).await.map_err(open_failure)?;
        self.reply_sender = Some(sender);

        if !self.settings.reply_handler_support {
            return Ok(());
        }

        let link = connection
            .create_receiver(LinkSource::Dynamic, self.settings.reply_credit)
            .await
            .map_err(open_failure)?;

        let address = link.remote_source().ok_or_else(|| {
            BridgeError::OpenFailure("peer did not assign a dynamic reply address".into())
        })?;

        log_debug!("reply receiver attached at {address}");
        self.reply_address = Some(address);
        self.reply_link = Some(link);
        Ok(())
    }

    async fn do_shutdown(&mut self) -> Result<()> {
        // ---
        let Some(mut connection) = self.connection.take() else {
            log_debug!("shutdown with no connection, nothing to do");
            return Ok(());
        };
        self.publish(SessionState::Closing);

        self.reply_link = None;
        let result = match time::timeout(self.settings.close_timeout, connection.close()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(BridgeError::ShutdownFailure(err.to_string())),
            Err(_) => Err(BridgeError::ShutdownFailure(format!(
                "close handshake timed out after {:?}",
                self.settings.close_timeout
            ))),
        };
        drop(connection);

        self.release();
        let failed = self.registry.fail_all(|| BridgeError::SessionClosed);
        if failed > 0 {
            log_debug!("{failed} pending reply(ies) failed at shutdown");
        }
        self.publish(SessionState::Closed);

        match &result {
            Ok(()) => log_info!("session closed"),
            Err(err) => log_warn!("session closed locally: {err}"),
        }
        result
    }

    /// Drop everything tied to the connection.
    fn release(&mut self) {
        // ---
        self.reply_link = None;
        self.reply_sender = None;
        self.reply_address = None;
        self.connection = None;
    }

    async fn do_attach_sender(&mut self, target: Address) -> Result<SenderPtr> {
        // ---
        let connection = self.started_connection("create producer")?;
        let link = connection.create_sender(Some(target.clone())).await?;
        log_debug!("sender attached to {target}");
        Ok(link)
    }

    async fn do_attach_receiver(
        &mut self,
        source: Address,
        credit: u32,
    ) -> Result<Box<dyn ReceiverLink>> {
        // ---
        let connection = self.started_connection("create consumer")?;
        let link = connection
            .create_receiver(LinkSource::Address(source.clone()), credit)
            .await?;
        log_debug!("receiver attached to {source} with credit {credit}");
        Ok(link)
    }

    async fn do_transmit(&mut self, link: &SenderPtr, message: WireMessage) -> Result<()> {
        // ---
        super::ensure_started(self.state, "send")?;
        link.send(message).await
    }

    fn on_reply(&mut self, delivery: Delivery) {
        // ---
        let (Some(link), Some(address)) = (self.reply_link.as_mut(), self.reply_address.clone())
        else {
            return;
        };

        if let Err(err) = link.settle(&delivery, Disposition::Accepted) {
            log_warn!("failed to settle reply delivery {}: {err}", delivery.tag);
        }
        if let Err(err) = link.flow(1) {
            log_warn!("failed to replenish reply credit: {err}");
        }

        let reply = InboundMessage::from_wire(address, &delivery.message);
        self.registry.dispatch(reply);
    }

    /// The peer detached the dynamic receiver: the reply address is dead.
    /// Withdraw it so new registrations fail fast, and fail the waiting ones.
    fn on_reply_detached(&mut self) {
        // ---
        let address = self.reply_address.take();
        self.reply_link = None;
        self.publish(self.state);

        let reason = format!(
            "reply receiver on {} detached by peer",
            address.as_ref().map_or("<none>", Address::as_str)
        );
        log_warn!("{reason}");

        let failed = self
            .registry
            .fail_all(|| BridgeError::Transport(reason.clone()));
        if failed > 0 {
            log_debug!("{failed} pending reply(ies) failed after reply detach");
        }
    }
}

async fn next_reply(link: &mut Option<Box<dyn ReceiverLink>>) -> Option<Delivery> {
    // ---
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

fn open_failure(err: BridgeError) -> BridgeError {
    // ---
    match err {
        BridgeError::OpenFailure(_) => err,
        other => BridgeError::OpenFailure(other.to_string()),
    }
}

fn connection_properties() -> BTreeMap<String, String> {
    // ---
    BTreeMap::from([
        (PRODUCT_PROPERTY.to_string(), env!("CARGO_PKG_NAME").to_string()),
        (VERSION_PROPERTY.to_string(), env!("CARGO_PKG_VERSION").to_string()),
    ])
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn connection_properties_name_the_crate() {
        // ---
        let props = connection_properties();
        assert_eq!(props.get(PRODUCT_PROPERTY).map(String::as_str), Some("amqp-bridge"));
        assert_eq!(
            props.get(VERSION_PROPERTY).map(String::as_str),
            Some(env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn open_failure_keeps_kind() {
        // ---
        assert!(matches!(
            open_failure(BridgeError::OpenFailure("x".into())),
            BridgeError::OpenFailure(m) if m == "x"
        ));
        assert!(matches!(
            open_failure(BridgeError::Transport("refused".into())),
            BridgeError::OpenFailure(m) if m.contains("refused")
        ));
    }
}
