// src/transport/memory/transport.rs

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::hub::MemoryPeer;
use crate::{
    // ---
    log_debug,
    Address,
    BridgeError,
    ConnectOptions,
    Connection,
    Delivery,
    Disposition,
    LinkSource,
    ReceiverLink,
    Result,
    SenderLink,
    SenderPtr,
    TransportClient,
    WireMessage,
};

pub(super) struct MemoryClient {
    peer: MemoryPeer,
}

impl MemoryClient {
    pub(super) fn new(peer: MemoryPeer) -> Self {
        Self { peer }
    }
}

#[async_trait::async_trait]
impl TransportClient for MemoryClient {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Connection>> {
        // ---
        let mut state = self.peer.state();

        if let Some(reason) = state.faults.connect.clone() {
            return Err(BridgeError::ConnectFailure(format!(
                "{}:{}: {reason}",
                options.host, options.port
            )));
        }

        let id = state.add_connection();
        log_debug!(
            "memory peer: connection {id} from container {}",
            options.container_id
        );

        Ok(Box::new(MemoryConnection {
            peer: self.peer.clone(),
            id,
            properties: BTreeMap::new(),
            disconnected: false,
        }))
    }
}

struct MemoryConnection {
    peer: MemoryPeer,
    id: u64,
    properties: BTreeMap<String, String>,
    disconnected: bool,
}

impl MemoryConnection {
    fn ensure_usable(&self) -> Result<()> {
        // ---
        if self.disconnected || !self.peer.state().connection_alive(self.id) {
            return Err(BridgeError::Transport(format!(
                "connection {} is not open",
                self.id
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Connection for MemoryConnection {
    fn set_properties(&mut self, properties: BTreeMap<String, String>) {
        self.properties = properties;
    }

    async fn open(&mut self) -> Result<()> {
        // ---
        let mut state = self.peer.state();

        if let Some(reason) = state.faults.open.clone() {
            return Err(BridgeError::OpenFailure(reason));
        }
        state.connection_open(self.id, self.properties.clone());
        Ok(())
    }

    async fn create_receiver(
        &mut self,
        source: LinkSource,
        initial_credit: u32,
    ) -> Result<Box<dyn ReceiverLink>> {
        // ---
        self.ensure_usable()?;
        let mut state = self.peer.state();

        let address = match source {
            LinkSource::Address(address) => address,
            LinkSource::Dynamic => {
                if let Some(reason) = state.faults.dynamic_attach.clone() {
                    return Err(BridgeError::Transport(format!(
                        "dynamic attach refused: {reason}"
                    )));
                }
                state.next_dynamic_address()
            }
        };

        let (link_id, rx) = state.attach(self.id, address.clone(), initial_credit);

        Ok(Box::new(MemoryReceiver {
            peer: self.peer.clone(),
            link_id,
            address,
            rx,
        }))
    }

    async fn create_sender(&mut self, target: Option<Address>) -> Result<SenderPtr> {
        // ---
        self.ensure_usable()?;

        Ok(Arc::new(MemorySender {
            peer: self.peer.clone(),
            connection: self.id,
            target,
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&mut self) -> Result<()> {
        // ---
        let (hang, failure) = {
            let state = self.peer.state();
            (state.faults.hang_close, state.faults.close.clone())
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(reason) = failure {
            return Err(BridgeError::Transport(reason));
        }

        self.peer.state().connection_closed(self.id);
        Ok(())
    }

    fn disconnect(&mut self) {
        // ---
        if !self.disconnected {
            self.disconnected = true;
            self.peer.state().disconnect(self.id);
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

struct MemoryReceiver {
    peer: MemoryPeer,
    link_id: u64,
    address: Address,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait::async_trait]
impl ReceiverLink for MemoryReceiver {
    fn remote_source(&self) -> Option<Address> {
        Some(self.address.clone())
    }

    fn flow(&mut self, credit: u32) -> Result<()> {
        // ---
        self.peer.state().flow(self.link_id, credit);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    fn settle(&mut self, _delivery: &Delivery, outcome: Disposition) -> Result<()> {
        // ---
        self.peer.state().settle(&self.address, outcome);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // ---
        self.peer.state().detach(self.link_id);
        self.rx.close();
        Ok(())
    }
}

impl Drop for MemoryReceiver {
    fn drop(&mut self) {
        self.peer.state().detach(self.link_id);
    }
}

struct MemorySender {
    peer: MemoryPeer,
    connection: u64,
    target: Option<Address>,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl SenderLink for MemorySender {
    fn target(&self) -> Option<Address> {
        self.target.clone()
    }

    async fn send(&self, message: WireMessage) -> Result<()> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::Transport("sender link is closed".into()));
        }
        {
            let state = self.peer.state();
            if !state.connection_alive(self.connection) {
                return Err(BridgeError::Transport(format!(
                    "connection {} is not open",
                    self.connection
                )));
            }
            if let Some(reason) = state.faults.send.clone() {
                return Err(BridgeError::Transport(format!("transfer refused: {reason}")));
            }
        }

        let address = match (&self.target, message.to()) {
            (Some(target), _) => target.clone(),
            (None, Some(to)) => Address::from(to),
            (None, None) => {
                return Err(BridgeError::Transport(
                    "anonymous sender requires a 'to' address".into(),
                ))
            }
        };

        self.peer.route(address, message);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
