//! Consumer endpoint and its pump task.
//!
//! Each consumer runs one pump task that owns the receiver link, a bounded
//! buffer and the installed handlers. The link's credit window equals
//! `max_buffered`: credit is replenished only as buffered messages are handed
//! to the handler, so a paused consumer, or one without a handler, stops the
//! peer once its window is full.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use super::handler::{wrap_handler, EndHandler, ExceptionHandler, MessageHandler};
use crate::session::SessionSnapshot;
use crate::{
    // ---
    log_debug,
    log_info,
    log_warn,
    Address,
    BridgeError,
    Delivery,
    Disposition,
    InboundMessage,
    ReceiverLink,
    Result,
};

enum Control {
    //
    Handler(MessageHandler),
    ExceptionHandler(ExceptionHandler),
    EndHandler(EndHandler),
    Pause,
    Resume,
    SetMaxBuffered(usize),
    Unregister { resp: oneshot::Sender<()> },
}

/// Introspection shared between the endpoint and its pump.
struct Shared {
    registered: AtomicBool,
    paused: AtomicBool,
    max_buffered: AtomicUsize,
    buffered: AtomicUsize,
}

/// Receives messages from one fixed AMQP address.
///
/// Every delivery is accepted as soon as it arrives; the handler's outcome
/// never affects settlement. Messages are handed to the handler one at a
/// time, in arrival order. Messages that arrive before a handler is
/// installed, or while paused, wait in the buffer.
///
/// Cheap to clone. Dropping the last clone unregisters the consumer.
#[derive(Clone)]
pub struct ConsumerEndpoint {
    // ---
    address: Address,
    shared: Arc<Shared>,
    ctl_tx: mpsc::UnboundedSender<Control>,
}

impl ConsumerEndpoint {
    /// Start the pump for an attached link whose initial credit is
    /// `max_buffered`.
    pub(crate) fn spawn(
        address: Address,
        link: Box<dyn ReceiverLink>,
        max_buffered: usize,
        status: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        // ---
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            registered: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            max_buffered: AtomicUsize::new(max_buffered),
            buffered: AtomicUsize::new(0),
        });

        let pump = Pump {
            address: address.clone(),
            link,
            ctl_rx,
            status,
            shared: Arc::clone(&shared),
            buffer: VecDeque::new(),
            handler: None,
            on_error: None,
            on_end: None,
            paused: false,
            max_buffered,
            outstanding: max_buffered,
        };
        tokio::spawn(pump.run());

        Self {
            address,
            shared,
            ctl_tx,
        }
    }

    /// The source address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// False once the consumer was unregistered or its session ended.
    pub fn is_registered(&self) -> bool {
        self.shared.registered.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    pub fn max_buffered(&self) -> usize {
        self.shared.max_buffered.load(Ordering::Acquire)
    }

    /// Messages received but not yet handed to the handler.
    pub fn buffered(&self) -> usize {
        self.shared.buffered.load(Ordering::Acquire)
    }

    fn control(&self, ctl: Control) -> Result<()> {
        // ---
        if !self.is_registered() {
            return Err(self.unregistered());
        }
        self.ctl_tx.send(ctl).map_err(|_| self.unregistered())
    }

    fn unregistered(&self) -> BridgeError {
        BridgeError::InvalidState(format!("consumer for {} is not registered", self.address))
    }

    /// Install the message handler, replacing any previous one.
    ///
    /// The next message is handed over only after the previous handler
    /// future completes. An `Err` result, or a panic, is passed to the
    /// exception handler; the consumer keeps running.
    pub fn handler<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.control(Control::Handler(wrap_handler(handler)))
    }

    /// Install the handler for errors that have no caller to return to:
    /// handler failures, settlement or flow failures, and buffer overflow.
    pub fn exception_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(BridgeError) + Send + Sync + 'static,
    {
        self.control(Control::ExceptionHandler(Arc::new(handler)))
    }

    /// Install a callback run once when the consumer stops, whether through
    /// [`unregister`](Self::unregister), session shutdown, or the peer
    /// detaching the link.
    pub fn end_handler<F>(&self, handler: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.control(Control::EndHandler(Box::new(handler)))
    }

    /// Stop handing messages to the handler. Deliveries keep arriving until
    /// the credit window is exhausted.
    pub fn pause(&self) -> Result<()> {
        // ---
        self.control(Control::Pause)?;
        self.shared.paused.store(true, Ordering::Release);
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        // ---
        self.control(Control::Resume)?;
        self.shared.paused.store(false, Ordering::Release);
        Ok(())
    }

    /// Resize the buffer and credit window.
    ///
    /// Growing grants the extra credit at once. Shrinking withholds credit
    /// until the buffer drains below the new size; deliveries already in
    /// flight that find the buffer full are dropped and reported as
    /// [`BridgeError::BufferOverflow`].
    pub fn set_max_buffered(&self, max: usize) -> Result<()> {
        // ---
        if max == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_buffered must be at least 1".into(),
            ));
        }
        self.control(Control::SetMaxBuffered(max))?;
        self.shared.max_buffered.store(max, Ordering::Release);
        Ok(())
    }

    /// Detach the link, drop buffered messages and run the end handler.
    ///
    /// Resolves once the pump has stopped. Unregistering twice is a no-op.
    /// Must not be awaited from inside this consumer's own handler.
    pub async fn unregister(&self) -> Result<()> {
        // ---
        if !self.is_registered() {
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        if self.ctl_tx.send(Control::Unregister { resp: tx }).is_ok() {
            let _ = rx.await;
        }
        Ok(())
    }
}

enum PumpStep {
    //
    Control(Option<Control>),
    Session(bool),
    Dispatch,
    Delivery(Option<Delivery>),
}

struct Pump {
    // ---
    address: Address,
    link: Box<dyn ReceiverLink>,
    ctl_rx: mpsc::UnboundedReceiver<Control>,
    status: watch::Receiver<SessionSnapshot>,
    shared: Arc<Shared>,

    buffer: VecDeque<InboundMessage>,
    handler: Option<MessageHandler>,
    on_error: Option<ExceptionHandler>,
    on_end: Option<EndHandler>,
    paused: bool,
    max_buffered: usize,
    /// Credit granted to the peer and not yet used.
    outstanding: usize,
}

impl Pump {
    async fn run(mut self) {
        // ---
        log_debug!("consumer on {} started", self.address);
        let mut waiters = Vec::new();

        if !self.status.borrow_and_update().state.is_terminal() {
            loop {
                match self.next_step().await {
                    PumpStep::Control(Some(Control::Unregister { resp })) => {
                        waiters.push(resp);
                        break;
                    }
                    PumpStep::Control(Some(ctl)) => self.on_control(ctl),
                    PumpStep::Control(None) => {
                        log_debug!("consumer on {} dropped", self.address);
                        break;
                    }
                    PumpStep::Session(alive) => {
                        if !alive || self.status.borrow_and_update().state.is_terminal() {
                            break;
                        }
                    }
                    PumpStep::Dispatch => self.dispatch_one().await,
                    PumpStep::Delivery(Some(delivery)) => self.on_delivery(delivery),
                    PumpStep::Delivery(None) => {
                        log_debug!("link on {} detached", self.address);
                        break;
                    }
                }
            }
        }

        self.finish(waiters).await;
    }

    async fn next_step(&mut self) -> PumpStep {
        // ---
        let ready = !self.paused && self.handler.is_some() && !self.buffer.is_empty();

        tokio::select! {
            biased;
            ctl = self.ctl_rx.recv() => PumpStep::Control(ctl),
            changed = self.status.changed() => PumpStep::Session(changed.is_ok()),
            _ = std::future::ready(()), if ready => PumpStep::Dispatch,
            delivery = self.link.recv() => PumpStep::Delivery(delivery),
        }
    }

    fn on_control(&mut self, ctl: Control) {
        // ---
        match ctl {
            Control::Handler(handler) => self.handler = Some(handler),
            Control::ExceptionHandler(handler) => self.on_error = Some(handler),
            Control::EndHandler(handler) => self.on_end = Some(handler),
            Control::Pause => self.paused = true,
            Control::Resume => self.paused = false,
            Control::SetMaxBuffered(max) => {
                self.max_buffered = max;
                self.top_up();
            }
            Control::Unregister { resp } => {
                // handled by the run loop
                let _ = resp.send(());
            }
        }
    }

    fn on_delivery(&mut self, delivery: Delivery) {
        // ---
        self.outstanding = self.outstanding.saturating_sub(1);

        if let Err(err) = self.link.settle(&delivery, Disposition::Accepted) {
            self.report(err);
        }

        if self.buffer.len() >= self.max_buffered {
            self.report(BridgeError::BufferOverflow {
                address: self.address.to_string(),
                max: self.max_buffered,
            });
            self.top_up();
            return;
        }

        let message = InboundMessage::from_wire(self.address.clone(), &delivery.message);
        self.buffer.push_back(message);
        self.sync_buffered();
    }

    async fn dispatch_one(&mut self) {
        // ---
        let Some(handler) = self.handler.clone() else {
            return;
        };
        let Some(message) = self.buffer.pop_front() else {
            return;
        };
        self.sync_buffered();
        self.top_up();

        match tokio::spawn(handler(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.report(err),
            Err(join) => self.report(BridgeError::Handler(format!("handler panicked: {join}"))),
        }
    }

    /// Grant credit up to the window: buffered + outstanding == max_buffered.
    fn top_up(&mut self) {
        // ---
        let grant = self
            .max_buffered
            .saturating_sub(self.buffer.len() + self.outstanding);
        if grant == 0 {
            return;
        }

        let grant = u32::try_from(grant).unwrap_or(u32::MAX);
        match self.link.flow(grant) {
            Ok(()) => self.outstanding += grant as usize,
            Err(err) => self.report(err),
        }
    }

    fn report(&self, err: BridgeError) {
        // ---
        log_warn!("consumer on {}: {err}", self.address);
        if let Some(handler) = &self.on_error {
            handler(err);
        }
    }

    fn sync_buffered(&self) {
        self.shared
            .buffered
            .store(self.buffer.len(), Ordering::Release);
    }

    async fn finish(mut self, mut waiters: Vec<oneshot::Sender<()>>) {
        // ---
        self.shared.registered.store(false, Ordering::Release);

        // pick up handlers and unregister calls that raced with the stop
        self.ctl_rx.close();
        while let Ok(ctl) = self.ctl_rx.try_recv() {
            match ctl {
                Control::Unregister { resp } => waiters.push(resp),
                Control::EndHandler(handler) => self.on_end = Some(handler),
                _ => {}
            }
        }

        if let Err(err) = self.link.close().await {
            log_debug!("detach of {} failed: {err}", self.address);
        }

        let dropped = self.buffer.len();
        self.buffer.clear();
        self.sync_buffered();
        if dropped > 0 {
            log_debug!("{dropped} buffered message(s) on {} dropped", self.address);
        }
        log_info!("consumer on {} stopped", self.address);

        if let Some(end) = self.on_end.take() {
            end();
        }
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }
}
