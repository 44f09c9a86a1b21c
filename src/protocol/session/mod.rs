pub mod state;
pub use state::{SessionConfig, SessionEvent, SessionLifecycleState, SessionState};

use super::{
    codec::Codec,
    frame::{
        apci::{
            iframe_wire_size_for_asdu, new_iframe, new_sframe, new_uframe, ApciKind, UApci,
            APDU_SIZE_MAX, U_STARTDT_ACTIVE, U_STARTDT_CONFIRM, U_STOPDT_ACTIVE, U_STOPDT_CONFIRM,
            U_TESTFR_ACTIVE, U_TESTFR_CONFIRM,
        },
        asdu::{Asdu, CauseOfTransmission, CommonAddr, TypeID},
        cproc::{double_cmd, single_cmd, DoubleCommandInfo, SingleCommandInfo},
    },
    Error,
};
use arc_swap::ArcSwapOption;
use futures::{SinkExt, StreamExt};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::TcpStream,
    select,
    sync::{broadcast, mpsc, watch, Mutex},
    task::JoinHandle,
    time::{interval, timeout, Instant},
};
use tokio_util::{codec::Framed, sync::CancellationToken};

#[derive(Debug, Clone)]
pub enum Request {
    I(Asdu),
    U(UApci),
}

pub struct Session {
    sender: Arc<ArcSwapOption<mpsc::Sender<Request>>>,
    events_tx: broadcast::Sender<SessionEvent>,
    asdu_tx: mpsc::Sender<Asdu>,
    asdu_rx: Mutex<Option<mpsc::Receiver<Asdu>>>,
    lifecycle_tx: watch::Sender<SessionLifecycleState>,
    lifecycle_rx: watch::Receiver<SessionLifecycleState>,
}

impl Session {
    /// Subscribe to link-layer events. Subscribe before the event loop is
    /// driven, or early events are missed.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Take the inbound ASDU receiver. Only the first caller gets it.
    pub async fn take_asdu_receiver(&self) -> Option<mpsc::Receiver<Asdu>> {
        let mut guard = self.asdu_rx.lock().await;
        guard.take()
    }

    pub fn lifecycle(&self) -> watch::Receiver<SessionLifecycleState> {
        self.lifecycle_rx.clone()
    }

    pub fn current_lifecycle(&self) -> SessionLifecycleState {
        self.lifecycle_rx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        if let Some(sender) = self.sender.load().as_ref() {
            return !sender.is_closed();
        }
        false
    }

    pub fn is_active(&self) -> bool {
        self.is_connected()
            && matches!(*self.lifecycle_rx.borrow(), SessionLifecycleState::Active)
    }

    /// Wait until the transport is up (the I/O driver has installed its
    /// sender) or the session terminated early. Returns false in the latter
    /// case.
    pub async fn wait_for_connection(&self) -> bool {
        if self.is_connected() {
            return true;
        }
        let mut rx = self.lifecycle();
        rx.wait_for(|s| {
            matches!(
                *s,
                SessionLifecycleState::Inactive
                    | SessionLifecycleState::Active
                    | SessionLifecycleState::Closed
                    | SessionLifecycleState::Failed(_)
            )
        })
        .await
        .map(|s| {
            matches!(
                *s,
                SessionLifecycleState::Inactive | SessionLifecycleState::Active
            )
        })
        .unwrap_or(false)
    }

    async fn send(&self, req: Request) -> Result<(), Error> {
        if let Some(sender) = self.sender.load_full() {
            sender.send(req).await.map_err(Error::ErrSendRequest)
        } else {
            Err(Error::ErrUseClosedConnection)
        }
    }

    pub async fn send_asdu(&self, asdu: Asdu) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::ErrUseClosedConnection);
        }
        if !self.is_active() {
            return Err(Error::ErrNotActive);
        }
        self.send(Request::I(asdu)).await
    }

    /// Request activation of data transfer. Unlike a collecting client this
    /// session never starts data transfer on its own; the caller owns the
    /// handshake.
    pub async fn send_start_dt(&self) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::ErrUseClosedConnection);
        }
        self.send(Request::U(UApci {
            function: U_STARTDT_ACTIVE,
        }))
        .await
    }

    pub async fn send_stop_dt(&self) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::ErrUseClosedConnection);
        }
        self.send(Request::U(UApci {
            function: U_STOPDT_ACTIVE,
        }))
        .await
    }

    pub async fn single_cmd(
        &self,
        type_id: TypeID,
        cot: CauseOfTransmission,
        ca: CommonAddr,
        cmd: SingleCommandInfo,
    ) -> Result<(), Error> {
        self.send_asdu(single_cmd(type_id, cot, ca, cmd)?).await
    }

    pub async fn double_cmd(
        &self,
        type_id: TypeID,
        cot: CauseOfTransmission,
        ca: CommonAddr,
        cmd: DoubleCommandInfo,
    ) -> Result<(), Error> {
        self.send_asdu(double_cmd(type_id, cot, ca, cmd)?).await
    }
}

pub struct SessionEventLoop {
    session: Arc<Session>,
    inner_cancel: CancellationToken,
    socket_addr: SocketAddr,
    config: SessionConfig,
    pre_connected: Option<TcpStream>,
}

impl SessionEventLoop {
    /// Spawn the I/O driver task for this session.
    pub fn spawn(self) -> JoinHandle<()> {
        let session = self.session;
        let cancel = self.inner_cancel.child_token();
        let socket_addr = self.socket_addr;
        let config = self.config;
        let pre = self.pre_connected;
        tokio::spawn(async move {
            if let Some(stream) = pre {
                run_connection_with_stream(session, stream, config, cancel).await;
            } else {
                run_connection(session, socket_addr, config, cancel).await;
            }
        })
    }

    /// Handle for stopping the spawned I/O driver. Cancelling is idempotent
    /// and safe on every exit path, connected or not.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner_cancel.clone()
    }

    pub fn cancel(&self) {
        self.inner_cancel.cancel();
    }
}

pub fn create(socket_addr: SocketAddr, config: SessionConfig) -> (Arc<Session>, SessionEventLoop) {
    let (events_tx, _rx) = broadcast::channel::<SessionEvent>(64);
    let (lifecycle_tx, lifecycle_rx) = watch::channel(SessionLifecycleState::Idle);
    let (asdu_tx, asdu_rx) = mpsc::channel::<Asdu>(64);
    let sender: Arc<ArcSwapOption<mpsc::Sender<Request>>> = Arc::new(ArcSwapOption::from(None));

    let session = Arc::new(Session {
        sender,
        events_tx,
        asdu_tx,
        asdu_rx: Mutex::new(Some(asdu_rx)),
        lifecycle_tx,
        lifecycle_rx,
    });
    let event_loop = SessionEventLoop {
        session: Arc::clone(&session),
        inner_cancel: CancellationToken::new(),
        socket_addr,
        config,
        pre_connected: None,
    };
    (session, event_loop)
}

pub fn create_with_stream(
    socket_addr: SocketAddr,
    config: SessionConfig,
    stream: TcpStream,
) -> (Arc<Session>, SessionEventLoop) {
    let (session, mut event_loop) = create(socket_addr, config);
    event_loop.pre_connected = Some(stream);
    (session, event_loop)
}

async fn run_connection(
    session: Arc<Session>,
    socket_addr: SocketAddr,
    config: SessionConfig,
    cancel: CancellationToken,
) {
    // single transport attempt, no reconnect
    let _ = session.lifecycle_tx.send(SessionLifecycleState::Connecting);
    let connect_fut = TcpStream::connect(socket_addr);
    let transport = match timeout(
        Duration::from_millis(config.connection_timeout_ms),
        connect_fut,
    )
    .await
    {
        Ok(Ok(t)) => t,
        Ok(Err(e)) => {
            let reason = format!("connect failed: {}", e);
            fail(&session, reason);
            return;
        }
        Err(_elapsed) => {
            let reason = format!("connect timeout after {} ms", config.connection_timeout_ms);
            tracing::warn!(timeout_ms = config.connection_timeout_ms, "connect timeout");
            fail(&session, reason);
            return;
        }
    };
    run_connection_with_stream(session, transport, config, cancel).await;
}

fn fail(session: &Session, reason: String) {
    let _ = session
        .events_tx
        .send(SessionEvent::Failed(reason.clone()));
    let _ = session
        .lifecycle_tx
        .send(SessionLifecycleState::Failed(reason));
}

async fn run_connection_with_stream(
    session: Arc<Session>,
    transport: TcpStream,
    config: SessionConfig,
    cancel: CancellationToken,
) {
    if let Err(e) = transport.set_nodelay(config.tcp_nodelay) {
        tracing::warn!(error=%e, tcp_nodelay=config.tcp_nodelay, "set TCP_NODELAY failed");
    }
    let mut framed = Framed::new(transport, Codec);
    let (tx, mut rx) = mpsc::channel::<Request>(config.send_queue_capacity);
    session.sender.store(Some(Arc::new(tx)));

    // transport is up, data transfer stays inactive until STARTDT is confirmed
    let _ = session.lifecycle_tx.send(SessionLifecycleState::Inactive);
    let _ = session.events_tx.send(SessionEvent::Opened);

    let mut state = SessionState::new(Instant::now());
    let mut tick = interval(Duration::from_millis(100));

    loop {
        select! {
            _ = cancel.cancelled() => { break; }
            _ = tick.tick() => {
                let now = Instant::now();

                // t3: idle test frame
                if now.duration_since(state.idle_since).as_millis() as u64 >= config.t3_ms {
                    if let Err(e) = framed.send(new_uframe(U_TESTFR_ACTIVE)).await {
                        tracing::warn!(error=%e, "send TESTFR failed");
                        break;
                    }
                    state.idle_since = now;
                }

                // t2/w: aggregated S-ACK
                if state.should_send_s_ack(now, config.t2_ms, config.w_threshold) {
                    if let Err(e) = framed.send(new_sframe(state.rcv_sn)).await {
                        tracing::warn!(error=%e, "send S-ACK failed");
                        break;
                    }
                    state.mark_s_ack_sent();
                }
            }

            // app -> wire
            maybe_req = rx.recv() => {
                match maybe_req {
                    Some(Request::I(asdu)) => {
                        if !matches!(*session.lifecycle_rx.borrow(), SessionLifecycleState::Active) {
                            tracing::warn!("dropping I-frame: data transfer not active");
                            continue;
                        }
                        if iframe_wire_size_for_asdu(&asdu) > APDU_SIZE_MAX {
                            tracing::warn!("dropping I-frame: encoded ASDU exceeds APDU size");
                            continue;
                        }
                        if !state.window_has_capacity(config.k_window) {
                            tracing::warn!(k = config.k_window, "dropping I-frame: send window full");
                            continue;
                        }

                        let apdu = new_iframe(asdu, state.send_sn, state.rcv_sn);
                        if let Err(e) = framed.send(apdu).await {
                            tracing::warn!(error=%e, "send i-frame failed");
                            break;
                        }
                        state.ack_rcvsn = state.rcv_sn;
                        state.send_sn = SessionState::seq_add(state.send_sn, 1);
                    }
                    Some(Request::U(u)) => {
                        if let Err(e) = framed.send(new_uframe(u.function)).await {
                            tracing::warn!(error=%e, "send u-frame failed");
                            break;
                        }
                    }
                    None => { break; }
                }
            }

            // wire -> app
            maybe_apdu = framed.next() => {
                match maybe_apdu {
                    Some(Ok(apdu)) => {
                        state.idle_since = Instant::now();
                        match apdu.apci.into() {
                            ApciKind::I(iapci) => {
                                if !state.update_send_ack(iapci.rcv_sn)
                                    || !state.advance_receive_seq(iapci.send_sn)
                                {
                                    tracing::error!("invalid ack or receive sequence");
                                    break;
                                }
                                state.mark_unacked_receive(Instant::now());

                                if let Some(asdu) = apdu.asdu {
                                    let _ = session.asdu_tx.try_send(asdu);
                                }
                            }
                            ApciKind::U(uapci) => {
                                match uapci.function {
                                    U_STARTDT_CONFIRM => {
                                        let _ = session.lifecycle_tx.send(SessionLifecycleState::Active);
                                        let _ = session.events_tx.send(SessionEvent::StartDtConfirmed);
                                    }
                                    U_STOPDT_CONFIRM => {
                                        let _ = session.lifecycle_tx.send(SessionLifecycleState::Inactive);
                                        let _ = session.events_tx.send(SessionEvent::StopDtConfirmed);
                                    }
                                    U_TESTFR_CONFIRM => {}
                                    U_TESTFR_ACTIVE => {
                                        if let Err(e) = framed.send(new_uframe(U_TESTFR_CONFIRM)).await {
                                            tracing::warn!(error=%e, "send TESTFR_CONFIRM failed");
                                        }
                                    }
                                    // controlling station side: the peer must not
                                    // drive the handshake
                                    U_STARTDT_ACTIVE | U_STOPDT_ACTIVE => {
                                        tracing::warn!(function = uapci.function, "unexpected U-frame request from controlled station");
                                    }
                                    _ => {}
                                }
                            }
                            ApciKind::S(sapci) => {
                                if !state.update_send_ack(sapci.rcv_sn) {
                                    tracing::error!("invalid s-ack");
                                    break;
                                }
                            }
                        }
                    }
                    _ => { break; }
                }
            }
        }
    }

    // on exit, transition lifecycle to Closing -> Closed once
    match session.current_lifecycle() {
        SessionLifecycleState::Closing
        | SessionLifecycleState::Closed
        | SessionLifecycleState::Failed(_) => {}
        _ => {
            let _ = session.lifecycle_tx.send(SessionLifecycleState::Closing);
        }
    }
    // best-effort close and clear the sender to reflect disconnected state
    let _ = framed.close().await;
    session.sender.store(None);
    let _ = session.events_tx.send(SessionEvent::Closed);
    let _ = session.lifecycle_tx.send(SessionLifecycleState::Closed);
}
