//! End-to-end command issuance scenarios against a loopback mock RTU that
//! speaks the real codec.

use futures::{SinkExt, StreamExt};
use iec104ctl::{
    protocol::{
        frame::apci::{
            new_iframe, new_uframe, ApciKind, U_STARTDT_ACTIVE, U_STARTDT_CONFIRM,
            U_TESTFR_ACTIVE, U_TESTFR_CONFIRM,
        },
        Asdu, Cause, Codec, TypeID,
    },
    CommandIssuer, CommandOutcome, CommandRequest, IssueConfig, IssueError,
};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};
use tokio::{net::TcpListener, task::JoinHandle, time::sleep};
use tokio_util::{codec::Framed, sync::CancellationToken};

#[derive(Clone, Copy)]
enum CommandResponse {
    ActivationCon,
    UnknownIoa,
    Silent,
}

#[derive(Clone, Copy)]
struct MockBehavior {
    confirm_dt: bool,
    dt_delay: Option<Duration>,
    command_response: CommandResponse,
}

impl MockBehavior {
    fn confirming(response: CommandResponse) -> Self {
        Self {
            confirm_dt: true,
            dt_delay: None,
            command_response: response,
        }
    }
}

struct MockRtu {
    addr: SocketAddr,
    /// Command-carrying I-frames received from the client
    commands: Arc<Mutex<Vec<Asdu>>>,
    command_count: Arc<AtomicUsize>,
    _task: JoinHandle<()>,
}

async fn spawn_mock_rtu(behavior: MockBehavior) -> MockRtu {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let commands: Arc<Mutex<Vec<Asdu>>> = Arc::new(Mutex::new(Vec::new()));
    let command_count = Arc::new(AtomicUsize::new(0));

    let commands_in_task = Arc::clone(&commands);
    let count_in_task = Arc::clone(&command_count);
    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, Codec);
        let mut server_send_sn: u16 = 0;
        let mut client_frames: u16 = 0;

        while let Some(Ok(apdu)) = framed.next().await {
            match ApciKind::from(apdu.apci) {
                ApciKind::U(u) if u.function == U_STARTDT_ACTIVE => {
                    if behavior.confirm_dt {
                        if let Some(delay) = behavior.dt_delay {
                            sleep(delay).await;
                        }
                        framed.send(new_uframe(U_STARTDT_CONFIRM)).await.unwrap();
                    }
                }
                ApciKind::U(u) if u.function == U_TESTFR_ACTIVE => {
                    framed.send(new_uframe(U_TESTFR_CONFIRM)).await.unwrap();
                }
                ApciKind::U(_) => {}
                ApciKind::I(_) => {
                    client_frames += 1;
                    count_in_task.fetch_add(1, Ordering::SeqCst);
                    let Some(asdu) = apdu.asdu else { continue };
                    commands_in_task.lock().unwrap().push(asdu.clone());

                    let cause = match behavior.command_response {
                        CommandResponse::ActivationCon => Cause::ActivationCon,
                        CommandResponse::UnknownIoa => Cause::UnknownIOA,
                        CommandResponse::Silent => continue,
                    };
                    let reply = new_iframe(asdu.mirror(cause), server_send_sn, client_frames);
                    framed.send(reply).await.unwrap();
                    server_send_sn += 1;
                }
                ApciKind::S(_) => {}
            }
        }
    });

    MockRtu {
        addr,
        commands,
        command_count,
        _task: task,
    }
}

fn fast_config() -> IssueConfig {
    IssueConfig {
        connect_timeout_ms: 1000,
        dt_confirm_timeout_ms: 500,
        command_confirm_timeout_ms: 500,
        poll_interval_ms: 20,
        teardown_grace_ms: 10,
    }
}

fn single_at_100() -> CommandRequest {
    CommandRequest {
        ioa: 100,
        type_code: 45,
        value: 1,
        common_addr: None,
    }
}

#[tokio::test]
async fn activation_confirmed_resolves_confirmed() {
    let rtu = spawn_mock_rtu(MockBehavior::confirming(CommandResponse::ActivationCon)).await;
    let issuer = CommandIssuer::new(fast_config(), CancellationToken::new());

    let outcome = issuer.run(rtu.addr, single_at_100()).await.unwrap();

    // the CLI maps this outcome to exit code 0
    assert_eq!(outcome, CommandOutcome::Confirmed);
    assert_eq!(rtu.command_count.load(Ordering::SeqCst), 1);

    let mut sent = rtu.commands.lock().unwrap().remove(0);
    assert_eq!(sent.identifier.type_id, TypeID::C_SC_NA_1);
    let mut cmd = sent.get_single_cmd().unwrap();
    assert_eq!(cmd.ioa.addr().get(), 100);
    assert!(cmd.sco.scs().get());
}

#[tokio::test]
async fn unknown_ioa_rejection_resolves_rejected() {
    let rtu = spawn_mock_rtu(MockBehavior::confirming(CommandResponse::UnknownIoa)).await;
    let issuer = CommandIssuer::new(fast_config(), CancellationToken::new());

    let outcome = issuer.run(rtu.addr, single_at_100()).await.unwrap();

    // Current contract: the rejection unblocks the same wait as a
    // confirmation and the CLI still exits 0; the rejected IOA is reported
    // through the per-object error log.
    assert_eq!(outcome, CommandOutcome::Rejected);
    assert_eq!(rtu.command_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn double_command_off_maps_to_dcs_one() {
    let rtu = spawn_mock_rtu(MockBehavior::confirming(CommandResponse::ActivationCon)).await;
    let issuer = CommandIssuer::new(fast_config(), CancellationToken::new());
    let request = CommandRequest {
        ioa: 2000,
        type_code: 46,
        value: 0,
        common_addr: Some(1),
    };

    let outcome = issuer.run(rtu.addr, request).await.unwrap();
    assert_eq!(outcome, CommandOutcome::Confirmed);

    let mut sent = rtu.commands.lock().unwrap().remove(0);
    assert_eq!(sent.identifier.type_id, TypeID::C_DC_NA_1);
    assert_eq!(sent.identifier.common_addr, 1);
    let mut cmd = sent.get_double_cmd().unwrap();
    assert_eq!(cmd.ioa.addr().get(), 2000);
    assert_eq!(cmd.dco.dcs().get().value(), 1);
}

#[tokio::test]
async fn dt_confirmation_timeout_sends_no_command() {
    let rtu = spawn_mock_rtu(MockBehavior {
        confirm_dt: false,
        dt_delay: None,
        command_response: CommandResponse::ActivationCon,
    })
    .await;
    let issuer = CommandIssuer::new(fast_config(), CancellationToken::new());

    let err = issuer.run(rtu.addr, single_at_100()).await.unwrap_err();

    assert!(matches!(err, IssueError::DtConfirmTimeout));
    assert_eq!(rtu.command_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn connect_failure_is_immediate_and_terminal() {
    // bind then drop, so the port is known dead
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let issuer = CommandIssuer::new(fast_config(), CancellationToken::new());
    let started = Instant::now();
    let err = issuer.run(addr, single_at_100()).await.unwrap_err();

    assert!(matches!(err, IssueError::Connect { .. }));
    // bounded by the connect timeout plus the teardown grace pause
    assert!(started.elapsed() < Duration::from_millis(2500));
}

#[tokio::test]
async fn invalid_type_selector_still_reaches_confirmation_wait() {
    let rtu = spawn_mock_rtu(MockBehavior::confirming(CommandResponse::ActivationCon)).await;
    let issuer = CommandIssuer::new(fast_config(), CancellationToken::new());
    let request = CommandRequest {
        ioa: 100,
        type_code: 47,
        value: 1,
        common_addr: None,
    };

    let started = Instant::now();
    let err = issuer.run(rtu.addr, request).await.unwrap_err();

    // nothing was transmitted, so the confirmation wait runs into its bound
    assert!(matches!(err, IssueError::CommandConfirmTimeout));
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(rtu.command_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dt_confirmation_is_never_observed_before_delivery() {
    let delay = Duration::from_millis(150);
    let rtu = spawn_mock_rtu(MockBehavior {
        confirm_dt: true,
        dt_delay: Some(delay),
        command_response: CommandResponse::ActivationCon,
    })
    .await;
    let issuer = CommandIssuer::new(fast_config(), CancellationToken::new());

    let started = Instant::now();
    let outcome = issuer.run(rtu.addr, single_at_100()).await.unwrap();

    // the DT wait cannot resolve before the delayed confirmation arrives
    assert_eq!(outcome, CommandOutcome::Confirmed);
    assert!(started.elapsed() >= delay);
}

#[tokio::test]
async fn interrupt_cancels_at_the_wait_boundary() {
    let rtu = spawn_mock_rtu(MockBehavior::confirming(CommandResponse::Silent)).await;
    let cancel = CancellationToken::new();
    let issuer = CommandIssuer::new(
        IssueConfig {
            command_confirm_timeout_ms: 10_000,
            ..fast_config()
        },
        cancel.clone(),
    );

    let canceller = tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let err = issuer.run(rtu.addr, single_at_100()).await.unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, IssueError::Cancelled));
    // resolved by cancellation, not by the 10 s confirmation bound
    assert!(started.elapsed() < Duration::from_millis(2000));
}
