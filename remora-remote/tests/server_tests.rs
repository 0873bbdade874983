//! End-to-end tests against a bound server with the loopback driver.

use futures_util::{SinkExt, StreamExt};
use remora_controller::{
    actuator::ExclusiveActuator,
    arm_config::ArmConfig,
    arm_driver::{JointPositions, MockArmDriver},
};
use remora_remote::{
    config::ServerConfig,
    protocol::{ErrorCode, ResponseStatus, SafetyStatus, ServerMessage},
    server::RemoteServer,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    failure_switch: Arc<AtomicBool>,
    // dropping this shuts the server down
    _shutdown: watch::Sender<bool>,
}

async fn spawn_server() -> TestServer {
    let driver = MockArmDriver::new(JointPositions::default());
    let failure_switch = driver.failure_switch();
    let actuator = Arc::new(
        ExclusiveActuator::connect(driver, Duration::from_millis(100))
            .await
            .unwrap(),
    );
    let config = ServerConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        tick_rate_hz: 100,
        status_interval_ms: 5,
        session_timeout_s: 10,
        ..ServerConfig::default()
    };
    let bound = RemoteServer::new(config, ArmConfig::default(), actuator)
        .bind()
        .await
        .unwrap();
    let addr = bound.local_addr();
    let (shutdown, receiver) = watch::channel(false);
    tokio::spawn(bound.serve(receiver));
    TestServer {
        addr,
        failure_switch,
        _shutdown: shutdown,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    client
}

async fn next_server_message(client: &mut Client) -> ServerMessage {
    loop {
        let frame = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("transport error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("unparseable server message");
        }
    }
}

async fn wait_for(
    client: &mut Client,
    mut predicate: impl FnMut(&ServerMessage) -> bool,
) -> ServerMessage {
    for _ in 0..500 {
        let message = next_server_message(client).await;
        if predicate(&message) {
            return message;
        }
    }
    panic!("expected message never arrived");
}

async fn send(client: &mut Client, json: &str) {
    client
        .send(Message::Text(json.to_owned().into()))
        .await
        .unwrap();
}

fn response_matches(
    message: &ServerMessage,
    command: &str,
    status: ResponseStatus,
) -> Option<Option<ErrorCode>> {
    match message {
        ServerMessage::Response {
            command: c,
            status: s,
            error,
        } if c == command && *s == status => Some(*error),
        _ => None,
    }
}

#[tokio::test]
async fn welcome_comes_first_and_status_flows_without_sending() {
    let server = spawn_server().await;
    let mut client = connect(server.addr).await;

    let first = next_server_message(&mut client).await;
    match first {
        ServerMessage::Welcome {
            robot_type,
            capabilities,
            ..
        } => {
            assert_eq!(robot_type, "so-100");
            assert!(capabilities.contains(&"emergency_stop".to_owned()));
        }
        other => panic!("expected welcome, got {:?}", other),
    }

    // pure observer: status arrives with no inbound traffic
    let status = wait_for(&mut client, |m| matches!(m, ServerMessage::Status(_))).await;
    match status {
        ServerMessage::Status(report) => {
            assert!(report.robot_connected);
            assert_eq!(report.safety_status, SafetyStatus::Normal);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn move_forward_advances_target_by_one_step() {
    let server = spawn_server().await;
    let mut client = connect(server.addr).await;
    next_server_message(&mut client).await; // welcome

    send(
        &mut client,
        "{\"type\":\"control\",\"command\":\"move\",\"direction\":\"forward\",\"timestamp\":1.0}",
    )
    .await;
    let ack = wait_for(&mut client, |m| {
        response_matches(m, "move", ResponseStatus::Success).is_some()
    })
    .await;
    assert!(response_matches(&ack, "move", ResponseStatus::Success)
        .unwrap()
        .is_none());

    wait_for(&mut client, |m| match m {
        ServerMessage::Status(report) => (report.target.elbow_flex - 0.5).abs() < 1e-6,
        _ => false,
    })
    .await;
}

#[tokio::test]
async fn emergency_stop_latches_and_rejects_moves() {
    let server = spawn_server().await;
    let mut client = connect(server.addr).await;
    next_server_message(&mut client).await;

    send(
        &mut client,
        "{\"type\":\"control\",\"command\":\"emergency_stop\",\"timestamp\":1.0}",
    )
    .await;
    wait_for(&mut client, |m| {
        response_matches(m, "emergency_stop", ResponseStatus::Success).is_some()
    })
    .await;
    wait_for(&mut client, |m| match m {
        ServerMessage::Status(report) => report.emergency_stop,
        _ => false,
    })
    .await;

    send(
        &mut client,
        "{\"type\":\"control\",\"command\":\"move\",\"direction\":\"forward\",\"timestamp\":2.0}",
    )
    .await;
    let rejection = wait_for(&mut client, |m| {
        response_matches(m, "move", ResponseStatus::Error).is_some()
    })
    .await;
    assert_eq!(
        response_matches(&rejection, "move", ResponseStatus::Error).unwrap(),
        Some(ErrorCode::SafetyViolation)
    );

    // target never moved
    let status = wait_for(&mut client, |m| matches!(m, ServerMessage::Status(_))).await;
    match status {
        ServerMessage::Status(report) => {
            assert_eq!(report.target.elbow_flex, 0.0);
            assert_eq!(report.safety_status, SafetyStatus::Warning);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn hardware_fault_suspends_actuation_and_resume_recovers() {
    let server = spawn_server().await;
    let mut client = connect(server.addr).await;
    next_server_message(&mut client).await;

    server.failure_switch.store(true, Ordering::Release);
    send(
        &mut client,
        "{\"type\":\"control\",\"command\":\"move\",\"direction\":\"up\",\"timestamp\":1.0}",
    )
    .await;

    wait_for(&mut client, |m| match m {
        ServerMessage::Status(report) => {
            !report.robot_connected && report.safety_status == SafetyStatus::Error
        }
        _ => false,
    })
    .await;

    // no actuation while disconnected
    send(
        &mut client,
        "{\"type\":\"control\",\"command\":\"move\",\"direction\":\"up\",\"timestamp\":2.0}",
    )
    .await;
    let status = wait_for(&mut client, |m| matches!(m, ServerMessage::Status(_))).await;
    match status {
        ServerMessage::Status(report) => assert_eq!(report.target.shoulder_lift, 0.0),
        _ => unreachable!(),
    }

    server.failure_switch.store(false, Ordering::Release);
    send(
        &mut client,
        "{\"type\":\"control\",\"command\":\"resume\",\"timestamp\":3.0}",
    )
    .await;
    wait_for(&mut client, |m| match m {
        ServerMessage::Status(report) => report.robot_connected,
        _ => false,
    })
    .await;
}

#[tokio::test]
async fn both_sessions_observe_the_same_broadcast() {
    let server = spawn_server().await;
    let mut driver_client = connect(server.addr).await;
    let mut observer = connect(server.addr).await;
    next_server_message(&mut driver_client).await;
    next_server_message(&mut observer).await;

    send(
        &mut driver_client,
        "{\"type\":\"control\",\"command\":\"move\",\"direction\":\"right\",\"timestamp\":1.0}",
    )
    .await;

    let seen_by = |message: &ServerMessage| match message {
        ServerMessage::Status(report) => (report.target.shoulder_pan - 0.5).abs() < 1e-6,
        _ => false,
    };
    let from_driver = wait_for(&mut driver_client, seen_by).await;
    let from_observer = wait_for(&mut observer, seen_by).await;
    match (from_driver, from_observer) {
        (ServerMessage::Status(a), ServerMessage::Status(b)) => {
            assert_eq!(a.target, b.target);
            assert_eq!(a.robot_connected, b.robot_connected);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn malformed_frame_keeps_the_session_alive() {
    let server = spawn_server().await;
    let mut client = connect(server.addr).await;
    next_server_message(&mut client).await;

    send(&mut client, "{this is not json").await;
    let rejection = wait_for(&mut client, |m| {
        matches!(
            m,
            ServerMessage::Response {
                status: ResponseStatus::Error,
                ..
            }
        )
    })
    .await;
    match rejection {
        ServerMessage::Response { error, .. } => {
            assert_eq!(error, Some(ErrorCode::DecodeError));
        }
        _ => unreachable!(),
    }

    // session survived: a valid ping still yields pong
    send(&mut client, "{\"type\":\"ping\",\"timestamp\":9.0}").await;
    let pong = wait_for(&mut client, |m| matches!(m, ServerMessage::Pong { .. })).await;
    assert_eq!(pong, ServerMessage::Pong { timestamp: 9.0 });
}

#[tokio::test]
async fn config_request_reports_the_tick_rate() {
    let server = spawn_server().await;
    let mut client = connect(server.addr).await;
    next_server_message(&mut client).await;

    send(
        &mut client,
        "{\"type\":\"request\",\"command\":\"config\",\"timestamp\":0.0}",
    )
    .await;
    let config = wait_for(&mut client, |m| matches!(m, ServerMessage::Config { .. })).await;
    match config {
        ServerMessage::Config {
            dof, tick_rate_hz, ..
        } => {
            assert_eq!(dof, 6);
            assert_eq!(tick_rate_hz, 100);
        }
        _ => unreachable!(),
    }
}
