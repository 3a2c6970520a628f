//! Console bridge end to end: RCON clients on one side, a scripted text
//! console on the other.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use futures::{SinkExt, StreamExt};
use rcon_bridge::core::packet::AUTH_FAILED_ID;
use rcon_bridge::{
    packet_type, BoundServer, BridgeConfig, ClientConfig, ConsoleBridge, ManagedConsole, Packet, PacketCodec,
    ProtocolError, RconClient,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

const TIMEOUT: Duration = Duration::from_secs(2);
const MARKER: &str = "192.0.2.0";

type ConsoleLog = Arc<Mutex<Vec<String>>>;

/// What the fake game server prints for one input line.
fn respond(line: &str, swallow_next_ban: &mut bool) -> Vec<String> {
    if line == format!("ban-ip {MARKER}") {
        return vec![format!("Banned IP {MARKER}: Banned by an operator.")];
    }
    if let Some(reason) = line.strip_prefix(&format!("ban-ip {MARKER} ")) {
        if std::mem::take(swallow_next_ban) {
            return Vec::new();
        }
        return vec![format!("Banned IP {MARKER}: {reason}")];
    }
    if line == format!("pardon-ip {MARKER}") {
        return vec![format!("Unbanned IP {MARKER}")];
    }
    match line {
        "list" => vec!["There are 0 of a max of 20 players online".into()],
        "multi" => vec!["line one".into(), "line two".into()],
        "silent" => Vec::new(),
        "hang" => {
            *swallow_next_ban = true;
            Vec::new()
        }
        "big" => vec!["x".repeat(5000)],
        other => vec![format!("ran {other}")],
    }
}

/// An in-memory console. Every line the bridge writes is recorded in order.
/// Sending on the returned channel closes the console's output.
fn fake_console() -> (ManagedConsole<DuplexStream, DuplexStream>, ConsoleLog, mpsc::Sender<()>) {
    let (bridge_input, console_input) = tokio::io::duplex(64 * 1024);
    let (mut console_output, bridge_output) = tokio::io::duplex(64 * 1024);
    let log: ConsoleLog = Arc::default();
    let (kill_tx, mut kill_rx) = mpsc::channel(1);

    let record = log.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(console_input).lines();
        let mut swallow = false;
        // Unrelated chatter before the first command.
        let _ = console_output
            .write_all(b"[12:00:00] [Server thread/INFO]: Done (3.2s)! For help, type \"help\"\n")
            .await;
        loop {
            let line = tokio::select! {
                Some(()) = kill_rx.recv() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => line,
                    _ => break,
                },
            };
            record.lock().unwrap().push(line.clone());
            for reply in respond(&line, &mut swallow) {
                let text = format!("[12:00:00] [Server thread/INFO]: {reply}\n");
                if console_output.write_all(text.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    });

    (ManagedConsole::new(bridge_input, bridge_output), log, kill_tx)
}

fn test_config() -> BridgeConfig {
    BridgeConfig {
        console_timeout: Duration::from_millis(500),
        shutdown_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

async fn start(config: BridgeConfig) -> (BoundServer, ConsoleLog, mpsc::Sender<()>) {
    let (console, log, kill) = fake_console();
    let bridge = ConsoleBridge::new(config).unwrap();
    let server = bridge.listen(console, 0, "127.0.0.1").await.unwrap();
    (server, log, kill)
}

async fn client(addr: SocketAddr) -> RconClient {
    let client = RconClient::new(ClientConfig::default());
    client
        .connect("any password", "127.0.0.1", addr.port(), TIMEOUT)
        .await
        .unwrap();
    client
}

async fn raw(addr: SocketAddr) -> Framed<TcpStream, PacketCodec> {
    Framed::new(TcpStream::connect(addr).await.unwrap(), PacketCodec::new())
}

async fn next(framed: &mut Framed<TcpStream, PacketCodec>) -> Packet {
    tokio::time::timeout(TIMEOUT, framed.next())
        .await
        .expect("reply in time")
        .expect("stream open")
        .expect("valid packet")
}

#[tokio::test]
async fn command_round_trip() {
    let (server, _log, _kill) = start(test_config()).await;
    let client = client(server.local_addr()).await;

    assert_eq!(
        client.command("list", TIMEOUT).await.unwrap(),
        "There are 0 of a max of 20 players online"
    );
    assert_eq!(client.command("multi", TIMEOUT).await.unwrap(), "line one line two");
    assert_eq!(client.command("silent", TIMEOUT).await.unwrap(), "Unknown request 2");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn large_output_is_split_and_reassembled() {
    let (server, _log, _kill) = start(test_config()).await;
    let mut framed = raw(server.local_addr()).await;

    framed.send(Packet::new(1, packet_type::AUTH, "").unwrap()).await.unwrap();
    assert_eq!(next(&mut framed).await.packet_type, packet_type::AUTH_RESPONSE);

    framed.send(Packet::new(2, packet_type::COMMAND, "big").unwrap()).await.unwrap();
    let first = next(&mut framed).await;
    let second = next(&mut framed).await;
    assert_eq!((first.id, second.id), (2, 2));
    assert_eq!(first.payload.len(), 4096);
    assert_eq!(first.payload.len() + second.payload.len(), 5000);

    let client = client(server.local_addr()).await;
    assert_eq!(client.command("big", TIMEOUT).await.unwrap(), "x".repeat(5000));
}

#[tokio::test]
async fn replies_keep_request_order_within_a_session() {
    let (server, _log, _kill) = start(test_config()).await;
    let mut framed = raw(server.local_addr()).await;

    framed.send(Packet::new(5, packet_type::AUTH, "pw").unwrap()).await.unwrap();
    framed.send(Packet::new(6, packet_type::COMMAND, "list").unwrap()).await.unwrap();
    framed.send(Packet::end(6)).await.unwrap();

    let auth = next(&mut framed).await;
    assert_eq!((auth.id, auth.packet_type), (5, packet_type::AUTH_RESPONSE));

    let reply = next(&mut framed).await;
    assert_eq!((reply.id, reply.packet_type), (6, packet_type::COMMAND_RESPONSE));
    assert_eq!(reply.payload, "There are 0 of a max of 20 players online");

    let end = next(&mut framed).await;
    assert_eq!(end.id, 6);
    assert!(end.is_end_echo());
}

#[tokio::test]
async fn unauthenticated_command_never_reaches_console() {
    let (server, log, _kill) = start(test_config()).await;
    let mut framed = raw(server.local_addr()).await;

    framed.send(Packet::new(3, packet_type::COMMAND, "stop").unwrap()).await.unwrap();
    let rejected = next(&mut framed).await;
    assert_eq!(rejected.id, AUTH_FAILED_ID);

    // An unknown type is answered locally too; its reply proves the session
    // processed everything before it.
    framed.send(Packet::new(4, 42, "").unwrap()).await.unwrap();
    let unknown = next(&mut framed).await;
    assert_eq!(unknown.id, 4);
    assert_eq!(unknown.payload, "Unknown request 2a");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let written = log.lock().unwrap().clone();
    assert!(
        written.iter().all(|line| line == &format!("ban-ip {MARKER}")),
        "console saw {written:?}"
    );
}

#[tokio::test]
async fn concurrent_clients_never_interleave_console_input() {
    let (server, log, _kill) = start(test_config()).await;
    let addr = server.local_addr();
    let (a, b) = tokio::join!(client(addr), client(addr));

    let run = |client: RconClient, name: &'static str| async move {
        let mut outputs = Vec::new();
        for i in 0..5 {
            let cmd = format!("{name}{i}");
            outputs.push((cmd.clone(), client.command(&cmd, TIMEOUT).await.unwrap()));
        }
        outputs
    };
    let (out_a, out_b) = tokio::join!(run(a, "alpha"), run(b, "beta"));
    for (cmd, output) in out_a.into_iter().chain(out_b) {
        assert_eq!(output, format!("ran {cmd}"));
    }

    let written = log.lock().unwrap().clone();
    let requests: Vec<_> = written
        .iter()
        .skip_while(|line| **line == format!("ban-ip {MARKER}"))
        .cloned()
        .collect();
    assert_eq!(requests.len(), 30, "console saw {written:?}");
    for triple in requests.chunks(3) {
        assert_eq!(triple[0], format!("pardon-ip {MARKER}"));
        assert!(!triple[1].contains(MARKER));
        assert!(triple[2].starts_with(&format!("ban-ip {MARKER} ")));
        assert!(triple[2].ends_with(",2"));
    }
}

#[tokio::test]
async fn multi_line_payload_is_one_console_command() {
    let (server, log, _kill) = start(test_config()).await;
    let mut framed = raw(server.local_addr()).await;

    framed.send(Packet::new(1, packet_type::AUTH, "").unwrap()).await.unwrap();
    next(&mut framed).await;
    framed
        .send(Packet::new(2, packet_type::COMMAND, "list\nop attacker\r\nsay hi").unwrap())
        .await
        .unwrap();
    let reply = next(&mut framed).await;
    assert_eq!(reply.id, 2);
    assert_eq!(reply.payload, "ran list op attacker  say hi");

    let written = log.lock().unwrap().clone();
    let requests: Vec<_> = written
        .iter()
        .skip_while(|line| **line == format!("ban-ip {MARKER}"))
        .cloned()
        .collect();
    assert_eq!(requests.len(), 3, "console saw {written:?}");
    assert_eq!(requests[0], format!("pardon-ip {MARKER}"));
    assert_eq!(requests[1], "list op attacker  say hi");
    assert!(requests[2].starts_with(&format!("ban-ip {MARKER} ")));
}

#[tokio::test]
async fn clients_may_reuse_the_same_request_id() {
    let (server, _log, _kill) = start(test_config()).await;
    let mut first = raw(server.local_addr()).await;
    let mut second = raw(server.local_addr()).await;

    for framed in [&mut first, &mut second] {
        framed.send(Packet::new(1, packet_type::AUTH, "").unwrap()).await.unwrap();
        next(framed).await;
    }
    first.send(Packet::new(1, packet_type::COMMAND, "one").unwrap()).await.unwrap();
    second.send(Packet::new(1, packet_type::COMMAND, "two").unwrap()).await.unwrap();

    let (a, b) = tokio::join!(next(&mut first), next(&mut second));
    assert_eq!((a.id, a.payload.as_str()), (1, "ran one"));
    assert_eq!((b.id, b.payload.as_str()), (1, "ran two"));
}

#[tokio::test]
async fn console_timeout_drops_reply_and_recovers() {
    let config = BridgeConfig {
        console_timeout: Duration::from_millis(150),
        ..test_config()
    };
    let (server, _log, _kill) = start(config).await;
    let client = client(server.local_addr()).await;

    // Nothing is sent for the lost command, but its END echo still follows.
    let started = Instant::now();
    assert_eq!(client.command("hang", TIMEOUT).await.unwrap(), "");
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(started.elapsed() < TIMEOUT);

    assert_eq!(
        client.command("list", TIMEOUT).await.unwrap(),
        "There are 0 of a max of 20 players online"
    );
}

#[tokio::test]
async fn console_exit_disconnects_sessions() {
    let (server, _log, kill) = start(test_config()).await;
    let client = client(server.local_addr()).await;
    assert!(client.command("list", TIMEOUT).await.is_ok());

    kill.send(()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = client.command("list", TIMEOUT).await;
    assert!(
        matches!(result, Err(ProtocolError::ConnectionError(_))),
        "got {result:?}"
    );
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let (server, _log, _kill) = start(test_config()).await;
    let addr = server.local_addr();
    let client = client(addr).await;
    assert!(client.command("list", TIMEOUT).await.is_ok());
    client.close();

    server.shutdown().await.unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}

#[test]
fn rejects_unusable_marker() {
    let config = BridgeConfig {
        marker_address: "two words".into(),
        ..Default::default()
    };
    assert!(ConsoleBridge::new(config).is_err());
}
