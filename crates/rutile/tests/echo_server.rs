//! End-to-end tests running the echo handler through a real server.
//!
//! Each test binds to an ephemeral port, drives plain blocking
//! `std::net::TcpStream` clients against the reactor, and shuts the
//! server down at the end. Read timeouts keep a broken server from
//! hanging the suite.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use rutile::Server;
use rutile_echo::{BUF_CAPACITY, EchoHandler};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

fn start_echo_server() -> Server {
    let mut server = Server::build(EchoHandler::default())
        .host("127.0.0.1")
        .port(0)
        .pool_size(2)
        .poll_timeout(Duration::from_millis(50));
    server.start().expect("echo server starts");
    server
}

fn connect(server: &Server) -> TcpStream {
    let addr = server.local_addr().expect("server has a local address");
    let stream = TcpStream::connect(addr).expect("client connects");
    stream
        .set_read_timeout(Some(CLIENT_TIMEOUT))
        .expect("read timeout set");
    stream
}

fn read_exact_echo(stream: &mut TcpStream, expected: &[u8]) {
    let mut got = vec![0u8; expected.len()];
    stream.read_exact(&mut got).expect("echo arrives in full");
    assert_eq!(got, expected);
}

#[test]
fn echoes_a_single_message() {
    let mut server = start_echo_server();
    let mut client = connect(&server);

    client.write_all(b"ping").expect("send");
    read_exact_echo(&mut client, b"ping");

    server.shutdown();
}

#[test]
fn echoes_to_concurrent_clients_independently() {
    let mut server = start_echo_server();
    let addr = server.local_addr().expect("server has a local address");

    let workers: Vec<_> = (0..3)
        .map(|i| {
            thread::Builder::new()
                .name(format!("echo-client-{i}"))
                .spawn(move || {
                    let mut client = TcpStream::connect(addr).expect("client connects");
                    client
                        .set_read_timeout(Some(CLIENT_TIMEOUT))
                        .expect("read timeout set");
                    for round in 0..10u32 {
                        let msg = format!("client-{i}-round-{round}");
                        client.write_all(msg.as_bytes()).expect("send");
                        let mut got = vec![0u8; msg.len()];
                        client.read_exact(&mut got).expect("echo arrives");
                        assert_eq!(got, msg.as_bytes());
                    }
                })
                .expect("spawn client thread")
        })
        .collect();

    for worker in workers {
        worker.join().expect("client thread succeeds");
    }

    server.shutdown();
}

#[test]
fn serves_every_connection_pending_at_startup() {
    // Bind first without spawning threads, so several connections sit in
    // the listen backlog and arrive as one readiness batch when the
    // accept loop's first wait returns. Every one of them must be
    // accepted and served.
    let mut server = Server::build(EchoHandler::default())
        .host("127.0.0.1")
        .port(0)
        .pool_size(2)
        .poll_timeout(Duration::from_millis(50));
    server.init().expect("listener binds");
    let addr = server.local_addr().expect("server has a local address");

    let mut clients: Vec<TcpStream> = (0..5)
        .map(|_| {
            let stream = TcpStream::connect(addr).expect("client connects");
            stream
                .set_read_timeout(Some(CLIENT_TIMEOUT))
                .expect("read timeout set");
            stream
        })
        .collect();

    server.start().expect("echo server starts");

    for (i, client) in clients.iter_mut().enumerate() {
        let msg = format!("backlog-{i}");
        client.write_all(msg.as_bytes()).expect("send");
        let mut got = vec![0u8; msg.len()];
        client.read_exact(&mut got).expect("echo arrives");
        assert_eq!(got, msg.as_bytes());
    }

    server.shutdown();
}

#[test]
fn reassembles_fragmented_sends() {
    let mut server = start_echo_server();
    let mut client = connect(&server);

    // Trickle one message across several small writes with pauses so the
    // server sees it in fragments.
    let message = b"fragmented-hello";
    for piece in message.chunks(3) {
        client.write_all(piece).expect("send fragment");
        client.flush().expect("flush");
        thread::sleep(Duration::from_millis(10));
    }

    let mut got = Vec::with_capacity(message.len());
    let mut chunk = [0u8; 64];
    while got.len() < message.len() {
        let n = client.read(&mut chunk).expect("echo arrives");
        assert!(n > 0, "server closed before echoing everything");
        got.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(got, message);

    server.shutdown();
}

#[test]
fn echoes_payload_larger_than_the_session_buffer() {
    let mut server = start_echo_server();
    let client = connect(&server);

    // 256 KiB forces many fill/flush cycles through the 1 KiB session
    // buffer and exercises partial writes under backpressure. A
    // concurrent reader keeps the client's receive window open while the
    // writer pushes.
    let payload: Vec<u8> = (0..256 * 1024)
        .map(|i| u8::try_from(i % 251).expect("fits in a byte"))
        .collect();
    assert!(payload.len() > BUF_CAPACITY);

    let mut reader = client.try_clone().expect("clone stream for reading");
    let expected = payload.clone();
    let drain = thread::Builder::new()
        .name("echo-drain".to_owned())
        .spawn(move || {
            let mut got = Vec::with_capacity(expected.len());
            let mut chunk = [0u8; 8192];
            while got.len() < expected.len() {
                let n = reader.read(&mut chunk).expect("echo arrives");
                assert!(n > 0, "server closed before echoing everything");
                got.extend_from_slice(&chunk[..n]);
            }
            assert_eq!(got, expected);
        })
        .expect("spawn drain thread");

    let mut writer = client;
    writer.write_all(&payload).expect("send payload");
    drain.join().expect("drain thread succeeds");

    server.shutdown();
}

#[test]
fn peer_close_leaves_other_sessions_untouched() {
    let mut server = start_echo_server();
    let mut survivor = connect(&server);
    let casualty = connect(&server);

    // Make sure both connections are attached before killing one.
    survivor.write_all(b"warmup").expect("send");
    read_exact_echo(&mut survivor, b"warmup");

    drop(casualty);
    thread::sleep(Duration::from_millis(100));

    survivor.write_all(b"still-here").expect("send");
    read_exact_echo(&mut survivor, b"still-here");

    server.shutdown();
}

#[test]
fn server_closes_session_on_client_shutdown() {
    let mut server = start_echo_server();
    let mut client = connect(&server);

    client.write_all(b"last-words").expect("send");
    read_exact_echo(&mut client, b"last-words");

    client
        .shutdown(std::net::Shutdown::Write)
        .expect("half-close");

    // The reactor sees EOF and closes its side; our read returns 0.
    let mut chunk = [0u8; 16];
    let n = client.read(&mut chunk).expect("read end of stream");
    assert_eq!(n, 0);

    server.shutdown();
}

#[test]
fn shutdown_stops_accepting_new_connections() {
    let mut server = start_echo_server();
    let addr = server.local_addr().expect("server has a local address");

    server.shutdown();
    assert!(!server.is_running());

    // shutdown() joins every thread, so the listener socket is gone by
    // the time it returns.
    match TcpStream::connect_timeout(&addr, Duration::from_millis(500)) {
        Ok(_) => panic!("connected to a server that shut down"),
        Err(e) => assert!(
            matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::TimedOut),
            "unexpected error kind: {e}"
        ),
    }
}

#[test]
fn shutdown_is_idempotent() {
    let mut server = start_echo_server();
    server.shutdown();
    server.shutdown();
    assert!(!server.is_running());
}
