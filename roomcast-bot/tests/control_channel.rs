//! Control-channel integration tests against a mock player socket
//!
//! A task stands in for the player process: it binds the Unix socket, runs
//! the listening side of the handshake, and answers commands until `stop`.

#![cfg(unix)]

use roomcast_bot::player::ControlChannel;
use roomcast_common::control::{self, Command, ControlError, Reply};
use tokio::net::{UnixListener, UnixStream};

const KEY: &str = "sesame";

async fn serve_commands(mut stream: UnixStream) {
    loop {
        let frame = match control::read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(_) => return,
        };
        let command = match Command::decode(&frame) {
            Ok(command) => command,
            Err(_) => return,
        };
        let reply = match command {
            Command::Play => Reply::ok(),
            Command::GetPos => Reply::ok_with((5u64, 120u64)),
            Command::GetLivePos => Reply::ok_with(42u64),
            Command::Seek(delta) if delta.abs() > 1_000 => Reply::error("seek failed"),
            Command::Seek(_) => Reply::ok(),
            Command::Stop => {
                let _ = control::write_frame(&mut stream, &Reply::ok().encode()).await;
                return;
            }
        };
        if control::write_frame(&mut stream, &reply.encode()).await.is_err() {
            return;
        }
    }
}

async fn mock_player(listener: UnixListener, key: &'static str) {
    let (mut stream, _) = listener.accept().await.expect("accept");
    if control::server_handshake(&mut stream, key.as_bytes())
        .await
        .is_err()
    {
        return;
    }
    serve_commands(stream).await;
}

#[tokio::test]
async fn test_command_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("player.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let server = tokio::spawn(mock_player(listener, KEY));

    let mut channel = ControlChannel::connect(&path, KEY).await.expect("connect");

    assert!(channel.send_command(&Command::Play).await.unwrap().is_ok());

    let reply = channel.send_command(&Command::GetPos).await.unwrap();
    assert_eq!(reply.payload::<(u64, u64)>().unwrap(), (5, 120));

    let reply = channel.send_command(&Command::GetLivePos).await.unwrap();
    assert_eq!(reply.payload::<u64>().unwrap(), 42);

    assert!(channel.send_command(&Command::Seek(30)).await.unwrap().is_ok());

    let reply = channel.send_command(&Command::Seek(-10_000)).await.unwrap();
    assert!(!reply.is_ok());

    assert!(channel.send_command(&Command::Stop).await.unwrap().is_ok());
    server.await.unwrap();
}

#[tokio::test]
async fn test_wrong_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("player.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let server = tokio::spawn(mock_player(listener, KEY));

    let result = ControlChannel::connect(&path, "wrong-key").await;
    assert!(matches!(result, Err(ControlError::AuthRejected)));
    server.await.unwrap();
}

#[tokio::test]
async fn test_peer_gone_is_an_ipc_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("player.sock");
    let listener = UnixListener::bind(&path).unwrap();

    // handshake, then hang up without serving any commands
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let _ = control::server_handshake(&mut stream, KEY.as_bytes()).await;
    });

    let mut channel = ControlChannel::connect(&path, KEY).await.expect("connect");
    server.await.unwrap();

    let result = channel.send_command(&Command::GetPos).await;
    assert!(matches!(result, Err(ControlError::Io(_))));
}
