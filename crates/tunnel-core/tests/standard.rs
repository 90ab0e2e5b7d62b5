mod common;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use common::{FreezableProxy, Keys, RecordingLifecycle, TestKey, connect_when_ready, expect_reset, free_port, wait_for};
use russh::{
    Channel, MethodKind, MethodSet,
    keys::PublicKey,
    server::{self, Auth, Msg, Session},
};
use ssh_core::keys::keys_equal;
use tb_types::{StandardTunnelConfig, TunnelKind};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use tokio_util::sync::CancellationToken;
use tunnel_core::{
    MemoryStats, StandardTunnel, Stats, TunnelError, TunnelOptions, load_or_create_host_key,
};
use uuid::Uuid;

/// SSH server that accepts one public key and serves `direct-tcpip` by dialing the target.
#[derive(Clone)]
struct UpstreamServer {
    allowed: PublicKey,
}

impl server::Handler for UpstreamServer {
    type Error = russh::Error;

    async fn auth_publickey(&mut self, _user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        if keys_equal(key, &self.allowed) {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Ok(mut upstream) = TcpStream::connect((host_to_connect, port_to_connect as u16)).await else {
            return Ok(false);
        };
        tokio::spawn(async move {
            let mut stream = channel.into_stream();
            let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
        });
        Ok(true)
    }
}

async fn spawn_ssh_server(allowed: PublicKey) -> anyhow::Result<u16> {
    let mut config = server::Config {
        auth_rejection_time: Duration::from_millis(10),
        auth_rejection_time_initial: Some(Duration::from_millis(0)),
        ..Default::default()
    };
    config.methods = MethodSet::empty();
    config.methods.push(MethodKind::PublicKey);
    config.keys.push(load_or_create_host_key(None).await?);
    let config = Arc::new(config);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let handler = UpstreamServer { allowed };
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let config = config.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Ok(session) = server::run_stream(config, stream, handler).await {
                    let _ = session.await;
                }
            });
        }
    });
    Ok(port)
}

/// Line echo service standing in for the tunnelled application.
async fn spawn_echo() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    Ok(port)
}

fn tunnel_config(id: Uuid, tunnel_port: u16, ssh_port: u16, service_port: u16) -> StandardTunnelConfig {
    StandardTunnelConfig {
        id,
        created_at: Utc::now(),
        enabled: true,
        tunnel_port,
        ssh_user: None,
        ssh_host: "127.0.0.1".into(),
        ssh_port,
        service_host: "127.0.0.1".into(),
        service_port,
    }
}

fn options() -> TunnelOptions {
    TunnelOptions {
        dial_timeout: Duration::from_secs(5),
        stats_interval: Duration::from_millis(50),
        ..TunnelOptions::default()
    }
}

async fn read_line(reader: &mut (impl AsyncBufReadExt + Unpin)) -> anyhow::Result<String> {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line)).await??;
    Ok(line)
}

#[tokio::test(flavor = "multi_thread")]
async fn forwards_to_service_over_ssh() -> anyhow::Result<()> {
    let key = TestKey::generate();
    let ssh_port = spawn_ssh_server(key.public()).await?;
    let echo_port = spawn_echo().await?;
    let tunnel_port = free_port().await?;
    let id = Uuid::now_v7();
    let keys = Keys::new();
    keys.authorize(id, TunnelKind::Standard, &key.pair.private_pem).await?;

    let sink = MemoryStats::new();
    let lifecycle = RecordingLifecycle::new();
    let tunnel = Arc::new(StandardTunnel::new(
        tunnel_config(id, tunnel_port, ssh_port, echo_port),
        options(),
        keys.source(),
        lifecycle.clone(),
        &Stats::new(sink.clone()),
    ));
    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let tunnel = tunnel.clone();
        let cancel = cancel.clone();
        async move { tunnel.start(cancel).await }
    });

    let user = connect_when_ready(tunnel_port).await?;
    let (read, mut write) = user.into_split();
    let mut read = BufReader::new(read);
    write.write_all(b"hello world\nwhats up\n").await?;
    assert_eq!(read_line(&mut read).await?, "hello world\n");
    assert_eq!(read_line(&mut read).await?, "whats up\n");
    drop(write);
    drop(read);

    wait_for(|| lifecycle.has("session.close")).await?;
    assert_eq!(sink.total("tunnel.bytes_rcvd"), 21);
    assert_eq!(sink.total("tunnel.bytes_sent"), 21);
    assert!(sink.last_gauge("tunnel.active_connections").is_some());

    cancel.cancel();
    running.await??;
    let events = lifecycle.events();
    assert!(events.iter().any(|e| e == "boot.ssh_connect"));
    assert!(events.iter().any(|e| e == "open"));
    assert_eq!(events.last().map(String::as_str), Some("stop"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rsa_key_authenticates_with_negotiated_hash() -> anyhow::Result<()> {
    let key = TestKey::generate_rsa();
    let ssh_port = spawn_ssh_server(key.public()).await?;
    let echo_port = spawn_echo().await?;
    let tunnel_port = free_port().await?;
    let id = Uuid::now_v7();
    let keys = Keys::new();
    keys.authorize(id, TunnelKind::Standard, &key.pair.private_pem).await?;

    let lifecycle = RecordingLifecycle::new();
    let tunnel = Arc::new(StandardTunnel::new(
        tunnel_config(id, tunnel_port, ssh_port, echo_port),
        options(),
        keys.source(),
        lifecycle.clone(),
        &Stats::noop(),
    ));
    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let tunnel = tunnel.clone();
        let cancel = cancel.clone();
        async move { tunnel.start(cancel).await }
    });

    let user = connect_when_ready(tunnel_port).await?;
    let (read, mut write) = user.into_split();
    let mut read = BufReader::new(read);
    write.write_all(b"over rsa\n").await?;
    assert_eq!(read_line(&mut read).await?, "over rsa\n");
    assert!(lifecycle.has("boot.ssh_connect"));

    cancel.cancel();
    running.await??;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_service_resets_client() -> anyhow::Result<()> {
    let key = TestKey::generate();
    let ssh_port = spawn_ssh_server(key.public()).await?;
    let dead_port = free_port().await?;
    let tunnel_port = free_port().await?;
    let id = Uuid::now_v7();
    let keys = Keys::new();
    keys.authorize(id, TunnelKind::Standard, &key.pair.private_pem).await?;

    let lifecycle = RecordingLifecycle::new();
    let tunnel = Arc::new(StandardTunnel::new(
        tunnel_config(id, tunnel_port, ssh_port, dead_port),
        options(),
        keys.source(),
        lifecycle.clone(),
        &Stats::noop(),
    ));
    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let tunnel = tunnel.clone();
        let cancel = cancel.clone();
        async move { tunnel.start(cancel).await }
    });

    let mut user = connect_when_ready(tunnel_port).await?;
    expect_reset(&mut user).await?;
    wait_for(|| lifecycle.has("session_error")).await?;

    cancel.cancel();
    running.await??;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_key_is_a_boot_error() -> anyhow::Result<()> {
    let ssh_port = spawn_ssh_server(TestKey::generate().public()).await?;
    let id = Uuid::now_v7();
    let keys = Keys::new();
    keys.authorize(id, TunnelKind::Standard, &TestKey::generate().pair.private_pem).await?;

    let lifecycle = RecordingLifecycle::new();
    let tunnel = StandardTunnel::new(
        tunnel_config(id, free_port().await?, ssh_port, 9),
        options(),
        keys.source(),
        lifecycle.clone(),
        &Stats::noop(),
    );

    let err = tunnel.start(CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.boot_event(), Some("ssh_connect"));
    match err {
        TunnelError::Boot { source, .. } => {
            assert!(matches!(*source, TunnelError::AuthFailed { ref user, .. } if user == "tunnelbridge"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(lifecycle.events(), vec!["start", "boot.load_keys", "boot_error.ssh_connect", "stop"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_ssh_peer_ends_tunnel() -> anyhow::Result<()> {
    let key = TestKey::generate();
    let ssh_port = spawn_ssh_server(key.public()).await?;
    let proxy = FreezableProxy::spawn(ssh_port).await?;
    let echo_port = spawn_echo().await?;
    let tunnel_port = free_port().await?;
    let id = Uuid::now_v7();
    let keys = Keys::new();
    keys.authorize(id, TunnelKind::Standard, &key.pair.private_pem).await?;

    let lifecycle = RecordingLifecycle::new();
    let tunnel = Arc::new(StandardTunnel::new(
        tunnel_config(id, tunnel_port, proxy.port, echo_port),
        TunnelOptions {
            keepalive_interval: Duration::from_millis(300),
            keepalive_timeout: Duration::from_millis(300),
            ..options()
        },
        keys.source(),
        lifecycle.clone(),
        &Stats::noop(),
    ));
    let mut running = tokio::spawn({
        let tunnel = tunnel.clone();
        async move { tunnel.start(CancellationToken::new()).await }
    });

    wait_for(|| lifecycle.has("open")).await?;
    // Answered keepalives keep the tunnel up.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(!running.is_finished());

    proxy.freeze();
    let err = tokio::time::timeout(Duration::from_secs(5), &mut running)
        .await
        .map_err(|_| anyhow::anyhow!("tunnel did not notice the silent peer"))??
        .unwrap_err();
    assert!(matches!(err, TunnelError::Keepalive(_)), "unexpected error {err:?}");
    assert!(!err.is_boot());
    let events = lifecycle.events();
    assert!(events.iter().any(|e| e == "error"));
    assert_eq!(events.last().map(String::as_str), Some("stop"));
    Ok(())
}
