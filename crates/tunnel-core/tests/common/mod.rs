#![allow(dead_code)]

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, bail};
use russh::keys::{PrivateKey, PublicKey};
use ssh_core::keys::{GeneratedKeyPair, KeyAlgorithm, generate_keypair, load_private_key_from_str, parse_public_key};
use tb_types::{KeyRef, TunnelKind};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tunnel_core::{
    InMemoryKeyLookup, InMemoryKeystore, KeySource, Keystore, Lifecycle, Tags, TunnelError,
};
use uuid::Uuid;

/// Lifecycle sink that records event names in order.
#[derive(Default)]
pub struct RecordingLifecycle {
    events: Mutex<Vec<String>>,
}

impl RecordingLifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn has(&self, name: &str) -> bool {
        self.events().iter().any(|e| e == name)
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

impl Lifecycle for RecordingLifecycle {
    fn start(&self) {
        self.push("start");
    }
    fn boot_event(&self, event: &str, _tags: &Tags) {
        self.push(format!("boot.{event}"));
    }
    fn boot_error(&self, err: &TunnelError) {
        self.push(format!("boot_error.{}", err.boot_event().unwrap_or("unknown")));
    }
    fn open(&self) {
        self.push("open");
    }
    fn session_event(&self, _session_id: Uuid, event: &str, _tags: &Tags) {
        self.push(format!("session.{event}"));
    }
    fn session_error(&self, _session_id: Uuid, _err: &TunnelError) {
        self.push("session_error");
    }
    fn error(&self, _err: &TunnelError) {
        self.push("error");
    }
    fn close(&self) {
        self.push("close");
    }
    fn stop(&self) {
        self.push("stop");
    }
}

pub async fn free_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

/// Connect to a tunnel port, retrying while the tunnel is still binding.
pub async fn connect_when_ready(port: u16) -> anyhow::Result<TcpStream> {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            return Ok(stream);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("port {port} never became ready")
}

pub async fn wait_for(mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    for _ in 0..100 {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("condition not reached")
}

/// Read from `stream` and require a connection reset with no bytes first.
pub async fn expect_reset(stream: &mut TcpStream) -> anyhow::Result<()> {
    let mut buf = [0u8; 64];
    match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await? {
        Err(err) if err.kind() == io::ErrorKind::ConnectionReset => Ok(()),
        Err(err) => bail!("expected reset, got {err}"),
        Ok(n) => bail!("expected reset, read {n} bytes"),
    }
}

/// TCP relay in front of `target` that can be frozen: once frozen it keeps
/// both sockets open but stops passing bytes either way.
pub struct FreezableProxy {
    pub port: u16,
    frozen: Arc<AtomicBool>,
}

impl FreezableProxy {
    pub async fn spawn(target: u16) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let frozen = Arc::new(AtomicBool::new(false));
        let flag = frozen.clone();
        tokio::spawn(async move {
            while let Ok((inbound, _)) = listener.accept().await {
                let Ok(outbound) = TcpStream::connect(("127.0.0.1", target)).await else {
                    continue;
                };
                let (in_read, in_write) = inbound.into_split();
                let (out_read, out_write) = outbound.into_split();
                tokio::spawn(relay(in_read, out_write, flag.clone()));
                tokio::spawn(relay(out_read, in_write, flag.clone()));
            }
        });
        Ok(Self { port, frozen })
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }
}

async fn relay(mut from: impl AsyncRead + Unpin, mut to: impl AsyncWrite + Unpin, frozen: Arc<AtomicBool>) {
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = match from.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        if frozen.load(Ordering::SeqCst) {
            continue;
        }
        if to.write_all(&buf[..n]).await.is_err() {
            return;
        }
    }
}

pub struct TestKey {
    pub pair: GeneratedKeyPair,
}

impl TestKey {
    pub fn generate() -> Self {
        Self {
            pair: generate_keypair(KeyAlgorithm::Ed25519, "test@tunnelbridge").unwrap(),
        }
    }

    pub fn generate_rsa() -> Self {
        Self {
            pair: generate_keypair(KeyAlgorithm::Rsa, "rsa@tunnelbridge").unwrap(),
        }
    }

    pub fn private(&self) -> PrivateKey {
        load_private_key_from_str(&self.pair.private_pem).unwrap()
    }

    pub fn public(&self) -> PublicKey {
        parse_public_key(self.pair.public_openssh.as_bytes()).unwrap()
    }
}

/// In-memory key material for tests.
pub struct Keys {
    pub lookup: Arc<InMemoryKeyLookup>,
    pub keystore: Arc<InMemoryKeystore>,
}

impl Keys {
    pub fn new() -> Self {
        Self {
            lookup: Arc::new(InMemoryKeyLookup::new()),
            keystore: Arc::new(InMemoryKeystore::new()),
        }
    }

    pub async fn authorize(&self, tunnel_id: Uuid, kind: TunnelKind, contents: &str) -> anyhow::Result<()> {
        let key = KeyRef::new(Uuid::now_v7());
        self.keystore
            .set(key, contents.as_bytes().to_vec())
            .await
            .context("store key")?;
        self.lookup.authorize(tunnel_id, kind, key);
        Ok(())
    }

    pub fn source(&self) -> KeySource {
        KeySource::new(self.lookup.clone(), self.keystore.clone())
    }
}
