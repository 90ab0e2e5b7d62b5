use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tb_types::TunnelKind;
use uuid::Uuid;

use super::*;
use crate::{discovery::StaticDiscovery, error::TunnelResult};

#[derive(Clone, Copy)]
enum Behaviour {
    FailFast,
    Panic,
    BlockUntilCancelled,
}

struct FakeTunnel {
    id: Uuid,
    behaviour: Behaviour,
    starts: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
    cancelled: Arc<Mutex<bool>>,
}

impl FakeTunnel {
    fn new(behaviour: Behaviour) -> Self {
        Self {
            id: Uuid::now_v7(),
            behaviour,
            starts: Arc::default(),
            running: Arc::default(),
            max_running: Arc::default(),
            cancelled: Arc::default(),
        }
    }
}

#[async_trait]
impl RunTunnel for FakeTunnel {
    fn id(&self) -> Uuid {
        self.id
    }

    fn kind(&self) -> TunnelKind {
        TunnelKind::Standard
    }

    fn tunnel_port(&self) -> u16 {
        23456
    }

    async fn start(&self, cancel: CancellationToken) -> TunnelResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let result = match self.behaviour {
            Behaviour::FailFast => Err(TunnelError::Other("boom".into())),
            Behaviour::Panic => {
                self.running.fetch_sub(1, Ordering::SeqCst);
                panic!("tunnel bug");
            }
            Behaviour::BlockUntilCancelled => {
                cancel.cancelled().await;
                *self.cancelled.lock().unwrap() = true;
                Ok(())
            }
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[tokio::test]
async fn retries_after_each_return() {
    let tunnel = FakeTunnel::new(Behaviour::FailFast);
    let starts = tunnel.starts.clone();
    let max_running = tunnel.max_running.clone();
    let supervisor = Arc::new(Supervisor::new(tunnel, Duration::from_millis(20), CancellationToken::new()));

    let task = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.start().await }
    });
    tokio::time::sleep(Duration::from_millis(150)).await;
    supervisor.stop();
    supervisor.stop();
    task.await.unwrap();

    assert!(starts.load(Ordering::SeqCst) >= 3);
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panics_are_treated_as_errors() {
    let tunnel = FakeTunnel::new(Behaviour::Panic);
    let starts = tunnel.starts.clone();
    let supervisor = Arc::new(Supervisor::new(tunnel, Duration::from_millis(10), CancellationToken::new()));

    let task = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.start().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    supervisor.stop();
    task.await.unwrap();

    assert!(starts.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn stop_cancels_running_tunnel_and_deregisters() {
    let tunnel = FakeTunnel::new(Behaviour::BlockUntilCancelled);
    let id = tunnel.id;
    let starts = tunnel.starts.clone();
    let cancelled = tunnel.cancelled.clone();
    let discovery = Arc::new(StaticDiscovery::new("tunnels.local"));
    let parent = CancellationToken::new();
    let supervisor = Arc::new(
        Supervisor::new(tunnel, Duration::from_secs(15), parent.child_token())
            .with_discovery(discovery.clone(), None),
    );

    let task = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.start().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(discovery.tunnel_details(id).await.unwrap().is_some());

    parent.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("supervisor should stop promptly")
        .unwrap();

    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert!(*cancelled.lock().unwrap());
    assert!(discovery.tunnel_details(id).await.unwrap().is_none());
}
