use ssh_core::keys::{KeyAlgorithm, generate_keypair, parse_public_key};

use super::*;

fn public_key() -> PublicKey {
    let pair = generate_keypair(KeyAlgorithm::Ed25519, "agent").unwrap();
    parse_public_key(pair.public_openssh.as_bytes()).unwrap()
}

fn tunnel(id: Uuid, port: u16, keys: Vec<PublicKey>) -> (RegisteredTunnel, mpsc::Receiver<ForwardRequest>) {
    let (tx, rx) = mpsc::channel(1);
    (
        RegisteredTunnel {
            id,
            port,
            authorized_keys: keys,
            inbound: tx,
            shutdown: CancellationToken::new(),
        },
        rx,
    )
}

#[test]
fn port_held_by_another_tunnel_is_refused() {
    let registry = TunnelRegistry::new();
    let first = Uuid::now_v7();
    let (a, _rx_a) = tunnel(first, 40100, vec![public_key()]);
    let _guard = registry.register(a).unwrap();

    let (b, _rx_b) = tunnel(Uuid::now_v7(), 40100, vec![public_key()]);
    match registry.register(b) {
        Err(TunnelError::PortConflict { port, owner }) => {
            assert_eq!(port, 40100);
            assert_eq!(owner, first);
        }
        other => panic!("expected port conflict, got {:?}", other.map(|r| r.id())),
    }
    assert_eq!(registry.len(), 1);
}

#[test]
fn keys_authorize_only_their_tunnels() {
    let registry = TunnelRegistry::new();
    let shared = public_key();
    let only_x = public_key();
    let x = Uuid::now_v7();
    let y = Uuid::now_v7();
    let (tx, _rx_x) = tunnel(x, 40200, vec![shared.clone(), only_x.clone()]);
    let (ty, _rx_y) = tunnel(y, 40201, vec![shared.clone()]);
    let _gx = registry.register(tx).unwrap();
    let _gy = registry.register(ty).unwrap();

    assert_eq!(
        registry.authorized_tunnels(&only_x),
        vec![AuthorizedTunnel { id: x, port: 40200 }]
    );
    assert_eq!(registry.authorized_tunnels(&shared).len(), 2);
    assert!(registry.authorized_tunnels(&public_key()).is_empty());
}

#[test]
fn dropping_the_guard_deregisters_and_signals_shutdown() {
    let registry = TunnelRegistry::new();
    let id = Uuid::now_v7();
    let (t, _rx) = tunnel(id, 40300, vec![public_key()]);
    let shutdown = t.shutdown.clone();
    let guard = registry.register(t).unwrap();
    assert!(registry.target_for_port(40300).is_some());

    drop(guard);
    assert!(!registry.contains(id));
    assert!(registry.target_for_port(40300).is_none());
    assert!(shutdown.is_cancelled());
}

#[test]
fn stale_guard_keeps_newer_registration() {
    let registry = TunnelRegistry::new();
    let id = Uuid::now_v7();
    let (old, _rx_old) = tunnel(id, 40400, vec![public_key()]);
    let old_guard = registry.register(old).unwrap();
    let (new, _rx_new) = tunnel(id, 40401, vec![public_key()]);
    let _new_guard = registry.register(new).unwrap();

    drop(old_guard);
    assert!(registry.contains(id));
    assert_eq!(registry.target_for_port(40401).map(|t| t.id), Some(id));
}
