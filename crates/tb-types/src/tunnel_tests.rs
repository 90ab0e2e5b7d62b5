use chrono::TimeZone;

use super::*;

fn standard() -> StandardTunnelConfig {
    StandardTunnelConfig {
        id: Uuid::now_v7(),
        created_at: Utc::now(),
        enabled: true,
        tunnel_port: 23456,
        ssh_user: Some("deploy".into()),
        ssh_host: "bastion.internal".into(),
        ssh_port: 22,
        service_host: "db.internal".into(),
        service_port: 5432,
    }
}

#[test]
fn standard_ignores_bookkeeping_fields() {
    let a = standard();
    let mut b = a.clone();
    b.created_at = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();
    b.enabled = false;
    assert!(a.semantic_eq(&b));
}

#[test]
fn standard_detects_connection_changes() {
    let a = standard();
    let mutations: Vec<fn(&mut StandardTunnelConfig)> = vec![
        |c| c.tunnel_port = 23457,
        |c| c.ssh_user = None,
        |c| c.ssh_host = "other".into(),
        |c| c.ssh_port = 2222,
        |c| c.service_host = "cache.internal".into(),
        |c| c.service_port = 6379,
    ];
    for mutate in mutations {
        let mut b = a.clone();
        mutate(&mut b);
        assert!(!a.semantic_eq(&b), "expected change to be detected: {b:?}");
    }
}

#[test]
fn kind_change_is_never_equal() {
    let std_cfg = standard();
    let rev = ReverseTunnelConfig {
        id: std_cfg.id,
        created_at: std_cfg.created_at,
        enabled: true,
        tunnel_port: std_cfg.tunnel_port,
    };
    assert!(!TunnelConfig::from(std_cfg).semantic_eq(&TunnelConfig::from(rev)));
}

#[test]
fn reverse_compares_port_only() {
    let a = ReverseTunnelConfig {
        id: Uuid::now_v7(),
        created_at: Utc::now(),
        enabled: true,
        tunnel_port: 40000,
    };
    let mut b = a.clone();
    b.created_at = Utc.with_ymd_and_hms(2020, 5, 5, 5, 5, 5).unwrap();
    assert!(a.semantic_eq(&b));
    b.tunnel_port = 40001;
    assert!(!a.semantic_eq(&b));
}

#[test]
fn empty_user_falls_back_to_default() {
    let mut cfg = standard();
    assert_eq!(cfg.ssh_user_or("tunnelbridge"), "deploy");
    cfg.ssh_user = Some(String::new());
    assert_eq!(cfg.ssh_user_or("tunnelbridge"), "tunnelbridge");
    cfg.ssh_user = None;
    assert_eq!(cfg.ssh_user_or("tunnelbridge"), "tunnelbridge");
}

#[test]
fn kind_parses_legacy_names() {
    assert_eq!("normal".parse::<TunnelKind>().unwrap(), TunnelKind::Standard);
    assert_eq!("reverse".parse::<TunnelKind>().unwrap(), TunnelKind::Reverse);
    assert!("sideways".parse::<TunnelKind>().is_err());
}

#[test]
fn config_serializes_with_kind_tag() {
    let cfg = TunnelConfig::from(standard());
    let json = serde_json::to_value(&cfg).unwrap();
    assert_eq!(json["kind"], "standard");
    let back: TunnelConfig = serde_json::from_value(json).unwrap();
    assert_eq!(back, cfg);
}
