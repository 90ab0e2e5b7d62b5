use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::{CommandFactory, FromArgMatches, error::ErrorKind};
use sqlx::SqlitePool;
use ssh_core::{
    keys::{generate_keypair, load_private_key, parse_public_key},
    logging,
};
use tb_cli::{
    init_tracing,
    server_cli::{KeysCmd, RunArgs, ServerArgs, ServerSubcommand, TunnelsCmd},
};
use tb_types::{KeyKind, ReverseTunnelConfig, StandardTunnelConfig, TunnelConfig, TunnelKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tunnel_core::{
    ConnCheckOptions, Discovery, KeySource, LoggingLifecycleFactory, Manager, ReverseServer, SqliteKeyLookup, SqliteKeystore, StaticDiscovery, Stats,
    TracingStats, TunnelBuilder, conncheck, load_or_create_host_key, sqlite_list_func,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    // Intercept --help to append the resolved database path.
    let cmd = ServerArgs::command();
    let args = match cmd.try_get_matches() {
        Ok(m) => ServerArgs::from_arg_matches(&m).map_err(|e| anyhow!(e.to_string()))?,
        Err(e) => {
            if e.kind() == ErrorKind::DisplayHelp {
                e.print()?;
                println!("\nDatabase: {}", state_store::display_db_path(None));
                return Ok(());
            } else if e.kind() == ErrorKind::DisplayVersion {
                e.print()?;
                return Ok(());
            } else {
                return Err(anyhow!(e));
            }
        }
    };
    init_tracing(&args.log_level);

    let db = state_store::open_db(args.db.as_deref()).await?;
    state_store::migrate(&db).await?;
    info!(path = %state_store::display_path(&db), "state database ready");
    let pool = db.into_pool();

    match args.cmd {
        None | Some(ServerSubcommand::Run) => run(&args.run, pool).await?,
        Some(ServerSubcommand::Tunnels { cmd }) => tunnels(cmd, &pool).await?,
        Some(ServerSubcommand::Keys { cmd }) => keys(cmd, &pool).await?,
        Some(ServerSubcommand::Check { id }) => check(&args.run, &pool, id).await?,
    }
    Ok(())
}

async fn run(args: &RunArgs, pool: SqlitePool) -> Result<()> {
    let stats = Stats::new(Arc::new(TracingStats));
    let reverse_opts = args.to_reverse_options();
    let manager_opts = args.to_manager_options();

    let host_key = load_or_create_host_key(reverse_opts.host_key_path.as_deref()).await?;
    let server = Arc::new(ReverseServer::new(host_key, &reverse_opts, &stats));
    let listener = server.bind().await?;

    let keys = KeySource::new(
        Arc::new(SqliteKeyLookup::new(pool.clone())),
        Arc::new(SqliteKeystore::new(pool.clone())),
    );
    let builder = TunnelBuilder::new(
        args.to_tunnel_options(),
        keys,
        server.registry().clone(),
        reverse_opts.forward_queue,
        Arc::new(LoggingLifecycleFactory::new(stats.clone())),
        stats.clone(),
    );
    let discovery: Arc<dyn Discovery> = Arc::new(StaticDiscovery::new(args.discovery_host.clone()));
    let manager = Arc::new(
        Manager::new(sqlite_list_func(pool), builder, manager_opts.clone(), &stats).with_discovery(discovery),
    );

    let cancel = CancellationToken::new();
    let mut server_task = tokio::spawn({
        let server = server.clone();
        let cancel = cancel.clone();
        async move { server.serve(listener, cancel).await }
    });
    let manager_task = tokio::spawn({
        let manager = manager.clone();
        let cancel = cancel.clone();
        async move { manager.start(cancel).await }
    });

    let mut health = tokio::time::interval(manager_opts.refresh_interval * 2);
    health.tick().await;
    let mut verbosity = VerbositySignals::new()?;
    loop {
        tokio::select! {
            res = &mut server_task => {
                cancel.cancel();
                let _ = manager_task.await;
                return match res? {
                    Ok(()) => Ok(()),
                    Err(err) => Err(err).context("reverse tunnel server failed"),
                };
            }
            _ = health.tick() => {
                if let Err(err) = manager.check() {
                    warn!(%err, "tunnel manager health check failed");
                }
            }
            step = verbosity.next() => {
                let level = if step > 0 { logging::increase_verbosity() } else { logging::decrease_verbosity() };
                if let Some(level) = level {
                    info!(%level, "log level changed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    cancel.cancel();
    manager_task.await?;
    server_task.await??;
    Ok(())
}

async fn tunnels(cmd: TunnelsCmd, pool: &SqlitePool) -> Result<()> {
    match cmd {
        TunnelsCmd::AddStandard {
            port,
            ssh_host,
            ssh_port,
            ssh_user,
            service_host,
            service_port,
            disabled,
        } => {
            let config = TunnelConfig::Standard(StandardTunnelConfig {
                id: Uuid::now_v7(),
                created_at: Utc::now(),
                enabled: !disabled,
                tunnel_port: port,
                ssh_user,
                ssh_host,
                ssh_port,
                service_host,
                service_port,
            });
            state_store::insert_tunnel(pool, &config).await?;
            println!("{}", config.id());
        }
        TunnelsCmd::AddReverse { port, disabled } => {
            let config = TunnelConfig::Reverse(ReverseTunnelConfig {
                id: Uuid::now_v7(),
                created_at: Utc::now(),
                enabled: !disabled,
                tunnel_port: port,
            });
            state_store::insert_tunnel(pool, &config).await?;
            println!("{}", config.id());
        }
        TunnelsCmd::List { json } => {
            let tunnels = state_store::list_tunnels(pool).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tunnels)?);
                return Ok(());
            }
            for tunnel in tunnels {
                let state = if tunnel.enabled() { "enabled" } else { "disabled" };
                match &tunnel {
                    TunnelConfig::Standard(t) => println!(
                        "{} standard {} :{} -> {}@{}:{} -> {}:{}",
                        t.id,
                        state,
                        t.tunnel_port,
                        t.ssh_user.as_deref().unwrap_or("-"),
                        t.ssh_host,
                        t.ssh_port,
                        t.service_host,
                        t.service_port
                    ),
                    TunnelConfig::Reverse(t) => println!("{} reverse {} :{}", t.id, state, t.tunnel_port),
                }
            }
        }
        TunnelsCmd::Enable { id } => state_store::set_tunnel_enabled(pool, id, true).await?,
        TunnelsCmd::Disable { id } => state_store::set_tunnel_enabled(pool, id, false).await?,
        TunnelsCmd::Delete { id } => state_store::delete_tunnel(pool, id).await?,
    }
    Ok(())
}

async fn keys(cmd: KeysCmd, pool: &SqlitePool) -> Result<()> {
    match cmd {
        KeysCmd::Generate { tunnel, algorithm } => {
            let kind = tunnel_kind(pool, tunnel).await?;
            let pair = generate_keypair(algorithm.into(), &format!("tunnelbridge-{tunnel}"))?;
            let (stored_kind, stored, printed) = match kind {
                TunnelKind::Standard => (KeyKind::Private, pair.private_pem, pair.public_openssh),
                TunnelKind::Reverse => (KeyKind::Public, pair.public_openssh, pair.private_pem),
            };
            let key_id = state_store::insert_key(pool, stored_kind, stored.as_bytes()).await?;
            state_store::authorize_key(pool, tunnel, kind, key_id).await?;
            info!(tunnel_id = %tunnel, %key_id, "generated tunnel key");
            println!("{}", printed.trim_end());
        }
        KeysCmd::Authorize { tunnel, file } => {
            let kind = tunnel_kind(pool, tunnel).await?;
            let contents = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let stored_kind = match kind {
                TunnelKind::Standard => {
                    load_private_key(&contents)?;
                    KeyKind::Private
                }
                TunnelKind::Reverse => {
                    parse_public_key(&contents)?;
                    KeyKind::Public
                }
            };
            let key_id = state_store::insert_key(pool, stored_kind, &contents).await?;
            state_store::authorize_key(pool, tunnel, kind, key_id).await?;
            println!("{key_id}");
        }
    }
    Ok(())
}

async fn check(args: &RunArgs, pool: &SqlitePool, id: Uuid) -> Result<()> {
    let Some(tunnel) = state_store::get_tunnel(pool, id).await? else {
        bail!("tunnel {id} not found");
    };
    let discovery = StaticDiscovery::new(args.discovery_host.clone());
    let host = discovery.resolve_tunnel_host(tunnel.kind(), id).await?;
    let (health, reason) = conncheck::check_once(&host, tunnel.tunnel_port(), &ConnCheckOptions::default()).await;
    match reason {
        Some(reason) => println!("{host}:{} {health}: {reason}", tunnel.tunnel_port()),
        None => println!("{host}:{} {health}", tunnel.tunnel_port()),
    }
    Ok(())
}

async fn tunnel_kind(pool: &SqlitePool, id: Uuid) -> Result<TunnelKind> {
    state_store::get_tunnel(pool, id)
        .await?
        .map(|t| t.kind())
        .ok_or_else(|| anyhow!("tunnel {id} not found"))
}

/// SIGUSR1 raises the log level one step, SIGUSR2 lowers it.
#[cfg(unix)]
struct VerbositySignals {
    up: tokio::signal::unix::Signal,
    down: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl VerbositySignals {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            up: signal(SignalKind::user_defined1())?,
            down: signal(SignalKind::user_defined2())?,
        })
    }

    async fn next(&mut self) -> i32 {
        tokio::select! {
            _ = self.up.recv() => 1,
            _ = self.down.recv() => -1,
        }
    }
}

#[cfg(not(unix))]
struct VerbositySignals;

#[cfg(not(unix))]
impl VerbositySignals {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> i32 {
        std::future::pending::<i32>().await
    }
}
