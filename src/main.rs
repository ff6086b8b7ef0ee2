use async_std::net::TcpListener;
use async_std::prelude::*;
use async_std::task;
use clap::Parser;
use hostpool::config::Config;
use hostpool::controller::{admin_handler, client_handler};
use hostpool::dispatch::Dispatcher;
use hostpool::logger::create_logger;
use hostpool::registry::Registry;
use hostpool::store::{MemoryStore, SharedStore};
use log::{debug, error, info};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, default_value = "config.ron")]
    config: PathBuf,
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
    /// Also write logs to logs/<timestamp>.log
    #[arg(long, default_value_t = false)]
    log_to_file: bool,
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    create_logger(cli.verbose, cli.log_to_file)?;
    debug!("Loaded CLI config {cli:#?}");

    // cannot run without proper config
    let cfg = Config::read_from_file(&cli.config).await?;

    let store: Arc<dyn SharedStore> = match cfg.store_capacity {
        Some(capacity) => Arc::new(MemoryStore::with_capacity(capacity)),
        None => Arc::new(MemoryStore::new()),
    };
    let registry = Registry::new(store, cfg.write_mode);
    cfg.seed(&registry)?;
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), cfg.load_balancer.build()));

    let admin = TcpListener::bind(cfg.admin_listen).await?;
    let proxy = TcpListener::bind(cfg.proxy_listen).await?;
    info!("Admin listening on {}", cfg.admin_listen);
    info!(
        "Proxy listening on {} using {:?}",
        cfg.proxy_listen, cfg.load_balancer
    );

    futures::try_join!(serve_admin(admin, registry), serve_proxy(proxy, dispatcher))?;
    Ok(())
}

async fn serve_admin(listener: TcpListener, registry: Registry) -> anyhow::Result<()> {
    let mut incoming = listener.incoming();
    while let Some(socket) = incoming.next().await {
        let socket = socket?;
        let registry = registry.clone();
        task::spawn(async move {
            if let Err(e) = admin_handler(socket, registry).await {
                error!("Admin connection failed: {e}");
            }
        });
    }
    Ok(())
}

async fn serve_proxy(listener: TcpListener, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let mut incoming = listener.incoming();
    while let Some(socket) = incoming.next().await {
        let socket = socket?;
        let dispatcher = dispatcher.clone();
        task::spawn(async move {
            if let Err(e) = client_handler(socket, dispatcher).await {
                debug!("Proxied connection ended with error: {e}");
            }
        });
    }
    Ok(())
}
