use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use parkd::lots::LotManager;
use parkd::observability;
use parkd::policy::CompatibilityPolicy;
use parkd::wire;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Server settings, read from `PARKD_*` environment variables.
struct Settings {
    addr: String,
    data_dir: PathBuf,
    password: String,
    max_connections: usize,
    compact_threshold: u64,
    tls_cert: Option<String>,
    tls_key: Option<String>,
    metrics_port: Option<u16>,
}

impl Settings {
    fn from_env() -> Self {
        let bind = env_or("PARKD_BIND", "0.0.0.0");
        let port = env_or("PARKD_PORT", "5433");
        Self {
            addr: format!("{bind}:{port}"),
            data_dir: PathBuf::from(env_or("PARKD_DATA_DIR", "./data")),
            password: env_or("PARKD_PASSWORD", "parkd"),
            max_connections: env_parsed("PARKD_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: env_parsed("PARKD_COMPACT_THRESHOLD").unwrap_or(1000),
            tls_cert: std::env::var("PARKD_TLS_CERT").ok(),
            tls_key: std::env::var("PARKD_TLS_KEY").ok(),
            metrics_port: env_parsed("PARKD_METRICS_PORT"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Unset and unparsable values both fall back to the caller's default.
fn env_parsed<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env();
    observability::init(settings.metrics_port)?;
    let tls_acceptor = parkd::tls::load_tls_acceptor(
        settings.tls_cert.as_deref(),
        settings.tls_key.as_deref(),
    )?;

    std::fs::create_dir_all(&settings.data_dir)?;
    let lots = Arc::new(LotManager::new(
        settings.data_dir.clone(),
        settings.compact_threshold,
        Arc::new(CompatibilityPolicy::standard()),
    ));
    let permits = Arc::new(Semaphore::new(settings.max_connections));

    let listener = TcpListener::bind(&settings.addr).await?;
    info!(
        addr = %settings.addr,
        data_dir = %settings.data_dir.display(),
        max_connections = settings.max_connections,
        tls = tls_acceptor.is_some(),
        metrics_port = ?settings.metrics_port,
        "parkd listening"
    );

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await.ok();
    };
    tokio::pin!(shutdown);

    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("accept failed: {e}");
                    continue;
                }
            },
            _ = &mut shutdown => break,
        };

        // Over the limit: close the socket before the startup handshake.
        let Ok(permit) = permits.clone().try_acquire_owned() else {
            warn!("connection limit reached, rejecting {peer}");
            metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
            continue;
        };

        info!("client connected from {peer}");
        metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);

        let lots = lots.clone();
        let password = settings.password.clone();
        let tls = tls_acceptor.clone();
        tokio::spawn(async move {
            if let Err(e) = wire::process_connection(socket, lots, password, tls).await {
                error!("client {peer} closed with error: {e}");
            }
            metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
            drop(permit);
        });
    }

    info!("shutting down, waiting for open clients");
    drain(&permits, settings.max_connections).await;
    info!("parkd stopped");
    Ok(())
}

/// Wait until every connection permit is back, or give up after `DRAIN_TIMEOUT`.
async fn drain(permits: &Semaphore, max_connections: usize) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while permits.available_permits() < max_connections {
        if tokio::time::Instant::now() >= deadline {
            let open = max_connections - permits.available_permits();
            warn!("drain timed out with {open} clients still open");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!("all clients closed");
}
