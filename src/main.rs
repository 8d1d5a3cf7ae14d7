use std::net::SocketAddr;
use webp_proxy::{config::ProxyConfig, proxy::ImageProxy, router};

/// webp-proxy server entry point.
///
/// Loads `.env` when present, initializes tracing, reads configuration from
/// the environment, prepares the cache directory when caching is on, and
/// serves HTTP on `0.0.0.0:PORT`. Variables already set in the process win
/// over the file.
///
/// # Configuration
/// See [`ProxyConfig::from_env`]. `RUST_LOG` controls verbosity
/// (default: "webp_proxy=debug,tower_http=debug").
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // before the filter is built so RUST_LOG may come from the file
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webp_proxy=debug,tower_http=debug".into())
        )
        .init();

    match dotenv {
        Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => return Err(e.into()),
    }

    let cfg = ProxyConfig::from_env()?;
    cfg.validate()?;

    let proxy = ImageProxy::from_config(&cfg).await?;
    let app = router(proxy);

    // Bind to 0.0.0.0 for external access (required for containerized deployment)
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("App running on port {}", cfg.port);
    if cfg.use_cache {
        tracing::info!("Caching is enabled ({})", cfg.cache_dir.display());
    } else {
        tracing::info!("Caching is disabled");
    }

    axum::serve(listener, app).await?;
    Ok(())
}
