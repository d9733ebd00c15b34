//! Standalone catalog service binary

use anyhow::Result;
use catalog::identity::BasicCredentials;
use catalog::service::OidcConfig;
use catalog::{AuthMode, CatalogServiceRunner, ServiceConfig};
use clap::Parser;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[clap(name = "catalog-service")]
#[clap(about = "Object catalog service - tags, metadata and object permissions")]
struct Args {
    /// Database connection URL (can also be set via CATALOG_DATABASE_URL env var)
    #[clap(long, env = "CATALOG_DATABASE_URL")]
    database_url: String,

    /// Listen address for the HTTP server
    #[clap(long, default_value = "0.0.0.0:3000", env = "CATALOG_LISTEN_ADDR")]
    listen_addr: SocketAddr,

    /// Authentication mode (none, basicauth, oidcauth, fullauth)
    #[clap(long, default_value = "none", env = "CATALOG_AUTH_MODE")]
    auth_mode: AuthMode,

    /// Username accepted for basic authentication
    #[clap(long, env = "CATALOG_BASIC_USERNAME")]
    basic_username: Option<String>,

    /// Password accepted for basic authentication
    #[clap(long, env = "CATALOG_BASIC_PASSWORD", hide_env_values = true)]
    basic_password: Option<String>,

    /// PEM file with the RS256 public key bearer tokens are signed with
    #[clap(long, env = "CATALOG_OIDC_PUBLIC_KEY")]
    oidc_public_key: Option<PathBuf>,

    /// Required bearer token issuer
    #[clap(long, env = "CATALOG_OIDC_ISSUER")]
    oidc_issuer: Option<String>,

    /// Required bearer token audience
    #[clap(long, env = "CATALOG_OIDC_AUDIENCE")]
    oidc_audience: Option<String>,

    /// Create missing tables before serving
    #[clap(long, env = "CATALOG_INIT_SCHEMA")]
    init_schema: bool,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("catalog={},tower_http=debug", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting catalog service");
    tracing::info!("Database URL: {}", mask_url(&args.database_url));
    tracing::info!("Listen address: {}", args.listen_addr);
    tracing::info!("Auth mode: {}", args.auth_mode);

    let basic = match (args.basic_username, args.basic_password) {
        (Some(username), Some(password)) => Some(BasicCredentials { username, password }),
        _ => None,
    };
    let oidc = args.oidc_public_key.map(|public_key_path| OidcConfig {
        public_key_path,
        issuer: args.oidc_issuer,
        audience: args.oidc_audience,
    });

    let config = ServiceConfig {
        database_url: args.database_url,
        listen_addr: args.listen_addr,
        auth_mode: args.auth_mode,
        basic,
        oidc,
        init_schema: args.init_schema,
    };

    let service = CatalogServiceRunner::new(config).await?;

    // Handle shutdown gracefully
    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        tracing::info!("Received shutdown signal");
    };

    tokio::select! {
        result = service.run() => {
            if let Err(e) = result {
                tracing::error!("Service error: {}", e);
                std::process::exit(1);
            }
        }
        _ = shutdown => {
            tracing::info!("Shutting down gracefully");
        }
    }

    tracing::info!("Catalog service stopped");
    Ok(())
}

/// Mask the password of a database URL for logging
fn mask_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => match parsed.password() {
            Some(password) => url.replace(password, "****"),
            None => url.to_string(),
        },
        Err(_) => match url.rfind('@') {
            Some(at_pos) => {
                let (credentials, host) = url.split_at(at_pos);
                match credentials.rfind(':') {
                    Some(colon_pos) => format!("{}:****{}", &credentials[..colon_pos], host),
                    None => url.to_string(),
                }
            }
            None => url.to_string(),
        },
    }
}
