//! Catalog service wiring

use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app_mode::AuthMode;
use crate::context::ObjectHead;
use crate::database::Database;
use crate::identity::{BasicCredentials, BearerVerifier, IdentityVerifier};
use crate::routes::{self, AppState};
use crate::schema::create_schema;

/// Bearer token verification settings
#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub public_key_path: PathBuf,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

/// Catalog service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub auth_mode: AuthMode,
    pub basic: Option<BasicCredentials>,
    pub oidc: Option<OidcConfig>,
    pub init_schema: bool,
}

impl ServiceConfig {
    /// Build the credential verifier the auth mode calls for
    pub fn identity_verifier(&self) -> Result<IdentityVerifier> {
        let basic = if self.auth_mode.basic_enabled() {
            let credentials = self
                .basic
                .clone()
                .ok_or_else(|| anyhow!("{} mode requires basic credentials", self.auth_mode))?;
            Some(credentials)
        } else {
            None
        };

        let bearer = if self.auth_mode.oidc_enabled() {
            let oidc = self
                .oidc
                .as_ref()
                .ok_or_else(|| anyhow!("{} mode requires an OIDC public key", self.auth_mode))?;
            let pem = std::fs::read(&oidc.public_key_path).with_context(|| {
                format!("Failed to read OIDC public key {}", oidc.public_key_path.display())
            })?;
            let verifier = BearerVerifier::from_rsa_pem(
                &pem,
                oidc.issuer.as_deref(),
                oidc.audience.as_deref(),
            )
            .context("Invalid OIDC public key")?;
            Some(verifier)
        } else {
            None
        };

        Ok(IdentityVerifier::new(basic, bearer))
    }
}

/// Main catalog service
pub struct CatalogServiceRunner {
    config: ServiceConfig,
    state: AppState,
}

impl CatalogServiceRunner {
    /// Create a new catalog service
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        Self::with_storage(config, None).await
    }

    /// Create a catalog service whose record resolution also consults storage
    pub async fn with_storage(config: ServiceConfig, storage: Option<Arc<dyn ObjectHead>>) -> Result<Self> {
        let verifier = config.identity_verifier()?;
        let db = Database::new(&config.database_url).await?;

        if config.init_schema {
            create_schema(db.connection()).await?;
            info!("Catalog schema ready");
        }

        if storage.is_none() {
            warn!("No storage configured - records resolve from the database only");
        }

        let state = AppState::new(db, config.auth_mode, verifier, storage);
        info!(
            "Auth mode {} (permission enforcement {:?})",
            config.auth_mode,
            state.gate.enforcement()
        );

        Ok(Self { config, state })
    }

    /// Run the HTTP server
    pub async fn run(self) -> Result<()> {
        let addr = self.config.listen_addr;
        let app = routes::router(self.state).layer(TraceLayer::new_for_http());

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("Starting catalog service on {}", addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| anyhow!("Server error: {}", e))?;

        Ok(())
    }

    /// Get a handle to the database
    pub fn database(&self) -> &Database {
        &self.state.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(auth_mode: AuthMode) -> ServiceConfig {
        ServiceConfig {
            database_url: "sqlite::memory:".into(),
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            auth_mode,
            basic: None,
            oidc: None,
            init_schema: true,
        }
    }

    #[test]
    fn test_basic_mode_requires_credentials() {
        assert!(config(AuthMode::Basic).identity_verifier().is_err());

        let mut cfg = config(AuthMode::Basic);
        cfg.basic = Some(BasicCredentials {
            username: "svc".into(),
            password: "secret".into(),
        });
        assert!(cfg.identity_verifier().is_ok());
    }

    #[test]
    fn test_oidc_mode_requires_key() {
        assert!(config(AuthMode::Oidc).identity_verifier().is_err());

        let mut cfg = config(AuthMode::Oidc);
        cfg.oidc = Some(OidcConfig {
            public_key_path: "/nonexistent/key.pem".into(),
            issuer: None,
            audience: None,
        });
        assert!(cfg.identity_verifier().is_err());
    }

    #[tokio::test]
    async fn test_runner_bootstraps_schema() {
        let runner = CatalogServiceRunner::new(config(AuthMode::None)).await.unwrap();
        runner.database().health_check().await.unwrap();
    }
}
