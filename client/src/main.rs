//! Larder Access Probe
//!
//! Restores (or opens) a session against the hosted backend and reports what
//! the dashboard would do for each path given on the command line.
//!
//! ```text
//! LARDER_EMAIL=owner@example.com LARDER_PASSWORD=... larder-probe /dashboard /admin
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use larder_client::backend::RestBackend;
use larder_client::config::{Config, LogFormat};
use larder_client::{AccessContext, Decision, RouteTable, SessionSource};

/// Upper bound on waiting for resolvers to settle a path.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.backend_url,
        "Starting Larder access probe"
    );

    let backend = Arc::new(RestBackend::new(&config).context("Failed to build backend client")?);
    let session = SessionSource::new(backend.clone());
    session.restore().await;

    if let (Ok(email), Ok(password)) = (env::var("LARDER_EMAIL"), env::var("LARDER_PASSWORD")) {
        session
            .sign_in(&email, &password)
            .await
            .context("Sign-in failed")?;
    }

    let state = session.handle().resolved().await;
    match &state.identity {
        Some(identity) => info!(user_id = %identity.id, "Probing as signed-in account"),
        None => info!("Probing anonymously"),
    }

    let context = AccessContext::start(
        &session.handle(),
        backend,
        &config.resolvers,
        RouteTable::from_config(&config),
    );

    let mut paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() {
        paths.push(config.dashboard_route.clone());
    }

    for path in &paths {
        let settled = tokio::time::timeout(
            SETTLE_TIMEOUT,
            context.routes().navigate_settled(path, context.gate()),
        )
        .await;
        match settled {
            Ok(Decision::Grant) => println!("{path}\tgrant"),
            Ok(Decision::RedirectTo(target)) => println!("{path}\tredirect {target}"),
            Ok(Decision::Pending) | Err(_) => {
                warn!(path = %path, "Access decision did not settle");
                println!("{path}\tpending");
            }
        }
    }

    let block = context.block_status().current();
    if let Some(error) = block.last_error {
        warn!(error = %error, "Last block-status query failed");
    }

    context.shutdown().await;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "larder_client=info,larder_probe=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
