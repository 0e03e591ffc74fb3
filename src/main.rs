//! StockKeep Billing Webhook Server
//!
//! Serves the payment-provider webhook ingress over HTTP.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use stockkeep_billing::billing::entitlements::{EntitlementTable, LoggingSink};
use stockkeep_billing::billing::store::{InMemorySubscriptionStore, InMemoryTenantDirectory};
use stockkeep_billing::webhook::config::WebhookConfig;
use stockkeep_billing::webhook::engine::WebhookEngine;
use stockkeep_billing::webhook::handler::{webhook_router, WebhookState};
use stockkeep_billing::webhook::ledger::InMemoryLedger;

/// StockKeep Billing Webhook Server
#[derive(Parser, Debug)]
#[command(name = "sk-billing")]
#[command(author = "StockKeep Team <eng@stockkeep.io>")]
#[command(version)]
#[command(about = "Payment-provider webhook ingestion and subscription reconciliation")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8787")]
    port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Wire the engine from environment configuration and in-process stores.
///
/// Production deployments swap the in-memory ledger and stores for
/// database-backed implementations behind the same traits.
fn build_state() -> stockkeep_billing::Result<Arc<WebhookState>> {
    let config = WebhookConfig::from_env()?;

    let entitlements = match std::env::var("STOCKKEEP_ENTITLEMENTS") {
        Ok(json) => EntitlementTable::from_json(&json)?,
        Err(_) => EntitlementTable::default(),
    };

    let engine = WebhookEngine::new(
        config.clone(),
        entitlements,
        Arc::new(InMemoryLedger::new(config.inprogress_reclaim)),
        Arc::new(InMemorySubscriptionStore::new()),
        Arc::new(InMemoryTenantDirectory::new()),
        Arc::new(LoggingSink),
    );

    Ok(Arc::new(WebhookState::new(engine)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose { "debug" } else { "info" };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let state = build_state()?;
    let app = webhook_router(state);

    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!("StockKeep billing webhook server listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
