use std::sync::Arc;

use certmint::{
    api::{self, AppState},
    Orchestrator, OrderStore, Prober, LETS_ENCRYPT_PRODUCTION,
};
use poem::{listener::TcpListener, middleware::Tracing, EndpointExt, Server};

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "certmint=debug");
    }
    tracing_subscriber::fmt::init();

    let directory_url = std::env::var("CERTMINT_DIRECTORY_URL")
        .unwrap_or_else(|_| LETS_ENCRYPT_PRODUCTION.to_string());
    let state_dir =
        std::env::var("CERTMINT_STATE_DIR").unwrap_or_else(|_| "./acme-orders".to_string());
    let listen = std::env::var("CERTMINT_LISTEN").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    let store = Arc::new(
        OrderStore::open(&state_dir)
            .await
            .map_err(|err| std::io::Error::other(format!("failed to open order store: {err}")))?,
    );
    let prober = Arc::new(
        Prober::new()
            .map_err(|err| std::io::Error::other(format!("failed to build prober: {err}")))?,
    );
    let orchestrator = Arc::new(Orchestrator::new(directory_url.clone(), store.clone()));

    tracing::info!(
        directory = %directory_url,
        state_dir = %state_dir,
        listen = %listen,
        "starting certmint"
    );

    let app = api::routes(AppState {
        orchestrator,
        prober,
        store,
    })
    .with(Tracing);

    Server::new(TcpListener::bind(listen)).run(app).await
}
