mod config;
mod dto;
mod error;
mod routes;
mod state;

use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use wm_core::{
    ChannelQueue, FailureRecorder, HandlerContext, MachineRequestHandler, MachineService,
    RequestDispatcher, RequestFactory, RetryDecider, Worker, spawn_message_pruner,
};
use wm_db::{MachineStore, MemoryStore, MessageStateStore, PgStore};
use wm_infra::RemoteMachineManager;

use crate::config::AppConfig;
use crate::routes::api_router;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env().expect("invalid configuration");

    // Store
    let (store, messages): (Arc<dyn MachineStore>, Arc<dyn MessageStateStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = wm_db::create_pool(url)
                    .await
                    .expect("failed to connect to database");
                wm_db::run_migrations(&pool)
                    .await
                    .expect("failed to run migrations");
                let store = Arc::new(PgStore::new(pool));
                (store.clone() as Arc<dyn MachineStore>, store as Arc<dyn MessageStateStore>)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, keeping machine state in memory");
                let store = Arc::new(MemoryStore::new());
                (store.clone() as Arc<dyn MachineStore>, store as Arc<dyn MessageStateStore>)
            }
        };

    // Machine providers
    let providers = wm_infra::build_providers().expect("failed to build machine providers");
    tracing::info!(providers = ?providers.available(), "machine providers ready");

    // Queue and worker
    let (queue, receiver) = ChannelQueue::channel();
    let dispatcher = RequestDispatcher::new(Arc::new(queue), messages.clone(), config.worker.delays);
    let factory = RequestFactory::new();

    let ctx = HandlerContext {
        store: store.clone(),
        manager: Arc::new(RemoteMachineManager::new(providers)),
        dispatcher: dispatcher.clone(),
        factory: factory.clone(),
        retry: RetryDecider::new(config.worker.retry_limits),
        recorder: FailureRecorder::new(store.clone()),
    };
    Worker::new(MachineRequestHandler::new(ctx), messages.clone()).spawn(receiver);
    spawn_message_pruner(messages.clone(), config.worker.message_retention);

    let state = AppState {
        service: MachineService::new(store, messages, dispatcher, factory),
    };

    let app = api_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .expect("failed to bind listener");

    tracing::info!(addr = %config.listen_addr, "starting worker machine API");

    axum::serve(listener, app).await.expect("server error");
}
