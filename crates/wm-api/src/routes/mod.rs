pub mod machines;

use axum::Router;
use axum::routing::{get, post};

use crate::state::AppState;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        // Machine lifecycle; GET also answers HEAD
        .route(
            "/machine/{id}",
            post(machines::create_machine)
                .get(machines::get_machine)
                .delete(machines::delete_machine),
        )
        .route("/message-queue-size", get(machines::message_queue_size))
        .with_state(state)
}
