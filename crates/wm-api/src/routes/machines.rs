use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use crate::dto::MachineResponse;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn create_machine(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<MachineResponse>), ApiError> {
    let status = state.service.create(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(status.into())))
}

pub async fn get_machine(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MachineResponse>, ApiError> {
    let status = state.service.status(&id).await?;
    Ok(Json(status.into()))
}

pub async fn delete_machine(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<MachineResponse>), ApiError> {
    let status = state.service.delete(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(status.into())))
}

pub async fn message_queue_size(State(state): State<AppState>) -> Result<Json<u64>, ApiError> {
    Ok(Json(state.service.queue_size().await?))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use wm_core::MachineService;
    use wm_core::testing::Harness;
    use wm_db::{ActionFailure, FailureCode, FailureContext, MachineState, MachineStore};

    use super::*;
    use crate::routes::api_router;

    fn app(harness: &Harness) -> axum::Router {
        let service = MachineService::new(
            harness.store.clone(),
            harness.store.clone(),
            harness.ctx().dispatcher.clone(),
            harness.factory().clone(),
        );
        api_router(AppState { service })
    }

    async fn call(app: axum::Router, method: Method, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn post_accepts_a_new_machine() {
        let harness = Harness::new(vec![]);

        let (status, body) = call(app(&harness), Method::POST, "/machine/m1").await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(
            body,
            json!({
                "id": "m1",
                "state": "create/received",
                "ip_addresses": [],
                "state_category": "pre_active",
            })
        );
    }

    #[tokio::test]
    async fn post_on_a_live_machine_is_a_bad_request() {
        let harness = Harness::new(vec![]);
        harness.seed("m1", MachineState::UpActive).await;

        let (status, body) = call(app(&harness), Method::POST, "/machine/m1").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "machine id m1 is taken" }));
        assert_eq!(harness.state("m1").await, MachineState::UpActive);
    }

    #[tokio::test]
    async fn get_includes_the_action_failure() {
        let harness = Harness::new(vec![]);
        harness.seed("m1", MachineState::CreateFailed).await;
        let mut context = FailureContext::new();
        context.insert("reset-timestamp".into(), 123.into());
        harness
            .store
            .create_failure_if_absent(&ActionFailure::new("m1", FailureCode::ApiLimitExceeded, context))
            .await
            .unwrap();

        let (status, body) = call(app(&harness), Method::GET, "/machine/m1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "id": "m1",
                "state": "create/failed",
                "ip_addresses": [],
                "state_category": "end",
                "action_failure": {
                    "code": 2,
                    "reason": "api limit exceeded",
                    "context": { "reset-timestamp": 123 },
                },
            })
        );
    }

    #[tokio::test]
    async fn head_creates_an_unknown_machine_without_a_body() {
        let harness = Harness::new(vec![]);

        let (status, body) = call(app(&harness), Method::HEAD, "/machine/m1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);
        assert_eq!(harness.state("m1").await, MachineState::FindReceived);
    }

    #[tokio::test]
    async fn delete_is_accepted_for_unknown_ids() {
        let harness = Harness::new(vec![]);

        let (status, body) = call(app(&harness), Method::DELETE, "/machine/m9").await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["state"], "delete/received");
        assert_eq!(body["state_category"], "ending");
        assert!(harness.store.find_machine("m9").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn queue_size_counts_dispatched_messages() {
        let harness = Harness::new(vec![]);
        let app = app(&harness);

        call(app.clone(), Method::POST, "/machine/m1").await;
        call(app.clone(), Method::DELETE, "/machine/m2").await;
        let (status, body) = call(app, Method::GET, "/message-queue-size").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(2));
    }
}
