use std::sync::Arc;

use tracing::{debug, info};
use wm_db::{ActionFailure, FailureCode, FailureContext, MachineStore};
use wm_infra::failure::{FailureKind, RemoteActionError, RemoteFailure};

/// Failure code stored for a classified failure kind.
pub fn failure_code(kind: &FailureKind) -> FailureCode {
    match kind {
        FailureKind::UnsupportedProvider => FailureCode::UnsupportedProvider,
        FailureKind::ApiLimitExceeded { .. } => FailureCode::ApiLimitExceeded,
        FailureKind::Authentication => FailureCode::ApiAuthenticationFailure,
        FailureKind::Transport { .. } => FailureCode::CurlError,
        FailureKind::Http { .. } => FailureCode::HttpError,
        FailureKind::Unprocessable { .. } => FailureCode::UnprocessableRequest,
        FailureKind::NotFound => FailureCode::RemoteMachineNotFound,
        FailureKind::Unknown => FailureCode::Unknown,
    }
}

/// The record a single provider failure turns into.
pub fn action_failure(failure: &RemoteFailure) -> ActionFailure {
    let mut context = FailureContext::new();
    let provider = failure.provider.map(|p| p.as_str());

    match &failure.kind {
        FailureKind::ApiLimitExceeded {
            reset_timestamp: Some(reset),
        } => {
            context.insert("reset-timestamp".into(), (*reset).into());
        }
        FailureKind::Transport { curl_code } => {
            context.insert("curl-code".into(), (*curl_code).into());
        }
        FailureKind::Http { status } => {
            context.insert("status-code".into(), i64::from(*status).into());
        }
        FailureKind::Unprocessable {
            reason: Some(reason),
        } => {
            context.insert("provider-reason".into(), reason.as_str().into());
        }
        FailureKind::Authentication | FailureKind::NotFound => {
            if let Some(provider) = provider {
                context.insert("provider".into(), provider.into());
            }
        }
        _ => {}
    }

    ActionFailure::new(&failure.machine_id, failure_code(&failure.kind), context)
}

/// Persists the first terminal failure of each machine.
#[derive(Clone)]
pub struct FailureRecorder {
    store: Arc<dyn MachineStore>,
}

impl FailureRecorder {
    pub fn new(store: Arc<dyn MachineStore>) -> Self {
        Self { store }
    }

    /// Record the primary failure of `error` unless the machine already has a
    /// failure on file. Returns whether a record was written.
    pub async fn record(&self, error: &RemoteActionError) -> wm_db::Result<bool> {
        let failure = match error.primary() {
            Some(primary) => action_failure(primary),
            None => ActionFailure::new(&error.machine_id, FailureCode::Unknown, FailureContext::new()),
        };

        let created = self.store.create_failure_if_absent(&failure).await?;
        if created {
            info!(
                machine_id = %failure.machine_id,
                code = failure.code.code(),
                reason = failure.reason(),
                "action failure recorded"
            );
        } else {
            debug!(machine_id = %failure.machine_id, "action failure already recorded");
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use wm_db::{FailureContextValue, MemoryStore};
    use wm_infra::ProviderName;
    use wm_infra::types::MachineAction;

    use super::*;

    fn failure(kind: FailureKind) -> RemoteFailure {
        RemoteFailure::new(Some(ProviderName::DigitalOcean), MachineAction::Create, "m1", kind)
    }

    #[test]
    fn context_carries_the_variant_details() {
        let cases = [
            (
                FailureKind::ApiLimitExceeded { reset_timestamp: Some(123) },
                FailureCode::ApiLimitExceeded,
                vec![("reset-timestamp", FailureContextValue::Int(123))],
            ),
            (
                FailureKind::Transport { curl_code: 28 },
                FailureCode::CurlError,
                vec![("curl-code", FailureContextValue::Int(28))],
            ),
            (
                FailureKind::Http { status: 502 },
                FailureCode::HttpError,
                vec![("status-code", FailureContextValue::Int(502))],
            ),
            (
                FailureKind::Unprocessable { reason: Some("droplet limit".into()) },
                FailureCode::UnprocessableRequest,
                vec![("provider-reason", FailureContextValue::Text("droplet limit".into()))],
            ),
            (
                FailureKind::Authentication,
                FailureCode::ApiAuthenticationFailure,
                vec![("provider", FailureContextValue::Text("digitalocean".into()))],
            ),
            (FailureKind::UnsupportedProvider, FailureCode::UnsupportedProvider, vec![]),
            (FailureKind::Unknown, FailureCode::Unknown, vec![]),
        ];

        for (kind, code, context) in cases {
            let record = action_failure(&failure(kind));
            let expected: FailureContext = context
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect();

            assert_eq!(record.machine_id, "m1");
            assert_eq!(record.code, code);
            assert_eq!(record.context, expected);
        }
    }

    #[tokio::test]
    async fn primary_failure_is_recorded_once() {
        let store = Arc::new(MemoryStore::new());
        let recorder = FailureRecorder::new(store.clone());
        let error = RemoteActionError::new(
            MachineAction::Create,
            "m1",
            vec![
                failure(FailureKind::ApiLimitExceeded { reset_timestamp: Some(123) }),
                failure(FailureKind::Authentication),
            ],
        );

        assert!(recorder.record(&error).await.unwrap());
        assert!(!recorder
            .record(&RemoteActionError::single(failure(FailureKind::Unknown)))
            .await
            .unwrap());

        let stored = store.find_failure("m1").await.unwrap().unwrap();
        assert_eq!(stored.code, FailureCode::ApiLimitExceeded);
        assert_eq!(stored.context.get("reset-timestamp"), Some(&FailureContextValue::Int(123)));
    }
}
