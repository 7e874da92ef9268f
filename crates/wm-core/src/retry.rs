use wm_infra::failure::RemoteActionError;
use wm_infra::types::MachineAction;

/// Highest retry count at which a request may still be redispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    pub create: u32,
    pub get: u32,
    pub find: u32,
    pub delete: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            create: 3,
            get: 10,
            find: 3,
            delete: 10,
        }
    }
}

impl RetryLimits {
    pub fn limit(&self, action: MachineAction) -> u32 {
        match action {
            MachineAction::Create => self.create,
            MachineAction::Get => self.get,
            MachineAction::Find => self.find,
            MachineAction::Delete => self.delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Unrecoverable,
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryDecider {
    limits: RetryLimits,
}

impl RetryDecider {
    pub fn new(limits: RetryLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RetryLimits {
        &self.limits
    }

    pub fn decide(
        &self,
        action: MachineAction,
        retry_count: u32,
        error: &RemoteActionError,
    ) -> RetryDecision {
        if !error.is_recoverable() {
            RetryDecision::Unrecoverable
        } else if retry_count < self.limits.limit(action) {
            RetryDecision::Retry
        } else {
            RetryDecision::Exhausted
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use wm_infra::ProviderName;
    use wm_infra::failure::{FailureKind, RemoteFailure};

    use super::*;

    fn error(action: MachineAction, kinds: &[FailureKind]) -> RemoteActionError {
        RemoteActionError::new(
            action,
            "m1",
            kinds
                .iter()
                .map(|kind| RemoteFailure::new(Some(ProviderName::Hetzner), action, "m1", kind.clone()))
                .collect(),
        )
    }

    #[test]
    fn transient_failures_retry_until_the_limit() {
        let decider = RetryDecider::default();
        let err = error(MachineAction::Create, &[FailureKind::Http { status: 503 }]);

        assert_eq!(decider.decide(MachineAction::Create, 0, &err), RetryDecision::Retry);
        assert_eq!(decider.decide(MachineAction::Create, 2, &err), RetryDecision::Retry);
        assert_eq!(decider.decide(MachineAction::Create, 3, &err), RetryDecision::Exhausted);
    }

    #[test]
    fn permanent_failures_never_retry() {
        let decider = RetryDecider::default();
        let err = error(
            MachineAction::Create,
            &[FailureKind::ApiLimitExceeded { reset_timestamp: Some(123) }],
        );

        assert_eq!(decider.decide(MachineAction::Create, 0, &err), RetryDecision::Unrecoverable);
    }

    #[test]
    fn one_transient_failure_makes_the_aggregate_retryable() {
        let decider = RetryDecider::default();
        let err = error(
            MachineAction::Create,
            &[FailureKind::Authentication, FailureKind::Transport { curl_code: 28 }],
        );

        assert_eq!(decider.decide(MachineAction::Create, 0, &err), RetryDecision::Retry);
    }

    #[test]
    fn not_found_is_only_retryable_for_get() {
        let decider = RetryDecider::default();

        let get = error(MachineAction::Get, &[FailureKind::NotFound]);
        assert_eq!(decider.decide(MachineAction::Get, 9, &get), RetryDecision::Retry);
        assert_eq!(decider.decide(MachineAction::Get, 10, &get), RetryDecision::Exhausted);

        let delete = error(MachineAction::Delete, &[FailureKind::NotFound]);
        assert_eq!(decider.decide(MachineAction::Delete, 0, &delete), RetryDecision::Unrecoverable);
    }

    proptest! {
        #[test]
        fn retries_stop_exactly_at_the_limit(limit in 0u32..20, retry_count in 0u32..40) {
            let decider = RetryDecider::new(RetryLimits { create: limit, ..RetryLimits::default() });
            let err = error(MachineAction::Create, &[FailureKind::Transport { curl_code: 7 }]);

            let decision = decider.decide(MachineAction::Create, retry_count, &err);
            prop_assert_eq!(decision == RetryDecision::Retry, retry_count < limit);
        }
    }
}
