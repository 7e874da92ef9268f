//! Classification of provider failures.
//!
//! Every provider error is reduced to a [`FailureKind`] and wrapped in a
//! [`RemoteFailure`] that also records which provider, action and machine
//! were involved. Recoverability is a property of the kind and the action,
//! never of the provider that raised it.

use std::error::Error as StdError;
use std::fmt;

use crate::ProviderName;
use crate::types::MachineAction;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// libcurl-compatible transport codes, kept for diagnostics consumers.
pub const CURL_COULDNT_CONNECT: i64 = 7;
pub const CURL_OPERATION_TIMEDOUT: i64 = 28;
pub const CURL_RECV_ERROR: i64 = 56;

/// Closed set of failure variants a provider call can end in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    UnsupportedProvider,
    ApiLimitExceeded { reset_timestamp: Option<i64> },
    Authentication,
    Transport { curl_code: i64 },
    Http { status: u16 },
    Unprocessable { reason: Option<String> },
    NotFound,
    Unknown,
}

impl FailureKind {
    /// Map an HTTP error status onto a failure kind.
    pub fn from_status(status: u16, reason: Option<String>, reset_timestamp: Option<i64>) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            404 => Self::NotFound,
            422 => Self::Unprocessable { reason },
            429 => Self::ApiLimitExceeded { reset_timestamp },
            _ => Self::Http { status },
        }
    }

    /// Whether a fresh attempt of `action` could plausibly succeed.
    pub fn is_recoverable_for(&self, action: MachineAction) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http { status } => *status >= 500 || *status == 408,
            // A machine that was just created may not be visible yet.
            Self::NotFound => action == MachineAction::Get,
            Self::UnsupportedProvider
            | Self::ApiLimitExceeded { .. }
            | Self::Authentication
            | Self::Unprocessable { .. }
            | Self::Unknown => false,
        }
    }

    /// Stable snake_case label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnsupportedProvider => "unsupported_provider",
            Self::ApiLimitExceeded { .. } => "api_limit_exceeded",
            Self::Authentication => "authentication",
            Self::Transport { .. } => "transport",
            Self::Http { .. } => "http",
            Self::Unprocessable { .. } => "unprocessable",
            Self::NotFound => "not_found",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedProvider => f.write_str("unsupported provider"),
            Self::ApiLimitExceeded {
                reset_timestamp: Some(reset),
            } => write!(f, "api limit exceeded (resets at {reset})"),
            Self::ApiLimitExceeded { reset_timestamp: None } => f.write_str("api limit exceeded"),
            Self::Authentication => f.write_str("authentication failed"),
            Self::Transport { curl_code } => write!(f, "transport error (curl code {curl_code})"),
            Self::Http { status } => write!(f, "http error {status}"),
            Self::Unprocessable { reason: Some(reason) } => {
                write!(f, "unprocessable request: {reason}")
            }
            Self::Unprocessable { reason: None } => f.write_str("unprocessable request"),
            Self::NotFound => f.write_str("remote machine not found"),
            Self::Unknown => f.write_str("unknown provider error"),
        }
    }
}

/// Transport-level classification shared by reqwest-based clients.
pub fn classify_transport(err: &reqwest::Error) -> FailureKind {
    if let Some(status) = err.status() {
        return FailureKind::from_status(status.as_u16(), None, None);
    }
    if err.is_decode() || err.is_builder() {
        return FailureKind::Unknown;
    }
    let curl_code = if err.is_timeout() {
        CURL_OPERATION_TIMEDOUT
    } else if err.is_connect() {
        CURL_COULDNT_CONNECT
    } else {
        CURL_RECV_ERROR
    };
    FailureKind::Transport { curl_code }
}

/// One provider's failure to perform one action for one machine.
#[derive(Debug)]
pub struct RemoteFailure {
    pub provider: Option<ProviderName>,
    pub action: MachineAction,
    pub machine_id: String,
    pub kind: FailureKind,
    pub source: Option<BoxError>,
}

impl RemoteFailure {
    pub fn new(
        provider: Option<ProviderName>,
        action: MachineAction,
        machine_id: impl Into<String>,
        kind: FailureKind,
    ) -> Self {
        Self {
            provider,
            action,
            machine_id: machine_id.into(),
            kind,
            source: None,
        }
    }

    pub fn unsupported_provider(action: MachineAction, machine_id: impl Into<String>) -> Self {
        Self::new(None, action, machine_id, FailureKind::UnsupportedProvider)
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable_for(self.action)
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Some(provider) => write!(
                f,
                "{} of machine {} on {provider} failed: {}",
                self.action, self.machine_id, self.kind
            ),
            None => write!(
                f,
                "{} of machine {} failed: {}",
                self.action, self.machine_id, self.kind
            ),
        }
    }
}

impl StdError for RemoteFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

/// Aggregate failure of a logical action across every provider tried.
///
/// Failures are kept in provider order; the first one is the primary
/// failure used for diagnostics.
#[derive(Debug)]
pub struct RemoteActionError {
    pub action: MachineAction,
    pub machine_id: String,
    pub failures: Vec<RemoteFailure>,
}

impl RemoteActionError {
    pub fn new(action: MachineAction, machine_id: impl Into<String>, failures: Vec<RemoteFailure>) -> Self {
        Self {
            action,
            machine_id: machine_id.into(),
            failures,
        }
    }

    pub fn single(failure: RemoteFailure) -> Self {
        Self {
            action: failure.action,
            machine_id: failure.machine_id.clone(),
            failures: vec![failure],
        }
    }

    pub fn primary(&self) -> Option<&RemoteFailure> {
        self.failures.first()
    }

    /// Retrying can only help if at least one provider failed transiently.
    pub fn is_recoverable(&self) -> bool {
        self.failures.iter().any(RemoteFailure::is_recoverable)
    }
}

impl fmt::Display for RemoteActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of machine {} failed ({} provider failure(s))",
            self.action,
            self.machine_id,
            self.failures.len()
        )
    }
}

impl StdError for RemoteActionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.primary().map(|f| f as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_onto_kinds() {
        assert_eq!(FailureKind::from_status(401, None, None), FailureKind::Authentication);
        assert_eq!(FailureKind::from_status(403, None, None), FailureKind::Authentication);
        assert_eq!(FailureKind::from_status(404, None, None), FailureKind::NotFound);
        assert_eq!(
            FailureKind::from_status(422, Some("droplet limit".into()), None),
            FailureKind::Unprocessable {
                reason: Some("droplet limit".into())
            }
        );
        assert_eq!(
            FailureKind::from_status(429, None, Some(123)),
            FailureKind::ApiLimitExceeded {
                reset_timestamp: Some(123)
            }
        );
        assert_eq!(
            FailureKind::from_status(502, None, None),
            FailureKind::Http { status: 502 }
        );
    }

    #[test]
    fn only_transient_kinds_are_recoverable() {
        let create = MachineAction::Create;
        assert!(FailureKind::Transport { curl_code: 28 }.is_recoverable_for(create));
        assert!(FailureKind::Http { status: 503 }.is_recoverable_for(create));
        assert!(FailureKind::Http { status: 408 }.is_recoverable_for(create));
        assert!(!FailureKind::Http { status: 400 }.is_recoverable_for(create));
        assert!(!FailureKind::ApiLimitExceeded { reset_timestamp: Some(1) }.is_recoverable_for(create));
        assert!(!FailureKind::Authentication.is_recoverable_for(create));
        assert!(!FailureKind::UnsupportedProvider.is_recoverable_for(create));
        assert!(!FailureKind::Unprocessable { reason: None }.is_recoverable_for(create));
        assert!(!FailureKind::Unknown.is_recoverable_for(create));
    }

    #[test]
    fn not_found_is_recoverable_only_for_get() {
        assert!(FailureKind::NotFound.is_recoverable_for(MachineAction::Get));
        assert!(!FailureKind::NotFound.is_recoverable_for(MachineAction::Find));
        assert!(!FailureKind::NotFound.is_recoverable_for(MachineAction::Create));
        assert!(!FailureKind::NotFound.is_recoverable_for(MachineAction::Delete));
    }

    #[test]
    fn aggregate_is_recoverable_if_any_failure_is() {
        let error = RemoteActionError::new(
            MachineAction::Create,
            "m1",
            vec![
                RemoteFailure::new(
                    Some(ProviderName::DigitalOcean),
                    MachineAction::Create,
                    "m1",
                    FailureKind::Unprocessable { reason: None },
                ),
                RemoteFailure::new(
                    Some(ProviderName::Hetzner),
                    MachineAction::Create,
                    "m1",
                    FailureKind::Transport { curl_code: 7 },
                ),
            ],
        );

        assert!(error.is_recoverable());
        assert_eq!(
            error.primary().map(|f| &f.kind),
            Some(&FailureKind::Unprocessable { reason: None })
        );
    }

    #[test]
    fn source_chain_reaches_the_primary_failure() {
        let error = RemoteActionError::single(
            RemoteFailure::unsupported_provider(MachineAction::Get, "m1").with_source("no provider"),
        );

        let failure = error.source().unwrap();
        assert_eq!(failure.to_string(), "get of machine m1 failed: unsupported provider");
        assert_eq!(failure.source().unwrap().to_string(), "no provider");
    }
}
