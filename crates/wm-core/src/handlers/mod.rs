//! Per-action request handlers and the router in front of them.
//!
//! Handlers never fail for a machine that is missing or already finished;
//! such messages are stale and dropped. Recoverable provider failures are
//! redispatched here and never reach the caller.

mod check_active;
mod create;
mod delete;
mod find;
mod get;

use std::error::Error as StdError;
use std::sync::Arc;

use tracing::{debug, error, warn};
use wm_db::{Machine, MachineState, MachineStore, StateCategory};
use wm_infra::RemoteMachineManager;
use wm_infra::failure::{RemoteActionError, RemoteFailure};
use wm_infra::types::MachineAction;

use crate::dispatcher::{DispatchError, RequestDispatcher};
use crate::factory::RequestFactory;
use crate::recorder::{FailureRecorder, failure_code};
use crate::request::{MachineRequest, RequestAction};
use crate::retry::{RetryDecider, RetryDecision};

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("store error: {0}")]
    Store(#[from] wm_db::Error),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("unrecoverable: {0}")]
    Unrecoverable(#[source] RemoteActionError),
}

/// Everything a handler needs, shared by all workers.
#[derive(Clone)]
pub struct HandlerContext {
    pub store: Arc<dyn MachineStore>,
    pub manager: Arc<RemoteMachineManager>,
    pub dispatcher: RequestDispatcher,
    pub factory: RequestFactory,
    pub retry: RetryDecider,
    pub recorder: FailureRecorder,
}

impl HandlerContext {
    /// The machine a request is about, unless the request is stale.
    async fn live_machine(&self, request: &MachineRequest) -> Result<Option<Machine>, HandlerError> {
        match self.store.find_machine(&request.machine_id).await? {
            None => {
                debug!(unique_id = %request.unique_id, machine_id = %request.machine_id, "machine missing, dropping request");
                Ok(None)
            }
            Some(machine) if machine.category() == StateCategory::End => {
                debug!(
                    unique_id = %request.unique_id,
                    machine_id = %request.machine_id,
                    state = %machine.state,
                    "machine already finished, dropping request"
                );
                Ok(None)
            }
            Some(machine) => Ok(Some(machine)),
        }
    }

    /// Reload the machine after a provider call. Another request may have
    /// moved it on while the call ran, in which case the caller's result is
    /// stale and must not be written back.
    async fn reload(&self, request: &MachineRequest, expected: MachineState) -> Result<Reloaded, HandlerError> {
        match self.store.find_machine(&request.machine_id).await? {
            Some(machine) if machine.state == expected => Ok(Reloaded::Unchanged(machine)),
            current => {
                debug!(
                    unique_id = %request.unique_id,
                    machine_id = %request.machine_id,
                    expected = %expected,
                    state = current.as_ref().map(|m| m.state.as_str()),
                    "machine changed during provider call, dropping result"
                );
                Ok(Reloaded::Moved(current))
            }
        }
    }

    /// Redispatch a failed request if the decider allows it, otherwise give up.
    async fn retry_or_fail(
        &self,
        request: &MachineRequest,
        action: MachineAction,
        error: RemoteActionError,
    ) -> Result<(), HandlerError> {
        match self.retry.decide(action, request.retry_count, &error) {
            RetryDecision::Retry => {
                let retry = self.factory.retry_of(request);
                warn!(
                    unique_id = %request.unique_id,
                    machine_id = %request.machine_id,
                    retry_count = retry.retry_count,
                    error = %error,
                    "recoverable failure, retrying"
                );
                self.dispatcher.dispatch(&retry).await?;
                Ok(())
            }
            RetryDecision::Exhausted => {
                warn!(
                    unique_id = %request.unique_id,
                    machine_id = %request.machine_id,
                    retry_count = request.retry_count,
                    "retries exhausted"
                );
                Err(HandlerError::Unrecoverable(error))
            }
            RetryDecision::Unrecoverable => Err(HandlerError::Unrecoverable(error)),
        }
    }
}

enum Reloaded {
    Unchanged(Machine),
    Moved(Option<Machine>),
}

/// Routes each request to its handler and finishes off terminal failures.
#[derive(Clone)]
pub struct MachineRequestHandler {
    ctx: HandlerContext,
}

impl MachineRequestHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    pub async fn handle(&self, request: &MachineRequest) -> Result<(), HandlerError> {
        let result = match request.action {
            RequestAction::Create => create::handle(&self.ctx, request).await,
            RequestAction::Get => get::handle(&self.ctx, request).await,
            RequestAction::Find { .. } => find::handle(&self.ctx, request).await,
            RequestAction::Delete => delete::handle(&self.ctx, request).await,
            RequestAction::CheckIsActive => check_active::handle(&self.ctx, request).await,
        };

        if let Err(err) = &result {
            if let HandlerError::Unrecoverable(remote) = err {
                self.fail(request, remote).await;
            }
            audit(request, err);
        }
        result
    }

    /// Move the machine to its action's terminal state and record why.
    /// The record is written first so that a client seeing the terminal
    /// state also sees the failure.
    async fn fail(&self, request: &MachineRequest, error: &RemoteActionError) {
        if let Err(e) = self.ctx.recorder.record(error).await {
            error!(machine_id = %request.machine_id, error = %e, "failed to record action failure");
        }

        if let Some(terminal) = request.action.terminal_state() {
            match self.ctx.live_machine(request).await {
                Ok(Some(mut machine)) => {
                    machine.state = terminal;
                    if let Err(e) = self.ctx.store.store_machine(&machine).await {
                        error!(machine_id = %request.machine_id, error = %e, "failed to store terminal state");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(machine_id = %request.machine_id, error = %e, "failed to load machine for terminal state")
                }
            }
        }
    }
}

/// One error event per layer of the error chain.
fn audit(request: &MachineRequest, err: &HandlerError) {
    let mut layer: Option<&(dyn StdError + 'static)> = Some(err);
    let mut depth = 0u32;

    while let Some(current) = layer {
        let (cause_code, cause_kind) = if let Some(failure) = current.downcast_ref::<RemoteFailure>() {
            (Some(failure_code(&failure.kind).code()), failure.kind.label())
        } else if current.is::<RemoteActionError>() {
            (None, "remote_action")
        } else if current.is::<HandlerError>() {
            (None, "handler")
        } else {
            (None, "source")
        };

        error!(
            unique_id = %request.unique_id,
            machine_id = %request.machine_id,
            kind = request.kind(),
            depth,
            cause_code,
            cause_kind,
            "{current}"
        );

        layer = current.source();
        depth += 1;
    }
}
