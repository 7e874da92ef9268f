use tracing::{debug, info, warn};
use wm_db::{MachineProviderRecord, MachineState, StateCategory};
use wm_infra::ProviderName;
use wm_infra::types::MachineAction;

use super::{HandlerContext, HandlerError, Reloaded};
use crate::request::MachineRequest;

pub(super) async fn handle(ctx: &HandlerContext, request: &MachineRequest) -> Result<(), HandlerError> {
    let Some(mut machine) = ctx.live_machine(request).await? else {
        return Ok(());
    };

    if !matches!(machine.state, MachineState::CreateReceived | MachineState::CreateRequested) {
        debug!(
            unique_id = %request.unique_id,
            machine_id = %machine.id,
            state = %machine.state,
            "machine not awaiting creation, dropping request"
        );
        return Ok(());
    }

    machine.state = MachineState::CreateRequested;
    ctx.store.store_machine(&machine).await?;

    match ctx.manager.create(&machine.id).await {
        Ok((provider, remote)) => {
            ctx.store
                .store_provider(&MachineProviderRecord::new(&machine.id, provider))
                .await?;

            let mut machine = match ctx.reload(request, MachineState::CreateRequested).await? {
                Reloaded::Unchanged(machine) => machine,
                Reloaded::Moved(current) => {
                    if current.is_some_and(|m| matches!(m.category(), StateCategory::Ending | StateCategory::End)) {
                        remove_orphan(ctx, request, provider).await;
                    }
                    return Ok(());
                }
            };
            machine.apply_remote(&remote);
            ctx.store.store_machine(&machine).await?;

            info!(
                machine_id = %machine.id,
                %provider,
                remote_id = remote.id,
                state = %machine.state,
                "machine created"
            );
            ctx.dispatcher.dispatch_all(&request.on_success).await?;
            Ok(())
        }
        Err(error) => ctx.retry_or_fail(request, MachineAction::Create, error).await,
    }
}

/// The machine was deleted while the provider was still creating it, so the
/// delete workflow may already have missed the new instance.
async fn remove_orphan(ctx: &HandlerContext, request: &MachineRequest, provider: ProviderName) {
    info!(machine_id = %request.machine_id, %provider, "machine deleted during creation, removing it");
    if let Err(error) = ctx.manager.remove(Some(provider.as_str()), &request.machine_id).await {
        warn!(machine_id = %request.machine_id, %provider, %error, "failed to remove machine created during deletion");
    }
}
