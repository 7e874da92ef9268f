use tracing::info;
use wm_db::{MachineProviderRecord, MachineState};
use wm_infra::types::MachineAction;

use super::{HandlerContext, HandlerError, Reloaded};
use crate::request::{MachineRequest, RequestAction};

pub(super) async fn handle(ctx: &HandlerContext, request: &MachineRequest) -> Result<(), HandlerError> {
    let RequestAction::Find {
        on_not_found_state,
        re_dispatch_on_success,
    } = request.action
    else {
        return Ok(());
    };

    let Some(mut machine) = ctx.live_machine(request).await? else {
        return Ok(());
    };

    // Create and delete workflows keep their own state while looking.
    if machine.state == MachineState::FindReceived {
        machine.state = MachineState::FindFinding;
        ctx.store.store_machine(&machine).await?;
    }

    let looking_from = machine.state;
    match ctx.manager.find(&machine.id).await {
        Ok(Some((provider, remote))) => {
            ctx.store
                .store_provider(&MachineProviderRecord::new(&machine.id, provider))
                .await?;
            let Reloaded::Unchanged(mut machine) = ctx.reload(request, looking_from).await? else {
                return Ok(());
            };
            machine.apply_remote(&remote);
            ctx.store.store_machine(&machine).await?;

            info!(machine_id = %machine.id, %provider, remote_id = remote.id, state = %machine.state, "machine found");
            ctx.dispatcher.dispatch_all(&request.on_success).await?;
            if re_dispatch_on_success {
                ctx.dispatcher.dispatch(&ctx.factory.repeat_of(request)).await?;
            }
            Ok(())
        }
        Ok(None) => {
            let Reloaded::Unchanged(mut machine) = ctx.reload(request, looking_from).await? else {
                return Ok(());
            };
            machine.state = on_not_found_state;
            ctx.store.store_machine(&machine).await?;

            info!(machine_id = %machine.id, state = %machine.state, "machine not found on any provider");
            ctx.dispatcher.dispatch_all(&request.on_failure).await?;
            Ok(())
        }
        Err(error) => ctx.retry_or_fail(request, MachineAction::Find, error).await,
    }
}
