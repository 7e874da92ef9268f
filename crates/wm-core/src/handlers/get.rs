use tracing::debug;
use wm_infra::types::MachineAction;

use super::{HandlerContext, HandlerError, Reloaded};
use crate::request::MachineRequest;

pub(super) async fn handle(ctx: &HandlerContext, request: &MachineRequest) -> Result<(), HandlerError> {
    let Some(machine) = ctx.live_machine(request).await? else {
        return Ok(());
    };

    let provider = ctx.store.find_provider(&machine.id).await?;

    match ctx
        .manager
        .get(provider.as_ref().map(|p| p.provider.as_str()), &machine.id)
        .await
    {
        Ok(remote) => {
            let Reloaded::Unchanged(mut machine) = ctx.reload(request, machine.state).await? else {
                return Ok(());
            };
            machine.apply_remote(&remote);
            ctx.store.store_machine(&machine).await?;

            debug!(machine_id = %machine.id, state = %machine.state, "machine refreshed");
            ctx.dispatcher.dispatch_all(&request.on_success).await?;
            Ok(())
        }
        Err(error) => ctx.retry_or_fail(request, MachineAction::Get, error).await,
    }
}
