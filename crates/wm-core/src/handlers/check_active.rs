use tracing::debug;
use wm_db::StateCategory;

use super::{HandlerContext, HandlerError};
use crate::request::MachineRequest;

/// Poll loop: while the machine is still coming up, queue the follow-up
/// refresh and this check again, both after the inter-check delay.
pub(super) async fn handle(ctx: &HandlerContext, request: &MachineRequest) -> Result<(), HandlerError> {
    let Some(machine) = ctx.live_machine(request).await? else {
        return Ok(());
    };

    if machine.category() != StateCategory::PreActive {
        debug!(machine_id = %machine.id, state = %machine.state, "machine no longer pending, poll loop ends");
        return Ok(());
    }

    let delay = ctx.dispatcher.delays().check_is_active;
    for next in &request.on_success {
        ctx.dispatcher
            .dispatch_after(&ctx.factory.repeat_of(next), delay)
            .await?;
    }
    ctx.dispatcher
        .dispatch_after(&ctx.factory.repeat_of(request), delay)
        .await?;
    Ok(())
}
