use tracing::info;
use wm_db::MachineState;
use wm_infra::types::MachineAction;

use super::{HandlerContext, HandlerError};
use crate::request::MachineRequest;

pub(super) async fn handle(ctx: &HandlerContext, request: &MachineRequest) -> Result<(), HandlerError> {
    let Some(mut machine) = ctx.live_machine(request).await? else {
        return Ok(());
    };

    machine.state = MachineState::DeleteRequested;
    ctx.store.store_machine(&machine).await?;

    // Without a recorded provider every provider is asked to remove it.
    let provider = ctx.store.find_provider(&machine.id).await?;

    match ctx
        .manager
        .remove(provider.as_ref().map(|p| p.provider.as_str()), &machine.id)
        .await
    {
        Ok(()) => {
            info!(machine_id = %machine.id, "machine removal requested");
            ctx.dispatcher.dispatch_all(&request.on_success).await?;
            Ok(())
        }
        Err(error) => ctx.retry_or_fail(request, MachineAction::Delete, error).await,
    }
}

#[cfg(test)]
mod tests {
    use wm_infra::ProviderName;
    use wm_infra::failure::FailureKind;
    use wm_infra::testing::ScriptedProvider;

    use crate::request::RequestAction;
    use crate::testing::Harness;

    use super::*;

    #[tokio::test]
    async fn delete_removes_from_every_provider_when_none_is_recorded() {
        let harness = Harness::new(vec![
            ScriptedProvider::new(ProviderName::DigitalOcean).on_remove(Err(FailureKind::NotFound)),
            ScriptedProvider::new(ProviderName::Hetzner),
        ]);
        harness.seed("m1", MachineState::DeleteReceived).await;

        let request = harness.factory().delete("m1");
        handle(harness.ctx(), &request).await.unwrap();

        assert_eq!(harness.state("m1").await, MachineState::DeleteRequested);
        assert_eq!(harness.providers[0].calls(MachineAction::Delete), 1);
        assert_eq!(harness.providers[1].calls(MachineAction::Delete), 1);

        let published = harness.queue.published();
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].0.action,
            RequestAction::Find {
                on_not_found_state: MachineState::DeleteDeleted,
                re_dispatch_on_success: true,
            }
        );
    }

    #[tokio::test]
    async fn delete_targets_the_recorded_provider() {
        let harness = Harness::new(vec![
            ScriptedProvider::new(ProviderName::DigitalOcean),
            ScriptedProvider::new(ProviderName::Hetzner),
        ]);
        harness.seed("m1", MachineState::DeleteReceived).await;
        harness.store_provider("m1", ProviderName::Hetzner).await;

        let request = harness.factory().delete("m1");
        handle(harness.ctx(), &request).await.unwrap();

        assert_eq!(harness.providers[0].calls(MachineAction::Delete), 0);
        assert_eq!(harness.providers[1].calls(MachineAction::Delete), 1);
    }

    #[tokio::test]
    async fn transient_delete_failures_retry() {
        let harness = Harness::new(vec![ScriptedProvider::new(ProviderName::DigitalOcean)
            .on_remove(Err(FailureKind::Http { status: 500 }))]);
        harness.seed("m1", MachineState::DeleteReceived).await;

        let request = harness.factory().delete("m1");
        handle(harness.ctx(), &request).await.unwrap();

        let published = harness.queue.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0.action, RequestAction::Delete);
        assert_eq!(published[0].0.retry_count, 1);
    }
}
