//! Invocation state machine
//!
//! `Start → (DeleteRequested? → NotifySuccess → Done) | (Resolve →
//! {ResolveOk → NotifySuccess, ResolveFailed → NotifyFailure} → Done)`
//!
//! Exactly one notification is sent per invocation regardless of the
//! resolution outcome. The only error this function returns is a failed
//! delivery, which is terminal for the invocation.

use tracing::{info, instrument, warn};

use crate::event::{RequestType, ResourceEvent};
use crate::resolver::{self, ImageCatalog};
use crate::response::{CallbackTransport, Notifier, ResponseStatus, ResultData};
use crate::Result;

/// Handle one custom resource event end to end
///
/// A Delete request is acknowledged immediately: this resource provisions
/// nothing, so there is nothing to tear down and no reason to touch the
/// catalog. Create and Update resolve the latest qualifying image and
/// report the outcome either way.
///
/// # Arguments
///
/// * `event` - The invocation event
/// * `catalog` - Image catalog collaborator
/// * `notifier` - Callback notifier; consumes the single notification slot
#[instrument(
    skip(event, catalog, notifier),
    fields(request = %event.request_id, request_type = %event.request_type)
)]
pub async fn handle_event<C, T>(
    event: &ResourceEvent,
    catalog: &C,
    notifier: &Notifier<T>,
) -> Result<()>
where
    C: ImageCatalog + ?Sized,
    T: CallbackTransport,
{
    info!(resource = %event.logical_resource_id, "handling custom resource event");

    if event.request_type == RequestType::Delete {
        info!("delete request, acknowledging without a catalog query");
        return notifier
            .notify(event, ResponseStatus::Success, ResultData::none())
            .await;
    }

    let architecture = event.resource_properties.architecture.as_deref();
    let region = event.resource_properties.region.as_deref();

    match resolver::resolve_latest(architecture, region, catalog).await {
        Ok(image) => {
            info!(image = %image.id, name = %image.name, "selected image");
            notifier
                .notify(event, ResponseStatus::Success, ResultData::with_id(image.id))
                .await
        }
        Err(e) => {
            warn!(error = %e, "image resolution failed");
            notifier
                .notify(event, ResponseStatus::Failed, ResultData::with_error(e.to_string()))
                .await
        }
    }
}
