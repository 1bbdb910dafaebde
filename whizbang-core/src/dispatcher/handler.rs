//! The handler contract invoked at a specific lifecycle stage.

use async_trait::async_trait;

use super::DispatchContext;
use crate::envelope::MessageEnvelope;
use crate::error::ProcessingFailure;

/// A handler invoked at one lifecycle stage for payload type `T`. Called
/// `Receptor` throughout the rest of this crate, matching the term used for
/// the role at the data-model level.
#[async_trait]
pub trait Receptor<T>: Send + Sync {
    async fn handle(
        &self,
        envelope: &mut MessageEnvelope<T>,
        ctx: &DispatchContext,
    ) -> Result<(), ProcessingFailure>;

    /// A human-readable name used in logs and error messages. Defaults to
    /// the handler's type name, which is usually descriptive enough that
    /// implementors never need to override this.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
