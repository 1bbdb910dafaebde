//! Stage-ordered registry and the dispatcher that drives an envelope
//! through it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::DispatchContext;
use super::handler::Receptor;
use super::{DispatchOutcome, LifecycleStage};
use crate::envelope::{MessageEnvelope, ServiceInstanceRef};
use crate::error::{DispatchError, ProcessingFailure};

/// Handlers grouped by the stage they fire at, in registration order.
/// Safe to mutate concurrently with dispatch in progress: registrations
/// take effect starting with the next dispatched envelope, matching the
/// handler registration contract.
pub struct HandlerRegistry<T> {
    stages: RwLock<HashMap<LifecycleStage, Vec<Arc<dyn Receptor<T>>>>>,
}

impl<T> HandlerRegistry<T> {
    pub fn new() -> Self {
        Self {
            stages: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, stage: LifecycleStage, handler: Arc<dyn Receptor<T>>) {
        self.stages.write().entry(stage).or_default().push(handler);
    }

    /// Removes the first handler at `stage` whose name matches. No-op if
    /// absent, matching the "safe to call at any time" registration
    /// contract.
    pub fn unregister(&self, stage: LifecycleStage, handler_name: &str) {
        if let Some(handlers) = self.stages.write().get_mut(&stage) {
            handlers.retain(|handler| handler.name() != handler_name);
        }
    }

    fn handlers_at(&self, stage: LifecycleStage) -> Vec<Arc<dyn Receptor<T>>> {
        self.stages
            .read()
            .get(&stage)
            .cloned()
            .unwrap_or_default()
    }
}

impl<T> Default for HandlerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives envelopes of payload type `T` through every [`LifecycleStage`] in
/// order, invoking registered handlers in registration order within each
/// stage.
pub struct Dispatcher<T> {
    registry: Arc<HandlerRegistry<T>>,
    service_instance: ServiceInstanceRef,
}

impl<T: Send + Sync + 'static> Dispatcher<T> {
    pub fn new(registry: Arc<HandlerRegistry<T>>, service_instance: ServiceInstanceRef) -> Self {
        Self {
            registry,
            service_instance,
        }
    }

    /// Runs `envelope` through every stage. A handler failure stops that
    /// stage and surfaces immediately: the spec leaves the retry decision to
    /// the worker loop, so the dispatcher itself never retries.
    #[tracing::instrument(skip(self, envelope), fields(message_id = %envelope.message_id()))]
    pub async fn dispatch(
        &self,
        mut envelope: MessageEnvelope<T>,
    ) -> Result<DispatchOutcome<T>, DispatchError> {
        let hop = envelope.child_hop(self.service_instance.clone());
        let correlation_id = hop.correlation_id;
        envelope.append_hop(hop);
        let message_id = envelope.message_id();

        let mut emitted = Vec::new();

        for stage in LifecycleStage::ORDER {
            let handlers = self.registry.handlers_at(stage);
            if handlers.is_empty() {
                continue;
            }

            let ctx = DispatchContext::new(
                self.service_instance.clone(),
                stage,
                correlation_id,
                message_id,
            );

            for handler in &handlers {
                handler
                    .handle(&mut envelope, &ctx)
                    .await
                    .map_err(|failure: ProcessingFailure| DispatchError::StageFailed {
                        stage,
                        source: failure,
                    })?;
            }

            emitted.extend(ctx.into_emitted());
        }

        Ok(DispatchOutcome { envelope, emitted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Hop;
    use crate::ids::CorrelationId;
    use async_trait::async_trait;

    fn instance(name: &str) -> ServiceInstanceRef {
        ServiceInstanceRef {
            service_name: name.into(),
            instance_id: "i-1".into(),
            host: "localhost".into(),
            pid: 1,
        }
    }

    struct RecordingHandler {
        name: String,
        log: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Receptor<String> for RecordingHandler {
        async fn handle(
            &self,
            envelope: &mut MessageEnvelope<String>,
            _ctx: &DispatchContext,
        ) -> Result<(), ProcessingFailure> {
            self.log.lock().push(self.name.clone());
            envelope.payload_mut().push('!');
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl Receptor<String> for FailingHandler {
        async fn handle(
            &self,
            _envelope: &mut MessageEnvelope<String>,
            _ctx: &DispatchContext,
        ) -> Result<(), ProcessingFailure> {
            Err(ProcessingFailure::validation("boom"))
        }
    }

    struct EmittingHandler;

    #[async_trait]
    impl Receptor<String> for EmittingHandler {
        async fn handle(
            &self,
            _envelope: &mut MessageEnvelope<String>,
            ctx: &DispatchContext,
        ) -> Result<(), ProcessingFailure> {
            ctx.emit("downstream", "Notify", serde_json::json!({"ok": true}), None);
            Ok(())
        }
    }

    #[tokio::test]
    async fn handlers_within_a_stage_run_in_registration_order() {
        let registry: Arc<HandlerRegistry<String>> = Arc::new(HandlerRegistry::new());
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        registry.register(
            LifecycleStage::ReceptorInvoke,
            Arc::new(RecordingHandler {
                name: "first".into(),
                log: log.clone(),
            }),
        );
        registry.register(
            LifecycleStage::ReceptorInvoke,
            Arc::new(RecordingHandler {
                name: "second".into(),
                log: log.clone(),
            }),
        );

        let dispatcher = Dispatcher::new(registry, instance("svc"));
        let correlation_id = CorrelationId::generate();
        let envelope = MessageEnvelope::new("hi".to_string(), Hop::origin(instance("producer"), correlation_id));

        let outcome = dispatcher.dispatch(envelope).await.unwrap();
        assert_eq!(*log.lock(), vec!["first", "second"]);
        assert_eq!(outcome.envelope.payload(), "hi!!");
        assert_eq!(outcome.envelope.hops().len(), 2);
    }

    #[tokio::test]
    async fn a_failing_handler_stops_the_stage_and_surfaces() {
        let registry: Arc<HandlerRegistry<String>> = Arc::new(HandlerRegistry::new());
        registry.register(LifecycleStage::PreValidate, Arc::new(FailingHandler));

        let dispatcher = Dispatcher::new(registry, instance("svc"));
        let correlation_id = CorrelationId::generate();
        let envelope = MessageEnvelope::new("hi".to_string(), Hop::origin(instance("producer"), correlation_id));

        let err = dispatcher.dispatch(envelope).await.unwrap_err();
        assert_eq!(err.stage(), Some(LifecycleStage::PreValidate));
    }

    #[tokio::test]
    async fn emitted_messages_are_collected_across_stages() {
        let registry: Arc<HandlerRegistry<String>> = Arc::new(HandlerRegistry::new());
        registry.register(LifecycleStage::ReceptorInvoke, Arc::new(EmittingHandler));

        let dispatcher = Dispatcher::new(registry, instance("svc"));
        let correlation_id = CorrelationId::generate();
        let envelope = MessageEnvelope::new("hi".to_string(), Hop::origin(instance("producer"), correlation_id));

        let outcome = dispatcher.dispatch(envelope).await.unwrap();
        assert_eq!(outcome.emitted.len(), 1);
        assert_eq!(outcome.emitted[0].destination, "downstream");
        assert_eq!(
            outcome.emitted[0].metadata["correlation_id"],
            correlation_id.to_string()
        );
        assert_eq!(
            outcome.emitted[0].metadata["causation_id"],
            outcome.envelope.message_id().to_string()
        );
    }
}
