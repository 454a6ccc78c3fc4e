//! Domain service implementations.

use std::sync::Arc;

use async_trait::async_trait;
use preamble_core::{CallContext, CallError, PreambleService};

use crate::service::config::PipelineConfig;
use crate::service::logging::LoggingDecorator;

/// Stub `Preamble` implementation: answers with its input.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoService;

#[async_trait]
impl PreambleService for EchoService {
    async fn preamble(&self, _ctx: &CallContext, msg: i64) -> Result<i64, CallError> {
        Ok(msg)
    }
}

/// Prepares `service` to sit under an endpoint pipeline built from `config`.
///
/// Each call is logged exactly once: by the pipeline's logging layer when
/// the stack has one, otherwise by a [`LoggingDecorator`] around the service.
pub fn served<S>(service: S, config: &PipelineConfig) -> Arc<dyn PreambleService>
where
    S: PreambleService + 'static,
{
    if config.logs_calls() {
        Arc::new(service)
    } else {
        Arc::new(LoggingDecorator::new(service))
    }
}

/// The stub service, prepared for a pipeline built from `config`.
#[must_use]
pub fn new_service(config: &PipelineConfig) -> Arc<dyn PreambleService> {
    served(EchoService, config)
}
