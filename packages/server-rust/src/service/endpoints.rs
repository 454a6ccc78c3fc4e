//! The endpoint set: one fully decorated endpoint per operation.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::trace::SpanKind;
use preamble_core::{
    operation_names, CallContext, CallError, PreambleRequest, PreambleResponse, PreambleService,
};
use tower::ServiceExt;

use crate::instrumentation::Instrumentation;
use crate::policy::{AdmissionPolicy, CircuitBreaker, TokenBucket};
use crate::service::config::PipelineConfig;
use crate::service::endpoint::{make_preamble_endpoint, Call, Endpoint};
use crate::service::middleware::{EndpointBuilder, StackParts};

/// Every operation of the `Preamble` service as an [`Endpoint`].
///
/// Built once at wiring time and cloned freely; clones share limiter and
/// breaker state. Implements [`PreambleService`], so a set can stand in
/// wherever a service is expected.
#[derive(Clone)]
pub struct PreambleEndpoints {
    preamble: Endpoint<PreambleRequest, PreambleResponse>,
}

impl PreambleEndpoints {
    /// Wraps each operation of `service` in the middleware `config` lists.
    ///
    /// The rate limiter is shared by all operations of the set; each
    /// operation gets its own circuit breaker.
    pub fn new<S>(service: Arc<S>, instrumentation: &Instrumentation, config: &PipelineConfig) -> Self
    where
        S: PreambleService + ?Sized + 'static,
    {
        let limiter: Arc<dyn AdmissionPolicy> = Arc::new(TokenBucket::new(config.rate_limit));
        let breaker: Arc<dyn AdmissionPolicy> = Arc::new(CircuitBreaker::new(
            operation_names::PREAMBLE,
            config.circuit_breaker,
        ));

        let preamble = EndpointBuilder::from_config(
            config,
            StackParts {
                operation: operation_names::PREAMBLE,
                span_kind: SpanKind::Server,
                instrumentation,
                limiter,
                breaker,
            },
        )
        .build(make_preamble_endpoint(service));

        Self { preamble }
    }

    /// Assembles a set from already decorated endpoints.
    #[must_use]
    pub fn from_endpoints(preamble: Endpoint<PreambleRequest, PreambleResponse>) -> Self {
        Self { preamble }
    }

    #[must_use]
    pub fn preamble_endpoint(&self) -> &Endpoint<PreambleRequest, PreambleResponse> {
        &self.preamble
    }
}

#[async_trait]
impl PreambleService for PreambleEndpoints {
    async fn preamble(&self, ctx: &CallContext, msg: i64) -> Result<i64, CallError> {
        let response = self
            .preamble
            .clone()
            .oneshot(Call::new(ctx.clone(), PreambleRequest { msg }))
            .await?;
        Ok(response.rs)
    }
}

impl std::fmt::Debug for PreambleEndpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreambleEndpoints").finish_non_exhaustive()
    }
}
