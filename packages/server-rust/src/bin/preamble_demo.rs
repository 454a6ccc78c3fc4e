//! Wires a server and an in-process client with the configured pipelines and
//! performs one `Preamble` call per `--msg` value.
//!
//! Run with: cargo run --bin preamble-demo -- --msg 5 --msg -3

use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use preamble_core::{CallContext, PreambleService};
use preamble_server::policy::{CircuitBreakerConfig, RateLimitConfig};
use preamble_server::service::{new_service, MiddlewareKind, PipelineConfig, PreambleEndpoints};
use preamble_server::{GrpcClient, GrpcServer, Instrumentation};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "preamble-demo", about = "Round-trips Preamble calls through the full pipeline")]
struct Args {
    /// Values to send; one call per value.
    #[arg(long = "msg", default_values_t = [5_i64], allow_negative_numbers = true)]
    msgs: Vec<i64>,

    /// Seconds to refill one rate-limit token.
    #[arg(long, env = "PREAMBLE_REFILL_SECS", default_value_t = 1)]
    refill_secs: u64,

    /// Rate-limit burst size.
    #[arg(long, env = "PREAMBLE_BURST", default_value_t = 100)]
    burst: u32,

    /// Seconds the server breaker stays open before trial calls.
    #[arg(long, env = "PREAMBLE_BREAKER_TIMEOUT_SECS", default_value_t = 60)]
    breaker_timeout_secs: u64,

    /// Server middleware, outermost first.
    #[arg(long, value_enum, value_delimiter = ',')]
    stack: Option<Vec<MiddlewareKind>>,

    /// Per-call deadline in milliseconds.
    #[arg(long, default_value_t = 1_000)]
    timeout_ms: u64,

    /// Emit logs as JSON lines.
    #[arg(long, env = "PREAMBLE_JSON_LOGS")]
    json_logs: bool,
}

impl Args {
    fn server_config(&self) -> PipelineConfig {
        let config = PipelineConfig {
            rate_limit: RateLimitConfig {
                refill_every: Duration::from_secs(self.refill_secs),
                burst: self.burst,
            },
            circuit_breaker: CircuitBreakerConfig {
                open_timeout: Duration::from_secs(self.breaker_timeout_secs),
                ..CircuitBreakerConfig::default()
            },
            ..PipelineConfig::server()
        };
        match &self.stack {
            Some(stack) => config.with_stack(stack.clone()),
            None => config,
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    let provider = SdkTracerProvider::builder().build();
    let instrumentation = Instrumentation::new(provider.tracer("preamble-demo"));

    let server_config = args.server_config();
    let endpoints = PreambleEndpoints::new(
        new_service(&server_config),
        &instrumentation,
        &server_config,
    );
    let server = GrpcServer::new(&endpoints, &instrumentation);
    let client = GrpcClient::new(server, &instrumentation, &PipelineConfig::client());

    for msg in &args.msgs {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(args.timeout_ms));
        match client.preamble(&ctx, *msg).await {
            Ok(rs) => println!("preamble({msg}) = {rs}"),
            Err(err) => println!("preamble({msg}) failed: {err} ({:?})", err.code()),
        }
    }

    provider
        .shutdown()
        .context("failed to shut down tracer provider")?;
    Ok(())
}
