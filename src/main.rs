use clap::Parser;
use env_logger::{Builder, Env, Target};
use log::{info, warn};
use socket_flow_bench::config::{BenchConfig, ClientConfig};
use socket_flow_bench::engine::EngineContext;
use socket_flow_bench::metrics::{MetricsSink, NoopMetrics, StatsdSink};
use socket_flow_bench::orchestrator::{Orchestrator, OrchestratorConfig};
use socket_flow_bench::payload::OrderEncoder;
use socket_flow_bench::progress::Progress;
use socket_flow_bench::results::Results;
use socket_flow_bench::store::ResultStore;
use socket_flow_bench::transport::WebSocketTransport;
use std::error::Error;
use std::fs::OpenOptions;
use std::sync::Arc;

fn init_logging(config: &BenchConfig) -> Result<(), Box<dyn Error>> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(path) = &config.log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.try_init()?;
    Ok(())
}

async fn metrics_sink(config: &BenchConfig) -> Arc<dyn MetricsSink> {
    let Some(address) = &config.statsd_address else {
        return Arc::new(NoopMetrics);
    };
    match StatsdSink::new(address, &config.statsd_prefix).await {
        Ok(sink) => Arc::new(sink),
        Err(err) => {
            warn!("statsd at {} unavailable, metrics disabled: {}", address, err);
            Arc::new(NoopMetrics)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = BenchConfig::parse();
    init_logging(&config)?;

    let transport = WebSocketTransport::new(config.url(), ClientConfig::default());
    info!(
        "benchmarking {} with {} rounds of +{} clients, {} requests per client at {}/s",
        transport.url(),
        config.rounds,
        config.connection_interval,
        config.request_interval,
        config.rate
    );

    let context = EngineContext {
        config: config.engine_config(),
        transport: Arc::new(transport),
        encoder: Arc::new(OrderEncoder::default()),
        metrics: metrics_sink(&config).await,
        progress: Arc::new(Progress::new()),
    };
    let results = Results::new(
        config.request_interval,
        config.rate,
        Some(ResultStore::new(&config.output_file)),
    );
    let orchestrator_config = OrchestratorConfig {
        rounds: config.rounds,
        connection_interval: config.connection_interval,
        connect_timeout: config.request_timeout(),
    };

    let stats = Orchestrator::new(orchestrator_config, context, results)
        .run()
        .await?;
    info!(
        "finished {}/{} rounds, results in {}",
        stats.len(),
        config.rounds,
        config.output_file.display()
    );

    Ok(())
}
