use crate::engine::{ConnectionEngine, EngineContext};
use crate::error::ResultsError;
use crate::results::{Results, RoundInput, RoundStats};
use futures::future::join_all;
use log::{error, info, warn};
use std::time::Duration;
use tokio::time::{interval, sleep, timeout, Instant};

/// How often the connection count is checked while a round waits for its clients.
const CONNECT_POLL: Duration = Duration::from_millis(100);
/// How often progress is logged while a round is running.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub rounds: usize,
    /// Clients added at the start of every round.
    pub connection_interval: usize,
    /// Upper bound on the wait for every client to be connected.
    pub connect_timeout: Duration,
}

/// Runs the benchmark rounds, growing the client population each round.
pub struct Orchestrator {
    config: OrchestratorConfig,
    context: EngineContext,
    results: Results,
    engines: Vec<ConnectionEngine>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, context: EngineContext, results: Results) -> Self {
        Self {
            config,
            context,
            results,
            engines: Vec::new(),
        }
    }

    pub fn clients(&self) -> usize {
        self.engines.len()
    }

    /// Runs every round and closes all clients afterwards. Rounds without a single completed
    /// request produce no statistics; a results file that can't be written aborts the run.
    pub async fn run(&mut self) -> Result<Vec<RoundStats>, ResultsError> {
        let mut stats = Vec::with_capacity(self.config.rounds);

        for round in 1..=self.config.rounds {
            match self.run_round(round).await {
                Ok(round_stats) => stats.push(round_stats),
                Err(ResultsError::NoCompletedRequests) => {
                    warn!("round {} completed no requests, nothing recorded", round);
                }
                Err(err) => {
                    error!("round {} failed: {}", round, err);
                    self.close();
                    return Err(err);
                }
            }
        }

        self.close();
        Ok(stats)
    }

    pub async fn run_round(&mut self, round: usize) -> Result<RoundStats, ResultsError> {
        let progress = self.context.progress.clone();
        progress.reset_completed();

        let started = Instant::now();
        self.add_clients().await;
        let connection_time = started.elapsed();
        let clients = self.engines.len();
        info!(
            "round {}: {}/{} clients connected in {}ms",
            round,
            progress.connected(),
            clients,
            connection_time.as_millis()
        );

        let reporter = tokio::spawn({
            let progress = progress.clone();
            async move {
                let mut ticker = interval(PROGRESS_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    info!(
                        "{} clients connected, {} responses so far",
                        progress.connected(),
                        progress.completed()
                    );
                }
            }
        });

        let times = join_all(
            self.engines
                .iter()
                .enumerate()
                .map(|(index, engine)| engine.send_round(index)),
        )
        .await;
        reporter.abort();

        self.results.calculate(&RoundInput {
            clients,
            connection_time,
            times,
        })
    }

    // Creates the round's new engines and waits until every engine is connected
    async fn add_clients(&mut self) {
        let first = self.engines.len();
        for id in first..first + self.config.connection_interval {
            self.engines
                .push(ConnectionEngine::new(id, self.context.clone()));
        }
        join_all(self.engines[first..].iter().map(|engine| engine.connect())).await;

        let target = self.engines.len() as i64;
        let progress = &self.context.progress;
        let connected = timeout(self.config.connect_timeout, async {
            while progress.connected() < target {
                sleep(CONNECT_POLL).await;
            }
        })
        .await;

        if connected.is_err() {
            warn!(
                "only {}/{} clients connected after {:?}, starting the round anyway",
                progress.connected(),
                target,
                self.config.connect_timeout
            );
        }
    }

    pub fn close(&mut self) {
        for engine in &self.engines {
            engine.close();
        }
        info!("closed {} clients", self.engines.len());
    }
}
