use crate::error::ResultsError;
use crate::percentile::calculate_percentile;
use crate::store::ResultStore;
use crate::timing::RoundTimings;
use log::info;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the orchestrator collected for one round.
#[derive(Debug, Clone, Default)]
pub struct RoundInput {
    pub clients: usize,
    pub connection_time: Duration,
    pub times: Vec<RoundTimings>,
}

/// Statistics of one round. Times are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundStats {
    pub clients: usize,
    pub rate: u32,
    pub count: u64,
    pub total: u64,
    pub percentage: f64,
    pub time: u64,
    pub longest: u64,
    pub shortest: u64,
    pub average: f64,
    pub connection_time: u64,
    #[serde(rename = "50th_percentile")]
    pub p50: f64,
    #[serde(rename = "90th_percentile")]
    pub p90: f64,
    #[serde(rename = "99th_percentile")]
    pub p99: f64,
}

pub struct Results {
    request_interval: u32,
    rate: u32,
    store: Option<ResultStore>,
}

impl Results {
    pub fn new(request_interval: u32, rate: u32, store: Option<ResultStore>) -> Self {
        Self {
            request_interval,
            rate,
            store,
        }
    }

    /// Summarizes the round, logs it and appends it to the results file.
    pub fn calculate(&self, input: &RoundInput) -> Result<RoundStats, ResultsError> {
        let stats = self.summarize(input)?;

        info!(
            "Count: {}/{} ({:.3}%) | Time Elapse: {}ms",
            stats.count, stats.total, stats.percentage, stats.time
        );
        info!(
            "Longest Trip: {}ms | Shortest Trip: {}ms | Average Trip: {:.3}ms",
            stats.longest, stats.shortest, stats.average
        );
        info!(
            "p50: {:.3}ms | p90: {:.3}ms | p99: {:.3}ms",
            stats.p50, stats.p90, stats.p99
        );

        if let Some(store) = &self.store {
            let rounds = store.append(&stats)?;
            info!("round result #{} saved to {}", rounds, store.path().display());
        }

        Ok(stats)
    }

    pub fn summarize(&self, input: &RoundInput) -> Result<RoundStats, ResultsError> {
        let mut start_time = u64::MAX;
        let mut stop_time = 0u64;
        let mut longest = 0u64;
        let mut shortest = u64::MAX;
        let mut total_round_trip = 0u64;
        let mut count = 0u64;
        let mut latencies = Vec::new();

        // Only records holding all three timestamps take part
        for trip in input.times.iter().flat_map(RoundTimings::iter) {
            let (Some(finish), Some(_)) = (trip.finish, trip.received) else {
                continue;
            };

            start_time = start_time.min(trip.start);
            stop_time = stop_time.max(finish);

            let trip_time = finish.saturating_sub(trip.start);
            latencies.push(trip_time as f64);
            longest = longest.max(trip_time);
            shortest = shortest.min(trip_time);
            total_round_trip += trip_time;
            count += 1;
        }

        if count == 0 {
            return Err(ResultsError::NoCompletedRequests);
        }

        latencies.sort_by(f64::total_cmp);
        let percentile = |p| calculate_percentile(&latencies, p).ok_or(ResultsError::NoCompletedRequests);

        let total = self.request_interval as u64 * input.clients as u64;
        let percentage = if total == 0 {
            0.0
        } else {
            count as f64 / total as f64 * 100.0
        };

        Ok(RoundStats {
            clients: input.clients,
            rate: self.rate,
            count,
            total,
            percentage: round3(percentage),
            time: stop_time.saturating_sub(start_time),
            longest,
            shortest,
            average: round3(total_round_trip as f64 / count as f64),
            connection_time: input.connection_time.as_millis() as u64,
            p50: round3(percentile(50.0)?),
            p90: round3(percentile(90.0)?),
            p99: round3(percentile(99.0)?),
        })
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
