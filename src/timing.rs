use serde::{Deserialize, Serialize};

/// Timestamps of one request, epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingRecord {
    pub start: u64,
    pub received: Option<u64>,
    pub finish: Option<u64>,
}

impl TimingRecord {
    pub fn started(start: u64) -> Self {
        Self {
            start,
            received: None,
            finish: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received.is_some() && self.finish.is_some()
    }

    pub fn round_trip(&self) -> Option<u64> {
        self.finish.map(|finish| finish.saturating_sub(self.start))
    }
}

/// The records of one round, indexed by sequence number. Sequence numbers start at 1, 0 is
/// the heartbeat and never has a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTimings {
    records: Vec<TimingRecord>,
}

impl RoundTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
        }
    }

    /// Records a new request and returns its sequence number.
    pub fn start_next(&mut self, start: u64) -> u32 {
        self.records.push(TimingRecord::started(start));
        self.records.len() as u32
    }

    pub fn get(&self, sequence: u64) -> Option<&TimingRecord> {
        let index = usize::try_from(sequence).ok()?.checked_sub(1)?;
        self.records.get(index)
    }

    /// Completes the record of `sequence` with the first response that matches it. Returns
    /// the completed record, or None when the sequence is unknown or was already answered.
    pub fn complete(&mut self, sequence: u64, received: Option<u64>, finish: u64) -> Option<TimingRecord> {
        let index = usize::try_from(sequence).ok()?.checked_sub(1)?;
        let record = self.records.get_mut(index)?;
        if record.received.is_some() || record.finish.is_some() {
            return None;
        }

        // Set together, once. A response without a server timestamp still answers the
        // request, but the record stays incomplete and is left out of the statistics
        record.received = received;
        record.finish = Some(finish);
        Some(*record)
    }

    pub fn all_complete(&self) -> bool {
        self.records.iter().all(TimingRecord::is_complete)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimingRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[TimingRecord] {
        &self.records
    }
}

impl From<Vec<TimingRecord>> for RoundTimings {
    fn from(records: Vec<TimingRecord>) -> Self {
        Self { records }
    }
}
