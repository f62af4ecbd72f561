// prober.rs - Bounded-Concurrency Prober
// Purpose: Run one probe per candidate with a sliding in-flight window.
//          A failed probe is recorded and dropped; it never aborts the batch.

use crate::candidates::Candidate;
use crate::errors::ProbeError;
use futures::stream::{self, StreamExt};
use std::future::Future;

/// One network check against a single candidate.
///
/// Implementations carry everything a probe needs (client, headers,
/// timeouts) so the fan-out captures nothing but an immutable reference.
pub trait Probe {
    type Payload;

    fn probe(&self, candidate: &Candidate) -> impl Future<Output = Result<Self::Payload, ProbeError>>;
}

/// Outcome of probing one candidate
#[derive(Debug, Clone)]
pub struct ProbeResult<P> {
    pub candidate: Candidate,
    pub outcome: Result<P, ProbeError>,
}

impl<P> ProbeResult<P> {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Everything a batch produced, in candidate generation order
#[derive(Debug)]
pub struct BatchOutcome<P> {
    pub successes: Vec<(Candidate, P)>,
    pub failures: Vec<(Candidate, ProbeError)>,
}

impl<P> Default for BatchOutcome<P> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<P> BatchOutcome<P> {
    fn record(&mut self, result: ProbeResult<P>) {
        match result.outcome {
            Ok(payload) => self.successes.push((result.candidate, payload)),
            Err(err) => self.failures.push((result.candidate, err)),
        }
    }

    fn sort(&mut self) {
        self.successes.sort_by_key(|(c, _)| c.index);
        self.failures.sort_by_key(|(c, _)| c.index);
    }

    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    /// Failures caused by our own resolver rather than the target
    pub fn infrastructure_failures(&self) -> Vec<(&Candidate, &ProbeError)> {
        self.failures
            .iter()
            .filter(|(_, e)| e.is_infrastructure())
            .map(|(c, e)| (c, e))
            .collect()
    }
}

/// Probe every candidate with at most `concurrency` probes in flight.
///
/// The window slides: as soon as one probe settles the next candidate is
/// admitted. `on_settled` runs on the collecting task for each result in
/// completion order; results are returned sorted by candidate index.
pub async fn probe_all<P, I, F>(
    candidates: I,
    probe: &P,
    concurrency: usize,
    mut on_settled: F,
) -> BatchOutcome<P::Payload>
where
    P: Probe,
    I: IntoIterator<Item = Candidate>,
    F: FnMut(&ProbeResult<P::Payload>),
{
    let mut in_flight = stream::iter(candidates)
        .map(|candidate| async move {
            let outcome = probe.probe(&candidate).await;
            ProbeResult { candidate, outcome }
        })
        .buffer_unordered(concurrency.max(1));

    let mut batch = BatchOutcome::default();
    while let Some(result) = in_flight.next().await {
        on_settled(&result);
        batch.record(result);
    }

    batch.sort();
    batch
}
