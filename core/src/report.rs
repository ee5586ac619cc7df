use hdrhistogram::Histogram;

use crate::flow::{Flow, FlowId};

/// One finished flow, as reporting collaborators consume it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FctRow {
    pub flow: FlowId,
    pub start_time: f64,
    pub finish_time: f64,
    /// Flow completion time in seconds.
    pub completion: f64,
}

/// Flow-completion-time summary over a finished-flow sequence.
///
/// Completion times are recorded in microseconds internally; accessors
/// answer in seconds.
pub struct FctReport {
    histogram: Histogram<u64>,
    rows: Vec<FctRow>,
}

impl FctReport {
    pub fn from_flows<'a, I>(flows: I) -> Self
    where
        I: IntoIterator<Item = &'a Flow>,
    {
        let mut histogram =
            Histogram::<u64>::new(3).expect("3 significant figures is a valid histogram config");
        let mut rows = Vec::new();
        for flow in flows {
            let completion = flow.finish_time - flow.start_time;
            if completion.is_finite() && completion >= 0.0 {
                histogram.saturating_record((completion * 1e6).round() as u64);
            }
            rows.push(FctRow {
                flow: flow.id,
                start_time: flow.start_time,
                finish_time: flow.finish_time,
                completion,
            });
        }
        Self { histogram, rows }
    }

    pub fn rows(&self) -> &[FctRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Mean completion time in seconds.
    pub fn mean(&self) -> f64 {
        self.histogram.mean() / 1e6
    }

    /// Completion-time percentile in seconds.
    pub fn percentile(&self, p: f64) -> f64 {
        self.histogram.value_at_percentile(p) as f64 / 1e6
    }

    /// Slowest completion in seconds.
    pub fn max(&self) -> f64 {
        self.histogram.max() as f64 / 1e6
    }
}
