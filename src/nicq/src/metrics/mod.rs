/*
Copyright 2026  The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::sync::Once;

pub(crate) mod metrics_macro;

use metrics_macro::{NamedMetric, define_metrics};

static LABEL_SIDE: &str = "side";

// These define all metrics emitted by the managers
define_metrics! {
    CounterMetric {
        /// Commit with an out-of-range or free tag
        ProtocolViolations { side: &'static str } => {
            name: "nicq_protocol_violations_total",
            description: "Number of commits dropped because their operation tag was not outstanding",
            unit: metrics::Unit::Count,
        },
        TableExhausted { side: &'static str } => {
            name: "nicq_op_table_exhausted_total",
            description: "Number of requests refused because the operation table was full",
            unit: metrics::Unit::Count,
        },
        StaleEntries { side: &'static str, count: u64 } => {
            name: "nicq_stale_op_entries_total",
            description: "Number of operation table entries reported as leaked by an audit",
            unit: metrics::Unit::Count,
        },
        Doorbells => {
            name: "nicq_doorbells_total",
            description: "Number of doorbells raised by descriptor queues",
            unit: metrics::Unit::Count,
        },
        Events => {
            name: "nicq_events_total",
            description: "Number of events raised by armed completion queues",
            unit: metrics::Unit::Count,
        },
    }
    HistogramMetric {
        /// Slots retired by a single commit, greater than one when the
        /// commit closed a gap in the reorder window
        RetireBatch { side: &'static str, slots: u64 } => {
            name: "nicq_retire_batch_slots",
            description: "Number of slots retired by one commit",
            unit: metrics::Unit::Count,
        },
    }
}

impl CounterMetric {
    #[must_use]
    pub(crate) fn protocol_violation(side: &'static str) -> Self {
        CounterMetric::ProtocolViolations { side }
    }

    #[must_use]
    pub(crate) fn table_exhausted(side: &'static str) -> Self {
        CounterMetric::TableExhausted { side }
    }

    #[must_use]
    pub(crate) fn stale_entries(side: &'static str, count: u64) -> Self {
        CounterMetric::StaleEntries { side, count }
    }
}

/// A metric which can be emitted to the underlying metrics system
pub(crate) trait EmittableMetric {
    /// Emits the metric to the underlying metrics system.
    /// The first time this is called for a given metric variant, it will
    /// also describe the metric to the underlying metrics system.
    fn emit(self);
}

impl EmittableMetric for CounterMetric {
    fn emit(self) {
        let name = self.name();
        let unit = self.unit();
        let description = self.description();

        match self {
            CounterMetric::ProtocolViolations { side } => {
                static DESCRIBE: Once = Once::new();
                DESCRIBE.call_once(|| {
                    metrics::describe_counter!(name, unit, description);
                });
                metrics::counter!(name, LABEL_SIDE => side).increment(1);
            }
            CounterMetric::TableExhausted { side } => {
                static DESCRIBE: Once = Once::new();
                DESCRIBE.call_once(|| {
                    metrics::describe_counter!(name, unit, description);
                });
                metrics::counter!(name, LABEL_SIDE => side).increment(1);
            }
            CounterMetric::StaleEntries { side, count } => {
                static DESCRIBE: Once = Once::new();
                DESCRIBE.call_once(|| {
                    metrics::describe_counter!(name, unit, description);
                });
                metrics::counter!(name, LABEL_SIDE => side).increment(count);
            }
            CounterMetric::Doorbells => {
                static DESCRIBE: Once = Once::new();
                DESCRIBE.call_once(|| {
                    metrics::describe_counter!(name, unit, description);
                });
                metrics::counter!(name).increment(1);
            }
            CounterMetric::Events => {
                static DESCRIBE: Once = Once::new();
                DESCRIBE.call_once(|| {
                    metrics::describe_counter!(name, unit, description);
                });
                metrics::counter!(name).increment(1);
            }
        }
    }
}

impl EmittableMetric for HistogramMetric {
    fn emit(self) {
        let name = self.name();
        let unit = self.unit();
        let description = self.description();

        match self {
            HistogramMetric::RetireBatch { side, slots } => {
                static DESCRIBE: Once = Once::new();
                DESCRIBE.call_once(|| {
                    metrics::describe_histogram!(name, unit, description);
                });
                metrics::histogram!(name, LABEL_SIDE => side).record(slots as f64);
            }
        }
    }
}
