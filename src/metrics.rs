/*
 * Copyright 2024 Google LLC
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Registry};

use crate::listener::State;

pub(crate) const LISTENER_LABEL: &str = "listener";
pub(crate) const OUTCOME_LABEL: &str = "outcome";
pub(crate) const STATE_LABEL: &str = "state";
pub(crate) const RESULT_LABEL: &str = "result";
pub(crate) const FILTER_LABEL: &str = "filter";

/// The outcome label of a dispatched connection bound to a filter chain.
pub const MATCHED: &str = "matched";
/// The outcome label of a dispatched connection no filter chain matched.
pub const NO_MATCH: &str = "no_match";

pub const ACCEPTED: &str = "accepted";
pub const REJECTED: &str = "rejected";

/// The registry every metric of the process is registered with, all of them
/// prefixed with `switchyard_`.
pub fn registry() -> &'static Registry {
    static REGISTRY: Lazy<Registry> = Lazy::new(|| {
        Registry::new_custom(Some("switchyard".into()), None)
            .expect("the namespace is a valid metric name")
    });

    &REGISTRY
}

/// Renders every metric of [`registry`] in the text exposition format.
pub fn encode() -> String {
    use prometheus::Encoder;

    let mut buffer = Vec::new();
    let encoder = prometheus::TextEncoder::new();
    if let Err(error) = encoder.encode(&registry().gather(), &mut buffer) {
        tracing::warn!(%error, "failed to encode metrics");
    }

    String::from_utf8(buffer).unwrap_or_default()
}

pub(crate) fn dispatch(listener: &str, outcome: &str) -> IntCounter {
    static DISPATCH: Lazy<IntCounterVec> = Lazy::new(|| {
        prometheus::register_int_counter_vec_with_registry! {
            prometheus::opts! {
                "listener_dispatch_total",
                "Total number of connections dispatched by a listener, by outcome",
            },
            &[LISTENER_LABEL, OUTCOME_LABEL],
            registry(),
        }
        .unwrap()
    });

    DISPATCH.with_label_values(&[listener, outcome])
}

pub(crate) fn original_dst_fallback(listener: &str) -> IntCounter {
    static ORIGINAL_DST_FALLBACK: Lazy<IntCounterVec> = Lazy::new(|| {
        prometheus::register_int_counter_vec_with_registry! {
            prometheus::opts! {
                "listener_original_dst_fallback_total",
                "Total number of connections dispatched on the accepting listener because their original destination was unavailable",
            },
            &[LISTENER_LABEL],
            registry(),
        }
        .unwrap()
    });

    ORIGINAL_DST_FALLBACK.with_label_values(&[listener])
}

pub(crate) fn connections_active(listener: &str) -> IntGauge {
    static CONNECTIONS_ACTIVE: Lazy<IntGaugeVec> = Lazy::new(|| {
        prometheus::register_int_gauge_vec_with_registry! {
            prometheus::opts! {
                "listener_connections_active",
                "Number of connections currently bound to a listener",
            },
            &[LISTENER_LABEL],
            registry(),
        }
        .unwrap()
    });

    CONNECTIONS_ACTIVE.with_label_values(&[listener])
}

pub(crate) fn listeners(state: State) -> IntGauge {
    static LISTENERS: Lazy<IntGaugeVec> = Lazy::new(|| {
        prometheus::register_int_gauge_vec_with_registry! {
            prometheus::opts! {
                "listeners",
                "Number of listener instances, by lifecycle state",
            },
            &[STATE_LABEL],
            registry(),
        }
        .unwrap()
    });

    LISTENERS.with_label_values(&[state.as_ref()])
}

/// Moves a listener instance between the [`listeners`] gauges. Retired
/// instances aren't counted.
pub(crate) fn transition_listener(from: State, to: State) {
    if from != State::Retired {
        listeners(from).dec();
    }

    if to != State::Retired {
        listeners(to).inc();
    }
}

pub(crate) fn listener_updates(result: &str) -> IntCounter {
    static LISTENER_UPDATES: Lazy<IntCounterVec> = Lazy::new(|| {
        prometheus::register_int_counter_vec_with_registry! {
            prometheus::opts! {
                "listener_updates_total",
                "Total number of listener updates, by whether they were accepted",
            },
            &[RESULT_LABEL],
            registry(),
        }
        .unwrap()
    });

    LISTENER_UPDATES.with_label_values(&[result])
}

pub(crate) fn drain_forced_closes(listener: &str) -> IntCounter {
    static DRAIN_FORCED_CLOSES: Lazy<IntCounterVec> = Lazy::new(|| {
        prometheus::register_int_counter_vec_with_registry! {
            prometheus::opts! {
                "listener_drain_forced_closes_total",
                "Total number of connections closed because their listener's drain deadline elapsed or the process shut down",
            },
            &[LISTENER_LABEL],
            registry(),
        }
        .unwrap()
    });

    DRAIN_FORCED_CLOSES.with_label_values(&[listener])
}

pub(crate) fn filter_chain_errors(filter: &str) -> IntCounter {
    static FILTER_CHAIN_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
        prometheus::register_int_counter_vec_with_registry! {
            prometheus::opts! {
                "filter_chain_errors_total",
                "Total number of connections closed by a filter returning an error",
            },
            &[FILTER_LABEL],
            registry(),
        }
        .unwrap()
    });

    FILTER_CHAIN_ERRORS.with_label_values(&[filter])
}

pub(crate) fn shutdown_initiated() -> &'static IntGauge {
    static SHUTDOWN_INITIATED: Lazy<IntGauge> = Lazy::new(|| {
        prometheus::register_int_gauge_with_registry! {
            prometheus::opts! {
                "shutdown_initiated",
                "Shutdown process has been started",
            },
            registry(),
        }
        .unwrap()
    });

    &SHUTDOWN_INITIATED
}
