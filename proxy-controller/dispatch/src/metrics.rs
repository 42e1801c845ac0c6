use crate::CallError;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

#[derive(Clone, Debug)]
pub struct DispatchMetrics {
    calls: Family<CallLabels, Counter>,
    durations: Family<WebhookLabels, Histogram>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct CallLabels {
    webhook: String,
    outcome: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct WebhookLabels {
    webhook: String,
}

// === impl DispatchMetrics ===

impl DispatchMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let calls = Family::<CallLabels, Counter>::default();
        reg.register(
            "calls",
            "Total number of calls to secondary webhooks, by outcome",
            calls.clone(),
        );

        let durations = Family::<WebhookLabels, Histogram>::new_with_constructor(durations);
        reg.register_with_unit(
            "call_duration",
            "Histogram of secondary webhook call latency (seconds)",
            Unit::Seconds,
            durations.clone(),
        );

        Self { calls, durations }
    }

    pub(crate) fn record(&self, webhook: &str, result: &Result<(), CallError>, started: time::Instant) {
        let outcome = match result {
            Ok(()) => "allowed",
            Err(CallError::Denied(_)) => "denied",
            Err(CallError::Protocol(_)) => "protocol_error",
            Err(CallError::Transport(_)) => "transport_error",
        };
        self.calls
            .get_or_create(&CallLabels {
                webhook: webhook.to_string(),
                outcome,
            })
            .inc();
        self.durations
            .get_or_create(&WebhookLabels {
                webhook: webhook.to_string(),
            })
            .observe(started.elapsed().as_secs_f64());
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self {
            calls: Family::default(),
            durations: Family::new_with_constructor(durations),
        }
    }
}

// Secondary calls are bounded by the per-call timeout, which defaults to 8s.
fn durations() -> Histogram {
    Histogram::new([0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn counts_calls_by_outcome() {
        let mut reg = Registry::default();
        let metrics = DispatchMetrics::register(reg.sub_registry_with_prefix("dispatch"));
        let now = time::Instant::now();
        metrics.record("redis", &Ok(()), now);
        metrics.record("redis", &Err(CallError::Denied("no".to_string())), now);
        metrics.record("redis", &Err(CallError::Denied("no".to_string())), now);

        let mut text = String::new();
        encode(&mut text, &reg).unwrap();
        assert!(
            text.contains(r#"dispatch_calls_total{webhook="redis",outcome="allowed"} 1"#),
            "{text}"
        );
        assert!(
            text.contains(r#"dispatch_calls_total{webhook="redis",outcome="denied"} 2"#),
            "{text}"
        );
        assert!(
            text.contains(r#"dispatch_call_duration_seconds_count{webhook="redis"} 3"#),
            "{text}"
        );
    }
}
