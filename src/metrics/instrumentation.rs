use std::time::Duration;

use super::{
    DISPATCH_ATTEMPTS, DISPATCH_LATENCY, DISPATCH_REQUESTS_TOTAL, NOTIFICATIONS_FAILED_TOTAL,
    NOTIFICATIONS_SENT_TOTAL, RENDER_LATENCY, SHORT_CIRCUIT_TOTAL, TEMPLATES_MISSING_TOTAL,
};
use crate::error::DispatchError;
use crate::notification::{DispatchInstrumentation, SendReceipt, SendRequest, ShortCircuit};

/// Records dispatcher timings and outcomes into the process-wide registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusInstrumentation;

impl DispatchInstrumentation for PrometheusInstrumentation {
    fn on_short_circuit(&self, request: &SendRequest, reason: ShortCircuit) {
        DISPATCH_REQUESTS_TOTAL
            .with_label_values(&[request.channel_type()])
            .inc();
        SHORT_CIRCUIT_TOTAL.with_label_values(&[reason.as_str()]).inc();
    }

    fn on_render(&self, _request: &SendRequest, elapsed: Duration, ok: bool) {
        RENDER_LATENCY.observe(elapsed.as_secs_f64());
        if !ok {
            TEMPLATES_MISSING_TOTAL.inc();
        }
    }

    fn on_dispatch(
        &self,
        request: &SendRequest,
        elapsed: Duration,
        outcome: Result<&SendReceipt, &DispatchError>,
    ) {
        let channel = request.channel_type();
        DISPATCH_REQUESTS_TOTAL.with_label_values(&[channel]).inc();
        DISPATCH_LATENCY
            .with_label_values(&[channel])
            .observe(elapsed.as_secs_f64());

        match outcome {
            Ok(receipt) => {
                NOTIFICATIONS_SENT_TOTAL.with_label_values(&[channel]).inc();
                DISPATCH_ATTEMPTS.observe(f64::from(receipt.attempts));
            }
            Err(error) => {
                NOTIFICATIONS_FAILED_TOTAL
                    .with_label_values(&[channel, error.root().code()])
                    .inc();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_is_labelled_by_root_code() {
        let request = SendRequest::builder("m-1", "metrics-test", "ops").content("x").build();
        let error = DispatchError::DeliveryFailed {
            request_id: "m-1".into(),
            attempts: 3,
            source: Box::new(DispatchError::TransientProvider("busy".into())),
        };

        PrometheusInstrumentation.on_dispatch(&request, Duration::from_millis(5), Err(&error));

        let failed = NOTIFICATIONS_FAILED_TOTAL
            .with_label_values(&["metrics-test", error.root().code()])
            .get();
        assert_eq!(failed, 1);
    }
}
