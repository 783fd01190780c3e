use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, Default)]
pub struct AppMetrics {
    requests_total: AtomicU64,
    answers_total: AtomicU64,
    goodwill_answers_total: AtomicU64,
    warnings_total: AtomicU64,
    paywalls_total: AtomicU64,
    classifier_fallbacks_total: AtomicU64,
    gateway_failures_total: AtomicU64,
    web_searches_total: AtomicU64,
    total_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub answers_total: u64,
    pub goodwill_answers_total: u64,
    pub warnings_total: u64,
    pub paywalls_total: u64,
    pub classifier_fallbacks_total: u64,
    pub gateway_failures_total: u64,
    pub web_searches_total: u64,
    pub avg_latency_millis: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_answer(&self) {
        self.answers_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_goodwill_answer(&self) {
        self.goodwill_answers_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_warning(&self) {
        self.warnings_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_paywall(&self) {
        self.paywalls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_classifier_fallback(&self) {
        self.classifier_fallbacks_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_gateway_failure(&self) {
        self.gateway_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_web_search(&self) {
        self.web_searches_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests_total.load(Ordering::Relaxed);
        let latency = self.total_latency_millis.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total: requests,
            answers_total: self.answers_total.load(Ordering::Relaxed),
            goodwill_answers_total: self.goodwill_answers_total.load(Ordering::Relaxed),
            warnings_total: self.warnings_total.load(Ordering::Relaxed),
            paywalls_total: self.paywalls_total.load(Ordering::Relaxed),
            classifier_fallbacks_total: self.classifier_fallbacks_total.load(Ordering::Relaxed),
            gateway_failures_total: self.gateway_failures_total.load(Ordering::Relaxed),
            web_searches_total: self.web_searches_total.load(Ordering::Relaxed),
            avg_latency_millis: if requests == 0 {
                0.0
            } else {
                latency as f64 / requests as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,techai_api=info,techai_agents=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}
