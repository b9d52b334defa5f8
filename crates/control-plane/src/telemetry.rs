use once_cell::sync::Lazy;
use prometheus::{opts, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static RECONCILE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("canopy_reconcile_total", "Reconciler operations by op and outcome"), &["op", "outcome"])
        .expect("valid metric");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static ROLLBACK_STEPS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("canopy_rollback_steps_total", "Compensating actions executed by outcome"), &["outcome"])
        .expect("valid metric");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static DEPLOY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(HistogramOpts::new("canopy_deploy_seconds", "Deploy worker wall time"), &["path", "outcome"])
        .expect("valid metric");
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub static SYNC_WAIT_TIMEOUTS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("canopy_sync_wait_timeouts_total", "Sync waits that hit the deadline").expect("valid metric");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn outcome<T, E>(r: &Result<T, E>) -> &'static str { if r.is_ok() { "success" } else { "error" } }

/// Force registration so an exposition lists every metric before first use.
pub fn register_all() {
    Lazy::force(&RECONCILE_TOTAL);
    Lazy::force(&ROLLBACK_STEPS);
    Lazy::force(&DEPLOY_DURATION);
    Lazy::force(&SYNC_WAIT_TIMEOUTS);
}

/// Render every registered metric in the text exposition format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buf).is_err() { return String::new(); }
    String::from_utf8(buf).unwrap_or_default()
}
