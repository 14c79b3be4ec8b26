use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::search::PassTiming;

/// Prometheus metrics for the search service. Owned, not global, so tests
/// can build as many as they like.
pub struct Metrics {
    registry: Registry,
    searches_total: IntCounterVec,
    search_duration_seconds: Histogram,
    search_cache_total: IntCounterVec,
    pass_total: IntCounterVec,
    pass_duration_seconds: HistogramVec,
    whitelist_resolutions_total: IntCounterVec,
    precompute_refresh_total: IntCounterVec,
    precompute_observers: IntGauge,
    precompute_pubkeys: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("brainstorm_search".to_string()), None)?;

        let searches_total = IntCounterVec::new(
            Opts::new("searches_total", "Keyword searches by outcome"),
            &["outcome"],
        )?;
        let search_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("search_duration_seconds", "Keyword search latency in seconds")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0]),
        )?;
        let search_cache_total = IntCounterVec::new(
            Opts::new("search_cache_total", "Search cache lookups"),
            &["result"],
        )?;
        let pass_total = IntCounterVec::new(
            Opts::new("pass_total", "Content search passes by outcome"),
            &["pass", "outcome"],
        )?;
        let pass_duration_seconds = HistogramVec::new(
            HistogramOpts::new("pass_duration_seconds", "Content search pass duration")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0]),
            &["pass"],
        )?;
        let whitelist_resolutions_total = IntCounterVec::new(
            Opts::new(
                "whitelist_resolutions_total",
                "Whitelist resolutions by the step that produced them",
            ),
            &["origin"],
        )?;
        let precompute_refresh_total = IntCounterVec::new(
            Opts::new("precompute_refresh_total", "Precompute refreshes by result"),
            &["result"],
        )?;
        let precompute_observers =
            IntGauge::new("precompute_observers", "Observers with a precomputed whitelist")?;
        let precompute_pubkeys = IntGauge::new(
            "precompute_pubkeys",
            "Pubkeys across all precomputed whitelists",
        )?;

        registry.register(Box::new(searches_total.clone()))?;
        registry.register(Box::new(search_duration_seconds.clone()))?;
        registry.register(Box::new(search_cache_total.clone()))?;
        registry.register(Box::new(pass_total.clone()))?;
        registry.register(Box::new(pass_duration_seconds.clone()))?;
        registry.register(Box::new(whitelist_resolutions_total.clone()))?;
        registry.register(Box::new(precompute_refresh_total.clone()))?;
        registry.register(Box::new(precompute_observers.clone()))?;
        registry.register(Box::new(precompute_pubkeys.clone()))?;

        Ok(Self {
            registry,
            searches_total,
            search_duration_seconds,
            search_cache_total,
            pass_total,
            pass_duration_seconds,
            whitelist_resolutions_total,
            precompute_refresh_total,
            precompute_observers,
            precompute_pubkeys,
        })
    }

    pub fn record_search(&self, outcome: &str, elapsed_secs: f64) {
        self.searches_total.with_label_values(&[outcome]).inc();
        self.search_duration_seconds.observe(elapsed_secs);
    }

    pub fn record_cache(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.search_cache_total.with_label_values(&[result]).inc();
    }

    pub fn record_pass(&self, timing: &PassTiming) {
        let pass = timing.pass.as_str();
        self.pass_total
            .with_label_values(&[pass, timing.outcome.as_str()])
            .inc();
        self.pass_duration_seconds
            .with_label_values(&[pass])
            .observe(timing.elapsed_ms as f64 / 1000.0);
    }

    pub fn record_whitelist(&self, origin: &str) {
        self.whitelist_resolutions_total
            .with_label_values(&[origin])
            .inc();
    }

    pub fn record_refresh(&self, succeeded: usize, failed: usize) {
        self.precompute_refresh_total
            .with_label_values(&["success"])
            .inc_by(succeeded as u64);
        self.precompute_refresh_total
            .with_label_values(&["error"])
            .inc_by(failed as u64);
    }

    pub fn set_precompute_size(&self, observers: usize, pubkeys: usize) {
        self.precompute_observers.set(observers as i64);
        self.precompute_pubkeys.set(pubkeys as i64);
    }

    /// Text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}
