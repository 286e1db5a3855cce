use intent_parser::IntentSource;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct SessionMetrics {
    pub registry: Registry,
    pub wake_detections: IntCounter,
    pub utterances: IntCounter,
    /// Labelled by the stage that produced the intent, or `none`
    pub parse_results: IntCounterVec,
    pub dispatch_ok: IntCounter,
    pub dispatch_failed: IntCounter,
}

impl SessionMetrics {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let err = |e: prometheus::Error| format!("metrics init error: {e}");
        let wake_detections = IntCounter::new("va_wake_detections", "Accepted wake phrase detections")
            .map_err(err)?;
        let utterances =
            IntCounter::new("va_utterances", "Utterances recorded with speech").map_err(err)?;
        let parse_results = IntCounterVec::new(
            Opts::new("va_parse_results", "Parse outcomes by pipeline stage"),
            &["source"],
        )
        .map_err(err)?;
        let dispatch_ok =
            IntCounter::new("va_dispatch_ok", "Commands the data API accepted").map_err(err)?;
        let dispatch_failed =
            IntCounter::new("va_dispatch_failed", "Commands that failed").map_err(err)?;
        let _ = registry.register(Box::new(wake_detections.clone()));
        let _ = registry.register(Box::new(utterances.clone()));
        let _ = registry.register(Box::new(parse_results.clone()));
        let _ = registry.register(Box::new(dispatch_ok.clone()));
        let _ = registry.register(Box::new(dispatch_failed.clone()));
        Ok(Self {
            registry,
            wake_detections,
            utterances,
            parse_results,
            dispatch_ok,
            dispatch_failed,
        })
    }

    pub fn parsed(&self, source: Option<IntentSource>) {
        let label = match source {
            Some(IntentSource::Grammar) => "grammar",
            Some(IntentSource::CustomMetric) => "custom_metric",
            Some(IntentSource::Generative) => "generative",
            None => "none",
        };
        self.parse_results.with_label_values(&[label]).inc();
    }

    pub fn parse_count(&self, label: &str) -> u64 {
        self.parse_results.with_label_values(&[label]).get()
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
