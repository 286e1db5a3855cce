//! Voice triggers for user-defined metrics.
//!
//! Metric definitions live in the data API. The registry fetches them through
//! a [`MetricSource`], compiles one pattern per metric and keeps the set until
//! an explicit [`PatternRegistry::reload`]. The set is always replaced as a
//! whole, never patched.

use crate::error::{ParseError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A user-defined metric as reported by the data API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub id: i64,
    pub name: String,
    /// Spoken trigger; falls back to the lowercased name
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl MetricDefinition {
    pub fn voice_keyword(&self) -> String {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .unwrap_or(self.name.as_str())
            .trim()
            .to_lowercase()
    }
}

/// Where metric definitions come from
pub trait MetricSource {
    fn fetch_metrics(&self) -> Result<Vec<MetricDefinition>>;
}

/// Compiled trigger for one metric
#[derive(Debug, Clone)]
pub struct CustomMetricPattern {
    pub metric_id: i64,
    pub metric_name: String,
    pub keyword: String,
    pub pattern: Regex,
}

impl CustomMetricPattern {
    /// Compile `keyword` followed by an optional comma and a number.
    pub fn compile(metric: &MetricDefinition) -> Result<Self> {
        let keyword = metric.voice_keyword();
        let words: Vec<String> = keyword.split_whitespace().map(regex::escape).collect();
        let pattern = format!(r"\b{}\s*,?\s*(\d+(?:\.\d+)?)", words.join(r"\s+"));
        let pattern = Regex::new(&pattern).map_err(|source| ParseError::InvalidPattern {
            name: metric.name.clone(),
            source,
        })?;
        Ok(Self {
            metric_id: metric.id,
            metric_name: metric.name.clone(),
            keyword,
            pattern,
        })
    }

    /// Value spoken after the keyword, if the text mentions this metric.
    pub fn match_value(&self, text: &str) -> Option<f64> {
        self.pattern
            .captures(text)?
            .get(1)?
            .as_str()
            .parse()
            .ok()
    }
}

/// Owns the current custom-metric patterns and their load state.
///
/// Single-threaded; wrap in a lock before sharing across threads.
pub struct PatternRegistry {
    source: Box<dyn MetricSource>,
    patterns: Vec<CustomMetricPattern>,
    loaded: bool,
}

impl PatternRegistry {
    pub fn new(source: Box<dyn MetricSource>) -> Self {
        Self {
            source,
            patterns: Vec::new(),
            loaded: false,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Fetch patterns unless they are already loaded.
    pub fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        self.reload()
    }

    /// Always fetch and replace the full pattern set.
    ///
    /// On failure the previous patterns stay in place and the registry is
    /// marked unloaded so the next [`load`](Self::load) retries.
    pub fn reload(&mut self) -> Result<()> {
        let fetched = self.source.fetch_metrics().and_then(|metrics| {
            metrics
                .iter()
                .filter(|m| !m.voice_keyword().is_empty())
                .map(CustomMetricPattern::compile)
                .collect::<Result<Vec<_>>>()
        });
        match fetched {
            Ok(patterns) => {
                tracing::info!(count = patterns.len(), "Loaded custom metric patterns");
                self.patterns = patterns;
                self.loaded = true;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load custom metric patterns");
                self.loaded = false;
                Err(e)
            }
        }
    }

    pub fn patterns(&self) -> &[CustomMetricPattern] {
        &self.patterns
    }

    /// First pattern that matches `text`, with the spoken value.
    pub fn find(&self, text: &str) -> Option<(&CustomMetricPattern, f64)> {
        self.patterns
            .iter()
            .find_map(|p| p.match_value(text).map(|v| (p, v)))
    }
}

impl std::fmt::Debug for PatternRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternRegistry")
            .field("patterns", &self.patterns.len())
            .field("loaded", &self.loaded)
            .finish()
    }
}

/// In-memory metric source, useful for tests and offline runs
#[derive(Debug, Clone, Default)]
pub struct StaticMetricSource {
    pub metrics: Vec<MetricDefinition>,
}

impl MetricSource for StaticMetricSource {
    fn fetch_metrics(&self) -> Result<Vec<MetricDefinition>> {
        Ok(self.metrics.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingSource {
        calls: Rc<Cell<usize>>,
        fail: Rc<Cell<bool>>,
    }

    impl MetricSource for CountingSource {
        fn fetch_metrics(&self) -> Result<Vec<MetricDefinition>> {
            self.calls.set(self.calls.get() + 1);
            if self.fail.get() {
                return Err(ParseError::Source("connection refused".into()));
            }
            Ok(vec![
                MetricDefinition {
                    id: 7,
                    name: "Medication".into(),
                    keyword: Some("meds".into()),
                    unit: Some("pills".into()),
                },
                MetricDefinition {
                    id: 9,
                    name: "Glasses of Water".into(),
                    keyword: None,
                    unit: None,
                },
            ])
        }
    }

    fn counting() -> (PatternRegistry, Rc<Cell<usize>>, Rc<Cell<bool>>) {
        let calls = Rc::new(Cell::new(0));
        let fail = Rc::new(Cell::new(false));
        let registry = PatternRegistry::new(Box::new(CountingSource {
            calls: calls.clone(),
            fail: fail.clone(),
        }));
        (registry, calls, fail)
    }

    #[test]
    fn test_load_is_cached_and_reload_always_fetches() {
        let (mut registry, calls, _) = counting();
        registry.load().unwrap();
        registry.load().unwrap();
        assert_eq!(calls.get(), 1);

        registry.reload().unwrap();
        assert_eq!(calls.get(), 2);
        registry.reload().unwrap();
        assert_eq!(calls.get(), 3);
        registry.load().unwrap();
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_failed_reload_keeps_previous_patterns() {
        let (mut registry, calls, fail) = counting();
        registry.load().unwrap();
        assert_eq!(registry.patterns().len(), 2);

        fail.set(true);
        assert!(registry.reload().is_err());
        assert!(!registry.is_loaded());
        assert_eq!(registry.patterns().len(), 2);

        fail.set(false);
        registry.load().unwrap();
        assert_eq!(calls.get(), 3);
        assert!(registry.is_loaded());
    }

    #[test]
    fn test_keyword_patterns_match_values() {
        let (mut registry, _, _) = counting();
        registry.load().unwrap();

        let (pattern, value) = registry.find("meds, 2 pills").unwrap();
        assert_eq!(pattern.metric_id, 7);
        assert_eq!(value, 2.0);

        let (pattern, value) = registry.find("log glasses of water 3.5").unwrap();
        assert_eq!(pattern.metric_name, "Glasses of Water");
        assert_eq!(value, 3.5);

        assert!(registry.find("remeds 2").is_none());
        assert!(registry.find("had 500 calories").is_none());
    }
}
