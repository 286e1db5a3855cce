//! Utterance to intent pipeline

use crate::error::{ParseError, Result};
use crate::fallback::IntentFallback;
use crate::intent::{params, IntentName, IntentSource, ParsedIntent};
use crate::numbers::{
    clock_words_to_digits, is_wake_time_utterance, normalize_fractions, substitute_number_words,
};
use crate::registry::PatternRegistry;
use crate::rules::{default_rules, Rule};
use crate::IntentConfig;
use regex::Regex;
use serde_json::json;

/// Main intent parser
///
/// Stages, in order: custom-metric patterns, numeral normalization, grammar
/// rules (first match wins), then the optional generative fallback.
pub struct IntentParser {
    config: IntentConfig,
    rules: Vec<Rule>,
    registry: Option<PatternRegistry>,
    fallback: Option<Box<dyn IntentFallback>>,
    dotted_meridiem: Regex,
    spaced_meridiem: Regex,
}

impl IntentParser {
    /// Create a new intent parser
    pub fn new(config: IntentConfig) -> Result<Self> {
        let rules = default_rules()?;
        let dotted_meridiem = compile("dotted_meridiem", r"\b([ap])\.\s?m\b\.?")?;
        let spaced_meridiem = compile("spaced_meridiem", r"(\d)\s*([ap])\s+m\b")?;

        let mut parser = Self {
            config,
            rules,
            registry: None,
            fallback: None,
            dotted_meridiem,
            spaced_meridiem,
        };
        if parser.config.generative.enabled {
            parser.fallback = default_fallback(&parser.config)?;
        }
        tracing::debug!(rules = parser.rules.len(), "Intent parser ready");
        Ok(parser)
    }

    /// Attach a custom-metric registry. Patterns are fetched on first parse.
    pub fn with_registry(mut self, registry: PatternRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the generative fallback.
    pub fn with_fallback(mut self, fallback: Box<dyn IntentFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn config(&self) -> &IntentConfig {
        &self.config
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn registry(&self) -> Option<&PatternRegistry> {
        self.registry.as_ref()
    }

    /// Load custom-metric patterns if they are not loaded yet.
    pub fn load_patterns(&mut self) -> Result<()> {
        match self.registry.as_mut() {
            Some(registry) => registry.load(),
            None => Ok(()),
        }
    }

    /// Force a fresh fetch of custom-metric patterns.
    pub fn reload_patterns(&mut self) -> Result<()> {
        match self.registry.as_mut() {
            Some(registry) => registry.reload(),
            None => Ok(()),
        }
    }

    /// Lowercase and strip punctuation the grammar does not care about.
    ///
    /// Spelled meridiems ("a.m.", "7 p m") become "am"/"pm". Periods and
    /// commas survive only between digits.
    pub fn prepare(&self, text: &str) -> String {
        let lower = text.to_lowercase();
        let lower = self.dotted_meridiem.replace_all(&lower, "${1}m");
        let lower = self.spaced_meridiem.replace_all(&lower, "$1 ${2}m");

        let chars: Vec<char> = lower.chars().collect();
        let mut out = String::with_capacity(chars.len());
        for (i, &ch) in chars.iter().enumerate() {
            match ch {
                '.' | ',' => {
                    let between_digits = i > 0
                        && chars[i - 1].is_ascii_digit()
                        && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit());
                    if ch == '.' && between_digits {
                        out.push('.');
                    } else if ch == ',' && !between_digits {
                        out.push(',');
                    } else if ch == '.' {
                        out.push(' ');
                    }
                }
                '?' | '!' | ';' | '"' => out.push(' '),
                c => out.push(c),
            }
        }
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Numeral normalization applied before grammar matching.
    pub fn normalize(&self, prepared: &str) -> String {
        if is_wake_time_utterance(prepared) {
            clock_words_to_digits(prepared)
        } else {
            substitute_number_words(&normalize_fractions(prepared))
        }
    }

    /// Parse an utterance into an intent.
    pub fn parse(&mut self, text: &str) -> Result<ParsedIntent> {
        if text.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        let prepared = self.prepare(text);

        if let Some(registry) = self.registry.as_mut() {
            if !registry.is_loaded() {
                if let Err(e) = registry.load() {
                    tracing::debug!(error = %e, "Continuing without custom metric patterns");
                }
            }
            let numeric = substitute_number_words(&normalize_fractions(&prepared));
            if let Some((pattern, value)) = registry.find(&numeric) {
                tracing::debug!(metric = %pattern.metric_name, value, "Custom metric matched");
                let mut intent = ParsedIntent::new(
                    IntentName::LogCustomMetric,
                    params([
                        ("metric_id", json!(pattern.metric_id)),
                        ("metric_name", json!(pattern.metric_name)),
                        ("value", json!(value)),
                    ]),
                    text,
                );
                intent.source = IntentSource::CustomMetric;
                return Ok(intent);
            }
        }

        let normalized = self.normalize(&prepared);
        tracing::trace!(%normalized, "Normalized utterance");

        for rule in &self.rules {
            if let Some(p) = rule.apply(&normalized) {
                tracing::debug!(rule = rule.name, intent = %rule.intent, "Grammar rule matched");
                return Ok(ParsedIntent::new(rule.intent, p, text));
            }
        }

        if let Some(fallback) = &self.fallback {
            match fallback.interpret(&normalized) {
                Ok(Some(mut intent)) => {
                    intent.raw_text = text.to_string();
                    return Ok(intent);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Generative fallback failed"),
            }
        }

        tracing::debug!(%text, "Could not parse utterance");
        Err(ParseError::NoMatch(text.to_string()))
    }
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| ParseError::InvalidPattern {
        name: name.to_string(),
        source,
    })
}

#[cfg(feature = "ollama")]
fn default_fallback(config: &IntentConfig) -> Result<Option<Box<dyn IntentFallback>>> {
    let fallback = crate::fallback::OllamaFallback::new(config.generative.clone())?;
    Ok(Some(Box::new(fallback)))
}

#[cfg(not(feature = "ollama"))]
fn default_fallback(_config: &IntentConfig) -> Result<Option<Box<dyn IntentFallback>>> {
    tracing::warn!("Generative fallback enabled but built without the `ollama` feature");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::interpret_reply;
    use crate::registry::{MetricDefinition, StaticMetricSource};

    fn parser() -> IntentParser {
        IntentParser::new(IntentConfig::default()).unwrap()
    }

    fn parse(text: &str) -> ParsedIntent {
        parser().parse(text).unwrap()
    }

    #[test]
    fn test_end_to_end_calories() {
        let p = parse("Had 500 calories.");
        assert_eq!(p.intent, IntentName::AddCalories);
        assert_eq!(p.params["calories"], json!(500));
        assert_eq!(p.confidence, 1.0);
        assert_eq!(p.raw_text, "Had 500 calories.");
    }

    #[test]
    fn test_spoken_numbers() {
        let p = parse("had five hundred calories");
        assert_eq!(p.params["calories"], json!(500));

        let p = parse("my weight is seventy two point five kilos");
        assert_eq!(p.intent, IntentName::LogWeight);
        assert_eq!(p.params["weight_kg"], json!(72.5));

        let p = parse("add eggs one hundred forty calories");
        assert_eq!(p.params["food"], json!("eggs"));
        assert_eq!(p.params["calories"], json!(140));
    }

    #[test]
    fn test_fractions() {
        let p = parse("I slept seven and a half hours");
        assert_eq!(p.intent, IntentName::LogSleep);
        assert_eq!(p.params["hours"], json!(7.5));

        let p = parse("slept six and three quarters");
        assert_eq!(p.params["hours"], json!(6.75));

        let p = parse("worked out for an hour and a half");
        assert_eq!(p.intent, IntentName::LogWorkout);
        assert_eq!(p.params["duration_minutes"], json!(90));
    }

    #[test]
    fn test_wake_time_words() {
        let p = parse("I woke up at seven thirty am");
        assert_eq!(p.intent, IntentName::LogWake);
        assert_eq!(p.params["hour"], json!(7));
        assert_eq!(p.params["minute"], json!(30));

        let p = parse("woke up at twelve a.m.");
        assert_eq!((p.params["hour"].clone(), p.params["minute"].clone()), (json!(0), json!(0)));

        let p = parse("woke up at twelve pm");
        assert_eq!(p.params["hour"], json!(12));

        let p = parse("woke up at six oh five");
        assert_eq!(p.params["hour"], json!(6));
        assert_eq!(p.params["minute"], json!(5));

        let p = parse("woke up at 6:45 p.m.");
        assert_eq!(p.params["hour"], json!(18));
    }

    #[test]
    fn test_vegetables_priority() {
        let p = parse("Vegetables, three servings");
        assert_eq!(p.intent, IntentName::LogVegetables);
        assert_eq!(p.params["servings"], json!(3));
    }

    #[test]
    fn test_units_before_dispatch() {
        let p = parse("my weight is 180 pounds");
        let kg = p.params["weight_kg"].as_f64().unwrap();
        assert!((kg - 180.0 * 0.453592).abs() < 1e-9);

        let p = parse("add two cups of rice");
        assert_eq!(p.intent, IntentName::AddFood);
        assert_eq!(p.params["unit"], json!("ml"));
    }

    #[test]
    fn test_empty_and_unknown() {
        let mut parser = parser();
        assert!(matches!(parser.parse("   "), Err(ParseError::Empty)));
        assert!(matches!(
            parser.parse("what's the weather like"),
            Err(ParseError::NoMatch(_))
        ));
    }

    #[test]
    fn test_custom_metric_short_circuits() {
        let source = StaticMetricSource {
            metrics: vec![MetricDefinition {
                id: 4,
                name: "Medication".into(),
                keyword: Some("medication".into()),
                unit: Some("pills".into()),
            }],
        };
        let mut parser = parser().with_registry(PatternRegistry::new(Box::new(source)));
        let p = parser.parse("Medication, two pills").unwrap();
        assert_eq!(p.intent, IntentName::LogCustomMetric);
        assert_eq!(p.source, IntentSource::CustomMetric);
        assert_eq!(p.params["metric_id"], json!(4));
        assert_eq!(p.params["value"], json!(2.0));
        assert!(parser.registry().unwrap().is_loaded());

        let p = parser.parse("had 500 calories").unwrap();
        assert_eq!(p.intent, IntentName::AddCalories);
    }

    struct CannedFallback(&'static str);

    impl IntentFallback for CannedFallback {
        fn interpret(&self, text: &str) -> Result<Option<ParsedIntent>> {
            Ok(interpret_reply(self.0, text))
        }
    }

    #[test]
    fn test_fallback_only_after_rules() {
        let mut parser = parser().with_fallback(Box::new(CannedFallback(
            r#"{"intent": "log_vegetables", "params": {"servings": 2}}"#,
        )));
        let p = parser.parse("a couple of salads").unwrap();
        assert_eq!(p.intent, IntentName::LogVegetables);
        assert_eq!(p.source, IntentSource::Generative);
        assert_eq!(p.raw_text, "a couple of salads");
        assert!(p.confidence < 1.0);

        let p = parser.parse("had 500 calories").unwrap();
        assert_eq!(p.source, IntentSource::Grammar);
    }

    #[test]
    fn test_oversized_spoken_number_does_not_panic() {
        let mut parser = parser();
        let text = format!("add {} calories", vec!["hundred"; 10].join(" "));
        if let Ok(p) = parser.parse(&text) {
            assert!(p.params.values().all(|v| !v.is_null()));
        }
        let p = parser.parse("had five hundred calories").unwrap();
        assert_eq!(p.params["calories"], json!(500));
    }

    #[test]
    fn test_awake_is_not_a_wake_time() {
        let parser = parser();
        assert_eq!(
            parser.normalize("i was awake for two and a half hours"),
            "i was awake for 2.5 hours"
        );
        assert_eq!(parser.normalize("woke up at seven thirty"), "woke up at 7:30");
    }

    #[test]
    fn test_prepare_strips_punctuation() {
        let parser = parser();
        assert_eq!(parser.prepare("Woke up at 7 A.M.!"), "woke up at 7 am");
        assert_eq!(parser.prepare("I weigh 72.5 kg."), "i weigh 72.5 kg");
        assert_eq!(parser.prepare("add 2,000 calories?"), "add 2000 calories");
        assert_eq!(parser.prepare("woke at 6 p m"), "woke at 6 pm");
    }
}
