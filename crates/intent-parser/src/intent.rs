//! Intent definitions shared by the parser and the command dispatcher

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Parameters extracted for an intent, keyed by name.
pub type Params = Map<String, Value>;

/// Closed set of command types the dispatcher knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentName {
    /// Log a calorie amount, optionally with a meal name
    AddCalories,
    /// Log a food by quantity; calories are looked up remotely
    AddFood,
    /// Log body weight in kilograms
    LogWeight,
    /// Log sleep duration in decimal hours
    LogSleep,
    /// Log wake-up time
    LogWake,
    /// Log vegetable servings
    LogVegetables,
    /// Log a workout duration
    LogWorkout,
    /// Log a value against a user-defined metric
    LogCustomMetric,
}

impl IntentName {
    pub const ALL: [IntentName; 8] = [
        IntentName::AddCalories,
        IntentName::AddFood,
        IntentName::LogWeight,
        IntentName::LogSleep,
        IntentName::LogWake,
        IntentName::LogVegetables,
        IntentName::LogWorkout,
        IntentName::LogCustomMetric,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IntentName::AddCalories => "add_calories",
            IntentName::AddFood => "add_food",
            IntentName::LogWeight => "log_weight",
            IntentName::LogSleep => "log_sleep",
            IntentName::LogWake => "log_wake",
            IntentName::LogVegetables => "log_vegetables",
            IntentName::LogWorkout => "log_workout",
            IntentName::LogCustomMetric => "log_custom_metric",
        }
    }
}

impl fmt::Display for IntentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownIntent(pub String);

impl fmt::Display for UnknownIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown intent: {}", self.0)
    }
}

impl std::error::Error for UnknownIntent {}

impl FromStr for IntentName {
    type Err = UnknownIntent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntentName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s.trim())
            .ok_or_else(|| UnknownIntent(s.to_string()))
    }
}

/// Where a parsed intent came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    CustomMetric,
    Grammar,
    Generative,
}

/// Structured command inferred from free-form speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    /// Command type
    pub intent: IntentName,
    /// Typed parameters in canonical units
    pub params: Params,
    /// Text as it was transcribed, before normalization
    pub raw_text: String,
    /// 1.0 for deterministic matches, lower for generative results
    pub confidence: f32,
    /// Pipeline stage that produced the intent
    pub source: IntentSource,
}

impl ParsedIntent {
    pub fn new(intent: IntentName, params: Params, raw_text: &str) -> Self {
        Self {
            intent,
            params,
            raw_text: raw_text.to_string(),
            confidence: 1.0,
            source: IntentSource::Grammar,
        }
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key).filter(|v| !v.is_null())
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.param(key).and_then(Value::as_f64)
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.param(key).and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        })
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Build a `Params` map from key/value pairs.
pub fn params<I, K>(pairs: I) -> Params
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_names_round_trip_through_str() {
        for name in IntentName::ALL {
            assert_eq!(name.as_str().parse::<IntentName>(), Ok(name));
        }
        assert!("delete_everything".parse::<IntentName>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case_names() {
        let v = serde_json::to_value(IntentName::LogCustomMetric).unwrap();
        assert_eq!(v, json!("log_custom_metric"));
    }

    #[test]
    fn test_param_accessors() {
        let intent = ParsedIntent::new(
            IntentName::AddCalories,
            params([
                ("calories", json!(500)),
                ("food", json!("  ")),
                ("ratio", json!(2.0)),
                ("missing", Value::Null),
            ]),
            "had 500 calories",
        );
        assert_eq!(intent.param_i64("calories"), Some(500));
        assert_eq!(intent.param_i64("ratio"), Some(2));
        assert_eq!(intent.param_str("food"), None);
        assert!(intent.param("missing").is_none());
    }
}
