//! Generative-model fallback for utterances no grammar rule understood.
//!
//! Small local models are unreliable, so replies are validated strictly: the
//! intent must be one of the known names and its params must satisfy that
//! intent's schema. Anything else counts as no match.

use crate::error::{ParseError, Result};
use crate::intent::{IntentName, IntentSource, Params, ParsedIntent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Confidence attached to generative results
pub const GENERATIVE_CONFIDENCE: f32 = 0.7;

/// Generative fallback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerativeConfig {
    pub enabled: bool,
    /// Ollama-compatible `/api/generate` endpoint
    pub url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:11434/api/generate".to_string(),
            model: "qwen:0.5b".to_string(),
            timeout_secs: 30,
        }
    }
}

/// A parser of last resort
pub trait IntentFallback {
    /// Returns `Ok(None)` when the model produced nothing usable.
    fn interpret(&self, text: &str) -> Result<Option<ParsedIntent>>;
}

/// Intents the model may produce. Custom metrics need registry ids the model
/// cannot know, so they are excluded.
const GENERATIVE_INTENTS: [IntentName; 7] = [
    IntentName::AddCalories,
    IntentName::AddFood,
    IntentName::LogWeight,
    IntentName::LogSleep,
    IntentName::LogWake,
    IntentName::LogVegetables,
    IntentName::LogWorkout,
];

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Integer,
    Number,
    Text,
}

/// (key, type, required) per intent
fn schema(intent: IntentName) -> &'static [(&'static str, Field, bool)] {
    match intent {
        IntentName::AddCalories => &[("calories", Field::Integer, true), ("food", Field::Text, false)],
        IntentName::AddFood => &[
            ("food", Field::Text, true),
            ("quantity", Field::Number, false),
            ("unit", Field::Text, false),
        ],
        IntentName::LogWeight => &[("weight_kg", Field::Number, true)],
        IntentName::LogSleep => &[("hours", Field::Number, true)],
        IntentName::LogWake => &[("hour", Field::Integer, true), ("minute", Field::Integer, false)],
        IntentName::LogVegetables => &[("servings", Field::Integer, true)],
        IntentName::LogWorkout => &[
            ("duration_minutes", Field::Integer, true),
            ("workout_type", Field::Text, false),
        ],
        IntentName::LogCustomMetric => &[],
    }
}

fn coerce(value: &Value, field: Field) -> Option<Value> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match field {
        Field::Integer => number
            .filter(|n| n.is_finite() && *n >= 0.0 && n.fract() == 0.0)
            .map(|n| Value::from(n as i64)),
        Field::Number => number.filter(|n| n.is_finite() && *n >= 0.0).map(Value::from),
        Field::Text => value
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Value::from),
    }
}

fn validate_params(intent: IntentName, raw: &serde_json::Map<String, Value>) -> Option<Params> {
    let mut out = Params::new();
    for &(key, field, required) in schema(intent) {
        match raw.get(key).filter(|v| !v.is_null()).map(|v| coerce(v, field)) {
            Some(Some(v)) => {
                out.insert(key.to_string(), v);
            }
            Some(None) => return None,
            None if required => return None,
            None => {}
        }
    }
    if intent == IntentName::LogWake {
        let hour = out.get("hour").and_then(Value::as_i64).unwrap_or(0);
        let minute = out.get("minute").and_then(Value::as_i64).unwrap_or(0);
        if hour > 23 || minute > 59 {
            return None;
        }
        out.entry("minute").or_insert(Value::from(0));
    }
    Some(out)
}

/// Validate a raw model reply and turn it into an intent.
///
/// The first `{` to the last `}` is taken as the JSON object; the intent
/// must be in the closed set and the params must fit the intent's schema.
pub fn interpret_reply(reply: &str, raw_text: &str) -> Option<ParsedIntent> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&reply[start..=end]).ok()?;
    let intent: IntentName = value.get("intent")?.as_str()?.parse().ok()?;
    if !GENERATIVE_INTENTS.contains(&intent) {
        tracing::debug!(%intent, "Generative reply named a disallowed intent");
        return None;
    }
    let empty = serde_json::Map::new();
    let raw_params = match value.get("params") {
        Some(Value::Object(map)) => map,
        None | Some(Value::Null) => &empty,
        Some(_) => return None,
    };
    let params = validate_params(intent, raw_params)?;
    Some(ParsedIntent {
        intent,
        params,
        raw_text: raw_text.to_string(),
        confidence: GENERATIVE_CONFIDENCE,
        source: IntentSource::Generative,
    })
}

/// Constrained prompt listing the valid intent names.
pub fn build_prompt(text: &str) -> String {
    let names: Vec<&str> = GENERATIVE_INTENTS.iter().map(|i| i.as_str()).collect();
    format!(
        r#"Parse this health tracking command into a JSON object.
Possible intents: {names}

Command: "{text}"

Return ONLY a JSON object with "intent" and "params" fields. Examples:
- "add 200 calories" -> {{"intent": "add_calories", "params": {{"calories": 200}}}}
- "I weigh 180 pounds" -> {{"intent": "log_weight", "params": {{"weight_kg": 81.6}}}}
- "slept 8 hours" -> {{"intent": "log_sleep", "params": {{"hours": 8}}}}
- "add 2 servings vegetables" -> {{"intent": "log_vegetables", "params": {{"servings": 2}}}}

If you cannot parse the command, return {{"intent": "unknown", "params": {{}}}}

JSON:"#,
        names = names.join(", "),
        text = text.replace('"', "'"),
    )
}

/// Fallback backed by an Ollama `/api/generate` endpoint.
#[cfg(feature = "ollama")]
pub struct OllamaFallback {
    config: GenerativeConfig,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "ollama")]
impl OllamaFallback {
    pub fn new(config: GenerativeConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ParseError::Fallback(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[cfg(feature = "ollama")]
#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[cfg(feature = "ollama")]
impl IntentFallback for OllamaFallback {
    fn interpret(&self, text: &str) -> Result<Option<ParsedIntent>> {
        tracing::debug!(model = %self.config.model, "Using generative fallback");
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": build_prompt(text),
            "stream": false,
        });
        let resp = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .map_err(|e| ParseError::Fallback(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ParseError::Fallback(format!("HTTP {}", resp.status())));
        }
        let reply: GenerateResponse = resp
            .json()
            .map_err(|e| ParseError::Fallback(e.to_string()))?;
        let parsed = interpret_reply(&reply.response, text);
        match &parsed {
            Some(p) => tracing::debug!(intent = %p.intent, "Generative fallback parsed"),
            None => tracing::debug!(reply = %reply.response, "Generative reply rejected"),
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_valid_reply_with_surrounding_chatter() {
        let reply = r#"Sure! {"intent": "log_sleep", "params": {"hours": "7.5"}} hope that helps"#;
        let p = interpret_reply(reply, "had a good night, about seven and a half").unwrap();
        assert_eq!(p.intent, IntentName::LogSleep);
        assert_eq!(p.params["hours"], json!(7.5));
        assert_eq!(p.confidence, GENERATIVE_CONFIDENCE);
        assert_eq!(p.source, IntentSource::Generative);
    }

    #[test]
    fn test_rejects_unknown_and_disallowed_intents() {
        assert!(interpret_reply(r#"{"intent": "unknown", "params": {}}"#, "x").is_none());
        assert!(interpret_reply(r#"{"intent": "delete_all", "params": {}}"#, "x").is_none());
        assert!(interpret_reply(
            r#"{"intent": "log_custom_metric", "params": {"metric_id": 1, "value": 2}}"#,
            "x"
        )
        .is_none());
        assert!(interpret_reply("no json here", "x").is_none());
        assert!(interpret_reply("} backwards {", "x").is_none());
    }

    #[test]
    fn test_params_are_validated_per_intent() {
        // missing required field
        assert!(interpret_reply(r#"{"intent": "add_calories", "params": {"food": "eggs"}}"#, "x").is_none());
        // non-numeric value
        assert!(interpret_reply(r#"{"intent": "log_weight", "params": {"weight_kg": "heavy"}}"#, "x").is_none());
        // impossible time
        assert!(interpret_reply(r#"{"intent": "log_wake", "params": {"hour": 27}}"#, "x").is_none());
        // fractional value for a whole-number field
        assert!(interpret_reply(r#"{"intent": "log_vegetables", "params": {"servings": 2.5}}"#, "x").is_none());
        let p = interpret_reply(r#"{"intent": "log_vegetables", "params": {"servings": "3.0"}}"#, "x").unwrap();
        assert_eq!(p.params["servings"], json!(3));

        let p = interpret_reply(
            r#"{"intent": "log_workout", "params": {"duration_minutes": 30, "rm": "-rf"}}"#,
            "x",
        )
        .unwrap();
        assert_eq!(p.params.len(), 1);
        assert_eq!(p.params["duration_minutes"], json!(30));

        let p = interpret_reply(r#"{"intent": "log_wake", "params": {"hour": 7}}"#, "x").unwrap();
        assert_eq!(p.params["minute"], json!(0));
    }

    #[test]
    fn test_prompt_lists_intents_without_custom_metrics() {
        let prompt = build_prompt("had a \"big\" lunch");
        assert!(prompt.contains("add_calories"));
        assert!(prompt.contains("log_workout"));
        assert!(!prompt.contains("log_custom_metric"));
        assert!(prompt.contains("had a 'big' lunch"));
    }
}
