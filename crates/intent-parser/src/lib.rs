//! Intent Parser for Voice Commands
//!
//! This crate turns speech transcriptions into structured logging commands:
//! spoken numerals are normalized to digits, an ordered list of grammar rules
//! is matched against the result, user-defined metric triggers are checked
//! first, and an optional generative model handles whatever is left.

pub mod error;
pub mod fallback;
pub mod intent;
pub mod numbers;
mod parser;
pub mod registry;
pub mod rules;
pub mod units;

pub use error::{ParseError, Result};
pub use fallback::{interpret_reply, GenerativeConfig, IntentFallback};
#[cfg(feature = "ollama")]
pub use fallback::OllamaFallback;
pub use intent::{IntentName, IntentSource, Params, ParsedIntent};
pub use parser::IntentParser;
pub use registry::{
    CustomMetricPattern, MetricDefinition, MetricSource, PatternRegistry, StaticMetricSource,
};

use serde::{Deserialize, Serialize};

/// Configuration for intent parsing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentConfig {
    /// Generative fallback, disabled unless asked for
    pub generative: GenerativeConfig,
}

/// Initialize the intent parser system
pub fn init() -> Result<()> {
    tracing::info!("Initializing Intent Parser system");
    Ok(())
}

/// Create a new intent parser with default configuration
pub fn create_parser() -> Result<IntentParser> {
    IntentParser::new(IntentConfig::default())
}

/// Parse a voice command with the default grammar
pub fn parse_command(text: &str) -> Result<ParsedIntent> {
    let mut parser = create_parser()?;
    parser.parse(text)
}

/// One-line description of how a command parses
pub fn describe_command(text: &str) -> Result<String> {
    let result = parse_command(text)?;
    Ok(format!(
        "Parsed: {} {} (confidence: {:.2})",
        result.intent,
        serde_json::Value::Object(result.params),
        result.confidence
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_commands() {
        let test_cases = vec![
            ("add 200 calories", IntentName::AddCalories),
            ("add eggs 140 calories", IntentName::AddCalories),
            ("add 2 cups of rice to calories", IntentName::AddFood),
            ("my weight is 180 pounds", IntentName::LogWeight),
            ("I weigh 82 kilos", IntentName::LogWeight),
            ("slept 7 hours", IntentName::LogSleep),
            ("I got 8 hours of sleep", IntentName::LogSleep),
            ("woke up at 7 am", IntentName::LogWake),
            ("add 3 servings vegetables", IntentName::LogVegetables),
            ("worked out for 45 minutes", IntentName::LogWorkout),
            ("30 minute workout", IntentName::LogWorkout),
        ];

        for (command, expected) in test_cases {
            let result = parse_command(command).unwrap();
            assert_eq!(result.intent, expected, "{command}");
            assert_eq!(result.confidence, 1.0);
        }
    }

    #[test]
    fn test_describe_command() {
        let line = describe_command("had 500 calories").unwrap();
        assert!(line.contains("add_calories"));
        assert!(line.contains("500"));
    }
}
