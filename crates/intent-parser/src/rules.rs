//! Ordered grammar rules over normalized text.
//!
//! Rules are evaluated top to bottom and the first one whose pattern matches
//! and whose extractor accepts the captures wins. More specific rules must
//! therefore come before the general ones that would also match their input;
//! `canonical_examples_resolve_to_their_own_rule` checks this for every
//! example listed on a rule.

use crate::error::{ParseError, Result};
use crate::intent::{params, IntentName, Params};
use crate::numbers::{ClockTime, Meridiem};
use crate::units::{food_quantity, round2, weight_to_kg};
use regex::{Captures, Regex};
use serde_json::json;

/// One deterministic grammar rule
pub struct Rule {
    pub name: &'static str,
    pub intent: IntentName,
    pub regex: Regex,
    pub extract: fn(&Captures<'_>) -> Option<Params>,
    /// Canonical utterances (already normalized) this rule must own
    pub examples: &'static [&'static str],
}

impl Rule {
    fn new(
        name: &'static str,
        intent: IntentName,
        pattern: &str,
        extract: fn(&Captures<'_>) -> Option<Params>,
        examples: &'static [&'static str],
    ) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| ParseError::InvalidPattern {
            name: name.to_string(),
            source,
        })?;
        Ok(Self {
            name,
            intent,
            regex,
            extract,
            examples,
        })
    }

    /// Apply the rule, returning extracted params when it both matches and
    /// yields valid values.
    pub fn apply(&self, text: &str) -> Option<Params> {
        self.regex.captures(text).and_then(|c| (self.extract)(&c))
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("intent", &self.intent)
            .field("pattern", &self.regex.as_str())
            .finish()
    }
}

const VERB: &str = r"\b(?:add|log|logged|ate|had)";
const CALORIE_WORD: &str = r"(?:calories?|cals?|kcal)\b";
const WEIGHT_UNIT: &str = r"(kg|kilos?|kilograms?|lbs?|pounds?)";
const FOOD_UNIT: &str = r"(g|grams?|oz|ounces?|lbs?|pounds?|kg|kilos?|cups?|tbsp|tablespoons?|tsp|teaspoons?|ml|milliliters?|l|liters?|litres?|pieces?|slices?|servings?)";
const DURATION_UNIT: &str = r"(minutes?|mins?|hours?|hrs?)";

/// Build the default rule list in priority order.
pub fn default_rules() -> Result<Vec<Rule>> {
    Ok(vec![
        Rule::new(
            "vegetables_count_first",
            IntentName::LogVegetables,
            &format!(r"{VERB}\s+(\d+)\s*(?:servings?\s+)?(?:of\s+)?(?:vegetables?|veggies?)\b"),
            servings,
            &["add 3 servings of vegetables", "had 2 veggies", "log 4 vegetables"],
        )?,
        Rule::new(
            "vegetables_count_after",
            IntentName::LogVegetables,
            r"\b(?:vegetables?|veggies?)\s*,?\s*(\d+)\s*(?:servings?)?",
            servings,
            &["vegetables, 3 servings", "log veggies 2"],
        )?,
        Rule::new(
            "calories_amount",
            IntentName::AddCalories,
            &format!(r"{VERB}\s+(\d+)\s*{CALORIE_WORD}"),
            calories_amount,
            &["had 500 calories", "add 200 cals", "log 350 kcal"],
        )?,
        Rule::new(
            "calories_with_food",
            IntentName::AddCalories,
            &format!(r"{VERB}\s+(.+?)\s+(\d+)\s*{CALORIE_WORD}"),
            calories_with_food,
            &["add eggs 140 calories", "had a banana 105 calories"],
        )?,
        Rule::new(
            "weight_is",
            IntentName::LogWeight,
            &format!(r"\bweight\s+(?:is\s+|was\s+|today\s+|of\s+)*(\d+(?:\.\d+)?)\s*{WEIGHT_UNIT}?\b"),
            weight,
            &["my weight is 180 pounds", "weight today 80.5 kilos"],
        )?,
        Rule::new(
            "weigh",
            IntentName::LogWeight,
            &format!(r"\bweigh\s+(\d+(?:\.\d+)?)\s*{WEIGHT_UNIT}?\b"),
            weight,
            &["i weigh 82 kilos", "weigh 175 lbs"],
        )?,
        Rule::new(
            "slept",
            IntentName::LogSleep,
            r"\bslept\s+(?:for\s+)?(\d+(?:\.\d+)?)\s*(?:hours?)?",
            sleep_hours,
            &["i slept 7.5 hours", "slept for 8 hours"],
        )?,
        Rule::new(
            "hours_of_sleep",
            IntentName::LogSleep,
            r"(\d+(?:\.\d+)?)\s*(?:hours?\s+)?(?:of\s+)?sleep\b",
            sleep_hours,
            &["i got 8 hours of sleep", "6.75 hours sleep"],
        )?,
        Rule::new(
            "woke_at",
            IntentName::LogWake,
            r"\b(?:woke(?:\s+up)?|got\s+up)\s+(?:at\s+)?(\d{1,2})(?::(\d{2}))?(?:\s*(am|pm)\b)?",
            wake_time,
            &["woke up at 7:30 am", "i woke at 6", "got up at 12 am"],
        )?,
        Rule::new(
            "workout_for",
            IntentName::LogWorkout,
            &format!(
                r"\b(?:worked\s+out|exercised|trained|did\s+(?:a\s+)?workout)\s+(?:for\s+)?(\d+(?:\.\d+)?)\s*{DURATION_UNIT}?"
            ),
            workout_for,
            &["worked out for 45 minutes", "exercised for 1.5 hours", "did a workout for 20 minutes"],
        )?,
        Rule::new(
            "minute_workout",
            IntentName::LogWorkout,
            r"(\d+)\s*-?\s*(?:minute|min)\s+(?:workout|exercise|session)\b",
            minute_workout,
            &["30 minute workout", "did a 45 min workout", "logged a 20-minute exercise"],
        )?,
        Rule::new(
            "activity",
            IntentName::LogWorkout,
            &format!(
                r"\b(ran|jogged|walked|swam|cycled|biked|hiked|lifted(?:\s+weights)?|did\s+yoga)\s+(?:for\s+)?(\d+(?:\.\d+)?)\s*{DURATION_UNIT}\b"
            ),
            activity,
            &["ran for 30 minutes", "walked for 1.5 hours", "swam 20 minutes", "did yoga for 40 minutes"],
        )?,
        Rule::new(
            "food_quantity",
            IntentName::AddFood,
            &format!(
                r"{VERB}\s+(\d+(?:\.\d+)?)\s*(?:{FOOD_UNIT}\b)?\s*(?:of\s+)?(.+?)(?:\s+to\s+(?:my\s+)?calories)?$"
            ),
            food,
            &["add 2 cups of rice", "ate 3 oz of cheese", "had 2 slices of pizza", "add 1 apple to calories"],
        )?,
    ])
}

fn number(c: &Captures<'_>, i: usize) -> Option<f64> {
    c.get(i)?.as_str().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn integer(c: &Captures<'_>, i: usize) -> Option<i64> {
    c.get(i)?.as_str().parse::<i64>().ok()
}

fn clean_food(raw: &str) -> Option<String> {
    let mut food = raw.trim().trim_matches(|ch: char| ch == ',' || ch.is_whitespace());
    for article in ["a ", "an ", "the ", "some "] {
        if let Some(rest) = food.strip_prefix(article) {
            food = rest.trim_start();
            break;
        }
    }
    (!food.is_empty()).then(|| food.to_string())
}

fn duration_minutes(value: f64, unit: Option<&str>) -> Option<i64> {
    let minutes = match unit {
        Some(u) if u.starts_with('h') => value * 60.0,
        _ => value,
    };
    let minutes = minutes.round() as i64;
    (minutes > 0).then_some(minutes)
}

fn servings(c: &Captures<'_>) -> Option<Params> {
    let n = integer(c, 1)?;
    Some(params([("servings", json!(n))]))
}

fn calories_amount(c: &Captures<'_>) -> Option<Params> {
    let n = integer(c, 1)?;
    Some(params([("calories", json!(n))]))
}

fn calories_with_food(c: &Captures<'_>) -> Option<Params> {
    let n = integer(c, 2)?;
    let food = clean_food(c.get(1)?.as_str())?;
    Some(params([("calories", json!(n)), ("food", json!(food))]))
}

fn weight(c: &Captures<'_>) -> Option<Params> {
    let value = number(c, 1)?;
    let kg = weight_to_kg(value, c.get(2).map(|m| m.as_str()));
    Some(params([("weight_kg", json!(kg))]))
}

fn sleep_hours(c: &Captures<'_>) -> Option<Params> {
    let hours = number(c, 1)?;
    Some(params([("hours", json!(hours))]))
}

fn wake_time(c: &Captures<'_>) -> Option<Params> {
    let time = ClockTime {
        hour: c.get(1)?.as_str().parse().ok()?,
        minute: match c.get(2) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        },
        meridiem: c.get(3).and_then(|m| Meridiem::parse(m.as_str())),
    };
    let (hour, minute) = time.to_24h()?;
    Some(params([("hour", json!(hour)), ("minute", json!(minute))]))
}

fn workout_for(c: &Captures<'_>) -> Option<Params> {
    let minutes = duration_minutes(number(c, 1)?, c.get(2).map(|m| m.as_str()))?;
    Some(params([("duration_minutes", json!(minutes))]))
}

fn minute_workout(c: &Captures<'_>) -> Option<Params> {
    let minutes = duration_minutes(number(c, 1)?, None)?;
    Some(params([("duration_minutes", json!(minutes))]))
}

fn activity(c: &Captures<'_>) -> Option<Params> {
    let verb = c.get(1)?.as_str();
    let workout_type = match verb.split_whitespace().last()? {
        "ran" | "jogged" => "Running",
        "walked" => "Walking",
        "swam" => "Swimming",
        "cycled" | "biked" => "Cycling",
        "hiked" => "Hiking",
        "yoga" => "Yoga",
        _ => "Strength",
    };
    let minutes = duration_minutes(number(c, 2)?, c.get(3).map(|m| m.as_str()))?;
    Some(params([
        ("duration_minutes", json!(minutes)),
        ("workout_type", json!(workout_type)),
    ]))
}

fn food(c: &Captures<'_>) -> Option<Params> {
    let amount = number(c, 1)?;
    let food = clean_food(c.get(3)?.as_str())?;
    let quantity = food_quantity(amount, c.get(2).map(|m| m.as_str()));
    Some(params([
        ("quantity", json!(round2(quantity.value))),
        ("unit", json!(quantity.unit.as_str())),
        ("food", json!(food)),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_match<'a>(rules: &'a [Rule], text: &str) -> Option<(&'a Rule, Params)> {
        rules
            .iter()
            .find_map(|rule| rule.apply(text).map(|p| (rule, p)))
    }

    #[test]
    fn canonical_examples_resolve_to_their_own_rule() {
        let rules = default_rules().unwrap();
        for (i, rule) in rules.iter().enumerate() {
            assert!(!rule.examples.is_empty(), "{} has no examples", rule.name);
            for example in rule.examples {
                assert!(
                    rule.apply(example).is_some(),
                    "{} does not accept its own example {:?}",
                    rule.name,
                    example
                );
                for earlier in &rules[..i] {
                    assert!(
                        earlier.apply(example).is_none(),
                        "{:?} is shadowed by earlier rule {}",
                        example,
                        earlier.name
                    );
                }
            }
        }
    }

    #[test]
    fn vegetables_win_over_generic_food() {
        let rules = default_rules().unwrap();
        let food_rule = rules.iter().find(|r| r.name == "food_quantity").unwrap();
        assert!(food_rule.apply("add 3 servings of vegetables").is_some());

        let (rule, p) = first_match(&rules, "add 3 servings of vegetables").unwrap();
        assert_eq!(rule.intent, IntentName::LogVegetables);
        assert_eq!(p["servings"], json!(3));

        let (rule, p) = first_match(&rules, "vegetables, 3 servings").unwrap();
        assert_eq!(rule.intent, IntentName::LogVegetables);
        assert_eq!(p["servings"], json!(3));
    }

    #[test]
    fn extracts_calories_and_food() {
        let rules = default_rules().unwrap();
        let (rule, p) = first_match(&rules, "had 500 calories").unwrap();
        assert_eq!(rule.intent, IntentName::AddCalories);
        assert_eq!(p["calories"], json!(500));
        assert!(p.get("food").is_none());

        let (_, p) = first_match(&rules, "had a banana 105 calories").unwrap();
        assert_eq!(p["food"], json!("banana"));
        assert_eq!(p["calories"], json!(105));
    }

    #[test]
    fn converts_units_at_extraction() {
        let rules = default_rules().unwrap();
        let (_, p) = first_match(&rules, "my weight is 180 pounds").unwrap();
        let kg = p["weight_kg"].as_f64().unwrap();
        assert!((kg - 180.0 * 0.453592).abs() < 1e-9);

        let (rule, p) = first_match(&rules, "add 2 cups of rice").unwrap();
        assert_eq!(rule.intent, IntentName::AddFood);
        assert_eq!(p["unit"], json!("ml"));
        assert_eq!(p["quantity"], json!(473.18));
        assert_eq!(p["food"], json!("rice"));

        let (_, p) = first_match(&rules, "add 2 lemons").unwrap();
        assert_eq!(p["unit"], json!("serving"));
        assert_eq!(p["food"], json!("lemons"));
    }

    #[test]
    fn wake_time_edges() {
        let rules = default_rules().unwrap();
        let (_, p) = first_match(&rules, "woke up at 12 am").unwrap();
        assert_eq!((p["hour"].clone(), p["minute"].clone()), (json!(0), json!(0)));
        let (_, p) = first_match(&rules, "woke up at 12 pm").unwrap();
        assert_eq!(p["hour"], json!(12));
        let (_, p) = first_match(&rules, "woke up at 6:45 pm").unwrap();
        assert_eq!((p["hour"].clone(), p["minute"].clone()), (json!(18), json!(45)));
        assert!(first_match(&rules, "woke up at 7:75").is_none());
    }

    #[test]
    fn workouts_convert_to_minutes() {
        let rules = default_rules().unwrap();
        let (_, p) = first_match(&rules, "exercised for 1.5 hours").unwrap();
        assert_eq!(p["duration_minutes"], json!(90));
        let (_, p) = first_match(&rules, "ran for 30 minutes").unwrap();
        assert_eq!(p["workout_type"], json!("Running"));
        let (_, p) = first_match(&rules, "lifted weights for 45 minutes").unwrap();
        assert_eq!(p["workout_type"], json!("Strength"));
    }
}
