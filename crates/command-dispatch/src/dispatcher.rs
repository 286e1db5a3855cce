//! Intent execution against the data API
//!
//! Each intent maps to one handler. A handler checks its required
//! parameters before any request is made, performs lookups it needs, then
//! issues a single write and phrases the outcome as a short spoken sentence.

use crate::api::DataApi;
use crate::error::{ApiError, Result};
use intent_parser::{IntentName, ParsedIntent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use time::{Date, OffsetDateTime};
use tracing::{debug, info, warn};

pub const UNREACHABLE_MESSAGE: &str = "Cannot connect to dashboard server.";
pub const UNSUPPORTED_MESSAGE: &str = "I don't know how to handle that command.";

/// Outcome of one command, worded for speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

type Handler = fn(&Ctx<'_>, &ParsedIntent) -> Result<CommandResult>;

struct Route {
    handler: Handler,
    /// "Failed to {action}: {server message}"
    action: &'static str,
    /// "An error occurred while {activity}."
    activity: &'static str,
}

struct Ctx<'a> {
    api: &'a dyn DataApi,
    date: String,
}

pub struct CommandDispatcher {
    api: Box<dyn DataApi>,
    routes: HashMap<IntentName, Route>,
    date: Option<Date>,
}

impl CommandDispatcher {
    pub fn new(api: Box<dyn DataApi>) -> Self {
        let mut routes = HashMap::new();
        let mut add = |intent, handler: Handler, action, activity| {
            routes.insert(intent, Route { handler, action, activity });
        };
        add(IntentName::AddCalories, add_calories, "add calories", "adding calories");
        add(IntentName::AddFood, add_food, "add the food entry", "adding food");
        add(IntentName::LogWeight, log_weight, "log weight", "logging weight");
        add(IntentName::LogSleep, log_sleep, "log sleep", "logging sleep");
        add(IntentName::LogWake, log_wake, "log wake time", "logging wake time");
        add(IntentName::LogVegetables, log_vegetables, "log vegetables", "logging vegetables");
        add(IntentName::LogWorkout, log_workout, "log workout", "logging workout");
        add(IntentName::LogCustomMetric, log_custom_metric, "log the metric", "logging the metric");
        Self {
            api,
            routes,
            date: None,
        }
    }

    /// Record entries against a fixed date instead of today.
    pub fn with_date(mut self, date: Date) -> Self {
        self.date = Some(date);
        self
    }

    pub fn supports(&self, intent: IntentName) -> bool {
        self.routes.contains_key(&intent)
    }

    /// Stop handling an intent; it is answered as unsupported afterwards.
    pub fn disable(&mut self, intent: IntentName) {
        self.routes.remove(&intent);
    }

    fn today(&self) -> Date {
        self.date.unwrap_or_else(|| {
            OffsetDateTime::now_local()
                .unwrap_or_else(|_| OffsetDateTime::now_utc())
                .date()
        })
    }

    pub fn execute(&self, intent: &ParsedIntent) -> CommandResult {
        let Some(route) = self.routes.get(&intent.intent) else {
            warn!(intent = %intent.intent, "No handler registered");
            return CommandResult::fail(UNSUPPORTED_MESSAGE);
        };
        let ctx = Ctx {
            api: self.api.as_ref(),
            date: self.today().to_string(),
        };
        debug!(intent = %intent.intent, params = ?intent.params, "Executing command");
        let result = match (route.handler)(&ctx, intent) {
            Ok(result) => result,
            Err(e) if e.is_connectivity() => {
                warn!(error = %e, "Data API unreachable");
                CommandResult::fail(UNREACHABLE_MESSAGE)
            }
            Err(ApiError::Http { status, message }) => {
                warn!(status, %message, "Data API rejected command");
                CommandResult::fail(format!("Failed to {}: {message}", route.action))
            }
            Err(e) => {
                warn!(error = %e, "Command failed");
                CommandResult::fail(format!("An error occurred while {}.", route.activity))
            }
        };
        info!(intent = %intent.intent, success = result.success, message = %result.message, "Command executed");
        result
    }
}

/// Numbers as they should be read aloud: no trailing `.0`.
fn spoken(n: f64) -> String {
    let rounded = (n * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

/// Only the first server warning is read out.
fn with_warning(message: String, response: &Value) -> String {
    let first = response
        .get("warnings")
        .and_then(Value::as_array)
        .and_then(|w| w.first())
        .and_then(Value::as_str);
    match first {
        Some(warning) => format!("{message}. Warning: {warning}"),
        None => message,
    }
}

fn positive(intent: &ParsedIntent, key: &str) -> Option<f64> {
    intent.param_f64(key).filter(|v| *v > 0.0)
}

fn add_calories(ctx: &Ctx<'_>, intent: &ParsedIntent) -> Result<CommandResult> {
    let Some(calories) = positive(intent, "calories") else {
        return Ok(CommandResult::fail("I didn't catch the calorie amount."));
    };
    let food = intent.param_str("food").filter(|f| !f.trim().is_empty());
    let response = ctx.api.post(
        "/api/calories",
        &json!({
            "date": ctx.date,
            "meal_name": food.unwrap_or("Voice entry"),
            "calories": calories,
        }),
    )?;
    let mut message = format!("Added {} calories", spoken(calories));
    if let Some(food) = food {
        message.push_str(&format!(" for {food}"));
    }
    Ok(CommandResult::ok(with_warning(message, &response), response))
}

/// First hit of a food search; results come bare or as `{"foods": [...]}`.
fn first_food(results: &Value) -> Option<(i64, String)> {
    let list = results.get("foods").unwrap_or(results).as_array()?;
    let food = list.first()?;
    let id = food.get("id")?.as_i64()?;
    let name = food.get("name").and_then(Value::as_str).unwrap_or_default();
    Some((id, name.to_string()))
}

fn add_food(ctx: &Ctx<'_>, intent: &ParsedIntent) -> Result<CommandResult> {
    let food = intent.param_str("food").map(str::trim).filter(|f| !f.is_empty());
    let (Some(food), Some(quantity)) = (food, positive(intent, "quantity")) else {
        return Ok(CommandResult::fail("I need both a food name and quantity."));
    };
    let unit = intent.param_str("unit").unwrap_or("serving");
    let not_found = || CommandResult::fail(format!("I couldn't find {food} in the database."));

    let results = match ctx.api.get("/api/foods/search", &[("q", food), ("limit", "1")]) {
        Ok(v) => v,
        Err(ApiError::Http { .. }) => return Ok(not_found()),
        Err(e) => return Err(e),
    };
    let Some((food_id, name)) = first_food(&results) else {
        return Ok(not_found());
    };
    let name = if name.is_empty() { food.to_string() } else { name };

    let quantity_str = format!("{}{unit}", spoken(quantity));
    let computed = match ctx.api.post(
        "/api/foods/compute",
        &json!({"food_id": food_id, "quantity": quantity_str}),
    ) {
        Ok(v) => v,
        Err(ApiError::Http { message, .. }) => {
            return Ok(CommandResult::fail(format!("Couldn't compute calories: {message}")))
        }
        Err(e) => return Err(e),
    };
    let calories = computed.get("calories").and_then(Value::as_f64).unwrap_or(0.0);

    let response = ctx.api.post(
        "/api/calories",
        &json!({
            "date": ctx.date,
            "meal_name": name,
            "calories": calories,
            "food_id": food_id,
            "quantity": quantity_str,
        }),
    )?;
    let message = format!(
        "Added {} {unit} of {name}, {} calories.",
        spoken(quantity),
        calories.round() as i64
    );
    Ok(CommandResult::ok(message, response))
}

fn log_weight(ctx: &Ctx<'_>, intent: &ParsedIntent) -> Result<CommandResult> {
    let Some(kg) = positive(intent, "weight_kg") else {
        return Ok(CommandResult::fail("I didn't catch your weight."));
    };
    let kg = (kg * 10.0).round() / 10.0;
    let response = ctx
        .api
        .post("/api/weight", &json!({"date": ctx.date, "weight_kg": kg}))?;
    let message = format!("Logged weight as {} kilograms", spoken(kg));
    Ok(CommandResult::ok(with_warning(message, &response), response))
}

fn log_sleep(ctx: &Ctx<'_>, intent: &ParsedIntent) -> Result<CommandResult> {
    let Some(hours) = positive(intent, "hours") else {
        return Ok(CommandResult::fail("I didn't catch how many hours you slept."));
    };
    let response = ctx
        .api
        .post("/api/sleep", &json!({"date": ctx.date, "hours": hours}))?;
    let message = format!("Logged {} hours of sleep", spoken(hours));
    Ok(CommandResult::ok(with_warning(message, &response), response))
}

fn log_wake(ctx: &Ctx<'_>, intent: &ParsedIntent) -> Result<CommandResult> {
    let hour = intent.param_i64("hour").filter(|h| (0..24).contains(h));
    let minute = match intent.param("minute") {
        None => Some(0),
        Some(_) => intent.param_i64("minute").filter(|m| (0..60).contains(m)),
    };
    let (Some(hour), Some(minute)) = (hour, minute) else {
        return Ok(CommandResult::fail("I didn't catch your wake time."));
    };
    let wake_time = format!("{hour:02}:{minute:02}:00");
    let response = ctx
        .api
        .post("/api/wake", &json!({"date": ctx.date, "wake_time": wake_time}))?;
    Ok(CommandResult::ok(format!("Logged wake time as {hour}:{minute:02}"), response))
}

fn log_vegetables(ctx: &Ctx<'_>, intent: &ParsedIntent) -> Result<CommandResult> {
    let Some(servings) = positive(intent, "servings") else {
        return Ok(CommandResult::fail("I didn't catch the number of servings."));
    };
    let metrics = crate::api::metric_definitions(ctx.api.get("/api/custom-metrics", &[])?)?;
    let Some(metric) = metrics
        .iter()
        .find(|m| m.name.to_lowercase().contains("vegetable"))
    else {
        return Ok(CommandResult::fail("Vegetable tracking is not set up."));
    };
    let response = ctx.api.post(
        &format!("/api/custom-metrics/{}/entries", metric.id),
        &json!({"date": ctx.date, "value": servings}),
    )?;
    Ok(CommandResult::ok(
        format!("Logged {} servings of vegetables.", spoken(servings)),
        response,
    ))
}

fn log_workout(ctx: &Ctx<'_>, intent: &ParsedIntent) -> Result<CommandResult> {
    let Some(minutes) = positive(intent, "duration_minutes") else {
        return Ok(CommandResult::fail("I didn't catch the workout duration."));
    };
    let workout_type = intent.param_str("workout_type").unwrap_or("General");
    let response = ctx.api.post(
        "/api/workout",
        &json!({
            "date": ctx.date,
            "duration_minutes": minutes,
            "workout_type": workout_type,
        }),
    )?;
    Ok(CommandResult::ok(
        format!("Logged a {} minute workout.", spoken(minutes)),
        response,
    ))
}

fn log_custom_metric(ctx: &Ctx<'_>, intent: &ParsedIntent) -> Result<CommandResult> {
    let (Some(metric_id), Some(value)) = (intent.param_i64("metric_id"), intent.param_f64("value")) else {
        return Ok(CommandResult::fail("Missing metric or value."));
    };
    let metric_name = intent.param_str("metric_name").unwrap_or("metric");
    let response = ctx.api.post(
        &format!("/api/custom-metrics/{metric_id}/entries"),
        &json!({"date": ctx.date, "value": value}),
    )?;
    Ok(CommandResult::ok(
        format!("Logged {} for {metric_name}.", spoken(value)),
        response,
    ))
}
