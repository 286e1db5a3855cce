//! Unit conversion into the canonical units stored by the data API

use serde::{Deserialize, Serialize};

pub const KG_PER_POUND: f64 = 0.453592;

/// Canonical unit for a logged food quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanonicalUnit {
    #[serde(rename = "g")]
    Grams,
    #[serde(rename = "ml")]
    Milliliters,
    #[serde(rename = "piece")]
    Pieces,
    #[serde(rename = "serving")]
    Servings,
}

impl CanonicalUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalUnit::Grams => "g",
            CanonicalUnit::Milliliters => "ml",
            CanonicalUnit::Pieces => "piece",
            CanonicalUnit::Servings => "serving",
        }
    }
}

/// A food quantity expressed in its canonical unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: CanonicalUnit,
}

impl Quantity {
    /// Quantity string understood by the food-compute endpoint, e.g. "473.18ml".
    pub fn to_api_string(self) -> String {
        format!("{}{}", round2(self.value), self.unit.as_str())
    }
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Convert a spoken body weight to kilograms. Unknown or missing units are
/// taken as kilograms already.
pub fn weight_to_kg(value: f64, unit: Option<&str>) -> f64 {
    match unit.map(|u| u.trim().to_lowercase()).as_deref() {
        Some("lb" | "lbs" | "pound" | "pounds") => value * KG_PER_POUND,
        _ => value,
    }
}

fn mass_grams_per(unit: &str) -> Option<f64> {
    Some(match unit {
        "g" | "gram" | "grams" => 1.0,
        "oz" | "ounce" | "ounces" => 28.3495,
        "lb" | "lbs" | "pound" | "pounds" => 453.592,
        "kg" | "kilo" | "kilos" | "kilogram" | "kilograms" => 1000.0,
        _ => return None,
    })
}

fn volume_ml_per(unit: &str) -> Option<f64> {
    Some(match unit {
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => 1.0,
        "l" | "liter" | "liters" | "litre" | "litres" => 1000.0,
        "cup" | "cups" => 236.588,
        "tbsp" | "tablespoon" | "tablespoons" => 14.787,
        "tsp" | "teaspoon" | "teaspoons" => 4.929,
        _ => return None,
    })
}

/// Convert a spoken food amount into its canonical unit.
///
/// Mass goes to grams, volume to millilitres, countable units to pieces;
/// anything else (including no unit) is counted in servings.
pub fn food_quantity(value: f64, unit: Option<&str>) -> Quantity {
    let unit = unit.map(|u| u.trim().to_lowercase()).unwrap_or_default();
    if let Some(factor) = mass_grams_per(&unit) {
        return Quantity {
            value: value * factor,
            unit: CanonicalUnit::Grams,
        };
    }
    if let Some(factor) = volume_ml_per(&unit) {
        return Quantity {
            value: value * factor,
            unit: CanonicalUnit::Milliliters,
        };
    }
    let unit = match unit.as_str() {
        "piece" | "pieces" | "slice" | "slices" => CanonicalUnit::Pieces,
        _ => CanonicalUnit::Servings,
    };
    Quantity { value, unit }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_conversion() {
        let kg = weight_to_kg(180.0, Some("pounds"));
        assert!((kg - 180.0 * 0.453592).abs() < 1e-9);
        assert_eq!(weight_to_kg(82.0, Some("kilos")), 82.0);
        assert_eq!(weight_to_kg(82.0, None), 82.0);
    }

    #[test]
    fn test_food_quantities() {
        let rice = food_quantity(2.0, Some("cups"));
        assert_eq!(rice.unit, CanonicalUnit::Milliliters);
        assert!((rice.value - 473.176).abs() < 1e-6);
        assert_eq!(rice.to_api_string(), "473.18ml");

        let cheese = food_quantity(3.0, Some("oz"));
        assert_eq!(cheese.unit, CanonicalUnit::Grams);
        assert!((cheese.value - 85.0485).abs() < 1e-6);

        assert_eq!(food_quantity(2.0, Some("slices")).unit, CanonicalUnit::Pieces);
        assert_eq!(food_quantity(1.0, None).unit, CanonicalUnit::Servings);
        assert_eq!(food_quantity(1.0, None).to_api_string(), "1serving");
    }
}
