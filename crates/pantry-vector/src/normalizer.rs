//! Recipe normalizer.
//!
//! Converts heterogeneous recipe JSON into a [`CanonicalDocument`]. Input
//! shapes are detected into tagged unions ([`BatchShape`], [`IngredientEntry`])
//! and matched exhaustively; anything that is not a recognized shape is a
//! [`PantryError::MalformedRecord`].
//!
//! A source object with any recipe field is a single recipe. One without is a
//! wrapper only when exactly one of its values is an array of objects.
//!
//! Field-level problems (a numeric `name`, a garbage ingredient entry) degrade
//! the field to its default. Only a record that is not an object, or whose
//! `ingredients` field is present but not a list, is rejected.

use serde_json::{json, Map, Number, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use pantry_core::error::{PantryError, Result};
use pantry_core::types::CanonicalDocument;

/// Reason recorded when `ingredients` is present but unusable.
pub const MALFORMED_INGREDIENTS: &str = "malformed ingredients";

/// Reason recorded when a batch element is not a JSON object.
pub const NOT_AN_OBJECT: &str = "record is not an object";

/// Prefix for ids derived from a content hash.
const CONTENT_ID_PREFIX: &str = "recipe-";

/// Fields that identify an object as a recipe rather than a wrapper.
const RECIPE_FIELDS: &[&str] = &[
    "id",
    "name",
    "title",
    "ingredients",
    "method",
    "instructions",
    "serve",
    "dietary",
    "cooking_time",
];

/// Top-level shape of an ingest source document.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchShape {
    /// `[ {...}, {...} ]`
    Array(Vec<Value>),
    /// `{ "recipes": [ {...}, {...} ] }`
    Wrapped { key: String, records: Vec<Value> },
    /// `{ "name": ..., "ingredients": [...] }`
    Single(Map<String, Value>),
}

impl BatchShape {
    /// Detect the shape of a parsed source document.
    ///
    /// An object is a recipe when it carries any recipe field. Otherwise it
    /// must hold exactly one array of objects under a non-recipe key, which
    /// is the wrapped collection; sibling scalars such as `"version"` are
    /// ignored. Anything else is rejected rather than guessed at.
    pub fn detect(document: Value) -> Result<Self> {
        match document {
            Value::Array(records) => Ok(BatchShape::Array(records)),
            Value::Object(mut map) => {
                if map.keys().any(|key| RECIPE_FIELDS.contains(&key.as_str())) {
                    return Ok(BatchShape::Single(map));
                }

                let candidates: Vec<String> = map
                    .iter()
                    .filter(|(_, value)| is_record_list(value))
                    .map(|(key, _)| key.clone())
                    .collect();

                match candidates.as_slice() {
                    [key] => match map.remove(key) {
                        Some(Value::Array(records)) => Ok(BatchShape::Wrapped {
                            key: key.clone(),
                            records,
                        }),
                        _ => Err(PantryError::MalformedRecord(format!(
                            "wrapped collection '{}' is not an array",
                            key
                        ))),
                    },
                    [] => Err(PantryError::MalformedRecord(
                        "object has no recipe fields and no array of recipes".to_string(),
                    )),
                    keys => Err(PantryError::MalformedRecord(format!(
                        "ambiguous source: several arrays of records ({})",
                        keys.join(", ")
                    ))),
                }
            }
            Value::Null => Err(PantryError::MalformedRecord(
                "source document is null".to_string(),
            )),
            Value::Bool(_) | Value::Number(_) | Value::String(_) => Err(
                PantryError::MalformedRecord(
                    "source document is neither an array nor an object".to_string(),
                ),
            ),
        }
    }

    /// Flatten into the list of records to ingest, in source order.
    pub fn into_records(self) -> Vec<Value> {
        match self {
            BatchShape::Array(records) => records,
            BatchShape::Wrapped { records, .. } => records,
            BatchShape::Single(map) => vec![Value::Object(map)],
        }
    }
}

/// An array whose elements are all objects. Empty arrays qualify.
fn is_record_list(value: &Value) -> bool {
    matches!(value, Value::Array(items) if items.iter().all(Value::is_object))
}

/// Split a parsed source document into its records.
pub fn split_batch(document: Value) -> Result<Vec<Value>> {
    Ok(BatchShape::detect(document)?.into_records())
}

/// One entry of a recipe's ingredient list.
#[derive(Debug, Clone, PartialEq)]
pub enum IngredientEntry {
    /// `"2 oz white rum"`
    Plain(String),
    /// `{"ingredient": "white rum", "amount": 2, "unit": "oz"}`
    Measured {
        ingredient: String,
        amount: String,
        unit: String,
    },
}

impl IngredientEntry {
    /// Parse one list element. Returns `None` for entries that carry no
    /// usable ingredient; those are dropped rather than failing the record.
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(IngredientEntry::Plain(s.clone())),
            Value::Object(map) => {
                let ingredient = map.get("ingredient").and_then(Value::as_str)?;
                Some(IngredientEntry::Measured {
                    ingredient: ingredient.to_string(),
                    amount: map.get("amount").map(scalar_text).unwrap_or_default(),
                    unit: map.get("unit").map(scalar_text).unwrap_or_default(),
                })
            }
            _ => None,
        }
    }

    fn render(&self) -> String {
        match self {
            IngredientEntry::Plain(text) => text.clone(),
            IngredientEntry::Measured {
                ingredient,
                amount,
                unit,
            } => {
                if amount.is_empty() && unit.is_empty() {
                    ingredient.clone()
                } else {
                    format!("{}{} {}", amount, unit, ingredient)
                }
            }
        }
    }
}

/// A recipe record after shape detection, with every field defaulted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRecord {
    pub id: Option<String>,
    pub name: String,
    pub ingredients: Vec<IngredientEntry>,
    pub method: String,
    pub serve: String,
    pub dietary: Vec<String>,
    pub cooking_time: Option<Number>,
}

impl RawRecord {
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| PantryError::MalformedRecord(NOT_AN_OBJECT.to_string()))?;

        let ingredients = match map.get("ingredients") {
            None => Vec::new(),
            Some(Value::Array(items)) => {
                let parsed: Vec<IngredientEntry> =
                    items.iter().filter_map(IngredientEntry::from_value).collect();
                if parsed.len() != items.len() {
                    debug!(
                        dropped = items.len() - parsed.len(),
                        "Dropped unusable ingredient entries"
                    );
                }
                parsed
            }
            Some(_) => {
                return Err(PantryError::MalformedRecord(
                    MALFORMED_INGREDIENTS.to_string(),
                ))
            }
        };

        Ok(Self {
            id: map.get("id").and_then(explicit_id),
            name: first_string(map, &["name", "title"]),
            ingredients,
            method: first_text(map, &["method", "instructions"]),
            serve: first_string(map, &["serve"]),
            dietary: string_list(map.get("dietary")),
            cooking_time: map.get("cooking_time").and_then(number_value),
        })
    }

    /// Deterministic text used as the embedding input.
    pub fn canonical_text(&self) -> String {
        let ingredients = self
            .ingredients
            .iter()
            .map(IngredientEntry::render)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Name: {}\nIngredients: {}\nMethod: {}\nServe: {}",
            self.name, ingredients, self.method, self.serve
        )
    }

    pub fn metadata(&self) -> Value {
        json!({
            "name": self.name,
            "serve": self.serve,
            "dietary": self.dietary,
            "cooking_time": self.cooking_time,
        })
    }

    /// Explicit source id when present, otherwise a hash of `text`.
    pub fn document_id(&self, text: &str) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => content_id(text),
        }
    }

    pub fn into_document(self) -> CanonicalDocument {
        let text = self.canonical_text();
        CanonicalDocument {
            id: self.document_id(&text),
            metadata: self.metadata(),
            text,
        }
    }
}

/// Normalize one raw record into its canonical document.
pub fn normalize(record: &Value) -> Result<CanonicalDocument> {
    Ok(RawRecord::from_value(record)?.into_document())
}

/// Stable id derived from canonical text.
pub fn content_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{}{}", CONTENT_ID_PREFIX, hex::encode(&digest[..16]))
}

fn explicit_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

fn first_string(map: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

/// Like [`first_string`], but also accepts a list of steps.
fn first_text(map: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| match map.get(*key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Array(steps)) => Some(
                steps
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => None,
        })
        .unwrap_or_default()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn number_value(value: &Value) -> Option<Number> {
    match value {
        Value::Number(n) => Some(n.clone()),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(Number::from_f64),
        _ => None,
    }
}

/// Render an amount or unit. Whole floats lose their trailing `.0`.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if !(n.is_i64() || n.is_u64()) && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mojito() -> Value {
        json!({
            "name": "Mojito",
            "ingredients": [
                {"ingredient": "white rum", "amount": 60, "unit": "ml"},
                {"ingredient": "lime juice", "amount": 30, "unit": "ml"},
                {"ingredient": "mint leaves", "amount": "8"}
            ],
            "method": "Muddle mint with sugar, add rum and lime, top with soda.",
            "serve": "Highball",
            "dietary": ["vegan"],
            "cooking_time": 5
        })
    }

    #[test]
    fn test_normalize_structured_ingredients() {
        let doc = normalize(&mojito()).unwrap();
        assert_eq!(
            doc.text,
            "Name: Mojito\n\
             Ingredients: 60ml white rum, 30ml lime juice, 8 mint leaves\n\
             Method: Muddle mint with sugar, add rum and lime, top with soda.\n\
             Serve: Highball"
        );
        assert_eq!(doc.metadata["name"], "Mojito");
        assert_eq!(doc.metadata["dietary"], json!(["vegan"]));
        assert_eq!(doc.metadata["cooking_time"], json!(5));
    }

    #[test]
    fn test_normalize_plain_ingredients_verbatim() {
        let record = json!({
            "title": "Gin Tonic",
            "ingredients": ["50 ml gin", "tonic water", "lime wedge"],
            "instructions": "Build over ice."
        });
        let doc = normalize(&record).unwrap();
        assert_eq!(
            doc.text,
            "Name: Gin Tonic\nIngredients: 50 ml gin, tonic water, lime wedge\nMethod: Build over ice.\nServe: "
        );
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let a = normalize(&mojito()).unwrap();
        let b = normalize(&mojito()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let doc = normalize(&json!({})).unwrap();
        assert_eq!(doc.text, "Name: \nIngredients: \nMethod: \nServe: ");
        assert_eq!(doc.metadata["dietary"], json!([]));
        assert_eq!(doc.metadata["cooking_time"], Value::Null);
    }

    #[test]
    fn test_wrong_typed_fields_degrade() {
        let record = json!({
            "name": 42,
            "ingredients": ["ice", 7, {"amount": 2}, null, {"ingredient": "soda"}],
            "method": {"step": 1},
            "serve": ["glass"],
            "dietary": "vegan",
            "cooking_time": "ten"
        });
        let doc = normalize(&record).unwrap();
        assert_eq!(doc.text, "Name: \nIngredients: ice, soda\nMethod: \nServe: ");
        assert_eq!(doc.metadata["dietary"], json!([]));
        assert_eq!(doc.metadata["cooking_time"], Value::Null);
    }

    #[test]
    fn test_null_ingredients_is_malformed() {
        let err = normalize(&json!({"name": "Broken", "ingredients": null})).unwrap_err();
        assert_eq!(err.reason(), MALFORMED_INGREDIENTS);

        let err = normalize(&json!({"name": "Broken", "ingredients": "rum"})).unwrap_err();
        assert!(matches!(err, PantryError::MalformedRecord(_)));
    }

    #[test]
    fn test_non_object_record_is_malformed() {
        for value in [json!("Mojito"), json!(3), json!(null), json!(["a"])] {
            let err = normalize(&value).unwrap_err();
            assert_eq!(err.reason(), NOT_AN_OBJECT);
        }
    }

    #[test]
    fn test_instruction_steps_are_joined() {
        let record = json!({"name": "Sour", "instructions": ["Shake hard.", "Strain."]});
        let doc = normalize(&record).unwrap();
        assert!(doc.text.contains("Method: Shake hard. Strain."));
    }

    #[test]
    fn test_float_amounts_render_without_trailing_zero() {
        let record = json!({"ingredients": [
            {"ingredient": "gin", "amount": 50.0, "unit": "ml"},
            {"ingredient": "syrup", "amount": 7.5, "unit": "ml"}
        ]});
        let doc = normalize(&record).unwrap();
        assert!(doc.text.contains("Ingredients: 50ml gin, 7.5ml syrup"));
    }

    #[test]
    fn test_explicit_id_wins_over_content_hash() {
        let mut record = mojito();
        record["id"] = json!("mojito-classic");
        assert_eq!(normalize(&record).unwrap().id, "mojito-classic");

        record["id"] = json!(17);
        assert_eq!(normalize(&record).unwrap().id, "17");
    }

    #[test]
    fn test_content_id_is_stable_and_content_sensitive() {
        let a = normalize(&mojito()).unwrap();
        let b = normalize(&mojito()).unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("recipe-"));
        assert_eq!(a.id.len(), "recipe-".len() + 32);

        let mut changed = mojito();
        changed["serve"] = json!("Rocks");
        assert_ne!(normalize(&changed).unwrap().id, a.id);
    }

    #[test]
    fn test_detect_bare_array() {
        let records = split_batch(json!([mojito(), mojito()])).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_detect_wrapped_collection() {
        let shape = BatchShape::detect(json!({"recipes": [mojito(), mojito(), mojito()]})).unwrap();
        match shape {
            BatchShape::Wrapped { key, records } => {
                assert_eq!(key, "recipes");
                assert_eq!(records.len(), 3);
            }
            other => panic!("expected wrapped collection, got {:?}", other),
        }
    }

    #[test]
    fn test_detect_single_recipe() {
        let shape = BatchShape::detect(mojito()).unwrap();
        assert!(matches!(shape, BatchShape::Single(_)));
        assert_eq!(shape.into_records().len(), 1);
    }

    #[test]
    fn test_single_field_recipe_is_not_a_wrapper() {
        let shape = BatchShape::detect(json!({"ingredients": ["ice"]})).unwrap();
        assert!(matches!(shape, BatchShape::Single(_)));
    }

    #[test]
    fn test_wrapped_collection_ignores_sibling_scalars() {
        let records = split_batch(json!({
            "recipes": [{"name": "Mojito"}, {"name": "Negroni"}],
            "version": 2,
            "source": "house list"
        }))
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(normalize(&records[1]).unwrap().metadata["name"], "Negroni");
    }

    #[test]
    fn test_empty_wrapped_collection() {
        let records = split_batch(json!({"recipes": [], "version": 2})).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_object_without_recipe_fields_is_rejected() {
        for value in [
            json!({"version": 2}),
            json!({}),
            json!({"tags": ["sour", "classic"]}),
        ] {
            assert!(matches!(
                BatchShape::detect(value),
                Err(PantryError::MalformedRecord(_))
            ));
        }
    }

    #[test]
    fn test_several_record_arrays_are_ambiguous() {
        let err = BatchShape::detect(json!({
            "cocktails": [{"name": "Mojito"}],
            "mocktails": [{"name": "Virgin Mary"}]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn test_recipe_with_list_of_objects_stays_single() {
        let shape = BatchShape::detect(json!({
            "name": "Zombie",
            "garnishes": [{"item": "mint"}]
        }))
        .unwrap();
        assert!(matches!(shape, BatchShape::Single(_)));
    }

    #[test]
    fn test_detect_rejects_scalars() {
        for value in [json!("recipes"), json!(1), json!(true), Value::Null] {
            assert!(matches!(
                BatchShape::detect(value),
                Err(PantryError::MalformedRecord(_))
            ));
        }
    }
}
