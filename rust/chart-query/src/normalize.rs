//! Reduces tagged remote property values to [`Scalar`]s.
//!
//! A remote cell looks like `{"type": "select", "select": {"name": "Done"}}`:
//! the `type` discriminator names the key that carries the payload. The
//! normalizer is total. Absent cells become `""`, absent numbers `0`, and
//! unrecognized discriminators go through [`fallback`].

use crate::property::{format_number, PropertyType, Scalar};
use serde_json::{Map, Value};

const LIST_SEPARATOR: &str = ", ";

/// Normalizes one tagged property value.
pub fn normalize(value: &Value) -> Scalar {
    let Some(object) = value.as_object() else {
        return Scalar::empty();
    };

    match object.get("type").and_then(Value::as_str) {
        Some(tag) => match PropertyType::from_tag(tag) {
            Some(property_type) => normalize_typed(property_type, object),
            None => fallback(object, Some(tag)),
        },
        None => fallback(object, None),
    }
}

/// Normalizes the named property of a remote row (`row.properties[name]`).
pub fn normalize_cell(row: &Value, name: &str) -> Scalar {
    row.get("properties")
        .and_then(|properties| properties.get(name))
        .map(normalize)
        .unwrap_or_else(Scalar::empty)
}

fn normalize_typed(property_type: PropertyType, object: &Map<String, Value>) -> Scalar {
    let payload = object.get(property_type.as_str()).unwrap_or(&Value::Null);

    match property_type {
        PropertyType::Title | PropertyType::RichText => Scalar::Text(first_plain_text(payload)),
        PropertyType::Number => Scalar::Number(payload.as_f64().unwrap_or(0.0)),
        PropertyType::Select | PropertyType::Status => Scalar::Text(string_field(payload, "name")),
        PropertyType::MultiSelect => Scalar::Text(join_items(payload, |item| {
            string_field(item, "name")
        })),
        PropertyType::Date => Scalar::Text(string_field(payload, "start")),
        PropertyType::Checkbox => Scalar::Bool(payload.as_bool().unwrap_or(false)),
        PropertyType::Url
        | PropertyType::Email
        | PropertyType::PhoneNumber
        | PropertyType::CreatedTime
        | PropertyType::LastEditedTime => Scalar::Text(as_text(payload)),
        PropertyType::Formula => formula_result(payload),
        PropertyType::Rollup => rollup_result(payload),
        PropertyType::Relation => Scalar::Text(join_items(payload, |item| string_field(item, "id"))),
        PropertyType::People => Scalar::Text(join_items(payload, user_label)),
        PropertyType::Files => Scalar::Text(join_items(payload, |item| string_field(item, "name"))),
        PropertyType::CreatedBy | PropertyType::LastEditedBy => Scalar::Text(user_label(payload)),
        PropertyType::UniqueId => unique_id(payload),
    }
}

/// Formula results carry their own discriminator (`string`, `number`, `boolean`, `date`).
fn formula_result(payload: &Value) -> Scalar {
    match payload.get("type").and_then(Value::as_str) {
        Some("string") => Scalar::Text(as_text(payload.get("string").unwrap_or(&Value::Null))),
        Some("number") => Scalar::Number(
            payload
                .get("number")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
        ),
        Some("boolean") => Scalar::Bool(
            payload
                .get("boolean")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        ),
        Some("date") => Scalar::Text(string_field(
            payload.get("date").unwrap_or(&Value::Null),
            "start",
        )),
        _ => normalize(payload),
    }
}

/// Rollups wrap a number, a date, or an array of ordinary tagged values.
fn rollup_result(payload: &Value) -> Scalar {
    match payload.get("type").and_then(Value::as_str) {
        Some("number") => Scalar::Number(
            payload
                .get("number")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
        ),
        Some("date") => Scalar::Text(string_field(
            payload.get("date").unwrap_or(&Value::Null),
            "start",
        )),
        Some("array") => Scalar::Text(join_items(
            payload.get("array").unwrap_or(&Value::Null),
            |item| normalize(item).to_string(),
        )),
        Some("incomplete") | Some("unsupported") => Scalar::empty(),
        _ => normalize(payload),
    }
}

fn unique_id(payload: &Value) -> Scalar {
    let Some(number) = payload.get("number").and_then(Value::as_f64) else {
        return Scalar::empty();
    };

    match payload.get("prefix").and_then(Value::as_str) {
        Some(prefix) if !prefix.is_empty() => {
            Scalar::Text(format!("{prefix}-{}", format_number(number)))
        }
        _ => Scalar::Number(number),
    }
}

/// Escape hatch for discriminators outside the declared type set.
///
/// Tries `value`, `name`, `text`, then `plain_text`; otherwise yields the
/// `[type]` placeholder. This keeps the pipeline total under schema drift
/// but is not type-safe: the chosen field is whatever happens to be there.
fn fallback(object: &Map<String, Value>, tag: Option<&str>) -> Scalar {
    for key in ["value", "name", "text", "plain_text"] {
        match object.get(key) {
            Some(Value::String(text)) if !text.is_empty() => return Scalar::Text(text.clone()),
            Some(Value::Number(number)) => {
                if let Some(number) = number.as_f64() {
                    return Scalar::Number(number);
                }
            }
            Some(Value::Bool(true)) => return Scalar::Bool(true),
            _ => {}
        }
    }

    match tag {
        Some(tag) => Scalar::Text(format!("[{tag}]")),
        None => Scalar::empty(),
    }
}

fn first_plain_text(runs: &Value) -> String {
    runs.as_array()
        .and_then(|runs| runs.first())
        .map(|run| string_field(run, "plain_text"))
        .unwrap_or_default()
}

fn join_items<F>(items: &Value, label: F) -> String
where
    F: Fn(&Value) -> String,
{
    items
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(label)
                .filter(|label| !label.is_empty())
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR)
        })
        .unwrap_or_default()
}

fn user_label(user: &Value) -> String {
    let name = string_field(user, "name");
    if name.is_empty() {
        string_field(user, "id")
    } else {
        name
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value.get(key).map(as_text).unwrap_or_default()
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number
            .as_f64()
            .map(format_number)
            .unwrap_or_else(|| number.to_string()),
        Value::Bool(flag) => flag.to_string(),
        _ => String::new(),
    }
}
