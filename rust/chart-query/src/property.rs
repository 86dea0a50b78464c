//! Remote schema model: the closed set of property types and the scalar values they normalize to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every column type the remote source can declare.
///
/// Both the filter compiler and the value normalizer match on this enum
/// exhaustively, so adding a variant forces both of them to be updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Title,
    RichText,
    Number,
    Select,
    MultiSelect,
    Status,
    Date,
    Checkbox,
    Url,
    Email,
    PhoneNumber,
    Formula,
    Rollup,
    Relation,
    People,
    Files,
    CreatedTime,
    LastEditedTime,
    CreatedBy,
    LastEditedBy,
    UniqueId,
}

impl PropertyType {
    pub const ALL: [PropertyType; 21] = [
        PropertyType::Title,
        PropertyType::RichText,
        PropertyType::Number,
        PropertyType::Select,
        PropertyType::MultiSelect,
        PropertyType::Status,
        PropertyType::Date,
        PropertyType::Checkbox,
        PropertyType::Url,
        PropertyType::Email,
        PropertyType::PhoneNumber,
        PropertyType::Formula,
        PropertyType::Rollup,
        PropertyType::Relation,
        PropertyType::People,
        PropertyType::Files,
        PropertyType::CreatedTime,
        PropertyType::LastEditedTime,
        PropertyType::CreatedBy,
        PropertyType::LastEditedBy,
        PropertyType::UniqueId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Title => "title",
            PropertyType::RichText => "rich_text",
            PropertyType::Number => "number",
            PropertyType::Select => "select",
            PropertyType::MultiSelect => "multi_select",
            PropertyType::Status => "status",
            PropertyType::Date => "date",
            PropertyType::Checkbox => "checkbox",
            PropertyType::Url => "url",
            PropertyType::Email => "email",
            PropertyType::PhoneNumber => "phone_number",
            PropertyType::Formula => "formula",
            PropertyType::Rollup => "rollup",
            PropertyType::Relation => "relation",
            PropertyType::People => "people",
            PropertyType::Files => "files",
            PropertyType::CreatedTime => "created_time",
            PropertyType::LastEditedTime => "last_edited_time",
            PropertyType::CreatedBy => "created_by",
            PropertyType::LastEditedBy => "last_edited_by",
            PropertyType::UniqueId => "unique_id",
        }
    }

    /// Resolves a wire discriminator. Unknown tags yield `None` rather than an error.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.as_str() == tag)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// One column of the target table as reported by the remote schema endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<SelectOption>>,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            id: None,
            options: None,
        }
    }
}

/// Looks up a descriptor by property name.
pub fn find_property<'a>(
    properties: &'a [PropertyDescriptor],
    name: &str,
) -> Option<&'a PropertyDescriptor> {
    properties.iter().find(|property| property.name == name)
}

/// A flat value: what every tagged remote value is reduced to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    pub fn empty() -> Self {
        Scalar::Text(String::new())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_empty_text(&self) -> bool {
        matches!(self, Scalar::Text(value) if value.is_empty())
    }

    /// Numeric view used for Y values: numbers pass through, text is parsed
    /// leniently from its leading numeric prefix, anything else is `0`.
    pub fn to_number(&self) -> f64 {
        match self {
            Scalar::Number(value) => *value,
            Scalar::Text(value) => parse_leading_float(value).unwrap_or(0.0),
            Scalar::Bool(_) => 0.0,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(value) => write!(f, "{value}"),
            Scalar::Number(value) => f.write_str(&format_number(*value)),
            Scalar::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// Formats a number the way chart axes display it: integral values carry no fraction.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

/// Parses the longest numeric prefix of `raw` (after leading whitespace).
///
/// `"12.5kg"` yields `12.5`, `"abc"` yields `None`.
pub fn parse_leading_float(raw: &str) -> Option<f64> {
    let trimmed = raw.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut cursor = frac_start;
        while cursor < bytes.len() && bytes[cursor].is_ascii_digit() {
            cursor += 1;
        }
        digits += cursor - frac_start;
        if digits > 0 {
            end = cursor;
        }
    }

    if digits == 0 {
        return None;
    }

    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut cursor = end + 1;
        if matches!(bytes.get(cursor), Some(b'+') | Some(b'-')) {
            cursor += 1;
        }
        let exp_start = cursor;
        while cursor < bytes.len() && bytes[cursor].is_ascii_digit() {
            cursor += 1;
        }
        if cursor > exp_start {
            end = cursor;
        }
    }

    trimmed[..end].parse::<f64>().ok()
}
