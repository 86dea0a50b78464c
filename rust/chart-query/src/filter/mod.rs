//! Boolean filter trees as edited in the query builder, and their compilation
//! into the remote source's nested `and`/`or` filter grammar.

mod compile;
pub mod tree;
mod validate;

pub use compile::{
    compile, compile_with_report, flatten, Compiled, Operand, PropertyFilter, RemoteFilter,
};
pub use validate::{validate, FilterWarning, WarningKind};

use crate::property::{find_property, PropertyDescriptor, PropertyType, Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOperator::And => "and",
            LogicalOperator::Or => "or",
        }
    }
}

/// A condition operand: one value, or the options picked in a multi-select widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    List(Vec<Scalar>),
    Scalar(Scalar),
}

impl From<Scalar> for ConditionValue {
    fn from(value: Scalar) -> Self {
        ConditionValue::Scalar(value)
    }
}

impl From<&str> for ConditionValue {
    fn from(value: &str) -> Self {
        ConditionValue::Scalar(Scalar::from(value))
    }
}

impl From<Vec<&str>> for ConditionValue {
    fn from(values: Vec<&str>) -> Self {
        ConditionValue::List(values.into_iter().map(Scalar::from).collect())
    }
}

/// A leaf comparison. `property` and `operator` stay plain strings because the
/// builder holds half-edited conditions; the compiler drops those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub property: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ConditionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_value: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_operator: Option<LogicalOperator>,
}

impl FilterCondition {
    pub fn new(
        property: impl Into<String>,
        operator: FilterOperator,
        value: Option<ConditionValue>,
    ) -> Self {
        Self {
            id: generate_id("condition"),
            property: property.into(),
            operator: operator.as_str().to_string(),
            value,
            end_value: None,
            logical_operator: None,
        }
    }

    pub fn between(property: impl Into<String>, start: Scalar, end: Scalar) -> Self {
        Self {
            end_value: Some(end),
            ..Self::new(property, FilterOperator::Between, Some(start.into()))
        }
    }
}

/// A boolean node combining conditions and nested groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterGroup {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
    #[serde(default)]
    pub subgroups: Vec<FilterGroup>,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
}

impl FilterGroup {
    pub fn new(logical_operator: LogicalOperator) -> Self {
        Self {
            id: generate_id("group"),
            conditions: Vec::new(),
            subgroups: Vec::new(),
            logical_operator,
        }
    }

    pub fn with_condition(mut self, condition: FilterCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_subgroup(mut self, subgroup: FilterGroup) -> Self {
        self.subgroups.push(subgroup);
        self
    }

    /// True when neither this group nor any descendant holds a condition.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.subgroups.iter().all(FilterGroup::is_empty)
    }
}

fn generate_id(prefix: &str) -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &simple[..9])
}

/// Every comparison the remote grammar understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    DoesNotEqual,
    Contains,
    DoesNotContain,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterThanOrEqualTo,
    LessThanOrEqualTo,
    IsEmpty,
    IsNotEmpty,
    Before,
    After,
    OnOrBefore,
    OnOrAfter,
    Between,
    PastWeek,
    PastMonth,
    PastYear,
}

impl FilterOperator {
    const ALL: [FilterOperator; 20] = [
        FilterOperator::Equals,
        FilterOperator::DoesNotEqual,
        FilterOperator::Contains,
        FilterOperator::DoesNotContain,
        FilterOperator::StartsWith,
        FilterOperator::EndsWith,
        FilterOperator::GreaterThan,
        FilterOperator::LessThan,
        FilterOperator::GreaterThanOrEqualTo,
        FilterOperator::LessThanOrEqualTo,
        FilterOperator::IsEmpty,
        FilterOperator::IsNotEmpty,
        FilterOperator::Before,
        FilterOperator::After,
        FilterOperator::OnOrBefore,
        FilterOperator::OnOrAfter,
        FilterOperator::Between,
        FilterOperator::PastWeek,
        FilterOperator::PastMonth,
        FilterOperator::PastYear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equals => "equals",
            FilterOperator::DoesNotEqual => "does_not_equal",
            FilterOperator::Contains => "contains",
            FilterOperator::DoesNotContain => "does_not_contain",
            FilterOperator::StartsWith => "starts_with",
            FilterOperator::EndsWith => "ends_with",
            FilterOperator::GreaterThan => "greater_than",
            FilterOperator::LessThan => "less_than",
            FilterOperator::GreaterThanOrEqualTo => "greater_than_or_equal_to",
            FilterOperator::LessThanOrEqualTo => "less_than_or_equal_to",
            FilterOperator::IsEmpty => "is_empty",
            FilterOperator::IsNotEmpty => "is_not_empty",
            FilterOperator::Before => "before",
            FilterOperator::After => "after",
            FilterOperator::OnOrBefore => "on_or_before",
            FilterOperator::OnOrAfter => "on_or_after",
            FilterOperator::Between => "between",
            FilterOperator::PastWeek => "past_week",
            FilterOperator::PastMonth => "past_month",
            FilterOperator::PastYear => "past_year",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.into_iter().find(|op| op.as_str() == raw)
    }

    /// Whether the operator compares against a user-supplied value.
    pub fn takes_value(&self) -> bool {
        !matches!(
            self,
            FilterOperator::IsEmpty
                | FilterOperator::IsNotEmpty
                | FilterOperator::PastWeek
                | FilterOperator::PastMonth
                | FilterOperator::PastYear
        )
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Groups of property types sharing one operator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorFamily {
    Number,
    Text,
    Select,
    MultiSelect,
    Date,
    Checkbox,
    Status,
}

impl OperatorFamily {
    pub fn for_property_type(property_type: PropertyType) -> Self {
        match property_type {
            PropertyType::Number | PropertyType::Formula | PropertyType::Rollup => {
                OperatorFamily::Number
            }
            PropertyType::Title | PropertyType::RichText => OperatorFamily::Text,
            PropertyType::Select => OperatorFamily::Select,
            PropertyType::MultiSelect => OperatorFamily::MultiSelect,
            PropertyType::Date => OperatorFamily::Date,
            PropertyType::Checkbox => OperatorFamily::Checkbox,
            PropertyType::Status => OperatorFamily::Status,
            PropertyType::Url
            | PropertyType::Email
            | PropertyType::PhoneNumber
            | PropertyType::Relation
            | PropertyType::People
            | PropertyType::Files
            | PropertyType::CreatedTime
            | PropertyType::LastEditedTime
            | PropertyType::CreatedBy
            | PropertyType::LastEditedBy
            | PropertyType::UniqueId => OperatorFamily::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorFamily::Number => "number",
            OperatorFamily::Text => "text",
            OperatorFamily::Select => "select",
            OperatorFamily::MultiSelect => "multi_select",
            OperatorFamily::Date => "date",
            OperatorFamily::Checkbox => "checkbox",
            OperatorFamily::Status => "status",
        }
    }

    pub fn operators(&self) -> &'static [FilterOperator] {
        use FilterOperator::*;

        match self {
            OperatorFamily::Number => &[
                Equals,
                DoesNotEqual,
                GreaterThan,
                LessThan,
                GreaterThanOrEqualTo,
                LessThanOrEqualTo,
                IsEmpty,
                IsNotEmpty,
            ],
            OperatorFamily::Text => &[
                Equals,
                DoesNotEqual,
                Contains,
                DoesNotContain,
                StartsWith,
                EndsWith,
                IsEmpty,
                IsNotEmpty,
            ],
            OperatorFamily::Select => &[
                Equals,
                DoesNotEqual,
                Contains,
                DoesNotContain,
                IsEmpty,
                IsNotEmpty,
            ],
            OperatorFamily::MultiSelect => &[Contains, DoesNotContain, IsEmpty, IsNotEmpty],
            OperatorFamily::Date => &[
                Equals, Before, After, OnOrBefore, OnOrAfter, Between, PastWeek, PastMonth,
                PastYear, IsEmpty, IsNotEmpty,
            ],
            OperatorFamily::Checkbox => &[Equals, DoesNotEqual],
            OperatorFamily::Status => &[Equals, DoesNotEqual, IsEmpty, IsNotEmpty],
        }
    }

    pub fn allows(&self, operator: FilterOperator) -> bool {
        self.operators().contains(&operator)
    }
}

impl fmt::Display for OperatorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The type key a compiled comparison is nested under (`{"property": .., "<key>": {..}}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKey {
    Title,
    RichText,
    Number,
    Select,
    MultiSelect,
    Status,
    Date,
    Checkbox,
}

impl FilterKey {
    pub fn for_property_type(property_type: PropertyType) -> Self {
        match property_type {
            PropertyType::Title => FilterKey::Title,
            PropertyType::RichText => FilterKey::RichText,
            PropertyType::Number | PropertyType::Formula | PropertyType::Rollup => {
                FilterKey::Number
            }
            PropertyType::Select => FilterKey::Select,
            PropertyType::MultiSelect => FilterKey::MultiSelect,
            PropertyType::Status => FilterKey::Status,
            PropertyType::Date => FilterKey::Date,
            PropertyType::Checkbox => FilterKey::Checkbox,
            PropertyType::Url
            | PropertyType::Email
            | PropertyType::PhoneNumber
            | PropertyType::Relation
            | PropertyType::People
            | PropertyType::Files
            | PropertyType::CreatedTime
            | PropertyType::LastEditedTime
            | PropertyType::CreatedBy
            | PropertyType::LastEditedBy
            | PropertyType::UniqueId => FilterKey::RichText,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKey::Title => "title",
            FilterKey::RichText => "rich_text",
            FilterKey::Number => "number",
            FilterKey::Select => "select",
            FilterKey::MultiSelect => "multi_select",
            FilterKey::Status => "status",
            FilterKey::Date => "date",
            FilterKey::Checkbox => "checkbox",
        }
    }
}

/// How a property name resolves against the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedProperty {
    pub family: OperatorFamily,
    pub key: FilterKey,
}

/// Resolves the operator family and filter key of `name`.
///
/// Names missing from the schema resolve as rich text, except names containing
/// `multi_select`, which the builder emits before the schema has loaded.
pub fn resolve_property(properties: &[PropertyDescriptor], name: &str) -> ResolvedProperty {
    match find_property(properties, name) {
        Some(descriptor) => ResolvedProperty {
            family: OperatorFamily::for_property_type(descriptor.property_type),
            key: FilterKey::for_property_type(descriptor.property_type),
        },
        None if name.to_lowercase().contains("multi_select") => ResolvedProperty {
            family: OperatorFamily::MultiSelect,
            key: FilterKey::MultiSelect,
        },
        None => ResolvedProperty {
            family: OperatorFamily::Text,
            key: FilterKey::RichText,
        },
    }
}
