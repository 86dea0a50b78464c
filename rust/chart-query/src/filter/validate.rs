use super::compile::compile_condition;
use super::{FilterCondition, FilterGroup, FilterOperator, OperatorFamily};
use crate::property::PropertyDescriptor;
use serde::{Serialize, Serializer};
use std::fmt;

/// Why a condition was left out of the compiled filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningKind {
    MissingProperty,
    MissingOperator,
    UnknownOperator(String),
    OperatorNotAllowed {
        operator: FilterOperator,
        family: OperatorFamily,
    },
    MissingValue,
    MissingRangeBound,
    InvertedDateRange,
    EmptyList,
    UnsupportedListValue,
}

impl WarningKind {
    pub fn code(&self) -> &'static str {
        match self {
            WarningKind::MissingProperty => "missing_property",
            WarningKind::MissingOperator => "missing_operator",
            WarningKind::UnknownOperator(_) => "unknown_operator",
            WarningKind::OperatorNotAllowed { .. } => "operator_not_allowed",
            WarningKind::MissingValue => "missing_value",
            WarningKind::MissingRangeBound => "missing_range_bound",
            WarningKind::InvertedDateRange => "inverted_date_range",
            WarningKind::EmptyList => "empty_list",
            WarningKind::UnsupportedListValue => "unsupported_list_value",
        }
    }
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::MissingProperty => f.write_str("condition has no property"),
            WarningKind::MissingOperator => f.write_str("condition has no operator"),
            WarningKind::UnknownOperator(operator) => write!(f, "unknown operator '{operator}'"),
            WarningKind::OperatorNotAllowed { operator, family } => {
                write!(f, "operator '{operator}' is not valid for {family} properties")
            }
            WarningKind::MissingValue => f.write_str("operator requires a value"),
            WarningKind::MissingRangeBound => f.write_str("between requires a start and an end"),
            WarningKind::InvertedDateRange => f.write_str("start date is after end date"),
            WarningKind::EmptyList => f.write_str("no options selected"),
            WarningKind::UnsupportedListValue => {
                f.write_str("operator does not accept multiple values")
            }
        }
    }
}

impl Serialize for WarningKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// A dropped condition, located by its group path (indices from the top-level
/// group list down through `subgroups`) and its index within that group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterWarning {
    pub group_path: Vec<usize>,
    pub condition_index: usize,
    pub condition_id: String,
    pub kind: WarningKind,
    pub message: String,
}

impl FilterWarning {
    pub(super) fn new(
        group_path: Vec<usize>,
        condition_index: usize,
        condition: &FilterCondition,
        kind: WarningKind,
    ) -> Self {
        let message = if condition.property.is_empty() {
            kind.to_string()
        } else {
            format!("{}: {kind}", condition.property)
        };
        Self {
            group_path,
            condition_index,
            condition_id: condition.id.clone(),
            kind,
            message,
        }
    }
}

/// Reports every condition the compiler would drop, without compiling.
pub fn validate(groups: &[FilterGroup], properties: &[PropertyDescriptor]) -> Vec<FilterWarning> {
    let mut warnings = Vec::new();
    for (index, group) in groups.iter().enumerate() {
        walk(group, vec![index], properties, &mut warnings);
    }
    warnings
}

fn walk(
    group: &FilterGroup,
    path: Vec<usize>,
    properties: &[PropertyDescriptor],
    warnings: &mut Vec<FilterWarning>,
) {
    for (index, condition) in group.conditions.iter().enumerate() {
        if let Err(kind) = compile_condition(condition, properties) {
            warnings.push(FilterWarning::new(path.clone(), index, condition, kind));
        }
    }
    for (index, subgroup) in group.subgroups.iter().enumerate() {
        let mut child = path.clone();
        child.push(index);
        walk(subgroup, child, properties, warnings);
    }
}
