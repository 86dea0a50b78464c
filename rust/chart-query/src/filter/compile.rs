use super::{
    resolve_property, ConditionValue, FilterCondition, FilterGroup, FilterKey, FilterOperator,
    FilterWarning, LogicalOperator, OperatorFamily, WarningKind,
};
use crate::property::{PropertyDescriptor, Scalar};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::Value;

/// A filter in the remote source's grammar.
///
/// Serializes as `{"and": [..]}`, `{"or": [..]}` or
/// `{"property": "Name", "<key>": {"<operator>": <operand>}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteFilter {
    And(Vec<RemoteFilter>),
    Or(Vec<RemoteFilter>),
    Property(PropertyFilter),
}

impl RemoteFilter {
    fn compound(operator: LogicalOperator, children: Vec<RemoteFilter>) -> Self {
        match operator {
            LogicalOperator::And => RemoteFilter::And(children),
            LogicalOperator::Or => RemoteFilter::Or(children),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

impl Serialize for RemoteFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RemoteFilter::And(children) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("and", children)?;
                map.end()
            }
            RemoteFilter::Or(children) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("or", children)?;
                map.end()
            }
            RemoteFilter::Property(filter) => filter.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyFilter {
    pub property: String,
    pub key: FilterKey,
    pub operator: FilterOperator,
    pub operand: Operand,
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Scalar),
    /// `is_empty: true` style flags.
    Flag,
    /// Relative date ranges take an empty object (`past_week: {}`).
    EmptyObject,
}

impl Serialize for Operand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Operand::Value(value) => value.serialize(serializer),
            Operand::Flag => serializer.serialize_bool(true),
            Operand::EmptyObject => serializer.serialize_map(Some(0))?.end(),
        }
    }
}

struct Comparison<'a> {
    operator: FilterOperator,
    operand: &'a Operand,
}

impl Serialize for Comparison<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.operator.as_str(), self.operand)?;
        map.end()
    }
}

impl Serialize for PropertyFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("property", &self.property)?;
        map.serialize_entry(
            self.key.as_str(),
            &Comparison {
                operator: self.operator,
                operand: &self.operand,
            },
        )?;
        map.end()
    }
}

/// Compilation output together with the conditions that were dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compiled {
    pub filter: Option<RemoteFilter>,
    pub warnings: Vec<FilterWarning>,
}

/// Compiles builder groups into a remote filter. `None` means "no filter".
pub fn compile(groups: &[FilterGroup], properties: &[PropertyDescriptor]) -> Option<RemoteFilter> {
    compile_with_report(groups, properties).filter
}

pub fn compile_with_report(groups: &[FilterGroup], properties: &[PropertyDescriptor]) -> Compiled {
    let mut compiler = Compiler {
        properties,
        warnings: Vec::new(),
    };

    let mut compiled: Vec<RemoteFilter> = groups
        .iter()
        .enumerate()
        .filter_map(|(index, group)| compiler.group(group, vec![index]))
        .collect();

    let filter = match compiled.len() {
        0 => None,
        1 => compiled.pop().map(flatten),
        _ => Some(flatten(RemoteFilter::And(compiled))),
    };

    Compiled {
        filter,
        warnings: compiler.warnings,
    }
}

/// Merges nested compounds that share their parent's key.
///
/// `{and: [{and: [a, b]}, c]}` becomes `{and: [a, b, c]}`; an `or` inside an
/// `and` (or the reverse) is left alone.
pub fn flatten(filter: RemoteFilter) -> RemoteFilter {
    match filter {
        RemoteFilter::And(children) => RemoteFilter::And(
            children
                .into_iter()
                .map(flatten)
                .flat_map(|child| match child {
                    RemoteFilter::And(inner) => inner,
                    other => vec![other],
                })
                .collect(),
        ),
        RemoteFilter::Or(children) => RemoteFilter::Or(
            children
                .into_iter()
                .map(flatten)
                .flat_map(|child| match child {
                    RemoteFilter::Or(inner) => inner,
                    other => vec![other],
                })
                .collect(),
        ),
        leaf @ RemoteFilter::Property(_) => leaf,
    }
}

struct Compiler<'a> {
    properties: &'a [PropertyDescriptor],
    warnings: Vec<FilterWarning>,
}

impl Compiler<'_> {
    fn group(&mut self, group: &FilterGroup, path: Vec<usize>) -> Option<RemoteFilter> {
        let mut items = Vec::with_capacity(group.conditions.len() + group.subgroups.len());

        for (index, condition) in group.conditions.iter().enumerate() {
            match compile_condition(condition, self.properties) {
                Ok(filter) => items.push(filter),
                Err(kind) => self
                    .warnings
                    .push(FilterWarning::new(path.clone(), index, condition, kind)),
            }
        }

        for (index, subgroup) in group.subgroups.iter().enumerate() {
            let mut child_path = path.clone();
            child_path.push(index);
            if let Some(filter) = self.group(subgroup, child_path) {
                items.push(filter);
            }
        }

        match items.len() {
            0 => None,
            1 => items.pop(),
            _ => Some(RemoteFilter::compound(group.logical_operator, items)),
        }
    }
}

/// Compiles a single condition, or explains why it must be dropped.
pub(super) fn compile_condition(
    condition: &FilterCondition,
    properties: &[PropertyDescriptor],
) -> Result<RemoteFilter, WarningKind> {
    let property = condition.property.trim();
    if property.is_empty() {
        return Err(WarningKind::MissingProperty);
    }

    let raw_operator = condition.operator.trim();
    if raw_operator.is_empty() {
        return Err(WarningKind::MissingOperator);
    }

    let operator = FilterOperator::parse(raw_operator)
        .ok_or_else(|| WarningKind::UnknownOperator(raw_operator.to_string()))?;

    let resolved = resolve_property(properties, property);
    if !resolved.family.allows(operator) {
        return Err(WarningKind::OperatorNotAllowed {
            operator,
            family: resolved.family,
        });
    }

    let leaf = |operator: FilterOperator, operand: Operand| {
        RemoteFilter::Property(PropertyFilter {
            property: property.to_string(),
            key: resolved.key,
            operator,
            operand,
        })
    };

    match operator {
        FilterOperator::IsEmpty | FilterOperator::IsNotEmpty => Ok(leaf(operator, Operand::Flag)),
        FilterOperator::PastWeek | FilterOperator::PastMonth | FilterOperator::PastYear => {
            Ok(leaf(operator, Operand::EmptyObject))
        }
        FilterOperator::Between => {
            let (start, end) = range_bounds(condition)?;
            if let (Some(from), Some(to)) = (parse_date(&start), parse_date(&end)) {
                if to < from {
                    return Err(WarningKind::InvertedDateRange);
                }
            }
            Ok(RemoteFilter::And(vec![
                leaf(FilterOperator::OnOrAfter, Operand::Value(start)),
                leaf(FilterOperator::OnOrBefore, Operand::Value(end)),
            ]))
        }
        _ => match condition.value.as_ref() {
            None => Err(WarningKind::MissingValue),
            Some(ConditionValue::Scalar(value)) => Ok(leaf(operator, Operand::Value(value.clone()))),
            Some(ConditionValue::List(values)) => {
                let fan_out = match (resolved.family, operator) {
                    (OperatorFamily::Select, FilterOperator::Contains) => {
                        Some((FilterOperator::Equals, LogicalOperator::Or))
                    }
                    (OperatorFamily::Select, FilterOperator::DoesNotContain) => {
                        Some((FilterOperator::DoesNotEqual, LogicalOperator::And))
                    }
                    (OperatorFamily::MultiSelect, FilterOperator::Contains) => {
                        Some((FilterOperator::Contains, LogicalOperator::Or))
                    }
                    (OperatorFamily::MultiSelect, FilterOperator::DoesNotContain) => {
                        Some((FilterOperator::DoesNotContain, LogicalOperator::And))
                    }
                    _ => None,
                };

                match (fan_out, values.as_slice()) {
                    (_, []) => Err(WarningKind::EmptyList),
                    (Some((sub_operator, _)), [single]) => {
                        Ok(leaf(sub_operator, Operand::Value(single.clone())))
                    }
                    (None, [single]) => Ok(leaf(operator, Operand::Value(single.clone()))),
                    (Some((sub_operator, logic)), many) => Ok(RemoteFilter::compound(
                        logic,
                        many.iter()
                            .map(|value| leaf(sub_operator, Operand::Value(value.clone())))
                            .collect(),
                    )),
                    (None, _) => Err(WarningKind::UnsupportedListValue),
                }
            }
        },
    }
}

fn range_bounds(condition: &FilterCondition) -> Result<(Scalar, Scalar), WarningKind> {
    let start = match condition.value.as_ref() {
        Some(ConditionValue::Scalar(value)) if !value.is_empty_text() => value.clone(),
        _ => return Err(WarningKind::MissingRangeBound),
    };
    let end = match condition.end_value.as_ref() {
        Some(value) if !value.is_empty_text() => value.clone(),
        _ => return Err(WarningKind::MissingRangeBound),
    };
    Ok((start, end))
}

/// Accepts RFC 3339 timestamps, naive date-times and plain `YYYY-MM-DD` dates.
fn parse_date(value: &Scalar) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(parsed.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
}
