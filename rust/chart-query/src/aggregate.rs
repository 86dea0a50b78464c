//! Group-by/aggregate over normalized rows, producing chart series.

use crate::normalize::normalize_cell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Y field sentinel selecting record counts instead of a numeric column.
pub const COUNT_FIELD: &str = "__count__";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    #[default]
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateFunction {
    /// Case-insensitive; anything unrecognized aggregates as `SUM`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AVG" => AggregateFunction::Avg,
            "MIN" => AggregateFunction::Min,
            "MAX" => AggregateFunction::Max,
            "COUNT" => AggregateFunction::Count,
            _ => AggregateFunction::Sum,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Count => "COUNT",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDataPoint {
    pub x: String,
    pub y: f64,
    pub label: String,
    pub aggregate_function: String,
    pub original_count: usize,
    pub value_count: usize,
}

#[derive(Debug)]
struct Bucket {
    key: String,
    label: String,
    values: Vec<f64>,
    rows: usize,
}

impl Bucket {
    fn finish(self, function: AggregateFunction) -> ChartDataPoint {
        let sum = || self.values.iter().sum::<f64>();
        let y = match function {
            AggregateFunction::Sum => sum(),
            AggregateFunction::Avg if self.values.is_empty() => 0.0,
            AggregateFunction::Avg => sum() / self.values.len() as f64,
            AggregateFunction::Min => self.values.iter().copied().fold(f64::INFINITY, f64::min),
            AggregateFunction::Max => self
                .values
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max),
            AggregateFunction::Count => self.rows as f64,
        };

        ChartDataPoint {
            x: self.key,
            y,
            label: self.label,
            aggregate_function: function.as_str().to_string(),
            original_count: self.rows,
            value_count: self.values.len(),
        }
    }
}

/// Groups `rows` by the normalized X value and folds one aggregate per group.
///
/// Points come back in first-seen order of their X key. When `y_field` is
/// [`COUNT_FIELD`] the function is forced to `COUNT`. Y values that do not
/// coerce to a number count as `0`, in the sum and in the `AVG` denominator.
pub fn aggregate(
    rows: &[Value],
    x_field: &str,
    y_field: &str,
    label_field: Option<&str>,
    function: AggregateFunction,
) -> Vec<ChartDataPoint> {
    let count_mode = y_field == COUNT_FIELD || function == AggregateFunction::Count;
    let function = if count_mode {
        AggregateFunction::Count
    } else {
        function
    };

    let mut buckets: Vec<Bucket> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let key = normalize_cell(row, x_field).to_string();
        let y = if count_mode {
            1.0
        } else {
            normalize_cell(row, y_field).to_number()
        };

        let slot = match index.get(&key) {
            Some(slot) => *slot,
            None => {
                let label = match label_field {
                    Some(field) if !field.is_empty() => normalize_cell(row, field).to_string(),
                    _ => key.clone(),
                };
                buckets.push(Bucket {
                    key: key.clone(),
                    label,
                    values: Vec::new(),
                    rows: 0,
                });
                index.insert(key, buckets.len() - 1);
                buckets.len() - 1
            }
        };

        let bucket = &mut buckets[slot];
        bucket.values.push(y);
        bucket.rows += 1;
    }

    buckets
        .into_iter()
        .map(|bucket| bucket.finish(function))
        .collect()
}
