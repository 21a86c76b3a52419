use std::{collections::HashMap, sync::Arc};

use chrono::NaiveDate;
use serde::{ser::SerializeMap, Serialize};

use crate::metrics::kinds::{MetricKind, DELAY_RANGES};

/// Secondary attack rates at or above this are not believable and are left
/// out of the terse summary.
pub const MAX_PLAUSIBLE_SECONDARY_ATTACK_RATE: f64 = 0.20;

/// Receives the formatted output, one line at a time.
pub trait LineSink {
    fn emit_line(&mut self, line: &str);
}

impl<F: FnMut(&str)> LineSink for F {
    fn emit_line(&mut self, line: &str) {
        self(line)
    }
}

/// Sink that keeps every line in memory.
#[derive(Debug, Default, Clone)]
pub struct CollectLines(pub Vec<String>);

impl LineSink for CollectLines {
    fn emit_line(&mut self, line: &str) {
        self.0.push(line.to_string());
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardLines;

impl LineSink for DiscardLines {
    fn emit_line(&mut self, _line: &str) {}
}

/// Ordered column names. Fixed for a given set of tracked metrics and
/// number of classification categories.
#[derive(Debug, Clone, PartialEq)]
pub struct RowLayout {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl RowLayout {
    pub fn new(tracked: &[(MetricKind, usize)], num_categories: usize) -> Self {
        let mut columns = vec!["scale".to_string()];
        for (kind, width) in tracked {
            let prefix = kind.column_prefix();
            for bucket in 0..*width {
                columns.push(format!("{prefix}_{bucket}"));
            }
            columns.push(format!("{prefix}_sd"));
            columns.push(format!("{prefix}_days"));
        }
        for name in [
            "consent_rate",
            "notification_share",
            "claim_rate",
            "secondary_attack_rate",
            "excess_secondary_attack_rate",
            "background_rate",
            "from_exposure_dates",
        ] {
            columns.push(name.to_string());
        }
        for category in 0..num_categories {
            columns.push(format!("secondary_attack_rate_{category}"));
            columns.push(format!("excess_secondary_attack_rate_{category}"));
            columns.push(format!("background_rate_{category}"));
        }
        for category in 0..num_categories {
            for range in 0..DELAY_RANGES {
                columns.push(format!("exposure_cdf_{category}_{range}"));
            }
        }

        let index = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { columns, index }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    pub fn header_line(&self) -> String {
        let mut line = String::from("date");
        for column in &self.columns {
            line.push(',');
            line.push_str(column);
        }
        line
    }
}

/// One output row: a date and a numeric-or-blank value per column.
#[derive(Debug, Clone)]
pub struct OutputRow {
    pub date: NaiveDate,
    layout: Arc<RowLayout>,
    values: Vec<Option<f64>>,
}

impl OutputRow {
    pub fn new(date: NaiveDate, layout: Arc<RowLayout>) -> Self {
        let values = vec![None; layout.columns.len()];
        Self {
            date,
            layout,
            values,
        }
    }

    /// Sets a cell. Non-finite values are stored as blanks. Unknown columns
    /// are a programming error.
    pub fn set(&mut self, column: &str, value: Option<f64>) {
        let position = self.layout.position(column);
        debug_assert!(position.is_some(), "unknown column {column}");
        if let Some(position) = position {
            self.values[position] = value.filter(|v| v.is_finite());
        }
    }

    pub fn get(&self, column: &str) -> Option<f64> {
        let position = self.layout.position(column)?;
        self.values[position]
    }

    pub fn columns(&self) -> &[String] {
        self.layout.columns()
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// The aggregate secondary attack rate, when it is in a plausible range.
    pub fn terse_summary(&self) -> Option<f64> {
        let plausible = 0.0..MAX_PLAUSIBLE_SECONDARY_ATTACK_RATE;
        self.get("secondary_attack_rate")
            .filter(|rate| plausible.contains(rate))
    }

    /// Comma-separated line matching [`RowLayout::header_line`]. Blank cells
    /// are empty fields.
    pub fn to_line(&self) -> String {
        let mut line = self.date.to_string();
        for value in &self.values {
            line.push(',');
            if let Some(value) = value {
                line.push_str(&value.to_string());
            }
        }
        line
    }
}

impl Serialize for OutputRow {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.values.len() + 1))?;
        map.serialize_entry("date", &self.date)?;
        for (column, value) in self.layout.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}
