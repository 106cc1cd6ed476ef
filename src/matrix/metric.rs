//! Metric descriptors and their numeric columns.
//!
//! A metric owns one column of the matrix grid: a typed value per instance
//! slot plus a validity bit per slot. The declared [`MetricType`] is fixed
//! at creation and controls how string values are parsed; narrow integer
//! kinds share a wide physical column but keep their parse bounds. All
//! derived-value arithmetic (delta, divide, scale) marks a cell invalid
//! rather than emitting a questionable number.

use crate::error::{AgentError, Result};

/// Declared storage kind of a metric, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
}

/// The transformation a counter needs during post-processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Property {
    /// Emit as-is, no delta arithmetic.
    Raw,
    /// Difference against the previous poll.
    Delta,
    /// Delta normalized by elapsed seconds.
    Rate,
    /// Delta divided by the delta of a base counter.
    Average,
    /// Average scaled by 100.
    Percent,
    #[default]
    None,
}

impl Property {
    pub fn as_str(&self) -> &'static str {
        match self {
            Property::Raw => "raw",
            Property::Delta => "delta",
            Property::Rate => "rate",
            Property::Average => "average",
            Property::Percent => "percent",
            Property::None => "",
        }
    }

    /// Map an ONTAP `properties` string (comma-separated) onto a property.
    /// Returns `None` when no known property is present.
    pub fn from_catalog(properties: &str) -> Option<Property> {
        if properties.contains("raw") {
            Some(Property::Raw)
        } else if properties.contains("delta") {
            Some(Property::Delta)
        } else if properties.contains("rate") {
            Some(Property::Rate)
        } else if properties.contains("average") {
            Some(Property::Average)
        } else if properties.contains("percent") {
            Some(Property::Percent)
        } else {
            None
        }
    }
}

impl std::str::FromStr for Property {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Property> {
        match s {
            "raw" => Ok(Property::Raw),
            "delta" => Ok(Property::Delta),
            "rate" => Ok(Property::Rate),
            "average" => Ok(Property::Average),
            "percent" => Ok(Property::Percent),
            "" => Ok(Property::None),
            other => Err(AgentError::Parse(format!("unknown property [{other}]"))),
        }
    }
}

/// Physical storage for a column. Narrow kinds widen into these.
#[derive(Debug, Clone)]
enum Cells {
    I64(Vec<i64>),
    U64(Vec<u64>),
    F64(Vec<f64>),
}

impl Cells {
    fn len(&self) -> usize {
        match self {
            Cells::I64(v) => v.len(),
            Cells::U64(v) => v.len(),
            Cells::F64(v) => v.len(),
        }
    }

    fn resize(&mut self, n: usize) {
        match self {
            Cells::I64(v) => v.resize(n, 0),
            Cells::U64(v) => v.resize(n, 0),
            Cells::F64(v) => v.resize(n, 0.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Metric {
    name: String,
    metric_type: MetricType,
    property: Property,
    comment: String,
    unit: String,
    exportable: bool,
    labels: Vec<(String, String)>,
    cells: Cells,
    record: Vec<bool>,
}

impl Metric {
    pub(crate) fn new(name: &str, metric_type: MetricType, slots: usize) -> Self {
        let cells = match metric_type {
            MetricType::Int8 | MetricType::Int16 | MetricType::Int32 | MetricType::Int64 => {
                Cells::I64(vec![0; slots])
            }
            MetricType::Uint8 | MetricType::Uint16 | MetricType::Uint32 | MetricType::Uint64 => {
                Cells::U64(vec![0; slots])
            }
            MetricType::Float32 | MetricType::Float64 => Cells::F64(vec![0.0; slots]),
        };
        Metric {
            name: name.to_string(),
            metric_type,
            property: Property::None,
            comment: String::new(),
            unit: String::new(),
            exportable: true,
            labels: Vec::new(),
            cells,
            record: vec![false; slots],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    pub fn property(&self) -> Property {
        self.property
    }

    pub fn set_property(&mut self, property: Property) {
        self.property = property;
    }

    /// The base-counter key for average/percent metrics; empty otherwise.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn set_comment(&mut self, comment: &str) {
        self.comment = comment.to_string();
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn set_unit(&mut self, unit: &str) {
        self.unit = unit.to_string();
    }

    pub fn is_exportable(&self) -> bool {
        self.exportable
    }

    pub fn set_exportable(&mut self, exportable: bool) {
        self.exportable = exportable;
    }

    pub fn set_label(&mut self, name: &str, value: &str) {
        if let Some(entry) = self.labels.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value.to_string();
        } else {
            self.labels.push((name.to_string(), value.to_string()));
        }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Array-element metrics carry `metric` (and `submetric`) labels.
    pub fn has_labels(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub(crate) fn grow(&mut self, slots: usize) {
        if slots > self.cells.len() {
            self.cells.resize(slots);
            self.record.resize(slots, false);
        }
    }

    pub(crate) fn truncate(&mut self) {
        self.cells.resize(0);
        self.record.clear();
    }

    /// Clear every validity bit; values are untouched.
    pub fn reset(&mut self) {
        for r in self.record.iter_mut() {
            *r = false;
        }
    }

    pub fn set_value_string(&mut self, slot: usize, value: &str) -> Result<()> {
        enum Parsed {
            I(i64),
            U(u64),
            F(f64),
        }
        let parsed = (|| -> std::result::Result<Parsed, String> {
            Ok(match self.metric_type {
                MetricType::Int8 => Parsed::I(value.parse::<i8>().map_err(|e| e.to_string())? as i64),
                MetricType::Int16 => Parsed::I(value.parse::<i16>().map_err(|e| e.to_string())? as i64),
                MetricType::Int32 => Parsed::I(value.parse::<i32>().map_err(|e| e.to_string())? as i64),
                MetricType::Int64 => Parsed::I(value.parse::<i64>().map_err(|e| e.to_string())?),
                MetricType::Uint8 => Parsed::U(value.parse::<u8>().map_err(|e| e.to_string())? as u64),
                MetricType::Uint16 => Parsed::U(value.parse::<u16>().map_err(|e| e.to_string())? as u64),
                MetricType::Uint32 => Parsed::U(value.parse::<u32>().map_err(|e| e.to_string())? as u64),
                MetricType::Uint64 => Parsed::U(value.parse::<u64>().map_err(|e| e.to_string())?),
                MetricType::Float32 => Parsed::F(value.parse::<f32>().map_err(|e| e.to_string())? as f64),
                MetricType::Float64 => Parsed::F(value.parse::<f64>().map_err(|e| e.to_string())?),
            })
        })()
        .map_err(|e| AgentError::Parse(format!("({}) value [{}]: {}", self.name, value, e)))?;

        match (&mut self.cells, parsed) {
            (Cells::I64(v), Parsed::I(x)) => v[slot] = x,
            (Cells::U64(v), Parsed::U(x)) => v[slot] = x,
            (Cells::F64(v), Parsed::F(x)) => v[slot] = x,
            // metric_type and cells are constructed together; other
            // combinations cannot occur
            _ => unreachable!(),
        }
        self.record[slot] = true;
        Ok(())
    }

    /// Parse and accumulate on top of the current cell value. An invalid
    /// cell counts as zero.
    pub fn add_value_string(&mut self, slot: usize, value: &str) -> Result<()> {
        let current = if self.record[slot] {
            self.value_f64(slot).unwrap_or(0.0)
        } else {
            0.0
        };
        self.set_value_string(slot, value)?;
        let parsed = self.value_f64(slot).unwrap_or(0.0);
        self.set_value_f64(slot, current + parsed);
        Ok(())
    }

    pub fn set_value_f64(&mut self, slot: usize, value: f64) {
        match &mut self.cells {
            Cells::I64(v) => v[slot] = value as i64,
            Cells::U64(v) => v[slot] = value as u64,
            Cells::F64(v) => v[slot] = value,
        }
        self.record[slot] = true;
    }

    pub fn value_f64(&self, slot: usize) -> Option<f64> {
        if slot >= self.record.len() || !self.record[slot] {
            return None;
        }
        Some(match &self.cells {
            Cells::I64(v) => v[slot] as f64,
            Cells::U64(v) => v[slot] as f64,
            Cells::F64(v) => v[slot],
        })
    }

    fn raw_f64(&self, slot: usize) -> f64 {
        match &self.cells {
            Cells::I64(v) => v[slot] as f64,
            Cells::U64(v) => v[slot] as f64,
            Cells::F64(v) => v[slot],
        }
    }

    /// Subtract the previous poll's column from this one, in place.
    /// A cell stays valid only when both sides were valid. Unsigned
    /// columns treat `prev > cur` (counter reset) as invalid.
    pub fn delta(&mut self, prev: &Metric) {
        let n = self.record.len().min(prev.record.len());
        match (&mut self.cells, &prev.cells) {
            (Cells::I64(cur), Cells::I64(old)) => {
                for i in 0..n {
                    self.record[i] = self.record[i] && prev.record[i];
                    if self.record[i] {
                        cur[i] = cur[i].wrapping_sub(old[i]);
                    }
                }
            }
            (Cells::U64(cur), Cells::U64(old)) => {
                for i in 0..n {
                    self.record[i] = self.record[i] && prev.record[i] && cur[i] >= old[i];
                    if self.record[i] {
                        cur[i] -= old[i];
                    }
                }
            }
            (Cells::F64(cur), Cells::F64(old)) => {
                for i in 0..n {
                    self.record[i] = self.record[i] && prev.record[i];
                    if self.record[i] {
                        cur[i] -= old[i];
                    }
                }
            }
            _ => {
                // type mismatch between polls: nothing usable
                for r in self.record.iter_mut() {
                    *r = false;
                }
            }
        }
        for i in n..self.record.len() {
            self.record[i] = false;
        }
    }

    /// Element-wise division by a base column. A zero or invalid
    /// denominator invalidates the cell.
    pub fn divide(&mut self, base: &Metric) {
        self.divide_where(base, |b| b != 0.0);
    }

    /// Division with a denominator floor: below `threshold` the quotient
    /// is meaningless (too few operations to average over) and the cell
    /// is invalidated.
    pub fn divide_with_threshold(&mut self, base: &Metric, threshold: f64) {
        self.divide_where(base, |b| b != 0.0 && b >= threshold);
    }

    fn divide_where(&mut self, base: &Metric, ok: impl Fn(f64) -> bool) {
        for i in 0..self.record.len() {
            if !self.record[i] {
                continue;
            }
            match base.value_f64(i) {
                Some(b) if ok(b) => {
                    let q = self.raw_f64(i) / b;
                    self.set_value_f64(i, q);
                }
                _ => self.record[i] = false,
            }
        }
    }

    /// Scale every valid cell in place.
    pub fn multiply_by_scalar(&mut self, k: f64) {
        for i in 0..self.record.len() {
            if self.record[i] {
                let v = self.raw_f64(i) * k;
                self.set_value_f64(i, v);
            }
        }
    }
}
