//! Row records and the per-pass row evaluator.

use crate::schema::ColumnType;
use crate::script::{Filter, Script, Value};
use crate::sniff::{clean_field, is_null_sentinel, parse_number};
use crate::{ScanError, ScanResult};
use std::collections::HashMap;

/// Name → slot mapping for one pass. Header columns come first; names first
/// seen in scripts are appended.
#[derive(Debug, Clone, Default)]
pub struct RowLayout {
    names: Vec<String>,
    index: HashMap<String, usize>,
    header_len: usize,
}

impl RowLayout {
    pub fn from_header(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self {
            header_len: names.len(),
            names,
            index,
        }
    }

    /// Slot for `name`, allocating one if the name is new.
    pub fn slot(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let i = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), i);
        i
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn name(&self, slot: usize) -> &str {
        &self.names[slot]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }
}

/// One evaluated row. Reused across rows of a pass.
#[derive(Debug, Clone, Default)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(width: usize) -> Self {
        Self {
            values: vec![Value::Null; width],
        }
    }

    /// Fill header slots from raw fields, coercing numeric columns; reset
    /// script-owned slots to null.
    pub fn fill(&mut self, raw: &[String], types: &[ColumnType]) {
        for (i, slot) in self.values.iter_mut().enumerate() {
            *slot = match (raw.get(i), types.get(i)) {
                (Some(field), Some(kind)) => coerce(clean_field(field), *kind),
                _ => Value::Null,
            };
        }
    }

    pub fn get(&self, slot: usize) -> &Value {
        &self.values[slot]
    }

    pub fn number(&self, slot: usize) -> Option<f64> {
        self.values[slot].as_number()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [Value] {
        &mut self.values
    }
}

/// Best-effort coercion: an unparseable value in a numeric column stays text.
pub fn coerce(value: &str, kind: ColumnType) -> Value {
    match kind {
        ColumnType::Numeric => {
            if is_null_sentinel(value) {
                Value::Null
            } else {
                parse_number(value)
                    .map(Value::Num)
                    .unwrap_or_else(|| Value::Text(value.to_string()))
            }
        }
        ColumnType::Categorical => {
            if value.is_empty() {
                Value::Null
            } else {
                Value::Text(value.to_string())
            }
        }
    }
}

/// Outcome of evaluating one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admitted,
    Rejected,
    /// A filter failed at runtime; the row is excluded.
    FilterError,
}

/// Compiled derived-column script and filters for one pass.
#[derive(Debug, Clone, Default)]
pub struct RowEvaluator {
    derive: Option<Script>,
    filters: Vec<Filter>,
    derive_errors: u64,
    filter_errors: u64,
}

impl RowEvaluator {
    /// Compile the derived script first so filters can read the fields it adds.
    pub fn compile(
        layout: &mut RowLayout,
        derived: Option<&str>,
        filters: &[&str],
    ) -> ScanResult<Self> {
        let derive = derived
            .filter(|s| !s.trim().is_empty())
            .map(|s| Script::compile(s, layout))
            .transpose()
            .map_err(ScanError::ScriptCompile)?;
        let filters = filters
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| Filter::compile(s, layout))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ScanError::FilterCompile)?;
        Ok(Self {
            derive,
            filters,
            ..Default::default()
        })
    }

    pub fn script(&self) -> Option<&Script> {
        self.derive.as_ref()
    }

    /// Run the derived script. Errors leave partially derived fields in place.
    pub fn derive(&mut self, row: &mut Row) {
        if let Some(script) = &self.derive {
            if script.run(row.values_mut()).is_err() {
                self.derive_errors += 1;
            }
        }
    }

    /// Every filter must admit the row; a runtime failure excludes it.
    pub fn admit(&mut self, row: &Row) -> Verdict {
        for f in &self.filters {
            match f.eval(row.values()) {
                Ok(true) => {}
                Ok(false) => return Verdict::Rejected,
                Err(_) => {
                    self.filter_errors += 1;
                    return Verdict::FilterError;
                }
            }
        }
        Verdict::Admitted
    }

    pub fn evaluate(&mut self, row: &mut Row) -> Verdict {
        self.derive(row);
        self.admit(row)
    }

    pub fn derive_errors(&self) -> u64 {
        self.derive_errors
    }

    pub fn filter_errors(&self) -> u64 {
        self.filter_errors
    }

    /// Slots the script writes that are not header columns, in assignment order.
    pub fn derived_slots(&self, layout: &RowLayout) -> Vec<usize> {
        self.derive
            .as_ref()
            .map(|s| {
                s.assigned()
                    .iter()
                    .copied()
                    .filter(|&slot| slot >= layout.header_len())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Pick a type for each derived slot: declared type, then a script hint, then a
/// majority vote over preview rows (no non-null values means numeric).
///
/// Preview evaluation runs on a copy, so the pass counters stay untouched.
pub fn infer_derived_types(
    evaluator: &RowEvaluator,
    layout: &RowLayout,
    declared: &HashMap<String, ColumnType>,
    preview: &[Vec<String>],
    header_types: &[ColumnType],
) -> Vec<(usize, ColumnType)> {
    let slots = evaluator.derived_slots(layout);
    let hints: HashMap<String, ColumnType> = evaluator
        .script()
        .map(|s| s.hints().iter().cloned().collect())
        .unwrap_or_default();

    let mut votes = vec![(0u64, 0u64); slots.len()];
    if !preview.is_empty() && !slots.is_empty() {
        let mut evaluator = evaluator.clone();
        let mut row = Row::new(layout.len());
        for raw in preview {
            row.fill(raw, header_types);
            evaluator.derive(&mut row);
            for (k, &slot) in slots.iter().enumerate() {
                match row.get(slot) {
                    Value::Null => {}
                    Value::Num(_) => votes[k].0 += 1,
                    v if v.as_number().is_some() => votes[k].0 += 1,
                    _ => votes[k].1 += 1,
                }
            }
        }
    }

    slots
        .iter()
        .zip(votes)
        .map(|(&slot, (numeric, other))| {
            let name = layout.name(slot);
            let kind = declared
                .get(name)
                .or_else(|| hints.get(name))
                .copied()
                .unwrap_or(if numeric >= other {
                    ColumnType::Numeric
                } else {
                    ColumnType::Categorical
                });
            (slot, kind)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn coercion_is_best_effort() {
        assert_eq!(coerce("1.5", ColumnType::Numeric), Value::Num(1.5));
        assert_eq!(coerce("-999", ColumnType::Numeric), Value::Null);
        assert_eq!(coerce("n.d.", ColumnType::Numeric), Value::Text("n.d.".into()));
        assert_eq!(coerce("", ColumnType::Categorical), Value::Null);
        assert_eq!(coerce("12", ColumnType::Categorical), Value::Text("12".into()));
    }

    #[test]
    fn filter_error_excludes_only_that_row() {
        let mut layout = RowLayout::from_header(strings(&["au", "rock"]));
        let mut ev = RowEvaluator::compile(&mut layout, None, &["r.au * 2 > 1"]).unwrap();
        let types = [ColumnType::Numeric, ColumnType::Categorical];
        let mut row = Row::new(layout.len());

        let mut verdicts = Vec::new();
        for raw in [["1", "OX"], ["bad", "OX"], ["0.1", "FR"]] {
            row.fill(&strings(&raw), &types);
            verdicts.push(ev.evaluate(&mut row));
        }
        assert_eq!(
            verdicts,
            vec![Verdict::Admitted, Verdict::FilterError, Verdict::Rejected]
        );
        assert_eq!(ev.filter_errors(), 1);
    }

    #[test]
    fn compile_errors_are_routed() {
        let mut layout = RowLayout::from_header(strings(&["au"]));
        assert!(matches!(
            RowEvaluator::compile(&mut layout, None, &["r.au >"]),
            Err(ScanError::FilterCompile(_))
        ));
        assert!(matches!(
            RowEvaluator::compile(&mut layout, Some("r.x = nosuch()"), &[]),
            Err(ScanError::ScriptCompile(_))
        ));
    }

    #[test]
    fn derived_types_follow_meta_hint_then_vote() {
        let mut layout = RowLayout::from_header(strings(&["au", "rock"]));
        let ev = RowEvaluator::compile(
            &mut layout,
            Some("r.g = r.au * 2; r.c = lower(r.rock); r.h = r.au; r.k = r.au; numeric('h')"),
            &[],
        )
        .unwrap();
        let types = [ColumnType::Numeric, ColumnType::Categorical];
        let preview = vec![strings(&["1", "OX"]), strings(&["2", "FR"])];
        let mut declared = HashMap::new();
        declared.insert("k".to_string(), ColumnType::Categorical);

        let inferred = infer_derived_types(&ev, &layout, &declared, &preview, &types);
        let by_name: Vec<(&str, ColumnType)> = inferred
            .iter()
            .map(|(slot, t)| (layout.name(*slot), *t))
            .collect();
        assert_eq!(
            by_name,
            vec![
                ("g", ColumnType::Numeric),
                ("c", ColumnType::Categorical),
                ("h", ColumnType::Numeric),
                ("k", ColumnType::Categorical),
            ]
        );
        assert_eq!(ev.derive_errors(), 0);
    }

    #[test]
    fn derive_error_leaves_partial_fields() {
        let mut layout = RowLayout::from_header(strings(&["rock"]));
        let mut ev =
            RowEvaluator::compile(&mut layout, Some("r.a = 1; r.b = r.rock / 2"), &[]).unwrap();
        let mut row = Row::new(layout.len());
        row.fill(&strings(&["OX"]), &[ColumnType::Categorical]);
        assert_eq!(ev.evaluate(&mut row), Verdict::Admitted);
        assert_eq!(ev.derive_errors(), 1);
        assert_eq!(row.get(1), &Value::Num(1.0));
        assert_eq!(row.get(2), &Value::Null);
    }
}
