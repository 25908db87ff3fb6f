use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    #[serde(alias = "category", alias = "text")]
    Categorical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnOrigin {
    Header,
    Derived,
}

/// Per-column value exclusions applied before statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValueFilter {
    pub exclude_zero: bool,
    pub exclude_negative: bool,
}

impl ValueFilter {
    pub fn excludes(&self, v: f64) -> bool {
        (self.exclude_zero && v == 0.0) || (self.exclude_negative && v < 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    /// Slot in the row record
    pub index: usize,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    pub origin: ColumnOrigin,
    pub skipped: bool,
    pub filter: ValueFilter,
}

/// Resolved columns of one pass: header columns first, then derived columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn numeric(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnType::Numeric && !c.skipped)
    }

    pub fn categorical(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnType::Categorical && !c.skipped)
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}
