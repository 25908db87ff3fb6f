//! Bounded categorical value counts.

use serde::Serialize;
use std::collections::HashMap;

/// Per-column value → count map with a distinct-value cap.
///
/// When an unseen value arrives while the map already holds `cap` distinct
/// values, the counter switches to `Overflowed` and every count is frozen:
/// neither new nor already-tracked values change afterwards.
#[derive(Clone, Debug)]
pub enum CategoryFrequency {
    Bounded {
        counts: HashMap<String, u64>,
        cap: usize,
    },
    Overflowed {
        frozen: HashMap<String, u64>,
    },
}

/// Final snapshot of one column.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrequencyTable {
    /// Sorted by count descending, then value.
    pub values: Vec<(String, u64)>,
    pub distinct: usize,
    pub overflowed: bool,
}

impl CategoryFrequency {
    pub fn new(cap: usize) -> Self {
        CategoryFrequency::Bounded {
            counts: HashMap::new(),
            cap,
        }
    }

    pub fn add(&mut self, value: &str) {
        if value.trim().is_empty() {
            return;
        }
        let CategoryFrequency::Bounded { counts, cap } = self else {
            return;
        };
        if let Some(n) = counts.get_mut(value) {
            *n += 1;
            return;
        }
        if counts.len() >= *cap {
            let frozen = std::mem::take(counts);
            *self = CategoryFrequency::Overflowed { frozen };
            return;
        }
        counts.insert(value.to_string(), 1);
    }

    pub fn is_overflowed(&self) -> bool {
        matches!(self, CategoryFrequency::Overflowed { .. })
    }

    pub fn distinct(&self) -> usize {
        match self {
            CategoryFrequency::Bounded { counts, .. } => counts.len(),
            CategoryFrequency::Overflowed { frozen } => frozen.len(),
        }
    }

    pub fn finish(self) -> FrequencyTable {
        let overflowed = self.is_overflowed();
        let map = match self {
            CategoryFrequency::Bounded { counts, .. } => counts,
            CategoryFrequency::Overflowed { frozen } => frozen,
        };
        let mut values: Vec<(String, u64)> = map.into_iter().collect();
        values.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        FrequencyTable {
            distinct: values.len(),
            values,
            overflowed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_orders() {
        let mut f = CategoryFrequency::new(10);
        for v in ["OX", "FR", "OX", "", "  ", "TR", "OX", "FR"] {
            f.add(v);
        }
        let t = f.finish();
        assert!(!t.overflowed);
        assert_eq!(
            t.values,
            vec![("OX".into(), 3), ("FR".into(), 2), ("TR".into(), 1)]
        );
    }

    #[test]
    fn overflow_freezes_all_counts() {
        let mut f = CategoryFrequency::new(3);
        for v in ["a", "b", "c", "a"] {
            f.add(v);
        }
        assert!(!f.is_overflowed());
        f.add("d");
        assert!(f.is_overflowed());
        for v in ["a", "a", "e", "b"] {
            f.add(v);
        }
        assert_eq!(f.distinct(), 3);
        let t = f.finish();
        assert!(t.overflowed);
        assert_eq!(
            t.values,
            vec![("a".into(), 2), ("b".into(), 1), ("c".into(), 1)]
        );
    }
}
