//! Delimiter detection, field cleaning and column type voting.

use crate::schema::ColumnType;

/// Candidate delimiters, in tie-break order.
pub const DELIMITERS: [u8; 5] = [b',', b'\t', b';', b'|', b' '];

/// A column with more than this share of numeric votes is numeric.
pub const NUMERIC_MAJORITY: f64 = 0.8;

pub const COMMENT_PREFIX: u8 = b'#';

/// Tokens that mean "no value" rather than a number or a category.
pub const NULL_SENTINELS: &[&str] = &[
    "", "na", "n/a", "nan", "null", "none", "*", "-", "-999", "-9999", "-99999", "#n/a", "void",
    "-1e30", "-1.0e30", "-1e+30", "-1.0e+30", "1e30", "1e+30", "1.0e+30",
];

/// Placeholder magnitudes used by mining packages for "no value".
const PLACEHOLDER_MAGNITUDE: f64 = 1.0e30;

pub fn is_null_sentinel(value: &str) -> bool {
    let v = value.trim();
    if NULL_SENTINELS.iter().any(|s| s.eq_ignore_ascii_case(v)) {
        return true;
    }
    matches!(v.parse::<f64>(), Ok(x) if x.abs() >= PLACEHOLDER_MAGNITUDE || x == -999.0 || x == -9999.0)
}

/// Parse a trimmed field as a finite-or-infinite float; `None` when not numeric.
pub fn parse_number(value: &str) -> Option<f64> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    v.parse::<f64>().ok().filter(|x| !x.is_nan())
}

/// Trim whitespace and strip one pair of surrounding quotes.
pub fn clean_field(raw: &str) -> &str {
    let t = raw.trim();
    let bytes = t.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return t[1..t.len() - 1].trim();
        }
    }
    t
}

/// Count fields in a line, ignoring delimiters inside double quotes.
fn field_count(line: &[u8], delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 1;
    for &b in line {
        if b == b'"' {
            in_quotes = !in_quotes;
        } else if b == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// Split a sample into non-empty, non-comment lines, at most `max_lines`.
///
/// The final line is dropped when the sample ends mid-line.
pub fn sample_lines(sample: &[u8], max_lines: usize, complete: bool) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0usize;
    let mut ends: Vec<usize> = memchr::memchr_iter(b'\n', sample).collect();
    if complete && start < sample.len() {
        ends.push(sample.len());
    }
    for end in ends {
        let mut line = &sample[start..end];
        start = end + 1;
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        if line.iter().all(|b| b.is_ascii_whitespace()) || line.first() == Some(&COMMENT_PREFIX) {
            continue;
        }
        lines.push(line);
        if lines.len() >= max_lines {
            break;
        }
    }
    lines
}

/// Pick the delimiter for `lines`.
///
/// A candidate that splits every line into the same number (> 1) of fields
/// beats any candidate that does not; within each class more fields win and
/// ties go to the earlier candidate in [`DELIMITERS`].
pub fn detect_delimiter(lines: &[&[u8]]) -> u8 {
    let Some(first) = lines.first() else {
        return DELIMITERS[0];
    };
    let mut best = DELIMITERS[0];
    let mut best_score = (false, 0usize);
    for &d in DELIMITERS.iter() {
        let head = field_count(first, d);
        let consistent = head > 1 && lines.iter().all(|l| field_count(l, d) == head);
        let score = (consistent, head);
        if score > best_score {
            best = d;
            best_score = score;
        }
    }
    best
}

/// Clean header names: blank names get a positional name, duplicates a suffix.
pub fn clean_header(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for (i, name) in raw.iter().enumerate() {
        let cleaned = clean_field(name);
        let base = if cleaned.is_empty() {
            format!("column_{}", i + 1)
        } else {
            cleaned.to_string()
        };
        let mut candidate = base.clone();
        let mut n = 2;
        while out.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        out.push(candidate);
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeVotes {
    pub numeric: u64,
    pub non_numeric: u64,
}

impl TypeVotes {
    pub fn total(&self) -> u64 {
        self.numeric + self.non_numeric
    }

    /// Numeric when nothing was seen, nothing contradicted it, or the numeric
    /// share exceeds [`NUMERIC_MAJORITY`].
    pub fn resolve(&self) -> ColumnType {
        let total = self.total();
        if total == 0
            || self.non_numeric == 0
            || self.numeric as f64 / total as f64 > NUMERIC_MAJORITY
        {
            ColumnType::Numeric
        } else {
            ColumnType::Categorical
        }
    }
}

/// Incremental per-column type vote over the first rows of a pass.
#[derive(Debug, Clone)]
pub struct TypeDetector {
    votes: Vec<TypeVotes>,
    resolved: Vec<Option<ColumnType>>,
    min_votes: u64,
    max_rows: usize,
    rows: usize,
}

impl TypeDetector {
    /// `overrides[i]` fixes column `i` without voting.
    pub fn new(overrides: Vec<Option<ColumnType>>, min_votes: u64, max_rows: usize) -> Self {
        Self {
            votes: vec![TypeVotes::default(); overrides.len()],
            resolved: overrides,
            min_votes,
            max_rows,
            rows: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.rows >= self.max_rows || self.resolved.iter().all(Option::is_some)
    }

    pub fn observe(&mut self, fields: &[String]) {
        if self.is_done() {
            return;
        }
        self.rows += 1;
        for (i, raw) in fields.iter().enumerate().take(self.votes.len()) {
            if self.resolved[i].is_some() {
                continue;
            }
            let value = clean_field(raw);
            if is_null_sentinel(value) {
                continue;
            }
            let votes = &mut self.votes[i];
            if parse_number(value).is_some() {
                votes.numeric += 1;
            } else {
                votes.non_numeric += 1;
            }
            if votes.total() >= self.min_votes {
                self.resolved[i] = Some(votes.resolve());
            }
        }
    }

    pub fn votes(&self) -> &[TypeVotes] {
        &self.votes
    }

    /// Resolve every column, using whatever votes were collected for unresolved ones.
    pub fn finish(self) -> Vec<ColumnType> {
        self.resolved
            .into_iter()
            .zip(self.votes)
            .map(|(r, v)| r.unwrap_or_else(|| v.resolve()))
            .collect()
    }
}
