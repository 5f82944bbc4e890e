use crate::schema::{Column, RowId, StatementKind};
use crate::taxonomy::Taxonomy;
use crate::validator::Violation;
use regex::{Captures, Regex};
use std::sync::OnceLock;

struct Patterns {
    sum: Regex,
    signed: Regex,
    gross_adjustment: Regex,
    term: Regex,
    bare_row: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        sum: Regex::new(
            r"^Rule validation failed for (\S+): Row (\d+) \((-?\d+)\) != Sum of rows ([\d+]*) \((-?\d+)\) \(difference: (\d+), tolerance: (\d+)\)$",
        )
        .expect("sum pattern is valid"),
        signed: Regex::new(
            r"^Flexible rule validation failed for (\S+): Row (\d+) \((-?\d+)\) != ([-+\d]*) \((-?\d+)\) \(difference: (\d+), tolerance: (\d+)\)$",
        )
        .expect("signed pattern is valid"),
        gross_adjustment: Regex::new(
            r"^Row (\d+): Brutto - Korekce validation failed: brutto \((-?\d+)\) - korekce \((-?\d+)\) = (-?\d+), but netto is (-?\d+) \(difference: (\d+), tolerance: (\d+)\)$",
        )
        .expect("gross/adjustment pattern is valid"),
        term: Regex::new(r"([+-]?)(\d+)").expect("term pattern is valid"),
        bare_row: Regex::new(r"\b[Rr]ow (\d+)\b").expect("row pattern is valid"),
    })
}

/// Turns raw violation lines into short diagnostics with row names resolved.
/// Every input line yields exactly one output line; lines of an unknown shape
/// only get their row references labelled.
pub struct MessageFormatter<'a> {
    kind: StatementKind,
    taxonomy: &'a Taxonomy,
}

impl<'a> MessageFormatter<'a> {
    pub fn new(kind: StatementKind, taxonomy: &'a Taxonomy) -> Self {
        Self { kind, taxonomy }
    }

    /// Accepts the text of a [`crate::validator::ValidationFailure`]: an
    /// optional header line followed by one `- ` prefixed line per violation.
    pub fn format_report(&self, report: &str) -> Vec<String> {
        report
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.ends_with("validation failed:"))
            .map(|line| self.format_line(line.strip_prefix("- ").unwrap_or(line)))
            .collect()
    }

    pub fn format_violations(&self, violations: &[Violation]) -> Vec<String> {
        violations
            .iter()
            .map(|v| self.format_line(&v.to_string()))
            .collect()
    }

    pub fn format_line(&self, line: &str) -> String {
        let p = patterns();

        p.sum
            .captures(line)
            .and_then(|c| self.sum_message(&c))
            .or_else(|| p.signed.captures(line).and_then(|c| self.signed_message(&c)))
            .or_else(|| {
                p.gross_adjustment
                    .captures(line)
                    .and_then(|c| self.gross_adjustment_message(&c))
            })
            .unwrap_or_else(|| self.label_rows(line))
    }

    fn sum_message(&self, c: &Captures) -> Option<String> {
        let column = self.column(&c[1]);
        let target: RowId = c[2].parse().ok()?;
        let target_value: i64 = c[3].parse().ok()?;
        let sources = c[4]
            .split('+')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<RowId>().map(|id| self.taxonomy.label(id)))
            .collect::<Result<Vec<_>, _>>()
            .ok()?;
        let computed: i128 = c[5].parse().ok()?;

        Some(format!(
            "{}: {} is {}, but the sum of {} is {}. {}",
            column,
            self.taxonomy.label(target),
            target_value,
            sources.join(" + "),
            computed,
            trailing_clause(&c[6], &c[7])
        ))
    }

    fn signed_message(&self, c: &Captures) -> Option<String> {
        let column = self.column(&c[1]);
        let target: RowId = c[2].parse().ok()?;
        let target_value: i64 = c[3].parse().ok()?;
        let computed: i128 = c[5].parse().ok()?;

        let mut expression = String::new();
        for term in patterns().term.captures_iter(&c[4]) {
            let row: RowId = term[2].parse().ok()?;
            match (&term[1], expression.is_empty()) {
                ("-", true) => expression.push_str("- "),
                ("-", false) => expression.push_str(" - "),
                (_, false) => expression.push_str(" + "),
                (_, true) => {}
            }
            expression.push_str(&self.taxonomy.label(row));
        }

        let rhs = if expression.is_empty() {
            format!("none of its component rows are present, giving {}", computed)
        } else {
            format!("{} gives {}", expression, computed)
        };

        Some(format!(
            "{}: {} is {}, but {}. {}",
            column,
            self.taxonomy.label(target),
            target_value,
            rhs,
            trailing_clause(&c[6], &c[7])
        ))
    }

    fn gross_adjustment_message(&self, c: &Captures) -> Option<String> {
        let row: RowId = c[1].parse().ok()?;
        Some(format!(
            "{}: gross {} minus adjustment {} is {}, but net is {}. {}",
            self.taxonomy.label(row),
            &c[2],
            &c[3],
            &c[4],
            &c[5],
            trailing_clause(&c[6], &c[7])
        ))
    }

    fn column(&self, key: &str) -> String {
        let label = Column::from_key(key)
            .map(|c| c.label().to_string())
            .unwrap_or_else(|| key.to_string());
        format!("{} ({})", self.kind, label)
    }

    fn label_rows(&self, line: &str) -> String {
        patterns()
            .bare_row
            .replace_all(line, |c: &Captures| match c[1].parse::<RowId>() {
                Ok(id) => self.taxonomy.label(id),
                Err(_) => c[0].to_string(),
            })
            .into_owned()
    }
}

fn trailing_clause(difference: &str, tolerance: &str) -> String {
    format!("Difference {} exceeds tolerance {}.", difference, tolerance)
}
