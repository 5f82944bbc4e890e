use crate::rules::{render_terms, RuleSet, SignedRule, SumRule};
use crate::schema::{BalanceSheetRow, Column, RowId, Statement, StatementData, StatementKind};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One failed consistency check. The `Display` form is a single stable line
/// that [`crate::formatter::MessageFormatter`] knows how to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    Sum {
        column: Column,
        target: RowId,
        target_value: i64,
        sources: Vec<RowId>,
        computed: i128,
        difference: u128,
        tolerance: u64,
    },
    Signed {
        column: Column,
        target: RowId,
        target_value: i64,
        /// Only the terms whose rows were present.
        expression: String,
        computed: i128,
        difference: u128,
        tolerance: u64,
    },
    GrossAdjustment {
        row: RowId,
        gross: i64,
        adjustment: i128,
        expected_net: i128,
        net: i64,
        difference: u128,
        tolerance: u64,
    },
}

impl Violation {
    pub fn difference(&self) -> u128 {
        match self {
            Self::Sum { difference, .. }
            | Self::Signed { difference, .. }
            | Self::GrossAdjustment { difference, .. } => *difference,
        }
    }

    pub fn target(&self) -> RowId {
        match self {
            Self::Sum { target, .. } | Self::Signed { target, .. } => *target,
            Self::GrossAdjustment { row, .. } => *row,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sum {
                column,
                target,
                target_value,
                sources,
                computed,
                difference,
                tolerance,
            } => write!(
                f,
                "Rule validation failed for {}: Row {} ({}) != Sum of rows {} ({}) (difference: {}, tolerance: {})",
                column.key(),
                target,
                target_value,
                sources
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join("+"),
                computed,
                difference,
                tolerance
            ),
            Self::Signed {
                column,
                target,
                target_value,
                expression,
                computed,
                difference,
                tolerance,
            } => write!(
                f,
                "Flexible rule validation failed for {}: Row {} ({}) != {} ({}) (difference: {}, tolerance: {})",
                column.key(),
                target,
                target_value,
                expression,
                computed,
                difference,
                tolerance
            ),
            Self::GrossAdjustment {
                row,
                gross,
                adjustment,
                expected_net,
                net,
                difference,
                tolerance,
            } => write!(
                f,
                "Row {}: Brutto - Korekce validation failed: brutto ({}) - korekce ({}) = {}, but netto is {} (difference: {}, tolerance: {})",
                row, gross, adjustment, expected_net, net, difference, tolerance
            ),
        }
    }
}

/// All violations of one statement, rendered as a header plus one `- ` line each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub kind: StatementKind,
    pub tolerance: u64,
    pub violations: Vec<Violation>,
}

impl ValidationFailure {
    pub fn lines(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.to_string()).collect()
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation failed:", self.kind)?;
        for violation in &self.violations {
            write!(f, "\n- {}", violation)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}

/// Absolute gap between a target and its computed value, when it exceeds `tolerance`.
fn exceeds(target_value: i64, computed: i128, tolerance: u64) -> Option<u128> {
    let difference = (i128::from(target_value) - computed).unsigned_abs();
    (difference > u128::from(tolerance)).then_some(difference)
}

pub fn check_sum_rule(
    data: &StatementData,
    rule: &SumRule,
    column: Column,
    tolerance: u64,
) -> Option<Violation> {
    let target_value = data.value(rule.target, column).unwrap_or(0);
    let computed: i128 = rule
        .sources
        .iter()
        .filter_map(|&source| data.value(source, column))
        .map(i128::from)
        .sum();

    let difference = exceeds(target_value, computed, tolerance)?;
    Some(Violation::Sum {
        column,
        target: rule.target,
        target_value,
        sources: rule.sources.clone(),
        computed,
        difference,
        tolerance,
    })
}

pub fn check_signed_rule(
    data: &StatementData,
    rule: &SignedRule,
    column: Column,
    tolerance: u64,
) -> Option<Violation> {
    let target_value = data.value(rule.target, column).unwrap_or(0);

    let present: Vec<_> = rule
        .terms
        .iter()
        .filter(|term| data.contains(term.row))
        .collect();
    let computed: i128 = present
        .iter()
        .filter_map(|term| {
            data.value(term.row, column)
                .map(|v| i128::from(v) * i128::from(term.sign.factor()))
        })
        .sum();

    let difference = exceeds(target_value, computed, tolerance)?;
    Some(Violation::Signed {
        column,
        target: rule.target,
        target_value,
        expression: render_terms(present.into_iter()),
        computed,
        difference,
        tolerance,
    })
}

/// `net = gross - |adjustment|`, checked only when both gross and adjustment are present.
pub fn check_gross_adjustment(row_id: RowId, row: &BalanceSheetRow, tolerance: u64) -> Option<Violation> {
    let (gross, adjustment) = (row.gross?, row.adjustment?);
    let adjustment = i128::from(adjustment).abs();
    let expected_net = i128::from(gross) - adjustment;

    let difference = exceeds(row.net, expected_net, tolerance)?;
    Some(Violation::GrossAdjustment {
        row: row_id,
        gross,
        adjustment,
        expected_net,
        net: row.net,
        difference,
        tolerance,
    })
}

/// Evaluates every rule of a [`RuleSet`] against a statement. Never stops at
/// the first failure.
pub struct Validator<'a> {
    rules: &'a RuleSet,
}

impl<'a> Validator<'a> {
    pub fn new(rules: &'a RuleSet) -> Self {
        Self { rules }
    }

    pub fn validate(&self, statement: &Statement) -> Vec<Violation> {
        self.validate_with_tolerance(statement, statement.tolerance)
    }

    /// Row-level checks first (ascending row id), then per column the sum
    /// rules followed by the signed rules, each in rule-set order.
    pub fn validate_with_tolerance(&self, statement: &Statement, tolerance: u64) -> Vec<Violation> {
        let mut violations = Vec::new();

        if let StatementData::BalanceSheet(rows) = &statement.data {
            violations.extend(
                rows.iter()
                    .filter_map(|(&id, row)| check_gross_adjustment(id, row, tolerance)),
            );
        }

        for &column in statement.kind().columns() {
            for rule in &self.rules.sum_rules {
                violations.extend(check_sum_rule(&statement.data, rule, column, tolerance));
            }
            if statement.kind() == StatementKind::IncomeStatement {
                for rule in &self.rules.signed_rules {
                    violations.extend(check_signed_rule(&statement.data, rule, column, tolerance));
                }
            }
        }

        debug!(
            "{} {} checked against {} rules: {} violation(s)",
            statement.kind(),
            statement.year,
            self.rules.len(),
            violations.len()
        );

        violations
    }

    pub fn check(&self, statement: &Statement) -> Result<(), ValidationFailure> {
        let violations = self.validate(statement);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationFailure {
                kind: statement.kind(),
                tolerance: statement.tolerance,
                violations,
            })
        }
    }
}

impl Statement {
    /// Checks one ad-hoc sum rule, using the statement's tolerance unless overridden.
    pub fn check_rule(&self, rule: &SumRule, column: Column, tolerance: Option<u64>) -> Option<Violation> {
        check_sum_rule(&self.data, rule, column, tolerance.unwrap_or(self.tolerance))
    }

    pub fn check_signed_rule(
        &self,
        rule: &SignedRule,
        column: Column,
        tolerance: Option<u64>,
    ) -> Option<Violation> {
        check_signed_rule(&self.data, rule, column, tolerance.unwrap_or(self.tolerance))
    }
}
