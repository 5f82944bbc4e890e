use crate::error::{ReconcilerError, Result};
use crate::orchestrator::{ReconciliationResult, ResultStatus};
use crate::rules::RuleSet;
use crate::schema::{Statement, StatementData, StatementKind};
use crate::taxonomy::Taxonomy;
use crate::validator::{check_gross_adjustment, check_signed_rule, check_sum_rule, Violation};

/// Every rule of `rules` against `statement`, one ✓/✗ line per rule and column.
pub fn summary_report(statement: &Statement, rules: &RuleSet) -> String {
    let kind = statement.kind();
    let signed_rules = match kind {
        StatementKind::IncomeStatement => rules.signed_rules.as_slice(),
        StatementKind::BalanceSheet => &[],
    };

    let mut report = vec![
        format!("{} Validation Report - Year {}", kind, statement.year),
        "-".repeat(60),
        format!("Total rows: {}", statement.data.len()),
        format!("Sum rules: {}", rules.sum_rules.len()),
        format!("Signed rules: {}", signed_rules.len()),
        format!("Tolerance: {}", statement.tolerance),
        String::new(),
    ];
    let mut all_valid = true;

    let mut push_outcome = |report: &mut Vec<String>, label: String, key: &str, outcome: Option<Violation>| {
        report.push(label);
        match outcome {
            None => report.push(format!("  {}: ✓", key)),
            Some(violation) => {
                all_valid = false;
                report.push(format!("  {}: ✗", key));
                report.push(format!("    {}", violation));
            }
        }
    };

    for &column in kind.columns() {
        report.push(format!("Column: {}", column.key()));
        report.push("-".repeat(20));

        for (i, rule) in rules.sum_rules.iter().enumerate() {
            let outcome = check_sum_rule(&statement.data, rule, column, statement.tolerance);
            push_outcome(&mut report, format!("Sum rule {}: {}", i + 1, rule), column.key(), outcome);
        }
        for (i, rule) in signed_rules.iter().enumerate() {
            let outcome = check_signed_rule(&statement.data, rule, column, statement.tolerance);
            push_outcome(&mut report, format!("Signed rule {}: {}", i + 1, rule), column.key(), outcome);
        }
        report.push(String::new());
    }

    if let StatementData::BalanceSheet(rows) = &statement.data {
        let checked: Vec<_> = rows
            .iter()
            .filter(|(_, row)| row.gross.is_some() && row.adjustment.is_some())
            .collect();
        if !checked.is_empty() {
            report.push("Gross - adjustment = net".to_string());
            report.push("-".repeat(20));
            for (&id, row) in checked {
                let outcome = check_gross_adjustment(id, row, statement.tolerance);
                push_outcome(&mut report, format!("Row {}", id), "netto", outcome);
            }
            report.push(String::new());
        }
    }

    report.push(format!(
        "Overall Status: {}",
        if all_valid { "✓ VALID" } else { "✗ VALIDATION ERRORS" }
    ));
    report.join("\n")
}

/// Rows of a result's statement as CSV, with row names from `taxonomy`.
pub fn to_csv(result: &ReconciliationResult, taxonomy: &Taxonomy) -> Result<String> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    let name = |id| taxonomy.name(id).unwrap_or("").to_string();

    match result.statement.as_ref().map(|s| &s.data) {
        Some(StatementData::BalanceSheet(rows)) => {
            writer.write_record(["Row", "Name", "Brutto", "Korekce", "Netto", "Netto minule"])?;
            for (&id, row) in rows {
                writer.write_record([
                    id.to_string(),
                    name(id),
                    row.gross.map(|v| v.to_string()).unwrap_or_default(),
                    row.adjustment.map(|v| v.to_string()).unwrap_or_default(),
                    row.net.to_string(),
                    row.net_prior_year.to_string(),
                ])?;
            }
        }
        Some(StatementData::IncomeStatement(rows)) => {
            writer.write_record(["Row", "Name", "Současné", "Minulé"])?;
            for (&id, row) in rows {
                writer.write_record([
                    id.to_string(),
                    name(id),
                    row.current.to_string(),
                    row.prior.to_string(),
                ])?;
            }
        }
        None => writer.write_record(["Row", "Name"])?,
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ReconcilerError::Csv(e.into_error().into()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Batch overview: one section per result, then the cross-statement issues.
pub fn to_markdown(results: &[ReconciliationResult], issues: &[String]) -> String {
    let mut output = String::new();

    output.push_str("# Statement Reconciliation Report\n\n");

    for result in results {
        let year = result
            .year()
            .map(|y| y.to_string())
            .unwrap_or_else(|| "unknown year".to_string());
        output.push_str(&format!("## {} ({}, {})\n\n", result.file_name, result.kind, year));

        let status = match result.status {
            ResultStatus::Accepted => "✅ accepted",
            ResultStatus::Degraded => "⚠️ degraded",
        };
        output.push_str(&format!("**Status:** {}\n\n", status));
        output.push_str(&format!("**Attempts:** {}\n\n", result.attempts));

        if result.issues.is_empty() {
            output.push_str("No issues.\n\n");
        } else {
            for issue in &result.issues {
                output.push_str(&format!("- {}\n", issue));
            }
            output.push('\n');
        }
    }

    output.push_str("## Cross-statement Issues\n\n");
    if issues.is_empty() {
        output.push_str("None.\n");
    } else {
        for issue in issues {
            output.push_str(&format!("- {}\n", issue));
        }
    }

    output
}
