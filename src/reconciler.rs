use crate::orchestrator::{ReconciliationResult, ResultStatus};
use crate::rules::{StatementCatalog, BALANCE_SHEET_RESULT_ROW, INCOME_STATEMENT_RESULT_ROW};
use crate::schema::{Statement, StatementKind};
use log::debug;
use std::collections::BTreeMap;

/// Best result per (statement kind, year).
pub type Selection<'r> = BTreeMap<(StatementKind, i32), &'r ReconciliationResult>;

/// Cross-statement and year-over-year checks over a finished batch.
pub struct Reconciler<'a> {
    catalog: &'a StatementCatalog,
    tolerance: u64,
}

impl<'a> Reconciler<'a> {
    pub fn new(catalog: &'a StatementCatalog, tolerance: u64) -> Self {
        Self { catalog, tolerance }
    }

    /// Linkage issues by year, then balance sheet continuity, then income
    /// statement continuity. Results without a statement are ignored.
    pub fn reconcile(&self, results: &[ReconciliationResult]) -> Vec<String> {
        let selection = select_best(results);
        let mut issues = Vec::new();

        self.check_linkage(&selection, &mut issues);
        for kind in StatementKind::ALL {
            self.check_year_over_year(kind, &selection, &mut issues);
        }

        debug!(
            "Reconciled {} result(s), {} selected, {} issue(s)",
            results.len(),
            selection.len(),
            issues.len()
        );
        issues
    }

    fn check_linkage(&self, selection: &Selection<'_>, issues: &mut Vec<String>) {
        let balance_sheet = self.catalog.taxonomy(StatementKind::BalanceSheet);
        let income_statement = self.catalog.taxonomy(StatementKind::IncomeStatement);

        for (&(kind, year), bs) in selection {
            if kind != StatementKind::BalanceSheet {
                continue;
            }
            let Some(is) = selection.get(&(StatementKind::IncomeStatement, year)) else {
                continue;
            };
            let (Some(bs), Some(is)) = (bs.statement.as_ref(), is.statement.as_ref()) else {
                continue;
            };

            let bs_value = bs.data.value(
                BALANCE_SHEET_RESULT_ROW,
                StatementKind::BalanceSheet.current_column(),
            );
            let is_value = is.data.value(
                INCOME_STATEMENT_RESULT_ROW,
                StatementKind::IncomeStatement.current_column(),
            );
            let (Some(bs_value), Some(is_value)) = (bs_value, is_value) else {
                continue;
            };

            let difference = bs_value.abs_diff(is_value);
            if difference > self.tolerance {
                issues.push(format!(
                    "Year {}: Balance sheet {} {} != Income statement {} {}. Difference {} exceeds tolerance {}.",
                    year,
                    balance_sheet.label(BALANCE_SHEET_RESULT_ROW),
                    bs_value,
                    income_statement.label(INCOME_STATEMENT_RESULT_ROW),
                    is_value,
                    difference,
                    self.tolerance
                ));
            }
        }
    }

    fn check_year_over_year(
        &self,
        kind: StatementKind,
        selection: &Selection<'_>,
        issues: &mut Vec<String>,
    ) {
        let taxonomy = self.catalog.taxonomy(kind);

        for (&(k, year), current) in selection {
            if k != kind {
                continue;
            }
            let Some(previous_year) = year.checked_sub(1) else {
                continue;
            };
            let Some(previous) = selection.get(&(kind, previous_year)) else {
                continue;
            };
            let (Some(current), Some(previous)) =
                (current.statement.as_ref(), previous.statement.as_ref())
            else {
                continue;
            };

            for row in current.data.row_ids() {
                let Some((recorded, reported)) = continuity_pair(current, previous, row) else {
                    continue;
                };

                let difference = recorded.abs_diff(reported);
                if difference > self.tolerance {
                    issues.push(format!(
                        "{}, {}: year {} (prior-year column) {} != year {} (current-year column) {}. Difference {} exceeds tolerance {}.",
                        kind,
                        taxonomy.label(row),
                        year,
                        recorded,
                        previous_year,
                        reported,
                        difference,
                        self.tolerance
                    ));
                }
            }
        }
    }
}

/// The prior-year figure `current` records for `row`, and the figure `previous`
/// reported for it in its own current column.
fn continuity_pair(current: &Statement, previous: &Statement, row: u32) -> Option<(i64, i64)> {
    let kind = current.kind();
    let recorded = current.data.value(row, kind.prior_column())?;
    let reported = previous.data.value(row, kind.current_column())?;
    Some((recorded, reported))
}

/// Accepted beats degraded, then fewer issues wins; on a tie the earlier result stays.
pub fn select_best(results: &[ReconciliationResult]) -> Selection<'_> {
    let score = |r: &ReconciliationResult| {
        (
            r.status == ResultStatus::Accepted,
            std::cmp::Reverse(r.issues.len()),
        )
    };

    let mut selection: Selection<'_> = BTreeMap::new();
    for result in results {
        let Some(year) = result.year() else {
            continue;
        };
        selection
            .entry((result.kind, year))
            .and_modify(|best| {
                if score(result) > score(*best) {
                    *best = result;
                }
            })
            .or_insert(result);
    }
    selection
}
