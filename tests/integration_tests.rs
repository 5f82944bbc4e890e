use async_trait::async_trait;
use financial_statement_reconciler::*;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Replays canned responses per file name, in order.
struct ScriptedExtractor {
    scripts: Mutex<HashMap<String, VecDeque<String>>>,
}

impl ScriptedExtractor {
    fn new(scripts: Vec<(&str, Vec<&str>)>) -> Self {
        Self {
            scripts: Mutex::new(
                scripts
                    .into_iter()
                    .map(|(file, responses)| {
                        (
                            file.to_string(),
                            responses.into_iter().map(String::from).collect(),
                        )
                    })
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, request: &ExtractionRequest, _prompt: &str) -> Result<String> {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .get_mut(&request.file_name)
            .and_then(|responses| responses.pop_front())
            .ok_or_else(|| ReconcilerError::ExtractionFailed("script exhausted".to_string()))
    }
}

fn small_catalog() -> StatementCatalog {
    let balance_sheet = Taxonomy::from_json(
        StatementKind::BalanceSheet,
        r#"{
            "1": { "name": "Total assets", "sub_rows": {
                "2": { "name": "Fixed assets" },
                "3": { "name": "Current assets" }
            } },
            "78": { "name": "Total liabilities", "sub_rows": {
                "79": { "name": "Equity" }
            } }
        }"#,
    )
    .unwrap();
    let income_statement = Taxonomy::from_json(
        StatementKind::IncomeStatement,
        r#"{ "53": { "name": "Result after tax" } }"#,
    )
    .unwrap();

    StatementCatalog::from_taxonomies(balance_sheet, income_statement).unwrap()
}

const VALID_BALANCE_SHEET: &str = r#"{"rok": 2023, "data": {
    "1": {"netto": 10}, "2": {"netto": 5}, "3": {"netto": 5},
    "78": {"netto": 10}, "79": {"netto": 10}
}}"#;

const OFF_BY_FIVE_BALANCE_SHEET: &str = r#"{"rok": 2023, "data": {
    "1": {"netto": 15}, "2": {"netto": 5}, "3": {"netto": 5},
    "78": {"netto": 15}, "79": {"netto": 15}
}}"#;

#[tokio::test]
async fn test_accepted_after_two_unparsable_attempts() {
    let catalog = small_catalog();
    let extractor = ScriptedExtractor::new(vec![(
        "rozvaha.pdf",
        vec!["this is not json", "{\"rok\": 2023, \"data\": {", VALID_BALANCE_SHEET],
    )]);
    let config = EngineConfig::default().with_max_attempts(3);
    let request = ExtractionRequest::new("rozvaha.pdf", vec![], StatementKind::BalanceSheet);

    let result = RetryOrchestrator::new(&extractor, &catalog, &config)
        .run(&request)
        .await;

    assert_eq!(result.status, ResultStatus::Accepted);
    assert_eq!(result.attempts, 3);
    assert!(result.issues.is_empty());
    assert_eq!(result.attempt_log.len(), 3);
    assert!(matches!(
        result.attempt_log[0].failure,
        Some(ExtractionFailure::InvalidPayload(_))
    ));
    assert!(matches!(
        result.attempt_log[1].failure,
        Some(ExtractionFailure::InvalidPayload(_))
    ));
    assert!(result.attempt_log[2].failure.is_none());
}

#[tokio::test]
async fn test_degraded_after_repeated_sum_violation() {
    let catalog = small_catalog();
    let extractor = ScriptedExtractor::new(vec![(
        "rozvaha.pdf",
        vec![OFF_BY_FIVE_BALANCE_SHEET, OFF_BY_FIVE_BALANCE_SHEET],
    )]);
    let config = EngineConfig::default().with_max_attempts(2).with_tolerance(1);
    let request = ExtractionRequest::new("rozvaha.pdf", vec![], StatementKind::BalanceSheet);

    let result = RetryOrchestrator::new(&extractor, &catalog, &config)
        .run(&request)
        .await;

    assert_eq!(result.status, ResultStatus::Degraded);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.issues.len(), 1);
    assert!(result.issues[0].contains("row 1 (Total assets)"));
    assert!(result.issues[0].contains("Difference 5 exceeds tolerance 1"));

    // The best-effort statement keeps the figures as extracted.
    let statement = result.statement.as_ref().unwrap();
    assert_eq!(statement.year, 2023);
    assert_eq!(statement.value_or_zero(1, Column::Net), 15);
    assert!(result.raw.is_some());

    // Earlier attempts stay available for auditing.
    assert_eq!(result.attempt_log.len(), 2);
    assert_eq!(result.attempt_log[0].issues, result.issues);
}

#[tokio::test]
async fn test_failed_retry_keeps_earlier_validation_issues() {
    let catalog = small_catalog();
    let extractor = ScriptedExtractor::new(vec![(
        "rozvaha.pdf",
        vec![OFF_BY_FIVE_BALANCE_SHEET, "not json"],
    )]);
    let config = EngineConfig::default().with_max_attempts(2).with_tolerance(1);
    let request = ExtractionRequest::new("rozvaha.pdf", vec![], StatementKind::BalanceSheet);

    let result = RetryOrchestrator::new(&extractor, &catalog, &config)
        .run(&request)
        .await;

    assert_eq!(result.status, ResultStatus::Degraded);
    assert_eq!(result.issues.len(), 1);
    assert!(result.issues[0].contains("row 1 (Total assets)"));
    assert!(result.issues[0].contains("Difference 5 exceeds tolerance 1"));
    assert_eq!(result.statement.as_ref().unwrap().value_or_zero(1, Column::Net), 15);
    assert!(matches!(
        result.attempt_log[1].failure,
        Some(ExtractionFailure::InvalidPayload(_))
    ));
}

#[tokio::test]
async fn test_figures_given_as_strings_are_accepted() {
    let catalog = small_catalog();
    let extractor = ScriptedExtractor::new(vec![(
        "rozvaha.pdf",
        vec![r#"{"rok": "2023", "data": {
            "1": {"netto": "10", "netto_minule": 8.0},
            "2": {"brutto": "7", "korekce": "-2", "netto": "5", "netto_minule": "4"},
            "3": {"netto": 5.0, "netto_minule": " 4 "},
            "78": {"netto": "10", "netto_minule": "8"},
            "79": {"netto": "10", "netto_minule": 8}
        }}"#],
    )]);
    let request = ExtractionRequest::new("rozvaha.pdf", vec![], StatementKind::BalanceSheet);

    let result = RetryOrchestrator::new(&extractor, &catalog, &EngineConfig::default())
        .run(&request)
        .await;

    assert!(result.is_accepted(), "{:?}", result.issues);
    let statement = result.statement.as_ref().unwrap();
    assert_eq!(statement.value_or_zero(2, Column::Net), 5);
    assert_eq!(statement.value_or_zero(3, Column::NetPriorYear), 4);
}

#[tokio::test]
async fn test_extreme_figures_degrade_without_panicking() {
    let catalog = small_catalog();
    let extractor = ScriptedExtractor::new(vec![(
        "rozvaha.pdf",
        vec![r#"{"rok": 2023, "data": {
            "1": {"netto": 0},
            "2": {"netto": 9223372036854775807, "brutto": 0, "korekce": -9223372036854775808},
            "3": {"netto": 9223372036854775807},
            "78": {"netto": 0}
        }}"#],
    )]);
    let request = ExtractionRequest::new("rozvaha.pdf", vec![], StatementKind::BalanceSheet);

    let result = RetryOrchestrator::new(&extractor, &catalog, &EngineConfig::default())
        .run(&request)
        .await;

    assert_eq!(result.status, ResultStatus::Degraded);
    assert!(result
        .issues
        .iter()
        .any(|issue| issue.contains("the sum of row 2 (Fixed assets) + row 3 (Current assets) is 18446744073709551614")));
    assert!(result
        .issues
        .iter()
        .any(|issue| issue.starts_with("row 2 (Fixed assets): gross 0 minus adjustment 9223372036854775808")));
}

#[tokio::test]
async fn test_year_hint_fills_missing_year() {
    let catalog = small_catalog();
    let extractor = ScriptedExtractor::new(vec![(
        "rozvaha.pdf",
        vec![r#"{"data": {"1": {"netto": 0}}}"#],
    )]);
    let request = ExtractionRequest::new("rozvaha.pdf", vec![], StatementKind::BalanceSheet)
        .with_year_hint(2020);

    let result = RetryOrchestrator::new(&extractor, &catalog, &EngineConfig::default())
        .run(&request)
        .await;

    assert!(result.is_accepted());
    assert_eq!(result.year(), Some(2020));
}

fn accepted(file_name: &str, statement: Statement) -> ReconciliationResult {
    ReconciliationResult {
        file_name: file_name.to_string(),
        kind: statement.kind(),
        statement: Some(statement),
        raw: None,
        issues: Vec::new(),
        attempts: 1,
        status: ResultStatus::Accepted,
        attempt_log: Vec::new(),
    }
}

fn balance_sheet(year: i32, rows: &[(RowId, i64, i64)]) -> Statement {
    Statement::new(
        year,
        StatementData::BalanceSheet(
            rows.iter()
                .map(|&(id, net, prior)| (id, BalanceSheetRow::new(net, prior)))
                .collect(),
        ),
        0,
    )
}

fn income_statement(year: i32, rows: &[(RowId, i64, i64)]) -> Statement {
    Statement::new(
        year,
        StatementData::IncomeStatement(
            rows.iter()
                .map(|&(id, current, prior)| (id, IncomeStatementRow::new(current, prior)))
                .collect(),
        ),
        0,
    )
}

#[test]
fn test_linkage_mismatch_reports_difference() {
    let results = vec![
        accepted("rozvaha_2023.pdf", balance_sheet(2023, &[(99, 1000, 0)])),
        accepted("vzz_2023.pdf", income_statement(2023, &[(53, 998, 0)])),
    ];

    let issues = Reconciler::new(StatementCatalog::global(), 1).reconcile(&results);

    assert_eq!(issues.len(), 1);
    assert!(issues[0].starts_with("Year 2023: Balance sheet row 99 ("));
    assert!(issues[0].contains(" 1000 != Income statement row 53 ("));
    assert!(issues[0].contains(" 998. Difference 2 exceeds tolerance 1."));
}

#[test]
fn test_year_over_year_match_is_silent() {
    let results = vec![
        accepted("rozvaha_2024.pdf", balance_sheet(2024, &[(7, 55, 40), (8, 1, 3)])),
        accepted("rozvaha_2023.pdf", balance_sheet(2023, &[(7, 40, 12), (9, 4, 4)])),
    ];

    let issues = Reconciler::new(StatementCatalog::global(), 0).reconcile(&results);
    assert!(issues.is_empty());
}

#[test]
fn test_year_over_year_mismatch_names_the_row() {
    let results = vec![
        accepted("rozvaha_2024.pdf", balance_sheet(2024, &[(7, 55, 41)])),
        accepted("rozvaha_2023.pdf", balance_sheet(2023, &[(7, 40, 12)])),
    ];

    let issues = Reconciler::new(StatementCatalog::global(), 0).reconcile(&results);
    assert_eq!(issues.len(), 1);
    assert!(issues[0].starts_with("Balance sheet, row 7 ("));
    assert!(issues[0].contains("year 2024 (prior-year column) 41 != year 2023 (current-year column) 40"));
}

#[test]
fn test_builtin_rules_catch_broken_income_statement() -> anyhow::Result<()> {
    let catalog = StatementCatalog::load()?;
    let rules = catalog.rules(StatementKind::IncomeStatement);
    assert_eq!(rules.signed_rules.len(), 5);

    // 53 should be 49 - 50 = 80.
    let statement = income_statement(
        2023,
        &[(1, 100, 0), (30, 100, 0), (49, 100, 0), (50, 20, 0), (53, 70, 0), (55, 70, 0)],
    );
    let failure = Validator::new(rules).check(&statement).unwrap_err();

    let messages = MessageFormatter::new(StatementKind::IncomeStatement, catalog.taxonomy(StatementKind::IncomeStatement))
        .format_report(&failure.to_string());

    assert_eq!(messages.len(), failure.violations.len());
    assert!(messages
        .iter()
        .any(|m| m.contains("row 53 (") && m.contains("gives 80") && m.contains("Difference 10 exceeds tolerance 0")));
    Ok(())
}

#[tokio::test]
async fn test_batch_pipeline_reconciles_finished_results() {
    let catalog = StatementCatalog::from_taxonomies(
        Taxonomy::from_json(
            StatementKind::BalanceSheet,
            r#"{
                "1": { "name": "Total assets", "sub_rows": { "2": { "name": "Cash" } } },
                "78": { "name": "Total liabilities", "sub_rows": { "99": { "name": "Result for the period" } } }
            }"#,
        )
        .unwrap(),
        Taxonomy::from_json(
            StatementKind::IncomeStatement,
            r#"{ "53": { "name": "Result after tax" } }"#,
        )
        .unwrap(),
    )
    .unwrap();

    let extractor = ScriptedExtractor::new(vec![
        (
            "rozvaha.pdf",
            vec![r#"{"rok": 2023, "data": {"1": {"netto": 1000}, "2": {"netto": 1000}, "78": {"netto": 1000}, "99": {"netto": 1000}}}"#],
        ),
        (
            "vzz.pdf",
            vec![r#"```json
{"rok": 2023, "data": {
    "1": {"současné": 998}, "30": {"současné": 998}, "49": {"současné": 998},
    "53": {"současné": 998}, "55": {"současné": 998}
}}
```"#],
        ),
    ]);
    let requests = vec![
        ExtractionRequest::new("rozvaha.pdf", b"%PDF".to_vec(), StatementKind::BalanceSheet),
        ExtractionRequest::new("vzz.pdf", b"%PDF".to_vec(), StatementKind::IncomeStatement),
    ];
    let config = EngineConfig::default().with_tolerance(1);
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);

    let batch = ReconciliationPipeline::process(&extractor, &catalog, &config, &requests, Some(tx)).await;

    assert_eq!(batch.accepted(), 2);
    assert_eq!(
        batch.issues,
        vec!["Year 2023: Balance sheet row 99 (Result for the period) 1000 != Income statement row 53 (Result after tax) 998. Difference 2 exceeds tolerance 1."]
    );

    let mut accepted_events = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, ExtractionEvent::Accepted { .. }) {
            accepted_events += 1;
        }
    }
    assert_eq!(accepted_events, 2);

    let markdown = to_markdown(&batch.results, &batch.issues);
    assert!(markdown.contains("## rozvaha.pdf (Balance sheet, 2023)"));
    assert!(markdown.contains("- Year 2023: Balance sheet row 99"));
}
