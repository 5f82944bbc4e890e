//! # Financial Statement Reconciler
//!
//! A library for deciding whether financial statements read from scanned
//! documents (via an LLM or any other recognition service) are internally
//! consistent before they are trusted.
//!
//! ## Core Concepts
//!
//! - **Taxonomy**: The statutory tree of line items for one statement kind. Every parent row is the sum of its children
//! - **Rules**: Sum rules derived from the taxonomy plus a fixed table of signed rules for the income statement
//! - **Validation**: Every rule is checked on every numeric column within an absolute tolerance
//! - **Retry Orchestration**: Extraction is repeated until a statement validates or the attempt bound is reached, then degrades to a best-effort result
//! - **Reconciliation**: The best result per (kind, year) is checked against the other statement of the same year and against the previous year
//!
//! ## Example
//!
//! ```rust,ignore
//! use financial_statement_reconciler::*;
//!
//! let config = EngineConfig::from_env();
//! let client = llm::GeminiClient::from_config(&config)?;
//!
//! let requests = vec![
//!     ExtractionRequest::new("rozvaha_2023.pdf", std::fs::read("rozvaha_2023.pdf")?, StatementKind::BalanceSheet),
//!     ExtractionRequest::new("vzz_2023.pdf", std::fs::read("vzz_2023.pdf")?, StatementKind::IncomeStatement),
//! ];
//!
//! let batch = process_documents(&client, &requests, &config).await;
//! for result in &batch.results {
//!     println!("{} {:?}: {:?}", result.file_name, result.status, result.issues);
//! }
//! println!("{}", to_markdown(&batch.results, &batch.issues));
//! ```

pub mod config;
pub mod error;
pub mod extraction;
pub mod formatter;
pub mod orchestrator;
pub mod prompts;
pub mod reconciler;
pub mod report;
pub mod rules;
pub mod schema;
pub mod taxonomy;
pub mod validator;

#[cfg(feature = "gemini")]
pub mod llm;

pub use config::EngineConfig;
pub use error::{ReconcilerError, Result, TaxonomyError};
pub use extraction::{
    parse_payload, ExtractionEvent, ExtractionFailure, ExtractionOutcome, ExtractionRequest,
    Extractor,
};
pub use formatter::MessageFormatter;
pub use orchestrator::{
    AttemptRecord, AttemptState, ReconciliationResult, ResultStatus, RetryOrchestrator,
};
pub use prompts::extraction_prompt;
pub use reconciler::{select_best, Reconciler};
pub use report::{summary_report, to_csv, to_markdown};
pub use rules::{RuleSet, SignedRule, StatementCatalog, SumRule};
pub use schema::*;
pub use taxonomy::{LineItemNode, Taxonomy};
pub use validator::{ValidationFailure, Validator, Violation};

use futures::future::join_all;
use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;

/// Per-document results in request order, plus the cross-statement issues found among them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub results: Vec<ReconciliationResult>,
    pub issues: Vec<String>,
}

impl BatchOutcome {
    pub fn accepted(&self) -> usize {
        self.results.iter().filter(|r| r.is_accepted()).count()
    }
}

pub struct ReconciliationPipeline;

impl ReconciliationPipeline {
    /// Runs one orchestrator per request concurrently, then reconciles the finished results.
    pub async fn process<E: Extractor + ?Sized>(
        extractor: &E,
        catalog: &StatementCatalog,
        config: &EngineConfig,
        requests: &[ExtractionRequest],
        progress: Option<Sender<ExtractionEvent>>,
    ) -> BatchOutcome {
        info!(
            "Processing {} document(s), up to {} attempt(s) each",
            requests.len(),
            config::clamp_attempts(config.max_attempts)
        );

        let mut orchestrator = RetryOrchestrator::new(extractor, catalog, config);
        if let Some(tx) = progress {
            orchestrator = orchestrator.with_progress(tx);
        }

        let results = join_all(requests.iter().map(|request| orchestrator.run(request))).await;
        let issues = Reconciler::new(catalog, config.tolerance).reconcile(&results);

        let outcome = BatchOutcome { results, issues };
        info!(
            "{}/{} document(s) accepted, {} cross-statement issue(s)",
            outcome.accepted(),
            outcome.results.len(),
            outcome.issues.len()
        );
        outcome
    }
}

/// [`ReconciliationPipeline::process`] against the bundled taxonomies.
pub async fn process_documents<E: Extractor + ?Sized>(
    extractor: &E,
    requests: &[ExtractionRequest],
    config: &EngineConfig,
) -> BatchOutcome {
    ReconciliationPipeline::process(extractor, StatementCatalog::global(), config, requests, None)
        .await
}
