use crate::config::{clamp_attempts, EngineConfig};
use crate::error::ReconcilerError;
use crate::extraction::{
    extract_once, ExtractionEvent, ExtractionFailure, ExtractionRequest, Extractor,
};
use crate::formatter::MessageFormatter;
use crate::prompts::extraction_prompt;
use crate::rules::StatementCatalog;
use crate::schema::{RawStatement, Statement, StatementKind};
use crate::validator::Validator;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Accepted,
    Degraded,
}

/// Where one pipeline is in its retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptState {
    Pending,
    Extracting,
    Parsed,
    ExtractFailed,
    Validated,
    ValidationFailed,
    RetryPending,
    Accepted,
    Degraded,
}

/// What happened on one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: usize,
    /// Set when the attempt produced no usable payload.
    pub failure: Option<ExtractionFailure>,
    pub issues: Vec<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub file_name: String,
    pub kind: StatementKind,
    /// Validated when accepted; best-effort and unvalidated when degraded.
    pub statement: Option<Statement>,
    /// Last payload that parsed.
    pub raw: Option<RawStatement>,
    /// Diagnostics of the last attempt whose payload parsed, or of the last
    /// failed extraction when none did. See `attempt_log` for every attempt.
    pub issues: Vec<String>,
    pub attempts: usize,
    pub status: ResultStatus,
    pub attempt_log: Vec<AttemptRecord>,
}

impl ReconciliationResult {
    pub fn is_accepted(&self) -> bool {
        self.status == ResultStatus::Accepted
    }

    pub fn year(&self) -> Option<i32> {
        self.statement.as_ref().map(|s| s.year)
    }
}

pub struct RetryOrchestrator<'a, E: Extractor + ?Sized> {
    extractor: &'a E,
    catalog: &'a StatementCatalog,
    max_attempts: usize,
    tolerance: u64,
    progress: Option<Sender<ExtractionEvent>>,
}

impl<'a, E: Extractor + ?Sized> RetryOrchestrator<'a, E> {
    pub fn new(extractor: &'a E, catalog: &'a StatementCatalog, config: &EngineConfig) -> Self {
        Self {
            extractor,
            catalog,
            max_attempts: clamp_attempts(config.max_attempts),
            tolerance: config.tolerance,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Sender<ExtractionEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Runs attempts until one parses and validates, or the bound is reached.
    /// Always returns a result.
    pub async fn run(&self, request: &ExtractionRequest) -> ReconciliationResult {
        let kind = request.kind;
        let entry = self.catalog.entry(kind);
        let validator = Validator::new(&entry.rules);
        let formatter = MessageFormatter::new(kind, &entry.taxonomy);
        let prompt = extraction_prompt(kind, &entry.taxonomy);
        let tolerance = request.tolerance.unwrap_or(self.tolerance);

        let mut state = AttemptState::Pending;
        let mut last_raw: Option<RawStatement> = None;
        let mut issues: Vec<String> = Vec::new();
        let mut attempt_log = Vec::with_capacity(self.max_attempts);

        self.send_event(ExtractionEvent::Starting {
            file_name: request.file_name.clone(),
            kind,
        })
        .await;

        for attempt in 1..=self.max_attempts {
            self.transition(&mut state, AttemptState::Extracting, request, attempt);
            self.send_event(ExtractionEvent::Extracting {
                attempt,
                max_attempts: self.max_attempts,
            })
            .await;

            let raw = match extract_once(self.extractor, request, &prompt).await {
                Ok(raw) => raw,
                Err(failure) => {
                    self.transition(&mut state, AttemptState::ExtractFailed, request, attempt);
                    warn!(
                        "{} ({}), attempt {}/{}: {}",
                        request.file_name, kind, attempt, self.max_attempts, failure
                    );
                    self.send_event(ExtractionEvent::ExtractFailed {
                        attempt,
                        reason: failure.to_string(),
                    })
                    .await;

                    let reason = vec![format!("Attempt {}: {}", attempt, failure)];
                    // Diagnostics of a parsed payload outrank a later failure to get one.
                    if last_raw.is_none() {
                        issues = reason.clone();
                    }
                    attempt_log.push(AttemptRecord {
                        attempt,
                        failure: Some(failure),
                        issues: reason,
                        at: Utc::now(),
                    });
                    self.transition(&mut state, AttemptState::RetryPending, request, attempt);
                    continue;
                }
            };

            self.transition(&mut state, AttemptState::Parsed, request, attempt);
            self.send_event(ExtractionEvent::Parsed {
                attempt,
                rows: raw.rows.len(),
            })
            .await;

            let checked = Statement::from_raw(kind, &raw, request.year_hint, tolerance)
                .map_err(|e| match e {
                    ReconcilerError::InvalidStatement(detail) => {
                        detail.lines().map(|line| formatter.format_line(line)).collect::<Vec<_>>()
                    }
                    other => vec![formatter.format_line(&other.to_string())],
                })
                .and_then(|statement| match validator.check(&statement) {
                    Ok(()) => Ok(statement),
                    Err(failure) => Err(formatter.format_report(&failure.to_string())),
                });
            last_raw = Some(raw);

            match checked {
                Ok(statement) => {
                    self.transition(&mut state, AttemptState::Validated, request, attempt);
                    self.transition(&mut state, AttemptState::Accepted, request, attempt);
                    info!(
                        "{} ({}, {}) accepted on attempt {}/{}",
                        request.file_name, kind, statement.year, attempt, self.max_attempts
                    );
                    self.send_event(ExtractionEvent::Accepted { attempt }).await;

                    attempt_log.push(AttemptRecord {
                        attempt,
                        failure: None,
                        issues: Vec::new(),
                        at: Utc::now(),
                    });
                    return ReconciliationResult {
                        file_name: request.file_name.clone(),
                        kind,
                        statement: Some(statement),
                        raw: last_raw,
                        issues: Vec::new(),
                        attempts: attempt,
                        status: ResultStatus::Accepted,
                        attempt_log,
                    };
                }
                Err(found) => {
                    self.transition(&mut state, AttemptState::ValidationFailed, request, attempt);
                    debug!(
                        "{} ({}), attempt {}: {} issue(s)",
                        request.file_name,
                        kind,
                        attempt,
                        found.len()
                    );
                    self.send_event(ExtractionEvent::ValidationFailed {
                        attempt,
                        violations: found.len(),
                    })
                    .await;

                    issues = found;
                    attempt_log.push(AttemptRecord {
                        attempt,
                        failure: None,
                        issues: issues.clone(),
                        at: Utc::now(),
                    });
                    self.transition(&mut state, AttemptState::RetryPending, request, attempt);
                }
            }
        }

        self.transition(&mut state, AttemptState::Degraded, request, self.max_attempts);

        let statement = last_raw.as_ref().and_then(|raw| {
            Statement::from_raw(kind, raw, request.year_hint, tolerance)
                .ok()
                .or_else(|| Statement::best_effort(kind, raw, request.year_hint, tolerance))
        });

        warn!(
            "{} ({}) degraded after {} attempt(s) with {} issue(s){}",
            request.file_name,
            kind,
            self.max_attempts,
            issues.len(),
            if statement.is_none() {
                ", no statement could be built"
            } else {
                ""
            }
        );
        self.send_event(ExtractionEvent::Degraded {
            attempts: self.max_attempts,
            issues: issues.len(),
        })
        .await;

        ReconciliationResult {
            file_name: request.file_name.clone(),
            kind,
            statement,
            raw: last_raw,
            issues,
            attempts: self.max_attempts,
            status: ResultStatus::Degraded,
            attempt_log,
        }
    }

    fn transition(
        &self,
        state: &mut AttemptState,
        next: AttemptState,
        request: &ExtractionRequest,
        attempt: usize,
    ) {
        debug!(
            "{} ({}) attempt {}: {:?} -> {:?}",
            request.file_name, request.kind, attempt, state, next
        );
        *state = next;
    }

    async fn send_event(&self, event: ExtractionEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event).await;
        }
    }
}
