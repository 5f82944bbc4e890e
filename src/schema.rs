use crate::error::{ReconcilerError, Result};
use log::warn;
use schemars::JsonSchema;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Row designation ("Označení") as printed on the statutory form.
pub type RowId = u32;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    #[schemars(description = "Balance sheet (rozvaha): gross, adjustment and net per asset row")]
    BalanceSheet,

    #[schemars(description = "Income statement (výkaz zisku a ztráty): current and prior period")]
    IncomeStatement,
}

impl StatementKind {
    pub const ALL: [StatementKind; 2] = [StatementKind::BalanceSheet, StatementKind::IncomeStatement];

    /// Accepts the short codes used by upload forms as well as the snake_case names.
    pub fn from_alias(alias: &str) -> Result<Self> {
        match alias.trim().to_lowercase().as_str() {
            "rozvaha" | "balance_sheet" => Ok(Self::BalanceSheet),
            "vzz" | "ziskaztrata" | "vzzcz" | "income_statement" => Ok(Self::IncomeStatement),
            other => Err(ReconcilerError::UnsupportedStatementKind(other.to_string())),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BalanceSheet => "rozvaha",
            Self::IncomeStatement => "vzz",
        }
    }

    /// Numeric columns checked by the validator, current column first.
    pub fn columns(&self) -> &'static [Column] {
        match self {
            Self::BalanceSheet => &[Column::Net, Column::NetPriorYear],
            Self::IncomeStatement => &[Column::Current, Column::Prior],
        }
    }

    /// Column holding this year's figure.
    pub fn current_column(&self) -> Column {
        self.columns()[0]
    }

    /// Column holding the comparative figure for the previous year.
    pub fn prior_column(&self) -> Column {
        self.columns()[1]
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BalanceSheet => write!(f, "Balance sheet"),
            Self::IncomeStatement => write!(f, "Income statement"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    Net,
    NetPriorYear,
    Current,
    Prior,
}

impl Column {
    /// Field name on the wire and in violation lines.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Net => "netto",
            Self::NetPriorYear => "netto_minule",
            Self::Current => "současné",
            Self::Prior => "minulé",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "netto" => Some(Self::Net),
            "netto_minule" => Some(Self::NetPriorYear),
            "současné" => Some(Self::Current),
            "minulé" => Some(Self::Prior),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Net => "net, current year",
            Self::NetPriorYear => "net, prior year",
            Self::Current => "current period",
            Self::Prior => "prior period",
        }
    }
}

/// Whole amount from an integer, an integral float (`1200.0`) or a numeric
/// string (`"1 200"`, `" -35 "`). Fractions and non-numeric text are rejected.
fn parse_amount(value: &serde_json::Value) -> Option<i64> {
    fn integral(f: f64) -> Option<i64> {
        // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound.
        (f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64)
            .then_some(f as i64)
    }

    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        serde_json::Value::String(s) => {
            let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
            compact
                .parse::<i64>()
                .ok()
                .or_else(|| compact.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

fn lenient_amount<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => parse_amount(&value)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid amount {}", value))),
    }
}

fn lenient_amount_or_zero<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_amount(deserializer)?.unwrap_or(0))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BalanceSheetRow {
    #[serde(
        rename = "brutto",
        alias = "gross",
        default,
        deserialize_with = "lenient_amount",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<i64>", description = "Gross amount (Brutto). Asset rows only.")]
    pub gross: Option<i64>,

    #[serde(
        rename = "korekce",
        alias = "adjustment",
        default,
        deserialize_with = "lenient_amount",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(
        with = "Option<i64>",
        description = "Accumulated adjustment (Korekce). Asset rows only; sign is ignored."
    )]
    pub adjustment: Option<i64>,

    #[serde(rename = "netto", alias = "net", default, deserialize_with = "lenient_amount_or_zero")]
    #[schemars(with = "i64", description = "Net amount for the current year (Netto)")]
    pub net: i64,

    #[serde(rename = "netto_minule", alias = "net_prior_year", default, deserialize_with = "lenient_amount_or_zero")]
    #[schemars(with = "i64", description = "Net amount for the previous year (Netto minulé)")]
    pub net_prior_year: i64,
}

impl BalanceSheetRow {
    pub fn new(net: i64, net_prior_year: i64) -> Self {
        Self {
            gross: None,
            adjustment: None,
            net,
            net_prior_year,
        }
    }

    pub fn with_gross(mut self, gross: i64, adjustment: i64) -> Self {
        self.gross = Some(gross);
        self.adjustment = Some(adjustment);
        self
    }

    pub fn value(&self, column: Column) -> Option<i64> {
        match column {
            Column::Net => Some(self.net),
            Column::NetPriorYear => Some(self.net_prior_year),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IncomeStatementRow {
    #[serde(rename = "současné", alias = "current", default, deserialize_with = "lenient_amount_or_zero")]
    #[schemars(with = "i64", description = "Amount for the current accounting period (současné)")]
    pub current: i64,

    #[serde(rename = "minulé", alias = "prior", default, deserialize_with = "lenient_amount_or_zero")]
    #[schemars(with = "i64", description = "Amount for the previous accounting period (minulé)")]
    pub prior: i64,
}

impl IncomeStatementRow {
    pub fn new(current: i64, prior: i64) -> Self {
        Self { current, prior }
    }

    pub fn value(&self, column: Column) -> Option<i64> {
        match column {
            Column::Current => Some(self.current),
            Column::Prior => Some(self.prior),
            _ => None,
        }
    }
}

/// Rows of one statement, tagged by kind so callers branch once instead of
/// checking for fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "rows", rename_all = "snake_case")]
pub enum StatementData {
    BalanceSheet(BTreeMap<RowId, BalanceSheetRow>),
    IncomeStatement(BTreeMap<RowId, IncomeStatementRow>),
}

impl StatementData {
    pub fn empty(kind: StatementKind) -> Self {
        match kind {
            StatementKind::BalanceSheet => Self::BalanceSheet(BTreeMap::new()),
            StatementKind::IncomeStatement => Self::IncomeStatement(BTreeMap::new()),
        }
    }

    pub fn kind(&self) -> StatementKind {
        match self {
            Self::BalanceSheet(_) => StatementKind::BalanceSheet,
            Self::IncomeStatement(_) => StatementKind::IncomeStatement,
        }
    }

    /// `None` when the row is absent or the column does not belong to this kind.
    pub fn value(&self, row: RowId, column: Column) -> Option<i64> {
        match self {
            Self::BalanceSheet(rows) => rows.get(&row).and_then(|r| r.value(column)),
            Self::IncomeStatement(rows) => rows.get(&row).and_then(|r| r.value(column)),
        }
    }

    pub fn contains(&self, row: RowId) -> bool {
        match self {
            Self::BalanceSheet(rows) => rows.contains_key(&row),
            Self::IncomeStatement(rows) => rows.contains_key(&row),
        }
    }

    /// Row ids in ascending order.
    pub fn row_ids(&self) -> Vec<RowId> {
        match self {
            Self::BalanceSheet(rows) => rows.keys().copied().collect(),
            Self::IncomeStatement(rows) => rows.keys().copied().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::BalanceSheet(rows) => rows.len(),
            Self::IncomeStatement(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_raw(&mut self, row: RowId, value: &serde_json::Value) -> Result<()> {
        match self {
            Self::BalanceSheet(rows) => {
                rows.insert(row, serde_json::from_value(value.clone())?);
            }
            Self::IncomeStatement(rows) => {
                rows.insert(row, serde_json::from_value(value.clone())?);
            }
        }
        Ok(())
    }
}

/// One year's extracted figures for one statement kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub year: i32,
    pub data: StatementData,
    /// Largest absolute discrepancy a rule may show and still pass.
    pub tolerance: u64,
}

impl Statement {
    pub fn new(year: i32, data: StatementData, tolerance: u64) -> Self {
        Self {
            year,
            data,
            tolerance,
        }
    }

    pub fn kind(&self) -> StatementKind {
        self.data.kind()
    }

    /// Value used in rule arithmetic: absent rows count as zero.
    pub fn value_or_zero(&self, row: RowId, column: Column) -> i64 {
        self.data.value(row, column).unwrap_or(0)
    }

    /// Builds a statement from a normalised payload, rejecting any row whose
    /// fields do not fit the row shape of `kind`. Every rejected row is
    /// reported, one `Row N: ...` line each.
    pub fn from_raw(
        kind: StatementKind,
        raw: &RawStatement,
        year_hint: Option<i32>,
        tolerance: u64,
    ) -> Result<Self> {
        let year = raw.year.or(year_hint).ok_or_else(|| {
            ReconcilerError::InvalidStatement("payload has no 'rok' and no year was supplied".into())
        })?;

        let mut data = StatementData::empty(kind);
        let rejected: Vec<String> = raw
            .rows
            .iter()
            .filter_map(|(row, value)| {
                data.insert_raw(*row, value)
                    .err()
                    .map(|e| format!("Row {}: {}", row, e))
            })
            .collect();

        if !rejected.is_empty() {
            return Err(ReconcilerError::InvalidStatement(rejected.join("\n")));
        }

        Ok(Self::new(year, data, tolerance))
    }

    /// Builds whatever can be built: rows that fail to deserialize are skipped.
    /// No consistency rule is evaluated. Returns `None` only when no year is known.
    pub fn best_effort(
        kind: StatementKind,
        raw: &RawStatement,
        year_hint: Option<i32>,
        tolerance: u64,
    ) -> Option<Self> {
        let year = raw.year.or(year_hint)?;

        let mut data = StatementData::empty(kind);
        for (row, value) in &raw.rows {
            if let Err(e) = data.insert_raw(*row, value) {
                warn!("Dropping row {} from best-effort {}: {}", row, kind, e);
            }
        }

        Some(Self::new(year, data, tolerance))
    }
}

/// Parsed extraction payload with row ids normalised to integers.
/// Row bodies are kept as JSON until a statement is built from them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStatement {
    #[serde(rename = "rok")]
    pub year: Option<i32>,
    #[serde(rename = "data")]
    pub rows: BTreeMap<RowId, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BalanceSheetPayload {
    #[schemars(description = "Year the balance sheet is drawn up for")]
    pub rok: i32,
    #[schemars(description = "Rows keyed by their numeric designation (Označení), e.g. \"1\", \"78\"")]
    pub data: BTreeMap<String, BalanceSheetRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IncomeStatementPayload {
    #[schemars(description = "Year the income statement is drawn up for")]
    pub rok: i32,
    #[schemars(description = "Rows keyed by their numeric designation (Označení), e.g. \"1\", \"53\"")]
    pub data: BTreeMap<String, IncomeStatementRow>,
}

impl StatementKind {
    /// JSON Schema of the payload an extractor is expected to return.
    pub fn response_schema(&self) -> schemars::schema::RootSchema {
        match self {
            Self::BalanceSheet => schemars::schema_for!(BalanceSheetPayload),
            Self::IncomeStatement => schemars::schema_for!(IncomeStatementPayload),
        }
    }

    pub fn schema_as_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.response_schema())
    }
}
