use crate::error::TaxonomyError;
use crate::schema::{RowId, StatementKind};
use crate::taxonomy::Taxonomy;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// "AKTIVA CELKEM" on the balance sheet.
pub const TOTAL_ASSETS_ROW: RowId = 1;
/// "PASIVA CELKEM" on the balance sheet.
pub const TOTAL_LIABILITIES_ROW: RowId = 78;
/// Current-period result on the balance sheet, linked to the income statement.
pub const BALANCE_SHEET_RESULT_ROW: RowId = 99;
/// Post-tax result on the income statement, linked to the balance sheet.
pub const INCOME_STATEMENT_RESULT_ROW: RowId = 53;

static GLOBAL_CATALOG: OnceLock<StatementCatalog> = OnceLock::new();

/// `target = Σ sources`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumRule {
    pub target: RowId,
    pub sources: Vec<RowId>,
}

impl SumRule {
    pub fn new(target: RowId, sources: Vec<RowId>) -> Self {
        Self { target, sources }
    }

    /// Sources joined with `+`, e.g. `2+3+37+74`.
    pub fn expression(&self) -> String {
        self.sources
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("+")
    }
}

impl fmt::Display for SumRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row {} = {}", self.target, self.expression())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    pub fn factor(&self) -> i64 {
        match self {
            Self::Plus => 1,
            Self::Minus => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTerm {
    pub row: RowId,
    pub sign: Sign,
}

/// `target = Σ sign·source`, for relationships that are not a plain child sum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRule {
    pub target: RowId,
    pub terms: Vec<SignedTerm>,
}

impl SignedRule {
    pub fn new(target: RowId, plus: &[RowId], minus: &[RowId]) -> Self {
        let terms = plus
            .iter()
            .map(|&row| SignedTerm {
                row,
                sign: Sign::Plus,
            })
            .chain(minus.iter().map(|&row| SignedTerm {
                row,
                sign: Sign::Minus,
            }))
            .collect();
        Self { target, terms }
    }

    /// Expression over every term, e.g. `30+48` or `49-50`.
    pub fn expression(&self) -> String {
        render_terms(self.terms.iter())
    }
}

impl fmt::Display for SignedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row {} = {}", self.target, self.expression())
    }
}

/// A leading positive term carries no symbol; every other term is prefixed with its sign.
pub fn render_terms<'a>(terms: impl Iterator<Item = &'a SignedTerm>) -> String {
    let mut rendered = String::new();
    for term in terms {
        match term.sign {
            Sign::Plus if rendered.is_empty() => {}
            Sign::Plus => rendered.push('+'),
            Sign::Minus => rendered.push('-'),
        }
        rendered.push_str(&term.row.to_string());
    }
    rendered
}

/// Hand-authored result chains of the income statement.
pub fn income_statement_signed_rules() -> Vec<SignedRule> {
    vec![
        SignedRule::new(49, &[30, 48], &[]),
        SignedRule::new(53, &[49], &[50]),
        SignedRule::new(55, &[53], &[54]),
        SignedRule::new(48, &[31, 35, 39, 46], &[34, 38, 42, 43, 47]),
        SignedRule::new(30, &[1, 2, 20], &[3, 7, 8, 9, 14, 24]),
    ]
}

/// One sum rule per node with children, in pre-order so parent rules precede
/// the rules of their descendants.
pub fn generate_sum_rules(taxonomy: &Taxonomy) -> Vec<SumRule> {
    taxonomy
        .depth_first()
        .into_iter()
        .filter(|(_, node)| !node.is_leaf())
        .map(|(_, node)| SumRule::new(node.id, node.children.clone()))
        .collect()
}

fn assets_equal_liabilities() -> SumRule {
    SumRule::new(TOTAL_ASSETS_ROW, vec![TOTAL_LIABILITIES_ROW])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub kind: StatementKind,
    pub sum_rules: Vec<SumRule>,
    pub signed_rules: Vec<SignedRule>,
    /// Set when the taxonomy could not be loaded and only the fixed rules remain.
    pub degraded: bool,
}

impl RuleSet {
    pub fn generate(taxonomy: &Taxonomy) -> Self {
        let kind = taxonomy.kind();
        let mut sum_rules = generate_sum_rules(taxonomy);

        let signed_rules = match kind {
            StatementKind::BalanceSheet => {
                sum_rules.push(assets_equal_liabilities());
                Vec::new()
            }
            StatementKind::IncomeStatement => income_statement_signed_rules(),
        };

        debug!(
            "Generated {} sum rules and {} signed rules for {}",
            sum_rules.len(),
            signed_rules.len(),
            kind
        );

        Self {
            kind,
            sum_rules,
            signed_rules,
            degraded: false,
        }
    }

    /// What remains when no taxonomy is available: the assets/liabilities
    /// identity for the balance sheet, nothing for the income statement.
    pub fn minimal(kind: StatementKind) -> Self {
        let sum_rules = match kind {
            StatementKind::BalanceSheet => vec![assets_equal_liabilities()],
            StatementKind::IncomeStatement => Vec::new(),
        };

        Self {
            kind,
            sum_rules,
            signed_rules: Vec::new(),
            degraded: true,
        }
    }

    pub fn len(&self) -> usize {
        self.sum_rules.len() + self.signed_rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Taxonomy plus the rules derived from it for one statement kind.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub taxonomy: Taxonomy,
    pub rules: RuleSet,
}

impl CatalogEntry {
    pub fn new(taxonomy: Taxonomy) -> Self {
        let rules = RuleSet::generate(&taxonomy);
        Self { taxonomy, rules }
    }

    pub fn degraded(kind: StatementKind) -> Self {
        Self {
            taxonomy: Taxonomy::empty(kind),
            rules: RuleSet::minimal(kind),
        }
    }
}

/// Taxonomies and rule sets for both statement kinds. Built once, read-only afterwards.
#[derive(Debug, Clone)]
pub struct StatementCatalog {
    balance_sheet: CatalogEntry,
    income_statement: CatalogEntry,
}

impl StatementCatalog {
    pub fn from_taxonomies(
        balance_sheet: Taxonomy,
        income_statement: Taxonomy,
    ) -> Result<Self, TaxonomyError> {
        if balance_sheet.kind() != StatementKind::BalanceSheet
            || income_statement.kind() != StatementKind::IncomeStatement
        {
            return Err(TaxonomyError::Malformed(
                "taxonomies passed for the wrong statement kinds".to_string(),
            ));
        }

        Ok(Self {
            balance_sheet: CatalogEntry::new(balance_sheet),
            income_statement: CatalogEntry::new(income_statement),
        })
    }

    /// Loads the bundled taxonomies, surfacing any problem to the caller.
    pub fn load() -> Result<Self, TaxonomyError> {
        Self::from_taxonomies(
            Taxonomy::builtin(StatementKind::BalanceSheet)?,
            Taxonomy::builtin(StatementKind::IncomeStatement)?,
        )
    }

    /// Like [`StatementCatalog::load`], but a kind whose taxonomy fails to load
    /// runs on [`RuleSet::minimal`] instead.
    pub fn load_or_degrade() -> Self {
        Self::degrade_on_error(
            Taxonomy::builtin(StatementKind::BalanceSheet),
            Taxonomy::builtin(StatementKind::IncomeStatement),
        )
    }

    pub fn degrade_on_error(
        balance_sheet: Result<Taxonomy, TaxonomyError>,
        income_statement: Result<Taxonomy, TaxonomyError>,
    ) -> Self {
        let entry = |kind: StatementKind, loaded: Result<Taxonomy, TaxonomyError>| match loaded {
            Ok(taxonomy) if taxonomy.kind() == kind => CatalogEntry::new(taxonomy),
            Ok(_) => {
                error!("{} taxonomy has the wrong kind, running with minimal rules", kind);
                CatalogEntry::degraded(kind)
            }
            Err(e) => {
                error!("{} taxonomy unavailable ({}), running with minimal rules", kind, e);
                CatalogEntry::degraded(kind)
            }
        };

        Self {
            balance_sheet: entry(StatementKind::BalanceSheet, balance_sheet),
            income_statement: entry(StatementKind::IncomeStatement, income_statement),
        }
    }

    /// Process-wide catalog, initialised on first use.
    pub fn global() -> &'static StatementCatalog {
        GLOBAL_CATALOG.get_or_init(|| {
            let catalog = Self::load_or_degrade();
            info!(
                "Statement catalog ready: {} balance sheet rules, {} income statement rules",
                catalog.balance_sheet.rules.len(),
                catalog.income_statement.rules.len()
            );
            catalog
        })
    }

    pub fn entry(&self, kind: StatementKind) -> &CatalogEntry {
        match kind {
            StatementKind::BalanceSheet => &self.balance_sheet,
            StatementKind::IncomeStatement => &self.income_statement,
        }
    }

    pub fn taxonomy(&self, kind: StatementKind) -> &Taxonomy {
        &self.entry(kind).taxonomy
    }

    pub fn rules(&self, kind: StatementKind) -> &RuleSet {
        &self.entry(kind).rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_count_matches_parent_count() {
        for kind in StatementKind::ALL {
            let taxonomy = Taxonomy::builtin(kind).unwrap();
            let rules = RuleSet::generate(&taxonomy);
            let extra = usize::from(kind == StatementKind::BalanceSheet);
            assert_eq!(rules.sum_rules.len(), taxonomy.parent_count() + extra);
        }
    }

    #[test]
    fn test_parent_rules_precede_descendants() {
        let taxonomy = Taxonomy::builtin(StatementKind::BalanceSheet).unwrap();
        let rules = generate_sum_rules(&taxonomy);

        assert_eq!(rules[0], SumRule::new(1, vec![2, 3, 37, 74]));
        let position = |target: RowId| rules.iter().position(|r| r.target == target).unwrap();
        assert!(position(3) < position(4));
        assert!(position(4) < position(6));
        assert!(position(78) < position(79));
        assert!(position(107) < position(133));
    }

    #[test]
    fn test_fixed_rules() {
        let bs = RuleSet::generate(&Taxonomy::builtin(StatementKind::BalanceSheet).unwrap());
        assert_eq!(bs.sum_rules.last().unwrap(), &SumRule::new(1, vec![78]));
        assert!(bs.signed_rules.is_empty());

        let is = RuleSet::generate(&Taxonomy::builtin(StatementKind::IncomeStatement).unwrap());
        assert_eq!(is.signed_rules.len(), 5);
        assert_eq!(is.signed_rules[1].expression(), "49-50");
        assert_eq!(is.signed_rules[4].expression(), "1+2+20-3-7-8-9-14-24");
    }

    #[test]
    fn test_render_terms_without_leading_plus() {
        let rule = SignedRule::new(7, &[], &[3, 4]);
        assert_eq!(rule.expression(), "-3-4");
        assert_eq!(render_terms(rule.terms.iter().skip(2)), "");
    }

    #[test]
    fn test_degraded_catalog_keeps_fixed_rule_only() {
        let catalog = StatementCatalog::degrade_on_error(
            Err(TaxonomyError::Missing("balance_sheet_index.json".to_string())),
            Taxonomy::from_json(StatementKind::IncomeStatement, "{ broken"),
        );

        let bs = catalog.rules(StatementKind::BalanceSheet);
        assert!(bs.degraded);
        assert_eq!(bs.sum_rules, vec![SumRule::new(1, vec![78])]);

        let is = catalog.rules(StatementKind::IncomeStatement);
        assert!(is.degraded);
        assert!(is.is_empty());
        assert_eq!(catalog.taxonomy(StatementKind::IncomeStatement).label(53), "row 53");
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let bs = Taxonomy::builtin(StatementKind::BalanceSheet).unwrap();
        let also_bs = Taxonomy::builtin(StatementKind::BalanceSheet).unwrap();
        assert!(StatementCatalog::from_taxonomies(bs, also_bs).is_err());
    }

    #[test]
    fn test_global_catalog_is_shared() {
        let first = StatementCatalog::global();
        let second = StatementCatalog::global();
        assert!(std::ptr::eq(first, second));
        assert!(!first.rules(StatementKind::BalanceSheet).degraded);
    }
}
