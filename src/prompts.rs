// Extraction instructions, one per statement kind.

use crate::schema::StatementKind;
use crate::taxonomy::Taxonomy;

pub const BALANCE_SHEET_PROMPT: &str = r#"
Find the balance sheet (rozvaha) in the attached PDF and identify its line items.

The following line items exist:
Označení Položka
{index}

Every item is the sum of the items one indent level deeper.

Some items may be missing from the balance sheet; if so, return 0 for them.
An item may be labelled with an abbreviation or a synonym.
Keep the sign of every item: positive numbers stay positive, negative numbers stay negative.
Check which units the statement is expressed in and use the same units in the output.

For every asset item we need Brutto, Korekce, Netto and Netto for the prior period.
Liability items carry a single state (Netto), so extract Netto and Netto for the prior period.

Return only JSON, nothing else.
Key every item by the numeric "Označení" column.
Format:
{
    "rok": 2024,
    "data": {
        "1": {
            "brutto": 100000,
            "korekce": 10000,
            "netto": 90000,
            "netto_minule": 80000
        },
        "2": {
            "brutto": 50000,
            "korekce": 5000,
            "netto": 45000,
            "netto_minule": 40000
        },
        ...
        "78": {
            "netto": 90000,
            "netto_minule": 80000
        },
        ...
    }
}
"#;

pub const INCOME_STATEMENT_PROMPT: &str = r#"
Find the income statement (výkaz zisku a ztráty) in the attached PDF and identify its line items.

The following line items exist:
Označení Položka
{index}

Every item is the sum of the items one indent level deeper.
Keep the sign of every item: positive numbers stay positive, negative numbers stay negative.
Check which units the statement is expressed in and use the same units in the output.

Some items may be missing from the income statement; if so, return 0 for them.
For every item we need the current and the prior period.

Return only JSON, nothing else.
Format:
{
    "rok": 2024,
    "data": {
        "1": {
            "současné": 100000,
            "minulé": 80000
        },
        "2": {
            "současné": 50000,
            "minulé": 40000
        },
        ...
    }
}
"#;

/// Prompt for `kind` with the taxonomy's indented row index filled in.
pub fn extraction_prompt(kind: StatementKind, taxonomy: &Taxonomy) -> String {
    let template = match kind {
        StatementKind::BalanceSheet => BALANCE_SHEET_PROMPT,
        StatementKind::IncomeStatement => INCOME_STATEMENT_PROMPT,
    };
    template.trim().replace("{index}", &taxonomy.to_index_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_index() {
        let taxonomy = Taxonomy::from_json(
            StatementKind::IncomeStatement,
            r#"{ "49": { "name": "Pre-tax", "sub_rows": { "30": { "name": "Operating" } } } }"#,
        )
        .unwrap();

        let prompt = extraction_prompt(StatementKind::IncomeStatement, &taxonomy);
        assert!(prompt.contains("Označení Položka\n49 Pre-tax\n\t30 Operating\n"));
        assert!(prompt.contains("\"současné\""));
        assert!(!prompt.contains("{index}"));
    }

    #[test]
    fn test_builtin_balance_sheet_prompt() {
        let taxonomy = Taxonomy::builtin(StatementKind::BalanceSheet).unwrap();
        let prompt = extraction_prompt(StatementKind::BalanceSheet, &taxonomy);
        assert!(prompt.starts_with("Find the balance sheet"));
        assert!(prompt.contains("\n78 "));
        assert!(prompt.contains("\"netto_minule\""));
    }
}
