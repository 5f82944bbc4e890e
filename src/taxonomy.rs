use crate::error::TaxonomyError;
use crate::schema::{RowId, StatementKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

const BALANCE_SHEET_INDEX: &str = include_str!("resources/balance_sheet_index.json");
const PROFIT_AND_LOSS_INDEX: &str = include_str!("resources/profit_and_loss_index.json");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemNode {
    pub id: RowId,
    pub name: String,
    /// Child ids in ascending order.
    pub children: Vec<RowId>,
}

impl LineItemNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Forest of line items for one statement kind, stored as an arena indexed by row id.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    kind: StatementKind,
    nodes: Vec<LineItemNode>,
    index: HashMap<RowId, usize>,
    roots: Vec<RowId>,
}

impl Taxonomy {
    /// Parses the nested `{ "<id>": { "name": ..., "sub_rows": { ... } } }` shape.
    pub fn from_json(kind: StatementKind, text: &str) -> Result<Self, TaxonomyError> {
        let root: Value =
            serde_json::from_str(text).map_err(|e| TaxonomyError::Malformed(e.to_string()))?;
        let top = root.as_object().ok_or_else(|| {
            TaxonomyError::Malformed("top level must be an object keyed by row id".to_string())
        })?;

        let mut taxonomy = Self::empty(kind);

        let mut pending: Vec<(Option<usize>, &Map<String, Value>)> = vec![(None, top)];

        while let Some((parent, entries)) = pending.pop() {
            let mut ids = Vec::with_capacity(entries.len());

            for (key, body) in entries {
                let id = parse_row_id(key)?;
                let body = body.as_object().ok_or_else(|| {
                    TaxonomyError::Malformed(format!("row {}: expected an object", id))
                })?;
                let name = body
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| TaxonomyError::Malformed(format!("row {}: missing 'name'", id)))?
                    .to_string();

                if taxonomy.index.contains_key(&id) {
                    return Err(TaxonomyError::DuplicateRow(id));
                }

                let slot = taxonomy.nodes.len();
                taxonomy.nodes.push(LineItemNode {
                    id,
                    name,
                    children: Vec::new(),
                });
                taxonomy.index.insert(id, slot);
                ids.push(id);

                match body.get("sub_rows") {
                    None | Some(Value::Null) => {}
                    Some(Value::Object(sub)) if sub.is_empty() => {}
                    Some(Value::Object(sub)) => pending.push((Some(slot), sub)),
                    Some(_) => {
                        return Err(TaxonomyError::Malformed(format!(
                            "row {}: 'sub_rows' must be an object",
                            id
                        )))
                    }
                }
            }

            ids.sort_unstable();
            match parent {
                Some(slot) => taxonomy.nodes[slot].children = ids,
                None => taxonomy.roots = ids,
            }
        }

        Ok(taxonomy)
    }

    /// A taxonomy with no rows; every label falls back to the bare row id.
    pub fn empty(kind: StatementKind) -> Self {
        Self {
            kind,
            nodes: Vec::new(),
            index: HashMap::new(),
            roots: Vec::new(),
        }
    }

    pub fn from_path(kind: StatementKind, path: &Path) -> Result<Self, TaxonomyError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TaxonomyError::Missing(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json(kind, &text)
    }

    /// The statutory full-form taxonomy bundled with the crate.
    pub fn builtin(kind: StatementKind) -> Result<Self, TaxonomyError> {
        match kind {
            StatementKind::BalanceSheet => Self::from_json(kind, BALANCE_SHEET_INDEX),
            StatementKind::IncomeStatement => Self::from_json(kind, PROFIT_AND_LOSS_INDEX),
        }
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn roots(&self) -> &[RowId] {
        &self.roots
    }

    pub fn node(&self, id: RowId) -> Option<&LineItemNode> {
        self.index.get(&id).map(|&slot| &self.nodes[slot])
    }

    pub fn name(&self, id: RowId) -> Option<&str> {
        self.node(id).map(|n| n.name.as_str())
    }

    /// `row 99 (Výsledek hospodaření ...)`, or `row 99` for ids the taxonomy does not know.
    pub fn label(&self, id: RowId) -> String {
        match self.name(id) {
            Some(name) => format!("row {} ({})", id, name),
            None => format!("row {}", id),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes with at least one child.
    pub fn parent_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.is_leaf()).count()
    }

    /// Pre-order walk (parents before descendants, siblings by ascending id) with depth.
    pub fn depth_first(&self) -> Vec<(usize, &LineItemNode)> {
        let mut visited = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, RowId)> = self.roots.iter().rev().map(|&id| (0, id)).collect();

        while let Some((depth, id)) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            visited.push((depth, node));
            stack.extend(node.children.iter().rev().map(|&child| (depth + 1, child)));
        }

        visited
    }

    /// One line per row, `<id> <name>`, indented by one tab per level.
    pub fn to_index_string(&self) -> String {
        self.depth_first()
            .into_iter()
            .map(|(depth, node)| format!("{}{} {}", "\t".repeat(depth), node.id, node.name))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn parse_row_id(key: &str) -> Result<RowId, TaxonomyError> {
    key.trim()
        .parse::<RowId>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| TaxonomyError::Malformed(format!("'{}' is not a positive row id", key)))
}
