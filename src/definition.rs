//! Declarative binding definitions.
//!
//! Definitions are TOML documents holding one or more `[[binding_set]]`
//! tables. They are deserialized into the plain structs below and turned
//! into [`crate::binding::BindingSet`]s by the registry. Cross references
//! (relation targets) are names only at this stage.
//!
//! ```toml
//! [[binding_set]]
//! id = "orders"
//! table = "sales.orders"
//! data_source = "main"
//!
//! [[binding_set.column]]
//! id = "customer_id"
//! type = "INTEGER"
//!
//! [[binding_set.relation]]
//! join = "leftOuter"
//! right = "customers"
//! imports = { default = { prefix = "cust_" } }
//! condition = { kind = "compare", op = "eq", operands = [
//!     { ref = "customer_id", side = "left" },
//!     { ref = "id", side = "right" },
//! ] }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::BinderyError;
use crate::value::Value;

/// Data source used when a definition names none.
pub const DEFAULT_DATA_SOURCE: &str = "default";

fn default_data_source() -> String {
    DEFAULT_DATA_SOURCE.to_string()
}

/// A whole definition document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionFile {
    #[serde(default, rename = "binding_set")]
    pub binding_sets: Vec<BindingSetDef>,
}

/// One binding set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingSetDef {
    pub id: String,
    /// Physical table or view name.
    #[serde(default)]
    pub table: Option<String>,
    /// Derived-table SQL, used instead of `table`.
    #[serde(default)]
    pub derived: Option<String>,
    #[serde(default = "default_data_source")]
    pub data_source: String,
    #[serde(default, rename = "column")]
    pub columns: Vec<ColumnDef>,
    #[serde(default, rename = "relation")]
    pub relations: Vec<RelationDef>,
    #[serde(default)]
    pub write_processing: Option<WriteProcessingDef>,
    #[serde(default)]
    pub subject_filters: Option<SubjectFiltersDef>,
    /// File the definition was read from, for diagnostics.
    #[serde(skip)]
    pub source_file: Option<PathBuf>,
    /// Relations replaced by CASE-WHEN conversion.
    #[serde(skip)]
    pub converted_relations: Vec<ConvertedRelation>,
}

impl BindingSetDef {
    /// Source file label used in log events.
    pub fn file_label(&self) -> String {
        self.source_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<inline>".to_string())
    }
}

/// One column of a binding set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnDef {
    pub id: String,
    /// Column expression; defaults to `id`.
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default, rename = "type")]
    pub jdbc_type: Option<String>,
    #[serde(default)]
    pub size: Option<i32>,
    #[serde(default)]
    pub scale: Option<i32>,
    #[serde(default)]
    pub nullable: Option<bool>,
    #[serde(default)]
    pub signed: Option<bool>,
    #[serde(default)]
    pub key: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub aggr: Option<String>,
    /// Namespaced custom attributes, e.g. `"ui:caption"`.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Join type of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum JoinType {
    Inner,
    #[default]
    LeftOuter,
    RightOuter,
}

impl JoinType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::LeftOuter => "LEFT OUTER JOIN",
            JoinType::RightOuter => "RIGHT OUTER JOIN",
        }
    }

    pub fn is_outer(&self) -> bool {
        !matches!(self, JoinType::Inner)
    }
}

/// One relation (join) to another binding set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationDef {
    #[serde(default)]
    pub join: JoinType,
    /// Name of the right-hand binding set.
    pub right: String,
    /// Inline the join as CASE expressions at load time.
    #[serde(default)]
    pub case_when: bool,
    #[serde(default, deserialize_with = "one_or_many")]
    pub imports: Vec<ImportsDef>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub condition: Vec<ConditionDef>,
}

impl RelationDef {
    /// The single imports element, if any. More than one is an error.
    pub fn single_imports(&self, context: &str) -> Result<Option<&ImportsDef>, BinderyError> {
        match self.imports.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(one)),
            _ => Err(BinderyError::DuplicateElement {
                element: "imports".into(),
                context: context.to_string(),
            }),
        }
    }

    /// The single condition element. Missing or repeated is an error.
    pub fn single_condition(&self, context: &str) -> Result<&ConditionDef, BinderyError> {
        match self.condition.as_slice() {
            [one] => Ok(one),
            [] => Err(BinderyError::InvalidDefinition(format!(
                "{context}: relation has no condition"
            ))),
            _ => Err(BinderyError::DuplicateElement {
                element: "condition".into(),
                context: context.to_string(),
            }),
        }
    }
}

/// Import specification of a relation: either all right-hand columns with a
/// prefix, or an explicit list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportsDef {
    #[serde(default)]
    pub default: Option<DefaultImportDef>,
    #[serde(default, rename = "item")]
    pub items: Vec<ImportItemDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultImportDef {
    #[serde(default)]
    pub prefix: Option<String>,
}

/// One explicitly imported column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportItemDef {
    /// Name the item is exposed under in the left binding set.
    pub name: String,
    #[serde(default)]
    pub caption: Option<String>,
    /// Right-hand item id.
    #[serde(default, rename = "ref")]
    pub item: Option<String>,
    /// Alternatively, a coalesce over one right-hand item and constants.
    #[serde(default)]
    pub coalesce: Option<Vec<OperandDef>>,
}

/// Which table of a relation an operand belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Side {
    Left,
    Right,
}

/// An operand in a condition or import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperandDef {
    Ref {
        #[serde(rename = "ref")]
        item: String,
        #[serde(default)]
        side: Option<Side>,
    },
    Constant {
        constant: Value,
    },
    Coalesce {
        coalesce: Vec<OperandDef>,
    },
}

/// Comparison operator as written in definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOpDef {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A node of a join condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConditionDef {
    Compare {
        op: CompareOpDef,
        #[serde(default)]
        negate: bool,
        operands: Vec<OperandDef>,
    },
    IsNull {
        #[serde(default)]
        negate: bool,
        operand: OperandDef,
    },
    Like {
        #[serde(default)]
        negate: bool,
        operands: Vec<OperandDef>,
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        suffix: String,
    },
    And {
        children: Vec<ConditionDef>,
    },
    Or {
        children: Vec<ConditionDef>,
    },
    AndNot {
        children: Vec<ConditionDef>,
    },
    OrNot {
        children: Vec<ConditionDef>,
    },
}

/// Ordered write callbacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteProcessingDef {
    #[serde(default, rename = "callback")]
    pub callbacks: Vec<CallbackDef>,
}

/// One write callback: implementation key plus opaque parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallbackDef {
    pub implementation: String,
    #[serde(default)]
    pub params: Vec<ParamDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ParamDef {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// How several subject filters combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Connective {
    #[default]
    And,
    Or,
}

/// Row-level security policy of a binding set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubjectFiltersDef {
    #[serde(default)]
    pub connective: Connective,
    #[serde(default, rename = "filter")]
    pub filters: Vec<SubjectFilterDef>,
}

/// Match mode of a subject filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    #[default]
    Eq,
    Like,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubjectFilterDef {
    /// Enforced binding item id.
    pub column: String,
    /// Permission type looked up on the principal; defaults to `column`.
    #[serde(default)]
    pub policy_type: Option<String>,
    #[serde(default)]
    pub op: FilterOp,
    #[serde(default)]
    pub allow_null: bool,
}

/// Audit record of a relation replaced by CASE-WHEN conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedRelation {
    pub right: String,
    /// The original relation definition, serialized as JSON.
    pub original: String,
    /// Ids of the computed items that replaced the relation's imports.
    pub generated_items: Vec<String>,
}

// ── Loading ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// Accept either a single element or a list; validation of the count
/// happens later so repeated elements get a proper configuration error.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(one) => vec![one],
        OneOrMany::Many(many) => many,
    })
}

/// Parse a definition document.
pub fn parse_definitions(
    doc: &str,
    source_file: Option<&Path>,
) -> Result<Vec<BindingSetDef>, BinderyError> {
    let file: DefinitionFile = toml::from_str(doc).map_err(|e| {
        let label = source_file
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<inline>".to_string());
        BinderyError::Parse(format!("{label}: {e}"))
    })?;
    Ok(file
        .binding_sets
        .into_iter()
        .map(|mut def| {
            def.source_file = source_file.map(Path::to_path_buf);
            def
        })
        .collect())
}

/// Read every `*.toml` definition file in `dir`, in file-name order.
pub fn load_dir(dir: &Path) -> Result<Vec<BindingSetDef>, BinderyError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut defs = Vec::new();
    for path in paths {
        let doc = std::fs::read_to_string(&path)?;
        defs.extend(parse_definitions(&doc, Some(&path))?);
    }
    Ok(defs)
}
