use crate::domain::table::{ObjectLocation, RelationName, TableSpec};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Truncate,
    Copy,
    Delete,
    Insert,
}

/// Warehouse statements issued by the loader and merger. `Display` renders
/// the exact SQL sent to the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Truncate {
        relation: RelationName,
    },
    Copy {
        relation: RelationName,
        source: ObjectLocation,
        iam_role: String,
        /// `None` keeps the warehouse default: any rejected row fails the COPY.
        max_rejected: Option<u32>,
    },
    DeleteMatching {
        target: RelationName,
        staging: RelationName,
        key: Vec<String>,
    },
    InsertSelect {
        target: RelationName,
        staging: RelationName,
    },
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::Truncate { .. } => StatementKind::Truncate,
            Statement::Copy { .. } => StatementKind::Copy,
            Statement::DeleteMatching { .. } => StatementKind::Delete,
            Statement::InsertSelect { .. } => StatementKind::Insert,
        }
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Truncate { relation } => write!(f, "truncate table {};", relation),
            Statement::Copy {
                relation,
                source,
                iam_role,
                max_rejected,
            } => {
                write!(
                    f,
                    "copy {} from {} iam_role {} CSV QUOTE '\"' DELIMITER ',' ignoreheader 1 acceptinvchars",
                    relation,
                    quote_literal(&source.uri()),
                    quote_literal(iam_role)
                )?;
                if let Some(max) = max_rejected {
                    write!(f, " maxerror {}", max)?;
                }
                f.write_str(";")
            }
            Statement::DeleteMatching {
                target,
                staging,
                key,
            } => {
                let predicate = key
                    .iter()
                    .map(|col| format!("{}.{} = {}.{}", target, col, staging, col))
                    .collect::<Vec<_>>()
                    .join(" and ");
                write!(f, "delete from {} using {} where {};", target, staging, predicate)
            }
            Statement::InsertSelect { target, staging } => {
                write!(f, "insert into {} select * from {};", target, staging)
            }
        }
    }
}

/// Scalar queries the pipeline issues outside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    RowCount {
        relation: RelationName,
    },
    /// Number of merge-key tuples held by more than one row.
    DuplicateKeys {
        relation: RelationName,
        key: Vec<String>,
    },
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::RowCount { relation } => write!(f, "select count(*) from {};", relation),
            Query::DuplicateKeys { relation, key } => {
                let cols = key.join(", ");
                write!(
                    f,
                    "select count(*) from (select {} from {} group by {} having count(*) > 1) as dup;",
                    cols, relation, cols
                )
            }
        }
    }
}

/// The full truncate / copy / delete / insert script for one table, in the
/// `begin; … end;` shape existing warehouse jobs expect.
#[derive(Debug, Clone)]
pub struct MergeScript {
    pub load: Vec<Statement>,
    pub merge: Vec<Statement>,
}

impl MergeScript {
    pub fn for_table(
        table: &TableSpec,
        source: &ObjectLocation,
        iam_role: &str,
        max_rejected: Option<u32>,
    ) -> Self {
        Self {
            load: load_statements(&table.staging, source, iam_role, max_rejected),
            merge: merge_statements(&table.staging, &table.target, &table.merge_key),
        }
    }

    pub fn render(&self) -> String {
        let mut lines = vec!["begin;".to_string()];
        lines.extend(self.load.iter().chain(self.merge.iter()).map(|s| s.to_string()));
        lines.push("end;".to_string());
        lines.join("\n")
    }
}

pub fn load_statements(
    staging: &RelationName,
    source: &ObjectLocation,
    iam_role: &str,
    max_rejected: Option<u32>,
) -> Vec<Statement> {
    vec![
        Statement::Truncate {
            relation: staging.clone(),
        },
        Statement::Copy {
            relation: staging.clone(),
            source: source.clone(),
            iam_role: iam_role.to_string(),
            max_rejected,
        },
    ]
}

pub fn merge_statements(
    staging: &RelationName,
    target: &RelationName,
    key: &[String],
) -> Vec<Statement> {
    vec![
        Statement::DeleteMatching {
            target: target.clone(),
            staging: staging.clone(),
            key: key.to_vec(),
        },
        Statement::InsertSelect {
            target: target.clone(),
            staging: staging.clone(),
        },
    ]
}
