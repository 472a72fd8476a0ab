//! Schema inspection for `check <rev>` and revision autogeneration.
//!
//! Statements are parsed with `sqlparser` using the SQLite dialect. The
//! comparison is table-level: a table is either declared or not.

use rusqlite::{params, Connection};
use sqlparser::ast::Statement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use tracing::debug;

use crate::ledger::quote_ident;
use crate::{Error, Result};

/// One statement of a revision, as shown by `check <rev>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRow {
    pub operation: String,
    pub statement: String,
}

/// Lists the statements of `sql` with a short operation label.
///
/// SQL the parser does not understand is listed verbatim, one row per
/// `;`-separated chunk.
pub fn describe_operations(sql: &str) -> Vec<OperationRow> {
    match Parser::parse_sql(&SQLiteDialect {}, sql) {
        Ok(statements) => statements
            .iter()
            .map(|statement| OperationRow {
                operation: operation_label(statement).to_string(),
                statement: statement.to_string(),
            })
            .collect(),
        Err(e) => {
            debug!(error = %e, "falling back to raw statements");
            sql.split(';')
                .map(str::trim)
                .filter(|chunk| !chunk.is_empty())
                .map(|chunk| OperationRow {
                    operation: "Execute".to_string(),
                    statement: chunk.to_string(),
                })
                .collect()
        }
    }
}

fn operation_label(statement: &Statement) -> &'static str {
    match statement {
        Statement::CreateTable { .. } => "Create table",
        Statement::CreateIndex { .. } => "Create index",
        Statement::CreateView { .. } => "Create view",
        Statement::AlterTable { .. } => "Alter table",
        Statement::Drop { .. } => "Drop",
        Statement::Insert { .. } => "Insert",
        Statement::Update { .. } => "Update",
        Statement::Delete { .. } => "Delete",
        _ => "Execute",
    }
}

/// A table with the statement that creates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub sql: String,
}

/// `CREATE TABLE` statements declared in a schema file.
pub fn declared_tables(schema_sql: &str) -> Result<Vec<TableDef>> {
    let statements = Parser::parse_sql(&SQLiteDialect {}, schema_sql)
        .map_err(|e| Error::Schema(e.to_string()))?;

    Ok(statements
        .iter()
        .filter_map(|statement| match statement {
            Statement::CreateTable(create) => Some(TableDef {
                name: unquote(&create.name.to_string()),
                sql: statement.to_string(),
            }),
            _ => None,
        })
        .collect())
}

/// User tables of the database, skipping SQLite internals and `ignore`.
pub fn database_tables(conn: &Connection, ignore: &[&str]) -> Result<Vec<TableDef>> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables = stmt
        .query_map(params![], |row| {
            Ok(TableDef {
                name: row.get(0)?,
                sql: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(tables
        .into_iter()
        .filter(|t| !ignore.iter().any(|i| i.eq_ignore_ascii_case(&t.name)))
        .collect())
}

/// Table-level difference between a schema file and a database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    /// Declared but missing from the database.
    pub added: Vec<TableDef>,
    /// Present in the database but no longer declared.
    pub removed: Vec<TableDef>,
}

impl SchemaDiff {
    pub fn compute(declared: &[TableDef], existing: &[TableDef]) -> Self {
        let contains = |tables: &[TableDef], name: &str| {
            tables.iter().any(|t| t.name.eq_ignore_ascii_case(name))
        };

        Self {
            added: declared
                .iter()
                .filter(|t| !contains(existing, &t.name))
                .cloned()
                .collect(),
            removed: existing
                .iter()
                .filter(|t| !contains(declared, &t.name))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn upgrade_sql(&self) -> String {
        let creates = self.added.iter().map(|t| format!("{};", t.sql));
        let drops = self
            .removed
            .iter()
            .map(|t| format!("DROP TABLE {};", quote_ident(&t.name)));
        creates.chain(drops).collect::<Vec<_>>().join("\n")
    }

    /// Reverses [`upgrade_sql`](Self::upgrade_sql), recreating dropped tables
    /// from their stored definition.
    pub fn downgrade_sql(&self) -> String {
        let drops = self
            .added
            .iter()
            .rev()
            .map(|t| format!("DROP TABLE {};", quote_ident(&t.name)));
        let creates = self.removed.iter().map(|t| format!("{};", t.sql));
        drops.chain(creates).collect::<Vec<_>>().join("\n")
    }
}

fn unquote(name: &str) -> String {
    let last = name.rsplit('.').next().unwrap_or(name);
    last.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'))
        .to_string()
}
