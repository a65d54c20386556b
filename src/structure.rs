// ABOUTME: Structure replication from a source table to a new target table
// ABOUTME: Rewrites SHOW CREATE TABLE output, creates the table, and reconciles indexes

use crate::db::query::quote_table;
use crate::db::{Query, Relational};
use crate::error::ReplicatorError;
use crate::introspect::{self, TableLookup};
use crate::model::TableRef;
use anyhow::{bail, Context, Result};
use serde::Serialize;

/// What [`replicate_structure`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructureReport {
    pub source_table: String,
    /// Name the target table was requested under.
    pub requested: String,
    /// Name the target server actually stored.
    pub target_table: String,
    pub case_folded: bool,
    /// `lower_case_table_names` on the target, read when case folding happened.
    pub lower_case_table_names: Option<String>,
    pub indexes_created: Vec<String>,
    pub indexes_skipped: Vec<String>,
    pub indexes_failed: Vec<String>,
}

/// Create `target_name` on the target with the structure of `source_name`.
///
/// Fails with a schema error when the source is missing and with
/// [`ReplicatorError::AlreadyExists`] when the target is already there.
/// Index creation failures are logged and counted but never propagated.
pub async fn replicate_structure(
    source: &mut dyn Relational,
    target: &mut dyn Relational,
    source_name: &TableRef,
    target_name: &TableRef,
) -> Result<StructureReport> {
    target_name.validate()?;
    let source_table = introspect::require_table(source, source_name).await?;

    if introspect::resolve_table(target, target_name).await?.exists() {
        return Err(ReplicatorError::AlreadyExists(target_name.to_string()).into());
    }

    tracing::info!(
        "Copying structure of {} to {}",
        source_table,
        target_name
    );

    let original = introspect::show_create_table(source, &source_table).await?;
    let ddl = strip_auto_increment(&rewrite_create_statement(
        &original,
        &quote_table(target_name)?,
    )?);

    target
        .execute(&Query::CreateTable { ddl: ddl.clone() })
        .await
        .with_context(|| format!("Failed to create table {} on target", target_name))?;

    let stored = match introspect::resolve_table(target, target_name).await? {
        TableLookup::Exact(stored) => stored,
        TableLookup::CaseMismatch { stored, .. } => stored,
        TableLookup::Missing => {
            return Err(ReplicatorError::Schema(format!(
                "Table {} was created but cannot be found on the target",
                target_name
            ))
            .into())
        }
    };

    let case_folded = stored.name != target_name.name;
    let lower_case_table_names = if case_folded {
        let setting = introspect::server_variable(target, "lower_case_table_names").await;
        tracing::info!(
            "Target stored table {} as {} (lower_case_table_names = {})",
            target_name.name,
            stored.name,
            setting.as_deref().unwrap_or("unknown")
        );
        setting
    } else {
        None
    };

    let description = introspect::describe_table(source, &source_table).await?;
    let lowered = ddl.to_lowercase();
    let mut report = StructureReport {
        source_table: source_table.name.clone(),
        requested: target_name.name.clone(),
        target_table: stored.name.clone(),
        case_folded,
        lower_case_table_names,
        indexes_created: Vec::new(),
        indexes_skipped: Vec::new(),
        indexes_failed: Vec::new(),
    };

    for index in description.indexes.iter().filter(|i| !i.is_primary()) {
        if index_embedded(&lowered, &index.name) {
            tracing::debug!("Index {} already part of CREATE TABLE", index.name);
            report.indexes_skipped.push(index.name.clone());
            continue;
        }
        let add = Query::AddIndex {
            table: stored.clone(),
            index: index.clone(),
        };
        match target.execute(&add).await {
            Ok(_) => {
                tracing::info!("Created index {} on {}", index.name, stored);
                report.indexes_created.push(index.name.clone());
            }
            Err(e) => {
                tracing::warn!("Could not create index {} on {}: {:#}", index.name, stored, e);
                report.indexes_failed.push(index.name.clone());
            }
        }
    }

    tracing::info!(
        "Structure of {} copied to {} ({} indexes created, {} embedded, {} failed)",
        report.source_table,
        report.target_table,
        report.indexes_created.len(),
        report.indexes_skipped.len(),
        report.indexes_failed.len()
    );
    Ok(report)
}

/// Replace the table name in a `CREATE TABLE` statement.
///
/// `quoted_name` is substituted verbatim for the identifier following
/// `CREATE TABLE`, whatever its original spelling or quoting.
///
/// # Examples
///
/// ```
/// # use table_replicator::structure::rewrite_create_statement;
/// let ddl = "CREATE TABLE `BAS_SKU` (\n  `id` int NOT NULL\n)";
/// let rewritten = rewrite_create_statement(ddl, "`bas_sku_copy`").unwrap();
/// assert_eq!(rewritten, "CREATE TABLE `bas_sku_copy` (\n  `id` int NOT NULL\n)");
/// ```
pub fn rewrite_create_statement(ddl: &str, quoted_name: &str) -> Result<String> {
    const PREFIX: &str = "create table";
    let start = ddl
        .to_ascii_lowercase()
        .find(PREFIX)
        .context("Definition does not contain CREATE TABLE")?;
    let after_prefix = start + PREFIX.len();
    let rest = &ddl[after_prefix..];
    let name_start = after_prefix + (rest.len() - rest.trim_start().len());
    let name_end = name_start + identifier_token_len(&ddl[name_start..])?;
    Ok(format!(
        "{}{}{}",
        &ddl[..name_start],
        quoted_name,
        &ddl[name_end..]
    ))
}

/// Length of a possibly qualified, possibly backtick-quoted identifier.
fn identifier_token_len(text: &str) -> Result<usize> {
    let bytes = text.as_bytes();
    let mut i = 0;
    loop {
        if bytes.get(i) == Some(&b'`') {
            i += 1;
            loop {
                match bytes.get(i) {
                    Some(b'`') if bytes.get(i + 1) == Some(&b'`') => i += 2,
                    Some(b'`') => {
                        i += 1;
                        break;
                    }
                    Some(_) => i += 1,
                    None => bail!("Unterminated quoted identifier in CREATE TABLE"),
                }
            }
        } else {
            let len = text[i..]
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
                .unwrap_or(text.len() - i);
            if len == 0 {
                bail!("CREATE TABLE is not followed by a table name");
            }
            i += len;
        }
        if bytes.get(i) == Some(&b'.') {
            i += 1;
        } else {
            return Ok(i);
        }
    }
}

/// Remove the `AUTO_INCREMENT=<n>` table option, keeping column attributes.
///
/// # Examples
///
/// ```
/// # use table_replicator::structure::strip_auto_increment;
/// let ddl = "CREATE TABLE `t` (`id` int NOT NULL AUTO_INCREMENT) ENGINE=InnoDB AUTO_INCREMENT=42 DEFAULT CHARSET=utf8mb4";
/// assert_eq!(
///     strip_auto_increment(ddl),
///     "CREATE TABLE `t` (`id` int NOT NULL AUTO_INCREMENT) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
/// );
/// ```
pub fn strip_auto_increment(ddl: &str) -> String {
    const OPTION: &str = "auto_increment=";
    let mut out = String::with_capacity(ddl.len());
    let mut rest = ddl;
    loop {
        let Some(pos) = rest.to_ascii_lowercase().find(OPTION) else {
            out.push_str(rest);
            return out;
        };
        let digits_start = pos + OPTION.len();
        let digits = rest[digits_start..]
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len() - digits_start);
        if digits == 0 {
            out.push_str(&rest[..digits_start]);
            rest = &rest[digits_start..];
            continue;
        }
        let mut head = &rest[..pos];
        if head.ends_with(' ') {
            head = &head[..head.len() - 1];
        }
        out.push_str(head);
        rest = &rest[digits_start + digits..];
    }
}

/// True when the lowercased CREATE text already declares this index.
pub fn index_embedded(lowered_ddl: &str, index_name: &str) -> bool {
    let name = index_name.to_lowercase();
    ["key", "index", "unique key", "unique index"]
        .iter()
        .any(|kind| lowered_ddl.contains(&format!("{} `{}`", kind, name)))
}
