// ABOUTME: In-memory Relational implementation used by the integration tests
// ABOUTME: Interprets typed queries against tables held in memory, with failure injection

#![allow(dead_code)]

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use table_replicator::db::{FieldMeta, Query, Relational, ResultSet};
use table_replicator::model::IndexDescriptor;
use table_replicator::{Row, Side, TableRef, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub length: Option<u32>,
    pub nullable: bool,
    /// `utf8mb4_bin` instead of the default case-insensitive collation.
    pub case_sensitive: bool,
}

impl ColumnDef {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_ascii_lowercase(),
            length: None,
            nullable: true,
            case_sensitive: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    /// Equality under this column's collation.
    fn values_equal(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Text(x), Value::Text(y)) if self.case_sensitive => {
                x.trim_end_matches(' ') == y.trim_end_matches(' ')
            }
            _ => cmp_value(a, b) == Ordering::Equal,
        }
    }

    fn ddl(&self) -> String {
        let type_text = match self.length {
            Some(n) if has_length(&self.data_type) => format!("{}({})", self.data_type, n),
            _ => self.data_type.clone(),
        };
        let null = if self.nullable {
            "DEFAULT NULL"
        } else {
            "NOT NULL"
        };
        let collation = if self.case_sensitive {
            " COLLATE utf8mb4_bin"
        } else {
            ""
        };
        format!("`{}` {}{} {}", self.name, type_text, collation, null)
    }
}

fn has_length(data_type: &str) -> bool {
    matches!(data_type, "varchar" | "char")
}

pub fn int(name: &str) -> ColumnDef {
    ColumnDef::new(name, "int")
}

pub fn varchar(name: &str, length: u32) -> ColumnDef {
    let mut column = ColumnDef::new(name, "varchar");
    column.length = Some(length);
    column
}

pub fn datetime(name: &str) -> ColumnDef {
    ColumnDef::new(name, "datetime")
}

pub fn date(name: &str) -> ColumnDef {
    ColumnDef::new(name, "date")
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexDescriptor>,
    pub rows: Vec<Row>,
}

impl TableDef {
    pub fn new(name: &str, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.to_string(),
            columns,
            primary_key: Vec::new(),
            indexes: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        for column in &mut self.columns {
            if self
                .primary_key
                .iter()
                .any(|k| k.eq_ignore_ascii_case(&column.name))
            {
                column.nullable = false;
            }
        }
        self
    }

    pub fn index(mut self, name: &str, columns: &[&str], unique: bool) -> Self {
        self.indexes.push(IndexDescriptor {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        });
        self
    }

    pub fn rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(column))
    }

    fn positions(&self, columns: &[String]) -> Result<Vec<usize>> {
        columns
            .iter()
            .map(|c| {
                self.position(c)
                    .ok_or_else(|| anyhow!("Unknown column '{}' in '{}'", c, self.name))
            })
            .collect()
    }

    /// Key equality where each position compares under its column's collation.
    fn keys_match(&self, positions: &[usize], a: &[Value], b: &[Value]) -> bool {
        a.len() == positions.len()
            && b.len() == positions.len()
            && positions
                .iter()
                .zip(a.iter().zip(b.iter()))
                .all(|(&i, (x, y))| self.columns[i].values_equal(x, y))
    }

    fn fields(&self) -> Vec<FieldMeta> {
        self.columns
            .iter()
            .map(|c| FieldMeta {
                name: c.name.clone(),
                type_name: c.data_type.clone(),
                length: c.length,
                not_null: Some(!c.nullable),
            })
            .collect()
    }

    fn sorted_rows(&self, order_by: &[String]) -> Result<Vec<Row>> {
        let positions = self.positions(order_by)?;
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| cmp_keys(&project(a, &positions), &project(b, &positions)));
        Ok(rows)
    }

    fn ddl(&self, include_indexes: bool) -> String {
        let mut items: Vec<String> = self.columns.iter().map(ColumnDef::ddl).collect();
        if !self.primary_key.is_empty() {
            items.push(format!("PRIMARY KEY ({})", quoted_list(&self.primary_key)));
        }
        if include_indexes {
            for index in &self.indexes {
                let kind = if index.unique { "UNIQUE KEY" } else { "KEY" };
                items.push(format!(
                    "{} `{}` ({})",
                    kind,
                    index.name,
                    quoted_list(&index.columns)
                ));
            }
        }
        let auto_increment = if self.primary_key.is_empty() {
            String::new()
        } else {
            format!(" AUTO_INCREMENT={}", self.rows.len() + 1)
        };
        format!(
            "CREATE TABLE `{}` (\n  {}\n) ENGINE=InnoDB{} DEFAULT CHARSET=utf8mb4",
            self.name,
            items.join(",\n  "),
            auto_increment
        )
    }
}

fn quoted_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("`{}`", c))
        .collect::<Vec<_>>()
        .join(",")
}

fn project(row: &Row, positions: &[usize]) -> Vec<Value> {
    positions
        .iter()
        .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
        .collect()
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Int(_) | Value::UInt(_) | Value::Float(_) | Value::Double(_) => 1,
        Value::Text(_) | Value::Bytes(_) => 2,
        Value::Date(_) | Value::DateTime(_) => 3,
        Value::Time(_) => 4,
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int(v) => *v as f64,
        Value::UInt(v) => *v as f64,
        Value::Float(v) => f64::from(*v),
        Value::Double(v) => *v,
        _ => 0.0,
    }
}

/// Ordering under a case-insensitive, pad-space collation.
pub fn cmp_value(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::UInt(x), Value::UInt(y)) => x.cmp(y),
        (Value::Int(x), Value::UInt(y)) => i128::from(*x).cmp(&i128::from(*y)),
        (Value::UInt(x), Value::Int(y)) => i128::from(*x).cmp(&i128::from(*y)),
        _ if rank(a) == 1 && rank(b) == 1 => {
            as_f64(a).partial_cmp(&as_f64(b)).unwrap_or(Ordering::Equal)
        }
        _ if rank(a) == 2 && rank(b) == 2 => collate(a).cmp(&collate(b)),
        _ if rank(a) != rank(b) && rank(a) != 2 && rank(b) != 2 => rank(a).cmp(&rank(b)),
        _ => collate(a).cmp(&collate(b)),
    }
}

fn collate(value: &Value) -> String {
    value
        .to_field()
        .unwrap_or_default()
        .trim_end_matches(' ')
        .to_lowercase()
}

fn cmp_keys(a: &[Value], b: &[Value]) -> Ordering {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| cmp_value(x, y))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// `<=>`: NULL matches NULL, otherwise collation equality.
fn null_safe_equal(a: &Value, b: &Value) -> bool {
    match (a.is_null(), b.is_null()) {
        (true, true) => true,
        (false, false) => cmp_value(a, b) == Ordering::Equal,
        _ => false,
    }
}

type Databases = HashMap<String, Vec<TableDef>>;

#[derive(Default)]
struct ServerState {
    databases: Databases,
    lower_case_table_names: u8,
    omit_indexes_from_ddl: bool,
    fail_insert_at: Option<usize>,
    inserts: usize,
    failing_indexes: HashSet<String>,
    queries: HashMap<String, ResultSet>,
    labels: Vec<&'static str>,
}

impl ServerState {
    fn tables(&self, database: &str) -> Option<&Vec<TableDef>> {
        self.databases.get(&database.to_ascii_lowercase())
    }

    fn find(&self, database: &str, name: &str) -> Option<&TableDef> {
        self.tables(database)?
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    fn find_mut(&mut self, database: &str, name: &str) -> Option<&mut TableDef> {
        self.databases
            .get_mut(&database.to_ascii_lowercase())?
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

/// A fake MySQL server holding any number of databases.
#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn create_database(&self, database: &str) {
        self.state()
            .databases
            .entry(database.to_ascii_lowercase())
            .or_default();
    }

    pub fn add_table(&self, database: &str, table: TableDef) {
        self.state()
            .databases
            .entry(database.to_ascii_lowercase())
            .or_default()
            .push(table);
    }

    pub fn table(&self, database: &str, name: &str) -> Option<TableDef> {
        self.state().find(database, name).cloned()
    }

    pub fn rows(&self, database: &str, name: &str) -> Vec<Row> {
        self.table(database, name)
            .map(|t| t.rows)
            .unwrap_or_default()
    }

    pub fn table_names(&self, database: &str) -> Vec<String> {
        self.state()
            .tables(database)
            .map(|tables| tables.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn delete_rows(&self, database: &str, name: &str, predicate: impl Fn(&Row) -> bool) {
        if let Some(table) = self.state().find_mut(database, name) {
            table.rows.retain(|row| !predicate(row));
        }
    }

    pub fn insert_rows(&self, database: &str, name: &str, rows: Vec<Row>) {
        if let Some(table) = self.state().find_mut(database, name) {
            table.rows.extend(rows);
        }
    }

    /// Store newly created table names in lowercase, as `lower_case_table_names = 1` does.
    pub fn fold_table_names(&self) {
        self.state().lower_case_table_names = 1;
    }

    /// Leave secondary indexes out of `SHOW CREATE TABLE` output.
    pub fn omit_indexes_from_ddl(&self) {
        self.state().omit_indexes_from_ddl = true;
    }

    /// Fail the `n`-th INSERT from now (1-based).
    pub fn fail_insert_at(&self, n: usize) {
        let mut state = self.state();
        state.inserts = 0;
        state.fail_insert_at = Some(n);
    }

    pub fn fail_index(&self, name: &str) {
        self.state().failing_indexes.insert(name.to_string());
    }

    /// Answer custom SQL text with a canned result.
    pub fn register_query(&self, sql: &str, result: ResultSet) {
        self.state().queries.insert(sql.trim().to_string(), result);
    }

    /// Labels of every statement run so far, in order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.state().labels.clone()
    }

    pub fn count_label(&self, label: &str) -> usize {
        self.state().labels.iter().filter(|l| **l == label).count()
    }

    pub fn connect(&self, database: &str, side: Side) -> MemoryConnection {
        self.create_database(database);
        MemoryConnection {
            server: self.clone(),
            database: database.to_string(),
            side,
            snapshot: None,
        }
    }
}

pub struct MemoryConnection {
    server: MemoryServer,
    database: String,
    side: Side,
    snapshot: Option<Databases>,
}

impl MemoryConnection {
    fn schema_of<'a>(&'a self, table: &'a TableRef) -> &'a str {
        table.schema.as_deref().unwrap_or(&self.database)
    }

    fn require<'s>(&self, state: &'s ServerState, table: &TableRef) -> Result<&'s TableDef> {
        state
            .find(self.schema_of(table), &table.name)
            .ok_or_else(|| anyhow!("Table '{}.{}' doesn't exist", self.schema_of(table), table.name))
    }

    fn custom_result(&self, state: &ServerState, sql: &str) -> Result<ResultSet> {
        let sql = sql.trim();
        if let Some(result) = state.queries.get(sql) {
            return Ok(result.clone());
        }
        // SELECT * FROM <table>
        let lowered = sql.to_ascii_lowercase();
        if let Some(rest) = lowered.strip_prefix("select * from ") {
            let name = rest.trim().trim_matches('`');
            let table = self.require(state, &TableRef::new(name))?;
            return Ok(ResultSet {
                fields: table.fields(),
                rows: table.rows.clone(),
            });
        }
        bail!("Unsupported custom query: {}", sql)
    }

    fn missing_rows(
        &self,
        state: &ServerState,
        source: &TableRef,
        target: &TableRef,
        primary_key: &[String],
    ) -> Result<(Vec<FieldMeta>, Vec<Row>)> {
        let source_table = self.require(state, source)?;
        let target_table = self.require(state, target)?;
        let source_keys = source_table.positions(primary_key)?;
        let target_keys = target_table.positions(primary_key)?;
        let present: Vec<Vec<Value>> = target_table
            .rows
            .iter()
            .map(|row| project(row, &target_keys))
            .collect();
        let rows = source_table
            .sorted_rows(primary_key)?
            .into_iter()
            .filter(|row| {
                let key = project(row, &source_keys);
                !present.iter().any(|p| target_table.keys_match(&target_keys, p, &key))
            })
            .collect();
        Ok((source_table.fields(), rows))
    }

    fn run_query(&self, state: &ServerState, query: &Query) -> Result<ResultSet> {
        let single = |name: &str, value: Value| ResultSet {
            fields: vec![FieldMeta::new(name, "bigint")],
            rows: vec![vec![value]],
        };
        match query {
            Query::Ping => Ok(single("1", Value::Int(1))),
            Query::LookupTable { table } => {
                let rows = state
                    .tables(self.schema_of(table))
                    .map(|tables| {
                        tables
                            .iter()
                            .filter(|t| t.name.eq_ignore_ascii_case(&table.name))
                            .map(|t| vec![Value::text(t.name.clone())])
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(ResultSet {
                    fields: vec![FieldMeta::new("TABLE_NAME", "varchar")],
                    rows,
                })
            }
            Query::Columns { table } => {
                let def = self.require(state, table)?;
                let rows = def
                    .columns
                    .iter()
                    .map(|c| {
                        let key = if def.primary_key.iter().any(|k| k.eq_ignore_ascii_case(&c.name)) {
                            "PRI"
                        } else {
                            ""
                        };
                        vec![
                            Value::text(c.name.clone()),
                            Value::text(c.data_type.clone()),
                            c.length.map(|n| Value::UInt(u64::from(n))).unwrap_or(Value::Null),
                            Value::text(if c.nullable { "YES" } else { "NO" }),
                            Value::text(key),
                        ]
                    })
                    .collect();
                Ok(ResultSet {
                    fields: Vec::new(),
                    rows,
                })
            }
            Query::IndexColumns { table } => {
                let def = self.require(state, table)?;
                let mut rows = Vec::new();
                for (seq, column) in def.primary_key.iter().enumerate() {
                    rows.push(vec![
                        Value::text("PRIMARY"),
                        Value::text(column.clone()),
                        Value::Int(0),
                        Value::Int(seq as i64 + 1),
                    ]);
                }
                for index in &def.indexes {
                    for (seq, column) in index.columns.iter().enumerate() {
                        rows.push(vec![
                            Value::text(index.name.clone()),
                            Value::text(column.clone()),
                            Value::Int(if index.unique { 0 } else { 1 }),
                            Value::Int(seq as i64 + 1),
                        ]);
                    }
                }
                Ok(ResultSet {
                    fields: Vec::new(),
                    rows,
                })
            }
            Query::ShowCreateTable { table } => {
                let def = self.require(state, table)?;
                Ok(ResultSet {
                    fields: vec![
                        FieldMeta::new("Table", "varchar"),
                        FieldMeta::new("Create Table", "varchar"),
                    ],
                    rows: vec![vec![
                        Value::text(def.name.clone()),
                        Value::text(def.ddl(!state.omit_indexes_from_ddl)),
                    ]],
                })
            }
            Query::ServerVariable { name } => match name.as_str() {
                "lower_case_table_names" => Ok(single(
                    "value",
                    Value::Int(i64::from(state.lower_case_table_names)),
                )),
                _ => Ok(ResultSet::default()),
            },
            Query::CountRows { table } => {
                let def = self.require(state, table)?;
                Ok(single("total", Value::Int(def.rows.len() as i64)))
            }
            Query::Select {
                table,
                order_by,
                limit,
                offset,
            } => {
                let def = self.require(state, table)?;
                let rows = def
                    .sorted_rows(order_by)?
                    .into_iter()
                    .skip(offset.unwrap_or(0) as usize)
                    .take(limit.map(|n| n as usize).unwrap_or(usize::MAX))
                    .collect();
                Ok(ResultSet {
                    fields: def.fields(),
                    rows,
                })
            }
            Query::MissingRows {
                source,
                target,
                primary_key,
                limit,
            } => {
                let (fields, rows) = self.missing_rows(state, source, target, primary_key)?;
                Ok(ResultSet {
                    fields,
                    rows: rows.into_iter().take(*limit as usize).collect(),
                })
            }
            Query::CountMissingRows {
                source,
                target,
                primary_key,
            } => {
                let (_, rows) = self.missing_rows(state, source, target, primary_key)?;
                Ok(single("total", Value::Int(rows.len() as i64)))
            }
            Query::RowsAfterKey {
                table,
                primary_key,
                after,
                limit,
            } => {
                let def = self.require(state, table)?;
                let keys = def.positions(primary_key)?;
                let rows = def
                    .sorted_rows(primary_key)?
                    .into_iter()
                    .filter(|row| match after {
                        Some(after) => cmp_keys(&project(row, &keys), after) == Ordering::Greater,
                        None => true,
                    })
                    .take(*limit as usize)
                    .collect();
                Ok(ResultSet {
                    fields: def.fields(),
                    rows,
                })
            }
            Query::ExistingKeys {
                table,
                primary_key,
                keys,
            } => {
                let def = self.require(state, table)?;
                let positions = def.positions(primary_key)?;
                let stored: Vec<Vec<Value>> =
                    def.rows.iter().map(|row| project(row, &positions)).collect();
                let rows = keys
                    .iter()
                    .enumerate()
                    .filter(|(_, key)| stored.iter().any(|s| def.keys_match(&positions, s, key)))
                    .map(|(i, _)| vec![Value::Int(i as i64)])
                    .collect();
                Ok(ResultSet {
                    fields: vec![FieldMeta::new("key_position", "bigint")],
                    rows,
                })
            }
            Query::RowExists {
                table,
                columns,
                values,
            } => {
                let def = self.require(state, table)?;
                let positions = def.positions(columns)?;
                let found = def.rows.iter().any(|row| {
                    positions
                        .iter()
                        .zip(values.iter())
                        .all(|(&i, v)| null_safe_equal(&row[i], v))
                });
                Ok(ResultSet {
                    fields: vec![FieldMeta::new("1", "int")],
                    rows: if found { vec![vec![Value::Int(1)]] } else { Vec::new() },
                })
            }
            Query::Custom { sql } => self.custom_result(state, sql),
            Query::CustomPage { sql, limit, offset } => {
                let mut result = self.custom_result(state, sql)?;
                result.rows = result
                    .rows
                    .into_iter()
                    .skip(*offset as usize)
                    .take(*limit as usize)
                    .collect();
                Ok(result)
            }
            Query::CountCustom { sql } => {
                let result = self.custom_result(state, sql)?;
                Ok(single("total", Value::Int(result.rows.len() as i64)))
            }
            other => bail!("{} does not return rows", other.label()),
        }
    }

    fn run_execute(&self, state: &mut ServerState, query: &Query) -> Result<u64> {
        match query {
            Query::Insert {
                table,
                columns,
                rows,
            } => {
                state.inserts += 1;
                if state.fail_insert_at == Some(state.inserts) {
                    bail!("Injected failure on insert {}", state.inserts);
                }
                let database = self.schema_of(table).to_string();
                let def = state
                    .find_mut(&database, &table.name)
                    .ok_or_else(|| anyhow!("Table '{}' doesn't exist", table))?;
                let positions = def.positions(columns)?;
                let key_positions = def.positions(&def.primary_key.clone())?;
                let mut staged: Vec<Row> = Vec::with_capacity(rows.len());
                for row in rows {
                    if row.len() != columns.len() {
                        bail!("Column count doesn't match value count");
                    }
                    let mut full = vec![Value::Null; def.columns.len()];
                    for (&i, value) in positions.iter().zip(row.iter()) {
                        full[i] = value.clone();
                    }
                    for (column, value) in def.columns.iter().zip(full.iter()) {
                        if !column.nullable && value.is_null() {
                            bail!("Column '{}' cannot be null", column.name);
                        }
                    }
                    if !key_positions.is_empty() {
                        let key = project(&full, &key_positions);
                        let duplicate = def
                            .rows
                            .iter()
                            .chain(staged.iter())
                            .any(|r| {
                                def.keys_match(&key_positions, &project(r, &key_positions), &key)
                            });
                        if duplicate {
                            bail!("Duplicate entry {:?} for key 'PRIMARY'", key);
                        }
                    }
                    staged.push(full);
                }
                let count = staged.len() as u64;
                def.rows.extend(staged);
                Ok(count)
            }
            Query::CreateTable { ddl } => {
                let (schema, mut def) = parse_create_table(ddl)?;
                if state.lower_case_table_names == 1 {
                    def.name = def.name.to_lowercase();
                }
                let database = schema.unwrap_or_else(|| self.database.clone());
                if state.find(&database, &def.name).is_some() {
                    bail!("Table '{}' already exists", def.name);
                }
                state
                    .databases
                    .entry(database.to_ascii_lowercase())
                    .or_default()
                    .push(def);
                Ok(0)
            }
            Query::AddIndex { table, index } => {
                if state.failing_indexes.contains(&index.name) {
                    bail!("Injected failure creating index {}", index.name);
                }
                let database = self.schema_of(table).to_string();
                let def = state
                    .find_mut(&database, &table.name)
                    .ok_or_else(|| anyhow!("Table '{}' doesn't exist", table))?;
                if def.indexes.iter().any(|i| i.name.eq_ignore_ascii_case(&index.name)) {
                    bail!("Duplicate key name '{}'", index.name);
                }
                def.positions(&index.columns)?;
                def.indexes.push(index.clone());
                Ok(0)
            }
            other => bail!("{} is not supported by the in-memory server", other.label()),
        }
    }
}

#[async_trait]
impl Relational for MemoryConnection {
    fn side(&self) -> Side {
        self.side
    }

    fn database(&self) -> &str {
        &self.database
    }

    async fn query(&mut self, query: &Query) -> Result<ResultSet> {
        let mut state = self.server.state();
        state.labels.push(query.label());
        self.run_query(&state, query)
    }

    async fn execute(&mut self, query: &Query) -> Result<u64> {
        let mut state = self.server.state();
        state.labels.push(query.label());
        self.run_execute(&mut state, query)
    }

    async fn begin(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            bail!("Transaction already open");
        }
        self.snapshot = Some(self.server.state().databases.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.snapshot
            .take()
            .map(|_| ())
            .context("COMMIT without an open transaction")
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.server.state().databases = snapshot;
        }
        Ok(())
    }
}

/// Parse the `CREATE TABLE` subset produced by `SHOW CREATE TABLE` and by
/// result-set materialization.
pub fn parse_create_table(ddl: &str) -> Result<(Option<String>, TableDef)> {
    let open = ddl.find('(').context("CREATE TABLE without column list")?;
    let close = ddl.rfind(')').context("CREATE TABLE without closing parenthesis")?;
    let head = ddl[..open].trim();
    let name_text = head
        .get("CREATE TABLE".len()..)
        .filter(|_| head.to_ascii_uppercase().starts_with("CREATE TABLE"))
        .context("Not a CREATE TABLE statement")?
        .trim();
    let mut parts: Vec<String> = name_text
        .split('.')
        .map(|p| p.trim().trim_matches('`').to_string())
        .collect();
    let name = parts.pop().context("CREATE TABLE without a name")?;
    let schema = parts.pop();

    let mut def = TableDef::new(&name, Vec::new());
    for item in split_top_level(&ddl[open + 1..close]) {
        let item = item.trim();
        let upper = item.to_ascii_uppercase();
        if upper.starts_with("PRIMARY KEY") {
            def.primary_key = column_list(item)?;
        } else if upper.starts_with("UNIQUE KEY")
            || upper.starts_with("UNIQUE INDEX")
            || upper.starts_with("KEY")
            || upper.starts_with("INDEX")
        {
            let name = item
                .split('`')
                .nth(1)
                .context("Index without a name")?
                .to_string();
            def.indexes.push(IndexDescriptor {
                name,
                columns: column_list(item)?,
                unique: upper.starts_with("UNIQUE"),
            });
        } else if upper.starts_with("CONSTRAINT") || upper.starts_with("FOREIGN") {
            continue;
        } else {
            def.columns.push(parse_column(item)?);
        }
    }
    if def.columns.is_empty() {
        bail!("CREATE TABLE {} declares no columns", name);
    }
    let key = def.primary_key.clone();
    let refs: Vec<&str> = key.iter().map(String::as_str).collect();
    Ok((schema, def.primary_key(&refs)))
}

fn split_top_level(body: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in body.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                items.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        items.push(current);
    }
    items
}

fn column_list(item: &str) -> Result<Vec<String>> {
    let open = item.find('(').context("Key without column list")?;
    let close = item.rfind(')').context("Key without column list")?;
    Ok(item[open + 1..close]
        .split(',')
        .map(|c| {
            let c = c.trim();
            let c = c.split('(').next().unwrap_or(c);
            c.trim().trim_matches('`').to_string()
        })
        .collect())
}

fn parse_column(item: &str) -> Result<ColumnDef> {
    let (name, rest) = if let Some(stripped) = item.strip_prefix('`') {
        let end = stripped.find('`').context("Unterminated column name")?;
        (&stripped[..end], stripped[end + 1..].trim())
    } else {
        item.split_once(' ').context("Column without a type")?
    };
    let type_token = rest.split_whitespace().next().context("Column without a type")?;
    let (data_type, length) = match type_token.split_once('(') {
        Some((base, args)) => {
            let args = args.trim_end_matches(')');
            (base.to_ascii_lowercase(), args.split(',').next().and_then(|n| n.trim().parse().ok()))
        }
        None => (type_token.to_ascii_lowercase(), None),
    };
    let upper = rest.to_ascii_uppercase();
    Ok(ColumnDef {
        name: name.to_string(),
        length: if has_length(&data_type) { length } else { None },
        data_type,
        nullable: !upper.contains("NOT NULL"),
        case_sensitive: upper.contains("_BIN") || upper.contains("_CS"),
    })
}

/// Build a source/target pair on one server, so joins across databases work.
pub fn colocated(source_db: &str, target_db: &str) -> (MemoryServer, MemoryConnection, MemoryConnection) {
    let server = MemoryServer::new();
    let source = server.connect(source_db, Side::Source);
    let target = server.connect(target_db, Side::Target);
    (server, source, target)
}

pub fn row(values: Vec<Value>) -> Row {
    values
}

pub fn id_name_rows(pairs: &[(i64, &str)]) -> Vec<Row> {
    pairs
        .iter()
        .map(|(id, name)| vec![Value::Int(*id), Value::text(*name)])
        .collect()
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}
