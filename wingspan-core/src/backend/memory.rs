//! In-memory reference backend.
//!
//! Stands in for a real SQL engine so the protocol engine can be exercised
//! end to end: tables are registered programmatically with their keys, and
//! a deliberately small statement reader covers plain scans, literal
//! inserts, IN-list deletes, and a single equality parameter. Anything
//! beyond that is reported as unsupported rather than guessed at.

use std::sync::{Arc, RwLock};

use arrow_array::{Array, ArrayRef, Int32Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};

use super::{
    catalog_matches, pattern_matches, BackendError, DbSchemaFilter, MetadataProvider,
    PreparedQuery, QueryResult, SqlBackend, TableFilter, TableRef,
};
use crate::catalog::{
    DbSchemaEntry, KeyEntry, PrimaryKeyEntry, ReferentialRule, SqlInfoRegistry, TableEntry,
};

/// A cell value. Integers are widened to i64 and narrowed per column type.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Int(i64),
    Text(String),
}

/// Primary-key declaration for a registered table.
#[derive(Debug, Clone)]
pub struct PrimaryKeySpec {
    pub column: String,
    pub key_name: String,
}

/// Foreign-key declaration for a registered table.
#[derive(Debug, Clone)]
pub struct ForeignKeySpec {
    pub column: String,
    pub key_name: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Everything needed to register a table.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub db_schema: String,
    pub name: String,
    pub schema: SchemaRef,
    /// Column filled from a counter when an INSERT omits it.
    pub auto_increment: Option<String>,
    pub primary_key: Option<PrimaryKeySpec>,
    pub foreign_keys: Vec<ForeignKeySpec>,
    pub rows: Vec<Vec<Literal>>,
}

struct MemoryTable {
    spec: TableSpec,
    rows: Vec<Vec<Literal>>,
    next_auto: i64,
}

impl MemoryTable {
    fn new(mut spec: TableSpec) -> Result<Self, BackendError> {
        let rows = std::mem::take(&mut spec.rows);
        let width = spec.schema.fields().len();
        for row in &rows {
            if row.len() != width {
                return Err(BackendError::execution(format!(
                    "row width {} does not match table {} ({} columns)",
                    row.len(),
                    spec.name,
                    width
                )));
            }
        }
        let next_auto = match &spec.auto_increment {
            Some(column) => {
                let idx = column_index(&spec.schema, column).ok_or_else(|| {
                    BackendError::execution(format!(
                        "auto-increment column {column} not in table {}",
                        spec.name
                    ))
                })?;
                rows.iter()
                    .filter_map(|row| match &row[idx] {
                        Literal::Int(v) => Some(*v),
                        _ => None,
                    })
                    .max()
                    .unwrap_or(0)
                    + 1
            }
            None => 1,
        };
        Ok(Self {
            spec,
            rows,
            next_auto,
        })
    }

    fn batch(&self, rows: &[Vec<Literal>]) -> Result<RecordBatch, BackendError> {
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.spec.schema.fields().len());
        for (idx, field) in self.spec.schema.fields().iter().enumerate() {
            let column = build_column(field, rows.iter().map(|row| &row[idx]))?;
            columns.push(column);
        }
        RecordBatch::try_new(self.spec.schema.clone(), columns).map_err(BackendError::from)
    }
}

fn column_index(schema: &Schema, name: &str) -> Option<usize> {
    schema
        .fields()
        .iter()
        .position(|field| field.name().eq_ignore_ascii_case(name))
}

fn build_column<'a>(
    field: &Field,
    values: impl Iterator<Item = &'a Literal>,
) -> Result<ArrayRef, BackendError> {
    match field.data_type() {
        DataType::Int32 => {
            let values: Result<Vec<Option<i32>>, BackendError> = values
                .map(|value| match value {
                    Literal::Null => Ok(None),
                    Literal::Int(v) => Ok(Some(*v as i32)),
                    Literal::Text(_) => Err(type_error(field, value)),
                })
                .collect();
            Ok(Arc::new(Int32Array::from(values?)))
        }
        DataType::Int64 => {
            let values: Result<Vec<Option<i64>>, BackendError> = values
                .map(|value| match value {
                    Literal::Null => Ok(None),
                    Literal::Int(v) => Ok(Some(*v)),
                    Literal::Text(_) => Err(type_error(field, value)),
                })
                .collect();
            Ok(Arc::new(Int64Array::from(values?)))
        }
        DataType::Utf8 => {
            let values: Result<Vec<Option<String>>, BackendError> = values
                .map(|value| match value {
                    Literal::Null => Ok(None),
                    Literal::Text(v) => Ok(Some(v.clone())),
                    Literal::Int(_) => Err(type_error(field, value)),
                })
                .collect();
            Ok(Arc::new(StringArray::from(values?)))
        }
        other => Err(BackendError::execution(format!(
            "unsupported column type {other} for column {}",
            field.name()
        ))),
    }
}

fn type_error(field: &Field, value: &Literal) -> BackendError {
    BackendError::execution(format!(
        "value {value:?} does not fit column {} ({})",
        field.name(),
        field.data_type()
    ))
}

fn literal_from_array(array: &dyn Array, row: usize) -> Result<Literal, BackendError> {
    if array.is_null(row) {
        return Ok(Literal::Null);
    }
    if let Some(values) = array.as_any().downcast_ref::<Int32Array>() {
        return Ok(Literal::Int(values.value(row) as i64));
    }
    if let Some(values) = array.as_any().downcast_ref::<Int64Array>() {
        return Ok(Literal::Int(values.value(row)));
    }
    if let Some(values) = array.as_any().downcast_ref::<StringArray>() {
        return Ok(Literal::Text(values.value(row).to_string()));
    }
    Err(BackendError::execution(format!(
        "unsupported parameter type {}",
        array.data_type()
    )))
}

// ---------------------------------------------------------------------------
// Statement reader

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Num(i64),
    Punct(char),
}

fn tokenize(sql: &str) -> Result<Vec<Token>, BackendError> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '\'' {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some('\'') => {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                            value.push('\'');
                        } else {
                            break;
                        }
                    }
                    Some(other) => value.push(other),
                    None => {
                        return Err(BackendError::execution("unterminated string literal"));
                    }
                }
            }
            tokens.push(Token::Str(value));
        } else if c.is_ascii_digit() || c == '-' {
            let mut text = String::new();
            text.push(c);
            chars.next();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    text.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = text
                .parse::<i64>()
                .map_err(|_| BackendError::execution(format!("invalid numeric literal {text}")))?;
            tokens.push(Token::Num(value));
        } else if c.is_alphanumeric() || c == '_' {
            let mut word = String::new();
            while let Some(&w) = chars.peek() {
                if w.is_alphanumeric() || w == '_' {
                    word.push(w);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Word(word));
        } else if matches!(c, '(' | ')' | ',' | '=' | '?' | '*' | ';') {
            tokens.push(Token::Punct(c));
            chars.next();
        } else {
            return Err(BackendError::Unsupported(format!(
                "unexpected character {c:?} in statement"
            )));
        }
    }
    // a trailing semicolon is noise
    if tokens.last() == Some(&Token::Punct(';')) {
        tokens.pop();
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Statement {
    Select {
        table: String,
        filter_column: Option<String>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<Literal>>,
    },
    Delete {
        table: String,
        column: String,
        values: Vec<Literal>,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(sql: &str) -> Result<Self, BackendError> {
        Ok(Self {
            tokens: tokenize(sql)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn try_keyword(&mut self, keyword: &str) -> bool {
        if let Some(Token::Word(word)) = self.peek() {
            if word.eq_ignore_ascii_case(keyword) {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), BackendError> {
        if self.try_keyword(keyword) {
            Ok(())
        } else {
            Err(BackendError::Unsupported(format!(
                "expected {keyword} at token {:?}",
                self.peek()
            )))
        }
    }

    fn ident(&mut self) -> Result<String, BackendError> {
        match self.next() {
            Some(Token::Word(word)) => Ok(word),
            other => Err(BackendError::Unsupported(format!(
                "expected identifier, found {other:?}"
            ))),
        }
    }

    fn try_punct(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn punct(&mut self, c: char) -> Result<(), BackendError> {
        if self.try_punct(c) {
            Ok(())
        } else {
            Err(BackendError::Unsupported(format!(
                "expected {c:?} at token {:?}",
                self.peek()
            )))
        }
    }

    fn literal(&mut self) -> Result<Literal, BackendError> {
        match self.next() {
            Some(Token::Str(value)) => Ok(Literal::Text(value)),
            Some(Token::Num(value)) => Ok(Literal::Int(value)),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("null") => Ok(Literal::Null),
            other => Err(BackendError::Unsupported(format!(
                "expected literal, found {other:?}"
            ))),
        }
    }

    fn expect_end(&mut self) -> Result<(), BackendError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(BackendError::Unsupported(format!(
                "unexpected trailing token {token:?}"
            ))),
        }
    }
}

fn parse_statement(sql: &str) -> Result<Statement, BackendError> {
    let mut parser = Parser::new(sql)?;

    if parser.try_keyword("select") {
        parser.punct('*')?;
        parser.keyword("from")?;
        let table = parser.ident()?;
        let filter_column = if parser.try_keyword("where") {
            let column = parser.ident()?;
            parser.punct('=')?;
            parser.punct('?')?;
            Some(column)
        } else {
            None
        };
        parser.expect_end()?;
        return Ok(Statement::Select {
            table,
            filter_column,
        });
    }

    if parser.try_keyword("insert") {
        parser.keyword("into")?;
        let table = parser.ident()?;
        parser.punct('(')?;
        let mut columns = vec![parser.ident()?];
        while parser.try_punct(',') {
            columns.push(parser.ident()?);
        }
        parser.punct(')')?;
        parser.keyword("values")?;
        let mut rows = Vec::new();
        loop {
            parser.punct('(')?;
            let mut row = vec![parser.literal()?];
            while parser.try_punct(',') {
                row.push(parser.literal()?);
            }
            parser.punct(')')?;
            if row.len() != columns.len() {
                return Err(BackendError::execution(format!(
                    "tuple width {} does not match column list {}",
                    row.len(),
                    columns.len()
                )));
            }
            rows.push(row);
            if !parser.try_punct(',') {
                break;
            }
        }
        parser.expect_end()?;
        return Ok(Statement::Insert {
            table,
            columns,
            rows,
        });
    }

    if parser.try_keyword("delete") {
        parser.keyword("from")?;
        let table = parser.ident()?;
        parser.keyword("where")?;
        let column = parser.ident()?;
        parser.keyword("in")?;
        parser.punct('(')?;
        let mut values = vec![parser.literal()?];
        while parser.try_punct(',') {
            values.push(parser.literal()?);
        }
        parser.punct(')')?;
        parser.expect_end()?;
        return Ok(Statement::Delete {
            table,
            column,
            values,
        });
    }

    Err(BackendError::Unsupported(format!(
        "statement not recognized by the memory engine: {sql}"
    )))
}

// ---------------------------------------------------------------------------
// Execution

type SharedTables = Arc<RwLock<Vec<MemoryTable>>>;

fn with_table<T>(
    tables: &SharedTables,
    name: &str,
    f: impl FnOnce(&MemoryTable) -> Result<T, BackendError>,
) -> Result<T, BackendError> {
    let tables = tables.read().expect("memory tables lock poisoned");
    let table = tables
        .iter()
        .find(|t| t.spec.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| BackendError::execution(format!("table {name} does not exist")))?;
    f(table)
}

fn with_table_mut<T>(
    tables: &SharedTables,
    name: &str,
    f: impl FnOnce(&mut MemoryTable) -> Result<T, BackendError>,
) -> Result<T, BackendError> {
    let mut tables = tables.write().expect("memory tables lock poisoned");
    let table = tables
        .iter_mut()
        .find(|t| t.spec.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| BackendError::execution(format!("table {name} does not exist")))?;
    f(table)
}

fn run_select(
    tables: &SharedTables,
    table: &str,
    filter_column: Option<&str>,
    parameter: Option<Literal>,
) -> Result<QueryResult, BackendError> {
    with_table(tables, table, |table| {
        let rows: Vec<Vec<Literal>> = match filter_column {
            Some(column) => {
                let idx = column_index(&table.spec.schema, column).ok_or_else(|| {
                    BackendError::execution(format!("unknown column {column}"))
                })?;
                let needle = parameter
                    .ok_or_else(|| BackendError::execution("statement parameter not bound"))?;
                table
                    .rows
                    .iter()
                    .filter(|row| row[idx] == needle)
                    .cloned()
                    .collect()
            }
            None => table.rows.clone(),
        };
        let batch = table.batch(&rows)?;
        Ok(QueryResult {
            schema: table.spec.schema.clone(),
            batches: vec![batch],
        })
    })
}

fn run_insert(
    tables: &SharedTables,
    table: &str,
    columns: &[String],
    rows: &[Vec<Literal>],
) -> Result<i64, BackendError> {
    with_table_mut(tables, table, |table| {
        let width = table.spec.schema.fields().len();
        let mut indices = Vec::with_capacity(columns.len());
        for column in columns {
            let idx = column_index(&table.spec.schema, column)
                .ok_or_else(|| BackendError::execution(format!("unknown column {column}")))?;
            indices.push(idx);
        }
        let auto_idx = table
            .spec
            .auto_increment
            .as_deref()
            .and_then(|column| column_index(&table.spec.schema, column))
            .filter(|idx| !indices.contains(idx));

        for row in rows {
            let mut stored = vec![Literal::Null; width];
            for (idx, value) in indices.iter().zip(row) {
                stored[*idx] = value.clone();
            }
            if let Some(idx) = auto_idx {
                stored[idx] = Literal::Int(table.next_auto);
                table.next_auto += 1;
            }
            table.rows.push(stored);
        }
        Ok(rows.len() as i64)
    })
}

fn run_delete(
    tables: &SharedTables,
    table: &str,
    column: &str,
    values: &[Literal],
) -> Result<i64, BackendError> {
    with_table_mut(tables, table, |table| {
        let idx = column_index(&table.spec.schema, column)
            .ok_or_else(|| BackendError::execution(format!("unknown column {column}")))?;
        let before = table.rows.len();
        table.rows.retain(|row| !values.contains(&row[idx]));
        Ok((before - table.rows.len()) as i64)
    })
}

fn run_statement(tables: &SharedTables, statement: &Statement) -> Result<i64, BackendError> {
    match statement {
        Statement::Select { .. } => Err(BackendError::execution(
            "statement returns rows; execute it as a query",
        )),
        Statement::Insert {
            table,
            columns,
            rows,
        } => run_insert(tables, table, columns, rows),
        Statement::Delete {
            table,
            column,
            values,
        } => run_delete(tables, table, column, values),
    }
}

// ---------------------------------------------------------------------------
// Backend

/// The bundled reference backend.
pub struct MemoryBackend {
    catalog: Option<String>,
    sql_info: SqlInfoRegistry,
    tables: SharedTables,
}

impl MemoryBackend {
    pub fn new(sql_info: SqlInfoRegistry) -> Self {
        Self {
            catalog: None,
            sql_info,
            tables: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Name the single catalog every registered table belongs to. The
    /// default is no catalog at all.
    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn register_table(&self, spec: TableSpec) -> Result<(), BackendError> {
        let table = MemoryTable::new(spec)?;
        let mut tables = self.tables.write().expect("memory tables lock poisoned");
        if tables
            .iter()
            .any(|t| t.spec.name.eq_ignore_ascii_case(&table.spec.name))
        {
            return Err(BackendError::execution(format!(
                "table {} already exists",
                table.spec.name
            )));
        }
        tables.push(table);
        Ok(())
    }

    fn table_schema(&self, name: &str) -> Result<SchemaRef, BackendError> {
        with_table(&self.tables, name, |table| Ok(table.spec.schema.clone()))
    }

    fn parameter_schema_for(&self, statement: &Statement) -> Result<SchemaRef, BackendError> {
        match statement {
            Statement::Select {
                table,
                filter_column: Some(column),
            } => with_table(&self.tables, table, |table| {
                let idx = column_index(&table.spec.schema, column).ok_or_else(|| {
                    BackendError::execution(format!("unknown column {column}"))
                })?;
                let field = table.spec.schema.field(idx);
                Ok(Arc::new(Schema::new(vec![Field::new(
                    field.name(),
                    field.data_type().clone(),
                    false,
                )])))
            }),
            _ => Ok(Arc::new(Schema::empty())),
        }
    }
}

impl SqlBackend for MemoryBackend {
    fn plan_query(&self, sql: &str) -> Result<SchemaRef, BackendError> {
        match parse_statement(sql)? {
            Statement::Select { table, .. } => self.table_schema(&table),
            _ => Err(BackendError::execution(
                "statement does not return a result set",
            )),
        }
    }

    fn execute_query(&self, sql: &str) -> Result<QueryResult, BackendError> {
        match parse_statement(sql)? {
            Statement::Select {
                table,
                filter_column: None,
            } => run_select(&self.tables, &table, None, None),
            Statement::Select { .. } => Err(BackendError::execution(
                "parameterized query requires a prepared statement",
            )),
            _ => Err(BackendError::execution(
                "statement does not return a result set",
            )),
        }
    }

    fn execute_update(&self, sql: &str) -> Result<i64, BackendError> {
        let statement = parse_statement(sql)?;
        run_statement(&self.tables, &statement)
    }

    fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedQuery>, BackendError> {
        let statement = parse_statement(sql)?;
        let parameter_schema = self.parameter_schema_for(&statement)?;
        let result_schema = match &statement {
            Statement::Select { table, .. } => Some(self.table_schema(table)?),
            _ => None,
        };
        Ok(Box::new(MemoryPreparedStatement {
            tables: Arc::clone(&self.tables),
            statement,
            parameter_schema,
            result_schema,
        }))
    }

    fn metadata(&self) -> Option<&dyn MetadataProvider> {
        Some(self)
    }

    fn sql_info(&self) -> Option<&SqlInfoRegistry> {
        Some(&self.sql_info)
    }
}

struct MemoryPreparedStatement {
    tables: SharedTables,
    statement: Statement,
    parameter_schema: SchemaRef,
    result_schema: Option<SchemaRef>,
}

impl MemoryPreparedStatement {
    fn bound_parameter(
        &self,
        parameters: Option<&RecordBatch>,
    ) -> Result<Option<Literal>, BackendError> {
        match parameters {
            Some(batch) if batch.num_columns() > 0 && batch.num_rows() > 0 => {
                literal_from_array(batch.column(0).as_ref(), 0).map(Some)
            }
            _ => Ok(None),
        }
    }
}

impl PreparedQuery for MemoryPreparedStatement {
    fn parameter_schema(&self) -> SchemaRef {
        self.parameter_schema.clone()
    }

    fn result_schema(&self) -> Option<SchemaRef> {
        self.result_schema.clone()
    }

    fn execute(&mut self, parameters: Option<RecordBatch>) -> Result<QueryResult, BackendError> {
        match &self.statement {
            Statement::Select {
                table,
                filter_column,
            } => {
                let parameter = self.bound_parameter(parameters.as_ref())?;
                run_select(&self.tables, table, filter_column.as_deref(), parameter)
            }
            _ => Err(BackendError::execution(
                "statement does not return a result set",
            )),
        }
    }

    fn execute_update(&mut self, _parameters: Option<RecordBatch>) -> Result<i64, BackendError> {
        run_statement(&self.tables, &self.statement)
    }
}

impl MetadataProvider for MemoryBackend {
    fn catalogs(&self) -> Result<Vec<Option<String>>, BackendError> {
        Ok(self.catalog.iter().cloned().map(Some).collect())
    }

    fn db_schemas(&self, filter: &DbSchemaFilter) -> Result<Vec<DbSchemaEntry>, BackendError> {
        if !catalog_matches(&filter.catalog, &self.catalog) {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().expect("memory tables lock poisoned");
        let mut entries: Vec<DbSchemaEntry> = Vec::new();
        for table in tables.iter() {
            if !pattern_matches(&filter.db_schema_pattern, &table.spec.db_schema) {
                continue;
            }
            let entry = DbSchemaEntry {
                catalog: self.catalog.clone(),
                db_schema: table.spec.db_schema.clone(),
            };
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.db_schema.cmp(&b.db_schema));
        Ok(entries)
    }

    fn tables(&self, filter: &TableFilter) -> Result<Vec<TableEntry>, BackendError> {
        if !catalog_matches(&filter.catalog, &self.catalog) {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().expect("memory tables lock poisoned");
        let mut entries: Vec<TableEntry> = Vec::new();
        for table in tables.iter() {
            if !pattern_matches(&filter.db_schema_pattern, &table.spec.db_schema)
                || !pattern_matches(&filter.table_pattern, &table.spec.name)
            {
                continue;
            }
            if !filter.table_types.is_empty()
                && !filter.table_types.iter().any(|t| t == "TABLE")
            {
                continue;
            }
            entries.push(TableEntry {
                catalog: self.catalog.clone(),
                db_schema: Some(table.spec.db_schema.clone()),
                name: table.spec.name.clone(),
                table_type: "TABLE".to_string(),
                schema: Some(table.spec.schema.clone()),
            });
        }
        entries.sort_by(|a, b| (&a.db_schema, &a.name).cmp(&(&b.db_schema, &b.name)));
        Ok(entries)
    }

    fn table_types(&self) -> Result<Vec<String>, BackendError> {
        Ok(vec!["TABLE".to_string()])
    }

    fn primary_keys(&self, table_ref: &TableRef) -> Result<Vec<PrimaryKeyEntry>, BackendError> {
        if !catalog_matches(&table_ref.catalog, &self.catalog) {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().expect("memory tables lock poisoned");
        let mut entries = Vec::new();
        for table in tables.iter() {
            if !table.spec.name.eq_ignore_ascii_case(&table_ref.table)
                || !schema_ref_matches(&table_ref.db_schema, &table.spec.db_schema)
            {
                continue;
            }
            if let Some(pk) = &table.spec.primary_key {
                entries.push(PrimaryKeyEntry {
                    catalog: self.catalog.clone(),
                    db_schema: Some(table.spec.db_schema.clone()),
                    table: table.spec.name.clone(),
                    column: pk.column.clone(),
                    key_name: Some(pk.key_name.clone()),
                    key_sequence: 1,
                });
            }
        }
        Ok(entries)
    }

    fn imported_keys(&self, table_ref: &TableRef) -> Result<Vec<KeyEntry>, BackendError> {
        if !catalog_matches(&table_ref.catalog, &self.catalog) {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().expect("memory tables lock poisoned");
        let mut entries = Vec::new();
        for table in tables.iter() {
            if !table.spec.name.eq_ignore_ascii_case(&table_ref.table)
                || !schema_ref_matches(&table_ref.db_schema, &table.spec.db_schema)
            {
                continue;
            }
            for fk in &table.spec.foreign_keys {
                entries.push(self.key_entry(&tables, table, fk));
            }
        }
        Ok(entries)
    }

    fn exported_keys(&self, table_ref: &TableRef) -> Result<Vec<KeyEntry>, BackendError> {
        if !catalog_matches(&table_ref.catalog, &self.catalog) {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().expect("memory tables lock poisoned");
        let mut entries = Vec::new();
        for table in tables.iter() {
            for fk in &table.spec.foreign_keys {
                if fk.referenced_table.eq_ignore_ascii_case(&table_ref.table) {
                    entries.push(self.key_entry(&tables, table, fk));
                }
            }
        }
        Ok(entries)
    }

    fn cross_reference(
        &self,
        pk_table: &TableRef,
        fk_table: &TableRef,
    ) -> Result<Vec<KeyEntry>, BackendError> {
        let entries = self.imported_keys(fk_table)?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.pk_table.eq_ignore_ascii_case(&pk_table.table))
            .collect())
    }
}

fn schema_ref_matches(requested: &Option<String>, actual: &str) -> bool {
    match requested.as_deref() {
        None => true,
        Some("") => actual.is_empty(),
        Some(schema) => schema.eq_ignore_ascii_case(actual),
    }
}

impl MemoryBackend {
    fn key_entry(&self, tables: &[MemoryTable], table: &MemoryTable, fk: &ForeignKeySpec) -> KeyEntry {
        let referenced = tables
            .iter()
            .find(|t| t.spec.name.eq_ignore_ascii_case(&fk.referenced_table));
        let pk_key_name = referenced
            .and_then(|t| t.spec.primary_key.as_ref())
            .map(|pk| pk.key_name.clone());
        let pk_db_schema = referenced.map(|t| t.spec.db_schema.clone());
        KeyEntry {
            pk_catalog: self.catalog.clone(),
            pk_db_schema,
            pk_table: fk.referenced_table.clone(),
            pk_column: fk.referenced_column.clone(),
            fk_catalog: self.catalog.clone(),
            fk_db_schema: Some(table.spec.db_schema.clone()),
            fk_table: table.spec.name.clone(),
            fk_column: fk.column.clone(),
            key_sequence: 1,
            fk_key_name: Some(fk.key_name.clone()),
            pk_key_name,
            update_rule: ReferentialRule::NoAction,
            delete_rule: ReferentialRule::NoAction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::Int32Array;

    fn int_table() -> TableSpec {
        TableSpec {
            db_schema: "APP".to_string(),
            name: "INTTABLE".to_string(),
            schema: Arc::new(Schema::new(vec![
                Field::new("ID", DataType::Int32, false),
                Field::new("KEYNAME", DataType::Utf8, true),
                Field::new("VALUE", DataType::Int32, true),
            ])),
            auto_increment: Some("ID".to_string()),
            primary_key: Some(PrimaryKeySpec {
                column: "ID".to_string(),
                key_name: "PK_INTTABLE".to_string(),
            }),
            foreign_keys: vec![],
            rows: vec![
                vec![
                    Literal::Int(1),
                    Literal::Text("one".to_string()),
                    Literal::Int(1),
                ],
                vec![
                    Literal::Int(2),
                    Literal::Text("zero".to_string()),
                    Literal::Int(0),
                ],
            ],
        }
    }

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::new(SqlInfoRegistry::default());
        backend.register_table(int_table()).unwrap();
        backend
    }

    #[test]
    fn scan_returns_all_rows() {
        let backend = backend();
        let result = backend.execute_query("SELECT * FROM intTable").unwrap();
        assert_eq!(result.batches[0].num_rows(), 2);
        assert_eq!(result.schema, result.batches[0].schema());
    }

    #[test]
    fn insert_counts_tuples_and_fills_auto_increment() {
        let backend = backend();
        let count = backend
            .execute_update("INSERT INTO INTTABLE (keyName, value) VALUES ('A',1),('B',2),('C',3)")
            .unwrap();
        assert_eq!(count, 3);

        let result = backend.execute_query("SELECT * FROM INTTABLE").unwrap();
        let ids = result.batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert_eq!(ids.value(2), 3);
        assert_eq!(ids.value(4), 5);
    }

    #[test]
    fn delete_counts_matches() {
        let backend = backend();
        backend
            .execute_update("INSERT INTO INTTABLE (keyName) VALUES ('A'),('B'),('C')")
            .unwrap();
        let removed = backend
            .execute_update("DELETE FROM INTTABLE WHERE keyName IN ('A','B','C')")
            .unwrap();
        assert_eq!(removed, 3);
        let removed = backend
            .execute_update("DELETE FROM INTTABLE WHERE keyName IN ('A')")
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn prepared_select_with_parameter() {
        let backend = backend();
        let mut statement = backend
            .prepare("SELECT * FROM INTTABLE WHERE ID = ?")
            .unwrap();
        assert_eq!(statement.parameter_schema().fields().len(), 1);

        let params = RecordBatch::try_new(
            statement.parameter_schema(),
            vec![Arc::new(Int32Array::from(vec![2]))],
        )
        .unwrap();
        let result = statement.execute(Some(params)).unwrap();
        assert_eq!(result.batches[0].num_rows(), 1);
    }

    #[test]
    fn unsupported_statement_is_reported() {
        let backend = backend();
        let err = backend.execute_update("UPDATE INTTABLE SET VALUE = 1").unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));
    }

    #[test]
    fn plan_query_matches_execution_schema() {
        let backend = backend();
        let planned = backend.plan_query("SELECT * FROM intTable").unwrap();
        let executed = backend.execute_query("SELECT * FROM intTable").unwrap();
        assert_eq!(planned, executed.schema);
    }
}
