use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer};

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertResource {
        id: Option<Id>,
        fields: ResourceFields,
        returning: bool,
    },
    UpdateResource {
        id: Id,
        patch: ResourcePatch,
        returning: bool,
    },
    DeleteResource {
        id: Id,
    },
    /// One row is a plain insert; several rows commit all-or-nothing.
    InsertBookings {
        rows: Vec<(Option<Id>, NewBooking)>,
        returning: bool,
    },
    UpdateBooking {
        id: Id,
        patch: BookingPatch,
        returning: bool,
    },
    DeleteBooking {
        id: Id,
    },
    SelectResources {
        id: Option<Id>,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectAvailability {
        resource_id: Id,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    },
    SelectConflict {
        resource_id: Id,
        start: Ms,
        end: Ms,
        exclude_id: Option<Id>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingFilter {
    All,
    Id(Id),
    Resource(Id),
}

/// Column order for positional `INSERT ... VALUES` without a column list.
const RESOURCE_COLUMNS: &[&str] = &["name", "description", "location", "capacity", "available"];
const BOOKING_COLUMNS: &[&str] = &["resource_id", "start", "end", "booked_by", "purpose"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.trim_end_matches(';').trim().is_empty() {
        return Err(SqlError::Empty);
    }
    if leading_keyword(trimmed).eq_ignore_ascii_case("UPDATE") {
        return parse_update(trimmed);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, trimmed)?;
    match stmts.as_slice() {
        [] => Err(SqlError::Empty),
        [Statement::Insert(insert)] => parse_insert(insert),
        [Statement::Delete(delete)] => parse_delete(delete),
        [Statement::Query(query)] => parse_select(query),
        [other] => Err(SqlError::Unsupported(format!("{other}"))),
        _ => Err(SqlError::Unsupported("multiple statements".into())),
    }
}

fn leading_keyword(sql: &str) -> &str {
    sql.split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_all_insert_rows(insert)?;
    let returning = insert.returning.is_some();
    let named: Vec<String> = insert
        .columns
        .iter()
        .map(|c| column_key(&c.to_string()))
        .collect();

    match table.as_str() {
        "resources" => {
            let [row] = rows.as_slice() else {
                return Err(SqlError::Unsupported(
                    "multi-row INSERT INTO resources".into(),
                ));
            };
            let columns = insert_columns("resources", &named, RESOURCE_COLUMNS, row.len())?;
            let (id, fields) = resource_row(&columns, row)?;
            Ok(Command::InsertResource {
                id,
                fields,
                returning,
            })
        }
        "bookings" => {
            let mut parsed = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                let columns = insert_columns("bookings", &named, BOOKING_COLUMNS, row.len())?;
                parsed.push(booking_row(&columns, row).map_err(|e| e.in_row(i, rows.len()))?);
            }
            Ok(Command::InsertBookings {
                rows: parsed,
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Explicit column names, or a prefix of the positional order.
fn insert_columns(
    table: &'static str,
    named: &[String],
    positional: &[&str],
    width: usize,
) -> Result<Vec<String>, SqlError> {
    if named.is_empty() {
        if width > positional.len() {
            return Err(SqlError::WrongArity(table, positional.len(), width));
        }
        return Ok(positional[..width].iter().map(|c| c.to_string()).collect());
    }
    if named.len() != width {
        return Err(SqlError::WrongArity(table, named.len(), width));
    }
    Ok(named.to_vec())
}

fn resource_row(columns: &[String], row: &[Expr]) -> Result<(Option<Id>, ResourceFields), SqlError> {
    let mut id = None;
    let mut name = None;
    let mut fields = ResourceFields::named(String::new());
    for (col, expr) in columns.iter().zip(row) {
        match col.as_str() {
            "id" => id = parse_i64_or_null(expr)?,
            "name" => name = Some(parse_text(expr)?),
            "description" => fields.description = parse_text_or_null(expr)?,
            "location" => fields.location = parse_text(expr)?,
            "capacity" => fields.capacity = parse_u32(expr)?,
            "available" => fields.available = parse_bool(expr)?,
            other => return Err(SqlError::unknown_column("resources", other)),
        }
    }
    fields.name = name.ok_or(SqlError::MissingColumn("name"))?;
    Ok((id, fields))
}

fn booking_row(columns: &[String], row: &[Expr]) -> Result<(Option<Id>, NewBooking), SqlError> {
    let mut id = None;
    let (mut resource_id, mut start, mut end, mut booked_by) = (None, None, None, None);
    let mut purpose = String::new();
    for (col, expr) in columns.iter().zip(row) {
        match col.as_str() {
            "id" => id = parse_i64_or_null(expr)?,
            "resource_id" => resource_id = Some(parse_i64(expr)?),
            "start" => start = Some(parse_i64(expr)?),
            "end" => end = Some(parse_i64(expr)?),
            "booked_by" => booked_by = Some(parse_text(expr)?),
            "purpose" => purpose = parse_text_or_null(expr)?.unwrap_or_default(),
            other => return Err(SqlError::unknown_column("bookings", other)),
        }
    }
    Ok((
        id,
        NewBooking {
            resource_id: resource_id.ok_or(SqlError::MissingColumn("resource_id"))?,
            start: start.ok_or(SqlError::MissingColumn("start"))?,
            end: end.ok_or(SqlError::MissingColumn("end"))?,
            booked_by: booked_by.ok_or(SqlError::MissingColumn("booked_by"))?,
            purpose,
        },
    ))
}

// ── UPDATE ────────────────────────────────────────────────────

/// `UPDATE <table> SET col = v[, ...] WHERE id = N [RETURNING *]`, read
/// token by token so only the clauses we serve are accepted.
fn parse_update(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut parser = Parser::new(&dialect).try_with_sql(sql)?;

    expect_keyword(&mut parser, Keyword::UPDATE, "UPDATE")?;
    let table = object_name_last(&parser.parse_object_name(false)?)
        .ok_or_else(|| SqlError::Parse("empty table name".into()))?;
    expect_keyword(&mut parser, Keyword::SET, "SET")?;
    let assignments = parser.parse_comma_separated(Parser::parse_assignment)?;
    let selection = if parser.parse_keyword(Keyword::WHERE) {
        Some(parser.parse_expr()?)
    } else {
        None
    };
    let returning = if parser.parse_keyword(Keyword::RETURNING) {
        parser.parse_comma_separated(Parser::parse_select_item)?;
        true
    } else {
        false
    };
    while parser.consume_token(&Token::SemiColon) {}
    if parser.peek_token().token != Token::EOF {
        return Err(SqlError::Parse(format!(
            "unexpected {} after UPDATE",
            parser.peek_token().token
        )));
    }

    let mut set = Vec::with_capacity(assignments.len());
    for assignment in &assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.push((column, &assignment.value));
    }

    let id = extract_where_id(&selection)?;
    match table.as_str() {
        "resources" => Ok(Command::UpdateResource {
            id,
            patch: resource_patch(&set)?,
            returning,
        }),
        "bookings" => Ok(Command::UpdateBooking {
            id,
            patch: booking_patch(&set)?,
            returning,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn expect_keyword(parser: &mut Parser, keyword: Keyword, name: &str) -> Result<(), SqlError> {
    if parser.parse_keyword(keyword) {
        Ok(())
    } else {
        Err(SqlError::Parse(format!(
            "expected {name}, found {}",
            parser.peek_token().token
        )))
    }
}

fn resource_patch(set: &[(String, &Expr)]) -> Result<ResourcePatch, SqlError> {
    let mut patch = ResourcePatch::default();
    for (col, expr) in set {
        match col.as_str() {
            "name" => patch.name = Some(parse_text(expr)?),
            "description" => patch.description = Some(parse_text_or_null(expr)?),
            "location" => patch.location = Some(parse_text(expr)?),
            "capacity" => patch.capacity = Some(parse_u32(expr)?),
            "available" => patch.available = Some(parse_bool(expr)?),
            "id" => return Err(SqlError::Unsupported("cannot change id".into())),
            other => return Err(SqlError::unknown_column("resources", other)),
        }
    }
    Ok(patch)
}

fn booking_patch(set: &[(String, &Expr)]) -> Result<BookingPatch, SqlError> {
    let mut patch = BookingPatch::default();
    for (col, expr) in set {
        match col.as_str() {
            "resource_id" => patch.resource_id = Some(parse_i64(expr)?),
            "start" => patch.start = Some(parse_i64(expr)?),
            "end" => patch.end = Some(parse_i64(expr)?),
            "booked_by" => patch.booked_by = Some(parse_text(expr)?),
            "purpose" => patch.purpose = Some(parse_text_or_null(expr)?.unwrap_or_default()),
            "id" => return Err(SqlError::Unsupported("cannot change id".into())),
            other => return Err(SqlError::unknown_column("bookings", other)),
        }
    }
    Ok(patch)
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "resources" => Ok(Command::DeleteResource { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// One `column <op> value` term of an AND-only WHERE clause.
struct Filter<'a> {
    column: String,
    op: &'a BinaryOperator,
    value: &'a Expr,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let [from] = select.from.as_slice() else {
        return Err(SqlError::Parse("SELECT needs exactly one table".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "resources" => {
            let mut id = None;
            for f in &filters {
                match (f.column.as_str(), f.op) {
                    ("id", BinaryOperator::Eq) => id = Some(parse_i64(f.value)?),
                    _ => return Err(f.unsupported()),
                }
            }
            Ok(Command::SelectResources { id })
        }
        "bookings" => {
            let mut filter = BookingFilter::All;
            for f in &filters {
                filter = match (f.column.as_str(), f.op, filter) {
                    ("id", BinaryOperator::Eq, BookingFilter::All) => {
                        BookingFilter::Id(parse_i64(f.value)?)
                    }
                    ("resource_id", BinaryOperator::Eq, BookingFilter::All) => {
                        BookingFilter::Resource(parse_i64(f.value)?)
                    }
                    _ => return Err(f.unsupported()),
                };
            }
            Ok(Command::SelectBookings { filter })
        }
        "availability" => {
            let (mut resource_id, mut start, mut end, mut min_duration) = (None, None, None, None);
            for f in &filters {
                match (f.column.as_str(), f.op) {
                    ("resource_id", BinaryOperator::Eq) => resource_id = Some(parse_i64(f.value)?),
                    ("start", BinaryOperator::GtEq) => start = Some(parse_i64(f.value)?),
                    ("end", BinaryOperator::LtEq) => end = Some(parse_i64(f.value)?),
                    ("min_duration", BinaryOperator::Eq) => {
                        min_duration = Some(parse_i64(f.value)?)
                    }
                    _ => return Err(f.unsupported()),
                }
            }
            Ok(Command::SelectAvailability {
                resource_id: resource_id.ok_or(SqlError::MissingFilter("resource_id"))?,
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                end: end.ok_or(SqlError::MissingFilter("end"))?,
                min_duration,
            })
        }
        "conflicts" => {
            let (mut resource_id, mut start, mut end, mut exclude_id) = (None, None, None, None);
            for f in &filters {
                match (f.column.as_str(), f.op) {
                    ("resource_id", BinaryOperator::Eq) => resource_id = Some(parse_i64(f.value)?),
                    ("start", BinaryOperator::Eq) => start = Some(parse_i64(f.value)?),
                    ("end", BinaryOperator::Eq) => end = Some(parse_i64(f.value)?),
                    ("exclude_id", BinaryOperator::Eq) => exclude_id = parse_i64_or_null(f.value)?,
                    _ => return Err(f.unsupported()),
                }
            }
            Ok(Command::SelectConflict {
                resource_id: resource_id.ok_or(SqlError::MissingFilter("resource_id"))?,
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                end: end.ok_or(SqlError::MissingFilter("end"))?,
                exclude_id,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<Filter<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            out.push(Filter {
                column,
                op,
                value: right,
            });
            Ok(())
        }
        _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
}

impl Filter<'_> {
    fn unsupported(&self) -> SqlError {
        SqlError::Unsupported(format!("filter {} {} ...", self.column, self.op))
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if values.rows.is_empty() => {
            Err(SqlError::Parse("empty VALUES".into()))
        }
        SetExpr::Values(values) => Ok(values.rows.clone()),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Id, SqlError> {
    let mut filters = Vec::new();
    if let Some(sel) = selection {
        collect_filters(sel, &mut filters)?;
    }
    match filters.as_slice() {
        [f] if f.column == "id" && *f.op == BinaryOperator::Eq => parse_i64(f.value),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

/// `"End"` and `b.end` both name the column `end`.
fn column_key(raw: &str) -> String {
    let last = raw.rsplit('.').next().unwrap_or(raw);
    last.trim_matches('"').to_lowercase()
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected integer, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        parse_i64(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("integer out of range".into()))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_i64(expr).map(Some),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(Value::Null) => Err(SqlError::Parse("NULL not allowed here".into())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_text(expr).map(Some),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Parameters ────────────────────────────────────────────────

/// A `$n` token located in the statement text.
struct Placeholder {
    offset: usize,
    len: usize,
    index: usize,
}

/// `$n` placeholder tokens with their byte offset in `sql`. A `$1` inside a
/// string literal or quoted identifier is part of that token and never listed.
fn placeholders(sql: &str) -> Result<Vec<Placeholder>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize_with_location()
        .map_err(|e| SqlError::Syntax(ParserError::from(e)))?;

    let mut found = Vec::new();
    for TokenWithSpan { token, span } in tokens {
        let Token::Placeholder(text) = token else {
            continue;
        };
        let Some(index) = text.strip_prefix('$').and_then(|n| n.parse::<usize>().ok()) else {
            continue;
        };
        let offset = byte_offset(sql, span.start)
            .ok_or_else(|| SqlError::Parse(format!("cannot locate {text}")))?;
        found.push(Placeholder {
            offset,
            len: text.len(),
            index,
        });
    }
    Ok(found)
}

/// Byte offset of a 1-based line/column location, columns counted in chars.
fn byte_offset(sql: &str, at: Location) -> Option<usize> {
    let (mut line, mut column) = (1u64, 1u64);
    for (i, c) in sql.char_indices() {
        if line == at.line && column == at.column {
            return Some(i);
        }
        if c == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line == at.line && column == at.column).then_some(sql.len())
}

/// Highest `$n` placeholder in the statement, 0 if it has none or does not tokenize.
pub fn count_params(sql: &str) -> usize {
    placeholders(sql)
        .map(|found| found.iter().map(|p| p.index).max().unwrap_or(0))
        .unwrap_or(0)
}

/// Inline bound parameters as quoted text literals in a single pass over the
/// statement's placeholder tokens. Values are never rescanned, so a value
/// containing `$1` or a quote stays inside its literal.
pub fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> Result<String, SqlError> {
    let mut bound = String::with_capacity(sql.len());
    let mut copied = 0;
    for Placeholder { offset, len, index } in placeholders(sql)? {
        let param = index
            .checked_sub(1)
            .and_then(|i| params.get(i))
            .ok_or_else(|| SqlError::Parse(format!("no value bound for ${index}")))?;
        bound.push_str(&sql[copied..offset]);
        match param {
            Some(bytes) => {
                bound.push('\'');
                bound.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                bound.push('\'');
            }
            None => bound.push_str("NULL"),
        }
        copied = offset + len;
    }
    bound.push_str(&sql[copied..]);
    Ok(bound)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("syntax error: {0}")]
    Syntax(#[from] ParserError),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column {column} in {table}")]
    UnknownColumn { table: &'static str, column: String },
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

impl SqlError {
    fn unknown_column(table: &'static str, column: &str) -> Self {
        SqlError::UnknownColumn {
            table,
            column: column.to_string(),
        }
    }

    /// Prefix value errors with the row number in multi-row inserts.
    fn in_row(self, row: usize, rows: usize) -> Self {
        match self {
            SqlError::Parse(msg) if rows > 1 => SqlError::Parse(format!("row {row}: {msg}")),
            other => other,
        }
    }
}
