use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Parsed command from SQL input.
///
/// Park/unpark fields that are absent or NULL come through empty (`""` / `0`)
/// so the engine reports them as validation errors.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectSpots {
        floor: Option<u32>,
    },
    SelectFloors,
    Park {
        vehicle_type: String,
        floor: u32,
        plate_number: String,
    },
    Unpark {
        plate_number: String,
    },
    SeedSpots,
}

/// Column order of `INSERT INTO parked` without a column list.
const PARK_COLUMNS: [&str; 3] = ["vehicle_type", "floor", "plate_number"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("CALL "))
    {
        return parse_call(&trimmed[5..]);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a statement reads or writes. Accepts `$N` placeholders, so it
/// works on statements that are only prepared.
pub fn target_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Insert(insert) => insert_table_name(insert).ok(),
        Statement::Delete(delete) => delete_table_name(delete).ok(),
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => select
                .from
                .first()
                .and_then(|t| table_factor_name(&t.relation).ok()),
            _ => None,
        },
        _ => None,
    }
}

fn parse_call(procedure: &str) -> Result<Command, SqlError> {
    let name: String = procedure
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    match name.as_str() {
        "seed_spots()" | "seed_spots" => Ok(Command::SeedSpots),
        _ => Err(SqlError::Unsupported(format!("CALL {procedure}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "parked" {
        return Err(SqlError::UnknownTable(table));
    }

    let rows = extract_all_insert_rows(insert)?;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported("multi-row INSERT INTO parked".into()));
    }
    let values = &rows[0];

    let columns: Vec<String> = if insert.columns.is_empty() {
        PARK_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if values.len() > columns.len() {
        return Err(SqlError::WrongArity("parked", columns.len(), values.len()));
    }

    let (mut vehicle_type, mut floor, mut plate_number) = (None, None, None);
    for (column, value) in columns.iter().zip(values) {
        match column.as_str() {
            "vehicle_type" => vehicle_type = parse_text_or_null(value)?,
            "floor" => floor = parse_u32_or_null(value)?,
            "plate_number" => plate_number = parse_text_or_null(value)?,
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }

    Ok(Command::Park {
        vehicle_type: vehicle_type.unwrap_or_default(),
        floor: floor.unwrap_or(0),
        plate_number: plate_number.unwrap_or_default(),
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "parked" {
        return Err(SqlError::UnknownTable(table));
    }
    let plate_number = match &delete.selection {
        Some(selection) => extract_eq_filter(selection, "plate_number")?
            .map(parse_text_or_null)
            .transpose()?
            .flatten(),
        None => None,
    };
    Ok(Command::Unpark {
        plate_number: plate_number.unwrap_or_default(),
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "spots" => {
            let floor = match &select.selection {
                Some(selection) => match extract_eq_filter(selection, "floor")? {
                    Some(expr) => Some(parse_u32(expr)?),
                    None => None,
                },
                None => None,
            };
            Ok(Command::SelectSpots { floor })
        }
        "floors" => Ok(Command::SelectFloors),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Find `column = <value>` in a WHERE clause, looking through ANDs.
fn extract_eq_filter<'a>(expr: &'a Expr, column: &str) -> Result<Option<&'a Expr>, SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            if let Some(found) = extract_eq_filter(left, column)? {
                return Ok(Some(found));
            }
            extract_eq_filter(right, column)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some(column) => Ok(Some(right.as_ref())),
        Expr::Nested(inner) => extract_eq_filter(inner, column),
        _ => Ok(None),
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_u32(expr).map(Some)
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at most {expected} values, got {got}")
            }
        }
    }
}

impl std::error::Error for SqlError {}
