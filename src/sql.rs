use std::collections::HashMap;

use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertStaff(Staff),
    InsertService(Service),
    /// Materialize the grid for one staff member and day.
    GenerateGrid {
        staff_id: i64,
        date: String,
    },
    InsertBooking(BookingRequest),
    InsertSlotBooking(SlotBookingRequest),
    SelectStaff,
    SelectServices {
        staff_id: Option<i64>,
    },
    /// Bookable cells; runs the resolver.
    SelectSlots {
        staff_id: i64,
        date: String,
    },
    /// Raw rows of a day, Free and Booked.
    SelectAppointments {
        staff_id: i64,
        date: String,
    },
    SelectClients,
    SelectDiagnostics,
}

const STAFF_COLUMNS: &[&str] = &["id", "name", "skills", "color", "active"];
const SERVICE_COLUMNS: &[&str] = &["id", "staff_id", "name", "duration_min", "price", "active"];
const GRID_COLUMNS: &[&str] = &["staff_id", "date"];
const BOOKING_COLUMNS: &[&str] = &[
    "staff_id",
    "date",
    "start_time",
    "service_id",
    "full_name",
    "email",
    "phone",
    "notes",
];
const SLOT_BOOKING_COLUMNS: &[&str] = &[
    "appointment_ids",
    "service_id",
    "full_name",
    "email",
    "phone",
    "notes",
];

/// First statement of `sql`.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let stmts = parse_statements(sql)?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    parse_statement(stmt)
}

/// Every `;`-separated statement of a simple-protocol query string, in order.
/// Nothing runs unless the whole batch parses.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    let stmts = parse_statements(sql)?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statements(sql: &str) -> Result<Vec<Statement>, SqlError> {
    Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(|e| SqlError::Parse(e.to_string()))
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// What a statement reads or writes, resolved without binding any values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Select(String),
    Insert(String),
}

/// Table a statement addresses. Parameter placeholders are allowed, so this
/// works on unbound prepared statements.
pub fn target_table(sql: &str) -> Option<Target> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Insert(insert) => insert_table_name(insert).ok().map(Target::Insert),
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => select
                .from
                .first()
                .and_then(|f| table_factor_name(&f.relation).ok())
                .map(Target::Select),
            _ => None,
        },
        _ => None,
    }
}

/// One VALUES row addressed by column name.
struct Row<'a> {
    table: &'static str,
    values: HashMap<String, &'a Expr>,
}

impl<'a> Row<'a> {
    fn new(
        table: &'static str,
        known: &[&str],
        columns: &[ast::Ident],
        exprs: &'a [Expr],
    ) -> Result<Self, SqlError> {
        let names: Vec<String> = if columns.is_empty() {
            known.iter().map(|c| c.to_string()).collect()
        } else {
            columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if exprs.len() > names.len() {
            return Err(SqlError::Parse(format!(
                "{table}: {} values for {} columns",
                exprs.len(),
                names.len()
            )));
        }
        let mut values = HashMap::new();
        for (name, expr) in names.into_iter().zip(exprs) {
            if !known.contains(&name.as_str()) {
                return Err(SqlError::UnknownColumn(table, name));
            }
            values.insert(name, expr);
        }
        Ok(Self { table, values })
    }

    /// Absent columns and NULL both read as `None`.
    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.values.get(column).copied().filter(|e| !is_null(e))
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn i64(&self, column: &'static str) -> Result<i64, SqlError> {
        parse_i64_expr(self.required(column)?)
    }

    fn string(&self, column: &'static str) -> Result<String, SqlError> {
        parse_string_expr(self.required(column)?)
    }

    fn opt_string(&self, column: &str) -> Result<Option<String>, SqlError> {
        self.get(column).map(parse_string_expr).transpose()
    }

    fn bool_or(&self, column: &str, default: bool) -> Result<bool, SqlError> {
        self.get(column).map_or(Ok(default), parse_bool)
    }

    fn contact(&self) -> Result<ContactDetails, SqlError> {
        Ok(ContactDetails {
            full_name: self.opt_string("full_name")?,
            email: self.opt_string("email")?,
            phone: self.opt_string("phone")?,
            notes: self.opt_string("notes")?,
        })
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let exprs = extract_insert_values(insert)?;
    let columns = &insert.columns;

    match table.as_str() {
        "staff" => {
            let row = Row::new("staff", STAFF_COLUMNS, columns, exprs)?;
            Ok(Command::InsertStaff(Staff {
                id: row.i64("id")?,
                name: row.string("name")?,
                skills: row.opt_string("skills")?,
                color: row.opt_string("color")?,
                active: row.bool_or("active", true)?,
            }))
        }
        "services" => {
            let row = Row::new("services", SERVICE_COLUMNS, columns, exprs)?;
            let duration = row.i64("duration_min")?;
            Ok(Command::InsertService(Service {
                id: row.i64("id")?,
                staff_id: row.i64("staff_id")?,
                name: row.string("name")?,
                duration_min: u32::try_from(duration)
                    .map_err(|_| SqlError::Parse(format!("duration_min out of range: {duration}")))?,
                price_cents: row.get("price").map_or(Ok(0), parse_price_expr)?,
                active: row.bool_or("active", true)?,
            }))
        }
        "grid" => {
            let row = Row::new("grid", GRID_COLUMNS, columns, exprs)?;
            Ok(Command::GenerateGrid {
                staff_id: row.i64("staff_id")?,
                date: row.string("date")?,
            })
        }
        "bookings" => {
            let row = Row::new("bookings", BOOKING_COLUMNS, columns, exprs)?;
            Ok(Command::InsertBooking(BookingRequest {
                staff_id: row.i64("staff_id")?,
                date: row.string("date")?,
                start_time: row.string("start_time")?,
                service_id: row.i64("service_id")?,
                contact: row.contact()?,
            }))
        }
        "slot_bookings" => {
            let row = Row::new("slot_bookings", SLOT_BOOKING_COLUMNS, columns, exprs)?;
            Ok(Command::InsertSlotBooking(SlotBookingRequest {
                slot_ids: parse_id_list(row.required("appointment_ids")?)?,
                service_id: row.i64("service_id")?,
                contact: row.contact()?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = HashMap::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let filter_i64 = |col: &'static str| -> Result<i64, SqlError> {
        filters
            .get(col)
            .ok_or(SqlError::MissingFilter(col))
            .and_then(|e| parse_i64_expr(e))
    };
    let filter_string = |col: &'static str| -> Result<String, SqlError> {
        filters
            .get(col)
            .ok_or(SqlError::MissingFilter(col))
            .and_then(|e| parse_string_expr(e))
    };

    match table.as_str() {
        "staff" => Ok(Command::SelectStaff),
        "services" => Ok(Command::SelectServices {
            staff_id: filters.get("staff_id").map(|e| parse_i64_expr(e)).transpose()?,
        }),
        "slots" => Ok(Command::SelectSlots {
            staff_id: filter_i64("staff_id")?,
            date: filter_string("date")?,
        }),
        "appointments" => Ok(Command::SelectAppointments {
            staff_id: filter_i64("staff_id")?,
            date: filter_string("date")?,
        }),
        "clients" => Ok(Command::SelectClients),
        "diagnostics" => Ok(Command::SelectDiagnostics),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = 1 AND b = '2'` into a column map. Other predicates are rejected.
fn collect_eq_filters(expr: &Expr, out: &mut HashMap<String, Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.insert(col, right.as_ref().clone());
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// The single VALUES row. Bookings are one unit of work each.
fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
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

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer '{s}': {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) | Value::Number(s, _)) => {
            Ok(s.clone())
        }
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
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
        Some(other) => Err(SqlError::Parse(format!("expected bool, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Decimal price ("25", "25.5", 25.00) to whole cents.
fn parse_price(raw: &str) -> Result<i64, SqlError> {
    let bad = || SqlError::Parse(format!("bad price: {raw}"));
    let raw = raw.trim();
    let (whole, frac) = raw.split_once('.').unwrap_or((raw, ""));
    if whole.is_empty() || frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    let whole: i64 = whole.parse().map_err(|_| bad())?;
    let frac: i64 = format!("{frac:0<2}").parse().map_err(|_| bad())?;
    whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(bad)
}

fn parse_price_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_price_expr(expr)?);
    }
    parse_price(&parse_string_expr(expr)?)
}

/// `ARRAY[1, 2]`, `'{1,2}'`, `'1,2'` or a bare id.
fn parse_id_list(expr: &Expr) -> Result<Vec<SlotId>, SqlError> {
    if let Expr::Array(array) = expr {
        return array.elem.iter().map(parse_i64_expr).collect();
    }
    let raw = parse_string_expr(expr)?;
    raw.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|e| SqlError::Parse(format!("bad appointment id '{s}': {e}")))
        })
        .collect()
}

/// Render cents the way prices are written in: `4500` → `"45.00"`.
pub fn format_price(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: {c} is required"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_insert_staff() {
        let sql = "INSERT INTO staff (id, name, color) VALUES (1, 'Bella', '#cc66aa')";
        match parse_sql(sql).unwrap() {
            Command::InsertStaff(s) => {
                assert_eq!(s.id, 1);
                assert_eq!(s.name, "Bella");
                assert_eq!(s.color.as_deref(), Some("#cc66aa"));
                assert_eq!(s.skills, None);
                assert!(s.active);
            }
            cmd => panic!("expected InsertStaff, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_staff_positional() {
        let sql = "INSERT INTO staff VALUES (2, 'Ivo', 'cuts', NULL, false)";
        match parse_sql(sql).unwrap() {
            Command::InsertStaff(s) => {
                assert_eq!(s.skills.as_deref(), Some("cuts"));
                assert_eq!(s.color, None);
                assert!(!s.active);
            }
            cmd => panic!("expected InsertStaff, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_service_prices() {
        let sql = "INSERT INTO services (id, staff_id, name, duration_min, price) VALUES (10, 1, 'Facial', 60, '45.5')";
        match parse_sql(sql).unwrap() {
            Command::InsertService(s) => {
                assert_eq!(s.duration_min, 60);
                assert_eq!(s.price_cents, 4550);
            }
            cmd => panic!("expected InsertService, got {cmd:?}"),
        }
        let sql = "INSERT INTO services (id, staff_id, name, duration_min, price) VALUES (11, 1, 'Brows', 30, 12.00)";
        match parse_sql(sql).unwrap() {
            Command::InsertService(s) => assert_eq!(s.price_cents, 1200),
            cmd => panic!("expected InsertService, got {cmd:?}"),
        }
    }

    #[test]
    fn price_format() {
        assert_eq!(parse_price("7").unwrap(), 700);
        assert_eq!(parse_price("0.05").unwrap(), 5);
        assert!(parse_price("1.234").is_err());
        assert!(parse_price("abc").is_err());
        assert_eq!(format_price(4550), "45.50");
        assert_eq!(format_price(5), "0.05");
    }

    #[test]
    fn batch_keeps_statement_order() {
        let sql = "INSERT INTO staff (id, name) VALUES (1, 'Bella'); SELECT * FROM staff;";
        let cmds = parse_batch(sql).unwrap();
        assert_eq!(cmds.len(), 2);
        assert!(matches!(cmds[0], Command::InsertStaff(_)));
        assert_eq!(cmds[1], Command::SelectStaff);

        assert!(parse_batch("SELECT * FROM staff; DROP TABLE staff").is_err());
        assert!(matches!(parse_batch("  "), Err(SqlError::Empty)));
    }

    #[test]
    fn parse_insert_grid() {
        let sql = "INSERT INTO grid (staff_id, date) VALUES (1, '2030-01-07')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::GenerateGrid {
                staff_id: 1,
                date: "2030-01-07".into()
            }
        );
    }

    #[test]
    fn parse_insert_booking_with_nulls() {
        let sql = "INSERT INTO bookings (staff_id, date, start_time, service_id, full_name, email, phone) \
                   VALUES (1, '2030-01-07', '09:00', 10, 'Ana', 'a@x.com', NULL)";
        match parse_sql(sql).unwrap() {
            Command::InsertBooking(req) => {
                assert_eq!(req.staff_id, 1);
                assert_eq!(req.start_time, "09:00");
                assert_eq!(req.contact.full_name.as_deref(), Some("Ana"));
                assert_eq!(req.contact.phone, None);
                assert_eq!(req.contact.notes, None);
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn booking_requires_start_time() {
        let sql = "INSERT INTO bookings (staff_id, date, service_id) VALUES (1, '2030-01-07', 10)";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingColumn("bookings", "start_time"))
        ));
    }

    #[test]
    fn parse_slot_booking_id_lists() {
        for list in ["ARRAY[5, 6]", "'{5,6}'", "'5, 6'"] {
            let sql = format!(
                "INSERT INTO slot_bookings (appointment_ids, service_id, full_name) VALUES ({list}, 10, 'Marko')"
            );
            match parse_sql(&sql).unwrap() {
                Command::InsertSlotBooking(req) => {
                    assert_eq!(req.slot_ids, vec![5, 6], "{list}");
                    assert_eq!(req.service_id, 10);
                }
                cmd => panic!("expected InsertSlotBooking, got {cmd:?}"),
            }
        }
    }

    #[test]
    fn parse_select_slots() {
        let sql = "SELECT * FROM slots WHERE staff_id = 1 AND date = '2030-01-07'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectSlots {
                staff_id: 1,
                date: "2030-01-07".into()
            }
        );
    }

    #[test]
    fn select_slots_needs_date() {
        let sql = "SELECT * FROM slots WHERE staff_id = 1";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("date"))));
    }

    #[test]
    fn parse_select_services_optional_filter() {
        assert_eq!(
            parse_sql("SELECT * FROM services").unwrap(),
            Command::SelectServices { staff_id: None }
        );
        assert_eq!(
            parse_sql("SELECT * FROM services WHERE staff_id = '2'").unwrap(),
            Command::SelectServices { staff_id: Some(2) }
        );
    }

    #[test]
    fn parse_plain_selects() {
        assert_eq!(parse_sql("SELECT * FROM staff").unwrap(), Command::SelectStaff);
        assert_eq!(parse_sql("select * from clients").unwrap(), Command::SelectClients);
        assert_eq!(
            parse_sql("SELECT * FROM diagnostics").unwrap(),
            Command::SelectDiagnostics
        );
    }

    #[test]
    fn unknown_table_and_column_errors() {
        assert!(matches!(
            parse_sql("INSERT INTO rooms (id) VALUES (1)"),
            Err(SqlError::UnknownTable(_))
        ));
        assert!(matches!(
            parse_sql("INSERT INTO staff (id, nickname) VALUES (1, 'B')"),
            Err(SqlError::UnknownColumn("staff", _))
        ));
    }

    #[test]
    fn multi_row_insert_rejected() {
        let sql = "INSERT INTO grid (staff_id, date) VALUES (1, '2030-01-07'), (2, '2030-01-07')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn target_of_prepared_statement() {
        assert_eq!(
            target_table("SELECT * FROM slots WHERE staff_id = $1 AND date = $2"),
            Some(Target::Select("slots".into()))
        );
        assert_eq!(
            target_table("INSERT INTO bookings (staff_id, date) VALUES ($1, $2)"),
            Some(Target::Insert("bookings".into()))
        );
        assert_eq!(target_table("not sql"), None);
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
