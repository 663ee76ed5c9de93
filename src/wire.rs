use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SlotgridAuthSource;
use crate::engine::{self, ConflictKind, Engine, EngineError, ValidationError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError, Target};
use crate::tenant::TenantManager;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub struct SlotgridHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SlotgridQueryParser>,
}

impl SlotgridHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SlotgridQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            user_error("08006", format!("tenant error: {e}"))
        })
    }

    /// Run and time one command.
    async fn run(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertStaff(staff) => {
                engine.create_staff(staff).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertService(service) => {
                engine.create_service(service).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::GenerateGrid { staff_id, date } => {
                let date = engine::parse_date(&date).map_err(|e| engine_err(e.into()))?;
                let created = engine
                    .ensure_daily_grid(staff_id, date)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(created)))
            }
            Command::InsertBooking(req) => {
                let confirmation = engine.book_by_start(req).await.map_err(engine_err)?;
                confirmation_response(confirmation)
            }
            Command::InsertSlotBooking(req) => {
                let confirmation = engine.book_slots(req).await.map_err(engine_err)?;
                confirmation_response(confirmation)
            }
            Command::SelectStaff => {
                let schema = Arc::new(staff_schema());
                let rows: Vec<PgWireResult<DataRow>> = engine
                    .list_staff()
                    .await
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id)?;
                        encoder.encode_field(&s.name)?;
                        encoder.encode_field(&s.skills)?;
                        encoder.encode_field(&s.color)?;
                        encoder.encode_field(&s.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectServices { staff_id } => {
                let schema = Arc::new(services_schema());
                let rows: Vec<PgWireResult<DataRow>> = engine
                    .list_services(staff_id)
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id)?;
                        encoder.encode_field(&s.staff_id)?;
                        encoder.encode_field(&s.name)?;
                        encoder.encode_field(&i64::from(s.duration_min))?;
                        encoder.encode_field(&sql::format_price(s.price_cents))?;
                        encoder.encode_field(&s.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectSlots { staff_id, date } => {
                let slots = engine
                    .get_free_windows(staff_id, &date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<DataRow>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.appointment_id)?;
                        encoder.encode_field(&format_ts(slot.start))?;
                        encoder.encode_field(&format_ts(slot.end))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectAppointments { staff_id, date } => {
                let slots = engine
                    .list_appointments(staff_id, &date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(appointments_schema());
                let rows: Vec<PgWireResult<DataRow>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.id)?;
                        encoder.encode_field(&slot.staff_id)?;
                        encoder.encode_field(&format_ts(slot.span.start))?;
                        encoder.encode_field(&format_ts(slot.span.end))?;
                        encoder.encode_field(&slot.status.as_str().to_string())?;
                        encoder.encode_field(&slot.service_id)?;
                        encoder.encode_field(&slot.client_id)?;
                        encoder.encode_field(&slot.booking_id.map(|b| b.to_string()))?;
                        encoder.encode_field(&slot.notes)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectClients => {
                let schema = Arc::new(clients_schema());
                let rows: Vec<PgWireResult<DataRow>> = engine
                    .list_clients()
                    .await
                    .into_iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&c.id)?;
                        encoder.encode_field(&c.full_name)?;
                        encoder.encode_field(&c.email)?;
                        encoder.encode_field(&c.phone)?;
                        encoder.encode_field(&c.notes)?;
                        encoder.encode_field(&c.tags)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectDiagnostics => {
                let d = engine.diagnostics().await;
                let schema = Arc::new(diagnostics_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&(d.staff as i64))?;
                encoder.encode_field(&(d.services as i64))?;
                encoder.encode_field(&(d.appointments as i64))?;
                encoder.encode_field(&(d.clients as i64))?;
                Ok(query_response(schema, vec![Ok(encoder.take_row())]))
            }
        }
    }
}

fn format_ts(ts: chrono::NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn query_response(
    schema: Arc<Vec<FieldInfo>>,
    rows: Vec<PgWireResult<DataRow>>,
) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn confirmation_response(c: BookingConfirmation) -> PgWireResult<Response> {
    let schema = Arc::new(confirmation_schema());
    let ids = c
        .slot_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&c.booking_id.to_string())?;
    encoder.encode_field(&c.staff_id)?;
    encoder.encode_field(&c.client_id)?;
    encoder.encode_field(&ids)?;
    encoder.encode_field(&format_ts(c.start))?;
    encoder.encode_field(&format_ts(c.end))?;
    Ok(query_response(schema, vec![Ok(encoder.take_row())]))
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn staff_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("name", Type::VARCHAR),
        field("skills", Type::VARCHAR),
        field("color", Type::VARCHAR),
        field("active", Type::BOOL),
    ]
}

fn services_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("staff_id", Type::INT8),
        field("name", Type::VARCHAR),
        field("duration_min", Type::INT8),
        field("price", Type::VARCHAR),
        field("active", Type::BOOL),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        field("appointment_id", Type::INT8),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
    ]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        field("appointment_id", Type::INT8),
        field("staff_id", Type::INT8),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("service_id", Type::INT8),
        field("client_id", Type::INT8),
        field("booking_id", Type::VARCHAR),
        field("notes", Type::VARCHAR),
    ]
}

fn clients_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("full_name", Type::VARCHAR),
        field("email", Type::VARCHAR),
        field("phone", Type::VARCHAR),
        field("notes", Type::VARCHAR),
        field("tags", Type::VARCHAR),
    ]
}

fn diagnostics_schema() -> Vec<FieldInfo> {
    vec![
        field("staff", Type::INT8),
        field("services", Type::INT8),
        field("appointments", Type::INT8),
        field("clients", Type::INT8),
    ]
}

fn confirmation_schema() -> Vec<FieldInfo> {
    vec![
        field("booking_id", Type::VARCHAR),
        field("staff_id", Type::INT8),
        field("client_id", Type::INT8),
        field("appointment_ids", Type::VARCHAR),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
    ]
}

/// Row shape a statement produces, known before any parameter is bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::target_table(sql) {
        Some(Target::Select(table)) => match table.as_str() {
            "staff" => staff_schema(),
            "services" => services_schema(),
            "slots" => slots_schema(),
            "appointments" => appointments_schema(),
            "clients" => clients_schema(),
            "diagnostics" => diagnostics_schema(),
            _ => vec![],
        },
        Some(Target::Insert(table)) if table == "bookings" || table == "slot_bookings" => {
            confirmation_schema()
        }
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotgridHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmds = sql::parse_batch(query).map_err(sql_err)?;
        let mut responses = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            responses.push(self.run(&engine, cmd).await?);
        }
        Ok(responses)
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotgridQueryParser;

#[async_trait]
impl QueryParser for SlotgridQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotgridHandler {
    type Statement = String;
    type QueryParser = SlotgridQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(&engine, cmd).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    // Highest index first so $1 never clobbers the prefix of $10
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotgridFactory {
    handler: Arc<SlotgridHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SlotgridAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl SlotgridFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SlotgridAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotgridHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotgridFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = SlotgridFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for an engine failure. Conflicts are retryable; validation is not.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(ValidationError::InvalidDate(_) | ValidationError::InvalidTime(_)) => {
            "22007"
        }
        EngineError::Validation(_) => "22023",
        EngineError::Conflict(ConflictKind::SlotUnavailable | ConflictKind::SlotTaken(_)) => {
            "23P01"
        }
        EngineError::NotFound(..) => "P0002",
        EngineError::AlreadyExists(..) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
