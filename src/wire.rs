use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SharedPassword;
use crate::engine::{Engine, EngineError};
use crate::lots::LotManager;
use crate::model::*;
use crate::observability;
use crate::seed::CANONICAL_LAYOUT;
use crate::sql::{self, Command};

pub struct ParkdHandler {
    lots: Arc<LotManager>,
    query_parser: Arc<ParkdQueryParser>,
}

impl ParkdHandler {
    pub fn new(lots: Arc<LotManager>) -> Self {
        Self {
            lots,
            query_parser: Arc::new(ParkdQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let lot = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.lots.get_or_open(&lot).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("lot error: {e}"),
            )))
        })
    }

    /// Run one command, recording its latency and outcome.
    async fn run(&self, engine: &Engine, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();

        let result = self.execute_command(engine, cmd).await;

        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::SelectSpots { floor } => {
                let mut filter = SpotFilter::new();
                if let Some(floor) = floor {
                    filter = filter.floor(floor);
                }
                let spots = engine.find(&filter).await;
                let schema = Arc::new(spots_schema());
                let rows: Vec<PgWireResult<_>> = spots
                    .iter()
                    .map(|spot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&spot.id.to_string())?;
                        encoder.encode_field(&i64::from(spot.floor))?;
                        encoder.encode_field(&i64::from(spot.spot_number))?;
                        encoder.encode_field(&spot.spot_type.as_str())?;
                        encoder.encode_field(&spot.is_occupied)?;
                        encoder.encode_field(&spot.vehicle.as_ref().map(|v| v.vehicle_type.clone()))?;
                        encoder.encode_field(&spot.plate_number().map(str::to_string))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectFloors => {
                let summaries = engine.floor_summaries().await;
                let schema = Arc::new(floors_schema());
                let rows: Vec<PgWireResult<_>> = summaries
                    .iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&i64::from(s.floor))?;
                        encoder.encode_field(&(s.total as i64))?;
                        encoder.encode_field(&(s.available as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::Park {
                vehicle_type,
                floor,
                plate_number,
            } => {
                let spot = engine
                    .park(&vehicle_type, floor, &plate_number)
                    .await
                    .map_err(|e| {
                        if matches!(e, EngineError::NoAvailableSpot { .. }) {
                            metrics::counter!(observability::PARK_REJECTED_TOTAL).increment(1);
                        }
                        engine_err(e)
                    })?;
                let message = format!(
                    "Vehicle parked on floor #{} at spot #{}",
                    spot.floor, spot.spot_number
                );
                parked_response(&spot, &message)
            }
            Command::Unpark { plate_number } => {
                let (spot, _vehicle) = engine.unpark(&plate_number).await.map_err(engine_err)?;
                parked_response(&spot, "Car unparked!")
            }
            Command::SeedSpots => {
                engine
                    .seed_inventory(&CANONICAL_LAYOUT)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("CALL")))
            }
        }
    }
}

/// Single-row result shared by park and unpark.
fn parked_response(spot: &SpotRecord, message: &str) -> PgWireResult<Response> {
    let schema = Arc::new(parked_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&i64::from(spot.floor))?;
    encoder.encode_field(&i64::from(spot.spot_number))?;
    encoder.encode_field(&spot.spot_type.as_str())?;
    encoder.encode_field(&message)?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn spots_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("floor", Type::INT8),
        text_field("spot_number", Type::INT8),
        text_field("spot_type", Type::VARCHAR),
        text_field("is_occupied", Type::BOOL),
        text_field("vehicle_type", Type::VARCHAR),
        text_field("plate_number", Type::VARCHAR),
    ]
}

fn floors_schema() -> Vec<FieldInfo> {
    vec![
        text_field("floor", Type::INT8),
        text_field("total", Type::INT8),
        text_field("available", Type::INT8),
    ]
}

fn parked_schema() -> Vec<FieldInfo> {
    vec![
        text_field("floor", Type::INT8),
        text_field("spot_number", Type::INT8),
        text_field("spot_type", Type::VARCHAR),
        text_field("message", Type::VARCHAR),
    ]
}

/// Result columns for a statement, by the table it targets.
fn result_schema_for(sql: &str) -> Vec<FieldInfo> {
    match sql::target_table(sql).as_deref() {
        Some("parked") => parked_schema(),
        Some("spots") => spots_schema(),
        Some("floors") => floors_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for ParkdHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ParkdQueryParser;

#[async_trait]
impl QueryParser for ParkdQueryParser {
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
        Ok(result_schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ParkdHandler {
    type Statement = String;
    type QueryParser = ParkdQueryParser;

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
        self.run(&engine, &sql).await
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
            result_schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema_for(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals. Highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ParkdFactory {
    handler: Arc<ParkdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SharedPassword, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ParkdFactory {
    pub fn new(lots: Arc<LotManager>, password: String) -> Self {
        Self {
            handler: Arc::new(ParkdHandler::new(lots)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SharedPassword::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ParkdFactory {
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

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    lots: Arc<LotManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = ParkdFactory::new(lots, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// SQLSTATE for each engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "23502",
        EngineError::NoAvailableSpot { .. } => "P0001",
        EngineError::NotFound(_) | EngineError::UnknownSpot { .. } => "P0002",
        EngineError::DuplicateSpot { .. } => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Storage(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM spots"), 0);
        assert_eq!(
            count_params("INSERT INTO parked VALUES ($1, $2, $3)"),
            3
        );
        assert_eq!(count_params("SELECT $12, $3"), 12);
        assert_eq!(count_params("SELECT '$'"), 0);
    }

    #[test]
    fn schema_follows_table() {
        let names = |fields: Vec<FieldInfo>| -> Vec<String> {
            fields.iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(
            names(result_schema_for("INSERT INTO parked VALUES ($1, $2, $3)")),
            ["floor", "spot_number", "spot_type", "message"]
        );
        assert_eq!(
            names(result_schema_for("DELETE FROM parked WHERE plate_number = $1")),
            ["floor", "spot_number", "spot_type", "message"]
        );
        assert_eq!(
            names(result_schema_for("select * from spots where floor = $1")).len(),
            7
        );
        assert_eq!(
            names(result_schema_for(
                "SELECT * FROM spots WHERE plate_number = 'parked'"
            ))
            .len(),
            7
        );
        assert_eq!(
            names(result_schema_for("SELECT * FROM floors")),
            ["floor", "total", "available"]
        );
        assert!(result_schema_for("CALL seed_spots()").is_empty());
    }

    #[test]
    fn engine_errors_map_to_sqlstate() {
        assert_eq!(sqlstate(&EngineError::Validation("floor")), "23502");
        assert_eq!(sqlstate(&EngineError::NoAvailableSpot { floor: 1 }), "P0001");
        assert_eq!(sqlstate(&EngineError::NotFound("X".into())), "P0002");
        assert_eq!(sqlstate(&EngineError::Storage("disk".into())), "58030");
    }
}
