use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::StartupHandler;
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, BookingFilter, Command, SqlError};

/// Serve one client connection until it closes.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, None, BookwellFactory::new(engine)).await
}

pub struct BookwellHandler {
    engine: Arc<Engine>,
    query_parser: Arc<BookwellQueryParser>,
}

impl BookwellHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(BookwellQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, sql: &str, format: &Format) -> PgWireResult<Response> {
        let started = Instant::now();
        let cmd = match sql::parse_sql(sql) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                    .increment(1);
                tracing::debug!("rejected statement: {e}");
                return Err(sql_err(e));
            }
        };
        let label = command_label(&cmd);
        let result = self.execute_command(cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command, format: &Format) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertResource {
                id,
                fields,
                returning,
            } => {
                let resource = engine.create_resource(id, fields).await.map_err(engine_err)?;
                if returning {
                    resource_rows(vec![resource], format)
                } else {
                    Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
                }
            }
            Command::UpdateResource {
                id,
                patch,
                returning,
            } => {
                let resource = engine.update_resource(id, patch).await.map_err(engine_err)?;
                if returning {
                    resource_rows(vec![resource], format)
                } else {
                    Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
                }
            }
            Command::DeleteResource { id } => {
                let deleted = engine.delete_resource(id).await.map_err(engine_err)?;
                Ok(Response::Execution(
                    Tag::new("DELETE").with_rows(usize::from(deleted)),
                ))
            }
            Command::InsertBookings { mut rows, returning } => {
                let created = if rows.len() == 1 {
                    let (id, new) = rows.remove(0);
                    vec![engine.create_booking(id, new).await.map_err(engine_err)?]
                } else {
                    engine.batch_create_bookings(rows).await.map_err(engine_err)?
                };
                if returning {
                    booking_rows(created, format)
                } else {
                    Ok(Response::Execution(
                        Tag::new("INSERT").with_rows(created.len()),
                    ))
                }
            }
            Command::UpdateBooking {
                id,
                patch,
                returning,
            } => {
                let booking = engine.update_booking(id, patch).await.map_err(engine_err)?;
                if returning {
                    booking_rows(vec![booking], format)
                } else {
                    Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
                }
            }
            Command::DeleteBooking { id } => {
                let deleted = engine.delete_booking(id).await.map_err(engine_err)?;
                Ok(Response::Execution(
                    Tag::new("DELETE").with_rows(usize::from(deleted)),
                ))
            }
            Command::SelectResources { id } => {
                let resources = match id {
                    Some(id) => engine.get_resource_info(id).await.into_iter().collect(),
                    None => engine.list_resources().await,
                };
                resource_rows(resources, format)
            }
            Command::SelectBookings { filter } => {
                let bookings = match filter {
                    BookingFilter::All => engine.list_bookings().await,
                    BookingFilter::Id(id) => engine.get_booking(id).await.into_iter().collect(),
                    BookingFilter::Resource(rid) => engine.list_bookings_for_resource(rid).await,
                };
                booking_rows(bookings, format)
            }
            Command::SelectAvailability {
                resource_id,
                start,
                end,
                min_duration,
            } => {
                let spans = engine
                    .free_spans(resource_id, start, end, min_duration)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema(format));
                let rows = spans.into_iter().map(|span| -> PgWireResult<DataRow> {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&resource_id)?;
                    encoder.encode_field(&span.start)?;
                    encoder.encode_field(&span.end)?;
                    Ok(encoder.take_row())
                });
                query_response(schema.clone(), rows)
            }
            Command::SelectConflict {
                resource_id,
                start,
                end,
                exclude_id,
            } => {
                let conflict = engine
                    .check_conflict(resource_id, start, end, exclude_id)
                    .await;
                let schema = Arc::new(conflict_schema(format));
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&resource_id)?;
                encoder.encode_field(&start)?;
                encoder.encode_field(&end)?;
                encoder.encode_field(&conflict)?;
                query_response(schema, std::iter::once(Ok(encoder.take_row())))
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn query_response(
    schema: Arc<Vec<FieldInfo>>,
    rows: impl Iterator<Item = PgWireResult<DataRow>>,
) -> PgWireResult<Response> {
    let rows: Vec<_> = rows.collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn resource_rows(resources: Vec<Resource>, format: &Format) -> PgWireResult<Response> {
    let schema = Arc::new(resource_schema(format));
    let rows = resources.into_iter().map(|r| -> PgWireResult<DataRow> {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&r.id)?;
        encoder.encode_field(&r.name)?;
        encoder.encode_field(&r.description)?;
        encoder.encode_field(&r.location)?;
        encoder.encode_field(&i64::from(r.capacity))?;
        encoder.encode_field(&r.available)?;
        Ok(encoder.take_row())
    });
    query_response(schema.clone(), rows)
}

fn booking_rows(bookings: Vec<Booking>, format: &Format) -> PgWireResult<Response> {
    let schema = Arc::new(booking_schema(format));
    let rows = bookings.into_iter().map(|b| -> PgWireResult<DataRow> {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&b.id)?;
        encoder.encode_field(&b.resource_id)?;
        encoder.encode_field(&b.span.start)?;
        encoder.encode_field(&b.span.end)?;
        encoder.encode_field(&b.booked_by)?;
        encoder.encode_field(&b.purpose)?;
        Ok(encoder.take_row())
    });
    query_response(schema.clone(), rows)
}

fn fields(columns: &[(&str, Type)], format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn resource_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::INT8),
            ("name", Type::VARCHAR),
            ("description", Type::VARCHAR),
            ("location", Type::VARCHAR),
            ("capacity", Type::INT8),
            ("available", Type::BOOL),
        ],
        format,
    )
}

fn booking_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::INT8),
            ("resource_id", Type::INT8),
            ("start", Type::INT8),
            ("end", Type::INT8),
            ("booked_by", Type::VARCHAR),
            ("purpose", Type::VARCHAR),
        ],
        format,
    )
}

fn availability_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("resource_id", Type::INT8),
            ("start", Type::INT8),
            ("end", Type::INT8),
        ],
        format,
    )
}

fn conflict_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("resource_id", Type::INT8),
            ("start", Type::INT8),
            ("end", Type::INT8),
            ("conflict", Type::BOOL),
        ],
        format,
    )
}

/// Row shape a statement will produce, guessed from its text so that
/// statements with unbound `$n` placeholders can still be described.
fn describe_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let words: Vec<String> = sql
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|w| !w.is_empty())
        .map(|w| w.trim_matches('"').to_lowercase())
        .collect();
    let table_after = |keyword: &str| {
        words
            .iter()
            .position(|w| w == keyword)
            .and_then(|i| words.get(i + 1))
            .map(String::as_str)
    };
    let returning = words.iter().any(|w| w == "returning");

    let table = match words.first().map(String::as_str) {
        Some("select") => table_after("from"),
        Some("insert") if returning => table_after("into"),
        Some("update") if returning => table_after("update"),
        _ => None,
    };
    match table {
        Some("resources") => resource_schema(format),
        Some("bookings") => booking_schema(format),
        Some("availability") => availability_schema(format),
        Some("conflicts") => conflict_schema(format),
        _ => Vec::new(),
    }
}

#[async_trait]
impl SimpleQueryHandler for BookwellHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BookwellQueryParser;

#[async_trait]
impl QueryParser for BookwellQueryParser {
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
        Ok(vec![Type::VARCHAR; sql::count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe_schema(
            stmt,
            column_format.unwrap_or(&Format::UnifiedText),
        ))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BookwellHandler {
    type Statement = String;
    type QueryParser = BookwellQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let bound = sql::bind_params(&portal.statement.statement, &portal.parameters)
            .map_err(sql_err)?;
        self.run(&bound, &portal.result_column_format).await
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
        let param_types = vec![Type::VARCHAR; sql::count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            describe_schema(&target.statement, &Format::UnifiedText),
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
        Ok(DescribePortalResponse::new(describe_schema(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BookwellFactory {
    handler: Arc<BookwellHandler>,
    noop: Arc<NoopHandler>,
}

impl BookwellFactory {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            handler: Arc::new(BookwellHandler::new(engine)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BookwellFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.noop.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for an engine rejection. Each kind is distinguishable by code alone.
pub fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidInterval { .. } => "23514",
        EngineError::Conflict { .. } => "23P01",
        EngineError::NotFound { .. } => "P0002",
        EngineError::Invalid(_) => "22023",
        EngineError::AlreadyExists { .. } => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Wal(_) => "58030",
    }
}

pub fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn { .. } => "42703",
        _ => "42601",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(sql_sqlstate(&e), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_have_distinct_codes() {
        let errors = [
            EngineError::InvalidInterval { start: 1, end: 1 },
            EngineError::Conflict {
                resource_id: 1,
                booking_id: 2,
            },
            EngineError::NotFound {
                entity: "resource",
                id: 1,
            },
            EngineError::Invalid("x"),
            EngineError::AlreadyExists {
                entity: "booking",
                id: 1,
            },
            EngineError::LimitExceeded("x"),
            EngineError::Wal("disk".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(engine_sqlstate).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert_eq!(engine_sqlstate(&errors[0]), "23514");
        assert_eq!(engine_sqlstate(&errors[1]), "23P01");
    }

    #[test]
    fn describe_schema_by_statement() {
        let text = Format::UnifiedText;
        assert_eq!(describe_schema("SELECT * FROM bookings WHERE id = $1", &text).len(), 6);
        assert_eq!(describe_schema(r#"SELECT * FROM "conflicts""#, &text).len(), 4);
        assert_eq!(describe_schema("select * from availability", &text).len(), 3);
        assert_eq!(
            describe_schema("INSERT INTO resources (name) VALUES ($1) RETURNING *", &text).len(),
            6
        );
        assert!(describe_schema("INSERT INTO resources (name) VALUES ($1)", &text).is_empty());
        assert!(describe_schema("DELETE FROM bookings WHERE id = $1", &text).is_empty());
    }
}
