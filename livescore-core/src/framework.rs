use sqlx::PgPool;

/// Runs entity queries against the connection pool.
///
/// Each query is a plain struct with a `kanau::processor::Processor` impl on
/// this type.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}
