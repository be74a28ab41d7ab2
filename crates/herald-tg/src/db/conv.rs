//! Bridging glue between `sea-query` statements, `sqlx` execution and the
//! engine's domain types.

use crate::monitor::{StoreError, StoreResult};
use easy_ext::ext;
use num_enum::TryFromPrimitive;
use sea_query_binder::SqlxBinder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::IntoArguments;
use std::time::Duration;

pub(crate) type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, PgArguments>;
pub(crate) type PgQueryAs<'q, O> = sqlx::query::QueryAs<'q, sqlx::Postgres, O, PgArguments>;
pub(crate) type PgQueryScalar<'q, O> = sqlx::query::QueryScalar<'q, sqlx::Postgres, O, PgArguments>;

/// [`sqlx`] query types can only borrow the SQL string, so the built
/// statement has to stay alive in this wrapper for as long as the query is
/// in use.
pub(crate) struct SqlxQuery {
    sql: String,
    args: Option<PgArguments>,
}

#[ext(SqlxBinderExt)]
pub(crate) impl<T: SqlxBinder> T {
    fn into_sqlx(&self) -> SqlxQuery {
        let (sql, values) = self.build_sqlx(sea_query::PostgresQueryBuilder);
        SqlxQuery {
            sql,
            args: Some(values.into_arguments()),
        }
    }
}

impl SqlxQuery {
    pub(crate) fn query(&mut self) -> PgQuery<'_> {
        let args = self.unwrap_args();
        sqlx::query_with(&self.sql, args)
    }

    pub(crate) fn query_as<O>(&mut self) -> PgQueryAs<'_, O>
    where
        O: for<'r> sqlx::FromRow<'r, PgRow>,
    {
        let args = self.unwrap_args();
        sqlx::query_as_with(&self.sql, args)
    }

    pub(crate) fn query_scalar<O>(&mut self) -> PgQueryScalar<'_, O>
    where
        (O,): for<'r> sqlx::FromRow<'r, PgRow>,
    {
        let args = self.unwrap_args();
        sqlx::query_scalar_with(&self.sql, args)
    }

    fn unwrap_args(&mut self) -> PgArguments {
        self.args
            .take()
            .expect("BUG: it is allowed to build an sqlx query only once")
    }
}

/// Builds a `Vec<SimpleExpr>` from a list of values, converting each one.
macro_rules! expr_vec {
    ($($value:expr,)* $(,)?) => {
        vec![
            $(::sea_query::SimpleExpr::from($value),)*
        ]
    };
}

pub(crate) use expr_vec;

pub(crate) fn query_err(source: sqlx::Error) -> StoreError {
    StoreError::query(source)
}

pub(crate) fn to_json_text<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).expect("BUG: in-memory value must serialize to JSON")
}

pub(crate) fn from_json_text<T: DeserializeOwned>(text: &str, what: &str) -> StoreResult<T> {
    serde_json::from_str(text)
        .map_err(|err| StoreError::corrupt(format!("bad JSON in {what}: {err}")))
}

pub(crate) fn enum_from_i16<T>(value: i16) -> StoreResult<T>
where
    T: TryFromPrimitive<Primitive = i16>,
{
    T::try_from_primitive(value).map_err(|_| {
        StoreError::corrupt(format!(
            "invalid {} discriminant: {value}",
            std::any::type_name::<T>()
        ))
    })
}

pub(crate) fn required<T>(value: Option<T>, field: &str) -> StoreResult<T> {
    value.ok_or_else(|| StoreError::corrupt(format!("missing {field}")))
}

pub(crate) fn duration_from_secs(value: i64, field: &str) -> StoreResult<Duration> {
    u64::try_from(value)
        .map(Duration::from_secs)
        .map_err(|_| StoreError::corrupt(format!("negative duration in {field}: {value}")))
}

pub(crate) fn duration_from_secs_f64(value: f64, field: &str) -> StoreResult<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|err| StoreError::corrupt(format!("bad duration in {field}: {err}")))
}
