//! Submit and wait, returning a single result.
use super::Param;
use crate::{
    Connection, Error, Result,
    error::ErrorKind,
    escape::escape_literal,
    postgres::{Oid, PgFormat},
    result::{ExecStatus, PgResult},
};

impl Connection {
    /// Execute a simple query, which may contain multiple statements.
    ///
    /// Returns the result of the last statement, or the first error.
    pub async fn exec(&mut self, sql: &str) -> Result<PgResult> {
        self.exec_start().await?;
        self.send_query(sql)?;
        self.exec_finish().await
    }

    /// Execute a single statement with parameters.
    pub async fn exec_params(&mut self, sql: &str, params: &[Param], result_format: PgFormat) -> Result<PgResult> {
        self.exec_start().await?;
        self.send_query_params(sql, params, result_format)?;
        self.exec_finish().await
    }

    /// Create a named prepared statement.
    pub async fn prepare(&mut self, name: &str, sql: &str, param_types: &[Oid]) -> Result<PgResult> {
        self.exec_start().await?;
        self.send_prepare(name, sql, param_types)?;
        self.exec_finish().await
    }

    /// Execute a prepared statement.
    pub async fn exec_prepared(&mut self, name: &str, params: &[Param], result_format: PgFormat) -> Result<PgResult> {
        self.exec_start().await?;
        self.send_query_prepared(name, params, result_format)?;
        self.exec_finish().await
    }

    /// Describe a prepared statement.
    ///
    /// The result carries parameter types and result columns, but no rows.
    pub async fn describe_prepared(&mut self, name: &str) -> Result<PgResult> {
        self.exec_start().await?;
        self.send_describe_prepared(name)?;
        self.exec_finish().await
    }

    /// Describe a portal, the result carries result columns.
    pub async fn describe_portal(&mut self, name: &str) -> Result<PgResult> {
        self.exec_start().await?;
        self.send_describe_portal(name)?;
        self.exec_finish().await
    }

    pub async fn close_prepared(&mut self, name: &str) -> Result<PgResult> {
        self.exec_start().await?;
        self.send_close_prepared(name)?;
        self.exec_finish().await
    }

    pub async fn close_portal(&mut self, name: &str) -> Result<PgResult> {
        self.exec_start().await?;
        self.send_close_portal(name)?;
        self.exec_finish().await
    }

    /// Change the client encoding with `SET client_encoding`.
    ///
    /// The server reports the new value, see [`client_encoding`][Connection::client_encoding].
    pub async fn set_client_encoding(&mut self, encoding: &str) -> Result<()> {
        let sql = format!("SET client_encoding TO {}", escape_literal(encoding));
        self.exec(&sql).await?;
        Ok(())
    }

    /// Drain every remaining result of the command in flight, returning the last.
    ///
    /// Error result is returned as [`Err`].
    pub async fn get_last_result(&mut self) -> Result<Option<PgResult>> {
        let mut last = None;
        while let Some(result) = self.get_result().await? {
            let copy = is_copy(&result);
            last = Some(result);
            if copy {
                break;
            }
        }
        last.map(PgResult::check).transpose()
    }

    /// Discard leftover results of previous command.
    async fn exec_start(&mut self) -> Result<()> {
        while let Some(result) = self.get_result().await? {
            if is_copy(&result) {
                return Err(ErrorKind::CopyInProgress.into());
            }
        }
        if self.async_status.is_copy() {
            return Err(ErrorKind::CopyInProgress.into());
        }
        Ok(())
    }

    async fn exec_finish(&mut self) -> Result<PgResult> {
        let mut last: Option<PgResult> = None;
        while let Some(result) = self.get_result().await? {
            let copy = is_copy(&result);
            match &last {
                // first error wins
                Some(prev) if !prev.is_success() => {},
                _ => last = Some(result),
            }
            if copy {
                break;
            }
        }
        match last {
            Some(result) => result.check(),
            None => Err(Error::from(ErrorKind::ConnectionBad)),
        }
    }
}

fn is_copy(result: &PgResult) -> bool {
    matches!(result.status(), ExecStatus::CopyIn | ExecStatus::CopyOut | ExecStatus::CopyBoth)
}
