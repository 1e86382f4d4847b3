//! The [`Transaction`] type.
use std::ops::{Deref, DerefMut};

use crate::{Connection, Result, connection::AsyncStatus};

/// An RAII implementation of transaction scope.
///
/// To begin a transaction, use [`Connection::transaction`].
///
/// To commit transaction, use [`Transaction::commit`].
///
/// If not commited, when this structure is dropped, transaction will be rolled back.
///
/// # Example
///
/// ```no_run
/// # async fn test(mut conn: pqwire::Connection) -> pqwire::Result<()> {
/// let mut tx = conn.transaction().await?;
///
/// tx.exec("insert into post(name) values('foo')").await?;
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction<'c> {
    conn: &'c mut Connection,
    done: bool,
}

impl Connection {
    /// Begin a transaction block.
    pub async fn transaction(&mut self) -> Result<Transaction<'_>> {
        self.exec("BEGIN").await?;
        Ok(Transaction { conn: self, done: false })
    }
}

impl Transaction<'_> {
    /// Commit transaction.
    pub async fn commit(mut self) -> Result<()> {
        self.done = true;
        self.conn.exec("COMMIT").await?;
        Ok(())
    }

    /// Rollback transaction.
    pub async fn rollback(mut self) -> Result<()> {
        self.done = true;
        self.conn.exec("ROLLBACK").await?;
        Ok(())
    }
}

impl Deref for Transaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        let conn = &mut *self.conn;
        if !conn.status.is_ok() || conn.async_status.is_copy() {
            return;
        }

        match conn.async_status {
            AsyncStatus::Idle => {
                conn.send_rollback();
                if let Err(err) = conn.try_flush() {
                    conn.pending_error = Some(err);
                }
            },
            _ => conn.rollback_pending = true,
        }
    }
}
