//! Scoped transactions with automatic rollback.

use crate::connection::Connection;
use crate::error::{DbResult, Error};

/// A scoped transaction over a borrowed connection.
///
/// Construction goes through [`TransactionGuard::begin`], which issues BEGIN;
/// if that fails no guard exists and the error is returned. Dropping an
/// active guard rolls the transaction back, so every exit path cleans up
/// unless [`commit`](TransactionGuard::commit) ran first. At most one guard
/// may exist per connection at a time; the exclusive borrow enforces that.
#[derive(Debug)]
pub struct TransactionGuard<'c> {
    conn: &'c mut dyn Connection,
    active: bool,
}

impl<'c> TransactionGuard<'c> {
    /// Issue BEGIN on the connection and wrap it in a guard.
    pub fn begin(conn: &'c mut dyn Connection) -> DbResult<Self> {
        conn.begin()?;
        Ok(Self { conn, active: true })
    }

    /// Access the underlying connection to run statements in the scope.
    pub fn connection(&mut self) -> &mut dyn Connection {
        self.conn
    }

    /// Whether the guard still owns an open transaction.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Commit the transaction. Fails on an inactive guard.
    pub fn commit(&mut self) -> DbResult<()> {
        if !self.active {
            return Err(Error::transaction("Transaction is not active"));
        }
        self.conn.commit()?;
        self.active = false;
        Ok(())
    }

    /// Roll the transaction back. Fails on an inactive guard.
    pub fn rollback(&mut self) -> DbResult<()> {
        if !self.active {
            return Err(Error::transaction("Transaction is not active"));
        }
        self.conn.rollback()?;
        self.active = false;
        Ok(())
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            // Nothing left to signal during unwinding; the result is dropped.
            let _ = self.conn.rollback();
        }
    }
}
