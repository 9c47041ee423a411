//! Transaction Management
//!
//! A thin wrapper over SQLite transaction control with explicit
//! commit/rollback and rollback-on-drop. All writes issued since `begin` are
//! rolled back together when the transaction fails or is dropped without a
//! commit.

use tracing::{debug, warn};

use crate::connection::SqliteConnection;
use crate::error::{ModelError, ModelResult};

/// State of an open transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// An open transaction bound to a connection
///
/// Dropping an active transaction rolls it back.
#[derive(Debug)]
pub struct Transaction<'conn> {
    conn: &'conn SqliteConnection,
    state: TransactionState,
}

impl<'conn> Transaction<'conn> {
    /// Begin a new transaction on the connection
    pub fn begin(conn: &'conn SqliteConnection) -> ModelResult<Self> {
        conn.execute_batch("BEGIN")
            .map_err(|e| ModelError::Transaction(format!("BEGIN failed: {}", e)))?;
        debug!("transaction started");
        Ok(Self {
            conn,
            state: TransactionState::Active,
        })
    }

    /// Commit all writes since `begin`
    pub fn commit(mut self) -> ModelResult<()> {
        self.ensure_active("commit")?;
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| ModelError::Transaction(format!("COMMIT failed: {}", e)))?;
        self.state = TransactionState::Committed;
        debug!("transaction committed");
        Ok(())
    }

    /// Roll back all writes since `begin`
    pub fn rollback(mut self) -> ModelResult<()> {
        self.ensure_active("rollback")?;
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| ModelError::Transaction(format!("ROLLBACK failed: {}", e)))?;
        self.state = TransactionState::RolledBack;
        debug!("transaction rolled back");
        Ok(())
    }

    /// The connection this transaction runs on
    pub fn connection(&self) -> &SqliteConnection {
        self.conn
    }

    fn ensure_active(&self, action: &str) -> ModelResult<()> {
        if self.state != TransactionState::Active {
            return Err(ModelError::Transaction(format!(
                "cannot {} a finished transaction",
                action
            )));
        }
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "implicit rollback failed");
            } else {
                debug!("transaction rolled back on drop");
            }
        }
    }
}

impl SqliteConnection {
    /// Begin a transaction on this connection
    pub fn transaction(&self) -> ModelResult<Transaction<'_>> {
        Transaction::begin(self)
    }
}
