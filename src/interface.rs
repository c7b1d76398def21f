//! Asynchronous facade over the synchronous core.
//!
//! Every core operation is blocking, so calls are moved onto tokio's
//! blocking pool. A deadline only abandons the wait: the closure already
//! handed to the pool runs to completion and commits or rolls back on its own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::database::Database;
use crate::error::{CrmockError, Result};

#[derive(Clone)]
pub struct Interface {
    database: Arc<Database>,
}

impl Interface {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Runs `f` against the database on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let database = Arc::clone(&self.database);
        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || f(&database))
            .await
            .map_err(|e| {
                warn!(error = %e, "join error");
                CrmockError::Execution(format!("blocking task failed: {e}"))
            })?;
        debug!(ms = started.elapsed().as_secs_f64() * 1000.0, ok = result.is_ok(), "call complete");
        result
    }

    /// Like [`Interface::call`], but gives up waiting once `deadline` elapses.
    pub async fn call_with_deadline<T, F>(&self, deadline: Duration, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        match tokio::time::timeout(deadline, self.call(f)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(ms = deadline.as_millis() as u64, "deadline elapsed");
                Err(CrmockError::Execution(format!(
                    "call did not finish within {} ms",
                    deadline.as_millis()
                )))
            }
        }
    }
}
