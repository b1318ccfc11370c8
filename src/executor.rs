//! Query executor with bounded retry.
//!
//! Runs one statement per call inside its own transaction. Exhausted retries
//! degrade to a logged sentinel instead of a propagated error, so a single
//! failing derivation never stops the run. Callers must submit idempotent
//! statements: a retry may follow a partial commit.

use async_trait::async_trait;
use metrics::counter;
use sea_orm::{ConnectionTrait, DatabaseConnection, QueryResult, Statement, TransactionTrait};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::RetryConfig;

/// Injected sleep so tests can observe retry delays without waiting them out.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Result of a non-fetching statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Done { rows_affected: u64 },
    /// All attempts failed; the error has been logged.
    Failed,
}

impl ExecOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ExecOutcome::Failed)
    }
}

/// Result of a fetching statement.
#[derive(Debug)]
pub enum FetchOutcome {
    Rows(Vec<QueryResult>),
    Failed,
}

impl FetchOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, FetchOutcome::Failed)
    }
}

pub struct QueryExecutor {
    db: Arc<DatabaseConnection>,
    retry: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl QueryExecutor {
    pub fn new(db: Arc<DatabaseConnection>, retry: RetryConfig) -> Self {
        Self::with_sleeper(db, retry, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(
        db: Arc<DatabaseConnection>,
        retry: RetryConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self { db, retry, sleeper }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Execute `statement` in its own transaction, retrying up to the
    /// configured attempt count with a fixed delay between attempts.
    pub async fn exec(&self, label: &str, statement: Statement) -> ExecOutcome {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.exec_once(&statement).await {
                Ok(rows_affected) => {
                    debug!(label, rows_affected, "statement executed");
                    counter!("statements_executed_total").increment(1);
                    return ExecOutcome::Done { rows_affected };
                }
                Err(err) => {
                    if attempt < self.retry.retries {
                        warn!(
                            label,
                            attempt,
                            retries = self.retry.retries,
                            error = %err,
                            "statement failed, retrying after delay"
                        );
                        self.sleeper.sleep(self.retry.delay()).await;
                    } else {
                        error!(
                            label,
                            attempts = attempt,
                            error = %err,
                            "statement failed, attempts exhausted"
                        );
                        counter!("statements_failed_total").increment(1);
                        return ExecOutcome::Failed;
                    }
                }
            }
        }
    }

    /// Like [`exec`](Self::exec) but materializes the result rows.
    pub async fn fetch(&self, label: &str, statement: Statement) -> FetchOutcome {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.fetch_once(&statement).await {
                Ok(rows) => {
                    debug!(label, rows = rows.len(), "query fetched");
                    counter!("statements_executed_total").increment(1);
                    return FetchOutcome::Rows(rows);
                }
                Err(err) => {
                    if attempt < self.retry.retries {
                        warn!(
                            label,
                            attempt,
                            retries = self.retry.retries,
                            error = %err,
                            "query failed, retrying after delay"
                        );
                        self.sleeper.sleep(self.retry.delay()).await;
                    } else {
                        error!(
                            label,
                            attempts = attempt,
                            error = %err,
                            "query failed, attempts exhausted"
                        );
                        counter!("statements_failed_total").increment(1);
                        return FetchOutcome::Failed;
                    }
                }
            }
        }
    }

    async fn exec_once(&self, statement: &Statement) -> Result<u64, sea_orm::DbErr> {
        let txn = self.db.begin().await?;
        let result = txn.execute(statement.clone()).await?;
        txn.commit().await?;
        Ok(result.rows_affected())
    }

    async fn fetch_once(&self, statement: &Statement) -> Result<Vec<QueryResult>, sea_orm::DbErr> {
        let txn = self.db.begin().await?;
        let rows = txn.query_all(statement.clone()).await?;
        txn.commit().await?;
        Ok(rows)
    }
}
