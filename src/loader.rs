//! Base-table loader.
//!
//! Appends order and event batches into the relational store. Natural-key
//! uniqueness is enforced by a unique index created after the load, so a
//! store seeded with duplicate rows by manual intervention fails index
//! creation instead of silently losing data. Inserts are plain appends;
//! change detection upstream is what prevents re-loading the same extract.

use metrics::counter;
use sea_orm::sea_query::{Alias, ColumnDef, Expr, ExprTrait, Iden, Index, Query, Table};
use sea_orm::{ConnectionTrait, DatabaseBackend, DeriveIden, Statement};
use tracing::{info, warn};

use crate::dataset::{Dataset, EventRecord, OrderRecord};
use crate::error::PipelineError;
use crate::executor::{FetchOutcome, QueryExecutor};

const INSERT_CHUNK_ROWS: usize = 500;

#[derive(DeriveIden, Clone, Copy)]
enum Orders {
    Table,
    OrderId,
    CustomerId,
    FirstActionAt,
    TotalPrice,
    Status,
}

#[derive(DeriveIden, Clone, Copy)]
enum Events {
    Table,
    ActionId,
    CustomerId,
    OccurredAt,
}

/// Counts reported back to the run summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub orders_loaded: usize,
    pub events_loaded: usize,
}

pub struct Loader<'a> {
    executor: &'a QueryExecutor,
}

impl<'a> Loader<'a> {
    pub fn new(executor: &'a QueryExecutor) -> Self {
        Self { executor }
    }

    /// Load both batches, scan for natural-key duplicates, then enforce the
    /// unique indexes. Every statement failure in this phase is fatal.
    pub async fn load(&self, dataset: &Dataset) -> Result<LoadStats, PipelineError> {
        self.ensure_tables().await?;

        let mut stats = LoadStats::default();
        match &dataset.orders {
            Some(orders) => {
                self.insert_orders(orders).await?;
                stats.orders_loaded = orders.len();
                counter!("rows_loaded_total", "table" => "orders").increment(orders.len() as u64);
                info!(rows = orders.len(), "orders batch loaded");
            }
            None => info!("no orders batch in this run"),
        }
        match &dataset.events {
            Some(events) => {
                self.insert_events(events).await?;
                stats.events_loaded = events.len();
                counter!("rows_loaded_total", "table" => "events").increment(events.len() as u64);
                info!(rows = events.len(), "events batch loaded");
            }
            None => info!("no events batch in this run"),
        }

        self.scan_duplicates("orders", Orders::Table, Orders::OrderId)
            .await?;
        self.scan_duplicates("events", Events::Table, Events::ActionId)
            .await?;
        self.create_indexes().await?;
        Ok(stats)
    }

    fn backend(&self) -> DatabaseBackend {
        self.executor.db().get_database_backend()
    }

    async fn ensure_tables(&self) -> Result<(), PipelineError> {
        let backend = self.backend();
        let orders = Table::create()
            .table(Orders::Table)
            .if_not_exists()
            .col(ColumnDef::new(Orders::OrderId).big_integer().not_null())
            .col(ColumnDef::new(Orders::CustomerId).big_integer().not_null())
            .col(ColumnDef::new(Orders::FirstActionAt).text().not_null())
            .col(ColumnDef::new(Orders::TotalPrice).double().not_null())
            .col(ColumnDef::new(Orders::Status).text().not_null())
            .to_owned();
        let events = Table::create()
            .table(Events::Table)
            .if_not_exists()
            .col(ColumnDef::new(Events::ActionId).big_integer().not_null())
            .col(ColumnDef::new(Events::CustomerId).big_integer().not_null())
            .col(ColumnDef::new(Events::OccurredAt).text().not_null())
            .to_owned();

        self.run_fatal("create_orders_table", backend.build(&orders))
            .await?;
        self.run_fatal("create_events_table", backend.build(&events))
            .await
    }

    async fn insert_orders(&self, orders: &[OrderRecord]) -> Result<(), PipelineError> {
        let backend = self.backend();
        for chunk in orders.chunks(INSERT_CHUNK_ROWS) {
            let mut insert = Query::insert()
                .into_table(Orders::Table)
                .columns([
                    Orders::OrderId,
                    Orders::CustomerId,
                    Orders::FirstActionAt,
                    Orders::TotalPrice,
                    Orders::Status,
                ])
                .to_owned();
            for row in chunk {
                insert
                    .values([
                        row.order_id.into(),
                        row.customer_id.into(),
                        row.first_action_at.clone().into(),
                        row.total_price.into(),
                        row.status.clone().into(),
                    ])
                    .map_err(|err| PipelineError::load("orders", err.to_string()))?;
            }
            self.run_fatal("insert_orders", backend.build(&insert))
                .await?;
        }
        Ok(())
    }

    async fn insert_events(&self, events: &[EventRecord]) -> Result<(), PipelineError> {
        let backend = self.backend();
        for chunk in events.chunks(INSERT_CHUNK_ROWS) {
            let mut insert = Query::insert()
                .into_table(Events::Table)
                .columns([Events::ActionId, Events::CustomerId, Events::OccurredAt])
                .to_owned();
            for row in chunk {
                insert
                    .values([
                        row.action_id.into(),
                        row.customer_id.into(),
                        row.occurred_at.clone().into(),
                    ])
                    .map_err(|err| PipelineError::load("events", err.to_string()))?;
            }
            self.run_fatal("insert_events", backend.build(&insert))
                .await?;
        }
        Ok(())
    }

    /// Duplicates are reported, never removed. A non-empty result here means
    /// someone appended rows outside the pipeline.
    async fn scan_duplicates<T, C>(&self, table: &str, iden: T, key: C) -> Result<(), PipelineError>
    where
        T: Iden + Copy + 'static,
        C: Iden + Copy + 'static,
    {
        let backend = self.backend();
        let select = Query::select()
            .column(key)
            .expr_as(Expr::col(key).count(), Alias::new("dupes"))
            .from(iden)
            .group_by_col(key)
            .and_having(Expr::col(key).count().gt(1))
            .to_owned();
        match self
            .executor
            .fetch("scan_duplicates", backend.build(&select))
            .await
        {
            FetchOutcome::Rows(rows) if rows.is_empty() => {
                info!(table, "no duplicate natural keys found");
                Ok(())
            }
            FetchOutcome::Rows(rows) => {
                warn!(
                    table,
                    keys = rows.len(),
                    "duplicate natural keys present, index creation may fail"
                );
                Ok(())
            }
            FetchOutcome::Failed => Err(PipelineError::load(
                table,
                "duplicate scan failed".to_string(),
            )),
        }
    }

    async fn create_indexes(&self) -> Result<(), PipelineError> {
        let backend = self.backend();
        let orders_index = Index::create()
            .if_not_exists()
            .name("idx_orders_order_id")
            .table(Orders::Table)
            .col(Orders::OrderId)
            .unique()
            .to_owned();
        let events_index = Index::create()
            .if_not_exists()
            .name("idx_events_action_id")
            .table(Events::Table)
            .col(Events::ActionId)
            .unique()
            .to_owned();

        self.run_fatal("create_orders_index", backend.build(&orders_index))
            .await?;
        self.run_fatal("create_events_index", backend.build(&events_index))
            .await?;
        info!("natural-key indexes in place");
        Ok(())
    }

    async fn run_fatal(&self, label: &'static str, statement: Statement) -> Result<(), PipelineError> {
        if self.executor.exec(label, statement).await.is_failed() {
            return Err(PipelineError::load(label, "statement failed after retries".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::executor::Sleeper;
    use async_trait::async_trait;
    use sea_orm::Database;
    use std::sync::Arc;
    use std::time::Duration;

    struct NoSleep;

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, _duration: Duration) {}
    }

    async fn sqlite_executor() -> QueryExecutor {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        QueryExecutor::with_sleeper(
            Arc::new(db),
            RetryConfig {
                retries: 1,
                delay_seconds: 0,
            },
            Arc::new(NoSleep),
        )
    }

    fn order(order_id: i64, customer_id: i64) -> OrderRecord {
        OrderRecord {
            order_id,
            customer_id,
            first_action_at: "01.02.2024 10:30".to_string(),
            total_price: 100.0,
            status: "Paid".to_string(),
        }
    }

    fn event(action_id: i64) -> EventRecord {
        EventRecord {
            action_id,
            customer_id: 1,
            occurred_at: "01.02.2024 09:00".to_string(),
        }
    }

    async fn count(executor: &QueryExecutor, table: &str) -> i64 {
        let backend = executor.db().get_database_backend();
        let stmt = Statement::from_string(backend, format!("SELECT COUNT(*) AS n FROM {table}"));
        match executor.fetch("count", stmt).await {
            FetchOutcome::Rows(rows) => rows[0].try_get("", "n").unwrap(),
            FetchOutcome::Failed => panic!("count query failed"),
        }
    }

    #[tokio::test]
    async fn loads_both_batches_and_reports_counts() {
        let executor = sqlite_executor().await;
        let dataset = Dataset {
            orders: Some(vec![order(1, 10), order(2, 11)]),
            events: Some(vec![event(100), event(101), event(102)]),
        };

        let stats = Loader::new(&executor).load(&dataset).await.unwrap();
        assert_eq!(
            stats,
            LoadStats {
                orders_loaded: 2,
                events_loaded: 3,
            }
        );
        assert_eq!(count(&executor, "orders").await, 2);
        assert_eq!(count(&executor, "events").await, 3);
    }

    #[tokio::test]
    async fn absent_batches_are_skipped() {
        let executor = sqlite_executor().await;
        let dataset = Dataset {
            orders: None,
            events: Some(vec![event(1)]),
        };

        let stats = Loader::new(&executor).load(&dataset).await.unwrap();
        assert_eq!(stats.orders_loaded, 0);
        assert_eq!(stats.events_loaded, 1);
        assert_eq!(count(&executor, "orders").await, 0);
    }

    #[tokio::test]
    async fn duplicate_batch_fails_index_creation() {
        let executor = sqlite_executor().await;
        let dataset = Dataset {
            orders: Some(vec![order(1, 10), order(1, 10)]),
            events: None,
        };

        // Plain inserts accept the duplicate; the unique index then refuses it.
        let err = Loader::new(&executor).load(&dataset).await.unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
    }

    #[tokio::test]
    async fn reload_of_distinct_keys_appends() {
        let executor = sqlite_executor().await;
        let loader = Loader::new(&executor);

        loader
            .load(&Dataset {
                orders: Some(vec![order(1, 10)]),
                events: None,
            })
            .await
            .unwrap();
        loader
            .load(&Dataset {
                orders: Some(vec![order(2, 10)]),
                events: None,
            })
            .await
            .unwrap();

        assert_eq!(count(&executor, "orders").await, 2);
    }
}
