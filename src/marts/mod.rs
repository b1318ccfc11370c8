//! Derived analytic tables.
//!
//! Each module is a pure statement builder: `(date format, paid status) ->
//! SQL`. Statements run through the retrying executor in a fixed dependency
//! order; a stage whose statements exhaust their retries is recorded as
//! failed and the run moves on, since every stage is idempotent and the next
//! run re-derives it.
//!
//! Conflict discipline: mutable aggregates upsert with `DO UPDATE`, the
//! append-only cohort membership and paid-order fact tables use
//! `DO NOTHING`.

pub mod churn;
pub mod cohorts;
pub mod facts;
pub mod long;
pub mod ltv;
pub mod retention;
pub mod revenue;
pub mod rfm;

use sea_orm::{ConnectionTrait, Statement};
use tracing::{error, info};

use crate::config::MartConfig;
use crate::executor::QueryExecutor;

/// One derivation step: a create-if-absent statement followed by the insert.
pub(crate) struct SqlStage {
    pub name: &'static str,
    pub statements: Vec<String>,
}

/// Run every derivation in dependency order. Returns the names of stages
/// that failed; an empty vector is a fully derived store.
pub async fn run_all(executor: &QueryExecutor, mart: &MartConfig) -> Vec<&'static str> {
    let mut failed = Vec::new();

    let upstream = [
        rfm::stage(mart),
        cohorts::all_stage(mart),
        cohorts::paid_stage(mart),
        revenue::arppu_stage(mart),
        revenue::arppu_cumulative_stage(),
        ltv::cohorts_stage(),
        ltv::cumulative_stage(),
        retention::rr_stage(mart),
        retention::ac_stage(mart),
        facts::paid_only_stage(mart),
    ];
    for stage in upstream {
        run_stage(executor, stage, &mut failed).await;
    }

    if let Err(stage_name) = churn::run(executor, mart).await {
        failed.push(stage_name);
    }

    for stage in long::stages() {
        run_stage(executor, stage, &mut failed).await;
    }

    if failed.is_empty() {
        info!("all derivations completed");
    } else {
        error!(stages = ?failed, "derivation stages failed, run continues");
    }
    failed
}

async fn run_stage(
    executor: &QueryExecutor,
    stage: SqlStage,
    failed: &mut Vec<&'static str>,
) {
    let backend = executor.db().get_database_backend();
    for sql in &stage.statements {
        let statement = Statement::from_string(backend, sql.clone());
        if executor.exec(stage.name, statement).await.is_failed() {
            failed.push(stage.name);
            return;
        }
    }
    info!(stage = stage.name, "derivation stage completed");
}

/// `DATE_TRUNC('month', CURRENT_DATE) - INTERVAL 'n months'`. The trailing
/// window is anchored to the run date on purpose.
pub(crate) fn trailing_month(offset: u32) -> String {
    format!("DATE_TRUNC('month', CURRENT_DATE) - INTERVAL '{offset} months'")
}

/// `a = EXCLUDED.a, b = EXCLUDED.b, ...` for an upsert's SET list.
pub(crate) fn excluded_set(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Wide 12-column names like `revenue_month_12, ..., revenue_month_1`.
pub(crate) fn wide_columns(prefix: &str) -> Vec<String> {
    (1..=12).rev().map(|n| format!("{prefix}_{n}")).collect()
}
