//! Cohort membership tables.
//!
//! A customer's cohort is the month of their first observed action
//! (`cohorts_all`, from events) or first qualifying order (`cohorts_paid`).
//! Membership never mutates, so both tables insert with `DO NOTHING`.

use super::SqlStage;
use crate::config::MartConfig;

fn membership_create(table: &str) -> String {
    format!(
        "\
CREATE TABLE IF NOT EXISTS {table} (
    user_id BIGINT,
    cohort_month DATE,
    PRIMARY KEY (user_id, cohort_month)
);"
    )
}

pub(crate) fn all_stage(mart: &MartConfig) -> SqlStage {
    let fmt = &mart.date_format;
    let insert = format!(
        "\
INSERT INTO cohorts_all (user_id, cohort_month)
WITH cohort AS (
    SELECT
        customer_id AS user_id,
        DATE_TRUNC('month', MIN(TO_TIMESTAMP(occurred_at, '{fmt}'))) AS cohort_month
    FROM events
    GROUP BY customer_id
)
SELECT user_id, cohort_month
FROM cohort
ON CONFLICT (user_id, cohort_month) DO NOTHING;"
    );

    SqlStage {
        name: "cohorts_all",
        statements: vec![membership_create("cohorts_all"), insert],
    }
}

pub(crate) fn paid_stage(mart: &MartConfig) -> SqlStage {
    let fmt = &mart.date_format;
    let paid = &mart.paid_status;
    let insert = format!(
        "\
INSERT INTO cohorts_paid (user_id, cohort_month)
WITH cohort AS (
    SELECT
        customer_id AS user_id,
        DATE_TRUNC('month', MIN(TO_TIMESTAMP(first_action_at, '{fmt}'))) AS cohort_month
    FROM orders
    WHERE status = '{paid}'
    GROUP BY customer_id
)
SELECT user_id, cohort_month
FROM cohort
ON CONFLICT (user_id, cohort_month) DO NOTHING;"
    );

    SqlStage {
        name: "cohorts_paid",
        statements: vec![membership_create("cohorts_paid"), insert],
    }
}
