//! Cohort revenue and ARPPU over the trailing 12-month window.
//!
//! Wide layout: one row per paid cohort, one column per trailing month.
//! Column `*_month_12` is the oldest month in the window (11 months ago),
//! `*_month_1` the current month. The window moves with `CURRENT_DATE`, so
//! both tables upsert with `DO UPDATE` to overwrite shifted cells.

use super::{SqlStage, excluded_set, trailing_month, wide_columns};
use crate::config::MartConfig;

/// Wide column index (12..=1) → month offset from the current month.
fn offset_for(index: u32) -> u32 {
    index - 1
}

pub(crate) fn arppu_stage(mart: &MartConfig) -> SqlStage {
    let revenue_cols = wide_columns("revenue_month");
    let arppu_cols = wide_columns("arppu_month");

    let mut column_defs = String::new();
    for col in revenue_cols.iter().chain(arppu_cols.iter()) {
        column_defs.push_str(&format!("    {col} NUMERIC,\n"));
    }
    let create = format!(
        "\
CREATE TABLE IF NOT EXISTS cohorts_revenue_arppu_data (
    cohort_month DATE,
    total_users BIGINT,
{column_defs}    PRIMARY KEY (cohort_month)
);"
    );

    let fmt = &mart.date_format;
    let paid = &mart.paid_status;

    let mut selects = Vec::new();
    for index in (1..=12).rev() {
        let window = trailing_month(offset_for(index));
        selects.push(format!(
            "    SUM(CASE WHEN m.month = {window} THEN m.total_revenue ELSE 0 END) AS revenue_month_{index}"
        ));
    }
    for index in (1..=12).rev() {
        let window = trailing_month(offset_for(index));
        selects.push(format!(
            "    SUM(CASE WHEN m.month = {window} THEN m.total_revenue ELSE 0 END) / COALESCE(NULLIF(u.total_users, 0), 1) AS arppu_month_{index}"
        ));
    }
    let select_list = selects.join(",\n");

    let mut insert_cols = vec!["cohort_month".to_string(), "total_users".to_string()];
    insert_cols.extend(revenue_cols);
    insert_cols.extend(arppu_cols);
    let updates = excluded_set(&insert_cols[1..]);
    let insert_cols = insert_cols.join(", ");

    let insert = format!(
        "\
INSERT INTO cohorts_revenue_arppu_data ({insert_cols})
WITH cohort AS (
    SELECT
        customer_id AS user_id,
        DATE_TRUNC('month', MIN(TO_TIMESTAMP(first_action_at, '{fmt}'))) AS cohort_month
    FROM orders
    WHERE status = '{paid}'
    GROUP BY customer_id
),
user_counts AS (
    SELECT cohort_month, COUNT(user_id) AS total_users
    FROM cohort
    GROUP BY cohort_month
),
monthly_revenue AS (
    SELECT
        c.cohort_month,
        DATE_TRUNC('month', TO_TIMESTAMP(o.first_action_at, '{fmt}')) AS month,
        SUM(o.total_price) AS total_revenue
    FROM cohort c
    JOIN orders o ON c.user_id = o.customer_id
    WHERE o.status = '{paid}'
    GROUP BY c.cohort_month, month
)
SELECT
    u.cohort_month,
    u.total_users,
{select_list}
FROM user_counts u
LEFT JOIN monthly_revenue m ON u.cohort_month = m.cohort_month
GROUP BY u.cohort_month, u.total_users
ORDER BY u.cohort_month
ON CONFLICT (cohort_month) DO UPDATE SET
    {updates};"
    );

    SqlStage {
        name: "cohorts_revenue_arppu_data",
        statements: vec![create, insert],
    }
}

pub(crate) fn arppu_cumulative_stage() -> SqlStage {
    let cum_cols = wide_columns("cumulative_arppu");

    let mut column_defs = String::new();
    for col in &cum_cols {
        column_defs.push_str(&format!("    {col} NUMERIC,\n"));
    }
    let create = format!(
        "\
CREATE TABLE IF NOT EXISTS arppu_cumulative (
    cohort_month DATE,
    total_users BIGINT,
{column_defs}    PRIMARY KEY (cohort_month)
);"
    );

    // cumulative_arppu_n sums the tail of the window: months n..=12.
    let mut selects = Vec::new();
    for index in (1..=12).rev() {
        let terms = (index..=12)
            .rev()
            .map(|n| format!("arppu_month_{n}"))
            .collect::<Vec<_>>()
            .join(" + ");
        selects.push(format!("    ROUND({terms}, 2) AS cumulative_arppu_{index}"));
    }
    let select_list = selects.join(",\n");

    let mut insert_cols = vec!["cohort_month".to_string(), "total_users".to_string()];
    insert_cols.extend(cum_cols);
    let updates = excluded_set(&insert_cols[1..]);
    let insert_cols = insert_cols.join(", ");

    let insert = format!(
        "\
INSERT INTO arppu_cumulative ({insert_cols})
SELECT
    cohort_month,
    total_users,
{select_list}
FROM cohorts_revenue_arppu_data
ON CONFLICT (cohort_month) DO UPDATE SET
    {updates};"
    );

    SqlStage {
        name: "arppu_cumulative",
        statements: vec![create, insert],
    }
}
