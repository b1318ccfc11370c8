//! Retention rate and average check per paid cohort.
//!
//! Both tables key on the cohort as `YYYY-MM` text. Retention counts the
//! distinct cohort members active in each trailing month as a percentage of
//! the cohort; average check divides each month's revenue by its order
//! count. Offsets count back from the current month, so `average_check_
//! current_month` / `rr_month_1` are the running month.

use super::{SqlStage, excluded_set, trailing_month, wide_columns};
use crate::config::MartConfig;

pub(crate) fn rr_stage(mart: &MartConfig) -> SqlStage {
    let rr_cols = wide_columns("rr_month");

    let mut column_defs = String::new();
    for col in &rr_cols {
        column_defs.push_str(&format!("    {col} NUMERIC(5, 2),\n"));
    }
    let create = format!(
        "\
CREATE TABLE IF NOT EXISTS rr_cohorts (
    cohort TEXT,
    total_users BIGINT,
{column_defs}    PRIMARY KEY (cohort)
);"
    );

    let fmt = &mart.date_format;
    let paid = &mart.paid_status;

    let mut selects = Vec::new();
    for index in (1..=12).rev() {
        let window = trailing_month(index - 1);
        selects.push(format!(
            "    ROUND(COUNT(DISTINCT CASE WHEN a.active_month = {window} THEN a.user_id END) * 100.0 / NULLIF(u.total_users, 0), 2) AS rr_month_{index}"
        ));
    }
    let select_list = selects.join(",\n");

    let mut insert_cols = vec!["cohort".to_string(), "total_users".to_string()];
    insert_cols.extend(rr_cols);
    let updates = excluded_set(&insert_cols[1..]);
    let insert_cols = insert_cols.join(", ");

    let insert = format!(
        "\
INSERT INTO rr_cohorts ({insert_cols})
WITH cohort AS (
    SELECT
        customer_id AS user_id,
        DATE_TRUNC('month', MIN(TO_TIMESTAMP(first_action_at, '{fmt}'))) AS cohort_month
    FROM orders
    WHERE status = '{paid}'
    GROUP BY customer_id
),
active_users AS (
    SELECT
        customer_id AS user_id,
        DATE_TRUNC('month', TO_TIMESTAMP(first_action_at, '{fmt}')) AS active_month
    FROM orders
    WHERE status = '{paid}'
),
user_counts AS (
    SELECT cohort_month, COUNT(user_id) AS total_users
    FROM cohort
    GROUP BY cohort_month
)
SELECT
    TO_CHAR(c.cohort_month, 'YYYY-MM') AS cohort,
    u.total_users,
{select_list}
FROM cohort c
LEFT JOIN active_users a ON c.user_id = a.user_id
JOIN user_counts u ON c.cohort_month = u.cohort_month
GROUP BY c.cohort_month, u.total_users
ORDER BY c.cohort_month
ON CONFLICT (cohort) DO UPDATE SET
    {updates};"
    );

    SqlStage {
        name: "rr_cohorts",
        statements: vec![create, insert],
    }
}

/// Column name for average check at a given month offset.
pub(crate) fn ac_column(offset: u32) -> String {
    if offset == 0 {
        "average_check_current_month".to_string()
    } else {
        format!("average_check_month_{offset}")
    }
}

pub(crate) fn ac_stage(mart: &MartConfig) -> SqlStage {
    let ac_cols: Vec<String> = (0..12).map(ac_column).collect();

    let mut column_defs = String::new();
    for col in &ac_cols {
        column_defs.push_str(&format!("    {col} NUMERIC,\n"));
    }
    let create = format!(
        "\
CREATE TABLE IF NOT EXISTS ac_cohort (
    cohort VARCHAR(7),
    unique_users BIGINT,
{column_defs}    PRIMARY KEY (cohort)
);"
    );

    let fmt = &mart.date_format;
    let paid = &mart.paid_status;

    let mut selects = Vec::new();
    for offset in 0..12u32 {
        let window = trailing_month(offset);
        let col = ac_column(offset);
        let in_month =
            format!("DATE_TRUNC('month', TO_TIMESTAMP(o.first_action_at, '{fmt}')) = {window}");
        // total_price is double precision; two-argument ROUND needs numeric.
        selects.push(format!(
            "    ROUND((SUM(CASE WHEN {in_month} THEN o.total_price ELSE 0 END) / NULLIF(COUNT(CASE WHEN {in_month} THEN 1 END), 0))::numeric, 2) AS {col}"
        ));
    }
    let select_list = selects.join(",\n");

    let mut insert_cols = vec!["cohort".to_string(), "unique_users".to_string()];
    insert_cols.extend(ac_cols);
    let updates = excluded_set(&insert_cols[1..]);
    let insert_cols = insert_cols.join(", ");

    let insert = format!(
        "\
INSERT INTO ac_cohort ({insert_cols})
WITH cohort AS (
    SELECT
        customer_id AS user_id,
        DATE_TRUNC('month', MIN(TO_TIMESTAMP(first_action_at, '{fmt}'))) AS cohort_month
    FROM orders
    WHERE status = '{paid}'
    GROUP BY customer_id
)
SELECT
    TO_CHAR(cohort_month, 'YYYY-MM') AS cohort,
    COUNT(DISTINCT user_id) AS unique_users,
{select_list}
FROM orders o
JOIN cohort ON o.customer_id = cohort.user_id
WHERE o.status = '{paid}'
GROUP BY cohort_month
ORDER BY cohort_month ASC
ON CONFLICT (cohort) DO UPDATE SET
    {updates};"
    );

    SqlStage {
        name: "ac_cohort",
        statements: vec![create, insert],
    }
}
