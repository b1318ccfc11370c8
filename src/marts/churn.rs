//! Monthly churn and donor-dynamics metrics (cdr).
//!
//! Unlike the other stages this one round-trips through the client: the
//! aggregation is fetched, then each row is upserted with bound parameters.
//! Churn counts a customer as retained when they act again within three
//! months; the average-days metric looks at repeat payers inside one month
//! and averages the following three months.

use chrono::NaiveDate;
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use tracing::{error, warn};

use crate::config::MartConfig;
use crate::executor::{FetchOutcome, QueryExecutor};

const STAGE: &str = "cdr";

fn create_sql() -> &'static str {
    "\
CREATE TABLE IF NOT EXISTS cdr (
    month DATE PRIMARY KEY,
    churn_rate NUMERIC,
    new_donors_ratio NUMERIC,
    avg_days_between_donations NUMERIC
);"
}

fn metrics_sql(mart: &MartConfig) -> String {
    let fmt = &mart.date_format;
    let paid = &mart.paid_status;
    format!(
        "\
WITH donor_activity AS (
    SELECT
        customer_id AS donor_id,
        DATE_TRUNC('month', TO_TIMESTAMP(first_action_at, '{fmt}')) AS month
    FROM orders
    WHERE status = '{paid}'
    GROUP BY customer_id, month
),
donor_status AS (
    SELECT
        da1.month,
        COUNT(DISTINCT da1.donor_id) AS total_donors,
        COUNT(DISTINCT da2.donor_id) AS retained_donors
    FROM donor_activity da1
    LEFT JOIN donor_activity da2
        ON da1.donor_id = da2.donor_id
        AND da2.month > da1.month
        AND da2.month <= da1.month + INTERVAL '3 months'
    GROUP BY da1.month
),
churn_rate AS (
    SELECT
        month,
        CASE
            WHEN total_donors > 0 THEN
                ROUND((total_donors - retained_donors) * 100.0 / total_donors, 2)
            ELSE NULL
        END AS churn_rate
    FROM donor_status
),
first_donors AS (
    SELECT donor_id, MIN(month) AS first_month
    FROM donor_activity
    GROUP BY donor_id
),
monthly_new_donors AS (
    SELECT first_month AS month, COUNT(*) AS new_donors_count
    FROM first_donors
    GROUP BY first_month
),
total_donors AS (
    SELECT
        DATE_TRUNC('month', TO_TIMESTAMP(first_action_at, '{fmt}')) AS month,
        COUNT(DISTINCT customer_id) AS total_donors_count
    FROM orders
    WHERE status = '{paid}'
    GROUP BY month
),
new_donors_ratio AS (
    SELECT
        td.month,
        ROUND(COALESCE(mnd.new_donors_count, 0) * 100.0 / NULLIF(td.total_donors_count, 0), 2) AS new_donors_ratio
    FROM total_donors td
    LEFT JOIN monthly_new_donors mnd ON td.month = mnd.month
),
monthly_repeat_donors AS (
    SELECT
        DATE_TRUNC('month', TO_TIMESTAMP(first_action_at, '{fmt}')) AS month,
        customer_id,
        MIN(TO_TIMESTAMP(first_action_at, '{fmt}')) AS first_donation_at,
        MAX(TO_TIMESTAMP(first_action_at, '{fmt}')) AS last_donation_at
    FROM orders
    WHERE status = '{paid}'
    GROUP BY month, customer_id
    HAVING COUNT(*) > 1
),
avg_days_between_donations AS (
    SELECT
        month,
        ROUND(AVG(EXTRACT(EPOCH FROM (last_donation_at - first_donation_at)) / 86400), 2) AS avg_days
    FROM monthly_repeat_donors
    GROUP BY month
),
next_three_months AS (
    SELECT
        current_month.month,
        ROUND(AVG(next_months.avg_days), 2) AS avg_days
    FROM avg_days_between_donations current_month
    LEFT JOIN avg_days_between_donations next_months
        ON next_months.month > current_month.month
        AND next_months.month <= current_month.month + INTERVAL '3 months'
    GROUP BY current_month.month
)
SELECT
    cr.month::date AS month,
    cr.churn_rate::float8 AS churn_rate,
    COALESCE(ndr.new_donors_ratio, 0)::float8 AS new_donors_ratio,
    COALESCE(n3m.avg_days, 0)::float8 AS avg_days_between_donations
FROM churn_rate cr
LEFT JOIN new_donors_ratio ndr ON cr.month = ndr.month
LEFT JOIN next_three_months n3m ON cr.month = n3m.month
ORDER BY cr.month;"
    )
}

fn upsert_sql() -> &'static str {
    "\
INSERT INTO cdr (month, churn_rate, new_donors_ratio, avg_days_between_donations)
VALUES ($1, $2, $3, $4)
ON CONFLICT (month) DO UPDATE SET
    churn_rate = EXCLUDED.churn_rate,
    new_donors_ratio = EXCLUDED.new_donors_ratio,
    avg_days_between_donations = EXCLUDED.avg_days_between_donations;"
}

/// Fetch the metric rows and upsert them one by one. Returns the stage name
/// on failure so the pipeline can record it.
pub async fn run(executor: &QueryExecutor, mart: &MartConfig) -> Result<(), &'static str> {
    let backend = executor.db().get_database_backend();

    let create = Statement::from_string(backend, create_sql().to_string());
    if executor.exec(STAGE, create).await.is_failed() {
        return Err(STAGE);
    }

    let query = Statement::from_string(backend, metrics_sql(mart));
    let rows = match executor.fetch(STAGE, query).await {
        FetchOutcome::Rows(rows) => rows,
        FetchOutcome::Failed => return Err(STAGE),
    };

    for row in rows {
        let values = (
            row.try_get::<NaiveDate>("", "month"),
            row.try_get::<Option<f64>>("", "churn_rate"),
            row.try_get::<f64>("", "new_donors_ratio"),
            row.try_get::<f64>("", "avg_days_between_donations"),
        );
        let (month, churn_rate, new_donors_ratio, avg_days) = match values {
            (Ok(m), Ok(c), Ok(n), Ok(a)) => (m, c, n, a),
            _ => {
                error!(stage = STAGE, "metric row had an unexpected shape");
                return Err(STAGE);
            }
        };

        let upsert = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            upsert_sql(),
            [
                month.into(),
                churn_rate.into(),
                new_donors_ratio.into(),
                avg_days.into(),
            ],
        );
        if executor.exec(STAGE, upsert).await.is_failed() {
            warn!(stage = STAGE, %month, "row upsert failed, aborting stage");
            return Err(STAGE);
        }
    }
    Ok(())
}
