//! Long-format projections of the wide cohort tables.
//!
//! Each projection unpivots the fixed month columns into one row per
//! (cohort_month, month) pair, which is what the charting layer consumes.
//! Projections upsert with `DO UPDATE`: their sources shift with the
//! trailing window, so re-projection must overwrite stale cells.

use super::{SqlStage, retention::ac_column};

struct Projection {
    name: &'static str,
    input: &'static str,
    output: &'static str,
    value_column: &'static str,
    /// SELECT expression producing the cohort month from the source key.
    cohort_expr: &'static str,
    /// (month value in the output row, source column name).
    arms: Vec<(u32, String)>,
}

fn month_arms(prefix: &str) -> Vec<(u32, String)> {
    (1..=12).map(|n| (n, format!("{prefix}_{n}"))).collect()
}

fn projections() -> Vec<Projection> {
    vec![
        Projection {
            name: "ltv_t",
            input: "ltv_cohorts",
            output: "ltv_t",
            value_column: "ltv",
            cohort_expr: "cohort_month",
            arms: month_arms("ltv_month"),
        },
        Projection {
            name: "revenue_t",
            input: "ltv_cohorts",
            output: "revenue_t",
            value_column: "revenue",
            cohort_expr: "cohort_month",
            arms: month_arms("revenue_month"),
        },
        Projection {
            name: "ltv_cum_t",
            input: "cumulative_ltv",
            output: "ltv_cum_t",
            value_column: "ltv_cumulative",
            cohort_expr: "cohort_month",
            arms: month_arms("ltv_cumulative"),
        },
        Projection {
            name: "arppu_t",
            input: "cohorts_revenue_arppu_data",
            output: "arppu_t",
            value_column: "arppu",
            cohort_expr: "cohort_month",
            arms: month_arms("arppu_month"),
        },
        Projection {
            name: "arppu_cum_t",
            input: "arppu_cumulative",
            output: "arppu_cum_t",
            value_column: "cumulative_arppu",
            cohort_expr: "cohort_month",
            arms: month_arms("cumulative_arppu"),
        },
        Projection {
            name: "rr_t",
            input: "rr_cohorts",
            output: "rr_t",
            value_column: "rr",
            cohort_expr: "TO_DATE(cohort, 'YYYY-MM')",
            arms: month_arms("rr_month"),
        },
        Projection {
            name: "ac_t",
            input: "ac_cohort",
            output: "ac_t",
            value_column: "average_check",
            cohort_expr: "TO_DATE(cohort, 'YYYY-MM')",
            arms: (0..12).map(|n| (n, ac_column(n))).collect(),
        },
    ]
}

fn build(projection: &Projection) -> SqlStage {
    let Projection {
        name,
        input,
        output,
        value_column,
        cohort_expr,
        arms,
    } = projection;
    let name = *name;

    let create = format!(
        "\
CREATE TABLE IF NOT EXISTS {output} (
    cohort_month DATE,
    month INT,
    {value_column} NUMERIC,
    PRIMARY KEY (cohort_month, month)
);"
    );

    let branches = arms
        .iter()
        .map(|(month, source_column)| {
            format!(
                "    SELECT {cohort_expr} AS cohort_month, {month} AS month, {source_column} AS {value_column}\n    FROM {input}"
            )
        })
        .collect::<Vec<_>>()
        .join("\n    UNION ALL\n");

    let insert = format!(
        "\
INSERT INTO {output} (cohort_month, month, {value_column})
WITH flattened AS (
{branches}
)
SELECT cohort_month, month, {value_column}
FROM flattened
ON CONFLICT (cohort_month, month) DO UPDATE SET
    {value_column} = EXCLUDED.{value_column};"
    );

    SqlStage {
        name,
        statements: vec![create, insert],
    }
}

pub(crate) fn stages() -> Vec<SqlStage> {
    projections().iter().map(build).collect()
}
