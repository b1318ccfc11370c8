//! Cohort lifetime value.
//!
//! `ltv_cohorts` divides each trailing-month revenue cell by the full cohort
//! size from `cohorts_all` (everyone who ever acted, not only payers), which
//! is what distinguishes LTV from ARPPU here. `cumulative_ltv` sums the tail
//! of the window per cohort.

use super::{SqlStage, excluded_set, wide_columns};

pub(crate) fn cohorts_stage() -> SqlStage {
    let revenue_cols = wide_columns("revenue_month");
    let ltv_cols = wide_columns("ltv_month");

    let mut column_defs = String::new();
    for col in revenue_cols.iter().chain(ltv_cols.iter()) {
        column_defs.push_str(&format!("    {col} NUMERIC(10, 2),\n"));
    }
    let create = format!(
        "\
CREATE TABLE IF NOT EXISTS ltv_cohorts (
    cohort_month DATE,
    total_users INTEGER,
{column_defs}    PRIMARY KEY (cohort_month)
);"
    );

    let mut selects = Vec::new();
    for index in (1..=12).rev() {
        selects.push(format!(
            "    COALESCE(b.revenue_month_{index}, 0) AS revenue_month_{index}"
        ));
    }
    for index in (1..=12).rev() {
        selects.push(format!(
            "    ROUND(COALESCE(b.revenue_month_{index}, 0) / NULLIF(COUNT(a.user_id), 0), 2) AS ltv_month_{index}"
        ));
    }
    let select_list = selects.join(",\n");

    let group_by = (1..=12)
        .rev()
        .map(|n| format!("    b.revenue_month_{n}"))
        .collect::<Vec<_>>()
        .join(",\n");

    let mut insert_cols = vec!["cohort_month".to_string(), "total_users".to_string()];
    insert_cols.extend(revenue_cols);
    insert_cols.extend(ltv_cols);
    let updates = excluded_set(&insert_cols[1..]);
    let insert_cols = insert_cols.join(", ");

    let insert = format!(
        "\
INSERT INTO ltv_cohorts ({insert_cols})
SELECT
    a.cohort_month,
    COUNT(a.user_id) AS total_users,
{select_list}
FROM cohorts_all a
LEFT JOIN cohorts_revenue_arppu_data b ON a.cohort_month = b.cohort_month
GROUP BY
    a.cohort_month,
{group_by}
ORDER BY a.cohort_month
ON CONFLICT (cohort_month) DO UPDATE SET
    {updates};"
    );

    SqlStage {
        name: "ltv_cohorts",
        statements: vec![create, insert],
    }
}

pub(crate) fn cumulative_stage() -> SqlStage {
    let cum_cols = wide_columns("ltv_cumulative");

    let mut column_defs = String::new();
    for col in &cum_cols {
        column_defs.push_str(&format!("    {col} NUMERIC(10, 2),\n"));
    }
    let create = format!(
        "\
CREATE TABLE IF NOT EXISTS cumulative_ltv (
    cohort_month DATE,
    total_users BIGINT,
{column_defs}    PRIMARY KEY (cohort_month)
);"
    );

    let mut selects = Vec::new();
    for index in (1..=12).rev() {
        let terms = (index..=12)
            .rev()
            .map(|n| format!("ltv_month_{n}"))
            .collect::<Vec<_>>()
            .join(" + ");
        selects.push(format!("    ({terms}) AS ltv_cumulative_{index}"));
    }
    let select_list = selects.join(",\n");

    let mut insert_cols = vec!["cohort_month".to_string(), "total_users".to_string()];
    insert_cols.extend(cum_cols);
    let updates = excluded_set(&insert_cols[1..]);
    let insert_cols = insert_cols.join(", ");

    let insert = format!(
        "\
INSERT INTO cumulative_ltv ({insert_cols})
SELECT
    cohort_month,
    total_users,
{select_list}
FROM ltv_cohorts
ORDER BY cohort_month
ON CONFLICT (cohort_month) DO UPDATE SET
    {updates};"
    );

    SqlStage {
        name: "cumulative_ltv",
        statements: vec![create, insert],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ltv_divides_by_full_cohort_size() {
        let stage = cohorts_stage();
        let insert = &stage.statements[1];
        assert!(insert.contains("FROM cohorts_all a"));
        assert!(insert.contains("NULLIF(COUNT(a.user_id), 0)"));
    }

    #[test]
    fn missing_revenue_reads_as_zero() {
        let stage = cohorts_stage();
        assert!(stage.statements[1].contains("COALESCE(b.revenue_month_12, 0)"));
    }

    #[test]
    fn both_tables_upsert() {
        for stage in [cohorts_stage(), cumulative_stage()] {
            assert!(
                stage.statements[1].contains("ON CONFLICT (cohort_month) DO UPDATE SET"),
                "{} must upsert",
                stage.name
            );
        }
    }

    #[test]
    fn cumulative_12_is_just_the_oldest_month() {
        let stage = cumulative_stage();
        assert!(stage.statements[1].contains("(ltv_month_12) AS ltv_cumulative_12"));
        assert!(
            stage.statements[1].contains(
                "(ltv_month_12 + ltv_month_11 + ltv_month_10 + ltv_month_9 + ltv_month_8 + ltv_month_7 + ltv_month_6 + ltv_month_5 + ltv_month_4 + ltv_month_3 + ltv_month_2 + ltv_month_1) AS ltv_cumulative_1"
            )
        );
    }
}
