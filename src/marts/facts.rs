//! Paid-order fact table.
//!
//! One row per qualifying order with a parsed timestamp, keyed by order id.
//! Orders never change once paid, so the insert is append-only.

use super::SqlStage;
use crate::config::MartConfig;

pub(crate) fn paid_only_stage(mart: &MartConfig) -> SqlStage {
    let create = "\
CREATE TABLE IF NOT EXISTS paid_only (
    user_id BIGINT,
    order_id BIGINT,
    order_date TIMESTAMP,
    order_price NUMERIC,
    PRIMARY KEY (order_id)
);"
    .to_string();

    let fmt = &mart.date_format;
    let paid = &mart.paid_status;
    let insert = format!(
        "\
INSERT INTO paid_only (user_id, order_id, order_date, order_price)
SELECT
    customer_id AS user_id,
    order_id,
    TO_TIMESTAMP(first_action_at, '{fmt}') AS order_date,
    total_price AS order_price
FROM orders
WHERE status = '{paid}'
ON CONFLICT (order_id) DO NOTHING;"
    );

    SqlStage {
        name: "paid_only",
        statements: vec![create, insert],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fact_rows_are_append_only() {
        let stage = paid_only_stage(&MartConfig::default());
        let insert = &stage.statements[1];
        assert!(insert.contains("ON CONFLICT (order_id) DO NOTHING"));
        assert!(!insert.contains("DO UPDATE"));
    }

    #[test]
    fn only_qualifying_orders_are_selected() {
        let stage = paid_only_stage(&MartConfig {
            date_format: "DD.MM.YYYY HH24:MI".to_string(),
            paid_status: "Settled".to_string(),
        });
        assert!(stage.statements[1].contains("WHERE status = 'Settled'"));
    }
}
