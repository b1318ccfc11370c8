//! Customer RFM segmentation.
//!
//! Scores recency, frequency and monetary value into 1-4 tiers against the
//! population mean plus/minus one standard deviation, concatenates the tiers
//! into a 3-digit group code, and maps the code to a named segment.

use super::SqlStage;
use crate::config::MartConfig;

/// Group-code → segment lookup. Codes missing from every bucket map to SQL
/// NULL so an unexpected combination is visible instead of mislabeled.
pub const SEGMENT_LABELS: &[(&str, &[&str])] = &[
    ("vip", &["444", "443", "344"]),
    (
        "loyal",
        &[
            "442", "441", "434", "433", "432", "331", "332", "343", "342", "334",
        ],
    ),
    (
        "new",
        &["431", "424", "423", "422", "421", "414", "413", "412", "411"],
    ),
    ("high_potential", &["341", "333", "324", "323", "322", "243"]),
    (
        "low_activity",
        &[
            "321", "314", "313", "312", "311", "241", "232", "222", "221", "214", "213", "212",
            "211", "142", "141",
        ],
    ),
    (
        "dormant",
        &["234", "233", "242", "244", "144", "224", "223", "143"],
    ),
    (
        "lost",
        &[
            "134", "133", "132", "131", "124", "123", "122", "121", "114", "113", "112", "111",
        ],
    ),
];

/// Renders the lookup as a CASE expression over `rfm_group`.
fn segment_case() -> String {
    let mut case = String::from("CASE\n");
    for (label, codes) in SEGMENT_LABELS {
        let list = codes
            .iter()
            .map(|c| format!("'{c}'"))
            .collect::<Vec<_>>()
            .join(", ");
        case.push_str(&format!(
            "            WHEN rg.rfm_group IN ({list}) THEN '{label}'\n"
        ));
    }
    case.push_str("            ELSE NULL\n        END");
    case
}

/// 1-4 tier CASE for one metric. Recency scores low-is-good, the other two
/// high-is-good.
fn score_case(metric: &str, higher_is_better: bool) -> String {
    let (op, near, far) = if higher_is_better {
        (">=", "+", "-")
    } else {
        ("<=", "-", "+")
    };
    format!(
        "CASE
                WHEN {metric} {op} (SELECT AVG({metric}) FROM rfm_data) {near} (SELECT STDDEV({metric}) FROM rfm_data) THEN 4
                WHEN {metric} {op} (SELECT AVG({metric}) FROM rfm_data) THEN 3
                WHEN {metric} {op} (SELECT AVG({metric}) FROM rfm_data) {far} (SELECT STDDEV({metric}) FROM rfm_data) THEN 2
                ELSE 1
            END"
    )
}

pub(crate) fn stage(mart: &MartConfig) -> SqlStage {
    let create = "\
CREATE TABLE IF NOT EXISTS rfm (
    customer_id BIGINT,
    recency_days INT,
    frequency INT,
    monetary NUMERIC,
    recency_score INT,
    frequency_score INT,
    monetary_score INT,
    rfm_group TEXT,
    percent_rfm NUMERIC,
    segment TEXT,
    PRIMARY KEY (customer_id)
);"
    .to_string();

    let fmt = &mart.date_format;
    let paid = &mart.paid_status;
    let recency_case = score_case("recency_days", false);
    let frequency_case = score_case("frequency", true);
    let monetary_case = score_case("monetary", true);
    let segment_case = segment_case();

    let insert = format!(
        "\
INSERT INTO rfm (
    customer_id, recency_days, frequency, monetary,
    recency_score, frequency_score, monetary_score,
    rfm_group, percent_rfm, segment
)
WITH rfm_data AS (
    SELECT
        customer_id,
        EXTRACT(DAY FROM (CURRENT_DATE - MAX(TO_TIMESTAMP(first_action_at, '{fmt}')))) AS recency_days,
        COUNT(*) AS frequency,
        SUM(total_price) AS monetary
    FROM orders
    WHERE status = '{paid}'
    GROUP BY customer_id
),
rfm_scores AS (
    SELECT
        customer_id,
        recency_days,
        frequency,
        monetary,
        {recency_case} AS recency_score,
        {frequency_case} AS frequency_score,
        {monetary_case} AS monetary_score
    FROM rfm_data
),
rfm_grouped AS (
    SELECT
        customer_id,
        recency_days,
        frequency,
        monetary,
        recency_score,
        frequency_score,
        monetary_score,
        CONCAT(recency_score, frequency_score, monetary_score) AS rfm_group
    FROM rfm_scores
),
rfm_percentages AS (
    SELECT
        rfm_group,
        ROUND(COUNT(*) * 100.0 / SUM(COUNT(*)) OVER (), 2) AS percent_rfm
    FROM rfm_grouped
    GROUP BY rfm_group
)
SELECT
    rg.customer_id,
    rg.recency_days,
    rg.frequency,
    rg.monetary,
    rg.recency_score,
    rg.frequency_score,
    rg.monetary_score,
    rg.rfm_group,
    rp.percent_rfm,
    {segment_case} AS segment
FROM rfm_grouped rg
LEFT JOIN rfm_percentages rp ON rg.rfm_group = rp.rfm_group
ON CONFLICT (customer_id) DO UPDATE SET
    recency_days = EXCLUDED.recency_days,
    frequency = EXCLUDED.frequency,
    monetary = EXCLUDED.monetary,
    recency_score = EXCLUDED.recency_score,
    frequency_score = EXCLUDED.frequency_score,
    monetary_score = EXCLUDED.monetary_score,
    rfm_group = EXCLUDED.rfm_group,
    percent_rfm = EXCLUDED.percent_rfm,
    segment = EXCLUDED.segment;"
    );

    SqlStage {
        name: "rfm",
        statements: vec![create, insert],
    }
}
