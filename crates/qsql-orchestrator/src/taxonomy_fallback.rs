//! Deterministic taxonomy fallback for the `understand` node, spec §4.10
//! "Taxonomy fallback".
//!
//! Grounded on `original_source/backend/app/services/query_taxonomy_classifier.py`'s
//! keyword-weighted category scoring, reduced to exactly the fields
//! `Intent` carries. Runs whenever the LLM path in `understand` fails to
//! produce valid strict JSON, and is tagged `source = "fallback"` so
//! observability can tell the two paths apart.

use qsql_schema::extract_table_names;
use qsql_schemas::Intent;

struct Keywords {
    domain: &'static str,
    words: &'static [&'static str],
}

const DOMAIN_KEYWORDS: &[Keywords] = &[
    Keywords { domain: "sales", words: &["revenue", "order", "customer", "sale", "deal", "pipeline"] },
    Keywords { domain: "finance", words: &["budget", "cost", "expense", "p&l", "invoice", "margin"] },
    Keywords { domain: "operations", words: &["inventory", "shipment", "logistics", "warehouse", "supply"] },
    Keywords { domain: "hr", words: &["employee", "payroll", "salary", "headcount", "performance review"] },
    Keywords { domain: "marketing", words: &["campaign", "lead", "conversion", "click", "impression"] },
];

const AGGREGATION_KEYWORDS: &[&str] = &[
    "total", "sum", "average", "avg", "count", "min", "max", "how many", "how much",
];
const COMPARATIVE_KEYWORDS: &[&str] = &["compare", "versus", " vs ", "top", "bottom", "rank"];
const TEMPORAL_KEYWORDS: &[&str] = &[
    "trend", "over time", "growth", "monthly", "weekly", "yoy", "last month", "last year",
    "historical", "quarter", "year over year",
];
const JOIN_KEYWORDS: &[&str] = &["join", "combined with", "along with", "matched to"];

fn matches_any(haystack: &str, words: &[&str]) -> bool {
    words.iter().any(|w| haystack.contains(w))
}

fn detect_domain(lower: &str) -> &'static str {
    DOMAIN_KEYWORDS
        .iter()
        .find(|k| matches_any(lower, k.words))
        .map(|k| k.domain)
        .unwrap_or("general")
}

/// Token-count-plus-keyword complexity estimate, spec §4.10: "compute
/// complexity from token count and keywords (simple/medium/complex
/// thresholds)".
fn detect_complexity(lower: &str, token_count: usize, table_count: usize) -> &'static str {
    let has_join_signal = matches_any(lower, JOIN_KEYWORDS) || table_count > 2;
    if token_count > 25 || has_join_signal {
        "complex"
    } else if token_count > 12 || matches_any(lower, COMPARATIVE_KEYWORDS) {
        "medium"
    } else {
        "simple"
    }
}

/// Builds the deterministic fallback [`Intent`] from keyword patterns over
/// the raw user query. Never fails; worst case everything defaults to the
/// least specific bucket ("general" domain, "select" query type).
pub fn classify(user_query: &str) -> Intent {
    let lower = user_query.to_lowercase();
    let token_count = user_query.split_whitespace().count();
    let tables = extract_table_names(user_query);

    let aggregations: Vec<String> = AGGREGATION_KEYWORDS
        .iter()
        .filter(|w| lower.contains(*w))
        .map(|w| w.trim().to_string())
        .collect();
    let is_aggregation = !aggregations.is_empty();
    let is_comparative = matches_any(&lower, COMPARATIVE_KEYWORDS);
    let is_temporal = matches_any(&lower, TEMPORAL_KEYWORDS);

    let query_type = if is_aggregation {
        "aggregation"
    } else if is_comparative {
        "comparative"
    } else if is_temporal {
        "time-series"
    } else {
        "select"
    };

    let expected_cardinality = if is_aggregation || is_comparative || is_temporal {
        "summary"
    } else {
        "few"
    };

    let joins_count = if matches_any(&lower, JOIN_KEYWORDS) || tables.len() > 1 {
        (tables.len().max(2) - 1) as u32
    } else {
        0
    };

    Intent {
        query_type: query_type.to_string(),
        complexity: detect_complexity(&lower, token_count, tables.len()).to_string(),
        domain: detect_domain(&lower).to_string(),
        temporal: is_temporal,
        expected_cardinality: expected_cardinality.to_string(),
        tables,
        entities: Vec::new(),
        aggregations,
        filters: Vec::new(),
        joins_count,
        source: "fallback".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_keyword_drives_query_type_and_cardinality() {
        let intent = classify("What is the total revenue by region?");
        assert_eq!(intent.query_type, "aggregation");
        assert_eq!(intent.expected_cardinality, "summary");
        assert_eq!(intent.domain, "sales");
        assert_eq!(intent.source, "fallback");
    }

    #[test]
    fn plain_lookup_defaults_to_select_and_few() {
        let intent = classify("show me the orders table");
        assert_eq!(intent.query_type, "select");
        assert_eq!(intent.expected_cardinality, "few");
    }

    #[test]
    fn short_query_is_simple_complexity() {
        let intent = classify("list customers");
        assert_eq!(intent.complexity, "simple");
    }

    #[test]
    fn long_multi_clause_query_is_complex() {
        let intent = classify(
            "Show me the total revenue broken down by region and product category, \
             joined with the customer demographics table, filtered to the last \
             four quarters and ranked by growth",
        );
        assert_eq!(intent.complexity, "complex");
    }

    #[test]
    fn temporal_keywords_set_temporal_flag() {
        let intent = classify("show the monthly growth trend for signups");
        assert!(intent.temporal);
        assert_eq!(intent.query_type, "time-series");
    }
}
