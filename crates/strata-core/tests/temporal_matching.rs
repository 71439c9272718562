//! Evaluates built predicates against in-memory records to pin down the
//! row-matching semantics backends must reproduce: strict boundaries,
//! open-ended intervals, and the never-matching fully-null interval.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use strata_core::{
    build_predicate, ColumnInfo, FieldType, FilterNode, Layer, TemporalAttribute, TemporalBound,
    TimeLiteral,
};

type Record<'a> = HashMap<&'a str, Option<TimeLiteral>>;

fn eval(node: &FilterNode, record: &Record) -> bool {
    match node {
        FilterNode::And(lhs, rhs) => eval(lhs, record) && eval(rhs, record),
        FilterNode::Or(lhs, rhs) => eval(lhs, record) || eval(rhs, record),
        FilterNode::IsNull { attribute, negated } => {
            let is_null = matches!(record.get(attribute.as_str()), Some(None));
            is_null != *negated
        }
        FilterNode::TimeBefore { attribute, value } => {
            stored(record, attribute).map_or(false, |v| lt(&v, value))
        }
        FilterNode::TimeAfter { attribute, value } => {
            stored(record, attribute).map_or(false, |v| lt(value, &v))
        }
        FilterNode::TimeEquals { attribute, value } => {
            stored(record, attribute).map_or(false, |v| v == *value)
        }
        FilterNode::BboxIntersects { .. } => true,
    }
}

fn stored(record: &Record, attribute: &str) -> Option<TimeLiteral> {
    record.get(attribute).copied().flatten()
}

fn lt(a: &TimeLiteral, b: &TimeLiteral) -> bool {
    match (a, b) {
        (TimeLiteral::Aware(a), TimeLiteral::Aware(b)) => a < b,
        (TimeLiteral::Naive(a), TimeLiteral::Naive(b)) => a < b,
        mixed => panic!("comparison domains should already agree: {:?}", mixed),
    }
}

fn range_layer() -> Layer {
    Layer {
        id: "events".to_string(),
        title: "events".to_string(),
        description: None,
        bboxes: vec![strata_core::DEFAULT_BBOX],
        intervals: vec![[None, None]],
        data_source_id: "ds".to_string(),
        schema_name: "public".to_string(),
        table_name: "events".to_string(),
        geometry_field_name: "geom".to_string(),
        geometry_srid: 4326,
        geometry_crs_auth_name: "EPSG".to_string(),
        geometry_crs_auth_code: 4326,
        temporal_attributes: vec![TemporalAttribute::Range {
            start_field: "valid_from".to_string(),
            start_tz_aware: true,
            end_field: "valid_to".to_string(),
            end_tz_aware: true,
            tz: Tz::UTC,
        }],
        unique_field_name: "id".to_string(),
        columns: vec![ColumnInfo {
            name: "id".to_string(),
            field_type: FieldType::Int64,
        }],
        license: None,
        keywords: None,
        providers: None,
    }
}

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

fn record(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Record<'static> {
    HashMap::from([
        ("valid_from", start.map(TimeLiteral::Aware)),
        ("valid_to", end.map(TimeLiteral::Aware)),
    ])
}

#[test]
fn test_bounded_interval_contains_instant() {
    let layer = range_layer();
    let row = record(
        Some(utc(2020, 8, 4, 15, 2, 59)),
        Some(utc(2021, 8, 4, 15, 2, 59)),
    );

    let inside = TemporalBound::Instant(utc(2020, 10, 1, 0, 0, 0));
    let node = build_predicate(None, Some(&inside), &layer).unwrap();
    assert!(eval(&node, &row));

    let before = TemporalBound::Instant(utc(1999, 12, 31, 23, 59, 59));
    let node = build_predicate(None, Some(&before), &layer).unwrap();
    assert!(!eval(&node, &row));
}

#[test]
fn test_unbounded_end_interval_matches_entered_instant() {
    let layer = range_layer();
    let row = record(Some(utc(2020, 1, 1, 0, 0, 0)), None);

    let after_start = TemporalBound::Instant(utc(2020, 6, 1, 0, 0, 0));
    let node = build_predicate(None, Some(&after_start), &layer).unwrap();
    assert!(eval(&node, &row));

    let before_start = TemporalBound::Instant(utc(2019, 6, 1, 0, 0, 0));
    let node = build_predicate(None, Some(&before_start), &layer).unwrap();
    assert!(!eval(&node, &row));
}

#[test]
fn test_unbounded_start_interval_matches_preceding_instant() {
    let layer = range_layer();
    let row = record(None, Some(utc(2021, 1, 1, 0, 0, 0)));

    let before_end = TemporalBound::Instant(utc(2020, 6, 1, 0, 0, 0));
    let node = build_predicate(None, Some(&before_end), &layer).unwrap();
    assert!(eval(&node, &row));

    let after_end = TemporalBound::Instant(utc(2021, 6, 1, 0, 0, 0));
    let node = build_predicate(None, Some(&after_end), &layer).unwrap();
    assert!(!eval(&node, &row));
}

#[test]
fn test_fully_null_interval_never_matches_temporal_queries() {
    let layer = range_layer();
    let row = record(None, None);

    let instant = TemporalBound::Instant(utc(2020, 10, 1, 0, 0, 0));
    let node = build_predicate(None, Some(&instant), &layer).unwrap();
    assert!(!eval(&node, &row));

    let range = TemporalBound::Range {
        start: Some(utc(2019, 1, 1, 0, 0, 0)),
        end: Some(utc(2022, 1, 1, 0, 0, 0)),
    };
    let node = build_predicate(None, Some(&range), &layer).unwrap();
    assert!(!eval(&node, &row));

    let half_open_query = TemporalBound::Range {
        start: Some(utc(2019, 1, 1, 0, 0, 0)),
        end: None,
    };
    let node = build_predicate(None, Some(&half_open_query), &layer).unwrap();
    assert!(!eval(&node, &row));

    // and the absence of any temporal filter yields no predicate at all
    assert_eq!(build_predicate(None, None, &layer), None);
}

#[test]
fn test_range_query_overlap_semantics() {
    let layer = range_layer();
    let row = record(
        Some(utc(2020, 8, 4, 15, 2, 59)),
        Some(utc(2021, 8, 4, 15, 2, 59)),
    );

    let overlapping = TemporalBound::Range {
        start: Some(utc(2021, 1, 1, 0, 0, 0)),
        end: Some(utc(2022, 1, 1, 0, 0, 0)),
    };
    let node = build_predicate(None, Some(&overlapping), &layer).unwrap();
    assert!(eval(&node, &row));

    let disjoint = TemporalBound::Range {
        start: Some(utc(2022, 1, 1, 0, 0, 0)),
        end: Some(utc(2023, 1, 1, 0, 0, 0)),
    };
    let node = build_predicate(None, Some(&disjoint), &layer).unwrap();
    assert!(!eval(&node, &row));
}
