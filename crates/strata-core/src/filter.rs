//! Translation of client-supplied spatial/temporal constraints into a
//! backend-agnostic predicate tree.
//!
//! Backends lower [`FilterNode`] to their native query form. Temporal
//! sub-predicates are built per layer attribute and OR'd together; spatial
//! and temporal combine with AND.

use chrono::{DateTime, Utc};

use crate::layer::Layer;
use crate::temporal::{align_query_time, TemporalAttribute, TimeLiteral};

/// A spatial bounding box constraint in a caller-declared CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialBound {
    /// [min_x, min_y, max_x, max_y] in the source CRS
    pub bbox: [f64; 4],
    /// SRID the bbox coordinates are expressed in
    pub source_srid: i32,
}

impl SpatialBound {
    pub fn new(bbox: [f64; 4]) -> Self {
        Self {
            bbox,
            source_srid: 4326,
        }
    }

    pub fn with_source_srid(mut self, srid: i32) -> Self {
        self.source_srid = srid;
        self
    }
}

/// A temporal constraint: a single instant, or a half- or fully-bounded range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemporalBound {
    Instant(DateTime<Utc>),
    Range {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
}

/// Backend-agnostic predicate tree over named attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    And(Box<FilterNode>, Box<FilterNode>),
    Or(Box<FilterNode>, Box<FilterNode>),
    /// attribute < value (strict)
    TimeBefore {
        attribute: String,
        value: TimeLiteral,
    },
    /// attribute > value (strict)
    TimeAfter {
        attribute: String,
        value: TimeLiteral,
    },
    /// attribute == value
    TimeEquals {
        attribute: String,
        value: TimeLiteral,
    },
    IsNull {
        attribute: String,
        negated: bool,
    },
    /// Geometry/bbox intersection, evaluated in the layer's native CRS.
    /// Carries both CRS identities so backends storing geometry without
    /// SRID metadata can attach the identity to the query itself.
    BboxIntersects {
        attribute: String,
        bbox: [f64; 4],
        source_srid: i32,
        native_srid: i32,
    },
}

impl FilterNode {
    pub fn and(lhs: FilterNode, rhs: FilterNode) -> FilterNode {
        FilterNode::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: FilterNode, rhs: FilterNode) -> FilterNode {
        FilterNode::Or(Box::new(lhs), Box::new(rhs))
    }

    fn before(attribute: &str, value: TimeLiteral) -> FilterNode {
        FilterNode::TimeBefore {
            attribute: attribute.to_string(),
            value,
        }
    }

    fn after(attribute: &str, value: TimeLiteral) -> FilterNode {
        FilterNode::TimeAfter {
            attribute: attribute.to_string(),
            value,
        }
    }

    fn is_null(attribute: &str) -> FilterNode {
        FilterNode::IsNull {
            attribute: attribute.to_string(),
            negated: false,
        }
    }

    fn not_null(attribute: &str) -> FilterNode {
        FilterNode::IsNull {
            attribute: attribute.to_string(),
            negated: true,
        }
    }
}

/// Build the combined predicate for a request against a layer.
///
/// Returns `None` when neither bound is supplied, or when the temporal bound
/// is empty and no spatial bound is present (no filtering).
pub fn build_predicate(
    spatial: Option<&SpatialBound>,
    temporal: Option<&TemporalBound>,
    layer: &Layer,
) -> Option<FilterNode> {
    let spatial_node = spatial.map(|bound| spatial_to_node(bound, layer));
    let temporal_node = temporal.and_then(|bound| temporal_to_node(bound, layer));
    match (spatial_node, temporal_node) {
        (None, None) => None,
        (Some(s), None) => Some(s),
        (None, Some(t)) => Some(t),
        (Some(s), Some(t)) => Some(FilterNode::and(s, t)),
    }
}

fn spatial_to_node(bound: &SpatialBound, layer: &Layer) -> FilterNode {
    FilterNode::BboxIntersects {
        attribute: layer.geometry_field_name.clone(),
        bbox: bound.bbox,
        source_srid: bound.source_srid,
        native_srid: layer.geometry_srid,
    }
}

fn temporal_to_node(bound: &TemporalBound, layer: &Layer) -> Option<FilterNode> {
    if let TemporalBound::Range {
        start: None,
        end: None,
    } = bound
    {
        return None;
    }
    layer
        .temporal_attributes
        .iter()
        .map(|attribute| attribute_node(bound, attribute))
        .reduce(FilterNode::or)
}

fn attribute_node(bound: &TemporalBound, attribute: &TemporalAttribute) -> FilterNode {
    match (bound, attribute) {
        (
            TemporalBound::Range { start, end },
            TemporalAttribute::Instant {
                field,
                tz_aware,
                tz,
            },
        ) => {
            // start/end boundaries are exclusive: exact boundary matches are
            // not returned
            let before_end =
                end.map(|end| FilterNode::before(field, align_query_time(&end, *tz_aware, *tz)));
            let after_start = start
                .map(|start| FilterNode::after(field, align_query_time(&start, *tz_aware, *tz)));
            match (before_end, after_start) {
                (Some(before), Some(after)) => FilterNode::and(before, after),
                (Some(before), None) => before,
                (None, Some(after)) => after,
                (None, None) => unreachable!("empty ranges are rejected before dispatch"),
            }
        }
        (
            TemporalBound::Range { start, end },
            TemporalAttribute::Range {
                start_field,
                start_tz_aware,
                end_field,
                end_tz_aware,
                tz,
            },
        ) => {
            // A null start/end column denotes an open-ended interval and
            // always satisfies its half of the condition.
            let data_start_precedes_query_end = end.map(|end| {
                FilterNode::or(
                    FilterNode::is_null(start_field),
                    FilterNode::before(start_field, align_query_time(&end, *start_tz_aware, *tz)),
                )
            });
            let data_end_succeeds_query_start = start.map(|start| {
                FilterNode::or(
                    FilterNode::is_null(end_field),
                    FilterNode::after(end_field, align_query_time(&start, *end_tz_aware, *tz)),
                )
            });
            let overlap = match (data_start_precedes_query_end, data_end_succeeds_query_start) {
                (Some(precedes), Some(succeeds)) => FilterNode::and(precedes, succeeds),
                (Some(precedes), None) => precedes,
                (None, Some(succeeds)) => succeeds,
                (None, None) => unreachable!("empty ranges are rejected before dispatch"),
            };
            // a row with both bounds null only matches the absence of a
            // temporal filter
            FilterNode::and(
                overlap,
                FilterNode::or(
                    FilterNode::not_null(start_field),
                    FilterNode::not_null(end_field),
                ),
            )
        }
        (
            TemporalBound::Instant(instant),
            TemporalAttribute::Instant {
                field,
                tz_aware,
                tz,
            },
        ) => FilterNode::TimeEquals {
            attribute: field.clone(),
            value: align_query_time(instant, *tz_aware, *tz),
        },
        (
            TemporalBound::Instant(instant),
            TemporalAttribute::Range {
                start_field,
                start_tz_aware,
                end_field,
                end_tz_aware,
                tz,
            },
        ) => {
            let start_literal = align_query_time(instant, *start_tz_aware, *tz);
            let end_literal = align_query_time(instant, *end_tz_aware, *tz);
            // Matches an unbounded-end interval the instant has entered, an
            // unbounded-start interval it precedes the end of, or a fully
            // bounded interval containing it. Rows with both bounds null
            // never match.
            let unbounded_end = FilterNode::and(
                FilterNode::is_null(end_field),
                FilterNode::before(start_field, start_literal),
            );
            let unbounded_start = FilterNode::and(
                FilterNode::is_null(start_field),
                FilterNode::after(end_field, end_literal),
            );
            let bounded = FilterNode::and(
                FilterNode::before(start_field, start_literal),
                FilterNode::after(end_field, end_literal),
            );
            FilterNode::or(FilterNode::or(unbounded_start, unbounded_end), bounded)
        }
    }
}
