//! Lowers the backend-agnostic predicate tree to a parameterized SQL
//! WHERE clause.
//!
//! Time literals are bound as parameters with explicit casts so date columns
//! compare natively against timestamp parameters. SRIDs come from catalog
//! introspection and are interpolated directly.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

use strata_core::{FilterNode, TimeLiteral};

/// A query parameter produced by predicate lowering
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Float(f64),
    Int(i64),
    Text(String),
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Timestamp(v) => v.to_sql(ty, out),
            SqlValue::TimestampTz(v) => v.to_sql(ty, out),
            SqlValue::Float(v) => v.to_sql(ty, out),
            SqlValue::Int(v) => v.to_sql(ty, out),
            SqlValue::Text(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::TIMESTAMP
            || *ty == Type::TIMESTAMPTZ
            || *ty == Type::FLOAT8
            || *ty == Type::INT8
            || *ty == Type::TEXT
            || *ty == Type::VARCHAR
            || *ty == Type::BPCHAR
    }

    to_sql_checked!();
}

/// A lowered predicate: clause text referencing `$n` placeholders plus the
/// parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlPredicate {
    pub clause: String,
    pub params: Vec<SqlValue>,
}

impl SqlPredicate {
    /// The no-filter predicate
    pub fn always_true() -> Self {
        Self {
            clause: "TRUE".to_string(),
            params: Vec::new(),
        }
    }

    pub fn param_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
    }
}

/// Lower a predicate tree; `None` lowers to `TRUE`.
pub fn lower_filter(node: Option<&FilterNode>) -> SqlPredicate {
    match node {
        None => SqlPredicate::always_true(),
        Some(node) => {
            let mut params = Vec::new();
            let clause = lower_node(node, &mut params);
            SqlPredicate { clause, params }
        }
    }
}

fn lower_node(node: &FilterNode, params: &mut Vec<SqlValue>) -> String {
    match node {
        FilterNode::And(lhs, rhs) => {
            let lhs = lower_node(lhs, params);
            let rhs = lower_node(rhs, params);
            format!("({lhs} AND {rhs})")
        }
        FilterNode::Or(lhs, rhs) => {
            let lhs = lower_node(lhs, params);
            let rhs = lower_node(rhs, params);
            format!("({lhs} OR {rhs})")
        }
        FilterNode::TimeBefore { attribute, value } => {
            format!("{} < {}", quote_ident(attribute), push_time(params, value))
        }
        FilterNode::TimeAfter { attribute, value } => {
            format!("{} > {}", quote_ident(attribute), push_time(params, value))
        }
        FilterNode::TimeEquals { attribute, value } => {
            format!("{} = {}", quote_ident(attribute), push_time(params, value))
        }
        FilterNode::IsNull { attribute, negated } => format!(
            "{} IS {}NULL",
            quote_ident(attribute),
            if *negated { "NOT " } else { "" }
        ),
        FilterNode::BboxIntersects {
            attribute,
            bbox,
            source_srid,
            native_srid,
        } => {
            let corners: Vec<String> = bbox
                .iter()
                .map(|coordinate| {
                    params.push(SqlValue::Float(*coordinate));
                    format!("${}", params.len())
                })
                .collect();
            format!(
                "ST_Intersects(ST_SetSRID({}::geometry, {native_srid}), \
                 ST_Transform(ST_MakeEnvelope({}, {source_srid}), {native_srid}))",
                quote_ident(attribute),
                corners.join(", "),
            )
        }
    }
}

fn push_time(params: &mut Vec<SqlValue>, value: &TimeLiteral) -> String {
    match value {
        TimeLiteral::Aware(instant) => {
            params.push(SqlValue::TimestampTz(*instant));
            format!("${}::timestamptz", params.len())
        }
        TimeLiteral::Naive(instant) => {
            params.push(SqlValue::Timestamp(*instant));
            format!("${}::timestamp", params.len())
        }
    }
}

/// Double-quote an identifier for interpolation into SQL text.
pub fn quote_ident(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}
