//! Single-feature retrieval by id.
//!
//! The caller's id is untyped text; it is coerced to the unique field's type
//! first, and a value that cannot be coerced is a plain not-found rather
//! than a query error.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use strata_core::{
    DataError, FeatureProvider, FeatureRow, FieldType, Layer, Link, Result,
};

use crate::feature_set::{connected, non_geometry_columns, projection_for, row_to_data, SharedClient};
use crate::lowering::{quote_ident, SqlValue};

pub struct PostgresFeatureProvider {
    pub(crate) client: SharedClient,
    pub(crate) layer: Layer,
}

/// The pk comparison for one feature id: the SQL expression on the left and
/// the coerced parameter, or `None` when the id cannot be a value of the
/// unique field's type.
fn id_comparison(layer: &Layer, feature_id: &str) -> Option<(String, SqlValue)> {
    let pk = quote_ident(&layer.unique_field_name);
    match layer.unique_field_type() {
        // explicit casts keep the bound parameter's wire type fixed
        // regardless of the column's width
        FieldType::Int32 | FieldType::Int64 => feature_id
            .parse::<i64>()
            .ok()
            .map(|id| (format!("source.{pk} = $1::int8"), SqlValue::Int(id))),
        FieldType::Float32 | FieldType::Float64 => feature_id
            .parse::<f64>()
            .ok()
            .map(|id| (format!("source.{pk} = $1::float8"), SqlValue::Float(id))),
        FieldType::String => Some((
            format!("source.{pk} = $1"),
            SqlValue::Text(feature_id.to_string()),
        )),
        _ => Some((
            format!("CAST(source.{pk} AS TEXT) = $1"),
            SqlValue::Text(feature_id.to_string()),
        )),
    }
}

#[async_trait]
impl FeatureProvider for PostgresFeatureProvider {
    async fn as_geojson(&self, feature_id: &str, links: Vec<Link>) -> Result<Option<String>> {
        let Some((comparison, param)) = id_comparison(&self.layer, feature_id) else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT JSON_BUILD_OBJECT(\
             'type', 'Feature', \
             'id', source.{pk}, \
             'geometry', ST_AsGeoJSON(source.{geom})::JSONB, \
             'properties', TO_JSONB(source) - '{pk_name}' - '{geom_name}'\
             ) AS feature \
             FROM {schema}.{table} source WHERE {comparison}",
            pk = quote_ident(&self.layer.unique_field_name),
            geom = quote_ident(&self.layer.geometry_field_name),
            pk_name = self.layer.unique_field_name.replace('\'', "''"),
            geom_name = self.layer.geometry_field_name.replace('\'', "''"),
            schema = quote_ident(&self.layer.schema_name),
            table = quote_ident(&self.layer.table_name),
        );
        debug!("feature query for {}: {sql}", self.layer.id);
        let guard = self.client.read().await;
        let row = connected(&guard)?
            .query_opt(sql.as_str(), &[&param])
            .await
            .map_err(|e| DataError::QueryFailed(format!("feature query failed: {e}")))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut feature: serde_json::Value = row
            .try_get(0)
            .map_err(|e| DataError::SerializationError(format!("bad feature row: {e}")))?;
        feature["links"] = json!(links);
        Ok(Some(
            serde_json::to_string(&feature)
                .map_err(|e| DataError::SerializationError(e.to_string()))?,
        ))
    }

    async fn as_row(&self, feature_id: &str, links: Vec<Link>) -> Result<Option<FeatureRow>> {
        let Some((comparison, param)) = id_comparison(&self.layer, feature_id) else {
            return Ok(None);
        };
        let columns = non_geometry_columns(&self.layer);
        let sql = format!(
            "SELECT {projection} FROM {schema}.{table} source WHERE {comparison}",
            projection = projection_for(&columns),
            schema = quote_ident(&self.layer.schema_name),
            table = quote_ident(&self.layer.table_name),
        );
        debug!("feature row query for {}: {sql}", self.layer.id);
        let guard = self.client.read().await;
        let row = connected(&guard)?
            .query_opt(sql.as_str(), &[&param])
            .await
            .map_err(|e| DataError::QueryFailed(format!("feature row query failed: {e}")))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let data = row_to_data(&row, &columns)?;
        let properties = data
            .into_iter()
            .map(|(name, value)| (name, render_value(value)))
            .collect();
        Ok(Some(FeatureRow {
            collection_id: self.layer.id.clone(),
            feature_id: feature_id.to_string(),
            format_links: links,
            properties,
        }))
    }
}

fn render_value(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    }
}
