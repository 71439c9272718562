//! Paginated feature retrieval for one layer, built around an id-set
//! subquery: the page of primary keys is selected once with the lowered
//! predicate, ordering and limit/offset, then joined back to the table for
//! whichever output shape the caller wants.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;
use tokio_postgres::Client;
use tracing::debug;

use strata_core::{
    datetime_as_rfc3339, now_as_rfc3339, DataError, DataRow, FeatureSetProvider, FeatureSetRows,
    FieldType, Layer, Link, PageLinkGenerator, Result,
};

use crate::lowering::{quote_ident, SqlPredicate};

/// Connection shared between a source and the providers it hands out;
/// `None` after disconnect.
pub(crate) type SharedClient = Arc<RwLock<Option<Client>>>;

/// Borrow the live connection from a held read guard.
pub(crate) fn connected(guard: &Option<Client>) -> Result<&Client> {
    guard
        .as_ref()
        .ok_or_else(|| DataError::ConnectionFailed("data source is disconnected".to_string()))
}

pub struct PostgresFeatureSetProvider {
    pub(crate) client: SharedClient,
    pub(crate) layer: Layer,
    pub(crate) id_set_sql: String,
    pub(crate) predicate: SqlPredicate,
    pub(crate) total_count: i64,
}

impl PostgresFeatureSetProvider {
    fn join_sql(&self, projection: &str) -> String {
        format!(
            "SELECT {projection} FROM {schema}.{table} source \
             JOIN ({id_set}) id_set ON source.{pk} = id_set.id \
             ORDER BY source.{pk}",
            schema = quote_ident(&self.layer.schema_name),
            table = quote_ident(&self.layer.table_name),
            id_set = self.id_set_sql,
            pk = quote_ident(&self.layer.unique_field_name),
        )
    }
}

#[async_trait]
impl FeatureSetProvider for PostgresFeatureSetProvider {
    async fn as_geojson(
        &self,
        links: Vec<Link>,
        page_links: &PageLinkGenerator,
    ) -> Result<String> {
        let projection = format!(
            "JSON_BUILD_OBJECT(\
             'type', 'Feature', \
             'id', source.{pk}, \
             'geometry', ST_AsGeoJSON(source.{geom})::JSONB, \
             'properties', TO_JSONB(source) - '{pk_name}' - '{geom_name}'\
             ) AS feature",
            pk = quote_ident(&self.layer.unique_field_name),
            geom = quote_ident(&self.layer.geometry_field_name),
            pk_name = self.layer.unique_field_name.replace('\'', "''"),
            geom_name = self.layer.geometry_field_name.replace('\'', "''"),
        );
        let sql = self.join_sql(&projection);
        debug!("feature set query for {}: {sql}", self.layer.id);
        let guard = self.client.read().await;
        let rows = connected(&guard)?
            .query(sql.as_str(), &self.predicate.param_refs())
            .await
            .map_err(|e| DataError::QueryFailed(format!("feature set query failed: {e}")))?;

        let features: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                row.try_get::<_, serde_json::Value>(0).map_err(|e| {
                    DataError::SerializationError(format!("bad feature row: {e}"))
                })
            })
            .collect::<Result<_>>()?;

        let returned = features.len() as i64;
        let mut all_links = links;
        all_links.extend(page_links.links(self.total_count, returned).into_vec());

        let collection = json!({
            "type": "FeatureCollection",
            "features": features,
            "links": all_links,
            "numberMatched": self.total_count,
            "numberReturned": returned,
            "timeStamp": now_as_rfc3339(),
        });
        serde_json::to_string(&collection)
            .map_err(|e| DataError::SerializationError(e.to_string()))
    }

    async fn as_rows(
        &self,
        links: Vec<Link>,
        page_links: &PageLinkGenerator,
    ) -> Result<FeatureSetRows> {
        let columns = non_geometry_columns(&self.layer);
        let sql = self.join_sql(&projection_for(&columns));
        debug!("feature rows query for {}: {sql}", self.layer.id);
        let guard = self.client.read().await;
        let rows = connected(&guard)?
            .query(sql.as_str(), &self.predicate.param_refs())
            .await
            .map_err(|e| DataError::QueryFailed(format!("feature rows query failed: {e}")))?;

        let features: Vec<DataRow> = rows
            .iter()
            .map(|row| row_to_data(row, &columns))
            .collect::<Result<_>>()?;

        let page = page_links.links(self.total_count, features.len() as i64);
        Ok(FeatureSetRows {
            collection_id: self.layer.id.clone(),
            unique_field_name: self.layer.unique_field_name.clone(),
            features,
            format_links: links,
            prev_link: page.prev,
            next_link: page.next,
        })
    }
}

/// Layer columns minus the geometry column, in declared order.
pub(crate) fn non_geometry_columns(layer: &Layer) -> Vec<strata_core::ColumnInfo> {
    layer
        .columns
        .iter()
        .filter(|column| column.name != layer.geometry_field_name)
        .cloned()
        .collect()
}

/// Projection for row-oriented output; types without a native decoding are
/// cast to text in SQL.
pub(crate) fn projection_for(columns: &[strata_core::ColumnInfo]) -> String {
    columns
        .iter()
        .map(|column| match column.field_type {
            FieldType::Other | FieldType::Geometry => format!(
                "CAST(source.{name} AS TEXT) AS {name}",
                name = quote_ident(&column.name)
            ),
            _ => format!("source.{}", quote_ident(&column.name)),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Decode one result row into key-value pairs by the declared column types.
pub(crate) fn row_to_data(
    row: &tokio_postgres::Row,
    columns: &[strata_core::ColumnInfo],
) -> Result<DataRow> {
    let mut data = DataRow::new();
    for (index, column) in columns.iter().enumerate() {
        data.insert(column.name.clone(), extract_value(row, index, column)?);
    }
    Ok(data)
}

fn extract_value(
    row: &tokio_postgres::Row,
    index: usize,
    column: &strata_core::ColumnInfo,
) -> Result<serde_json::Value> {
    let bad = |e: tokio_postgres::Error| {
        DataError::SerializationError(format!("failed to decode column {}: {e}", column.name))
    };
    let value = match column.field_type {
        FieldType::Boolean => json!(row.try_get::<_, Option<bool>>(index).map_err(bad)?),
        FieldType::Int32 => json!(row.try_get::<_, Option<i32>>(index).map_err(bad)?),
        FieldType::Int64 => json!(row.try_get::<_, Option<i64>>(index).map_err(bad)?),
        FieldType::Float32 => json!(row.try_get::<_, Option<f32>>(index).map_err(bad)?),
        FieldType::Float64 => json!(row.try_get::<_, Option<f64>>(index).map_err(bad)?),
        FieldType::String => json!(row.try_get::<_, Option<String>>(index).map_err(bad)?),
        FieldType::Bytes => json!(row
            .try_get::<_, Option<Vec<u8>>>(index)
            .map_err(bad)?
            .map(hex::encode)),
        FieldType::Date => json!(row
            .try_get::<_, Option<chrono::NaiveDate>>(index)
            .map_err(bad)?
            .map(|date| date.to_string())),
        FieldType::Timestamp => json!(row
            .try_get::<_, Option<chrono::NaiveDateTime>>(index)
            .map_err(bad)?
            .map(|naive| naive.format("%Y-%m-%dT%H:%M:%S").to_string())),
        FieldType::TimestampTz => json!(row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(index)
            .map_err(bad)?
            .map(|instant| datetime_as_rfc3339(&instant))),
        FieldType::Json => row
            .try_get::<_, Option<serde_json::Value>>(index)
            .map_err(bad)?
            .unwrap_or(serde_json::Value::Null),
        FieldType::Uuid => json!(row
            .try_get::<_, Option<uuid::Uuid>>(index)
            .map_err(bad)?
            .map(|id| id.to_string())),
        // cast to text in the projection
        FieldType::Geometry | FieldType::Other => {
            json!(row.try_get::<_, Option<String>>(index).map_err(bad)?)
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::ColumnInfo;

    fn layer() -> Layer {
        Layer {
            id: "roads".to_string(),
            title: "roads".to_string(),
            description: None,
            bboxes: vec![strata_core::DEFAULT_BBOX],
            intervals: vec![[None, None]],
            data_source_id: "ds".to_string(),
            schema_name: "public".to_string(),
            table_name: "roads".to_string(),
            geometry_field_name: "geom".to_string(),
            geometry_srid: 4326,
            geometry_crs_auth_name: "EPSG".to_string(),
            geometry_crs_auth_code: 4326,
            temporal_attributes: vec![],
            unique_field_name: "id".to_string(),
            columns: vec![
                ColumnInfo {
                    name: "id".to_string(),
                    field_type: FieldType::Int64,
                },
                ColumnInfo {
                    name: "name".to_string(),
                    field_type: FieldType::String,
                },
                ColumnInfo {
                    name: "surface".to_string(),
                    field_type: FieldType::Other,
                },
                ColumnInfo {
                    name: "geom".to_string(),
                    field_type: FieldType::Geometry,
                },
            ],
            license: None,
            keywords: None,
            providers: None,
        }
    }

    #[test]
    fn test_non_geometry_columns_drop_geometry_only() {
        let names: Vec<String> = non_geometry_columns(&layer())
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["id", "name", "surface"]);
    }

    #[test]
    fn test_projection_casts_unknown_types_to_text() {
        let projection = projection_for(&non_geometry_columns(&layer()));
        assert_eq!(
            projection,
            "source.\"id\", source.\"name\", CAST(source.\"surface\" AS TEXT) AS \"surface\""
        );
    }

    #[test]
    fn test_join_sql_orders_by_primary_key() {
        let provider = PostgresFeatureSetProvider {
            client: Arc::new(RwLock::new(None)),
            layer: layer(),
            id_set_sql: "SELECT \"id\" AS id FROM \"public\".\"roads\" WHERE TRUE \
                         ORDER BY \"id\" LIMIT 10 OFFSET 0"
                .to_string(),
            predicate: SqlPredicate::always_true(),
            total_count: 0,
        };
        let sql = provider.join_sql("source.\"id\"");
        assert!(sql.starts_with("SELECT source.\"id\" FROM \"public\".\"roads\" source JOIN ("));
        assert!(sql.ends_with(") id_set ON source.\"id\" = id_set.id ORDER BY source.\"id\""));
    }
}
