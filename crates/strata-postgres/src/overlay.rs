//! Operator-maintained collection metadata: a managed table whose rows
//! override derived layer metadata field by field.

use std::collections::HashMap;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio_postgres::Client;
use tracing::{debug, info, warn};

use strata_core::{DataError, Layer, ProviderInfo, Result, TemporalAttribute};

use crate::settings::OVERLAY_SCHEMA_NAME;

const VERSION_TABLE: &str = "schema_version";

/// Ordered schema migrations, applied transactionally on initialization.
const MIGRATIONS: &[(i32, &str)] = &[(
    1,
    "CREATE TABLE strata.collections (
        id VARCHAR(1024) PRIMARY KEY,
        title TEXT NOT NULL UNIQUE,
        description TEXT,
        keywords TEXT[],
        license TEXT,
        providers JSONB,
        extent JSONB,
        temporal JSONB,
        schema_name VARCHAR(63) NOT NULL,
        table_name VARCHAR(63) NOT NULL,
        UNIQUE (schema_name, table_name)
    )",
)];

/// Bring the overlay schema up to the latest version. Failures here are
/// fatal for the source: a partially migrated overlay must not be merged.
pub async fn migrate(client: &Client) -> Result<()> {
    run_ddl(
        client,
        &format!("CREATE SCHEMA IF NOT EXISTS {OVERLAY_SCHEMA_NAME}"),
    )
    .await?;
    run_ddl(
        client,
        &format!(
            "CREATE TABLE IF NOT EXISTS {OVERLAY_SCHEMA_NAME}.{VERSION_TABLE} \
             (version INT PRIMARY KEY, applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW())"
        ),
    )
    .await?;
    let version_sql =
        format!("SELECT COALESCE(MAX(version), 0) FROM {OVERLAY_SCHEMA_NAME}.{VERSION_TABLE}");
    let row = client
        .query_one(version_sql.as_str(), &[])
        .await
        .map_err(|e| DataError::MigrationFailed(format!("failed to read schema version: {e}")))?;
    let current: i32 = row
        .try_get(0)
        .map_err(|e| DataError::MigrationFailed(format!("bad schema version: {e}")))?;

    for (version, ddl) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        debug!("applying overlay migration {version}");
        run_ddl(client, ddl).await?;
        let record_sql =
            format!("INSERT INTO {OVERLAY_SCHEMA_NAME}.{VERSION_TABLE} (version) VALUES ($1)");
        client
            .execute(record_sql.as_str(), &[version])
            .await
            .map_err(|e| {
                DataError::MigrationFailed(format!("failed to record migration {version}: {e}"))
            })?;
        info!("overlay schema migrated to version {version}");
    }
    Ok(())
}

async fn run_ddl(client: &Client, ddl: &str) -> Result<()> {
    client
        .batch_execute(ddl)
        .await
        .map_err(|e| DataError::MigrationFailed(format!("overlay migration failed: {e}")))
}

/// A temporal declaration from the overlay table, naming columns only; the
/// timezone-awareness of each column is resolved against the table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TemporalMapping {
    Instant {
        field: String,
    },
    Range {
        start_field: String,
        end_field: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialExtentOverride {
    pub bbox: Vec<[f64; 4]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalExtentOverride {
    pub interval: Vec<[Option<String>; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtentOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spatial: Option<SpatialExtentOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal: Option<TemporalExtentOverride>,
}

/// One row of the overlay table
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayRecord {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub license: Option<String>,
    pub providers: Option<Vec<ProviderInfo>>,
    pub extent: Option<ExtentOverride>,
    pub temporal: Option<Vec<TemporalMapping>>,
    pub schema_name: String,
    pub table_name: String,
}

/// Read every overlay row. Malformed JSON payloads fail the load; the
/// overlay is operator data and silently dropping a broken row would hide
/// the mistake.
pub async fn load_overlay(client: &Client) -> Result<Vec<OverlayRecord>> {
    let sql = format!(
        "SELECT id, title, description, keywords, license, providers, \
                extent, temporal, schema_name, table_name \
           FROM {OVERLAY_SCHEMA_NAME}.collections"
    );
    let rows = client
        .query(sql.as_str(), &[])
        .await
        .map_err(|e| DataError::SchemaError(format!("failed to read collection overlay: {e}")))?;

    rows.iter()
        .map(|row| {
            let id: String = decode(row, "id")?;
            Ok(OverlayRecord {
                title: decode(row, "title")?,
                description: decode(row, "description")?,
                keywords: decode(row, "keywords")?,
                license: decode(row, "license")?,
                providers: decode_json(row, "providers", &id)?,
                extent: decode_json(row, "extent", &id)?,
                temporal: decode_json(row, "temporal", &id)?,
                schema_name: decode(row, "schema_name")?,
                table_name: decode(row, "table_name")?,
                id,
            })
        })
        .collect()
}

fn decode<'a, T: tokio_postgres::types::FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    column: &str,
) -> Result<T> {
    row.try_get(column)
        .map_err(|e| DataError::SchemaError(format!("bad overlay row ({column}): {e}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(
    row: &tokio_postgres::Row,
    column: &str,
    id: &str,
) -> Result<Option<T>> {
    let value: Option<serde_json::Value> = decode(row, column)?;
    value
        .map(|value| {
            serde_json::from_value(value).map_err(|e| {
                DataError::SchemaError(format!("bad overlay {column} for collection {id}: {e}"))
            })
        })
        .transpose()
}

/// Merge overlay rows into derived layers, field by field. A present value
/// replaces the derived one; the id always replaces. Rows referencing an
/// unknown table are skipped with a warning, but a temporal mapping naming
/// an unknown column fails the merge.
pub fn apply_overlay(
    layers: &mut HashMap<String, Layer>,
    records: &[OverlayRecord],
    default_tz: Tz,
) -> Result<()> {
    for record in records {
        let qualified = format!("{}.{}", record.schema_name, record.table_name);
        let Some(layer) = layers.get_mut(&qualified) else {
            warn!(
                "collection overlay row {} references unknown table {qualified}, skipping",
                record.id
            );
            continue;
        };
        layer.id = record.id.clone();
        if let Some(title) = &record.title {
            layer.title = title.clone();
        }
        if record.description.is_some() {
            layer.description = record.description.clone();
        }
        if record.keywords.is_some() {
            layer.keywords = record.keywords.clone();
        }
        if record.license.is_some() {
            layer.license = record.license.clone();
        }
        if record.providers.is_some() {
            layer.providers = record.providers.clone();
        }
        if let Some(extent) = &record.extent {
            if let Some(spatial) = &extent.spatial {
                layer.bboxes = spatial.bbox.clone();
            }
            if let Some(temporal) = &extent.temporal {
                layer.intervals = temporal.interval.clone();
            }
        }
        if let Some(mappings) = &record.temporal {
            layer.temporal_attributes = resolve_mappings(mappings, layer, default_tz)?;
        }
    }
    Ok(())
}

/// Resolve declared column names into temporal attributes, taking
/// timezone-awareness from the column type.
fn resolve_mappings(
    mappings: &[TemporalMapping],
    layer: &Layer,
    default_tz: Tz,
) -> Result<Vec<TemporalAttribute>> {
    mappings
        .iter()
        .map(|mapping| match mapping {
            TemporalMapping::Instant { field } => Ok(TemporalAttribute::Instant {
                field: field.clone(),
                tz_aware: column_tz_aware(layer, field)?,
                tz: default_tz,
            }),
            TemporalMapping::Range {
                start_field,
                end_field,
            } => Ok(TemporalAttribute::Range {
                start_field: start_field.clone(),
                start_tz_aware: column_tz_aware(layer, start_field)?,
                end_field: end_field.clone(),
                end_tz_aware: column_tz_aware(layer, end_field)?,
                tz: default_tz,
            }),
        })
        .collect()
}

fn column_tz_aware(layer: &Layer, field: &str) -> Result<bool> {
    let column = layer.column(field).ok_or_else(|| {
        DataError::OverlayReference(format!(
            "collection overlay for {} names unknown column {field}",
            layer.qualified_table_name()
        ))
    })?;
    if !column.field_type.is_temporal() {
        return Err(DataError::OverlayReference(format!(
            "collection overlay for {} names non-temporal column {field}",
            layer.qualified_table_name()
        )));
    }
    Ok(column.field_type.is_tz_aware())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{ColumnInfo, FieldType, DEFAULT_BBOX};

    fn derived_layer() -> Layer {
        Layer {
            id: "deadbeef".to_string(),
            title: "events".to_string(),
            description: None,
            bboxes: vec![DEFAULT_BBOX],
            intervals: vec![[None, None]],
            data_source_id: "ds".to_string(),
            schema_name: "public".to_string(),
            table_name: "events".to_string(),
            geometry_field_name: "geom".to_string(),
            geometry_srid: 4326,
            geometry_crs_auth_name: "EPSG".to_string(),
            geometry_crs_auth_code: 4326,
            temporal_attributes: vec![
                TemporalAttribute::Instant {
                    field: "valid_from".to_string(),
                    tz_aware: true,
                    tz: Tz::UTC,
                },
                TemporalAttribute::Instant {
                    field: "valid_to".to_string(),
                    tz_aware: true,
                    tz: Tz::UTC,
                },
            ],
            unique_field_name: "id".to_string(),
            columns: vec![
                ColumnInfo {
                    name: "id".to_string(),
                    field_type: FieldType::Int64,
                },
                ColumnInfo {
                    name: "valid_from".to_string(),
                    field_type: FieldType::TimestampTz,
                },
                ColumnInfo {
                    name: "valid_to".to_string(),
                    field_type: FieldType::TimestampTz,
                },
                ColumnInfo {
                    name: "noted_on".to_string(),
                    field_type: FieldType::Date,
                },
            ],
            license: None,
            keywords: None,
            providers: None,
        }
    }

    fn layers() -> HashMap<String, Layer> {
        HashMap::from([("public.events".to_string(), derived_layer())])
    }

    fn bare_record() -> OverlayRecord {
        OverlayRecord {
            id: "events-collection".to_string(),
            title: None,
            description: None,
            keywords: None,
            license: None,
            providers: None,
            extent: None,
            temporal: None,
            schema_name: "public".to_string(),
            table_name: "events".to_string(),
        }
    }

    #[test]
    fn test_id_always_replaces_other_fields_only_when_present() {
        let mut layers = layers();
        apply_overlay(&mut layers, &[bare_record()], Tz::UTC).unwrap();
        let layer = &layers["public.events"];
        assert_eq!(layer.id, "events-collection");
        // absent overlay fields leave derived values in place
        assert_eq!(layer.title, "events");
        assert_eq!(layer.bboxes, vec![DEFAULT_BBOX]);
        assert_eq!(layer.temporal_attributes.len(), 2);
    }

    #[test]
    fn test_present_fields_replace_derived_values() {
        let mut layers = layers();
        let record = OverlayRecord {
            title: Some("Observed events".to_string()),
            description: Some("Curated".to_string()),
            keywords: Some(vec!["events".to_string()]),
            license: Some("CC-BY-4.0".to_string()),
            extent: Some(ExtentOverride {
                spatial: Some(SpatialExtentOverride {
                    bbox: vec![[140.0, -40.0, 150.0, -30.0]],
                }),
                temporal: None,
            }),
            ..bare_record()
        };
        apply_overlay(&mut layers, &[record], Tz::UTC).unwrap();
        let layer = &layers["public.events"];
        assert_eq!(layer.title, "Observed events");
        assert_eq!(layer.bboxes, vec![[140.0, -40.0, 150.0, -30.0]]);
        // temporal extent was not overridden
        assert_eq!(layer.intervals, vec![[None, None]]);
        assert_eq!(layer.license.as_deref(), Some("CC-BY-4.0"));
    }

    #[test]
    fn test_temporal_mapping_replaces_derived_attributes() {
        let mut layers = layers();
        let record = OverlayRecord {
            temporal: Some(vec![TemporalMapping::Range {
                start_field: "valid_from".to_string(),
                end_field: "valid_to".to_string(),
            }]),
            ..bare_record()
        };
        apply_overlay(&mut layers, &[record], Tz::UTC).unwrap();
        assert_eq!(
            layers["public.events"].temporal_attributes,
            vec![TemporalAttribute::Range {
                start_field: "valid_from".to_string(),
                start_tz_aware: true,
                end_field: "valid_to".to_string(),
                end_tz_aware: true,
                tz: Tz::UTC,
            }]
        );
    }

    #[test]
    fn test_mapping_awareness_comes_from_column_type() {
        let mut layers = layers();
        let record = OverlayRecord {
            temporal: Some(vec![TemporalMapping::Instant {
                field: "noted_on".to_string(),
            }]),
            ..bare_record()
        };
        apply_overlay(&mut layers, &[record], Tz::UTC).unwrap();
        assert_eq!(
            layers["public.events"].temporal_attributes,
            vec![TemporalAttribute::Instant {
                field: "noted_on".to_string(),
                tz_aware: false,
                tz: Tz::UTC,
            }]
        );
    }

    #[test]
    fn test_unknown_column_reference_fails_merge() {
        let mut layers = layers();
        let record = OverlayRecord {
            temporal: Some(vec![TemporalMapping::Instant {
                field: "no_such_column".to_string(),
            }]),
            ..bare_record()
        };
        let err = apply_overlay(&mut layers, &[record], Tz::UTC).unwrap_err();
        assert!(matches!(err, DataError::OverlayReference(_)));
    }

    #[test]
    fn test_non_temporal_column_reference_fails_merge() {
        let mut layers = layers();
        let record = OverlayRecord {
            temporal: Some(vec![TemporalMapping::Instant {
                field: "id".to_string(),
            }]),
            ..bare_record()
        };
        let err = apply_overlay(&mut layers, &[record], Tz::UTC).unwrap_err();
        assert!(matches!(err, DataError::OverlayReference(_)));
    }

    #[test]
    fn test_unknown_table_row_skipped() {
        let mut layers = layers();
        let record = OverlayRecord {
            schema_name: "public".to_string(),
            table_name: "retired_table".to_string(),
            ..bare_record()
        };
        apply_overlay(&mut layers, &[record], Tz::UTC).unwrap();
        // the known layer is untouched
        assert_eq!(layers["public.events"].id, "deadbeef");
    }

    #[test]
    fn test_mapping_json_shape() {
        let mapping: Vec<TemporalMapping> = serde_json::from_value(serde_json::json!([
            {"type": "instant", "field": "noted_on"},
            {"type": "range", "start_field": "valid_from", "end_field": "valid_to"},
        ]))
        .unwrap();
        assert_eq!(
            mapping,
            vec![
                TemporalMapping::Instant {
                    field: "noted_on".to_string()
                },
                TemporalMapping::Range {
                    start_field: "valid_from".to_string(),
                    end_field: "valid_to".to_string()
                },
            ]
        );
    }
}
