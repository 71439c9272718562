//! Catalog introspection: which tables qualify as layers, their columns,
//! and their derived spatial/temporal extents.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio_postgres::Client;
use tracing::{info, warn};

use strata_core::{
    datetime_as_rfc3339, ColumnInfo, DataError, FieldType, Result, TemporalAttribute, DEFAULT_BBOX,
};

use crate::lowering::quote_ident;

/// One eligible table as reported by the catalog query
#[derive(Debug, Clone)]
pub struct RawTableInfo {
    pub schema_name: String,
    pub table_name: String,
    pub qualified_table_name: String,
    pub geometry_field: String,
    pub srid: i32,
    pub auth_name: String,
    pub auth_code: i32,
    pub pk_column: String,
}

/// Enumerates candidate tables: one recognized geometry column, a
/// single-column primary key, and a known SRID. Ineligible tables surface an
/// exclude reason instead of qualifying.
const LAYERS_SQL: &str = r#"
    WITH geometry_tables AS (
        SELECT f_table_schema AS schema_name
             , f_table_name AS table_name
             , COUNT(*) AS geometry_column_count
             , MIN(f_geometry_column) AS geometry_field
             , MIN(srid) AS srid
          FROM geometry_columns
         WHERE f_table_schema NOT IN ('pg_catalog', 'information_schema', 'tiger', 'topology')
         GROUP BY f_table_schema, f_table_name
    ), primary_keys AS (
        SELECT tc.table_schema AS schema_name
             , tc.table_name
             , COUNT(kcu.column_name) AS pk_column_count
             , MIN(kcu.column_name) AS pk_column
          FROM information_schema.table_constraints tc
          JOIN information_schema.key_column_usage kcu
            ON kcu.constraint_name = tc.constraint_name
           AND kcu.table_schema = tc.table_schema
           AND kcu.table_name = tc.table_name
         WHERE tc.constraint_type = 'PRIMARY KEY'
         GROUP BY tc.table_schema, tc.table_name
    )
    SELECT gt.schema_name
         , gt.table_name
         , gt.schema_name || '.' || gt.table_name AS qualified_table_name
         , gt.geometry_field
         , gt.srid
         , srs.auth_name
         , srs.auth_srid AS auth_code
         , pk.pk_column
         , CASE
             WHEN gt.geometry_column_count > 1 THEN 'multiple geometry columns'
             WHEN pk.pk_column_count IS NULL THEN 'no primary key'
             WHEN pk.pk_column_count > 1 THEN 'composite primary key'
             WHEN srs.srid IS NULL THEN 'unknown SRID'
           END AS exclude_reason
      FROM geometry_tables gt
      LEFT JOIN primary_keys pk
        ON pk.schema_name = gt.schema_name
       AND pk.table_name = gt.table_name
      LEFT JOIN spatial_ref_sys srs
        ON srs.srid = gt.srid
     ORDER BY qualified_table_name
"#;

/// All tables eligible as layers, keyed by qualified table name.
pub async fn compatible_tables(
    client: &Client,
    allow_list: &HashSet<String>,
    deny_list: &HashSet<String>,
) -> Result<HashMap<String, RawTableInfo>> {
    let rows = client
        .query(LAYERS_SQL, &[])
        .await
        .map_err(|e| DataError::SchemaError(format!("failed to enumerate tables: {e}")))?;

    let mut tables = HashMap::new();
    for row in rows {
        let qualified: String = row
            .try_get("qualified_table_name")
            .map_err(|e| DataError::SchemaError(format!("bad catalog row: {e}")))?;
        let exclude_reason: Option<String> = row
            .try_get("exclude_reason")
            .map_err(|e| DataError::SchemaError(format!("bad catalog row: {e}")))?;
        if let Some(reason) = exclude_reason {
            info!("{qualified} not supported: {reason}");
            continue;
        }
        if !table_permitted(allow_list, deny_list, &qualified) {
            continue;
        }
        let info = RawTableInfo {
            schema_name: get(&row, "schema_name")?,
            table_name: get(&row, "table_name")?,
            qualified_table_name: qualified.clone(),
            geometry_field: get(&row, "geometry_field")?,
            srid: get(&row, "srid")?,
            auth_name: get(&row, "auth_name")?,
            auth_code: get(&row, "auth_code")?,
            pk_column: get(&row, "pk_column")?,
        };
        tables.insert(qualified, info);
    }
    Ok(tables)
}

fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    column: &str,
) -> Result<T> {
    row.try_get(column)
        .map_err(|e| DataError::SchemaError(format!("bad catalog row ({column}): {e}")))
}

/// Apply the allow/deny policy to one qualified table name. When both lists
/// are configured neither is applied and everything passes.
pub fn table_permitted(
    allow_list: &HashSet<String>,
    deny_list: &HashSet<String>,
    qualified_table_name: &str,
) -> bool {
    if !allow_list.is_empty() && !deny_list.is_empty() {
        warn!(
            "layer allow list and deny list are both defined, neither will \
             be applied. Only one should be defined"
        );
        return true;
    }
    let permitted = if !allow_list.is_empty() {
        allow_list.contains(qualified_table_name)
    } else if !deny_list.is_empty() {
        !deny_list.contains(qualified_table_name)
    } else {
        true
    };
    if !permitted {
        info!("{qualified_table_name} not permitted by allow/deny list");
    }
    permitted
}

/// Map a postgres udt name to a field type
pub fn map_pg_type(udt_name: &str) -> FieldType {
    match udt_name {
        "bool" => FieldType::Boolean,
        "int2" | "int4" => FieldType::Int32,
        "int8" => FieldType::Int64,
        "float4" => FieldType::Float32,
        "float8" | "numeric" => FieldType::Float64,
        "varchar" | "bpchar" | "text" => FieldType::String,
        "bytea" => FieldType::Bytes,
        "date" => FieldType::Date,
        "timestamp" => FieldType::Timestamp,
        "timestamptz" => FieldType::TimestampTz,
        "json" | "jsonb" => FieldType::Json,
        "uuid" => FieldType::Uuid,
        "geometry" | "geography" => FieldType::Geometry,
        _ => FieldType::Other,
    }
}

/// Column names and types of one table, in ordinal order.
pub async fn table_columns(
    client: &Client,
    schema_name: &str,
    table_name: &str,
) -> Result<Vec<ColumnInfo>> {
    let rows = client
        .query(
            "SELECT column_name, udt_name \
               FROM information_schema.columns \
              WHERE table_schema = $1 AND table_name = $2 \
              ORDER BY ordinal_position",
            &[&schema_name, &table_name],
        )
        .await
        .map_err(|e| {
            DataError::SchemaError(format!(
                "failed to read columns of {schema_name}.{table_name}: {e}"
            ))
        })?;
    rows.iter()
        .map(|row| {
            let udt_name: String = get(row, "udt_name")?;
            Ok(ColumnInfo {
                name: get(row, "column_name")?,
                field_type: map_pg_type(&udt_name),
            })
        })
        .collect()
}

/// Every timestamp or date column becomes a derived instant attribute,
/// tagged with the timezone-awareness of its declared type.
pub fn derive_temporal_attributes(columns: &[ColumnInfo], tz: Tz) -> Vec<TemporalAttribute> {
    columns
        .iter()
        .filter(|column| column.field_type.is_temporal())
        .map(|column| TemporalAttribute::Instant {
            field: column.name.clone(),
            tz_aware: column.field_type.is_tz_aware(),
            tz,
        })
        .collect()
}

/// Min/max of the table's geometry, transformed to EPSG:4326. Falls back to
/// the default full-extent bbox when the aggregate yields any null.
pub async fn spatial_extent(client: &Client, table: &RawTableInfo) -> Result<[f64; 4]> {
    let sql = format!(
        r#"
        WITH extents AS (
          SELECT ST_Transform(
                   ST_SetSRID(
                     ST_MakePoint(
                       MIN(ST_XMin({geometry}::geometry)),
                       MIN(ST_YMin({geometry}::geometry))
                     ), {srid}
                   ), 4326
                 ) ll
               , ST_Transform(
                   ST_SetSRID(
                     ST_MakePoint(
                       MAX(ST_XMax({geometry}::geometry)),
                       MAX(ST_YMax({geometry}::geometry))
                     ), {srid}
                   ), 4326
                 ) ur
            FROM {schema}.{table}
        )
        SELECT ST_X(ll) x_min
             , ST_Y(ll) y_min
             , ST_X(ur) x_max
             , ST_Y(ur) y_max
          FROM extents
        "#,
        geometry = quote_ident(&table.geometry_field),
        srid = table.srid,
        schema = quote_ident(&table.schema_name),
        table = quote_ident(&table.table_name),
    );
    let row = client.query_one(sql.as_str(), &[]).await.map_err(|e| {
        DataError::SchemaError(format!(
            "failed to derive spatial extent of {}: {e}",
            table.qualified_table_name
        ))
    })?;
    let corner = |index: usize| -> Result<Option<f64>> {
        row.try_get(index).map_err(|e| {
            DataError::SchemaError(format!(
                "failed to decode spatial extent of {}: {e}",
                table.qualified_table_name
            ))
        })
    };
    Ok(bbox_from_corners([
        corner(0)?,
        corner(1)?,
        corner(2)?,
        corner(3)?,
    ]))
}

/// The derived bbox, or the default full extent when any aggregate came
/// back NULL (empty table, or all geometries null).
pub fn bbox_from_corners(corners: [Option<f64>; 4]) -> [f64; 4] {
    match corners {
        [Some(x_min), Some(y_min), Some(x_max), Some(y_max)] => [x_min, y_min, x_max, y_max],
        _ => DEFAULT_BBOX,
    }
}

/// Per-layer temporal extent: the union of min/max observations across all
/// temporal attributes, as an RFC3339 [start, end] pair.
pub async fn temporal_extent(
    client: &Client,
    table: &RawTableInfo,
    columns: &[ColumnInfo],
    attributes: &[TemporalAttribute],
    tz: Tz,
) -> Result<[Option<String>; 2]> {
    let mut observations = Vec::new();
    for attribute in attributes {
        let field = match attribute {
            TemporalAttribute::Instant { field, .. } => field,
            // derived attributes are always instants; ranges only arrive via
            // overlay mapping after extents are computed
            TemporalAttribute::Range { .. } => continue,
        };
        let field_type = columns
            .iter()
            .find(|c| &c.name == field)
            .map(|c| c.field_type)
            .ok_or_else(|| {
                DataError::SchemaError(format!(
                    "temporal attribute {field} missing from {}",
                    table.qualified_table_name
                ))
            })?;
        let sql = format!(
            "SELECT MIN({field}) , MAX({field}) FROM {schema}.{table}",
            field = quote_ident(field),
            schema = quote_ident(&table.schema_name),
            table = quote_ident(&table.table_name),
        );
        let row = client.query_one(sql.as_str(), &[]).await.map_err(|e| {
            DataError::SchemaError(format!(
                "failed to derive temporal extent of {}: {e}",
                table.qualified_table_name
            ))
        })?;
        let min = decode_temporal(&row, 0, field_type, tz)?;
        let max = decode_temporal(&row, 1, field_type, tz)?;
        observations.push((min, max));
    }
    Ok(union_extent(&observations))
}

/// Union per-attribute observations: min of mins, max of maxes, nulls
/// meaning no bound observed.
pub fn union_extent(
    observations: &[(Option<DateTime<Utc>>, Option<DateTime<Utc>>)],
) -> [Option<String>; 2] {
    let start = observations.iter().filter_map(|(min, _)| *min).min();
    let end = observations.iter().filter_map(|(_, max)| *max).max();
    [
        start.map(|instant| datetime_as_rfc3339(&instant)),
        end.map(|instant| datetime_as_rfc3339(&instant)),
    ]
}

fn decode_temporal(
    row: &tokio_postgres::Row,
    index: usize,
    field_type: FieldType,
    tz: Tz,
) -> Result<Option<DateTime<Utc>>> {
    let value = match field_type {
        FieldType::TimestampTz => row
            .try_get::<_, Option<DateTime<Utc>>>(index)
            .map_err(decode_err)?,
        FieldType::Timestamp => row
            .try_get::<_, Option<NaiveDateTime>>(index)
            .map_err(decode_err)?
            .map(|naive| localize(naive, tz)),
        FieldType::Date => row
            .try_get::<_, Option<NaiveDate>>(index)
            .map_err(decode_err)?
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| localize(naive, tz)),
        other => {
            return Err(DataError::SchemaError(format!(
                "column type {other:?} is not temporal"
            )))
        }
    };
    Ok(value)
}

fn decode_err(e: tokio_postgres::Error) -> DataError {
    DataError::SchemaError(format!("failed to decode temporal bound: {e}"))
}

/// Interpret a timezone-naive stored value in the source's default timezone
/// so it can be compared with and rendered alongside aware values.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| DateTime::from_naive_utc_and_offset(naive, Utc))
}
