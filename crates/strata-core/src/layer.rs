use serde::{Deserialize, Serialize};

use crate::temporal::TemporalAttribute;

/// Full-extent bbox used when a table has no usable geometry extent.
pub const DEFAULT_BBOX: [f64; 4] = [-180.0, -90.0, 180.0, 90.0];

/// Field data types recognized in layer columns
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
    /// Calendar date, no time component
    Date,
    /// Timestamp without time zone
    Timestamp,
    /// Timestamp with time zone
    TimestampTz,
    Json,
    Uuid,
    Geometry,
    /// Anything else; compared via text cast when used as a key
    Other,
}

impl FieldType {
    /// Whether columns of this type become derived temporal attributes
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            FieldType::Date | FieldType::Timestamp | FieldType::TimestampTz
        )
    }

    /// Whether stored values carry timezone information
    pub fn is_tz_aware(&self) -> bool {
        matches!(self, FieldType::TimestampTz)
    }
}

/// Definition of a single column in a layer's table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub field_type: FieldType,
}

/// A data provider attribution entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub url: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

/// A queryable collection exposed by a data source: a table plus derived and
/// overridden metadata.
///
/// Layers are built wholesale by `discover()` and replaced wholesale by the
/// next; nothing mutates a layer in place between discoveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// Stable identifier; derived from connection name + qualified table
    /// name unless overridden by overlay metadata
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    /// Extent bboxes as [min_x, min_y, max_x, max_y] in EPSG:4326;
    /// exactly one entry when derived
    pub bboxes: Vec<[f64; 4]>,
    /// Temporal extent as [start, end] RFC3339 pairs; a null entry means
    /// no bound observed
    pub intervals: Vec<[Option<String>; 2]>,
    pub data_source_id: String,
    pub schema_name: String,
    pub table_name: String,
    pub geometry_field_name: String,
    /// SRID of the stored geometry, attached to spatial predicates
    pub geometry_srid: i32,
    pub geometry_crs_auth_name: String,
    pub geometry_crs_auth_code: i32,
    pub temporal_attributes: Vec<TemporalAttribute>,
    /// The single primary-key column; tables without exactly one are not
    /// eligible as layers
    pub unique_field_name: String,
    pub columns: Vec<ColumnInfo>,
    pub license: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub providers: Option<Vec<ProviderInfo>>,
}

impl Layer {
    pub fn qualified_table_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }

    /// Native CRS identity, e.g. "EPSG:4326"
    pub fn crs_identifier(&self) -> String {
        format!(
            "{}:{}",
            self.geometry_crs_auth_name, self.geometry_crs_auth_code
        )
    }

    pub fn queryable_field_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Type of the unique field, for feature-id coercion
    pub fn unique_field_type(&self) -> FieldType {
        self.column(&self.unique_field_name)
            .map(|c| c.field_type)
            .unwrap_or(FieldType::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporal_field_types() {
        assert!(FieldType::Date.is_temporal());
        assert!(FieldType::Timestamp.is_temporal());
        assert!(FieldType::TimestampTz.is_temporal());
        assert!(!FieldType::String.is_temporal());
        assert!(FieldType::TimestampTz.is_tz_aware());
        assert!(!FieldType::Timestamp.is_tz_aware());
        assert!(!FieldType::Date.is_tz_aware());
    }
}
