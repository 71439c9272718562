use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::filter::FilterNode;
use crate::layer::Layer;
use crate::pagination::{ItemConstraints, Link, PageLinkGenerator};

/// A row of data as key-value pairs
pub type DataRow = HashMap<String, serde_json::Value>;

/// Row-oriented feature-set output for rendering layers that want columns
/// instead of encoded GeoJSON
#[derive(Debug, Clone)]
pub struct FeatureSetRows {
    pub collection_id: String,
    pub unique_field_name: String,
    pub features: Vec<DataRow>,
    pub format_links: Vec<Link>,
    pub prev_link: Option<Link>,
    pub next_link: Option<Link>,
}

/// Row-oriented single-feature output
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub collection_id: String,
    pub feature_id: String,
    pub format_links: Vec<Link>,
    pub properties: BTreeMap<String, String>,
}

/// Counted, paginated retrieval over one layer, constructed per request.
///
/// Different data sources can customise how they return features in a given
/// format; a source with native encoding support may bypass any common
/// intermediate representation.
#[async_trait]
pub trait FeatureSetProvider: Send + Sync {
    /// Encode the page as a GeoJSON feature collection with pagination
    /// metadata and links.
    async fn as_geojson(&self, links: Vec<Link>, page_links: &PageLinkGenerator)
        -> Result<String>;

    /// Return the page row-oriented, minus the geometry column.
    async fn as_rows(
        &self,
        links: Vec<Link>,
        page_links: &PageLinkGenerator,
    ) -> Result<FeatureSetRows>;
}

/// Single-feature retrieval by id; `None` means not found.
#[async_trait]
pub trait FeatureProvider: Send + Sync {
    async fn as_geojson(&self, feature_id: &str, links: Vec<Link>) -> Result<Option<String>>;

    async fn as_row(&self, feature_id: &str, links: Vec<Link>) -> Result<Option<FeatureRow>>;
}

/// One backend connection context owning zero or more layers.
///
/// Instances are created by discovery and replaced wholesale by the next
/// discovery; the connection is owned exclusively by its instance and
/// borrowed by providers for the duration of one logical query.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Stable instance identity, assigned at construction
    fn id(&self) -> &str;

    /// Connection name used for per-source configuration
    fn name(&self) -> &str;

    /// Connect (bounded retries) and prepare the source; may run overlay
    /// schema migration. Failure is fatal for this source only.
    async fn initialize(&self) -> Result<()>;

    /// Introspect the backend and merge overlay metadata into the full
    /// layer set for this source.
    async fn get_layers(&self) -> Result<Vec<Layer>>;

    async fn get_feature_set_provider(
        &self,
        layer: &Layer,
        constraints: ItemConstraints,
        filter: Option<&FilterNode>,
    ) -> Result<Box<dyn FeatureSetProvider>>;

    async fn get_feature_provider(&self, layer: &Layer) -> Result<Box<dyn FeatureProvider>>;

    async fn disconnect(&self) -> Result<()>;
}

/// Factory producing the configured data sources of one backend type
pub trait DataSourceFactory: Send + Sync {
    /// Backend type identifier (postgres, ...)
    fn source_type(&self) -> &'static str;

    /// Create one data source per configured connection name
    fn create_sources(&self) -> Result<Vec<Arc<dyn DataSource>>>;
}
