//! # strata-core
//!
//! Backend-agnostic core for exposing geospatial datasets as queryable
//! feature collections: layer discovery, temporal semantics, filter
//! translation, and the registry request handlers read from.
//!
//! ## Architecture
//!
//! - **Layer / TemporalAttribute**: schema-derived (and overlay-overridden)
//!   metadata describing one queryable collection and how its time
//!   dimension is stored
//! - **FilterNode / build_predicate**: translation of bbox + datetime
//!   constraints into a backend-agnostic predicate tree
//! - **DataSource / FeatureProvider / FeatureSetProvider**: capability
//!   traits a backend implements
//! - **LayerRegistry**: atomic, swappable snapshot of all layers across
//!   data sources
//!
//! Backend crates (e.g. `strata-postgres`) implement the traits and lower
//! `FilterNode` to native queries.

pub mod error;
pub mod filter;
pub mod layer;
pub mod pagination;
pub mod registry;
pub mod temporal;
pub mod traits;
pub mod util;

// Re-export commonly used items
pub use error::{DataError, Result};
pub use filter::{build_predicate, FilterNode, SpatialBound, TemporalBound};
pub use layer::{ColumnInfo, FieldType, Layer, ProviderInfo, DEFAULT_BBOX};
pub use pagination::{ItemConstraints, Link, PageLinkGenerator, PageLinkRel, PageLinks};
pub use registry::{DiscoveryReport, LayerRegistry};
pub use temporal::{align_query_time, TemporalAttribute, TimeLiteral};
pub use traits::{
    DataRow, DataSource, DataSourceFactory, FeatureProvider, FeatureRow, FeatureSetProvider,
    FeatureSetRows,
};
pub use util::{datetime_as_rfc3339, now_as_rfc3339};
