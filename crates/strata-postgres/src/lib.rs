//! PostGIS-backed data source.
//!
//! Discovers layers from `geometry_columns` (one geometry column and a
//! single-column primary key per table), derives spatial and temporal
//! extents, merges operator metadata from the managed overlay table, and
//! lowers predicate trees to parameterized SQL executed over a shared
//! tokio-postgres connection.

pub mod feature;
pub mod feature_set;
pub mod introspect;
pub mod lowering;
pub mod overlay;
pub mod settings;
pub mod source;

pub use feature::PostgresFeatureProvider;
pub use feature_set::PostgresFeatureSetProvider;
pub use lowering::{lower_filter, SqlPredicate, SqlValue};
pub use overlay::{OverlayRecord, TemporalMapping};
pub use settings::{source_names, SourceSettings, ENV_VAR_PREFIX, OVERLAY_SCHEMA_NAME};
pub use source::{derive_layer_id, PostgresDataSource, PostgresSourceFactory};
