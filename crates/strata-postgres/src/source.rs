//! The postgres data source: one connection, its discovered layers, and the
//! per-request providers that query through it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_postgres::NoTls;
use tracing::{error, info};

use strata_core::{
    DataError, DataSource, DataSourceFactory, FeatureProvider, FeatureSetProvider, FilterNode,
    ItemConstraints, Layer, Result,
};

use crate::feature::PostgresFeatureProvider;
use crate::feature_set::{connected, PostgresFeatureSetProvider, SharedClient};
use crate::introspect;
use crate::lowering::{lower_filter, quote_ident};
use crate::overlay;
use crate::settings::{source_names, SourceSettings};

/// Stable layer identity: connection name (empty when unnamed) and qualified
/// table name, hashed. Survives restarts, distinct across connections that
/// expose identically named tables.
pub fn derive_layer_id(connection_name: Option<&str>, qualified_table_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(connection_name.unwrap_or_default().as_bytes());
    hasher.update(b"/");
    hasher.update(qualified_table_name.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct PostgresDataSource {
    id: String,
    name: String,
    settings: SourceSettings,
    client: SharedClient,
    connection_task: Mutex<Option<JoinHandle<()>>>,
}

impl PostgresDataSource {
    pub fn new(settings: SourceSettings) -> Self {
        let name = match &settings.name {
            Some(name) => format!("postgresql:{name}"),
            None => "postgresql".to_string(),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            settings,
            client: Arc::new(RwLock::new(None)),
            connection_task: Mutex::new(None),
        }
    }

    fn default_tz(&self) -> Result<Tz> {
        self.settings.default_tz.parse::<Tz>().map_err(|_| {
            DataError::InvalidConfiguration(format!(
                "unknown default timezone {} for source {}",
                self.settings.default_tz, self.name
            ))
        })
    }

    async fn connect(&self) -> Result<()> {
        let config = self.settings.connection_config();
        let endpoint = self.settings.display_name();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match tokio_postgres::connect(&config, NoTls).await {
                Ok((client, connection)) => {
                    let task_endpoint = endpoint.clone();
                    let handle = tokio::spawn(async move {
                        if let Err(e) = connection.await {
                            error!("connection to {task_endpoint} failed: {e}");
                        }
                    });
                    *self.client.write().await = Some(client);
                    *self.connection_task.lock().await = Some(handle);
                    info!("connected to {endpoint}");
                    return Ok(());
                }
                Err(e) if attempt < self.settings.connect_retries => {
                    info!(
                        "connection attempt {attempt}/{} to {endpoint} failed: {e}",
                        self.settings.connect_retries
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    return Err(DataError::ConnectionFailed(format!(
                        "gave up connecting to {endpoint} after {attempt} attempts: {e}"
                    )));
                }
            }
        }
    }

    async fn build_layer(
        &self,
        client: &tokio_postgres::Client,
        table: &introspect::RawTableInfo,
        tz: Tz,
    ) -> Result<Layer> {
        let columns = introspect::table_columns(client, &table.schema_name, &table.table_name)
            .await?;
        let temporal_attributes = introspect::derive_temporal_attributes(&columns, tz);
        let bbox = introspect::spatial_extent(client, table).await?;
        let interval =
            introspect::temporal_extent(client, table, &columns, &temporal_attributes, tz).await?;
        Ok(Layer {
            id: derive_layer_id(self.settings.name.as_deref(), &table.qualified_table_name),
            title: table.table_name.clone(),
            description: None,
            bboxes: vec![bbox],
            intervals: vec![interval],
            data_source_id: self.id.clone(),
            schema_name: table.schema_name.clone(),
            table_name: table.table_name.clone(),
            geometry_field_name: table.geometry_field.clone(),
            geometry_srid: table.srid,
            geometry_crs_auth_name: table.auth_name.clone(),
            geometry_crs_auth_code: table.auth_code,
            temporal_attributes,
            unique_field_name: table.pk_column.clone(),
            columns,
            license: None,
            keywords: None,
            providers: None,
        })
    }
}

#[async_trait]
impl DataSource for PostgresDataSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        // fail fast on bad configuration before any connection attempt
        self.default_tz()?;
        self.connect().await?;
        if self.settings.manage_collections {
            let guard = self.client.read().await;
            overlay::migrate(connected(&guard)?).await?;
        }
        Ok(())
    }

    async fn get_layers(&self) -> Result<Vec<Layer>> {
        let tz = self.default_tz()?;
        let guard = self.client.read().await;
        let client = connected(&guard)?;
        let tables = introspect::compatible_tables(
            client,
            &self.settings.allow_list,
            &self.settings.deny_list,
        )
        .await?;

        let mut layers: HashMap<String, Layer> = HashMap::new();
        for (qualified, table) in &tables {
            let layer = self.build_layer(client, table, tz).await?;
            layers.insert(qualified.clone(), layer);
        }

        if self.settings.manage_collections {
            let records = overlay::load_overlay(client).await?;
            overlay::apply_overlay(&mut layers, &records, tz)?;
        }

        info!("{} exposes {} layers", self.name, layers.len());
        Ok(layers.into_values().collect())
    }

    async fn get_feature_set_provider(
        &self,
        layer: &Layer,
        constraints: ItemConstraints,
        filter: Option<&FilterNode>,
    ) -> Result<Box<dyn FeatureSetProvider>> {
        let predicate = lower_filter(filter);
        let id_set_sql = format!(
            "SELECT {pk} AS id FROM {schema}.{table} WHERE {clause} \
             ORDER BY {pk} LIMIT {limit} OFFSET {offset}",
            pk = quote_ident(&layer.unique_field_name),
            schema = quote_ident(&layer.schema_name),
            table = quote_ident(&layer.table_name),
            clause = predicate.clause,
            limit = constraints.limit,
            offset = constraints.offset,
        );
        let count_sql = format!(
            "SELECT COUNT(*) FROM {schema}.{table} WHERE {clause}",
            schema = quote_ident(&layer.schema_name),
            table = quote_ident(&layer.table_name),
            clause = predicate.clause,
        );
        let guard = self.client.read().await;
        let row = connected(&guard)?
            .query_one(count_sql.as_str(), &predicate.param_refs())
            .await
            .map_err(|e| DataError::QueryFailed(format!("count query failed: {e}")))?;
        let total_count: i64 = row
            .try_get(0)
            .map_err(|e| DataError::QueryFailed(format!("bad count row: {e}")))?;

        Ok(Box::new(PostgresFeatureSetProvider {
            client: Arc::clone(&self.client),
            layer: layer.clone(),
            id_set_sql,
            predicate,
            total_count,
        }))
    }

    async fn get_feature_provider(&self, layer: &Layer) -> Result<Box<dyn FeatureProvider>> {
        Ok(Box::new(PostgresFeatureProvider {
            client: Arc::clone(&self.client),
            layer: layer.clone(),
        }))
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(handle) = self.connection_task.lock().await.take() {
            handle.abort();
        }
        if self.client.write().await.take().is_some() {
            info!("disconnected from {}", self.settings.display_name());
        }
        Ok(())
    }
}

/// Creates one postgres source per configured connection name.
pub struct PostgresSourceFactory;

impl DataSourceFactory for PostgresSourceFactory {
    fn source_type(&self) -> &'static str {
        "postgres"
    }

    fn create_sources(&self) -> Result<Vec<Arc<dyn DataSource>>> {
        Ok(source_names()
            .into_iter()
            .map(|name| {
                let settings = SourceSettings::from_env(name.as_deref());
                Arc::new(PostgresDataSource::new(settings)) as Arc<dyn DataSource>
            })
            .collect())
    }
}
