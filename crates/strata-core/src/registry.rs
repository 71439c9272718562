//! The authoritative, swappable snapshot of all layers exposed by the
//! configured data sources.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::error::DataError;
use crate::layer::Layer;
use crate::traits::{DataSource, DataSourceFactory};

/// Outcome of one discovery round. Per-source failures are isolated: a
/// failed source contributes no layers but never aborts the round.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub layer_count: usize,
    pub failed_sources: Vec<(String, DataError)>,
}

/// Registry of data sources and their merged layer snapshot.
///
/// Reads (`get_layer`, `get_layers`) run concurrently against the current
/// snapshot. `discover()` rebuilds everything into fresh maps and swaps them
/// in whole, so readers observe either the previous snapshot or the new one,
/// never a partial mix. Concurrent `discover()` calls are not supported and
/// must be externally serialized.
pub struct LayerRegistry {
    factories: RwLock<Vec<Arc<dyn DataSourceFactory>>>,
    sources: RwLock<HashMap<String, Arc<dyn DataSource>>>,
    layers: RwLock<HashMap<String, Layer>>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(Vec::new()),
            sources: RwLock::new(HashMap::new()),
            layers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_factory(&self, factory: Arc<dyn DataSourceFactory>) {
        self.factories.write().await.push(factory);
    }

    /// Disconnect and discard all previous data sources, construct fresh
    /// instances from the registered factories, initialize them, and publish
    /// the rebuilt layer set atomically.
    pub async fn discover(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let factories: Vec<Arc<dyn DataSourceFactory>> =
            self.factories.read().await.iter().cloned().collect();

        {
            let mut sources = self.sources.write().await;
            for (_, source) in sources.drain() {
                if let Err(e) = source.disconnect().await {
                    warn!("error disconnecting {}: {}", source.name(), e);
                }
            }
        }

        let mut new_sources: HashMap<String, Arc<dyn DataSource>> = HashMap::new();
        for factory in factories {
            match factory.create_sources() {
                Ok(sources) => {
                    for source in sources {
                        new_sources.insert(source.id().to_string(), source);
                    }
                }
                Err(e) => {
                    error!(
                        "error creating data sources for backend {}: {}",
                        factory.source_type(),
                        e
                    );
                    report
                        .failed_sources
                        .push((factory.source_type().to_string(), e));
                }
            }
        }

        let mut new_layers: HashMap<String, Layer> = HashMap::new();
        for source in new_sources.values() {
            info!("initializing data source {}", source.name());
            if let Err(e) = source.initialize().await {
                error!("error initializing {}: {}", source.name(), e);
                report.failed_sources.push((source.name().to_string(), e));
                continue;
            }
            info!("configuring layers in {}", source.name());
            let layers = match source.get_layers().await {
                Ok(layers) => layers,
                Err(e) => {
                    error!("error configuring layers for {}: {}", source.name(), e);
                    report.failed_sources.push((source.name().to_string(), e));
                    continue;
                }
            };
            for layer in layers {
                if new_layers.contains_key(&layer.id) {
                    // known, accepted ambiguity: latest source wins
                    warn!(
                        "layer ID clash on {}, latest wins ({})",
                        layer.id,
                        source.name()
                    );
                }
                new_layers.insert(layer.id.clone(), layer);
            }
        }
        report.layer_count = new_layers.len();

        *self.sources.write().await = new_sources;
        *self.layers.write().await = new_layers;
        report
    }

    pub async fn get_layer(&self, layer_id: &str) -> Option<Layer> {
        self.layers.read().await.get(layer_id).cloned()
    }

    pub async fn get_layers(&self) -> Vec<Layer> {
        self.layers.read().await.values().cloned().collect()
    }

    pub async fn get_data_source(&self, data_source_id: &str) -> Option<Arc<dyn DataSource>> {
        self.sources.read().await.get(data_source_id).cloned()
    }

    /// Disconnect all live data sources without rebuilding layers; used at
    /// process shutdown.
    pub async fn cleanup(&self) {
        let mut sources = self.sources.write().await;
        for (_, source) in sources.drain() {
            if let Err(e) = source.disconnect().await {
                warn!("error disconnecting {}: {}", source.name(), e);
            }
        }
    }
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
