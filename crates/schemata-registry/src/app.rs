//! Topology assembly
//!
//! Chooses every collaborator once, from configuration, and wires them:
//!
//! | log endpoints | backend path | writer                      | reads            |
//! |---------------|--------------|-----------------------------|------------------|
//! | none          | any          | `NullWriter`                | cache (+backend) |
//! | some          | none         | `LogWriter`                 | cache            |
//! | some          | some         | `MultiWriter` (log+backend) | cache, backend   |

use crate::compat::CompatibilityRules;
use crate::gate::{TenancyMode, TenantGate};
use crate::service::RegistryService;
use derive_more::Display;
use schemata_auth::TokenStore;
use schemata_common::RegistryConfig;
use schemata_storage::{
    BackendError, CachedStorage, CombinedStorage, LogWriter, MemoryCache, MultiWriter,
    NullWatcher, NullWriter, RedbBackend, ReplayConfig, ReplayEngine, SchemaWriter, Storage,
    TransportError, Watcher, open_transport,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors raised while assembling the registry
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("log transport: {0}")]
    Transport(#[from] TransportError),

    #[error("durable backend: {0}")]
    Backend(#[from] BackendError),
}

/// Storage topology selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Topology {
    /// Log and cache only
    #[display("log+cache")]
    LogCache,
    /// Log, durable backend and cache
    #[display("log+backend+cache")]
    LogBackendCache,
}

/// A fully wired registry instance
pub struct Registry {
    pub topology: Topology,
    pub storage: Arc<dyn Storage>,
    pub cache: Arc<MemoryCache>,
    pub gate: TenantGate,
    pub service: RegistryService,
    replay: Option<Arc<ReplayEngine>>,
}

impl Registry {
    /// Whether a log is configured (false in log-less mode)
    #[must_use]
    pub const fn has_log(&self) -> bool {
        self.replay.is_some()
    }

    /// Streams currently replayed
    pub fn replayed_streams(&self) -> Vec<String> {
        self.replay
            .as_ref()
            .map(|engine| engine.streams())
            .unwrap_or_default()
    }

    /// Stop every replay task
    pub fn shutdown(&self) {
        if let Some(engine) = &self.replay {
            engine.shutdown();
        }
    }
}

/// Assemble a registry from configuration.
///
/// Opening the durable backend retries with a blocking sleep; call this
/// from a blocking context when a backend is configured.
pub fn assemble(
    config: &RegistryConfig,
    tokens: Arc<dyn TokenStore>,
) -> Result<Registry, AssembleError> {
    let cache = Arc::new(MemoryCache::new());

    let (writer, replay): (Arc<dyn SchemaWriter>, Option<Arc<ReplayEngine>>) =
        if config.log.is_enabled() {
            let transport = open_transport(&config.log.endpoints, config.log.sync_on_write)?;
            let replay = ReplayEngine::new(
                Arc::clone(&transport),
                cache.clone(),
                ReplayConfig {
                    poll_interval: config.log.poll_interval(),
                    fetch_batch: config.log.fetch_batch,
                },
            );
            (Arc::new(LogWriter::new(transport)), Some(Arc::new(replay)))
        } else {
            info!("No log endpoints configured, running log-less");
            (Arc::new(NullWriter), None)
        };

    let (topology, storage): (Topology, Arc<dyn Storage>) = match &config.backend.path {
        Some(path) => {
            let backend = Arc::new(RedbBackend::connect(
                path,
                config.backend.connect_attempts,
                config.backend.retry_delay(),
            )?);
            let writer = Arc::new(MultiWriter::new(writer, backend.clone()));
            (
                Topology::LogBackendCache,
                Arc::new(CachedStorage::new(writer, cache.clone(), backend)),
            )
        }
        None => (
            Topology::LogCache,
            Arc::new(CombinedStorage::new(writer, cache.clone(), cache.clone())),
        ),
    };
    info!("Storage topology: {}", topology);

    let watcher: Arc<dyn Watcher> = match &replay {
        Some(engine) => engine.clone(),
        None => Arc::new(NullWatcher),
    };

    let mode = if config.tenancy.multi_tenant {
        TenancyMode::Multi
    } else {
        TenancyMode::Single {
            tenant: config.tenancy.default_tenant.clone(),
        }
    };

    let gate = TenantGate::new(mode, Arc::clone(&storage), tokens, watcher);
    let service = RegistryService::new(
        Arc::clone(&storage),
        CompatibilityRules::record_fields(),
        config.compatibility.default_level,
    );

    Ok(Registry {
        topology,
        storage,
        cache,
        gate,
        service,
        replay,
    })
}
