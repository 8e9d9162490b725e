//! Accepts client connections and runs a session for each of them.

use std::sync::Arc;

use anyhow::Result;
use anyhow::bail;
use dhs_protocol::DhsServer;
use dhs_protocol::compat::CompatibilityTable;
use dhs_protocol::compat::ThreadingModel;
use log::info;
use log::warn;
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::scheduling::PooledScheduler;
use crate::scheduling::RegionOwnerTable;
use crate::scheduling::RegionScheduler;
use crate::scheduling::RegionizedScheduler;
use crate::session::ClientSession;
use crate::session::LodOutcome;
use crate::session::SessionContext;
use crate::stats::BridgeStats;
use crate::world::WorldDataProvider;
use crate::world::cache::CachingProvider;
use crate::world::cache::LodCache;

/// The bridge between a host's world data and Distant Horizons clients.
pub struct BridgeServer {
    context: Arc<SessionContext>,
    /// only present under regionized threading
    region_table: Option<Arc<RegionOwnerTable>>,
    /// absent if disabled by configuration
    lod_cache: Option<Arc<LodCache>>,
    runner: Option<JoinHandle<()>>,
}

impl BridgeServer {
    /// Creates a server with the default compatibility table.
    pub fn new(config: BridgeConfig, provider: Arc<dyn WorldDataProvider>) -> Result<Self> {
        Self::with_compat(config, provider, CompatibilityTable::default())
    }

    /// Creates a server and the scheduler matching the configured platform.
    pub fn with_compat(
        config: BridgeConfig,
        provider: Arc<dyn WorldDataProvider>,
        compat: CompatibilityTable,
    ) -> Result<Self> {
        config.validate()?;
        let threading_model = config.server_version.platform.threading_model();
        info!(
            "serving {} with {threading_model:?} scheduling",
            config.server_version
        );

        let (scheduler, region_table): (Arc<dyn RegionScheduler<LodOutcome>>, _) =
            match threading_model {
                ThreadingModel::Pooled => {
                    let scheduler = PooledScheduler::new(
                        config.scheduler_threads,
                        config.scheduler_queue_capacity,
                        config.region_shift,
                    )?;
                    (Arc::new(scheduler), None)
                }
                ThreadingModel::Regionized => {
                    let table = Arc::new(RegionOwnerTable::new(config.region_owners));
                    let scheduler = RegionizedScheduler::new(
                        Arc::clone(&table),
                        config.scheduler_queue_capacity,
                        config.region_shift,
                        config.auto_assign_regions,
                    )?;
                    (Arc::new(scheduler), Some(table))
                }
            };

        let stats = Arc::new(BridgeStats::default());
        let (provider, lod_cache): (Arc<dyn WorldDataProvider>, _) =
            match config.lod_cache_capacity {
                0 => (provider, None),
                capacity => {
                    let cache = Arc::new(LodCache::new(capacity));
                    let caching =
                        CachingProvider::new(provider, Arc::clone(&cache), Arc::clone(&stats));
                    (Arc::new(caching), Some(cache))
                }
            };

        Ok(Self {
            context: Arc::new(SessionContext {
                config,
                compat,
                provider,
                scheduler,
                stats,
            }),
            region_table,
            lod_cache,
            runner: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.context.config
    }

    #[must_use]
    pub fn stats(&self) -> Arc<BridgeStats> {
        Arc::clone(&self.context.stats)
    }

    /// The ownership table a regionized host updates as regions load and unload.
    #[must_use]
    pub fn region_table(&self) -> Option<&Arc<RegionOwnerTable>> {
        self.region_table.as_ref()
    }

    /// The cache of built sections. Hosts [`touch`](LodCache::touch) it when blocks change.
    #[must_use]
    pub fn lod_cache(&self) -> Option<&Arc<LodCache>> {
        self.lod_cache.as_ref()
    }

    /// Binds the configured address and starts accepting connections in the background.
    pub async fn start(&mut self) -> Result<()> {
        if self.runner.is_some() {
            bail!("server is already running");
        }
        let config = &self.context.config;
        let listener = DhsServer::bind(config.bind, config.max_frame_size).await?;
        let context = Arc::clone(&self.context);
        self.runner = Some(tokio::spawn(Self::accept_connections(listener, context)));
        Ok(())
    }

    /// Stops accepting connections. Running sessions are not affected.
    pub fn stop(&mut self) {
        if let Some(runner) = self.runner.take() {
            runner.abort();
        }
    }

    async fn accept_connections(mut listener: DhsServer, context: Arc<SessionContext>) {
        let verbosity = context.config.frame_verbosity;
        #[expect(clippy::infinite_loop, reason = "the task is aborted by `stop`")]
        loop {
            match listener.accept().await {
                Ok(connection) => {
                    ClientSession::spawn(
                        connection.with_frame_verbosity(verbosity),
                        Arc::clone(&context),
                    );
                }
                Err(err) => warn!("failed to accept a connection: {err:#}"),
            }
        }
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::net::SocketAddr;
    use std::time::Duration;

    use dhs_core::DetailLevel;
    use dhs_core::DimensionId;
    use dhs_core::LodChunkKey;
    use dhs_core::SectionPos;
    use dhs_protocol::DhsClient;
    use dhs_protocol::commands::client_to_server::LodRequestSpec;
    use dhs_protocol::commands::server_to_client::ToClientCommand;
    use dhs_protocol::compat::McVersion;
    use dhs_protocol::compat::Platform;
    use dhs_protocol::compat::ServerVersion;
    use dhs_protocol::peer::DEFAULT_MAX_FRAME_SIZE;
    use dhs_protocol::types::Capabilities;
    use glam::I64Vec2;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use super::*;
    use crate::world::builder::LodBuilder;
    use crate::world::flat::FlatColumns;

    const WAIT: Duration = Duration::from_secs(5);

    fn provider() -> Arc<dyn WorldDataProvider> {
        Arc::new(LodBuilder::new(FlatColumns::demo(0)))
    }

    async fn free_port() -> SocketAddr {
        let probe = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        probe.local_addr().unwrap()
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let config = BridgeConfig {
            bind: free_port().await,
            ..BridgeConfig::default()
        };
        let bind = config.bind;
        let mut server = BridgeServer::new(config, provider()).unwrap();
        assert!(server.region_table().is_none());
        server.start().await.unwrap();
        assert!(server.start().await.is_err());

        let mut client = DhsClient::connect(bind, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        client.handshake(Capabilities::ZSTD).await.unwrap();
        let section = SectionPos::new(DetailLevel::new(4).unwrap(), 0, 0).unwrap();
        let key = LodChunkKey::new(DimensionId(0), section);
        client
            .send(LodRequestSpec::new(1, key, None).into())
            .await
            .unwrap();
        let response = timeout(WAIT, client.recv()).await.unwrap().unwrap();
        assert!(matches!(response, ToClientCommand::LodData(data) if data.request_id == 1));
        assert_eq!(server.stats().snapshot().served, 1);

        // the second request for the section is answered from the cache
        client
            .send(LodRequestSpec::new(2, key, None).into())
            .await
            .unwrap();
        let response = timeout(WAIT, client.recv()).await.unwrap().unwrap();
        assert!(matches!(response, ToClientCommand::LodData(data) if data.request_id == 2));
        let snapshot = server.stats().snapshot();
        assert_eq!((snapshot.cache_hits, snapshot.cache_misses), (1, 1));
        let cache = server.lod_cache().unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.touch(DimensionId(0), I64Vec2::new(10, 10)), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_can_be_disabled() {
        let config = BridgeConfig {
            lod_cache_capacity: 0,
            ..BridgeConfig::default()
        };
        let server = BridgeServer::new(config, provider()).unwrap();
        assert!(server.lod_cache().is_none());
    }

    #[tokio::test]
    async fn folia_is_regionized() {
        let config = BridgeConfig {
            server_version: ServerVersion::new(Platform::Folia, McVersion::new(1, 20, 4)),
            region_owners: 3,
            ..BridgeConfig::default()
        };
        let server = BridgeServer::new(config, provider()).unwrap();
        let table = server.region_table().unwrap();
        assert_eq!(table.owner_count(), 3);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = BridgeConfig {
            scheduler_threads: 0,
            ..BridgeConfig::default()
        };
        assert!(BridgeServer::new(config, provider()).is_err());
    }
}
