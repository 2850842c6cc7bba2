use super::schema::{cluster_id_from_row, NodeRow, NodeUpdate, STATE_DISABLED, STATE_ENABLED};
use super::store::NodeStore;
use crate::config::ClustererConfig;
use crate::membership::{ClusterId, ClusterRegistry, ClusterTable, HostResolver, SystemResolver};
use crate::util::{ClustererError, RetryPolicy, StoreError};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { clusters: usize, nodes: usize },
    /// The local node has no row in any cluster; the registry is empty.
    NoCluster,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Update queries issued.
    pub attempted: usize,
    pub written: usize,
    /// Clusters whose local node had nothing new to write.
    pub skipped: usize,
    pub failed: Vec<ClusterId>,
}

/// Loads the registry from a [`NodeStore`] and writes local changes back.
///
/// A load builds a complete staging table without holding the registry lock
/// and swaps it in only when every row validated, so readers never see a
/// partially built registry and a failed reload keeps the previous one.
pub struct PersistenceSynchronizer<S: NodeStore> {
    registry: Arc<ClusterRegistry>,
    store: Mutex<S>,
    resolver: Arc<dyn HostResolver>,
    table: String,
    table_version: u32,
    retry: RetryPolicy,
}

impl<S: NodeStore> PersistenceSynchronizer<S> {
    pub fn new(registry: Arc<ClusterRegistry>, store: S, config: &ClustererConfig) -> Self {
        Self {
            registry,
            store: Mutex::new(store),
            resolver: Arc::new(SystemResolver),
            table: config.db_table.clone(),
            table_version: config.table_version,
            retry: config.retry_policy(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    /// Rebuilds the registry from the store.
    ///
    /// Bad data and store failures leave the current registry untouched.
    /// Running out of memory tears the registry down as well.
    pub fn load(&self) -> Result<LoadOutcome, ClustererError> {
        let table = match self.build_table() {
            Ok(table) => table,
            Err(err) => {
                error!(
                    "event=clusterer_load outcome=aborted kind={:?} error={}",
                    err.kind(),
                    err
                );
                if err.is_out_of_memory() {
                    if let Err(teardown_err) = self.registry.teardown() {
                        warn!("event=clusterer_teardown outcome=skipped error={}", teardown_err);
                    }
                }
                return Err(err);
            }
        };
        let clusters = table.len();
        let nodes = table.node_count();
        self.registry.write()?.replace(table);
        if clusters == 0 {
            warn!(
                "event=clusterer_load outcome=no_cluster node_id={}",
                self.registry.my_node_id()
            );
            return Ok(LoadOutcome::NoCluster);
        }
        info!(
            "event=clusterer_load outcome=loaded clusters={} nodes={} generation={}",
            clusters,
            nodes,
            self.registry.generation()
        );
        Ok(LoadOutcome::Loaded { clusters, nodes })
    }

    fn build_table(&self) -> Result<ClusterTable, ClustererError> {
        let local_node_id = self.registry.my_node_id();
        let rows = {
            let mut store = self.store.lock();
            self.connect(&mut store)?;
            let membership = store.query_cluster_ids(&self.table, local_node_id)?;
            let mut cluster_ids: Vec<ClusterId> = Vec::new();
            cluster_ids
                .try_reserve(membership.len())
                .map_err(|_| ClustererError::oom("collecting cluster ids"))?;
            for row in &membership {
                let cluster_id = cluster_id_from_row(row)?;
                if !cluster_ids.contains(&cluster_id) {
                    cluster_ids.push(cluster_id);
                }
            }
            if cluster_ids.is_empty() {
                return Ok(ClusterTable::new());
            }
            debug!(
                "event=clusterer_load stage=membership node_id={} clusters={:?}",
                local_node_id, cluster_ids
            );
            store.query_nodes(&self.table, &cluster_ids)?
        };

        let ctx = self.registry.node_context(self.resolver.as_ref());
        let mut table = ClusterTable::new();
        for raw in &rows {
            let row = NodeRow::from_store_row(raw)?;
            table.add_node(&row, &ctx)?;
        }
        table.verify_local_nodes(local_node_id)?;
        Ok(table)
    }

    /// Version check, retried with a reconnect while the store is
    /// unavailable.
    fn connect(&self, store: &mut S) -> Result<(), ClustererError> {
        let found = self.retry.run(
            "table_version",
            |attempt| {
                if attempt > 1 {
                    store.reconnect()?;
                }
                store.table_version(&self.table)
            },
            |err| matches!(err, StoreError::Unavailable(_)),
        )?;
        if found != self.table_version {
            return Err(ClustererError::TableVersion {
                table: self.table.clone(),
                expected: self.table_version,
                found,
            });
        }
        Ok(())
    }

    /// Writes the local node's counters for every cluster changed since the
    /// last successful write. A failing cluster does not stop the others.
    pub fn flush(&self) -> Result<FlushReport, ClustererError> {
        let mut report = FlushReport::default();
        {
            let view = self.registry.read();
            let mut store = self.store.lock();
            for cluster in view.clusters() {
                let Some(node) = cluster.current_node() else {
                    continue;
                };
                let (update, revision) = {
                    let guard = node.lock();
                    if guard.flags().is_synced() {
                        report.skipped += 1;
                        continue;
                    }
                    let state = if guard.flags().is_enabled() {
                        STATE_ENABLED
                    } else {
                        STATE_DISABLED
                    };
                    let update = NodeUpdate {
                        ls_seq_no: guard.ls_seq_no(),
                        top_seq_no: guard.top_seq_no(),
                        state,
                    };
                    (update, guard.revision())
                };
                report.attempted += 1;
                match store.update_node(&self.table, node.row_id(), &update) {
                    Ok(()) => {
                        report.written += 1;
                        if !node.lock().mark_synced(revision) {
                            debug!(
                                "event=clusterer_flush cluster_id={} outcome=changed_during_write",
                                cluster.cluster_id()
                            );
                        }
                    }
                    Err(err) => {
                        warn!(
                            "event=clusterer_flush cluster_id={} row_id={} outcome=failed error={}",
                            cluster.cluster_id(),
                            node.row_id(),
                            err
                        );
                        report.failed.push(cluster.cluster_id());
                    }
                }
            }
        }
        debug!(
            "event=clusterer_flush attempted={} written={} skipped={} failed={}",
            report.attempted,
            report.written,
            report.skipped,
            report.failed.len()
        );
        if report.failed.is_empty() {
            Ok(report)
        } else {
            Err(ClustererError::FlushIncomplete {
                failed: report.failed.len(),
                attempted: report.attempted,
            })
        }
    }

    pub fn teardown(&self) -> Result<usize, ClustererError> {
        self.registry.teardown()
    }
}

/// Runs [`PersistenceSynchronizer::flush`] on a background thread until
/// stopped or dropped.
pub struct FlushTimer {
    stop: Option<mpsc::Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl FlushTimer {
    pub fn spawn<S>(
        sync: Arc<PersistenceSynchronizer<S>>,
        interval: Duration,
    ) -> std::io::Result<Self>
    where
        S: NodeStore + 'static,
    {
        let (stop, stopped) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name("clusterer-flush".into())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(err) = sync.flush() {
                            warn!("event=clusterer_flush_timer outcome=incomplete error={}", err);
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(Self {
            stop: Some(stop),
            join: Some(join),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.join.take() {
            if handle.join().is_err() {
                warn!("event=clusterer_flush_timer outcome=panicked");
            }
        }
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
