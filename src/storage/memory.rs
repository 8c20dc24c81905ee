use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{graph_scope, GraphStore, ReleaseStore};
use crate::config::Scope;
use crate::graph::Graph;
use crate::release::Release;

type ScopeKey = (String, String, String);

fn key(scope: &Scope) -> ScopeKey {
    (
        scope.project.clone(),
        scope.stack.clone(),
        scope.workspace.clone(),
    )
}

/// Process-local store. Updates can be made to fail on demand.
#[derive(Default)]
pub struct MemoryStorage {
    releases: Mutex<BTreeMap<ScopeKey, BTreeMap<u64, Release>>>,
    graphs: Mutex<BTreeMap<ScopeKey, Graph>>,
    fail_updates: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `update` (release or graph) return an error.
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    fn check_update(&self) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            bail!("injected update failure");
        }
        Ok(())
    }

    /// Every release stored for `scope`, oldest first.
    pub fn releases(&self, scope: &Scope) -> Vec<Release> {
        self.releases
            .lock()
            .map(|m| m.get(&key(scope)).map(|r| r.values().cloned().collect()).unwrap_or_default())
            .unwrap_or_default()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("memory store mutex poisoned")
}

#[async_trait]
impl ReleaseStore for MemoryStorage {
    async fn create(&self, release: &Release) -> Result<()> {
        let mut releases = self.releases.lock().map_err(|_| poisoned())?;
        let scoped = releases.entry(key(&release.scope())).or_default();
        if scoped.contains_key(&release.revision) {
            bail!(
                "release {} for {} already exists",
                release.revision,
                release.scope()
            );
        }
        scoped.insert(release.revision, release.clone());
        Ok(())
    }

    async fn update(&self, release: &Release) -> Result<()> {
        self.check_update()?;
        let mut releases = self.releases.lock().map_err(|_| poisoned())?;
        match releases
            .get_mut(&key(&release.scope()))
            .and_then(|r| r.get_mut(&release.revision))
        {
            Some(stored) => {
                *stored = release.clone();
                Ok(())
            }
            None => bail!(
                "release {} for {} does not exist",
                release.revision,
                release.scope()
            ),
        }
    }

    async fn get_latest(&self, scope: &Scope) -> Result<Option<Release>> {
        let releases = self.releases.lock().map_err(|_| poisoned())?;
        Ok(releases
            .get(&key(scope))
            .and_then(|r| r.values().next_back().cloned()))
    }

    async fn get(&self, scope: &Scope, revision: u64) -> Result<Option<Release>> {
        let releases = self.releases.lock().map_err(|_| poisoned())?;
        Ok(releases
            .get(&key(scope))
            .and_then(|r| r.get(&revision).cloned()))
    }
}

#[async_trait]
impl GraphStore for MemoryStorage {
    async fn check_existence(&self, scope: &Scope) -> Result<bool> {
        let graphs = self.graphs.lock().map_err(|_| poisoned())?;
        Ok(graphs.contains_key(&key(scope)))
    }

    async fn get(&self, scope: &Scope) -> Result<Option<Graph>> {
        let graphs = self.graphs.lock().map_err(|_| poisoned())?;
        Ok(graphs.get(&key(scope)).cloned())
    }

    async fn create(&self, graph: &Graph) -> Result<()> {
        let mut graphs = self.graphs.lock().map_err(|_| poisoned())?;
        let k = key(&graph_scope(graph));
        if graphs.contains_key(&k) {
            bail!("graph for {} already exists", graph_scope(graph));
        }
        graphs.insert(k, graph.clone());
        Ok(())
    }

    async fn update(&self, graph: &Graph) -> Result<()> {
        self.check_update()?;
        let mut graphs = self.graphs.lock().map_err(|_| poisoned())?;
        match graphs.get_mut(&key(&graph_scope(graph))) {
            Some(stored) => {
                *stored = graph.clone();
                Ok(())
            }
            None => bail!("graph for {} does not exist", graph_scope(graph)),
        }
    }
}
