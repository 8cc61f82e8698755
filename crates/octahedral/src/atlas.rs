//! Atlas cache: one bake per (mesh, settings) key, shared by every requester.
//!
//! A request either hits the completed map, joins the bake already in flight
//! for its key, or starts a new one. In-flight bakes are `Shared` futures, so
//! every joined requester observes the same `Arc<AtlasEntry>` (or the same
//! error). Completed entries move into the ready map; failed bakes are
//! forgotten so the key can be retried.

use crate::bake::{bake_atlas, AtlasTexture, BakeBackend, BakeReport};
use crate::error::BakeError;
use crate::geometry::{OctahedralMesh, OctahedronType};
use crate::metrics::BakeMetrics;
use crate::sampling::{SamplingCache, SamplingRegistry};
use crate::scene::{MeshId, SourceMesh};
use crate::settings::ImpostorSettings;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtlasKey {
    pub mesh: MeshId,
    pub grid_size: u32,
    pub atlas_size: u32,
    pub octahedron_type: OctahedronType,
}

impl AtlasKey {
    pub fn new(mesh: MeshId, settings: &ImpostorSettings) -> Self {
        Self {
            mesh,
            grid_size: settings.grid_size,
            atlas_size: settings.atlas_size,
            octahedron_type: settings.octahedron_type,
        }
    }
}

/// A finished bake together with the sampling data its sprites were laid out
/// against.
#[derive(Debug)]
pub struct AtlasEntry {
    pub key: AtlasKey,
    pub texture: AtlasTexture,
    pub sampling: Arc<SamplingCache>,
    pub report: BakeReport,
}

impl AtlasEntry {
    #[inline]
    pub fn mesh(&self) -> &Arc<OctahedralMesh> {
        self.sampling.mesh()
    }
}

pub type BakeResult = Result<Arc<AtlasEntry>, Arc<BakeError>>;
type SharedBake = Shared<BoxFuture<'static, BakeResult>>;

/// What a caller sees when it checks a handle without blocking.
#[derive(Debug, Clone)]
pub enum AtlasState {
    Pending,
    Ready(Arc<AtlasEntry>),
    Failed(Arc<BakeError>),
}

#[derive(Clone)]
enum Slot {
    Done(BakeResult),
    InFlight(SharedBake),
}

/// Handle to a requested atlas. Cheap to clone; every clone resolves to the
/// same result.
#[derive(Clone)]
pub struct AtlasHandle {
    key: AtlasKey,
    slot: Slot,
}

impl AtlasHandle {
    fn done(key: AtlasKey, result: BakeResult) -> Self {
        Self {
            key,
            slot: Slot::Done(result),
        }
    }

    #[inline]
    pub fn key(&self) -> AtlasKey {
        self.key
    }

    /// Drives the bake one step and reports where it stands. Intended for
    /// per-frame polling: draw a placeholder while this is `Pending`.
    pub fn poll_state(&mut self) -> AtlasState {
        if let Slot::InFlight(fut) = &self.slot {
            if let Some(result) = fut.clone().now_or_never() {
                self.slot = Slot::Done(result);
            }
        }
        match &self.slot {
            Slot::InFlight(_) => AtlasState::Pending,
            Slot::Done(Ok(entry)) => AtlasState::Ready(entry.clone()),
            Slot::Done(Err(e)) => AtlasState::Failed(e.clone()),
        }
    }

    pub async fn wait(self) -> BakeResult {
        match self.slot {
            Slot::Done(result) => result,
            Slot::InFlight(fut) => fut.await,
        }
    }
}

impl std::fmt::Debug for AtlasHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.slot {
            Slot::InFlight(_) => "pending",
            Slot::Done(Ok(_)) => "ready",
            Slot::Done(Err(_)) => "failed",
        };
        f.debug_struct("AtlasHandle")
            .field("key", &self.key)
            .field("state", &state)
            .finish()
    }
}

struct Inner {
    backend: Arc<dyn BakeBackend>,
    sampling: Arc<SamplingRegistry>,
    metrics: Arc<BakeMetrics>,
    // Lock order: pending, then ready.
    pending: Mutex<HashMap<AtlasKey, SharedBake>>,
    ready: RwLock<HashMap<AtlasKey, Arc<AtlasEntry>>>,
}

#[derive(Clone)]
pub struct AtlasCache {
    inner: Arc<Inner>,
}

impl AtlasCache {
    pub fn new(
        backend: Arc<dyn BakeBackend>,
        sampling: Arc<SamplingRegistry>,
        metrics: Arc<BakeMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                sampling,
                metrics,
                pending: Mutex::new(HashMap::new()),
                ready: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn sampling(&self) -> &Arc<SamplingRegistry> {
        &self.inner.sampling
    }

    pub fn metrics(&self) -> &Arc<BakeMetrics> {
        &self.inner.metrics
    }

    /// Returns a handle for `source` baked with `settings`, starting a bake
    /// only if neither a finished nor an in-flight one exists for the key.
    /// The bake runs as the handle is polled or awaited.
    pub fn request(&self, source: &Arc<SourceMesh>, settings: &ImpostorSettings) -> AtlasHandle {
        let key = AtlasKey::new(source.id(), settings);
        if let Err(e) = settings.validate() {
            return AtlasHandle::done(key, Err(Arc::new(e.into())));
        }

        if let Some(entry) = self.get(&key) {
            self.inner.metrics.cache_hits_total.inc();
            return AtlasHandle::done(key, Ok(entry));
        }

        let mut pending = self.inner.pending.lock();
        // A bake may have published between the check above and the lock.
        if let Some(entry) = self.get(&key) {
            self.inner.metrics.cache_hits_total.inc();
            return AtlasHandle::done(key, Ok(entry));
        }
        if let Some(fut) = pending.get(&key) {
            self.inner.metrics.inflight_joins_total.inc();
            log::debug!("Joining in-flight bake of {}", key.mesh);
            return AtlasHandle {
                key,
                slot: Slot::InFlight(fut.clone()),
            };
        }

        let fut = run_bake(self.inner.clone(), key, source.clone())
            .boxed()
            .shared();
        pending.insert(key, fut.clone());
        AtlasHandle {
            key,
            slot: Slot::InFlight(fut),
        }
    }

    pub async fn get_or_bake(
        &self,
        source: &Arc<SourceMesh>,
        settings: &ImpostorSettings,
    ) -> BakeResult {
        self.request(source, settings).wait().await
    }

    /// Completed entry for `key`, if any.
    pub fn get(&self, key: &AtlasKey) -> Option<Arc<AtlasEntry>> {
        self.inner.ready.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.ready.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

async fn run_bake(inner: Arc<Inner>, key: AtlasKey, source: Arc<SourceMesh>) -> BakeResult {
    let m = &inner.metrics;
    m.bakes_started_total.inc();
    let timer = m.bake_duration_seconds.start_timer();

    let result = async {
        let sampling = inner
            .sampling
            .get_or_build(key.octahedron_type, key.grid_size)?;
        let (texture, report) =
            bake_atlas(inner.backend.as_ref(), &source, sampling.mesh(), key.atlas_size).await?;
        Ok::<_, BakeError>(Arc::new(AtlasEntry {
            key,
            texture,
            sampling,
            report,
        }))
    }
    .await;
    timer.observe_duration();

    let mut pending = inner.pending.lock();
    match &result {
        Ok(entry) => {
            m.cells_rendered_total.inc_by(entry.report.rendered as u64);
            m.cells_failed_total.inc_by(entry.report.failed.len() as u64);
            inner.ready.write().insert(key, entry.clone());
        }
        Err(e) => {
            m.bakes_failed_total.inc();
            log::error!("Bake of {} failed: {e}", key.mesh);
        }
    }
    pending.remove(&key);
    drop(pending);

    result.map_err(Arc::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::{BakeView, ViewRenderer};
    use crate::error::CellError;
    use crate::scene::{BakeScene, MeshPart};
    use crate::soft::SoftwareBackend;
    use async_trait::async_trait;
    use glam::Vec3;
    use image::RgbaImage;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Software backend that counts bakes, yields once, and can be told to
    /// fail.
    #[derive(Default)]
    struct CountingBackend {
        prepared: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl BakeBackend for CountingBackend {
        async fn prepare(
            &self,
            scene: &BakeScene,
            cell_px: u32,
        ) -> Result<Box<dyn ViewRenderer>, BakeError> {
            self.prepared.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(BakeError::Surface("device lost".into()));
            }
            let inner = SoftwareBackend::default().prepare(scene, cell_px).await?;
            Ok(Box::new(Yielding(inner)))
        }
    }

    struct Yielding(Box<dyn ViewRenderer>);

    #[async_trait]
    impl ViewRenderer for Yielding {
        async fn render_view(&mut self, view: &BakeView) -> Result<RgbaImage, CellError> {
            tokio::task::yield_now().await;
            self.0.render_view(view).await
        }
    }

    fn source() -> Arc<SourceMesh> {
        Arc::new(
            MeshPart::new(
                vec![Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.4), Vec3::new(0.7, 0.3, 1.0)],
                vec![0, 1, 2],
            )
            .into(),
        )
    }

    fn cache(backend: Arc<CountingBackend>) -> AtlasCache {
        AtlasCache::new(
            backend,
            Arc::new(SamplingRegistry::new()),
            Arc::new(BakeMetrics::new().unwrap()),
        )
    }

    fn settings() -> ImpostorSettings {
        ImpostorSettings::new(2, 96, OctahedronType::Hemi)
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_bake() {
        let backend = Arc::new(CountingBackend::default());
        let cache = cache(backend.clone());
        let src = source();

        let a = cache.request(&src, &settings());
        let b = cache.request(&src, &settings());
        assert_eq!(cache.in_flight(), 1);

        let (a, b) = tokio::join!(a.wait(), b.wait());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(backend.prepared.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.metrics().inflight_joins_total.get(), 1);
        assert_eq!(cache.metrics().cells_rendered_total.get(), 9);
        assert_eq!(a.texture.layout.sprites_per_side, 3);
    }

    #[tokio::test]
    async fn completed_atlas_is_served_from_cache() {
        let backend = Arc::new(CountingBackend::default());
        let cache = cache(backend.clone());
        let src = source();

        let first = cache.get_or_bake(&src, &settings()).await.unwrap();
        let mut again = cache.request(&src, &settings());
        match again.poll_state() {
            AtlasState::Ready(entry) => assert!(Arc::ptr_eq(&entry, &first)),
            other => panic!("expected a cache hit, got {other:?}"),
        }
        assert_eq!(backend.prepared.load(Ordering::SeqCst), 1);
        assert_eq!(cache.metrics().cache_hits_total.get(), 1);

        // Different settings are a different atlas.
        let full = ImpostorSettings::new(2, 96, OctahedronType::Full);
        let other = cache.get_or_bake(&src, &full).await.unwrap();
        assert!(!Arc::ptr_eq(&other, &first));
        assert_eq!(backend.prepared.load(Ordering::SeqCst), 2);
        assert_eq!(cache.sampling().len(), 2);

        // Completed entries are kept for the life of the cache.
        assert_eq!(cache.len(), 2);
        assert!(Arc::ptr_eq(&cache.get(&AtlasKey::new(src.id, &settings())).unwrap(), &first));
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter_and_can_be_retried() {
        let backend = Arc::new(CountingBackend::default());
        backend.fail.store(true, Ordering::SeqCst);
        let cache = cache(backend.clone());
        let src = source();

        let a = cache.request(&src, &settings());
        let b = cache.request(&src, &settings());
        let (a, b) = tokio::join!(a.wait(), b.wait());
        let (a, b) = (a.unwrap_err(), b.unwrap_err());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(matches!(*a, BakeError::Surface(_)));
        assert_eq!(cache.in_flight(), 0);
        assert!(cache.is_empty());
        assert_eq!(cache.metrics().bakes_failed_total.get(), 1);

        backend.fail.store(false, Ordering::SeqCst);
        assert!(cache.get_or_bake(&src, &settings()).await.is_ok());
        assert_eq!(backend.prepared.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn polling_reports_pending_until_the_bake_lands() {
        let cache = cache(Arc::new(CountingBackend::default()));
        let mut handle = cache.request(&source(), &settings());

        // The backend yields, so the first poll cannot finish the bake.
        assert!(matches!(handle.poll_state(), AtlasState::Pending));
        let mut polls = 0;
        let entry = loop {
            match handle.poll_state() {
                AtlasState::Ready(entry) => break entry,
                AtlasState::Pending => polls += 1,
                AtlasState::Failed(e) => panic!("{e}"),
            }
            assert!(polls < 10_000);
        };
        assert_eq!(entry.report.rendered, 9);
        assert!(cache.get(&handle.key()).is_some());
    }

    #[test]
    fn invalid_settings_fail_without_baking() {
        let backend = Arc::new(CountingBackend::default());
        let cache = cache(backend.clone());
        let mut handle = cache.request(&source(), &ImpostorSettings::new(0, 96, OctahedronType::Hemi));
        assert!(matches!(
            handle.poll_state(),
            AtlasState::Failed(e) if matches!(*e, BakeError::Config(_))
        ));
        assert_eq!(backend.prepared.load(Ordering::SeqCst), 0);
    }
}
