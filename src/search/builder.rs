//! Index orchestration: source snapshot → corpus → fitted index
//!
//! [`SharedIndex`] is the slot interactive callers search through while a
//! rebuild runs in the background.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::VectorizerBackend;
use super::corpus::build_corpus;
use super::error::{IndexError, Result};
use super::index::SemanticIndex;
use crate::core::source::RecordSource;

/// Result of [`IndexBuilder::load_or_build`]
#[derive(Debug)]
pub enum IndexOutcome {
    /// Restored from persisted artifacts
    Loaded(SemanticIndex),
    /// Fitted from the record source and persisted
    Built(SemanticIndex),
    /// The source has no records; retrieval is unavailable
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Loaded,
    Built,
    Empty,
}

impl IndexOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            IndexOutcome::Loaded(_) => OutcomeKind::Loaded,
            IndexOutcome::Built(_) => OutcomeKind::Built,
            IndexOutcome::Empty => OutcomeKind::Empty,
        }
    }

    pub fn into_index(self) -> Option<SemanticIndex> {
        match self {
            IndexOutcome::Loaded(index) | IndexOutcome::Built(index) => Some(index),
            IndexOutcome::Empty => None,
        }
    }
}

/// Builds indexes with one process-wide backend
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    backend: VectorizerBackend,
    persist_to: Option<PathBuf>,
}

impl IndexBuilder {
    pub fn new(backend: VectorizerBackend) -> Self {
        Self {
            backend,
            persist_to: None,
        }
    }

    /// Save every index built by [`build_from_source`](Self::build_from_source)
    pub fn persist_to(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.persist_to = Some(prefix.into());
        self
    }

    pub fn backend(&self) -> &VectorizerBackend {
        &self.backend
    }

    /// Snapshot the source and fit an index; `None` when it has no records
    pub fn build_from_source(&self, source: &dyn RecordSource) -> Result<Option<SemanticIndex>> {
        let index = self.fit_source(source)?;
        if let (Some(index), Some(prefix)) = (&index, &self.persist_to) {
            index.save(prefix)?;
        }
        Ok(index)
    }

    /// Load the index at `prefix`, or rebuild and persist it
    ///
    /// Any load failure is logged and answered with a rebuild. `rebuild`
    /// skips the load attempt.
    pub fn load_or_build(
        &self,
        source: &dyn RecordSource,
        prefix: &Path,
        rebuild: bool,
    ) -> Result<IndexOutcome> {
        if !rebuild {
            match SemanticIndex::load(prefix, &self.backend) {
                Ok(index) => return Ok(IndexOutcome::Loaded(index)),
                Err(IndexError::NotFound(_)) => {
                    debug!("No index at {}, building", prefix.display())
                }
                Err(e) => warn!("Failed to load index at {}: {}; rebuilding", prefix.display(), e),
            }
        }

        match self.fit_source(source)? {
            Some(index) => {
                index.save(prefix)?;
                Ok(IndexOutcome::Built(index))
            }
            None => Ok(IndexOutcome::Empty),
        }
    }

    fn fit_source(&self, source: &dyn RecordSource) -> Result<Option<SemanticIndex>> {
        let start = Instant::now();
        let records = source.list_all()?;
        let corpus = build_corpus(&records);
        let index = self.backend.fit(&corpus)?;

        match &index {
            Some(index) => info!(
                "Built {} index over {} records in {}ms",
                index.backend(),
                records.len(),
                start.elapsed().as_millis()
            ),
            None => info!("Record source is empty, semantic search unavailable"),
        }
        Ok(index)
    }
}

/// Clears the in-progress flag when a build ends, however it ends
struct BuildGuard(Arc<AtomicBool>);

impl BuildGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| IndexError::BuildInProgress)?;
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Current index of one logical index, swapped atomically on rebuild
///
/// Readers take an `Arc` snapshot and search it without holding a lock.
/// At most one build runs at a time; a failed build keeps the old index.
#[derive(Default)]
pub struct SharedIndex {
    current: RwLock<Option<Arc<SemanticIndex>>>,
    building: Arc<AtomicBool>,
    last_error: Mutex<Option<String>>,
}

impl SharedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(index: SemanticIndex) -> Self {
        let shared = Self::default();
        *shared.current.write() = Some(Arc::new(index));
        shared
    }

    pub fn snapshot(&self) -> Option<Arc<SemanticIndex>> {
        self.current.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::Acquire)
    }

    /// Message of the most recent failed build, cleared on success
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Search the current index; [`IndexError::NotReady`] when there is none
    pub fn search(&self, query: &str, topk: usize) -> Result<Vec<i64>> {
        self.snapshot()
            .ok_or(IndexError::NotReady)?
            .search(query, topk)
    }

    /// Run a load-or-build on the calling thread and install the result
    pub fn refresh(
        &self,
        builder: &IndexBuilder,
        source: &dyn RecordSource,
        prefix: &Path,
        rebuild: bool,
    ) -> Result<OutcomeKind> {
        let _guard = BuildGuard::acquire(&self.building)?;
        self.run(builder, source, prefix, rebuild)
    }

    /// Start a load-or-build on the blocking pool
    ///
    /// Rejected with [`IndexError::BuildInProgress`] while another build
    /// is in flight. Must be called inside a tokio runtime.
    pub fn spawn_rebuild(
        self: &Arc<Self>,
        builder: IndexBuilder,
        source: Arc<dyn RecordSource>,
        prefix: PathBuf,
        rebuild: bool,
    ) -> Result<JoinHandle<Result<OutcomeKind>>> {
        let guard = BuildGuard::acquire(&self.building)?;
        let shared = Arc::clone(self);

        Ok(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            shared.run(&builder, source.as_ref(), &prefix, rebuild)
        }))
    }

    fn run(
        &self,
        builder: &IndexBuilder,
        source: &dyn RecordSource,
        prefix: &Path,
        rebuild: bool,
    ) -> Result<OutcomeKind> {
        match builder.load_or_build(source, prefix, rebuild) {
            Ok(outcome) => {
                let kind = outcome.kind();
                *self.current.write() = outcome.into_index().map(Arc::new);
                *self.last_error.lock() = None;
                Ok(kind)
            }
            Err(e) => {
                warn!("Index build failed, keeping previous index: {}", e);
                *self.last_error.lock() = Some(e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::Record;
    use crate::core::source::{MemorySource, SourceError};
    use crate::search::backend::BackendKind;
    use crate::search::embedding::HTP_MODEL;
    use crate::search::index::detect_artifacts;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn ammunition() -> MemorySource {
        MemorySource::new(vec![
            Record::new(1).with_text("am_name", "250-3航爆弹").with_text("country", "中国"),
            Record::new(2).with_text("am_name", "GBU-31").with_text("country", "美国"),
            Record::new(3).with_text("am_name", "KAB-500").with_text("country", "俄罗斯"),
        ])
    }

    /// Blocks `list_all` until the test releases it
    struct GatedSource {
        inner: MemorySource,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl RecordSource for GatedSource {
        fn list_all(&self) -> std::result::Result<Vec<Record>, SourceError> {
            let _ = self.gate.lock().recv();
            self.inner.list_all()
        }
    }

    struct FailingSource;

    impl RecordSource for FailingSource {
        fn list_all(&self) -> std::result::Result<Vec<Record>, SourceError> {
            Err(SourceError::InvalidRecord {
                origin: "test".into(),
                reason: "unreadable".into(),
            })
        }
    }

    #[test]
    fn test_build_from_empty_source() {
        let builder = IndexBuilder::new(VectorizerBackend::sparse());
        let index = builder
            .build_from_source(&MemorySource::new(Vec::new()))
            .unwrap();
        assert!(index.is_none());
    }

    #[test]
    fn test_build_persists_when_asked() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("ammo");
        let builder = IndexBuilder::new(VectorizerBackend::sparse()).persist_to(&prefix);

        let index = builder.build_from_source(&ammunition()).unwrap().unwrap();
        assert_eq!(index.ids(), &[1, 2, 3]);
        assert!(detect_artifacts(&prefix).is_ok());
    }

    #[test]
    fn test_load_or_build_flow() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("ammo");
        let builder = IndexBuilder::new(VectorizerBackend::select(Some(HTP_MODEL)));

        let first = builder.load_or_build(&ammunition(), &prefix, false).unwrap();
        assert_eq!(first.kind(), OutcomeKind::Built);

        let second = builder.load_or_build(&ammunition(), &prefix, false).unwrap();
        assert_eq!(second.kind(), OutcomeKind::Loaded);
        assert_eq!(second.into_index().unwrap().backend(), BackendKind::Dense);

        let forced = builder.load_or_build(&ammunition(), &prefix, true).unwrap();
        assert_eq!(forced.kind(), OutcomeKind::Built);
    }

    #[test]
    fn test_corrupt_index_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("ammo");
        std::fs::write(dir.path().join("ammo.sparse.bin"), b"garbage").unwrap();

        let builder = IndexBuilder::new(VectorizerBackend::sparse());
        let outcome = builder.load_or_build(&ammunition(), &prefix, false).unwrap();
        assert_eq!(outcome.kind(), OutcomeKind::Built);
        assert!(SemanticIndex::load(&prefix, builder.backend()).is_ok());
    }

    #[test]
    fn test_shared_index_not_ready() {
        let shared = SharedIndex::new();
        assert!(matches!(shared.search("中国", 3), Err(IndexError::NotReady)));

        let dir = TempDir::new().unwrap();
        let builder = IndexBuilder::new(VectorizerBackend::sparse());
        let kind = shared
            .refresh(&builder, &MemorySource::new(Vec::new()), &dir.path().join("x"), false)
            .unwrap();
        assert_eq!(kind, OutcomeKind::Empty);
        assert!(!shared.is_ready());
        assert!(matches!(shared.search("", 3), Err(IndexError::NotReady)));
    }

    #[test]
    fn test_failed_build_keeps_previous_index() {
        let dir = TempDir::new().unwrap();
        let builder = IndexBuilder::new(VectorizerBackend::sparse());
        let old = builder.build_from_source(&ammunition()).unwrap().unwrap();
        let shared = SharedIndex::with_index(old);

        let err = shared
            .refresh(&builder, &FailingSource, &dir.path().join("x"), true)
            .unwrap_err();
        assert!(matches!(err, IndexError::Source(_)));
        assert!(shared.last_error().is_some());
        assert_eq!(shared.search("", 10).unwrap(), vec![1, 2, 3]);
        assert!(!shared.is_building());
    }

    #[tokio::test]
    async fn test_background_rebuild_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("ammo");
        let builder = IndexBuilder::new(VectorizerBackend::sparse());

        let seed = MemorySource::new(vec![Record::new(9).with_text("am_name", "旧弹药")]);
        let shared = Arc::new(SharedIndex::with_index(
            builder.build_from_source(&seed).unwrap().unwrap(),
        ));

        let (release, gate) = mpsc::channel();
        let source: Arc<dyn RecordSource> = Arc::new(GatedSource {
            inner: ammunition(),
            gate: Mutex::new(gate),
        });

        let handle = shared
            .spawn_rebuild(builder.clone(), Arc::clone(&source), prefix.clone(), true)
            .unwrap();
        assert!(shared.is_building());
        assert!(matches!(
            shared.spawn_rebuild(builder.clone(), Arc::clone(&source), prefix.clone(), true),
            Err(IndexError::BuildInProgress)
        ));

        // The old index keeps serving while the build is blocked
        assert_eq!(shared.search("", 5).unwrap(), vec![9]);

        release.send(()).unwrap();
        let kind = handle.await.unwrap().unwrap();
        assert_eq!(kind, OutcomeKind::Built);
        assert!(!shared.is_building());
        assert_eq!(shared.search("", 5).unwrap(), vec![1, 2, 3]);
        assert_eq!(shared.search("航爆弹", 1).unwrap(), vec![1]);
    }
}
