//! Shared fakes for collection tests.
//!
//! `ScriptedRetriever` keeps its per-instrument state (file list, delivered
//! set, call log) in a map shared with the test, so it survives across
//! cycles the way a persisted cursor would.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nrt_collector::{
    CandidateFile, CollectionLoop, CollectionSettings, InstrumentDirectory, InstrumentId,
    InstrumentRecord, Retriever, RetrieverContext, RetrieverError, RetrieverRegistry,
    StorageBuilder, StorageHandles, UploadGateway, UploadOutcome,
};

pub const SCRIPTED_KIND: &str = "scripted";

/// What one instrument's fake data source holds and how it behaves.
#[derive(Debug, Clone)]
pub struct Source {
    pub files: Vec<String>,
    /// Batch sizes for successive `load_next_file` calls; the last repeats.
    pub batch_sizes: Vec<usize>,
    pub delivered: BTreeSet<String>,
    pub calls: Vec<String>,
    /// Acknowledgment checkpoints; kept out of `calls`.
    pub checkpoints: usize,
    pub config_ok: bool,
    pub config_error: bool,
    pub startup_ok: bool,
    pub panic_on_startup: bool,
    pub hang_on_startup: bool,
    pub panic_on_load: bool,
    pub hang_on_load: bool,
    pub panic_on_ack: bool,
}

impl Source {
    pub fn with_files(files: &[&str]) -> Self {
        Self {
            files: files.iter().map(|f| f.to_string()).collect(),
            batch_sizes: vec![1],
            delivered: BTreeSet::new(),
            calls: Vec::new(),
            checkpoints: 0,
            config_ok: true,
            config_error: false,
            startup_ok: true,
            panic_on_startup: false,
            hang_on_startup: false,
            panic_on_load: false,
            hang_on_load: false,
            panic_on_ack: false,
        }
    }

    pub fn batches(mut self, sizes: &[usize]) -> Self {
        self.batch_sizes = sizes.to_vec();
        self
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }
}

pub type Sources = Arc<Mutex<HashMap<InstrumentId, Source>>>;

pub struct ScriptedRetriever {
    id: InstrumentId,
    sources: Sources,
    offered: HashSet<String>,
    loads: usize,
}

impl ScriptedRetriever {
    fn with_source<T>(&self, f: impl FnOnce(&mut Source) -> T) -> T {
        let mut sources = self.sources.lock().unwrap();
        let source = sources.get_mut(&self.id).unwrap();
        f(source)
    }

    fn record(&self, call: String) {
        self.with_source(|s| s.calls.push(call));
    }
}

#[async_trait::async_trait]
impl Retriever for ScriptedRetriever {
    fn kind(&self) -> &str {
        SCRIPTED_KIND
    }

    async fn test_configuration(&mut self) -> Result<bool, RetrieverError> {
        self.record("test_configuration".into());
        if self.with_source(|s| s.config_error) {
            return Err(RetrieverError::Configuration("source_dir unreadable".into()));
        }
        Ok(self.with_source(|s| s.config_ok))
    }

    async fn startup(&mut self) -> Result<bool, RetrieverError> {
        self.record("startup".into());
        let (panic_on_startup, hang_on_startup) =
            self.with_source(|s| (s.panic_on_startup, s.hang_on_startup));
        if panic_on_startup {
            panic!("scripted retriever could not open its source");
        }
        if hang_on_startup {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(self.with_source(|s| s.startup_ok))
    }

    async fn load_next_file(&mut self) -> Result<Option<Vec<CandidateFile>>, RetrieverError> {
        self.record("load_next_file".into());
        let (panic_on_load, hang_on_load) = self.with_source(|s| (s.panic_on_load, s.hang_on_load));
        if panic_on_load {
            panic!("scripted retriever exploded");
        }
        if hang_on_load {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let loads = self.loads;
        let offered = self.offered.clone();
        let batch: Vec<String> = self.with_source(|s| {
            let size = s
                .batch_sizes
                .get(loads)
                .or(s.batch_sizes.last())
                .copied()
                .unwrap_or(1);
            s.files
                .iter()
                .filter(|f| !s.delivered.contains(*f) && !offered.contains(*f))
                .take(size)
                .cloned()
                .collect()
        });
        self.loads += 1;

        if batch.is_empty() {
            return Ok(None);
        }
        self.offered.extend(batch.iter().cloned());
        Ok(Some(
            batch
                .into_iter()
                .map(|name| {
                    let content = format!("content of {name}").into_bytes();
                    CandidateFile::new(name, content)
                })
                .collect(),
        ))
    }

    fn file_succeeded(&mut self, file: &CandidateFile) -> Result<(), RetrieverError> {
        if self.with_source(|s| s.panic_on_ack) {
            panic!("scripted cursor corrupted");
        }
        self.with_source(|s| {
            s.calls.push(format!("file_succeeded:{}", file.name));
            s.delivered.insert(file.name.clone());
        });
        Ok(())
    }

    fn file_failed(&mut self, file: &CandidateFile) -> Result<(), RetrieverError> {
        self.record(format!("file_failed:{}", file.name));
        Ok(())
    }

    fn file_not_processed(&mut self, file: &CandidateFile) -> Result<(), RetrieverError> {
        self.record(format!("file_not_processed:{}", file.name));
        Ok(())
    }

    async fn checkpoint(&mut self) -> Result<(), RetrieverError> {
        self.with_source(|s| s.checkpoints += 1);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), RetrieverError> {
        self.record("shutdown".into());
        Ok(())
    }
}

/// Registry with the scripted retriever (and the built-ins) registered.
pub fn scripted_registry(sources: &Sources) -> RetrieverRegistry {
    let mut registry = RetrieverRegistry::with_builtin();
    let sources = Arc::clone(sources);
    registry.register(SCRIPTED_KIND, move |ctx: RetrieverContext, _config| {
        Ok(Box::new(ScriptedRetriever {
            id: ctx.instrument_id,
            sources: Arc::clone(&sources),
            offered: HashSet::new(),
            loads: 0,
        }) as Box<dyn Retriever>)
    });
    registry
}

/// Gateway answering per file name; unknown names succeed.
#[derive(Default)]
pub struct ScriptedGateway {
    outcomes: Mutex<HashMap<String, UploadOutcome>>,
    delay: Mutex<Option<Duration>>,
    pub uploads: Mutex<Vec<(InstrumentId, String)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedGateway {
    pub fn answer(&self, filename: &str, outcome: UploadOutcome) {
        self.outcomes.lock().unwrap().insert(filename.to_string(), outcome);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Most uploads ever in progress at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn uploads_for(&self, id: InstrumentId) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, _)| *i == id)
            .map(|(_, f)| f.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl UploadGateway for ScriptedGateway {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn upload(&self, instrument_id: InstrumentId, filename: &str, _content: &[u8]) -> UploadOutcome {
        self.uploads
            .lock()
            .unwrap()
            .push((instrument_id, filename.to_string()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .get(filename)
            .cloned()
            .unwrap_or(UploadOutcome::Succeeded)
    }
}

/// In-memory storage, scripted sources and gateway, ready to build loops.
pub struct Harness {
    pub handles: StorageHandles,
    pub sources: Sources,
    pub gateway: Arc<ScriptedGateway>,
}

impl Harness {
    pub async fn new() -> Self {
        Self {
            handles: StorageBuilder::new("sqlite::memory:").build().await.unwrap(),
            sources: Arc::new(Mutex::new(HashMap::new())),
            gateway: Arc::new(ScriptedGateway::default()),
        }
    }

    /// Add a scripted instrument backed by `source`.
    pub async fn scripted(&self, name: &str, source: Source) -> InstrumentId {
        let id = self.instrument(name, Some(SCRIPTED_KIND)).await;
        self.sources.lock().unwrap().insert(id, source);
        id
    }

    /// Add an instrument with an arbitrary (or missing) type tag.
    pub async fn instrument(&self, name: &str, kind: Option<&str>) -> InstrumentId {
        self.handles
            .instrument_store
            .insert_if_not_exists(&InstrumentRecord::new(name, kind, serde_json::json!({})))
            .await
            .unwrap()
            .unwrap()
    }

    pub fn source(&self, id: InstrumentId) -> Source {
        self.sources.lock().unwrap().get(&id).cloned().unwrap()
    }

    pub fn update_source(&self, id: InstrumentId, f: impl FnOnce(&mut Source)) {
        f(self.sources.lock().unwrap().get_mut(&id).unwrap());
    }

    pub fn collection_loop(&self, settings: CollectionSettings) -> CollectionLoop {
        self.collection_loop_over(Arc::new(self.handles.instrument_store.clone()), settings)
    }

    pub fn collection_loop_over(
        &self,
        directory: Arc<dyn InstrumentDirectory>,
        settings: CollectionSettings,
    ) -> CollectionLoop {
        CollectionLoop::new(
            directory,
            scripted_registry(&self.sources),
            Arc::clone(&self.gateway) as Arc<dyn UploadGateway>,
            self.handles.cursor_store.clone(),
            settings,
        )
        .unwrap()
    }
}
