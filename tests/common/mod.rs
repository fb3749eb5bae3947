#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use bucketfs::clock::SimulatedClock;
use bucketfs::config::WriteConfig;
use bucketfs::fs::content::ContentCache;
use bucketfs::fs::inode::{FileInode, InodeAttributes, Name};
use bucketfs::fs::syncer::SyncerBucket;
use gcs_store::{
    Bucket, ChunkWriter, CreateObjectRequest, ExtendedObjectAttributes, MinObject, Object,
    ObjectReader, ReadObjectRequest, StatObjectRequest, StorageError, UpdateObjectRequest,
};

pub const BUCKET_NAME: &str = "fake-bucket";

/// Server-side "updated" timestamp the fake store stamps on every write.
pub fn server_time() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(9_999)
}

/// A deterministic clock starting well after the fake server time.
pub fn test_clock() -> Arc<SimulatedClock> {
    SimulatedClock::new(SystemTime::UNIX_EPOCH + Duration::from_secs(20_000))
}

struct StoredObject {
    object: Object,
    contents: Bytes,
}

#[derive(Default)]
struct FakeState {
    objects: HashMap<String, StoredObject>,
    stat_count: u64,
    reader_count: u64,
    create_count: u64,
    update_count: u64,
    chunk_writer_count: u64,
    last_stat_request: Option<StatObjectRequest>,
    fail_chunk_writer: Option<String>,
    fail_write_chunk: Option<String>,
    race_replace_after_next_stat: Option<(String, Vec<u8>)>,
}

/// In-memory object store with GCS-style generation preconditions.
pub struct FakeBucket {
    name: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeBucket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            name: BUCKET_NAME.to_owned(),
            state: Arc::new(Mutex::new(FakeState::default())),
        })
    }

    /// Install an object at an explicit generation, as if written by
    /// another client. Returns the record an inode would be branched from.
    pub fn seed(
        &self,
        name: &str,
        contents: &[u8],
        generation: i64,
        meta_generation: i64,
    ) -> MinObject {
        self.seed_with_metadata(name, contents, generation, meta_generation, HashMap::new())
    }

    pub fn seed_with_metadata(
        &self,
        name: &str,
        contents: &[u8],
        generation: i64,
        meta_generation: i64,
        metadata: HashMap<String, String>,
    ) -> MinObject {
        let min = MinObject {
            name: name.to_owned(),
            generation,
            meta_generation,
            size: contents.len() as u64,
            updated: server_time(),
            metadata,
            content_encoding: None,
        };
        let object = Object::new(min.clone(), Some(ExtendedObjectAttributes::default()));
        self.state.lock().objects.insert(
            name.to_owned(),
            StoredObject {
                object,
                contents: Bytes::copy_from_slice(contents),
            },
        );
        min
    }

    /// Delete an object out from under any inode, as an external client
    /// would.
    pub fn delete(&self, name: &str) {
        self.state.lock().objects.remove(name);
    }

    pub fn contents_of(&self, name: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .objects
            .get(name)
            .map(|o| o.contents.to_vec())
    }

    pub fn record_of(&self, name: &str) -> Option<MinObject> {
        self.state
            .lock()
            .objects
            .get(name)
            .map(|o| o.object.min.clone())
    }

    pub fn stat_count(&self) -> u64 {
        self.state.lock().stat_count
    }

    pub fn reader_count(&self) -> u64 {
        self.state.lock().reader_count
    }

    pub fn create_count(&self) -> u64 {
        self.state.lock().create_count
    }

    pub fn update_count(&self) -> u64 {
        self.state.lock().update_count
    }

    pub fn chunk_writer_count(&self) -> u64 {
        self.state.lock().chunk_writer_count
    }

    pub fn last_stat_request(&self) -> Option<StatObjectRequest> {
        self.state.lock().last_stat_request.clone()
    }

    /// Make the next chunk-writer creation fail with `msg`.
    pub fn fail_chunk_writer(&self, msg: &str) {
        self.state.lock().fail_chunk_writer = Some(msg.to_owned());
    }

    /// Make every chunk write fail with `msg`.
    pub fn fail_write_chunk(&self, msg: &str) {
        self.state.lock().fail_write_chunk = Some(msg.to_owned());
    }

    /// After the next stat returns, replace `name` with `contents` at a new
    /// generation, simulating a client racing in between a caller's stat
    /// and its follow-up write.
    pub fn race_replace_after_next_stat(&self, name: &str, contents: &[u8]) {
        self.state.lock().race_replace_after_next_stat =
            Some((name.to_owned(), contents.to_vec()));
    }
}

fn check_create_preconditions(
    state: &FakeState,
    req: &CreateObjectRequest,
) -> Result<(), StorageError> {
    let live = state.objects.get(&req.name);
    if let Some(gen_precond) = req.generation_precondition {
        match (gen_precond, live) {
            (0, Some(_)) => {
                return Err(StorageError::Precondition {
                    message: format!("object {} already exists", req.name),
                });
            }
            (0, None) => {}
            (want, Some(stored)) if stored.object.min.generation != want => {
                return Err(StorageError::Precondition {
                    message: format!(
                        "generation mismatch on {}: want {want}, have {}",
                        req.name, stored.object.min.generation
                    ),
                });
            }
            (_, None) => {
                return Err(StorageError::Precondition {
                    message: format!("object {} does not exist", req.name),
                });
            }
            _ => {}
        }
    }
    if let (Some(want), Some(stored)) = (req.meta_generation_precondition, live) {
        if stored.object.min.meta_generation != want {
            return Err(StorageError::Precondition {
                message: format!(
                    "metageneration mismatch on {}: want {want}, have {}",
                    req.name, stored.object.min.meta_generation
                ),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl Bucket for FakeBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stat_object(
        &self,
        ctx: &CancellationToken,
        req: &StatObjectRequest,
    ) -> Result<(MinObject, Option<ExtendedObjectAttributes>), StorageError> {
        if ctx.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let mut state = self.state.lock();
        state.stat_count += 1;
        state.last_stat_request = Some(req.clone());

        let stored = state.objects.get(&req.name).ok_or(StorageError::NotFound {
            name: req.name.clone(),
        })?;
        let extended = req
            .return_extended_object_attributes
            .then(|| stored.object.extended.clone());
        let reply = (stored.object.min.clone(), extended);

        if let Some((name, contents)) = state.race_replace_after_next_stat.take() {
            let generation = state
                .objects
                .get(&name)
                .map_or(1, |o| o.object.min.generation + 1);
            let min = MinObject {
                name: name.clone(),
                generation,
                meta_generation: 1,
                size: contents.len() as u64,
                updated: server_time(),
                metadata: HashMap::new(),
                content_encoding: None,
            };
            state.objects.insert(
                name,
                StoredObject {
                    object: Object::new(min, Some(ExtendedObjectAttributes::default())),
                    contents: Bytes::from(contents),
                },
            );
        }

        Ok(reply)
    }

    async fn new_reader(
        &self,
        ctx: &CancellationToken,
        req: &ReadObjectRequest,
    ) -> Result<ObjectReader, StorageError> {
        if ctx.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let mut state = self.state.lock();
        state.reader_count += 1;

        // Reads are generation-pinned: a replaced object answers NotFound.
        let stored = state
            .objects
            .get(&req.name)
            .filter(|o| o.object.min.generation == req.generation)
            .ok_or(StorageError::NotFound {
                name: req.name.clone(),
            })?;
        let reader: ObjectReader = Box::pin(std::io::Cursor::new(stored.contents.to_vec()));
        Ok(reader)
    }

    async fn create_object(
        &self,
        ctx: &CancellationToken,
        req: &CreateObjectRequest,
    ) -> Result<Object, StorageError> {
        if ctx.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let mut state = self.state.lock();
        state.create_count += 1;

        check_create_preconditions(&state, req)?;

        let generation = state
            .objects
            .get(&req.name)
            .map_or(1, |o| o.object.min.generation + 1);
        let min = MinObject {
            name: req.name.clone(),
            generation,
            meta_generation: 1,
            size: req.contents.len() as u64,
            updated: server_time(),
            metadata: req.metadata.clone(),
            content_encoding: req.content_encoding.clone(),
        };
        let object = Object::new(min, Some(ExtendedObjectAttributes::default()));
        state.objects.insert(
            req.name.clone(),
            StoredObject {
                object: object.clone(),
                contents: req.contents.clone(),
            },
        );
        Ok(object)
    }

    async fn update_object(
        &self,
        ctx: &CancellationToken,
        req: &UpdateObjectRequest,
    ) -> Result<Object, StorageError> {
        if ctx.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let mut state = self.state.lock();
        state.update_count += 1;

        let stored = state
            .objects
            .get_mut(&req.name)
            .filter(|o| req.generation == 0 || o.object.min.generation == req.generation)
            .ok_or(StorageError::NotFound {
                name: req.name.clone(),
            })?;

        if let Some(want) = req.meta_generation_precondition {
            if stored.object.min.meta_generation != want {
                return Err(StorageError::Precondition {
                    message: format!(
                        "metageneration mismatch on {}: want {want}, have {}",
                        req.name, stored.object.min.meta_generation
                    ),
                });
            }
        }

        for (key, value) in &req.metadata {
            match value {
                Some(value) => {
                    stored
                        .object
                        .min
                        .metadata
                        .insert(key.clone(), value.clone());
                }
                None => {
                    stored.object.min.metadata.remove(key);
                }
            }
        }
        stored.object.min.meta_generation += 1;
        stored.object.min.updated = server_time();
        Ok(stored.object.clone())
    }

    async fn create_object_chunk_writer(
        &self,
        ctx: &CancellationToken,
        name: &str,
    ) -> Result<Box<dyn ChunkWriter>, StorageError> {
        if ctx.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let mut state = self.state.lock();
        state.chunk_writer_count += 1;

        if let Some(msg) = &state.fail_chunk_writer {
            return Err(StorageError::Transport(msg.clone()));
        }

        Ok(Box::new(FakeChunkWriter {
            name: name.to_owned(),
            buf: Vec::new(),
            fail_write_chunk: state.fail_write_chunk.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeChunkWriter {
    name: String,
    buf: Vec<u8>,
    fail_write_chunk: Option<String>,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl ChunkWriter for FakeChunkWriter {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), StorageError> {
        if let Some(msg) = &self.fail_write_chunk {
            return Err(StorageError::Transport(msg.clone()));
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    async fn finalize(
        self: Box<Self>,
        metadata: HashMap<String, String>,
    ) -> Result<Object, StorageError> {
        let name = self.name.clone();
        let contents = Bytes::from(self.buf);
        let mut state = self.state.lock();
        let generation = state
            .objects
            .get(&name)
            .map_or(1, |o| o.object.min.generation + 1);
        let min = MinObject {
            name: name.clone(),
            generation,
            meta_generation: 1,
            size: contents.len() as u64,
            updated: server_time(),
            metadata,
            content_encoding: None,
        };
        let object = Object::new(min, Some(ExtendedObjectAttributes::default()));
        state.objects.insert(
            name,
            StoredObject {
                object: object.clone(),
                contents,
            },
        );
        Ok(object)
    }
}

/// Everything an inode test needs, wired to one fake bucket.
pub struct Fixture {
    pub fake: Arc<FakeBucket>,
    pub clock: Arc<SimulatedClock>,
    pub write_config: WriteConfig,
    pub content_cache: Option<Arc<ContentCache>>,
    pub global_budget: Arc<Semaphore>,
    next_id: std::sync::atomic::AtomicU64,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_write_config(WriteConfig::default())
    }

    pub fn with_write_config(write_config: WriteConfig) -> Self {
        let global_budget = Arc::new(Semaphore::new(
            usize::try_from(write_config.global_max_blocks).unwrap(),
        ));
        Self {
            fake: FakeBucket::new(),
            clock: test_clock(),
            write_config,
            content_cache: None,
            global_budget,
            next_id: std::sync::atomic::AtomicU64::new(2),
        }
    }

    pub fn with_content_cache(mut self, max_bytes: u64) -> Self {
        self.content_cache = Some(ContentCache::new(max_bytes));
        self
    }

    pub fn syncer(&self) -> SyncerBucket {
        SyncerBucket::new(self.fake.clone())
    }

    /// An inode branched from an existing remote object.
    pub fn remote_inode(&self, object_name: &str, source: MinObject) -> FileInode {
        self.inode(object_name, Some(source), false)
    }

    /// An inode for a file that has never been persisted.
    pub fn local_inode(&self, object_name: &str) -> FileInode {
        self.inode(object_name, None, true)
    }

    fn inode(&self, object_name: &str, source: Option<MinObject>, local: bool) -> FileInode {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        FileInode::new(
            id,
            Name::new(BUCKET_NAME, object_name),
            source,
            InodeAttributes::file_template(0o644, 1000, 1000),
            self.syncer(),
            self.content_cache.clone(),
            self.clock.clone(),
            local,
            self.write_config.clone(),
            self.global_budget.clone(),
        )
    }
}

pub fn ctx() -> CancellationToken {
    CancellationToken::new()
}
