//! The file inode: reconciles the remote object, the local scratch, and
//! the streaming write pipeline behind one POSIX-facing surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use gcs_store::{MinObject, Object, ReadObjectRequest, StatObjectRequest, UpdateObjectRequest};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt as _;
use tokio::sync::{MutexGuard, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace};

use crate::clock::Clock;
use crate::config::WriteConfig;
use crate::fs::bufferedwrites::BufferedWriteHandler;
use crate::fs::content::{CacheKey, ContentCache, Scratch, SharedScratch};
use crate::fs::err::FileError;
use crate::fs::meta::{
    format_mtime, parse_base0_int, parse_mtime, system_time_from_unix_seconds,
    LEGACY_MTIME_METADATA_KEY, MTIME_METADATA_KEY,
};
use crate::fs::syncer::SyncerBucket;

use super::{Generation, InodeAttributes, InodeId, LookupCount, Name};

/// What currently backs the file's content.
///
/// `Pristine` means the remote object alone is authoritative. The other two
/// states are mutually exclusive by construction: a file is either being
/// edited in place through a scratch or written as a stream, never both.
enum Backing {
    Pristine,
    Scratch(SharedScratch),
    Streaming(BufferedWriteHandler),
}

/// Mutable inode state, guarded by the inode mutex.
struct FileState {
    /// The source object this inode derives from. For non-local inodes its
    /// name always equals the inode's object key.
    src: MinObject,
    backing: Backing,

    /// A file that has never been persisted to the store.
    local: bool,
    unlinked: bool,
    destroyed: bool,
    lookups: LookupCount,
}

/// A regular-file inode.
///
/// All mutable operations go through [`lock`](Self::lock); the returned
/// guard pins the state machine to one logical operation at a time and
/// re-verifies the inode invariants on acquisition and release (debug
/// builds). Callers needing parallelism hold different inode locks
/// concurrently.
pub struct FileInode {
    id: InodeId,
    name: Name,
    attrs: InodeAttributes,
    bucket: SyncerBucket,
    clock: Arc<dyn Clock>,
    content_cache: Option<Arc<ContentCache>>,
    write_config: WriteConfig,
    global_block_budget: Arc<Semaphore>,
    state: tokio::sync::Mutex<FileState>,
}

impl FileInode {
    /// Create a file inode. `source` must be `Some` for non-local inodes
    /// and carries the remote record this inode is branched from; local
    /// inodes have no remote counterpart yet.
    #[expect(clippy::too_many_arguments, reason = "assembled once by the VFS layer")]
    pub fn new(
        id: InodeId,
        name: Name,
        source: Option<MinObject>,
        attrs: InodeAttributes,
        bucket: SyncerBucket,
        content_cache: Option<Arc<ContentCache>>,
        clock: Arc<dyn Clock>,
        local: bool,
        write_config: WriteConfig,
        global_block_budget: Arc<Semaphore>,
    ) -> Self {
        debug_assert!(name.is_file(), "illegal file name: {name}");
        debug_assert!(
            local || source.is_some(),
            "non-local inode {name} requires a source object"
        );

        let src = source.unwrap_or_else(|| MinObject {
            name: name.gcs_object_name().to_owned(),
            ..MinObject::default()
        });

        Self {
            id,
            name,
            attrs,
            bucket,
            clock,
            content_cache,
            write_config,
            global_block_budget,
            state: tokio::sync::Mutex::new(FileState {
                src,
                backing: Backing::Pristine,
                local,
                unlinked: false,
                destroyed: false,
                lookups: LookupCount::new(id),
            }),
        }
    }

    pub fn id(&self) -> InodeId {
        self.id
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Acquire the inode mutex. Dropping the guard releases it.
    pub async fn lock(&self) -> FileInodeGuard<'_> {
        let state = self.state.lock().await;
        let guard = FileInodeGuard { inode: self, state };
        guard.check_invariants();
        guard
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.bucket.name(), self.name.gcs_object_name())
    }
}

/// Exclusive access to one inode's state for the duration of one logical
/// operation.
pub struct FileInodeGuard<'a> {
    inode: &'a FileInode,
    state: MutexGuard<'a, FileState>,
}

impl Drop for FileInodeGuard<'_> {
    fn drop(&mut self) {
        self.check_invariants();
    }
}

impl FileInodeGuard<'_> {
    fn check_invariants(&self) {
        if !cfg!(debug_assertions) || self.state.destroyed {
            return;
        }

        debug_assert!(
            self.inode.name.is_file(),
            "illegal file name: {}",
            self.inode.name
        );

        if !self.state.local {
            debug_assert!(
                self.state.src.name == self.inode.name.gcs_object_name(),
                "name mismatch: {:?} vs. {:?}",
                self.state.src.name,
                self.inode.name.gcs_object_name()
            );
        }

        if let Backing::Scratch(scratch) = &self.state.backing {
            scratch.lock().check_invariants();
        }
    }

    pub fn is_local(&self) -> bool {
        self.state.local
    }

    pub fn is_unlinked(&self) -> bool {
        self.state.unlinked
    }

    /// Mark the inode unlinked. Purely local; the remote object is not
    /// touched.
    pub fn unlink(&mut self) {
        self.state.unlinked = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.destroyed
    }

    /// A copy of the source object record this inode derives from.
    pub fn source(&self) -> MinObject {
        self.state.src.clone()
    }

    pub fn source_generation(&self) -> Generation {
        Generation::new(self.state.src.generation, self.state.src.meta_generation)
    }

    /// True when the source object alone defines the file's content, so
    /// callers may serve reads straight from the store without this inode.
    pub fn source_generation_is_authoritative(&self) -> bool {
        matches!(self.state.backing, Backing::Pristine)
    }

    pub fn increment_lookup_count(&mut self) {
        self.state.lookups.inc();
    }

    /// Returns true iff the inode should now be destroyed.
    pub fn decrement_lookup_count(&mut self, n: u64) -> bool {
        self.state.lookups.dec(n)
    }

    /// Stat the remote object and decide whether this inode has been
    /// clobbered: the object vanished (for non-local inodes) or its
    /// generation no longer matches the source record.
    async fn clobbered(
        &mut self,
        ctx: &CancellationToken,
        force_fetch: bool,
        include_extended: bool,
    ) -> Result<(Option<Object>, bool), FileError> {
        let req = StatObjectRequest {
            name: self.inode.name.gcs_object_name().to_owned(),
            force_fetch_from_backend: force_fetch,
            return_extended_object_attributes: include_extended,
        };
        match self.inode.bucket.stat_object(ctx, &req).await {
            Ok((min, extended)) => {
                let remote = Generation::new(min.generation, min.meta_generation);
                let clobbered = self.source_generation() != remote;
                Ok((Some(Object::new(min, extended)), clobbered))
            }
            // Local files legitimately have no remote counterpart.
            Err(e) if e.is_not_found() => Ok((None, !self.state.local)),
            Err(e) => Err(FileError::storage("StatObject", e)),
        }
    }

    /// Download the pinned source generation in full. `NotFound` here means
    /// the generation was replaced externally: a clobber.
    async fn download(&mut self, ctx: &CancellationToken) -> Result<Vec<u8>, FileError> {
        let req = ReadObjectRequest {
            name: self.state.src.name.clone(),
            generation: self.state.src.generation,
            read_compressed: self.state.src.has_gzip_content_encoding(),
        };
        let mut reader = match self.inode.bucket.new_reader(ctx, &req).await {
            Ok(reader) => reader,
            Err(e) if e.is_not_found() => {
                return Err(FileError::clobbered_by(FileError::storage("NewReader", e)));
            }
            Err(e) => return Err(FileError::storage("NewReader", e)),
        };

        let mut contents = Vec::with_capacity(usize::try_from(self.state.src.size).unwrap_or(0));
        reader
            .read_to_end(&mut contents)
            .await
            .map_err(|e| {
                FileError::storage("NewReader", gcs_store::StorageError::Transport(e.to_string()))
            })?;
        Ok(contents)
    }

    /// Materialize the scratch backing if it is absent. With the content
    /// cache enabled the scratch is shared through the cache, adopted only
    /// when the cached generation matches the source record.
    async fn ensure_content(&mut self, ctx: &CancellationToken) -> Result<(), FileError> {
        debug_assert!(
            !matches!(self.state.backing, Backing::Streaming(_)),
            "ensure_content while an upload is in progress"
        );

        if let Some(cache) = self.inode.content_cache.clone() {
            let key = self.inode.cache_key();
            let generation = self.source_generation();
            if let Some(scratch) = cache.get(&key, generation) {
                self.state.backing = Backing::Scratch(scratch);
                return Ok(());
            }

            let contents = self.download(ctx).await?;
            let scratch =
                cache.add_or_replace(key, generation, contents, Arc::clone(&self.inode.clock));
            self.state.backing = Backing::Scratch(scratch);
        } else {
            if matches!(self.state.backing, Backing::Scratch(_)) {
                return Ok(());
            }

            let contents = self.download(ctx).await?;
            self.state.backing = Backing::Scratch(Arc::new(Mutex::new(Scratch::from_bytes(
                contents,
                Arc::clone(&self.inode.clock),
            ))));
        }

        Ok(())
    }

    /// Whether a write arriving now may divert to the streaming path.
    fn streaming_eligible(&self) -> bool {
        self.inode.write_config.experimental_streaming_writes
            && (self.state.local || self.state.src.size == 0)
    }

    fn ensure_buffered_write_handler(&mut self) {
        if !matches!(self.state.backing, Backing::Pristine) {
            return;
        }
        trace!(ino = self.inode.id, "starting streaming write");
        self.state.backing = Backing::Streaming(BufferedWriteHandler::new(
            self.inode.name.gcs_object_name(),
            self.inode.bucket.clone(),
            &self.inode.write_config,
            Arc::clone(&self.inode.global_block_budget),
            self.inode.clock.as_ref(),
        ));
    }

    /// Serve a positional read. A short count (including 0) signals EOF.
    #[instrument(name = "FileInode::read", skip(self, ctx, dst), fields(ino = self.inode.id))]
    pub async fn read(
        &mut self,
        ctx: &CancellationToken,
        dst: &mut [u8],
        offset: u64,
    ) -> Result<usize, FileError> {
        if matches!(self.state.backing, Backing::Streaming(_)) {
            return Err(FileError::ReadDuringUpload);
        }

        self.ensure_content(ctx).await?;
        match &self.state.backing {
            Backing::Scratch(scratch) => Ok(scratch.lock().read_at(dst, offset)),
            _ => unreachable!("ensure_content guarantees a scratch backing"),
        }
    }

    /// Serve a positional write.
    #[instrument(name = "FileInode::write", skip(self, ctx, data), fields(ino = self.inode.id))]
    pub async fn write(
        &mut self,
        ctx: &CancellationToken,
        data: &[u8],
        offset: u64,
    ) -> Result<(), FileError> {
        if matches!(self.state.backing, Backing::Pristine) && self.streaming_eligible() {
            self.ensure_buffered_write_handler();
        }

        if let Backing::Streaming(bwh) = &mut self.state.backing {
            return bwh.write(data, offset).await;
        }

        self.ensure_content(ctx).await?;
        match &self.state.backing {
            Backing::Scratch(scratch) => {
                scratch.lock().write_at(data, offset);
                Ok(())
            }
            _ => unreachable!("ensure_content guarantees a scratch backing"),
        }
    }

    /// Truncate the file to `size`. Always goes through the scratch.
    #[instrument(name = "FileInode::truncate", skip(self, ctx), fields(ino = self.inode.id))]
    pub async fn truncate(&mut self, ctx: &CancellationToken, size: u64) -> Result<(), FileError> {
        if matches!(self.state.backing, Backing::Streaming(_)) {
            return Err(FileError::ReadDuringUpload);
        }

        self.ensure_content(ctx).await?;
        match &self.state.backing {
            Backing::Scratch(scratch) => {
                scratch.lock().truncate(size);
                Ok(())
            }
            _ => unreachable!("ensure_content guarantees a scratch backing"),
        }
    }

    /// Set the file's mtime. May involve a round trip to the store, but
    /// not when local content will carry the mtime at the next sync anyway.
    #[instrument(name = "FileInode::set_mtime", skip(self, ctx, mtime), fields(ino = self.inode.id))]
    pub async fn set_mtime(
        &mut self,
        ctx: &CancellationToken,
        mtime: SystemTime,
    ) -> Result<(), FileError> {
        // An in-flight upload records the mtime for its finalize.
        if let Backing::Streaming(bwh) = &mut self.state.backing {
            bwh.set_mtime(mtime);
            return Ok(());
        }

        // Dirty content will be synced soon and persists the mtime then,
        // saving a round trip. Local files are not in the store yet, so
        // there is nothing remote to patch either way.
        if let Backing::Scratch(scratch) = &self.state.backing {
            let dirty = scratch.lock().stat().mtime.is_some();
            if dirty || self.state.local {
                scratch.lock().set_mtime(mtime);
                return Ok(());
            }
        }

        // Otherwise patch the backing object's metadata, preconditioned on
        // the metageneration we know.
        let src_gen = self.source_generation();
        let req = UpdateObjectRequest {
            name: self.state.src.name.clone(),
            generation: src_gen.object,
            meta_generation_precondition: Some(src_gen.meta),
            metadata: HashMap::from([(
                MTIME_METADATA_KEY.to_owned(),
                Some(format_mtime(mtime)),
            )]),
        };

        match self.inode.bucket.update_object(ctx, &req).await {
            Ok(obj) => {
                self.state.src = obj.to_min();
                Ok(())
            }
            // The object is gone or moved on: the file was unlinked
            // externally. Nothing useful to report to the caller.
            Err(e) if e.is_not_found() || e.is_precondition() => Ok(()),
            Err(e) => Err(FileError::storage("UpdateObject", e)),
        }
    }

    /// Blend attributes from the source record, any local backing, and a
    /// clobber probe.
    #[instrument(name = "FileInode::attributes", skip(self, ctx), fields(ino = self.inode.id))]
    pub async fn attributes(
        &mut self,
        ctx: &CancellationToken,
    ) -> Result<InodeAttributes, FileError> {
        let mut attrs = self.inode.attrs;
        attrs.size = self.state.src.size;
        attrs.mtime = self.state.src.updated;

        // Files copied in by upload tools carry the legacy key; ignore it
        // when unparseable.
        if let Some(raw) = self.state.src.metadata.get(LEGACY_MTIME_METADATA_KEY) {
            if let Some(secs) = parse_base0_int(raw) {
                attrs.mtime = system_time_from_unix_seconds(secs);
            }
        }

        // Files synced by this file system carry the canonical key; an
        // unparseable value is a real error.
        if let Some(formatted) = self.state.src.metadata.get(MTIME_METADATA_KEY) {
            attrs.mtime = parse_mtime(formatted).map_err(|e| FileError::BadMetadata {
                value: formatted.clone(),
                source: e,
            })?;
        }

        match &self.state.backing {
            Backing::Scratch(scratch) => {
                let stat = scratch.lock().stat();
                attrs.size = stat.size;
                if let Some(mtime) = stat.mtime {
                    attrs.mtime = mtime;
                }
            }
            Backing::Streaming(bwh) => {
                let info = bwh.write_file_info();
                attrs.size = info.total_size;
                attrs.mtime = info.mtime;
            }
            Backing::Pristine => {}
        }

        attrs.atime = attrs.mtime;
        attrs.ctime = attrs.mtime;

        // A clobbered object reads as unlinked on the host; so does a local
        // file that was unlinked before ever being synced.
        let (_, clobbered) = self.clobbered(ctx, false, false).await?;
        attrs.nlink = if clobbered || (self.state.local && self.state.unlinked) {
            0
        } else {
            1
        };

        Ok(attrs)
    }

    /// Write local content out to the store. After success the source
    /// record reflects the newly written generation and the inode is
    /// source-authoritative again.
    #[instrument(name = "FileInode::sync", skip(self, ctx), fields(ino = self.inode.id))]
    pub async fn sync(&mut self, ctx: &CancellationToken) -> Result<(), FileError> {
        if matches!(self.state.backing, Backing::Pristine) {
            return Ok(());
        }
        if matches!(self.state.backing, Backing::Scratch(_)) {
            return self.sync_scratch(ctx).await;
        }
        self.sync_streaming().await
    }

    async fn sync_scratch(&mut self, ctx: &CancellationToken) -> Result<(), FileError> {
        // Listings omit extended attributes, so the held source record may
        // lack them. Re-stat with full projection and sync against that, so
        // the rewrite carries ACLs and friends forward.
        let (latest, clobbered) = self.clobbered(ctx, true, true).await?;
        if clobbered {
            return Err(FileError::clobbered());
        }

        let scratch = match &self.state.backing {
            Backing::Scratch(scratch) => Arc::clone(scratch),
            _ => unreachable!("sync_scratch requires a scratch backing"),
        };

        let new_obj = match self
            .inode
            .bucket
            .sync_object(ctx, &self.inode.name, latest.as_ref(), &scratch)
            .await
        {
            Ok(obj) => obj,
            Err(e) if e.is_precondition() => {
                return Err(FileError::clobbered_by(FileError::storage("SyncObject", e)));
            }
            Err(e) => return Err(FileError::storage("SyncObject", e)),
        };

        self.state.src = new_obj.to_min();
        self.state.local = false;
        self.release_scratch();
        Ok(())
    }

    async fn sync_streaming(&mut self) -> Result<(), FileError> {
        let new_obj = match &mut self.state.backing {
            Backing::Streaming(bwh) => bwh.finalize().await?,
            _ => unreachable!("sync_streaming requires a streaming backing"),
        };

        self.state.src = new_obj.to_min();
        self.state.local = false;
        self.state.backing = Backing::Pristine;
        Ok(())
    }

    /// Drop the scratch backing, after the source record has been replaced.
    fn release_scratch(&mut self) {
        let backing = std::mem::replace(&mut self.state.backing, Backing::Pristine);
        if let Backing::Scratch(scratch) = backing {
            if let Some(cache) = &self.inode.content_cache {
                cache.remove(&self.inode.cache_key());
            } else {
                scratch.lock().destroy();
            }
        }
    }

    /// Give a freshly created file its content backing: a streaming upload
    /// when eligible, otherwise an empty scratch stamped with the creation
    /// time.
    pub async fn create_buffered_or_temp_writer(&mut self) -> Result<(), FileError> {
        if self.state.local && self.inode.write_config.experimental_streaming_writes {
            self.ensure_buffered_write_handler();
            return Ok(());
        }

        self.state.backing = Backing::Scratch(Arc::new(Mutex::new(Scratch::new_empty(
            Arc::clone(&self.inode.clock),
        ))));
        Ok(())
    }

    /// Pre-populate the shared content cache for this inode. No-op unless
    /// the cache is enabled.
    pub async fn cache_ensure_content(&mut self, ctx: &CancellationToken) -> Result<(), FileError> {
        if self.inode.content_cache.is_none()
            || matches!(self.state.backing, Backing::Streaming(_))
        {
            return Ok(());
        }
        self.ensure_content(ctx).await
    }

    /// Tear down the inode. Any in-flight upload is abandoned; the caller
    /// is expected to have synced or unlinked first.
    #[instrument(name = "FileInode::destroy", skip(self), fields(ino = self.inode.id))]
    pub fn destroy(&mut self) {
        self.state.destroyed = true;
        let backing = std::mem::replace(&mut self.state.backing, Backing::Pristine);
        match backing {
            Backing::Scratch(scratch) => {
                if let Some(cache) = &self.inode.content_cache {
                    cache.remove(&self.inode.cache_key());
                } else {
                    scratch.lock().destroy();
                }
            }
            Backing::Streaming(mut bwh) => bwh.destroy(),
            Backing::Pristine => {}
        }
    }
}
