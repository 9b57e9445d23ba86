//! Namespace store: create/read/update/unlink/remove plus the
//! hierarchical path resolver (spec §4.1).
//!
//! The "Namespace lock" of spec §5 is the `tokio::sync::RwLock` guarding
//! [`NamespaceInner`]: readers (stat, lookup, readdir) take a read
//! guard; mutations take a write guard that is held only for the
//! in-memory update plus the change-log append, never across an
//! unrelated I/O wait.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{MgmError, MgmResult};
use crate::ids::{IdAllocator, ROOT_CONTAINER_ID};
use crate::namespace::changelog::{self, ChangeLog, RecordTag};
use crate::namespace::container::{Container, Timestamp};
use crate::namespace::file::{File, LayoutId};

/// Tagged-variant change event (Design Notes §9 "Change listeners"),
/// consumed by [`crate::fsview::FileSystemView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Created,
    Deleted,
    LocationAdded,
    LocationReplaced,
    LocationRemoved,
    LocationUnlinked,
}

#[derive(Debug, Clone, Copy)]
pub struct FileEvent {
    pub action: FileAction,
    pub file_id: u64,
    pub old_location: Option<u32>,
    pub new_location: Option<u32>,
}

/// Either a container or a file, resolved from a path or a child lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRef {
    Container(u64),
    File(u64),
}

type Listener = Box<dyn Fn(FileEvent) + Send + Sync>;

struct NamespaceInner {
    containers: HashMap<u64, Container>,
    files: HashMap<u64, File>,
    /// `(parent_id, child_name) -> child`, the O(1) half of path
    /// resolution; the other half is each entry's own `parent_id`.
    child_index: HashMap<(u64, String), ChildRef>,
}

impl NamespaceInner {
    fn new() -> Self {
        let root = Container::new_root();
        let mut containers = HashMap::new();
        containers.insert(root.id, root);
        Self { containers, files: HashMap::new(), child_index: HashMap::new() }
    }

    fn index_child(&mut self, parent_id: u64, name: String, child: ChildRef) {
        self.child_index.insert((parent_id, name), child);
    }

    fn deindex_child(&mut self, parent_id: u64, name: &str) {
        self.child_index.remove(&(parent_id, name.to_string()));
    }
}

/// Persists containers and files in two parallel change logs; replays
/// them into in-memory indexes on start (spec §4.1).
pub struct NamespaceStore {
    inner: RwLock<NamespaceInner>,
    container_log: ChangeLog,
    file_log: ChangeLog,
    id_alloc: IdAllocator,
    /// Directory-mtime fast path keyed by container id (spec §4.1
    /// "Directory modification time is cached in a separate in-memory
    /// map ... to avoid a write on every child change").
    dir_mtime_cache: moka::sync::Cache<u64, Timestamp>,
    /// `MgmDirectoryModificationTime`-style cache of the last file id
    /// that touched a container (spec §4.6 step 13).
    dir_last_touch_cache: moka::sync::Cache<u64, u64>,
    listeners: std::sync::Mutex<Vec<Listener>>,
}

impl NamespaceStore {
    /// Opens the two change logs at `container_log_path`/`file_log_path`
    /// and replays them: containers first (to reconstruct the tree
    /// skeleton), then files (to attach them) (spec §4.1).
    pub async fn open(container_log_path: impl AsRef<Path>, file_log_path: impl AsRef<Path>) -> MgmResult<Arc<Self>> {
        let container_log = ChangeLog::open(container_log_path.as_ref())?;
        let file_log = ChangeLog::open(file_log_path.as_ref())?;

        let mut inner = NamespaceInner::new();
        let mut id_alloc = IdAllocator::default();

        let container_records: Vec<changelog::Record<Container>> = container_log.replay().await?;
        for record in container_records {
            id_alloc.observe(record.id);
            match record.tag {
                RecordTag::Create | RecordTag::Update => {
                    if let Some(container) = record.payload {
                        if let Some(parent_id) = container.parent_id {
                            inner.index_child(parent_id, container.name.clone(), ChildRef::Container(container.id));
                        }
                        inner.containers.insert(container.id, container);
                    }
                }
                RecordTag::Unlink | RecordTag::Remove => {
                    inner.containers.remove(&record.id);
                }
            }
        }

        let file_records: Vec<changelog::Record<File>> = file_log.replay().await?;
        for record in file_records {
            id_alloc.observe(record.id);
            match record.tag {
                RecordTag::Create | RecordTag::Update | RecordTag::Unlink => {
                    if let Some(file) = record.payload {
                        if let Some(parent_id) = file.parent_id {
                            inner.index_child(parent_id, file.name.clone(), ChildRef::File(file.id));
                        }
                        inner.files.insert(file.id, file);
                    }
                }
                RecordTag::Remove => {
                    inner.files.remove(&record.id);
                }
            }
        }

        Ok(Arc::new(Self {
            inner: RwLock::new(inner),
            container_log,
            file_log,
            id_alloc,
            dir_mtime_cache: moka::sync::Cache::new(10_000),
            dir_last_touch_cache: moka::sync::Cache::new(10_000),
            listeners: std::sync::Mutex::new(Vec::new()),
        }))
    }

    /// Registers a change listener, invoked synchronously while the
    /// namespace write lock is held (Design Notes §9).
    pub fn register_listener(&self, listener: Listener) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn notify(&self, event: FileEvent) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(event);
        }
    }

    // ---- path resolution -------------------------------------------------

    fn split_path(path: &str) -> MgmResult<(Vec<&str>, &str)> {
        let trimmed = path.trim_end_matches('/');
        if !trimmed.starts_with('/') {
            return Err(MgmError::invalid("path must be absolute"));
        }
        let mut components: Vec<&str> = trimmed.split('/').filter(|c| !c.is_empty()).collect();
        let last = components.pop().ok_or_else(|| MgmError::invalid("path must not be empty"))?;
        Ok((components, last))
    }

    /// Resolves `path` to a container id, following containers only.
    pub async fn resolve_container(&self, path: &str) -> MgmResult<u64> {
        if path.trim_end_matches('/').is_empty() || path == "/" {
            return Ok(ROOT_CONTAINER_ID);
        }
        let inner = self.inner.read().await;
        let mut current = ROOT_CONTAINER_ID;
        for component in path.trim_matches('/').split('/') {
            match inner.child_index.get(&(current, component.to_string())) {
                Some(ChildRef::Container(id)) => current = *id,
                Some(ChildRef::File(_)) => return Err(MgmError::not_a_directory(path)),
                None => return Err(MgmError::missing_entry(path)),
            }
        }
        Ok(current)
    }

    /// Resolves `path` to either a container or a file.
    pub async fn resolve(&self, path: &str) -> MgmResult<ChildRef> {
        let (parents, last) = Self::split_path(path)?;
        let inner = self.inner.read().await;
        let mut current = ROOT_CONTAINER_ID;
        for component in &parents {
            match inner.child_index.get(&(current, component.to_string())) {
                Some(ChildRef::Container(id)) => current = *id,
                Some(ChildRef::File(_)) => return Err(MgmError::not_a_directory(path)),
                None => return Err(MgmError::missing_entry(path)),
            }
        }
        if last.is_empty() {
            return Ok(ChildRef::Container(ROOT_CONTAINER_ID));
        }
        inner
            .child_index
            .get(&(current, last.to_string()))
            .copied()
            .ok_or_else(|| MgmError::missing_entry(path))
    }

    /// Resolves an id back to its full path in O(depth) (spec §4.1:
    /// "Path resolution caches the inverse of id→parent").
    pub async fn path_of_container(&self, id: u64) -> MgmResult<String> {
        let inner = self.inner.read().await;
        let mut segments = Vec::new();
        let mut current = id;
        loop {
            let container = inner.containers.get(&current).ok_or_else(|| MgmError::missing_entry("stale container id"))?;
            if current == ROOT_CONTAINER_ID {
                break;
            }
            segments.push(container.name.clone());
            current = container.parent_id.ok_or_else(|| MgmError::missing_entry("orphan container"))?;
        }
        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }

    // ---- reads -------------------------------------------------------

    pub async fn get_container(&self, id: u64) -> MgmResult<Container> {
        let mut inner_mtime = None;
        let container = {
            let inner = self.inner.read().await;
            let container = inner.containers.get(&id).cloned().ok_or_else(|| MgmError::missing_entry("no such container"))?;
            inner_mtime = self.dir_mtime_cache.get(&id);
            container
        };
        let mut container = container;
        if let Some(cached) = inner_mtime {
            if cached.seconds >= container.mtime.seconds {
                container.mtime = cached;
            }
        }
        Ok(container)
    }

    pub async fn get_file(&self, id: u64) -> MgmResult<File> {
        let inner = self.inner.read().await;
        inner.files.get(&id).cloned().ok_or_else(|| MgmError::missing_entry("no such file"))
    }

    /// Read-only snapshot of a container's children (spec §9: "Listing
    /// a directory takes a read snapshot of the child-name set").
    pub async fn list_children(&self, id: u64) -> MgmResult<(Vec<String>, Vec<String>)> {
        let inner = self.inner.read().await;
        let container = inner.containers.get(&id).ok_or_else(|| MgmError::missing_entry("no such container"))?;
        Ok((container.child_containers.clone(), container.child_files.clone()))
    }

    // ---- mutations -----------------------------------------------------

    /// Creates containers along `path`, optionally creating missing
    /// intermediate parents (spec §4.1 `createContainer`).
    ///
    /// Mirrors `mkdir -p`: when `recursive` is true and the final
    /// component already exists, returns its id instead of erroring
    /// (spec §8 scenario 1).
    pub async fn create_container(&self, path: &str, recursive: bool, uid: u32, gid: u32) -> MgmResult<u64> {
        let (parents, last) = Self::split_path(path)?;
        let mut inner = self.inner.write().await;
        let mut current = ROOT_CONTAINER_ID;
        for component in &parents {
            match inner.child_index.get(&(current, component.to_string())) {
                Some(ChildRef::Container(id)) => current = *id,
                Some(ChildRef::File(_)) => return Err(MgmError::not_a_directory(path)),
                None => {
                    if !recursive {
                        return Err(MgmError::missing_entry(format!("missing parent for {path}")));
                    }
                    current = self.create_one_container(&mut inner, current, component, uid, gid).await?;
                }
            }
        }

        if last.is_empty() {
            return Ok(current);
        }

        match inner.child_index.get(&(current, last.to_string())) {
            Some(ChildRef::Container(id)) if recursive => Ok(*id),
            Some(_) => Err(MgmError::existing_entry(path)),
            None => self.create_one_container(&mut inner, current, last, uid, gid).await,
        }
    }

    async fn create_one_container(
        &self,
        inner: &mut NamespaceInner,
        parent_id: u64,
        name: &str,
        uid: u32,
        gid: u32,
    ) -> MgmResult<u64> {
        {
            let parent = inner.containers.get(&parent_id).ok_or_else(|| MgmError::missing_entry("missing parent"))?;
            if !parent.allows_write_execute(uid, gid) {
                return Err(MgmError::permission_denied("parent denies write+execute"));
            }
        }
        let id = self.id_alloc.next();
        let container = Container {
            id,
            name: name.to_string(),
            parent_id: Some(parent_id),
            owner_uid: uid,
            owner_gid: gid,
            mode: 0o755,
            ctime: Timestamp::now(),
            mtime: Timestamp::now(),
            xattrs: HashMap::new(),
            child_containers: Vec::new(),
            child_files: Vec::new(),
            quota_node: false,
        };
        self.container_log.append(RecordTag::Create, id, Some(container.clone())).await?;
        inner.index_child(parent_id, name.to_string(), ChildRef::Container(id));
        if let Some(parent) = inner.containers.get_mut(&parent_id) {
            parent.child_containers.push(name.to_string());
            parent.mtime = Timestamp::now();
        }
        inner.containers.insert(id, container);
        self.dir_mtime_cache.insert(parent_id, Timestamp::now());
        Ok(id)
    }

    /// Creates a file with an empty location set (spec §4.1 `createFile`).
    pub async fn create_file(&self, path: &str, uid: u32, gid: u32, layout_id: LayoutId) -> MgmResult<u64> {
        let (parents, last) = Self::split_path(path)?;
        if last.is_empty() {
            return Err(MgmError::invalid("file path must not be empty"));
        }
        let mut inner = self.inner.write().await;
        let mut current = ROOT_CONTAINER_ID;
        for component in &parents {
            match inner.child_index.get(&(current, component.to_string())) {
                Some(ChildRef::Container(id)) => current = *id,
                Some(ChildRef::File(_)) => return Err(MgmError::not_a_directory(path)),
                None => return Err(MgmError::missing_entry(format!("missing parent for {path}"))),
            }
        }
        if inner.child_index.contains_key(&(current, last.to_string())) {
            return Err(MgmError::existing_entry(path));
        }
        {
            let parent = inner.containers.get(&current).ok_or_else(|| MgmError::missing_entry("missing parent"))?;
            if !parent.allows_write_execute(uid, gid) {
                return Err(MgmError::permission_denied("parent denies write+execute"));
            }
        }
        let id = self.id_alloc.next();
        let file = File::new(id, last.to_string(), current, uid, gid, layout_id);
        self.file_log.append(RecordTag::Create, id, Some(file.clone())).await?;
        inner.index_child(current, last.to_string(), ChildRef::File(id));
        if let Some(parent) = inner.containers.get_mut(&current) {
            parent.child_files.push(last.to_string());
            parent.mtime = Timestamp::now();
        }
        inner.files.insert(id, file);
        self.dir_mtime_cache.insert(current, Timestamp::now());
        self.dir_last_touch_cache.insert(current, id);
        self.notify(FileEvent { action: FileAction::Created, file_id: id, old_location: None, new_location: None });
        Ok(id)
    }

    /// Writes a full update record for `file` and applies it in
    /// memory. Callers (commit protocol, quota engine) are expected to
    /// have already mutated the returned clone from [`Self::get_file`].
    ///
    /// Diffs `locations` against the previously stored value and
    /// fires one [`FileEvent`] per change so the File-System View stays
    /// in lock-step with the committed record (spec §4.2, §8
    /// "File-system view consistency").
    pub async fn update_file(&self, file: File) -> MgmResult<()> {
        let mut inner = self.inner.write().await;
        let previous = inner.files.get(&file.id).map(|f| (f.locations.clone(), f.unlinked_locations.clone())).unwrap_or_default();
        self.file_log.append(RecordTag::Update, file.id, Some(file.clone())).await?;
        let new_locations = file.locations.clone();
        let new_unlinked = file.unlinked_locations.clone();
        let file_id = file.id;
        inner.files.insert(file_id, file);
        drop(inner);
        self.emit_location_diff(file_id, &previous.0, &previous.1, &new_locations, &new_unlinked);
        Ok(())
    }

    /// Diffs a file's location sets before/after a mutation and fires
    /// the matching [`FileEvent`] per change, so the File-System View
    /// stays in lock-step with the committed record (spec §4.2, §8
    /// "File-system view consistency"). A location dropped from
    /// `locations` that lands in `unlinked_locations` (the drain/commit
    /// `drop-fs-id` path, spec §4.8 step 3) fires `LocationUnlinked`
    /// rather than `LocationRemoved`, so the Deletion Dispatcher picks
    /// it up from the view's per-fs unlinked set instead of the replica
    /// silently disappearing from both.
    fn emit_location_diff(&self, file_id: u64, before_locations: &[u32], before_unlinked: &[u32], after_locations: &[u32], after_unlinked: &[u32]) {
        for &fs_id in after_locations {
            if !before_locations.contains(&fs_id) {
                self.notify(FileEvent {
                    action: FileAction::LocationAdded,
                    file_id,
                    old_location: None,
                    new_location: Some(fs_id),
                });
            }
        }
        for &fs_id in before_locations {
            if after_locations.contains(&fs_id) {
                continue;
            }
            if after_unlinked.contains(&fs_id) && !before_unlinked.contains(&fs_id) {
                self.notify(FileEvent {
                    action: FileAction::LocationUnlinked,
                    file_id,
                    old_location: Some(fs_id),
                    new_location: None,
                });
            } else {
                self.notify(FileEvent {
                    action: FileAction::LocationRemoved,
                    file_id,
                    old_location: Some(fs_id),
                    new_location: None,
                });
            }
        }
    }

    pub async fn update_container(&self, container: Container) -> MgmResult<()> {
        let mut inner = self.inner.write().await;
        self.container_log.append(RecordTag::Update, container.id, Some(container.clone())).await?;
        inner.containers.insert(container.id, container);
        Ok(())
    }

    /// Detaches a file from its parent. Live locations move to
    /// `unlinked_locations`, scheduling them for physical deletion by
    /// the Deletion Dispatcher (spec §4.1 `unlinkFile`, §4.9).
    pub async fn unlink_file(&self, path: &str) -> MgmResult<u64> {
        let mut inner = self.inner.write().await;
        let (parent_id, id) = match self.resolve_locked(&inner, path)? {
            ChildRef::File(id) => {
                let file = inner.files.get(&id).unwrap();
                (file.parent_id.expect("reachable file has a parent"), id)
            }
            ChildRef::Container(_) => return Err(MgmError::is_a_directory(path)),
        };

        let file = inner.files.get_mut(&id).unwrap();
        let name = file.name.clone();
        file.parent_id = None;
        file.unlinked_locations.append(&mut file.locations);
        file.unlinked_locations.sort_unstable();
        file.unlinked_locations.dedup();
        let snapshot = file.clone();

        inner.deindex_child(parent_id, &name);
        if let Some(parent) = inner.containers.get_mut(&parent_id) {
            parent.child_files.retain(|n| n != &name);
            parent.mtime = Timestamp::now();
        }
        self.file_log.append(RecordTag::Unlink, id, Some(snapshot)).await?;
        self.dir_mtime_cache.insert(parent_id, Timestamp::now());
        self.notify(FileEvent { action: FileAction::Deleted, file_id: id, old_location: None, new_location: None });
        Ok(id)
    }

    /// Physically removes a file once it is fully detached and has no
    /// locations left of either kind (spec §4.1 `unlinkFile` invariant).
    pub async fn finalize_removed_file(&self, id: u64) -> MgmResult<()> {
        let mut inner = self.inner.write().await;
        let file = inner.files.get(&id).ok_or_else(|| MgmError::missing_entry("no such file"))?;
        if !file.eligible_for_remove() {
            return Err(MgmError::invalid("file still has live or unlinked locations"));
        }
        self.file_log.append::<()>(RecordTag::Remove, id, None).await?;
        inner.files.remove(&id);
        Ok(())
    }

    fn resolve_locked(&self, inner: &NamespaceInner, path: &str) -> MgmResult<ChildRef> {
        let (parents, last) = Self::split_path(path)?;
        let mut current = ROOT_CONTAINER_ID;
        for component in &parents {
            match inner.child_index.get(&(current, component.to_string())) {
                Some(ChildRef::Container(id)) => current = *id,
                Some(ChildRef::File(_)) => return Err(MgmError::not_a_directory(path)),
                None => return Err(MgmError::missing_entry(path)),
            }
        }
        inner.child_index.get(&(current, last.to_string())).copied().ok_or_else(|| MgmError::missing_entry(path))
    }

    /// Removes a container; forbidden if non-empty unless `recursive`,
    /// in which case children are deleted bottom-up (spec §4.1 `removeContainer`).
    pub async fn remove_container(&self, path: &str, recursive: bool) -> MgmResult<()> {
        let id = self.resolve_container(path).await?;
        if id == ROOT_CONTAINER_ID {
            return Err(MgmError::permission_denied("cannot remove the root container"));
        }
        let (child_containers, child_files) = self.list_children(id).await?;
        if !recursive && (!child_containers.is_empty() || !child_files.is_empty()) {
            return Err(MgmError::invalid("container is not empty"));
        }
        if recursive {
            for child in child_containers {
                self.remove_container(&format!("{}/{}", path.trim_end_matches('/'), child), true).await?;
            }
            for child in child_files {
                self.unlink_file(&format!("{}/{}", path.trim_end_matches('/'), child)).await?;
            }
        }

        let mut inner = self.inner.write().await;
        let container = inner.containers.get(&id).ok_or_else(|| MgmError::missing_entry(path))?;
        let parent_id = container.parent_id.ok_or_else(|| MgmError::permission_denied("cannot remove the root container"))?;
        let name = container.name.clone();
        self.container_log.append::<()>(RecordTag::Remove, id, None).await?;
        inner.containers.remove(&id);
        inner.deindex_child(parent_id, &name);
        if let Some(parent) = inner.containers.get_mut(&parent_id) {
            parent.child_containers.retain(|n| n != &name);
            parent.mtime = Timestamp::now();
        }
        Ok(())
    }

    /// Moves an entry between two paths, requiring write+execute on
    /// both parents and rejecting a same-name collision unless
    /// `overwrite` is set (spec §4.1 `rename`).
    pub async fn rename(&self, old_path: &str, new_path: &str, uid: u32, gid: u32, overwrite: bool) -> MgmResult<()> {
        let (old_parents, old_name) = Self::split_path(old_path)?;
        let (new_parents, new_name) = Self::split_path(new_path)?;
        let mut inner = self.inner.write().await;

        let mut resolve_parent = |components: &[&str]| -> MgmResult<u64> {
            let mut current = ROOT_CONTAINER_ID;
            for component in components {
                match inner.child_index.get(&(current, component.to_string())) {
                    Some(ChildRef::Container(id)) => current = *id,
                    Some(ChildRef::File(_)) => return Err(MgmError::not_a_directory(old_path)),
                    None => return Err(MgmError::missing_entry(old_path)),
                }
            }
            Ok(current)
        };
        let old_parent_id = resolve_parent(&old_parents)?;
        let new_parent_id = resolve_parent(&new_parents)?;

        {
            let old_parent = inner.containers.get(&old_parent_id).ok_or_else(|| MgmError::missing_entry(old_path))?;
            if !old_parent.allows_write_execute(uid, gid) {
                return Err(MgmError::permission_denied("source parent denies write+execute"));
            }
            let new_parent = inner.containers.get(&new_parent_id).ok_or_else(|| MgmError::missing_entry(new_path))?;
            if !new_parent.allows_write_execute(uid, gid) {
                return Err(MgmError::permission_denied("destination parent denies write+execute"));
            }
        }

        let entry = inner
            .child_index
            .get(&(old_parent_id, old_name.to_string()))
            .copied()
            .ok_or_else(|| MgmError::missing_entry(old_path))?;

        if let Some(existing) = inner.child_index.get(&(new_parent_id, new_name.to_string())) {
            if !overwrite {
                return Err(MgmError::existing_entry(new_path));
            }
            match *existing {
                ChildRef::File(existing_id) => {
                    drop(inner);
                    self.unlink_file(new_path).await?;
                    inner = self.inner.write().await;
                    let _ = existing_id;
                }
                ChildRef::Container(_) => return Err(MgmError::is_a_directory(new_path)),
            }
        }

        inner.deindex_child(old_parent_id, old_name);
        if let Some(parent) = inner.containers.get_mut(&old_parent_id) {
            parent.child_containers.retain(|n| n != old_name);
            parent.child_files.retain(|n| n != old_name);
            parent.mtime = Timestamp::now();
        }

        match entry {
            ChildRef::Container(id) => {
                let mut container = inner.containers.get(&id).cloned().ok_or_else(|| MgmError::missing_entry(old_path))?;
                container.name = new_name.to_string();
                container.parent_id = Some(new_parent_id);
                container.ctime = Timestamp::now();
                self.container_log.append(RecordTag::Update, id, Some(container.clone())).await?;
                inner.containers.insert(id, container);
                inner.index_child(new_parent_id, new_name.to_string(), ChildRef::Container(id));
                if let Some(parent) = inner.containers.get_mut(&new_parent_id) {
                    parent.child_containers.push(new_name.to_string());
                    parent.mtime = Timestamp::now();
                }
            }
            ChildRef::File(id) => {
                let mut file = inner.files.get(&id).cloned().ok_or_else(|| MgmError::missing_entry(old_path))?;
                file.name = new_name.to_string();
                file.parent_id = Some(new_parent_id);
                file.ctime = Timestamp::now();
                self.file_log.append(RecordTag::Update, id, Some(file.clone())).await?;
                inner.files.insert(id, file);
                inner.index_child(new_parent_id, new_name.to_string(), ChildRef::File(id));
                if let Some(parent) = inner.containers.get_mut(&new_parent_id) {
                    parent.child_files.push(new_name.to_string());
                    parent.mtime = Timestamp::now();
                }
            }
        }
        Ok(())
    }

    /// Runs compaction of both logs: keeps only the newest record per
    /// id, drops ids whose newest record is a remove, and atomically
    /// replaces each log file. Readers may continue during the scan;
    /// only the final rename briefly excludes writers (spec §4.1).
    pub async fn compact(self: &Arc<Self>) -> MgmResult<()> {
        let container_records: Vec<changelog::Record<Container>> = self.container_log.replay().await?;
        let compacted_containers: Vec<(RecordTag, u64, Container)> = changelog::compact(container_records)
            .into_iter()
            .map(|r| (RecordTag::Update, r.id, r.payload.expect("non-remove record has a payload")))
            .collect();

        let file_records: Vec<changelog::Record<File>> = self.file_log.replay().await?;
        let compacted_files: Vec<(RecordTag, u64, File)> = changelog::compact(file_records)
            .into_iter()
            .map(|r| (RecordTag::Update, r.id, r.payload.expect("non-remove record has a payload")))
            .collect();

        let container_path = self.container_log.path().to_path_buf();
        let file_path = self.file_log.path().to_path_buf();
        changelog::rewrite(&container_path, compacted_containers).await?;
        changelog::rewrite(&file_path, compacted_files).await?;
        Ok(())
    }

    /// Paths of the two change logs, so a slave replicator (spec
    /// §4.10) can open its own read-only tailing handles against the
    /// same files the master appends to.
    pub fn log_paths(&self) -> (&Path, &Path) {
        (self.container_log.path(), self.file_log.path())
    }

    /// Applies one replayed container record straight to the in-memory
    /// tree, without re-appending to the log — used by the slave side
    /// of replication, which only ever tails a log the master already
    /// wrote (spec §4.10 "applies them to its in-memory trees and
    /// indexes").
    pub async fn apply_external_container(&self, tag: RecordTag, id: u64, payload: Option<Container>) -> MgmResult<()> {
        let mut inner = self.inner.write().await;
        match tag {
            RecordTag::Remove => {
                if let Some(existing) = inner.containers.remove(&id) {
                    if let Some(parent_id) = existing.parent_id {
                        inner.deindex_child(parent_id, &existing.name);
                    }
                }
            }
            _ => {
                let container = payload.ok_or_else(|| MgmError::invalid("container record missing payload"))?;
                if let Some(parent_id) = container.parent_id {
                    inner.index_child(parent_id, container.name.clone(), ChildRef::Container(id));
                }
                inner.containers.insert(id, container);
            }
        }
        self.id_alloc.observe(id);
        Ok(())
    }

    /// Applies one replayed file record the same way, firing the usual
    /// [`FileEvent`]s so a slave's own [`crate::fsview::FileSystemView`]
    /// stays in lock-step too.
    pub async fn apply_external_file(&self, tag: RecordTag, id: u64, payload: Option<File>) -> MgmResult<()> {
        let mut inner = self.inner.write().await;
        let previous = inner.files.get(&id).map(|f| (f.locations.clone(), f.unlinked_locations.clone())).unwrap_or_default();
        match tag {
            RecordTag::Remove => {
                if let Some(existing) = inner.files.remove(&id) {
                    if let Some(parent_id) = existing.parent_id {
                        inner.deindex_child(parent_id, &existing.name);
                    }
                }
                drop(inner);
                self.notify(FileEvent { action: FileAction::Deleted, file_id: id, old_location: None, new_location: None });
            }
            _ => {
                let file = payload.ok_or_else(|| MgmError::invalid("file record missing payload"))?;
                if let Some(parent_id) = file.parent_id {
                    inner.index_child(parent_id, file.name.clone(), ChildRef::File(id));
                }
                let new_locations = file.locations.clone();
                let new_unlinked = file.unlinked_locations.clone();
                inner.files.insert(id, file);
                drop(inner);
                self.emit_location_diff(id, &previous.0, &previous.1, &new_locations, &new_unlinked);
            }
        }
        self.id_alloc.observe(id);
        Ok(())
    }
}
