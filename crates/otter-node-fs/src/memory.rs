//! In-memory engine.
//!
//! A complete [`FsEngine`] over an in-memory tree of files, directories and
//! symlinks. Open files stream their contents in fixed-size chunks on the
//! tokio runtime and honour pause/resume. All data is lost when dropped.

use crate::engine::{ChunkSink, EngineFile, FileHandle, FsEngine, Stats};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Chunk size used by streaming file handles unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

const MAX_SYMLINK_DEPTH: usize = 32;
const DEFAULT_PERMS: &str = "rw-r--r--";
const DIR_PERMS: &str = "rwxr-xr-x";

#[derive(Debug, Clone)]
enum NodeKind {
    File(Bytes),
    Dir,
    Symlink(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    perms: String,
    uid: u32,
    gid: u32,
    atime_ms: u64,
    mtime_ms: u64,
    ctime_ms: u64,
}

impl Node {
    fn new(kind: NodeKind, perms: &str) -> Self {
        let now = now_ms();
        Self {
            kind,
            perms: perms.to_string(),
            uid: 0,
            gid: 0,
            atime_ms: now,
            mtime_ms: now,
            ctime_ms: now,
        }
    }

    fn stats(&self) -> Stats {
        let (size, is_file, is_directory, is_symlink) = match &self.kind {
            NodeKind::File(data) => (data.len() as u64, true, false, false),
            NodeKind::Dir => (0, false, true, false),
            NodeKind::Symlink(target) => (target.len() as u64, false, false, true),
        };
        Stats {
            size,
            atime_ms: self.atime_ms,
            mtime_ms: self.mtime_ms,
            ctime_ms: self.ctime_ms,
            is_file,
            is_directory,
            is_symlink,
        }
    }

    fn touch(&mut self) {
        let now = now_ms();
        self.mtime_ms = now;
        self.ctime_ms = now;
    }
}

/// Paths are normalized to absolute form: `/a/b`.
#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, Node>,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::new(NodeKind::Dir, DIR_PERMS));
        Self { nodes }
    }

    /// Follow symlinks on the final component. The result may not exist.
    fn resolve(&self, path: &str) -> io::Result<String> {
        let mut current = normalize(path);
        for _ in 0..MAX_SYMLINK_DEPTH {
            match self.nodes.get(&current) {
                Some(Node {
                    kind: NodeKind::Symlink(target),
                    ..
                }) => {
                    current = if target.starts_with('/') {
                        normalize(target)
                    } else {
                        normalize(&format!("{}/{}", parent(&current), target))
                    };
                }
                _ => return Ok(current),
            }
        }
        Err(io::Error::other(format!(
            "too many levels of symbolic links: {path}"
        )))
    }

    fn get(&self, path: &str) -> io::Result<&Node> {
        self.nodes.get(path).ok_or_else(|| not_found(path))
    }

    fn get_mut(&mut self, path: &str) -> io::Result<&mut Node> {
        self.nodes.get_mut(path).ok_or_else(|| not_found(path))
    }

    fn require_parent_dir(&self, path: &str) -> io::Result<()> {
        let parent = parent(path);
        match self.nodes.get(&parent) {
            Some(Node {
                kind: NodeKind::Dir,
                ..
            }) => Ok(()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("not a directory: {parent}"),
            )),
            None => Err(not_found(&parent)),
        }
    }

    fn children(&self, dir: &str) -> impl Iterator<Item = &str> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{dir}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(move |(k, _)| k.starts_with(&prefix))
            .filter_map(move |(k, _)| {
                let rest = &k[dir.len().min(k.len())..];
                let rest = rest.trim_start_matches('/');
                (!rest.is_empty() && !rest.contains('/')).then_some(rest)
            })
    }

    fn file_data(&self, path: &str) -> io::Result<Bytes> {
        match &self.get(path)?.kind {
            NodeKind::File(data) => Ok(data.clone()),
            NodeKind::Dir => Err(is_a_directory(path)),
            NodeKind::Symlink(_) => Err(io::Error::other(format!("dangling link: {path}"))),
        }
    }

    fn set_file_len(&mut self, path: &str, len: u64) -> io::Result<()> {
        let node = self.get_mut(path)?;
        let NodeKind::File(data) = &node.kind else {
            return Err(is_a_directory(path));
        };
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length too large"))?;
        let mut resized = BytesMut::from(&data[..len.min(data.len())]);
        resized.resize(len, 0);
        node.kind = NodeKind::File(resized.freeze());
        node.touch();
        Ok(())
    }
}

/// Pause/resume/close state shared between a handle and its pump task.
#[derive(Debug, Default)]
struct Flow {
    paused: AtomicBool,
    closed: AtomicBool,
    notify: Notify,
}

impl Flow {
    fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn wait_resumed(&self) {
        while self.paused.load(Ordering::Acquire) && !self.is_closed() {
            self.notify.notified().await;
        }
    }
}

/// In-memory [`FsEngine`].
#[derive(Debug)]
pub struct MemoryEngine {
    tree: Arc<Mutex<Tree>>,
    open_files: Mutex<HashMap<u64, Arc<Flow>>>,
    next_id: AtomicU64,
    chunk_size: usize,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Engine whose streaming handles deliver `chunk_size`-byte chunks.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
            open_files: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Write a file, creating missing parent directories.
    pub fn insert_file(&self, path: &str, data: impl Into<Bytes>) -> io::Result<()> {
        let path = normalize(path);
        let parent = parent(&path);
        if !self.tree.lock().nodes.contains_key(&parent) {
            self.mkdir(&parent, DIR_PERMS, true)?;
        }
        self.write_file(&path, data.into())
    }

    /// Permission string of a node (symlinks followed).
    pub fn permissions(&self, path: &str) -> io::Result<String> {
        let tree = self.tree.lock();
        let path = tree.resolve(path)?;
        Ok(tree.get(&path)?.perms.clone())
    }

    /// `(uid, gid)` of a node (symlinks followed).
    pub fn owner(&self, path: &str) -> io::Result<(u32, u32)> {
        let tree = self.tree.lock();
        let path = tree.resolve(path)?;
        let node = tree.get(&path)?;
        Ok((node.uid, node.gid))
    }

    /// Number of handles opened and not yet closed.
    pub fn open_count(&self) -> usize {
        self.open_files.lock().len()
    }
}

impl FsEngine for MemoryEngine {
    fn open(
        &self,
        path: &str,
        perms: &str,
        read: bool,
        write: bool,
        create: bool,
    ) -> io::Result<FileHandle> {
        if !read && !write {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("open requires read or write access: {path}"),
            ));
        }

        let mut tree = self.tree.lock();
        let target = tree.resolve(path)?;
        let is_dir = tree
            .nodes
            .get(&target)
            .map(|n| matches!(n.kind, NodeKind::Dir));
        match is_dir {
            Some(false) => {}
            Some(true) => return Err(is_a_directory(&target)),
            None if create => {
                tree.require_parent_dir(&target)?;
                tree.nodes.insert(
                    target.clone(),
                    Node::new(NodeKind::File(Bytes::new()), perms),
                );
            }
            None => return Err(not_found(&target)),
        }
        drop(tree);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let flow = Arc::new(Flow::default());
        self.open_files.lock().insert(id, flow.clone());
        debug!(id, path = %target, read, write, "memory engine opened file");

        Ok(Arc::new(MemoryFile {
            id,
            path: target,
            tree: self.tree.clone(),
            flow,
            chunk_size: self.chunk_size,
            readable: read,
            writable: write,
        }))
    }

    fn close(&self, file: FileHandle) -> io::Result<()> {
        let id = file.id();
        match self.open_files.lock().remove(&id) {
            Some(flow) => {
                flow.close();
                debug!(id, "memory engine closed file");
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("file handle {id} is not open"),
            )),
        }
    }

    fn props(&self, path: &str) -> io::Result<Stats> {
        let tree = self.tree.lock();
        let path = tree.resolve(path)?;
        Ok(tree.get(&path)?.stats())
    }

    fn lprops(&self, path: &str) -> io::Result<Stats> {
        let tree = self.tree.lock();
        Ok(tree.get(&normalize(path))?.stats())
    }

    fn read_file(&self, path: &str) -> io::Result<Bytes> {
        let mut tree = self.tree.lock();
        let path = tree.resolve(path)?;
        let data = tree.file_data(&path)?;
        tree.get_mut(&path)?.atime_ms = now_ms();
        Ok(data)
    }

    fn write_file(&self, path: &str, data: Bytes) -> io::Result<()> {
        let mut tree = self.tree.lock();
        let path = tree.resolve(path)?;
        tree.require_parent_dir(&path)?;
        match tree.nodes.get_mut(&path) {
            Some(node) => match node.kind {
                NodeKind::Dir => return Err(is_a_directory(&path)),
                _ => {
                    node.kind = NodeKind::File(data);
                    node.touch();
                }
            },
            None => {
                tree.nodes
                    .insert(path, Node::new(NodeKind::File(data), DEFAULT_PERMS));
            }
        }
        Ok(())
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
        let tree = self.tree.lock();
        let path = tree.resolve(path)?;
        match tree.get(&path)?.kind {
            NodeKind::Dir => Ok(tree.children(&path).map(str::to_string).collect()),
            _ => Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("not a directory: {path}"),
            )),
        }
    }

    fn mkdir(&self, path: &str, perms: &str, create_parents: bool) -> io::Result<()> {
        let mut tree = self.tree.lock();
        let path = normalize(path);
        if tree.nodes.contains_key(&path) {
            if create_parents && matches!(tree.nodes[&path].kind, NodeKind::Dir) {
                return Ok(());
            }
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already exists: {path}"),
            ));
        }

        if create_parents {
            let mut missing = Vec::new();
            let mut current = parent(&path);
            while !tree.nodes.contains_key(&current) {
                missing.push(current.clone());
                current = parent(&current);
            }
            tree.require_parent_dir(missing.last().unwrap_or(&path))?;
            for dir in missing.into_iter().rev() {
                tree.nodes.insert(dir, Node::new(NodeKind::Dir, perms));
            }
        } else {
            tree.require_parent_dir(&path)?;
        }

        tree.nodes.insert(path, Node::new(NodeKind::Dir, perms));
        Ok(())
    }

    fn delete(&self, path: &str) -> io::Result<()> {
        let mut tree = self.tree.lock();
        let path = normalize(path);
        if path == "/" {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot remove the root directory",
            ));
        }
        match tree.get(&path)?.kind {
            NodeKind::Dir => {}
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("not a directory: {path}"),
                ));
            }
        }
        if tree.children(&path).next().is_some() {
            return Err(io::Error::new(
                io::ErrorKind::DirectoryNotEmpty,
                format!("directory not empty: {path}"),
            ));
        }
        tree.nodes.remove(&path);
        Ok(())
    }

    fn unlink(&self, path: &str) -> io::Result<()> {
        let mut tree = self.tree.lock();
        let path = normalize(path);
        if let NodeKind::Dir = tree.get(&path)?.kind {
            return Err(is_a_directory(&path));
        }
        tree.nodes.remove(&path);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let mut tree = self.tree.lock();
        let from = normalize(from);
        let to = normalize(to);
        if from == to {
            return tree.get(&from).map(|_| ());
        }
        let is_dir = matches!(tree.get(&from)?.kind, NodeKind::Dir);
        if is_dir && to.starts_with(&format!("{from}/")) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot move '{from}' into itself"),
            ));
        }
        tree.require_parent_dir(&to)?;
        match tree.nodes.get(&to).map(|n| &n.kind) {
            None => {}
            Some(NodeKind::Dir) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("already exists: {to}"),
                ));
            }
            Some(_) if is_dir => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("not a directory: {to}"),
                ));
            }
            Some(_) => {}
        }

        let prefix = format!("{from}/");
        let moved: Vec<String> = tree
            .nodes
            .keys()
            .filter(|k| **k == from || k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved {
            if let Some(node) = tree.nodes.remove(&key) {
                let new_key = format!("{to}{}", &key[from.len()..]);
                tree.nodes.insert(new_key, node);
            }
        }
        Ok(())
    }

    fn chmod(&self, path: &str, perms: &str) -> io::Result<()> {
        let mut tree = self.tree.lock();
        let path = tree.resolve(path)?;
        let node = tree.get_mut(&path)?;
        node.perms = perms.to_string();
        node.ctime_ms = now_ms();
        Ok(())
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> io::Result<()> {
        let mut tree = self.tree.lock();
        let path = tree.resolve(path)?;
        let node = tree.get_mut(&path)?;
        node.uid = uid;
        node.gid = gid;
        node.ctime_ms = now_ms();
        Ok(())
    }

    fn truncate(&self, path: &str, len: u64) -> io::Result<()> {
        let mut tree = self.tree.lock();
        let path = tree.resolve(path)?;
        tree.set_file_len(&path, len)
    }

    fn symlink(&self, link: &str, existing: &str) -> io::Result<()> {
        let mut tree = self.tree.lock();
        let link = normalize(link);
        if tree.nodes.contains_key(&link) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already exists: {link}"),
            ));
        }
        tree.require_parent_dir(&link)?;
        tree.nodes.insert(
            link,
            Node::new(NodeKind::Symlink(existing.to_string()), "rwxrwxrwx"),
        );
        Ok(())
    }

    fn read_symlink(&self, link: &str) -> io::Result<String> {
        let tree = self.tree.lock();
        let link = normalize(link);
        match &tree.get(&link)?.kind {
            NodeKind::Symlink(target) => Ok(target.clone()),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a symbolic link: {link}"),
            )),
        }
    }
}

/// Open file in a [`MemoryEngine`].
#[derive(Debug)]
pub struct MemoryFile {
    id: u64,
    path: String,
    tree: Arc<Mutex<Tree>>,
    flow: Arc<Flow>,
    chunk_size: usize,
    readable: bool,
    writable: bool,
}

impl MemoryFile {
    fn ensure_open(&self) -> io::Result<()> {
        if self.flow.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("file handle {} is closed", self.id),
            ));
        }
        Ok(())
    }
}

impl EngineFile for MemoryFile {
    fn id(&self) -> u64 {
        self.id
    }

    fn read(&self, position: u64, len: usize) -> io::Result<Bytes> {
        self.ensure_open()?;
        if !self.readable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not opened for reading",
            ));
        }
        let data = self.tree.lock().file_data(&self.path)?;
        let start = usize::try_from(position).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(data.slice(start..end))
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        self.ensure_open()?;
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not opened for writing",
            ));
        }
        self.tree.lock().set_file_len(&self.path, len)
    }

    fn subscribe(&self, from: u64, sink: ChunkSink) {
        if !self.readable {
            sink.error(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not opened for reading",
            ));
            return;
        }
        let data = match self.tree.lock().file_data(&self.path) {
            Ok(data) => data,
            Err(e) => {
                sink.error(e);
                return;
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(pump(
                    self.id,
                    data,
                    from,
                    self.chunk_size,
                    self.flow.clone(),
                    sink,
                ));
            }
            Err(_) => {
                sink.error(io::Error::other("streaming requires a tokio runtime"));
            }
        }
    }

    fn pause(&self) {
        self.flow.pause();
    }

    fn resume(&self) {
        self.flow.resume();
    }
}

/// Deliver `data[from..]` chunk by chunk while not paused.
async fn pump(
    id: u64,
    data: Bytes,
    from: u64,
    chunk_size: usize,
    flow: Arc<Flow>,
    sink: ChunkSink,
) {
    let mut offset = usize::try_from(from).unwrap_or(usize::MAX).min(data.len());
    loop {
        flow.wait_resumed().await;
        if flow.is_closed() || sink.is_closed() {
            trace!(id, offset, "pump stopped");
            return;
        }
        if offset >= data.len() {
            sink.end();
            return;
        }
        let end = (offset + chunk_size).min(data.len());
        if !sink.data(data.slice(offset..end)) {
            return;
        }
        offset = end;
        tokio::task::yield_now().await;
    }
}

fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            c => parts.push(c),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file or directory: {path}"),
    )
}

fn is_a_directory(path: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::IsADirectory,
        format!("is a directory: {path}"),
    )
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
