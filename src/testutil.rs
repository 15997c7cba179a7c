//! In-memory WebDAV session double with fault injection, shared by the
//! cross-module tests

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::vfs::backend::ByteReader;
use crate::vfs::cipher::Cipher;
use crate::vfs::webdav::{DavEntry, DavProperty, DavSession};

/// Reversible toy codec: hex names, XOR content behind a length header
pub struct HexCipher;

impl Cipher for HexCipher {
    fn seal_name(&self, plain: &str) -> String {
        plain.bytes().map(|b| format!("{b:02x}")).collect()
    }

    fn open_name(&self, sealed: &str) -> Option<String> {
        if sealed.len() % 2 != 0 {
            return None;
        }
        let bytes = (0..sealed.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&sealed[i..i + 2], 16))
            .collect::<std::result::Result<Vec<_>, _>>()
            .ok()?;
        String::from_utf8(bytes).ok()
    }

    fn seal(&self, mut plain: Vec<u8>) -> Vec<u8> {
        for b in &mut plain {
            *b ^= 0x5a;
        }
        let mut sealed = b"SEAL".to_vec();
        sealed.extend(plain);
        sealed
    }

    fn open(&self, sealed: Vec<u8>) -> Result<Vec<u8>> {
        let mut plain = sealed
            .strip_prefix(b"SEAL")
            .ok_or_else(|| anyhow::anyhow!("missing seal header"))?
            .to_vec();
        for b in &mut plain {
            *b ^= 0x5a;
        }
        Ok(plain)
    }

    fn plain_len(&self, sealed_len: u64) -> u64 {
        sealed_len.saturating_sub(4)
    }

    fn sealed_len(&self, plain_len: u64) -> u64 {
        plain_len + 4
    }
}

/// Where the collection's own entry appears in listing responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfEntryPosition {
    Omit,
    First,
    Middle,
    Last,
}

#[derive(Debug, Clone, Default)]
struct MemFile {
    content: Vec<u8>,
    modified: i64,
    props: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct MemState {
    dirs: BTreeSet<String>,
    dir_props: HashMap<String, HashMap<String, String>>,
    files: BTreeMap<String, MemFile>,
    list_calls: HashMap<String, usize>,
    fail_list: HashSet<String>,
    fail_put_after: HashMap<String, u64>,
    fail_proppatch: HashSet<String>,
    fail_delete: HashSet<String>,
    corrupt_put: HashSet<String>,
}

/// Scriptable in-memory store behind the [`DavSession`] boundary.
///
/// Keys are decoded URL paths (no trailing slash). The double enforces the
/// protocol rules the engine depends on: a PUT needs its parent collection,
/// MKCOL fails on existing collections, listings may interleave the
/// collection's own entry at a configurable position.
pub struct MemoryDavSession {
    root: String,
    now: AtomicI64,
    self_entry: Mutex<SelfEntryPosition>,
    state: Mutex<MemState>,
}

impl MemoryDavSession {
    pub fn new(root: &str) -> Arc<Self> {
        let root = root.trim_end_matches('/').to_string();
        let mut state = MemState::default();
        state.dirs.insert(root.clone());
        Arc::new(Self {
            root,
            now: AtomicI64::new(1_700_000_000),
            self_entry: Mutex::new(SelfEntryPosition::Middle),
            state: Mutex::new(state),
        })
    }

    /// Full URL of the root collection, for [`WebDavBackend::new`]
    ///
    /// [`WebDavBackend::new`]: crate::vfs::webdav::WebDavBackend::new
    pub fn root_url(&self) -> String {
        format!("https://dav.example.com{}", self.root)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decoded path component of a request URL, without trailing slash
    fn path_of(url: &str) -> String {
        let after_scheme = url.find("://").map(|i| &url[i + 3..]).unwrap_or(url);
        let raw = after_scheme
            .find('/')
            .map(|i| &after_scheme[i..])
            .unwrap_or("/");
        urlencoding::decode(raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    fn parent_of(path: &str) -> &str {
        path.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
    }

    fn name_of(path: &str) -> &str {
        path.rsplit('/').next().unwrap_or(path)
    }

    // ----- scripting helpers -----

    pub fn set_now(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn set_self_entry_position(&self, position: SelfEntryPosition) {
        *self
            .self_entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = position;
    }

    pub fn add_dir(&self, path: &str) {
        self.lock().dirs.insert(path.to_string());
    }

    pub fn add_file(&self, path: &str, content: &[u8], modified: i64) {
        self.lock().files.insert(
            path.to_string(),
            MemFile {
                content: content.to_vec(),
                modified,
                props: HashMap::new(),
            },
        );
    }

    pub fn set_prop(&self, path: &str, name: &str, value: &str) {
        let mut state = self.lock();
        if let Some(file) = state.files.get_mut(path) {
            file.props.insert(name.to_string(), value.to_string());
        } else {
            state
                .dir_props
                .entry(path.to_string())
                .or_default()
                .insert(name.to_string(), value.to_string());
        }
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(path)
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.lock().files.contains_key(path)
    }

    pub fn file_content(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).map(|f| f.content.clone())
    }

    pub fn prop(&self, path: &str, name: &str) -> Option<String> {
        let state = self.lock();
        state
            .files
            .get(path)
            .and_then(|f| f.props.get(name))
            .or_else(|| state.dir_props.get(path).and_then(|p| p.get(name)))
            .cloned()
    }

    pub fn list_calls(&self, path: &str) -> usize {
        self.lock().list_calls.get(path).copied().unwrap_or(0)
    }

    pub fn fail_listing(&self, path: &str) {
        self.lock().fail_list.insert(path.to_string());
    }

    pub fn fail_put_after(&self, path: &str, bytes: u64) {
        self.lock().fail_put_after.insert(path.to_string(), bytes);
    }

    pub fn fail_proppatch(&self, path: &str) {
        self.lock().fail_proppatch.insert(path.to_string());
    }

    pub fn fail_delete(&self, path: &str) {
        self.lock().fail_delete.insert(path.to_string());
    }

    /// Make the next PUT to this path store flipped bytes while reporting
    /// success, for verification tests
    pub fn corrupt_put(&self, path: &str) {
        self.lock().corrupt_put.insert(path.to_string());
    }

    fn make_entry(&self, path: &str, is_directory: bool, state: &MemState) -> DavEntry {
        let (size, modified, custom) = match state.files.get(path) {
            Some(file) => (
                file.content.len() as u64,
                Some(file.modified),
                file.props.clone(),
            ),
            None => (
                0,
                None,
                state.dir_props.get(path).cloned().unwrap_or_default(),
            ),
        };
        DavEntry {
            href: if is_directory {
                format!("{path}/")
            } else {
                path.to_string()
            },
            name: Self::name_of(path).to_string(),
            is_directory,
            size,
            modified,
            custom,
        }
    }
}

#[async_trait]
impl DavSession for MemoryDavSession {
    async fn list(&self, dir_url: &str) -> Result<Vec<DavEntry>> {
        let dir = Self::path_of(dir_url);
        let position = *self
            .self_entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut state = self.lock();
        *state.list_calls.entry(dir.clone()).or_insert(0) += 1;

        if state.fail_list.contains(&dir) {
            bail!("503 service unavailable listing '{}'", dir);
        }
        if !state.dirs.contains(&dir) {
            bail!("404 collection '{}' not found", dir);
        }

        let mut children: Vec<DavEntry> = Vec::new();
        for child_dir in state.dirs.iter() {
            if Self::parent_of(child_dir) == dir {
                children.push(self.make_entry(child_dir, true, &state));
            }
        }
        for child_file in state.files.keys() {
            if Self::parent_of(child_file) == dir {
                children.push(self.make_entry(child_file, false, &state));
            }
        }

        let self_entry = self.make_entry(&dir, true, &state);
        match position {
            SelfEntryPosition::Omit => {}
            SelfEntryPosition::First => children.insert(0, self_entry),
            SelfEntryPosition::Middle => {
                let middle = children.len() / 2;
                children.insert(middle, self_entry);
            }
            SelfEntryPosition::Last => children.push(self_entry),
        }
        Ok(children)
    }

    async fn get(&self, url: &str) -> Result<ByteReader> {
        let path = Self::path_of(url);
        let state = self.lock();
        match state.files.get(&path) {
            Some(file) => {
                Ok(Box::pin(std::io::Cursor::new(file.content.clone())) as ByteReader)
            }
            None => bail!("404 resource '{}' not found", path),
        }
    }

    async fn put(&self, url: &str, mut body: ByteReader, len: u64) -> Result<()> {
        let path = Self::path_of(url);

        let fail_after = {
            let state = self.lock();
            if !state.dirs.contains(Self::parent_of(&path)) {
                bail!("409 no parent collection for '{}'", path);
            }
            state.fail_put_after.get(&path).copied()
        };

        let mut content = Vec::new();
        let mut buffer = [0u8; 1024];
        loop {
            let read = body.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            content.extend_from_slice(&buffer[..read]);
            if let Some(limit) = fail_after {
                if content.len() as u64 >= limit {
                    bail!("connection reset during upload of '{}'", path);
                }
            }
        }
        if content.len() as u64 != len {
            bail!(
                "411 body length {} does not match declared {}",
                content.len(),
                len
            );
        }

        let mut state = self.lock();
        if state.corrupt_put.remove(&path) {
            for b in &mut content {
                *b ^= 0xff;
            }
        }
        let modified = self.now.load(Ordering::SeqCst);
        state.files.insert(
            path,
            MemFile {
                content,
                modified,
                props: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<()> {
        let path = Self::path_of(url);
        let mut state = self.lock();
        if state.fail_delete.contains(&path) {
            bail!("423 resource '{}' is locked", path);
        }
        if state.files.remove(&path).is_some() {
            return Ok(());
        }
        if state.dirs.remove(&path) {
            let prefix = format!("{path}/");
            state.dirs.retain(|d| !d.starts_with(&prefix));
            state.files.retain(|f, _| !f.starts_with(&prefix));
            return Ok(());
        }
        bail!("404 resource '{}' not found", path);
    }

    async fn mkcol(&self, url: &str) -> Result<()> {
        let path = Self::path_of(url);
        let mut state = self.lock();
        if state.dirs.contains(&path) || state.files.contains_key(&path) {
            bail!("405 '{}' already exists", path);
        }
        if !state.dirs.contains(Self::parent_of(&path)) {
            bail!("409 no parent collection for '{}'", path);
        }
        state.dirs.insert(path);
        Ok(())
    }

    async fn proppatch(
        &self,
        url: &str,
        set: &[(DavProperty, String)],
        remove: &[DavProperty],
    ) -> Result<usize> {
        let path = Self::path_of(url);
        let mut state = self.lock();
        if state.fail_proppatch.contains(&path) {
            bail!("502 property patch refused for '{}'", path);
        }

        if let Some(file) = state.files.get_mut(&path) {
            for (prop, value) in set {
                file.props.insert(prop.name.clone(), value.clone());
            }
            for prop in remove {
                file.props.remove(&prop.name);
            }
            return Ok(1);
        }
        if state.dirs.contains(&path) {
            let props = state.dir_props.entry(path).or_default();
            for (prop, value) in set {
                props.insert(prop.name.clone(), value.clone());
            }
            for prop in remove {
                props.remove(&prop.name);
            }
            return Ok(1);
        }
        Ok(0)
    }
}
