//! WebDAV backend
//!
//! The adapter owns everything protocol-shaped: URL construction and
//! percent-encoding, filtering the collection's own entry out of listings,
//! mapping listing paths back to backend-relative ones, and persisting
//! modification times through a custom DAV property for servers that do not
//! keep upload mtimes. The actual HTTP transport and authentication live
//! behind the [`DavSession`] collaborator trait.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::SyncError;
use crate::timefmt;
use crate::vfs::backend::{Backend, ByteReader, EntryInfo};

/// Name of the custom property carrying the real modification time
pub const PROP_LAST_MODIFIED_TIME: &str = "Win32LastModifiedTime";

/// A namespace-qualified DAV property name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DavProperty {
    pub namespace: String,
    pub prefix: String,
    pub name: String,
}

impl DavProperty {
    pub fn new(namespace: &str, prefix: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            prefix: prefix.to_string(),
            name: name.to_string(),
        }
    }

    /// The property carrying the persisted modification time
    pub fn last_modified_time() -> Self {
        Self::new("urn:schemas-microsoft-com:", "ns1", PROP_LAST_MODIFIED_TIME)
    }

    /// Marker property written alongside the modification time
    pub fn sync_marker() -> Self {
        Self::new("http://www.provocon.de/sync", "sync", "JFileSync")
    }
}

/// One resource of a PROPFIND listing as reported by the session.
/// `href` is the decoded URL path of the resource; collections end with `/`.
#[derive(Debug, Clone)]
pub struct DavEntry {
    pub href: String,
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    /// Intrinsic server modification time, unix seconds
    pub modified: Option<i64>,
    /// Custom property values keyed by property name
    pub custom: HashMap<String, String>,
}

/// Minimal session surface the engine needs from a WebDAV client.
/// Transport, authentication, and retry policy are the implementer's
/// concern; every method may fail with a network or protocol error.
#[async_trait]
pub trait DavSession: Send + Sync {
    /// Enumerate a collection in a single round trip. The response may or
    /// may not include the collection's own entry, at any position.
    async fn list(&self, dir_url: &str) -> Result<Vec<DavEntry>>;

    /// Open a resource for reading
    async fn get(&self, url: &str) -> Result<ByteReader>;

    /// Store a resource from the given reader
    async fn put(&self, url: &str, body: ByteReader, len: u64) -> Result<()>;

    /// Delete a resource (collection URLs carry a trailing slash)
    async fn delete(&self, url: &str) -> Result<()>;

    /// Create a collection
    async fn mkcol(&self, url: &str) -> Result<()>;

    /// Patch properties; returns the number of updated resources
    async fn proppatch(
        &self,
        url: &str,
        set: &[(DavProperty, String)],
        remove: &[DavProperty],
    ) -> Result<usize>;
}

/// Storage adapter for a WebDAV collection
pub struct WebDavBackend {
    session: Arc<dyn DavSession>,
    /// Full collection URL without trailing slash
    root_url: String,
    /// Decoded path component of the root URL, for listing-path translation
    root_path: String,
}

impl WebDavBackend {
    pub fn new(session: Arc<dyn DavSession>, root_url: &str) -> crate::error::Result<Self> {
        let root_url = root_url.trim_end_matches('/').to_string();
        let root_path = url_path_of(&root_url).ok_or_else(|| {
            SyncError::encoding_error(&root_url, "root URL has no path component")
        })?;
        Ok(Self {
            session,
            root_url,
            root_path,
        })
    }

    /// Absolute URL for a backend-relative path
    fn url_for(&self, rel: &str, is_dir: bool) -> String {
        let mut url = self.root_url.clone();
        if !rel.is_empty() {
            url.push('/');
            url.push_str(&encode_url_path(rel));
        }
        if is_dir {
            url.push('/');
        }
        url
    }

    /// Decoded path of a backend-relative directory, with trailing slash
    fn dir_path_for(&self, rel_dir: &str) -> String {
        if rel_dir.is_empty() {
            format!("{}/", self.root_path)
        } else {
            format!("{}/{}/", self.root_path, rel_dir)
        }
    }

    fn entry_info(&self, rel_path: String, resource: &DavEntry) -> EntryInfo {
        let modified = if resource.is_directory {
            0
        } else {
            // A persisted custom timestamp overrides the server's intrinsic
            // one; malformed or absent values fall back rather than fail.
            resource
                .custom
                .get(PROP_LAST_MODIFIED_TIME)
                .and_then(|text| {
                    let parsed = timefmt::parse_timestamp(text);
                    if parsed.is_none() {
                        tracing::warn!(
                            "unparsable {} '{}' on '{}', using intrinsic mtime",
                            PROP_LAST_MODIFIED_TIME,
                            text,
                            resource.name
                        );
                    }
                    parsed
                })
                .or(resource.modified)
                .unwrap_or(0)
        };

        EntryInfo {
            name: resource.name.clone(),
            rel_path,
            is_directory: resource.is_directory,
            exists: true,
            size: if resource.is_directory { 0 } else { resource.size },
            modified,
            can_read: true,
            can_write: true,
        }
    }
}

#[async_trait]
impl Backend for WebDavBackend {
    fn scheme(&self) -> &str {
        "dav"
    }

    async fn stat_root(&self) -> Result<EntryInfo> {
        // The root collection is taken to exist; a missing or unreachable
        // one surfaces as a listing failure handled by the listing policy.
        Ok(EntryInfo {
            name: String::new(),
            rel_path: String::new(),
            is_directory: true,
            exists: true,
            size: 0,
            modified: 0,
            can_read: true,
            can_write: true,
        })
    }

    async fn list_dir(&self, rel_dir: &str) -> Result<Vec<EntryInfo>> {
        let url = self.url_for(rel_dir, true);
        let folder = self.dir_path_for(rel_dir);
        let listing = self.session.list(&url).await?;

        let mut entries = Vec::with_capacity(listing.len().saturating_sub(1));
        for resource in &listing {
            // Listings may interleave the collection's own entry with its
            // children at any position; match it by path suffix, not index.
            if folder.ends_with(&resource.href) {
                continue;
            }

            let stripped = match resource.href.strip_prefix(&self.root_path) {
                Some(stripped) => stripped,
                None => {
                    tracing::warn!(
                        "listing entry '{}' outside root '{}', skipping",
                        resource.href,
                        self.root_path
                    );
                    continue;
                }
            };
            let rel_path = stripped.trim_matches('/').to_string();
            entries.push(self.entry_info(rel_path, resource));
        }
        Ok(entries)
    }

    async fn open_read(&self, rel: &str) -> Result<ByteReader> {
        self.session.get(&self.url_for(rel, false)).await
    }

    async fn write_from(&self, rel: &str, reader: ByteReader, len: u64) -> Result<u64> {
        self.session
            .put(&self.url_for(rel, false), reader, len)
            .await?;
        Ok(len)
    }

    async fn delete(&self, rel: &str, is_dir: bool) -> Result<()> {
        self.session.delete(&self.url_for(rel, is_dir)).await
    }

    async fn create_dir(&self, rel: &str) -> Result<()> {
        self.session.mkcol(&self.url_for(rel, false)).await
    }

    async fn set_modified(&self, rel: &str, is_dir: bool, modified: i64) -> Result<()> {
        let url = self.url_for(rel, is_dir);
        let text = timefmt::format_timestamp(modified);
        tracing::debug!("setting modification time of {} to {}", url, text);

        let set = [
            (DavProperty::last_modified_time(), text.clone()),
            (DavProperty::sync_marker(), text),
        ];
        let updated = self.session.proppatch(&url, &set, &[]).await?;
        if updated != 1 {
            anyhow::bail!("property patch touched {} resources, expected 1", updated);
        }
        Ok(())
    }

    async fn set_read_only(&self, _rel: &str) -> Result<()> {
        // WebDAV has no portable write-protection; the node-level flag is
        // all that changes.
        Ok(())
    }
}

/// Percent-encode a URL path. Path separators and colons must survive
/// (`%2F` and `%3A` would corrupt the URL structure) and spaces must become
/// `%20`, never `+`.
pub fn encode_url_path(path: &str) -> String {
    urlencoding::encode(path)
        .replace("%2F", "/")
        .replace("%3A", ":")
}

/// Extract the decoded path component of an absolute URL, without trailing
/// slash. `https://host/dav/root` yields `/dav/root`.
fn url_path_of(url: &str) -> Option<String> {
    let after_scheme = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => return None,
    };
    let path = match after_scheme.find('/') {
        Some(idx) => &after_scheme[idx..],
        None => "/",
    };
    let decoded = urlencoding::decode(path).ok()?;
    Some(decoded.trim_end_matches('/').to_string())
}


#[cfg(test)]
mod listing_tests {
    use super::*;
    use crate::testutil::{MemoryDavSession, SelfEntryPosition};
    use test_case::test_case;

    fn backend(session: &Arc<MemoryDavSession>) -> WebDavBackend {
        WebDavBackend::new(Arc::clone(session) as Arc<dyn DavSession>, &session.root_url())
            .unwrap()
    }

    #[test_case(SelfEntryPosition::First; "self entry first")]
    #[test_case(SelfEntryPosition::Middle; "self entry interleaved")]
    #[test_case(SelfEntryPosition::Last; "self entry last")]
    #[test_case(SelfEntryPosition::Omit; "self entry omitted")]
    #[tokio::test]
    async fn test_own_entry_is_filtered_at_any_position(position: SelfEntryPosition) {
        let session = MemoryDavSession::new("/dav/root");
        session.set_self_entry_position(position);
        session.add_dir("/dav/root/docs");
        session.add_file("/dav/root/docs/a.txt", b"aa", 100);
        session.add_file("/dav/root/docs/b.txt", b"bb", 200);
        session.add_dir("/dav/root/docs/inner");

        let backend = backend(&session);
        let mut entries = backend.list_dir("docs").await.unwrap();
        entries.sort_by(|x, y| x.name.cmp(&y.name));

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt", "inner"]);
        assert!(entries.iter().all(|e| !e.rel_path.is_empty()));
    }

    #[tokio::test]
    async fn test_custom_timestamp_overrides_intrinsic() {
        let session = MemoryDavSession::new("/dav/root");
        session.add_file("/dav/root/doc.txt", b"x", 500);
        session.set_prop(
            "/dav/root/doc.txt",
            PROP_LAST_MODIFIED_TIME,
            &crate::timefmt::format_timestamp(1_420_461_045),
        );

        let entries = backend(&session).list_dir("").await.unwrap();
        assert_eq!(entries[0].modified, 1_420_461_045);
    }

    #[tokio::test]
    async fn test_malformed_custom_timestamp_falls_back() {
        let session = MemoryDavSession::new("/dav/root");
        session.add_file("/dav/root/doc.txt", b"x", 500);
        session.set_prop("/dav/root/doc.txt", PROP_LAST_MODIFIED_TIME, "not a date");

        let entries = backend(&session).list_dir("").await.unwrap();
        assert_eq!(entries[0].modified, 500);
    }

    #[tokio::test]
    async fn test_set_modified_round_trips_through_property() {
        let session = MemoryDavSession::new("/dav/root");
        session.add_file("/dav/root/doc.txt", b"x", 500);

        let backend = backend(&session);
        backend.set_modified("doc.txt", false, 1_420_461_045).await.unwrap();

        assert_eq!(
            session.prop("/dav/root/doc.txt", PROP_LAST_MODIFIED_TIME).as_deref(),
            Some("Mon, 5 Jan 2015 12:30:45 GMT")
        );
        let entries = backend.list_dir("").await.unwrap();
        assert_eq!(entries[0].modified, 1_420_461_045);
    }

    #[tokio::test]
    async fn test_encoded_names_reach_the_right_resource() {
        let session = MemoryDavSession::new("/dav/root");
        session.add_dir("/dav/root/my docs");
        session.add_file("/dav/root/my docs/a b.txt", b"spaced", 100);

        let backend = backend(&session);
        let entries = backend.list_dir("my docs").await.unwrap();
        assert_eq!(entries[0].rel_path, "my docs/a b.txt");

        let mut reader = backend.open_read("my docs/a b.txt").await.unwrap();
        let mut content = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut content)
            .await
            .unwrap();
        assert_eq!(content, b"spaced");
    }
}
