//! Time-sharded disk cache for harvested windows.
//!
//! Every (endpoint, verb, prefix, set, window) combination maps to exactly
//! one file:
//!
//! ```text
//! <root>/<host>/<prefix or "_">/<fingerprint>/<from>-<until>.xml
//! ```
//!
//! The fingerprint is the SHA-256 of the verb, the endpoint host and path,
//! the metadata prefix and the set. The prefix directory is only a readable
//! label; distinct prefixes that sanitize alike still differ in fingerprint. Entries are written once through a spool, which keeps
//! small payloads in memory and gzip-compresses large ones, and are moved into
//! place with an atomic rename. Readers detect compression by the gzip
//! signature, so the file name never changes with the encoding.

mod error;
mod spool;

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::bufread::GzDecoder;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use url::Url;

use crate::protocol::{DATE_FORMAT, Request, Verb};
use crate::window::Window;

pub use error::CacheError;
use spool::Spool;

/// Payloads at or above this size are stored gzip-compressed.
pub const DEFAULT_COMPRESS_THRESHOLD: usize = 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Directory name used when no metadata prefix is given.
const EMPTY_COMPONENT: &str = "_";

/// Cache location shared by all windows of one logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheShard {
    host: String,
    path: String,
    verb: Verb,
    prefix: String,
    set: String,
}

impl CacheShard {
    /// Creates the shard for an endpoint, verb, prefix and set.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidKey`] if the endpoint is not an absolute
    /// URL with a host.
    pub fn new(endpoint: &str, verb: Verb, prefix: &str, set: &str) -> Result<Self, CacheError> {
        let url = Url::parse(endpoint.trim()).map_err(|_| CacheError::invalid_key(endpoint))?;
        let Some(host) = url.host_str() else {
            return Err(CacheError::invalid_key(endpoint));
        };
        let host = match url.port() {
            Some(port) => format!("{host}_{port}"),
            None => host.to_string(),
        };
        Ok(Self {
            host,
            path: url.path().to_string(),
            verb,
            prefix: prefix.trim().to_string(),
            set: set.trim().to_string(),
        })
    }

    /// Creates the shard for a request.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidKey`] if the request has no verb or an
    /// unusable endpoint.
    pub fn for_request(request: &Request) -> Result<Self, CacheError> {
        let verb = request
            .verb
            .ok_or_else(|| CacheError::invalid_key(&request.endpoint))?;
        Self::new(
            &request.endpoint,
            verb,
            request.prefix_or_empty(),
            request.set_or_empty(),
        )
    }

    /// Lowercase hex SHA-256 of `verb#host+path#prefix#set`.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.verb.as_str().as_bytes());
        hasher.update(b"#");
        hasher.update(self.host.as_bytes());
        hasher.update(self.path.as_bytes());
        hasher.update(b"#");
        hasher.update(self.prefix.as_bytes());
        hasher.update(b"#");
        hasher.update(self.set.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }

    /// Directory of this shard relative to the cache root.
    #[must_use]
    pub fn relative_dir(&self) -> PathBuf {
        let prefix = if self.prefix.is_empty() {
            EMPTY_COMPONENT.to_string()
        } else {
            sanitize(&self.prefix)
        };
        PathBuf::from(sanitize(&self.host))
            .join(prefix)
            .join(self.fingerprint())
    }

    /// Key of one window within this shard.
    #[must_use]
    pub fn key(&self, window: Window) -> CacheKey {
        CacheKey {
            shard: self.clone(),
            window,
        }
    }
}

/// Address of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub shard: CacheShard,
    pub window: Window,
}

impl CacheKey {
    /// Creates the key for a request restricted to a window.
    ///
    /// # Errors
    ///
    /// See [`CacheShard::for_request`].
    pub fn for_request(request: &Request, window: Window) -> Result<Self, CacheError> {
        Ok(CacheShard::for_request(request)?.key(window))
    }

    /// File name of the entry, `YYYY-MM-DD-YYYY-MM-DD.xml`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}.xml",
            self.window.from.format(DATE_FORMAT),
            self.window.until.format(DATE_FORMAT)
        )
    }
}

/// Result of a successful [`Cache::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Final location of the entry.
    pub path: PathBuf,
    /// Uncompressed payload size.
    pub bytes: u64,
    /// Whether the entry was stored gzip-compressed.
    pub compressed: bool,
}

/// Disk cache rooted at a directory.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
    compress_threshold: usize,
}

impl Cache {
    /// Creates a cache with the default compression threshold. Directories
    /// are created lazily on the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_compress_threshold(mut self, threshold: usize) -> Self {
        self.compress_threshold = threshold;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every window of a shard.
    #[must_use]
    pub fn directory(&self, shard: &CacheShard) -> PathBuf {
        self.root.join(shard.relative_dir())
    }

    /// Location of the entry for a key, whether or not it exists.
    #[must_use]
    pub fn path(&self, key: &CacheKey) -> PathBuf {
        self.directory(&key.shard).join(key.file_name())
    }

    /// Returns true if an entry exists for the key.
    #[must_use]
    pub fn has(&self, key: &CacheKey) -> bool {
        self.path(key).is_file()
    }

    /// Writes an entry.
    ///
    /// The producer writes the payload; nothing becomes visible under the
    /// entry's path unless it and the final rename succeed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory cannot be created, the
    /// producer fails, or the entry cannot be written or renamed.
    #[instrument(skip(self, key, producer), fields(window = %key.window))]
    pub fn put<F>(&self, key: &CacheKey, producer: F) -> Result<EntryInfo, CacheError>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let dir = self.directory(&key.shard);
        let path = dir.join(key.file_name());
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let mut spool = Spool::new(&dir, self.compress_threshold);
        producer(&mut spool).map_err(|e| CacheError::io(&path, e))?;
        let bytes = spool.written();
        let (temp, compressed) = spool.finish().map_err(|e| CacheError::io(&dir, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| CacheError::io(temp.path(), e))?;
        temp.persist(&path)
            .map_err(|e| CacheError::io(&path, e.error))?;

        debug!(path = %path.display(), bytes, compressed, "cache entry written");
        Ok(EntryInfo {
            path,
            bytes,
            compressed,
        })
    }

    /// Opens an entry for reading, decompressing transparently.
    ///
    /// Corrupt compressed data surfaces as an IO error of kind
    /// [`io::ErrorKind::InvalidData`] while reading.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] for a missing entry and
    /// [`CacheError::Io`] if it cannot be opened.
    pub fn get(&self, key: &CacheKey) -> Result<Box<dyn Read + Send>, CacheError> {
        let path = self.path(key);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound { path });
            }
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let mut reader = BufReader::new(file);
        let compressed = reader
            .fill_buf()
            .map_err(|e| CacheError::io(&path, e))?
            .starts_with(&GZIP_MAGIC);
        if compressed {
            Ok(Box::new(GzipEntry(GzDecoder::new(reader))))
        } else {
            Ok(Box::new(reader))
        }
    }
}

/// Gzip reader reporting every decoding failure as `InvalidData`.
struct GzipEntry<R>(GzDecoder<R>);

impl<R: BufRead> Read for GzipEntry<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof | io::ErrorKind::Other => {
                io::Error::new(io::ErrorKind::InvalidData, e)
            }
            _ => e,
        })
    }
}

/// Keeps `[A-Za-z0-9._-]`, replacing anything else with `_`.
fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        EMPTY_COMPONENT.to_string()
    } else {
        cleaned
    }
}
