//! Persistent program cache.
//!
//! Programs are stored one file per entry under `<directory>/programs`, named by
//! the hex SHA-1 of the method reference and the encoded input program. Each file
//! is framed as
//!
//! ```text
//! magic "AOTE" | version u8 | sha1(payload) [20] | payload
//! ```
//!
//! and read through a memory map. Because payloads refer to symbol and file
//! indices, the session tables are persisted next to the entries
//! (`symbols.bin`, `files.bin`) and loaded back into the session when the cache
//! is opened. When the persisted tables do not line up with what the session
//! already holds, every entry is unusable and the cache starts over empty.
//!
//! Missing, truncated or corrupt entries are misses, never errors.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use memmap2::Mmap;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::{
    cache::{
        io::{Parser, Writer},
        ProgramIO, SymbolTable,
    },
    compiler::Session,
    model::{MethodReference, Program},
    Result,
};

const ENTRY_MAGIC: &[u8; 4] = b"AOTE";
const ENTRY_VERSION: u8 = 1;
const CHECKSUM_LEN: usize = 20;
const HEADER_LEN: usize = ENTRY_MAGIC.len() + 1 + CHECKSUM_LEN;

const PROGRAMS_DIR: &str = "programs";
const SYMBOLS_FILE: &str = "symbols.bin";
const FILES_FILE: &str = "files.bin";

/// Identifies a cached program: a method together with the exact input it was
/// compiled from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// The hex digest used as file name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Counters of one cache instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from disk
    pub hits: usize,
    /// Lookups that found no usable entry
    pub misses: usize,
    /// Entries written
    pub stores: usize,
}

/// Directory-backed store of SSA programs.
#[derive(Debug)]
pub struct DiskProgramCache {
    directory: PathBuf,
    hits: AtomicUsize,
    misses: AtomicUsize,
    stores: AtomicUsize,
    temp_counter: AtomicUsize,
}

impl DiskProgramCache {
    /// Opens (creating if needed) the cache in `directory` and loads its symbol
    /// tables into `session`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the directory cannot be created or
    /// cleared.
    pub fn open(directory: impl Into<PathBuf>, session: &Session) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(directory.join(PROGRAMS_DIR))?;

        let cache = Self {
            directory,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            stores: AtomicUsize::new(0),
            temp_counter: AtomicUsize::new(0),
        };

        let symbols_ok = cache.load_table(SYMBOLS_FILE, &session.symbols);
        let files_ok = cache.load_table(FILES_FILE, &session.files);
        if !(symbols_ok && files_ok) {
            debug!(directory = %cache.directory.display(), "symbol tables out of sync, clearing program cache");
            cache.clear()?;
        }
        Ok(cache)
    }

    /// Root directory of the cache.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Computes the key of `method` compiled from `input`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the input cannot be encoded.
    pub fn key(&self, session: &Session, method: &MethodReference, input: &Program) -> Result<CacheKey> {
        let encoded = ProgramIO::new(&session.symbols, &session.files).write(input)?;
        let mut hasher = Sha1::new();
        hasher.update(method.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(&encoded);
        Ok(CacheKey(to_hex(hasher.finalize().as_slice())))
    }

    /// Loads the program stored under `key`.
    ///
    /// Returns `None` if the entry is missing or does not decode.
    #[must_use]
    pub fn load(&self, session: &Session, key: &CacheKey) -> Option<Program> {
        let path = self.entry_path(key);
        let result = read_framed(&path).and_then(|payload| {
            ProgramIO::new(&session.symbols, &session.files).read(&payload)
        });
        match result {
            Ok(program) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(program)
            }
            Err(error) => {
                if path.exists() {
                    debug!(key = %key, %error, "discarding unreadable cache entry");
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `program` under `key`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the entry cannot be written.
    pub fn store(&self, session: &Session, key: &CacheKey, program: &Program) -> Result<()> {
        let payload = ProgramIO::new(&session.symbols, &session.files).write(program)?;
        self.write_framed(&self.entry_path(key), &payload)?;
        self.stores.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Persists the session symbol and file tables. Must be called after the
    /// last [`DiskProgramCache::store`] so entries can be decoded later.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if a table cannot be written.
    pub fn flush(&self, session: &Session) -> Result<()> {
        self.write_table(SYMBOLS_FILE, &session.symbols)?;
        self.write_table(FILES_FILE, &session.files)
    }

    /// Removes every entry and persisted table.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if a file cannot be removed.
    pub fn clear(&self) -> Result<()> {
        let programs = self.directory.join(PROGRAMS_DIR);
        if programs.exists() {
            fs::remove_dir_all(&programs)?;
        }
        fs::create_dir_all(&programs)?;
        for table in [SYMBOLS_FILE, FILES_FILE] {
            let path = self.directory.join(table);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Returns the hit, miss and store counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
        }
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.directory
            .join(PROGRAMS_DIR)
            .join(format!("{}.bin", key.as_str()))
    }

    /// Merges a persisted table into `table`. Returns `false` if the persisted
    /// indices disagree with the ones the session already assigned.
    fn load_table(&self, name: &str, table: &SymbolTable) -> bool {
        let path = self.directory.join(name);
        if !path.exists() {
            return true;
        }
        let payload = match read_framed(&path) {
            Ok(payload) => payload,
            Err(error) => {
                debug!(table = name, %error, "unreadable symbol table");
                return false;
            }
        };
        let mut parser = Parser::new(&payload);
        let parsed = parser.read_index().and_then(|count| {
            (0..count)
                .map(|_| parser.read_prefixed_string_utf8())
                .collect::<Result<Vec<_>>>()
        });
        match parsed {
            Ok(symbols) => symbols
                .iter()
                .enumerate()
                .all(|(index, symbol)| table.lookup(symbol) as usize == index),
            Err(error) => {
                debug!(table = name, %error, "corrupt symbol table");
                false
            }
        }
    }

    fn write_table(&self, name: &str, table: &SymbolTable) -> Result<()> {
        let mut writer = Writer::new();
        writer.write_index(table.len())?;
        for (_, symbol) in table.iter() {
            writer.write_prefixed_string_utf8(symbol)?;
        }
        self.write_framed(&self.directory.join(name), &writer.into_inner())
    }

    /// Writes a framed file through a temporary sibling and a rename, so readers
    /// never observe a partial entry.
    fn write_framed(&self, path: &Path, payload: &[u8]) -> Result<()> {
        let mut writer = Writer::new();
        writer.write_bytes(ENTRY_MAGIC);
        writer.write_le(ENTRY_VERSION);
        writer.write_bytes(Sha1::digest(payload).as_slice());
        writer.write_bytes(payload);

        let serial = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp = path.with_extension(format!("{}.{serial}.tmp", std::process::id()));
        fs::write(&temp, writer.into_inner())?;
        fs::rename(&temp, path)?;
        Ok(())
    }
}

/// Maps `path` and returns its verified payload.
fn read_framed(path: &Path) -> Result<Vec<u8>> {
    let file = fs::File::open(path)?;
    // SAFETY: entries are only ever replaced by rename, never modified in place.
    let mmap = unsafe { Mmap::map(&file) }?;
    if mmap.len() < HEADER_LEN {
        return Err(malformed_error!("cache entry too short"));
    }
    let mut parser = Parser::new(&mmap);
    if parser.read_bytes(ENTRY_MAGIC.len())? != ENTRY_MAGIC {
        return Err(malformed_error!("bad cache entry magic"));
    }
    let version = parser.read_le::<u8>()?;
    if version != ENTRY_VERSION {
        return Err(malformed_error!("unsupported cache entry version {}", version));
    }
    let checksum = parser.read_bytes(CHECKSUM_LEN)?;
    let payload = parser.read_bytes(parser.remaining())?;
    if Sha1::digest(payload).as_slice() != checksum {
        return Err(malformed_error!("cache entry checksum mismatch"));
    }
    Ok(payload.to_vec())
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}
