//! Directory-backed store: one framed file per key.
//!
//! Each file is `MAGIC | u32 length | payload | u32 crc32`. Writes land in a
//! temp file that is renamed over the target, so a crash leaves either the
//! old or the new value.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{KeyValueStore, StoreError};

const MAGIC: &[u8] = b"DOCSPC01";
const EXTENSION: &str = "entry";

pub struct FileStore {
    dir: PathBuf,
    /// key -> footprint in bytes
    index: RwLock<BTreeMap<String, u64>>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir` and index its files.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating cache dir {}", dir.display()))?;

        let mut index = BTreeMap::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_name)
            else {
                continue;
            };
            match read_framed(path) {
                Ok(value) => {
                    index.insert(key.clone(), (key.len() + value.len()) as u64);
                }
                Err(e) => warn!("Ignoring unreadable cache file {}: {}", path.display(), e),
            }
        }
        debug!("Opened file store {} with {} keys", dir.display(), index.len());

        Ok(Self {
            dir,
            index: RwLock::new(index),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", URL_SAFE_NO_PAD.encode(key), EXTENSION))
    }
}

fn decode_name(stem: &str) -> Option<String> {
    let raw = URL_SAFE_NO_PAD.decode(stem).ok()?;
    String::from_utf8(raw).ok()
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

fn encode_frame(payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(MAGIC.len() + 8 + payload.len());
    buf.put_slice(MAGIC);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.put_u32(checksum(payload));
    buf
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn read_framed(path: &Path) -> io::Result<String> {
    let data = fs::read(path)?;
    let mut buf = &data[..];
    if buf.len() < MAGIC.len() + 8 || &buf[..MAGIC.len()] != MAGIC {
        return Err(invalid("bad magic"));
    }
    buf.advance(MAGIC.len());
    let len = buf.get_u32() as usize;
    if buf.remaining() != len + 4 {
        return Err(invalid("length mismatch"));
    }
    let payload = &buf[..len];
    let mut tail = &buf[len..];
    if tail.get_u32() != checksum(payload) {
        return Err(invalid("checksum mismatch"));
    }
    String::from_utf8(payload.to_vec()).map_err(|_| invalid("payload is not UTF-8"))
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        if !self.index.read().contains_key(key) {
            return Ok(None);
        }
        match read_framed(&self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.index.write().remove(key);
                Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!("Treating corrupt cache file for {} as missing: {}", key, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> std::result::Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&encode_frame(value.as_bytes()))?;
            file.sync_data()?;
        }
        fs::rename(&tmp, &path)?;
        self.index
            .write()
            .insert(key.to_string(), (key.len() + value.len()) as u64);
        Ok(())
    }

    fn remove(&self, key: &str) -> std::result::Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.index.write().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.index
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn estimate_size(&self) -> u64 {
        self.index.read().values().sum()
    }
}
