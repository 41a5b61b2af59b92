//! Durable key→blob store scoped to one data directory.
//!
//! Values land as one file per key under `<root>/meta`, written to a
//! temporary file, synced, and renamed into place so a save that returns
//! `Ok` survives a crash.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageResult;
use crate::types::{SchemaHash, TabletId};

const META_DIR_NAME: &str = "meta";
const TABLET_KEY_PREFIX: &str = "tbl_";

#[derive(Debug)]
pub struct MetaStore {
    root: PathBuf,
}

impl MetaStore {
    /// Open (creating if needed) the meta directory under `store_root`.
    pub fn open(store_root: &Path) -> StorageResult<MetaStore> {
        let root = store_root.join(META_DIR_NAME);
        fs::create_dir_all(&root)?;
        Ok(MetaStore { root })
    }

    fn tablet_key(tablet_id: TabletId, schema_hash: SchemaHash) -> String {
        format!("{}{}_{}", TABLET_KEY_PREFIX, tablet_id, schema_hash)
    }

    pub fn save(
        &self,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        blob: &[u8],
    ) -> StorageResult<()> {
        self.put_kv(&Self::tablet_key(tablet_id, schema_hash), blob)
    }

    pub fn get(
        &self,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
    ) -> StorageResult<Option<Vec<u8>>> {
        self.get_kv(&Self::tablet_key(tablet_id, schema_hash))
    }

    /// Removal of an absent key is not an error.
    pub fn remove(&self, tablet_id: TabletId, schema_hash: SchemaHash) -> StorageResult<()> {
        let path = self.root.join(Self::tablet_key(tablet_id, schema_hash));
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn put_kv(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let path = self.root.join(key);
        let tmp_path = self.root.join(format!("{}.tmp", key));
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(value)?;
            file.sync_data()?;
        }
        fs::rename(&tmp_path, &path)?;
        File::open(&self.root)?.sync_data()?;
        Ok(())
    }

    pub fn get_kv(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(self.root.join(key)) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Visit every stored tablet meta. The visitor returns `false` to stop.
    pub fn traverse_tablet_metas(
        &self,
        visit: &mut dyn FnMut(TabletId, SchemaHash, Vec<u8>) -> bool,
    ) -> StorageResult<()> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(rest) = name.to_string_lossy().strip_prefix(TABLET_KEY_PREFIX).map(str::to_owned) else {
                continue;
            };
            let Some((id_str, hash_str)) = rest.rsplit_once('_') else {
                continue;
            };
            let (Ok(tablet_id), Ok(schema_hash)) = (id_str.parse(), hash_str.parse()) else {
                continue;
            };
            let blob = fs::read(entry.path())?;
            if !visit(tablet_id, schema_hash, blob) {
                break;
            }
        }
        Ok(())
    }
}
