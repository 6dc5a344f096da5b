//! Loads user-defined index definitions from a database's `_indexes/`
//! directory at open time and maps a logical index name to its parsed
//! [def::IndexDef] (spec.md §4.5/§6).
//!
//! Definition files are named `NN<name>.idx`, a two-digit ordinal
//! followed by the index name; `00` is reserved for the id index and
//! never has a definition file (the id index is a built-in
//! specialization, not a user projection). Definitions load in
//! ordinal order, the same guarantee the directory layout promises
//! external callers relying on index registration order.

pub mod def;
pub mod lang;

use std::{collections::BTreeMap, fs, path::PathBuf};

use regex::Regex;

use crate::Result;

pub use def::{IndexDef, IndexType, KeyFormat};

const ID_ORDINAL: u8 = 0;

pub struct Registry {
    dir: PathBuf,
}

struct Slot {
    ordinal: u8,
    path: PathBuf,
}

impl Registry {
    pub fn open(db_dir: &std::path::Path) -> Result<Registry> {
        let dir = db_dir.join("_indexes");
        err_at!(IOError, fs::create_dir_all(&dir))?;
        Ok(Registry { dir })
    }

    fn name_pattern() -> Regex {
        Regex::new(r"^(\d{2})(.+)\.idx$").unwrap()
    }

    fn slots(&self) -> Result<BTreeMap<u8, (String, PathBuf)>> {
        let re = Self::name_pattern();
        let mut out = BTreeMap::new();
        for entry in err_at!(IOError, fs::read_dir(&self.dir))? {
            let entry = err_at!(IOError, entry)?;
            let fname = entry.file_name().to_string_lossy().into_owned();
            if let Some(caps) = re.captures(&fname) {
                let ordinal: u8 = caps[1].parse().unwrap();
                let name = caps[2].to_string();
                out.insert(ordinal, (name, entry.path()));
            }
        }
        Ok(out)
    }

    fn find(&self, name: &str) -> Result<Option<Slot>> {
        for (ordinal, (n, path)) in self.slots()? {
            if n == name {
                return Ok(Some(Slot { ordinal, path }));
            }
        }
        Ok(None)
    }

    fn next_ordinal(&self) -> Result<u8> {
        let used = self.slots()?;
        let mut ordinal = ID_ORDINAL + 1;
        while used.contains_key(&ordinal) {
            ordinal = err_at!(Precondition, ordinal.checked_add(1).ok_or("index ordinal space exhausted"))?;
        }
        Ok(ordinal)
    }

    /// Load every registered secondary index definition, ordinal order.
    pub fn load_all(&self) -> Result<Vec<(String, IndexDef)>> {
        let mut out = Vec::new();
        for (_, (name, path)) in self.slots()? {
            let text = err_at!(IOError, fs::read_to_string(&path))?;
            out.push((name, IndexDef::parse(&text)?));
        }
        Ok(out)
    }

    fn path_for(&self, ordinal: u8, name: &str) -> PathBuf {
        self.dir.join(format!("{:02}{}.idx", ordinal, name))
    }

    /// Register a brand new index definition, failing with
    /// `IndexConflict` if the name is already registered.
    pub fn add(&self, def: &IndexDef, source_code: &str) -> Result<()> {
        if self.find(&def.name)?.is_some() {
            err_at!(IndexConflict, msg: "index {:?} already registered", def.name)
        }
        let ordinal = self.next_ordinal()?;
        let path = self.path_for(ordinal, &def.name);
        err_at!(IOError, fs::write(&path, def.to_text(source_code)))?;
        Ok(())
    }

    /// Replace an index's definition in place, retaining the previous
    /// definition as a revert point (one level of history).
    pub fn edit(&self, def: &IndexDef, source_code: &str) -> Result<()> {
        let slot = self
            .find(&def.name)?
            .ok_or_else(|| crate::Error::IndexConflict(format!("{}:{} no such index {:?}", file!(), line!(), def.name)))?;
        let prev_path = self.prev_path(&slot.path);
        err_at!(IOError, fs::rename(&slot.path, &prev_path))?;
        err_at!(IOError, fs::write(&slot.path, def.to_text(source_code)))?;
        Ok(())
    }

    /// Restore the definition an `edit` replaced, failing with
    /// `RevertUnavailable` if there is none.
    pub fn revert(&self, name: &str) -> Result<IndexDef> {
        let slot = self
            .find(name)?
            .ok_or_else(|| crate::Error::IndexConflict(format!("{}:{} no such index {:?}", file!(), line!(), name)))?;
        let prev_path = self.prev_path(&slot.path);
        if !prev_path.exists() {
            err_at!(RevertUnavailable, msg: "no prior definition for index {:?}", name)
        }
        let text = err_at!(IOError, fs::read_to_string(&prev_path))?;
        err_at!(IOError, fs::rename(&prev_path, &slot.path))?;
        IndexDef::parse(&text)
    }

    pub fn destroy(&self, name: &str) -> Result<()> {
        let slot = self
            .find(name)?
            .ok_or_else(|| crate::Error::IndexConflict(format!("{}:{} no such index {:?}", file!(), line!(), name)))?;
        err_at!(IOError, fs::remove_file(&slot.path))?;
        let prev_path = self.prev_path(&slot.path);
        fs::remove_file(&prev_path).ok();
        Ok(())
    }

    fn prev_path(&self, path: &std::path::Path) -> PathBuf {
        let mut p = path.as_os_str().to_os_string();
        p.push(".prev");
        PathBuf::from(p)
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
