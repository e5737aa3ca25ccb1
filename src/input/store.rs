use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::input::{InputError, Table};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTable {
    pub name: String,
    pub table: Table,
}

impl NamedTable {
    pub fn new(name: impl Into<String>, table: Table) -> Self {
        Self {
            name: name.into(),
            table,
        }
    }
}

/// On-disk container: an ordered group of named tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Container {
    pub tables: Vec<NamedTable>,
}

/// Named-container table storage. Writes replace a whole container at once.
pub trait TableStore: Sync {
    fn read_table(&self, container: &str, table: &str) -> Result<Table, InputError>;

    fn write_container(&self, container: &str, tables: &[NamedTable])
    -> Result<PathBuf, InputError>;

    fn container_exists(&self, container: &str) -> bool;
}

/// Directory of column-major JSON containers, `<name>.json` or
/// `<name>.json.gz`.
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
    compress: bool,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compress: false,
        }
    }

    pub fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    fn existing_path(&self, container: &str) -> Option<PathBuf> {
        ["json.gz", "json"]
            .iter()
            .map(|ext| self.root.join(format!("{container}.{ext}")))
            .find(|p| p.exists())
    }

    fn write_path(&self, container: &str) -> PathBuf {
        let ext = if self.compress { "json.gz" } else { "json" };
        self.root.join(format!("{container}.{ext}"))
    }

    pub fn read_container(&self, container: &str) -> Result<Container, InputError> {
        let path = self
            .existing_path(container)
            .ok_or_else(|| InputError::MissingContainer(container.to_string()))?;
        let reader = open_maybe_gz(&path)?;
        let parsed: Container = serde_json::from_reader(reader)?;
        for t in &parsed.tables {
            t.table.validate()?;
        }
        Ok(parsed)
    }
}

impl TableStore for JsonStore {
    fn read_table(&self, container: &str, table: &str) -> Result<Table, InputError> {
        let parsed = self.read_container(container)?;
        parsed
            .tables
            .into_iter()
            .find(|t| t.name == table)
            .map(|t| t.table)
            .ok_or_else(|| InputError::MissingTable {
                container: container.to_string(),
                table: table.to_string(),
            })
    }

    fn write_container(
        &self,
        container: &str,
        tables: &[NamedTable],
    ) -> Result<PathBuf, InputError> {
        fs::create_dir_all(&self.root)?;
        let path = self.write_path(container);
        let body = Container {
            tables: tables.to_vec(),
        };
        write_atomic(&path, self.compress, |w| {
            serde_json::to_writer(w, &body)?;
            Ok(())
        })?;
        // A stale copy in the other encoding would shadow or confuse readers.
        let other = if self.compress {
            self.root.join(format!("{container}.json"))
        } else {
            self.root.join(format!("{container}.json.gz"))
        };
        if other.exists() {
            fs::remove_file(other)?;
        }
        Ok(path)
    }

    fn container_exists(&self, container: &str) -> bool {
        self.existing_path(container).is_some()
    }
}

pub fn open_maybe_gz(path: &Path) -> Result<Box<dyn BufRead>, InputError> {
    let file = File::open(path)?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Writes through a sibling temp file and renames it into place, so readers
/// see either the previous file or the complete new one.
pub fn write_atomic<F>(path: &Path, gzip: bool, body: F) -> Result<(), InputError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), InputError>,
{
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| InputError::InvalidInput(format!("bad output path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp{}", std::process::id()));

    let result = (|| -> Result<(), InputError> {
        let file = File::create(&tmp)?;
        if gzip {
            let mut enc = GzEncoder::new(BufWriter::new(file), Compression::default());
            body(&mut enc)?;
            let mut inner = enc.finish()?;
            inner.flush()?;
            inner.get_ref().sync_all()?;
        } else {
            let mut w = BufWriter::new(file);
            body(&mut w)?;
            w.flush()?;
            w.get_ref().sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
