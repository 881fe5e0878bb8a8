//! CSV persistence for record sets: load, atomic save, and the load-merge-save cycle.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::key::IdentityKey;
use crate::logging::{LogContext, PerformanceLogger};
use crate::merge::{merge, MergeReport};
use crate::record::{Record, Value};
use crate::record_set::{RecordSet, Status, STATUS_COLUMN};

/// A store file together with the identity key its records are deduplicated by
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
    key: IdentityKey,
    status_column: String,
    source: Option<String>,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>, key: IdentityKey) -> Self {
        Self {
            path: path.into(),
            key,
            status_column: STATUS_COLUMN.to_string(),
            source: None,
        }
    }

    pub fn with_status_column(mut self, name: impl Into<String>) -> Self {
        self.status_column = name.into();
        self
    }

    /// Name of the configured source this store belongs to, attached to ingest logs
    pub fn with_source(mut self, name: impl Into<String>) -> Self {
        self.source = Some(name.into());
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    /// Empty record set configured like this store
    pub fn empty_set(&self) -> RecordSet {
        RecordSet::new(self.key.clone()).with_status_column(self.status_column.clone())
    }

    pub fn load(&self) -> StoreResult<RecordSet> {
        read_into(&self.path, self.empty_set())
    }

    pub fn save(&self, set: &RecordSet) -> StoreResult<()> {
        save(&self.path, set)
    }

    /// Load the store, merge `batch` into it and write the result back.
    /// The file is not touched when the merge fails.
    pub fn ingest<I>(&self, batch: I) -> StoreResult<(RecordSet, MergeReport)>
    where
        I: IntoIterator<Item = Record>,
    {
        let batch: Vec<Record> = batch.into_iter().collect();
        let mut context = LogContext::new("store", "ingest")
            .with_path(self.path.display().to_string())
            .with_string_field("key", self.key.to_string())
            .with_number_field("batch_records", batch.len() as i64);
        if let Some(source) = &self.source {
            context = context.with_source(source.clone());
        }
        let timer = PerformanceLogger::new(context);

        let result = self.load().and_then(|existing| {
            let (merged, report) = merge(&existing, batch)?;
            self.save(&merged)?;
            Ok((merged, report))
        });

        match &result {
            Ok((merged, report)) => {
                timer.finish_with_status(&format!("{} ({} records stored)", report, merged.len()), "ok")
            }
            Err(e) => timer.finish_with_error("ingest aborted", e),
        }
        result
    }
}

/// Load the store at `path`. A missing or empty file gives an empty set.
pub fn load(path: impl AsRef<Path>, key: IdentityKey) -> StoreResult<RecordSet> {
    read_into(path.as_ref(), RecordSet::new(key))
}

fn read_into(path: &Path, mut set: RecordSet) -> StoreResult<RecordSet> {
    set.check_key()?;

    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Store {} does not exist yet, starting empty", path.display());
            return Ok(set);
        }
        Err(e) => return Err(StoreError::Read { path: path.to_path_buf(), source: e }),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        debug!("Store {} is empty", path.display());
        return Ok(set);
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes.as_slice());

    let headers = reader
        .headers()
        .map_err(|e| StoreError::corrupt(path, describe_csv_error(&e)))?
        .clone();
    check_headers(path, &headers, &set)?;

    let status_idx = headers.iter().position(|h| set.is_status_column(h));
    if let Some(i) = status_idx {
        // keep the spelling the file already uses, e.g. `Status`
        if &headers[i] != set.status_column() {
            set = set.with_status_column(&headers[i]);
        }
    }
    for (i, name) in headers.iter().enumerate() {
        if Some(i) != status_idx {
            set.add_column(name);
        }
    }

    let mut duplicates = 0usize;
    for result in reader.records() {
        let row = result.map_err(|e| StoreError::corrupt(path, describe_csv_error(&e)))?;
        let line = row.position().map(|p| p.line()).unwrap_or_default();

        let mut record = Record::new();
        let mut status = None;
        for (i, cell) in row.iter().enumerate() {
            if Some(i) == status_idx {
                if !cell.is_empty() {
                    let parsed = cell
                        .parse::<Status>()
                        .map_err(|e| StoreError::corrupt(path, format!("line {}: {}", line, e)))?;
                    status = Some(parsed);
                }
                continue;
            }
            record.set(&headers[i], Value::from_cell(cell));
        }

        let value = set.key().value_of(&record).map_err(|field| {
            StoreError::corrupt(path, format!("line {}: no value for key field '{}'", line, field))
        })?;

        // on-disk duplicates: the later row wins
        if set.upsert(value, record, status).is_some() {
            duplicates += 1;
        }
    }

    if duplicates > 0 {
        warn!(
            "Store {} contains {} duplicate key(s); kept the last occurrence of each",
            path.display(),
            duplicates
        );
    }
    debug!("Loaded {} records from {}", set.len(), path.display());

    Ok(set)
}

fn check_headers(path: &Path, headers: &StringRecord, set: &RecordSet) -> StoreResult<()> {
    for (i, name) in headers.iter().enumerate() {
        if name.is_empty() {
            return Err(StoreError::corrupt(path, format!("header column {} has no name", i + 1)));
        }
        if headers.iter().take(i).any(|h| h == name) {
            return Err(StoreError::corrupt(path, format!("header names column '{}' twice", name)));
        }
    }

    let status_headers: Vec<&str> = headers.iter().filter(|h| set.is_status_column(h)).collect();
    if status_headers.len() > 1 {
        return Err(StoreError::corrupt(
            path,
            format!("header has more than one status column: {}", status_headers.join(", ")),
        ));
    }

    for field in set.key().fields() {
        if !headers.iter().any(|h| h == field) {
            return Err(StoreError::corrupt(
                path,
                format!("header has no '{}' column (is the header row missing?)", field),
            ));
        }
    }

    Ok(())
}

fn describe_csv_error(error: &csv::Error) -> String {
    match error.kind() {
        csv::ErrorKind::UnequalLengths { pos, expected_len, len } => {
            let line = pos.as_ref().map(|p| p.line()).unwrap_or_default();
            format!("line {} has {} fields, header has {}", line, len, expected_len)
        }
        csv::ErrorKind::Utf8 { pos, .. } => {
            let line = pos.as_ref().map(|p| p.line()).unwrap_or_default();
            format!("line {} is not valid UTF-8", line)
        }
        _ => error.to_string(),
    }
}

/// Write `set` to `path`, replacing the previous file atomically
pub fn save(path: impl AsRef<Path>, set: &RecordSet) -> StoreResult<()> {
    let path = path.as_ref();
    set.check_key()?;
    write_atomic(path, |file| write_set(file, set))?;
    info!("Saved {} records to {}", set.len(), path.display());
    Ok(())
}

fn write_set<W: Write>(out: W, set: &RecordSet) -> io::Result<()> {
    let with_status = set.has_status();
    let mut writer = WriterBuilder::new().from_writer(out);

    let mut header: Vec<&str> = set.columns().iter().map(String::as_str).collect();
    if with_status {
        header.push(set.status_column());
    }
    writer.write_record(&header)?;

    for entry in set.entries() {
        let mut row: Vec<String> = set
            .columns()
            .iter()
            .map(|c| entry.record.persisted(c).into_owned())
            .collect();
        if with_status {
            row.push(entry.status.map(|s| s.to_string()).unwrap_or_default());
        }
        writer.write_record(&row)?;
    }

    writer.flush()
}

/// Write through a temporary file in the destination directory, then rename it
/// over `path`. On any failure the previous file is left as it was and the
/// temporary file is removed.
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> StoreResult<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let write_error = |source: io::Error| StoreError::Write { path: path.to_path_buf(), source };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(write_error)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".lstore-")
        .suffix(".tmp")
        .tempfile_in(&dir)
        .map_err(write_error)?;

    write(temp.as_file_mut()).map_err(write_error)?;

    // temp files are created 0600; a replaced store keeps the mode readers rely on
    if let Ok(existing) = fs::metadata(path) {
        if existing.is_file() {
            temp.as_file().set_permissions(existing.permissions()).map_err(write_error)?;
        }
    }
    temp.as_file().sync_all().map_err(write_error)?;
    temp.persist(path).map_err(|e| write_error(e.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn link_key() -> IdentityKey {
        IdentityKey::field("link").unwrap()
    }

    fn listing(link: &str, price: i64) -> Record {
        Record::new().with("title", format!("Item {}", link)).with("price", price).with("link", link)
    }

    fn pairs(set: &RecordSet) -> BTreeSet<(String, Vec<(String, String)>)> {
        set.entries()
            .map(|e| {
                let key = set.key().value_of(&e.record).unwrap().to_string();
                let fields = set
                    .columns()
                    .iter()
                    .map(|c| (c.clone(), e.record.persisted(c).into_owned()))
                    .collect();
                (key, fields)
            })
            .collect()
    }

    fn temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn test_load_missing_and_empty() {
        let dir = TempDir::new().unwrap();
        let missing = load(dir.path().join("nope.csv"), link_key()).unwrap();
        assert!(missing.is_empty());

        let blank = dir.path().join("blank.csv");
        fs::write(&blank, "\n  \n").unwrap();
        assert!(load(&blank, link_key()).unwrap().is_empty());
    }

    #[test]
    fn test_header_only_keeps_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.csv");
        fs::write(&path, "title,price,link\n").unwrap();

        let set = load(&path, link_key()).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.columns(), &["link", "title", "price"]);
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.csv");

        let empty = RecordSet::new(link_key());
        let batch = vec![
            listing("a", 100),
            listing("b", 250).with("description", "Two seats, \"barely\" used\nPickup only"),
            Record::new().with("link", "c").with("price", Value::Null),
        ];
        let (merged, _) = merge(&empty, batch).unwrap();
        save(&path, &merged).unwrap();

        let loaded = load(&path, link_key()).unwrap();
        assert_eq!(pairs(&loaded), pairs(&merged));
        assert_eq!(loaded.count_status(Some(Status::New)), 3);
    }

    #[test]
    fn test_saved_column_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.csv");

        let empty = RecordSet::new(link_key());
        let (merged, _) = merge(&empty, vec![listing("a", 1)]).unwrap();
        save(&path, &merged).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().next().unwrap(), "link,title,price,status");
        assert_eq!(text.lines().nth(1).unwrap(), "a,Item a,1,new");
    }

    #[test]
    fn test_idempotence_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.csv");
        let batch = vec![listing("a", 1), listing("b", 2).with("year", Value::Null)];

        let (merged, _) = merge(&RecordSet::new(link_key()), batch.clone()).unwrap();
        save(&path, &merged).unwrap();
        let loaded = load(&path, link_key()).unwrap();
        let (_, report) = merge(&loaded, batch).unwrap();

        assert_eq!(report.new, 0);
        assert_eq!(report.updated, 0);
        assert_eq!(report.unchanged, 2);
    }

    #[test]
    fn test_duplicate_keys_on_disk_last_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.csv");
        fs::write(
            &path,
            "title,price,link\nSofa,100,https://x/1\nChair,20,https://x/2\nSofa,90,https://x/1\n",
        )
        .unwrap();

        let set = load(&path, link_key()).unwrap();
        assert_eq!(set.len(), 2);
        let key = set.key().value_of(&Record::new().with("link", "https://x/1")).unwrap();
        assert_eq!(set.get(&key).unwrap().record.persisted("price"), "90");
        assert_eq!(set.keys().len(), set.len());
    }

    #[test]
    fn test_corrupt_stores() {
        let dir = TempDir::new().unwrap();
        let cases = [
            ("ragged.csv", "title,price,link\nSofa,100\n"),
            ("no_header.csv", "Sofa,100,https://x/1\nChair,20,https://x/2\n"),
            ("blank_name.csv", "title,,link\nSofa,100,https://x/1\n"),
            ("twice.csv", "link,title,link\nhttps://x/1,Sofa,https://x/1\n"),
            ("empty_key.csv", "title,price,link\nSofa,100,\n"),
            ("bad_status.csv", "link,status\nhttps://x/1,stale\n"),
        ];

        for (name, content) in cases {
            let path = dir.path().join(name);
            fs::write(&path, content).unwrap();
            match load(&path, link_key()) {
                Err(StoreError::CorruptStore { .. }) => {}
                other => panic!("{}: expected CorruptStore, got {:?}", name, other.map(|s| s.len())),
            }
        }
    }

    #[test]
    fn test_legacy_status_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.csv");
        fs::write(&path, "link,price,status\na,1,New\nb,2,Updated\nc,3,\n").unwrap();

        let set = load(&path, link_key()).unwrap();
        assert_eq!(set.count_status(Some(Status::New)), 1);
        assert_eq!(set.count_status(Some(Status::Existing)), 1);
        assert_eq!(set.count_status(None), 1);
        assert!(!set.columns().iter().any(|c| c == "status"));
    }

    #[test]
    fn test_custom_status_column() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path().join("laptops.csv"), link_key()).with_status_column("highlight");

        store.ingest(vec![listing("a", 1)]).unwrap();
        let text = fs::read_to_string(store.path()).unwrap();
        assert_eq!(text.lines().next().unwrap(), "link,title,price,highlight");

        let set = store.load().unwrap();
        assert_eq!(set.count_status(Some(Status::New)), 1);
    }

    #[test]
    fn test_schema_growth() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path().join("cars.csv"), link_key());

        store.ingest(vec![listing("a", 1), listing("b", 2)]).unwrap();
        store.ingest(vec![listing("c", 3).with("year", 2015)]).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "link,title,price,year,status");
        assert_eq!(lines[1], "a,Item a,1,,new");
        assert_eq!(lines[3], "c,Item c,3,2015,new");
    }

    #[test]
    fn test_ingest_missing_key_leaves_disk_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path().join("store.csv"), link_key());
        store.ingest(vec![listing("a", 1)]).unwrap();
        let before = fs::read(store.path()).unwrap();

        let batch = vec![listing("b", 2), Record::new().with("title", "Orphan")];
        let err = store.ingest(batch).unwrap_err();
        assert!(matches!(err, StoreError::MissingKey { index: 1, .. }));
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn test_atomic_write_under_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.csv");
        let (merged, _) = merge(&RecordSet::new(link_key()), vec![listing("a", 1)]).unwrap();
        save(&path, &merged).unwrap();
        let before = fs::read(&path).unwrap();

        let result = write_atomic(&path, |file| {
            file.write_all(b"link,title\nhalf-writ")?;
            Err(io::Error::new(io::ErrorKind::Other, "connection dropped"))
        });

        assert!(matches!(result, Err(StoreError::Write { .. })));
        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_save_to_unwritable_destination() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("occupied");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep.txt"), "x").unwrap();

        let (merged, _) = merge(&RecordSet::new(link_key()), vec![listing("a", 1)]).unwrap();
        let err = save(&target, &merged).unwrap_err();

        assert!(matches!(err, StoreError::Write { .. }));
        assert!(err.is_recoverable());
        assert_eq!(fs::read_to_string(target.join("keep.txt")).unwrap(), "x");
        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ecommerce").join("furniture.csv");
        let (merged, _) = merge(&RecordSet::new(link_key()), vec![listing("a", 1)]).unwrap();
        save(&path, &merged).unwrap();
        assert_eq!(load(&path, link_key()).unwrap().len(), 1);
    }

    #[test]
    fn test_key_naming_status_column_never_touches_disk() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path().join("store.csv"), IdentityKey::field("status").unwrap());

        let batch = vec![Record::new().with("status", "a").with("price", 1)];
        let err = store.ingest(batch).unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
        assert!(!store.path().exists());

        let set = RecordSet::new(IdentityKey::field("Status").unwrap());
        assert!(matches!(save(store.path(), &set), Err(StoreError::InvalidKey { .. })));
        assert!(!store.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path().join("store.csv"), link_key());
        store.ingest(vec![listing("a", 1)]).unwrap();
        fs::set_permissions(store.path(), fs::Permissions::from_mode(0o644)).unwrap();

        store.ingest(vec![listing("b", 2)]).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[test]
    fn test_capitalised_status_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("arki.csv");
        fs::write(&path, "Title,Price,link,Status\nDesk,100,a,New\nShelf,80,b,Existing\n").unwrap();
        let store = RecordStore::new(&path, link_key());

        let set = store.load().unwrap();
        assert_eq!(set.count_status(Some(Status::New)), 1);
        assert_eq!(set.status_column(), "Status");
        assert!(!set.columns().iter().any(|c| c == "Status"));

        store.ingest(vec![Record::new().with("Title", "Lamp").with("Price", 5).with("link", "c")]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().next().unwrap(), "link,Title,Price,Status");
        assert_eq!(text.lines().nth(3).unwrap(), "c,Lamp,5,new");

        fs::write(&path, "link,Status,status\na,new,new\n").unwrap();
        assert!(matches!(store.load(), Err(StoreError::CorruptStore { .. })));
    }

    #[test]
    fn test_ingest_attaches_source() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path().join("store.csv"), link_key()).with_source("jiji-furniture");
        assert_eq!(store.source(), Some("jiji-furniture"));

        let (merged, report) = store.ingest(vec![listing("a", 1)]).unwrap();
        assert_eq!(report.new, 1);
        assert_eq!(merged.len(), 1);
    }
}
