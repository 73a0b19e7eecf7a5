//! JSONL-backed record store with append fast path and atomic compaction.

use crate::error::StoreError;
use crate::record::Record;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// File-backed store keeping one serialized record per line.
pub struct JsonlStore<T: Record> {
    /// Backing JSONL file.
    path: PathBuf,
    /// Serialize read-modify-write cycles on the backing file.
    write_lock: Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> fmt::Debug for JsonlStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonlStore")
            .field("path", &self.path)
            .finish()
    }
}

impl<T: Record> JsonlStore<T> {
    /// Create a store for the given file, creating parent directories.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        debug!("initialized JSONL store (path={})", path.display());
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            _record: PhantomData,
        })
    }

    /// Path to the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save a record, appending new ids and replacing existing ones in place.
    pub fn save(&self, record: &T) -> Result<(), StoreError> {
        self.save_checked(record, |_, _| Ok(()))
    }

    /// Save a record, running `check` against the stored version first when
    /// the id already exists. An error from `check` aborts the save.
    pub fn save_checked<F>(&self, record: &T, check: F) -> Result<(), StoreError>
    where
        F: FnOnce(&T, &T) -> Result<(), StoreError>,
    {
        let _guard = self.write_lock.lock();
        let (records, malformed) = self.read_for_rewrite()?;
        let Some(position) = records
            .iter()
            .position(|existing| existing.id() == record.id())
        else {
            self.append(record)?;
            debug!(
                "appended record (path={}, id={})",
                self.path.display(),
                record.id()
            );
            return Ok(());
        };

        check(&records[position], record)?;
        let records = replace(records, record.clone());
        self.rewrite(&records, malformed)?;
        debug!(
            "replaced record in place (path={}, id={}, records={})",
            self.path.display(),
            record.id(),
            records.len()
        );
        Ok(())
    }

    /// Atomically read, change, and write back one record.
    ///
    /// `change` receives the stored record (or `None`) and returns the value to
    /// store, or `None` to leave the file alone. The whole cycle runs under the
    /// write lock. Returns the record as stored afterwards.
    pub fn update<F>(&self, id: &T::Id, change: F) -> Result<Option<T>, StoreError>
    where
        F: FnOnce(Option<T>) -> Option<T>,
    {
        let _guard = self.write_lock.lock();
        let (records, malformed) = self.read_for_rewrite()?;
        let existing = records.iter().find(|record| record.id() == id).cloned();
        let existed = existing.is_some();
        let Some(updated) = change(existing.clone()) else {
            return Ok(existing);
        };
        if updated.id() != id {
            return Err(StoreError::Immutable {
                id: id.to_string(),
                field: "id",
            });
        }
        if existed {
            let records = replace(records, updated.clone());
            self.rewrite(&records, malformed)?;
            debug!(
                "updated record in place (path={}, id={})",
                self.path.display(),
                id
            );
        } else {
            self.append(&updated)?;
            debug!("appended record (path={}, id={})", self.path.display(), id);
        }
        Ok(Some(updated))
    }

    /// Find the first record with the given id.
    pub fn find_by_id(&self, id: &T::Id) -> Result<Option<T>, StoreError> {
        let mut found = None;
        self.scan(|record| {
            if record.id() == id {
                found = Some(record);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(found)
    }

    /// Check whether a record with the given id exists.
    pub fn exists_by_id(&self, id: &T::Id) -> Result<bool, StoreError> {
        Ok(self.find_by_id(id)?.is_some())
    }

    /// Load every well-formed record in file order.
    pub fn find_all(&self) -> Result<Vec<T>, StoreError> {
        let records = self.read_records()?;
        debug!(
            "loaded records (path={}, count={})",
            self.path.display(),
            records.len()
        );
        Ok(records)
    }

    /// Delete a record by id, returning whether anything was removed.
    pub fn delete_by_id(&self, id: &T::Id) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let (records, malformed) = self.read_for_rewrite()?;
        let before = records.len();
        let remaining: Vec<T> = records
            .into_iter()
            .filter(|record| record.id() != id)
            .collect();
        if remaining.len() == before {
            return Ok(false);
        }
        let remaining = dedupe(remaining);
        self.rewrite(&remaining, malformed)?;
        debug!(
            "deleted record (path={}, id={}, remaining={})",
            self.path.display(),
            id,
            remaining.len()
        );
        Ok(true)
    }

    /// Remove the backing file, returning whether it existed.
    pub fn delete_all(&self) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("deleted record file (path={})", self.path.display());
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Count well-formed records.
    pub fn count(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        self.scan(|_| {
            count += 1;
            ControlFlow::Continue(())
        })?;
        Ok(count)
    }

    /// Visit parsed records in file order, skipping malformed lines.
    /// Returns how many lines were skipped as malformed.
    fn scan<F>(&self, mut visit: F) -> Result<usize, StoreError>
    where
        F: FnMut(T) -> ControlFlow<()>,
    {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let reader = BufReader::new(file);
        let mut malformed = 0;
        for (index, line) in reader.split(b'\n').enumerate() {
            let line = line?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<T>(&line) {
                Ok(record) => {
                    if visit(record).is_break() {
                        break;
                    }
                }
                Err(err) => {
                    malformed += 1;
                    warn!(
                        "skipping malformed record (path={}, line={}, error={})",
                        self.path.display(),
                        index + 1,
                        err
                    );
                }
            }
        }
        Ok(malformed)
    }

    fn read_records(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.read_for_rewrite()?.0)
    }

    /// Every well-formed record plus the number of malformed lines.
    fn read_for_rewrite(&self) -> Result<(Vec<T>, usize), StoreError> {
        let mut records = Vec::new();
        let malformed = self.scan(|record| {
            records.push(record);
            ControlFlow::Continue(())
        })?;
        Ok((records, malformed))
    }

    /// Append one line with a single write. A torn trailing line left by an
    /// interrupted writer is terminated first so the new record stays intact.
    fn append(&self, record: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        let len = file.metadata()?.len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                warn!(
                    "terminating torn trailing line before append (path={})",
                    self.path.display()
                );
                line.insert(0, b'\n');
            }
        }
        file.write_all(&line)?;
        Ok(())
    }

    /// Replace the file with `records`. Malformed lines cannot be carried
    /// over, so the rewrite drops them.
    fn rewrite(&self, records: &[T], malformed: usize) -> Result<(), StoreError> {
        self.stage_rewrite(records)?.commit()?;
        if malformed > 0 {
            warn!(
                "compaction dropped malformed lines (path={}, count={})",
                self.path.display(),
                malformed
            );
        }
        Ok(())
    }

    /// Write `records` to a synced temp file next to the backing file.
    pub(crate) fn stage_rewrite(&self, records: &[T]) -> Result<StagedRewrite, StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut temp = tempfile::Builder::new()
            .prefix(".tmp_")
            .suffix(".jsonl")
            .tempfile_in(&dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            for record in records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        Ok(StagedRewrite {
            temp,
            target: self.path.clone(),
            dir,
        })
    }
}

/// A fully written temp file waiting to replace the backing file.
///
/// Dropping it without calling [`StagedRewrite::commit`] deletes the temp
/// file and leaves the original untouched.
pub(crate) struct StagedRewrite {
    temp: NamedTempFile,
    target: PathBuf,
    dir: PathBuf,
}

impl StagedRewrite {
    /// Atomically rename the temp file over the backing file.
    pub(crate) fn commit(self) -> Result<(), StoreError> {
        self.temp.persist(&self.target)?;
        sync_dir(&self.dir);
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = File::open(dir).and_then(|handle| handle.sync_all()) {
        debug!("directory sync failed (dir={}, error={})", dir.display(), err);
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// Deduplicate, then swap in `record` at the position of its id.
fn replace<T: Record>(records: Vec<T>, record: T) -> Vec<T> {
    let mut records = dedupe(records);
    if let Some(slot) = records
        .iter_mut()
        .find(|existing| existing.id() == record.id())
    {
        *slot = record;
    }
    records
}

/// Keep the first occurrence of every id.
fn dedupe<T: Record>(records: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    let before = records.len();
    let kept: Vec<T> = records
        .into_iter()
        .filter(|record| seen.insert(record.id().clone()))
        .collect();
    if kept.len() != before {
        warn!("dropped duplicate records during compaction (count={})", before - kept.len());
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::JsonlStore;
    use crate::{Record, StoreError};
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    impl Record for Note {
        type Id = String;

        fn id(&self) -> &String {
            &self.id
        }
    }

    fn note(id: &str, body: &str) -> Note {
        Note {
            id: id.to_string(),
            body: body.to_string(),
        }
    }

    fn line_of(record: &Note) -> String {
        serde_json::to_string(record).expect("encode")
    }

    #[test]
    fn saved_record_is_found_by_id_and_listed() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlStore::<Note>::new(temp.path().join("notes.jsonl")).expect("store");
        let record = note("a", "first");

        store.save(&record).expect("save");

        assert_eq!(
            store.find_by_id(&"a".to_string()).expect("find"),
            Some(record.clone())
        );
        assert_eq!(store.find_all().expect("all"), vec![record]);
        assert_eq!(store.count().expect("count"), 1);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlStore::<Note>::new(temp.path().join("nested/notes.jsonl")).expect("store");

        assert_eq!(store.find_all().expect("all"), Vec::<Note>::new());
        assert_eq!(store.find_by_id(&"a".to_string()).expect("find"), None);
        assert_eq!(store.count().expect("count"), 0);
        assert_eq!(store.delete_by_id(&"a".to_string()).expect("delete"), false);
        assert_eq!(store.delete_all().expect("delete all"), false);
    }

    #[test]
    fn saving_existing_id_replaces_in_place() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlStore::<Note>::new(temp.path().join("notes.jsonl")).expect("store");
        store.save(&note("a", "one")).expect("save a");
        store.save(&note("b", "two")).expect("save b");
        store.save(&note("c", "three")).expect("save c");

        store.save(&note("b", "two, edited")).expect("replace b");

        assert_eq!(
            store.find_all().expect("all"),
            vec![note("a", "one"), note("b", "two, edited"), note("c", "three")]
        );
        assert_eq!(store.count().expect("count"), 3);
        let contents = fs::read_to_string(store.path()).expect("read");
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn rewrite_leaves_no_temp_files_behind() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlStore::<Note>::new(temp.path().join("notes.jsonl")).expect("store");
        store.save(&note("a", "one")).expect("save");
        store.save(&note("a", "uno")).expect("replace");

        let entries: Vec<_> = fs::read_dir(temp.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("notes.jsonl")]);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("notes.jsonl");
        let good_a = note("a", "one");
        let good_b = note("b", "two");
        let mut file = fs::File::create(&path).expect("create");
        writeln!(file, "{}", line_of(&good_a)).expect("write");
        writeln!(file, "{{\"id\": \"broken\", ").expect("write");
        file.write_all(&[0xff, 0xfe, b'\n']).expect("write");
        writeln!(file).expect("write");
        writeln!(file, "{}", line_of(&good_b)).expect("write");
        drop(file);

        let store = JsonlStore::<Note>::new(&path).expect("store");
        assert_eq!(store.find_all().expect("all"), vec![good_a, good_b.clone()]);
        assert_eq!(store.count().expect("count"), 2);
        assert_eq!(
            store.find_by_id(&"b".to_string()).expect("find"),
            Some(good_b)
        );
    }

    #[test]
    fn append_after_torn_line_keeps_new_record_intact() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("notes.jsonl");
        let good = note("a", "one");
        fs::write(&path, format!("{}\n{{\"id\":\"b\",\"bo", line_of(&good))).expect("write");

        let store = JsonlStore::<Note>::new(&path).expect("store");
        store.save(&note("c", "three")).expect("save");

        assert_eq!(
            store.find_all().expect("all"),
            vec![good, note("c", "three")]
        );
    }

    #[test]
    fn dropped_staged_rewrite_leaves_original_untouched() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlStore::<Note>::new(temp.path().join("notes.jsonl")).expect("store");
        store.save(&note("a", "one")).expect("save a");
        store.save(&note("b", "two")).expect("save b");
        let before = fs::read(store.path()).expect("read before");

        let staged = store
            .stage_rewrite(&[note("a", "changed")])
            .expect("stage");
        drop(staged);

        assert_eq!(fs::read(store.path()).expect("read after"), before);
        let entries = fs::read_dir(temp.path()).expect("read dir").count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn committed_staged_rewrite_replaces_contents() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlStore::<Note>::new(temp.path().join("notes.jsonl")).expect("store");
        store.save(&note("a", "one")).expect("save");

        store
            .stage_rewrite(&[note("z", "only")])
            .expect("stage")
            .commit()
            .expect("commit");

        assert_eq!(store.find_all().expect("all"), vec![note("z", "only")]);
    }

    #[test]
    fn delete_by_id_preserves_order_of_remaining_records() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlStore::<Note>::new(temp.path().join("notes.jsonl")).expect("store");
        for (id, body) in [("a", "1"), ("b", "2"), ("c", "3")] {
            store.save(&note(id, body)).expect("save");
        }

        assert_eq!(store.delete_by_id(&"b".to_string()).expect("delete"), true);
        assert_eq!(store.delete_by_id(&"b".to_string()).expect("delete again"), false);
        assert_eq!(
            store.find_all().expect("all"),
            vec![note("a", "1"), note("c", "3")]
        );
    }

    #[test]
    fn delete_all_removes_backing_file() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlStore::<Note>::new(temp.path().join("notes.jsonl")).expect("store");
        store.save(&note("a", "one")).expect("save");

        assert_eq!(store.delete_all().expect("delete all"), true);
        assert_eq!(store.path().exists(), false);
        assert_eq!(store.count().expect("count"), 0);
    }

    #[test]
    fn compaction_collapses_duplicate_ids_to_first_occurrence() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("notes.jsonl");
        let lines = [
            line_of(&note("a", "first a")),
            line_of(&note("b", "b")),
            line_of(&note("a", "second a")),
        ];
        fs::write(&path, format!("{}\n", lines.join("\n"))).expect("write");

        let store = JsonlStore::<Note>::new(&path).expect("store");
        assert_eq!(
            store.find_by_id(&"a".to_string()).expect("find"),
            Some(note("a", "first a"))
        );
        store.save(&note("b", "b2")).expect("replace b");

        assert_eq!(
            store.find_all().expect("all"),
            vec![note("a", "first a"), note("b", "b2")]
        );
    }

    #[test]
    fn failed_check_aborts_replace() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlStore::<Note>::new(temp.path().join("notes.jsonl")).expect("store");
        store.save(&note("a", "one")).expect("save");
        let before = fs::read(store.path()).expect("read");

        let err = store
            .save_checked(&note("a", "two"), |_, _| {
                Err(StoreError::Immutable {
                    id: "a".to_string(),
                    field: "body",
                })
            })
            .expect_err("check should fail");

        assert!(matches!(err, StoreError::Immutable { field: "body", .. }));
        assert_eq!(fs::read(store.path()).expect("read"), before);
    }

    #[test]
    fn update_changes_appends_or_leaves_alone() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlStore::<Note>::new(temp.path().join("notes.jsonl")).expect("store");
        store.save(&note("a", "one")).expect("save");
        store.save(&note("b", "two")).expect("save");

        let updated = store
            .update(&"a".to_string(), |existing| {
                existing.map(|mut record| {
                    record.body.push_str(" more");
                    record
                })
            })
            .expect("update");
        assert_eq!(updated, Some(note("a", "one more")));

        let created = store
            .update(&"c".to_string(), |existing| {
                assert_eq!(existing, None);
                Some(note("c", "three"))
            })
            .expect("create");
        assert_eq!(created, Some(note("c", "three")));

        let before = fs::read(store.path()).expect("read");
        let unchanged = store
            .update(&"b".to_string(), |_| None)
            .expect("no-op");
        assert_eq!(unchanged, Some(note("b", "two")));
        assert_eq!(fs::read(store.path()).expect("read"), before);

        assert_eq!(
            store.find_all().expect("all"),
            vec![note("a", "one more"), note("b", "two"), note("c", "three")]
        );
        assert!(store.exists_by_id(&"c".to_string()).expect("exists"));
        assert!(!store.exists_by_id(&"zzz".to_string()).expect("exists"));
    }

    #[test]
    fn update_rejects_id_change() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlStore::<Note>::new(temp.path().join("notes.jsonl")).expect("store");
        store.save(&note("a", "one")).expect("save");
        let err = store
            .update(&"a".to_string(), |_| Some(note("b", "moved")))
            .expect_err("id change");
        assert!(matches!(err, StoreError::Immutable { field: "id", .. }));
        assert_eq!(store.find_all().expect("all"), vec![note("a", "one")]);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlStore::<Note>::new(temp.path().join("notes.jsonl")).expect("store");
        for index in 0..50 {
            store
                .save(&note(&format!("pad-{index}"), "padding"))
                .expect("pad");
        }
        store.save(&note("counter", "")).expect("save");

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        store
                            .update(&"counter".to_string(), |existing| {
                                existing.map(|mut record| {
                                    record.body.push('x');
                                    record
                                })
                            })
                            .expect("update");
                    }
                });
            }
        });

        let counter = store
            .find_by_id(&"counter".to_string())
            .expect("find")
            .expect("counter");
        assert_eq!(counter.body.len(), 40);
    }

    #[test]
    fn compaction_drops_malformed_lines() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("notes.jsonl");
        let mut file = fs::File::create(&path).expect("create");
        writeln!(file, "{}", line_of(&note("a", "one"))).expect("write");
        writeln!(file, "not json").expect("write");
        drop(file);

        let store = JsonlStore::<Note>::new(&path).expect("store");
        store.save(&note("a", "uno")).expect("replace");
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, format!("{}\n", line_of(&note("a", "uno"))));
    }
}
