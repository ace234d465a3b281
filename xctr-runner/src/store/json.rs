// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{RunQuery, RunStore};
use crate::errors::RunStoreError;
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions, TryLockError},
    io::{self, Write},
    thread,
    time::{Duration, Instant},
};
use swrite::{SWrite, swrite};
use tracing::debug;
use xctr_metadata::{RunCompletion, RunId, RunRecord, TestCaseRecord};

static RUNS_LOCK_FILE_NAME: &str = "runs.lock";
static RUNS_JSON_FILE_NAME: &str = "runs.json";
static RUNS_DIR_NAME: &str = "runs";
static RUN_LOG_FILE_NAME: &str = "run.log";
static TEST_CASES_FILE_NAME: &str = "test-cases.jsonl";

/// A run store backed by files in a directory.
///
/// The layout is:
///
/// ```text
/// <store_dir>/runs.lock                        lock file for the run list
/// <store_dir>/runs.json                        list of run records
/// <store_dir>/runs/<run-dir>/run.log           raw log of a completed run
/// <store_dir>/runs/<run-dir>/test-cases.jsonl  one test case per line
/// ```
///
/// `runs.json` is replaced atomically, and every read-modify-write of it
/// happens under an exclusive lock on `runs.lock`, so several processes can
/// share a store. Records in it never carry the raw log.
///
/// `<run-dir>` is the run id with every byte outside `[a-z0-9_-]`, and a
/// leading `.`, written as `%XX`. Run ids are stored unchanged in `runs.json`.
#[derive(Debug)]
pub struct JsonRunStore {
    store_dir: Utf8PathBuf,
    runs_dir: Utf8PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RunList {
    runs: Vec<RunRecord>,
}

impl JsonRunStore {
    /// Opens the store at `store_dir`, creating the directory if necessary.
    pub fn new(store_dir: &Utf8Path) -> Result<Self, RunStoreError> {
        let runs_dir = store_dir.join(RUNS_DIR_NAME);
        std::fs::create_dir_all(&runs_dir).map_err(|error| RunStoreError::StoreDirCreate {
            path: runs_dir.clone(),
            error,
        })?;

        Ok(Self {
            store_dir: store_dir.to_owned(),
            runs_dir,
        })
    }

    /// Returns the directory this store lives in.
    pub fn store_dir(&self) -> &Utf8Path {
        &self.store_dir
    }

    fn runs_json_path(&self) -> Utf8PathBuf {
        self.store_dir.join(RUNS_JSON_FILE_NAME)
    }

    fn run_dir(&self, run_id: &RunId) -> Result<Utf8PathBuf, RunStoreError> {
        Ok(self.runs_dir.join(run_dir_name(run_id)?))
    }

    /// Locks the run list. The lock is released when the guard is dropped.
    ///
    /// Locks are only held for the duration of a single store operation, so
    /// blocking here is fine.
    fn lock(&self, kind: LockKind) -> Result<StoreLock, RunStoreError> {
        let lock_file_path = self.store_dir.join(RUNS_LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_file_path)
            .map_err(|error| RunStoreError::FileLock {
                path: lock_file_path.clone(),
                error,
            })?;
        acquire_lock_with_retry(&file, &lock_file_path, kind)?;
        Ok(StoreLock {
            _file: DebugIgnore(file),
        })
    }

    fn read_run_list(&self) -> Result<RunList, RunStoreError> {
        let path = self.runs_json_path();
        match std::fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json)
                .map_err(|error| RunStoreError::RunListDeserialize { path, error }),
            // The list is created by the first insert.
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(RunList::default()),
            Err(error) => Err(RunStoreError::RunListRead { path, error }),
        }
    }

    fn write_run_list(&self, list: &RunList) -> Result<(), RunStoreError> {
        let path = self.runs_json_path();
        let json = serde_json::to_string_pretty(list).map_err(|error| {
            RunStoreError::RunListSerialize {
                path: path.clone(),
                error,
            }
        })?;

        atomicwrites::AtomicFile::new(&path, atomicwrites::AllowOverwrite)
            .write(|file| file.write_all(json.as_bytes()))
            .map_err(|error| RunStoreError::RunListWrite { path, error })
    }

    fn read_raw_log(&self, run_id: &RunId) -> Result<Option<String>, RunStoreError> {
        let path = self.run_dir(run_id)?.join(RUN_LOG_FILE_NAME);
        match std::fs::read_to_string(&path) {
            Ok(log) => Ok(Some(log)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(RunStoreError::RunLogRead { path, error }),
        }
    }
}

impl RunStore for JsonRunStore {
    fn insert_run(&self, run: &RunRecord) -> Result<(), RunStoreError> {
        let run_dir = self.run_dir(&run.id)?;
        let _lock = self.lock(LockKind::Exclusive)?;
        let mut list = self.read_run_list()?;
        if list.runs.iter().any(|r| r.id == run.id) {
            return Err(RunStoreError::DuplicateRun {
                run_id: run.id.clone(),
            });
        }

        // Add to the list before creating the directory, so a failed create
        // never leaves an orphaned directory behind.
        let mut record = run.clone();
        record.raw_log = None;
        list.runs.push(record);
        self.write_run_list(&list)?;

        std::fs::create_dir_all(&run_dir).map_err(|error| RunStoreError::RunDirCreate {
            path: run_dir.clone(),
            error,
        })?;
        debug!("inserted run {} into {}", run.id, self.store_dir);
        Ok(())
    }

    fn update_run_completion(&self, completion: &RunCompletion) -> Result<(), RunStoreError> {
        let run_dir = self.run_dir(&completion.id)?;
        let _lock = self.lock(LockKind::Exclusive)?;
        let mut list = self.read_run_list()?;
        let record = list
            .runs
            .iter_mut()
            .find(|r| r.id == completion.id)
            .ok_or_else(|| RunStoreError::RunNotFound {
                run_id: completion.id.clone(),
            })?;
        record.apply_completion(completion);
        record.raw_log = None;

        if let Some(raw_log) = &completion.raw_log {
            std::fs::create_dir_all(&run_dir).map_err(|error| RunStoreError::RunDirCreate {
                path: run_dir.clone(),
                error,
            })?;
            let path = run_dir.join(RUN_LOG_FILE_NAME);
            std::fs::write(&path, raw_log)
                .map_err(|error| RunStoreError::RunLogWrite { path, error })?;
        }

        self.write_run_list(&list)
    }

    fn insert_test_case(&self, test_case: &TestCaseRecord) -> Result<(), RunStoreError> {
        let run_dir = self.run_dir(&test_case.run_id)?;
        // Keeps the run from being deleted while the row is appended.
        let _lock = self.lock(LockKind::Shared)?;
        if !run_dir.is_dir() {
            return Err(RunStoreError::RunNotFound {
                run_id: test_case.run_id.clone(),
            });
        }

        let mut line =
            serde_json::to_string(test_case).map_err(|error| RunStoreError::TestCaseSerialize {
                run_id: test_case.run_id.clone(),
                error,
            })?;
        line.push('\n');

        let path = run_dir.join(TEST_CASES_FILE_NAME);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .map_err(|error| RunStoreError::TestCaseWrite { path, error })
    }

    fn runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>, RunStoreError> {
        let _lock = self.lock(LockKind::Shared)?;
        Ok(query.apply(self.read_run_list()?.runs))
    }

    fn run(&self, run_id: &RunId) -> Result<Option<RunRecord>, RunStoreError> {
        let _lock = self.lock(LockKind::Shared)?;
        let list = self.read_run_list()?;
        let Some(mut record) = list.runs.into_iter().find(|r| &r.id == run_id) else {
            return Ok(None);
        };
        record.raw_log = self.read_raw_log(run_id)?;
        Ok(Some(record))
    }

    fn test_cases(&self, run_id: &RunId) -> Result<Vec<TestCaseRecord>, RunStoreError> {
        let path = self.run_dir(run_id)?.join(TEST_CASES_FILE_NAME);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(RunStoreError::TestCaseRead { path, error }),
        };

        let mut test_cases = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str::<TestCaseRecord>(line).map_err(|error| {
                    RunStoreError::TestCaseDeserialize {
                        path: path.clone(),
                        line: idx + 1,
                        error,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        test_cases.sort_by(|a, b| {
            (&a.suite_name, &a.test_name).cmp(&(&b.suite_name, &b.test_name))
        });
        Ok(test_cases)
    }

    fn delete_runs(&self, run_ids: &[RunId]) -> Result<usize, RunStoreError> {
        let _lock = self.lock(LockKind::Exclusive)?;
        let mut list = self.read_run_list()?;
        let before = list.runs.len();
        list.runs.retain(|r| !run_ids.contains(&r.id));
        let deleted = before - list.runs.len();
        if deleted > 0 {
            self.write_run_list(&list)?;
        }

        for run_id in run_ids {
            let run_dir = self.run_dir(run_id)?;
            match std::fs::remove_dir_all(&run_dir) {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => {
                    return Err(RunStoreError::RunDirRemove {
                        path: run_dir,
                        error,
                    });
                }
            }
        }

        debug!("deleted {deleted} runs from {}", self.store_dir);
        Ok(deleted)
    }
}

/// Maps a run id to a single path component.
///
/// Only lowercase letters, digits, `-`, `_` and non-leading `.` are kept as
/// is. Uppercase letters are escaped so that distinct ids stay distinct on
/// case-insensitive filesystems.
fn run_dir_name(run_id: &RunId) -> Result<String, RunStoreError> {
    let id = run_id.as_str();
    if id.is_empty() {
        return Err(RunStoreError::InvalidRunId {
            run_id: run_id.clone(),
        });
    }

    let mut name = String::with_capacity(id.len());
    for (idx, byte) in id.bytes().enumerate() {
        let keep = byte.is_ascii_lowercase()
            || byte.is_ascii_digit()
            || matches!(byte, b'-' | b'_')
            || (byte == b'.' && idx > 0);
        if keep {
            name.push(char::from(byte));
        } else {
            swrite!(name, "%{byte:02X}");
        }
    }
    Ok(name)
}

#[derive(Debug)]
struct StoreLock {
    // Unlocked when the file is closed.
    _file: DebugIgnore<File>,
}

#[derive(Clone, Copy, Debug)]
enum LockKind {
    Shared,
    Exclusive,
}

/// Acquires a file lock, retrying for up to 5 seconds.
fn acquire_lock_with_retry(
    file: &File,
    lock_file_path: &Utf8Path,
    kind: LockKind,
) -> Result<(), RunStoreError> {
    const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
    const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

    let start = Instant::now();
    loop {
        let result = match kind {
            LockKind::Shared => file.try_lock_shared(),
            LockKind::Exclusive => file.try_lock(),
        };

        match result {
            Ok(()) => return Ok(()),
            Err(TryLockError::WouldBlock) => {
                if start.elapsed() >= LOCK_TIMEOUT {
                    return Err(RunStoreError::FileLockTimeout {
                        path: lock_file_path.to_owned(),
                        timeout_secs: LOCK_TIMEOUT.as_secs(),
                    });
                }
                thread::sleep(LOCK_RETRY_INTERVAL);
            }
            Err(TryLockError::Error(error)) => {
                return Err(RunStoreError::FileLock {
                    path: lock_file_path.to_owned(),
                    error,
                });
            }
        }
    }
}
