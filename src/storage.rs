use crate::error::FlightSearchError;
use crate::model::{FlightResult, SearchQuery, SearchResultSet};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const FILE_PREFIX: &str = "search_";
const FILE_SUFFIX: &str = ".json";

/// On-disk envelope for one search result set
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    timestamp: DateTime<Utc>,
    results: SearchResultSet,
}

/// Just enough of an entry to decide whether it has expired
#[derive(Debug, Deserialize)]
struct CacheEntryHeader {
    timestamp: DateTime<Utc>,
}

/// Temporary file-per-search storage for flight search results.
///
/// Each result set lives in `search_<id>.json` under the storage directory.
/// Entries are write-once and removed by [`FlightSearchStorage::cleanup`]
/// once they are older than the configured age.
#[derive(Debug)]
pub struct FlightSearchStorage {
    temp_dir: PathBuf,
}

impl FlightSearchStorage {
    /// Opens the storage directory, creating it if needed.
    pub fn new(temp_dir: impl Into<PathBuf>) -> Result<Self, FlightSearchError> {
        let temp_dir = temp_dir.into();
        fs::create_dir_all(&temp_dir).map_err(|e| {
            FlightSearchError::Storage(format!(
                "cannot create storage directory {}: {}",
                temp_dir.display(),
                e
            ))
        })?;
        Ok(Self { temp_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn path_for(&self, search_id: &str) -> PathBuf {
        self.temp_dir
            .join(format!("{}{}{}", FILE_PREFIX, search_id, FILE_SUFFIX))
    }

    /// Stores a new result set under a fresh search id and returns the id.
    #[instrument(skip(self, query, flights), fields(flights = flights.len()))]
    pub fn save(
        &self,
        query: &SearchQuery,
        currency: &str,
        flights: &[FlightResult],
    ) -> Result<String, FlightSearchError> {
        let search_id = Uuid::new_v4().hyphenated().to_string();
        let timestamp = Utc::now();
        let entry = CacheEntry {
            timestamp,
            results: SearchResultSet {
                search_id: search_id.clone(),
                created_at: timestamp,
                query: query.clone(),
                currency: currency.to_string(),
                flights: flights.to_vec(),
            },
        };
        let bytes = serde_json::to_vec(&entry)
            .map_err(|e| FlightSearchError::Storage(format!("cannot serialize results: {}", e)))?;

        // Write beside the final name and rename so readers never see a partial entry
        let path = self.path_for(&search_id);
        let tmp_path = self
            .temp_dir
            .join(format!(".{}{}{}.tmp", FILE_PREFIX, search_id, FILE_SUFFIX));
        if let Err(e) = fs::write(&tmp_path, &bytes).and_then(|_| fs::rename(&tmp_path, &path)) {
            let _ = fs::remove_file(&tmp_path);
            error!("Failed to write search results to {}: {}", path.display(), e);
            return Err(FlightSearchError::Storage(format!(
                "cannot write {}: {}",
                path.display(),
                e
            )));
        }
        info!("Saved search {} to {}", search_id, path.display());
        Ok(search_id)
    }

    /// Loads the result set stored under `search_id`.
    #[instrument(skip(self))]
    pub fn load(&self, search_id: &str) -> Result<SearchResultSet, FlightSearchError> {
        // Anything that is not one of our ids cannot name an entry
        let search_id = match Uuid::parse_str(search_id.trim()) {
            Ok(id) => id.hyphenated().to_string(),
            Err(_) => return Err(FlightSearchError::NotFound(search_id.to_string())),
        };
        let path = self.path_for(&search_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No cache entry at {}", path.display());
                return Err(FlightSearchError::NotFound(search_id));
            }
            Err(e) => {
                return Err(corrupt(&search_id, format!("unreadable file: {}", e)));
            }
        };
        let entry: CacheEntry = serde_json::from_slice(&bytes)
            .map_err(|e| corrupt(&search_id, format!("invalid JSON: {}", e)))?;
        if entry.results.search_id != search_id {
            return Err(corrupt(
                &search_id,
                format!("entry belongs to search {}", entry.results.search_id),
            ));
        }
        Ok(entry.results)
    }

    /// Deletes every entry whose age is at least `max_age` and returns how many entries were removed.
    ///
    /// Leftover temp files and unreadable entries expire by modification time.
    /// Files that cannot be removed are logged and skipped.
    #[instrument(skip(self))]
    pub fn cleanup(&self, max_age: Duration) -> Result<usize, FlightSearchError> {
        let now = Utc::now();
        let entries = fs::read_dir(&self.temp_dir).map_err(|e| {
            FlightSearchError::Storage(format!(
                "cannot list {}: {}",
                self.temp_dir.display(),
                e
            ))
        })?;
        let mut removed = 0;
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("Skipping unreadable directory entry: {}", e);
                    continue;
                }
            };
            let is_entry = is_entry_file(&path);
            let expired = if is_entry {
                match read_timestamp(&path) {
                    Ok(timestamp) => now.signed_duration_since(timestamp) >= max_age,
                    Err(reason) => {
                        warn!("Unreadable cache entry {}: {}", path.display(), reason);
                        modified_before(&path, now, max_age)
                    }
                }
            } else if is_temp_file(&path) {
                modified_before(&path, now, max_age)
            } else {
                continue;
            };
            if !expired {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed expired cache file {}", path.display());
                    if is_entry {
                        removed += 1;
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        if removed > 0 {
            info!("Removed {} expired search result(s)", removed);
        }
        Ok(removed)
    }
}

fn corrupt(search_id: &str, reason: String) -> FlightSearchError {
    error!("Corrupt cache entry for search {}: {}", search_id, reason);
    FlightSearchError::CorruptData {
        search_id: search_id.to_string(),
        reason,
    }
}

fn is_entry_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX))
}

/// Hidden temp file left behind by an interrupted save
fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix('.'))
        .and_then(|name| name.strip_suffix(".tmp"))
        .is_some_and(|name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX))
}

fn modified_before(path: &Path, now: DateTime<Utc>, max_age: Duration) -> bool {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => now.signed_duration_since(DateTime::<Utc>::from(modified)) >= max_age,
        Err(e) => {
            warn!("Skipping {}: {}", path.display(), e);
            false
        }
    }
}

fn read_timestamp(path: &Path) -> Result<DateTime<Utc>, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    let header: CacheEntryHeader = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
    Ok(header.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{flight, query};
    use tempfile::TempDir;

    fn storage() -> (TempDir, FlightSearchStorage) {
        let dir = TempDir::new().unwrap();
        let storage = FlightSearchStorage::new(dir.path().join("searches")).unwrap();
        (dir, storage)
    }

    fn write_entry(storage: &FlightSearchStorage, search_id: &str, timestamp: DateTime<Utc>) {
        let entry = CacheEntry {
            timestamp,
            results: SearchResultSet {
                search_id: search_id.to_string(),
                created_at: timestamp,
                query: query(),
                currency: "USD".to_string(),
                flights: vec![flight(100.0, 0, "Iberia", 600)],
            },
        };
        fs::write(
            storage.path_for(search_id),
            serde_json::to_vec(&entry).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let (_dir, storage) = storage();
        let flights = vec![
            flight(100.0, 0, "Iberia", 600),
            flight(80.5, 1, "American", 720),
        ];
        let search_id = storage.save(&query(), "USD", &flights).unwrap();

        let loaded = storage.load(&search_id).unwrap();
        assert_eq!(loaded.search_id, search_id);
        assert_eq!(loaded.query, query());
        assert_eq!(loaded.currency, "USD");
        assert_eq!(loaded.flights, flights);
        assert!(storage.path_for(&search_id).exists());
    }

    #[test]
    fn test_prices_survive_storage_exactly() {
        let (_dir, storage) = storage();
        let flights = vec![
            flight(1386.2213318130155, 0, "Iberia", 600),
            flight(0.1 + 0.2, 1, "American", 720),
            flight(123456.78901234567, 0, "Delta", 610),
        ];
        let search_id = storage.save(&query(), "USD", &flights).unwrap();
        let loaded = storage.load(&search_id).unwrap();
        for (stored, original) in loaded.flights.iter().zip(&flights) {
            assert_eq!(stored.price.to_bits(), original.price.to_bits());
        }
        assert_eq!(loaded.flights, flights);
    }

    #[test]
    fn test_each_save_gets_a_fresh_id() {
        let (_dir, storage) = storage();
        let a = storage.save(&query(), "USD", &[]).unwrap();
        let b = storage.save(&query(), "USD", &[]).unwrap();
        assert_ne!(a, b);
        assert!(storage.load(&a).unwrap().flights.is_empty());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let (_dir, storage) = storage();
        storage.save(&query(), "USD", &[]).unwrap();
        let names: Vec<String> = fs::read_dir(storage.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("search_"));
    }

    #[test]
    fn test_load_unknown_id_is_not_found() {
        let (_dir, storage) = storage();
        assert!(matches!(
            storage.load("nonexistent-id"),
            Err(FlightSearchError::NotFound(_))
        ));
        let unknown = Uuid::new_v4().to_string();
        assert!(matches!(
            storage.load(&unknown),
            Err(FlightSearchError::NotFound(_))
        ));
        assert!(matches!(
            storage.load("../../etc/passwd"),
            Err(FlightSearchError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_corrupt_entry_is_distinct_from_not_found() {
        let (_dir, storage) = storage();
        let search_id = Uuid::new_v4().to_string();
        fs::write(storage.path_for(&search_id), b"{\"timestamp\": 12").unwrap();
        assert!(matches!(
            storage.load(&search_id),
            Err(FlightSearchError::CorruptData { .. })
        ));
    }

    #[test]
    fn test_load_rejects_entry_for_another_search() {
        let (_dir, storage) = storage();
        let search_id = Uuid::new_v4().to_string();
        let other = Uuid::new_v4().to_string();
        write_entry(&storage, &other, Utc::now());
        fs::rename(storage.path_for(&other), storage.path_for(&search_id)).unwrap();
        assert!(matches!(
            storage.load(&search_id),
            Err(FlightSearchError::CorruptData { .. })
        ));
    }

    #[test]
    fn test_cleanup_zero_age_removes_everything() {
        let (_dir, storage) = storage();
        let ids: Vec<String> = (0..3)
            .map(|_| storage.save(&query(), "USD", &[]).unwrap())
            .collect();

        assert_eq!(storage.cleanup(Duration::zero()).unwrap(), 3);
        for id in ids {
            assert!(matches!(
                storage.load(&id),
                Err(FlightSearchError::NotFound(_))
            ));
        }
    }

    #[test]
    fn test_cleanup_keeps_fresh_entries() {
        let (_dir, storage) = storage();
        let old = Uuid::new_v4().to_string();
        write_entry(&storage, &old, Utc::now() - Duration::hours(25));
        let fresh = storage.save(&query(), "USD", &[]).unwrap();

        assert_eq!(storage.cleanup(Duration::hours(24)).unwrap(), 1);
        assert!(storage.load(&fresh).is_ok());
        assert!(matches!(
            storage.load(&old),
            Err(FlightSearchError::NotFound(_))
        ));
    }

    #[test]
    fn test_cleanup_keeps_fresh_bad_entries() {
        let (_dir, storage) = storage();
        let bad = Uuid::new_v4().to_string();
        fs::write(storage.path_for(&bad), b"garbage").unwrap();
        fs::write(storage.dir().join("notes.txt"), b"unrelated").unwrap();
        let old = Uuid::new_v4().to_string();
        write_entry(&storage, &old, Utc::now() - Duration::hours(48));

        assert_eq!(storage.cleanup(Duration::hours(24)).unwrap(), 1);
        assert!(storage.path_for(&bad).exists());
        assert!(storage.dir().join("notes.txt").exists());
    }

    #[test]
    fn test_cleanup_removes_leftover_temp_and_bad_files() {
        let (_dir, storage) = storage();
        let id = Uuid::new_v4().to_string();
        let tmp = storage
            .dir()
            .join(format!(".{}{}{}.tmp", FILE_PREFIX, id, FILE_SUFFIX));
        fs::write(&tmp, b"{\"timestamp\"").unwrap();
        let bad = Uuid::new_v4().to_string();
        fs::write(storage.path_for(&bad), b"garbage").unwrap();
        fs::write(storage.dir().join("notes.txt"), b"unrelated").unwrap();

        assert_eq!(storage.cleanup(Duration::hours(24)).unwrap(), 0);
        assert!(tmp.exists());

        // only the result entry counts
        assert_eq!(storage.cleanup(Duration::zero()).unwrap(), 1);
        assert!(!tmp.exists());
        assert!(!storage.path_for(&bad).exists());
        assert!(storage.dir().join("notes.txt").exists());
    }
}
