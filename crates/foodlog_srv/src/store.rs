//! Write-through json file collections.
//!
//! ### Implementation
//!
//! - Every collection file is a pretty-printed json array, loaded fully
//!   into memory at startup. A missing file is an empty collection.
//! - Readers clone an `Arc` snapshot of the current items and never wait
//!   on a writer for longer than that clone.
//! - Writers take the collection's write lock through [Collection::lock],
//!   mutate a private working copy, rewrite the whole file, and only then
//!   publish the working copy as the new snapshot via [Txn::commit].
//!   Readers can therefore never observe a mutation that did not make it
//!   to disk.
//! - The file rewrite goes through a tempfile in the same directory that
//!   is persisted over the target, so a crash mid-write leaves the old
//!   file in place.
//! - When more than one collection must change together, lock them in the
//!   fixed order food types, then food data.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::*;

/// food entry collection file name
pub const FOOD_DATA_FILE: &str = "foodData.json";

/// category collection file name
pub const FOOD_TYPE_FILE: &str = "foodTypes.json";

/// group collection file name
pub const GROUP_FILE: &str = "groups.json";

/// user collection file name
pub const USER_FILE: &str = "users.json";

/// A record addressable by a unique key.
pub trait Keyed {
    /// The unique key of this record.
    fn key(&self) -> &str;

    /// Does this record answer to `key`?
    fn key_matches(&self, key: &str) -> bool {
        self.key() == key
    }
}

impl Keyed for CategoryStat {
    fn key(&self) -> &str {
        &self.name
    }

    // tags arrive in whatever case the client typed
    fn key_matches(&self, key: &str) -> bool {
        self.name.to_lowercase() == key.to_lowercase()
    }
}

impl Keyed for UserCredential {
    fn key(&self) -> &str {
        &self.name
    }
}

/// A single json file backed collection.
pub struct Collection<T> {
    path: PathBuf,

    // Using a separate write lock instead of a RwLock, because
    // we still want to allow reads while a write is being persisted.
    write_lock: Mutex<()>,

    readable: Mutex<Arc<Vec<T>>>,
}

impl<T> Collection<T>
where
    T: Clone + serde::Serialize + serde::de::DeserializeOwned,
{
    /// Load a collection from `path`, treating a missing file as empty.
    pub fn load(path: PathBuf) -> std::io::Result<Self> {
        let items: Vec<T> = match std::fs::read(&path) {
            Ok(content) => {
                if content.iter().all(u8::is_ascii_whitespace) {
                    Vec::new()
                } else {
                    let items: Option<Vec<T>> =
                        serde_json::from_slice(&content).map_err(|err| {
                            std::io::Error::other(format!(
                                "InvalidCollectionFile {}: {err}",
                                path.display(),
                            ))
                        })?;
                    items.unwrap_or_default()
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        tracing::debug!(path = %path.display(), count = items.len(), "Loaded collection");

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            readable: Mutex::new(Arc::new(items)),
        })
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A snapshot of every item.
    pub fn all(&self) -> Arc<Vec<T>> {
        self.readable.lock().unwrap().clone()
    }

    /// Begin a serialized read-modify-write against this collection.
    ///
    /// Blocks until any other open [Txn] on this collection is dropped.
    pub fn lock(&self) -> Txn<'_, T> {
        let guard = self.write_lock.lock().unwrap();

        // nobody else can publish while we hold the write lock,
        // so this is the state our working copy derives from
        let orig = self.all();
        let working = orig.as_ref().clone();

        Txn {
            coll: self,
            _guard: guard,
            orig,
            working,
        }
    }
}

impl<T> Collection<T>
where
    T: Keyed + Clone + serde::Serialize + serde::de::DeserializeOwned,
{
    /// Get a copy of the item matching `key`.
    pub fn get(&self, key: &str) -> Option<T> {
        self.all().iter().find(|t| t.key_matches(key)).cloned()
    }
}

/// An exclusive write transaction against a [Collection].
///
/// Dropping a Txn without calling [Txn::commit] discards the working copy.
/// If [Txn::persist] already succeeded, call [Txn::restore] first so the
/// file matches memory again.
pub struct Txn<'lt, T> {
    coll: &'lt Collection<T>,
    _guard: MutexGuard<'lt, ()>,
    orig: Arc<Vec<T>>,
    working: Vec<T>,
}

impl<T> Txn<'_, T>
where
    T: Clone + serde::Serialize + serde::de::DeserializeOwned,
{
    /// The working copy.
    pub fn items(&self) -> &[T] {
        &self.working
    }

    /// Append an item to the working copy.
    pub fn push(&mut self, item: T) {
        self.working.push(item);
    }

    /// Rewrite the backing file with the working copy.
    pub fn persist(&self) -> std::io::Result<()> {
        write_collection(&self.coll.path, &self.working)
    }

    /// Rewrite the backing file with the state this txn started from.
    pub fn restore(&self) -> std::io::Result<()> {
        write_collection(&self.coll.path, &self.orig)
    }

    /// Publish the working copy to readers and release the write lock.
    pub fn commit(self) {
        let Self { coll, working, .. } = self;
        *coll.readable.lock().unwrap() = Arc::new(working);
    }
}

impl<T> Txn<'_, T>
where
    T: Keyed + Clone + serde::Serialize + serde::de::DeserializeOwned,
{
    /// Get the working copy item matching `key`.
    pub fn get(&self, key: &str) -> Option<&T> {
        self.working.iter().find(|t| t.key_matches(key))
    }

    /// Get the working copy item matching `key` for mutation.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        self.working.iter_mut().find(|t| t.key_matches(key))
    }

    /// Replace the item with the same key, or append it if there is none.
    /// Returns `true` if the item was appended.
    pub fn upsert(&mut self, item: T) -> bool {
        match self.working.iter_mut().find(|t| t.key_matches(item.key())) {
            Some(existing) => {
                *existing = item;
                false
            }
            None => {
                self.working.push(item);
                true
            }
        }
    }
}

fn write_collection<T: serde::Serialize>(
    path: &Path,
    items: &[T],
) -> std::io::Result<()> {
    use std::io::Write;

    let content = serde_json::to_vec_pretty(items)?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&content)?;
    tmp.as_file().sync_data()?;
    tmp.persist(path).map_err(|err| err.error)?;

    Ok(())
}

/// All collections backing the server.
pub struct Store {
    /// submitted food entries
    pub food_data: Collection<FoodEntry>,

    /// per-category aggregates
    pub food_types: Collection<CategoryStat>,

    /// read-only group records
    pub groups: Collection<Group>,

    /// stored credentials
    pub users: Collection<UserCredential>,
}

impl Store {
    /// Load every collection from `data_dir`, creating the directory
    /// if needed.
    pub fn load(data_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        Ok(Self {
            food_data: Collection::load(data_dir.join(FOOD_DATA_FILE))?,
            food_types: Collection::load(data_dir.join(FOOD_TYPE_FILE))?,
            groups: Collection::load(data_dir.join(GROUP_FILE))?,
            users: Collection::load(data_dir.join(USER_FILE))?,
        })
    }
}
