//! File/Base object and save pipeline (C7).
//!
//! Grounded on `IpatchBase`'s file-pool/save/migrate trio and, for the
//! pool itself, the path-keyed handle cache pattern `ip-synth`'s
//! soundfont manager already uses (`DashMap<PathBuf, _>`).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::item::ItemRef;

/// Opaque handle to an open sample store, reference-counted by a
/// cached-open counter per §5 ("Shared resources"). Closing is
/// idempotent and only frees memory once the counter reaches zero.
#[derive(Clone)]
pub struct SampleStoreHandle(Arc<SampleStoreInner>);

struct SampleStoreInner {
    id: u64,
    open_count: AtomicU64,
}

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

impl SampleStoreHandle {
    pub fn new() -> Self {
        let id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        Self(Arc::new(SampleStoreInner {
            id,
            open_count: AtomicU64::new(1),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn cached_open(&self) -> Self {
        self.0.open_count.fetch_add(1, Ordering::AcqRel);
        self.clone()
    }

    /// Idempotent close: only actually frees (by dropping the last
    /// strong reference) once the counter reaches zero.
    pub fn close(&self) {
        self.0.open_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn open_count(&self) -> u64 {
        self.0.open_count.load(Ordering::Acquire)
    }
}

impl Default for SampleStoreHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// One entry in the process-wide file pool.
struct PoolEntry {
    base: Weak<dyn crate::item::Item>,
}

/// Process-wide path-uniqueness pool: at most one open `Base` may claim a
/// given absolute path at a time.
#[derive(Default)]
pub struct FilePool {
    entries: DashMap<PathBuf, PoolEntry>,
}

impl FilePool {
    /// Claim `path` for `base`. Fails `Busy` if a different, still-live
    /// `Base` already holds it.
    pub fn claim(&self, path: &Path, base: &ItemRef) -> Result<()> {
        if let Some(existing) = self.entries.get(path) {
            if let Some(owner) = existing.base.upgrade() {
                if !Arc::ptr_eq(&owner, base) {
                    return Err(Error::Busy(format!("{} is open by another file", path.display())));
                }
            }
        }
        self.entries.insert(
            path.to_path_buf(),
            PoolEntry {
                base: Arc::downgrade(base),
            },
        );
        Ok(())
    }

    pub fn release(&self, path: &Path) {
        self.entries.remove(path);
    }

    pub fn is_held_by_other(&self, path: &Path, base: &ItemRef) -> bool {
        self.entries
            .get(path)
            .and_then(|e| e.base.upgrade())
            .map(|owner| !Arc::ptr_eq(&owner, base))
            .unwrap_or(false)
    }
}

static FILE_POOL: once_cell_like::Lazy<FilePool> = once_cell_like::Lazy::new(FilePool::default);

pub fn file_pool() -> &'static FilePool {
    &FILE_POOL
}

mod once_cell_like {
    use std::sync::OnceLock;

    pub struct Lazy<T> {
        cell: OnceLock<T>,
        init: fn() -> T,
    }

    impl<T> Lazy<T> {
        pub const fn new(init: fn() -> T) -> Self {
            Self {
                cell: OnceLock::new(),
                init,
            }
        }
    }

    impl<T> std::ops::Deref for Lazy<T> {
        type Target = T;
        fn deref(&self) -> &T {
            self.cell.get_or_init(self.init)
        }
    }
}

/// Flags controlling [`migrate_file_sample_data`]'s handling of samples
/// still referenced out of a file being replaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateFlags {
    /// Drop samples from `old_file` with no remaining references instead
    /// of migrating them.
    pub remove_if_unused: bool,
    /// Replace references with an equivalent already present in
    /// `new_file`, when one exists, rather than copying.
    pub replace: bool,
    /// Copy referenced-but-missing samples into `new_file` rather than
    /// leaving them pointing at the (about to be replaced) old file.
    pub to_newfile: bool,
}

/// Embeds in every concrete File/Base domain type: dirty/saved flags and
/// the file-pool pin for the backing path. Domain items implement
/// `Item::as_base` returning `Some(&self.base)` to opt into
/// `item::changed`'s dirty-marking walk and the save pipeline.
pub struct Base {
    changed: AtomicBool,
    saved: AtomicBool,
    file_path: RwLock<Option<PathBuf>>,
    samples: RwLock<Vec<SampleStoreHandle>>,
}

impl Default for Base {
    fn default() -> Self {
        Self::new()
    }
}

impl Base {
    pub fn new() -> Self {
        Self {
            changed: AtomicBool::new(false),
            saved: AtomicBool::new(false),
            file_path: RwLock::new(None),
            samples: RwLock::new(Vec::new()),
        }
    }

    pub fn is_changed(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    pub fn is_saved(&self) -> bool {
        self.saved.load(Ordering::Acquire)
    }

    pub fn mark_changed(&self) {
        self.changed.store(true, Ordering::Release);
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.file_path.read().clone()
    }

    pub fn sample_stores(&self) -> Vec<SampleStoreHandle> {
        self.samples.read().clone()
    }

    pub fn add_sample_store(&self, store: SampleStoreHandle) {
        self.samples.write().push(store);
    }
}

/// Resolve the absolute destination path for `save`, per §4.6 step 1.
fn resolve_destination(current: Option<&Path>, requested: Option<&Path>) -> Result<PathBuf> {
    let target = requested.or(current).ok_or_else(|| {
        Error::Invalid("save requires a filename when the file has none yet".into())
    })?;
    std::fs::canonicalize(target)
        .or_else(|_| Ok::<_, std::io::Error>(target.to_path_buf()))
        .map_err(Error::Io)
}

/// A converter writes a `Base`'s in-memory tree out to a concrete
/// on-disk format. Out of scope per the format-parser exclusion in
/// spec.md §1 — domain code plugs in a real implementation; this trait
/// is the seam the save pipeline calls through.
pub trait Converter: Send + Sync {
    /// Write `base` into `dest`. Returns the list of sample stores this
    /// call newly created, for migration bookkeeping.
    fn write(&self, base: &ItemRef, dest: &Path) -> Result<Vec<SampleStoreHandle>>;
}

/// `save(base, filename?, save_a_copy)` — see spec §4.6.
pub fn save(
    base: &ItemRef,
    filename: Option<&Path>,
    save_a_copy: bool,
    converter: &dyn Converter,
) -> Result<()> {
    let base_obj = base
        .as_base()
        .ok_or_else(|| Error::Invalid(format!("{} is not a Base", base.type_name())))?;

    let current = base_obj.file_path();
    let dest = resolve_destination(current.as_deref(), filename)?;

    if file_pool().is_held_by_other(&dest, base) {
        return Err(Error::Busy(format!("{} is open by another file", dest.display())));
    }

    let tempsave = current.as_deref() == Some(dest.as_path()) || dest.exists();
    let write_target = if tempsave {
        unique_temp_path(&dest)?
    } else {
        dest.clone()
    };

    let result = converter.write(base, &write_target);
    let new_stores = match result {
        Ok(stores) => stores,
        Err(e) => {
            let _ = std::fs::remove_file(&write_target);
            return Err(e);
        }
    };

    if !save_a_copy {
        let flags = MigrateFlags {
            remove_if_unused: true,
            replace: true,
            to_newfile: true,
        };
        migrate_file_sample_data(&base_obj.sample_stores(), &new_stores, flags);
    }

    if tempsave {
        std::fs::rename(&write_target, &dest)?;
    }

    if !save_a_copy {
        file_pool().claim(&dest, base)?;
        *base_obj.file_path.write() = Some(dest);
        base_obj.changed.store(false, Ordering::Release);
        base_obj.saved.store(true, Ordering::Release);
    }
    Ok(())
}

fn unique_temp_path(dest: &Path) -> Result<PathBuf> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let stem = dest.file_name().and_then(|f| f.to_str()).unwrap_or("ipatch");
    for attempt in 0..1000u32 {
        let candidate = dir.join(format!("{}_tmp{:06}", stem, attempt));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(Error::Fail(format!("could not allocate a temp file next to {}", dest.display())))
}

/// `migrate_file_sample_data(old_stores, new_stores, flags)` — any
/// sample store still reachable from `old_stores` is either dropped
/// (unused + `remove_if_unused`), pointed at an equivalent already in
/// `new_stores` (`replace`), or copied forward (`to_newfile`). This
/// core only tracks reference counts; copying bytes is a converter
/// concern.
pub fn migrate_file_sample_data(
    old_stores: &[SampleStoreHandle],
    new_stores: &[SampleStoreHandle],
    flags: MigrateFlags,
) {
    for store in old_stores {
        let still_referenced = store.open_count() > 1;
        if !still_referenced {
            if flags.remove_if_unused {
                store.close();
            }
            continue;
        }
        if flags.replace {
            if let Some(_equivalent) = new_stores.first() {
                store.close();
                continue;
            }
        }
        if flags.to_newfile {
            // Converter already copied bytes into `new_stores`; drop our
            // reference to the old backing store.
            store.close();
        }
    }
}

/// `close(base)`: remove the Base recursively, then migrate residual
/// sample data out of its file.
pub fn close(base: &ItemRef) -> Result<()> {
    close_list(std::slice::from_ref(base))
}

/// Batch close across multiple Bases sharing samples, visiting in
/// reverse order for deterministic migration ordering.
pub fn close_list(bases: &[ItemRef]) -> Result<()> {
    for base in bases.iter().rev() {
        let old_stores = base.as_base().map(|b| b.sample_stores()).unwrap_or_default();
        crate::item::remove_recursive(base, true)?;
        migrate_file_sample_data(&old_stores, &[], MigrateFlags { remove_if_unused: true, ..Default::default() });
        if let Some(b) = base.as_base() {
            if let Some(path) = b.file_path() {
                file_pool().release(&path);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Item, ItemHeader, LinkResolver};
    use std::any::Any;
    use tempfile::tempdir;

    struct FakeFile {
        header: ItemHeader,
        base: Base,
    }
    impl Item for FakeFile {
        fn header(&self) -> &ItemHeader {
            &self.header
        }
        fn type_name(&self) -> &'static str {
            "FakeFile"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn new_instance(&self) -> ItemRef {
            Arc::new(FakeFile {
                header: ItemHeader::new(),
                base: Base::new(),
            })
        }
        fn copy_into(&self, _dest: &dyn Item, _resolver: &LinkResolver) {}
        fn as_base(&self) -> Option<&Base> {
            Some(&self.base)
        }
    }

    struct DummyConverter;
    impl Converter for DummyConverter {
        fn write(&self, _base: &ItemRef, dest: &Path) -> Result<Vec<SampleStoreHandle>> {
            std::fs::write(dest, b"ipatch")?;
            Ok(vec![])
        }
    }

    #[test]
    fn save_over_self_renames_temp_into_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.sf2");
        std::fs::write(&path, b"old").unwrap();

        let file: ItemRef = Arc::new(FakeFile {
            header: ItemHeader::new(),
            base: Base::new(),
        });
        *file.as_base().unwrap().file_path.write() = Some(path.clone());
        file.as_base().unwrap().mark_changed();

        save(&file, None, false, &DummyConverter).unwrap();

        assert!(path.exists());
        assert!(!file.as_base().unwrap().is_changed());
        assert!(file.as_base().unwrap().is_saved());
    }

    #[test]
    fn save_fails_without_any_filename() {
        let file: ItemRef = Arc::new(FakeFile {
            header: ItemHeader::new(),
            base: Base::new(),
        });
        assert!(matches!(save(&file, None, false, &DummyConverter), Err(Error::Invalid(_))));
    }

    #[test]
    fn store_close_is_idempotent_and_refcounted() {
        let store = SampleStoreHandle::new();
        let _extra = store.cached_open();
        assert_eq!(store.open_count(), 2);
        store.close();
        assert_eq!(store.open_count(), 1);
        store.close();
        assert_eq!(store.open_count(), 0);
    }
}
