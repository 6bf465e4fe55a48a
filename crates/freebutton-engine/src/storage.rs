//! Flash partitions
//!
//! A [`FlashPartition`] hands out read-only [`MappedFile`]s over byte ranges and
//! accepts programming writes. [`MemoryPartition`] keeps its bytes at a fixed
//! address, so a container pre-relocated for that address runs in place; a
//! mapping holds a read lock on the partition until every unit using it is gone.
//! [`FilePartition`] reads ranges into private buffers.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use freebutton_vm::ResidentBytes;
use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{Mutex, RawRwLock, RwLock};

use crate::error::StorageError;

/// A region of flash holding uploaded containers
pub trait FlashPartition: Send + Sync {
    /// Partition label, e.g. `js_user`
    fn label(&self) -> &str;

    /// Partition size in bytes
    fn size(&self) -> usize;

    /// Map `len` bytes starting at `offset`
    fn map(&self, offset: usize, len: usize) -> Result<MappedFile, StorageError>;

    /// Program `bytes` at `offset`
    fn write(&self, offset: usize, bytes: &[u8]) -> Result<(), StorageError>;

    /// Address a mapping of `offset` resides at, if mappings are address-stable
    fn resident_addr(&self, offset: usize) -> Option<u64>;

    /// Check that `offset..offset + len` lies inside the partition
    fn check_range(&self, offset: usize, len: usize) -> Result<Range<usize>, StorageError> {
        offset
            .checked_add(len)
            .filter(|&end| end <= self.size())
            .map(|end| offset..end)
            .ok_or_else(|| StorageError::OutOfRange {
                label: self.label().to_string(),
                offset,
                len,
                size: self.size(),
            })
    }
}

/// Read-only view of stored bytes
pub struct MappedFile {
    partition: String,
    offset: usize,
    view: Arc<dyn ResidentBytes>,
}

impl fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedFile")
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("len", &self.len())
            .field("addr", &format_args!("{:#x}", self.addr()))
            .finish()
    }
}

impl MappedFile {
    fn new(partition: &str, offset: usize, view: Arc<dyn ResidentBytes>) -> Self {
        Self {
            partition: partition.to_string(),
            offset,
            view,
        }
    }

    /// Mapped bytes
    pub fn bytes(&self) -> &[u8] {
        self.view.bytes()
    }

    /// Number of mapped bytes
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    /// Whether nothing is mapped
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Address of the first mapped byte
    pub fn addr(&self) -> u64 {
        self.bytes().as_ptr() as u64
    }

    /// Partition the bytes come from
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Offset within the partition
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Hand the mapping to an executable unit
    pub fn into_resident(self) -> Arc<dyn ResidentBytes> {
        self.view
    }
}

/// A window into a [`MemoryPartition`] that keeps it read-locked
struct FlashWindow {
    guard: ArcRwLockReadGuard<RawRwLock, Box<[u8]>>,
    range: Range<usize>,
}

impl fmt::Debug for FlashWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashWindow").field("range", &self.range).finish()
    }
}

impl ResidentBytes for FlashWindow {
    fn bytes(&self) -> &[u8] {
        &self.guard[self.range.clone()]
    }
}

/// Heap-backed partition with a fixed address
pub struct MemoryPartition {
    label: String,
    flash: Arc<RwLock<Box<[u8]>>>,
    size: usize,
}

impl MemoryPartition {
    /// Erased partition (all bytes `0xFF`)
    pub fn new(label: impl Into<String>, size: usize) -> Self {
        Self {
            label: label.into(),
            flash: Arc::new(RwLock::new(vec![0xFF; size].into_boxed_slice())),
            size,
        }
    }

    /// Whether any mapping currently holds the partition
    pub fn is_mapped(&self) -> bool {
        self.flash.is_locked()
    }
}

impl FlashPartition for MemoryPartition {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> usize {
        self.size
    }

    fn map(&self, offset: usize, len: usize) -> Result<MappedFile, StorageError> {
        let range = self.check_range(offset, len)?;
        let window = FlashWindow {
            guard: self.flash.read_arc(),
            range,
        };
        Ok(MappedFile::new(&self.label, offset, Arc::new(window)))
    }

    fn write(&self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        let range = self.check_range(offset, bytes.len())?;
        let mut flash = self
            .flash
            .try_write()
            .ok_or_else(|| StorageError::Busy(self.label.clone()))?;
        flash[range].copy_from_slice(bytes);
        Ok(())
    }

    fn resident_addr(&self, offset: usize) -> Option<u64> {
        if offset > self.size {
            return None;
        }
        // The boxed slice is never reallocated
        let base = self.flash.read().as_ptr() as u64;
        base.checked_add(offset as u64)
    }
}

#[derive(Debug)]
struct HeapWindow(Box<[u8]>);

impl ResidentBytes for HeapWindow {
    fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Partition backed by a file; mappings are private copies
pub struct FilePartition {
    label: String,
    path: PathBuf,
    file: Mutex<File>,
    size: usize,
}

impl FilePartition {
    /// Create (or truncate) an erased partition file of `size` bytes
    pub fn create(label: impl Into<String>, path: impl AsRef<Path>, size: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&vec![0xFF; size])?;
        file.flush()?;
        Ok(Self {
            label: label.into(),
            path,
            file: Mutex::new(file),
            size,
        })
    }

    /// Open an existing partition file
    pub fn open(label: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = usize::try_from(file.metadata()?.len()).unwrap_or(usize::MAX);
        Ok(Self {
            label: label.into(),
            path,
            file: Mutex::new(file),
            size,
        })
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FlashPartition for FilePartition {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> usize {
        self.size
    }

    fn map(&self, offset: usize, len: usize) -> Result<MappedFile, StorageError> {
        self.check_range(offset, len)?;
        let mut buf = vec![0u8; len];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset as u64))?;
            file.read_exact(&mut buf)?;
        }
        let window = HeapWindow(buf.into_boxed_slice());
        Ok(MappedFile::new(&self.label, offset, Arc::new(window)))
    }

    fn write(&self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        self.check_range(offset, bytes.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(())
    }

    fn resident_addr(&self, _offset: usize) -> Option<u64> {
        None
    }
}
