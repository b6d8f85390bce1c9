//! Memory-mapped storage for a single register block
//!
//! A store maps a small file holding exactly one [`RegisterBlock`]. Opening a
//! store never fails because of stale contents: a missing file is created
//! with the block's initial bytes, a file of the wrong size (left behind by
//! another version) is truncated or extended to the expected size.
//!
//! There is no locking on the region. One process writes, readers copy the
//! whole block out on every [`read`](RegisterStore::read); a reader racing a
//! write may see a mix of old and new fields, which is acceptable at the
//! write rates the servers use.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use memmap2::{Mmap, MmapMut};
use tracing::{debug, info};
use zerocopy::{FromZeros, IntoBytes};

use crate::error::RegisterError;
use crate::layout::RegisterBlock;

/// How a store maps its backing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Writable shared mapping (servers)
    ReadWrite,
    /// Read-only shared mapping (clients)
    ReadOnly,
}

enum Mapping {
    Writable(MmapMut),
    ReadOnly(Mmap),
}

impl Mapping {
    fn bytes(&self) -> &[u8] {
        match self {
            Mapping::Writable(map) => map,
            Mapping::ReadOnly(map) => map,
        }
    }
}

/// A register block living in a memory-mapped file
pub struct RegisterStore<T: RegisterBlock> {
    path: PathBuf,
    file: File,
    map: Mapping,
    _block: PhantomData<T>,
}

impl<T: RegisterBlock> RegisterStore<T> {
    /// Open (creating if needed) the block at `path` with a writable mapping
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegisterError> {
        Self::open_with(path, Access::ReadWrite)
    }

    /// Open (creating if needed) the block at `path` with a read-only mapping
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, RegisterError> {
        Self::open_with(path, Access::ReadOnly)
    }

    pub fn open_with(path: impl AsRef<Path>, access: Access) -> Result<Self, RegisterError> {
        let path = path.as_ref();
        let file = prepare_file::<T>(path)?;

        // SAFETY: the file is sized to exactly T::SIZE above and is only ever
        // resized by another store opening it, which keeps the same size.
        // Concurrent writers are other processes; every access copies the
        // whole block out, never handing out references into the mapping.
        let map = unsafe {
            match access {
                Access::ReadWrite => Mapping::Writable(
                    MmapMut::map_mut(&file).map_err(|e| RegisterError::io(path, e))?,
                ),
                Access::ReadOnly => {
                    Mapping::ReadOnly(Mmap::map(&file).map_err(|e| RegisterError::io(path, e))?)
                }
            }
        };

        let actual = map.bytes().len();
        if actual < T::SIZE {
            return Err(RegisterError::SizeMismatch {
                path: path.to_path_buf(),
                expected: T::SIZE,
                actual,
            });
        }

        debug!("Mapped {} ({} bytes, {:?})", path.display(), T::SIZE, access);
        Ok(Self {
            path: path.to_path_buf(),
            file,
            map,
            _block: PhantomData,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this store can [`write`](Self::write)
    pub fn is_writable(&self) -> bool {
        matches!(self.map, Mapping::Writable(_))
    }

    /// Copy the whole block out of the mapping
    pub fn read(&self) -> T {
        let mut block = T::new_zeroed();
        block
            .as_mut_bytes()
            .copy_from_slice(&self.map.bytes()[..T::SIZE]);
        block
    }

    /// Copy the whole block into the mapping
    pub fn write(&mut self, block: &T) -> Result<(), RegisterError> {
        match &mut self.map {
            Mapping::Writable(map) => {
                map[..T::SIZE].copy_from_slice(block.as_bytes());
                Ok(())
            }
            Mapping::ReadOnly(_) => Err(RegisterError::ReadOnly(self.path.clone())),
        }
    }

    /// Read-modify-write the block
    pub fn update<F>(&mut self, f: F) -> Result<T, RegisterError>
    where
        F: FnOnce(&mut T),
    {
        let mut block = self.read();
        f(&mut block);
        self.write(&block)?;
        Ok(block)
    }

    /// Bump the backing file's modification time
    ///
    /// Readers that poll the modification time to detect new frames would
    /// otherwise miss writes landing within the timestamp resolution.
    pub fn touch(&self) -> Result<(), RegisterError> {
        self.file
            .set_modified(SystemTime::now())
            .map_err(|e| RegisterError::io(&self.path, e))
    }

    /// Modification time of the backing file
    pub fn modified(&self) -> Result<SystemTime, RegisterError> {
        self.file
            .metadata()
            .and_then(|m| m.modified())
            .map_err(|e| RegisterError::io(&self.path, e))
    }
}

/// Open the backing file, creating or resizing it as needed
fn prepare_file<T: RegisterBlock>(path: &Path) -> Result<File, RegisterError> {
    loop {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => {
                let len = file
                    .metadata()
                    .map_err(|e| RegisterError::io(path, e))?
                    .len();
                if len != T::SIZE as u64 {
                    debug!(
                        "Resizing {} from {} to {} bytes",
                        path.display(),
                        len,
                        T::SIZE
                    );
                    file.set_len(T::SIZE as u64)
                        .map_err(|e| RegisterError::io(path, e))?;
                }
                return Ok(file);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                match OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .open(path)
                {
                    Ok(mut file) => {
                        file.write_all(T::initial().as_bytes())
                            .map_err(|e| RegisterError::io(path, e))?;
                        info!("Created register file {}", path.display());
                        return Ok(file);
                    }
                    // Lost a creation race with another process; open theirs
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                    Err(e) => return Err(RegisterError::io(path, e)),
                }
            }
            Err(e) => return Err(RegisterError::io(path, e)),
        }
    }
}
