use super::DiskEngine;
use crate::block::BlockId;
use crate::options::DirSpace;

use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

const BLOCK_FILE_PREFIX: &str = "blockfile";

#[cfg(unix)]
fn write_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
  use std::os::unix::fs::FileExt;
  file.write_all_at(data, offset)
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
  use std::os::unix::fs::FileExt;
  file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, mut data: &[u8], mut offset: u64) -> io::Result<()> {
  use std::os::windows::fs::FileExt;
  while !data.is_empty() {
    let n = file.seek_write(data, offset)?;
    if n == 0 {
      return Err(io::ErrorKind::WriteZero.into());
    }
    data = &data[n..];
    offset += n as u64;
  }
  Ok(())
}

#[cfg(windows)]
fn read_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
  use std::os::windows::fs::FileExt;
  while !buf.is_empty() {
    let n = file.seek_read(buf, offset)?;
    if n == 0 {
      return Err(io::ErrorKind::UnexpectedEof.into());
    }
    let rest = buf;
    buf = &mut rest[n..];
    offset += n as u64;
  }
  Ok(())
}

/// One configured directory: a run of block files holding `total_blocks`
/// block slots.
struct CacheDir {
  path: PathBuf,
  files: Vec<File>,
  total_blocks: u32,
}

impl fmt::Debug for CacheDir {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheDir")
      .field("path", &self.path)
      .field("files", &self.files.len())
      .field("total_blocks", &self.total_blocks)
      .finish()
  }
}

/// A [`DiskEngine`] that keeps blocks in preallocated-size files.
///
/// Each directory's quota is split into block files of at most
/// `block_file_size` bytes named `blockfile_<n>`. Stale block files from an
/// earlier run are deleted on open; cached data does not survive a restart.
#[derive(Debug)]
pub struct FileDiskEngine {
  dirs: Vec<CacheDir>,
  block_size: u64,
  blocks_per_file: u32,
  quota: u64,
  used: AtomicU64,
  // Free slots per directory.
  free: Mutex<Vec<BTreeSet<u32>>>,
}

impl FileDiskEngine {
  /// Prepares every directory in `dirs`, creating it if needed.
  pub fn open(
    dirs: &[DirSpace],
    block_size: u64,
    block_file_size: u64,
    pre_allocate: bool,
  ) -> io::Result<Self> {
    if block_size == 0 || block_file_size < block_size {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "block file size must hold at least one block",
      ));
    }
    if dirs.len() > u8::MAX as usize + 1 {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "too many disk cache directories",
      ));
    }

    let blocks_per_file = u32::try_from(block_file_size / block_size).unwrap_or(u32::MAX);
    let mut cache_dirs = Vec::with_capacity(dirs.len());
    let mut free: Vec<BTreeSet<u32>> = Vec::with_capacity(dirs.len());
    let mut quota = 0;

    for dir in dirs {
      let total_blocks = u32::try_from(dir.quota_bytes / block_size).unwrap_or(u32::MAX);
      let cache_dir = Self::open_dir(&dir.path, total_blocks, blocks_per_file, block_size, pre_allocate)?;
      tracing::info!(
        path = %dir.path.display(),
        blocks = total_blocks,
        files = cache_dir.files.len(),
        "opened disk cache directory"
      );
      quota += total_blocks as u64 * block_size;
      free.push((0..total_blocks).collect());
      cache_dirs.push(cache_dir);
    }

    Ok(Self {
      dirs: cache_dirs,
      block_size,
      blocks_per_file,
      quota,
      used: AtomicU64::new(0),
      free: Mutex::new(free),
    })
  }

  fn open_dir(
    path: &Path,
    total_blocks: u32,
    blocks_per_file: u32,
    block_size: u64,
    pre_allocate: bool,
  ) -> io::Result<CacheDir> {
    fs::create_dir_all(path)?;
    for entry in fs::read_dir(path)? {
      let entry = entry?;
      if entry.file_type()?.is_file()
        && entry
          .file_name()
          .to_string_lossy()
          .starts_with(BLOCK_FILE_PREFIX)
      {
        fs::remove_file(entry.path())?;
      }
    }

    let mut files = Vec::new();
    let mut remaining = total_blocks;
    while remaining > 0 {
      let blocks = remaining.min(blocks_per_file);
      let file_path = path.join(format!("{}_{}", BLOCK_FILE_PREFIX, files.len()));
      let file = File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&file_path)?;
      if pre_allocate {
        file.set_len(blocks as u64 * block_size)?;
      }
      files.push(file);
      remaining -= blocks;
    }

    Ok(CacheDir {
      path: path.to_path_buf(),
      files,
      total_blocks,
    })
  }

  pub fn block_size(&self) -> u64 {
    self.block_size
  }

  /// Number of free slots, for diagnostics.
  pub fn free_blocks(&self) -> usize {
    self.free.lock().iter().map(BTreeSet::len).sum()
  }

  // Resolves a block id to its file and the absolute offset inside it.
  fn locate(&self, id: BlockId, offset: u64, len: usize) -> io::Result<(&File, u64)> {
    let dir = self.dirs.get(id.dir_index as usize).ok_or_else(|| {
      io::Error::new(io::ErrorKind::InvalidInput, format!("unknown cache directory {}", id.dir_index))
    })?;
    if id.block_index >= dir.total_blocks || offset + len as u64 > self.block_size {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("access outside of block {} (offset {}, len {})", id, offset, len),
      ));
    }
    let file = &dir.files[(id.block_index / self.blocks_per_file) as usize];
    let in_file = (id.block_index % self.blocks_per_file) as u64 * self.block_size + offset;
    Ok((file, in_file))
  }
}

impl DiskEngine for FileDiskEngine {
  fn quota_bytes(&self) -> u64 {
    self.quota
  }

  fn used_bytes(&self) -> u64 {
    self.used.load(Ordering::Relaxed)
  }

  fn alloc_block(&self) -> Option<BlockId> {
    let mut free = self.free.lock();
    // The directory with the most free slots is the least used one.
    let (dir_index, slots) = free
      .iter_mut()
      .enumerate()
      .filter(|(_, slots)| !slots.is_empty())
      .max_by(|(ia, a), (ib, b)| a.len().cmp(&b.len()).then(ib.cmp(ia)))?;
    let block_index = slots.pop_first()?;
    self.used.fetch_add(self.block_size, Ordering::Relaxed);
    Some(BlockId {
      dir_index: dir_index as u8,
      block_index,
    })
  }

  fn free_block(&self, id: BlockId) {
    let mut free = self.free.lock();
    let Some(slots) = free.get_mut(id.dir_index as usize) else {
      tracing::warn!(block = %id, "free of a block in an unknown directory");
      return;
    };
    if slots.insert(id.block_index) {
      self.used.fetch_sub(self.block_size, Ordering::Relaxed);
    } else {
      tracing::warn!(block = %id, "block freed twice");
    }
  }

  fn write_block(&self, id: BlockId, offset: u64, data: &[u8]) -> io::Result<()> {
    let (file, at) = self.locate(id, offset, data.len())?;
    write_at(file, data, at)
  }

  fn read_block(&self, id: BlockId, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    let (file, at) = self.locate(id, offset, buf.len())?;
    read_at(file, buf, at)
  }
}
