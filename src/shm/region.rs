//! Purpose: Mapped segment files with validated fixed headers.
//! Exports: `SharedArray`, `IndexFile`, `read_metadata`.
//! Role: Backing storage for the cross-process flavor; one file per slot
//! array plus one for the index block and its creation metadata.
//! Invariants: Headers are fixed-size little-endian and validated on open;
//! mismatches surface as `Corrupt`.
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::Path;

use memmap2::MmapMut;

use crate::error::{Error, ErrorKind};
use crate::index::{IndexBlock, TimeIndex, INDEX_BLOCK_LEN};

const ARRAY_MAGIC: [u8; 4] = *b"TSRA";
const INDEX_MAGIC: [u8; 4] = *b"TSRI";
const FORMAT_VERSION: u32 = 1;

pub(crate) const ARRAY_HEADER_LEN: usize = 32;
pub(crate) const INDEX_FILE_LEN: usize = 64;
const INDEX_BLOCK_OFFSET: usize = 24;

/// Fixed-capacity array of equal-sized byte cells in a mapped file.
#[derive(Debug)]
pub(crate) struct SharedArray {
    mmap: MmapMut,
    cell_len: usize,
    capacity: usize,
}

impl SharedArray {
    pub(crate) fn create(path: &Path, cell_len: usize, capacity: usize) -> Result<Self, Error> {
        let total = cell_len
            .checked_mul(capacity)
            .and_then(|cells| cells.checked_add(ARRAY_HEADER_LEN))
            .ok_or_else(|| Error::new(ErrorKind::Usage).with_message("segment size overflow"))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
        file.set_len(total as u64)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;

        let mut mmap = unsafe {
            MmapMut::map_mut(&file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?
        };
        mmap[..ARRAY_HEADER_LEN].copy_from_slice(&encode_array_header(cell_len, capacity));

        Ok(Self {
            mmap,
            cell_len,
            capacity,
        })
    }

    pub(crate) fn open(path: &Path, expected_cell_len: usize) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => Error::new(ErrorKind::Corrupt)
                    .with_message("segment file missing")
                    .with_path(path),
                _ => Error::new(ErrorKind::Io).with_path(path).with_source(err),
            })?;

        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?
        };
        let (cell_len, capacity) = decode_array_header(&mmap)?;
        if cell_len != expected_cell_len {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("element cell size mismatch")
                .with_path(path));
        }
        let expected_total = cell_len
            .checked_mul(capacity)
            .and_then(|cells| cells.checked_add(ARRAY_HEADER_LEN))
            .ok_or_else(|| {
                Error::new(ErrorKind::Corrupt)
                    .with_message("array geometry overflow")
                    .with_path(path)
            })?;
        if mmap.len() != expected_total {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("segment size mismatch")
                .with_path(path));
        }

        Ok(Self {
            mmap,
            cell_len,
            capacity,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn cell(&self, slot: usize) -> Result<&[u8], Error> {
        let start = self.cell_start(slot)?;
        Ok(&self.mmap[start..start + self.cell_len])
    }

    pub(crate) fn cell_mut(&mut self, slot: usize) -> Result<&mut [u8], Error> {
        let start = self.cell_start(slot)?;
        Ok(&mut self.mmap[start..start + self.cell_len])
    }

    fn cell_start(&self, slot: usize) -> Result<usize, Error> {
        if slot >= self.capacity {
            return Err(Error::new(ErrorKind::Internal).with_message("slot out of range"));
        }
        Ok(ARRAY_HEADER_LEN + slot * self.cell_len)
    }
}

fn encode_array_header(cell_len: usize, capacity: usize) -> [u8; ARRAY_HEADER_LEN] {
    let mut buf = [0u8; ARRAY_HEADER_LEN];
    buf[0..4].copy_from_slice(&ARRAY_MAGIC);
    buf[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf[8..16].copy_from_slice(&(cell_len as u64).to_le_bytes());
    buf[16..24].copy_from_slice(&(capacity as u64).to_le_bytes());
    buf
}

fn decode_array_header(buf: &[u8]) -> Result<(usize, usize), Error> {
    if buf.len() < ARRAY_HEADER_LEN {
        return Err(Error::new(ErrorKind::Corrupt).with_message("array header too small"));
    }
    if buf[0..4] != ARRAY_MAGIC {
        return Err(Error::new(ErrorKind::Corrupt).with_message("bad array magic"));
    }
    let version = u32::from_le_bytes(read_4(buf, 4));
    if version != FORMAT_VERSION {
        return Err(Error::new(ErrorKind::Corrupt).with_message("unsupported array version"));
    }
    let cell_len = u64::from_le_bytes(read_8(buf, 8));
    let capacity = u64::from_le_bytes(read_8(buf, 16));
    if cell_len == 0 || capacity == 0 {
        return Err(Error::new(ErrorKind::Corrupt).with_message("empty array geometry"));
    }
    Ok((cell_len as usize, capacity as usize))
}

/// The `<id>_indexes` file: creation metadata plus the canonical block.
pub(crate) struct IndexFile {
    mmap: MmapMut,
}

impl IndexFile {
    pub(crate) fn create(
        path: &Path,
        max_length: usize,
        start_timeindex: TimeIndex,
    ) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
        file.set_len(INDEX_FILE_LEN as u64)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;

        let mut mmap = unsafe {
            MmapMut::map_mut(&file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?
        };
        mmap[0..4].copy_from_slice(&INDEX_MAGIC);
        mmap[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        mmap[8..16].copy_from_slice(&(max_length as u64).to_le_bytes());
        mmap[16..24].copy_from_slice(&start_timeindex.to_le_bytes());

        let mut index_file = Self { mmap };
        index_file.write_block(&IndexBlock::new(start_timeindex));
        Ok(index_file)
    }

    pub(crate) fn open(path: &Path) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => Error::new(ErrorKind::NotFound)
                    .with_message("index segment missing")
                    .with_path(path),
                _ => Error::new(ErrorKind::Io).with_path(path).with_source(err),
            })?;
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?
        };
        validate_index_header(&mmap)?;
        Ok(Self { mmap })
    }

    pub(crate) fn max_length(&self) -> usize {
        u64::from_le_bytes(read_8(&self.mmap, 8)) as usize
    }

    pub(crate) fn read_block(&self) -> Result<IndexBlock, Error> {
        IndexBlock::decode(&self.mmap[INDEX_BLOCK_OFFSET..INDEX_BLOCK_OFFSET + INDEX_BLOCK_LEN])
    }

    pub(crate) fn write_block(&mut self, block: &IndexBlock) {
        self.mmap[INDEX_BLOCK_OFFSET..INDEX_BLOCK_OFFSET + INDEX_BLOCK_LEN]
            .copy_from_slice(&block.encode());
    }
}

/// Reads `(max_length, start_timeindex)` without attaching; `Ok(None)` when
/// the segment has no published metadata.
pub(crate) fn read_metadata(path: &Path) -> Result<Option<(usize, TimeIndex)>, Error> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::new(ErrorKind::Io).with_path(path).with_source(err)),
    };
    let mut buf = [0u8; INDEX_FILE_LEN];
    file.read_exact(&mut buf)
        .map_err(|err| Error::new(ErrorKind::Corrupt).with_path(path).with_source(err))?;
    validate_index_header(&buf)?;
    let max_length = u64::from_le_bytes(read_8(&buf, 8)) as usize;
    let start_timeindex = i64::from_le_bytes(read_8(&buf, 16));
    Ok(Some((max_length, start_timeindex)))
}

fn validate_index_header(buf: &[u8]) -> Result<(), Error> {
    if buf.len() < INDEX_FILE_LEN {
        return Err(Error::new(ErrorKind::Corrupt).with_message("index segment too small"));
    }
    if buf[0..4] != INDEX_MAGIC {
        return Err(Error::new(ErrorKind::Corrupt).with_message("bad index magic"));
    }
    let version = u32::from_le_bytes(read_4(buf, 4));
    if version != FORMAT_VERSION {
        return Err(Error::new(ErrorKind::Corrupt).with_message("unsupported index version"));
    }
    Ok(())
}

fn read_4(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

fn read_8(buf: &[u8], offset: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    out
}

#[cfg(test)]
mod tests {
    use super::{read_metadata, IndexFile, SharedArray};
    use crate::error::ErrorKind;
    use crate::index::IndexBlock;

    #[test]
    fn array_create_and_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("feed_elements");
        {
            let mut array = SharedArray::create(&path, 8, 4).expect("create");
            array.cell_mut(3).expect("cell").copy_from_slice(&7i64.to_le_bytes());
        }
        let array = SharedArray::open(&path, 8).expect("open");
        assert_eq!(array.capacity(), 4);
        assert_eq!(array.cell(3).expect("cell"), &7i64.to_le_bytes()[..]);
    }

    #[test]
    fn array_rejects_cell_size_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("feed_elements");
        SharedArray::create(&path, 8, 4).expect("create");
        let err = SharedArray::open(&path, 16).expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn array_rejects_corrupt_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("feed_elements");
        SharedArray::create(&path, 8, 4).expect("create");
        std::fs::write(&path, b"NOPE").expect("clobber");
        let err = SharedArray::open(&path, 8).expect_err("corrupt");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn array_rejects_overflowing_geometry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("feed_elements");
        SharedArray::create(&path, 8, 4).expect("create");
        let mut bytes = std::fs::read(&path).expect("read");
        // Keep magic/version/cell_len, inflate the capacity field.
        bytes[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
        std::fs::write(&path, &bytes).expect("write");
        let err = SharedArray::open(&path, 8).expect_err("overflow");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn out_of_range_slot_is_internal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("feed_elements");
        let array = SharedArray::create(&path, 8, 4).expect("create");
        let err = array.cell(4).expect_err("out of range");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn index_file_round_trips_block_and_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("feed_indexes");
        {
            let mut index_file = IndexFile::create(&path, 100, 25).expect("create");
            assert_eq!(index_file.read_block().expect("block"), IndexBlock::new(25));
            let mut block = IndexBlock::new(25);
            block.newest = 30;
            index_file.write_block(&block);
        }
        let index_file = IndexFile::open(&path).expect("open");
        assert_eq!(index_file.max_length(), 100);
        assert_eq!(index_file.read_block().expect("block").newest, 30);
        let meta = read_metadata(&path).expect("read").expect("present");
        assert_eq!(meta, (100, 25));
    }

    #[test]
    fn metadata_of_missing_segment_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nothing_indexes");
        assert!(read_metadata(&missing).expect("read").is_none());
    }

    #[test]
    fn metadata_readback_matches_creation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("feed_indexes");
        IndexFile::create(&path, 200, -5).expect("create");
        let meta = read_metadata(&path).expect("read").expect("present");
        assert_eq!(meta, (200, -5));
    }
}
