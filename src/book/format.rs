//! On-disk book format.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ HEADER (64 bytes)                                            │
//! │   magic: "PGNBOOK\0"   version: u16   flags: u16             │
//! │   max_plies: u32 (0 = full)                                  │
//! │   games: u64   moves: u64   illegal: u64                     │
//! │   entry_count: u64   data_len: u64   reserved: [u8; 8]       │
//! ├──────────────────────────────────────────────────────────────┤
//! │ DIRECTORY (entry_count x 16 bytes, sorted by key)            │
//! │   key: u64   data_offset: u64                                │
//! ├──────────────────────────────────────────────────────────────┤
//! │ DATA (data_len bytes)                                        │
//! │   move_count: u16                                            │
//! │   per move:                                                  │
//! │     move: u16  weight: u64  games: u32  wins: u32            │
//! │     losses: u32  draws: u32  offset_count: u32               │
//! │     offsets: offset_count varints, delta-encoded ascending   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ FOOTER (8 bytes)                                             │
//! │   crc32: u32 (over everything before the footer)             │
//! │   magic: "KOOB"                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. Lookups binary-search the directory, so
//! a lookup touches O(log n) directory slots and a single entry.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32Hasher;
use log::debug;

use super::stats::{BookEntry, MoveStat};
use crate::{
    chess::types::MoveCode,
    error::{Error, Result},
};

pub const MAGIC: [u8; 8] = *b"PGNBOOK\0";
pub const FOOTER_MAGIC: [u8; 4] = *b"KOOB";
pub const VERSION: u16 = 1;

const DIR_SLOT_SIZE: usize = 16;
const MOVE_FIXED_SIZE: usize = 2 + 8 + 4 * 5;

pub const FLAG_FULL: u16 = 0b0000_0001;

/// Book header: schema marker plus the counts of the build that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BookHeader {
    pub version: u16,
    pub flags: u16,
    pub max_plies: u32,
    pub games: u64,
    pub moves: u64,
    pub illegal: u64,
    pub entry_count: u64,
    pub data_len: u64,
}

impl BookHeader {
    pub const SIZE: usize = 64;

    pub fn is_full(&self) -> bool {
        self.flags & FLAG_FULL != 0
    }

    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&MAGIC)?;
        w.write_all(&self.version.to_be_bytes())?;
        w.write_all(&self.flags.to_be_bytes())?;
        w.write_all(&self.max_plies.to_be_bytes())?;
        w.write_all(&self.games.to_be_bytes())?;
        w.write_all(&self.moves.to_be_bytes())?;
        w.write_all(&self.illegal.to_be_bytes())?;
        w.write_all(&self.entry_count.to_be_bytes())?;
        w.write_all(&self.data_len.to_be_bytes())?;
        w.write_all(&[0u8; 8])?; // reserved
        Ok(())
    }

    fn read(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        if r.bytes(8)? != MAGIC {
            return Err(corrupt("bad header magic"));
        }
        let version = r.u16()?;
        if version != VERSION {
            return Err(corrupt(format!(
                "unsupported version {} (expected {})",
                version, VERSION
            )));
        }
        Ok(Self {
            version,
            flags: r.u16()?,
            max_plies: r.u32()?,
            games: r.u64()?,
            moves: r.u64()?,
            illegal: r.u64()?,
            entry_count: r.u64()?,
            data_len: r.u64()?,
        })
    }
}

fn corrupt(msg: impl Into<String>) -> Error {
    Error::CorruptBook(msg.into())
}

// =============================================================================
// Varints
// =============================================================================

pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Decode a varint, returning the value and the number of bytes read.
pub fn decode_varint(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in bytes.iter().enumerate().take(10) {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(corrupt("truncated or oversized varint"))
}

// =============================================================================
// Writer
// =============================================================================

/// Serialize finalised entries (sorted by key) into a complete book image.
pub fn encode_book(entries: &[BookEntry], mut header: BookHeader) -> Result<Vec<u8>> {
    let mut directory = Vec::with_capacity(entries.len() * DIR_SLOT_SIZE);
    let mut data = Vec::new();

    let mut prev_key = None;
    for entry in entries {
        if prev_key.is_some_and(|k| k >= entry.key) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "book entries must be sorted by unique key",
            )));
        }
        prev_key = Some(entry.key);

        directory.extend_from_slice(&entry.key.to_be_bytes());
        directory.extend_from_slice(&(data.len() as u64).to_be_bytes());
        encode_entry(entry, &mut data)?;
    }

    header.version = VERSION;
    header.entry_count = entries.len() as u64;
    header.data_len = data.len() as u64;

    let mut buf =
        Vec::with_capacity(BookHeader::SIZE + directory.len() + data.len() + 8);
    header.write(&mut buf)?;
    buf.extend_from_slice(&directory);
    buf.extend_from_slice(&data);

    let mut hasher = Crc32Hasher::new();
    hasher.update(&buf);
    buf.extend_from_slice(&hasher.finalize().to_be_bytes());
    buf.extend_from_slice(&FOOTER_MAGIC);
    Ok(buf)
}

fn encode_entry(entry: &BookEntry, data: &mut Vec<u8>) -> Result<()> {
    let count = entry.moves.len().min(u16::MAX as usize);
    data.extend_from_slice(&(count as u16).to_be_bytes());
    for stat in &entry.moves[..count] {
        data.extend_from_slice(&stat.mv.raw().to_be_bytes());
        data.extend_from_slice(&stat.weight.to_be_bytes());
        data.extend_from_slice(&stat.games.to_be_bytes());
        data.extend_from_slice(&stat.wins.to_be_bytes());
        data.extend_from_slice(&stat.losses.to_be_bytes());
        data.extend_from_slice(&stat.draws.to_be_bytes());
        data.extend_from_slice(&(stat.offsets.len() as u32).to_be_bytes());
        let mut prev = 0u64;
        for &offset in &stat.offsets {
            let delta = offset.checked_sub(prev).ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "game offsets must be ascending",
                ))
            })?;
            encode_varint(delta, data);
            prev = offset;
        }
    }
    Ok(())
}

// =============================================================================
// Reader
// =============================================================================

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| corrupt("unexpected end of data"))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn varint(&mut self) -> Result<u64> {
        let (value, len) = decode_varint(&self.bytes[self.pos..])?;
        self.pos += len;
        Ok(value)
    }
}

/// Fixed-width part of a stored move; offsets are decoded on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredMove<'a> {
    pub mv: MoveCode,
    pub weight: u64,
    pub games: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    offset_count: u32,
    offsets: &'a [u8],
}

impl StoredMove<'_> {
    pub fn offset_count(&self) -> usize {
        self.offset_count as usize
    }

    /// Offsets in stored order, windowed by `skip` and `limit`.
    pub fn offsets(&self, skip: usize, limit: Option<usize>) -> Result<Vec<u64>> {
        let count = self.offset_count();
        let take = limit.map_or(count, |l| l.min(count.saturating_sub(skip)));
        let mut out = Vec::with_capacity(take);
        let mut r = ByteReader::new(self.offsets);
        let mut value = 0u64;
        for i in 0..count {
            if out.len() == take {
                break;
            }
            value = value
                .checked_add(r.varint()?)
                .ok_or_else(|| corrupt("game offset overflows"))?;
            if i >= skip {
                out.push(value);
            }
        }
        Ok(out)
    }

    pub fn to_stat(&self) -> Result<MoveStat> {
        Ok(MoveStat {
            mv: self.mv,
            weight: self.weight,
            games: self.games,
            wins: self.wins,
            losses: self.losses,
            draws: self.draws,
            offsets: self.offsets(0, None)?,
        })
    }
}

/// A published book loaded into memory. Read-only; safe to share between threads.
#[derive(Debug)]
pub struct Book {
    path: PathBuf,
    header: BookHeader,
    bytes: Vec<u8>,
}

impl Book {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::BookNotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path)?;
        let book = Self::from_bytes(path.to_path_buf(), bytes)?;
        debug!(
            "Opened book {} ({} positions, {} games)",
            path.display(),
            book.header.entry_count,
            book.header.games
        );
        Ok(book)
    }

    /// Validate footer, checksum, header and section bounds.
    pub fn from_bytes(path: PathBuf, bytes: Vec<u8>) -> Result<Self> {
        let min_size = BookHeader::SIZE + 8;
        if bytes.len() < min_size {
            return Err(corrupt(format!(
                "file too small: {} bytes (minimum {})",
                bytes.len(),
                min_size
            )));
        }

        let footer = bytes.len() - 8;
        if bytes[footer + 4..] != FOOTER_MAGIC {
            return Err(corrupt("bad footer magic"));
        }
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&bytes[footer..footer + 4]);
        let stored = u32::from_be_bytes(crc);
        let mut hasher = Crc32Hasher::new();
        hasher.update(&bytes[..footer]);
        let computed = hasher.finalize();
        if stored != computed {
            return Err(corrupt(format!(
                "CRC32 mismatch: expected {:#010x}, got {:#010x}",
                stored, computed
            )));
        }

        let header = BookHeader::read(&bytes)?;
        let expected = (header.entry_count as u128) * DIR_SLOT_SIZE as u128
            + header.data_len as u128
            + BookHeader::SIZE as u128;
        if expected != footer as u128 {
            return Err(corrupt("section lengths do not match file size"));
        }

        Ok(Self {
            path,
            header,
            bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &BookHeader {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.header.entry_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.header.entry_count == 0
    }

    fn slot(&self, idx: usize) -> (u64, u64) {
        let start = BookHeader::SIZE + idx * DIR_SLOT_SIZE;
        let mut key = [0u8; 8];
        let mut offset = [0u8; 8];
        key.copy_from_slice(&self.bytes[start..start + 8]);
        offset.copy_from_slice(&self.bytes[start + 8..start + 16]);
        (u64::from_be_bytes(key), u64::from_be_bytes(offset))
    }

    fn data(&self) -> &[u8] {
        let start = BookHeader::SIZE + self.len() * DIR_SLOT_SIZE;
        &self.bytes[start..start + self.header.data_len as usize]
    }

    /// Binary search the directory for `key`.
    pub fn lookup(&self, key: u64) -> Result<Option<Vec<StoredMove<'_>>>> {
        let (mut low, mut high) = (0usize, self.len());
        while low < high {
            let mid = low + (high - low) / 2;
            if self.slot(mid).0 < key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        if low == self.len() {
            return Ok(None);
        }
        let (found, offset) = self.slot(low);
        if found != key {
            return Ok(None);
        }

        let data = self.data();
        let start = usize::try_from(offset)
            .ok()
            .filter(|&s| s <= data.len())
            .ok_or_else(|| corrupt(format!("entry offset {} out of bounds", offset)))?;
        self.decode_moves(&data[start..]).map(Some)
    }

    fn decode_moves<'a>(&self, entry: &'a [u8]) -> Result<Vec<StoredMove<'a>>> {
        let mut r = ByteReader::new(entry);
        let count = r.u16()? as usize;
        let mut moves = Vec::with_capacity(count);
        for _ in 0..count {
            let fixed = r.bytes(MOVE_FIXED_SIZE)?;
            let mut f = ByteReader::new(fixed);
            let mv = MoveCode::from_raw(f.u16()?);
            let weight = f.u64()?;
            let games = f.u32()?;
            let wins = f.u32()?;
            let losses = f.u32()?;
            let draws = f.u32()?;
            let offset_count = f.u32()?;

            let start = r.pos;
            for _ in 0..offset_count {
                r.varint()?;
            }
            moves.push(StoredMove {
                mv,
                weight,
                games,
                wins,
                losses,
                draws,
                offset_count,
                offsets: &entry[start..r.pos],
            });
        }
        Ok(moves)
    }

    /// Decode every entry, in key order.
    pub fn entries(&self) -> Result<Vec<BookEntry>> {
        (0..self.len())
            .map(|idx| {
                let (key, _) = self.slot(idx);
                let moves = self
                    .lookup(key)?
                    .unwrap_or_default()
                    .iter()
                    .map(StoredMove::to_stat)
                    .collect::<Result<Vec<_>>>()?;
                Ok(BookEntry { key, moves })
            })
            .collect()
    }
}
