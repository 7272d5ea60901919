use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use tracing::{info, warn};

use cluso_core::{
    error::{Error, Result},
    utils::now_secs,
};

use super::types::*;

/// In-memory struct of an open WAL segment.
pub(crate) struct WalFile {
    pub path: PathBuf,
    pub file: BufWriter<File>,
    pub size: u64,
    pub entry_count: u64,
    pub first_lsn: u64,
    /// LSN of the newest entry in this segment, 0 while empty.
    pub last_lsn: u64,
    /// Payloads are snappy-compressed.
    pub compressed: bool,
}

pub(crate) struct SegmentHeader {
    pub first_lsn: u64,
    pub compressed: bool,
}

/// Outcome of reading one record from a segment.
pub(crate) enum ReadOutcome {
    Entry(WalEntry),
    /// Clean end of file on a record boundary.
    End,
    /// The file ends inside a record.
    Torn,
}

pub(crate) fn segment_path(wal_dir: &Path, first_lsn: u64) -> PathBuf {
    wal_dir.join(format!("{:020}.wal", first_lsn))
}

pub(crate) fn create_file(wal_dir: &Path, first_lsn: u64, config: &WalConfig) -> Result<WalFile> {
    let path = segment_path(wal_dir, first_lsn);

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .truncate(true)
        .open(&path)
        .map_err(|e| Error::io(format!("Failed to create WAL segment {:?}", path), e))?;

    let mut writer = BufWriter::with_capacity(config.buffer_size, file);

    writer.write_all(WAL_MAGIC)?;
    writer.write_u32::<LittleEndian>(WAL_VERSION)?;
    writer.write_u64::<LittleEndian>(now_secs() as u64)?;
    writer.write_u64::<LittleEndian>(first_lsn)?;
    let flags = if config.compression { SEGMENT_FLAG_SNAPPY } else { 0 };
    writer.write_u32::<LittleEndian>(flags)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    Ok(WalFile {
        path,
        file: writer,
        size: WAL_HEADER_SIZE as u64,
        entry_count: 0,
        first_lsn,
        last_lsn: 0,
        compressed: config.compression,
    })
}

pub(crate) fn read_header(reader: &mut impl Read, path: &Path) -> Result<SegmentHeader> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != WAL_MAGIC {
        return Err(Error::corruption(
            format!("WAL segment {:?}", path),
            "invalid magic number",
        ));
    }

    let version = reader.read_u32::<LittleEndian>()?;
    if version != WAL_VERSION {
        return Err(Error::WriteAheadLog {
            message: format!("Unsupported WAL version {} in {:?}", version, path),
        });
    }

    let _created = reader.read_u64::<LittleEndian>()?;
    let first_lsn = reader.read_u64::<LittleEndian>()?;
    let flags = reader.read_u32::<LittleEndian>()?;
    if flags & !SEGMENT_FLAG_SNAPPY != 0 {
        return Err(Error::corruption(
            format!("WAL segment {:?}", path),
            format!("unknown header flags {:#x}", flags),
        ));
    }
    Ok(SegmentHeader {
        first_lsn,
        compressed: flags & SEGMENT_FLAG_SNAPPY != 0,
    })
}

/// Reopen the newest segment for appending. A torn record left by a crash is cut off;
/// a record with a bad checksum is reported as corruption.
pub(crate) fn recover_file(path: &Path, config: &WalConfig) -> Result<WalFile> {
    info!("Recovering WAL segment {:?}", path);

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| Error::io(format!("Failed to open WAL segment {:?}", path), e))?;
    let mut reader = BufReader::new(file);
    let header = read_header(&mut reader, path)?;

    let mut valid_end = WAL_HEADER_SIZE as u64;
    let mut last_lsn = 0u64;
    let mut entry_count = 0u64;

    loop {
        match read_entry(&mut reader)? {
            ReadOutcome::Entry(entry) => {
                if last_lsn != 0 && entry.lsn <= last_lsn {
                    return Err(Error::corruption(
                        format!("WAL segment {:?}", path),
                        format!("LSN {} follows {}", entry.lsn, last_lsn),
                    ));
                }
                valid_end += entry.encoded_len() as u64;
                last_lsn = entry.lsn;
                entry_count += 1;
            }
            ReadOutcome::End => break,
            ReadOutcome::Torn => {
                warn!(
                    "Torn record at offset {} in {:?}, truncating unacknowledged tail",
                    valid_end, path
                );
                break;
            }
        }
    }

    let mut file = reader.into_inner();
    let file_len = file.seek(SeekFrom::End(0))?;
    if file_len != valid_end {
        file.set_len(valid_end)?;
        file.sync_all()?;
    }
    file.seek(SeekFrom::Start(valid_end))?;

    Ok(WalFile {
        path: path.to_path_buf(),
        file: BufWriter::with_capacity(config.buffer_size, file),
        size: valid_end,
        entry_count,
        first_lsn: header.first_lsn,
        last_lsn,
        compressed: header.compressed,
    })
}

/// Payload bytes as they go to disk in a segment with the given mode.
pub(crate) fn encode_payload(payload: &Bytes, compressed: bool) -> Result<Bytes> {
    if !compressed {
        return Ok(payload.clone());
    }
    snap::raw::Encoder::new()
        .compress_vec(payload)
        .map(Bytes::from)
        .map_err(|e| Error::WriteAheadLog {
            message: format!("Snappy compression failed: {}", e),
        })
}

/// Inverse of [`encode_payload`], applied after the checksum has been verified.
pub(crate) fn decode_payload(mut entry: WalEntry, compressed: bool) -> Result<WalEntry> {
    if compressed {
        let raw = snap::raw::Decoder::new()
            .decompress_vec(&entry.payload)
            .map_err(|e| Error::corruption(format!("WAL entry {}", entry.lsn), format!("snappy: {}", e)))?;
        entry.payload = Bytes::from(raw);
    }
    Ok(entry)
}

pub(crate) fn write_entry(writer: &mut impl Write, entry: &WalEntry) -> Result<()> {
    writer.write_u64::<LittleEndian>(entry.lsn)?;
    writer.write_u8(entry.op_type as u8)?;
    writer.write_u32::<LittleEndian>(entry.payload.len() as u32)?;
    writer.write_all(&entry.payload)?;
    writer.write_u32::<LittleEndian>(entry.checksum)?;
    writer.write_u64::<LittleEndian>(entry.timestamp)?;
    Ok(())
}

/// Serialize several entries into one buffer so the batch costs a single write call.
pub(crate) fn write_entries_batch(writer: &mut impl Write, entries: &[WalEntry]) -> Result<()> {
    let total_size: usize = entries.iter().map(WalEntry::encoded_len).sum();
    let mut buffer = Vec::with_capacity(total_size);
    for entry in entries {
        write_entry(&mut buffer, entry)?;
    }
    writer.write_all(&buffer)?;
    Ok(())
}

pub(crate) fn read_entry(reader: &mut impl Read) -> Result<ReadOutcome> {
    let mut prefix = [0u8; ENTRY_PREFIX_SIZE];
    match read_full(reader, &mut prefix)? {
        0 => return Ok(ReadOutcome::End),
        n if n < ENTRY_PREFIX_SIZE => return Ok(ReadOutcome::Torn),
        _ => {}
    }

    let mut cursor = &prefix[..];
    let lsn = cursor.read_u64::<LittleEndian>()?;
    let op_byte = cursor.read_u8()?;
    let payload_len = cursor.read_u32::<LittleEndian>()? as usize;

    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(Error::corruption(
            format!("WAL entry {}", lsn),
            format!("payload length {} exceeds limit", payload_len),
        ));
    }

    let mut payload = vec![0u8; payload_len];
    if read_full(reader, &mut payload)? < payload_len {
        return Ok(ReadOutcome::Torn);
    }

    let mut suffix = [0u8; ENTRY_SUFFIX_SIZE];
    if read_full(reader, &mut suffix)? < ENTRY_SUFFIX_SIZE {
        return Ok(ReadOutcome::Torn);
    }
    let mut cursor = &suffix[..];
    let checksum = cursor.read_u32::<LittleEndian>()?;
    let timestamp = cursor.read_u64::<LittleEndian>()?;

    // Checksum before decoding the op byte: a flipped op byte must read as corruption.
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[op_byte]);
    hasher.update(&payload);
    let actual = hasher.finalize();
    if actual != checksum {
        return Err(Error::ChecksumMismatch {
            lsn,
            expected: checksum,
            actual,
        });
    }

    let op_type = OpType::try_from(op_byte)?;

    Ok(ReadOutcome::Entry(WalEntry {
        lsn,
        op_type,
        payload: Bytes::from(payload),
        checksum,
        timestamp,
    }))
}

/// Fill `buf` as far as the reader allows; returns the number of bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
