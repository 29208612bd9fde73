//! Persistent binary cache I/O: `PLDP` magic, version 1.
//!
//! The original C implementation this format is ported from has a load-path
//! bug where the loop that skips an already-live signature's bytes uses
//! `continue` against the wrong enclosing loop, so in some cases it fails to
//! actually advance the read cursor past that entry. This module implements
//! the evidently intended behavior instead: on a live-signature hit, the
//! entry's bytes are always fully consumed before moving to the next one.

use crate::backend::GpuBackend;
use crate::cache::{CachedProgramEntry, DispatchRoot};
use crate::signature::Signature;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{trace, warn};
use std::io::{self, Cursor, Read, Write};

const MAGIC: [u8; 4] = *b"PLDP";
const VERSION: u32 = 1;

/// Computes the size `save` would write without actually writing anything.
pub fn save_size<B: GpuBackend>(root: &DispatchRoot<B>) -> usize {
    let mut size = 4 + 4 + 4; // magic + version + entry_count
    for record in &root.records {
        if let Some(bytes) = live_record_bytes(record) {
            size += 8 + 8 + bytes.len();
        }
    }
    for entry in &root.cached_programs {
        size += 8 + 8 + entry.bytes.len();
    }
    size
}

fn live_record_bytes<B: GpuBackend>(record: &crate::record::CompiledPassRecord<B>) -> Option<&[u8]> {
    record.cached_program.as_deref()
}

/// Writes every persistable entry: live records whose backend exposed a
/// cached program blob, plus every as-yet-unattached `CachedProgramEntry`
/// (so a save immediately following a load round-trips those bytes back
/// out unchanged).
pub fn save<B: GpuBackend>(root: &DispatchRoot<B>, out: &mut impl Write) -> io::Result<usize> {
    let mut entries: Vec<(Signature, &[u8])> = Vec::new();
    for record in &root.records {
        if let Some(bytes) = live_record_bytes(record) {
            entries.push((record.signature, bytes));
        }
    }
    for entry in &root.cached_programs {
        entries.push((entry.signature, &entry.bytes));
    }

    out.write_all(&MAGIC)?;
    out.write_u32::<LittleEndian>(VERSION)?;
    out.write_u32::<LittleEndian>(entries.len() as u32)?;

    let mut written = 12;
    for (signature, bytes) in entries {
        out.write_u64::<LittleEndian>(signature.0)?;
        out.write_u64::<LittleEndian>(bytes.len() as u64)?;
        out.write_all(bytes)?;
        written += 16 + bytes.len();
    }
    Ok(written)
}

/// Validates the header and, for each entry whose signature does not
/// already belong to a live record, stores (or replaces) the bytes in
/// `cached_programs`. Never triggers a shader compile; that only happens on
/// the next `find_or_build` for a matching signature.
///
/// Header mismatches are logged and treated as a no-op, not a hard error:
/// the cache is simply left as it was.
pub fn load<B: GpuBackend>(root: &mut DispatchRoot<B>, bytes: &[u8]) {
    let mut cursor = Cursor::new(bytes);

    let mut magic = [0u8; 4];
    if cursor.read_exact(&mut magic).is_err() || magic != MAGIC {
        warn!("persisted dispatch cache has bad magic, ignoring");
        return;
    }
    let version = match cursor.read_u32::<LittleEndian>() {
        Ok(v) => v,
        Err(_) => {
            warn!("persisted dispatch cache is truncated, ignoring");
            return;
        }
    };
    if version != VERSION {
        warn!("persisted dispatch cache has version {}, expected {}, ignoring", version, VERSION);
        return;
    }
    let entry_count = match cursor.read_u32::<LittleEndian>() {
        Ok(v) => v,
        Err(_) => {
            warn!("persisted dispatch cache is truncated, ignoring");
            return;
        }
    };

    for _ in 0..entry_count {
        let signature = match cursor.read_u64::<LittleEndian>() {
            Ok(v) => Signature(v),
            Err(_) => {
                warn!("persisted dispatch cache entry header truncated, stopping load");
                return;
            }
        };
        let len = match cursor.read_u64::<LittleEndian>() {
            Ok(v) => v as usize,
            Err(_) => {
                warn!("persisted dispatch cache entry header truncated, stopping load");
                return;
            }
        };

        let start = cursor.position() as usize;
        let end = start + len;
        if end > bytes.len() {
            warn!("persisted dispatch cache entry overruns buffer, stopping load");
            return;
        }
        let data = &bytes[start..end];
        cursor.set_position(end as u64);

        // Intended behavior: a live record already compiled for this
        // signature makes the persisted bytes redundant, so skip them
        // (the cursor has already advanced past them above) and move on to
        // the next entry, rather than attaching them to anything.
        if root.records.iter().any(|r| r.signature == signature) {
            trace!("signature {:?} already has a live pass, skipping persisted entry", signature);
            continue;
        }

        match root.cached_programs.iter_mut().find(|e| e.signature == signature) {
            Some(existing) => existing.bytes = data.to_vec(),
            None => root.cached_programs.push(CachedProgramEntry {
                signature,
                bytes: data.to_vec(),
            }),
        }
    }
}
