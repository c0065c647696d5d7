// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Overwrite-then-unlink removal of share files.
//!
//! This is best-effort sanitisation. Journaling, copy-on-write filesystems
//! and flash wear-levelling can all keep old blocks around.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Seek, Write};
use std::path::Path;

use log::debug;
use rand::RngCore;
use rand::rngs::OsRng;

/// Number of random passes before unlinking.
pub const ERASE_PASSES: usize = 2;

/// A stream whose writes can be forced to stable storage.
pub trait SyncStream: Write + Seek {
    fn sync(&mut self) -> io::Result<()>;
}

impl SyncStream for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Overwrite the first `size` bytes of `stream` with random data, `passes` times.
///
/// Each pass rewinds, writes one buffer of exactly `size` bytes and syncs
/// before the next pass starts.
pub fn overwrite<S: SyncStream>(stream: &mut S, size: usize, passes: usize) -> io::Result<()> {
    let mut buf = vec![0u8; size];
    for _ in 0..passes {
        stream.rewind()?;
        OsRng.fill_bytes(&mut buf);
        stream.write_all(&buf)?;
        stream.flush()?;
        stream.sync()?;
    }
    stream.rewind()?;
    Ok(())
}

/// Overwrite a file with random data and unlink it.
///
/// Returns `false` if there was no file to remove. The file is only unlinked
/// once every pass has been written and synced.
pub fn secure_delete(path: &Path) -> io::Result<bool> {
    let mut file = match OpenOptions::new().write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let meta = file.metadata()?;
    if !meta.is_file() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ));
    }

    let size = usize::try_from(meta.len())
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "file too large to erase"))?;
    overwrite(&mut file, size, ERASE_PASSES)?;
    drop(file);

    std::fs::remove_file(path)?;
    debug!("Erased {} ({size} bytes)", path.display());
    Ok(true)
}
