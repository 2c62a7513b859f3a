//! File-backed store: append-only object log plus atomically renamed
//! named-state files.
//!
//! # Layout
//!
//! ```text
//! <dir>/objects.log      frames appended by save_object (id = frame offset)
//! <dir>/state-<name>     one file per named slot, replaced by rename
//! ```
//!
//! Objects are immutable once appended, so an id stays valid forever. The
//! commit point of the engine is a named-state write: the new file is
//! written next to the old one and renamed over it, so a crash leaves either
//! the old or the new master ref, never a mix. In every syncing mode the
//! object log is fsynced before the rename.
//!
//! On open, a torn frame at the tail of the log (a crash mid-append) is cut
//! off; a bad frame anywhere else is reported as corruption.

use crate::durability::DurabilityMode;
use crate::format::{encode_frame, FrameHeader, FRAME_HEADER_SIZE, FRAME_MAGIC};
use crate::Storage;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tessera_core::{Error, ObjectRef, Result};
use tracing::{debug, info, warn};

const OBJECT_LOG: &str = "objects.log";
const STATE_PREFIX: &str = "state-";

struct ObjectLog {
    file: File,
    end: u64,
    unsynced: usize,
}

impl ObjectLog {
    /// Append one frame and return its id
    ///
    /// A failed write is cut back to the previous end, so the log never
    /// keeps a partial frame and the next id is still `end`.
    fn append(&mut self, frame: &[u8]) -> Result<ObjectRef> {
        let id = ObjectRef::new(self.end);
        if let Err(e) = self.file.write_all(frame) {
            if let Err(trim) = self.discard_partial() {
                warn!(end = self.end, error = %trim, "Could not cut partial frame from object log");
            }
            return Err(e.into());
        }
        self.end += frame.len() as u64;
        self.unsynced += 1;
        Ok(id)
    }

    /// Drop any bytes past the last complete frame
    fn discard_partial(&mut self) -> Result<()> {
        self.file.set_len(self.end)?;
        self.file.seek(SeekFrom::Start(self.end))?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if self.unsynced > 0 {
            self.file.sync_data()?;
            self.unsynced = 0;
        }
        Ok(())
    }
}

/// File-backed storage backend
pub struct FileStore {
    dir: PathBuf,
    mode: DurabilityMode,
    log: Mutex<ObjectLog>,
}

impl FileStore {
    /// Open (or create) a store in `dir`
    pub fn open(dir: impl AsRef<Path>, mode: DurabilityMode) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(dir.join(OBJECT_LOG))?;
        let end = Self::recover_tail(&mut file)?;

        info!(
            path = %dir.display(),
            log_bytes = end,
            mode = mode.description(),
            "Opened file store"
        );

        Ok(Self {
            dir,
            mode,
            log: Mutex::new(ObjectLog {
                file,
                end,
                unsynced: 0,
            }),
        })
    }

    /// Store directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Durability mode in effect
    pub fn durability_mode(&self) -> DurabilityMode {
        self.mode
    }

    /// Walk every frame header and return the end of the last complete frame,
    /// truncating a torn tail.
    ///
    /// A bad header is only a torn tail when no intact frame follows it;
    /// otherwise the log is damaged in the middle and open fails.
    fn recover_tail(file: &mut File) -> Result<u64> {
        let len = file.metadata()?.len();
        let mut offset = 0u64;
        let mut frames = 0usize;

        while offset < len {
            if len - offset < FRAME_HEADER_SIZE as u64 {
                break;
            }
            let mut header = [0u8; FRAME_HEADER_SIZE];
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut header)?;
            let parsed = match FrameHeader::parse(&header, offset) {
                Ok(parsed) => parsed,
                Err(e) => {
                    if Self::intact_frame_after(file, offset)? {
                        return Err(e);
                    }
                    break;
                }
            };
            let frame_end = offset + FRAME_HEADER_SIZE as u64 + parsed.length as u64;
            if frame_end > len {
                if Self::intact_frame_after(file, offset)? {
                    return Err(Error::Corrupted(format!(
                        "frame at offset {} overruns intact frames after it",
                        offset
                    )));
                }
                break;
            }
            offset = frame_end;
            frames += 1;
        }

        if offset < len {
            warn!(
                valid_bytes = offset,
                file_bytes = len,
                "Truncating torn frame at end of object log"
            );
            file.set_len(offset)?;
        }
        debug!(frames, "Scanned object log");
        Ok(offset)
    }

    /// Whether a frame with a matching checksum starts anywhere after `offset`
    fn intact_frame_after(file: &mut File, offset: u64) -> Result<bool> {
        let mut rest = Vec::new();
        file.seek(SeekFrom::Start(offset + 1))?;
        file.read_to_end(&mut rest)?;

        let magic = FRAME_MAGIC.to_le_bytes();
        let mut start = 0usize;
        while start + FRAME_HEADER_SIZE <= rest.len() {
            if rest[start..start + 4] == magic {
                let mut header = [0u8; FRAME_HEADER_SIZE];
                header.copy_from_slice(&rest[start..start + FRAME_HEADER_SIZE]);
                let at = offset + 1 + start as u64;
                if let Ok(parsed) = FrameHeader::parse(&header, at) {
                    let body = start + FRAME_HEADER_SIZE;
                    let end = body + parsed.length as usize;
                    if end <= rest.len() && parsed.verify(&rest[body..end], at).is_ok() {
                        return Ok(true);
                    }
                }
            }
            start += 1;
        }
        Ok(false)
    }

    fn state_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(Error::Storage(format!("invalid named-state slot: {:?}", name)));
        }
        Ok(self.dir.join(format!("{}{}", STATE_PREFIX, name)))
    }

    #[cfg(unix)]
    fn sync_dir(&self) -> Result<()> {
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> Result<()> {
        Ok(())
    }
}

impl Storage for FileStore {
    fn get_object(&self, id: ObjectRef) -> Result<Vec<u8>> {
        let offset = id.as_u64();
        let mut log = self.log.lock();
        if offset + FRAME_HEADER_SIZE as u64 > log.end {
            return Err(Error::Storage(format!("object {} not found", id)));
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        log.file.seek(SeekFrom::Start(offset))?;
        log.file.read_exact(&mut header)?;
        let parsed = FrameHeader::parse(&header, offset)?;
        if offset + FRAME_HEADER_SIZE as u64 + parsed.length as u64 > log.end {
            return Err(Error::Corrupted(format!(
                "object {} extends past the end of the log",
                id
            )));
        }

        let mut payload = vec![0u8; parsed.length as usize];
        log.file.read_exact(&mut payload)?;
        parsed.verify(&payload, offset)?;
        Ok(payload)
    }

    fn save_object(&self, bytes: &[u8]) -> Result<ObjectRef> {
        let frame = encode_frame(bytes)?;
        let mut log = self.log.lock();
        let id = log.append(&frame)?;
        if self.mode.should_sync(log.unsynced) {
            log.sync()?;
        }
        Ok(id)
    }

    fn get_named_state(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.state_path(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_named_state(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.state_path(name)?;
        let tmp = path.with_extension("tmp");

        if self.mode.requires_sync() {
            self.log.lock().sync()?;
        }

        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        if self.mode.requires_sync() {
            file.sync_all()?;
        }
        drop(file);

        fs::rename(&tmp, &path)?;
        if self.mode.requires_sync() {
            self.sync_dir()?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.log.lock().sync()
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("dir", &self.dir)
            .field("mode", &self.mode)
            .finish()
    }
}
