/*!
 * Storage readers
 *
 * A reader is a mode tag over one capability set: the filesystem variant
 * serves synchronous `seek`/`read`, the object storage variant serves
 * asynchronous `request_read`/`wait_for_completions`. The dispatching code
 * picks the variant from the parsed path, so calling an operation of the
 * other mode is a programming error and reports `UnknownError`.
 */

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{ObjectClient, ObjectCompletionEvent, ObjectRequestId};
use crate::config::env_flag;
use crate::destination::DstRegion;
use crate::error::{Result, StreamerError};
use crate::range::Range;

pub enum Reader {
    File(FileReader),
    Object(ObjectReader),
}

impl Reader {
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        match self {
            Reader::File(file) => file.seek(offset),
            Reader::Object(_) => Err(StreamerError::Other(
                "seek is not implemented for object storage readers".to_string(),
            )),
        }
    }

    pub fn read(&mut self, buffer: &mut [u8]) -> Result<()> {
        match self {
            Reader::File(file) => file.read(buffer),
            Reader::Object(_) => Err(StreamerError::Other(
                "read is not implemented for object storage readers".to_string(),
            )),
        }
    }

    pub fn request_read(
        &self,
        key: &str,
        request_id: ObjectRequestId,
        range: Range,
        dst: DstRegion,
    ) -> Result<()> {
        match self {
            Reader::Object(object) => object.client.request_read(key, range, dst, request_id),
            Reader::File(_) => Err(StreamerError::Other(
                "request_read is not implemented for file readers".to_string(),
            )),
        }
    }

    pub fn wait_for_completions(
        &self,
        events: &mut Vec<ObjectCompletionEvent>,
        max_events: usize,
    ) -> Result<()> {
        match self {
            Reader::Object(object) => object.client.wait_for_completions(
                events,
                max_events,
                crate::backend::WaitMode::Blocking,
            ),
            Reader::File(_) => Err(StreamerError::Other(
                "wait_for_completions is not implemented for file readers".to_string(),
            )),
        }
    }
}

/// Synchronous filesystem reader.
///
/// `RUNAI_STREAMER_DIRECTIO=1` opens the file with `O_DIRECT` to bypass the
/// page cache; if the kernel rejects a direct read (alignment), the reader
/// falls back to a buffered descriptor at the same position.
#[derive(Debug)]
pub struct FileReader {
    file: File,
    path: PathBuf,
    offset: u64,
    direct: bool,
}

impl FileReader {
    pub fn open(path: &Path) -> Result<Self> {
        let direct = env_flag("RUNAI_STREAMER_DIRECTIO");

        let file = match open_file(path, direct) {
            Ok(file) => file,
            Err(_) if direct => {
                warn!(
                    "failed to open {} with O_DIRECT, falling back to buffered I/O",
                    path.display()
                );
                open_file(path, false).map_err(|e| StreamerError::FileAccess {
                    path: path.to_path_buf(),
                    source: Some(e),
                })?
            }
            Err(e) => {
                return Err(StreamerError::FileAccess {
                    path: path.to_path_buf(),
                    source: Some(e),
                });
            }
        };

        if direct {
            debug!("opened {} with DirectIO enabled", path.display());
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            offset: 0,
            direct,
        })
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|_| StreamerError::Eof {
                path: self.path.clone(),
                expected: offset,
                actual: 0,
            })?;
        self.offset = offset;
        Ok(())
    }

    /// Read exactly `buffer.len()` bytes at the current offset.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        match self.file.read_exact(buffer) {
            Ok(()) => {
                self.offset += buffer.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(StreamerError::Eof {
                path: self.path.clone(),
                expected: self.offset + buffer.len() as u64,
                actual: self.offset,
            }),
            Err(e) if self.direct && e.raw_os_error() == Some(invalid_argument()) => {
                // unaligned direct read; reopen buffered and retry once
                warn!(
                    "direct read of {} rejected by the kernel, reopening buffered",
                    self.path.display()
                );
                self.reopen_buffered()?;
                self.read(buffer)
            }
            Err(e) => Err(StreamerError::FileAccess {
                path: self.path.clone(),
                source: Some(e),
            }),
        }
    }

    fn reopen_buffered(&mut self) -> Result<()> {
        let mut file = open_file(&self.path, false).map_err(|e| StreamerError::FileAccess {
            path: self.path.clone(),
            source: Some(e),
        })?;
        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| StreamerError::FileAccess {
                path: self.path.clone(),
                source: Some(e),
            })?;
        self.file = file;
        self.direct = false;
        Ok(())
    }
}

#[cfg(unix)]
fn open_file(path: &Path, direct: bool) -> std::io::Result<File> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options.read(true);
    if direct {
        #[cfg(target_os = "linux")]
        options.custom_flags(libc::O_DIRECT);
    }
    options.open(path)
}

#[cfg(not(unix))]
fn open_file(path: &Path, _direct: bool) -> std::io::Result<File> {
    File::open(path)
}

#[cfg(unix)]
fn invalid_argument() -> i32 {
    libc::EINVAL
}

#[cfg(not(unix))]
fn invalid_argument() -> i32 {
    22
}

/// Asynchronous object storage reader: a checked-out backend client.
pub struct ObjectReader {
    client: Arc<dyn ObjectClient>,
}

impl ObjectReader {
    pub fn new(client: Arc<dyn ObjectClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn ObjectClient> {
        &self.client
    }
}
