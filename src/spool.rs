//! Spill-to-file request body buffer.
//!
//! VCS payloads can be large, so a request body is never required to fit in
//! memory: bytes accumulate in a `Vec` up to an in-core limit and then spill
//! into an anonymous temporary file. The buffer is consumed exactly once
//! when the request executes, and the backing file (already unlinked by the
//! OS) is released when the body is dropped, whether the request succeeded
//! or failed.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};

use bytes::Bytes;
use hyper::Body;
use log::trace;

use crate::error;

const DEFAULT_IN_CORE_LIMIT: usize = 1024 * 1024;

/// An owned request body buffer that spills to a temporary file.
pub struct Spool {
    inner: Inner,
    len: u64,
    in_core_limit: usize,
    declared_len: Option<u64>,
    chunked: bool,
}

enum Inner {
    Memory(Vec<u8>),
    File(File),
}

impl Spool {
    /// A buffer with the default 1 MiB in-core limit.
    pub fn new() -> Spool {
        Spool::with_in_core_limit(DEFAULT_IN_CORE_LIMIT)
    }

    /// A buffer that spills to disk once `limit` bytes are held in memory.
    pub fn with_in_core_limit(limit: usize) -> Spool {
        Spool {
            inner: Inner::Memory(Vec::new()),
            len: 0,
            in_core_limit: limit,
            declared_len: None,
            chunked: false,
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn set_declared_len(&mut self, len: u64) {
        self.declared_len = Some(len);
    }

    pub(crate) fn set_chunked(&mut self) {
        self.chunked = true;
    }

    #[cfg(test)]
    fn is_spilled(&self) -> bool {
        matches!(self.inner, Inner::File(_))
    }

    fn spill(&mut self) -> io::Result<()> {
        let buffered = match self.inner {
            Inner::Memory(ref mut vec) => std::mem::take(vec),
            Inner::File(_) => return Ok(()),
        };
        trace!("request body exceeds {} bytes, spilling to disk", self.in_core_limit);
        let mut file = tempfile::tempfile()?;
        file.write_all(&buffered)?;
        self.inner = Inner::File(file);
        Ok(())
    }

    /// Consume the buffer into a hyper request body.
    ///
    /// Returns the `Content-Length` value to declare (or `None` for chunked
    /// transfer) alongside the body. A declared fixed length takes
    /// precedence over the byte count actually written.
    pub(crate) fn into_body(self) -> crate::Result<(Option<u64>, Body)> {
        let content_length = if self.chunked {
            None
        } else {
            Some(self.declared_len.unwrap_or(self.len))
        };

        let body = match self.inner {
            Inner::Memory(vec) => {
                if self.chunked {
                    // An exact-size body would make hyper emit Content-Length;
                    // an opaque stream keeps the transfer chunked.
                    let chunk = Bytes::from(vec);
                    Body::wrap_stream(futures_util::stream::once(async move {
                        Ok::<_, io::Error>(chunk)
                    }))
                } else {
                    Body::from(vec)
                }
            }
            Inner::File(mut file) => {
                file.seek(SeekFrom::Start(0)).map_err(error::body)?;
                let file = tokio::fs::File::from_std(file);
                Body::wrap_stream(tokio_util::io::ReaderStream::new(file))
            }
        };

        Ok((content_length, body))
    }
}

impl Default for Spool {
    fn default() -> Spool {
        Spool::new()
    }
}

impl std::fmt::Debug for Spool {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Spool")
            .field("len", &self.len)
            .field(
                "backing",
                match self.inner {
                    Inner::Memory(_) => &"memory",
                    Inner::File(_) => &"file",
                },
            )
            .finish()
    }
}

impl Write for Spool {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner {
            Inner::Memory(ref mut vec) => {
                if vec.len() + buf.len() <= self.in_core_limit {
                    vec.extend_from_slice(buf);
                    self.len += buf.len() as u64;
                    return Ok(buf.len());
                }
            }
            Inner::File(_) => {}
        }

        self.spill()?;
        match self.inner {
            Inner::File(ref mut file) => {
                file.write_all(buf)?;
                self.len += buf.len() as u64;
                Ok(buf.len())
            }
            Inner::Memory(_) => unreachable!("spill always leaves a file backing"),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner {
            Inner::Memory(_) => Ok(()),
            Inner::File(ref mut file) => file.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_in_memory_below_limit() {
        let mut spool = Spool::with_in_core_limit(64);
        spool.write_all(b"0123456789").unwrap();
        assert_eq!(spool.len(), 10);
        assert!(!spool.is_spilled());
    }

    #[test]
    fn spills_past_limit() {
        let mut spool = Spool::with_in_core_limit(8);
        spool.write_all(b"0123").unwrap();
        assert!(!spool.is_spilled());
        spool.write_all(b"456789").unwrap();
        assert!(spool.is_spilled());
        assert_eq!(spool.len(), 10);

        // later writes land in the file
        spool.write_all(b"ab").unwrap();
        assert_eq!(spool.len(), 12);
    }

    #[test]
    fn fixed_length_prefers_declared_value() {
        let mut spool = Spool::new();
        spool.set_declared_len(4);
        spool.write_all(b"data").unwrap();
        let (len, _body) = spool.into_body().unwrap();
        assert_eq!(len, Some(4));
    }

    #[test]
    fn chunked_has_no_content_length() {
        let mut spool = Spool::new();
        spool.set_chunked();
        spool.write_all(b"data").unwrap();
        let (len, _body) = spool.into_body().unwrap();
        assert_eq!(len, None);
    }

    #[test]
    fn empty_buffer_reports_zero_length() {
        let spool = Spool::new();
        assert!(spool.is_empty());
        let (len, _body) = spool.into_body().unwrap();
        assert_eq!(len, Some(0));
    }
}
