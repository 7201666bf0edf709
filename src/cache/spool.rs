//! Write buffer that switches to a compressed temporary file once it grows
//! past a threshold.

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::NamedTempFile;

use super::GZIP_MAGIC;

enum State {
    Memory(Vec<u8>),
    Compressed(GzEncoder<BufWriter<NamedTempFile>>),
}

/// Spool for one cache entry.
///
/// Bytes stay in memory until `threshold` bytes have been written; from then
/// on everything, buffered bytes first, goes through a gzip encoder into a
/// temporary file created in `dir`, so the final rename stays on one file
/// system. A payload starting with the gzip signature is always compressed,
/// since readers detect the encoding by that signature.
pub(crate) struct Spool {
    dir: PathBuf,
    threshold: usize,
    state: State,
    written: u64,
}

impl Spool {
    pub(crate) fn new(dir: impl Into<PathBuf>, threshold: usize) -> Self {
        Self {
            dir: dir.into(),
            threshold,
            state: State::Memory(Vec::new()),
            written: 0,
        }
    }

    /// Total uncompressed bytes written so far.
    pub(crate) fn written(&self) -> u64 {
        self.written
    }

    fn spill(&mut self) -> io::Result<()> {
        let State::Memory(buffered) = &self.state else {
            return Ok(());
        };
        let temp = NamedTempFile::new_in(&self.dir)?;
        let mut encoder = GzEncoder::new(BufWriter::new(temp), Compression::default());
        encoder.write_all(buffered)?;
        self.state = State::Compressed(encoder);
        Ok(())
    }

    /// Flushes everything into a temporary file and reports whether it is
    /// compressed.
    pub(crate) fn finish(mut self) -> io::Result<(NamedTempFile, bool)> {
        if let State::Memory(buffered) = &self.state
            && must_compress(buffered, self.threshold)
        {
            self.spill()?;
        }
        match self.state {
            State::Memory(buffered) => {
                let mut temp = NamedTempFile::new_in(&self.dir)?;
                temp.write_all(&buffered)?;
                temp.flush()?;
                Ok((temp, false))
            }
            State::Compressed(encoder) => {
                let writer = encoder.finish()?;
                let temp = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
                Ok((temp, true))
            }
        }
    }
}

fn must_compress(buffered: &[u8], threshold: usize) -> bool {
    buffered.len() >= threshold || buffered.starts_with(&GZIP_MAGIC)
}

impl Write for Spool {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = match &mut self.state {
            State::Memory(buffered) => {
                buffered.extend_from_slice(buf);
                buf.len()
            }
            State::Compressed(encoder) => encoder.write(buf)?,
        };
        self.written += written as u64;
        if let State::Memory(buffered) = &self.state
            && !buffered.is_empty()
            && must_compress(buffered, self.threshold)
        {
            self.spill()?;
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            State::Memory(_) => Ok(()),
            State::Compressed(encoder) => encoder.flush(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;

    #[test]
    fn test_small_payload_stays_plain() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = Spool::new(dir.path(), 16);
        spool.write_all(b"short").unwrap();
        assert_eq!(spool.written(), 5);
        let (temp, compressed) = spool.finish().unwrap();
        assert!(!compressed);
        assert_eq!(std::fs::read(temp.path()).unwrap(), b"short");
    }

    #[test]
    fn test_payload_at_threshold_is_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = Spool::new(dir.path(), 8);
        spool.write_all(b"0123").unwrap();
        spool.write_all(b"4567").unwrap();
        spool.write_all(b"89").unwrap();
        let (temp, compressed) = spool.finish().unwrap();
        assert!(compressed);

        let mut decoded = String::new();
        GzDecoder::new(std::fs::File::open(temp.path()).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "0123456789");
    }

    #[test]
    fn test_gzip_signature_forces_compression() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = Spool::new(dir.path(), 1024);
        spool.write_all(&[0x1f, 0x8b, b'h', b'i']).unwrap();
        let (temp, compressed) = spool.finish().unwrap();
        assert!(compressed);

        let mut decoded = Vec::new();
        GzDecoder::new(std::fs::File::open(temp.path()).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, [0x1f, 0x8b, b'h', b'i']);
    }

    #[test]
    fn test_temporary_file_lives_in_target_directory() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path(), 1024);
        let (temp, _) = spool.finish().unwrap();
        assert_eq!(temp.path().parent(), Some(dir.path()));
    }
}
