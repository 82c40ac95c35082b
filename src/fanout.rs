//! Single-pass copy of one reader into many writers.

use std::io::{self, Read, Write};

use crate::error::TransferError;
use crate::progress::{CancelToken, ProgressCounter};

/// Upper bound on the chunk size.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Copies `source` into every writer in `destinations`, in order, one chunk at a time.
///
/// Each chunk is counted into `progress` before it is written, so a failing
/// write still leaves the bytes counted. Every destination gets exactly one
/// `write` call per chunk; accepting fewer bytes than offered is a
/// [`TransferError::ShortWrite`]. The first failure stops the whole copy.
///
/// `len_hint` shrinks the buffer for sources known to be shorter than a chunk.
/// Returns the number of bytes read from `source`.
pub fn fan_out_copy<R, W>(
    source: &mut R,
    destinations: &mut [W],
    len_hint: Option<u64>,
    progress: &ProgressCounter,
    cancel: &CancelToken,
) -> Result<u64, TransferError>
where
    R: Read + ?Sized,
    W: Write,
{
    let buffer_size = match len_hint {
        Some(len) if len < CHUNK_SIZE as u64 => (len as usize).max(1),
        _ => CHUNK_SIZE,
    };
    let mut buffer = vec![0u8; buffer_size];
    let mut total = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let n = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransferError::Read(e)),
        };
        progress.add(n as u64);
        total += n as u64;

        for (index, dst) in destinations.iter_mut().enumerate() {
            match dst.write(&buffer[..n]) {
                Ok(written) if written == n => {}
                Ok(written) => {
                    return Err(TransferError::ShortWrite {
                        index,
                        written,
                        expected: n,
                    });
                }
                Err(source) => return Err(TransferError::Write { index, source }),
            }
        }
    }

    for (index, dst) in destinations.iter_mut().enumerate() {
        dst.flush()
            .map_err(|source| TransferError::Write { index, source })?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::io::Cursor;

    /// Accepts at most `limit` bytes per write call.
    struct Truncating {
        inner: Vec<u8>,
        limit: usize,
    }

    impl Write for Truncating {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.inner.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk on fire"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn copies_every_byte_to_every_destination() {
        let mut payload = vec![0u8; 3 * CHUNK_SIZE + 17];
        rand::thread_rng().fill(&mut payload[..]);

        let progress = ProgressCounter::new();
        let mut dests: Vec<Vec<u8>> = vec![Vec::new(), Vec::new(), Vec::new()];
        let copied = fan_out_copy(
            &mut Cursor::new(&payload),
            &mut dests,
            Some(payload.len() as u64),
            &progress,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(copied, payload.len() as u64);
        // counted once per chunk, not once per destination
        assert_eq!(progress.get(), payload.len() as u64);
        for dst in &dests {
            assert_eq!(dst, &payload);
        }
    }

    #[test]
    fn empty_source_copies_nothing() {
        let progress = ProgressCounter::new();
        let mut dests: Vec<Vec<u8>> = vec![Vec::new()];
        let copied = fan_out_copy(
            &mut io::empty(),
            &mut dests,
            Some(0),
            &progress,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(copied, 0);
        assert!(dests[0].is_empty());
    }

    #[test]
    fn short_write_stops_immediately_but_counts_the_chunk() {
        let payload = b"This is a sample text.\n".to_vec();
        let progress = ProgressCounter::new();
        let mut dests = vec![Truncating {
            inner: Vec::new(),
            limit: 4,
        }];

        let err = fan_out_copy(
            &mut Cursor::new(&payload),
            &mut dests,
            None,
            &progress,
            &CancelToken::new(),
        )
        .unwrap_err();

        match err {
            TransferError::ShortWrite {
                index,
                written,
                expected,
            } => {
                assert_eq!(index, 0);
                assert_eq!(written, 4);
                assert_eq!(expected, payload.len());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(progress.get(), payload.len() as u64);
    }

    #[test]
    fn write_error_skips_remaining_destinations() {
        let progress = ProgressCounter::new();
        let mut first: Vec<u8> = Vec::new();
        let mut third: Vec<u8> = Vec::new();
        let mut dests: Vec<Box<dyn Write + '_>> = vec![
            Box::new(&mut first),
            Box::new(Broken),
            Box::new(&mut third),
        ];

        let err = fan_out_copy(
            &mut Cursor::new(b"abc"),
            &mut dests,
            None,
            &progress,
            &CancelToken::new(),
        )
        .unwrap_err();
        drop(dests);

        assert!(matches!(err, TransferError::Write { index: 1, .. }));
        assert_eq!(first, b"abc");
        assert!(third.is_empty());
    }

    #[test]
    fn cancelled_token_stops_before_reading() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let progress = ProgressCounter::new();
        let mut dests: Vec<Vec<u8>> = vec![Vec::new()];

        let err = fan_out_copy(&mut Cursor::new(b"abc"), &mut dests, None, &progress, &cancel)
            .unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(progress.get(), 0);
    }
}
