//! Content fingerprinting for deduplication.
//!
//! `Fingerprinter::wrap` returns a pass-through stream that hashes every
//! chunk on its way to the Fast tier, plus a handle to read the digest once
//! the store has drained it. Nothing is buffered beyond the current chunk.

use crate::stores::ByteStream;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::{
    io,
    sync::{Arc, Mutex, MutexGuard},
};

/// Digest and byte count of a fully consumed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Lowercase hex SHA-256.
    pub digest: String,
    pub size_bytes: u64,
}

#[derive(Default)]
struct State {
    hasher: Sha256,
    size_bytes: u64,
    oversized: bool,
    source_error: Option<String>,
}

/// Read side of a wrapped stream.
#[derive(Clone)]
pub struct FingerprintHandle {
    state: Arc<Mutex<State>>,
}

impl FingerprintHandle {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True if the stream was cut off for exceeding the size limit.
    pub fn oversized(&self) -> bool {
        self.lock().oversized
    }

    /// The upstream read error, if the source stream failed.
    pub fn source_error(&self) -> Option<String> {
        self.lock().source_error.clone()
    }

    /// Final digest. Only meaningful once the wrapped stream is exhausted.
    pub fn finish(&self) -> Fingerprint {
        let state = self.lock();
        Fingerprint {
            digest: format!("{:x}", state.hasher.clone().finalize()),
            size_bytes: state.size_bytes,
        }
    }
}

pub struct Fingerprinter;

impl Fingerprinter {
    /// Hash `source` as it is consumed. Once more than `max_bytes` pass
    /// through, the stream yields an `InvalidData` error and stops.
    pub fn wrap(source: ByteStream, max_bytes: u64) -> (ByteStream, FingerprintHandle) {
        let handle = FingerprintHandle {
            state: Arc::new(Mutex::new(State::default())),
        };
        let tap = handle.clone();

        let stream = source
            .map(move |chunk| {
                let mut state = tap.lock();
                match chunk {
                    Ok(bytes) => {
                        state.size_bytes += bytes.len() as u64;
                        if state.size_bytes > max_bytes {
                            state.oversized = true;
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("content exceeds {} bytes", max_bytes),
                            ));
                        }
                        state.hasher.update(&bytes);
                        Ok(bytes)
                    }
                    Err(err) => {
                        state.source_error = Some(err.to_string());
                        Err(err)
                    }
                }
            })
            .boxed();

        (stream, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn chunks(parts: &[&'static [u8]]) -> ByteStream {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    async fn drain(mut s: ByteStream) -> Result<Vec<u8>, io::Error> {
        let mut out = Vec::new();
        while let Some(chunk) = s.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn forwards_bytes_unchanged_and_hashes_them() {
        let (stream, handle) = Fingerprinter::wrap(chunks(&[b"hel", b"lo"]), 1024);
        assert_eq!(drain(stream).await.unwrap(), b"hello");

        let fp = handle.finish();
        assert_eq!(
            fp.digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(fp.size_bytes, 5);
    }

    #[tokio::test]
    async fn chunking_does_not_change_digest() {
        let (a, ha) = Fingerprinter::wrap(chunks(&[b"hello world"]), 1024);
        let (b, hb) = Fingerprinter::wrap(chunks(&[b"hel", b"lo w", b"", b"orld"]), 1024);
        drain(a).await.unwrap();
        drain(b).await.unwrap();
        assert_eq!(ha.finish(), hb.finish());
        assert_eq!(
            ha.finish().digest,
            format!("{:x}", Sha256::digest(b"hello world"))
        );
    }

    #[tokio::test]
    async fn stops_when_limit_exceeded() {
        let (stream, handle) = Fingerprinter::wrap(chunks(&[b"1234", b"5678"]), 6);
        let err = drain(stream).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(handle.oversized());
        assert!(handle.source_error().is_none());
    }

    #[tokio::test]
    async fn records_source_errors() {
        let source: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::other("connection reset")),
        ])
        .boxed();
        let (stream, handle) = Fingerprinter::wrap(source, 1024);
        assert!(drain(stream).await.is_err());
        assert_eq!(handle.source_error().as_deref(), Some("connection reset"));
        assert_eq!(handle.finish().size_bytes, 3);
    }
}
