//! Payload compression and decompression.
//!
//! Pure byte-level codecs for the wire-stable kinds. Compression is only
//! worth keeping when the output is strictly smaller than the input; that
//! policy lives in [`MessageCodec::compress_envelope`] so the submit path and
//! the coordinator share it.

use crate::error::{BusError, Result};
use crate::message::{CompressionKind, MessageEnvelope};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compress `data` with the given kind. `None` is the identity.
pub fn compress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionKind::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| BusError::Internal(format!("snappy compress: {e}"))),
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
    }
}

/// Decompress `data` with the given kind. `None` is the identity.
///
/// A corrupt body surfaces as [`BusError::DecodeError`]; the processor treats
/// that as terminal (dead-letter, no retry).
pub fn decompress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Gzip => {
            let mut decoder = GzDecoder::new(data);
            let mut out = Vec::with_capacity(data.len() * 2);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| BusError::DecodeError(format!("gzip decompress: {e}")))?;
            Ok(out)
        }
        CompressionKind::Snappy => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| BusError::DecodeError(format!("snappy decompress: {e}"))),
        CompressionKind::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| BusError::DecodeError(format!("lz4 decompress: {e}"))),
    }
}

/// Resolve a configured compression token, falling back to GZIP for unknown
/// kinds (non-fatal, logged once at the call site).
pub fn resolve_kind(token: &str) -> CompressionKind {
    match CompressionKind::parse(token) {
        Some(kind) => kind,
        None => {
            tracing::warn!(token = %token, "unknown compression kind, falling back to gzip");
            CompressionKind::Gzip
        }
    }
}

/// Envelope-aware codec carrying the threshold policy.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    kind: CompressionKind,
    threshold: usize,
}

impl MessageCodec {
    pub fn new(kind: CompressionKind, threshold: usize) -> Self {
        Self { kind, threshold }
    }

    pub fn kind(&self) -> CompressionKind {
        self.kind
    }

    /// Compress the envelope payload in place when it clears the threshold
    /// and the compressed form is strictly smaller. Returns whether the
    /// payload was replaced.
    pub fn compress_envelope(&self, envelope: &mut MessageEnvelope) -> Result<bool> {
        if self.kind == CompressionKind::None
            || envelope.compressed
            || envelope.payload.len() <= self.threshold
        {
            return Ok(false);
        }

        let packed = compress(&envelope.payload, self.kind)?;
        if packed.len() >= envelope.payload.len() {
            return Ok(false);
        }

        envelope.payload = Bytes::from(packed);
        envelope.compressed = true;
        envelope.compression = self.kind;
        Ok(true)
    }

    /// Undo compression on worker pickup, resetting the flags.
    pub fn decompress_envelope(&self, envelope: &mut MessageEnvelope) -> Result<()> {
        if !envelope.compressed {
            return Ok(());
        }

        let raw = decompress(&envelope.payload, envelope.compression)?;
        envelope.payload = Bytes::from(raw);
        envelope.compressed = false;
        envelope.compression = CompressionKind::None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        // Repetitive enough to compress under every codec.
        b"heart_rate=72;heart_rate=73;heart_rate=72;heart_rate=71;"
            .repeat(64)
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let data = sample();
        for kind in [
            CompressionKind::Gzip,
            CompressionKind::Snappy,
            CompressionKind::Lz4,
        ] {
            let packed = compress(&data, kind).unwrap();
            assert!(packed.len() < data.len(), "{kind} did not shrink payload");
            let unpacked = decompress(&packed, kind).unwrap();
            assert_eq!(unpacked, data);
        }
    }

    #[test]
    fn test_none_is_identity() {
        let data = b"short".to_vec();
        assert_eq!(compress(&data, CompressionKind::None).unwrap(), data);
        assert_eq!(decompress(&data, CompressionKind::None).unwrap(), data);
    }

    #[test]
    fn test_corrupt_body_is_decode_error() {
        let garbage = b"\x00\x01\x02definitely-not-gzip";
        let err = decompress(garbage, CompressionKind::Gzip).unwrap_err();
        assert!(matches!(err, BusError::DecodeError(_)));

        let err = decompress(garbage, CompressionKind::Snappy).unwrap_err();
        assert!(matches!(err, BusError::DecodeError(_)));
    }

    #[test]
    fn test_unknown_kind_falls_back_to_gzip() {
        assert_eq!(resolve_kind("zstd"), CompressionKind::Gzip);
        assert_eq!(resolve_kind("lz4"), CompressionKind::Lz4);
    }

    #[test]
    fn test_envelope_compression_respects_threshold() {
        let codec = MessageCodec::new(CompressionKind::Gzip, 1024);
        let mut small = MessageEnvelope::new("t", bytes::Bytes::from_static(b"tiny"), 0);
        assert!(!codec.compress_envelope(&mut small).unwrap());
        assert!(!small.compressed);

        let mut large = MessageEnvelope::new("t", bytes::Bytes::from(sample()), 0);
        assert!(codec.compress_envelope(&mut large).unwrap());
        assert!(large.compressed);
        assert_eq!(large.compression, CompressionKind::Gzip);

        codec.decompress_envelope(&mut large).unwrap();
        assert!(!large.compressed);
        assert_eq!(large.payload, bytes::Bytes::from(sample()));
        assert_eq!(large.compression, CompressionKind::None);
    }

    #[test]
    fn test_incompressible_payload_left_alone() {
        let codec = MessageCodec::new(CompressionKind::Gzip, 8);
        let noise: Vec<u8> = (0..256u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        let mut envelope = MessageEnvelope::new("t", bytes::Bytes::from(noise.clone()), 0);
        // Pseudo-random bytes generally do not shrink; either way the flag
        // must agree with the payload state.
        let changed = codec.compress_envelope(&mut envelope).unwrap();
        assert_eq!(envelope.compressed, changed);
        if !changed {
            assert_eq!(envelope.payload, bytes::Bytes::from(noise));
        }
    }
}
