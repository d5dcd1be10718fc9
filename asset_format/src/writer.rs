//! Persists a finished [`AssetBuffer`] to disk.

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::buffer::AssetBuffer;
use crate::{compression, loader, AssetHeader};

/// Compression is only kept when the encoded file shrinks below this share of
/// the raw file.
const MIN_COMPRESSION_RATIO: f64 = 0.75;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("roundtrip mismatch at byte {0}")]
    RoundtripMismatch(usize),
    #[error(transparent)]
    Load(#[from] loader::Error),
}

/// Outcome of a writer invocation. `UpToDate` means the destination was newer
/// than every input and nothing was written.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    Written,
    UpToDate,
}

/// Pads, optionally compresses and writes `buffer` to `path`.
///
/// The file is assembled fully in memory and written with a single syscall,
/// so a reader never observes a header without its payload.
pub fn persist(path: &Path, buffer: &mut AssetBuffer, force_no_compression: bool) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pad to a 64-bit boundary for more optimal reads.
    buffer.pad_to(8);

    let total_len = buffer.len();
    buffer.update_header(|header| {
        header.uncompressed_size = total_len as u64;
        header.is_compressed = 0;
    });

    let header_size = std::mem::size_of::<AssetHeader>();
    let mut compressed = None;

    if !force_no_compression {
        let encoded = compression::encode(&buffer.data()[header_size..]);
        let ratio = (encoded.len() + header_size) as f64 / total_len as f64;

        if ratio <= MIN_COMPRESSION_RATIO {
            tracing::debug!(
                path = %path.display(),
                ratio = format_args!("{:.2}", ratio),
                "compressing asset"
            );
            compressed = Some(encoded);
        }
    }

    match &compressed {
        Some(encoded) => {
            buffer.update_header(|header| header.is_compressed = 1);

            let mut file = Vec::with_capacity(header_size + encoded.len());
            file.extend_from_slice(&buffer.data()[..header_size]);
            file.extend_from_slice(encoded);
            std::fs::write(path, &file)?;
        }
        None => {
            std::fs::write(path, buffer.data())?;
        }
    }

    // The buffer itself always holds the uncompressed form.
    buffer.update_header(|header| header.is_compressed = 0);

    #[cfg(debug_assertions)]
    {
        // Reload through the decoding path and verify every byte.
        let asset = loader::open_asset(path)?;
        for (index, (a, b)) in asset.data().iter().zip(buffer.data()).enumerate() {
            if a != b {
                return Err(Error::RoundtripMismatch(index));
            }
        }
    }

    tracing::info!(path = %path.display(), bytes = total_len, "wrote asset");

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::buffer::AssetBuffer;
    use crate::{loader, AssetType};

    use super::persist;

    #[test]
    fn repetitive_payload_is_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("a.pktexture");

        let mut buffer = AssetBuffer::new(AssetType::Texture, "a");
        buffer.write_slice(&vec![b'A'; 10_000]);
        persist(&path, &mut buffer, false).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(raw.len() < buffer.len());

        // The on-disk header carries the compression flag.
        let on_disk: crate::AssetHeader =
            bytemuck::pod_read_unaligned(&raw[..std::mem::size_of::<crate::AssetHeader>()]);
        assert_eq!(on_disk.is_compressed, 1);

        let asset = loader::open_asset(&path).unwrap();
        assert_eq!(asset.data(), buffer.data());
    }

    #[test]
    fn incompressible_payload_stays_raw() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.pktexture");

        // A cheap pseudo-random byte soup with a flat histogram.
        let mut state = 0x12345678u32;
        let noise: Vec<u8> = (0..10_000)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect();

        let mut buffer = AssetBuffer::new(AssetType::Texture, "b");
        buffer.write_slice(&noise);
        persist(&path, &mut buffer, false).unwrap();

        let asset = loader::open_asset(&path).unwrap();
        assert_eq!(asset.header().is_compressed, 0);
        assert_eq!(asset.data(), buffer.data());
    }

    #[test]
    fn header_size_matches_padded_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.pkmesh");

        let mut buffer = AssetBuffer::new(AssetType::Mesh, "c");
        buffer.write_slice(&[1u8, 2, 3]);
        persist(&path, &mut buffer, true).unwrap();

        assert_eq!(buffer.len() % 8, 0);
        assert_eq!(buffer.header().uncompressed_size, buffer.len() as u64);
    }
}
