//! Reads asset files back into memory, undoing the compression envelope.
//!
//! Used by the debug roundtrip check in [`crate::writer`] and by tests; the
//! runtime engine has its own loader over the same layout.

use std::io;
use std::path::Path;

use bytemuck::AnyBitPattern;
use thiserror::Error;

use crate::buffer::RelPtr;
use crate::{compression, AssetHeader, AssetType, MAGIC};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("file is smaller than the asset header")]
    TooSmall,
    #[error("bad magic: {0:?}")]
    BadMagic([u8; 4]),
    #[error(transparent)]
    Decode(#[from] compression::Error),
    #[error("record at {offset}..{end} is out of bounds ({len})")]
    OutOfBounds {
        offset: usize,
        end: usize,
        len: usize,
    },
    #[error("expected asset type {expected:?}, found {found:?}")]
    WrongType {
        expected: AssetType,
        found: AssetType,
    },
}

/// A fully loaded asset: header plus decompressed payload, laid out exactly
/// as the writer built it.
#[derive(Clone, Debug)]
pub struct Asset {
    data: Vec<u8>,
}

pub fn open_asset(path: &Path) -> Result<Asset, Error> {
    let raw = std::fs::read(path)?;
    let header_size = std::mem::size_of::<AssetHeader>();

    if raw.len() < header_size {
        return Err(Error::TooSmall);
    }

    let header: AssetHeader = bytemuck::pod_read_unaligned(&raw[..header_size]);

    if header.magic != MAGIC {
        return Err(Error::BadMagic(header.magic));
    }

    let data = if header.is_compressed != 0 {
        let payload = compression::decode(&raw[header_size..])?;
        let mut data = Vec::with_capacity(header_size + payload.len());
        data.extend_from_slice(&raw[..header_size]);
        data.extend_from_slice(&payload);

        // The payload is no longer compressed; clear the flag so the loaded
        // bytes match what the writer assembled before encoding.
        let mut header = header;
        header.is_compressed = 0;
        data[..header_size].copy_from_slice(bytemuck::bytes_of(&header));

        data
    } else {
        raw
    };

    Ok(Asset { data })
}

impl Asset {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn header(&self) -> AssetHeader {
        bytemuck::pod_read_unaligned(&self.data[..std::mem::size_of::<AssetHeader>()])
    }

    pub fn asset_type(&self) -> AssetType {
        AssetType::from_raw(self.header().asset_type)
    }

    /// Reads a record at an absolute byte offset.
    pub fn read_at<T: AnyBitPattern>(&self, offset: usize) -> Result<T, Error> {
        let end = offset + std::mem::size_of::<T>();

        if end > self.data.len() {
            return Err(Error::OutOfBounds {
                offset,
                end,
                len: self.data.len(),
            });
        }

        Ok(bytemuck::pod_read_unaligned(&self.data[offset..end]))
    }

    /// Follows a relative pointer whose field lives at `field_offset`.
    pub fn follow<T: AnyBitPattern>(
        &self,
        ptr: RelPtr<T>,
        field_offset: usize,
    ) -> Result<(usize, T), Error> {
        let target = ptr.target(field_offset).ok_or(Error::OutOfBounds {
            offset: field_offset,
            end: field_offset,
            len: self.data.len(),
        })?;

        Ok((target, self.read_at(target)?))
    }

    /// Reads `count` records starting at an absolute byte offset.
    pub fn read_slice_at<T: AnyBitPattern>(
        &self,
        offset: usize,
        count: usize,
    ) -> Result<Vec<T>, Error> {
        (0..count)
            .map(|index| self.read_at(offset + index * std::mem::size_of::<T>()))
            .collect()
    }

    /// Byte offset of the root record, directly after the header.
    pub fn root_offset(&self) -> usize {
        std::mem::size_of::<AssetHeader>()
    }

    pub fn expect_type(&self, expected: AssetType) -> Result<(), Error> {
        let found = self.asset_type();

        if found != expected {
            return Err(Error::WrongType { expected, found });
        }

        Ok(())
    }
}
