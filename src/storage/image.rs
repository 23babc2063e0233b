//! Block Image
//!
//! Checkpoints the whole block arena to a single file and loads it back.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header                                                       │
//! │   Magic: "DQIM" (4) | Version: u16 (2) | ManifestLen: u32 (4)│
//! ├──────────────────────────────────────────────────────────────┤
//! │ Manifest (bincode): block_size, block_count, free_blocks     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Blocks: block_count × block_size raw bytes, in id order      │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Footer: CRC32 of everything above (4)                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{DelQueueError, Result};

use super::{Access, BlockId, BlockStore};

/// Magic bytes identifying a block image
const MAGIC: &[u8; 4] = b"DQIM";

/// Current image format version
const VERSION: u16 = 1;

/// Magic (4) + Version (2) + ManifestLen (4)
const HEADER_SIZE: usize = 10;

/// CRC32 (4)
const FOOTER_SIZE: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
struct ImageManifest {
    block_size: u32,
    block_count: u32,
    free_blocks: Vec<BlockId>,
}

/// Write every block of `store` to `path`, atomically replacing any
/// previous image.
pub(crate) fn write_image(store: &BlockStore, path: &Path) -> Result<()> {
    let blocks = store.blocks_snapshot();
    let manifest = ImageManifest {
        block_size: store.block_size() as u32,
        block_count: blocks.len() as u32,
        free_blocks: store.free_blocks(),
    };
    let manifest_bytes =
        bincode::serialize(&manifest).map_err(|e| DelQueueError::Serialization(e.to_string()))?;

    let tmp_path = path.with_extension("img.tmp");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;
    let mut writer = BufWriter::new(file);
    let mut hasher = crc32fast::Hasher::new();

    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.put_slice(MAGIC);
    header.put_u16_le(VERSION);
    header.put_u32_le(manifest_bytes.len() as u32);

    writer.write_all(&header)?;
    hasher.update(&header);
    writer.write_all(&manifest_bytes)?;
    hasher.update(&manifest_bytes);

    for (index, block) in blocks.iter().enumerate() {
        let data = block
            .try_read_for(store.lock_timeout())
            .ok_or(DelQueueError::LockTimeout {
                block: BlockId(index as u32),
                access: Access::Read,
            })?;
        writer.write_all(&data)?;
        hasher.update(&data);
    }

    writer.write_all(&hasher.finalize().to_le_bytes())?;
    writer.flush()?;

    let file = writer
        .into_inner()
        .map_err(|e| DelQueueError::Storage(format!("Failed to flush block image: {}", e)))?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;

    tracing::debug!(
        "wrote block image {} ({} blocks)",
        path.display(),
        manifest.block_count
    );
    Ok(())
}

/// Load a block image written by `write_image`
pub(crate) fn read_image(path: &Path, config: &Config) -> Result<BlockStore> {
    let bytes = fs::read(path)?;

    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(DelQueueError::Storage(format!(
            "Block image too short: {} bytes",
            bytes.len()
        )));
    }

    let (body, mut footer) = bytes.split_at(bytes.len() - FOOTER_SIZE);
    let expected_crc = footer.get_u32_le();
    let actual_crc = crc32fast::hash(body);
    if expected_crc != actual_crc {
        return Err(DelQueueError::Storage(format!(
            "Block image checksum mismatch: expected {:08x}, got {:08x}",
            expected_crc, actual_crc
        )));
    }

    if &body[0..4] != MAGIC {
        return Err(DelQueueError::Storage(format!(
            "Invalid block image magic: expected DQIM, got {:?}",
            &body[0..4]
        )));
    }

    let mut header = &body[4..HEADER_SIZE];
    let version = header.get_u16_le();
    if version != VERSION {
        return Err(DelQueueError::Storage(format!(
            "Unsupported block image version: {}",
            version
        )));
    }
    let manifest_len = header.get_u32_le() as usize;

    let manifest_end = HEADER_SIZE + manifest_len;
    if manifest_end > body.len() {
        return Err(DelQueueError::Storage(
            "Block image manifest overruns file".to_string(),
        ));
    }
    let manifest: ImageManifest = bincode::deserialize(&body[HEADER_SIZE..manifest_end])
        .map_err(|e| DelQueueError::Serialization(e.to_string()))?;

    if manifest.block_size != config.block_size {
        return Err(DelQueueError::Config(format!(
            "Block image uses block size {}, configuration says {}",
            manifest.block_size, config.block_size
        )));
    }

    let block_size = manifest.block_size as usize;
    let data = &body[manifest_end..];
    if data.len() != block_size * manifest.block_count as usize {
        return Err(DelQueueError::Storage(format!(
            "Block image holds {} data bytes, expected {} blocks of {}",
            data.len(),
            manifest.block_count,
            block_size
        )));
    }

    let blocks = data
        .chunks_exact(block_size)
        .map(|chunk| chunk.to_vec().into_boxed_slice())
        .collect();

    Ok(BlockStore::from_parts(
        block_size,
        config.lock_timeout(),
        blocks,
        manifest.free_blocks,
    ))
}

/// True if a block image exists at `path`
pub(crate) fn image_exists(path: &Path) -> bool {
    path.is_file()
}
