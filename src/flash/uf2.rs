//! UF2 container parsing.
//!
//! ```text
//!  off  size  field
//!    0    4   magic 0x0A324655
//!    4    4   magic 0x9E5D5157
//!    8    4   flags
//!   12    4   target address
//!   16    4   payload size (≤ 476)
//!   20    4   block number
//!   24    4   block count
//!   28    4   family id
//!   32  476   payload
//!  508    4   magic 0x0AB16F30
//! ```

use super::FlashError;

pub const BLOCK_SIZE: usize = 512;
const MAGIC_START0: u32 = 0x0A32_4655;
const MAGIC_START1: u32 = 0x9E5D_5157;
const MAGIC_END: u32 = 0x0AB1_6F30;
const DATA_OFFSET: usize = 32;
const MAX_DATA: usize = 476;

const FLAG_NOT_MAIN_FLASH: u32 = 0x0000_0001;
const FLAG_FAMILY_ID: u32 = 0x0000_2000;

/// Payload bytes written per block by [`encode`].
pub const ENCODE_DATA: usize = 256;

fn word(block: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([block[off], block[off + 1], block[off + 2], block[off + 3]])
}

/// Extract `(family id, image)`.  Blocks must be numbered sequentially and
/// target contiguous addresses.
pub fn parse(data: &[u8]) -> Result<(u32, Vec<u8>), FlashError> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(FlashError::InvalidImage("UF2 length not a multiple of 512"));
    }
    let mut family = None;
    let mut image = Vec::new();
    let mut next_addr = None;
    let mut expected_block = 0u32;

    for block in data.chunks_exact(BLOCK_SIZE) {
        if word(block, 0) != MAGIC_START0
            || word(block, 4) != MAGIC_START1
            || word(block, BLOCK_SIZE - 4) != MAGIC_END
        {
            return Err(FlashError::InvalidImage("bad UF2 magic"));
        }
        let flags = word(block, 8);
        if flags & FLAG_NOT_MAIN_FLASH != 0 {
            continue;
        }
        if flags & FLAG_FAMILY_ID == 0 {
            return Err(FlashError::InvalidImage("UF2 block without family id"));
        }
        let block_family = word(block, 28);
        if *family.get_or_insert(block_family) != block_family {
            return Err(FlashError::InvalidImage("mixed UF2 families"));
        }
        if word(block, 20) != expected_block {
            return Err(FlashError::InvalidImage("UF2 blocks out of order"));
        }
        expected_block += 1;

        let addr = word(block, 12);
        let len = word(block, 16) as usize;
        if len > MAX_DATA {
            return Err(FlashError::InvalidImage("UF2 payload too large"));
        }
        if next_addr.is_some_and(|a| a != addr) {
            return Err(FlashError::InvalidImage("UF2 image not contiguous"));
        }
        next_addr = Some(addr.wrapping_add(len as u32));
        image.extend_from_slice(&block[DATA_OFFSET..DATA_OFFSET + len]);
    }

    match family {
        Some(f) if !image.is_empty() => Ok((f, image)),
        _ => Err(FlashError::InvalidImage("UF2 contains no flash data")),
    }
}

/// Wrap `image` in a UF2 container, [`ENCODE_DATA`] bytes per block.
pub fn encode(family: u32, base_addr: u32, image: &[u8]) -> Vec<u8> {
    let count = image.len().div_ceil(ENCODE_DATA) as u32;
    let mut out = Vec::with_capacity(count as usize * BLOCK_SIZE);
    for (i, chunk) in image.chunks(ENCODE_DATA).enumerate() {
        let mut block = [0u8; BLOCK_SIZE];
        let header = [
            MAGIC_START0,
            MAGIC_START1,
            FLAG_FAMILY_ID,
            base_addr + (i * ENCODE_DATA) as u32,
            chunk.len() as u32,
            i as u32,
            count,
            family,
        ];
        for (slot, w) in block.chunks_exact_mut(4).zip(header) {
            slot.copy_from_slice(&w.to_le_bytes());
        }
        block[DATA_OFFSET..DATA_OFFSET + chunk.len()].copy_from_slice(chunk);
        block[BLOCK_SIZE - 4..].copy_from_slice(&MAGIC_END.to_le_bytes());
        out.extend_from_slice(&block);
    }
    out
}
