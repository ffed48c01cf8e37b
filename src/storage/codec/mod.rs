mod btree_page;
mod common;
mod hash_page;
mod header_page;

pub use btree_page::{
    BPlusTreeInternalPageCodec, BPlusTreeLeafPageCodec, BPlusTreePageCodec,
    BPlusTreePageTypeCodec,
};
pub use common::CommonCodec;
pub use hash_page::{HashTableBucketPageCodec, HashTableDirectoryPageCodec};
pub use header_page::HeaderPageCodec;

use crate::error::{PalletDBError, PalletDBResult};
use crate::storage::page::RecordId;

/// Decoded value plus the number of bytes consumed.
pub type DecodedData<T> = (T, usize);

pub struct RidCodec;

impl RidCodec {
    pub const SIZE: usize = 8;

    pub fn encode(rid: &RecordId) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SIZE);
        bytes.extend(CommonCodec::encode_i32(rid.page_id));
        bytes.extend(CommonCodec::encode_u32(rid.slot_num));
        bytes
    }

    pub fn decode(bytes: &[u8]) -> PalletDBResult<DecodedData<RecordId>> {
        let (page_id, offset1) = CommonCodec::decode_i32(bytes)?;
        let (slot_num, offset2) = CommonCodec::decode_u32(&bytes[offset1..])?;
        Ok((RecordId { page_id, slot_num }, offset1 + offset2))
    }
}

pub(crate) fn check_page_size(bytes: &[u8]) -> PalletDBResult<()> {
    use crate::buffer::PAGE_SIZE;
    if bytes.len() != PAGE_SIZE {
        return Err(PalletDBError::Storage(format!(
            "Page size is not {} instead of {}",
            PAGE_SIZE,
            bytes.len()
        )));
    }
    Ok(())
}
