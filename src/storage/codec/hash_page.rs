use crate::buffer::{PageId, PAGE_SIZE};
use crate::error::{PalletDBError, PalletDBResult};
use crate::storage::codec::{check_page_size, CommonCodec, DecodedData, RidCodec};
use crate::storage::page::{
    HashTableBucketPage, HashTableDirectoryPage, RecordId, DIRECTORY_ARRAY_SIZE,
};

pub struct HashTableBucketPageCodec;

impl HashTableBucketPageCodec {
    pub fn encode(page: &HashTableBucketPage) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend(CommonCodec::encode_u32(page.max_size));
        bytes.extend(CommonCodec::encode_u32(page.key_size));
        let (occupied, readable) = page.bitmaps();
        bytes.extend_from_slice(occupied);
        bytes.extend_from_slice(readable);
        for (key, rid) in page.slots().iter() {
            debug_assert_eq!(key.len(), page.key_size as usize);
            bytes.extend_from_slice(key);
            bytes.extend(RidCodec::encode(rid));
        }
        assert!(bytes.len() <= PAGE_SIZE);
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> PalletDBResult<DecodedData<HashTableBucketPage>> {
        check_page_size(bytes)?;
        let mut left_bytes = bytes;

        let (max_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (key_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        let bitmap_len = (max_size as usize + 7) / 8;
        let slot_bytes = key_size as usize + RidCodec::SIZE;
        if left_bytes.len() < 2 * bitmap_len + max_size as usize * slot_bytes {
            return Err(PalletDBError::Storage(format!(
                "Bucket page with {} slots of key size {} does not fit",
                max_size, key_size
            )));
        }

        let occupied = left_bytes[..bitmap_len].to_vec();
        left_bytes = &left_bytes[bitmap_len..];
        let readable = left_bytes[..bitmap_len].to_vec();
        left_bytes = &left_bytes[bitmap_len..];

        let mut array = Vec::with_capacity(max_size as usize);
        for _ in 0..max_size {
            let key = left_bytes[..key_size as usize].to_vec();
            left_bytes = &left_bytes[key_size as usize..];
            let (rid, offset) = RidCodec::decode(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            array.push((key, rid));
        }

        Ok((
            HashTableBucketPage::from_parts(max_size, key_size, occupied, readable, array),
            PAGE_SIZE,
        ))
    }
}

pub struct HashTableDirectoryPageCodec;

impl HashTableDirectoryPageCodec {
    pub fn encode(page: &HashTableDirectoryPage) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend(CommonCodec::encode_i32(page.page_id));
        bytes.extend(CommonCodec::encode_u32(page.get_global_depth()));
        let (local_depths, bucket_page_ids) = page.raw_parts();
        bytes.extend_from_slice(local_depths);
        for bucket_page_id in bucket_page_ids.iter() {
            bytes.extend(CommonCodec::encode_i32(*bucket_page_id));
        }
        assert!(bytes.len() <= PAGE_SIZE);
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> PalletDBResult<DecodedData<HashTableDirectoryPage>> {
        check_page_size(bytes)?;
        let mut left_bytes = bytes;

        let (page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (global_depth, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        let mut local_depths = [0u8; DIRECTORY_ARRAY_SIZE];
        local_depths.copy_from_slice(&left_bytes[..DIRECTORY_ARRAY_SIZE]);
        left_bytes = &left_bytes[DIRECTORY_ARRAY_SIZE..];

        let mut bucket_page_ids = [PageId::default(); DIRECTORY_ARRAY_SIZE];
        for slot in bucket_page_ids.iter_mut() {
            let (bucket_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            *slot = bucket_page_id;
        }

        Ok((
            HashTableDirectoryPage::from_parts(page_id, global_depth, local_depths, bucket_page_ids),
            PAGE_SIZE,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::index::comparator::default_comparator;

    #[test]
    pub fn test_bucket_page_roundtrip() {
        let mut bucket = HashTableBucketPage::new(8, 4);
        assert!(bucket.insert(b"aaaa", RecordId::new(1, 1), default_comparator));
        assert!(bucket.insert(b"bbbb", RecordId::new(2, 2), default_comparator));
        assert!(bucket.remove(b"aaaa", RecordId::new(1, 1), default_comparator));

        let bytes = HashTableBucketPageCodec::encode(&bucket);
        assert_eq!(bytes.len(), PAGE_SIZE);
        let (decoded, _) = HashTableBucketPageCodec::decode(&bytes).unwrap();
        assert_eq!(decoded, bucket);
        // Tombstone survives the roundtrip.
        assert!(decoded.is_occupied(0));
        assert!(!decoded.is_readable(0));
    }

    #[test]
    pub fn test_directory_page_roundtrip() {
        let mut dir = HashTableDirectoryPage::new(9);
        dir.set_bucket_page_id(0, 10);
        dir.set_bucket_page_id(1, 11);
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);
        dir.incr_global_depth();

        let bytes = HashTableDirectoryPageCodec::encode(&dir);
        let (decoded, _) = HashTableDirectoryPageCodec::decode(&bytes).unwrap();
        assert_eq!(decoded, dir);
        assert_eq!(decoded.get_global_depth(), 1);
        assert_eq!(decoded.get_bucket_page_id(1), 11);
    }
}
