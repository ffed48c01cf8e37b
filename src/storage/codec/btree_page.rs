use crate::buffer::PAGE_SIZE;
use crate::error::{PalletDBError, PalletDBResult};
use crate::storage::codec::{check_page_size, CommonCodec, DecodedData, RidCodec};
use crate::storage::index::comparator::KeyComparator;
use crate::storage::page::{
    BPlusTreeInternalPage, BPlusTreeInternalPageHeader, BPlusTreeLeafPage,
    BPlusTreeLeafPageHeader, BPlusTreePage, BPlusTreePageType,
};

pub struct BPlusTreePageTypeCodec;

impl BPlusTreePageTypeCodec {
    pub fn encode(page_type: &BPlusTreePageType) -> Vec<u8> {
        match page_type {
            BPlusTreePageType::LeafPage => CommonCodec::encode_u8(1),
            BPlusTreePageType::InternalPage => CommonCodec::encode_u8(2),
        }
    }

    pub fn decode(bytes: &[u8]) -> PalletDBResult<DecodedData<BPlusTreePageType>> {
        let (tag, offset) = CommonCodec::decode_u8(bytes)?;
        match tag {
            1 => Ok((BPlusTreePageType::LeafPage, offset)),
            2 => Ok((BPlusTreePageType::InternalPage, offset)),
            other => Err(PalletDBError::Storage(format!(
                "Unknown b+tree page type tag {}",
                other
            ))),
        }
    }
}

pub struct BPlusTreePageCodec;

impl BPlusTreePageCodec {
    pub fn encode(page: &BPlusTreePage) -> Vec<u8> {
        match page {
            BPlusTreePage::Leaf(page) => BPlusTreeLeafPageCodec::encode(page),
            BPlusTreePage::Internal(page) => BPlusTreeInternalPageCodec::encode(page),
        }
    }

    pub fn decode(
        bytes: &[u8],
        comparator: KeyComparator,
    ) -> PalletDBResult<DecodedData<BPlusTreePage>> {
        check_page_size(bytes)?;
        let (page_type, _) = BPlusTreePageTypeCodec::decode(bytes)?;
        match page_type {
            BPlusTreePageType::LeafPage => {
                let (page, offset) = BPlusTreeLeafPageCodec::decode(bytes, comparator)?;
                Ok((BPlusTreePage::Leaf(page), offset))
            }
            BPlusTreePageType::InternalPage => {
                let (page, offset) = BPlusTreeInternalPageCodec::decode(bytes, comparator)?;
                Ok((BPlusTreePage::Internal(page), offset))
            }
        }
    }
}

pub struct BPlusTreeLeafPageCodec;

impl BPlusTreeLeafPageCodec {
    pub fn encode(page: &BPlusTreeLeafPage) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend(BPlusTreePageTypeCodec::encode(&page.header.page_type));
        bytes.extend(CommonCodec::encode_u32(page.header.current_size));
        bytes.extend(CommonCodec::encode_u32(page.header.max_size));
        bytes.extend(CommonCodec::encode_i32(page.header.parent_page_id));
        bytes.extend(CommonCodec::encode_i32(page.header.page_id));
        bytes.extend(CommonCodec::encode_i32(page.header.next_page_id));
        for (key, rid) in page.array.iter() {
            bytes.extend(CommonCodec::encode_bytes(key));
            bytes.extend(RidCodec::encode(rid));
        }
        assert!(bytes.len() <= PAGE_SIZE);
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(
        bytes: &[u8],
        comparator: KeyComparator,
    ) -> PalletDBResult<DecodedData<BPlusTreeLeafPage>> {
        check_page_size(bytes)?;
        let (page_type, _) = BPlusTreePageTypeCodec::decode(bytes)?;
        if page_type != BPlusTreePageType::LeafPage {
            return Err(PalletDBError::Storage(
                "Page type must be leaf page".to_string(),
            ));
        }
        let mut left_bytes = &bytes[1..];

        let (current_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (max_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (parent_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (next_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        let mut array = Vec::with_capacity(current_size as usize);
        for _ in 0..current_size {
            let (key, offset) = CommonCodec::decode_bytes(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            let (rid, offset) = RidCodec::decode(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            array.push((key, rid));
        }

        let mut page = BPlusTreeLeafPage::with_comparator(
            page_id,
            parent_page_id,
            max_size,
            comparator,
        );
        page.header = BPlusTreeLeafPageHeader {
            page_type,
            current_size,
            max_size,
            parent_page_id,
            page_id,
            next_page_id,
        };
        page.array = array;
        Ok((page, PAGE_SIZE))
    }
}

pub struct BPlusTreeInternalPageCodec;

impl BPlusTreeInternalPageCodec {
    pub fn encode(page: &BPlusTreeInternalPage) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend(BPlusTreePageTypeCodec::encode(&page.header.page_type));
        bytes.extend(CommonCodec::encode_u32(page.header.current_size));
        bytes.extend(CommonCodec::encode_u32(page.header.max_size));
        bytes.extend(CommonCodec::encode_i32(page.header.parent_page_id));
        bytes.extend(CommonCodec::encode_i32(page.header.page_id));
        for (key, child_page_id) in page.array.iter() {
            bytes.extend(CommonCodec::encode_bytes(key));
            bytes.extend(CommonCodec::encode_i32(*child_page_id));
        }
        assert!(bytes.len() <= PAGE_SIZE);
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(
        bytes: &[u8],
        comparator: KeyComparator,
    ) -> PalletDBResult<DecodedData<BPlusTreeInternalPage>> {
        check_page_size(bytes)?;
        let (page_type, _) = BPlusTreePageTypeCodec::decode(bytes)?;
        if page_type != BPlusTreePageType::InternalPage {
            return Err(PalletDBError::Storage(
                "Page type must be internal page".to_string(),
            ));
        }
        let mut left_bytes = &bytes[1..];

        let (current_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (max_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (parent_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        let mut array = Vec::with_capacity(current_size as usize);
        for _ in 0..current_size {
            let (key, offset) = CommonCodec::decode_bytes(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            let (child_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            array.push((key, child_page_id));
        }

        let mut page = BPlusTreeInternalPage::with_comparator(
            page_id,
            parent_page_id,
            max_size,
            comparator,
        );
        page.header = BPlusTreeInternalPageHeader {
            page_type,
            current_size,
            max_size,
            parent_page_id,
            page_id,
        };
        page.array = array;
        Ok((page, PAGE_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::INVALID_PAGE_ID;
    use crate::storage::index::comparator::default_comparator;
    use crate::storage::page::RecordId;

    #[test]
    pub fn test_leaf_page_roundtrip() {
        let mut leaf = BPlusTreeLeafPage::new(3, 1, 10);
        leaf.header.next_page_id = 4;
        leaf.insert(b"apple", RecordId::new(1, 1));
        leaf.insert(b"banana", RecordId::new(2, 2));

        let bytes = BPlusTreeLeafPageCodec::encode(&leaf);
        assert_eq!(bytes.len(), PAGE_SIZE);
        let (decoded, _) = BPlusTreeLeafPageCodec::decode(&bytes, default_comparator).unwrap();
        assert_eq!(decoded, leaf);
    }

    #[test]
    pub fn test_internal_page_roundtrip() {
        let mut internal = BPlusTreeInternalPage::new(7, INVALID_PAGE_ID, 10);
        internal.populate_new_root(3, b"melon", 4);

        let bytes = BPlusTreeInternalPageCodec::encode(&internal);
        let (decoded, _) = BPlusTreeInternalPageCodec::decode(&bytes, default_comparator).unwrap();
        assert_eq!(decoded, internal);
    }

    #[test]
    pub fn test_dispatch_by_page_type() {
        let leaf = BPlusTreeLeafPage::new(3, 1, 10);
        let bytes = BPlusTreeLeafPageCodec::encode(&leaf);
        let (page, _) = BPlusTreePageCodec::decode(&bytes, default_comparator).unwrap();
        assert!(page.is_leaf());

        assert!(BPlusTreeInternalPageCodec::decode(&bytes, default_comparator).is_err());
    }
}
