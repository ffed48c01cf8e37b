use crate::buffer::PAGE_SIZE;
use crate::error::{PalletDBError, PalletDBResult};
use crate::storage::codec::{check_page_size, CommonCodec, DecodedData};
use crate::storage::page::{HeaderPage, HEADER_NAME_SIZE};

pub struct HeaderPageCodec;

impl HeaderPageCodec {
    pub fn encode(page: &HeaderPage) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend(CommonCodec::encode_u32(page.records().len() as u32));
        for (name, root_page_id) in page.records().iter() {
            let mut name_bytes = [0u8; HEADER_NAME_SIZE];
            name_bytes[..name.len()].copy_from_slice(name.as_bytes());
            bytes.extend_from_slice(&name_bytes);
            bytes.extend(CommonCodec::encode_i32(*root_page_id));
        }
        assert!(bytes.len() <= PAGE_SIZE);
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> PalletDBResult<DecodedData<HeaderPage>> {
        check_page_size(bytes)?;
        let (count, offset) = CommonCodec::decode_u32(bytes)?;
        let mut left_bytes = &bytes[offset..];

        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name_bytes = &left_bytes[..HEADER_NAME_SIZE];
            let end = name_bytes
                .iter()
                .position(|b| *b == 0)
                .unwrap_or(HEADER_NAME_SIZE);
            let name = std::str::from_utf8(&name_bytes[..end])
                .map_err(|e| {
                    PalletDBError::Storage(format!("Invalid index name in header page: {}", e))
                })?
                .to_string();
            left_bytes = &left_bytes[HEADER_NAME_SIZE..];
            let (root_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            records.push((name, root_page_id));
        }

        Ok((HeaderPage::from_records(records), PAGE_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_header_page_roundtrip() {
        let mut header = HeaderPage::new();
        header.insert_record("orders_pk", 5);
        header.insert_record("users_email", -1);

        let bytes = HeaderPageCodec::encode(&header);
        let (decoded, _) = HeaderPageCodec::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    pub fn test_zeroed_page_decodes_empty() {
        let bytes = vec![0u8; PAGE_SIZE];
        let (decoded, _) = HeaderPageCodec::decode(&bytes).unwrap();
        assert!(decoded.records().is_empty());
    }
}
