use crate::error::{PalletDBError, PalletDBResult};
use crate::storage::codec::DecodedData;

pub struct CommonCodec;

impl CommonCodec {
    pub fn encode_u8(data: u8) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u8(bytes: &[u8]) -> PalletDBResult<DecodedData<u8>> {
        if bytes.is_empty() {
            return Err(PalletDBError::Internal(format!(
                "bytes length {} is less than {}",
                bytes.len(),
                1
            )));
        }
        Ok((bytes[0], 1))
    }

    pub fn encode_u32(data: u32) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u32(bytes: &[u8]) -> PalletDBResult<DecodedData<u32>> {
        if bytes.len() < 4 {
            return Err(PalletDBError::Internal(format!(
                "bytes length {} is less than {}",
                bytes.len(),
                4
            )));
        }
        let data = [bytes[0], bytes[1], bytes[2], bytes[3]];
        Ok((u32::from_be_bytes(data), 4))
    }

    pub fn encode_i32(data: i32) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_i32(bytes: &[u8]) -> PalletDBResult<DecodedData<i32>> {
        if bytes.len() < 4 {
            return Err(PalletDBError::Internal(format!(
                "bytes length {} is less than {}",
                bytes.len(),
                4
            )));
        }
        let data = [bytes[0], bytes[1], bytes[2], bytes[3]];
        Ok((i32::from_be_bytes(data), 4))
    }

    pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + data.len());
        bytes.extend(CommonCodec::encode_u32(data.len() as u32));
        bytes.extend_from_slice(data);
        bytes
    }

    pub fn decode_bytes(bytes: &[u8]) -> PalletDBResult<DecodedData<Vec<u8>>> {
        let (length, offset) = CommonCodec::decode_u32(bytes)?;
        let length = length as usize;
        if bytes.len() < offset + length {
            return Err(PalletDBError::Internal(format!(
                "bytes length {} is less than expected {}",
                bytes.len(),
                offset + length
            )));
        }
        Ok((bytes[offset..offset + length].to_vec(), offset + length))
    }
}
