// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Requests sent to the BMC, one struct per OEM command.

use crate::check_response_len;
use crate::deserialize_fixed;
use crate::serialize_fixed;
use crate::DecodeError;
use crate::NetFnLun;
use crate::OemCommand;
use crate::ProductId;
use crate::StartUpgradeResponse;
use crate::UpgradeProgress;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use hubpack::SerializedSize;
use serde::Deserialize;
use serde::Serialize;
use static_assertions::const_assert_eq;

/// Opaque handle the BMC assigns to a BIOS transfer in response to
/// [`StartUpgrade`]; every later command of that transfer must echo it.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    SerializedSize,
    Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct TransferId(pub u16);

impl fmt::Debug for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferId({:#06x})", self.0)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl From<u16> for TransferId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

/// Sub-selector carried in the request of the BIOS information command.
///
/// Version and date share a command byte and differ only in this field.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    SerializedSize,
    Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct BiosInfoSelector(pub u16);

impl BiosInfoSelector {
    pub const VERSION: Self = Self(0);
    pub const DATE: Self = Self(1);
}

/// Command byte shared by [`QueryBiosVersion`] and [`QueryBiosDate`].
pub const BIOS_INFO_CODE: u8 = 0xac;

/// Ask the BMC to open a BIOS transfer for an image of `image_size` bytes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    SerializedSize,
    Serialize,
    Deserialize,
)]
pub struct StartUpgrade {
    pub image_size: u32,
}

/// One slice of the image, starting at `offset`.
///
/// `data` follows the fixed head on the wire and must be no longer than the
/// transfer's maximum chunk size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadChunk {
    pub transfer_id: TransferId,
    pub offset: u32,
    pub data: Vec<u8>,
}

/// Fixed portion of an [`UploadChunk`] request.
#[derive(Debug, Clone, Copy, SerializedSize, Serialize, Deserialize)]
struct UploadChunkHeader {
    transfer_id: TransferId,
    offset: u32,
}

/// Ask the BMC to write every uploaded chunk to flash.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    SerializedSize,
    Serialize,
    Deserialize,
)]
pub struct FlashImage {
    pub transfer_id: TransferId,
    pub flag: u32,
}

/// Abort a transfer and release its ID without committing anything.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    SerializedSize,
    Serialize,
    Deserialize,
)]
pub struct CancelUpgrade {
    pub transfer_id: TransferId,
}

/// Commit a completed flash and release the transfer ID.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    SerializedSize,
    Serialize,
    Deserialize,
)]
pub struct FinalizeUpgrade {
    pub transfer_id: TransferId,
}

/// Read how far along an in-progress flash is.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    SerializedSize,
    Serialize,
    Deserialize,
)]
pub struct QueryProgress {
    pub transfer_id: TransferId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryProductId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryBiosVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryBiosDate;

// Wire widths of every fixed-size request head.
const_assert_eq!(TransferId::MAX_SIZE, 2);
const_assert_eq!(BiosInfoSelector::MAX_SIZE, 2);
const_assert_eq!(StartUpgrade::MAX_SIZE, 4);
const_assert_eq!(UploadChunkHeader::MAX_SIZE, 6);
const_assert_eq!(FlashImage::MAX_SIZE, 6);
const_assert_eq!(CancelUpgrade::MAX_SIZE, 2);
const_assert_eq!(FinalizeUpgrade::MAX_SIZE, 2);
const_assert_eq!(QueryProgress::MAX_SIZE, 2);

impl UploadChunk {
    /// Size of the request head that precedes `data`.
    pub const HEADER_LEN: usize = UploadChunkHeader::MAX_SIZE;
}

impl OemCommand for StartUpgrade {
    const CODE: u8 = 0x61;
    const NAME: &'static str = "start BIOS upgrade";
    const MIN_RESPONSE_LEN: usize = StartUpgradeResponse::MAX_SIZE;

    type Response = StartUpgradeResponse;

    fn encode_request(&self, out: &mut Vec<u8>) {
        serialize_fixed(out, self);
    }

    fn decode_response(data: &[u8]) -> Result<Self::Response, DecodeError> {
        deserialize_fixed(Self::NAME, data)
    }
}

impl OemCommand for UploadChunk {
    const CODE: u8 = 0x62;
    const NAME: &'static str = "upload BIOS chunk";
    const MIN_RESPONSE_LEN: usize = 0;

    type Response = ();

    fn encode_request(&self, out: &mut Vec<u8>) {
        out.reserve(Self::HEADER_LEN + self.data.len());
        serialize_fixed(
            out,
            &UploadChunkHeader {
                transfer_id: self.transfer_id,
                offset: self.offset,
            },
        );
        out.extend_from_slice(&self.data);
    }

    fn decode_response(_data: &[u8]) -> Result<(), DecodeError> {
        Ok(())
    }
}

impl OemCommand for FlashImage {
    const CODE: u8 = 0x63;
    const NAME: &'static str = "flash BIOS";
    const MIN_RESPONSE_LEN: usize = 0;

    type Response = ();

    fn encode_request(&self, out: &mut Vec<u8>) {
        serialize_fixed(out, self);
    }

    fn decode_response(_data: &[u8]) -> Result<(), DecodeError> {
        Ok(())
    }
}

impl OemCommand for CancelUpgrade {
    const CODE: u8 = 0x64;
    const NAME: &'static str = "cancel BIOS update";
    const MIN_RESPONSE_LEN: usize = 0;

    type Response = ();

    fn encode_request(&self, out: &mut Vec<u8>) {
        serialize_fixed(out, self);
    }

    fn decode_response(_data: &[u8]) -> Result<(), DecodeError> {
        Ok(())
    }
}

impl OemCommand for FinalizeUpgrade {
    const CODE: u8 = 0x65;
    const NAME: &'static str = "finalize BIOS update";
    const MIN_RESPONSE_LEN: usize = 0;

    type Response = ();

    fn encode_request(&self, out: &mut Vec<u8>) {
        serialize_fixed(out, self);
    }

    fn decode_response(_data: &[u8]) -> Result<(), DecodeError> {
        Ok(())
    }
}

impl OemCommand for QueryProgress {
    const CODE: u8 = 0x66;
    const NAME: &'static str = "BIOS update progress";
    const MIN_RESPONSE_LEN: usize = UpgradeProgress::MAX_SIZE;

    type Response = UpgradeProgress;

    fn encode_request(&self, out: &mut Vec<u8>) {
        serialize_fixed(out, self);
    }

    fn decode_response(data: &[u8]) -> Result<Self::Response, DecodeError> {
        deserialize_fixed(Self::NAME, data)
    }
}

impl OemCommand for QueryProductId {
    const CODE: u8 = 0x21;
    const NAME: &'static str = "get product ID";
    const MIN_RESPONSE_LEN: usize = ProductId::MAX_SIZE;

    type Response = ProductId;

    fn encode_request(&self, _out: &mut Vec<u8>) {}

    fn decode_response(data: &[u8]) -> Result<Self::Response, DecodeError> {
        deserialize_fixed(Self::NAME, data)
    }
}

impl OemCommand for QueryBiosVersion {
    const CODE: u8 = BIOS_INFO_CODE;
    const NAME: &'static str = "get BIOS version";
    const MIN_RESPONSE_LEN: usize = 1;

    type Response = String;

    fn encode_request(&self, out: &mut Vec<u8>) {
        serialize_fixed(out, &BiosInfoSelector::VERSION);
    }

    fn decode_response(data: &[u8]) -> Result<String, DecodeError> {
        decode_bios_string(Self::NAME, Self::MIN_RESPONSE_LEN, data)
    }
}

impl OemCommand for QueryBiosDate {
    const CODE: u8 = BIOS_INFO_CODE;
    const NAME: &'static str = "get BIOS date";
    const MIN_RESPONSE_LEN: usize = 1;

    type Response = String;

    fn encode_request(&self, out: &mut Vec<u8>) {
        serialize_fixed(out, &BiosInfoSelector::DATE);
    }

    fn decode_response(data: &[u8]) -> Result<String, DecodeError> {
        decode_bios_string(Self::NAME, Self::MIN_RESPONSE_LEN, data)
    }
}

/// The whole response body is the string; invalid UTF-8 is replaced rather
/// than rejected.
fn decode_bios_string(
    command: &'static str,
    min_len: usize,
    data: &[u8],
) -> Result<String, DecodeError> {
    check_response_len(command, data, min_len)?;
    Ok(String::from_utf8_lossy(data).into_owned())
}

macro_rules! oem_requests {
    ($($name:ident),+ $(,)?) => {
        /// Every command a transport can be asked to carry.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum OemRequest {
            $($name($name),)+
        }

        $(
            impl From<$name> for OemRequest {
                fn from(command: $name) -> Self {
                    Self::$name(command)
                }
            }
        )+

        impl OemRequest {
            pub fn code(&self) -> u8 {
                match self {
                    $(Self::$name(_) => <$name as OemCommand>::CODE,)+
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$name(_) => <$name as OemCommand>::NAME,)+
                }
            }

            pub fn netfn_lun(&self) -> NetFnLun {
                match self {
                    $(Self::$name(_) => <$name as OemCommand>::NETFN_LUN,)+
                }
            }

            pub fn min_response_len(&self) -> usize {
                match self {
                    $(
                        Self::$name(_) => {
                            <$name as OemCommand>::MIN_RESPONSE_LEN
                        }
                    )+
                }
            }

            /// Encode the request body (not including NetFn/LUN or command
            /// byte).
            pub fn encode(&self) -> Vec<u8> {
                let mut out = Vec::new();
                match self {
                    $(Self::$name(command) => command.encode_request(&mut out),)+
                }
                out
            }
        }
    };
}

oem_requests! {
    StartUpgrade,
    UploadChunk,
    FlashImage,
    CancelUpgrade,
    FinalizeUpgrade,
    QueryProgress,
    QueryProductId,
    QueryBiosVersion,
    QueryBiosDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_chunk_length_is_head_plus_data() {
        for len in [0, 1, 7, 255] {
            let request = OemRequest::from(UploadChunk {
                transfer_id: TransferId(1),
                offset: 0,
                data: vec![0xa5; len],
            });
            assert_eq!(request.encode().len(), 2 + 4 + len);
        }
    }

    #[test]
    fn bios_queries_share_code_but_not_selector() {
        let version = OemRequest::from(QueryBiosVersion);
        let date = OemRequest::from(QueryBiosDate);
        assert_eq!(version.code(), date.code());
        assert_eq!(version.netfn_lun(), date.netfn_lun());
        assert_ne!(version.encode(), date.encode());
    }

    #[test]
    fn request_metadata() {
        let cases: &[(OemRequest, u8, usize)] = &[
            (StartUpgrade { image_size: 0 }.into(), 0x61, 6),
            (
                UploadChunk {
                    transfer_id: TransferId(0),
                    offset: 0,
                    data: vec![],
                }
                .into(),
                0x62,
                0,
            ),
            (FlashImage { transfer_id: TransferId(0), flag: 0 }.into(), 0x63, 0),
            (CancelUpgrade { transfer_id: TransferId(0) }.into(), 0x64, 0),
            (FinalizeUpgrade { transfer_id: TransferId(0) }.into(), 0x65, 0),
            (QueryProgress { transfer_id: TransferId(0) }.into(), 0x66, 1),
            (QueryProductId.into(), 0x21, 2),
            (QueryBiosVersion.into(), 0xac, 1),
            (QueryBiosDate.into(), 0xac, 1),
        ];
        for (request, code, min_len) in cases {
            assert_eq!(request.code(), *code, "{request:?}");
            assert_eq!(request.min_response_len(), *min_len, "{request:?}");
            assert_eq!(request.netfn_lun(), NetFnLun::OEM, "{request:?}");
        }
    }

    #[test]
    fn transfer_id_formatting() {
        assert_eq!(TransferId(0x1a).to_string(), "0x001a");
        assert_eq!(format!("{:?}", TransferId(0xbeef)), "TransferId(0xbeef)");
    }
}
