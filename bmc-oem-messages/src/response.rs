// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-size response bodies returned by the BMC.

use crate::TransferId;
use hubpack::SerializedSize;
use serde::Deserialize;
use serde::Serialize;
use static_assertions::const_assert_eq;

/// Reply to [`crate::StartUpgrade`].
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
pub struct StartUpgradeResponse {
    pub transfer_id: TransferId,
    /// Largest `data` payload the BMC accepts in one
    /// [`crate::UploadChunk`].
    pub max_chunk_size: u32,
}

/// Reply to [`crate::QueryProgress`].
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
pub struct UpgradeProgress {
    /// Flash completion in percent; 100 or more means the flash is done.
    pub completion_percent: u8,
}

impl UpgradeProgress {
    pub fn is_complete(&self) -> bool {
        self.completion_percent >= 100
    }
}

/// Reply to [`crate::QueryProductId`].
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
pub struct ProductId {
    pub board_model_id: u16,
}

const_assert_eq!(StartUpgradeResponse::MAX_SIZE, 6);
const_assert_eq!(UpgradeProgress::MAX_SIZE, 1);
const_assert_eq!(ProductId::MAX_SIZE, 2);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DecodeError;
    use crate::OemCommand;
    use crate::QueryBiosDate;
    use crate::QueryBiosVersion;
    use crate::QueryProductId;
    use crate::QueryProgress;
    use crate::StartUpgrade;

    // Every prefix shorter than the minimum must fail with `ResponseTooShort`
    // carrying the actual length.
    fn assert_short_prefixes_rejected<C: OemCommand>(full: &[u8])
    where
        C::Response: std::fmt::Debug,
    {
        for len in 0..C::MIN_RESPONSE_LEN {
            match C::decode_response(&full[..len]) {
                Err(DecodeError::ResponseTooShort { command, expected, got }) => {
                    assert_eq!(command, C::NAME);
                    assert_eq!(expected, C::MIN_RESPONSE_LEN);
                    assert_eq!(got, len);
                }
                other => panic!("{}: len {len} gave {other:?}", C::NAME),
            }
        }
    }

    #[test]
    fn start_upgrade_response() {
        let data = [0x34, 0x12, 0x00, 0x10, 0x00, 0x00];
        assert_short_prefixes_rejected::<StartUpgrade>(&data);
        assert_eq!(
            StartUpgrade::decode_response(&data).unwrap(),
            StartUpgradeResponse {
                transfer_id: TransferId(0x1234),
                max_chunk_size: 0x1000,
            }
        );

        // Surplus bytes are ignored.
        let mut long = data.to_vec();
        long.extend_from_slice(&[0xde, 0xad]);
        assert_eq!(
            StartUpgrade::decode_response(&long).unwrap().max_chunk_size,
            0x1000
        );
    }

    #[test]
    fn progress_response() {
        let data = [99, 0xff];
        assert_short_prefixes_rejected::<QueryProgress>(&data);
        let progress = QueryProgress::decode_response(&data).unwrap();
        assert_eq!(progress.completion_percent, 99);
        assert!(!progress.is_complete());
        assert!(QueryProgress::decode_response(&[100]).unwrap().is_complete());
        assert!(QueryProgress::decode_response(&[101]).unwrap().is_complete());
    }

    #[test]
    fn product_id_response() {
        let data = [0x3d, 0x09];
        assert_short_prefixes_rejected::<QueryProductId>(&data);
        assert_eq!(
            QueryProductId::decode_response(&data).unwrap(),
            ProductId { board_model_id: 0x093d }
        );
    }

    #[test]
    fn bios_string_responses() {
        assert_short_prefixes_rejected::<QueryBiosVersion>(b"1.4");
        assert_short_prefixes_rejected::<QueryBiosDate>(b"x");
        assert_eq!(QueryBiosVersion::decode_response(b"3.4a").unwrap(), "3.4a");
        assert_eq!(
            QueryBiosDate::decode_response(b"04/12/2023").unwrap(),
            "04/12/2023"
        );
        // Not valid UTF-8; still decodes.
        assert_eq!(
            QueryBiosVersion::decode_response(&[b'v', 0xff]).unwrap(),
            "v\u{fffd}"
        );
    }

    #[test]
    fn bodyless_responses_accept_anything() {
        use crate::CancelUpgrade;
        use crate::FinalizeUpgrade;
        use crate::FlashImage;
        use crate::UploadChunk;

        for data in [&[][..], &[0x00][..], &[1, 2, 3, 4, 5][..]] {
            UploadChunk::decode_response(data).unwrap();
            FlashImage::decode_response(data).unwrap();
            CancelUpgrade::decode_response(data).unwrap();
            FinalizeUpgrade::decode_response(data).unwrap();
        }
    }

    #[test]
    fn responses_render_as_json() {
        let response = StartUpgradeResponse {
            transfer_id: TransferId(7),
            max_chunk_size: 256,
        };
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"transfer_id":7,"max_chunk_size":256}"#
        );
        assert_eq!(
            serde_json::to_string(&ProductId { board_model_id: 2365 })
                .unwrap(),
            r#"{"board_model_id":2365}"#
        );
    }
}
