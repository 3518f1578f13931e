// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The tests in this file pin the exact request bytes of every OEM command.
//!
//! If a test here fails, _do not change the test_: the BMC firmware defines
//! these layouts and will misinterpret anything else.

use bmc_oem_messages::CancelUpgrade;
use bmc_oem_messages::FinalizeUpgrade;
use bmc_oem_messages::FlashImage;
use bmc_oem_messages::OemRequest;
use bmc_oem_messages::QueryBiosDate;
use bmc_oem_messages::QueryBiosVersion;
use bmc_oem_messages::QueryProductId;
use bmc_oem_messages::QueryProgress;
use bmc_oem_messages::StartUpgrade;
use bmc_oem_messages::TransferId;
use bmc_oem_messages::UploadChunk;

fn assert_encoded(expected: &[u8], request: impl Into<OemRequest>) {
    let request = request.into();
    assert_eq!(expected, request.encode(), "incorrect encoding of {request:?}");
}

#[test]
fn start_upgrade() {
    #[rustfmt::skip]
    let expected = &[
        0x04, 0x03, 0x02, 0x01, // image_size
    ];
    assert_encoded(expected, StartUpgrade { image_size: 0x01020304 });
}

#[test]
fn upload_chunk() {
    #[rustfmt::skip]
    let expected = &[
        0x02, 0x01,             // transfer_id
        0x00, 0x10, 0x00, 0x00, // offset
        0xaa, 0xbb, 0xcc,       // data
    ];
    assert_encoded(
        expected,
        UploadChunk {
            transfer_id: TransferId(0x0102),
            offset: 0x1000,
            data: vec![0xaa, 0xbb, 0xcc],
        },
    );
}

#[test]
fn flash_image() {
    #[rustfmt::skip]
    let expected = &[
        0x02, 0x01,             // transfer_id
        0x01, 0x00, 0x00, 0x80, // flag
    ];
    assert_encoded(
        expected,
        FlashImage { transfer_id: TransferId(0x0102), flag: 0x8000_0001 },
    );
}

#[test]
fn transfer_id_only_requests() {
    let id = TransferId(0xbeef);
    assert_encoded(&[0xef, 0xbe], CancelUpgrade { transfer_id: id });
    assert_encoded(&[0xef, 0xbe], FinalizeUpgrade { transfer_id: id });
    assert_encoded(&[0xef, 0xbe], QueryProgress { transfer_id: id });
}

#[test]
fn queries() {
    assert_encoded(&[], QueryProductId);
    assert_encoded(&[0x00, 0x00], QueryBiosVersion);
    assert_encoded(&[0x01, 0x00], QueryBiosDate);
}

#[test]
fn command_codes() {
    let id = TransferId(0);
    let cases: Vec<(OemRequest, u8)> = vec![
        (StartUpgrade { image_size: 0 }.into(), 0x61),
        (UploadChunk { transfer_id: id, offset: 0, data: vec![] }.into(), 0x62),
        (FlashImage { transfer_id: id, flag: 0 }.into(), 0x63),
        (CancelUpgrade { transfer_id: id }.into(), 0x64),
        (FinalizeUpgrade { transfer_id: id }.into(), 0x65),
        (QueryProgress { transfer_id: id }.into(), 0x66),
        (QueryProductId.into(), 0x21),
        (QueryBiosVersion.into(), 0xac),
        (QueryBiosDate.into(), 0xac),
    ];
    for (request, code) in cases {
        assert_eq!(request.code(), code, "{}", request.name());
        assert_eq!(request.netfn_lun().as_u8(), 0xc0, "{}", request.name());
    }
}
