// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;

/// IPMI network function (request form).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NetFn(pub u8);

impl NetFn {
    /// Controller-specific OEM network function used by the BIOS update
    /// command set.
    pub const OEM: Self = Self(0x30);
}

impl fmt::Display for NetFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Network function and responder LUN packed into the single byte that
/// appears on the wire (`netfn << 2 | lun`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NetFnLun(u8);

impl NetFnLun {
    pub const OEM: Self = Self::new(NetFn::OEM, 0);

    /// `lun` is truncated to its low two bits.
    pub const fn new(netfn: NetFn, lun: u8) -> Self {
        Self((netfn.0 << 2) | (lun & 0x03))
    }

    pub const fn netfn(self) -> NetFn {
        NetFn(self.0 >> 2)
    }

    pub const fn lun(self) -> u8 {
        self.0 & 0x03
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for NetFnLun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetFnLun")
            .field("netfn", &self.netfn())
            .field("lun", &self.lun())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oem_netfn_lun_packing() {
        assert_eq!(NetFnLun::OEM.as_u8(), 0xc0);
        assert_eq!(NetFnLun::OEM.netfn(), NetFn::OEM);
        assert_eq!(NetFnLun::OEM.lun(), 0);

        let n = NetFnLun::new(NetFn(0x06), 0x07);
        assert_eq!(n.netfn(), NetFn(0x06));
        assert_eq!(n.lun(), 0x03);
        assert_eq!(NetFn::OEM.to_string(), "0x30");
    }
}
