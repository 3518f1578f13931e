// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]

//! Wire types for the OEM BIOS update command set exposed by the BMC.
//!
//! Each command is a plain struct implementing [`OemCommand`], which knows its
//! command byte, how to encode its request body, and how to decode (and
//! length-check) the controller's response body. The closed set of commands a
//! transport is able to carry is [`OemRequest`].
//!
//! All multi-byte integers are little-endian. Fixed-size request heads and
//! response bodies are (de)serialized with `hubpack`, which lays fields out in
//! declaration order at their native width; variable-length data (upload
//! chunks, BIOS strings) is carried as trailing bytes.

extern crate alloc;

mod netfn;
mod request;
mod response;

use alloc::vec::Vec;
use core::fmt;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use hubpack::error::Error as HubpackError;
pub use hubpack::SerializedSize;

pub use netfn::*;
pub use request::*;
pub use response::*;

/// A single OEM command: its identity, request encoding, and response
/// decoding.
pub trait OemCommand: Into<OemRequest> {
    /// Command byte within [`Self::NETFN_LUN`].
    const CODE: u8;

    /// Human-readable name, used in logs and errors.
    const NAME: &'static str;

    /// Network function and LUN the command is routed to.
    const NETFN_LUN: NetFnLun = NetFnLun::OEM;

    /// Shortest response body (completion code already stripped) that
    /// [`Self::decode_response`] accepts.
    const MIN_RESPONSE_LEN: usize;

    type Response;

    /// Append the encoded request body to `out`.
    fn encode_request(&self, out: &mut Vec<u8>);

    /// Decode a response body.
    ///
    /// Fails with [`DecodeError::ResponseTooShort`] if `data` is shorter than
    /// [`Self::MIN_RESPONSE_LEN`]. Bytes beyond what the command needs are
    /// ignored.
    fn decode_response(data: &[u8]) -> Result<Self::Response, DecodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The response body is shorter than the command requires.
    ResponseTooShort { command: &'static str, expected: usize, got: usize },
    /// `hubpack` rejected a response body of acceptable length.
    Deserialize { command: &'static str, err: HubpackError },
}

impl DecodeError {
    pub fn command(&self) -> &'static str {
        match self {
            Self::ResponseTooShort { command, .. }
            | Self::Deserialize { command, .. } => command,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResponseTooShort { command, expected, got } => write!(
                f,
                "{command} response too short: expected at least {expected} \
                 bytes, got {got}"
            ),
            Self::Deserialize { command, err } => {
                write!(f, "failed to deserialize {command} response: {err:?}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

/// Fail unless `data` holds at least `expected` bytes.
pub(crate) fn check_response_len(
    command: &'static str,
    data: &[u8],
    expected: usize,
) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::ResponseTooShort {
            command,
            expected,
            got: data.len(),
        });
    }
    Ok(())
}

/// Serialize a fixed-size value onto the end of `out`.
pub(crate) fn serialize_fixed<T>(out: &mut Vec<u8>, item: &T)
where
    T: Serialize + SerializedSize,
{
    let start = out.len();
    out.resize(start + T::MAX_SIZE, 0);

    // `T::MAX_SIZE` is the serialized size of every type we pass in here
    // (checked statically in `request` and `response`), and the only way
    // `hubpack::serialize` can fail is an undersized buffer; unwrapping is
    // safe.
    let n = hubpack::serialize(&mut out[start..], item).unwrap();
    out.truncate(start + n);
}

/// Length-check and deserialize a fixed-size response body, ignoring any
/// surplus trailing bytes.
pub(crate) fn deserialize_fixed<T>(
    command: &'static str,
    data: &[u8],
) -> Result<T, DecodeError>
where
    T: DeserializeOwned + SerializedSize,
{
    check_response_len(command, data, T::MAX_SIZE)?;
    let (value, _surplus) = hubpack::deserialize::<T>(data)
        .map_err(|err| DecodeError::Deserialize { command, err })?;
    Ok(value)
}
