// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::CommunicationError;
use crate::error::TransportError;
use async_trait::async_trait;
use bmc_oem_messages::OemCommand;
use bmc_oem_messages::OemRequest;

/// An established, authenticated session to a BMC.
///
/// Implementations send one request and return the data bytes of the
/// matching response, with the completion code already checked and
/// stripped. Requests are never pipelined: each call completes before the
/// next is made.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        request: &OemRequest,
    ) -> Result<Vec<u8>, TransportError>;
}

/// Send `command` over `transport` and decode the response.
pub async fn execute<T, C>(
    transport: &T,
    command: C,
) -> Result<C::Response, CommunicationError>
where
    T: Transport + ?Sized,
    C: OemCommand,
{
    let request = command.into();
    let data = transport
        .execute(&request)
        .await
        .map_err(|err| CommunicationError::Transport { command: C::NAME, err })?;
    let response = C::decode_response(&data)?;
    Ok(response)
}
