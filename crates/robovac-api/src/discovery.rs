//! Decoding of UDP discovery broadcasts.
//!
//! Devices announce themselves on UDP 6666 (plaintext) and 6667 (encrypted
//! with the [discovery key](crate::cipher::discovery_key)). Listening on
//! those ports is up to the caller; this module turns one datagram into a
//! [`DiscoveredDevice`].

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cipher::Cipher;
use crate::error::Error;
use crate::frame;

/// The announcement a device broadcasts on the local network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub ip: IpAddr,
    #[serde(rename = "gwId")]
    pub device_id: String,
    pub version: String,
    #[serde(rename = "productKey", default)]
    pub product_key: Option<String>,
}

/// Decode a single discovery datagram.
pub fn decode_datagram(datagram: &[u8]) -> Result<DiscoveredDevice, Error> {
    let payload = match frame::decode(datagram, &Cipher::discovery()) {
        Ok((frame, _)) => frame.payload.ok_or_else(|| Error::Payload {
            reason: "discovery frame has no payload".into(),
            raw: Vec::new(),
        })?,
        Err(Error::Payload { raw, reason }) => {
            plaintext_payload(&raw).ok_or(Error::Payload { reason, raw })?
        }
        Err(e) => return Err(e),
    };

    serde_json::from_value(payload.clone()).map_err(|e| Error::Payload {
        reason: format!("unexpected discovery payload: {e}"),
        raw: payload.to_string().into_bytes(),
    })
}

/// Port 6666 announcements are not encrypted. The body may still lead
/// with the return code.
fn plaintext_payload(raw: &[u8]) -> Option<Value> {
    serde_json::from_slice(raw).ok().or_else(|| {
        let json = raw.strip_prefix(&[0, 0, 0])?.get(1..)?;
        serde_json::from_slice(json).ok()
    })
}
