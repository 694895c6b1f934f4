//! Protocol version management

use crate::error::{ProtocolError, Result};

/// USB/IP protocol version carried in every operation header (1.1.1)
pub const USBIP_VERSION: u16 = 0x0111;

/// Reject any version other than [`USBIP_VERSION`]
///
/// There is no compatibility window: the record layouts are fixed and a
/// different version number means a different wire format.
pub fn validate_version(version: u16) -> Result<()> {
    if version != USBIP_VERSION {
        return Err(ProtocolError::VersionMismatch {
            found: version,
            expected: USBIP_VERSION,
        });
    }
    Ok(())
}
