//! Maps a node's systemd machine-id to the client-visible id Zincati sends in FleetLock
//! requests.
//!
//! Zincati requests carry a node identifier computed the same way `systemd-id128
//! machine-id -a APP_ID` would: the SHA256 HMAC of the systemd machine-id and a fixed
//! application id, truncated to 16 bytes with the UUIDv4 version/variant bits forced.
//!
//! Kubelet reports this same machine-id as `status.nodeInfo.systemUUID` (or as
//! `status.nodeInfo.machineID` where `/etc/machine-id` is bind-mounted; this service
//! matches the upstream FleetLock implementation and reads `systemUUID`). Recomputing the
//! Zincati id from the Kubernetes-reported value lets the node resolver map a request back
//! to a `Node` without any side channel.
//!
//! Related:
//! - <https://github.com/coreos/zincati/pull/4>
//! - <https://docs.rs/libsystemd/0.3.1/src/libsystemd/id128.rs.html#38-57>

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::Error;

/// Zincati's application id, as registered with systemd's app-specific ID scheme.
/// <https://github.com/lucab/zincati/blob/17d5e2adf13ee9a98cebc662735a2084949e589b/src/identity/mod.rs#L9>
pub const ZINCATI_APP_ID: &str = "de35106b6ec24688b63afddaa156679b";

/// Computes the Zincati node id for a systemd machine id.
pub fn derive(machine_id: &str) -> Result<String, Error> {
    app_specific_id(machine_id, ZINCATI_APP_ID)
}

/// Computes a systemd-style app-specific identifier given a machine id and an
/// application id, both 32 hex characters (dashes in `machine_id` are ignored).
///
/// Not for security use: HMAC is used here purely as a stable, uniformly-distributed
/// derivation, not as a message authentication code.
fn app_specific_id(machine_id: &str, app_id: &str) -> Result<String, Error> {
    let machine_id = machine_id.replace('-', "");

    let machine_bytes = hex::decode(&machine_id)
        .map_err(|e| Error::InvalidInput(format!("invalid machine id: {e}")))?;
    let app_bytes =
        hex::decode(app_id).map_err(|e| Error::InvalidInput(format!("invalid app id: {e}")))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(&machine_bytes)
        .map_err(|e| Error::InvalidInput(format!("invalid machine id length: {e}")))?;
    mac.update(&app_bytes);
    let sum = mac.finalize().into_bytes();

    // UUIDv4 version/variant bits, matching systemd's id128 derivation.
    // https://github.com/systemd/systemd/blob/5a7eb46c0206411d380543021291b4bca0b6f59f/src/libsystemd/sd-id128/id128-util.c#L199
    let mut id = [0u8; 16];
    id.copy_from_slice(&sum[..16]);
    id[6] = (id[6] & 0x0F) | 0x40;
    id[8] = (id[8] & 0x3F) | 0x80;

    Ok(hex::encode(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_specific_id_matches_reference_vector() {
        // https://docs.rs/libsystemd/0.3.1/src/libsystemd/id128.rs.html#121
        let id = app_specific_id(
            "2e074e9b299c41a59923c51ae16f279b",
            "033b1b9b264441fcaa173e9e5bf35c5a",
        )
        .unwrap();
        assert_eq!(id, "4d4a86c9c6644a479560ded5d19a30c5");
    }

    #[test]
    fn derive_matches_zincati_vector() {
        let id = derive("1c09ca98649c4c7abc779cd04c96812e").unwrap();
        assert_eq!(id, "978a225b3d7b40e9acd7ce9b62f68444");
    }

    #[test]
    fn derive_is_insensitive_to_dash_formatting() {
        let dashed = derive("1c09ca98-649c-4c7a-bc77-9cd04c96812e").unwrap();
        let plain = derive("1c09ca98649c4c7abc779cd04c96812e").unwrap();
        assert_eq!(dashed, plain);
    }

    #[test]
    fn derive_rejects_invalid_hex() {
        let err = derive("not-valid-hex-zzzzzzzzzzzzzzzzzz").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
