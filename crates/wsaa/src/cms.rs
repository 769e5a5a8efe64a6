//! CMS signed-data envelopes for login requests.

use facturador_common_identity::TenantCertificate;
use openssl::{
    cms::{CMSOptions, CmsContentInfo},
    pkey::PKey,
    x509::X509,
};

use crate::{
    config::SignatureMode,
    error::{TicketError, TicketResult},
};

/// Signs `payload` with the tenant's key and returns the DER envelope.
///
/// The envelope embeds the signing certificate and carries the
/// content-type, message-digest and signing-time signed attributes over a
/// SHA-256 digest. In [`SignatureMode::Detached`] the payload itself is left
/// out.
///
/// # Errors
///
/// Returns [`TicketError::Signing`] when the stored PEM material cannot be
/// decoded or OpenSSL fails to sign.
pub fn sign_login_request(
    material: &TenantCertificate,
    payload: &[u8],
    mode: SignatureMode,
) -> TicketResult<Vec<u8>> {
    let certificate = X509::from_pem(material.certificate_pem.as_bytes())
        .map_err(|error| TicketError::signing("decode stored certificate", error))?;
    let key = PKey::private_key_from_pem(material.private_key_pem.as_bytes())
        .map_err(|error| TicketError::signing("decode stored private key", error))?;

    let mut flags = CMSOptions::BINARY | CMSOptions::NOSMIMECAP;
    if mode == SignatureMode::Detached {
        flags |= CMSOptions::DETACHED;
    }

    let envelope = CmsContentInfo::sign(Some(&certificate), Some(&key), None, Some(payload), flags)
        .map_err(|error| TicketError::signing("build CMS signed-data", error))?;
    envelope.to_der().map_err(|error| TicketError::signing("encode CMS signed-data", error))
}
