//! Decoding of uploaded certificates and private keys.
//!
//! Certificates are accepted as PEM or DER. Each encoding is an entry in
//! [`CERTIFICATE_PARSERS`]; attempts run in order, the first success wins and,
//! when none succeeds, the returned [`IdentityError::Decode`] lists every
//! attempt's failure.

use chrono::{DateTime, Utc};
use openssl::{
    asn1::{Asn1Time, Asn1TimeRef},
    error::ErrorStack,
    pkey::{PKey, Private},
    x509::{X509, X509NameRef, X509Ref},
};

use crate::{
    error::{IdentityError, IdentityResult},
    tax_id::{CertificateNames, NameAttribute},
};

/// Encoding a certificate was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateEncoding {
    /// Base64 armored (`-----BEGIN CERTIFICATE-----`).
    Pem,
    /// Raw ASN.1 DER.
    Der,
}

impl CertificateEncoding {
    /// Lowercase name used in logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pem => "pem",
            Self::Der => "der",
        }
    }
}

type CertificateParser = fn(&[u8]) -> Result<X509, ErrorStack>;

/// Certificate decoders in the order they are attempted.
pub const CERTIFICATE_PARSERS: [(CertificateEncoding, CertificateParser); 2] =
    [(CertificateEncoding::Pem, X509::from_pem), (CertificateEncoding::Der, X509::from_der)];

/// Decodes a certificate, trying each of [`CERTIFICATE_PARSERS`] in turn.
///
/// # Errors
///
/// Returns [`IdentityError::Decode`] aggregating every attempt's failure when
/// no parser accepts the input.
pub fn parse_certificate(bytes: &[u8]) -> IdentityResult<(X509, CertificateEncoding)> {
    let mut failures = Vec::with_capacity(CERTIFICATE_PARSERS.len());
    for (encoding, parser) in CERTIFICATE_PARSERS {
        match parser(bytes) {
            Ok(cert) => return Ok((cert, encoding)),
            Err(error) => failures.push(format!("{}: {error}", encoding.as_str())),
        }
    }
    Err(IdentityError::decode_message(format!(
        "certificate is neither PEM nor DER ({})",
        failures.join("; ")
    )))
}

/// Decodes a PEM private key, decrypting it when a passphrase is supplied.
///
/// Unencrypted keys decode regardless of the passphrase.
///
/// # Errors
///
/// Returns [`IdentityError::Decode`] when the key is not PEM or the
/// passphrase is wrong.
pub fn parse_private_key(bytes: &[u8], passphrase: Option<&str>) -> IdentityResult<PKey<Private>> {
    let result = match passphrase.filter(|p| !p.is_empty()) {
        Some(passphrase) => PKey::private_key_from_pem_passphrase(bytes, passphrase.as_bytes()),
        None => PKey::private_key_from_pem(bytes),
    };
    result.map_err(|error| IdentityError::decode("private key is not a readable PEM key", error))
}

/// Returns the certificate's `notBefore` / `notAfter` as UTC timestamps.
///
/// # Errors
///
/// Returns [`IdentityError::Crypto`] when OpenSSL cannot compare the times.
pub fn validity_window(cert: &X509Ref) -> IdentityResult<(DateTime<Utc>, DateTime<Utc>)> {
    Ok((asn1_to_utc(cert.not_before())?, asn1_to_utc(cert.not_after())?))
}

fn asn1_to_utc(time: &Asn1TimeRef) -> IdentityResult<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0)
        .map_err(|error| IdentityError::crypto("build epoch timestamp", error))?;
    let diff =
        epoch.diff(time).map_err(|error| IdentityError::crypto("compare certificate time", error))?;
    let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| IdentityError::decode_message(format!("certificate time {time} out of range")))
}

/// Extracts the subject and issuer attributes of a certificate.
#[must_use]
pub fn certificate_names(cert: &X509Ref) -> CertificateNames {
    CertificateNames {
        subject: name_attributes(cert.subject_name()),
        issuer: name_attributes(cert.issuer_name()),
    }
}

fn name_attributes(name: &X509NameRef) -> Vec<NameAttribute> {
    name.entries()
        .map(|entry| {
            let object = entry.object();
            let attribute = object
                .nid()
                .short_name()
                .map(str::to_owned)
                .unwrap_or_else(|_| object.to_string());
            let value = match entry.data().to_string() {
                Ok(value) => value,
                Err(error) => {
                    tracing::debug!(%attribute, %error, "name attribute is not decodable text");
                    String::new()
                },
            };
            NameAttribute::new(attribute, value)
        })
        .collect()
}
