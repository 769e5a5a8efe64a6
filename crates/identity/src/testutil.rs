//! Shared test fixtures: self-signed certificates minted at runtime.
//!
//! Available in unit tests and, behind the `testutil` feature, to other crates'
//! tests.
//!
//! # Example
//!
//! ```
//! use facturador_common_identity::testutil::TestCertificate;
//!
//! let fixture = TestCertificate::builder().tax_id("30716539685").valid_days(365).build();
//! let archive = fixture.to_pkcs12("clave");
//! assert!(!archive.is_empty());
//! ```

use chrono::{Duration, Utc};
use openssl::{
    asn1::{Asn1Integer, Asn1Time},
    bn::{BigNum, MsbOption},
    hash::MessageDigest,
    nid::Nid,
    pkcs12::Pkcs12,
    pkey::{PKey, Private},
    rsa::Rsa,
    symm::Cipher,
    x509::{X509, X509Name, X509NameBuilder, X509Req},
};

/// Common name used when none is given.
pub const DEFAULT_TEST_COMMON_NAME: &str = "facturador-test";

/// A freshly generated certificate and its private key.
pub struct TestCertificate {
    /// The certificate.
    pub certificate: X509,
    /// The certificate in PEM.
    pub certificate_pem: String,
    /// The private key.
    pub private_key: PKey<Private>,
    /// The private key as unencrypted PKCS#8 PEM.
    pub private_key_pem: String,
}

#[bon::bon]
impl TestCertificate {
    /// Mints an RSA-2048 certificate signed by its own key.
    ///
    /// `tax_id` lands in the subject `serialNumber` as `CUIT <tax id>`. The
    /// validity window starts `backdate_days` before now and lasts
    /// `valid_days`. The issuer equals the subject unless `issuer_common_name`
    /// is given.
    #[builder]
    pub fn new(
        #[builder(into)] tax_id: Option<String>,
        #[builder(into, default = DEFAULT_TEST_COMMON_NAME.to_owned())] common_name: String,
        #[builder(into)] issuer_common_name: Option<String>,
        #[builder(default = 365)] valid_days: i64,
        #[builder(default = 0)] backdate_days: i64,
    ) -> Self {
        let rsa = Rsa::generate(2048).expect("generate RSA key");
        let private_key = PKey::from_rsa(rsa).expect("wrap RSA key");

        let mut subject = X509NameBuilder::new().expect("name builder");
        subject.append_entry_by_nid(Nid::COUNTRYNAME, "AR").expect("country");
        subject.append_entry_by_nid(Nid::COMMONNAME, &common_name).expect("common name");
        if let Some(tax_id) = &tax_id {
            subject
                .append_entry_by_nid(Nid::SERIALNUMBER, &format!("CUIT {tax_id}"))
                .expect("serial number");
        }
        let subject = subject.build();
        let issuer = issuer_common_name.as_deref().map(single_cn_name);

        let (not_before, not_after) = validity(backdate_days, valid_days);

        let mut builder = X509::builder().expect("x509 builder");
        builder.set_version(2).expect("version");
        builder.set_serial_number(&random_serial()).expect("serial");
        builder.set_subject_name(&subject).expect("subject");
        builder.set_issuer_name(issuer.as_ref().unwrap_or(&subject)).expect("issuer");
        builder.set_pubkey(&private_key).expect("pubkey");
        builder.set_not_before(&not_before).expect("set not before");
        builder.set_not_after(&not_after).expect("set not after");
        builder.sign(&private_key, MessageDigest::sha256()).expect("sign certificate");
        let certificate = builder.build();

        let certificate_pem =
            String::from_utf8(certificate.to_pem().expect("certificate pem")).expect("utf-8");
        let private_key_pem =
            String::from_utf8(private_key.private_key_to_pem_pkcs8().expect("key pem"))
                .expect("utf-8");

        Self { certificate, certificate_pem, private_key, private_key_pem }
    }
}

impl TestCertificate {
    /// Returns the certificate as DER.
    #[must_use]
    pub fn certificate_der(&self) -> Vec<u8> {
        self.certificate.to_der().expect("certificate der")
    }

    /// Returns the private key as PKCS#8 PEM encrypted with AES-256-CBC.
    #[must_use]
    pub fn encrypted_key_pem(&self, passphrase: &str) -> String {
        let pem = self
            .private_key
            .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), passphrase.as_bytes())
            .expect("encrypted key pem");
        String::from_utf8(pem).expect("utf-8")
    }

    /// Packs certificate and key into a PKCS#12 archive.
    #[must_use]
    pub fn to_pkcs12(&self, passphrase: &str) -> Vec<u8> {
        let mut builder = Pkcs12::builder();
        builder.name("test").pkey(&self.private_key).cert(&self.certificate);
        builder.build2(passphrase).expect("build pkcs12").to_der().expect("pkcs12 der")
    }

    /// Packs only the certificate into a PKCS#12 archive, leaving out the key.
    #[must_use]
    pub fn certificate_only_pkcs12(&self, passphrase: &str) -> Vec<u8> {
        let mut builder = Pkcs12::builder();
        builder.name("test").cert(&self.certificate);
        builder.build2(passphrase).expect("build pkcs12").to_der().expect("pkcs12 der")
    }
}

/// Issues a certificate for a PEM signing request, the way the authority does
/// after a tenant submits one. The issuer is a throwaway CA.
#[must_use]
pub fn issue_for_request(request_pem: &str, valid_days: i64) -> X509 {
    let request = X509Req::from_pem(request_pem.as_bytes()).expect("parse signing request");
    let public_key = request.public_key().expect("request public key");
    let authority = TestCertificate::builder().common_name("Test AC").build();
    let (not_before, not_after) = validity(0, valid_days);

    let mut builder = X509::builder().expect("x509 builder");
    builder.set_version(2).expect("version");
    builder.set_serial_number(&random_serial()).expect("serial");
    builder.set_subject_name(request.subject_name()).expect("subject");
    builder.set_issuer_name(authority.certificate.subject_name()).expect("issuer");
    builder.set_pubkey(&public_key).expect("pubkey");
    builder.set_not_before(&not_before).expect("set not before");
    builder.set_not_after(&not_after).expect("set not after");
    builder.sign(&authority.private_key, MessageDigest::sha256()).expect("sign certificate");
    builder.build()
}

fn validity(backdate_days: i64, valid_days: i64) -> (Asn1Time, Asn1Time) {
    let not_before = Utc::now() - Duration::days(backdate_days);
    let not_after = not_before + Duration::days(valid_days);
    (
        Asn1Time::from_unix(not_before.timestamp()).expect("not before"),
        Asn1Time::from_unix(not_after.timestamp()).expect("not after"),
    )
}

fn random_serial() -> Asn1Integer {
    let mut serial = BigNum::new().expect("bignum");
    serial.rand(64, MsbOption::MAYBE_ZERO, false).expect("random serial");
    serial.to_asn1_integer().expect("serial")
}

fn single_cn_name(common_name: &str) -> X509Name {
    let mut name = X509NameBuilder::new().expect("name builder");
    name.append_entry_by_nid(Nid::COMMONNAME, common_name).expect("common name");
    name.build()
}
