//! Tax id validation and extraction from certificate names.
//!
//! A tax id is an 11-digit number whose last digit is a modulus-11 check
//! digit. Certificates issued by the authority carry it in the subject, but
//! not always in the same attribute, so extraction runs an ordered list of
//! [`TaxIdStrategy`] values and keeps the first match.
//!
//! ```text
//! serialNumber attr → commonName → any subject attr → rendered subject → rendered issuer
//! ```
//!
//! Extraction only matches the 11-digit pattern. The check digit is not
//! enforced there because the authority has issued certificates whose
//! embedded number fails it; use [`is_valid_tax_id`] where validation is
//! required.

use std::sync::LazyLock;

use regex::Regex;

/// Number of digits in a tax id.
pub const TAX_ID_LENGTH: usize = 11;

/// Weights applied to the first ten digits when computing the check digit.
const CHECK_DIGIT_WEIGHTS: [u32; 10] = [5, 4, 3, 2, 7, 6, 5, 4, 3, 2];

/// Exactly eleven digits not embedded in a longer digit run.
static TAX_ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:^|[^0-9])([0-9]{11})(?:[^0-9]|$)").ok());

/// Subject attribute holding the tax id on authority-issued certificates.
pub const SERIAL_NUMBER_ATTRIBUTE: &str = "serialNumber";

/// Subject attribute holding the common name.
pub const COMMON_NAME_ATTRIBUTE: &str = "CN";

/// Strips separators commonly typed into tax ids (`20-12345678-6`).
///
/// # Examples
///
/// ```
/// use facturador_common_identity::tax_id::normalize_tax_id;
///
/// assert_eq!(normalize_tax_id(" 20-12345678-6 "), "20123456786");
/// ```
#[must_use]
pub fn normalize_tax_id(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace() && *c != '-').collect()
}

/// Returns `true` when `candidate` is exactly eleven ASCII digits.
#[must_use]
pub fn is_tax_id_shaped(candidate: &str) -> bool {
    candidate.len() == TAX_ID_LENGTH && candidate.bytes().all(|b| b.is_ascii_digit())
}

/// Computes the check digit for the first ten digits of a tax id.
///
/// The weighted sum is reduced modulo 11 and subtracted from 11; a result of
/// 11 maps to 0 and a result of 10 maps to 9.
#[must_use]
pub fn check_digit(prefix: &[u32; 10]) -> u32 {
    let sum: u32 = prefix.iter().zip(CHECK_DIGIT_WEIGHTS).map(|(d, w)| d * w).sum();
    match 11 - (sum % 11) {
        11 => 0,
        10 => 9,
        digit => digit,
    }
}

/// Validates an 11-digit tax id against its modulus-11 check digit.
///
/// # Examples
///
/// ```
/// use facturador_common_identity::tax_id::is_valid_tax_id;
///
/// assert!(is_valid_tax_id("20123456786"));
/// assert!(!is_valid_tax_id("20123456787"));
/// assert!(!is_valid_tax_id("2012345678"));
/// ```
#[must_use]
pub fn is_valid_tax_id(candidate: &str) -> bool {
    if !is_tax_id_shaped(candidate) {
        return false;
    }
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    let Ok(prefix) = <[u32; 10]>::try_from(&digits[..10]) else {
        return false;
    };
    check_digit(&prefix) == digits[10]
}

/// Finds the first standalone 11-digit run in `text`.
#[must_use]
pub fn find_tax_id(text: &str) -> Option<String> {
    let pattern = TAX_ID_PATTERN.as_ref()?;
    pattern.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_owned())
}

/// A single `attribute=value` pair from a certificate distinguished name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAttribute {
    /// Short attribute name (`CN`, `O`, `serialNumber`, ...).
    pub name: String,
    /// Attribute value as UTF-8.
    pub value: String,
}

impl NameAttribute {
    /// Creates a name attribute.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// Subject and issuer names of a certificate, decoupled from OpenSSL so the
/// extraction strategies can be tested on plain data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateNames {
    /// Subject attributes in certificate order.
    pub subject: Vec<NameAttribute>,
    /// Issuer attributes in certificate order.
    pub issuer: Vec<NameAttribute>,
}

impl CertificateNames {
    /// Renders the subject as `name=value, name=value`.
    #[must_use]
    pub fn rendered_subject(&self) -> String {
        render(&self.subject)
    }

    /// Renders the issuer as `name=value, name=value`.
    #[must_use]
    pub fn rendered_issuer(&self) -> String {
        render(&self.issuer)
    }

    fn subject_attribute(&self, name: &str) -> Option<&str> {
        self.subject
            .iter()
            .find(|attr| attr.name.eq_ignore_ascii_case(name))
            .map(|attr| attr.value.as_str())
    }
}

fn render(attributes: &[NameAttribute]) -> String {
    attributes
        .iter()
        .map(|attr| format!("{}={}", attr.name, attr.value))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One way of locating a tax id inside certificate names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxIdStrategy {
    /// The subject `serialNumber` attribute (`CUIT 20123456786`).
    SerialNumberAttribute,
    /// The subject common name.
    CommonName,
    /// Every subject attribute, in certificate order.
    SubjectAttributes,
    /// The full rendered subject string.
    RenderedSubject,
    /// The full rendered issuer string.
    RenderedIssuer,
}

/// Strategy order used by every ingestion path.
pub const DEFAULT_TAX_ID_STRATEGIES: [TaxIdStrategy; 5] = [
    TaxIdStrategy::SerialNumberAttribute,
    TaxIdStrategy::CommonName,
    TaxIdStrategy::SubjectAttributes,
    TaxIdStrategy::RenderedSubject,
    TaxIdStrategy::RenderedIssuer,
];

impl TaxIdStrategy {
    /// Runs this strategy against `names`.
    #[must_use]
    pub fn extract(self, names: &CertificateNames) -> Option<String> {
        match self {
            Self::SerialNumberAttribute => {
                names.subject_attribute(SERIAL_NUMBER_ATTRIBUTE).and_then(find_tax_id)
            },
            Self::CommonName => names.subject_attribute(COMMON_NAME_ATTRIBUTE).and_then(find_tax_id),
            Self::SubjectAttributes => {
                names.subject.iter().find_map(|attr| find_tax_id(&attr.value))
            },
            Self::RenderedSubject => find_tax_id(&names.rendered_subject()),
            Self::RenderedIssuer => find_tax_id(&names.rendered_issuer()),
        }
    }
}

/// Resolves a tax id by trying `strategies` in order; first match wins.
///
/// Returns the tax id together with the strategy that produced it.
#[must_use]
pub fn resolve_tax_id(
    names: &CertificateNames,
    strategies: &[TaxIdStrategy],
) -> Option<(String, TaxIdStrategy)> {
    strategies.iter().find_map(|strategy| strategy.extract(names).map(|id| (id, *strategy)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn subject(attrs: &[(&str, &str)]) -> CertificateNames {
        CertificateNames {
            subject: attrs.iter().map(|(n, v)| NameAttribute::new(*n, *v)).collect(),
            issuer: vec![NameAttribute::new("CN", "Computadores"), NameAttribute::new("O", "AFIP")],
        }
    }

    #[rstest]
    #[case::regular("20123456786", true)]
    #[case::company("30712345671", true)]
    #[case::remainder_one_maps_to_nine("20000000019", true)]
    #[case::remainder_zero_maps_to_zero("20000000060", true)]
    #[case::wrong_check_digit("20123456787", false)]
    #[case::scenario_tax_id("30716539685", false)]
    #[case::too_short("2012345678", false)]
    #[case::too_long("201234567860", false)]
    #[case::not_digits("20-12345678-6", false)]
    fn test_check_digit_validation(#[case] candidate: &str, #[case] expected: bool) {
        assert_eq!(is_valid_tax_id(candidate), expected, "candidate {candidate}");
    }

    proptest! {
        #[test]
        fn exactly_one_check_digit_validates(prefix in "[0-9]{10}") {
            let valid: Vec<u32> = (0..10)
                .filter(|d| is_valid_tax_id(&format!("{prefix}{d}")))
                .collect();
            prop_assert_eq!(valid.len(), 1);

            let digits: Vec<u32> = prefix.chars().filter_map(|c| c.to_digit(10)).collect();
            let array: [u32; 10] = digits.try_into().unwrap();
            prop_assert_eq!(valid[0], check_digit(&array));
        }
    }

    #[rstest]
    #[case::prefixed("CUIT 20123456786", Some("20123456786"))]
    #[case::bare("30716539685", Some("30716539685"))]
    #[case::embedded_in_longer_run("123456789012", None)]
    #[case::too_short("CUIT 2012345678", None)]
    #[case::no_digits("Empresa SA", None)]
    fn test_find_tax_id(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(find_tax_id(text).as_deref(), expected);
    }

    #[test]
    fn test_serial_number_wins_over_common_name() {
        let names = subject(&[("CN", "empresa 30712345671"), ("serialNumber", "CUIT 20123456786")]);
        let (tax_id, strategy) = resolve_tax_id(&names, &DEFAULT_TAX_ID_STRATEGIES).unwrap();
        assert_eq!(tax_id, "20123456786");
        assert_eq!(strategy, TaxIdStrategy::SerialNumberAttribute);
    }

    #[test]
    fn test_common_name_used_when_serial_number_missing() {
        let names = subject(&[("O", "Empresa"), ("CN", "facturacion 30712345671")]);
        let (tax_id, strategy) = resolve_tax_id(&names, &DEFAULT_TAX_ID_STRATEGIES).unwrap();
        assert_eq!(tax_id, "30712345671");
        assert_eq!(strategy, TaxIdStrategy::CommonName);
    }

    #[test]
    fn test_other_subject_attribute_scanned() {
        let names = subject(&[("O", "Empresa 30712345671"), ("CN", "facturacion")]);
        let (_, strategy) = resolve_tax_id(&names, &DEFAULT_TAX_ID_STRATEGIES).unwrap();
        assert_eq!(strategy, TaxIdStrategy::SubjectAttributes);
    }

    #[test]
    fn test_issuer_scanned_last() {
        let names = CertificateNames {
            subject: vec![NameAttribute::new("CN", "facturacion")],
            issuer: vec![NameAttribute::new("CN", "AC 33693450239")],
        };
        let (tax_id, strategy) = resolve_tax_id(&names, &DEFAULT_TAX_ID_STRATEGIES).unwrap();
        assert_eq!(tax_id, "33693450239");
        assert_eq!(strategy, TaxIdStrategy::RenderedIssuer);
    }

    #[test]
    fn test_strategy_list_is_respected() {
        let names = subject(&[("CN", "empresa 30712345671"), ("serialNumber", "CUIT 20123456786")]);
        let (tax_id, _) = resolve_tax_id(&names, &[TaxIdStrategy::CommonName]).unwrap();
        assert_eq!(tax_id, "30712345671");
    }

    #[test]
    fn test_nothing_found() {
        let names = CertificateNames {
            subject: vec![NameAttribute::new("CN", "facturacion")],
            issuer: vec![NameAttribute::new("CN", "AC")],
        };
        assert!(resolve_tax_id(&names, &DEFAULT_TAX_ID_STRATEGIES).is_none());
    }

    #[test]
    fn test_normalize_strips_separators() {
        assert_eq!(normalize_tax_id("30-71234567-1"), "30712345671");
        assert!(is_tax_id_shaped(&normalize_tax_id("30 71234567 1")));
    }
}
