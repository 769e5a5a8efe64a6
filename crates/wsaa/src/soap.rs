//! SOAP envelopes for the LoginCms operation.
//!
//! The request wraps the base64 CMS envelope in `loginCms/in0`. The response
//! carries either a `loginCmsReturn` element whose text is an escaped
//! `loginTicketResponse` document, or a SOAP `Fault`.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use quick_xml::{events::Event, reader::Reader};

use crate::error::{FaultKind, TicketError, TicketResult};

/// Namespace of the LoginCms operation.
pub const LOGIN_NAMESPACE: &str = "http://wsaa.view.sua.dvadac.desein.afip.gov";

/// SOAP 1.1 envelope namespace.
pub const SOAP_ENVELOPE_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Builds the LoginCms request envelope around a base64 CMS blob.
#[must_use]
pub fn login_envelope(cms_base64: &str) -> String {
    format!(
        concat!(
            r#"<soapenv:Envelope xmlns:soapenv="{envelope}" xmlns:wsaa="{login}">"#,
            "<soapenv:Header/>",
            "<soapenv:Body>",
            "<wsaa:loginCms>",
            "<wsaa:in0>{cms}</wsaa:in0>",
            "</wsaa:loginCms>",
            "</soapenv:Body>",
            "</soapenv:Envelope>",
        ),
        envelope = SOAP_ENVELOPE_NAMESPACE,
        login = LOGIN_NAMESPACE,
        cms = quick_xml::escape::escape(cms_base64),
    )
}

/// Credentials extracted from a successful login response.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    /// `credentials/token`.
    pub token: String,
    /// `credentials/sign`.
    pub sign: String,
    /// `header/expirationTime`.
    pub expiration_time: DateTime<Utc>,
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("expiration_time", &self.expiration_time)
            .finish_non_exhaustive()
    }
}

/// A SOAP fault returned by the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    /// `faultcode`, namespace prefix included (`ns1:coe.alreadyAuthenticated`).
    pub code: String,
    /// `faultstring`.
    pub message: String,
}

/// What a fault means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// The authority already issued a ticket for this service elsewhere.
    AlreadyIssued,
    /// The login was refused.
    Rejected(FaultKind),
}

const ALREADY_ISSUED_CODES: &[&str] = &["alreadyauthenticated"];
const ALREADY_ISSUED_MESSAGES: &[&str] = &["ya posee un ta valido", "ya posee un ta válido"];
const UNTRUSTED_CODES: &[&str] = &["cms.cert.untrusted", "cms.cert.invalid", "cms.cert.notfound"];
const UNTRUSTED_MESSAGES: &[&str] =
    &["no emitido por ac de confianza", "computador no autorizado", "no autorizado a acceder"];
const EXPIRED_CODES: &[&str] = &["cms.cert.expired"];
const EXPIRED_MESSAGES: &[&str] = &["expirado", "expired"];

impl SoapFault {
    /// Classifies the fault by code first, then by message text.
    #[must_use]
    pub fn classify(&self) -> FaultClass {
        let code = self.code.to_lowercase();
        let message = self.message.to_lowercase();
        let matches = |codes: &[&str], messages: &[&str]| {
            codes.iter().any(|c| code.contains(c)) || messages.iter().any(|m| message.contains(m))
        };

        if matches(ALREADY_ISSUED_CODES, ALREADY_ISSUED_MESSAGES) {
            FaultClass::AlreadyIssued
        } else if matches(UNTRUSTED_CODES, UNTRUSTED_MESSAGES) {
            FaultClass::Rejected(FaultKind::Untrusted)
        } else if matches(EXPIRED_CODES, EXPIRED_MESSAGES) {
            FaultClass::Rejected(FaultKind::Expired)
        } else {
            FaultClass::Rejected(FaultKind::Other)
        }
    }
}

/// A parsed LoginCms response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResponse {
    /// The authority issued a ticket.
    Credentials(LoginCredentials),
    /// The authority refused.
    Fault(SoapFault),
}

/// Parses a LoginCms response body.
///
/// # Errors
///
/// Returns [`TicketError::MalformedResponse`] when the body is not XML, holds
/// neither `loginCmsReturn` nor a fault, or the nested document lacks the
/// token, signature or a parsable expiration time.
pub fn parse_login_response(body: &str) -> TicketResult<LoginResponse> {
    let outer = element_texts(body)?;

    if let Some(code) = find(&outer, &["faultcode"]) {
        let message = find(&outer, &["faultstring"]).unwrap_or_default();
        return Ok(LoginResponse::Fault(SoapFault { code: code.to_owned(), message: message.to_owned() }));
    }

    let inner = find(&outer, &["loginCmsReturn"])
        .ok_or_else(|| TicketError::malformed("response holds neither loginCmsReturn nor a fault"))?;
    let inner = element_texts(inner)?;

    let token = find(&inner, &["credentials", "token"])
        .ok_or_else(|| TicketError::malformed("credentials/token missing"))?;
    let sign = find(&inner, &["credentials", "sign"])
        .ok_or_else(|| TicketError::malformed("credentials/sign missing"))?;
    let expiration = find(&inner, &["header", "expirationTime"])
        .ok_or_else(|| TicketError::malformed("header/expirationTime missing"))?;
    let expiration_time = DateTime::parse_from_rfc3339(expiration)
        .map_err(|error| {
            TicketError::malformed(format!("expirationTime {expiration:?} is not RFC 3339: {error}"))
        })?
        .with_timezone(&Utc);

    Ok(LoginResponse::Credentials(LoginCredentials {
        token: token.to_owned(),
        sign: sign.to_owned(),
        expiration_time,
    }))
}

/// Text content of every element that has some, keyed by its local-name path.
type ElementTexts = Vec<(Vec<String>, String)>;

/// Returns the text of the first element whose path ends with `suffix`.
fn find<'a>(texts: &'a ElementTexts, suffix: &[&str]) -> Option<&'a str> {
    texts
        .iter()
        .find(|(path, _)| {
            path.len() >= suffix.len()
                && path[path.len() - suffix.len()..].iter().zip(suffix).all(|(a, b)| a == b)
        })
        .map(|(_, text)| text.as_str())
}

fn element_texts(xml: &str) -> TicketResult<ElementTexts> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let malformed =
        |error: quick_xml::Error| TicketError::malformed(format!("invalid XML: {error}"));

    let mut stack: Vec<(String, String)> = Vec::new();
    let mut texts = ElementTexts::new();
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                stack.push((name, String::new()));
            },
            Event::Text(text) => {
                let text = text.unescape().map_err(malformed)?;
                append_text(&mut stack, text);
            },
            Event::CData(data) => {
                let data = data.into_inner();
                append_text(&mut stack, String::from_utf8_lossy(&data));
            },
            Event::End(_) => {
                let path: Vec<String> = stack.iter().map(|(name, _)| name.clone()).collect();
                if let Some((_, text)) = stack.pop()
                    && !text.is_empty()
                {
                    texts.push((path, text));
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(texts)
}

fn append_text(stack: &mut [(String, String)], text: Cow<'_, str>) {
    if let Some((_, buffer)) = stack.last_mut() {
        buffer.push_str(&text);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;
    use crate::testutil::{fault_body, success_body};

    #[test]
    fn test_envelope_shape() {
        let envelope = login_envelope("TUlJQ0FB+/==");
        assert!(envelope.contains(r#"xmlns:wsaa="http://wsaa.view.sua.dvadac.desein.afip.gov""#));
        assert!(envelope.contains("<wsaa:loginCms><wsaa:in0>TUlJQ0FB+/==</wsaa:in0></wsaa:loginCms>"));
    }

    #[test]
    fn test_success_response() {
        let expiration = Utc.with_ymd_and_hms(2025, 3, 1, 22, 0, 0).unwrap();
        let body = success_body("PD94bWwgdG9rZW4=", "c2lnbg==", expiration);

        let LoginResponse::Credentials(credentials) = parse_login_response(&body).unwrap() else {
            panic!("expected credentials");
        };
        assert_eq!(credentials.token, "PD94bWwgdG9rZW4=");
        assert_eq!(credentials.sign, "c2lnbg==");
        assert_eq!(credentials.expiration_time, expiration);
    }

    #[test]
    fn test_offset_expiration_is_normalized_to_utc() {
        let body = concat!(
            "<Envelope><Body><loginCmsResponse><loginCmsReturn>",
            "&lt;loginTicketResponse&gt;&lt;header&gt;",
            "&lt;expirationTime&gt;2025-03-01T19:00:00.123-03:00&lt;/expirationTime&gt;",
            "&lt;/header&gt;&lt;credentials&gt;&lt;token&gt;t&lt;/token&gt;",
            "&lt;sign&gt;s&lt;/sign&gt;&lt;/credentials&gt;&lt;/loginTicketResponse&gt;",
            "</loginCmsReturn></loginCmsResponse></Body></Envelope>",
        );
        let LoginResponse::Credentials(credentials) = parse_login_response(body).unwrap() else {
            panic!("expected credentials");
        };
        assert_eq!(
            credentials.expiration_time.timestamp(),
            Utc.with_ymd_and_hms(2025, 3, 1, 22, 0, 0).unwrap().timestamp()
        );
    }

    #[test]
    fn test_fault_response() {
        let body = fault_body("ns1:cms.cert.untrusted", "Certificado no emitido por AC de confianza");
        let LoginResponse::Fault(fault) = parse_login_response(&body).unwrap() else {
            panic!("expected fault");
        };
        assert_eq!(fault.code, "ns1:cms.cert.untrusted");
        assert_eq!(fault.classify(), FaultClass::Rejected(FaultKind::Untrusted));
    }

    #[rstest]
    #[case::already_by_code("ns1:coe.alreadyAuthenticated", "otro texto", FaultClass::AlreadyIssued)]
    #[case::already_by_message(
        "ns1:coe.x",
        "El CEE ya posee un TA valido para el acceso al WSN solicitado",
        FaultClass::AlreadyIssued
    )]
    #[case::untrusted_code("ns1:cms.cert.untrusted", "x", FaultClass::Rejected(FaultKind::Untrusted))]
    #[case::invalid_cert("ns1:cms.cert.invalid", "x", FaultClass::Rejected(FaultKind::Untrusted))]
    #[case::computer_not_authorized(
        "ns1:coe.notAuthorized",
        "Computador no autorizado a acceder al servicio",
        FaultClass::Rejected(FaultKind::Untrusted)
    )]
    #[case::expired_code("ns1:cms.cert.expired", "x", FaultClass::Rejected(FaultKind::Expired))]
    #[case::expired_message("ns1:cms.x", "Certificado expirado", FaultClass::Rejected(FaultKind::Expired))]
    #[case::other("ns1:xml.bad", "Request mal formado", FaultClass::Rejected(FaultKind::Other))]
    fn test_fault_classification(#[case] code: &str, #[case] message: &str, #[case] expected: FaultClass) {
        let fault = SoapFault { code: code.into(), message: message.into() };
        assert_eq!(fault.classify(), expected);
    }

    #[rstest]
    #[case::not_xml("this is <not xml")]
    #[case::empty_envelope("<Envelope><Body/></Envelope>")]
    #[case::missing_token(concat!(
        "<Envelope><Body><loginCmsReturn>",
        "&lt;loginTicketResponse&gt;&lt;header&gt;&lt;expirationTime&gt;2025-03-01T22:00:00Z",
        "&lt;/expirationTime&gt;&lt;/header&gt;&lt;credentials&gt;&lt;sign&gt;s&lt;/sign&gt;",
        "&lt;/credentials&gt;&lt;/loginTicketResponse&gt;</loginCmsReturn></Body></Envelope>",
    ))]
    #[case::bad_expiration(concat!(
        "<Envelope><Body><loginCmsReturn>",
        "&lt;loginTicketResponse&gt;&lt;header&gt;&lt;expirationTime&gt;mañana",
        "&lt;/expirationTime&gt;&lt;/header&gt;&lt;credentials&gt;&lt;token&gt;t&lt;/token&gt;",
        "&lt;sign&gt;s&lt;/sign&gt;&lt;/credentials&gt;&lt;/loginTicketResponse&gt;",
        "</loginCmsReturn></Body></Envelope>",
    ))]
    fn test_malformed_responses(#[case] body: &str) {
        let err = parse_login_response(body).unwrap_err();
        assert!(matches!(err, TicketError::MalformedResponse { .. }), "got {err:?}");
    }
}
