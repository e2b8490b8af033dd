//! HTTP Digest authentication (RFC 7616).
//!
//! Nonces are stateless: `base64(timestamp || hmac(timestamp)[..16])`, so any
//! worker can validate a nonce issued by another one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::AuthError;

pub const REALM: &str = "onvif";
const NONCE_TAG_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl Algorithm {
    fn parse(s: &str) -> Option<Algorithm> {
        match s.to_ascii_uppercase().as_str() {
            "MD5" => Some(Algorithm::Md5),
            "MD5-SESS" => Some(Algorithm::Md5Sess),
            "SHA-256" => Some(Algorithm::Sha256),
            "SHA-256-SESS" => Some(Algorithm::Sha256Sess),
            _ => None,
        }
    }

    fn hash(&self, data: &str) -> String {
        match self {
            Algorithm::Md5 | Algorithm::Md5Sess => format!("{:x}", Md5::digest(data.as_bytes())),
            Algorithm::Sha256 | Algorithm::Sha256Sess => format!("{:x}", Sha256::digest(data.as_bytes())),
        }
    }

    fn is_session(&self) -> bool {
        matches!(self, Algorithm::Md5Sess | Algorithm::Sha256Sess)
    }
}

/// Parsed `Authorization: Digest ...` header.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestCredentials {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub algorithm: Algorithm,
    pub qop: Option<String>,
    pub nc: Option<String>,
    pub cnonce: Option<String>,
    pub opaque: Option<String>,
}

impl DigestCredentials {
    pub fn parse(header: &str) -> Result<DigestCredentials, AuthError> {
        let header = header.trim();
        let rest = match header.get(..6) {
            Some(scheme) if scheme.eq_ignore_ascii_case("digest") => &header[6..],
            _ => return Err(AuthError::UnsupportedScheme),
        };

        let params = parse_params(rest);
        let take = |name: &str| params.get(name).cloned();
        let require = |name: &'static str| take(name).ok_or(AuthError::MissingParameter(name));

        let algorithm = match take("algorithm") {
            Some(a) => Algorithm::parse(&a).ok_or(AuthError::UnsupportedAlgorithm(a))?,
            None => Algorithm::Md5,
        };

        let credentials = DigestCredentials {
            username: require("username")?,
            realm: require("realm")?,
            nonce: require("nonce")?,
            uri: require("uri")?,
            response: require("response")?.to_ascii_lowercase(),
            algorithm,
            qop: take("qop"),
            nc: take("nc"),
            cnonce: take("cnonce"),
            opaque: take("opaque"),
        };

        if let Some(qop) = &credentials.qop {
            if qop != "auth" {
                return Err(AuthError::UnsupportedQop(qop.clone()));
            }
            if credentials.nc.is_none() || credentials.cnonce.is_none() {
                return Err(AuthError::MissingParameter("cnonce"));
            }
        }

        Ok(credentials)
    }

    /// Expected `response` value for `password` and the request `method`.
    pub fn expected_response(&self, password: &str, method: &str) -> String {
        let alg = self.algorithm;
        let mut ha1 = alg.hash(&format!("{}:{}:{}", self.username, self.realm, password));
        if alg.is_session() {
            ha1 = alg.hash(&format!("{}:{}:{}", ha1, self.nonce, self.cnonce.as_deref().unwrap_or_default()));
        }
        let ha2 = alg.hash(&format!("{}:{}", method, self.uri));

        match &self.qop {
            Some(qop) => alg.hash(&format!(
                "{}:{}:{}:{}:{}:{}",
                ha1,
                self.nonce,
                self.nc.as_deref().unwrap_or_default(),
                self.cnonce.as_deref().unwrap_or_default(),
                qop,
                ha2
            )),
            None => alg.hash(&format!("{}:{}:{}", ha1, self.nonce, ha2)),
        }
    }
}

fn parse_params(s: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = s.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            break;
        }
        if chars.next() != Some('=') {
            continue;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(c) = chars.next() {
                            value.push(c);
                        }
                    }
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    params
}

/// Issues and validates nonces, keyed per process.
pub struct NonceIssuer {
    key: Hmac<Sha256>,
    opaque: String,
    lifetime: chrono::Duration,
}

impl NonceIssuer {
    pub fn new(lifetime: chrono::Duration) -> crate::Result<Self> {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let mut opaque = [0u8; 16];
        OsRng.fill_bytes(&mut opaque);

        Ok(NonceIssuer {
            key: Hmac::new_from_slice(&secret).map_err(|_| anyhow::anyhow!("invalid nonce key length"))?,
            opaque: opaque.iter().map(|b| format!("{:02x}", b)).collect(),
            lifetime,
        })
    }

    fn tag(&self, timestamp: i64) -> Vec<u8> {
        let mut mac = self.key.clone();
        mac.update(&timestamp.to_be_bytes());
        mac.finalize().into_bytes()[..NONCE_TAG_LEN].to_vec()
    }

    pub fn issue(&self, now: DateTime<Utc>) -> String {
        let timestamp = now.timestamp_millis();
        let mut raw = timestamp.to_be_bytes().to_vec();
        raw.extend(self.tag(timestamp));
        base64::encode(raw)
    }

    pub fn opaque(&self) -> &str {
        &self.opaque
    }

    pub fn validate(&self, nonce: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        let raw = base64::decode(nonce).map_err(|_| AuthError::InvalidNonce)?;
        if raw.len() != 8 + NONCE_TAG_LEN {
            return Err(AuthError::InvalidNonce);
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&raw[..8]);
        let timestamp = i64::from_be_bytes(ts);

        let mut mac = self.key.clone();
        mac.update(&ts);
        mac.verify_truncated_left(&raw[8..]).map_err(|_| AuthError::InvalidNonce)?;

        let age = now.timestamp_millis() - timestamp;
        if age < 0 || age > self.lifetime.num_milliseconds() {
            return Err(AuthError::StaleNonce);
        }
        Ok(())
    }

    /// Value for `WWW-Authenticate`.
    pub fn challenge(&self, now: DateTime<Utc>, stale: bool) -> String {
        format!(
            "Digest realm=\"{}\", qop=\"auth\", algorithm=MD5, nonce=\"{}\", opaque=\"{}\"{}",
            REALM,
            self.issue(now),
            self.opaque,
            if stale { ", stale=true" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 2617 section 3.5
    const RFC_HEADER: &str = r#"Digest username="Mufasa",
        realm="testrealm@host.com",
        nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093",
        uri="/dir/index.html",
        qop=auth,
        nc=00000001,
        cnonce="0a4f113b",
        response="6629fae49393a05397450978507c4ef1",
        opaque="5ccc069c403ebaf9f0171e9517f40e41""#;

    #[test]
    fn matches_rfc_2617_example() {
        let credentials = DigestCredentials::parse(RFC_HEADER).unwrap();
        assert_eq!(credentials.username, "Mufasa");
        assert_eq!(credentials.algorithm, Algorithm::Md5);
        assert_eq!(credentials.qop.as_deref(), Some("auth"));
        assert_eq!(credentials.opaque.as_deref(), Some("5ccc069c403ebaf9f0171e9517f40e41"));
        assert_eq!(credentials.expected_response("Circle Of Life", "GET"), credentials.response);
        assert_ne!(credentials.expected_response("wrong", "GET"), credentials.response);
    }

    #[test]
    fn rejects_other_schemes_and_missing_fields() {
        assert_eq!(DigestCredentials::parse("Basic YWRtaW46cGFzc3dvcmQ="), Err(AuthError::UnsupportedScheme));
        assert_eq!(
            DigestCredentials::parse(r#"Digest username="a", realm="r", nonce="n", uri="/""#),
            Err(AuthError::MissingParameter("response"))
        );
        assert!(matches!(
            DigestCredentials::parse(r#"Digest username="a", realm="r", nonce="n", uri="/", response="x", algorithm=SHA-512"#),
            Err(AuthError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            DigestCredentials::parse(r#"Digest username="a", realm="r", nonce="n", uri="/", response="x", qop=auth-int, nc=1, cnonce="c""#),
            Err(AuthError::UnsupportedQop(_))
        ));
    }

    #[test]
    fn scheme_is_case_insensitive() {
        for scheme in ["DIGEST", "digest", "Digest"] {
            let parsed = DigestCredentials::parse(&format!(
                r#"{} username="a", realm="r", nonce="n", uri="/", response="x""#,
                scheme
            ))
            .unwrap();
            assert_eq!(parsed.username, "a");
        }
    }

    #[test]
    fn legacy_digest_without_qop() {
        let mut credentials = DigestCredentials::parse(RFC_HEADER).unwrap();
        credentials.qop = None;
        let expected = {
            let ha1 = format!("{:x}", Md5::digest(b"Mufasa:testrealm@host.com:Circle Of Life"));
            let ha2 = format!("{:x}", Md5::digest(b"GET:/dir/index.html"));
            format!("{:x}", Md5::digest(format!("{}:dcd98b7102dd2f0e8b11d0f600bfb0c093:{}", ha1, ha2).as_bytes()))
        };
        assert_eq!(credentials.expected_response("Circle Of Life", "GET"), expected);
    }

    #[test]
    fn sha256_session_variant() {
        let header = r#"Digest username="admin", realm="onvif", nonce="abc", uri="/onvif/device_service", algorithm=SHA-256-sess, qop=auth, nc=00000001, cnonce="xyz", response="00""#;
        let credentials = DigestCredentials::parse(header).unwrap();
        let ha1 = format!("{:x}", Sha256::digest(b"admin:onvif:password"));
        let ha1 = format!("{:x}", Sha256::digest(format!("{}:abc:xyz", ha1).as_bytes()));
        let ha2 = format!("{:x}", Sha256::digest(b"POST:/onvif/device_service"));
        let expected = format!("{:x}", Sha256::digest(format!("{}:abc:00000001:xyz:auth:{}", ha1, ha2).as_bytes()));
        assert_eq!(credentials.expected_response("password", "POST"), expected);
    }

    #[test]
    fn nonces_expire_and_resist_tampering() {
        let issuer = NonceIssuer::new(chrono::Duration::minutes(5)).unwrap();
        let now = Utc::now();
        let nonce = issuer.issue(now);

        assert_eq!(issuer.validate(&nonce, now + chrono::Duration::minutes(1)), Ok(()));
        assert_eq!(issuer.validate(&nonce, now + chrono::Duration::minutes(6)), Err(AuthError::StaleNonce));

        let other = NonceIssuer::new(chrono::Duration::minutes(5)).unwrap();
        assert_eq!(other.validate(&nonce, now), Err(AuthError::InvalidNonce));
        assert_eq!(issuer.validate("garbage", now), Err(AuthError::InvalidNonce));
    }

    #[test]
    fn challenge_carries_stale_flag() {
        let issuer = NonceIssuer::new(chrono::Duration::minutes(5)).unwrap();
        let challenge = issuer.challenge(Utc::now(), true);
        assert!(challenge.starts_with("Digest realm=\"onvif\""));
        assert!(challenge.ends_with("stale=true"));
        assert!(challenge.contains(issuer.opaque()));
    }
}
