use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};

use crate::soap::{Element, Envelope, WSSE};

use super::{constant_time_compare, AuthError};

const PASSWORD_TEXT: &str = "#PasswordText";

/// WS-Security `UsernameToken` taken from the SOAP header.
#[derive(Debug, Clone, PartialEq)]
pub struct UsernameToken {
    pub username: String,
    pub password: String,
    pub digest: bool,
    pub nonce: Option<String>,
    pub created: Option<String>,
}

impl UsernameToken {
    pub fn from_envelope(envelope: &Envelope) -> Option<Result<UsernameToken, AuthError>> {
        let token = envelope.header(WSSE, "Security")?.child("UsernameToken")?;
        Some(UsernameToken::from_element(token))
    }

    fn from_element(token: &Element) -> Result<UsernameToken, AuthError> {
        let username = token.child_text("Username").ok_or(AuthError::MissingParameter("Username"))?;
        let password = token.child("Password").ok_or(AuthError::MissingParameter("Password"))?;
        let digest = !password.attr("Type").map_or(false, |t| t.ends_with(PASSWORD_TEXT));

        Ok(UsernameToken {
            username: username.to_owned(),
            password: password.text.clone(),
            digest,
            nonce: token.child_text("Nonce").map(str::to_owned),
            created: token.child_text("Created").map(str::to_owned),
        })
    }

    /// `Base64(SHA1(nonce || created || password))`.
    pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(nonce);
        hasher.update(created.as_bytes());
        hasher.update(password.as_bytes());
        base64::encode(hasher.finalize())
    }

    pub fn verify(&self, password: &str, now: DateTime<Utc>, max_skew: chrono::Duration) -> Result<(), AuthError> {
        if !self.digest {
            return if constant_time_compare(&self.password, password) { Ok(()) } else { Err(AuthError::BadCredentials) };
        }

        let nonce = self.nonce.as_deref().ok_or(AuthError::MissingParameter("Nonce"))?;
        let created = self.created.as_deref().ok_or(AuthError::MissingParameter("Created"))?;

        let created_at = DateTime::parse_from_rfc3339(created)
            .map_err(|_| AuthError::InvalidTimestamp)?
            .with_timezone(&Utc);
        if (now - created_at).num_milliseconds().abs() > max_skew.num_milliseconds() {
            return Err(AuthError::InvalidTimestamp);
        }

        let nonce = base64::decode(nonce).map_err(|_| AuthError::InvalidNonce)?;
        if constant_time_compare(&UsernameToken::password_digest(&nonce, created, password), &self.password) {
            Ok(())
        } else {
            Err(AuthError::BadCredentials)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(created: &str, digest: &str) -> String {
        format!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Header>
    <Security xmlns="{wsse}">
      <UsernameToken>
        <Username>admin</Username>
        <Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{digest}</Password>
        <Nonce>bm9uY2U=</Nonce>
        <Created xmlns="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">{created}</Created>
      </UsernameToken>
    </Security>
  </s:Header>
  <s:Body><GetUsers xmlns="http://www.onvif.org/ver10/device/wsdl"/></s:Body>
</s:Envelope>"#,
            wsse = WSSE,
            digest = digest,
            created = created
        )
    }

    #[test]
    fn verifies_password_digest() {
        let now = Utc::now();
        let created = now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let digest = UsernameToken::password_digest(b"nonce", &created, "password");
        let envelope = Envelope::parse(&request(&created, &digest)).unwrap();
        let token = UsernameToken::from_envelope(&envelope).unwrap().unwrap();

        assert_eq!(token.username, "admin");
        assert!(token.digest);
        let skew = chrono::Duration::minutes(5);
        assert_eq!(token.verify("password", now, skew), Ok(()));
        assert_eq!(token.verify("other", now, skew), Err(AuthError::BadCredentials));
        assert_eq!(token.verify("password", now + chrono::Duration::minutes(10), skew), Err(AuthError::InvalidTimestamp));
    }

    #[test]
    fn absent_security_header() {
        let envelope = Envelope::parse(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><GetUsers/></s:Body></s:Envelope>"#,
        )
        .unwrap();
        assert!(UsernameToken::from_envelope(&envelope).is_none());
    }
}
