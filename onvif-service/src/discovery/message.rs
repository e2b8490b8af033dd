//! WS-Discovery (2005/04) messages.

use std::fmt::Write;

use crate::model::DiscoveryType;
use crate::soap::{escape, Envelope, SOAP12};

pub const WSD: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery";
pub const WSA_2004: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";

pub const MATCH_BY_RFC3986: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/rfc3986";
pub const MATCH_BY_STRCMP: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/strcmp0";

const TO_DISCOVERY: &str = "urn:schemas-xmlsoap-org:ws:2005:04:discovery";
const TO_ANONYMOUS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Probe {
        message_id: Option<String>,
        /// Requested types as (namespace, local name).
        types: Vec<(Option<String>, String)>,
        scopes: Vec<String>,
        match_by: Option<String>,
    },
    Resolve {
        message_id: Option<String>,
        address: String,
    },
}

impl Request {
    /// Reads a Probe or Resolve; anything else (including our own Hello and
    /// Bye looped back by the kernel) is ignored.
    pub fn parse(xml: &str) -> Option<Request> {
        let envelope = Envelope::parse(xml).ok()?;
        let message_id = envelope.header(WSA_2004, "MessageID").map(|e| e.text.clone());
        let body = &envelope.body;

        if body.is(WSD, "Probe") {
            let types = body
                .child("Types")
                .map(|t| {
                    t.text
                        .split_whitespace()
                        .map(|q| {
                            let (ns, local) = t.resolve_qname(q);
                            (ns, local.to_owned())
                        })
                        .collect()
                })
                .unwrap_or_default();
            let scopes = body.child("Scopes");
            Some(Request::Probe {
                message_id,
                types,
                scopes: scopes
                    .map(|s| s.text.split_whitespace().map(str::to_owned).collect())
                    .unwrap_or_default(),
                match_by: scopes.and_then(|s| s.attr("MatchBy")).map(str::to_owned),
            })
        } else if body.is(WSD, "Resolve") {
            let address = body.path(&["EndpointReference", "Address"])?.text.clone();
            Some(Request::Resolve { message_id, address })
        } else {
            None
        }
    }
}

/// RFC 3986 prefix match: scheme and authority compare case-insensitively,
/// the requested path segments must lead the configured ones.
pub fn scope_matches(requested: &str, configured: &str, match_by: Option<&str>) -> bool {
    match match_by.unwrap_or(MATCH_BY_RFC3986) {
        MATCH_BY_STRCMP => requested == configured,
        MATCH_BY_RFC3986 => {
            let (r_scheme, r_authority, r_path) = split_uri(requested);
            let (c_scheme, c_authority, c_path) = split_uri(configured);
            if !r_scheme.eq_ignore_ascii_case(c_scheme) || !r_authority.eq_ignore_ascii_case(c_authority) {
                return false;
            }
            let r_segments: Vec<&str> = r_path.split('/').filter(|s| !s.is_empty()).collect();
            let c_segments: Vec<&str> = c_path.split('/').filter(|s| !s.is_empty()).collect();
            r_segments.len() <= c_segments.len() && r_segments.iter().zip(&c_segments).all(|(r, c)| r == c)
        }
        _ => false,
    }
}

fn split_uri(uri: &str) -> (&str, &str, &str) {
    let (scheme, rest) = uri.split_once(':').unwrap_or(("", uri));
    match rest.strip_prefix("//") {
        Some(rest) => match rest.find('/') {
            Some(i) => (scheme, &rest[..i], &rest[i..]),
            None => (scheme, rest, ""),
        },
        None => (scheme, "", rest),
    }
}

/// What this device announces about itself.
#[derive(Debug, Clone)]
pub struct Announcement {
    pub endpoint: String,
    pub types: Vec<DiscoveryType>,
    pub scopes: Vec<String>,
    pub xaddrs: Vec<String>,
    pub metadata_version: u32,
    pub instance_id: u64,
}

impl Announcement {
    pub fn matches(&self, request: &Request) -> bool {
        match request {
            Request::Probe {
                types, scopes, match_by, ..
            } => {
                let types_match = types.iter().all(|(ns, name)| {
                    self.types
                        .iter()
                        .any(|t| &t.name == name && ns.as_deref().map_or(true, |ns| ns == t.namespace))
                });
                let scopes_match = scopes
                    .iter()
                    .all(|r| self.scopes.iter().any(|c| scope_matches(r, c, match_by.as_deref())));
                types_match && scopes_match
            }
            Request::Resolve { address, .. } => address == &self.endpoint,
        }
    }

    fn envelope(&self, action: &str, message_id: &str, to: &str, relates_to: Option<&str>, message_number: u64, body: &str) -> String {
        let mut out = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><s:Envelope xmlns:s=\"{}\" xmlns:a=\"{}\" xmlns:d=\"{}\"",
            SOAP12, WSA_2004, WSD
        );
        for t in &self.types {
            let _ = write!(out, " xmlns:{}=\"{}\"", t.prefix, escape(&t.namespace));
        }
        let _ = write!(
            out,
            "><s:Header><a:Action>{}/{}</a:Action><a:MessageID>{}</a:MessageID>",
            WSD, action, message_id
        );
        if let Some(relates_to) = relates_to {
            let _ = write!(out, "<a:RelatesTo>{}</a:RelatesTo>", escape(relates_to));
        }
        let _ = write!(
            out,
            "<a:To>{}</a:To><d:AppSequence InstanceId=\"{}\" MessageNumber=\"{}\"/></s:Header><s:Body>{}</s:Body></s:Envelope>",
            to, self.instance_id, message_number, body
        );
        out
    }

    fn endpoint_xml(&self, with_addresses: bool) -> String {
        let mut out = format!(
            "<a:EndpointReference><a:Address>{}</a:Address></a:EndpointReference>",
            escape(&self.endpoint)
        );
        if !with_addresses {
            return out;
        }
        let types: Vec<String> = self.types.iter().map(|t| format!("{}:{}", t.prefix, t.name)).collect();
        let _ = write!(
            out,
            "<d:Types>{}</d:Types><d:Scopes>{}</d:Scopes><d:XAddrs>{}</d:XAddrs><d:MetadataVersion>{}</d:MetadataVersion>",
            escape(&types.join(" ")),
            escape(&self.scopes.join(" ")),
            escape(&self.xaddrs.join(" ")),
            self.metadata_version
        );
        out
    }

    pub fn hello(&self, message_id: &str, message_number: u64) -> String {
        let body = format!("<d:Hello>{}</d:Hello>", self.endpoint_xml(true));
        self.envelope("Hello", message_id, TO_DISCOVERY, None, message_number, &body)
    }

    pub fn bye(&self, message_id: &str, message_number: u64) -> String {
        let body = format!("<d:Bye>{}</d:Bye>", self.endpoint_xml(false));
        self.envelope("Bye", message_id, TO_DISCOVERY, None, message_number, &body)
    }

    /// ProbeMatches or ResolveMatches for `request`.
    pub fn reply(&self, request: &Request, message_id: &str, message_number: u64) -> String {
        let (action, body, relates_to) = match request {
            Request::Probe { message_id: relates_to, .. } => (
                "ProbeMatches",
                format!("<d:ProbeMatches><d:ProbeMatch>{}</d:ProbeMatch></d:ProbeMatches>", self.endpoint_xml(true)),
                relates_to,
            ),
            Request::Resolve { message_id: relates_to, .. } => (
                "ResolveMatches",
                format!("<d:ResolveMatches><d:ResolveMatch>{}</d:ResolveMatch></d:ResolveMatches>", self.endpoint_xml(true)),
                relates_to,
            ),
        };
        self.envelope(action, message_id, TO_ANONYMOUS, relates_to.as_deref(), message_number, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OnvifDiscovery;

    fn announcement() -> Announcement {
        let config = OnvifDiscovery::default();
        Announcement {
            endpoint: "urn:uuid:0f5d4ea5-1b1c-4e5a-9b43-2a5b6d1e0c11".to_owned(),
            types: config.types,
            scopes: config.scopes,
            xaddrs: vec!["http://192.168.1.10:5000/onvif/device_service".to_owned()],
            metadata_version: 1,
            instance_id: 42,
        }
    }

    fn probe(types: &str, scopes: Option<&str>) -> String {
        let scopes = scopes.map(|s| format!("<d:Scopes>{}</d:Scopes>", s)).unwrap_or_default();
        format!(
            r#"<s:Envelope xmlns:s="{}" xmlns:a="{}" xmlns:d="{}" xmlns:dn="http://www.onvif.org/ver10/network/wsdl" xmlns:tds="http://www.onvif.org/ver10/device/wsdl"><s:Header><a:MessageID>uuid:probe-1</a:MessageID><a:Action>{}/Probe</a:Action></s:Header><s:Body><d:Probe><d:Types>{}</d:Types>{}</d:Probe></s:Body></s:Envelope>"#,
            SOAP12, WSA_2004, WSD, WSD, types, scopes
        )
    }

    #[test]
    fn probes_match_on_types() {
        let device = announcement();
        let request = Request::parse(&probe("dn:NetworkVideoTransmitter", None)).unwrap();
        assert!(device.matches(&request));

        let request = Request::parse(&probe("tds:Device dn:NetworkVideoTransmitter", None)).unwrap();
        assert!(device.matches(&request));

        let request = Request::parse(&probe("dn:Printer", None)).unwrap();
        assert!(!device.matches(&request));

        let request = Request::parse(&probe("", None)).unwrap();
        assert!(device.matches(&request));
    }

    #[test]
    fn probes_match_on_scope_prefixes() {
        let device = announcement();
        let request = Request::parse(&probe("", Some("onvif://www.onvif.org/type"))).unwrap();
        assert!(device.matches(&request));

        let request = Request::parse(&probe("", Some("onvif://WWW.ONVIF.ORG/name/OnvifService"))).unwrap();
        assert!(device.matches(&request));

        let request = Request::parse(&probe("", Some("onvif://www.onvif.org/name/Other"))).unwrap();
        assert!(!device.matches(&request));
    }

    #[test]
    fn rfc3986_compares_whole_segments() {
        assert!(scope_matches("onvif://www.onvif.org/type/", "onvif://www.onvif.org/type/ptz", None));
        assert!(!scope_matches("onvif://www.onvif.org/ty", "onvif://www.onvif.org/type/ptz", None));
        assert!(!scope_matches("onvif://www.onvif.org/type/ptz/x", "onvif://www.onvif.org/type/ptz", None));
        assert!(scope_matches("a", "a", Some(MATCH_BY_STRCMP)));
        assert!(!scope_matches("a", "a/b", Some(MATCH_BY_STRCMP)));
        assert!(!scope_matches("a", "a", Some("urn:unknown")));
    }

    #[test]
    fn reply_relates_to_the_probe() {
        let device = announcement();
        let request = Request::parse(&probe("dn:NetworkVideoTransmitter", None)).unwrap();
        let xml = device.reply(&request, "urn:uuid:reply", 3);
        assert!(xml.contains("<a:RelatesTo>uuid:probe-1</a:RelatesTo>"));
        assert!(xml.contains("<d:XAddrs>http://192.168.1.10:5000/onvif/device_service</d:XAddrs>"));
        assert!(xml.contains("<d:Types>tds:Device dn:NetworkVideoTransmitter</d:Types>"));
        assert!(xml.contains("MessageNumber=\"3\""));
        roxmltree::Document::parse(&xml).unwrap();
    }

    #[test]
    fn resolves_our_endpoint_only() {
        let device = announcement();
        let resolve = |address: &str| {
            format!(
                r#"<s:Envelope xmlns:s="{}" xmlns:a="{}" xmlns:d="{}"><s:Header><a:MessageID>uuid:r</a:MessageID></s:Header><s:Body><d:Resolve><a:EndpointReference><a:Address>{}</a:Address></a:EndpointReference></d:Resolve></s:Body></s:Envelope>"#,
                SOAP12, WSA_2004, WSD, address
            )
        };
        let request = Request::parse(&resolve(&device.endpoint)).unwrap();
        assert!(device.matches(&request));
        assert!(device.reply(&request, "urn:uuid:x", 1).contains("<d:ResolveMatches>"));

        let request = Request::parse(&resolve("urn:uuid:someone-else")).unwrap();
        assert!(!device.matches(&request));
    }

    #[test]
    fn ignores_announcements() {
        let device = announcement();
        assert_eq!(Request::parse(&device.hello("urn:uuid:h", 1)), None);
        assert_eq!(Request::parse(&device.bye("urn:uuid:b", 2)), None);
        assert_eq!(Request::parse("garbage"), None);
    }
}
