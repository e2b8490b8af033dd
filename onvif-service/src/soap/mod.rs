//! SOAP envelope handling.
//!
//! Requests are parsed with `roxmltree` into an owned [`Element`] tree so the
//! body can be handed to async service code without borrowing the request
//! buffer. Responses are written as text inside a SOAP 1.2 envelope that
//! declares every prefix the services use.

use std::fmt::Write;

mod fault;

pub use fault::{Fault, FaultCode};

pub const SOAP12: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const SOAP11: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const WSA: &str = "http://www.w3.org/2005/08/addressing";
pub const WSSE: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSU: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
pub const TT: &str = "http://www.onvif.org/ver10/schema";
pub const TER: &str = "http://www.onvif.org/ver10/error";
pub const TDS: &str = "http://www.onvif.org/ver10/device/wsdl";
pub const TRT: &str = "http://www.onvif.org/ver10/media/wsdl";
pub const TPTZ: &str = "http://www.onvif.org/ver20/ptz/wsdl";
pub const TEV: &str = "http://www.onvif.org/ver10/events/wsdl";
pub const WSNT: &str = "http://docs.oasis-open.org/wsn/b-2";
pub const WSTOP: &str = "http://docs.oasis-open.org/wsn/t-1";
pub const TNS1: &str = "http://www.onvif.org/ver10/topics";
pub const WSRF_RW: &str = "http://docs.oasis-open.org/wsrf/rw-2";
pub const WSRF_BF: &str = "http://docs.oasis-open.org/wsrf/bf-2";

pub const CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

pub(crate) const NAMESPACES: &[(&str, &str)] = &[
    ("s", SOAP12),
    ("wsa", WSA),
    ("tt", TT),
    ("ter", TER),
    ("tds", TDS),
    ("trt", TRT),
    ("tptz", TPTZ),
    ("tev", TEV),
    ("wsnt", WSNT),
    ("wstop", WSTOP),
    ("tns1", TNS1),
    ("wsrf-rw", WSRF_RW),
    ("wsrf-bf", WSRF_BF),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapVersion {
    Soap11,
    Soap12,
}

/// Owned copy of an XML element.
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub namespace: Option<String>,
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
    scope: Vec<(Option<String>, String)>,
}

impl Element {
    fn from_node(node: roxmltree::Node) -> Element {
        let mut text = String::new();
        let mut children = Vec::new();
        for child in node.children() {
            if child.is_element() {
                children.push(Element::from_node(child));
            } else if child.is_text() {
                text.push_str(child.text().unwrap_or_default());
            }
        }

        Element {
            namespace: node.tag_name().namespace().map(str::to_owned),
            name: node.tag_name().name().to_owned(),
            attributes: node
                .attributes()
                .map(|a| (a.name().to_owned(), a.value().to_owned()))
                .collect(),
            children,
            text: text.trim().to_owned(),
            scope: node
                .namespaces()
                .map(|ns| (ns.name().map(str::to_owned), ns.uri().to_owned()))
                .collect(),
        }
    }

    pub fn parse(xml: &str) -> Result<Element, Fault> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| Fault::sender("ter:WellFormed", format!("malformed XML: {}", e)))?;
        Ok(Element::from_node(doc.root_element()))
    }

    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(namespace)
    }

    /// First child with the given local name, namespace ignored.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Walks local names from this element down.
    pub fn path(&self, path: &[&str]) -> Option<&Element> {
        path.iter().try_fold(self, |e, name| e.child(name))
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Resolves `prefix:local` against the namespaces in scope of this
    /// element. An unprefixed name takes the default namespace.
    pub fn resolve_qname<'a>(&self, qname: &'a str) -> (Option<String>, &'a str) {
        let (prefix, local) = match qname.split_once(':') {
            Some((p, l)) => (Some(p), l),
            None => (None, qname),
        };
        let namespace = self
            .scope
            .iter()
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.clone());
        (namespace, local)
    }
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub version: SoapVersion,
    pub header: Option<Element>,
    pub body: Element,
}

impl Envelope {
    pub fn parse(xml: &str) -> Result<Envelope, Fault> {
        let root = Element::parse(xml)?;

        let version = match root.namespace.as_deref() {
            Some(SOAP12) if root.name == "Envelope" => SoapVersion::Soap12,
            Some(SOAP11) if root.name == "Envelope" => SoapVersion::Soap11,
            _ => return Err(Fault::sender("ter:InvalidArgs", "not a SOAP envelope")),
        };

        let mut header = None;
        let mut body = None;
        for child in root.children {
            match child.name.as_str() {
                "Header" => header = Some(child),
                "Body" => body = child.children.into_iter().next(),
                _ => {}
            }
        }

        let body = body.ok_or_else(|| Fault::sender("ter:InvalidArgs", "empty SOAP body"))?;
        Ok(Envelope { version, header, body })
    }

    pub fn header(&self, namespace: &str, name: &str) -> Option<&Element> {
        self.header
            .as_ref()
            .and_then(|h| h.children.iter().find(|c| c.is(namespace, name)))
    }

    pub fn action(&self) -> Option<&str> {
        self.header(WSA, "Action").map(|e| e.text.as_str())
    }

    pub fn message_id(&self) -> Option<&str> {
        self.header(WSA, "MessageID").map(|e| e.text.as_str())
    }

    pub fn to(&self) -> Option<&str> {
        self.header(WSA, "To").map(|e| e.text.as_str())
    }

    /// Reference parameter echoed by clients addressing a subscription.
    pub fn subscription_id(&self) -> Option<&str> {
        self.header
            .as_ref()
            .and_then(|h| h.child("SubscriptionId"))
            .map(|e| e.text.as_str())
    }

    pub fn operation(&self) -> (&str, &str) {
        (self.body.namespace.as_deref().unwrap_or_default(), self.body.name.as_str())
    }
}

pub fn escape(s: &str) -> String {
    quick_xml::escape::escape(s).into_owned()
}

/// Wraps header and body fragments in a SOAP 1.2 envelope.
pub fn envelope(header: &str, body: &str) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?><s:Envelope");
    for (prefix, ns) in NAMESPACES {
        let _ = write!(out, " xmlns:{}=\"{}\"", prefix, ns);
    }
    out.push('>');
    if !header.is_empty() {
        let _ = write!(out, "<s:Header>{}</s:Header>", header);
    }
    let _ = write!(out, "<s:Body>{}</s:Body></s:Envelope>", body);
    out
}

/// WS-Addressing headers for a reply to `request`.
pub fn reply_header(request: &Envelope, action: &str) -> String {
    match request.message_id() {
        Some(id) => format!(
            "<wsa:Action>{}</wsa:Action><wsa:RelatesTo>{}</wsa:RelatesTo>",
            escape(action),
            escape(id)
        ),
        None if request.action().is_some() => format!("<wsa:Action>{}</wsa:Action>", escape(action)),
        None => String::new(),
    }
}
