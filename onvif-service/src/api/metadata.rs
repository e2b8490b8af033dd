//! WSDL documents for the contracts mapped at each path.

use std::fmt::Write;

use crate::soap::{escape, NAMESPACES};

use super::host::Endpoint;

pub const CONTENT_TYPE: &str = "text/xml; charset=utf-8";

const WSDL: &str = "http://schemas.xmlsoap.org/wsdl/";
const WSDL_SOAP12: &str = "http://schemas.xmlsoap.org/wsdl/soap12/";
const HTTP_TRANSPORT: &str = "http://schemas.xmlsoap.org/soap/http";

fn prefix_of(namespace: &str) -> &'static str {
    NAMESPACES
        .iter()
        .find(|(_, ns)| *ns == namespace)
        .map(|(p, _)| *p)
        .unwrap_or("tns")
}

/// `?wsdl` and `?singleWsdl` both select the metadata document.
pub fn is_metadata_query(query: &str) -> bool {
    query
        .split('&')
        .map(|p| p.split('=').next().unwrap_or_default())
        .any(|p| p.eq_ignore_ascii_case("wsdl") || p.eq_ignore_ascii_case("singleWsdl"))
}

/// Renders a WSDL 1.1 document for `endpoint` addressed at `base_url`.
pub fn wsdl(endpoint: &Endpoint, base_url: &str) -> String {
    let service_name = endpoint.path.rsplit('/').next().unwrap_or(endpoint.path);
    let target = format!("urn:onvif-service:{}", service_name);

    let mut out = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><wsdl:definitions xmlns:wsdl=\"{}\" xmlns:soap12=\"{}\" xmlns:tns=\"{}\"",
        WSDL,
        WSDL_SOAP12,
        escape(&target)
    );
    for (prefix, ns) in NAMESPACES {
        let _ = write!(out, " xmlns:{}=\"{}\"", prefix, ns);
    }
    let _ = write!(out, " targetNamespace=\"{}\">", escape(&target));

    for contract in &endpoint.contracts {
        for op in contract.operations {
            let prefix = prefix_of(op.namespace);
            let _ = write!(
                out,
                "<wsdl:message name=\"{c}_{o}Request\"><wsdl:part name=\"parameters\" element=\"{p}:{o}\"/></wsdl:message>\
                 <wsdl:message name=\"{c}_{o}Response\"><wsdl:part name=\"parameters\" element=\"{p}:{o}Response\"/></wsdl:message>",
                c = contract.name,
                o = op.name,
                p = prefix
            );
        }
    }

    for contract in &endpoint.contracts {
        let _ = write!(out, "<wsdl:portType name=\"{}\">", contract.name);
        for op in contract.operations {
            let _ = write!(
                out,
                "<wsdl:operation name=\"{o}\"><wsdl:input message=\"tns:{c}_{o}Request\"/><wsdl:output message=\"tns:{c}_{o}Response\"/></wsdl:operation>",
                c = contract.name,
                o = op.name
            );
        }
        out.push_str("</wsdl:portType>");
    }

    for contract in &endpoint.contracts {
        let _ = write!(
            out,
            "<wsdl:binding name=\"{c}Binding\" type=\"tns:{c}\"><soap12:binding style=\"document\" transport=\"{t}\"/>",
            c = contract.name,
            t = HTTP_TRANSPORT
        );
        for op in contract.operations {
            let _ = write!(
                out,
                "<wsdl:operation name=\"{}\"><soap12:operation soapAction=\"{}\"/><wsdl:input><soap12:body use=\"literal\"/></wsdl:input><wsdl:output><soap12:body use=\"literal\"/></wsdl:output></wsdl:operation>",
                op.name,
                escape(&contract.action(op.name))
            );
        }
        out.push_str("</wsdl:binding>");
    }

    let _ = write!(out, "<wsdl:service name=\"{}\">", escape(service_name));
    for contract in &endpoint.contracts {
        let _ = write!(
            out,
            "<wsdl:port name=\"{c}Port\" binding=\"tns:{c}Binding\"><soap12:address location=\"{a}{p}\"/></wsdl:port>",
            c = contract.name,
            a = escape(base_url),
            p = endpoint.path
        );
    }
    out.push_str("</wsdl:service></wsdl:definitions>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Config;
    use crate::onvif::{Onvif, EVENTS_SUBSCRIPTION};

    #[test]
    fn recognises_metadata_queries() {
        assert!(is_metadata_query("wsdl"));
        assert!(is_metadata_query("singleWsdl"));
        assert!(is_metadata_query("x=1&WSDL"));
        assert!(!is_metadata_query("subscription=1"));
        assert!(!is_metadata_query(""));
    }

    #[test]
    fn port_types_list_contract_operations() {
        let onvif = Onvif::new(Config::default()).unwrap();
        let endpoints = onvif.service_builder().unwrap().build();
        let endpoint = endpoints.iter().find(|e| e.path == EVENTS_SUBSCRIPTION).unwrap();

        let xml = wsdl(endpoint, "http://192.168.1.10:5000");
        let doc = roxmltree::Document::parse(&xml).unwrap();

        let port_types: Vec<&str> = doc
            .descendants()
            .filter(|n| n.has_tag_name((WSDL, "portType")))
            .filter_map(|n| n.attribute("name"))
            .collect();
        assert_eq!(
            port_types,
            vec!["SubscriptionManager", "PausableSubscriptionManager", "PullPointSubscription"]
        );

        let pull_point: Vec<&str> = doc
            .descendants()
            .find(|n| n.has_tag_name((WSDL, "portType")) && n.attribute("name") == Some("PullPointSubscription"))
            .unwrap()
            .children()
            .filter_map(|n| n.attribute("name"))
            .collect();
        assert_eq!(pull_point, vec!["PullMessages", "Seek", "SetSynchronizationPoint", "Unsubscribe"]);

        assert!(xml.contains("location=\"http://192.168.1.10:5000/onvif/Events/Subscription\""));
        assert!(xml.contains("element=\"wsnt:Unsubscribe\""));
    }
}
