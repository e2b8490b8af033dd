use thiserror::Error;

use super::{envelope, escape};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    Sender,
    Receiver,
}

/// SOAP 1.2 fault with ONVIF subcodes, outermost first.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{code:?} fault {subcodes:?}: {reason}")]
pub struct Fault {
    pub code: FaultCode,
    pub subcodes: Vec<String>,
    pub reason: String,
}

impl Fault {
    pub fn sender(subcode: &str, reason: impl Into<String>) -> Fault {
        Fault {
            code: FaultCode::Sender,
            subcodes: vec![subcode.to_owned()],
            reason: reason.into(),
        }
    }

    pub fn receiver(subcode: &str, reason: impl Into<String>) -> Fault {
        Fault {
            code: FaultCode::Receiver,
            subcodes: vec![subcode.to_owned()],
            reason: reason.into(),
        }
    }

    pub fn with_subcode(mut self, subcode: &str) -> Fault {
        self.subcodes.push(subcode.to_owned());
        self
    }

    pub fn not_authorized() -> Fault {
        Fault::sender("ter:NotAuthorized", "Sender not authorized")
    }

    pub fn action_not_supported(operation: &str) -> Fault {
        Fault::receiver("ter:ActionNotSupported", format!("{} is not supported on this endpoint", operation))
    }

    pub fn invalid_arg(reason: impl Into<String>) -> Fault {
        Fault::sender("ter:InvalidArgVal", reason)
    }

    pub fn missing_arg(name: &str) -> Fault {
        Fault::sender("ter:InvalidArgs", format!("missing argument {}", name))
    }

    pub fn resource_unknown(reason: impl Into<String>) -> Fault {
        Fault::sender("wsrf-rw:ResourceUnknownFault", reason)
    }

    pub fn is_sender(&self) -> bool {
        self.code == FaultCode::Sender
    }

    pub fn to_xml(&self) -> String {
        let code = match self.code {
            FaultCode::Sender => "s:Sender",
            FaultCode::Receiver => "s:Receiver",
        };

        let mut subcodes = String::new();
        for subcode in self.subcodes.iter().rev() {
            subcodes = format!("<s:Subcode><s:Value>{}</s:Value>{}</s:Subcode>", escape(subcode), subcodes);
        }

        envelope(
            "",
            &format!(
                "<s:Fault><s:Code><s:Value>{}</s:Value>{}</s:Code><s:Reason><s:Text xml:lang=\"en\">{}</s:Text></s:Reason></s:Fault>",
                code,
                subcodes,
                escape(&self.reason)
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nests_subcodes_in_order() {
        let fault = Fault::invalid_arg("bad token").with_subcode("ter:NoProfile");
        let xml = fault.to_xml();
        let outer = xml.find("ter:InvalidArgVal").unwrap();
        let inner = xml.find("ter:NoProfile").unwrap();
        assert!(outer < inner);
        assert!(xml.contains("<s:Value>s:Sender</s:Value>"));
        assert!(xml.contains("bad token"));
    }

    #[test]
    fn receiver_faults() {
        let fault = Fault::action_not_supported("Foo");
        assert!(!fault.is_sender());
        assert!(fault.to_xml().contains("s:Receiver"));
    }
}
