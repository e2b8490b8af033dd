use std::fmt::Write;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc};

use crate::model::{Config, DeviceInfo, Media};
use crate::repository::UserRepository;
use crate::soap::{escape, Fault, TDS, TEV, TPTZ, TRT};

use super::{events, media, ptz, Call, OnvifService, DEVICE_SERVICE, EVENTS_SERVICE, MEDIA_SERVICE, PTZ_SERVICE};

pub struct DeviceImpl {
    info: DeviceInfo,
    scopes: Vec<String>,
    discoverable: bool,
    addresses: Vec<Ipv4Addr>,
    media: Media,
    users: Arc<dyn UserRepository>,
}

pub(crate) fn service_capabilities() -> &'static str {
    "<tds:Capabilities>\
     <tds:Network IPFilter=\"false\" ZeroConfiguration=\"false\" IPVersion6=\"false\" DynDNS=\"false\" HostnameFromDHCP=\"false\"/>\
     <tds:Security TLS1.2=\"true\" HttpDigest=\"true\" UsernameToken=\"true\" DefaultAccessPolicy=\"true\"/>\
     <tds:System DiscoveryResolve=\"true\" DiscoveryBye=\"true\" RemoteDiscovery=\"false\" SystemBackup=\"false\" SystemLogging=\"false\" FirmwareUpgrade=\"false\"/>\
     </tds:Capabilities>"
}

impl DeviceImpl {
    pub fn new(config: &Config, users: Arc<dyn UserRepository>) -> Self {
        DeviceImpl {
            info: config.device.clone(),
            scopes: config.discovery.scopes.clone(),
            discoverable: config.discovery.enabled,
            addresses: crate::discovery::interface_addresses(&config.discovery),
            media: config.media.clone(),
            users,
        }
    }

    fn device_information(&self) -> String {
        let info = &self.info;
        format!(
            "<tds:GetDeviceInformationResponse><tds:Manufacturer>{}</tds:Manufacturer><tds:Model>{}</tds:Model><tds:FirmwareVersion>{}</tds:FirmwareVersion><tds:SerialNumber>{}</tds:SerialNumber><tds:HardwareId>{}</tds:HardwareId></tds:GetDeviceInformationResponse>",
            escape(&info.manufacturer),
            escape(&info.model),
            escape(&info.firmware_version),
            escape(&info.serial_number),
            escape(&info.hardware_id)
        )
    }

    fn system_date_and_time(&self) -> String {
        let now = Utc::now();
        format!(
            "<tds:GetSystemDateAndTimeResponse><tds:SystemDateAndTime><tt:DateTimeType>Manual</tt:DateTimeType><tt:DaylightSavings>false</tt:DaylightSavings><tt:TimeZone><tt:TZ>UTC0</tt:TZ></tt:TimeZone><tt:UTCDateTime><tt:Time><tt:Hour>{}</tt:Hour><tt:Minute>{}</tt:Minute><tt:Second>{}</tt:Second></tt:Time><tt:Date><tt:Year>{}</tt:Year><tt:Month>{}</tt:Month><tt:Day>{}</tt:Day></tt:Date></tt:UTCDateTime></tds:SystemDateAndTime></tds:GetSystemDateAndTimeResponse>",
            now.hour(),
            now.minute(),
            now.second(),
            now.year(),
            now.month(),
            now.day()
        )
    }

    fn services(&self, call: &Call<'_>) -> String {
        let include = call
            .body()
            .child_text("IncludeCapability")
            .map_or(false, |v| v == "true" || v == "1");

        let services: [(&str, &str, String, u32, u32); 4] = [
            (TDS, DEVICE_SERVICE, service_capabilities().to_owned(), 2, 5),
            (TRT, MEDIA_SERVICE, media::service_capabilities(&self.media), 2, 5),
            (TPTZ, PTZ_SERVICE, ptz::service_capabilities().to_owned(), 2, 5),
            (TEV, EVENTS_SERVICE, events::service_capabilities().to_owned(), 2, 5),
        ];

        let mut out = String::from("<tds:GetServicesResponse>");
        for (namespace, path, capabilities, major, minor) in services {
            let _ = write!(
                out,
                "<tds:Service><tds:Namespace>{}</tds:Namespace><tds:XAddr>{}</tds:XAddr>",
                namespace,
                escape(&call.xaddr(path))
            );
            if include {
                let _ = write!(out, "<tds:Capabilities>{}</tds:Capabilities>", capabilities);
            }
            let _ = write!(
                out,
                "<tds:Version><tt:Major>{}</tt:Major><tt:Minor>{}</tt:Minor></tds:Version></tds:Service>",
                major, minor
            );
        }
        out.push_str("</tds:GetServicesResponse>");
        out
    }

    fn capabilities(&self, call: &Call<'_>) -> Result<String, Fault> {
        let categories: Vec<&str> = call.body().children_named("Category").map(|c| c.text.as_str()).collect();
        let wants = |name: &str| categories.is_empty() || categories.iter().any(|c| *c == "All" || *c == name);

        if let Some(unknown) = categories
            .iter()
            .find(|c| !matches!(**c, "All" | "Device" | "Events" | "Media" | "PTZ"))
        {
            return Err(Fault::receiver("ter:ActionNotSupported", format!("no {} capability", unknown)).with_subcode("ter:NoSuchService"));
        }

        let mut out = String::from("<tds:GetCapabilitiesResponse><tds:Capabilities>");
        if wants("Device") {
            let _ = write!(
                out,
                "<tt:Device><tt:XAddr>{}</tt:XAddr><tt:Network><tt:IPFilter>false</tt:IPFilter><tt:ZeroConfiguration>false</tt:ZeroConfiguration><tt:IPVersion6>false</tt:IPVersion6><tt:DynDNS>false</tt:DynDNS></tt:Network><tt:System><tt:DiscoveryResolve>true</tt:DiscoveryResolve><tt:DiscoveryBye>true</tt:DiscoveryBye><tt:RemoteDiscovery>false</tt:RemoteDiscovery><tt:SystemBackup>false</tt:SystemBackup><tt:SystemLogging>false</tt:SystemLogging><tt:FirmwareUpgrade>false</tt:FirmwareUpgrade><tt:SupportedVersions><tt:Major>2</tt:Major><tt:Minor>5</tt:Minor></tt:SupportedVersions></tt:System><tt:Security><tt:TLS1.1>false</tt:TLS1.1><tt:TLS1.2>true</tt:TLS1.2><tt:OnboardKeyGeneration>false</tt:OnboardKeyGeneration><tt:AccessPolicyConfig>false</tt:AccessPolicyConfig><tt:X.509Token>false</tt:X.509Token><tt:SAMLToken>false</tt:SAMLToken><tt:KerberosToken>false</tt:KerberosToken><tt:RELToken>false</tt:RELToken></tt:Security></tt:Device>",
                escape(&call.xaddr(DEVICE_SERVICE))
            );
        }
        if wants("Events") {
            let _ = write!(
                out,
                "<tt:Events><tt:XAddr>{}</tt:XAddr><tt:WSSubscriptionPolicySupport>false</tt:WSSubscriptionPolicySupport><tt:WSPullPointSupport>true</tt:WSPullPointSupport><tt:WSPausableSubscriptionManagerInterfaceSupport>true</tt:WSPausableSubscriptionManagerInterfaceSupport></tt:Events>",
                escape(&call.xaddr(EVENTS_SERVICE))
            );
        }
        if wants("Media") {
            let _ = write!(
                out,
                "<tt:Media><tt:XAddr>{}</tt:XAddr><tt:StreamingCapabilities><tt:RTPMulticast>false</tt:RTPMulticast><tt:RTP_TCP>true</tt:RTP_TCP><tt:RTP_RTSP_TCP>true</tt:RTP_RTSP_TCP></tt:StreamingCapabilities></tt:Media>",
                escape(&call.xaddr(MEDIA_SERVICE))
            );
        }
        if wants("PTZ") {
            let _ = write!(out, "<tt:PTZ><tt:XAddr>{}</tt:XAddr></tt:PTZ>", escape(&call.xaddr(PTZ_SERVICE)));
        }
        out.push_str("</tds:Capabilities></tds:GetCapabilitiesResponse>");
        Ok(out)
    }

    fn scopes(&self) -> String {
        let mut out = String::from("<tds:GetScopesResponse>");
        for scope in &self.scopes {
            let _ = write!(
                out,
                "<tds:Scopes><tt:ScopeDef>Fixed</tt:ScopeDef><tt:ScopeItem>{}</tt:ScopeItem></tds:Scopes>",
                escape(scope)
            );
        }
        out.push_str("</tds:GetScopesResponse>");
        out
    }

    fn network_interfaces(&self) -> String {
        let mut out = String::from("<tds:GetNetworkInterfacesResponse>");
        for (i, address) in self.addresses.iter().enumerate() {
            let _ = write!(
                out,
                "<tds:NetworkInterfaces token=\"eth{}\"><tt:Enabled>true</tt:Enabled><tt:IPv4><tt:Enabled>true</tt:Enabled><tt:Config><tt:Manual><tt:Address>{}</tt:Address><tt:PrefixLength>24</tt:PrefixLength></tt:Manual><tt:DHCP>false</tt:DHCP></tt:Config></tt:IPv4></tds:NetworkInterfaces>",
                i, address
            );
        }
        out.push_str("</tds:GetNetworkInterfacesResponse>");
        out
    }

    async fn users(&self) -> String {
        let mut out = String::from("<tds:GetUsersResponse>");
        for user in self.users.list_users().await {
            let _ = write!(
                out,
                "<tds:User><tt:Username>{}</tt:Username><tt:UserLevel>{}</tt:UserLevel></tds:User>",
                escape(&user.user_name),
                user.level.as_str()
            );
        }
        out.push_str("</tds:GetUsersResponse>");
        out
    }
}

#[async_trait]
impl OnvifService for DeviceImpl {
    async fn call(&self, call: &Call<'_>) -> Result<String, Fault> {
        match call.name() {
            "GetDeviceInformation" => Ok(self.device_information()),
            "GetSystemDateAndTime" => Ok(self.system_date_and_time()),
            "GetServices" => Ok(self.services(call)),
            "GetServiceCapabilities" => Ok(format!(
                "<tds:GetServiceCapabilitiesResponse>{}</tds:GetServiceCapabilitiesResponse>",
                service_capabilities()
            )),
            "GetCapabilities" => self.capabilities(call),
            "GetScopes" => Ok(self.scopes()),
            "GetHostname" => Ok(format!(
                "<tds:GetHostnameResponse><tds:HostnameInformation><tt:FromDHCP>false</tt:FromDHCP><tt:Name>{}</tt:Name></tds:HostnameInformation></tds:GetHostnameResponse>",
                escape(&self.info.hostname)
            )),
            "GetNetworkInterfaces" => Ok(self.network_interfaces()),
            "GetUsers" => Ok(self.users().await),
            "GetWsdlUrl" => Ok("<tds:GetWsdlUrlResponse><tds:WsdlUrl>http://www.onvif.org/</tds:WsdlUrl></tds:GetWsdlUrlResponse>".to_owned()),
            "GetDiscoveryMode" => Ok(format!(
                "<tds:GetDiscoveryModeResponse><tds:DiscoveryMode>{}</tds:DiscoveryMode></tds:GetDiscoveryModeResponse>",
                if self.discoverable { "Discoverable" } else { "NonDiscoverable" }
            )),
            "SystemReboot" => {
                tracing::warn!("SystemReboot requested by {:?}, ignoring", call.principal.user_name);
                Ok("<tds:SystemRebootResponse><tds:Message>Rebooting in 0 seconds</tds:Message></tds:SystemRebootResponse>".to_owned())
            }
            _ => Err(call.unsupported()),
        }
    }
}
