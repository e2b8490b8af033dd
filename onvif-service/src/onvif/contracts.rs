//! Port types served by this device, with the access class of every
//! operation.

use crate::auth::Access::{self, *};
use crate::soap::{TDS, TEV, TPTZ, TRT, WSNT};

use super::{Contract, Operation};

const fn op(name: &'static str, namespace: &'static str, access: Access) -> Operation {
    Operation { name, namespace, access }
}

pub static DEVICE: Contract = Contract {
    name: "Device",
    prefix: "tds",
    namespace: TDS,
    action_base: "http://www.onvif.org/ver10/device/wsdl",
    operations: &[
        op("GetServices", TDS, PreAuth),
        op("GetServiceCapabilities", TDS, PreAuth),
        op("GetDeviceInformation", TDS, ReadSystem),
        op("GetSystemDateAndTime", TDS, PreAuth),
        op("GetCapabilities", TDS, PreAuth),
        op("GetScopes", TDS, ReadSystem),
        op("GetHostname", TDS, PreAuth),
        op("GetNetworkInterfaces", TDS, ReadSystem),
        op("GetUsers", TDS, ReadSystemSecret),
        op("GetWsdlUrl", TDS, PreAuth),
        op("GetDiscoveryMode", TDS, ReadSystem),
        op("SystemReboot", TDS, Unrecoverable),
    ],
};

pub static MEDIA: Contract = Contract {
    name: "Media",
    prefix: "trt",
    namespace: TRT,
    action_base: "http://www.onvif.org/ver10/media/wsdl",
    operations: &[
        op("GetServiceCapabilities", TRT, PreAuth),
        op("GetProfiles", TRT, ReadMedia),
        op("GetProfile", TRT, ReadMedia),
        op("GetVideoSources", TRT, ReadMedia),
        op("GetStreamUri", TRT, ReadMedia),
        op("GetSnapshotUri", TRT, ReadMedia),
    ],
};

pub static PTZ: Contract = Contract {
    name: "PTZ",
    prefix: "tptz",
    namespace: TPTZ,
    action_base: "http://www.onvif.org/ver20/ptz/wsdl",
    operations: &[
        op("GetServiceCapabilities", TPTZ, PreAuth),
        op("GetNodes", TPTZ, ReadMedia),
        op("GetNode", TPTZ, ReadMedia),
        op("GetConfigurations", TPTZ, ReadMedia),
        op("GetStatus", TPTZ, ReadMedia),
        op("ContinuousMove", TPTZ, Actuate),
        op("RelativeMove", TPTZ, Actuate),
        op("AbsoluteMove", TPTZ, Actuate),
        op("Stop", TPTZ, Actuate),
        op("GetPresets", TPTZ, ReadMedia),
        op("SetPreset", TPTZ, Actuate),
        op("GotoPreset", TPTZ, Actuate),
        op("RemovePreset", TPTZ, Actuate),
        op("GotoHomePosition", TPTZ, Actuate),
    ],
};

pub static NOTIFICATION_PRODUCER: Contract = Contract {
    name: "NotificationProducer",
    prefix: "wsnt",
    namespace: WSNT,
    action_base: "http://docs.oasis-open.org/wsn/bw-2/NotificationProducer",
    operations: &[
        op("Subscribe", WSNT, ReadMedia),
        op("GetCurrentMessage", WSNT, ReadMedia),
    ],
};

pub static EVENT_PORT_TYPE: Contract = Contract {
    name: "EventPortType",
    prefix: "tev",
    namespace: TEV,
    action_base: "http://www.onvif.org/ver10/events/wsdl/EventPortType",
    operations: &[
        op("GetServiceCapabilities", TEV, PreAuth),
        op("CreatePullPointSubscription", TEV, ReadMedia),
        op("GetEventProperties", TEV, ReadMedia),
    ],
};

pub static PULL_POINT: Contract = Contract {
    name: "PullPoint",
    prefix: "wsnt",
    namespace: WSNT,
    action_base: "http://docs.oasis-open.org/wsn/bw-2/PullPoint",
    operations: &[
        op("GetMessages", WSNT, ReadMedia),
        op("DestroyPullPoint", WSNT, ReadMedia),
        op("Notify", WSNT, Actuate),
    ],
};

pub static SUBSCRIPTION_MANAGER: Contract = Contract {
    name: "SubscriptionManager",
    prefix: "wsnt",
    namespace: WSNT,
    action_base: "http://docs.oasis-open.org/wsn/bw-2/SubscriptionManager",
    operations: &[
        op("Renew", WSNT, ReadMedia),
        op("Unsubscribe", WSNT, ReadMedia),
    ],
};

pub static PAUSABLE_SUBSCRIPTION_MANAGER: Contract = Contract {
    name: "PausableSubscriptionManager",
    prefix: "wsnt",
    namespace: WSNT,
    action_base: "http://docs.oasis-open.org/wsn/bw-2/PausableSubscriptionManager",
    operations: &[
        op("Renew", WSNT, ReadMedia),
        op("Unsubscribe", WSNT, ReadMedia),
        op("PauseSubscription", WSNT, ReadMedia),
        op("ResumeSubscription", WSNT, ReadMedia),
    ],
};

pub static PULL_POINT_SUBSCRIPTION: Contract = Contract {
    name: "PullPointSubscription",
    prefix: "tev",
    namespace: TEV,
    action_base: "http://www.onvif.org/ver10/events/wsdl/PullPointSubscription",
    operations: &[
        op("PullMessages", TEV, ReadMedia),
        op("Seek", TEV, ReadMedia),
        op("SetSynchronizationPoint", TEV, ReadMedia),
        op("Unsubscribe", WSNT, ReadMedia),
    ],
};
