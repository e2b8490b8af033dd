use std::fmt::Write;

use async_trait::async_trait;

use crate::model::{Media, MediaProfile};
use crate::soap::{escape, Fault};

use super::{ptz, required_text, Call, OnvifService};

/// Video source a profile is bound to: `Profile_N` reads from `VideoSource_N`.
pub(crate) fn video_source_token(profile: &MediaProfile) -> String {
    let suffix = profile.token.strip_prefix("Profile_").unwrap_or(&profile.token);
    format!("VideoSource_{}", suffix)
}

pub(crate) fn service_capabilities(media: &Media) -> String {
    format!(
        "<trt:Capabilities SnapshotUri=\"{}\" Rotation=\"false\" VideoSourceMode=\"false\" OSD=\"false\"><trt:ProfileCapabilities MaximumNumberOfProfiles=\"{}\"/><trt:StreamingCapabilities RTPMulticast=\"false\" RTP_TCP=\"true\" RTP_RTSP_TCP=\"true\" NonAggregateControl=\"false\" NoRTSPStreaming=\"false\"/></trt:Capabilities>",
        media.profiles.iter().any(|p| p.snapshot_uri.is_some()),
        media.profiles.len()
    )
}

fn no_profile(token: &str) -> Fault {
    Fault::invalid_arg(format!("profile {} does not exist", token)).with_subcode("ter:NoProfile")
}

fn media_uri(uri: &str) -> String {
    format!(
        "<trt:MediaUri><tt:Uri>{}</tt:Uri><tt:InvalidAfterConnect>false</tt:InvalidAfterConnect><tt:InvalidAfterReboot>false</tt:InvalidAfterReboot><tt:Timeout>PT0S</tt:Timeout></trt:MediaUri>",
        escape(uri)
    )
}

pub struct MediaImpl {
    media: Media,
}

impl MediaImpl {
    pub fn new(media: &Media) -> Self {
        MediaImpl { media: media.clone() }
    }

    fn profile(&self, call: &Call<'_>) -> Result<&MediaProfile, Fault> {
        let token = required_text(call.body(), "ProfileToken")?;
        self.media
            .profiles
            .iter()
            .find(|p| p.token == token)
            .ok_or_else(|| no_profile(token))
    }

    fn profile_xml(element: &str, profile: &MediaProfile) -> String {
        format!(
            "<{element} token=\"{token}\" fixed=\"true\"><tt:Name>{name}</tt:Name>\
             <tt:VideoSourceConfiguration token=\"VSC_{token}\"><tt:Name>{name}</tt:Name><tt:UseCount>1</tt:UseCount><tt:SourceToken>{source}</tt:SourceToken><tt:Bounds x=\"0\" y=\"0\" width=\"{width}\" height=\"{height}\"/></tt:VideoSourceConfiguration>\
             <tt:VideoEncoderConfiguration token=\"VEC_{token}\"><tt:Name>{name}</tt:Name><tt:UseCount>1</tt:UseCount><tt:Encoding>{encoding}</tt:Encoding><tt:Resolution><tt:Width>{width}</tt:Width><tt:Height>{height}</tt:Height></tt:Resolution><tt:Quality>5</tt:Quality><tt:RateControl><tt:FrameRateLimit>{fps}</tt:FrameRateLimit><tt:EncodingInterval>1</tt:EncodingInterval><tt:BitrateLimit>4096</tt:BitrateLimit></tt:RateControl><tt:SessionTimeout>PT60S</tt:SessionTimeout></tt:VideoEncoderConfiguration>\
             {ptz}</{element}>",
            element = element,
            token = escape(&profile.token),
            name = escape(&profile.name),
            source = escape(&video_source_token(profile)),
            width = profile.width,
            height = profile.height,
            encoding = escape(&profile.encoding),
            fps = profile.frame_rate,
            ptz = ptz::configuration_xml(profile),
        )
    }

    fn profiles(&self) -> String {
        let mut out = String::from("<trt:GetProfilesResponse>");
        for profile in &self.media.profiles {
            out.push_str(&MediaImpl::profile_xml("trt:Profiles", profile));
        }
        out.push_str("</trt:GetProfilesResponse>");
        out
    }

    fn video_sources(&self) -> String {
        let mut seen = Vec::new();
        let mut out = String::from("<trt:GetVideoSourcesResponse>");
        for profile in &self.media.profiles {
            let token = video_source_token(profile);
            if seen.contains(&token) {
                continue;
            }
            let _ = write!(
                out,
                "<trt:VideoSources token=\"{}\"><tt:Framerate>{}</tt:Framerate><tt:Resolution><tt:Width>{}</tt:Width><tt:Height>{}</tt:Height></tt:Resolution></trt:VideoSources>",
                escape(&token),
                profile.frame_rate,
                profile.width,
                profile.height
            );
            seen.push(token);
        }
        out.push_str("</trt:GetVideoSourcesResponse>");
        out
    }

    fn stream_uri(&self, call: &Call<'_>) -> Result<String, Fault> {
        let profile = self.profile(call)?;

        if let Some(setup) = call.body().child("StreamSetup") {
            match setup.child_text("Stream") {
                None | Some("RTP-Unicast") => {}
                Some(other) => {
                    return Err(Fault::invalid_arg(format!("stream type {} is not supported", other))
                        .with_subcode("ter:InvalidStreamSetup"))
                }
            }
            match setup.path(&["Transport", "Protocol"]).map(|p| p.text.as_str()) {
                None | Some("UDP") | Some("TCP") | Some("RTSP") | Some("HTTP") => {}
                Some(other) => {
                    return Err(Fault::invalid_arg(format!("transport {} is not supported", other))
                        .with_subcode("ter:InvalidStreamSetup"))
                }
            }
        }

        Ok(format!(
            "<trt:GetStreamUriResponse>{}</trt:GetStreamUriResponse>",
            media_uri(&profile.stream_uri)
        ))
    }

    fn snapshot_uri(&self, call: &Call<'_>) -> Result<String, Fault> {
        let profile = self.profile(call)?;
        let uri = profile.snapshot_uri.as_deref().ok_or_else(|| {
            Fault::receiver("ter:ActionNotSupported", format!("profile {} has no snapshot", profile.token))
                .with_subcode("ter:SnapshotNotSupported")
        })?;
        Ok(format!(
            "<trt:GetSnapshotUriResponse>{}</trt:GetSnapshotUriResponse>",
            media_uri(uri)
        ))
    }
}

#[async_trait]
impl OnvifService for MediaImpl {
    async fn call(&self, call: &Call<'_>) -> Result<String, Fault> {
        match call.name() {
            "GetServiceCapabilities" => Ok(format!(
                "<trt:GetServiceCapabilitiesResponse>{}</trt:GetServiceCapabilitiesResponse>",
                service_capabilities(&self.media)
            )),
            "GetProfiles" => Ok(self.profiles()),
            "GetProfile" => {
                let profile = self.profile(call)?;
                Ok(format!(
                    "<trt:GetProfileResponse>{}</trt:GetProfileResponse>",
                    MediaImpl::profile_xml("trt:Profile", profile)
                ))
            }
            "GetVideoSources" => Ok(self.video_sources()),
            "GetStreamUri" => self.stream_uri(call),
            "GetSnapshotUri" => self.snapshot_uri(call),
            _ => Err(call.unsupported()),
        }
    }
}
