//! Simulated pan/tilt/zoom head, one per media profile.
//!
//! Positions live in the ONVIF generic spaces: pan and tilt in `[-1, 1]`,
//! zoom in `[0, 1]`. A continuous move stores a velocity and its start time;
//! the position is integrated whenever it is read or another move replaces it.

use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::model::{Media, MediaProfile, XsDuration};
use crate::soap::{escape, Element, Fault};

use super::{required_text, Call, OnvifService};

const NODE_TOKEN: &str = "PTZNode_1";
const MAX_PRESETS: usize = 100;

const PAN_TILT_POSITION_SPACE: &str = "http://www.onvif.org/ver10/tptz/PanTiltSpaces/PositionGenericSpace";
const ZOOM_POSITION_SPACE: &str = "http://www.onvif.org/ver10/tptz/ZoomSpaces/PositionGenericSpace";
const PAN_TILT_TRANSLATION_SPACE: &str = "http://www.onvif.org/ver10/tptz/PanTiltSpaces/TranslationGenericSpace";
const ZOOM_TRANSLATION_SPACE: &str = "http://www.onvif.org/ver10/tptz/ZoomSpaces/TranslationGenericSpace";
const PAN_TILT_VELOCITY_SPACE: &str = "http://www.onvif.org/ver10/tptz/PanTiltSpaces/VelocityGenericSpace";
const ZOOM_VELOCITY_SPACE: &str = "http://www.onvif.org/ver10/tptz/ZoomSpaces/VelocityGenericSpace";
const PAN_TILT_SPEED_SPACE: &str = "http://www.onvif.org/ver10/tptz/PanTiltSpaces/GenericSpeedSpace";
const ZOOM_SPEED_SPACE: &str = "http://www.onvif.org/ver10/tptz/ZoomSpaces/ZoomGenericSpeedSpace";

pub(crate) fn service_capabilities() -> &'static str {
    "<tptz:Capabilities EFlip=\"false\" Reverse=\"false\" GetCompatibleConfigurations=\"false\" MoveStatus=\"true\" StatusPosition=\"true\"/>"
}

fn configuration_token(profile: &MediaProfile) -> String {
    format!("PTZ_{}", profile.token)
}

fn configuration(element: &str, profile: &MediaProfile) -> String {
    format!(
        "<{element} token=\"{token}\"><tt:Name>{token}</tt:Name><tt:UseCount>1</tt:UseCount><tt:NodeToken>{node}</tt:NodeToken>\
         <tt:DefaultAbsolutePantTiltPositionSpace>{pt_pos}</tt:DefaultAbsolutePantTiltPositionSpace>\
         <tt:DefaultAbsoluteZoomPositionSpace>{z_pos}</tt:DefaultAbsoluteZoomPositionSpace>\
         <tt:DefaultRelativePanTiltTranslationSpace>{pt_tr}</tt:DefaultRelativePanTiltTranslationSpace>\
         <tt:DefaultRelativeZoomTranslationSpace>{z_tr}</tt:DefaultRelativeZoomTranslationSpace>\
         <tt:DefaultContinuousPanTiltVelocitySpace>{pt_vel}</tt:DefaultContinuousPanTiltVelocitySpace>\
         <tt:DefaultContinuousZoomVelocitySpace>{z_vel}</tt:DefaultContinuousZoomVelocitySpace>\
         <tt:DefaultPTZSpeed><tt:PanTilt x=\"1\" y=\"1\" space=\"{pt_speed}\"/><tt:Zoom x=\"1\" space=\"{z_speed}\"/></tt:DefaultPTZSpeed>\
         <tt:DefaultPTZTimeout>PT5S</tt:DefaultPTZTimeout></{element}>",
        element = element,
        token = escape(&configuration_token(profile)),
        node = NODE_TOKEN,
        pt_pos = PAN_TILT_POSITION_SPACE,
        z_pos = ZOOM_POSITION_SPACE,
        pt_tr = PAN_TILT_TRANSLATION_SPACE,
        z_tr = ZOOM_TRANSLATION_SPACE,
        pt_vel = PAN_TILT_VELOCITY_SPACE,
        z_vel = ZOOM_VELOCITY_SPACE,
        pt_speed = PAN_TILT_SPEED_SPACE,
        z_speed = ZOOM_SPEED_SPACE,
    )
}

/// `tt:PTZConfiguration` embedded in media profiles.
pub(crate) fn configuration_xml(profile: &MediaProfile) -> String {
    configuration("tt:PTZConfiguration", profile)
}

fn node_xml() -> String {
    let range = |uri: &str, min: i32, max: i32| {
        format!(
            "<tt:URI>{}</tt:URI><tt:XRange><tt:Min>{}</tt:Min><tt:Max>{}</tt:Max></tt:XRange>",
            uri, min, max
        )
    };
    let range2 = |uri: &str, min: i32, max: i32| {
        format!(
            "{}<tt:YRange><tt:Min>{}</tt:Min><tt:Max>{}</tt:Max></tt:YRange>",
            range(uri, min, max),
            min,
            max
        )
    };

    format!(
        "<tptz:PTZNode token=\"{node}\" FixedHomePosition=\"false\"><tt:Name>{node}</tt:Name><tt:SupportedPTZSpaces>\
         <tt:AbsolutePanTiltPositionSpace>{}</tt:AbsolutePanTiltPositionSpace>\
         <tt:AbsoluteZoomPositionSpace>{}</tt:AbsoluteZoomPositionSpace>\
         <tt:RelativePanTiltTranslationSpace>{}</tt:RelativePanTiltTranslationSpace>\
         <tt:RelativeZoomTranslationSpace>{}</tt:RelativeZoomTranslationSpace>\
         <tt:ContinuousPanTiltVelocitySpace>{}</tt:ContinuousPanTiltVelocitySpace>\
         <tt:ContinuousZoomVelocitySpace>{}</tt:ContinuousZoomVelocitySpace>\
         <tt:PanTiltSpeedSpace>{}</tt:PanTiltSpeedSpace>\
         <tt:ZoomSpeedSpace>{}</tt:ZoomSpeedSpace>\
         </tt:SupportedPTZSpaces><tt:MaximumNumberOfPresets>{max}</tt:MaximumNumberOfPresets><tt:HomeSupported>true</tt:HomeSupported></tptz:PTZNode>",
        range2(PAN_TILT_POSITION_SPACE, -1, 1),
        range(ZOOM_POSITION_SPACE, 0, 1),
        range2(PAN_TILT_TRANSLATION_SPACE, -1, 1),
        range(ZOOM_TRANSLATION_SPACE, -1, 1),
        range2(PAN_TILT_VELOCITY_SPACE, -1, 1),
        range(ZOOM_VELOCITY_SPACE, -1, 1),
        range(PAN_TILT_SPEED_SPACE, 0, 1),
        range(ZOOM_SPEED_SPACE, 0, 1),
        node = NODE_TOKEN,
        max = MAX_PRESETS,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector {
    pub pan: f64,
    pub tilt: f64,
    pub zoom: f64,
}

impl Vector {
    fn clamped(self) -> Vector {
        Vector {
            pan: self.pan.clamp(-1.0, 1.0),
            tilt: self.tilt.clamp(-1.0, 1.0),
            zoom: self.zoom.clamp(0.0, 1.0),
        }
    }

    /// Reads a `tt:PTZVector`/`tt:PTZSpeed`; absent components keep `base`.
    fn parse(e: &Element, base: Vector) -> Result<Vector, Fault> {
        let number = |e: &Element, attr: &str, current: f64| -> Result<f64, Fault> {
            match e.attr(attr) {
                Some(v) => v
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| Fault::invalid_arg(format!("{} is not a number", v))),
                None => Ok(current),
            }
        };

        let mut out = base;
        if let Some(pt) = e.child("PanTilt") {
            out.pan = number(pt, "x", base.pan)?;
            out.tilt = number(pt, "y", base.tilt)?;
        }
        if let Some(z) = e.child("Zoom") {
            out.zoom = number(z, "x", base.zoom)?;
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy)]
struct Motion {
    velocity: Vector,
    started: Instant,
    until: Option<Instant>,
}

#[derive(Debug, Clone)]
struct Preset {
    token: String,
    name: String,
    position: Vector,
}

#[derive(Debug, Default)]
struct PtzState {
    position: Vector,
    motion: Option<Motion>,
    presets: Vec<Preset>,
    next_preset: u32,
}

impl PtzState {
    fn position_at(&self, now: Instant) -> Vector {
        match &self.motion {
            Some(m) => {
                let end = m.until.map_or(now, |u| u.min(now));
                let secs = end.saturating_duration_since(m.started).as_secs_f64();
                Vector {
                    pan: self.position.pan + m.velocity.pan * secs,
                    tilt: self.position.tilt + m.velocity.tilt * secs,
                    zoom: self.position.zoom + m.velocity.zoom * secs,
                }
                .clamped()
            }
            None => self.position,
        }
    }

    /// Folds any running motion into the stored position.
    fn settle(&mut self, now: Instant) {
        self.position = self.position_at(now);
        let expired = self.motion.map_or(false, |m| m.until.map_or(false, |u| u <= now));
        if expired {
            self.motion = None;
        } else if let Some(m) = &mut self.motion {
            m.started = now;
        }
    }

    fn moving(&self, now: Instant) -> (bool, bool) {
        match &self.motion {
            Some(m) if m.until.map_or(true, |u| u > now) => {
                let at = self.position_at(now);
                let pan_tilt = (m.velocity.pan > 0.0 && at.pan < 1.0)
                    || (m.velocity.pan < 0.0 && at.pan > -1.0)
                    || (m.velocity.tilt > 0.0 && at.tilt < 1.0)
                    || (m.velocity.tilt < 0.0 && at.tilt > -1.0);
                let zoom = (m.velocity.zoom > 0.0 && at.zoom < 1.0) || (m.velocity.zoom < 0.0 && at.zoom > 0.0);
                (pan_tilt, zoom)
            }
            _ => (false, false),
        }
    }

    fn move_to(&mut self, now: Instant, position: Vector) {
        self.settle(now);
        self.motion = None;
        self.position = position.clamped();
    }

    fn stop(&mut self, now: Instant, pan_tilt: bool, zoom: bool) {
        self.settle(now);
        if let Some(m) = &mut self.motion {
            if pan_tilt {
                m.velocity.pan = 0.0;
                m.velocity.tilt = 0.0;
            }
            if zoom {
                m.velocity.zoom = 0.0;
            }
            if m.velocity == Vector::default() {
                self.motion = None;
            }
        }
    }
}

fn no_token(token: &str) -> Fault {
    Fault::invalid_arg(format!("preset {} does not exist", token)).with_subcode("ter:NoToken")
}

fn no_profile(token: &str) -> Fault {
    Fault::invalid_arg(format!("profile {} does not exist", token)).with_subcode("ter:NoProfile")
}

fn bool_arg(body: &Element, name: &str) -> Result<Option<bool>, Fault> {
    match body.child_text(name) {
        None => Ok(None),
        Some("true") | Some("1") => Ok(Some(true)),
        Some("false") | Some("0") => Ok(Some(false)),
        Some(other) => Err(Fault::invalid_arg(format!("{} is not a boolean", other))),
    }
}

pub struct PtzImpl {
    profiles: Vec<MediaProfile>,
    state: Mutex<HashMap<String, PtzState>>,
}

impl PtzImpl {
    pub fn new(media: &Media) -> Self {
        let state = media
            .profiles
            .iter()
            .map(|p| (p.token.clone(), PtzState::default()))
            .collect();
        PtzImpl {
            profiles: media.profiles.clone(),
            state: Mutex::new(state),
        }
    }

    /// Runs `f` on the state of the profile named by `ProfileToken`.
    async fn with_state<T>(
        &self,
        call: &Call<'_>,
        f: impl FnOnce(&mut PtzState, Instant) -> Result<T, Fault>,
    ) -> Result<T, Fault> {
        let token = required_text(call.body(), "ProfileToken")?;
        let mut state = self.state.lock().await;
        let state = state.get_mut(token).ok_or_else(|| no_profile(token))?;
        f(state, Instant::now())
    }

    fn configurations(&self) -> String {
        let mut out = String::from("<tptz:GetConfigurationsResponse>");
        for profile in &self.profiles {
            out.push_str(&configuration("tptz:PTZConfiguration", profile));
        }
        out.push_str("</tptz:GetConfigurationsResponse>");
        out
    }

    async fn status(&self, call: &Call<'_>) -> Result<String, Fault> {
        let (position, (pan_tilt, zoom)) = self
            .with_state(call, |s, now| Ok((s.position_at(now), s.moving(now))))
            .await?;
        let status = |moving: bool| if moving { "MOVING" } else { "IDLE" };
        Ok(format!(
            "<tptz:GetStatusResponse><tptz:PTZStatus><tt:Position><tt:PanTilt x=\"{}\" y=\"{}\" space=\"{}\"/><tt:Zoom x=\"{}\" space=\"{}\"/></tt:Position><tt:MoveStatus><tt:PanTilt>{}</tt:PanTilt><tt:Zoom>{}</tt:Zoom></tt:MoveStatus><tt:UtcTime>{}</tt:UtcTime></tptz:PTZStatus></tptz:GetStatusResponse>",
            position.pan,
            position.tilt,
            PAN_TILT_POSITION_SPACE,
            position.zoom,
            ZOOM_POSITION_SPACE,
            status(pan_tilt),
            status(zoom),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        ))
    }

    async fn continuous_move(&self, call: &Call<'_>) -> Result<String, Fault> {
        let velocity = call.body().child("Velocity").ok_or_else(|| Fault::missing_arg("Velocity"))?;
        let velocity = Vector::parse(velocity, Vector::default())?;
        let velocity = Vector {
            pan: velocity.pan.clamp(-1.0, 1.0),
            tilt: velocity.tilt.clamp(-1.0, 1.0),
            zoom: velocity.zoom.clamp(-1.0, 1.0),
        };
        let timeout = match call.body().child_text("Timeout") {
            Some(t) => Some(
                t.parse::<XsDuration>()
                    .map_err(|e| Fault::invalid_arg(format!("Timeout: {}", e)))?
                    .as_duration(),
            ),
            None => None,
        };

        self.with_state(call, |s, now| {
            s.settle(now);
            s.motion = Some(Motion {
                velocity,
                started: now,
                until: timeout.map(|t: Duration| now + t),
            });
            Ok(())
        })
        .await?;
        Ok("<tptz:ContinuousMoveResponse/>".to_owned())
    }

    async fn relative_move(&self, call: &Call<'_>) -> Result<String, Fault> {
        let translation = call
            .body()
            .child("Translation")
            .ok_or_else(|| Fault::missing_arg("Translation"))?;
        let translation = Vector::parse(translation, Vector::default())?;

        self.with_state(call, |s, now| {
            let from = s.position_at(now);
            s.move_to(
                now,
                Vector {
                    pan: from.pan + translation.pan,
                    tilt: from.tilt + translation.tilt,
                    zoom: from.zoom + translation.zoom,
                },
            );
            Ok(())
        })
        .await?;
        Ok("<tptz:RelativeMoveResponse/>".to_owned())
    }

    async fn absolute_move(&self, call: &Call<'_>) -> Result<String, Fault> {
        let target = call.body().child("Position").ok_or_else(|| Fault::missing_arg("Position"))?;
        self.with_state(call, |s, now| {
            let to = Vector::parse(target, s.position_at(now))?;
            s.move_to(now, to);
            Ok(())
        })
        .await?;
        Ok("<tptz:AbsoluteMoveResponse/>".to_owned())
    }

    async fn stop(&self, call: &Call<'_>) -> Result<String, Fault> {
        let pan_tilt = bool_arg(call.body(), "PanTilt")?.unwrap_or(true);
        let zoom = bool_arg(call.body(), "Zoom")?.unwrap_or(true);
        self.with_state(call, |s, now| {
            s.stop(now, pan_tilt, zoom);
            Ok(())
        })
        .await?;
        Ok("<tptz:StopResponse/>".to_owned())
    }

    async fn presets(&self, call: &Call<'_>) -> Result<String, Fault> {
        let presets = self.with_state(call, |s, _| Ok(s.presets.clone())).await?;
        let mut out = String::from("<tptz:GetPresetsResponse>");
        for preset in presets {
            let _ = write!(
                out,
                "<tptz:Preset token=\"{}\"><tt:Name>{}</tt:Name><tt:PTZPosition><tt:PanTilt x=\"{}\" y=\"{}\" space=\"{}\"/><tt:Zoom x=\"{}\" space=\"{}\"/></tt:PTZPosition></tptz:Preset>",
                escape(&preset.token),
                escape(&preset.name),
                preset.position.pan,
                preset.position.tilt,
                PAN_TILT_POSITION_SPACE,
                preset.position.zoom,
                ZOOM_POSITION_SPACE
            );
        }
        out.push_str("</tptz:GetPresetsResponse>");
        Ok(out)
    }

    async fn set_preset(&self, call: &Call<'_>) -> Result<String, Fault> {
        let body = call.body();
        let name = body.child_text("PresetName").filter(|n| !n.is_empty()).map(str::to_owned);
        let token = body.child_text("PresetToken").filter(|t| !t.is_empty()).map(str::to_owned);

        let token = self
            .with_state(call, |s, now| {
                let position = s.position_at(now);

                if let Some(name) = &name {
                    if s.presets.iter().any(|p| &p.name == name && Some(&p.token) != token.as_ref()) {
                        return Err(Fault::invalid_arg(format!("preset name {} is in use", name))
                            .with_subcode("ter:PresetExist"));
                    }
                }

                match token {
                    Some(token) => {
                        let preset = s.presets.iter_mut().find(|p| p.token == token).ok_or_else(|| no_token(&token))?;
                        preset.position = position;
                        if let Some(name) = name {
                            preset.name = name;
                        }
                        Ok(token)
                    }
                    None => {
                        if s.presets.len() >= MAX_PRESETS {
                            return Err(Fault::receiver("ter:Action", "no room for another preset")
                                .with_subcode("ter:TooManyPresets"));
                        }
                        s.next_preset += 1;
                        let token = format!("Preset_{}", s.next_preset);
                        s.presets.push(Preset {
                            token: token.clone(),
                            name: name.unwrap_or_else(|| token.clone()),
                            position,
                        });
                        Ok(token)
                    }
                }
            })
            .await?;

        Ok(format!(
            "<tptz:SetPresetResponse><tptz:PresetToken>{}</tptz:PresetToken></tptz:SetPresetResponse>",
            escape(&token)
        ))
    }

    async fn goto_preset(&self, call: &Call<'_>) -> Result<String, Fault> {
        let token = required_text(call.body(), "PresetToken")?;
        self.with_state(call, |s, now| {
            let position = s
                .presets
                .iter()
                .find(|p| p.token == token)
                .map(|p| p.position)
                .ok_or_else(|| no_token(token))?;
            s.move_to(now, position);
            Ok(())
        })
        .await?;
        Ok("<tptz:GotoPresetResponse/>".to_owned())
    }

    async fn remove_preset(&self, call: &Call<'_>) -> Result<String, Fault> {
        let token = required_text(call.body(), "PresetToken")?;
        self.with_state(call, |s, _| {
            let before = s.presets.len();
            s.presets.retain(|p| p.token != token);
            if s.presets.len() == before {
                return Err(no_token(token));
            }
            Ok(())
        })
        .await?;
        Ok("<tptz:RemovePresetResponse/>".to_owned())
    }
}

#[async_trait]
impl OnvifService for PtzImpl {
    async fn call(&self, call: &Call<'_>) -> Result<String, Fault> {
        match call.name() {
            "GetServiceCapabilities" => Ok(format!(
                "<tptz:GetServiceCapabilitiesResponse>{}</tptz:GetServiceCapabilitiesResponse>",
                service_capabilities()
            )),
            "GetNodes" => Ok(format!("<tptz:GetNodesResponse>{}</tptz:GetNodesResponse>", node_xml())),
            "GetNode" => {
                let token = required_text(call.body(), "NodeToken")?;
                if token != NODE_TOKEN {
                    return Err(Fault::invalid_arg(format!("node {} does not exist", token)).with_subcode("ter:NoEntity"));
                }
                Ok(format!(
                    "<tptz:GetNodeResponse>{}</tptz:GetNodeResponse>",
                    node_xml()
                ))
            }
            "GetConfigurations" => Ok(self.configurations()),
            "GetStatus" => self.status(call).await,
            "ContinuousMove" => self.continuous_move(call).await,
            "RelativeMove" => self.relative_move(call).await,
            "AbsoluteMove" => self.absolute_move(call).await,
            "Stop" => self.stop(call).await,
            "GetPresets" => self.presets(call).await,
            "SetPreset" => self.set_preset(call).await,
            "GotoPreset" => self.goto_preset(call).await,
            "RemovePreset" => self.remove_preset(call).await,
            "GotoHomePosition" => {
                self.with_state(call, |s, now| {
                    s.move_to(now, Vector::default());
                    Ok(())
                })
                .await?;
                Ok("<tptz:GotoHomePositionResponse/>".to_owned())
            }
            _ => Err(call.unsupported()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(pan: f64, tilt: f64, zoom: f64) -> Vector {
        Vector { pan, tilt, zoom }
    }

    #[test]
    fn positions_are_clamped() {
        assert_eq!(vector(2.0, -3.0, 1.5).clamped(), vector(1.0, -1.0, 1.0));
        assert_eq!(vector(0.5, 0.5, -0.5).clamped(), vector(0.5, 0.5, 0.0));
    }

    #[test]
    fn parses_partial_vectors() {
        let e = Element::parse(r#"<Position><PanTilt x="0.25" y="-0.5"/></Position>"#).unwrap();
        let v = Vector::parse(&e, vector(0.0, 0.0, 0.75)).unwrap();
        assert_eq!(v, vector(0.25, -0.5, 0.75));

        let e = Element::parse(r#"<Position><Zoom x="abc"/></Position>"#).unwrap();
        assert!(Vector::parse(&e, Vector::default()).is_err());
    }

    #[test]
    fn continuous_motion_integrates_and_stops() {
        let start = Instant::now();
        let mut state = PtzState::default();
        state.motion = Some(Motion {
            velocity: vector(0.5, 0.0, 0.0),
            started: start,
            until: None,
        });

        let later = start + Duration::from_secs(1);
        assert!((state.position_at(later).pan - 0.5).abs() < 1e-9);
        assert_eq!(state.moving(later), (true, false));

        let much_later = start + Duration::from_secs(10);
        assert_eq!(state.position_at(much_later).pan, 1.0);
        assert_eq!(state.moving(much_later), (false, false));

        state.stop(later, true, true);
        assert!(state.motion.is_none());
        assert!((state.position.pan - 0.5).abs() < 1e-9);
    }

    #[test]
    fn timeout_ends_motion() {
        let start = Instant::now();
        let mut state = PtzState::default();
        state.motion = Some(Motion {
            velocity: vector(0.0, 0.0, 0.1),
            started: start,
            until: Some(start + Duration::from_secs(2)),
        });
        let later = start + Duration::from_secs(5);
        assert!((state.position_at(later).zoom - 0.2).abs() < 1e-9);
        assert_eq!(state.moving(later), (false, false));
        state.settle(later);
        assert!(state.motion.is_none());
    }

    #[test]
    fn profile_configuration_names_the_node() {
        let xml = configuration_xml(&MediaProfile::default());
        assert!(xml.starts_with("<tt:PTZConfiguration token=\"PTZ_Profile_1\">"));
        assert!(xml.contains("<tt:NodeToken>PTZNode_1</tt:NodeToken>"));
    }

    async fn run(ptz: &PtzImpl, name: &str, args: &str) -> Result<String, Fault> {
        let xml = format!(
            r#"<s:Envelope xmlns:s="{}"><s:Body><tptz:{name} xmlns:tptz="{}" xmlns:tt="{}"><tptz:ProfileToken>Profile_1</tptz:ProfileToken>{args}</tptz:{name}></s:Body></s:Envelope>"#,
            crate::soap::SOAP12,
            crate::soap::TPTZ,
            crate::soap::TT,
            name = name,
            args = args
        );
        let envelope = crate::soap::Envelope::parse(&xml).unwrap();
        let call = Call {
            contract: &crate::onvif::contracts::PTZ,
            operation: crate::onvif::contracts::PTZ.operation(crate::soap::TPTZ, name).unwrap(),
            envelope: &envelope,
            principal: crate::auth::Principal::anonymous(),
            base_url: "http://localhost:5000".to_owned(),
            subscription: None,
        };
        ptz.call(&call).await
    }

    async fn position(ptz: &PtzImpl) -> Vector {
        ptz.state.lock().await.get("Profile_1").unwrap().position
    }

    fn subcodes(fault: &Fault) -> Vec<&str> {
        fault.subcodes.iter().map(String::as_str).collect()
    }

    #[tokio::test]
    async fn presets_store_and_recall_positions() {
        let ptz = PtzImpl::new(&Media::default());

        let first = run(&ptz, "SetPreset", "<tptz:PresetName>door</tptz:PresetName>").await.unwrap();
        assert!(first.contains("<tptz:PresetToken>Preset_1</tptz:PresetToken>"));

        run(&ptz, "AbsoluteMove", r#"<tptz:Position><tt:PanTilt x="0.5" y="0.25"/></tptz:Position>"#)
            .await
            .unwrap();
        let second = run(&ptz, "SetPreset", "<tptz:PresetName>window</tptz:PresetName>").await.unwrap();
        assert!(second.contains("Preset_2"));

        run(&ptz, "GotoPreset", "<tptz:PresetToken>Preset_1</tptz:PresetToken>").await.unwrap();
        assert_eq!(position(&ptz).await, Vector::default());

        run(&ptz, "GotoPreset", "<tptz:PresetToken>Preset_2</tptz:PresetToken>").await.unwrap();
        assert_eq!(position(&ptz).await, vector(0.5, 0.25, 0.0));

        let listed = run(&ptz, "GetPresets", "").await.unwrap();
        assert!(listed.contains("token=\"Preset_1\""));
        assert!(listed.contains("<tt:Name>window</tt:Name>"));
    }

    #[tokio::test]
    async fn preset_names_are_unique() {
        let ptz = PtzImpl::new(&Media::default());
        run(&ptz, "SetPreset", "<tptz:PresetName>door</tptz:PresetName>").await.unwrap();

        let fault = run(&ptz, "SetPreset", "<tptz:PresetName>door</tptz:PresetName>").await.unwrap_err();
        assert!(fault.is_sender());
        assert_eq!(subcodes(&fault), vec!["ter:InvalidArgVal", "ter:PresetExist"]);

        // Re-saving a preset under its own name moves it.
        run(
            &ptz,
            "SetPreset",
            "<tptz:PresetName>door</tptz:PresetName><tptz:PresetToken>Preset_1</tptz:PresetToken>",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unknown_presets_fault_with_no_token() {
        let ptz = PtzImpl::new(&Media::default());
        run(&ptz, "SetPreset", "").await.unwrap();

        for (operation, token) in [("GotoPreset", "Preset_9"), ("RemovePreset", "Preset_9")] {
            let fault = run(&ptz, operation, &format!("<tptz:PresetToken>{}</tptz:PresetToken>", token))
                .await
                .unwrap_err();
            assert_eq!(subcodes(&fault), vec!["ter:InvalidArgVal", "ter:NoToken"]);
        }

        run(&ptz, "RemovePreset", "<tptz:PresetToken>Preset_1</tptz:PresetToken>").await.unwrap();
        let fault = run(&ptz, "RemovePreset", "<tptz:PresetToken>Preset_1</tptz:PresetToken>").await.unwrap_err();
        assert_eq!(subcodes(&fault), vec!["ter:InvalidArgVal", "ter:NoToken"]);
        assert!(!run(&ptz, "GetPresets", "").await.unwrap().contains("Preset_1"));
    }
}
