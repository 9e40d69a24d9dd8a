//! Scrcpy stream protocol types.
//!
//! The device-side protocol is length-free and type-prefixed: records the
//! device produces are recognised by magic prefixes or NAL headers, and the
//! control packets the proxy produces are packed big-endian layouts. The
//! encoders here are pure so the exact byte layouts stay unit-testable.

use serde::{Deserialize, Serialize};

/// Prefix of the device metadata record sent once after connect.
pub const MAGIC_BYTES_INITIAL: &[u8] = b"scrcpy_initial";
/// Prefix of opaque device messages (clipboard etc.), forwarded verbatim.
pub const MAGIC_BYTES_MESSAGE: &[u8] = b"scrcpy_message";

/// Control packet type bytes.
pub const TYPE_INJECT_KEYCODE: u8 = 0;
pub const TYPE_INJECT_TOUCH_EVENT: u8 = 2;
pub const TYPE_CHANGE_STREAM_PARAMETERS: u8 = 101;

/// Motion event actions.
pub const ACTION_DOWN: u8 = 0;
pub const ACTION_UP: u8 = 1;
pub const ACTION_MOVE: u8 = 2;

/// Primary (touch) button mask.
pub const BUTTON_PRIMARY: u32 = 1;

/// Android keycodes used by the shortcut commands.
pub const KEYCODE_HOME: u32 = 3;
pub const KEYCODE_BACK: u32 = 4;
pub const KEYCODE_POWER: u32 = 26;
pub const KEYCODE_APP_SWITCH: u32 = 187;

/// Sizes of the fixed control packet layouts.
pub const TOUCH_EVENT_LEN: usize = 28;
pub const KEYCODE_EVENT_LEN: usize = 14;
pub const VIDEO_SETTINGS_LEN: usize = 36;

/// Stream parameters sent to the device encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSettings {
    pub bitrate: u32,
    pub max_fps: u32,
    pub i_frame_interval: u8,
    pub bounds: VideoBounds,
    pub send_frame_meta: bool,
    /// Signed byte on the wire; -1 (0xFF) means unlocked.
    pub locked_video_orientation: i8,
    pub display_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoBounds {
    pub width: u16,
    pub height: u16,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            bitrate: 5_000_000,
            max_fps: 24,
            i_frame_interval: 5,
            bounds: VideoBounds {
                width: 540,
                height: 960,
            },
            send_frame_meta: false,
            locked_video_orientation: -1,
            display_id: 0,
        }
    }
}

/// InjectTouch packet:
/// `[1]type [1]action [8]pointerId [4]x [4]y [2]w [2]h [2]pressure [4]buttons`.
/// Pressure is 0xFFFF on DOWN, 0 otherwise.
pub fn encode_touch_event(
    action: u8,
    x: u32,
    y: u32,
    screen_width: u16,
    screen_height: u16,
) -> [u8; TOUCH_EVENT_LEN] {
    let mut buf = [0u8; TOUCH_EVENT_LEN];
    buf[0] = TYPE_INJECT_TOUCH_EVENT;
    buf[1] = action;
    // bytes 2..10: pointer id, always 0
    buf[10..14].copy_from_slice(&x.to_be_bytes());
    buf[14..18].copy_from_slice(&y.to_be_bytes());
    buf[18..20].copy_from_slice(&screen_width.to_be_bytes());
    buf[20..22].copy_from_slice(&screen_height.to_be_bytes());
    let pressure: u16 = if action == ACTION_DOWN { 0xFFFF } else { 0 };
    buf[22..24].copy_from_slice(&pressure.to_be_bytes());
    buf[24..28].copy_from_slice(&BUTTON_PRIMARY.to_be_bytes());
    buf
}

/// InjectKeycode packet: `[1]type [1]action [4]keycode [4]repeat [4]metaState`.
pub fn encode_keycode_event(
    action: u8,
    keycode: u32,
    repeat: u32,
    meta_state: u32,
) -> [u8; KEYCODE_EVENT_LEN] {
    let mut buf = [0u8; KEYCODE_EVENT_LEN];
    buf[0] = TYPE_INJECT_KEYCODE;
    buf[1] = action;
    buf[2..6].copy_from_slice(&keycode.to_be_bytes());
    buf[6..10].copy_from_slice(&repeat.to_be_bytes());
    buf[10..14].copy_from_slice(&meta_state.to_be_bytes());
    buf
}

/// ChangeStreamParameters packet:
/// `[1]type [4]bitrate [4]maxFps [1]iFrameInterval [2]w [2]h [8]crop
/// [1]sendFrameMeta [1]lockedOrientation [4]displayId [4]codecOptionsLen
/// [4]encoderNameLen`.
pub fn encode_video_settings(settings: &VideoSettings) -> [u8; VIDEO_SETTINGS_LEN] {
    let mut buf = [0u8; VIDEO_SETTINGS_LEN];
    buf[0] = TYPE_CHANGE_STREAM_PARAMETERS;
    buf[1..5].copy_from_slice(&settings.bitrate.to_be_bytes());
    buf[5..9].copy_from_slice(&settings.max_fps.to_be_bytes());
    buf[9] = settings.i_frame_interval;
    buf[10..12].copy_from_slice(&settings.bounds.width.to_be_bytes());
    buf[12..14].copy_from_slice(&settings.bounds.height.to_be_bytes());
    // bytes 14..22: crop left/top/right/bottom, unused
    buf[22] = u8::from(settings.send_frame_meta);
    buf[23] = settings.locked_video_orientation as u8;
    buf[24..28].copy_from_slice(&settings.display_id.to_be_bytes());
    // bytes 28..36: codec options length and encoder name length, both 0
    buf
}

/// Commands the browser client sends as JSON text frames:
/// `{"type": <cmd>, "data": {...}}`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    #[serde(rename_all = "camelCase")]
    Touch { action: u8, x: u32, y: u32 },

    #[serde(rename_all = "camelCase")]
    Click {
        x: u32,
        y: u32,
        duration: Option<u64>,
    },

    #[serde(rename_all = "camelCase")]
    Swipe {
        start_x: u32,
        start_y: u32,
        end_x: u32,
        end_y: u32,
        duration: Option<u64>,
        steps: Option<u32>,
    },

    #[serde(rename_all = "camelCase")]
    Keycode {
        action: u8,
        keycode: u32,
        repeat: Option<u32>,
        meta_state: Option<u32>,
    },

    Home,
    Back,
    Overview,
    Power,

    #[serde(rename_all = "camelCase")]
    VideoSettings {
        bitrate: u32,
        max_fps: u32,
        i_frame_interval: u8,
        bounds: Option<CommandBounds>,
        send_frame_meta: Option<bool>,
        locked_video_orientation: Option<i8>,
        display_id: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct CommandBounds {
    pub width: u16,
    pub height: u16,
}

/// POST /stream/start request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamRequest {
    pub device_id: String,
}

/// POST /stream/start response: the local forwarded endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamResponse {
    pub port: u16,
    pub url: String,
}

/// POST /stream/stop request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopStreamRequest {
    pub device_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_packet_layout() {
        let buf = encode_touch_event(ACTION_DOWN, 100, 200, 720, 1280);
        assert_eq!(buf.len(), 28);
        assert_eq!(buf[0], TYPE_INJECT_TOUCH_EVENT);
        assert_eq!(buf[1], ACTION_DOWN);
        assert_eq!(&buf[2..10], &[0u8; 8]); // pointer id
        assert_eq!(u32::from_be_bytes(buf[10..14].try_into().unwrap()), 100);
        assert_eq!(u32::from_be_bytes(buf[14..18].try_into().unwrap()), 200);
        assert_eq!(u16::from_be_bytes(buf[18..20].try_into().unwrap()), 720);
        assert_eq!(u16::from_be_bytes(buf[20..22].try_into().unwrap()), 1280);
        assert_eq!(u16::from_be_bytes(buf[22..24].try_into().unwrap()), 0xFFFF);
        assert_eq!(u32::from_be_bytes(buf[24..28].try_into().unwrap()), 1);
    }

    #[test]
    fn touch_pressure_zero_when_not_down() {
        let buf = encode_touch_event(ACTION_UP, 0, 0, 540, 960);
        assert_eq!(u16::from_be_bytes(buf[22..24].try_into().unwrap()), 0);

        let buf = encode_touch_event(ACTION_MOVE, 0, 0, 540, 960);
        assert_eq!(u16::from_be_bytes(buf[22..24].try_into().unwrap()), 0);
    }

    #[test]
    fn keycode_packet_layout() {
        let buf = encode_keycode_event(ACTION_DOWN, KEYCODE_HOME, 0, 0);
        assert_eq!(buf.len(), 14);
        assert_eq!(buf[0], TYPE_INJECT_KEYCODE);
        assert_eq!(buf[1], 0);
        assert_eq!(u32::from_be_bytes(buf[2..6].try_into().unwrap()), 3);
        assert_eq!(&buf[6..14], &[0u8; 8]);
    }

    #[test]
    fn video_settings_packet_layout() {
        let buf = encode_video_settings(&VideoSettings::default());
        assert_eq!(buf.len(), 36);
        assert_eq!(buf[0], TYPE_CHANGE_STREAM_PARAMETERS);
        assert_eq!(
            u32::from_be_bytes(buf[1..5].try_into().unwrap()),
            5_000_000
        );
        assert_eq!(u32::from_be_bytes(buf[5..9].try_into().unwrap()), 24);
        assert_eq!(buf[9], 5);
        assert_eq!(u16::from_be_bytes(buf[10..12].try_into().unwrap()), 540);
        assert_eq!(u16::from_be_bytes(buf[12..14].try_into().unwrap()), 960);
        assert_eq!(&buf[14..22], &[0u8; 8]); // crop
        assert_eq!(buf[22], 0); // sendFrameMeta
        assert_eq!(buf[23], 0xFF); // lockedVideoOrientation -1
        assert_eq!(&buf[24..36], &[0u8; 12]);
    }

    #[test]
    fn locked_orientation_is_twos_complement() {
        let settings = VideoSettings {
            locked_video_orientation: 1,
            ..VideoSettings::default()
        };
        assert_eq!(encode_video_settings(&settings)[23], 1);

        let settings = VideoSettings {
            locked_video_orientation: -1,
            ..VideoSettings::default()
        };
        assert_eq!(encode_video_settings(&settings)[23], 0xFF);
    }

    #[test]
    fn parses_touch_command() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"touch","data":{"action":0,"x":10,"y":20}}"#).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::Touch {
                action: 0,
                x: 10,
                y: 20
            }
        );
    }

    #[test]
    fn parses_unit_commands_without_data() {
        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"home"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Home);

        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"overview"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Overview);
    }

    #[test]
    fn parses_video_settings_command() {
        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"videoSettings","data":{"bitrate":8000000,"maxFps":30,
                "iFrameInterval":10,"bounds":{"width":720,"height":1280}}}"#,
        )
        .unwrap();
        match cmd {
            ClientCommand::VideoSettings {
                bitrate,
                max_fps,
                bounds,
                locked_video_orientation,
                ..
            } => {
                assert_eq!(bitrate, 8_000_000);
                assert_eq!(max_fps, 30);
                assert_eq!(
                    bounds,
                    Some(CommandBounds {
                        width: 720,
                        height: 1280
                    })
                );
                assert_eq!(locked_video_orientation, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_commands_with_wrongly_typed_fields() {
        let result = serde_json::from_str::<ClientCommand>(
            r#"{"type":"touch","data":{"action":"down","x":10,"y":20}}"#,
        );
        assert!(result.is_err());

        let result = serde_json::from_str::<ClientCommand>(r#"{"type":"warp","data":{}}"#);
        assert!(result.is_err());
    }
}
