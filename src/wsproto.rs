use anyhow::Result;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Number, Value};
use tokio_tungstenite::tungstenite::protocol::Message;

pub const PROTOCOL_VERSION: u32 = 1;

pub const MSG_SIGNALING_HANDSHAKE_REQ: i64 = 1;
pub const MSG_SIGNALING_HANDSHAKE_RESP: i64 = 2;
pub const MSG_MEDIA_HANDSHAKE_REQ: i64 = 3;
pub const MSG_MEDIA_HANDSHAKE_RESP: i64 = 4;
pub const MSG_EVENT_SUBSCRIPTION: i64 = 5;
pub const MSG_EVENT_UPDATE: i64 = 6;
pub const MSG_CLIENT_READY_ACK: i64 = 7;
pub const MSG_STREAM_STATE_UPDATE: i64 = 8;
pub const MSG_SESSION_STATE_UPDATE: i64 = 9;
pub const MSG_KEEP_ALIVE_REQ: i64 = 12;
pub const MSG_KEEP_ALIVE_RESP: i64 = 13;
pub const MSG_MEDIA_AUDIO: i64 = 14;
pub const MSG_MEDIA_VIDEO: i64 = 15;
pub const MSG_MEDIA_DESKSHARE: i64 = 16;
pub const MSG_MEDIA_TRANSCRIPT: i64 = 17;
pub const MSG_MEDIA_CHAT: i64 = 18;

pub const STATUS_OK: i64 = 0;
pub const STREAM_STATE_TERMINATED: i64 = 4;

/// `media_type` bitmask values accepted by the media handshake.
pub const MEDIA_TYPE_AUDIO: u32 = 1;
pub const MEDIA_TYPE_VIDEO: u32 = 2;
pub const MEDIA_TYPE_DESKSHARE: u32 = 4;
pub const MEDIA_TYPE_TRANSCRIPT: u32 = 8;
pub const MEDIA_TYPE_CHAT: u32 = 16;
pub const MEDIA_TYPE_ALL: u32 = 32;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Signaling,
    Media,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Signaling => "signaling",
            ChannelKind::Media => "media",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
    Deskshare,
    Transcript,
    Chat,
}

impl MediaKind {
    pub const ALL: [MediaKind; 5] = [
        MediaKind::Audio,
        MediaKind::Video,
        MediaKind::Deskshare,
        MediaKind::Transcript,
        MediaKind::Chat,
    ];

    pub fn from_msg_type(msg_type: i64) -> Option<Self> {
        match msg_type {
            MSG_MEDIA_AUDIO => Some(MediaKind::Audio),
            MSG_MEDIA_VIDEO => Some(MediaKind::Video),
            MSG_MEDIA_DESKSHARE => Some(MediaKind::Deskshare),
            MSG_MEDIA_TRANSCRIPT => Some(MediaKind::Transcript),
            MSG_MEDIA_CHAT => Some(MediaKind::Chat),
            _ => None,
        }
    }

    pub fn msg_type(self) -> i64 {
        match self {
            MediaKind::Audio => MSG_MEDIA_AUDIO,
            MediaKind::Video => MSG_MEDIA_VIDEO,
            MediaKind::Deskshare => MSG_MEDIA_DESKSHARE,
            MediaKind::Transcript => MSG_MEDIA_TRANSCRIPT,
            MediaKind::Chat => MSG_MEDIA_CHAT,
        }
    }

    /// Text kinds carry `content.data` as plain UTF-8; the others as base64.
    pub fn is_text(self) -> bool {
        matches!(self, MediaKind::Transcript | MediaKind::Chat)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Deskshare => "deskshare",
            MediaKind::Transcript => "transcript",
            MediaKind::Chat => "chat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioParams {
    #[serde(default = "one")]
    pub content_type: u32,
    #[serde(default = "one")]
    pub sample_rate: u32,
    #[serde(default = "one")]
    pub channel: u32,
    #[serde(default = "one")]
    pub codec: u32,
    #[serde(default = "one")]
    pub data_opt: u32,
    #[serde(default = "default_send_rate")]
    pub send_rate: u32,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            content_type: 1,
            sample_rate: 1,
            channel: 1,
            codec: 1,
            data_opt: 1,
            send_rate: default_send_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoParams {
    #[serde(default = "default_video_codec")]
    pub codec: u32,
    #[serde(default = "default_resolution")]
    pub resolution: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            codec: default_video_codec(),
            resolution: default_resolution(),
            fps: default_fps(),
        }
    }
}

fn one() -> u32 {
    1
}

fn default_send_rate() -> u32 {
    100
}

fn default_video_codec() -> u32 {
    7
}

fn default_resolution() -> u32 {
    2
}

fn default_fps() -> u32 {
    25
}

/// Media handshake parameters, taken from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaParams {
    #[serde(default = "default_media_type")]
    pub media_type: u32,
    #[serde(default)]
    pub payload_encryption: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoParams>,
    /// Passed through to the handshake verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Value>,
}

fn default_media_type() -> u32 {
    MEDIA_TYPE_ALL
}

impl Default for MediaParams {
    fn default() -> Self {
        Self {
            media_type: MEDIA_TYPE_ALL,
            payload_encryption: false,
            audio: Some(AudioParams::default()),
            video: Some(VideoParams::default()),
            transcript: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeRequest {
    pub channel: ChannelKind,
    pub protocol_version: u32,
    pub meeting_uuid: String,
    pub rtms_stream_id: String,
    pub signature: String,
    /// Signaling only.
    pub sequence: Option<u64>,
    /// Media only.
    pub media: Option<MediaParams>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResponse {
    pub channel: ChannelKind,
    pub status_code: i64,
    pub reason: String,
    /// `media_server.server_urls.all`, signaling only.
    pub media_url: Option<String>,
}

impl HandshakeResponse {
    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubscriptionEntry {
    pub event_type: u32,
    pub subscribe: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventUpdate {
    pub event_type: i64,
    pub timestamp: Option<Number>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaChunk {
    pub kind: MediaKind,
    pub payload: Vec<u8>,
    pub timestamp: Option<Number>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    HandshakeRequest(HandshakeRequest),
    HandshakeResponse(HandshakeResponse),
    EventSubscription(Vec<EventSubscriptionEntry>),
    EventUpdate(EventUpdate),
    ClientReadyAck { rtms_stream_id: String },
    StreamStateChanged { state: i64, reason: i64 },
    SessionStateChanged { state: i64, stop_reason: i64 },
    /// The timestamp is echoed back untouched, whatever its JSON type.
    KeepAliveRequest { timestamp: Value },
    KeepAliveResponse { timestamp: Value },
    MediaData(MediaChunk),
    /// Undecodable, binary, or unknown-tag traffic. Never fatal.
    Unrecognized { msg_type: Option<i64>, detail: String },
}

impl Frame {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::HandshakeRequest(_) => "handshake_request",
            Frame::HandshakeResponse(_) => "handshake_response",
            Frame::EventSubscription(_) => "event_subscription",
            Frame::EventUpdate(_) => "event_update",
            Frame::ClientReadyAck { .. } => "client_ready_ack",
            Frame::StreamStateChanged { .. } => "stream_state_changed",
            Frame::SessionStateChanged { .. } => "session_state_changed",
            Frame::KeepAliveRequest { .. } => "keep_alive_request",
            Frame::KeepAliveResponse { .. } => "keep_alive_response",
            Frame::MediaData(_) => "media_data",
            Frame::Unrecognized { .. } => "unrecognized",
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonHandshakeResp {
    // Required: a response without a status is not an acceptance.
    status_code: i64,
    #[serde(default)]
    reason: Value,
    #[serde(default)]
    media_server: Option<JsonMediaServer>,
}

#[derive(Debug, Deserialize)]
struct JsonMediaServer {
    #[serde(default)]
    server_urls: Option<JsonServerUrls>,
}

#[derive(Debug, Deserialize)]
struct JsonServerUrls {
    #[serde(default)]
    all: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonHandshakeReq {
    #[serde(default = "default_protocol_version")]
    protocol_version: u32,
    meeting_uuid: String,
    rtms_stream_id: String,
    signature: String,
    #[serde(default)]
    sequence: Option<u64>,
    #[serde(default = "default_media_type")]
    media_type: u32,
    #[serde(default)]
    payload_encryption: bool,
    #[serde(default)]
    media_params: Option<JsonMediaParams>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JsonMediaParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio: Option<AudioParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    video: Option<VideoParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transcript: Option<Value>,
}

fn default_protocol_version() -> u32 {
    PROTOCOL_VERSION
}

#[derive(Debug, Deserialize)]
struct JsonKeepAlive {
    timestamp: Value,
}

#[derive(Debug, Deserialize)]
struct JsonReadyAck {
    #[serde(default)]
    rtms_stream_id: String,
}

#[derive(Debug, Deserialize)]
struct JsonSubscription {
    events: Vec<EventSubscriptionEntry>,
}

#[derive(Debug, Deserialize)]
struct JsonEventUpdate {
    event: JsonEvent,
}

#[derive(Debug, Deserialize)]
struct JsonEvent {
    #[serde(default)]
    event_type: i64,
    #[serde(default)]
    timestamp: Option<Number>,
    #[serde(default, deserialize_with = "deserialize_id_opt")]
    user_id: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonStreamState {
    #[serde(default)]
    state: i64,
    #[serde(default)]
    reason: i64,
}

#[derive(Debug, Deserialize)]
struct JsonSessionState {
    #[serde(default)]
    state: i64,
    #[serde(default)]
    stop_reason: i64,
}

#[derive(Debug, Deserialize)]
struct JsonMedia {
    content: JsonMediaContent,
}

#[derive(Debug, Deserialize)]
struct JsonMediaContent {
    data: String,
    #[serde(default)]
    timestamp: Option<Number>,
    #[serde(default, deserialize_with = "deserialize_id_opt")]
    user_id: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
}

/// Decode one websocket message. Control messages (ping/pong/close) are the
/// transport's business and yield `None`.
pub fn decode_message(msg: &Message) -> Option<Frame> {
    match msg {
        Message::Text(txt) => Some(decode_text(txt)),
        Message::Binary(bin) => Some(Frame::Unrecognized {
            msg_type: None,
            detail: format!("binary frame ({} bytes)", bin.len()),
        }),
        _ => None,
    }
}

pub fn decode_text(raw: &str) -> Frame {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(err) => {
            return Frame::Unrecognized {
                msg_type: None,
                detail: format!("invalid json: {err}"),
            }
        }
    };
    let msg_type = match value.get("msg_type").and_then(Value::as_i64) {
        Some(t) => t,
        None => {
            return Frame::Unrecognized {
                msg_type: None,
                detail: "missing msg_type".to_string(),
            }
        }
    };
    match decode_typed(msg_type, value) {
        Ok(frame) => frame,
        Err(err) => Frame::Unrecognized {
            msg_type: Some(msg_type),
            detail: err.to_string(),
        },
    }
}

fn decode_typed(msg_type: i64, value: Value) -> Result<Frame> {
    let frame = match msg_type {
        MSG_SIGNALING_HANDSHAKE_REQ | MSG_MEDIA_HANDSHAKE_REQ => {
            let req: JsonHandshakeReq = serde_json::from_value(value)?;
            let channel = if msg_type == MSG_SIGNALING_HANDSHAKE_REQ {
                ChannelKind::Signaling
            } else {
                ChannelKind::Media
            };
            let media = match channel {
                ChannelKind::Signaling => None,
                ChannelKind::Media => {
                    let params = req.media_params.unwrap_or_default();
                    Some(MediaParams {
                        media_type: req.media_type,
                        payload_encryption: req.payload_encryption,
                        audio: params.audio,
                        video: params.video,
                        transcript: params.transcript,
                    })
                }
            };
            Frame::HandshakeRequest(HandshakeRequest {
                channel,
                protocol_version: req.protocol_version,
                meeting_uuid: req.meeting_uuid,
                rtms_stream_id: req.rtms_stream_id,
                signature: req.signature,
                sequence: req.sequence,
                media,
            })
        }
        MSG_SIGNALING_HANDSHAKE_RESP | MSG_MEDIA_HANDSHAKE_RESP => {
            let resp: JsonHandshakeResp = serde_json::from_value(value)?;
            let channel = if msg_type == MSG_SIGNALING_HANDSHAKE_RESP {
                ChannelKind::Signaling
            } else {
                ChannelKind::Media
            };
            let media_url = resp
                .media_server
                .and_then(|m| m.server_urls)
                .and_then(|u| u.all)
                .filter(|u| !u.trim().is_empty());
            Frame::HandshakeResponse(HandshakeResponse {
                channel,
                status_code: resp.status_code,
                reason: reason_text(&resp.reason),
                media_url,
            })
        }
        MSG_EVENT_SUBSCRIPTION => {
            let sub: JsonSubscription = serde_json::from_value(value)?;
            Frame::EventSubscription(sub.events)
        }
        MSG_EVENT_UPDATE => {
            let upd: JsonEventUpdate = serde_json::from_value(value)?;
            Frame::EventUpdate(EventUpdate {
                event_type: upd.event.event_type,
                timestamp: upd.event.timestamp,
                user_id: upd.event.user_id,
                user_name: upd.event.user_name,
            })
        }
        MSG_CLIENT_READY_ACK => {
            let ack: JsonReadyAck = serde_json::from_value(value)?;
            Frame::ClientReadyAck {
                rtms_stream_id: ack.rtms_stream_id,
            }
        }
        MSG_STREAM_STATE_UPDATE => {
            let st: JsonStreamState = serde_json::from_value(value)?;
            Frame::StreamStateChanged {
                state: st.state,
                reason: st.reason,
            }
        }
        MSG_SESSION_STATE_UPDATE => {
            let st: JsonSessionState = serde_json::from_value(value)?;
            Frame::SessionStateChanged {
                state: st.state,
                stop_reason: st.stop_reason,
            }
        }
        MSG_KEEP_ALIVE_REQ => {
            let ka: JsonKeepAlive = serde_json::from_value(value)?;
            Frame::KeepAliveRequest {
                timestamp: ka.timestamp,
            }
        }
        MSG_KEEP_ALIVE_RESP => {
            let ka: JsonKeepAlive = serde_json::from_value(value)?;
            Frame::KeepAliveResponse {
                timestamp: ka.timestamp,
            }
        }
        _ => match MediaKind::from_msg_type(msg_type) {
            Some(kind) => {
                let media: JsonMedia = serde_json::from_value(value)?;
                let payload = if kind.is_text() {
                    media.content.data.into_bytes()
                } else {
                    base64::engine::general_purpose::STANDARD
                        .decode(media.content.data.as_bytes())?
                };
                Frame::MediaData(MediaChunk {
                    kind,
                    payload,
                    timestamp: media.content.timestamp,
                    user_id: media.content.user_id,
                    user_name: media.content.user_name,
                })
            }
            None => Frame::Unrecognized {
                msg_type: Some(msg_type),
                detail: "unknown msg_type".to_string(),
            },
        },
    };
    Ok(frame)
}

/// Serialize a frame to its JSON text form.
pub fn encode(frame: &Frame) -> Result<String> {
    let value = match frame {
        Frame::HandshakeRequest(req) => match req.channel {
            ChannelKind::Signaling => {
                let mut v = json!({
                    "msg_type": MSG_SIGNALING_HANDSHAKE_REQ,
                    "protocol_version": req.protocol_version,
                    "meeting_uuid": req.meeting_uuid,
                    "rtms_stream_id": req.rtms_stream_id,
                    "signature": req.signature,
                });
                if let Some(seq) = req.sequence {
                    v["sequence"] = json!(seq);
                }
                v
            }
            ChannelKind::Media => {
                let params = req.media.clone().unwrap_or_default();
                let media_params = JsonMediaParams {
                    audio: params.audio,
                    video: params.video,
                    transcript: params.transcript,
                };
                json!({
                    "msg_type": MSG_MEDIA_HANDSHAKE_REQ,
                    "protocol_version": req.protocol_version,
                    "meeting_uuid": req.meeting_uuid,
                    "rtms_stream_id": req.rtms_stream_id,
                    "signature": req.signature,
                    "media_type": params.media_type,
                    "payload_encryption": params.payload_encryption,
                    "media_params": media_params,
                })
            }
        },
        Frame::HandshakeResponse(resp) => {
            let msg_type = match resp.channel {
                ChannelKind::Signaling => MSG_SIGNALING_HANDSHAKE_RESP,
                ChannelKind::Media => MSG_MEDIA_HANDSHAKE_RESP,
            };
            let mut v = json!({
                "msg_type": msg_type,
                "protocol_version": PROTOCOL_VERSION,
                "status_code": resp.status_code,
                "reason": resp.reason,
            });
            if let Some(url) = &resp.media_url {
                v["media_server"] = json!({ "server_urls": { "all": url } });
            }
            v
        }
        Frame::EventSubscription(events) => json!({
            "msg_type": MSG_EVENT_SUBSCRIPTION,
            "events": events,
        }),
        Frame::EventUpdate(ev) => json!({
            "msg_type": MSG_EVENT_UPDATE,
            "event": {
                "event_type": ev.event_type,
                "timestamp": ev.timestamp,
                "user_id": ev.user_id,
                "user_name": ev.user_name,
            },
        }),
        Frame::ClientReadyAck { rtms_stream_id } => json!({
            "msg_type": MSG_CLIENT_READY_ACK,
            "rtms_stream_id": rtms_stream_id,
        }),
        Frame::StreamStateChanged { state, reason } => json!({
            "msg_type": MSG_STREAM_STATE_UPDATE,
            "state": state,
            "reason": reason,
        }),
        Frame::SessionStateChanged { state, stop_reason } => json!({
            "msg_type": MSG_SESSION_STATE_UPDATE,
            "state": state,
            "stop_reason": stop_reason,
        }),
        Frame::KeepAliveRequest { timestamp } => json!({
            "msg_type": MSG_KEEP_ALIVE_REQ,
            "timestamp": timestamp,
        }),
        Frame::KeepAliveResponse { timestamp } => json!({
            "msg_type": MSG_KEEP_ALIVE_RESP,
            "timestamp": timestamp,
        }),
        Frame::MediaData(chunk) => {
            let data = if chunk.kind.is_text() {
                String::from_utf8_lossy(&chunk.payload).into_owned()
            } else {
                base64::engine::general_purpose::STANDARD.encode(&chunk.payload)
            };
            json!({
                "msg_type": chunk.kind.msg_type(),
                "content": {
                    "user_id": chunk.user_id,
                    "user_name": chunk.user_name,
                    "timestamp": chunk.timestamp,
                    "data": data,
                },
            })
        }
        Frame::Unrecognized { msg_type, .. } => {
            anyhow::bail!("cannot encode unrecognized frame (msg_type={msg_type:?})")
        }
    };
    Ok(serde_json::to_string(&value)?)
}

fn reason_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// Participant ids arrive as numbers from the media server but as strings in
// some event payloads.
fn deserialize_id_opt<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<Value>::deserialize(deserializer)?;
    match opt {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        _ => Err(serde::de::Error::custom("expected string or number id")),
    }
}

pub fn status_name(code: i64) -> &'static str {
    match code {
        0 => "OK",
        1 => "CONNECTION_TIMEOUT",
        2 => "INVALID_JSON_MSG_SIZE",
        3 => "INVALID_JSON_MSG",
        4 => "INVALID_MESSAGE_TYPE",
        5 => "MSG_TYPE_NOT_EXIST",
        6 => "MSG_TYPE_NOT_UINT",
        7 => "MEETING_UUID_NOT_EXIST",
        8 => "MEETING_UUID_NOT_STRING",
        9 => "MEETING_UUID_IS_EMPTY",
        10 => "RTMS_STREAM_ID_NOT_EXIST",
        11 => "RTMS_STREAM_ID_NOT_STRING",
        12 => "RTMS_STREAM_ID_IS_EMPTY",
        13 => "SESSION_NOT_FOUND",
        14 => "SIGNATURE_NOT_EXIST",
        15 => "INVALID_SIGNATURE",
        16 => "INVALID_MEETING_OR_STREAM_ID",
        17 => "DUPLICATE_SIGNAL_REQUEST",
        18 => "EVENTS_NOT_EXIST",
        19 => "EVENTS_VALUE_NOT_ARRAY",
        20 => "EVENT_TYPE_NOT_EXIST",
        21 => "EVENT_TYPE_VALUE_NOT_UINT",
        22 => "MEDIA_TYPE_NOT_EXIST",
        23 => "MEDIA_TYPE_NOT_UINT",
        24 => "MEDIA_TYPE_AUDIO_NOT_SUPPORT",
        25 => "MEDIA_TYPE_VIDEO_NOT_SUPPORT",
        26 => "MEDIA_TYPE_DESKSHARE_NOT_SUPPORT",
        27 => "MEDIA_TYPE_TRANSCRIPT_NOT_SUPPORT",
        28 => "MEDIA_TYPE_CHAT_NOT_SUPPORT",
        29 => "MEDIA_TYPE_INVALID_VALUE",
        30 => "MEDIA_DATA_ALL_CONNECTION_EXIST",
        31 => "DUPLICATE_MEDIA_DATA_CONNECTION",
        32 => "MEDIA_PARAMS_NOT_EXIST",
        33 => "INVALID_MEDIA_PARAMS",
        34 => "NO_MEDIA_TYPE_SPECIFIED",
        _ => "UNKNOWN",
    }
}

pub fn stop_reason_name(code: i64) -> &'static str {
    match code {
        0 => "UNDEFINED",
        1 => "STOP_BC_HOST_TRIGGERED",
        2 => "STOP_BC_USER_TRIGGERED",
        3 => "STOP_BC_USER_LEFT",
        4 => "STOP_BC_USER_EJECTED",
        5 => "STOP_BC_APP_DISABLED_BY_HOST",
        6 => "STOP_BC_MEETING_ENDED",
        7 => "STOP_BC_STREAM_CANCELED",
        8 => "STOP_BC_STREAM_REVOKED",
        9 => "STOP_BC_ALL_APPS_DISABLED",
        10 => "STOP_BC_INTERNAL_EXCEPTION",
        11 => "STOP_BC_CONNECTION_TIMEOUT",
        12 => "STOP_BC_MEETING_CONNECTION_INTERRUPTED",
        13 => "STOP_BC_SIGNAL_CONNECTION_INTERRUPTED",
        14 => "STOP_BC_DATA_CONNECTION_INTERRUPTED",
        15 => "STOP_BC_SIGNAL_CONNECTION_CLOSED_ABNORMALLY",
        16 => "STOP_BC_DATA_CONNECTION_CLOSED_ABNORMALLY",
        17 => "STOP_BC_EXIT_SIGNAL",
        18 => "STOP_BC_AUTHENTICATION_FAILURE",
        _ => "UNKNOWN",
    }
}

pub fn stream_state_name(state: i64) -> &'static str {
    match state {
        0 => "INACTIVE",
        1 => "ACTIVE",
        2 => "INTERRUPTED",
        3 => "TERMINATING",
        4 => "TERMINATED",
        _ => "UNKNOWN",
    }
}

pub fn session_state_name(state: i64) -> &'static str {
    match state {
        0 => "INACTIVE",
        1 => "INITIALIZE",
        2 => "STARTED",
        3 => "PAUSED",
        4 => "RESUMED",
        5 => "STOPPED",
        _ => "UNKNOWN",
    }
}

pub fn event_type_name(event_type: i64) -> &'static str {
    match event_type {
        1 => "FIRST_PACKET_TIMESTAMP",
        2 => "ACTIVE_SPEAKER_CHANGE",
        3 => "PARTICIPANT_JOIN",
        4 => "PARTICIPANT_LEAVE",
        _ => "UNDEFINED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_timestamp_round_trips_exactly() {
        let raw = r#"{"msg_type":12,"timestamp":1738392033699}"#;
        let frame = decode_text(raw);
        let ts = match frame {
            Frame::KeepAliveRequest { timestamp } => timestamp,
            other => panic!("unexpected frame: {other:?}"),
        };
        let reencoded = encode(&Frame::KeepAliveRequest {
            timestamp: ts.clone(),
        })
        .unwrap();
        let v: Value = serde_json::from_str(&reencoded).unwrap();
        assert_eq!(v["msg_type"], 12);
        assert_eq!(v["timestamp"].to_string(), "1738392033699");

        let resp = encode(&Frame::KeepAliveResponse { timestamp: ts }).unwrap();
        let v: Value = serde_json::from_str(&resp).unwrap();
        assert_eq!(v["msg_type"], 13);
        assert_eq!(v["timestamp"].as_u64(), Some(1738392033699));
    }

    #[test]
    fn keep_alive_echoes_non_numeric_timestamp() {
        let frame = decode_text(r#"{"msg_type":12,"timestamp":"1738392033699"}"#);
        let ts = match frame {
            Frame::KeepAliveRequest { timestamp } => timestamp,
            other => panic!("unexpected frame: {other:?}"),
        };
        assert_eq!(ts, Value::String("1738392033699".into()));
        let resp = encode(&Frame::KeepAliveResponse { timestamp: ts }).unwrap();
        let v: Value = serde_json::from_str(&resp).unwrap();
        assert_eq!(v["msg_type"], 13);
        assert_eq!(v["timestamp"], "1738392033699");

        assert!(matches!(
            decode_text(r#"{"msg_type":12}"#),
            Frame::Unrecognized {
                msg_type: Some(12),
                ..
            }
        ));
    }

    #[test]
    fn handshake_response_without_status_is_not_accepted() {
        for raw in [
            r#"{"msg_type":4}"#,
            r#"{"msg_type":2,"media_server":{"server_urls":{"all":"wss://m"}}}"#,
        ] {
            match decode_text(raw) {
                Frame::Unrecognized { msg_type, .. } => {
                    assert!(matches!(msg_type, Some(2) | Some(4)))
                }
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[test]
    fn signaling_handshake_response_extracts_media_url() {
        let raw = r#"{
            "msg_type": 2, "protocol_version": 1, "sequence": 0, "status_code": 0, "reason": "",
            "media_server": {"server_urls": {
                "audio": "wss://a", "video": "wss://v", "transcript": "wss://t", "all": "wss://m"
            }}
        }"#;
        match decode_text(raw) {
            Frame::HandshakeResponse(resp) => {
                assert_eq!(resp.channel, ChannelKind::Signaling);
                assert!(resp.is_success());
                assert_eq!(resp.media_url.as_deref(), Some("wss://m"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn media_handshake_failure_keeps_status_and_reason() {
        match decode_text(r#"{"msg_type":4,"status_code":15,"reason":18}"#) {
            Frame::HandshakeResponse(resp) => {
                assert_eq!(resp.channel, ChannelKind::Media);
                assert!(!resp.is_success());
                assert_eq!(resp.status_code, 15);
                assert_eq!(resp.reason, "18");
                assert_eq!(status_name(resp.status_code), "INVALID_SIGNATURE");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn audio_payload_is_base64_decoded_with_metadata() {
        let raw = r#"{"msg_type":14,"content":{"user_id":16778240,"user_name":"John Smith","data":"AAECAw==","timestamp":1738392033699}}"#;
        match decode_text(raw) {
            Frame::MediaData(chunk) => {
                assert_eq!(chunk.kind, MediaKind::Audio);
                assert_eq!(chunk.payload, vec![0, 1, 2, 3]);
                assert_eq!(chunk.user_id.as_deref(), Some("16778240"));
                assert_eq!(chunk.user_name.as_deref(), Some("John Smith"));
                assert_eq!(chunk.timestamp.unwrap().as_u64(), Some(1738392033699));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn transcript_payload_is_plain_text() {
        let raw = r#"{"msg_type":17,"content":{"user_id":19778240,"user_name":"John Smith","timestamp":1727384349000,"data":"Hi, hello world!"}}"#;
        match decode_text(raw) {
            Frame::MediaData(chunk) => {
                assert_eq!(chunk.kind, MediaKind::Transcript);
                assert_eq!(chunk.payload, b"Hi, hello world!".to_vec());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn malformed_input_is_unrecognized_not_an_error() {
        assert!(matches!(
            decode_text("not json"),
            Frame::Unrecognized { msg_type: None, .. }
        ));
        assert!(matches!(
            decode_text(r#"{"hello":1}"#),
            Frame::Unrecognized { msg_type: None, .. }
        ));
        assert!(matches!(
            decode_text(r#"{"msg_type":99}"#),
            Frame::Unrecognized { msg_type: Some(99), .. }
        ));
        // Audio with an invalid base64 body.
        assert!(matches!(
            decode_text(r#"{"msg_type":14,"content":{"data":"***"}}"#),
            Frame::Unrecognized { msg_type: Some(14), .. }
        ));
        // Keep-alive without a timestamp.
        assert!(matches!(
            decode_text(r#"{"msg_type":12}"#),
            Frame::Unrecognized { msg_type: Some(12), .. }
        ));
        assert!(matches!(
            decode_message(&Message::Binary(vec![0xde, 0xad])),
            Some(Frame::Unrecognized { msg_type: None, .. })
        ));
        assert!(decode_message(&Message::Ping(vec![])).is_none());
    }

    #[test]
    fn media_handshake_request_carries_params() {
        let req = Frame::HandshakeRequest(HandshakeRequest {
            channel: ChannelKind::Media,
            protocol_version: PROTOCOL_VERSION,
            meeting_uuid: "abc".into(),
            rtms_stream_id: "s1".into(),
            signature: "sig".into(),
            sequence: None,
            media: Some(MediaParams {
                media_type: MEDIA_TYPE_TRANSCRIPT,
                ..MediaParams::default()
            }),
        });
        let v: Value = serde_json::from_str(&encode(&req).unwrap()).unwrap();
        assert_eq!(v["msg_type"], 3);
        assert_eq!(v["media_type"], 8);
        assert_eq!(v["payload_encryption"], false);
        assert_eq!(v["media_params"]["audio"]["send_rate"], 100);
        assert_eq!(v["media_params"]["video"]["fps"], 25);
        assert!(v.get("sequence").is_none());

        // The codec reads its own output back.
        assert_eq!(decode_text(&v.to_string()), req);
    }

    #[test]
    fn outbound_control_frames_use_wire_tags() {
        let ack = encode(&Frame::ClientReadyAck {
            rtms_stream_id: "s1".into(),
        })
        .unwrap();
        let v: Value = serde_json::from_str(&ack).unwrap();
        assert_eq!(v["msg_type"], 7);
        assert_eq!(v["rtms_stream_id"], "s1");

        let sub = encode(&Frame::EventSubscription(vec![EventSubscriptionEntry {
            event_type: 3,
            subscribe: true,
        }]))
        .unwrap();
        let v: Value = serde_json::from_str(&sub).unwrap();
        assert_eq!(v["msg_type"], 5);
        assert_eq!(v["events"][0]["event_type"], 3);

        assert!(encode(&Frame::Unrecognized {
            msg_type: None,
            detail: String::new()
        })
        .is_err());
    }

    #[test]
    fn stream_state_and_event_updates_decode() {
        assert_eq!(
            decode_text(r#"{"msg_type":8,"state":4,"reason":6}"#),
            Frame::StreamStateChanged {
                state: STREAM_STATE_TERMINATED,
                reason: 6
            }
        );
        match decode_text(
            r#"{"msg_type":6,"event":{"event_type":3,"user_id":"42","user_name":"Ann"}}"#,
        ) {
            Frame::EventUpdate(ev) => {
                assert_eq!(event_type_name(ev.event_type), "PARTICIPANT_JOIN");
                assert_eq!(ev.user_id.as_deref(), Some("42"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
