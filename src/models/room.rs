use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Identity;

/// Room metadata created via the REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl Room {
    pub fn new(room_id: String, name: String, ttl_seconds: u64) -> Self {
        Self {
            room_id,
            name,
            created_at: Utc::now(),
            ttl_seconds,
        }
    }
}

/// Lifecycle state of a consultation room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomState {
    Empty,
    Waiting,
    Active,
    Ended,
}

/// One identity's membership in one room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: String,
    pub identity: Identity,
    pub connection_id: String,
    pub joined_at: DateTime<Utc>,
    pub connection_meta: ConnectionMeta,
    pub media_state: MediaState,
}

/// Audio/video/screen-share flags, mutated by toggle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaState {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
}

/// Media track a participant can toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaTrack {
    Audio,
    Video,
}

impl MediaState {
    pub fn set_track(&mut self, track: MediaTrack, enabled: bool) {
        match track {
            MediaTrack::Audio => self.audio_enabled = enabled,
            MediaTrack::Video => self.video_enabled = enabled,
        }
    }
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: true,
            screen_sharing: false,
        }
    }
}

/// Device category sniffed from the User-Agent header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

/// Connection metadata recorded when a participant joins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMeta {
    pub device_type: DeviceType,
    pub browser_family: String,
    pub os_family: String,
    pub network_address: String,
}

impl ConnectionMeta {
    /// Build connection metadata from the User-Agent header and peer address.
    pub fn from_user_agent(user_agent: Option<&str>, network_address: String) -> Self {
        Self {
            device_type: detect_device_type(user_agent),
            browser_family: detect_browser(user_agent).to_string(),
            os_family: detect_os(user_agent).to_string(),
            network_address,
        }
    }
}

fn detect_device_type(user_agent: Option<&str>) -> DeviceType {
    let Some(ua) = user_agent else {
        return DeviceType::Desktop;
    };
    let ua = ua.to_ascii_lowercase();
    if ua.contains("tablet") || ua.contains("ipad") {
        DeviceType::Tablet
    } else if ua.contains("mobile") || ua.contains("android") || ua.contains("iphone") {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}

fn detect_browser(user_agent: Option<&str>) -> &'static str {
    let Some(ua) = user_agent else {
        return "unknown";
    };
    // Order matters: Chrome UAs also advertise Safari.
    if ua.contains("Firefox") {
        "Firefox"
    } else if ua.contains("Edg") {
        "Edge"
    } else if ua.contains("Chrome") {
        "Chrome"
    } else if ua.contains("Safari") {
        "Safari"
    } else {
        "Other"
    }
}

fn detect_os(user_agent: Option<&str>) -> &'static str {
    let Some(ua) = user_agent else {
        return "unknown";
    };
    if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iOS") {
        "iOS"
    } else if ua.contains("Mac") {
        "macOS"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        "Other"
    }
}

/// Room information returned to REST clients
#[derive(Debug, Clone, Serialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub name: String,
    pub state: RoomState,
    pub participants: Vec<Participant>,
    pub participants_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Request to create a room
#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
}

fn default_ttl() -> u64 {
    7200
}

/// Response after creating a room
#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    pub room_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl From<Room> for CreateRoomResponse {
    fn from(room: Room) -> Self {
        Self {
            room_id: room.room_id,
            name: room.name,
            created_at: room.created_at,
            ttl_seconds: room.ttl_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_DESKTOP: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

    #[test]
    fn detects_chrome_on_windows() {
        let meta = ConnectionMeta::from_user_agent(Some(CHROME_DESKTOP), "10.0.0.1".into());
        assert_eq!(meta.device_type, DeviceType::Desktop);
        assert_eq!(meta.browser_family, "Chrome");
        assert_eq!(meta.os_family, "Windows");
    }

    #[test]
    fn detects_mobile_safari() {
        let meta = ConnectionMeta::from_user_agent(Some(SAFARI_IPHONE), "10.0.0.2".into());
        assert_eq!(meta.device_type, DeviceType::Mobile);
        assert_eq!(meta.browser_family, "Safari");
        assert_eq!(meta.os_family, "iOS");
    }

    #[test]
    fn missing_user_agent_defaults_to_desktop() {
        let meta = ConnectionMeta::from_user_agent(None, "10.0.0.3".into());
        assert_eq!(meta.device_type, DeviceType::Desktop);
        assert_eq!(meta.browser_family, "unknown");
        assert_eq!(meta.os_family, "unknown");
    }
}
