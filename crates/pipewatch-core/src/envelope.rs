//! Push-message envelope and wire codec.
//!
//! Every inbound frame on the push channel is UTF-8 JSON of the form
//! `{ "type": ..., "data": ..., "timestamp": ..., "messageId": ... }`,
//! where `type` is a closed set and determines the shape of `data`.
//! Payloads are decoded and validated here, once, at the wire boundary;
//! downstream consumers only ever see the typed [`EventPayload`] union.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::automation::ChannelState;

/// The closed set of push-notification kinds.
///
/// Used as the subscription key by the router, which never looks past it
/// into the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    DownloadProgress,
    DownloadCompleted,
    DownloadFailed,
    NewVideo,
    ChannelStatus,
    SystemAlert,
}

/// Lifecycle state carried by the download payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadState {
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

/// Severity of a system alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

/// Payload shared by the `DOWNLOAD_PROGRESS` / `DOWNLOAD_COMPLETED` /
/// `DOWNLOAD_FAILED` kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUpdate {
    pub video_id: String,
    pub video_title: String,
    pub channel_id: String,
    pub channel_name: String,
    /// Percentage, 0-100.
    pub progress: f64,
    pub download_speed: String,
    /// Seconds, when the backend can estimate it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<u64>,
    pub status: DownloadState,
}

/// Payload for `NEW_VIDEO`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVideo {
    pub video_id: String,
    pub video_title: String,
    pub channel_id: String,
    pub channel_name: String,
    pub thumbnail_url: String,
    pub published_at: DateTime<Utc>,
    /// Whether the backend already queued the video for download.
    pub auto_download_triggered: bool,
}

/// Payload for `CHANNEL_STATUS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatusChange {
    pub channel_id: String,
    pub channel_name: String,
    pub status: ChannelState,
}

/// Payload for `SYSTEM_ALERT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemAlert {
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// Decoded push payload, tagged by event kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    DownloadProgress(DownloadUpdate),
    DownloadCompleted(DownloadUpdate),
    DownloadFailed(DownloadUpdate),
    NewVideo(NewVideo),
    ChannelStatus(ChannelStatusChange),
    SystemAlert(SystemAlert),
}

impl EventPayload {
    /// The kind tag of this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::DownloadProgress(_) => EventKind::DownloadProgress,
            EventPayload::DownloadCompleted(_) => EventKind::DownloadCompleted,
            EventPayload::DownloadFailed(_) => EventKind::DownloadFailed,
            EventPayload::NewVideo(_) => EventKind::NewVideo,
            EventPayload::ChannelStatus(_) => EventKind::ChannelStatus,
            EventPayload::SystemAlert(_) => EventKind::SystemAlert,
        }
    }
}

/// One inbound push notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEnvelope {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    pub message_id: String,
}

impl PushEnvelope {
    /// Decode a wire frame. Anything that is not JSON of a known kind with
    /// the matching payload shape is rejected.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The envelope's kind tag.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// A frame that could not be decoded into a [`PushEnvelope`].
#[derive(Debug, Error)]
#[error("malformed push frame: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Fire-and-forget interest hints sent to the push endpoint.
///
/// Best-effort only: the connection drops them silently when the socket is
/// not open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlFrame {
    #[serde(rename_all = "camelCase")]
    WatchVideo {
        video_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    UnwatchVideo {
        video_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    WatchChannel {
        channel_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    UnwatchChannel {
        channel_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl ControlFrame {
    pub fn watch_video(video_id: impl Into<String>) -> Self {
        ControlFrame::WatchVideo {
            video_id: video_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn unwatch_video(video_id: impl Into<String>) -> Self {
        ControlFrame::UnwatchVideo {
            video_id: video_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn watch_channel(channel_id: impl Into<String>) -> Self {
        ControlFrame::WatchChannel {
            channel_id: channel_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn unwatch_channel(channel_id: impl Into<String>) -> Self {
        ControlFrame::UnwatchChannel {
            channel_id: channel_id.into(),
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
