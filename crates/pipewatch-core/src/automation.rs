//! Aggregate automation state assembled from REST snapshots.
//!
//! The [`AutomationView`] is derived, never authoritative: each
//! reconciliation pass rebuilds it wholesale from freshly pulled snapshots.
//! Push events never write into it directly; the only local mutations are
//! the optimistic patches in [`AutomationView::apply_provisional`], which
//! the next successful reconciliation overwrites.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a subscribed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    Active,
    Paused,
    Error,
}

/// Target quality for automated downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoQuality {
    #[default]
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "240p")]
    P240,
}

/// Container format for automated downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    #[default]
    Mp4,
    Webm,
    Mp3,
}

/// Per-channel automation settings. Quality and format fall back to their
/// defaults when the backend omits them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationSettings {
    #[serde(default)]
    pub quality: VideoQuality,
    #[serde(default)]
    pub format: MediaFormat,
    #[serde(default)]
    pub audio_only: bool,
    /// Maximum video length in seconds; unlimited when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_filter: Option<String>,
}

/// Per-channel automation counters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStatistics {
    pub total_auto_downloads: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_auto_download: Option<DateTime<Utc>>,
    /// Percentage, 0-100.
    pub success_rate: f64,
}

/// A subscribed channel as returned by the channel listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub channel_id: String,
    pub channel_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: ChannelState,
    pub subscribed_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// One channel's automation state, joined with its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStatus {
    pub channel_id: String,
    pub channel_name: String,
    pub enabled: bool,
    pub settings: AutomationSettings,
    pub statistics: AutomationStatistics,
}

/// Kind of a recorded webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookEventType {
    NewVideo,
    VideoUpdated,
    ChannelUpdated,
}

/// Processing state of a recorded webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookState {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One recorded webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub id: String,
    pub video_id: String,
    pub channel_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub event_type: WebhookEventType,
    pub status: WebhookState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// One page of webhook events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPage {
    pub content: Vec<WebhookEvent>,
    pub total_elements: u64,
    pub total_pages: u32,
    pub page: u32,
    pub size: u32,
}

/// Headline metrics recomputed on every reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationOverview {
    pub total_channels: usize,
    pub active_automations: usize,
    pub total_auto_downloads: u64,
    /// Rounded mean of the per-channel success rates; 0 with no channels.
    pub average_success_rate: u32,
    /// Events in the fetched page that completed processing.
    pub recent_webhooks: usize,
}

impl AutomationOverview {
    pub fn compute(statuses: &[AutomationStatus], events: &[WebhookEvent]) -> Self {
        let average_success_rate = if statuses.is_empty() {
            0
        } else {
            let sum: f64 = statuses.iter().map(|s| s.statistics.success_rate).sum();
            (sum / statuses.len() as f64).round() as u32
        };
        Self {
            total_channels: statuses.len(),
            active_automations: statuses.iter().filter(|s| s.enabled).count(),
            total_auto_downloads: statuses
                .iter()
                .map(|s| s.statistics.total_auto_downloads)
                .sum(),
            average_success_rate,
            recent_webhooks: events
                .iter()
                .filter(|e| e.status == WebhookState::Completed)
                .count(),
        }
    }
}

/// An optimistic local projection of a mutation's expected outcome.
#[derive(Debug, Clone)]
pub enum StatusPatch {
    Enable(AutomationSettings),
    Disable,
    Settings(AutomationSettings),
}

/// The aggregate handed to the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct AutomationView {
    pub channels: Vec<Channel>,
    pub statuses: Vec<AutomationStatus>,
    pub webhook_events: Vec<WebhookEvent>,
    pub overview: AutomationOverview,
    /// Channels whose status carries an unreconciled optimistic patch.
    provisional: HashSet<String>,
}

impl AutomationView {
    /// Rebuild the whole view from freshly pulled snapshots. Clears any
    /// provisional patches: the authoritative data replaces them.
    pub fn from_snapshot(
        channels: Vec<Channel>,
        statuses: Vec<AutomationStatus>,
        webhook_events: Vec<WebhookEvent>,
    ) -> Self {
        let overview = AutomationOverview::compute(&statuses, &webhook_events);
        Self {
            channels,
            statuses,
            webhook_events,
            overview,
            provisional: HashSet::new(),
        }
    }

    pub fn channel(&self, channel_id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.channel_id == channel_id)
    }

    pub fn status(&self, channel_id: &str) -> Option<&AutomationStatus> {
        self.statuses.iter().find(|s| s.channel_id == channel_id)
    }

    /// Apply an optimistic patch to the matching status entry and tag the
    /// channel provisional. The overview is left as-is; the confirming
    /// reconciliation recomputes it.
    ///
    /// Returns true when a different channel's provisional patch was
    /// already awaiting reconciliation, so the caller can reconcile
    /// immediately instead of waiting out the confirmation delay.
    pub fn apply_provisional(&mut self, channel_id: &str, patch: StatusPatch) -> bool {
        let pending_other = self.provisional.iter().any(|id| id != channel_id);
        if let Some(status) = self
            .statuses
            .iter_mut()
            .find(|s| s.channel_id == channel_id)
        {
            match patch {
                StatusPatch::Enable(settings) => {
                    status.enabled = true;
                    status.settings = settings;
                }
                StatusPatch::Disable => status.enabled = false,
                StatusPatch::Settings(settings) => status.settings = settings,
            }
            self.provisional.insert(channel_id.to_string());
        }
        pending_other
    }

    pub fn is_provisional(&self, channel_id: &str) -> bool {
        self.provisional.contains(channel_id)
    }

    pub fn has_provisional(&self) -> bool {
        !self.provisional.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
