//! Desktop-notification bridge for selected push events.
//!
//! Pure dispatch-to-side-effect: the bridge owns no state beyond the
//! platform capability it delegates to. The platform itself (browser
//! Notification API, Tauri, a test recorder) stays behind the [`Notifier`]
//! trait.

use std::sync::Arc;

use pipewatch_core::envelope::{AlertLevel, EventKind, EventPayload};
use pipewatch_core::router::{EventRouter, SubscriptionHandle};

/// Current permission state of the platform capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPermission {
    Granted,
    Denied,
    /// The user has not been asked yet.
    Prompt,
    /// The platform has no notification capability at all.
    Unsupported,
}

/// A user-facing system notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
}

impl Notification {
    fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            icon: None,
        }
    }
}

/// Platform notification capability.
pub trait Notifier: Send + Sync {
    fn permission(&self) -> NotificationPermission;

    /// Prompt the user; returns whether permission ended up granted.
    fn request_permission(&self) -> bool;

    /// Fire-and-forget display.
    fn show(&self, notification: Notification);
}

/// Maps selected push events to system notifications.
pub struct NotificationBridge {
    notifier: Arc<dyn Notifier>,
}

impl NotificationBridge {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Short-circuits on an already-granted or unavailable capability;
    /// otherwise asks the platform once.
    pub fn request_permission(&self) -> bool {
        match self.notifier.permission() {
            NotificationPermission::Granted => true,
            NotificationPermission::Denied | NotificationPermission::Unsupported => false,
            NotificationPermission::Prompt => self.notifier.request_permission(),
        }
    }

    /// Register the fixed-purpose listeners on `router`.
    ///
    /// The returned handles keep nothing alive by themselves; they exist so
    /// a caller can remove the registrations again.
    pub fn install(&self, router: &EventRouter) -> Vec<SubscriptionHandle> {
        let completed = {
            let notifier = Arc::clone(&self.notifier);
            router.subscribe(EventKind::DownloadCompleted, move |envelope| {
                if let EventPayload::DownloadCompleted(data) = &envelope.payload {
                    show_if_granted(
                        &notifier,
                        Notification::new(
                            "Download complete",
                            format!(
                                "Video \"{}\" from {} finished downloading",
                                data.video_title, data.channel_name
                            ),
                        ),
                    );
                }
                Ok(())
            })
        };

        let failed = {
            let notifier = Arc::clone(&self.notifier);
            router.subscribe(EventKind::DownloadFailed, move |envelope| {
                if let EventPayload::DownloadFailed(data) = &envelope.payload {
                    show_if_granted(
                        &notifier,
                        Notification::new(
                            "Download failed",
                            format!(
                                "Could not download \"{}\" from {}",
                                data.video_title, data.channel_name
                            ),
                        ),
                    );
                }
                Ok(())
            })
        };

        let new_video = {
            let notifier = Arc::clone(&self.notifier);
            router.subscribe(EventKind::NewVideo, move |envelope| {
                if let EventPayload::NewVideo(data) = &envelope.payload {
                    let notification = if data.auto_download_triggered {
                        Notification::new(
                            "New video queued",
                            format!(
                                "\"{}\" from {} was automatically queued for download",
                                data.video_title, data.channel_name
                            ),
                        )
                    } else {
                        Notification::new(
                            "New video",
                            format!(
                                "{} posted a new video: \"{}\"",
                                data.channel_name, data.video_title
                            ),
                        )
                    };
                    show_if_granted(&notifier, notification);
                }
                Ok(())
            })
        };

        let alerts = {
            let notifier = Arc::clone(&self.notifier);
            router.subscribe(EventKind::SystemAlert, move |envelope| {
                if let EventPayload::SystemAlert(alert) = &envelope.payload {
                    // Lower levels stay in the activity feed only.
                    if alert.level == AlertLevel::Error {
                        show_if_granted(
                            &notifier,
                            Notification::new(alert.title.clone(), alert.message.clone()),
                        );
                    }
                }
                Ok(())
            })
        };

        vec![completed, failed, new_video, alerts]
    }
}

/// Permission is re-checked per notification; a user can revoke it while
/// the dashboard is open.
fn show_if_granted(notifier: &Arc<dyn Notifier>, notification: Notification) {
    if notifier.permission() == NotificationPermission::Granted {
        notifier.show(notification);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pipewatch_core::envelope::{DownloadState, DownloadUpdate, NewVideo, PushEnvelope, SystemAlert};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingNotifier {
        permission: Mutex<NotificationPermission>,
        prompt_answer: bool,
        requests: AtomicUsize,
        shown: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        fn with_permission(permission: NotificationPermission) -> Arc<Self> {
            Arc::new(Self {
                permission: Mutex::new(permission),
                prompt_answer: true,
                requests: AtomicUsize::new(0),
                shown: Mutex::new(Vec::new()),
            })
        }

        fn shown(&self) -> Vec<Notification> {
            self.shown.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn permission(&self) -> NotificationPermission {
            *self.permission.lock().unwrap()
        }

        fn request_permission(&self) -> bool {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.prompt_answer {
                *self.permission.lock().unwrap() = NotificationPermission::Granted;
            }
            self.prompt_answer
        }

        fn show(&self, notification: Notification) {
            self.shown.lock().unwrap().push(notification);
        }
    }

    fn download_envelope(kind: EventKind) -> PushEnvelope {
        let data = DownloadUpdate {
            video_id: "vid-1".to_string(),
            video_title: "Launch Day".to_string(),
            channel_id: "chan-1".to_string(),
            channel_name: "Rocketry".to_string(),
            progress: 100.0,
            download_speed: "0 B/s".to_string(),
            estimated_time_remaining: None,
            status: DownloadState::Completed,
        };
        let payload = match kind {
            EventKind::DownloadCompleted => EventPayload::DownloadCompleted(data),
            EventKind::DownloadFailed => EventPayload::DownloadFailed(data),
            other => panic!("not a download kind: {other:?}"),
        };
        PushEnvelope {
            payload,
            timestamp: Utc::now(),
            message_id: "m-1".to_string(),
        }
    }

    fn new_video_envelope(auto_download_triggered: bool) -> PushEnvelope {
        PushEnvelope {
            payload: EventPayload::NewVideo(NewVideo {
                video_id: "vid-2".to_string(),
                video_title: "Deep Dive".to_string(),
                channel_id: "chan-2".to_string(),
                channel_name: "Abyssal".to_string(),
                thumbnail_url: "https://example.com/t.jpg".to_string(),
                published_at: Utc::now(),
                auto_download_triggered,
            }),
            timestamp: Utc::now(),
            message_id: "m-2".to_string(),
        }
    }

    fn alert_envelope(level: AlertLevel) -> PushEnvelope {
        PushEnvelope {
            payload: EventPayload::SystemAlert(SystemAlert {
                level,
                title: "Disk full".to_string(),
                message: "No space left".to_string(),
                action: None,
            }),
            timestamp: Utc::now(),
            message_id: "m-3".to_string(),
        }
    }

    mod permission {
        use super::*;

        #[test]
        fn granted_short_circuits_without_prompting() {
            let notifier = RecordingNotifier::with_permission(NotificationPermission::Granted);
            let bridge = NotificationBridge::new(Arc::clone(&notifier));

            assert!(bridge.request_permission());
            assert_eq!(notifier.requests.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn denied_and_unsupported_never_prompt() {
            for permission in [
                NotificationPermission::Denied,
                NotificationPermission::Unsupported,
            ] {
                let notifier = RecordingNotifier::with_permission(permission);
                let bridge = NotificationBridge::new(Arc::clone(&notifier));

                assert!(!bridge.request_permission());
                assert_eq!(notifier.requests.load(Ordering::SeqCst), 0);
            }
        }

        #[test]
        fn prompt_asks_the_platform_once() {
            let notifier = RecordingNotifier::with_permission(NotificationPermission::Prompt);
            let bridge = NotificationBridge::new(Arc::clone(&notifier));

            assert!(bridge.request_permission());
            assert_eq!(notifier.requests.load(Ordering::SeqCst), 1);
        }
    }

    mod auto_notifications {
        use super::*;

        fn granted_bridge() -> (Arc<RecordingNotifier>, EventRouter) {
            let notifier = RecordingNotifier::with_permission(NotificationPermission::Granted);
            let bridge = NotificationBridge::new(Arc::clone(&notifier));
            let router = EventRouter::new();
            bridge.install(&router);
            (notifier, router)
        }

        #[test]
        fn completed_download_names_video_and_channel() {
            let (notifier, router) = granted_bridge();
            router.dispatch(&download_envelope(EventKind::DownloadCompleted));

            let shown = notifier.shown();
            assert_eq!(shown.len(), 1);
            assert_eq!(shown[0].title, "Download complete");
            assert!(shown[0].body.contains("Launch Day"));
            assert!(shown[0].body.contains("Rocketry"));
        }

        #[test]
        fn failed_download_uses_failure_template() {
            let (notifier, router) = granted_bridge();
            router.dispatch(&download_envelope(EventKind::DownloadFailed));

            let shown = notifier.shown();
            assert_eq!(shown.len(), 1);
            assert_eq!(shown[0].title, "Download failed");
            assert!(shown[0].body.contains("Launch Day"));
        }

        #[test]
        fn new_video_template_branches_on_auto_download() {
            let (notifier, router) = granted_bridge();
            router.dispatch(&new_video_envelope(true));
            router.dispatch(&new_video_envelope(false));

            let shown = notifier.shown();
            assert_eq!(shown.len(), 2);
            assert_eq!(shown[0].title, "New video queued");
            assert!(shown[0].body.contains("queued for download"));
            assert_eq!(shown[1].title, "New video");
            assert!(shown[1].body.contains("posted a new video"));
        }

        #[test]
        fn only_error_alerts_are_surfaced() {
            let (notifier, router) = granted_bridge();
            router.dispatch(&alert_envelope(AlertLevel::Info));
            router.dispatch(&alert_envelope(AlertLevel::Warning));
            router.dispatch(&alert_envelope(AlertLevel::Error));

            let shown = notifier.shown();
            assert_eq!(shown.len(), 1);
            assert_eq!(shown[0].title, "Disk full");
            assert_eq!(shown[0].body, "No space left");
        }

        #[test]
        fn nothing_is_shown_without_permission() {
            let notifier = RecordingNotifier::with_permission(NotificationPermission::Denied);
            let bridge = NotificationBridge::new(Arc::clone(&notifier));
            let router = EventRouter::new();
            bridge.install(&router);

            router.dispatch(&download_envelope(EventKind::DownloadCompleted));
            assert!(notifier.shown().is_empty());
        }

        #[test]
        fn handles_remove_the_registrations() {
            let notifier = RecordingNotifier::with_permission(NotificationPermission::Granted);
            let bridge = NotificationBridge::new(Arc::clone(&notifier));
            let router = EventRouter::new();
            let handles = bridge.install(&router);
            assert_eq!(router.listener_count(), 4);

            for handle in handles {
                handle.unsubscribe();
            }
            assert_eq!(router.listener_count(), 0);

            router.dispatch(&download_envelope(EventKind::DownloadCompleted));
            assert!(notifier.shown().is_empty());
        }
    }
}
