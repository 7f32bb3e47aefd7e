//! Aggregate reconciliation over REST snapshots and push events.
//!
//! The [`AutomationController`] is the single integration point the rest of
//! an application depends on. It pulls REST snapshots into one
//! [`AutomationView`], listens to the push channel to schedule delayed
//! re-pulls, and exposes the imperative automation actions, which patch the
//! local aggregate optimistically and reconcile shortly after.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::try_join_all;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use pipewatch_core::automation::{
    AutomationSettings, AutomationStatus, AutomationView, StatusPatch, WebhookEventType,
};
use pipewatch_core::envelope::EventKind;
use pipewatch_core::router::SubscriptionHandle;

use crate::rest::{ApiError, AutomationApi, WebhookSimulation};
use crate::socket::{ConnectError, PushConnection};

/// Page size for the most-recent webhook events pull.
const WEBHOOK_PAGE_SIZE: u32 = 20;

// Fallback user-facing messages when the server does not supply one.
const LOAD_FALLBACK: &str = "failed to load automation data";
const ENABLE_FALLBACK: &str = "failed to enable automatic downloads";
const DISABLE_FALLBACK: &str = "failed to disable automatic downloads";
const UPDATE_FALLBACK: &str = "failed to update automation settings";
const SIMULATE_FALLBACK: &str = "failed to simulate webhook";
const TEST_FALLBACK: &str = "failed to probe webhook connectivity";
const RESUBSCRIBE_FALLBACK: &str = "failed to resubscribe webhook";

/// Behavior toggles for an [`AutomationController`].
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Open the push connection during [`AutomationController::start`].
    pub connect_push: bool,
    /// Re-pull snapshots on a fixed interval.
    pub auto_refresh: bool,
    pub refresh_interval: Duration,
    /// Wait between a push event and the re-pull it schedules, giving the
    /// backend time to settle its own state first.
    pub push_refresh_delay: Duration,
    /// Wait before the refresh confirming an optimistic patch.
    pub confirm_delay: Duration,
    /// Wait before the re-pull after simulating a webhook.
    pub simulate_delay: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            connect_push: true,
            auto_refresh: false,
            refresh_interval: Duration::from_secs(30),
            push_refresh_delay: Duration::from_millis(1000),
            confirm_delay: Duration::from_millis(1000),
            simulate_delay: Duration::from_millis(2000),
        }
    }
}

/// Error from an imperative controller action. The user-facing message is
/// also left on the error flag before this is returned.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
}

/// Whether a scheduled re-pull toggles the loading flag.
#[derive(Clone, Copy)]
enum RefreshMode {
    /// Plain `load_data`, as push-triggered and post-simulate pulls do.
    Silent,
    /// Full `refresh_data` with the loading flag.
    Loading,
}

#[derive(Default)]
struct ControllerState {
    view: AutomationView,
    loading: bool,
    error: Option<String>,
}

#[derive(Default)]
struct Tasks {
    periodic: Option<JoinHandle<()>>,
    /// Delayed re-pulls (debounce, confirm, simulate timers).
    scheduled: Vec<JoinHandle<()>>,
    push_handles: Vec<SubscriptionHandle>,
}

struct ControllerInner {
    api: Arc<dyn AutomationApi>,
    connection: PushConnection,
    options: ControllerOptions,
    state: RwLock<ControllerState>,
    tasks: Mutex<Tasks>,
}

/// Reconciles REST snapshots and push events into one aggregate view.
///
/// Cheap to clone; clones share the same state. Both the REST seam and the
/// push connection are constructor-injected, so every consumer (or test)
/// owns an isolated instance.
#[derive(Clone)]
pub struct AutomationController {
    inner: Arc<ControllerInner>,
}

impl AutomationController {
    pub fn new(
        api: Arc<dyn AutomationApi>,
        connection: PushConnection,
        options: ControllerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                api,
                connection,
                options,
                state: RwLock::new(ControllerState::default()),
                tasks: Mutex::new(Tasks::default()),
            }),
        }
    }

    // --- snapshot accessors -------------------------------------------------

    /// Clone of the current aggregate.
    pub fn view(&self) -> AutomationView {
        self.inner.state.read().unwrap().view.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.read().unwrap().loading
    }

    /// User-facing message of the most recent failure, cleared by the next
    /// successful pass.
    pub fn error(&self) -> Option<String> {
        self.inner.state.read().unwrap().error.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub fn connection(&self) -> &PushConnection {
        &self.inner.connection
    }

    // --- lifecycle ----------------------------------------------------------

    /// One initial refresh, then the optional push connection and periodic
    /// re-pull.
    pub async fn start(&self) {
        self.refresh_data().await;
        if self.inner.options.connect_push {
            if let Err(err) = self.connect_push().await {
                log::warn!("push connection unavailable: {err}");
            }
        }
        if self.inner.options.auto_refresh {
            self.spawn_periodic();
        }
    }

    /// Tear down timers, push subscriptions, and the socket. Idempotent,
    /// and safe when the resources were never acquired.
    pub fn shutdown(&self) {
        let (periodic, scheduled, push_handles) = {
            let mut tasks = self.inner.tasks.lock().unwrap();
            (
                tasks.periodic.take(),
                std::mem::take(&mut tasks.scheduled),
                std::mem::take(&mut tasks.push_handles),
            )
        };
        if let Some(task) = periodic {
            task.abort();
        }
        for task in scheduled {
            task.abort();
        }
        for handle in push_handles {
            handle.unsubscribe();
        }
        self.inner.connection.disconnect();
    }

    /// Open the push connection and install the delayed-refresh
    /// subscriptions.
    pub async fn connect_push(&self) -> Result<(), ConnectError> {
        self.inner.connection.connect().await?;
        self.attach_push_listeners();
        Ok(())
    }

    pub fn disconnect_push(&self) {
        self.inner.connection.disconnect();
    }

    /// Subscribe the delayed re-pull to `NEW_VIDEO` and
    /// `DOWNLOAD_COMPLETED`. Installed by [`connect_push`], and guarded so
    /// repeated connects keep a single registration per kind.
    ///
    /// Must run inside a tokio runtime.
    ///
    /// [`connect_push`]: AutomationController::connect_push
    pub fn attach_push_listeners(&self) {
        let mut tasks = self.inner.tasks.lock().unwrap();
        if !tasks.push_handles.is_empty() {
            return;
        }
        let router = self.inner.connection.router().clone();
        let runtime = Handle::current();
        for kind in [EventKind::NewVideo, EventKind::DownloadCompleted] {
            let weak = Arc::downgrade(&self.inner);
            let runtime = runtime.clone();
            let handle = router.subscribe(kind, move |_envelope| {
                if let Some(inner) = weak.upgrade() {
                    Self::schedule(
                        &inner,
                        &runtime,
                        inner.options.push_refresh_delay,
                        RefreshMode::Silent,
                    );
                }
                Ok(())
            });
            tasks.push_handles.push(handle);
        }
    }

    fn spawn_periodic(&self) {
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.options.refresh_interval;
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { break };
                Self::run_refresh(&inner).await;
            }
        });
        let mut tasks = self.inner.tasks.lock().unwrap();
        if let Some(previous) = tasks.periodic.replace(task) {
            previous.abort();
        }
    }

    // --- reconciliation -----------------------------------------------------

    /// Re-pull everything, with the loading flag toggled around the pass.
    pub async fn refresh_data(&self) {
        Self::run_refresh(&self.inner).await;
    }

    async fn run_refresh(inner: &Arc<ControllerInner>) {
        inner.state.write().unwrap().loading = true;
        let _ = Self::load_data(inner).await;
        inner.state.write().unwrap().loading = false;
    }

    /// One reconciliation pass. Publishes the new aggregate wholesale, or
    /// leaves the previous one untouched on any failure.
    async fn load_data(inner: &Arc<ControllerInner>) -> Result<(), ApiError> {
        inner.state.write().unwrap().error = None;
        match Self::pull_snapshot(inner).await {
            Ok(view) => {
                let mut state = inner.state.write().unwrap();
                state.view = view;
                state.error = None;
                Ok(())
            }
            Err(err) => {
                log::warn!("reconciliation pass failed: {err}");
                inner.state.write().unwrap().error = Some(err.user_message(LOAD_FALLBACK));
                Err(err)
            }
        }
    }

    /// Channels first, then every channel's automation status concurrently
    /// (joined fail-fast), then the newest webhook-event page. Nothing is
    /// published until all of it resolved.
    async fn pull_snapshot(inner: &Arc<ControllerInner>) -> Result<AutomationView, ApiError> {
        let api = &inner.api;
        let channels = api.list_channels().await?;
        let statuses = try_join_all(channels.iter().map(|channel| async move {
            let status = api.automation_status(&channel.channel_id).await?;
            Ok::<_, ApiError>(AutomationStatus {
                channel_id: channel.channel_id.clone(),
                channel_name: channel.channel_name.clone(),
                enabled: status.enabled,
                settings: status.settings,
                statistics: status.statistics,
            })
        }))
        .await?;
        let page = api.webhook_events(0, WEBHOOK_PAGE_SIZE).await?;
        Ok(AutomationView::from_snapshot(channels, statuses, page.content))
    }

    // --- imperative actions -------------------------------------------------

    /// Enable automatic downloads for a channel. On success the local
    /// aggregate is patched in place before any confirming refresh runs;
    /// on failure it is untouched and the error is returned.
    pub async fn enable_automation(
        &self,
        channel_id: &str,
        settings: AutomationSettings,
    ) -> Result<(), ApiError> {
        self.clear_error();
        if let Err(err) = self.inner.api.enable_automation(channel_id, &settings).await {
            self.set_error(&err, ENABLE_FALLBACK);
            return Err(err);
        }
        self.apply_patch(channel_id, StatusPatch::Enable(settings))
            .await;
        Ok(())
    }

    /// Disable automatic downloads for a channel, keeping its settings.
    pub async fn disable_automation(&self, channel_id: &str) -> Result<(), ApiError> {
        self.clear_error();
        if let Err(err) = self.inner.api.disable_automation(channel_id).await {
            self.set_error(&err, DISABLE_FALLBACK);
            return Err(err);
        }
        self.apply_patch(channel_id, StatusPatch::Disable).await;
        Ok(())
    }

    /// Replace a channel's automation settings without touching the
    /// enabled flag.
    pub async fn update_automation_settings(
        &self,
        channel_id: &str,
        settings: AutomationSettings,
    ) -> Result<(), ApiError> {
        self.clear_error();
        if let Err(err) = self.inner.api.enable_automation(channel_id, &settings).await {
            self.set_error(&err, UPDATE_FALLBACK);
            return Err(err);
        }
        self.apply_patch(channel_id, StatusPatch::Settings(settings))
            .await;
        Ok(())
    }

    /// Inject a synthetic NEW_VIDEO webhook for a channel, then re-pull
    /// after a settle delay. Defaults are filled in when no video data is
    /// given.
    pub async fn simulate_webhook(
        &self,
        channel_id: &str,
        video: Option<WebhookSimulation>,
    ) -> Result<(), ControllerError> {
        self.clear_error();
        let known = self.inner.state.read().unwrap().view.channel(channel_id).is_some();
        if !known {
            let err = ControllerError::UnknownChannel(channel_id.to_string());
            self.inner.state.write().unwrap().error = Some(err.to_string());
            return Err(err);
        }
        let payload = video.unwrap_or_else(|| Self::demo_video(channel_id));
        if let Err(err) = self.inner.api.simulate_webhook(&payload).await {
            self.set_error(&err, SIMULATE_FALLBACK);
            return Err(err.into());
        }
        Self::schedule(
            &self.inner,
            &Handle::current(),
            self.inner.options.simulate_delay,
            RefreshMode::Silent,
        );
        Ok(())
    }

    /// Probe webhook connectivity. Failures surface on the error flag and
    /// map to `false` rather than an error.
    pub async fn test_webhook(&self, channel_id: &str) -> bool {
        self.clear_error();
        match self.inner.api.test_webhook(channel_id).await {
            Ok(probe) => probe.success,
            Err(err) => {
                self.set_error(&err, TEST_FALLBACK);
                false
            }
        }
    }

    pub async fn resubscribe_webhook(&self, channel_id: &str) -> Result<(), ApiError> {
        self.clear_error();
        self.inner
            .api
            .resubscribe_webhook(channel_id)
            .await
            .map_err(|err| {
                self.set_error(&err, RESUBSCRIBE_FALLBACK);
                err
            })
    }

    // --- internals ----------------------------------------------------------

    /// Patch the aggregate and arrange the confirming reconciliation: after
    /// `confirm_delay` normally, or immediately when another channel's
    /// provisional patch was still unreconciled (provisional patches never
    /// accumulate without a reconciliation in between).
    async fn apply_patch(&self, channel_id: &str, patch: StatusPatch) {
        let pending_other = self
            .inner
            .state
            .write()
            .unwrap()
            .view
            .apply_provisional(channel_id, patch);
        if pending_other {
            let _ = Self::load_data(&self.inner).await;
        } else {
            Self::schedule(
                &self.inner,
                &Handle::current(),
                self.inner.options.confirm_delay,
                RefreshMode::Loading,
            );
        }
    }

    /// Track a delayed re-pull so teardown can cancel it. Pending re-pulls
    /// are deliberately not coalesced: overlapping results race and the
    /// last write wins.
    fn schedule(inner: &Arc<ControllerInner>, runtime: &Handle, delay: Duration, mode: RefreshMode) {
        let weak = Arc::downgrade(inner);
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            match mode {
                RefreshMode::Silent => {
                    let _ = Self::load_data(&inner).await;
                }
                RefreshMode::Loading => Self::run_refresh(&inner).await,
            }
        });
        let mut tasks = inner.tasks.lock().unwrap();
        tasks.scheduled.retain(|task| !task.is_finished());
        tasks.scheduled.push(task);
    }

    fn demo_video(channel_id: &str) -> WebhookSimulation {
        let now = Utc::now();
        let video_id = format!("demo_{}", Uuid::new_v4().simple());
        let thumbnail_url = format!("https://i.ytimg.com/vi/{video_id}/maxresdefault.jpg");
        WebhookSimulation {
            title: format!("Demo Video - {}", now.format("%Y-%m-%d %H:%M:%S")),
            description: "Demo video exercising the automation workflow".to_string(),
            published_at: now,
            thumbnail_url,
            duration: 213,
            event_type: WebhookEventType::NewVideo,
            video_id,
            channel_id: channel_id.to_string(),
        }
    }

    fn clear_error(&self) {
        self.inner.state.write().unwrap().error = None;
    }

    fn set_error(&self, err: &ApiError, fallback: &str) {
        self.inner.state.write().unwrap().error = Some(err.user_message(fallback));
    }
}

// ============================================================================
// TESTS
// ============================================================================
