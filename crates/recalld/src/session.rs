//! Session actor — drives the coordinator from a single task.
//!
//! Control requests (start, stop, dismiss, snapshot) arrive through a
//! clone-safe [`SessionHandle`]; frames, service results and cooldown timers
//! arrive as internal events. Everything is applied in arrival order by one
//! task, so the coordinator never needs locking.

use recall_core::{
    Coordinator, DeviceUnavailable, Effect, Frame, PersonProfile, RecognitionResult,
    RecognitionService, RecognitionUnavailable, SummaryService, SummaryUnavailable, Ticket, View,
};
use recall_hw::{CaptureDevice, FrameSampler};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session task exited")]
    ChannelClosed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on each recognize/summary call.
    pub request_timeout: Duration,
    /// Suppression window after a dismissal.
    pub cooldown: Duration,
    /// JPEG quality for on-demand snapshots.
    pub snapshot_quality: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            cooldown: recall_core::coordinator::DEFAULT_COOLDOWN,
            snapshot_quality: 90,
        }
    }
}

/// Messages sent from the D-Bus interface to the session task.
enum SessionRequest {
    Start { reply: oneshot::Sender<View> },
    Stop { reply: oneshot::Sender<View> },
    Dismiss { reply: oneshot::Sender<View> },
    Snapshot { reply: oneshot::Sender<Option<Vec<u8>>> },
}

/// Events produced inside the daemon.
enum Event {
    Frame { generation: u64, frame: Frame },
    SamplerEnded { generation: u64 },
    Recognized {
        ticket: Ticket,
        result: Result<RecognitionResult, RecognitionUnavailable>,
    },
    Summarized {
        ticket: Ticket,
        result: Result<PersonProfile, SummaryUnavailable>,
    },
    CooldownElapsed { ticket: Ticket },
}

/// Clone-safe handle to the session task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
    view: watch::Receiver<View>,
}

impl SessionHandle {
    /// Turn the camera on. A device failure is reported in the returned view,
    /// and calling `start` again retries acquisition.
    pub async fn start(&self) -> Result<View, SessionError> {
        self.request(|reply| SessionRequest::Start { reply }).await
    }

    /// Turn the camera off. Idempotent.
    pub async fn stop(&self) -> Result<View, SessionError> {
        self.request(|reply| SessionRequest::Stop { reply }).await
    }

    /// Dismiss the shown profile or error banner.
    pub async fn dismiss(&self) -> Result<View, SessionError> {
        self.request(|reply| SessionRequest::Dismiss { reply }).await
    }

    /// Latest preview frame as JPEG, if the camera is running and ready.
    pub async fn snapshot(&self) -> Result<Option<Vec<u8>>, SessionError> {
        self.request(|reply| SessionRequest::Snapshot { reply }).await
    }

    pub fn view(&self) -> View {
        self.view.borrow().clone()
    }

    /// Receiver that observes every view change.
    pub fn subscribe(&self) -> watch::Receiver<View> {
        self.view.clone()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionRequest,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)
    }
}

/// Spawn the session task on the current runtime.
pub fn spawn_session<D, R, S>(
    sampler: FrameSampler<D>,
    recognizer: R,
    summarizer: S,
    config: SessionConfig,
) -> SessionHandle
where
    D: CaptureDevice,
    R: RecognitionService,
    S: SummaryService,
{
    let (tx, requests) = mpsc::channel(8);
    let (events_tx, events) = mpsc::unbounded_channel();
    let (view_tx, view) = watch::channel(View::Off);

    let session = Session {
        coordinator: Coordinator::new(config.cooldown),
        sampler,
        recognizer: Arc::new(recognizer),
        summarizer: Arc::new(summarizer),
        events: events_tx,
        view: view_tx,
        config,
        releasing: None,
    };
    tokio::spawn(session.run(requests, events));

    SessionHandle { tx, view }
}

struct Session<D: CaptureDevice, R, S> {
    coordinator: Coordinator,
    sampler: FrameSampler<D>,
    recognizer: Arc<R>,
    summarizer: Arc<S>,
    events: mpsc::UnboundedSender<Event>,
    view: watch::Sender<View>,
    config: SessionConfig,
    /// Capture thread still shutting down after a stop.
    releasing: Option<tokio::task::JoinHandle<()>>,
}

impl<D, R, S> Session<D, R, S>
where
    D: CaptureDevice,
    R: RecognitionService,
    S: SummaryService,
{
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<SessionRequest>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        tracing::info!("session task started");
        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    self.handle_request(request).await;
                }
                Some(event) = events.recv() => {
                    self.handle_event(event);
                    self.publish();
                }
            }
        }
        self.release_sampler();
        self.await_release().await;
        tracing::info!("session task exiting");
    }

    async fn handle_request(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::Start { reply } => {
                self.start().await;
                let _ = reply.send(self.publish());
            }
            SessionRequest::Stop { reply } => {
                self.release_sampler();
                self.coordinator.stop();
                let _ = reply.send(self.publish());
            }
            SessionRequest::Dismiss { reply } => {
                let effect = self.coordinator.dismiss();
                self.perform(effect);
                let _ = reply.send(self.publish());
            }
            SessionRequest::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn start(&mut self) {
        if self.coordinator.is_active() {
            return;
        }
        // The previous capture thread must have released the device.
        self.await_release().await;
        if !self.coordinator.start() {
            return;
        }
        let generation = self.coordinator.generation();
        let (frames_tx, frames_rx) = mpsc::channel(1);
        match self.sampler.start(frames_tx) {
            Ok(()) => {
                tokio::spawn(forward_frames(frames_rx, self.events.clone(), generation));
            }
            Err(e) => self.coordinator.device_failed(e),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Frame { generation, frame } => {
                if generation != self.coordinator.generation() {
                    return;
                }
                let effect = self.coordinator.on_frame(frame);
                self.perform(effect);
            }
            Event::SamplerEnded { generation } => {
                if generation != self.coordinator.generation() || !self.coordinator.is_active() {
                    return;
                }
                self.release_sampler();
                self.coordinator.device_failed(DeviceUnavailable::Other(
                    "camera stopped delivering frames".into(),
                ));
            }
            Event::Recognized { ticket, result } => {
                let effect = self.coordinator.on_recognition(ticket, result);
                self.perform(effect);
            }
            Event::Summarized { ticket, result } => self.coordinator.on_summary(ticket, result),
            Event::CooldownElapsed { ticket } => self.coordinator.on_cooldown_elapsed(ticket),
        }
    }

    /// Tell the capture thread to stop and join it on the blocking pool, so
    /// the session task never waits out a dequeue.
    fn release_sampler(&mut self) {
        if let Some(exit) = self.sampler.halt() {
            self.releasing = Some(tokio::task::spawn_blocking(move || exit.join()));
        }
    }

    async fn await_release(&mut self) {
        if let Some(releasing) = self.releasing.take() {
            if let Err(e) = releasing.await {
                tracing::error!(error = %e, "sampler release task failed");
            }
        }
    }

    /// Carry out a coordinator effect. Results come back as events; nothing
    /// here waits.
    fn perform(&self, effect: Option<Effect>) {
        let Some(effect) = effect else {
            return;
        };
        let events = self.events.clone();
        let timeout = self.config.request_timeout;

        match effect {
            Effect::Recognize { ticket, frame } => {
                let recognizer = self.recognizer.clone();
                tokio::spawn(async move {
                    let result = tokio::time::timeout(timeout, recognizer.recognize(frame))
                        .await
                        .unwrap_or_else(|_| {
                            Err(RecognitionUnavailable(format!(
                                "timed out after {}ms",
                                timeout.as_millis()
                            )))
                        });
                    let _ = events.send(Event::Recognized { ticket, result });
                });
            }
            Effect::FetchSummary { ticket, person_id } => {
                let summarizer = self.summarizer.clone();
                tokio::spawn(async move {
                    let result = tokio::time::timeout(timeout, summarizer.fetch_summary(&person_id))
                        .await
                        .unwrap_or_else(|_| {
                            Err(SummaryUnavailable::Service(format!(
                                "timed out after {}ms",
                                timeout.as_millis()
                            )))
                        });
                    let _ = events.send(Event::Summarized { ticket, result });
                });
            }
            Effect::StartCooldown { ticket, after } => {
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = events.send(Event::CooldownElapsed { ticket });
                });
            }
        }
    }

    fn snapshot(&self) -> Option<Vec<u8>> {
        let preview = self.sampler.preview();
        let raw = preview.borrow().clone()?;
        match raw.encode(self.config.snapshot_quality) {
            Ok(frame) => Some(frame.data),
            Err(e) => {
                tracing::warn!(error = %e, "snapshot encode failed");
                None
            }
        }
    }

    /// Project the coordinator into the view channel and return the view.
    fn publish(&self) -> View {
        let next = View::project(&self.coordinator);
        self.view.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::debug!(view = ?next, "view changed");
            *current = next.clone();
            true
        });
        next
    }
}

/// Relay sampled frames into the session's event queue, tagged with the
/// generation they belong to.
async fn forward_frames(
    mut frames: mpsc::Receiver<Frame>,
    events: mpsc::UnboundedSender<Event>,
    generation: u64,
) {
    while let Some(frame) = frames.recv().await {
        if events.send(Event::Frame { generation, frame }).is_err() {
            return;
        }
    }
    let _ = events.send(Event::SamplerEnded { generation });
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::coordinator::SUMMARY_ERROR_MESSAGE;
    use recall_hw::frame::PixelData;
    use recall_hw::{CameraError, FrameSource, RawFrame, SamplerConfig};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc as std_mpsc, Mutex};
    use std::time::Instant;

    const COOLDOWN: Duration = Duration::from_millis(300);

    // --- Fake camera: frames are pushed by the test ---

    struct PushedSource(std_mpsc::Receiver<RawFrame>);

    impl FrameSource for PushedSource {
        fn next_frame(&mut self) -> Result<RawFrame, CameraError> {
            match self.0.recv_timeout(Duration::from_millis(5)) {
                Ok(frame) => Ok(frame),
                Err(std_mpsc::RecvTimeoutError::Timeout) => Err(CameraError::Timeout),
                Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    Err(CameraError::CaptureFailed("unplugged".into()))
                }
            }
        }
    }

    #[derive(Clone, Default)]
    struct PushedDevice {
        feed: Arc<Mutex<Option<std_mpsc::Sender<RawFrame>>>>,
        deny_next: Arc<Mutex<Option<DeviceUnavailable>>>,
    }

    impl PushedDevice {
        fn push(&self) {
            let frame = RawFrame {
                pixels: PixelData::Yuyv([150, 128, 150, 128].repeat(32)),
                width: 8,
                height: 8,
                timestamp: Instant::now(),
                sequence: 0,
            };
            if let Some(tx) = self.feed.lock().unwrap().as_ref() {
                let _ = tx.send(frame);
            }
        }

        fn unplug(&self) {
            self.feed.lock().unwrap().take();
        }
    }

    impl CaptureDevice for PushedDevice {
        type Source = PushedSource;

        fn open(&self) -> Result<PushedSource, DeviceUnavailable> {
            if let Some(e) = self.deny_next.lock().unwrap().take() {
                return Err(e);
            }
            let (tx, rx) = std_mpsc::channel();
            *self.feed.lock().unwrap() = Some(tx);
            Ok(PushedSource(rx))
        }

        fn describe(&self) -> String {
            "pushed".into()
        }
    }

    // --- Fake services ---

    #[derive(Clone, Default)]
    struct FakeRecognizer {
        script: Arc<Mutex<VecDeque<Result<RecognitionResult, RecognitionUnavailable>>>>,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl FakeRecognizer {
        fn answer(&self, result: Result<RecognitionResult, RecognitionUnavailable>) {
            self.script.lock().unwrap().push_back(result);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RecognitionService for FakeRecognizer {
        async fn recognize(&self, _frame: Frame) -> Result<RecognitionResult, RecognitionUnavailable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RecognitionResult::no_match()))
        }
    }

    #[derive(Clone, Default)]
    struct FakeSummarizer {
        profiles: Arc<HashMap<String, PersonProfile>>,
        delay: Duration,
    }

    impl SummaryService for FakeSummarizer {
        async fn fetch_summary(&self, person_id: &str) -> Result<PersonProfile, SummaryUnavailable> {
            tokio::time::sleep(self.delay).await;
            self.profiles
                .get(person_id)
                .cloned()
                .ok_or_else(|| SummaryUnavailable::NotFound(person_id.to_string()))
        }
    }

    fn sarah() -> FakeSummarizer {
        let profile = PersonProfile {
            person_id: "p1".into(),
            name: "Sarah".into(),
            relationship: "Daughter".into(),
            photo_url: None,
            summary: "Sarah is your daughter. She visits every Sunday.".into(),
        };
        FakeSummarizer {
            profiles: Arc::new(HashMap::from([("p1".to_string(), profile)])),
            delay: Duration::ZERO,
        }
    }

    fn spawn<D: CaptureDevice>(
        device: D,
        recognizer: &FakeRecognizer,
        summarizer: FakeSummarizer,
        request_timeout: Duration,
    ) -> SessionHandle {
        let sampler = FrameSampler::new(
            device,
            SamplerConfig {
                interval: Duration::ZERO,
                warmup_frames: 0,
                jpeg_quality: 80,
            },
        );
        spawn_session(
            sampler,
            recognizer.clone(),
            summarizer,
            SessionConfig {
                request_timeout,
                cooldown: COOLDOWN,
                snapshot_quality: 80,
            },
        )
    }

    async fn wait_for(handle: &SessionHandle, want: impl Fn(&View) -> bool) -> View {
        let mut views = handle.subscribe();
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let view = views.borrow_and_update().clone();
                if want(&view) {
                    return view;
                }
                if views.changed().await.is_err() {
                    panic!("session ended");
                }
            }
        })
        .await;
        match waited {
            Ok(view) => view,
            Err(_) => panic!("timed out waiting; last view: {:?}", handle.view()),
        }
    }

    /// Let in-flight work settle.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    fn scanning(view: &View) -> bool {
        matches!(view, View::Scanning { waiting: false })
    }

    fn person(view: &View) -> bool {
        matches!(view, View::Person { .. })
    }

    #[tokio::test]
    async fn test_no_match_keeps_scanning() {
        let device = PushedDevice::default();
        let recognizer = FakeRecognizer::default();
        let handle = spawn(device.clone(), &recognizer, sarah(), Duration::from_secs(1));

        assert_eq!(handle.start().await.unwrap(), View::Scanning { waiting: false });
        recognizer.answer(Ok(RecognitionResult::no_match()));
        device.push();
        settle().await;

        assert_eq!(recognizer.calls(), 1);
        assert_eq!(handle.view(), View::Scanning { waiting: false });
    }

    #[tokio::test]
    async fn test_match_shows_person_and_drops_mid_flight_frames() {
        let device = PushedDevice::default();
        let recognizer = FakeRecognizer {
            delay: Duration::from_millis(100),
            ..Default::default()
        };
        let handle = spawn(device.clone(), &recognizer, sarah(), Duration::from_secs(1));
        handle.start().await.unwrap();

        recognizer.answer(Ok(RecognitionResult::matched("p1", Some(0.9))));
        device.push();
        tokio::time::sleep(Duration::from_millis(30)).await;
        device.push();
        device.push();

        match wait_for(&handle, person).await {
            View::Person { profile } => assert_eq!(profile.name, "Sarah"),
            other => panic!("unexpected view {other:?}"),
        }
        assert_eq!(recognizer.calls(), 1);

        // Frames while a person is shown never reach the recognizer.
        device.push();
        settle().await;
        assert_eq!(recognizer.calls(), 1);
    }

    #[tokio::test]
    async fn test_dismiss_cooldown_then_same_person_again() {
        let device = PushedDevice::default();
        let recognizer = FakeRecognizer::default();
        let handle = spawn(device.clone(), &recognizer, sarah(), Duration::from_secs(1));
        handle.start().await.unwrap();

        recognizer.answer(Ok(RecognitionResult::matched("p1", None)));
        device.push();
        wait_for(&handle, person).await;

        // Dismiss takes effect immediately, before the cooldown ends.
        assert_eq!(handle.dismiss().await.unwrap(), View::Scanning { waiting: true });

        device.push();
        settle().await;
        assert_eq!(recognizer.calls(), 1, "frame during cooldown was dropped");

        wait_for(&handle, scanning).await;
        recognizer.answer(Ok(RecognitionResult::matched("p1", None)));
        device.push();
        wait_for(&handle, person).await;
        assert_eq!(recognizer.calls(), 2);
    }

    #[tokio::test]
    async fn test_recognition_timeout_is_silent() {
        let device = PushedDevice::default();
        let recognizer = FakeRecognizer {
            delay: Duration::from_secs(5),
            ..Default::default()
        };
        let handle = spawn(device.clone(), &recognizer, sarah(), Duration::from_millis(50));
        handle.start().await.unwrap();

        recognizer.answer(Ok(RecognitionResult::matched("p1", None)));
        device.push();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(handle.view(), View::Scanning { waiting: false });
        // The next sample is accepted again.
        device.push();
        settle().await;
        assert_eq!(recognizer.calls(), 2);
    }

    #[tokio::test]
    async fn test_summary_failure_shows_banner_until_dismissed() {
        let device = PushedDevice::default();
        let recognizer = FakeRecognizer::default();
        let handle = spawn(device.clone(), &recognizer, FakeSummarizer::default(), Duration::from_secs(1));
        handle.start().await.unwrap();

        recognizer.answer(Ok(RecognitionResult::matched("p1", None)));
        device.push();
        let view = wait_for(&handle, |v| matches!(v, View::Error { .. })).await;
        assert_eq!(
            view,
            View::Error {
                message: SUMMARY_ERROR_MESSAGE.into()
            }
        );

        // Sampling continues; the same face does not re-trigger.
        recognizer.answer(Ok(RecognitionResult::matched("p1", None)));
        device.push();
        settle().await;
        assert_eq!(recognizer.calls(), 2);
        assert!(matches!(handle.view(), View::Error { .. }));

        assert_eq!(handle.dismiss().await.unwrap(), View::Scanning { waiting: true });
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_ignores_late_results() {
        let device = PushedDevice::default();
        let recognizer = FakeRecognizer {
            delay: Duration::from_millis(80),
            ..Default::default()
        };
        let handle = spawn(device.clone(), &recognizer, sarah(), Duration::from_secs(1));
        handle.start().await.unwrap();

        recognizer.answer(Ok(RecognitionResult::matched("p1", None)));
        device.push();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(handle.stop().await.unwrap(), View::Off);
        assert_eq!(handle.stop().await.unwrap(), View::Off);

        // The in-flight match completes after the stop and is ignored.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(handle.view(), View::Off);
        assert_eq!(handle.snapshot().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_device_denied_then_retry() {
        let device = PushedDevice::default();
        *device.deny_next.lock().unwrap() = Some(DeviceUnavailable::PermissionDenied);
        let recognizer = FakeRecognizer::default();
        let handle = spawn(device.clone(), &recognizer, sarah(), Duration::from_secs(1));

        match handle.start().await.unwrap() {
            View::DeviceError { error, .. } => assert_eq!(error, DeviceUnavailable::PermissionDenied),
            other => panic!("expected DeviceError, got {other:?}"),
        }
        assert_eq!(handle.start().await.unwrap(), View::Scanning { waiting: false });
    }

    #[tokio::test]
    async fn test_unplugged_camera_reports_device_error() {
        let device = PushedDevice::default();
        let recognizer = FakeRecognizer::default();
        let handle = spawn(device.clone(), &recognizer, sarah(), Duration::from_secs(1));
        handle.start().await.unwrap();

        device.unplug();
        let view = wait_for(&handle, |v| matches!(v, View::DeviceError { .. })).await;
        match view {
            View::DeviceError { error, .. } => assert!(matches!(error, DeviceUnavailable::Other(_))),
            other => panic!("unexpected view {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_snapshot_returns_latest_preview() {
        let device = PushedDevice::default();
        let recognizer = FakeRecognizer::default();
        let handle = spawn(device.clone(), &recognizer, sarah(), Duration::from_secs(1));
        handle.start().await.unwrap();

        device.push();
        settle().await;
        let jpeg = handle.snapshot().await.unwrap().expect("preview frame");
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_summary_timeout_shows_banner() {
        let device = PushedDevice::default();
        let recognizer = FakeRecognizer::default();
        let summarizer = FakeSummarizer {
            delay: Duration::from_secs(5),
            ..sarah()
        };
        let handle = spawn(device.clone(), &recognizer, summarizer, Duration::from_millis(50));
        handle.start().await.unwrap();

        recognizer.answer(Ok(RecognitionResult::matched("p1", None)));
        device.push();
        let view = wait_for(&handle, |v| matches!(v, View::Error { .. })).await;
        assert_eq!(
            view,
            View::Error {
                message: SUMMARY_ERROR_MESSAGE.into()
            }
        );

        assert_eq!(handle.dismiss().await.unwrap(), View::Scanning { waiting: true });
    }

    /// Camera whose every dequeue blocks for a long poll.
    #[derive(Clone, Default)]
    struct SlowDevice {
        opens: Arc<AtomicUsize>,
    }

    struct SlowSource;

    impl FrameSource for SlowSource {
        fn next_frame(&mut self) -> Result<RawFrame, CameraError> {
            std::thread::sleep(Duration::from_millis(300));
            Err(CameraError::Timeout)
        }
    }

    impl CaptureDevice for SlowDevice {
        type Source = SlowSource;

        fn open(&self) -> Result<SlowSource, DeviceUnavailable> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(SlowSource)
        }

        fn describe(&self) -> String {
            "slow".into()
        }
    }

    #[tokio::test]
    async fn test_stop_does_not_stall_runtime() {
        let device = SlowDevice::default();
        let handle = spawn(device.clone(), &FakeRecognizer::default(), sarah(), Duration::from_secs(1));
        handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A ticker on the same single-threaded runtime keeps running while
        // the capture thread finishes its dequeue.
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        let started = Instant::now();
        assert_eq!(handle.stop().await.unwrap(), View::Off);
        assert!(started.elapsed() < Duration::from_millis(150), "{:?}", started.elapsed());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ticks.load(Ordering::SeqCst) >= 5);
        ticker.abort();

        // Restarting waits for the old thread to let go of the device.
        assert_eq!(handle.start().await.unwrap(), View::Scanning { waiting: false });
        assert_eq!(device.opens.load(Ordering::SeqCst), 2);
    }
}
