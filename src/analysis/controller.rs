use std::{fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    capture::ViewportCapture,
    domain::{ForageSubmission, Site, SiteId},
    report::{self, Report},
};

use super::{AnalysisError, AnalysisTransport};

const EVENT_CAPACITY: usize = 32;

/// Identity of one analysis attempt. Later attempts always compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationToken(u64);

impl fmt::Display for OperationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisPhase {
    #[default]
    Idle,
    Capturing,
    AwaitingResponse,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum AnalysisOutcome {
    #[default]
    Pending,
    Report(Report),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalysisSnapshot {
    pub token: Option<OperationToken>,
    pub site: Option<SiteId>,
    pub phase: AnalysisPhase,
    pub outcome: AnalysisOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisEvent {
    Started {
        token: OperationToken,
        site: SiteId,
    },
    Succeeded {
        token: OperationToken,
        report: Report,
    },
    Failed {
        token: OperationToken,
        message: String,
    },
    Cancelled {
        token: OperationToken,
    },
}

pub struct OperationHandle {
    pub token: OperationToken,
    task: JoinHandle<()>,
}

impl OperationHandle {
    pub async fn finished(self) {
        if let Err(err) = self.task.await {
            tracing::error!(target: "analysis", token = %self.token, error = %err, "analysis task panicked");
        }
    }
}

struct ActiveOperation {
    token: OperationToken,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ControllerState {
    last_token: u64,
    active: Option<ActiveOperation>,
    /// Cancelled once the most recently spawned task has exited.
    last_done: Option<CancellationToken>,
    snapshot: AnalysisSnapshot,
}

#[derive(Clone)]
pub struct AnalysisController {
    inner: Arc<Inner>,
}

struct Inner {
    capture: Arc<ViewportCapture>,
    transport: Arc<dyn AnalysisTransport>,
    timeout: Duration,
    state: Mutex<ControllerState>,
    events: broadcast::Sender<AnalysisEvent>,
}

impl AnalysisController {
    pub fn new(
        capture: Arc<ViewportCapture>,
        transport: Arc<dyn AnalysisTransport>,
        timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                capture,
                transport,
                timeout,
                state: Mutex::new(ControllerState::default()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> AnalysisSnapshot {
        self.inner.state.lock().snapshot.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.state.lock().active.is_some()
    }

    pub fn analyze(&self, site_id: SiteId, sites: &[Site]) -> OperationHandle {
        let site = sites.iter().find(|site| site.id == site_id).cloned();
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();

        let (token, previous) = {
            let mut state = self.inner.state.lock();
            state.last_token += 1;
            let token = OperationToken(state.last_token);

            if let Some(previous) = state.active.take() {
                previous.cancel.cancel();
                tracing::info!(
                    target: "analysis",
                    superseded = %previous.token,
                    by = %token,
                    "previous analysis superseded"
                );
            }
            state.active = Some(ActiveOperation {
                token,
                cancel: cancel.clone(),
            });
            state.snapshot = AnalysisSnapshot {
                token: Some(token),
                site: Some(site_id),
                phase: AnalysisPhase::Capturing,
                outcome: AnalysisOutcome::Pending,
            };
            (token, state.last_done.replace(done.clone()))
        };

        tracing::info!(target: "analysis", %token, site = %site_id, "analysis started");
        self.inner.emit(AnalysisEvent::Started {
            token,
            site: site_id,
        });

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let _done = done.drop_guard();
            if let Some(previous) = previous {
                previous.cancelled().await;
            }
            let result = inner.execute(token, site, &cancel).await;
            inner.commit(token, result);
        });

        OperationHandle { token, task }
    }

    pub fn close(&self) {
        let cancelled = {
            let mut state = self.inner.state.lock();
            state.snapshot = AnalysisSnapshot::default();
            state.active.take()
        };
        if let Some(active) = cancelled {
            active.cancel.cancel();
            tracing::info!(target: "analysis", token = %active.token, "analysis cancelled");
            self.inner.emit(AnalysisEvent::Cancelled {
                token: active.token,
            });
        }
    }
}

impl Inner {
    async fn execute(
        &self,
        token: OperationToken,
        site: Option<Site>,
        cancel: &CancellationToken,
    ) -> Result<String, AnalysisError> {
        let site = site.ok_or_else(|| {
            AnalysisError::NotReady("The selected site no longer exists.".into())
        })?;

        let image = self.capture.capture(&site, cancel).await?;
        tracing::debug!(
            target: "analysis",
            %token,
            width = image.width,
            height = image.height,
            bounds = ?image.bounds,
            "submitting captured region"
        );
        self.advance(token, AnalysisPhase::AwaitingResponse);

        let submission = ForageSubmission::for_site(&site, &image.jpeg);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AnalysisError::Cancelled),
            res = tokio::time::timeout(self.timeout, self.transport.submit(&submission)) => {
                match res {
                    Ok(result) => result,
                    Err(_) => {
                        cancel.cancel();
                        Err(AnalysisError::Timeout(self.timeout))
                    }
                }
            }
        }
    }

    fn advance(&self, token: OperationToken, phase: AnalysisPhase) {
        let mut state = self.state.lock();
        if state.snapshot.token == Some(token) && state.active.is_some() {
            state.snapshot.phase = phase;
        }
    }

    fn commit(&self, token: OperationToken, result: Result<String, AnalysisError>) {
        let event = {
            let mut state = self.state.lock();
            let current = state.active.as_ref().map(|active| active.token);
            if current != Some(token) {
                let outcome = match &result {
                    Ok(_) => "report",
                    Err(err) => err.kind(),
                };
                tracing::debug!(
                    target: "analysis",
                    %token,
                    outcome,
                    "discarding result of superseded analysis"
                );
                return;
            }
            state.active = None;

            match result {
                Ok(text) => {
                    let report = report::format(&text);
                    state.snapshot.phase = AnalysisPhase::Succeeded;
                    state.snapshot.outcome = AnalysisOutcome::Report(report.clone());
                    tracing::info!(target: "analysis", %token, chars = text.len(), "analysis succeeded");
                    AnalysisEvent::Succeeded { token, report }
                }
                Err(err) if err.is_silent() => {
                    state.snapshot = AnalysisSnapshot::default();
                    AnalysisEvent::Cancelled { token }
                }
                Err(err) => {
                    let message = err.to_string();
                    state.snapshot.phase = AnalysisPhase::Failed;
                    state.snapshot.outcome = AnalysisOutcome::Failure(message.clone());
                    tracing::warn!(target: "analysis", %token, error = %message, "analysis failed");
                    AnalysisEvent::Failed { token, message }
                }
            }
        };
        self.emit(event);
    }

    fn emit(&self, event: AnalysisEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        capture::testing::FakeSurface,
        config::CaptureConfig,
        domain::{FlightRadius, GeoPoint},
    };

    enum Step {
        Reply(Duration, Result<String, AnalysisError>),
        Hang,
    }

    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Step>>,
        started: AtomicUsize,
        completed: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl AnalysisTransport for ScriptedTransport {
        async fn submit(&self, _submission: &ForageSubmission) -> Result<String, AnalysisError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().pop_front();
            match step {
                Some(Step::Reply(delay, result)) => {
                    tokio::time::sleep(delay).await;
                    self.completed.fetch_add(1, Ordering::SeqCst);
                    result
                }
                Some(Step::Hang) | None => std::future::pending().await,
            }
        }
    }

    fn drain_events(receiver: &mut broadcast::Receiver<AnalysisEvent>) -> VecDeque<AnalysisEvent> {
        let mut events = VecDeque::new();
        while let Ok(event) = receiver.try_recv() {
            events.push_back(event);
        }
        events
    }

    const TIMEOUT: Duration = Duration::from_secs(90);

    fn controller(transport: Arc<ScriptedTransport>) -> AnalysisController {
        let capture = Arc::new(ViewportCapture::new(CaptureConfig {
            settle_delay: Duration::from_millis(1_500),
            jpeg_quality: 60,
            fit_padding: 10,
        }));
        capture.attach(Arc::new(FakeSurface::default()));
        AnalysisController::new(capture, transport, TIMEOUT)
    }

    fn sites() -> Vec<Site> {
        [(52.0, 9.0), (52.5, 9.5)]
            .into_iter()
            .map(|(lat, lng)| Site {
                id: SiteId::generate(),
                position: GeoPoint::new(lat, lng),
                radius: FlightRadius::OneKm,
            })
            .collect()
    }

    fn reply(secs: u64, text: &str) -> Step {
        Step::Reply(Duration::from_secs(secs), Ok(text.to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn newer_request_wins_over_slower_older_one() {
        let transport = ScriptedTransport::new(vec![
            reply(30, "**Bewertung:** 2/10"),
            reply(1, "**Bewertung:** 9/10"),
        ]);
        let controller = controller(transport.clone());
        let mut events = controller.subscribe();
        let sites = sites();

        let first = controller.analyze(sites[0].id, &sites);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(controller.snapshot().phase, AnalysisPhase::AwaitingResponse);

        let second = controller.analyze(sites[1].id, &sites);
        let (a, b) = (first.token, second.token);
        assert!(b > a);
        first.finished().await;
        second.finished().await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.token, Some(b));
        assert_eq!(snapshot.site, Some(sites[1].id));
        assert_eq!(snapshot.phase, AnalysisPhase::Succeeded);
        let AnalysisOutcome::Report(report) = snapshot.outcome else {
            panic!("expected a report");
        };
        assert_eq!(report.score.and_then(|score| score.value), Some(9));

        assert_eq!(transport.completed.load(Ordering::SeqCst), 1);
        let committed: Vec<_> = drain_events(&mut events)
            .into_iter()
            .filter(|event| !matches!(event, AnalysisEvent::Started { .. }))
            .collect();
        assert_eq!(committed.len(), 1);
        assert!(matches!(committed[0], AnalysisEvent::Succeeded { token, .. } if token == b));
    }

    #[tokio::test(start_paused = true)]
    async fn reanalysing_the_same_site_waits_for_the_superseded_capture() {
        // The superseded attempt never reaches the transport.
        let transport = ScriptedTransport::new(vec![reply(1, "zweite")]);
        let controller = controller(transport);
        let sites = sites();

        let first = controller.analyze(sites[0].id, &sites);
        let second = controller.analyze(sites[0].id, &sites);
        let latest = second.token;
        first.finished().await;
        second.finished().await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.token, Some(latest));
        match snapshot.outcome {
            AnalysisOutcome::Report(report) => assert_eq!(report.raw, "zweite"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn closing_aborts_the_call_and_frees_the_slot() {
        let transport = ScriptedTransport::new(vec![reply(20, "zu spät"), reply(1, "**Fazit:**")]);
        let controller = controller(transport.clone());
        let mut events = controller.subscribe();
        let sites = sites();

        let handle = controller.analyze(sites[0].id, &sites);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(controller.is_busy());
        assert_eq!(transport.started.load(Ordering::SeqCst), 1);

        controller.close();
        let token = handle.token;
        handle.finished().await;

        assert!(!controller.is_busy());
        assert_eq!(controller.snapshot(), AnalysisSnapshot::default());
        assert_eq!(transport.completed.load(Ordering::SeqCst), 0);
        let events = drain_events(&mut events);
        assert_eq!(events.back(), Some(&AnalysisEvent::Cancelled { token }));

        controller.analyze(sites[1].id, &sites).finished().await;
        assert_eq!(controller.snapshot().phase, AnalysisPhase::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out_exactly_once() {
        let transport = ScriptedTransport::new(vec![Step::Hang]);
        let controller = controller(transport);
        let mut events = controller.subscribe();
        let sites = sites();

        controller.analyze(sites[0].id, &sites).finished().await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, AnalysisPhase::Failed);
        assert_eq!(
            snapshot.outcome,
            AnalysisOutcome::Failure(AnalysisError::Timeout(TIMEOUT).to_string())
        );
        let failures = drain_events(&mut events)
            .into_iter()
            .filter(|event| matches!(event, AnalysisEvent::Failed { .. }))
            .count();
        assert_eq!(failures, 1);
        assert!(!controller.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_site_fails_as_not_ready() {
        let transport = ScriptedTransport::new(vec![]);
        let controller = controller(transport.clone());

        controller
            .analyze(SiteId::generate(), &sites())
            .finished()
            .await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, AnalysisPhase::Failed);
        assert!(matches!(snapshot.outcome, AnalysisOutcome::Failure(ref m) if m.contains("no longer exists")));
        assert_eq!(transport.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_message_is_shown_verbatim() {
        let message = "The daily limit of 50 analyses has been reached. Please try again tomorrow.";
        let transport = ScriptedTransport::new(vec![Step::Reply(
            Duration::from_millis(200),
            Err(AnalysisError::QuotaExceeded(message.into())),
        )]);
        let controller = controller(transport);
        let sites = sites();

        controller.analyze(sites[0].id, &sites).finished().await;

        assert_eq!(
            controller.snapshot().outcome,
            AnalysisOutcome::Failure(message.into())
        );
    }

    #[tokio::test]
    async fn detached_map_surfaces_not_ready() {
        let capture = Arc::new(ViewportCapture::new(CaptureConfig {
            settle_delay: Duration::ZERO,
            jpeg_quality: 60,
            fit_padding: 0,
        }));
        let controller =
            AnalysisController::new(capture, ScriptedTransport::new(vec![]), TIMEOUT);
        let sites = sites();

        controller.analyze(sites[0].id, &sites).finished().await;

        assert_eq!(
            controller.snapshot().outcome,
            AnalysisOutcome::Failure("map is not ready for analysis".into())
        );
    }
}
