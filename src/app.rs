use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use reqwest::Client;
use tokio::{
    io::{self, AsyncBufReadExt, BufReader},
    sync::broadcast,
    time::timeout,
};

use crate::{
    ai::GeminiClient,
    analysis::{AnalysisController, AnalysisEvent, AnalysisOutcome, ProxyTransport},
    capture::{tiles::TileMapSurface, ViewportCapture},
    cli::{AnalyzeArgs, Command},
    config::AppConfig,
    domain::{GeoPoint, Site},
    infrastructure::{directories::ResolvedPaths, shutdown::Shutdown},
    planner::{Flow, PlanCommand, Planner, HELP},
    proxy::{self, DailyQuota, ProxyState, SystemClock},
    report::{self, Report},
    session::ScoutSession,
};

const INITIAL_ZOOM: u8 = 13;
// Every capture re-fits the view, so this only sets the first frame.
const PLAN_START: GeoPoint = GeoPoint::new(51.1657, 10.4515);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct ForageScoutApp {
    config: Arc<AppConfig>,
    paths: ResolvedPaths,
    http: Client,
    shutdown: Shutdown,
}

impl ForageScoutApp {
    pub fn initialize(config: AppConfig, paths: ResolvedPaths, shutdown: Shutdown) -> Result<Self> {
        let http = Client::builder()
            .user_agent(format!("forage-scout/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            config: Arc::new(config),
            paths,
            http,
            shutdown,
        })
    }

    pub async fn run(self, command: Command) -> Result<()> {
        match command {
            Command::Serve => self.serve().await,
            Command::Analyze(args) => self.analyze(args).await,
            Command::Plan => self.plan().await,
        }
    }

    async fn serve(self) -> Result<()> {
        let config = self.config.as_ref();
        if config.gemini.api_key.is_none() {
            tracing::warn!(
                target: "proxy",
                "GEMINI_API_KEY is not set; every analysis will fail with a server error"
            );
        }

        let model = Arc::new(GeminiClient::new(self.http.clone(), config.gemini.clone()));
        let clock = Arc::new(SystemClock::new(config.proxy.quota_timezone));
        let quota = Arc::new(DailyQuota::new(config.proxy.daily_limit, clock));
        tracing::info!(
            target: "proxy",
            model = %config.gemini.model,
            daily_limit = config.proxy.daily_limit,
            timezone = ?config.proxy.quota_timezone,
            "starting forage analysis proxy"
        );

        proxy::serve(
            config.proxy.bind,
            ProxyState { model, quota },
            self.shutdown.subscribe(),
        )
        .await
    }

    /// Map, capture and controller for one client session around `center`.
    fn build_session(&self, center: GeoPoint) -> (Arc<ViewportCapture>, ScoutSession) {
        let config = self.config.as_ref();
        let surface = Arc::new(TileMapSurface::new(
            self.http.clone(),
            config.map.clone(),
            center,
            INITIAL_ZOOM,
        ));
        let capture = Arc::new(ViewportCapture::new(config.capture.clone()));
        capture.attach(surface.clone());
        let transport = Arc::new(ProxyTransport::new(
            self.http.clone(),
            config.client.proxy_url.clone(),
        ));
        let controller =
            AnalysisController::new(capture.clone(), transport, config.client.analysis_timeout);
        (capture, ScoutSession::new(surface, controller))
    }

    async fn analyze(self, args: AnalyzeArgs) -> Result<()> {
        let config = self.config.as_ref();
        let position = GeoPoint::new(args.lat, args.lng);
        let (capture, mut session) = self.build_session(position);
        let site_id = session.add_site(position)?;
        session.set_radius(site_id, args.flight_radius())?;
        let Some(site) = session.selected().cloned() else {
            bail!("newly placed site was not selected");
        };

        tracing::info!(
            target: "analysis",
            lat = site.position.lat,
            lng = site.position.lng,
            radius = %site.radius,
            proxy = %config.client.proxy_url,
            "analysing site"
        );

        let progress = tokio::spawn(report_progress(session.controller().subscribe(), false));
        let handle = session.analyze(site.id);
        let mut interrupted = self.shutdown.subscribe();
        let mut finished = Box::pin(handle.finished());
        let interrupt = tokio::select! {
            _ = &mut finished => None,
            reason = interrupted.notified() => Some(reason),
        };
        if let Some(reason) = interrupt {
            tracing::info!(target: "analysis", ?reason, "interrupt received, closing analysis");
            session.close_analysis();
            if timeout(SHUTDOWN_GRACE, &mut finished).await.is_err() {
                tracing::warn!(
                    target: "analysis",
                    "analysis did not stop within {:?}",
                    SHUTDOWN_GRACE
                );
            }
        }
        capture.detach();
        progress.abort();

        match session.controller().snapshot().outcome {
            AnalysisOutcome::Report(report) => {
                println!("{}", report.render());
                if args.save {
                    self.export(&site, &report).await?;
                }
                Ok(())
            }
            AnalysisOutcome::Failure(message) => bail!(message),
            AnalysisOutcome::Pending => {
                tracing::info!(target: "analysis", "analysis closed before a result arrived");
                Ok(())
            }
        }
    }

    async fn plan(self) -> Result<()> {
        let (capture, session) = self.build_session(PLAN_START);
        let progress = tokio::spawn(report_progress(session.controller().subscribe(), true));
        let mut planner = Planner::new(session, self.paths.export_dir.clone());
        let mut lines = BufReader::new(io::stdin()).lines();
        let mut interrupted = self.shutdown.subscribe();
        println!("{HELP}");

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line.context("failed to read from stdin")?,
                reason = interrupted.notified() => {
                    tracing::info!(target: "planner", ?reason, "interrupt received, leaving planner");
                    break;
                }
            };
            let Some(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            let command = match line.parse::<PlanCommand>() {
                Ok(command) => command,
                Err(message) => {
                    println!("{message}");
                    continue;
                }
            };
            match planner.handle(command).await {
                Flow::Continue(reply) => println!("{reply}"),
                Flow::Quit => break,
            }
        }

        if timeout(SHUTDOWN_GRACE, planner.close()).await.is_err() {
            tracing::warn!(target: "planner", "analysis did not stop within {:?}", SHUTDOWN_GRACE);
        }
        tracing::info!(
            target: "planner",
            sites = planner.session().sites().len(),
            "planner closed"
        );
        capture.detach();
        progress.abort();
        Ok(())
    }

    async fn export(&self, site: &Site, report: &Report) -> Result<()> {
        if report.is_empty() {
            tracing::info!(target: "export", "nothing to export for an empty analysis");
            return Ok(());
        }
        let path = report::save_report(&self.paths.export_dir, site, report).await?;
        println!("saved {}", path.display());
        Ok(())
    }
}

/// Interactive sessions also print results as they arrive.
async fn report_progress(mut events: broadcast::Receiver<AnalysisEvent>, interactive: bool) {
    while let Ok(event) = events.recv().await {
        match event {
            AnalysisEvent::Started { token, site } => {
                eprintln!("Analysing the surroundings of site {site} ({token})...");
            }
            AnalysisEvent::Succeeded { token, report } => {
                tracing::debug!(target: "analysis", %token, score = ?report.score, "result available");
                if interactive {
                    println!("{}", report.render());
                }
            }
            AnalysisEvent::Failed { token, message } => {
                tracing::debug!(target: "analysis", %token, %message, "failure reported");
                if interactive {
                    println!("Analysis {token} failed: {message}");
                }
            }
            AnalysisEvent::Cancelled { token } => {
                tracing::debug!(target: "analysis", %token, "analysis cancelled");
                if interactive {
                    println!("Analysis {token} cancelled");
                }
            }
        }
    }
}
