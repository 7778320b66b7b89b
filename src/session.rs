use std::sync::Arc;

use crate::{
    analysis::{AnalysisController, OperationHandle},
    capture::surface::MapSurface,
    domain::{FlightRadius, GeoPoint, Site, SiteError, SiteId, SiteRegistry},
};

/// One planning session: the sites on the map and the analysis running for
/// them. Site changes are mirrored onto the map's radius outlines.
pub struct ScoutSession {
    sites: SiteRegistry,
    surface: Arc<dyn MapSurface>,
    controller: AnalysisController,
}

impl ScoutSession {
    pub fn new(surface: Arc<dyn MapSurface>, controller: AnalysisController) -> Self {
        Self {
            sites: SiteRegistry::new(),
            surface,
            controller,
        }
    }

    pub fn sites(&self) -> &[Site] {
        self.sites.list()
    }

    pub fn selected(&self) -> Option<&Site> {
        self.sites.selected()
    }

    pub fn controller(&self) -> &AnalysisController {
        &self.controller
    }

    pub fn add_site(&mut self, position: GeoPoint) -> Result<SiteId, SiteError> {
        let id = self.sites.add(position)?.id;
        self.sync();
        Ok(id)
    }

    /// Removing the site under analysis also closes that analysis.
    pub fn remove_site(&mut self, id: SiteId) -> Result<Site, SiteError> {
        let removed = self.sites.remove(id)?;
        if self.controller.snapshot().site == Some(id) {
            self.controller.close();
        }
        self.sync();
        Ok(removed)
    }

    pub fn set_radius(&mut self, id: SiteId, radius: FlightRadius) -> Result<(), SiteError> {
        self.sites.set_radius(id, radius)?;
        self.sync();
        Ok(())
    }

    pub fn select(&mut self, id: Option<SiteId>) -> Result<(), SiteError> {
        self.sites.select(id)
    }

    /// The analysed site also becomes the selected one.
    pub fn analyze(&mut self, id: SiteId) -> OperationHandle {
        if let Err(err) = self.sites.select(Some(id)) {
            tracing::debug!(target: "sites", error = %err, "analysing a site that is not planned");
        }
        self.controller.analyze(id, self.sites.list())
    }

    pub fn analyze_selected(&mut self) -> Option<OperationHandle> {
        let id = self.sites.selected()?.id;
        Some(self.analyze(id))
    }

    pub fn close_analysis(&self) {
        self.controller.close();
    }

    fn sync(&self) {
        self.surface.sync_overlays(self.sites.list());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        analysis::{AnalysisOutcome, ProxyTransport},
        capture::{testing::FakeSurface, ViewportCapture},
        config::CaptureConfig,
    };

    fn session() -> (Arc<FakeSurface>, ScoutSession) {
        let surface = Arc::new(FakeSurface::default());
        let capture = Arc::new(ViewportCapture::new(CaptureConfig {
            settle_delay: Duration::from_secs(1),
            jpeg_quality: 70,
            fit_padding: 10,
        }));
        capture.attach(surface.clone());
        let transport = ProxyTransport::new(
            reqwest::Client::new(),
            url::Url::parse("http://127.0.0.1:9/api/analyze").unwrap(),
        );
        let controller =
            AnalysisController::new(capture, Arc::new(transport), Duration::from_secs(90));
        (surface.clone(), ScoutSession::new(surface, controller))
    }

    #[tokio::test]
    async fn overlays_follow_site_changes() {
        let (surface, mut session) = session();

        let a = session.add_site(GeoPoint::new(50.0, 7.0)).unwrap();
        let b = session.add_site(GeoPoint::new(50.1, 7.1)).unwrap();
        session.set_radius(a, FlightRadius::TwoKm).unwrap();
        session.remove_site(a).unwrap();

        let synced = surface.synced.lock().clone();
        assert_eq!(synced.len(), 4);
        assert_eq!(synced[1], vec![a, b]);
        assert_eq!(synced[3], vec![b]);
        assert_eq!(session.selected().map(|site| site.id), Some(b));
    }

    #[tokio::test(start_paused = true)]
    async fn removing_the_analysed_site_closes_its_analysis() {
        let (_, mut session) = session();
        let id = session.add_site(GeoPoint::new(47.0, 8.0)).unwrap();

        let handle = session.analyze_selected().unwrap();
        assert!(session.controller().is_busy());

        session.remove_site(id).unwrap();
        handle.finished().await;

        assert!(!session.controller().is_busy());
        let snapshot = session.controller().snapshot();
        assert!(snapshot.site.is_none());
        assert_eq!(snapshot.outcome, AnalysisOutcome::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn analysing_a_site_selects_it() {
        let (_, mut session) = session();
        let first = session.add_site(GeoPoint::new(47.0, 8.0)).unwrap();
        session.add_site(GeoPoint::new(47.2, 8.2)).unwrap();
        assert_ne!(session.selected().map(|site| site.id), Some(first));

        let handle = session.analyze(first);

        assert_eq!(session.selected().map(|site| site.id), Some(first));
        session.close_analysis();
        handle.finished().await;
    }

    #[test]
    fn nothing_selected_means_nothing_to_analyse() {
        let (_, mut session) = session();
        let id = session.add_site(GeoPoint::new(47.0, 8.0)).unwrap();
        session.select(None).unwrap();
        assert!(session.analyze_selected().is_none());
        assert_eq!(session.sites()[0].id, id);
    }
}
