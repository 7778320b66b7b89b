pub mod geo;
pub mod surface;
pub mod tiles;

use std::{collections::HashSet, sync::Arc};

use image::{codecs::jpeg::JpegEncoder, DynamicImage, RgbaImage};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    config::CaptureConfig,
    domain::{Site, SiteId},
};

use self::{
    geo::{circle_bounds, GeoBounds},
    surface::{MapSurface, PixelRect},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("{0}")]
    NotReady(String),
    #[error("site {0} is already being captured")]
    Busy(SiteId),
    #[error("capture cancelled")]
    Cancelled,
    #[error("capture region collapsed to an empty rectangle")]
    EmptyRegion,
    #[error("map surface failed: {0}")]
    Surface(String),
    #[error("image encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bounds: GeoBounds,
}

pub struct ViewportCapture {
    surface: RwLock<Option<Arc<dyn MapSurface>>>,
    config: CaptureConfig,
    in_flight: Mutex<HashSet<SiteId>>,
}

impl ViewportCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            surface: RwLock::new(None),
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn attach(&self, surface: Arc<dyn MapSurface>) {
        *self.surface.write() = Some(surface);
    }

    pub fn detach(&self) {
        self.surface.write().take();
    }

    pub async fn capture(
        &self,
        site: &Site,
        cancel: &CancellationToken,
    ) -> Result<CapturedImage, CaptureError> {
        let surface = self
            .surface
            .read()
            .clone()
            .ok_or_else(|| CaptureError::NotReady("map is not ready for analysis".into()))?;
        let _slot = InFlight::claim(&self.in_flight, site.id)?;

        let bounds = circle_bounds(site.position, f64::from(site.radius.meters()));
        tracing::debug!(
            target: "capture",
            site = %site.id,
            radius_m = site.radius.meters(),
            ?bounds,
            "fitting map to capture bounds"
        );

        if cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
            res = surface.fit_bounds(&bounds, self.config.fit_padding) => {
                res.map_err(|err| CaptureError::Surface(format!("{err:#}")))?
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
            _ = tokio::time::sleep(self.config.settle_delay) => {}
        }

        let north_west = surface.project(bounds.north_west());
        let south_east = surface.project(bounds.south_east());
        let rect = PixelRect::covering(north_west, south_east).ok_or(CaptureError::EmptyRegion)?;

        let pixels = {
            let _hidden = OverlaySuppressed::hide(surface.as_ref(), site.id);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
                res = surface.rasterize(rect) => {
                    res.map_err(|err| CaptureError::Surface(format!("{err:#}")))?
                }
            }
        };

        let quality = self.config.jpeg_quality;
        let encode = tokio::task::spawn_blocking(move || encode_jpeg(pixels, quality));
        let jpeg = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
            res = encode => res.map_err(|err| CaptureError::Encode(err.to_string()))??,
        };

        tracing::info!(
            target: "capture",
            site = %site.id,
            width = rect.width,
            height = rect.height,
            bytes = jpeg.len(),
            "map region captured"
        );

        Ok(CapturedImage {
            jpeg,
            width: rect.width,
            height: rect.height,
            bounds,
        })
    }
}

fn encode_jpeg(pixels: RgbaImage, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let rgb = DynamicImage::ImageRgba8(pixels).to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|err| CaptureError::Encode(err.to_string()))?;
    Ok(buffer)
}

struct InFlight<'a> {
    set: &'a Mutex<HashSet<SiteId>>,
    site: SiteId,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<SiteId>>, site: SiteId) -> Result<Self, CaptureError> {
        if !set.lock().insert(site) {
            return Err(CaptureError::Busy(site));
        }
        Ok(Self { set, site })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.site);
    }
}

/// Hides a site's radius outline; the outline comes back on drop, including
/// when the capture future errors or is dropped mid-render.
struct OverlaySuppressed<'a> {
    surface: &'a dyn MapSurface,
    site: SiteId,
}

impl<'a> OverlaySuppressed<'a> {
    fn hide(surface: &'a dyn MapSurface, site: SiteId) -> Self {
        surface.set_overlay_visible(site, false);
        Self { surface, site }
    }
}

impl Drop for OverlaySuppressed<'_> {
    fn drop(&mut self) {
        self.surface.set_overlay_visible(self.site, true);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};
    use parking_lot::Mutex;

    use super::{
        geo::GeoBounds,
        surface::{MapSurface, PixelPoint, PixelRect},
    };
    use crate::domain::{GeoPoint, Site, SiteId};

    /// Linear stand-in for a map: the last fitted box spans pixels 10..110.
    #[derive(Default)]
    pub(crate) struct FakeSurface {
        pub(crate) fitted: Mutex<Option<GeoBounds>>,
        pub(crate) overlay_calls: Mutex<Vec<(SiteId, bool)>>,
        pub(crate) hidden_during_render: Mutex<Vec<SiteId>>,
        pub(crate) fail_render: AtomicBool,
        pub(crate) synced: Mutex<Vec<Vec<SiteId>>>,
        hidden: Mutex<Vec<SiteId>>,
    }

    #[async_trait]
    impl MapSurface for FakeSurface {
        async fn fit_bounds(&self, bounds: &GeoBounds, _padding: u32) -> Result<()> {
            *self.fitted.lock() = Some(*bounds);
            Ok(())
        }

        fn project(&self, point: GeoPoint) -> PixelPoint {
            let Some(b) = *self.fitted.lock() else {
                return PixelPoint { x: 0.0, y: 0.0 };
            };
            PixelPoint {
                x: 10.0 + (point.lng - b.west) / (b.east - b.west) * 100.0,
                y: 10.0 + (b.north - point.lat) / (b.north - b.south) * 100.0,
            }
        }

        fn sync_overlays(&self, sites: &[Site]) {
            self.synced
                .lock()
                .push(sites.iter().map(|site| site.id).collect());
        }

        fn set_overlay_visible(&self, site: SiteId, visible: bool) {
            self.overlay_calls.lock().push((site, visible));
            let mut hidden = self.hidden.lock();
            if visible {
                hidden.retain(|id| *id != site);
            } else {
                hidden.push(site);
            }
        }

        async fn rasterize(&self, rect: PixelRect) -> Result<RgbaImage> {
            self.hidden_during_render
                .lock()
                .extend(self.hidden.lock().iter().copied());
            if self.fail_render.load(Ordering::SeqCst) {
                bail!("renderer lost its context");
            }
            Ok(RgbaImage::from_pixel(
                rect.width,
                rect.height,
                Rgba([90, 140, 60, 255]),
            ))
        }
    }
}
