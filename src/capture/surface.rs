use anyhow::Result;
use async_trait::async_trait;
use image::RgbaImage;

use crate::domain::{GeoPoint, Site, SiteId};

use super::geo::GeoBounds;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Smallest whole-pixel rectangle covering both corners, or `None` when
    /// the corners collapse to an empty area.
    pub fn covering(north_west: PixelPoint, south_east: PixelPoint) -> Option<Self> {
        let values = [north_west.x, north_west.y, south_east.x, south_east.y];
        if values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let left = north_west.x.min(south_east.x).floor();
        let top = north_west.y.min(south_east.y).floor();
        let right = north_west.x.max(south_east.x).ceil();
        let bottom = north_west.y.max(south_east.y).ceil();
        let width = (right - left) as i64;
        let height = (bottom - top) as i64;
        if width <= 0 || height <= 0 || width > u32::MAX as i64 || height > u32::MAX as i64 {
            return None;
        }
        Some(Self {
            x: left as i64,
            y: top as i64,
            width: width as u32,
            height: height as u32,
        })
    }
}

#[async_trait]
pub trait MapSurface: Send + Sync {
    /// Moves the view so `bounds` fits inside the viewport minus `padding`
    /// pixels on every side. Tile loading may continue after this returns.
    async fn fit_bounds(&self, bounds: &GeoBounds, padding: u32) -> Result<()>;

    fn project(&self, point: GeoPoint) -> PixelPoint;

    fn sync_overlays(&self, sites: &[Site]);

    fn set_overlay_visible(&self, site: SiteId, visible: bool);

    async fn rasterize(&self, rect: PixelRect) -> Result<RgbaImage>;
}
