use std::{
    collections::{HashMap, HashSet, VecDeque},
    f64::consts::PI,
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use image::{imageops, Rgba, RgbaImage};
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use tokio::task::JoinHandle;

use crate::{
    config::MapConfig,
    domain::{GeoPoint, Site, SiteId},
};

use super::{
    geo::{destination, GeoBounds},
    surface::{MapSurface, PixelPoint, PixelRect},
};

const TILE_SIZE: u32 = 256;
const MIN_ZOOM: u8 = 1;
const MAX_ZOOM: u8 = 18;
const MAX_LATITUDE: f64 = 85.051_128_779_806_6;
const PREFETCH_CONCURRENCY: usize = 6;
const TILE_CACHE_CAPACITY: usize = 256;
const PLACEHOLDER: Rgba<u8> = Rgba([48, 56, 64, 255]);
const OUTLINE: Rgba<u8> = Rgba([59, 130, 246, 255]);
const OUTLINE_WIDTH: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TileKey {
    zoom: u8,
    x: u32,
    y: u32,
}

/// Decoded tiles, oldest evicted first once `capacity` is exceeded.
struct TileCache {
    tiles: HashMap<TileKey, RgbaImage>,
    order: VecDeque<TileKey>,
    capacity: usize,
}

impl TileCache {
    fn new(capacity: usize) -> Self {
        Self {
            tiles: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn contains(&self, key: &TileKey) -> bool {
        self.tiles.contains_key(key)
    }

    fn get(&self, key: &TileKey) -> Option<&RgbaImage> {
        self.tiles.get(key)
    }

    fn insert(&mut self, key: TileKey, tile: RgbaImage) {
        if self.tiles.insert(key, tile).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.tiles.remove(&oldest);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct View {
    zoom: u8,
    /// Centre in world pixels at `zoom`.
    center: PixelPoint,
}

#[derive(Debug, Clone)]
struct Overlay {
    center: GeoPoint,
    radius_m: f64,
    visible: bool,
}

pub struct TileMapSurface {
    client: Client,
    config: MapConfig,
    view: RwLock<View>,
    tiles: Arc<Mutex<TileCache>>,
    overlays: RwLock<HashMap<SiteId, Overlay>>,
    prefetch: Mutex<Option<JoinHandle<()>>>,
}

impl TileMapSurface {
    pub fn new(client: Client, config: MapConfig, initial_center: GeoPoint, zoom: u8) -> Self {
        let zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        Self {
            client,
            config,
            view: RwLock::new(View {
                zoom,
                center: world_pixel(initial_center, zoom),
            }),
            tiles: Arc::new(Mutex::new(TileCache::new(TILE_CACHE_CAPACITY))),
            overlays: RwLock::new(HashMap::new()),
            prefetch: Mutex::new(None),
        }
    }

    fn origin(&self, view: &View) -> PixelPoint {
        PixelPoint {
            x: view.center.x - f64::from(self.config.viewport_width) / 2.0,
            y: view.center.y - f64::from(self.config.viewport_height) / 2.0,
        }
    }

    /// Largest zoom at which `bounds` plus padding fits the viewport.
    fn zoom_for(&self, bounds: &GeoBounds, padding: u32) -> u8 {
        let avail_w = f64::from(self.config.viewport_width.saturating_sub(2 * padding).max(1));
        let avail_h = f64::from(self.config.viewport_height.saturating_sub(2 * padding).max(1));
        (MIN_ZOOM..=MAX_ZOOM)
            .rev()
            .find(|&zoom| {
                let nw = world_pixel(bounds.north_west(), zoom);
                let se = world_pixel(bounds.south_east(), zoom);
                se.x - nw.x <= avail_w && se.y - nw.y <= avail_h
            })
            .unwrap_or(MIN_ZOOM)
    }

    fn visible_tiles(&self, view: &View) -> Vec<TileKey> {
        let origin = self.origin(view);
        let size = f64::from(TILE_SIZE);
        let count = 1_i64 << view.zoom;
        let x0 = (origin.x / size).floor() as i64;
        let y0 = (origin.y / size).floor() as i64;
        let x1 = ((origin.x + f64::from(self.config.viewport_width) - 1.0) / size).floor() as i64;
        let y1 = ((origin.y + f64::from(self.config.viewport_height) - 1.0) / size).floor() as i64;

        // Wider than the world at low zoom, so wrapped columns repeat.
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for ty in y0.max(0)..=y1.min(count - 1) {
            for tx in x0..=x1 {
                let key = TileKey {
                    zoom: view.zoom,
                    x: tx.rem_euclid(count) as u32,
                    y: ty as u32,
                };
                if seen.insert(key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    fn start_prefetch(&self, keys: Vec<TileKey>) {
        let missing: Vec<TileKey> = {
            let cache = self.tiles.lock();
            keys.into_iter().filter(|key| !cache.contains(key)).collect()
        };

        let mut slot = self.prefetch.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        if missing.is_empty() {
            return;
        }

        let client = self.client.clone();
        let template = self.config.tile_url.clone();
        let cache = self.tiles.clone();
        *slot = Some(tokio::spawn(async move {
            tracing::debug!(target: "capture", tiles = missing.len(), "prefetching map tiles");
            stream::iter(missing)
                .for_each_concurrent(PREFETCH_CONCURRENCY, |key| {
                    let client = client.clone();
                    let template = template.clone();
                    let cache = cache.clone();
                    async move {
                        match fetch_tile(&client, &template, key).await {
                            Ok(tile) => {
                                cache.lock().insert(key, tile);
                            }
                            Err(err) => tracing::warn!(
                                target: "capture",
                                error = %err,
                                zoom = key.zoom,
                                x = key.x,
                                y = key.y,
                                "tile fetch failed"
                            ),
                        }
                    }
                })
                .await;
        }));
    }

    fn compose(&self, view: &View, rect: PixelRect) -> RgbaImage {
        let origin = self.origin(view);
        let left = origin.x.floor() as i64 + rect.x;
        let top = origin.y.floor() as i64 + rect.y;
        let size = i64::from(TILE_SIZE);
        let count = 1_i64 << view.zoom;

        let mut canvas = RgbaImage::from_pixel(rect.width, rect.height, PLACEHOLDER);
        let cache = self.tiles.lock();
        let tx0 = left.div_euclid(size);
        let ty0 = top.div_euclid(size);
        let tx1 = (left + i64::from(rect.width) - 1).div_euclid(size);
        let ty1 = (top + i64::from(rect.height) - 1).div_euclid(size);
        for ty in ty0.max(0)..=ty1.min(count - 1) {
            for tx in tx0..=tx1 {
                let key = TileKey {
                    zoom: view.zoom,
                    x: tx.rem_euclid(count) as u32,
                    y: ty as u32,
                };
                if let Some(tile) = cache.get(&key) {
                    imageops::replace(&mut canvas, tile, tx * size - left, ty * size - top);
                }
            }
        }
        drop(cache);

        let offset = PixelPoint {
            x: left as f64,
            y: top as f64,
        };
        for overlay in self.overlays.read().values().filter(|o| o.visible) {
            draw_circle_outline(&mut canvas, overlay, view.zoom, offset);
        }
        canvas
    }
}

#[async_trait]
impl MapSurface for TileMapSurface {
    async fn fit_bounds(&self, bounds: &GeoBounds, padding: u32) -> Result<()> {
        let zoom = self.zoom_for(bounds, padding);
        let nw = world_pixel(bounds.north_west(), zoom);
        let se = world_pixel(bounds.south_east(), zoom);
        let view = View {
            zoom,
            center: PixelPoint {
                x: (nw.x + se.x) / 2.0,
                y: (nw.y + se.y) / 2.0,
            },
        };
        *self.view.write() = view;
        tracing::debug!(target: "capture", zoom, "map view fitted");
        self.start_prefetch(self.visible_tiles(&view));
        Ok(())
    }

    fn project(&self, point: GeoPoint) -> PixelPoint {
        let view = *self.view.read();
        let world = world_pixel(point, view.zoom);
        let origin = self.origin(&view);
        PixelPoint {
            x: world.x - origin.x,
            y: world.y - origin.y,
        }
    }

    fn sync_overlays(&self, sites: &[Site]) {
        let mut overlays = self.overlays.write();
        let mut next = HashMap::with_capacity(sites.len());
        for site in sites {
            let visible = overlays.get(&site.id).map_or(true, |o| o.visible);
            next.insert(
                site.id,
                Overlay {
                    center: site.position,
                    radius_m: f64::from(site.radius.meters()),
                    visible,
                },
            );
        }
        *overlays = next;
    }

    fn set_overlay_visible(&self, site: SiteId, visible: bool) {
        if let Some(overlay) = self.overlays.write().get_mut(&site) {
            overlay.visible = visible;
        }
    }

    async fn rasterize(&self, rect: PixelRect) -> Result<RgbaImage> {
        let view = *self.view.read();
        Ok(self.compose(&view, rect))
    }
}

async fn fetch_tile(client: &Client, template: &str, key: TileKey) -> Result<RgbaImage> {
    let url = tile_url(template, key);
    let bytes = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("failed to request tile {url}"))?
        .error_for_status()?
        .bytes()
        .await?;
    let tile = image::load_from_memory(&bytes)
        .with_context(|| format!("failed to decode tile {url}"))?
        .to_rgba8();
    Ok(tile)
}

fn tile_url(template: &str, key: TileKey) -> String {
    template
        .replace("{s}", "a")
        .replace("{z}", &key.zoom.to_string())
        .replace("{x}", &key.x.to_string())
        .replace("{y}", &key.y.to_string())
}

/// Web Mercator world pixel of `point` at `zoom`.
fn world_pixel(point: GeoPoint, zoom: u8) -> PixelPoint {
    let scale = f64::from(TILE_SIZE) * f64::from(1_u32 << zoom);
    let lat = point.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    PixelPoint {
        x: (point.lng + 180.0) / 360.0 * scale,
        y: (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * scale,
    }
}

fn meters_per_pixel(lat: f64, zoom: u8) -> f64 {
    156_543.033_92 * lat.to_radians().cos() / f64::from(1_u32 << zoom)
}

/// Geodesic circle outline, `offset` being the canvas origin in world pixels.
fn draw_circle_outline(canvas: &mut RgbaImage, overlay: &Overlay, zoom: u8, offset: PixelPoint) {
    if !overlay.radius_m.is_finite() || overlay.radius_m <= 0.0 {
        return;
    }
    let mpp = meters_per_pixel(overlay.center.lat, zoom);
    let steps = ((2.0 * PI * overlay.radius_m / mpp).ceil() as usize).clamp(64, 20_000);
    let (width, height) = (i64::from(canvas.width()), i64::from(canvas.height()));
    for step in 0..steps {
        let bearing = step as f64 * 360.0 / steps as f64;
        for ring in 0..OUTLINE_WIDTH {
            let edge = destination(overlay.center, bearing, overlay.radius_m - f64::from(ring) * mpp);
            let world = world_pixel(edge, zoom);
            let x = (world.x - offset.x).round() as i64;
            let y = (world.y - offset.y).round() as i64;
            if (0..width).contains(&x) && (0..height).contains(&y) {
                canvas.put_pixel(x as u32, y as u32, OUTLINE);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{capture::geo::circle_bounds, domain::FlightRadius};

    fn surface() -> TileMapSurface {
        TileMapSurface::new(
            Client::new(),
            MapConfig {
                // Unroutable so prefetch fails fast and leaves placeholders.
                tile_url: "http://127.0.0.1:9/{z}/{x}/{y}.png".into(),
                viewport_width: 640,
                viewport_height: 480,
            },
            GeoPoint::new(51.1657, 10.4515),
            6,
        )
    }

    #[test]
    fn tile_url_substitutes_coordinates() {
        let url = tile_url(
            "https://{s}.tiles.example/{z}/{y}/{x}.jpg",
            TileKey {
                zoom: 12,
                x: 2140,
                y: 1390,
            },
        );
        assert_eq!(url, "https://a.tiles.example/12/1390/2140.jpg");
    }

    #[test]
    fn wrapped_viewport_lists_each_tile_once() {
        let surface = surface();
        let view = View {
            zoom: 1,
            center: PixelPoint { x: 256.0, y: 256.0 },
        };

        let keys = surface.visible_tiles(&view);

        assert_eq!(keys.len(), 4);
        let unique: HashSet<TileKey> = keys.iter().copied().collect();
        assert_eq!(unique.len(), keys.len());
    }

    #[test]
    fn tile_cache_evicts_oldest_first() {
        let mut cache = TileCache::new(2);
        let key = |x| TileKey { zoom: 3, x, y: 0 };
        for x in 0..3 {
            cache.insert(key(x), RgbaImage::new(1, 1));
        }
        cache.insert(key(2), RgbaImage::new(1, 1));

        assert!(!cache.contains(&key(0)));
        assert!(cache.contains(&key(1)) && cache.contains(&key(2)));
        assert_eq!(cache.order.len(), 2);
    }

    #[test]
    fn world_pixel_matches_known_tile() {
        let p = world_pixel(GeoPoint::new(0.0, 0.0), 1);
        assert!((p.x - 256.0).abs() < 1e-9);
        assert!((p.y - 256.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fitted_bounds_land_inside_the_viewport() {
        let surface = surface();
        let bounds = circle_bounds(GeoPoint::new(48.137, 11.575), 3_000.0);
        surface.fit_bounds(&bounds, 10).await.unwrap();

        let nw = surface.project(bounds.north_west());
        let se = surface.project(bounds.south_east());
        assert!(nw.x >= 10.0 - 1e-6 && nw.y >= 10.0 - 1e-6);
        assert!(se.x <= 630.0 + 1e-6 && se.y <= 470.0 + 1e-6);

        // One zoom level deeper must no longer fit.
        let zoom = surface.view.read().zoom;
        assert!(zoom < MAX_ZOOM);
        let nw_deeper = world_pixel(bounds.north_west(), zoom + 1);
        let se_deeper = world_pixel(bounds.south_east(), zoom + 1);
        assert!(se_deeper.x - nw_deeper.x > 620.0 || se_deeper.y - nw_deeper.y > 460.0);
    }

    #[tokio::test]
    async fn hidden_overlay_is_not_drawn() {
        let surface = surface();
        let site = Site {
            id: SiteId::generate(),
            position: GeoPoint::new(48.137, 11.575),
            radius: FlightRadius::OneKm,
        };
        surface.sync_overlays(std::slice::from_ref(&site));
        let bounds = circle_bounds(site.position, 1_000.0);
        surface.fit_bounds(&bounds, 10).await.unwrap();
        let rect = PixelRect::covering(
            surface.project(bounds.north_west()),
            surface.project(bounds.south_east()),
        )
        .unwrap();

        let drawn = surface.rasterize(rect).await.unwrap();
        assert!(drawn.pixels().any(|p| *p == OUTLINE));

        surface.set_overlay_visible(site.id, false);
        let clean = surface.rasterize(rect).await.unwrap();
        assert!(clean.pixels().all(|p| *p == PLACEHOLDER));
        assert_eq!((clean.width(), clean.height()), (rect.width, rect.height));
    }
}
