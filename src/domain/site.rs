use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::types::GeoPoint;

pub const MAX_SITES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId(Uuid);

impl SiteId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlightRadius {
    OneKm,
    TwoKm,
    #[default]
    ThreeKm,
}

impl FlightRadius {
    pub const ALL: [FlightRadius; 3] = [Self::OneKm, Self::TwoKm, Self::ThreeKm];

    pub fn meters(self) -> u32 {
        match self {
            Self::OneKm => 1_000,
            Self::TwoKm => 2_000,
            Self::ThreeKm => 3_000,
        }
    }

    pub fn from_meters(meters: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|radius| radius.meters() == meters)
    }
}

impl fmt::Display for FlightRadius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} km", self.meters() / 1_000)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub id: SiteId,
    pub position: GeoPoint,
    pub radius: FlightRadius,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SiteError {
    #[error("at most {} sites can be planned at the same time", MAX_SITES)]
    LimitReached,
    #[error("site {0} does not exist")]
    Unknown(SiteId),
}

#[derive(Debug, Default)]
pub struct SiteRegistry {
    sites: Vec<Site>,
    selected: Option<SiteId>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a new site with the default radius and selects it.
    pub fn add(&mut self, position: GeoPoint) -> Result<&Site, SiteError> {
        if self.is_full() {
            return Err(SiteError::LimitReached);
        }
        let site = Site {
            id: SiteId::generate(),
            position,
            radius: FlightRadius::default(),
        };
        self.selected = Some(site.id);
        tracing::debug!(
            target: "sites",
            site = %site.id,
            lat = position.lat,
            lng = position.lng,
            "site added"
        );
        self.sites.push(site);
        Ok(&self.sites[self.sites.len() - 1])
    }

    pub fn remove(&mut self, id: SiteId) -> Result<Site, SiteError> {
        let index = self
            .sites
            .iter()
            .position(|site| site.id == id)
            .ok_or(SiteError::Unknown(id))?;
        if self.selected == Some(id) {
            self.selected = None;
        }
        Ok(self.sites.remove(index))
    }

    pub fn set_radius(&mut self, id: SiteId, radius: FlightRadius) -> Result<(), SiteError> {
        let site = self
            .sites
            .iter_mut()
            .find(|site| site.id == id)
            .ok_or(SiteError::Unknown(id))?;
        site.radius = radius;
        Ok(())
    }

    pub fn select(&mut self, id: Option<SiteId>) -> Result<(), SiteError> {
        if let Some(id) = id {
            if self.get(id).is_none() {
                return Err(SiteError::Unknown(id));
            }
        }
        self.selected = id;
        Ok(())
    }

    pub fn selected(&self) -> Option<&Site> {
        self.selected.and_then(|id| self.get(id))
    }

    pub fn get(&self, id: SiteId) -> Option<&Site> {
        self.sites.iter().find(|site| site.id == id)
    }

    pub fn list(&self) -> &[Site] {
        &self.sites
    }

    pub fn is_full(&self) -> bool {
        self.sites.len() >= MAX_SITES
    }
}
