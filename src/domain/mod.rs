pub mod site;
pub mod types;

pub use site::{FlightRadius, Site, SiteError, SiteId, SiteRegistry};
pub use types::{AnalyzeRequest, AnalyzeResponse, ErrorBody, ForageSubmission, GeoPoint};
