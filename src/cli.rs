use clap::{Args, Parser, Subcommand};

use crate::domain::FlightRadius;

/// Forage suitability scouting for apiary sites.
#[derive(Debug, Parser)]
#[command(name = "forage-scout", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the analysis proxy in front of the generative model.
    Serve,
    /// Capture the area around one site and print its forage analysis.
    Analyze(AnalyzeArgs),
    /// Plan up to three sites interactively and analyse them one by one.
    Plan,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Latitude of the site in degrees.
    #[arg(long, allow_hyphen_values = true, value_parser = parse_latitude)]
    pub lat: f64,
    /// Longitude of the site in degrees.
    #[arg(long, allow_hyphen_values = true, value_parser = parse_longitude)]
    pub lng: f64,
    /// Foraging radius in meters (1000, 2000 or 3000).
    #[arg(long, value_name = "METERS", default_value_t = 3_000, value_parser = parse_radius)]
    pub radius: u32,
    /// Write the raw analysis text to the export directory.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub save: bool,
}

impl AnalyzeArgs {
    pub fn flight_radius(&self) -> FlightRadius {
        FlightRadius::from_meters(self.radius).unwrap_or_default()
    }
}

pub(crate) fn parse_latitude(raw: &str) -> Result<f64, String> {
    parse_degrees(raw, 90.0)
}

pub(crate) fn parse_longitude(raw: &str) -> Result<f64, String> {
    parse_degrees(raw, 180.0)
}

fn parse_degrees(raw: &str, limit: f64) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("`{raw}` is not a number"))?;
    if !value.is_finite() || value.abs() > limit {
        return Err(format!("must be between -{limit} and {limit}"));
    }
    Ok(value)
}

pub(crate) fn parse_radius(raw: &str) -> Result<u32, String> {
    let meters: u32 = raw
        .trim()
        .parse()
        .map_err(|_| format!("`{raw}` is not a whole number of meters"))?;
    FlightRadius::from_meters(meters)
        .map(FlightRadius::meters)
        .ok_or_else(|| {
            let allowed: Vec<String> = FlightRadius::ALL
                .iter()
                .map(|radius| radius.meters().to_string())
                .collect();
            format!("radius must be one of {}", allowed.join(", "))
        })
}
