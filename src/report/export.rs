use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::domain::Site;

use super::Report;

pub fn export_filename(site: &Site) -> String {
    format!(
        "Analyse-Bienenstock-{:.2}_{:.2}.txt",
        site.position.lat, site.position.lng
    )
}

/// Writes the raw analysis text next to earlier exports and returns its path.
pub async fn save_report(export_dir: &Path, site: &Site, report: &Report) -> Result<PathBuf> {
    if report.is_empty() {
        bail!("an empty analysis cannot be exported");
    }
    tokio::fs::create_dir_all(export_dir)
        .await
        .with_context(|| format!("failed to create export directory {}", export_dir.display()))?;

    let path = export_dir.join(export_filename(site));
    tokio::fs::write(&path, report.raw.as_bytes())
        .await
        .with_context(|| format!("failed to write report to {}", path.display()))?;

    tracing::info!(target: "export", path = %path.display(), site = %site.id, "report saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{FlightRadius, GeoPoint, SiteId},
        report::format,
    };

    fn site(lat: f64, lng: f64) -> Site {
        Site {
            id: SiteId::generate(),
            position: GeoPoint::new(lat, lng),
            radius: FlightRadius::default(),
        }
    }

    #[test]
    fn filename_rounds_coordinates() {
        assert_eq!(
            export_filename(&site(52.52437, -13.41053)),
            "Analyse-Bienenstock-52.52_-13.41.txt"
        );
    }

    #[tokio::test]
    async fn writes_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("exports");
        let raw = "**Fazit:**\n* Gut geeignet\n**Bewertung:** 8/10";

        let path = save_report(&target, &site(48.0, 11.0), &format(raw))
            .await
            .unwrap();

        assert_eq!(path.file_name().unwrap(), "Analyse-Bienenstock-48.00_11.00.txt");
        assert_eq!(std::fs::read_to_string(path).unwrap(), raw);
    }

    #[tokio::test]
    async fn refuses_empty_reports() {
        let dir = tempfile::tempdir().unwrap();
        let result = save_report(dir.path(), &site(1.0, 2.0), &format("  \n")).await;
        assert!(result.is_err());
    }
}
