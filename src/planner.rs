use std::{path::PathBuf, str::FromStr};

use crate::{
    analysis::{AnalysisOutcome, OperationHandle},
    cli::{parse_latitude, parse_longitude, parse_radius},
    domain::{FlightRadius, GeoPoint, SiteId},
    report,
    session::ScoutSession,
};

pub const HELP: &str = "\
Commands:
  add <lat> <lng>        place a site (at most three)
  remove <n>             remove site n
  select <n>|none        select site n or clear the selection
  radius <n> <meters>    set the foraging radius of site n (1000, 2000, 3000)
  analyze [n]            analyse site n, or the selected site
  close                  cancel the running analysis
  list                   show the planned sites
  save                   export the last analysis
  help                   show this text
  quit                   leave the planner";

#[derive(Debug, Clone, PartialEq)]
pub enum PlanCommand {
    Add(GeoPoint),
    Remove(usize),
    Select(Option<usize>),
    Radius(usize, FlightRadius),
    Analyze(Option<usize>),
    Close,
    List,
    Save,
    Help,
    Quit,
}

impl FromStr for PlanCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or("");
        let parsed = match command {
            "add" => {
                let (Some(lat), Some(lng)) = (parts.next(), parts.next()) else {
                    return Err("usage: add <lat> <lng>".into());
                };
                Self::Add(GeoPoint::new(parse_latitude(lat)?, parse_longitude(lng)?))
            }
            "remove" => Self::Remove(site_number(parts.next(), "remove <n>")?),
            "select" => match parts.next() {
                Some("none") => Self::Select(None),
                other => Self::Select(Some(site_number(other, "select <n>|none")?)),
            },
            "radius" => {
                let index = site_number(parts.next(), "radius <n> <meters>")?;
                let meters = parts
                    .next()
                    .ok_or_else(|| "usage: radius <n> <meters>".to_string())?;
                let radius = FlightRadius::from_meters(parse_radius(meters)?).unwrap_or_default();
                Self::Radius(index, radius)
            }
            "analyze" => match parts.next() {
                Some(raw) => Self::Analyze(Some(site_number(Some(raw), "analyze [n]")?)),
                None => Self::Analyze(None),
            },
            "close" => Self::Close,
            "list" => Self::List,
            "save" => Self::Save,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "" => return Err("empty command, type `help`".into()),
            other => return Err(format!("unknown command `{other}`, type `help`")),
        };
        if parts.next().is_some() {
            return Err(format!("too many arguments for `{command}`"));
        }
        Ok(parsed)
    }
}

fn site_number(raw: Option<&str>, usage: &str) -> Result<usize, String> {
    let raw = raw.ok_or_else(|| format!("usage: {usage}"))?;
    match raw.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(format!("`{raw}` is not a site number")),
    }
}

#[derive(Debug, PartialEq)]
pub enum Flow {
    Continue(String),
    Quit,
}

/// Interactive driver for one session. Sites are addressed by their
/// 1-based position in the list.
pub struct Planner {
    session: ScoutSession,
    export_dir: PathBuf,
    running: Option<OperationHandle>,
}

impl Planner {
    pub fn new(session: ScoutSession, export_dir: PathBuf) -> Self {
        Self {
            session,
            export_dir,
            running: None,
        }
    }

    pub fn session(&self) -> &ScoutSession {
        &self.session
    }

    pub async fn handle(&mut self, command: PlanCommand) -> Flow {
        let reply = match command {
            PlanCommand::Add(position) => self
                .session
                .add_site(position)
                .map(|_| format!("site {} placed", self.session.sites().len()))
                .map_err(|err| err.to_string()),
            PlanCommand::Remove(n) => self.site_id(n).and_then(|id| {
                self.session
                    .remove_site(id)
                    .map(|_| format!("site {n} removed"))
                    .map_err(|err| err.to_string())
            }),
            PlanCommand::Select(None) => self
                .session
                .select(None)
                .map(|_| "selection cleared".to_string())
                .map_err(|err| err.to_string()),
            PlanCommand::Select(Some(n)) => self.site_id(n).and_then(|id| {
                self.session
                    .select(Some(id))
                    .map(|_| format!("site {n} selected"))
                    .map_err(|err| err.to_string())
            }),
            PlanCommand::Radius(n, radius) => self.site_id(n).and_then(|id| {
                self.session
                    .set_radius(id, radius)
                    .map(|_| format!("site {n} now uses a {radius} radius"))
                    .map_err(|err| err.to_string())
            }),
            PlanCommand::Analyze(target) => self.analyze(target),
            PlanCommand::Close => {
                if self.session.controller().is_busy() {
                    self.session.close_analysis();
                    Ok("analysis closed".to_string())
                } else {
                    Ok("no analysis is running".to_string())
                }
            }
            PlanCommand::List => Ok(self.describe()),
            PlanCommand::Save => self.save().await,
            PlanCommand::Help => Ok(HELP.to_string()),
            PlanCommand::Quit => return Flow::Quit,
        };
        Flow::Continue(reply.unwrap_or_else(|message| format!("error: {message}")))
    }

    /// Cancels whatever is still running and waits for it to stop.
    pub async fn close(&mut self) {
        self.session.close_analysis();
        if let Some(handle) = self.running.take() {
            handle.finished().await;
        }
    }

    fn site_id(&self, n: usize) -> Result<SiteId, String> {
        n.checked_sub(1)
            .and_then(|index| self.session.sites().get(index))
            .map(|site| site.id)
            .ok_or_else(|| format!("there is no site {n}"))
    }

    fn analyze(&mut self, target: Option<usize>) -> Result<String, String> {
        let handle = match target {
            Some(n) => {
                let id = self.site_id(n)?;
                self.session.analyze(id)
            }
            None => self
                .session
                .analyze_selected()
                .ok_or_else(|| "no site is selected".to_string())?,
        };
        let token = handle.token;
        // The superseded attempt stops on its own; only the newest is tracked.
        self.running = Some(handle);
        Ok(format!("analysis {token} started"))
    }

    fn describe(&self) -> String {
        let sites = self.session.sites();
        if sites.is_empty() {
            return "no sites planned".to_string();
        }
        let selected = self.session.selected().map(|site| site.id);
        let analysed = self.session.controller().snapshot().site;
        let busy = self.session.controller().is_busy();
        sites
            .iter()
            .enumerate()
            .map(|(i, site)| {
                let marker = if Some(site.id) == selected { '*' } else { ' ' };
                let status = if busy && Some(site.id) == analysed {
                    " [analysing]"
                } else {
                    ""
                };
                format!(
                    "{marker}{}. {:.4}, {:.4} ({}){status}",
                    i + 1,
                    site.position.lat,
                    site.position.lng,
                    site.radius
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn save(&self) -> Result<String, String> {
        let snapshot = self.session.controller().snapshot();
        let AnalysisOutcome::Report(report) = snapshot.outcome else {
            return Err("there is no finished analysis to save".into());
        };
        let site = snapshot
            .site
            .and_then(|id| self.session.sites().iter().find(|site| site.id == id))
            .ok_or_else(|| "the analysed site has been removed".to_string())?;
        let path = report::save_report(&self.export_dir, site, &report)
            .await
            .map_err(|err| format!("{err:#}"))?;
        Ok(format!("saved {}", path.display()))
    }
}
