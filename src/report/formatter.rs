use std::fmt::{self, Write as _};

use once_cell::sync::Lazy;
use regex::Regex;

const BOLD: &str = "**";
const SCORE_MARKER: &str = "**Bewertung:";
const SCORE_LABEL: &str = "Bewertung:";
const DEFAULT_MAX_SCORE: i64 = 10;

const SOURCES_HEADING: &str = "Futterquellen";
const RISKS_HEADING: &str = "Risiken";
const SUMMARY_HEADING: &str = "Fazit";

const NO_FINDINGS: &str =
    "Analysis complete: no specific forage sources or risks were identified for this area.";

static LEADING_INT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?\d+").expect("valid leading integer regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Excellent,
    Good,
    NeedsImprovement,
    Unrated,
}

impl Rating {
    fn for_value(value: Option<i64>) -> Self {
        match value {
            Some(v) if v >= 8 => Self::Excellent,
            Some(v) if v >= 5 => Self::Good,
            Some(_) => Self::NeedsImprovement,
            None => Self::Unrated,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::NeedsImprovement => "needs improvement",
            Self::Unrated => "neutral",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Score {
    pub value: Option<i64>,
    pub max: i64,
    pub rating: Rating,
}

impl Score {
    fn parse(line: &str) -> Self {
        let text = line.replace('*', "");
        let text = text.replacen(SCORE_LABEL, "", 1);
        let mut parts = text.trim().splitn(2, '/');
        let value = parts.next().and_then(leading_int);
        let max = parts
            .next()
            .and_then(leading_int)
            .unwrap_or(DEFAULT_MAX_SCORE);
        Self {
            value,
            max,
            rating: Rating::for_value(value),
        }
    }

    pub fn display(&self) -> String {
        self.value
            .map(|value| value.to_string())
            .unwrap_or_else(|| "?".to_string())
    }
}

fn leading_int(text: &str) -> Option<i64> {
    LEADING_INT
        .find(text.trim())
        .and_then(|m| m.as_str().parse().ok())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading(String),
    List(Vec<String>),
    Paragraph(String),
    Score(Score),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub raw: String,
    pub blocks: Vec<Block>,
    pub sources: Vec<String>,
    pub risks: Vec<String>,
    pub summary: Option<String>,
    pub score: Option<Score>,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.raw.trim().is_empty()
    }

    pub fn render(&self) -> String {
        if self.is_empty() {
            return NO_FINDINGS.to_string();
        }
        if self.blocks.is_empty() {
            return self.raw.clone();
        }

        let mut out = String::new();
        for block in &self.blocks {
            match block {
                Block::Heading(title) => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    let _ = writeln!(out, "{title}");
                    let _ = writeln!(out, "{}", "-".repeat(title.chars().count().max(3)));
                }
                Block::List(items) => {
                    for item in items {
                        let _ = writeln!(out, "  • {item}");
                    }
                }
                Block::Paragraph(text) => {
                    let _ = writeln!(out, "{text}");
                }
                Block::Score(score) => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    let _ = writeln!(
                        out,
                        "Bewertung: {} / {} ({})",
                        score.display(),
                        score.max,
                        score.rating
                    );
                }
            }
        }
        out
    }
}

enum LineState {
    None,
    InList(Vec<String>),
}

struct Parser {
    state: LineState,
    blocks: Vec<Block>,
}

impl Parser {
    fn flush(&mut self) {
        if let LineState::InList(items) = std::mem::replace(&mut self.state, LineState::None) {
            self.blocks.push(Block::List(items));
        }
    }

    fn feed(&mut self, line: &str) {
        let line = line.trim();

        if let Some(title) = heading_text(line) {
            self.flush();
            self.blocks.push(Block::Heading(title));
        } else if line.starts_with(SCORE_MARKER) {
            self.flush();
            self.blocks.push(Block::Score(Score::parse(line)));
        } else if let Some(item) = line.strip_prefix("* ").or_else(|| line.strip_prefix("- ")) {
            let item = item.trim().to_string();
            match &mut self.state {
                LineState::InList(items) => items.push(item),
                LineState::None => self.state = LineState::InList(vec![item]),
            }
        } else if line.is_empty() {
            self.flush();
        } else {
            self.flush();
            self.blocks.push(Block::Paragraph(line.to_string()));
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush();
        self.blocks
    }
}

/// `**Title:**` style lines, excluding the score line.
fn heading_text(line: &str) -> Option<String> {
    if line.len() < 2 * BOLD.len() || line.contains(SCORE_LABEL) {
        return None;
    }
    let inner = line.strip_prefix(BOLD)?.strip_suffix(BOLD)?;
    let title = inner.replace(BOLD, "");
    let title = title.trim().trim_end_matches(':').trim_end();
    (!title.is_empty()).then(|| title.to_string())
}

pub fn format(raw: &str) -> Report {
    let mut parser = Parser {
        state: LineState::None,
        blocks: Vec::new(),
    };
    for line in raw.lines() {
        parser.feed(line);
    }
    let blocks = parser.finish();

    let sources = section(&blocks, SOURCES_HEADING)
        .flat_map(list_items)
        .collect();
    let risks = section(&blocks, RISKS_HEADING).flat_map(list_items).collect();
    let summary = {
        let parts: Vec<&str> = section(&blocks, SUMMARY_HEADING)
            .flat_map(|block| match block {
                Block::List(items) => items.iter().map(String::as_str).collect(),
                Block::Paragraph(text) => vec![text.as_str()],
                _ => Vec::new(),
            })
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    };
    let score = blocks.iter().find_map(|block| match block {
        Block::Score(score) => Some(score.clone()),
        _ => None,
    });

    Report {
        raw: raw.to_string(),
        blocks,
        sources,
        risks,
        summary,
        score,
    }
}

/// Blocks after the first heading containing `name`, up to the next heading.
fn section<'a>(blocks: &'a [Block], name: &str) -> impl Iterator<Item = &'a Block> + 'a {
    let start = blocks
        .iter()
        .position(|block| matches!(block, Block::Heading(title) if title.contains(name)))
        .map(|index| index + 1)
        .unwrap_or(blocks.len());
    blocks[start..]
        .iter()
        .take_while(|block| !matches!(block, Block::Heading(_)))
}

fn list_items(block: &Block) -> Vec<String> {
    match block {
        Block::List(items) => items.clone(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_headings_lists_and_score() {
        let report = format("**Futterquellen:**\n* A\n* B\n**Bewertung:** 8/10");

        assert_eq!(
            report.blocks,
            vec![
                Block::Heading("Futterquellen".into()),
                Block::List(vec!["A".into(), "B".into()]),
                Block::Score(Score {
                    value: Some(8),
                    max: 10,
                    rating: Rating::Excellent,
                }),
            ]
        );
        assert_eq!(report.sources, vec!["A", "B"]);
        assert_eq!(report.score.unwrap().rating.label(), "excellent");
    }

    #[test]
    fn derives_sections_from_a_full_answer() {
        let raw = "\
**Futterquellen:**
* Raps im Nordosten (März–Mai)
- Linden entlang der Straße

**Risiken:**
* Maisfelder mit möglichem Pestizideinsatz
**Fazit:**
Guter Standort für das Frühjahr.
* Sommerlücke einplanen
**Bewertung:** 6/10";
        let report = format(raw);

        assert_eq!(report.sources.len(), 2);
        assert_eq!(report.sources[1], "Linden entlang der Straße");
        assert_eq!(report.risks, vec!["Maisfelder mit möglichem Pestizideinsatz"]);
        assert_eq!(
            report.summary.as_deref(),
            Some("Guter Standort für das Frühjahr. Sommerlücke einplanen")
        );
        assert_eq!(report.score.unwrap().rating, Rating::Good);
    }

    #[test]
    fn lists_are_flushed_by_paragraphs_and_blank_lines() {
        let report = format("* a\n\n* b\ntext\n* c");
        assert_eq!(
            report.blocks,
            vec![
                Block::List(vec!["a".into()]),
                Block::List(vec!["b".into()]),
                Block::Paragraph("text".into()),
                Block::List(vec!["c".into()]),
            ]
        );
    }

    #[test]
    fn low_scores_need_improvement_and_missing_max_defaults() {
        let score = format("  **Bewertung:** 3  ").score.unwrap();
        assert_eq!(score.value, Some(3));
        assert_eq!(score.max, 10);
        assert_eq!(score.rating, Rating::NeedsImprovement);
    }

    #[test]
    fn non_numeric_score_gets_a_placeholder() {
        let score = format("**Bewertung:** n/a").score.unwrap();
        assert_eq!(score.value, None);
        assert_eq!(score.display(), "?");
        assert_eq!(score.rating, Rating::Unrated);
        assert!(format("**Bewertung:** n/a").render().contains("? / 10 (neutral)"));
    }

    #[test]
    fn odd_input_never_breaks_parsing() {
        let empty = format("");
        assert!(empty.blocks.is_empty());
        assert!(empty.is_empty());
        assert_eq!(empty.render(), NO_FINDINGS);

        let unmatched = format("**Futterquellen\n**\n****\nfoo**");
        assert_eq!(
            unmatched.blocks,
            vec![
                Block::Paragraph("**Futterquellen".into()),
                Block::Paragraph("**".into()),
                Block::Paragraph("****".into()),
                Block::Paragraph("foo**".into()),
            ]
        );
        assert!(unmatched.score.is_none());
        assert!(unmatched.sources.is_empty());
    }

    #[test]
    fn render_keeps_every_block() {
        let text = format("**Risiken:**\n* Straße\nEnde").render();
        assert!(text.starts_with("Risiken\n-------\n"));
        assert!(text.contains("  • Straße\n"));
        assert!(text.ends_with("Ende\n"));
    }
}
