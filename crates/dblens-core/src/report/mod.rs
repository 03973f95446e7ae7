//! Analysis report: the machine-readable JSON contract and the terminal
//! text rendering.

use chrono::{DateTime, SecondsFormat, Utc};
use crossterm::style::{Color, Stylize, style};
use serde::Serialize;
use std::io::{self, Write};

use crate::analysis::{Category, Finding, Severity};
use crate::connector::Backend;

pub const DBLENS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Finding counts per severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
    pub ok: usize,
}

impl Summary {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Summary::default();
        for f in findings {
            *summary.slot(f.severity) += 1;
        }
        summary
    }

    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::Warning => self.warning,
            Severity::Info => self.info,
            Severity::Ok => self.ok,
        }
    }

    fn slot(&mut self, severity: Severity) -> &mut usize {
        match severity {
            Severity::Critical => &mut self.critical,
            Severity::Warning => &mut self.warning,
            Severity::Info => &mut self.info,
            Severity::Ok => &mut self.ok,
        }
    }
}

/// How severity labels are drawn in the text report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextStyle {
    #[default]
    Plain,
    /// ANSI colors plus a severity icon. Only for terminals.
    Colored,
}

impl TextStyle {
    fn severity(self, severity: Severity, label: &str) -> String {
        match self {
            TextStyle::Plain => label.to_string(),
            TextStyle::Colored => style(label)
                .with(severity_color(severity))
                .bold()
                .to_string(),
        }
    }

    fn heading(self, label: &str) -> String {
        let text = format!("── {label} ──");
        match self {
            TextStyle::Plain => text,
            TextStyle::Colored => style(text).bold().to_string(),
        }
    }
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Critical => Color::Red,
        Severity::Warning => Color::Yellow,
        Severity::Info => Color::Cyan,
        Severity::Ok => Color::Green,
    }
}

fn severity_icon(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔴",
        Severity::Warning => "🟡",
        Severity::Info => "🔵",
        Severity::Ok => "🟢",
    }
}

/// One analysis run, ready for output.
#[derive(Clone, Debug, Serialize)]
pub struct AnalysisReport {
    pub dblens_version: &'static str,
    pub db_type: Backend,
    pub target: String,
    /// RFC 3339, UTC, `Z` suffix.
    pub analyzed_at: String,
    pub findings: Vec<Finding>,
    pub summary: Summary,
    #[serde(skip)]
    timestamp: DateTime<Utc>,
}

impl AnalysisReport {
    pub fn new(db_type: Backend, target: impl Into<String>, findings: Vec<Finding>) -> Self {
        Self::at(db_type, target, findings, Utc::now())
    }

    pub fn at(
        db_type: Backend,
        target: impl Into<String>,
        findings: Vec<Finding>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            dblens_version: DBLENS_VERSION,
            db_type,
            target: target.into(),
            analyzed_at: timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            summary: Summary::from_findings(&findings),
            findings,
            timestamp,
        }
    }

    pub fn to_json(&self, pretty: bool) -> serde_json::Result<String> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }

    /// Writes the human-readable report.
    pub fn render_text(&self, out: &mut impl Write, text_style: TextStyle) -> io::Result<()> {
        self.render_header(out)?;
        self.render_summary(out, text_style)?;
        self.render_findings(out, text_style)
    }

    fn render_header(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(
            out,
            "DBLens  ·  {}  ·  {}",
            self.db_type.as_str().to_uppercase(),
            self.target
        )?;
        writeln!(
            out,
            "Analyzed at {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(out)
    }

    fn render_summary(&self, out: &mut impl Write, text_style: TextStyle) -> io::Result<()> {
        writeln!(out, "Summary")?;
        for severity in Severity::ALL {
            let count = self.summary.count(severity);
            if count > 0 {
                // Pad before styling so escape codes do not count as width.
                let label = format!("{:<9}", severity.as_str());
                writeln!(out, "  {} {count}", text_style.severity(severity, &label))?;
            }
        }
        writeln!(out)
    }

    fn render_findings(&self, out: &mut impl Write, text_style: TextStyle) -> io::Result<()> {
        if self.findings.is_empty() {
            return writeln!(out, "No issues found!");
        }

        for (category, items) in group_by_category(&self.findings) {
            writeln!(out, "{}", text_style.heading(category.label()))?;
            for f in items {
                let label = text_style.severity(f.severity, &format!("[{}]", f.severity));
                match text_style {
                    TextStyle::Plain => writeln!(out, "  {label} {}", f.title)?,
                    TextStyle::Colored => {
                        writeln!(out, "  {} {label} {}", severity_icon(f.severity), f.title)?
                    }
                }
                if !f.detail.is_empty() {
                    writeln!(out, "      {}", f.detail)?;
                }
                if !f.recommendation.is_empty() {
                    writeln!(out, "      → {}", f.recommendation)?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

/// Groups findings by category, categories in first-appearance order.
fn group_by_category(findings: &[Finding]) -> Vec<(Category, Vec<&Finding>)> {
    let mut groups: Vec<(Category, Vec<&Finding>)> = Vec::new();
    for f in findings {
        match groups.iter_mut().find(|(c, _)| *c == f.category) {
            Some((_, items)) => items.push(f),
            None => groups.push((f.category, vec![f])),
        }
    }
    groups
}
