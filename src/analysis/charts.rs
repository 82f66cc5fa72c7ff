//! Terminal Charts
//!
//! Renders the insight datasets as bar charts and gauges into a ratatui
//! `Buffer`, then flattens the buffer to plain text so the same output can
//! go to a terminal, a log file or a test assertion. Every dataset can also
//! be exported as CSV or JSON for external plotting.

use crate::analysis::export::{write_csv, write_json};
use crate::analysis::insights::{Gauge, InsightsReport, LabelValue};
use anyhow::Result;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::Span,
    widgets::{Block, Borders, Gauge as GaugeWidget, Widget},
};
use std::path::{Path, PathBuf};
use tracing::info;

pub const ACCENT_CYAN: Color = Color::Rgb(0, 255, 255);
pub const ACCENT_GREEN: Color = Color::Rgb(0, 255, 136);
pub const ACCENT_RED: Color = Color::Rgb(255, 68, 68);
pub const ACCENT_YELLOW: Color = Color::Rgb(255, 204, 0);
pub const TEXT_DIM: Color = Color::Rgb(128, 128, 128);
pub const BORDER_DIM: Color = Color::Rgb(48, 48, 48);

const MAX_LABEL_WIDTH: usize = 24;
pub const DEFAULT_WIDTH: u16 = 80;

fn display_width(text: &str) -> usize {
    Span::raw(text).width()
}

/// Horizontal bar chart, one row per label.
pub struct HorizontalBars<'a> {
    title: &'a str,
    data: &'a [LabelValue],
    unit: &'a str,
    color: Color,
}

impl<'a> HorizontalBars<'a> {
    pub fn new(title: &'a str, data: &'a [LabelValue]) -> Self {
        Self { title, data, unit: "", color: ACCENT_CYAN }
    }

    pub fn unit(mut self, unit: &'a str) -> Self {
        self.unit = unit;
        self
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    /// Rows needed to show every bar inside the border.
    pub fn height(&self) -> u16 {
        self.data.len().max(1) as u16 + 2
    }
}

impl<'a> Widget for HorizontalBars<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title(format!(" {} ", self.title))
            .title_style(Style::default().fg(ACCENT_CYAN).add_modifier(Modifier::BOLD))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(BORDER_DIM));
        let inner = block.inner(area);
        block.render(area, buf);

        if self.data.is_empty() {
            buf.set_string(inner.x, inner.y, "(no data)", Style::default().fg(TEXT_DIM));
            return;
        }

        let label_width = self
            .data
            .iter()
            .map(|d| display_width(&d.label))
            .max()
            .unwrap_or(0)
            .min(MAX_LABEL_WIDTH) as u16;
        let values: Vec<String> = self.data.iter().map(|d| format!("{:.1}{}", d.value, self.unit)).collect();
        let value_width = values.iter().map(|v| display_width(v)).max().unwrap_or(0) as u16;
        let bar_space = inner.width.saturating_sub(label_width + value_width + 2);
        let max_value = self.data.iter().map(|d| d.value.abs()).fold(0.0, f64::max);

        for (i, (item, value)) in self.data.iter().zip(&values).enumerate() {
            let y = inner.y + i as u16;
            if y >= inner.y + inner.height {
                break;
            }
            buf.set_stringn(inner.x, y, &item.label, label_width as usize, Style::default());

            let len = if max_value > 0.0 {
                ((item.value.abs() / max_value) * bar_space as f64).round() as u16
            } else {
                0
            };
            let bar_x = inner.x + label_width + 1;
            for dx in 0..len {
                buf.get_mut(bar_x + dx, y).set_char('█').set_fg(self.color);
            }
            buf.set_string(bar_x + len + 1, y, value, Style::default().fg(TEXT_DIM));
        }
    }
}

/// Flatten a rendered buffer into text lines, trimming trailing blanks.
pub fn buffer_to_text(buf: &Buffer) -> String {
    let area = buf.area;
    let mut lines = Vec::with_capacity(area.height as usize);
    for y in area.y..area.y + area.height {
        let mut line = String::new();
        let mut skip = 0usize;
        for x in area.x..area.x + area.width {
            if skip > 0 {
                skip -= 1;
                continue;
            }
            let symbol = buf.get(x, y).symbol();
            line.push_str(symbol);
            skip = display_width(symbol).saturating_sub(1);
        }
        lines.push(line.trim_end().to_string());
    }
    lines.join("\n")
}

pub fn render_to_text<W: Widget>(widget: W, width: u16, height: u16) -> String {
    let area = Rect::new(0, 0, width, height);
    let mut buf = Buffer::empty(area);
    widget.render(area, &mut buf);
    buffer_to_text(&buf)
}

pub fn render_bar_chart(title: &str, data: &[LabelValue], width: u16) -> String {
    let chart = HorizontalBars::new(title, data);
    let height = chart.height();
    render_to_text(chart, width, height)
}

pub fn render_gauge(gauge: &Gauge, width: u16) -> String {
    let ratio = if gauge.max > 0.0 { (gauge.value / gauge.max).clamp(0.0, 1.0) } else { 0.0 };
    let color = match ratio {
        r if r >= 0.8 => ACCENT_RED,
        r if r >= 0.5 => ACCENT_YELLOW,
        _ => ACCENT_GREEN,
    };
    let widget = GaugeWidget::default()
        .block(Block::default().title(format!(" {} ", gauge.label)).borders(Borders::ALL))
        .gauge_style(Style::default().fg(color))
        .ratio(ratio)
        .label(format!("{:.0} / {:.0}", gauge.value, gauge.max));
    render_to_text(widget, width, 3)
}

/// Every label/value dataset behind the dashboard, keyed by file stem.
pub fn chart_datasets(report: &InsightsReport) -> Vec<(&'static str, Vec<LabelValue>)> {
    let d = &report.dashboard;
    let seasonal = report
        .speed
        .seasonal_trends
        .iter()
        .map(|s| LabelValue { label: s.season.clone(), value: s.avg_absorption_rate })
        .collect();
    let hotspots = report
        .hotspots
        .ranked
        .iter()
        .take(10)
        .map(|h| LabelValue { label: format!("{}{}", h.county, h.district), value: h.net_rate })
        .collect();
    let competition = {
        let mut rows: Vec<LabelValue> = report
            .efficiency
            .city_competition
            .iter()
            .map(|c| LabelValue { label: format!("{} {}", c.name, c.season), value: c.advantage })
            .collect();
        rows.sort_by(|a, b| b.value.total_cmp(&a.value));
        rows.truncate(8);
        rows
    };

    vec![
        ("county_risk_distribution", d.county_risk_distribution.clone()),
        ("cancellation_trend", d.cancellation_trend.clone()),
        ("stagnant_counties", d.stagnant_counties.clone()),
        ("risk_concentration", d.risk_concentration.clone()),
        ("high_risk_districts", d.high_risk_districts.clone()),
        ("top_cities", report.hotspots.top_cities.clone()),
        ("top_districts", hotspots),
        ("seasonal_absorption", seasonal),
        ("city_competitive_advantage", competition),
    ]
}

fn chart_title(name: &str) -> &'static str {
    match name {
        "county_risk_distribution" => "縣市風險等級分布",
        "cancellation_trend" => "解約率趨勢 (%)",
        "stagnant_counties" => "長期滯銷建案占比 (%)",
        "risk_concentration" => "風險集中度",
        "high_risk_districts" => "高風險區域排名 (%)",
        "top_cities" => "縣市去化表現排名 (%)",
        "top_districts" => "熱點行政區 (%)",
        "seasonal_absorption" => "季度平均去化率 (%)",
        "city_competitive_advantage" => "競爭力指數",
        _ => "資料集",
    }
}

/// The whole dashboard as text: gauges first, then every bar chart.
pub fn render_dashboard(report: &InsightsReport, width: u16) -> String {
    let mut sections = vec![
        render_gauge(&report.dashboard.risk_gauge, width),
        render_gauge(&report.dashboard.health_gauge, width),
    ];
    for (name, data) in chart_datasets(report) {
        sections.push(render_bar_chart(chart_title(name), &data, width));
    }
    sections.join("\n")
}

/// Write every dataset under `dir`. Bar datasets become CSV, structured
/// ones JSON. Returns the written paths.
pub fn export_datasets(dir: &Path, report: &InsightsReport) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    for (name, data) in chart_datasets(report) {
        let path = dir.join(format!("{}.csv", name));
        write_csv(&path, &data)?;
        written.push(path);
    }

    let path = dir.join("absorption_vs_cancellation.csv");
    write_csv(&path, &report.dashboard.absorption_vs_cancellation)?;
    written.push(path);

    let json: [(&str, serde_json::Value); 4] = [
        ("risk_matrix", serde_json::to_value(&report.dashboard.risk_matrix)?),
        (
            "gauges",
            serde_json::to_value([&report.dashboard.risk_gauge, &report.dashboard.health_gauge])?,
        ),
        ("three_level_comparison", serde_json::to_value(&report.three_level)?),
        ("hotspots", serde_json::to_value(&report.hotspots)?),
    ];
    for (name, value) in json {
        let path = dir.join(format!("{}.json", name));
        write_json(&path, &value)?;
        written.push(path);
    }

    info!(dir = %dir.display(), files = written.len(), "Exported chart datasets");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> Vec<LabelValue> {
        vec![
            LabelValue { label: "台北市".to_string(), value: 80.0 },
            LabelValue { label: "新北市".to_string(), value: 40.0 },
            LabelValue { label: "桃園市".to_string(), value: 0.0 },
        ]
    }

    #[test]
    fn test_bars_scale_to_max() {
        let text = render_bar_chart("去化率", &data(), 40);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("去化率"));

        let bars = |line: &str| line.chars().filter(|c| *c == '█').count();
        assert!(lines[1].starts_with("│台北市"));
        assert_eq!(bars(lines[1]), 2 * bars(lines[2]));
        assert_eq!(bars(lines[3]), 0);
        assert!(lines[1].contains("80.0"));
    }

    #[test]
    fn test_empty_chart() {
        let text = render_bar_chart("空", &[], 30);
        assert!(text.contains("(no data)"));
    }

    #[test]
    fn test_gauge_label() {
        let gauge = Gauge { label: "市場健康度".to_string(), value: 3.0, max: 4.0 };
        let text = render_gauge(&gauge, 30);
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("3 / 4"));
        assert!(text.contains("市場健康度"));
    }
}
