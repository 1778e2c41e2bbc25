//! Grouped bar chart of per-step mean durations, rendered as SVG.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

use crate::analysis::compare::SideBySideRow;

pub const DEFAULT_TITLE: &str = "Per-step mean duration: Base vs Optimized";

const BASE_FILL: &str = "#1f77b4";
const OPT_FILL: &str = "#ff7f0e";

const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 180.0;
const PLOT_HEIGHT: f64 = 360.0;
const SLOT_WIDTH: f64 = 36.0;
const Y_TICKS: usize = 5;

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn bar_value(v: Option<f64>) -> f64 {
    v.filter(|x| x.is_finite() && *x > 0.0).unwrap_or(0.0)
}

/// Render `base_mean_ms` / `opt_mean_ms` per step, in row order.
pub fn render_step_means_svg(rows: &[SideBySideRow], title: &str) -> String {
    let n = rows.len().max(1);
    let plot_width = SLOT_WIDTH * n as f64;
    let width = MARGIN_LEFT + plot_width + MARGIN_RIGHT;
    let height = MARGIN_TOP + PLOT_HEIGHT + MARGIN_BOTTOM;
    let baseline = MARGIN_TOP + PLOT_HEIGHT;

    let max = rows
        .iter()
        .flat_map(|r| [bar_value(r.base_mean_ms), bar_value(r.opt_mean_ms)])
        .fold(0.0_f64, f64::max);
    let max = if max > 0.0 { max } else { 1.0 };
    let scale = PLOT_HEIGHT / max;
    let bar_w = SLOT_WIDTH * 0.45;

    let mut out = String::new();
    let _ = writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w:.0}" height="{h:.0}" viewBox="0 0 {w:.0} {h:.0}" font-family="sans-serif">"#,
        w = width,
        h = height
    );
    out.push_str("<rect width=\"100%\" height=\"100%\" fill=\"#ffffff\"/>\n");
    let _ = writeln!(
        out,
        r#"<text x="{x:.1}" y="28" font-size="16" text-anchor="middle">{t}</text>"#,
        x = width / 2.0,
        t = escape_xml(title)
    );

    for i in 0..=Y_TICKS {
        let value = max * i as f64 / Y_TICKS as f64;
        let y = baseline - value * scale;
        let _ = writeln!(
            out,
            r##"<line x1="{x1:.1}" y1="{y:.1}" x2="{x2:.1}" y2="{y:.1}" stroke="#dddddd"/><text x="{tx:.1}" y="{ty:.1}" font-size="10" text-anchor="end">{v:.1}</text>"##,
            x1 = MARGIN_LEFT,
            x2 = MARGIN_LEFT + plot_width,
            tx = MARGIN_LEFT - 6.0,
            ty = y + 3.0,
            v = value
        );
    }
    let _ = writeln!(
        out,
        r#"<text x="16" y="{y:.1}" font-size="11" text-anchor="middle" transform="rotate(-90 16 {y:.1})">Mean time between LOG steps (ms)</text>"#,
        y = MARGIN_TOP + PLOT_HEIGHT / 2.0
    );

    for (i, row) in rows.iter().enumerate() {
        let slot_x = MARGIN_LEFT + SLOT_WIDTH * i as f64;
        let center = slot_x + SLOT_WIDTH / 2.0;
        for (offset, value, fill) in [
            (-bar_w, bar_value(row.base_mean_ms), BASE_FILL),
            (0.0, bar_value(row.opt_mean_ms), OPT_FILL),
        ] {
            let h = value * scale;
            let _ = writeln!(
                out,
                r#"<rect x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{h:.1}" fill="{fill}"/>"#,
                x = center + offset,
                y = baseline - h,
                w = bar_w,
            );
        }
        let ly = baseline + 8.0;
        let _ = writeln!(
            out,
            r#"<text x="{x:.1}" y="{y:.1}" font-size="8" text-anchor="end" transform="rotate(-90 {x:.1} {y:.1})">{label}</text>"#,
            x = center + 3.0,
            y = ly,
            label = escape_xml(&row.step_key)
        );
    }

    let _ = writeln!(
        out,
        r#"<line x1="{x1:.1}" y1="{y:.1}" x2="{x2:.1}" y2="{y:.1}" stroke="black"/>"#,
        x1 = MARGIN_LEFT,
        x2 = MARGIN_LEFT + plot_width,
        y = baseline
    );

    let legend_x = MARGIN_LEFT + 8.0;
    for (i, (label, fill)) in [("base", BASE_FILL), ("optimized", OPT_FILL)].iter().enumerate() {
        let y = MARGIN_TOP + 6.0 + 16.0 * i as f64;
        let _ = writeln!(
            out,
            r#"<rect x="{x:.1}" y="{y:.1}" width="10" height="10" fill="{fill}"/><text x="{tx:.1}" y="{ty:.1}" font-size="11">{label}</text>"#,
            x = legend_x,
            tx = legend_x + 14.0,
            ty = y + 9.0,
        );
    }

    out.push_str("</svg>\n");
    out
}

/// Write the chart to `out_path`, creating parent directories.
pub fn plot_step_means(rows: &[SideBySideRow], out_path: &Path, title: &str) -> Result<()> {
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let svg = render_step_means_svg(rows, if title.is_empty() { DEFAULT_TITLE } else { title });
    std::fs::write(out_path, svg).with_context(|| format!("Failed to write {}", out_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::compare::PresentIn;

    fn row(step: &str, base: Option<f64>, opt: Option<f64>) -> SideBySideRow {
        SideBySideRow {
            step_key: step.to_string(),
            base_n: base.map(|_| 1),
            base_mean_ms: base,
            base_median_ms: base,
            base_p95_ms: base,
            base_max_ms: base,
            base_sum_ms: base,
            base_pos: Some(1.0),
            opt_n: opt.map(|_| 1),
            opt_mean_ms: opt,
            opt_median_ms: opt,
            opt_p95_ms: opt,
            opt_max_ms: opt,
            opt_sum_ms: opt,
            opt_pos: Some(1.0),
            present_in: PresentIn::Both,
            pos: 1.0,
            select_like_idx: 1,
            diff_mean_ms: 0.0,
            opt_over_base_mean: 1.0,
        }
    }

    #[test]
    fn test_svg_has_bar_pair_per_step() {
        let rows = vec![row("Step 1", Some(10.0), Some(5.0)), row("Step <2>", None, Some(2.0))];
        let svg = render_step_means_svg(&rows, DEFAULT_TITLE);
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches(&format!("fill=\"{}\"/>", BASE_FILL)).count(), 2 + 1);
        assert!(svg.contains("Step &lt;2&gt;"));
        assert!(svg.contains(DEFAULT_TITLE));
    }

    #[test]
    fn test_tallest_bar_fills_plot_height() {
        let svg = render_step_means_svg(&[row("Step 1", Some(10.0), Some(5.0))], "t");
        assert!(svg.contains(&format!("height=\"{:.1}\" fill=\"{}\"", PLOT_HEIGHT, BASE_FILL)));
        assert!(svg.contains(&format!("height=\"{:.1}\" fill=\"{}\"", PLOT_HEIGHT / 2.0, OPT_FILL)));
    }

    #[test]
    fn test_plot_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/chart.svg");
        plot_step_means(&[row("Step 1", Some(1.0), None)], &path, "").unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(DEFAULT_TITLE));
    }
}
