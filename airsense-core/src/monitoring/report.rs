//! Self-contained HTML renderings of the drift and classification results.

use std::path::Path;

use chrono::{DateTime, Utc};

use super::drift::DriftSummary;
use super::performance::ClassificationMetrics;
use crate::error::StorageError;

pub const DRIFT_REPORT_FILE: &str = "data_drift_report.html";
pub const CLASSIFICATION_REPORT_FILE: &str = "classification_report.html";

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn page_start(title: &str, generated_at: DateTime<Utc>) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n", escape_html(title)));
    html.push_str("<style>\n");
    html.push_str("body { font-family: system-ui, sans-serif; max-width: 960px; margin: 0 auto; padding: 2rem; }\n");
    html.push_str("table { border-collapse: collapse; width: 100%; margin: 1rem 0; }\n");
    html.push_str("th, td { border: 1px solid #ddd; padding: 0.4rem 0.6rem; text-align: right; }\n");
    html.push_str("th:first-child, td:first-child { text-align: left; }\n");
    html.push_str(".drift { color: #b00020; font-weight: bold; }\n");
    html.push_str(".ok { color: #1b5e20; }\n");
    html.push_str("</style>\n</head>\n<body>\n");
    html.push_str(&format!("<h1>{}</h1>\n", escape_html(title)));
    html.push_str(&format!(
        "<p>Generated {}</p>\n",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    html
}

fn page_end(html: &mut String) {
    html.push_str("</body>\n</html>\n");
}

pub fn render_drift_report(summary: &DriftSummary, generated_at: DateTime<Utc>) -> String {
    let mut html = page_start("Data Drift Report", generated_at);

    let (class, verdict) = if summary.dataset_drift {
        ("drift", "Dataset drift detected")
    } else {
        ("ok", "No dataset drift detected")
    };
    html.push_str(&format!("<p class=\"{class}\">{verdict}</p>\n"));
    html.push_str(&format!(
        "<p>{} of {} features drifted (share {:.3}, threshold {:.2}). \
         Reference rows: {}. Current rows: {}.</p>\n",
        summary.drifted_features().len(),
        summary.features.len(),
        summary.drift_score,
        summary.drift_share,
        summary.reference_rows,
        summary.current_rows
    ));

    html.push_str("<table>\n<tr><th>Feature</th><th>Reference mean</th><th>Current mean</th>");
    html.push_str("<th>KS statistic</th><th>p-value</th><th>Drift</th></tr>\n");
    for f in &summary.features {
        let (class, label) = if f.drift_detected {
            ("drift", "detected")
        } else {
            ("ok", "not detected")
        };
        html.push_str(&format!(
            "<tr><td>{}</td><td>{:.3}</td><td>{:.3}</td><td>{:.4}</td><td>{:.4}</td>\
             <td class=\"{class}\">{label}</td></tr>\n",
            escape_html(&f.feature),
            f.reference_mean,
            f.current_mean,
            f.statistic,
            f.p_value
        ));
    }
    html.push_str("</table>\n");
    html.push_str(&format!(
        "<p>Test: two-sample Kolmogorov-Smirnov, p-value threshold {}.</p>\n",
        summary.p_value_threshold
    ));

    page_end(&mut html);
    html
}

fn metric_cell(metrics: Option<&ClassificationMetrics>, pick: fn(&ClassificationMetrics) -> f64) -> String {
    metrics
        .map(|m| format!("{:.3}", pick(m)))
        .unwrap_or_else(|| "n/a".to_string())
}

fn confusion_table(html: &mut String, heading: &str, m: &ClassificationMetrics) {
    let cm = &m.confusion;
    html.push_str(&format!("<h2>{}</h2>\n", escape_html(heading)));
    html.push_str("<table>\n<tr><th></th><th>Predicted activate (0)</th><th>Predicted deactivate (1)</th></tr>\n");
    html.push_str(&format!(
        "<tr><td>Actual activate (0)</td><td>{}</td><td>{}</td></tr>\n",
        cm.true_positive, cm.false_negative
    ));
    html.push_str(&format!(
        "<tr><td>Actual deactivate (1)</td><td>{}</td><td>{}</td></tr>\n",
        cm.false_positive, cm.true_negative
    ));
    html.push_str("</table>\n");
}

pub fn render_classification_report(
    current: &ClassificationMetrics,
    reference: Option<&ClassificationMetrics>,
    model_version: &str,
    generated_at: DateTime<Utc>,
) -> String {
    let mut html = page_start("Classification Performance Report", generated_at);
    html.push_str(&format!(
        "<p>Model version {}. Positive class: activate ventilation (0). \
         Current rows matched to feedback: {}.</p>\n",
        escape_html(model_version),
        current.support
    ));

    let rows: [(&str, fn(&ClassificationMetrics) -> f64); 4] = [
        ("Accuracy", |m| m.accuracy),
        ("Precision", |m| m.precision),
        ("Recall", |m| m.recall),
        ("F1", |m| m.f1),
    ];
    html.push_str("<table>\n<tr><th>Metric</th><th>Reference</th><th>Current</th></tr>\n");
    for (label, pick) in rows {
        html.push_str(&format!(
            "<tr><td>{label}</td><td>{}</td><td>{}</td></tr>\n",
            metric_cell(reference, pick),
            metric_cell(Some(current), pick)
        ));
    }
    html.push_str("</table>\n");

    confusion_table(&mut html, "Current confusion matrix", current);
    if let Some(reference) = reference {
        confusion_table(&mut html, "Reference confusion matrix", reference);
    }

    page_end(&mut html);
    html
}

/// Write `html` to `dir/file_name`, creating `dir` as needed.
pub fn write_report(dir: &Path, file_name: &str, html: &str) -> Result<std::path::PathBuf, StorageError> {
    std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
    let path = dir.join(file_name);
    std::fs::write(&path, html).map_err(|e| StorageError::io(&path, e))?;
    tracing::info!(path = %path.display(), "Report written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::drift::detect_drift;
    use crate::monitoring::performance::classification_metrics;

    #[test]
    fn test_drift_report_lists_every_feature() {
        let rows: Vec<[f64; 7]> = (0..20).map(|i| [f64::from(i); 7]).collect();
        let summary = detect_drift(&rows, &rows, 0.05, 0.5);
        let html = render_drift_report(&summary, Utc::now());

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("No dataset drift detected"));
        for feature in crate::models::FEATURE_COLUMNS {
            assert!(html.contains(&format!("<td>{feature}</td>")));
        }
    }

    #[test]
    fn test_classification_report_without_reference() {
        let current = classification_metrics([(0, 0), (1, 0)]);
        let html = render_classification_report(&current, None, "1.2.0", Utc::now());
        assert!(html.contains("<td>Accuracy</td><td>n/a</td><td>0.500</td>"));
        assert!(html.contains("Current confusion matrix"));
        assert!(!html.contains("Reference confusion matrix"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a & \"b\">"), "&lt;a &amp; &quot;b&quot;&gt;");
    }

    #[test]
    fn test_write_report_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let reports = dir.path().join("nested/reports");
        let path = write_report(&reports, DRIFT_REPORT_FILE, "<html></html>").unwrap();
        assert_eq!(path, reports.join(DRIFT_REPORT_FILE));
        assert!(path.exists());
    }
}
