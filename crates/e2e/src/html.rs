//! Static HTML rendering of a results document

use std::fmt::Write as _;
use std::path::Path;

use crate::error::E2eResult;
use crate::reporter::{ClaudeTestResult, TestStatus};

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn link(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    format!(r#"<a href="{}">{}</a>"#, escape(path), escape(&name))
}

/// Render `result` as a standalone page
pub fn render(result: &ClaudeTestResult) -> String {
    let verdict = if result.passed { "PASSED" } else { "FAILED" };
    let verdict_class = if result.passed { "passed" } else { "failed" };

    let mut rows = String::new();
    for case in &result.tests {
        let details = match (&case.error, &case.stack_trace) {
            (Some(error), Some(trace)) => {
                format!("{}<pre>{}</pre>", escape(error), escape(trace))
            }
            (Some(error), None) => escape(error),
            _ => String::new(),
        };
        let _ = write!(
            rows,
            r#"
      <tr class="{status}">
        <td>{name}</td>
        <td>{status}</td>
        <td>{duration:.2}s</td>
        <td>{screenshot}</td>
        <td>{details}</td>
      </tr>"#,
            status = case.status.as_str(),
            name = escape(&case.name),
            duration = case.duration,
            screenshot = case.screenshot.as_deref().map(link).unwrap_or_default(),
            details = details,
        );
    }

    let screenshots: String = result
        .screenshots
        .iter()
        .map(|s| format!("\n      <li>{}</li>", link(s)))
        .collect();

    format!(
        r#"<!doctype html>
<html>
  <head>
    <meta charset="utf-8" />
    <title>E2E Results</title>
    <style>
      body {{ font-family: ui-sans-serif, system-ui, -apple-system, Segoe UI, Roboto, Helvetica, Arial; padding: 18px; max-width: 1100px; margin: 0 auto; }}
      table {{ border-collapse: collapse; width: 100%; }}
      td, th {{ border-bottom: 1px solid #e5e7eb; padding: 8px; text-align: left; vertical-align: top; }}
      tr.failed td:nth-child(2), .failed {{ color: #b91c1c; }}
      tr.passed td:nth-child(2), .passed {{ color: #15803d; }}
      tr.skipped td:nth-child(2) {{ color: #6b7280; }}
      pre {{ background:#0b1020; color:#e5e7eb; padding:12px; border-radius:10px; overflow:auto; }}
      .hint {{ color:#6b7280; }}
    </style>
  </head>
  <body>
    <h1>E2E Results: <span class="{verdict_class}">{verdict}</span></h1>
    <p class="hint">{passed} passed, {failed} failed, {skipped} skipped in {duration:.2}s at {timestamp}</p>
    <table>
      <tr><th>Test</th><th>Status</th><th>Duration</th><th>Screenshot</th><th>Error</th></tr>{rows}
    </table>
    <h2>Screenshots</h2>
    <ul>{screenshots}
    </ul>
  </body>
</html>
"#,
        verdict_class = verdict_class,
        verdict = verdict,
        passed = result.count(TestStatus::Passed),
        failed = result.count(TestStatus::Failed),
        skipped = result.count(TestStatus::Skipped),
        duration = result.duration,
        timestamp = escape(&result.timestamp),
        rows = rows,
        screenshots = screenshots,
    )
}

/// Render `result` to `path`, creating parent directories
pub fn write_report(result: &ClaudeTestResult, path: &Path) -> E2eResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render(result))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::ClaudeTestCase;
    use std::time::Duration;

    fn sample() -> ClaudeTestResult {
        ClaudeTestResult::new(
            vec![
                ClaudeTestCase {
                    name: "opens data explorer".to_string(),
                    status: TestStatus::Passed,
                    duration: 2.5,
                    screenshot: Some("/shots/data-explorer-loaded.png".to_string()),
                    error: None,
                    stack_trace: None,
                },
                ClaudeTestCase {
                    name: "runs <query>".to_string(),
                    status: TestStatus::Failed,
                    duration: 5.0,
                    screenshot: None,
                    error: Some("element 'textarea#sql-query-editor' not found".to_string()),
                    stack_trace: Some("    at step 3: wait_for_element [FAILED]".to_string()),
                },
            ],
            Duration::from_secs(8),
            vec!["/shots/data-explorer-loaded.png".to_string()],
            vec!["element 'textarea#sql-query-editor' not found".to_string()],
        )
    }

    #[test]
    fn test_render_escapes_and_links() {
        let html = render(&sample());
        assert!(html.contains("FAILED"));
        assert!(html.contains("runs &lt;query&gt;"));
        assert!(html.contains("element &#39;textarea#sql-query-editor&#39; not found"));
        assert!(html.contains(r#"<a href="/shots/data-explorer-loaded.png">data-explorer-loaded.png</a>"#));
        assert!(html.contains("1 passed, 1 failed, 0 skipped"));
    }

    #[test]
    fn test_write_report_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results/report.html");
        write_report(&sample(), &path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("<!doctype html>"));
    }
}
