// crates/server/src/render.rs
//! Built-in demonstration report engine.
//!
//! Produces a synthetic tabular report so the service is usable without a
//! real engine attached. Recognized parameters:
//! - `output-target`: `csv` (default), `html`, or `text`
//! - `rows`: number of data rows (default 500, capped at 1,000,000)
//! - `delay-ms`: pause after each page, to make progress observable

use std::time::Duration;

use async_report_jobs::{ProgressReporter, RenderError, RenderRequest, ReportRenderer, StagingSink};
use async_trait::async_trait;

const DEFAULT_ROWS: u64 = 500;
const MAX_ROWS: u64 = 1_000_000;
const ROWS_PER_PAGE: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputTarget {
    Csv,
    Html,
    Text,
}

impl OutputTarget {
    fn of(request: &RenderRequest) -> Result<Self, RenderError> {
        match request.parameter("output-target").unwrap_or("csv") {
            "csv" | "table/csv" => Ok(Self::Csv),
            "html" | "table/html" => Ok(Self::Html),
            "text" | "pageable/text" => Ok(Self::Text),
            other => Err(RenderError::engine(format!("unsupported output target '{other}'"))),
        }
    }

    fn mime_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Html => "text/html",
            Self::Text => "text/plain",
        }
    }
}

/// Synthetic sales report renderer.
#[derive(Debug, Default, Clone)]
pub struct SampleRenderer;

fn parse_u64(request: &RenderRequest, name: &str, default: u64) -> Result<u64, RenderError> {
    match request.parameter(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RenderError::engine(format!("parameter '{name}' is not a number"))),
    }
}

fn row(target: OutputTarget, n: u64) -> String {
    let region = ["North", "South", "East", "West"][(n % 4) as usize];
    let amount = (n * 7919) % 10_000;
    match target {
        OutputTarget::Csv => format!("{n},{region},{amount}\n"),
        OutputTarget::Html => {
            format!("<tr><td>{n}</td><td>{region}</td><td>{amount}</td></tr>\n")
        }
        OutputTarget::Text => format!("{n:>8} {region:<6} {amount:>6}\n"),
    }
}

#[async_trait]
impl ReportRenderer for SampleRenderer {
    fn mime_type(&self, request: &RenderRequest) -> String {
        OutputTarget::of(request)
            .map(OutputTarget::mime_type)
            .unwrap_or("application/octet-stream")
            .to_string()
    }

    async fn render(
        &self,
        request: &RenderRequest,
        reporter: &ProgressReporter,
        sink: &mut StagingSink,
    ) -> Result<(), RenderError> {
        let target = OutputTarget::of(request)?;
        let rows = parse_u64(request, "rows", DEFAULT_ROWS)?.min(MAX_ROWS);
        let delay = Duration::from_millis(parse_u64(request, "delay-ms", 0)?);
        let total_pages = u32::try_from(rows.div_ceil(ROWS_PER_PAGE).max(1)).unwrap_or(u32::MAX);

        reporter.set_activity("Preparing data");
        reporter.set_page(0, total_pages);
        let header = match target {
            OutputTarget::Csv => "id,region,amount\n",
            OutputTarget::Html => "<html><body><table>\n<tr><th>id</th><th>region</th><th>amount</th></tr>\n",
            OutputTarget::Text => "      id region amount\n",
        };
        sink.write(header.as_bytes()).await?;

        reporter.set_activity("Generating content");
        let mut page: u32 = 0;
        let mut start = 0;
        while start < rows {
            let end = (start + ROWS_PER_PAGE).min(rows);
            let chunk: String = (start..end).map(|n| row(target, n)).collect();
            sink.write(chunk.as_bytes()).await?;

            page += 1;
            reporter.set_page(page, total_pages);
            reporter.set_generated_page(page);
            reporter.set_rows(end, rows);
            reporter.set_progress(u8::try_from(end * 100 / rows.max(1)).unwrap_or(100));

            let requested = reporter.requested_page();
            if requested > 0 && requested == page {
                tracing::debug!(page, "Requested page generated");
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            } else {
                tokio::task::yield_now().await;
            }
            start = end;
        }

        if target == OutputTarget::Html {
            sink.write(b"</table></body></html>\n").await?;
        }
        Ok(())
    }
}
