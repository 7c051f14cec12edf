//! Dashboard routes backed by the readings database

use crate::request::Request;
use iow_shared::storage::to_csv;
use iow_shared::{Storage, StorageError};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

pub const DEFAULT_START: &str = "0001-01-01 00:00:00";
pub const DEFAULT_END: &str = "2100-01-01 00:00:00";

const INDEX_TEMPLATE: &str = include_str!("../static/index.html");
const CHART_SCRIPT: &str = include_str!("../static/main.js");

/// Complete HTTP response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    fn ok(content_type: &'static str, body: String) -> Self {
        Self {
            status: 200,
            content_type,
            body,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: "text/plain",
            body: "Not Found\n".into(),
        }
    }

    fn internal_error() -> Self {
        Self {
            status: 500,
            content_type: "text/plain",
            body: "Internal Server Error\n".into(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            404 => "Not Found",
            _ => "Internal Server Error",
        }
    }

    /// Serialize as an HTTP/1.1 response that closes the connection
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

/// Dispatch a request. SQLite work runs on the blocking pool.
pub async fn route(request: Request, database: PathBuf) -> Response {
    if request.method != "GET" {
        return Response::not_found();
    }

    let result = match request.path.as_str() {
        "/" => tokio::task::spawn_blocking(move || index_html(&database))
            .await
            .map(|result| result.map(|body| Response::ok("text/html; charset=utf-8", body))),
        "/static/main.js" => {
            return Response::ok("application/javascript", CHART_SCRIPT.to_string());
        }
        "/data" => {
            let start = request.param("start_datetime", DEFAULT_START).to_string();
            let end = request.param("end_datetime", DEFAULT_END).to_string();
            tokio::task::spawn_blocking(move || data_csv(&database, &start, &end))
                .await
                .map(|result| result.map(|body| Response::ok("text/csv", body)))
        }
        "/range" => tokio::task::spawn_blocking(move || range_json(&database))
            .await
            .map(|result| result.map(|body| Response::ok("application/json", body))),
        _ => return Response::not_found(),
    };

    match result {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            error!(path = %request.path, error = %e, "Query failed");
            Response::internal_error()
        }
        Err(e) => {
            error!(path = %request.path, error = %e, "Query task failed");
            Response::internal_error()
        }
    }
}

/// Chart page seeded with the span of non-debug readings
pub fn index_html(database: &Path) -> Result<String, StorageError> {
    let storage = Storage::open_existing(database)?;
    let (earliest, latest) = storage.debug_free_span()?.unwrap_or_default();
    Ok(INDEX_TEMPLATE
        .replace("{{earliest_date}}", &escape_html(&earliest))
        .replace("{{latest_date}}", &escape_html(&latest)))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// CSV of readings between `start` and `end`
pub fn data_csv(database: &Path, start: &str, end: &str) -> Result<String, StorageError> {
    let storage = Storage::open_existing(database)?;
    let points = storage.range(start, end)?;
    debug!(start, end, points = points.len(), "Serving data");
    Ok(to_csv(&points))
}

/// `[min, max]` of non-debug timestamps, `[null, null]` when there are none
pub fn range_json(database: &Path) -> Result<String, StorageError> {
    let storage = Storage::open_existing(database)?;
    let (min, max) = match storage.debug_free_span()? {
        Some((min, max)) => (Some(min), Some(max)),
        None => (None, None),
    };
    Ok(serde_json::json!([min, max]).to_string())
}
