//! Local web workspace for pneumo.
//!
//! Provides a lightweight HTTP server (sync, via `tiny_http`) that renders the
//! intake form, analysis, XAI report and patient history pages from a single
//! [`Workspace`]. Every action is a form post followed by a redirect back
//! to `/`.
//!
//! Launched via `pneumo web` (default: `http://127.0.0.1:9747`).
//!
//! The server loop is the only writer of the workspace. The `/explain` call
//! runs on a worker thread that sends its [`Settlement`] over a channel; the
//! loop applies it on the next pump.

mod api;
mod frontend;
mod pages;

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tiny_http::{Header, Method, Response, Server, StatusCode};

use crate::api::{DiagnosisBackend, HttpBackend};
use crate::config::PneumoConfig;
use crate::form::FormInput;
use crate::multipart;
use crate::workspace::progress::ProgressSettings;
use crate::workspace::{ExplainTicket, Settlement, Workspace};

// ---------------------------------------------------------------------------
// Server entry point
// ---------------------------------------------------------------------------

/// Start the web workspace on the given address.
///
/// Blocks the current thread. Handles requests sequentially (sufficient for
/// a local single-user workspace). Gracefully handles errors per-request
/// without crashing the server.
pub fn serve(cfg: &PneumoConfig, addr: &str, open: bool) -> Result<()> {
    let server = Server::http(addr)
        .map_err(|e| anyhow::anyhow!("failed to start HTTP server on {addr}: {e}"))?;

    println!("pneumo workspace running at http://{addr}");
    println!("Backend: {}", cfg.api.base_url);
    println!("Press Ctrl+C to stop.\n");

    if open {
        let _ = open_browser(&format!("http://{addr}"));
    }

    let mut app = WebApp::new(
        HttpBackend::from_config(cfg),
        ProgressSettings::from(&cfg.progress),
    );
    let wait = app.settings.tick.min(Duration::from_millis(250));

    loop {
        app.pump();
        let mut request = match server.recv_timeout(wait) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("failed to receive request: {e}");
                continue;
            }
        };

        let method = request.method().clone();
        let url = request.url().to_string();
        let content_type = request
            .headers()
            .iter()
            .find(|h| h.field.equiv("Content-Type"))
            .map(|h| h.value.as_str().to_string());

        // Read body up-front for methods that carry one
        let body = if matches!(method, Method::Put | Method::Post | Method::Patch) {
            read_body(request.as_reader())
        } else {
            Ok(Vec::new())
        };

        app.pump();
        let reply = match body {
            Ok(body) => app.handle(&method, &url, content_type.as_deref(), &body),
            Err(e) => Ok(Reply::BadRequest(format!("failed to read request body: {e}"))),
        };
        let response = reply
            .and_then(Reply::into_response)
            .unwrap_or_else(|e| error_response(&e));
        let _ = request.respond(response);

        // Brief access log
        println!(
            "{} {} {}",
            method,
            url,
            chrono::Local::now().format("%H:%M:%S")
        );
    }
}

fn read_body(mut reader: impl Read) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// What a handler wants sent back.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Html(String),
    Json(String),
    /// 303 See Other, so the browser re-fetches with GET.
    Redirect(&'static str),
    Image { content_type: String, bytes: Arc<[u8]> },
    BadRequest(String),
    NotFound,
}

/// The workspace plus the plumbing around it: the backend and the channel
/// explanation workers report back on.
pub struct WebApp<B> {
    workspace: Workspace,
    backend: B,
    settings: ProgressSettings,
    tx: Sender<Settlement>,
    rx: Receiver<Settlement>,
}

impl<B> WebApp<B>
where
    B: DiagnosisBackend + Clone + Send + 'static,
{
    pub fn new(backend: B, settings: ProgressSettings) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            workspace: Workspace::new(settings),
            backend,
            settings,
            tx,
            rx,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Apply settlements from finished workers and advance the progress
    /// simulation.
    pub fn pump(&mut self) {
        let now = Instant::now();
        while let Ok(settlement) = self.rx.try_recv() {
            let generation = settlement.generation;
            if !self.workspace.settle(settlement, now) {
                println!("discarded stale explanation result (generation {generation})");
            }
        }
        self.workspace.poll(now, &mut rand::rng());
    }

    fn spawn_explanation(&self, ticket: ExplainTicket) {
        println!("explanation request started (generation {})", ticket.generation());
        let backend = self.backend.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let _ = tx.send(ticket.run(&backend));
        });
    }

    /// Route one request.
    pub fn handle(&mut self, method: &Method, url: &str, content_type: Option<&str>, body: &[u8]) -> Result<Reply> {
        // Strip query string for path matching
        let path = url.split('?').next().unwrap_or(url);

        let reply = match (method, path) {
            (&Method::Get, "/") | (&Method::Get, "/index.html") => self.render(),
            (&Method::Get, "/api/state") => Reply::Json(api::state_json(&self.workspace)?),
            (&Method::Get, p) if p.starts_with("/preview/") => self.preview(p),

            (&Method::Post, "/submit") => return self.submit(content_type, body),
            (&Method::Post, "/report") => {
                if let Ok(Some(ticket)) = self.workspace.open_report(Instant::now()) {
                    self.spawn_explanation(ticket);
                }
                Reply::Redirect("/")
            }
            (&Method::Post, "/report/retry") => {
                if let Ok(ticket) = self.workspace.retry_explanation(Instant::now()) {
                    self.spawn_explanation(ticket);
                }
                Reply::Redirect("/")
            }
            (&Method::Post, "/nav/form") => {
                self.workspace.back_to_form();
                Reply::Redirect("/")
            }
            (&Method::Post, "/nav/analysis") => {
                let _ = self.workspace.back_to_analysis();
                Reply::Redirect("/")
            }

            (&Method::Get, "/history") => {
                let patient_id = api::query_param(url, "patientId").unwrap_or_default();
                self.workspace.open_history(&self.backend, &patient_id);
                self.render()
            }
            (&Method::Post, "/history/close") => {
                self.workspace.close_history();
                Reply::Redirect("/")
            }
            (&Method::Get, "/history/view") => {
                let key = api::query_param(url, "key").unwrap_or_default();
                if !self.workspace.select_history_record(&key) {
                    return Ok(Reply::NotFound);
                }
                self.render()
            }
            (&Method::Post, "/history/modal/close") => {
                self.workspace.close_history_preview();
                Reply::Redirect("/")
            }

            _ => Reply::NotFound,
        };
        Ok(reply)
    }

    fn render(&self) -> Reply {
        Reply::Html(pages::render(&self.workspace, self.settings.tick.as_millis() as u64))
    }

    fn preview(&self, path: &str) -> Reply {
        match self.workspace.previews().get(path) {
            Some(file) => Reply::Image {
                content_type: file.content_type.clone(),
                bytes: Arc::clone(&file.bytes),
            },
            None => Reply::NotFound,
        }
    }

    /// `POST /submit` — decode the multipart upload and run the prediction.
    /// Validation and backend errors land in the banner of the form page.
    fn submit(&mut self, content_type: Option<&str>, body: &[u8]) -> Result<Reply> {
        let Some(boundary) = content_type.and_then(multipart::boundary_from_content_type) else {
            return Ok(Reply::BadRequest("expected multipart/form-data".to_string()));
        };
        let fields = match multipart::parse(body, &boundary) {
            Ok(fields) => fields,
            Err(e) => return Ok(Reply::BadRequest(e.to_string())),
        };

        if let Err(e) = self.workspace.submit(&self.backend, FormInput::from_fields(fields)) {
            println!("submit rejected: {e}");
        }
        Ok(Reply::Redirect("/"))
    }
}

impl<B> Drop for WebApp<B> {
    fn drop(&mut self) {
        self.workspace.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

impl Reply {
    fn into_response(self) -> Result<Response<Cursor<Vec<u8>>>> {
        let response = match self {
            Self::Html(html) => Response::from_data(html.into_bytes())
                .with_header(header("Content-Type", "text/html; charset=utf-8")?)
                .with_status_code(StatusCode(200)),
            Self::Json(json) => Response::from_data(json.into_bytes())
                .with_header(content_type_json()?)
                .with_status_code(StatusCode(200)),
            Self::Redirect(location) => Response::from_data(Vec::new())
                .with_header(header("Location", location)?)
                .with_status_code(StatusCode(303)),
            Self::Image { content_type, bytes } => Response::from_data(bytes.to_vec())
                .with_header(header("Content-Type", &content_type)?)
                .with_header(header("Cache-Control", "no-store")?)
                .with_status_code(StatusCode(200)),
            Self::BadRequest(message) => json_error(&message, 400)?,
            Self::NotFound => json_error("not found", 404)?,
        };
        Ok(response)
    }
}

fn json_error(message: &str, status: u16) -> Result<Response<Cursor<Vec<u8>>>> {
    let body = serde_json::json!({ "error": message }).to_string();
    Ok(Response::from_data(body.into_bytes())
        .with_header(content_type_json()?)
        .with_status_code(StatusCode(status)))
}

/// Last-resort 500 when building a response itself failed.
fn error_response(err: &anyhow::Error) -> Response<Cursor<Vec<u8>>> {
    let body = serde_json::json!({ "error": err.to_string() }).to_string();
    let response = Response::from_data(body.into_bytes()).with_status_code(StatusCode(500));
    match content_type_json() {
        Ok(h) => response.with_header(h),
        Err(_) => response,
    }
}

fn header(name: &str, value: &str) -> Result<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes())
        .map_err(|()| anyhow::anyhow!("invalid header {name}: {value}"))
}

/// JSON content type header.
fn content_type_json() -> Result<Header> {
    header("Content-Type", "application/json; charset=utf-8")
}

/// Attempt to open a URL in the system default browser.
fn open_browser(url: &str) -> Result<()> {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .spawn()
            .context("failed to open browser")?;
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open")
            .arg(url)
            .spawn()
            .context("failed to open browser")?;
    }

    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open")
            .arg(url)
            .spawn()
            .context("failed to open browser")?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
