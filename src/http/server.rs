//! The HTTP surface: library page, JSON listing, streaming and deletion.
//!
//! Everything rides on rouille's synchronous server, one thread per
//! request. Handlers hold the watched-store lock only for point queries;
//! a streaming response carries the file together with its in-use guard,
//! so the sweeper sees the file as busy until the transfer is over.

use anyhow::anyhow;
use log::info;
use rouille::percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use rouille::{Request, Response, ResponseBody, Server};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs::File,
    io::Read,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{
    config::{HttpConfig, Library},
    domain::fingerprint::Fingerprint,
    http::error::ApiError,
    storage::{
        fs::{guess_mime, scan_library, VideoFile},
        watched::WatchedStore,
    },
    sweep::{resolve_relative, InUseGuard, SweepError, Sweeper},
};

const INDEX_TEMPLATE: &str = include_str!("../../html/index.html");

/// Bytes escaped when a library path becomes a `/video/...` link. Slashes
/// stay literal so nested paths keep their segments.
const HREF_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'\'')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'%')
    .add(b'&');

#[derive(Serialize, Deserialize)]
pub struct VideoEntryResponse {
    pub path: String,
    pub mime: String,
}

#[derive(Serialize, Deserialize)]
pub struct DeleteRequest {
    pub video: String,
}

#[derive(Serialize, Deserialize)]
pub struct DeleteResponse {
    pub status: String,
    pub message: String,
}

pub struct HttpServer {
    store: Arc<Mutex<WatchedStore>>,
    sweeper: Arc<Sweeper>,
    library: Library,
    pub config: HttpConfig,
}

impl HttpServer {
    pub fn new(
        store: Arc<Mutex<WatchedStore>>,
        sweeper: Arc<Sweeper>,
        library: Library,
        config: HttpConfig,
    ) -> Self {
        Self {
            store,
            sweeper,
            library,
            config,
        }
    }

    /// Serves until `stop` flips to true, polling so the flag is observed
    /// within ~100ms of a shutdown signal.
    pub fn run(self, stop: Arc<AtomicBool>) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.bind_addr, self.config.port);
        let server = Server::new(addr.clone(), move |request| self.handle_request(request))
            .map_err(|e| anyhow!("failed to bind {addr}: {e}"))?;
        info!("Listening on http://{}", server.server_addr());

        while !stop.load(Ordering::SeqCst) {
            server.poll_timeout(Duration::from_millis(100));
        }
        info!("HTTP server stopped");
        Ok(())
    }

    fn handle_request(&self, request: &Request) -> Response {
        Self::log_request(request);

        let response = rouille::router!(request,
            (GET) (/) => {
                self.handle_index()
            },

            (GET) (/update_file_list) => {
                self.handle_file_list()
            },

            (POST) (/delete) => {
                self.handle_delete(request)
            },

            _ => {
                // Video paths may span several segments, which the typed
                // routes above cannot capture.
                match request.url().strip_prefix("/video/") {
                    Some(rest) if request.method() == "GET" => self.handle_stream(rest),
                    _ => Response::empty_404(),
                }
            }
        );

        info!("Response: {} {}", request.method(), response.status_code);
        response
    }

    fn log_request(request: &Request) {
        info!("{} {}", request.method(), request.url());
    }

    // ----------------------------------------------------------------
    // Listing
    // ----------------------------------------------------------------

    /// Library listing, minus watched entries when the policy says so.
    fn unwatched_videos(&self) -> Result<Vec<VideoFile>, ApiError> {
        let watched = if self.library.skip_watched {
            let store = self.store.lock().map_err(|e| {
                ApiError::Internal(format!("could not access the watched store under lock: {e}"))
            })?;
            store.list_all()?
        } else {
            HashSet::new()
        };
        // The store lock is released before the walk starts.
        Ok(scan_library(&self.library, &watched))
    }

    fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.library.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    fn handle_index(&self) -> Response {
        match self.render_index() {
            Ok(html) => Response::html(html),
            Err(e) => e.into_response(),
        }
    }

    fn render_index(&self) -> Result<String, ApiError> {
        let videos = self.unwatched_videos()?;

        let mut rows = String::new();
        for video in &videos {
            let rel = self.relative_path(&video.path);
            let href = utf8_percent_encode(&rel, HREF_ENCODE_SET);
            rows.push_str(&format!(
                "      <li>\
                 <a class=\"video-link\" href=\"/video/{href}\" \
                 data-path=\"{path}\" data-mime=\"{mime}\">{name}</a>\
                 <button class=\"delete\" data-path=\"{path}\">Delete</button>\
                 </li>\n",
                path = html_escape(&rel),
                mime = html_escape(&video.mime),
                name = html_escape(&rel),
            ));
        }

        Ok(INDEX_TEMPLATE
            .replace("{{COUNT}}", &videos.len().to_string())
            .replace("{{VIDEO_ROWS}}", &rows))
    }

    fn handle_file_list(&self) -> Response {
        match self.unwatched_videos() {
            Ok(videos) => {
                let entries: Vec<VideoEntryResponse> = videos
                    .iter()
                    .map(|video| VideoEntryResponse {
                        path: self.relative_path(&video.path),
                        mime: video.mime.clone(),
                    })
                    .collect();
                Response::json(&entries)
            }
            Err(e) => e.into_response(),
        }
    }

    // ----------------------------------------------------------------
    // Streaming
    // ----------------------------------------------------------------

    fn handle_stream(&self, raw: &str) -> Response {
        match self.stream_video(raw) {
            Ok(r) => r,
            Err(e) => e.into_response(),
        }
    }

    /// returns the streaming Response, or ApiError
    fn stream_video(&self, raw: &str) -> Result<Response, ApiError> {
        let path = resolve_relative(&self.library.root, raw)?;
        if !path.is_file() {
            return Err(ApiError::VideoNotFound);
        }

        // Serving a video is what marks it watched. Failures here must not
        // break playback, so they are logged and the stream goes ahead.
        self.mark_watched(&path);

        let mime = guess_mime(&path);
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ApiError::VideoNotFound,
            _ => ApiError::Internal(format!("could not open {}: {e}", path.display())),
        })?;
        let len = file
            .metadata()
            .map_err(|e| ApiError::Internal(format!("could not stat {}: {e}", path.display())))?
            .len();

        log::debug!(
            "STREAM {} -> 200 OK, MIME type: {}, {} bytes",
            path.to_string_lossy(),
            mime,
            len
        );

        // The guard travels inside the body: the file counts as in-use
        // until the transfer finishes, not until this handler returns.
        let guard = self.sweeper.acquire(path);
        let stream = TrackedStream {
            file,
            _guard: guard,
        };

        Ok(Response {
            status_code: 200,
            headers: vec![("Content-Type".into(), mime.into())],
            data: ResponseBody::from_reader_and_size(stream, len as usize),
            upgrade: None,
        })
    }

    fn mark_watched(&self, path: &Path) {
        let fingerprint = match Fingerprint::from_path(path, self.library.fingerprint_mtime) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                log::warn!("could not fingerprint {}: {e}", path.display());
                return;
            }
        };
        match self.store.lock() {
            Ok(store) => {
                if let Err(e) = store.mark_watched(&fingerprint) {
                    log::warn!("could not mark {} watched: {e}", path.display());
                }
            }
            Err(e) => log::warn!("watched store unavailable: {e}"),
        }
    }

    // ----------------------------------------------------------------
    // Deletion
    // ----------------------------------------------------------------

    fn handle_delete(&self, request: &Request) -> Response {
        let body: DeleteRequest = match rouille::input::json_input(request) {
            Ok(body) => body,
            Err(e) => {
                log::warn!("bad delete request: {e}");
                return delete_error(400, "invalid request body");
            }
        };

        // Clients may send the path exactly as it appeared in a link, so
        // undo one round of percent-encoding before resolving it.
        let raw = percent_decode_str(&body.video).decode_utf8_lossy();

        match self.sweeper.request_deletion(&raw) {
            Ok(path) => {
                info!(
                    "queued {} for deletion ({} queued)",
                    path.display(),
                    self.sweeper.queue_len()
                );
                Response::json(&DeleteResponse {
                    status: "success".to_string(),
                    message: "video queued for deletion".to_string(),
                })
            }
            Err(e) => {
                log::warn!("rejected deletion of {:?}: {e}", body.video);
                let status = match e {
                    SweepError::NotFound => 404,
                    _ => 400,
                };
                delete_error(status, &e.to_string())
            }
        }
    }
}

fn delete_error(status: u16, message: &str) -> Response {
    Response::json(&DeleteResponse {
        status: "error".to_string(),
        message: message.to_string(),
    })
    .with_status_code(status)
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// File reader that keeps its in-use registration alive for as long as the
/// response body exists.
struct TrackedStream {
    file: File,
    _guard: InUseGuard,
}

impl Read for TrackedStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

#[cfg(test)]
pub fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: rouille::Response,
) -> anyhow::Result<T> {
    Ok(serde_json::from_reader(
        response.data.into_reader_and_size().0,
    )?)
}
