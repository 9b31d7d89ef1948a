use log::Level;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Method;
use rocket::{Data, Request, Response};
use std::time::Instant;

/// One log line per HTTP request with status and timing.
///
/// Server errors log at `warn`; successful static file requests drop to
/// `debug` so uploads and API calls stand out.
pub struct RequestLogger;

fn level_for(method: Method, path: &str, status: u16) -> Level {
    if status >= 500 {
        Level::Warn
    } else if method == Method::Get && status < 400 && !path.starts_with("/api/") {
        Level::Debug
    } else {
        Level::Info
    }
}

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(Instant::now);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let started = request.local_cache(Instant::now);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let status = response.status().code;

        log::log!(
            level_for(request.method(), request.uri().path().as_str(), status),
            "{} {} -> {} ({:.2}ms)",
            request.method(),
            request.uri(),
            status,
            elapsed_ms
        );
    }
}
