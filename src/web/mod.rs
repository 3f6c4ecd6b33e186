//! Local control page.
//!
//! The HTTP side never touches the relay itself. Each request is handed to
//! the device loop over a channel and answered with the page the loop
//! renders, so the relay keeps a single owner.

use axum::{
    extract::State,
    http::StatusCode,
    response::Html,
    routing::get,
    Router,
};
use log::{error, info};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebRoute {
    /// `GET /`
    Root,
    /// `GET /ON`
    On,
    /// `GET /OFF`
    Off,
}

impl WebRoute {
    /// Relay state this route asks for, if any
    pub fn requested_state(&self) -> Option<bool> {
        match self {
            WebRoute::Root => None,
            WebRoute::On => Some(true),
            WebRoute::Off => Some(false),
        }
    }
}

/// A request waiting for the device loop to render the page
pub struct WebRequest {
    pub route: WebRoute,
    pub reply: oneshot::Sender<String>,
}

pub fn render_status_page(on: bool) -> String {
    let mut html = String::from("<!DOCTYPE HTML><html>");
    html += "<h1>Smart Plug WiFi</h1>";
    html += &format!("<p>State: {}</p>", if on { "ON" } else { "OFF" });
    html += "<p><a href=\"/ON\"><button style='background:green;color:white;font-size:20px'>ON</button></a></p>";
    html += "<p><a href=\"/OFF\"><button style='background:red;color:white;font-size:20px'>OFF</button></a></p>";
    html += "</html>";
    html
}

#[derive(Clone)]
struct WebState {
    requests: mpsc::Sender<WebRequest>,
}

pub fn router(requests: mpsc::Sender<WebRequest>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/ON", get(relay_on))
        .route("/OFF", get(relay_off))
        .with_state(WebState { requests })
}

pub async fn serve(listener: TcpListener, requests: mpsc::Sender<WebRequest>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("web: listening on http://{}", addr);
    }
    axum::serve(listener, router(requests)).await
}

async fn root(State(state): State<WebState>) -> (StatusCode, Html<String>) {
    dispatch(&state, WebRoute::Root).await
}

async fn relay_on(State(state): State<WebState>) -> (StatusCode, Html<String>) {
    dispatch(&state, WebRoute::On).await
}

async fn relay_off(State(state): State<WebState>) -> (StatusCode, Html<String>) {
    dispatch(&state, WebRoute::Off).await
}

async fn dispatch(state: &WebState, route: WebRoute) -> (StatusCode, Html<String>) {
    let (reply, page) = oneshot::channel();
    if state.requests.send(WebRequest { route, reply }).await.is_err() {
        error!("web: device loop is gone, dropping {:?}", route);
        return unavailable();
    }
    match page.await {
        Ok(page) => (StatusCode::OK, Html(page)),
        Err(_) => unavailable(),
    }
}

fn unavailable() -> (StatusCode, Html<String>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Html("<!DOCTYPE HTML><html><p>Device unavailable</p></html>".to_string()),
    )
}
