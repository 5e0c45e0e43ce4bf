//! HTTP surface: a control listener on `port` and a stream listener on
//! `port + 1`.
//!
//! - `GET /` control page
//! - `GET /status` sensor settings as JSON
//! - `GET /control?var=..&val=..` apply a command
//! - `GET /capture` single JPEG
//! - `GET /stream` multipart MJPEG (stream listener)

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{RawQuery, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Semaphore};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::actuator::{Actuators, PwmDriver};
use crate::capture::{FrameSource, Sensor};
use crate::codec::{ImageCodec, JpegCodec};
use crate::handlers::mjpeg::STREAM_CONTENT_TYPE;
use crate::handlers::{capture_jpeg, CommandInterpreter, StreamSession};
use crate::transport::{self, ResponseHead};
use crate::{Config, ServerConfig};

const INDEX_TEMPLATE: &str = include_str!("index.html");

/// Shared by every request on both listeners
pub struct AppState {
    pub source: Arc<dyn FrameSource>,
    pub sensor: Arc<dyn Sensor>,
    pub codec: Arc<dyn JpegCodec>,
    pub interpreter: CommandInterpreter,
    pub jpeg_quality: u8,
    pub body_depth: usize,
    stream_slots: Arc<Semaphore>,
}

impl AppState {
    pub fn new(
        config: &Config,
        source: Arc<dyn FrameSource>,
        sensor: Arc<dyn Sensor>,
        driver: Arc<dyn PwmDriver>,
    ) -> Self {
        let actuators = Actuators::from_config(&config.actuator, driver);
        Self {
            interpreter: CommandInterpreter::new(sensor.clone(), actuators),
            source,
            sensor,
            codec: Arc::new(ImageCodec::new(config.codec.chunk_size)),
            jpeg_quality: config.codec.jpeg_quality.clamp(1, 100),
            body_depth: config.server.body_depth,
            stream_slots: Arc::new(Semaphore::new(config.server.max_streams.max(1))),
        }
    }

    /// Streams that can still be opened
    pub fn free_stream_slots(&self) -> usize {
        self.stream_slots.available_permits()
    }
}

fn render_index(stream_port: u16) -> String {
    INDEX_TEMPLATE.replace("{{stream_port}}", &stream_port.to_string())
}

/// Routes served on the control port
pub fn control_router(state: Arc<AppState>, stream_port: u16) -> Router {
    let page = render_index(stream_port);
    Router::new()
        .route(
            "/",
            get(move || {
                let page = page.clone();
                async move { Html(page) }
            }),
        )
        .route("/status", get(status))
        .route("/control", get(control))
        .route("/capture", get(capture))
        .with_state(state)
}

/// Routes served on the stream port
pub fn stream_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stream", get(stream))
        .with_state(state)
}

/// Bind the control listener and the stream listener one port above it.
/// Port 0 gives both an ephemeral port.
pub async fn bind(config: &ServerConfig) -> io::Result<(TcpListener, TcpListener)> {
    let stream_port = match config.port {
        0 => 0,
        port => port.checked_add(1).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no stream port above {}", port),
            )
        })?,
    };

    let control = TcpListener::bind(SocketAddr::new(config.bind, config.port)).await?;
    let stream = TcpListener::bind(SocketAddr::new(config.bind, stream_port)).await?;
    Ok((control, stream))
}

/// Serve both listeners until either fails
pub async fn serve(
    control: TcpListener,
    stream: TcpListener,
    state: Arc<AppState>,
) -> io::Result<()> {
    let control_addr = control.local_addr()?;
    let stream_addr = stream.local_addr()?;

    info!("Starting web server on port: '{}'", control_addr.port());
    info!("Starting stream server on port: '{}'", stream_addr.port());

    let control_app = control_router(state.clone(), stream_addr.port());
    let stream_app = stream_router(state);

    tokio::try_join!(
        async { axum::serve(control, control_app).await },
        async { axum::serve(stream, stream_app).await },
    )?;
    Ok(())
}

fn allow_any_origin(response: &mut Response) {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
}

/// Turn the head a blocking handler produced into an axum response
async fn respond(
    head: oneshot::Receiver<ResponseHead>,
    headers: &[(HeaderName, &'static str)],
) -> Response {
    let mut response = match head.await {
        Ok(ResponseHead::Full(body)) => Body::from(body).into_response(),
        Ok(ResponseHead::Streaming(rx)) => {
            Body::from_stream(rx.into_stream().map(Ok::<_, Infallible>)).into_response()
        }
        Ok(ResponseHead::Failed(status)) => return status.into_response(),
        Err(_) => {
            error!("Handler exited without a response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    for (name, value) in headers {
        response
            .headers_mut()
            .insert(name.clone(), HeaderValue::from_static(value));
    }
    response
}

async fn status(State(state): State<Arc<AppState>>) -> Response {
    let mut response = Json(state.sensor.status()).into_response();
    allow_any_origin(&mut response);
    response
}

async fn control(State(state): State<Arc<AppState>>, RawQuery(query): RawQuery) -> Response {
    // Sensor writes can wait on an in-flight capture
    let worker = state.clone();
    let outcome =
        tokio::task::spawn_blocking(move || worker.interpreter.handle(query.as_deref())).await;

    let Ok(outcome) = outcome else {
        error!("Control worker panicked");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    match outcome {
        Ok(command) => {
            debug!("Applied {:?}", command);
            let mut response = StatusCode::OK.into_response();
            allow_any_origin(&mut response);
            response
        }
        Err(e) => {
            warn!("Control request rejected: {}", e);
            e.status().into_response()
        }
    }
}

async fn capture(State(state): State<Arc<AppState>>) -> Response {
    let (mut responder, head) = transport::channel(state.body_depth);

    let worker = state.clone();
    tokio::task::spawn_blocking(move || {
        // Failures are logged and reported through the responder
        let _ = capture_jpeg(
            worker.source.as_ref(),
            worker.codec.as_ref(),
            worker.jpeg_quality,
            &mut responder,
        );
    });

    respond(
        head,
        &[
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CONTENT_DISPOSITION, "inline; filename=capture.jpg"),
        ],
    )
    .await
}

async fn stream(State(state): State<Arc<AppState>>) -> Response {
    let Ok(permit) = state.stream_slots.clone().try_acquire_owned() else {
        warn!("Stream rejected, all slots busy");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let (mut responder, head) = transport::channel(state.body_depth);

    let worker = state.clone();
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let mut session = StreamSession::new(
            worker.source.as_ref(),
            worker.codec.as_ref(),
            worker.jpeg_quality,
        );
        session.run(&mut responder);
    });

    respond(
        head,
        &[
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
    )
    .await
}
