//! HTTP server for the region colors of the latest query.
//!
//! The current [`RoiData`] lives in a watch channel: `POST /set` replaces it, `GET /get` returns it
//! and every `GET /events` stream is woken when it changes. The server also hands out the viewer
//! page and the exported meshes.

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::watch;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, info, warn};

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::mesh_export::viewer_page;
use crate::roi::RoiData;

/// File name of the viewer page within the web directory.
pub const VIEWER_FILE: &str = "brain_regions_3d.html";
/// Directory of the exported meshes within the web directory.
pub const MESH_DIR: &str = "webgl_output";


/// One published record set. Generation 0 is the initial empty set.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub generation: u64,
    pub roi: Arc<RoiData>,
}

impl Publication {
    /// The SSE events of this publication: one `roi` event per record, then an `end` event.
    fn events(&self) -> Vec<Event> {
        let id = self.generation.to_string();
        let mut events: Vec<Event> = self.roi.data.iter()
            .filter_map(|record| match Event::default().event("roi").id(id.clone()).json_data(record) {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!("Could not encode region {}: {}", record.id, err);
                    None
                }
            })
            .collect();
        events.push(Event::default().event("end").id(id).data(self.roi.len().to_string()));
        events
    }
}


/// The shared, observable region color state.
#[derive(Debug, Clone)]
pub struct RoiState {
    tx: Arc<watch::Sender<Publication>>,
}

impl Default for RoiState {
    fn default() -> RoiState {
        RoiState::new()
    }
}

impl RoiState {

    pub fn new() -> RoiState {
        let (tx, _rx) = watch::channel(Publication { generation: 0, roi: Arc::new(RoiData::default()) });
        RoiState { tx: Arc::new(tx) }
    }

    /// Replace the current record set and wake all subscribers. Returns the new generation.
    pub fn publish(&self, roi: RoiData) -> u64 {
        let roi = Arc::new(roi);
        let mut generation = 0;
        self.tx.send_modify(|current| {
            current.generation += 1;
            current.roi = roi;
            generation = current.generation;
        });
        debug!("Published generation {}", generation);
        generation
    }

    pub fn current(&self) -> Publication {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Publication> {
        self.tx.subscribe()
    }

    /// A stream of publications: the current one first if anything has been published yet, then
    /// every later one. A slow consumer skips to the latest publication.
    pub fn publications(&self) -> impl Stream<Item = Publication> + Send + 'static {
        stream::unfold((self.subscribe(), true), |(mut rx, first)| async move {
            if first {
                let current = rx.borrow_and_update().clone();
                if current.generation > 0 {
                    return Some((current, (rx, false)));
                }
            }
            match rx.changed().await {
                Ok(()) => {
                    let next = rx.borrow_and_update().clone();
                    Some((next, (rx, false)))
                }
                Err(_) => None,
            }
        })
    }
}


#[derive(Debug, Clone)]
struct AppState {
    roi: RoiState,
    web_dir: PathBuf,
}

async fn index(State(app): State<AppState>) -> Html<String> {
    let path = app.web_dir.join(VIEWER_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Html(page),
        Err(err) => {
            debug!("Serving the built-in viewer page, '{}' is not readable: {}", path.display(), err);
            Html(viewer_page(MESH_DIR))
        }
    }
}

async fn set_roi(State(app): State<AppState>, Json(roi): Json<RoiData>) -> StatusCode {
    let count = roi.len();
    let generation = app.roi.publish(roi);
    info!("Received colors for {} regions (generation {})", count, generation);
    StatusCode::NO_CONTENT
}

async fn get_roi(State(app): State<AppState>) -> Json<RoiData> {
    Json(app.roi.current().roi.as_ref().clone())
}

async fn events(State(app): State<AppState>) -> impl IntoResponse {
    let stream = app.roi.publications()
        .flat_map(|publication| stream::iter(publication.events()))
        .map(Ok::<Event, Infallible>);
    Sse::new(stream).keep_alive(KeepAlive::default())
}


/// Build the router. `web_dir` holds the viewer page and the mesh directories; all other files in
/// it are served as they are.
pub fn create_router<P: AsRef<Path>>(state: RoiState, web_dir: P) -> Router {
    let web_dir = web_dir.as_ref().to_path_buf();
    let files = ServeDir::new(&web_dir);
    Router::new()
        .route("/", get(index))
        .route("/set", post(set_roi))
        .route("/get", get(get_roi))
        .route("/events", get(events))
        .fallback_service(files)
        .with_state(AppState { roi: state, web_dir })
        .layer(TraceLayer::new_for_http())
}

/// Serve the router on `addr` until the process is stopped.
pub async fn serve<P: AsRef<Path>>(addr: SocketAddr, web_dir: P) -> Result<()> {
    let app = create_router(RoiState::new(), &web_dir);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving '{}' on http://{}", web_dir.as_ref().display(), listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::roi::RoiColor;
    use std::time::Duration;

    fn roi(id: i32) -> RoiData {
        RoiData { data: vec![RoiColor { id, r: 1, g: 2, b: 3 }] }
    }

    #[test]
    fn the_initial_state_is_empty() {
        let state = RoiState::new();
        let current = state.current();
        assert_eq!(0, current.generation);
        assert!(current.roi.is_empty());
    }

    #[test]
    fn publishing_bumps_the_generation() {
        let state = RoiState::new();
        assert_eq!(1, state.publish(roi(1)));
        assert_eq!(2, state.publish(roi(2)));
        assert_eq!(2, state.current().roi.data[0].id);
    }

    #[test]
    fn publications_are_sent_record_by_record() {
        let publication = Publication { generation: 3, roi: Arc::new(RoiData { data: vec![
            RoiColor { id: 1, r: 0, g: 0, b: 0 },
            RoiColor { id: 2, r: 0, g: 0, b: 0 },
        ] }) };
        assert_eq!(3, publication.events().len());
    }

    #[tokio::test]
    async fn every_subscriber_sees_a_publication() {
        let state = RoiState::new();
        let mut first = Box::pin(state.publications());
        let mut second = Box::pin(state.publications());
        state.publish(roi(7));

        for stream in [&mut first, &mut second] {
            let publication = tokio::time::timeout(Duration::from_secs(2), stream.next()).await.unwrap().unwrap();
            assert_eq!(1, publication.generation);
            assert_eq!(7, publication.roi.data[0].id);
        }
    }

    #[tokio::test]
    async fn late_subscribers_get_the_current_state() {
        let state = RoiState::new();
        state.publish(roi(1));
        state.publish(roi(2));
        let mut late = Box::pin(state.publications());
        let publication = tokio::time::timeout(Duration::from_secs(2), late.next()).await.unwrap().unwrap();
        assert_eq!(2, publication.generation);
    }
}
