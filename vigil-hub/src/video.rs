/**
 * FLUX VIDÉO - MJPEG multipart (multipart/x-mixed-replace; boundary=frame)
 *
 * Une frame par cycle de capture. Le flux se termine après plusieurs
 * échecs de capture consécutifs, ou quand le client se déconnecte.
 */

use crate::capture::Camera;
use crate::state::HubContext;
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

pub const BOUNDARY: &str = "frame";
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let head = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(head.len() + jpeg.len() + 2);
    part.put_slice(head.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

struct StreamState {
    camera: Arc<Camera>,
    ticker: Interval,
    failures: u32,
}

pub fn mjpeg_stream(camera: Arc<Camera>, every: Duration) -> impl Stream<Item = std::io::Result<Bytes>> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let state = StreamState { camera, ticker, failures: 0 };

    stream::unfold(state, |mut st| async move {
        loop {
            st.ticker.tick().await;
            match st.camera.grab().await {
                Ok(jpeg) => {
                    st.failures = 0;
                    return Some((Ok(mjpeg_part(&jpeg)), st));
                }
                Err(e) => {
                    st.failures += 1;
                    warn!(error = %e, failures = st.failures, "video frame capture failed");
                    if st.failures >= MAX_CONSECUTIVE_FAILURES {
                        debug!("ending video stream");
                        return None;
                    }
                }
            }
        }
    })
}

pub async fn stream_video(State(ctx): State<HubContext>) -> Response {
    let body = Body::from_stream(mjpeg_stream(ctx.camera.clone(), ctx.stream_interval));
    (
        [
            (header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={BOUNDARY}")),
            (header::CACHE_CONTROL, "no-cache, no-store".to_string()),
        ],
        body,
    )
        .into_response()
}
