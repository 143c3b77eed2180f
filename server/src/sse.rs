//! Server-sent events encoding for the `/stream` endpoint (spec §6 "Streaming").

use axum::response::sse::{Event, KeepAlive, Sse};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_core::Stream;
use tokio::sync::mpsc;
use vibetunnel_core::hub::Frame;

pub fn stream_response(
    mut rx: mpsc::Receiver<Frame>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let stream = async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            let event = match frame {
                Frame::Output { t_rel_ms, bytes } => {
                    let encoded = BASE64.encode(&bytes);
                    Event::default().event("output").data(format!("t={t_rel_ms};{encoded}"))
                }
                Frame::Resize { cols, rows } => {
                    Event::default().event("resize").data(format!("{cols}x{rows}"))
                }
                Frame::Exit { code } => {
                    let event = Event::default().event("exit").data(code.to_string());
                    yield Ok(event);
                    break;
                }
                Frame::Lag { skipped } => {
                    Event::default().event("lag").data(skipped.to_string())
                }
            };
            yield Ok(event);
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
