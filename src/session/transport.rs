// Duplex WebSocket plumbing for a session: one inbound command flow, one
// outbound notification flow, joined by the session outbox and a stop token.
use super::Session;
use crate::cache::outbox::Outbox;
use crate::cache::registry::WatcherRegistry;
use crate::error::{Error, Result};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Serve one client until it disconnects, its transport fails or `shutdown`
/// fires. Every subscription of the session is released before returning.
///
/// # Errors
///
/// Returns `Transport` if reading from or writing to the client failed
pub async fn run_session<S>(
    stream: WebSocketStream<S>,
    registry: Arc<WatcherRegistry>,
    queue_capacity: usize,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut session = Session::new(registry, queue_capacity);
    let id = session.id();
    info!("🔌 Session {} opened", id);

    let (sink, mut frames) = stream.split();
    let stop = shutdown.child_token();
    let writer = tokio::spawn(forward(sink, session.outbox().clone(), stop.clone()));

    let inbound = loop {
        let frame = tokio::select! {
            biased;
            () = stop.cancelled() => break Ok(()),
            frame = frames.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => session.handle_command(text.as_str()).await,
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => session.handle_command(text).await,
                Err(_) => warn!("⚠️ Session {}: ignoring non UTF-8 binary frame", id),
            },
            // tungstenite queues the pong reply itself
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                debug!("Session {} closed by client: {:?}", id, frame);
                break Ok(());
            }
            Some(Err(e)) => break Err(Error::Transport(e.to_string())),
            None => break Ok(()),
        }
    };

    stop.cancel();
    session.close();
    let outbound = writer
        .await
        .unwrap_or_else(|e| Err(Error::Transport(e.to_string())));
    info!("🔌 Session {} closed", id);

    match (inbound, outbound) {
        (Err(e), _) | (Ok(()), Err(e)) => {
            error!("❌ Session {} transport failure: {}", id, e);
            Err(e)
        }
        (Ok(()), Ok(())) => Ok(()),
    }
}

/// Drain the outbox into the socket until stopped. A write failure cancels
/// `stop` so the inbound flow ends too.
async fn forward<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    outbox: Arc<Outbox>,
    stop: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            message = outbox.pop() => message,
        };
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Dropping unserializable message: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(Message::text(text)).await {
            stop.cancel();
            return Err(Error::Transport(e.to_string()));
        }
    }

    if outbox.dropped() > 0 {
        debug!("{} messages were dropped for a slow client", outbox.dropped());
    }
    // The peer may already be gone
    let _ = sink.close().await;
    Ok(())
}
