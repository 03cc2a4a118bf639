//! The push channel that tells open tabs to refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use tokio::sync::broadcast;
use tracing::debug;

pub const RELOAD_PATH: &str = "/__livereload";
pub const RELOAD_MESSAGE: &str = "reload";
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(150);

/// Collapses bursts of change notifications into one `reload` broadcast.
///
/// The first notification arms a timer; everything that arrives before it
/// fires rides along.
#[derive(Clone)]
pub struct ReloadCoalescer {
    tx: broadcast::Sender<String>,
    pending: Arc<AtomicBool>,
    window: Duration,
}

impl ReloadCoalescer {
    pub fn new(window: Duration) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            pending: Arc::new(AtomicBool::new(false)),
            window,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Must be called from inside a tokio runtime.
    pub fn notify(&self) {
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let tx = self.tx.clone();
        let pending = self.pending.clone();
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            pending.store(false, Ordering::Release);
            // no receivers just means no tab is open
            let clients = tx.send(RELOAD_MESSAGE.to_string()).unwrap_or(0);
            debug!(clients, "sent reload");
        });
    }
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(reload): State<ReloadCoalescer>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket_connection(socket, reload.subscribe()))
}

async fn websocket_connection(mut socket: WebSocket, mut rx: broadcast::Receiver<String>) {
    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(reload) => {
                        if socket.send(Message::Text(reload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Insert the reload client before `</body>`, or append it when the
/// document has none.
pub fn inject_livereload_script(html: &str) -> String {
    let script = format!(
        r#"
<script>
(function() {{
    const scheme = location.protocol === 'https:' ? 'wss://' : 'ws://';
    const socket = new WebSocket(scheme + location.host + '{RELOAD_PATH}');
    socket.onmessage = function(event) {{
        if (event.data === '{RELOAD_MESSAGE}') {{
            location.reload();
        }}
    }};
    socket.onclose = function() {{
        console.log('yam: live reload disconnected');
    }};
}})();
</script>
"#
    );

    if let Some(pos) = html.rfind("</body>") {
        let mut result = String::with_capacity(html.len() + script.len());
        result.push_str(&html[..pos]);
        result.push_str(&script);
        result.push_str(&html[pos..]);
        result
    } else {
        format!("{html}{script}")
    }
}
