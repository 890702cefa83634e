//! Live-reload hub.
//!
//! Browsers connect over a websocket and receive JSON [`Signal`]s. A single
//! pump thread owns every connection: it forwards [`Reload`] messages coming
//! from the task graph and relays ghost-mode interactions (scroll, clicks,
//! form input) between browsers when the matching [`Ghost`] flag is on.

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tungstenite::{Message, WebSocket};

use crate::config::Ghost;
use crate::core::Reload;

const POLL: Duration = Duration::from_millis(50);
const MAX_CLIENTS: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum Signal {
    Reload,
    Inject { path: String },
    Scroll { x: f64, y: f64 },
    Click { selector: String },
    Form { selector: String, value: String },
}

impl From<Reload> for Signal {
    fn from(reload: Reload) -> Self {
        match reload {
            Reload::Full => Signal::Reload,
            Reload::Inject(path) => Signal::Inject { path },
        }
    }
}

/// Whether a signal sent by one browser may be mirrored to the others.
/// Browsers can never trigger reloads.
pub(crate) fn relayed(ghost: Ghost, signal: &Signal) -> bool {
    match signal {
        Signal::Scroll { .. } => ghost.scroll,
        Signal::Click { .. } => ghost.clicks,
        Signal::Form { .. } => ghost.forms,
        Signal::Reload | Signal::Inject { .. } => false,
    }
}

/// A running hub.
pub(crate) struct Hub {
    pub port: u16,
    pub sender: Sender<Reload>,
    _threads: [JoinHandle<()>; 2],
}

impl Hub {
    pub(crate) fn start(port: u16, ghost: Ghost) -> std::io::Result<Self> {
        let (listener, port) = reserve_port(port)?;
        let (tx_client, rx_client) = channel();
        let (sender, rx_reload) = channel();

        let incoming = new_thread_ws_incoming(listener, tx_client);
        let pump = std::thread::spawn(move || pump(rx_reload, rx_client, ghost));

        tracing::info!(port, "live-reload server listening");

        Ok(Self {
            port,
            sender,
            _threads: [incoming, pump],
        })
    }
}

fn reserve_port(port: u16) -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(
    server: TcpListener,
    clients: Sender<WebSocket<TcpStream>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("live-reload connection failed: {e}");
                    continue;
                }
            };

            let socket = match tungstenite::accept(stream) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::warn!("live-reload handshake failed: {e}");
                    continue;
                }
            };

            if let Err(e) = socket.get_ref().set_nonblocking(true) {
                tracing::warn!("dropping live-reload client: {e}");
                continue;
            }

            if clients.send(socket).is_err() {
                break;
            }
        }
    })
}

fn pump(
    reloads: Receiver<Reload>,
    incoming: Receiver<WebSocket<TcpStream>>,
    ghost: Ghost,
) {
    let mut clients: Vec<WebSocket<TcpStream>> = Vec::new();

    loop {
        match reloads.recv_timeout(POLL) {
            Ok(reload) => {
                let signal = Signal::from(reload);
                tracing::debug!(?signal, clients = clients.len(), "broadcasting");
                broadcast(&mut clients, None, &signal);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        clients.extend(incoming.try_iter());

        let len = clients.len();
        if len > MAX_CLIENTS {
            for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                socket.close(None).ok();
            }
        }

        let mut relay = Vec::new();
        let mut broken = Vec::new();

        for (i, socket) in clients.iter_mut().enumerate() {
            loop {
                match socket.read() {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Signal>(text.as_str()) {
                        Ok(signal) if relayed(ghost, &signal) => relay.push((i, signal)),
                        Ok(_) => {}
                        Err(e) => tracing::debug!("ignoring client message: {e}"),
                    },
                    Ok(Message::Close(_)) => {
                        broken.push(i);
                        break;
                    }
                    Ok(_) => {}
                    Err(tungstenite::Error::Io(e)) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(_) => {
                        broken.push(i);
                        break;
                    }
                }
            }
        }

        for (origin, signal) in relay {
            broadcast(&mut clients, Some(origin), &signal);
        }

        for i in broken.into_iter().rev() {
            clients.remove(i);
        }
    }
}

fn broadcast(clients: &mut [WebSocket<TcpStream>], skip: Option<usize>, signal: &Signal) {
    let text = match serde_json::to_string(signal) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("couldn't encode {signal:?}: {e}");
            return;
        }
    };

    for (i, socket) in clients.iter_mut().enumerate() {
        if Some(i) == skip {
            continue;
        }

        match socket.send(Message::text(text.clone())) {
            Ok(_) => {}
            Err(tungstenite::Error::Io(e)) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => tracing::debug!("live-reload client unreachable: {e}"),
        }
    }
}

/// Browser side of the hub, injected into proxied HTML pages.
pub(crate) fn client_script(port: u16, ghost: Ghost) -> String {
    format!(
        r##"<script>
(() => {{
  const ghost = {{ scroll: {scroll}, clicks: {clicks}, forms: {forms} }};
  const socket = new WebSocket("ws://" + location.hostname + ":{port}");
  let mirroring = false;
  const send = (msg) => {{
    if (!mirroring && socket.readyState === WebSocket.OPEN) socket.send(JSON.stringify(msg));
  }};
  const selector = (el) => {{
    const parts = [];
    for (; el && el.nodeType === 1 && el !== document.body; el = el.parentElement) {{
      if (el.id) {{ parts.unshift("#" + el.id); break; }}
      const index = Array.prototype.indexOf.call(el.parentElement.children, el) + 1;
      parts.unshift(el.tagName.toLowerCase() + ":nth-child(" + index + ")");
    }}
    return parts.length ? parts.join(" > ") : "body";
  }};
  const inject = (path) => {{
    let found = false;
    document.querySelectorAll('link[rel="stylesheet"]').forEach((link) => {{
      const url = new URL(link.href, location.href);
      if (url.pathname.endsWith("/" + path)) {{
        url.searchParams.set("canham", Date.now());
        link.href = url.toString();
        found = true;
      }}
    }});
    if (!found) location.reload();
  }};
  socket.addEventListener("message", (event) => {{
    const msg = JSON.parse(event.data);
    mirroring = true;
    try {{
      switch (msg.type) {{
        case "reload": location.reload(); break;
        case "inject": inject(msg.path); break;
        case "scroll": window.scrollTo(msg.x, msg.y); break;
        case "click": {{ const el = document.querySelector(msg.selector); if (el) el.click(); break; }}
        case "form": {{ const el = document.querySelector(msg.selector); if (el) el.value = msg.value; break; }}
      }}
    }} finally {{
      mirroring = false;
    }}
  }});
  if (ghost.scroll) {{
    let pending = false;
    window.addEventListener("scroll", () => {{
      if (pending) return;
      pending = true;
      setTimeout(() => {{ pending = false; send({{ type: "scroll", x: window.scrollX, y: window.scrollY }}); }}, 50);
    }});
  }}
  if (ghost.clicks) {{
    document.addEventListener("click", (e) => send({{ type: "click", selector: selector(e.target) }}), true);
  }}
  if (ghost.forms) {{
    document.addEventListener("input", (e) => send({{ type: "form", selector: selector(e.target), value: e.target.value }}), true);
  }}
}})();
</script>"##,
        scroll = ghost.scroll,
        clicks = ghost.clicks,
        forms = ghost.forms,
    )
}
