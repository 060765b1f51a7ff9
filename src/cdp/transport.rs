//! CDP Transport Layer
//!
//! Handles communication with Chrome via WebSocket.
//! Commands that flip on protocol domains the page can observe are filtered
//! out before they reach the wire.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{Error, Result};

/// Commands that are never sent (observable from page script)
const BLOCKED_COMMANDS: &[&str] = &[
    "Runtime.enable",
    "Runtime.disable",
    "Debugger.enable",
    "Debugger.disable",
    "Console.enable",
    "Console.disable",
];

/// Check if a command should be blocked
fn is_blocked(method: &str) -> bool {
    BLOCKED_COMMANDS.contains(&method)
}

/// A pending request waiting for a response, with the method it was for
type PendingRequest = (String, oneshot::Sender<Result<Value>>);

type PendingMap = Arc<std::sync::Mutex<HashMap<u64, PendingRequest>>>;

/// WebSocket message types
mod ws {
    pub const OPCODE_TEXT: u8 = 0x1;
    pub const OPCODE_CLOSE: u8 = 0x8;
    pub const OPCODE_PING: u8 = 0x9;
    pub const OPCODE_PONG: u8 = 0xA;
}

/// Encode a masked client text frame
fn encode_frame(opcode: u8, data: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let len = data.len();
    let mut frame = Vec::with_capacity(14 + len);

    // FIN + opcode
    frame.push(0x80 | opcode);

    // Mask bit set (client must mask), then length
    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len < 65536 {
        frame.push(0x80 | 126);
        frame.push((len >> 8) as u8);
        frame.push(len as u8);
    } else {
        frame.push(0x80 | 127);
        for i in (0..8).rev() {
            frame.push((len >> (i * 8)) as u8);
        }
    }

    frame.extend_from_slice(&mask);
    for (i, byte) in data.iter().enumerate() {
        frame.push(byte ^ mask[i % 4]);
    }
    frame
}

fn write_ws_frame(stream: &mut TcpStream, opcode: u8, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    // Random masking key per frame (RFC 6455)
    let frame = encode_frame(opcode, data, rand::random());
    stream.write_all(&frame)?;
    stream.flush()
}

/// Read a WebSocket frame, returns (opcode, payload)
fn read_ws_frame<R: std::io::Read>(stream: &mut R) -> std::io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header)?;

    let opcode = header[0] & 0x0F;
    let masked = (header[1] & 0x80) != 0;
    let mut len = (header[1] & 0x7F) as usize;

    if len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext)?;
        len = ((ext[0] as usize) << 8) | (ext[1] as usize);
    } else if len == 127 {
        let mut ext = [0u8; 8];
        stream.read_exact(&mut ext)?;
        len = 0;
        for byte in ext.iter() {
            len = (len << 8) | (*byte as usize);
        }
    }

    let mask = if masked {
        let mut m = [0u8; 4];
        stream.read_exact(&mut m)?;
        Some(m)
    } else {
        None
    };

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;

    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok((opcode, payload))
}

/// A parsed CDP event
#[derive(Debug, Clone)]
pub enum CdpMessage {
    Event {
        method: String,
        params: Value,
        session_id: Option<String>,
    },
}

/// CDP Transport - sends commands and receives responses via WebSocket
pub struct Transport {
    /// The Chrome child process
    child: Mutex<Child>,
    /// WebSocket stream for writing
    writer: Mutex<TcpStream>,
    /// Next message ID
    next_id: AtomicU64,
    /// Pending requests waiting for responses
    pending: PendingMap,
    /// Events pushed by the reader thread
    event_rx: Mutex<mpsc::UnboundedReceiver<CdpMessage>>,
}

impl Transport {
    /// Create a new transport connecting to Chrome via WebSocket
    pub fn new(child: Child, ws_url: &str) -> Result<Self> {
        let url = ws_url.trim_start_matches("ws://");
        let (host_port, path) = url.split_once('/').unwrap_or((url, ""));

        let mut stream = TcpStream::connect(host_port)
            .map_err(|e| Error::transport_io("Failed to connect to Chrome", e))?;

        let key = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            rand::random::<[u8; 16]>(),
        );

        let handshake = format!(
            "GET /{} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n",
            path, host_port, key
        );

        use std::io::{Read, Write};
        stream
            .write_all(handshake.as_bytes())
            .map_err(|e| Error::transport_io("Handshake write failed", e))?;

        let mut response = [0u8; 1024];
        let n = stream
            .read(&mut response)
            .map_err(|e| Error::transport_io("Handshake read failed", e))?;
        let response_str = String::from_utf8_lossy(&response[..n]);

        if !response_str.contains("101") {
            return Err(Error::transport(format!(
                "WebSocket handshake failed: {}",
                response_str
            )));
        }

        tracing::debug!("WebSocket connected to {}", ws_url);

        let reader_stream = stream
            .try_clone()
            .map_err(|e| Error::transport_io("Failed to clone stream", e))?;

        let pending: PendingMap = Arc::new(std::sync::Mutex::new(HashMap::new()));
        // Unbounded: the reader thread must never stall on a slow consumer,
        // or command responses queued behind events would stall with it.
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let pending_clone = Arc::clone(&pending);
        std::thread::spawn(move || {
            Self::reader_loop(reader_stream, pending_clone, event_tx);
        });

        Ok(Self {
            child: Mutex::new(child),
            writer: Mutex::new(stream),
            next_id: AtomicU64::new(1),
            pending,
            event_rx: Mutex::new(event_rx),
        })
    }

    /// Reader loop - runs in a separate thread to read from WebSocket
    fn reader_loop(
        mut stream: TcpStream,
        pending: PendingMap,
        event_tx: mpsc::UnboundedSender<CdpMessage>,
    ) {
        loop {
            let (opcode, payload) = match read_ws_frame(&mut stream) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!("WebSocket read error: {}", e);
                    break;
                }
            };

            match opcode {
                ws::OPCODE_TEXT => {
                    let msg: Value = match serde_json::from_slice(&payload) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!("Failed to parse CDP message: {}", e);
                            continue;
                        }
                    };
                    Self::route(msg, &pending, &event_tx);
                }
                ws::OPCODE_PING => {
                    if let Err(e) = write_ws_frame(&mut stream, ws::OPCODE_PONG, &payload) {
                        tracing::debug!("Failed to answer ping: {}", e);
                    }
                }
                ws::OPCODE_CLOSE => {
                    tracing::debug!("WebSocket closed by server");
                    break;
                }
                _ => {}
            }
        }

        // Fail everything still in flight so callers don't hang forever
        if let Ok(mut guard) = pending.lock() {
            for (_, (method, sender)) in guard.drain() {
                let _ = sender.send(Err(Error::transport(format!(
                    "Connection closed while waiting for {}",
                    method
                ))));
            }
        }

        tracing::debug!("CDP reader loop ended");
    }

    /// Hand a decoded message to its waiting request or the event channel
    fn route(msg: Value, pending: &PendingMap, event_tx: &mpsc::UnboundedSender<CdpMessage>) {
        if let Some(id) = msg.get("id").and_then(|v| v.as_u64()) {
            let entry = match pending.lock() {
                Ok(mut guard) => guard.remove(&id),
                Err(_) => None,
            };
            let Some((method, sender)) = entry else {
                tracing::trace!("Response for unknown id: {}", id);
                return;
            };

            let result = match msg.get("error") {
                Some(error) => Err(Error::cdp(
                    method,
                    error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1),
                    error
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown"),
                )),
                None => Ok(msg.get("result").cloned().unwrap_or(json!({}))),
            };
            let _ = sender.send(result);
        } else if let Some(method) = msg.get("method").and_then(|m| m.as_str()) {
            let params = msg.get("params").cloned().unwrap_or(json!({}));
            let session_id = msg
                .get("sessionId")
                .and_then(|s| s.as_str())
                .map(String::from);

            let _ = event_tx.send(CdpMessage::Event {
                method: method.to_string(),
                params,
                session_id,
            });
        }
    }

    /// Send a browser-level CDP command and wait for the response
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        self.dispatch(None, method, params).await
    }

    /// Send a CDP command to a specific session
    pub async fn send_to_session<C, R>(
        &self,
        session_id: &str,
        method: &str,
        params: &C,
    ) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        self.dispatch(Some(session_id), method, params).await
    }

    async fn dispatch<C, R>(&self, session_id: Option<&str>, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        // Blocked commands answer with an empty object (deserializes via #[serde(default)])
        if is_blocked(method) {
            tracing::debug!("Blocked CDP command: {}", method);
            return serde_json::from_value(json!({})).map_err(Into::into);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| Error::transport("Pending request map poisoned"))?
            .insert(id, (method.to_string(), tx));

        let mut msg = json!({
            "id": id,
            "method": method,
            "params": serde_json::to_value(params)?
        });
        if let Some(session_id) = session_id {
            msg["sessionId"] = json!(session_id);
        }

        let data = serde_json::to_string(&msg)?;

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_ws_frame(&mut writer, ws::OPCODE_TEXT, data.as_bytes()) {
                if let Ok(mut guard) = self.pending.lock() {
                    guard.remove(&id);
                }
                return Err(Error::transport_io("WebSocket write failed", e));
            }
        }

        tracing::trace!(
            "Sent CDP command: {} (id={}, session={:?})",
            method,
            id,
            session_id
        );

        let result = rx
            .await
            .map_err(|_| Error::transport("Response channel closed"))??;

        let response: R = serde_json::from_value(result)?;
        Ok(response)
    }

    /// Receive the next event from Chrome, `None` once the connection is gone
    pub async fn recv_event(&self) -> Option<CdpMessage> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await
    }

    /// Close the transport and kill Chrome
    pub async fn close(&self) -> Result<()> {
        {
            let mut writer = self.writer.lock().await;
            let _ = write_ws_frame(&mut writer, ws::OPCODE_CLOSE, &[]);
        }

        let mut child = self.child.lock().await;
        let _ = child.kill();
        let _ = child.wait();
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.try_lock() {
            let _ = child.kill();
        }
    }
}

/// Launch Chrome and get the WebSocket debugging URL
pub fn launch_chrome(path: &std::path::Path, args: &[String]) -> Result<(Child, String)> {
    use std::process::Command;

    let mut cmd = Command::new(path);
    cmd.args(args)
        .args(["--remote-debugging-port=0"]) // Let Chrome pick a free port
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped()); // DevTools URL is printed on stderr

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Launch(format!("Failed to launch Chrome: {}", e)))?;

    let stderr = child
        .stderr
        .take()
        .ok_or(Error::Launch("No stderr from Chrome".into()))?;

    let reader = BufReader::new(stderr);
    let mut ws_url = None;

    // Chrome prints: DevTools listening on ws://127.0.0.1:PORT/devtools/browser/GUID
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        tracing::trace!("Chrome stderr: {}", line);

        if let Some(url) = parse_devtools_url(&line) {
            ws_url = Some(url);
            break;
        }
    }

    let ws_url = ws_url.ok_or(Error::Launch(
        "Failed to get DevTools WebSocket URL from Chrome".into(),
    ))?;

    tracing::info!("Chrome DevTools URL: {}", ws_url);

    Ok((child, ws_url))
}

fn parse_devtools_url(line: &str) -> Option<String> {
    if !line.contains("DevTools listening on") {
        return None;
    }
    line.find("ws://").map(|start| line[start..].trim().to_string())
}
