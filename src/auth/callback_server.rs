//! Local HTTP callback server for OAuth authentication.
//!
//! Provides a temporary localhost server to receive the OAuth redirect,
//! display a result page in the browser, and hand the URL back to the CLI.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long a connected browser may take to send its request line.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Result from the callback server.
#[derive(Debug)]
pub enum CallbackResult {
    /// Successfully received callback with the full URL.
    Success(String),
    /// No callback arrived before the deadline.
    TimedOut,
    /// Error occurred.
    Error(String),
}

/// A bound loopback listener waiting for a single OAuth callback.
pub struct CallbackServer {
    listener: TcpListener,
    port: u16,
}

impl CallbackServer {
    /// Bind the callback server on `127.0.0.1:port`.
    ///
    /// Binding happens before the browser is opened so the redirect cannot race the listener.
    pub fn bind(port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        // Non-blocking so the deadline can be checked between accepts
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        info!("OAuth callback server listening on 127.0.0.1:{}", port);
        Ok(Self { listener, port })
    }

    /// The port actually bound.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for a single OAuth callback.
    ///
    /// Returns the full callback URL (including query parameters) when received.
    pub fn wait(self, timeout: Duration) -> CallbackResult {
        let deadline = Instant::now() + timeout;

        loop {
            if Instant::now() >= deadline {
                info!("Callback server timed out after {:?}", timeout);
                return CallbackResult::TimedOut;
            }

            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    debug!("Connection from {}", peer_addr);
                    if let Some(url) = handle_connection(stream, self.port) {
                        info!("OAuth callback received");
                        return CallbackResult::Success(url);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    return CallbackResult::Error(format!("Connection error: {}", e));
                }
            }
        }
    }
}

/// Handle an incoming HTTP connection.
///
/// Returns Some(url) if this was a valid OAuth callback, None otherwise.
fn handle_connection(mut stream: TcpStream, port: u16) -> Option<String> {
    if let Err(e) = prepare_stream(&stream) {
        warn!("Failed to configure callback connection: {}", e);
        return None;
    }

    let mut buffer = [0; 4096];
    let bytes_read = match stream.read(&mut buffer) {
        Ok(n) => n,
        Err(e) => {
            debug!("Failed to read request: {}", e);
            return None;
        }
    };

    let request = String::from_utf8_lossy(&buffer[..bytes_read]);
    let request_line = request.lines().next()?;
    debug!("Received request: {}", request_line);

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        send_response(&mut stream, 400, "Bad Request", "text/plain", "Bad Request");
        return None;
    }

    let method = parts[0];
    let path = parts[1];

    if method != "GET" {
        send_response(&mut stream, 405, "Method Not Allowed", "text/plain", "Method Not Allowed");
        return None;
    }

    if !path.starts_with("/callback") {
        send_response(&mut stream, 404, "Not Found", "text/plain", "Not Found");
        return None;
    }

    if path.contains("error=") {
        let page = result_page("Sign-in failed", &error_description(path));
        send_response(&mut stream, 200, "OK", "text/html; charset=utf-8", &page);
        // The CLI still needs the URL to report the error
        return Some(format!("http://localhost:{}{}", port, path));
    }

    if !path.contains("code=") {
        send_response(&mut stream, 400, "Bad Request", "text/plain", "Missing authorization code");
        return None;
    }

    let page = result_page(
        "Sign-in complete",
        "azurejit received your credentials. You can close this tab.",
    );
    send_response(&mut stream, 200, "OK", "text/html; charset=utf-8", &page);

    Some(format!("http://localhost:{}{}", port, path))
}

/// Put an accepted socket into blocking mode with a read timeout.
///
/// Accepted sockets inherit non-blocking mode on some platforms.
fn prepare_stream(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))
}

/// Extract `error_description` from a callback path.
fn error_description(path: &str) -> String {
    if let Some(start) = path.find("error_description=") {
        let start = start + "error_description=".len();
        let end = path[start..].find('&').map(|i| start + i).unwrap_or(path.len());
        let raw = path[start..end].replace('+', " ");
        urlencoding::decode(&raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| "Authentication failed".to_string())
    } else {
        "Authentication was cancelled or failed.".to_string()
    }
}

fn result_page(title: &str, message: &str) -> String {
    let message = message
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>{title}</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 4rem;">
<h1>{title}</h1>
<p>{message}</p>
</body>
</html>"#
    )
}

fn send_response(stream: &mut TcpStream, status: u16, reason: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        content_type,
        body.len(),
        body
    );

    if let Err(e) = stream
        .write_all(response.as_bytes())
        .and_then(|()| stream.flush())
    {
        debug!("Failed to send {} response: {}", status, e);
    }
}
