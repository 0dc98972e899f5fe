//! Minimal HTTP/1.1 server serving one static body for download tests.
//!
//! Every GET answers 200 with the full body (or a configured error status).
//! Runs in a background thread until the process exits.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

/// Serve `body` on a random localhost port; returns the base URL.
pub fn start(body: Vec<u8>) -> String {
    start_with_status(body, 200)
}

/// Like `start`, but every response uses the given HTTP status.
pub fn start_with_status(body: Vec<u8>, status: u16) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            thread::spawn(move || handle(stream, &body, status));
        }
    });
    format!("http://127.0.0.1:{port}/video.mp4")
}

fn handle(mut stream: std::net::TcpStream, body: &[u8], status: u16) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 4096];
    match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(_) => {}
    }

    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Error",
    };
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    if status == 200 {
        let _ = stream.write_all(body);
    }
}
