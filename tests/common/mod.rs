// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared fixtures for the integration tests in this directory: a minimal
//! hand-rolled HTTP/1.1 server (the Feeder only ever fetches over HTTP, per
//! spec §4.2, so this is what stands in for a real streaming source) and a
//! polling wait helper.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

pub fn silent_pcm_frames(frames: usize) -> Vec<u8> {
    vec![0u8; frames * 4] // S16_LE, stereo: 4 bytes/frame
}

fn write_http_response(mut stream: TcpStream, body: &[u8], content_type: &str) {
    let mut header_buf = [0u8; 1024];
    let _ = stream.read(&mut header_buf); // discard the request line/headers
    let status = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(status.as_bytes());
    let _ = stream.write_all(body);
}

/// Serve `body` in full, with the given content type, to whichever single
/// connection arrives first.
pub fn serve_once_as(body: Vec<u8>, content_type: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    let content_type = content_type.to_string();
    std::thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            write_http_response(stream, &body, &content_type);
        }
    });
    format!("http://{addr}/stream")
}

pub fn serve_once(body: Vec<u8>) -> String {
    serve_once_as(body, "audio/pcm")
}

/// Serve only the first `truncate_at` bytes of `body`, then close the
/// connection without writing the rest — simulates a dropped connection
/// mid-track (spec §8 scenario 2).
pub fn serve_truncated(body: Vec<u8>, truncate_at: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        if let Ok(mut stream) = listener.accept().map(|(s, _)| s) {
            let mut header_buf = [0u8; 1024];
            let _ = stream.read(&mut header_buf);
            let status = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: audio/pcm\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(status.as_bytes());
            let _ = stream.write_all(&body[..truncate_at.min(body.len())]);
            // Socket closes here on drop; the client sees a short body.
        }
    });
    format!("http://{addr}/stream")
}

pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return predicate();
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
