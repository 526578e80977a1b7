//! Local UI endpoint: a single-connection HTTP listener routing the command
//! API through the core's UI adapter. Page assets and the captive portal
//! are served elsewhere; this surface is command + status only.

use core::fmt::Write as FmtWrite;

use defmt::warn;
use embassy_net::tcp::TcpSocket;
use embassy_time::Duration;
use embedded_io_async::Write;
use evse_core::ui::{render_status, route, UiResponse};
use heapless::String;

use crate::status::SharedEvseStatus;
use crate::tasks::{CommandSender, NetStack};

const HTTP_PORT: u16 = 80;
const REQUEST_BUF_LEN: usize = 1024;

#[embassy_executor::task]
pub async fn web_task(
    stack: &'static NetStack,
    commands: CommandSender,
    shared: &'static SharedEvseStatus,
) {
    let mut rx_buffer = [0u8; REQUEST_BUF_LEN];
    let mut tx_buffer = [0u8; REQUEST_BUF_LEN];
    let mut request = [0u8; REQUEST_BUF_LEN];

    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(Duration::from_secs(10)));
        if socket.accept(HTTP_PORT).await.is_err() {
            continue;
        }

        // Command requests are tiny; a single segment carries the whole
        // request in practice.
        let len = match socket.read(&mut request).await {
            Ok(0) | Err(_) => {
                socket.close();
                continue;
            }
            Ok(n) => n,
        };

        let response = match parse_request(&request[..len]) {
            Some((method, path, body)) => {
                let mut accepted = true;
                let resp = route(method, path, body, &mut |cmd| {
                    if commands.try_send(cmd).is_err() {
                        warn!("command queue full, dropped");
                        accepted = false;
                    }
                });
                if accepted {
                    resp
                } else {
                    UiResponse::BadRequest
                }
            }
            None => UiResponse::BadRequest,
        };

        let mut body: String<512> = String::new();
        let (code, reason) = match response {
            UiResponse::Accepted => ("200", "OK"),
            UiResponse::StatusJson => {
                let status = shared.get().await;
                if render_status(&status, &mut body).is_err() {
                    body.clear();
                }
                ("200", "OK")
            }
            UiResponse::BadRequest => ("400", "Bad Request"),
            UiResponse::NotFound => ("404", "Not Found"),
        };

        let mut header: String<160> = String::new();
        let _ = write!(
            header,
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            code,
            reason,
            body.len(),
        );
        let _ = socket.write_all(header.as_bytes()).await;
        if !body.is_empty() {
            let _ = socket.write_all(body.as_bytes()).await;
        }
        let _ = socket.flush().await;
        socket.close();
    }
}

// "<METHOD> <path> HTTP/1.1\r\n...\r\n\r\n<body>"
fn parse_request(raw: &[u8]) -> Option<(&str, &str, &str)> {
    let text = core::str::from_utf8(raw).ok()?;
    let line_end = text.find("\r\n")?;
    let mut parts = text[..line_end].split(' ');
    let method = parts.next()?;
    let path = parts.next()?;
    let body = match text.find("\r\n\r\n") {
        Some(i) => &text[i + 4..],
        None => "",
    };
    if method.is_empty() || !path.starts_with('/') {
        return None;
    }
    Some((method, path, body))
}
