//! OCPP back-office pump: TCP + WebSocket client handshake with the
//! `ocpp1.6` subprotocol, then text frames in and out of the core adapter.

use defmt::{info, warn};
use embassy_futures::select::{select, Either};
use embassy_net::tcp::TcpSocket;
use embassy_time::{Duration, Instant, Timer};
use embedded_io_async::Write;
use embedded_websocket::{
    WebSocket, WebSocketOptions, WebSocketReceiveMessageType, WebSocketSendMessageType,
};
use evse_core::config::AppConfig;
use evse_core::ocpp::{OcppClient, OCPP_SUBPROTOCOL};
use heapless::{String, Vec};
use rand_core::RngCore;

use crate::status::SharedEvseStatus;
use crate::tasks::{mqtt_task::resolve, CommandSender, NetStack};

const WS_BUF_LEN: usize = 1024;

type StagedFrames = Vec<String<512>, 4>;

// The websocket masking key source. Frame masking only needs to be
// unpredictable to middleboxes, not cryptographic.
struct TickRng(u64);

impl RngCore for TickRng {
    fn next_u32(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0 as u32
    }
    fn next_u64(&mut self) -> u64 {
        (self.next_u32() as u64) << 32 | self.next_u32() as u64
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let word = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

fn stage(frames: &mut StagedFrames, frame: &str) {
    let mut f: String<512> = String::new();
    if f.push_str(frame).is_err() || frames.push(f).is_err() {
        warn!("OCPP frame dropped, staging full");
    }
}

#[embassy_executor::task]
pub async fn ocpp_task(
    stack: &'static NetStack,
    cfg: AppConfig,
    commands: CommandSender,
    shared: &'static SharedEvseStatus,
) {
    if !cfg.ocpp_enabled || cfg.ocpp_host.is_empty() {
        info!("OCPP interface inactive");
        return;
    }
    if cfg.ocpp_use_tls {
        warn!("OCPP TLS endpoint configured but this build has no TLS stack, staying offline");
        return;
    }

    let reconnect = Duration::from_millis(cfg.ocpp_reconnect_ms.max(1000) as u64);

    loop {
        stack.wait_config_up().await;
        let Some(addr) = resolve(stack, &cfg.ocpp_host).await else {
            Timer::after(reconnect).await;
            continue;
        };

        let mut rx_buffer = [0u8; WS_BUF_LEN];
        let mut tx_buffer = [0u8; WS_BUF_LEN];
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(Duration::from_millis(
            cfg.ocpp_connect_timeout_ms.max(1000) as u64,
        )));
        if socket.connect((addr, cfg.ocpp_port)).await.is_err() {
            warn!("OCPP TCP connect failed");
            Timer::after(reconnect).await;
            continue;
        }

        // WebSocket client handshake with the OCPP subprotocol.
        let mut ws = WebSocket::new_client(TickRng(Instant::now().as_ticks() | 1));
        let sub_protocols = [OCPP_SUBPROTOCOL];
        let options = WebSocketOptions {
            path: &cfg.ocpp_url,
            host: &cfg.ocpp_host,
            origin: &cfg.ocpp_host,
            sub_protocols: Some(&sub_protocols),
            additional_headers: None,
        };
        let mut ws_buf = [0u8; WS_BUF_LEN];
        let Ok((len, ws_key)) = ws.client_connect(&options, &mut ws_buf) else {
            warn!("OCPP handshake build failed");
            Timer::after(reconnect).await;
            continue;
        };
        if socket.write_all(&ws_buf[..len]).await.is_err() {
            Timer::after(reconnect).await;
            continue;
        }
        let Ok(response_len) = socket.read(&mut ws_buf).await else {
            Timer::after(reconnect).await;
            continue;
        };
        if ws.client_accept(&ws_key, &ws_buf[..response_len]).is_err() {
            warn!("OCPP handshake rejected");
            Timer::after(reconnect).await;
            continue;
        }
        info!("OCPP connected");

        let mut ocpp = OcppClient::new(cfg.ocpp_heartbeat_s, Instant::now());
        let mut frames = StagedFrames::new();
        ocpp.on_connected(Instant::now(), &mut |f: &str| stage(&mut frames, f));
        if !send_frames(&mut socket, &mut ws, &mut frames).await {
            Timer::after(reconnect).await;
            continue;
        }

        let mut net_buf = [0u8; WS_BUF_LEN];
        let mut text_buf = [0u8; WS_BUF_LEN];
        'session: loop {
            match select(socket.read(&mut net_buf), Timer::after(Duration::from_millis(500))).await
            {
                Either::First(Ok(0)) | Either::First(Err(_)) => {
                    warn!("OCPP connection lost");
                    break 'session;
                }
                Either::First(Ok(n)) => {
                    let Ok(result) = ws.read(&net_buf[..n], &mut text_buf) else {
                        warn!("OCPP websocket framing error");
                        break 'session;
                    };
                    match result.message_type {
                        WebSocketReceiveMessageType::Text => {
                            if let Ok(text) = core::str::from_utf8(&text_buf[..result.len_to]) {
                                ocpp.on_text(
                                    text,
                                    &mut |f: &str| stage(&mut frames, f),
                                    &mut |cmd| {
                                        if commands.try_send(cmd).is_err() {
                                            warn!("command queue full, dropped");
                                        }
                                    },
                                );
                            }
                        }
                        WebSocketReceiveMessageType::Ping => {
                            let payload: Vec<u8, 125> =
                                Vec::from_slice(&text_buf[..result.len_to]).unwrap_or_default();
                            if let Ok(len) = ws.write(
                                WebSocketSendMessageType::Pong,
                                true,
                                &payload,
                                &mut net_buf,
                            ) {
                                let _ = socket.write_all(&net_buf[..len]).await;
                            }
                        }
                        WebSocketReceiveMessageType::CloseMustReply
                        | WebSocketReceiveMessageType::CloseCompleted => {
                            info!("OCPP server closed the session");
                            break 'session;
                        }
                        _ => {}
                    }
                    if !send_frames(&mut socket, &mut ws, &mut frames).await {
                        break 'session;
                    }
                }
                Either::Second(_) => {
                    let status = shared.get().await;
                    ocpp.poll(Instant::now(), &status, &mut |f: &str| stage(&mut frames, f));
                    if !send_frames(&mut socket, &mut ws, &mut frames).await {
                        break 'session;
                    }
                }
            }
        }

        Timer::after(reconnect).await;
    }
}

async fn send_frames<R: RngCore>(
    socket: &mut TcpSocket<'_>,
    ws: &mut WebSocket<R, embedded_websocket::Client>,
    frames: &mut StagedFrames,
) -> bool {
    let mut out_buf = [0u8; WS_BUF_LEN];
    for frame in frames.iter() {
        let Ok(len) = ws.write(
            WebSocketSendMessageType::Text,
            true,
            frame.as_bytes(),
            &mut out_buf,
        ) else {
            frames.clear();
            return false;
        };
        if socket.write_all(&out_buf[..len]).await.is_err() {
            frames.clear();
            return false;
        }
    }
    frames.clear();
    true
}
