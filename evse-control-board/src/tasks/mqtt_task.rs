//! Broker connection pump: socket ownership, reconnect pacing, last-will
//! registration and the liveness fail-safe. Everything protocol shaped is
//! in evse-core's pub/sub adapter.

use defmt::{info, warn};
use embassy_futures::select::{select, Either};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::IpAddress;
use embassy_time::{Duration, Instant, Timer};
use evse_core::charge::ChargeState;
use evse_core::command::Command;
use evse_core::config::AppConfig;
use evse_core::mqtt::{MqttBus, MQTT_LWT_PAYLOAD, MQTT_RECONNECT_INTERVAL};
use heapless::{String, Vec};
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::utils::rng_generator::CountingRng;

use crate::config::DEVICE_ID;
use crate::status::SharedEvseStatus;
use crate::tasks::{CommandSender, NetStack};

const PACKET_BUF_LEN: usize = 1024;
const KEEPALIVE_PING: Duration = Duration::from_secs(30);

// A publish staged by the sans-IO adapter, waiting for an async send slot.
type StagedPublish = (String<128>, String<512>, bool);
type Outbox = Vec<StagedPublish, 20>;

fn stage(outbox: &mut Outbox, topic: &str, payload: &str, retain: bool) {
    let mut t: String<128> = String::new();
    let mut p: String<512> = String::new();
    if t.push_str(topic).is_err() || p.push_str(payload).is_err() {
        warn!("publish dropped, exceeds staging capacity");
        return;
    }
    if outbox.push((t, p, retain)).is_err() {
        warn!("publish dropped, outbox full");
    }
}

pub async fn resolve(stack: &'static NetStack, host: &str) -> Option<IpAddress> {
    if let Some(octets) = parse_ipv4(host) {
        return Some(IpAddress::v4(octets[0], octets[1], octets[2], octets[3]));
    }
    match stack.dns_query(host, DnsQueryType::A).await {
        Ok(addrs) => addrs.first().copied(),
        Err(_) => {
            warn!("DNS lookup failed for {}", host);
            None
        }
    }
}

pub fn parse_ipv4(host: &str) -> Option<[u8; 4]> {
    let mut octets = [0u8; 4];
    let mut parts = host.split('.');
    for octet in octets.iter_mut() {
        *octet = parts.next()?.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(octets)
}

#[embassy_executor::task]
pub async fn mqtt_task(
    stack: &'static NetStack,
    cfg: AppConfig,
    commands: CommandSender,
    shared: &'static SharedEvseStatus,
) {
    if !cfg.mqtt_enabled || cfg.mqtt_host.is_empty() {
        info!("MQTT interface inactive (no broker configured)");
        return;
    }

    let mut bus = MqttBus::new(
        DEVICE_ID,
        cfg.mqtt_failsafe_enabled,
        cfg.mqtt_failsafe_timeout_s,
    );
    let mut disconnected_since = Some(Instant::now());

    loop {
        // Broker-liveness fail-safe: a long outage stops a running charge.
        if let Some(since) = disconnected_since {
            if bus.failsafe_due(Instant::now().duration_since(since)) {
                let status = shared.get().await;
                if status.charge_state == ChargeState::Charging {
                    warn!("broker fail-safe elapsed, stopping charge");
                    let _ = commands.try_send(Command::Stop);
                }
            }
        }

        stack.wait_config_up().await;
        let Some(addr) = resolve(stack, &cfg.mqtt_host).await else {
            Timer::after(MQTT_RECONNECT_INTERVAL).await;
            continue;
        };

        let mut rx_buffer = [0u8; PACKET_BUF_LEN];
        let mut tx_buffer = [0u8; PACKET_BUF_LEN];
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(Duration::from_secs(60)));
        if socket.connect((addr, cfg.mqtt_port)).await.is_err() {
            warn!("broker TCP connect failed");
            Timer::after(MQTT_RECONNECT_INTERVAL).await;
            continue;
        }

        let state_topic = bus.state_topic();
        let mut mqtt_config: ClientConfig<'_, 5, CountingRng> =
            ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20000));
        mqtt_config.add_client_id(DEVICE_ID);
        if !cfg.mqtt_user.is_empty() {
            mqtt_config.add_username(&cfg.mqtt_user);
            mqtt_config.add_password(&cfg.mqtt_pass);
        }
        mqtt_config.add_will(&state_topic, MQTT_LWT_PAYLOAD.as_bytes(), true);
        mqtt_config.max_packet_size = PACKET_BUF_LEN as u32;

        let mut recv_buffer = [0u8; PACKET_BUF_LEN];
        let mut write_buffer = [0u8; PACKET_BUF_LEN];
        let mut client = MqttClient::new(
            socket,
            &mut write_buffer,
            PACKET_BUF_LEN,
            &mut recv_buffer,
            PACKET_BUF_LEN,
            mqtt_config,
        );

        if client.connect_to_broker().await.is_err() {
            warn!("broker MQTT connect failed");
            Timer::after(MQTT_RECONNECT_INTERVAL).await;
            continue;
        }
        info!("broker connected");
        disconnected_since = None;

        let mut session_ok = true;
        for topic in bus.subscription_topics() {
            if client.subscribe_to_topic(topic.as_str()).await.is_err() {
                warn!("subscribe failed for {}", topic.as_str());
                session_ok = false;
                break;
            }
        }

        let mut outbox = Outbox::new();
        if session_ok {
            let status = shared.get().await;
            bus.on_connected(&status, &mut |t: &str, p: &str, retain: bool| {
                stage(&mut outbox, t, p, retain)
            });
            session_ok = flush(&mut client, &mut outbox).await;
        }

        let mut last_ping = Instant::now();
        while session_ok {
            match select(client.receive_message(), Timer::after(Duration::from_millis(250))).await
            {
                Either::First(Ok((topic, payload))) => {
                    // Copy out of the client's receive buffer before we need
                    // it again for sends.
                    let mut topic_buf: String<128> = String::new();
                    let mut payload_buf: Vec<u8, 160> = Vec::new();
                    let truncated = topic_buf.push_str(topic).is_err()
                        || payload_buf.extend_from_slice(payload).is_err();
                    if truncated {
                        warn!("inbound packet too large, dropped");
                        continue;
                    }
                    bus.handle_message(
                        &topic_buf,
                        &payload_buf,
                        &mut |cmd| {
                            if commands.try_send(cmd).is_err() {
                                warn!("command queue full, dropped");
                            }
                        },
                        &mut |t: &str, p: &str, retain: bool| stage(&mut outbox, t, p, retain),
                    );
                    session_ok = flush(&mut client, &mut outbox).await;
                }
                Either::First(Err(_)) => {
                    warn!("broker connection lost");
                    session_ok = false;
                }
                Either::Second(_) => {
                    let status = shared.get().await;
                    bus.publish_changes(&status, &mut |t: &str, p: &str, retain: bool| {
                        stage(&mut outbox, t, p, retain)
                    });
                    session_ok = flush(&mut client, &mut outbox).await;

                    if session_ok && Instant::now().duration_since(last_ping) >= KEEPALIVE_PING {
                        session_ok = client.send_ping().await.is_ok();
                        last_ping = Instant::now();
                    }
                }
            }
        }

        disconnected_since = Some(Instant::now());
        Timer::after(MQTT_RECONNECT_INTERVAL).await;
    }
}

async fn flush<'a, T, R>(
    client: &mut MqttClient<'a, T, 5, R>,
    outbox: &mut Outbox,
) -> bool
where
    T: embedded_io_async::Read + embedded_io_async::Write,
    R: rand_core::RngCore,
{
    for (topic, payload, retain) in outbox.iter() {
        if client
            .send_message(
                topic.as_str(),
                payload.as_bytes(),
                QualityOfService::QoS0,
                *retain,
            )
            .await
            .is_err()
        {
            warn!("publish failed, dropping session");
            outbox.clear();
            return false;
        }
    }
    outbox.clear();
    true
}
