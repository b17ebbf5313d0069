/**
 * MQTT CONNECTION - rumqttc implementation of the broker boundary
 *
 * ROLE: one `AsyncClient` + `EventLoop` pair per broker session.
 *
 * HOW IT WORKS:
 * - rumqttc only talks to the network while the event loop is polled, so
 *   connect / subscribe poll until the matching ack arrives (ConnAck, SubAck).
 * - `recv` keeps polling and hands out PUBLISH packets. A dropped link is
 *   retried by rumqttc on the next poll; the subscription is re-issued when the
 *   new ConnAck arrives because sessions are clean.
 * - `disconnect` sends DISCONNECT and drains the loop inside the grace period.
 *
 * URLS: tcp:// and mqtt:// (plain, port 1883), ssl:// tls:// mqtts:// (TLS with
 * the platform root store, port 8883).
 */

use async_trait::async_trait;
use catalog_core::broker::{CONNECT_TIMEOUT, DISCONNECT_GRACE};
use catalog_core::{BrokerConnection, BrokerDescriptor, ConnectionError, Connector, InboundMessage};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode, Transport};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Split a broker URL into host, port and transport.
pub fn parse_broker_url(url: &str) -> Result<Endpoint, ConnectionError> {
    let invalid = |reason: &str| ConnectionError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let (scheme, rest) = url.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
    let tls = match scheme.to_ascii_lowercase().as_str() {
        "tcp" | "mqtt" => false,
        "ssl" | "tls" | "mqtts" => true,
        _ => return Err(invalid("unsupported scheme")),
    };
    let default_port = if tls { 8883 } else { 1883 };

    let authority = rest.split('/').next().unwrap_or_default();
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, tail) = bracketed.split_once(']').ok_or_else(|| invalid("unclosed IPv6 bracket"))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().map_err(|_| invalid("bad port"))?,
            None => default_port,
        };
        (host, port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, p)) => (host, p.parse().map_err(|_| invalid("bad port"))?),
            None => (authority, default_port),
        }
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    Ok(Endpoint {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Opens rumqttc connections from broker descriptors.
#[derive(Debug, Default, Clone)]
pub struct MqttConnector;

impl MqttConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for MqttConnector {
    fn open(&self, descriptor: &BrokerDescriptor) -> Result<Box<dyn BrokerConnection>, ConnectionError> {
        let endpoint = parse_broker_url(&descriptor.url)?;

        let mut options = MqttOptions::new(descriptor.client_id(), endpoint.host.clone(), endpoint.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        if let Some(username) = descriptor.username.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(username, descriptor.password.clone().unwrap_or_default());
        }
        if endpoint.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        debug!(broker_id = %descriptor.id, host = %endpoint.host, port = endpoint.port, tls = endpoint.tls, "mqtt client created");

        Ok(Box::new(MqttConnection {
            broker_id: descriptor.id.clone(),
            client,
            eventloop,
            filter: None,
            pending: VecDeque::new(),
        }))
    }
}

pub struct MqttConnection {
    broker_id: String,
    client: AsyncClient,
    eventloop: EventLoop,
    filter: Option<String>,
    // publishes that raced ahead of the SubAck
    pending: VecDeque<InboundMessage>,
}

impl MqttConnection {
    async fn await_connack(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(ConnectionError::Connect(e.to_string())),
            }
        }
    }

    async fn await_suback(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if ack.return_codes.iter().any(|code| matches!(code, SubscribeReasonCode::Failure)) {
                        return Err(ConnectionError::Subscribe("broker refused the subscription".into()));
                    }
                    return Ok(());
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.pending
                        .push_back(InboundMessage::new(publish.topic, publish.payload.to_vec()));
                }
                Ok(_) => {}
                Err(e) => return Err(ConnectionError::Subscribe(e.to_string())),
            }
        }
    }

    async fn drain_until_closed(&mut self) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }
}

#[async_trait]
impl BrokerConnection for MqttConnection {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        timeout(CONNECT_TIMEOUT, self.await_connack())
            .await
            .map_err(|_| ConnectionError::Timeout(CONNECT_TIMEOUT))?
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), ConnectionError> {
        self.client
            .subscribe(filter, QoS::AtMostOnce)
            .await
            .map_err(|e| ConnectionError::Subscribe(e.to_string()))?;

        timeout(CONNECT_TIMEOUT, self.await_suback())
            .await
            .map_err(|_| ConnectionError::Timeout(CONNECT_TIMEOUT))??;

        self.filter = Some(filter.to_string());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<InboundMessage>, ConnectionError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok(Some(InboundMessage::new(publish.topic, publish.payload.to_vec())));
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(broker_id = %self.broker_id, "reconnected to broker");
                    if let Some(filter) = self.filter.clone() {
                        self.client
                            .subscribe(filter, QoS::AtMostOnce)
                            .await
                            .map_err(|e| ConnectionError::Subscribe(e.to_string()))?;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(broker_id = %self.broker_id, error = %e, "connection lost, retrying");
                    sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        let leave = async {
            self.client
                .disconnect()
                .await
                .map_err(|e| ConnectionError::Disconnected(e.to_string()))?;
            self.drain_until_closed().await;
            Ok::<(), ConnectionError>(())
        };

        timeout(DISCONNECT_GRACE, leave)
            .await
            .map_err(|_| ConnectionError::Timeout(DISCONNECT_GRACE))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    // MQTT 3.1.1 control packet types
    const CONNECT: u8 = 1;
    const SUBSCRIBE: u8 = 8;
    const DISCONNECT: u8 = 14;
    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
    const TEST_DEADLINE: Duration = Duration::from_secs(10);

    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            len |= usize::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok((header >> 4, body))
    }

    /// Skip packets until one of `kind` arrives; None if the client hung up first.
    async fn next_packet_of(stream: &mut TcpStream, kind: u8) -> Option<Vec<u8>> {
        loop {
            match read_packet(stream).await {
                Ok((k, body)) if k == kind => return Some(body),
                Ok(_) => {}
                Err(_) => return None,
            }
        }
    }

    /// Packet id and first topic filter of a SUBSCRIBE body.
    fn subscribe_details(body: &[u8]) -> (u16, String) {
        let pid = u16::from_be_bytes([body[0], body[1]]);
        let len = usize::from(u16::from_be_bytes([body[2], body[3]]));
        (pid, String::from_utf8(body[4..4 + len].to_vec()).unwrap())
    }

    fn suback(pid: u16, code: u8) -> Vec<u8> {
        let [hi, lo] = pid.to_be_bytes();
        vec![0x90, 0x03, hi, lo, code]
    }

    fn publish(topic: &str, payload: &[u8]) -> Vec<u8> {
        let remaining = 2 + topic.len() + payload.len();
        assert!(remaining < 128);
        let mut packet = vec![0x30, remaining as u8];
        packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    /// Accept one client, answer CONNECT and SUBSCRIBE, return the socket and filter.
    async fn accept_subscriber(listener: &TcpListener, before_suback: &[u8], code: u8) -> (TcpStream, String) {
        let (mut socket, _) = listener.accept().await.unwrap();
        next_packet_of(&mut socket, CONNECT).await.unwrap();
        socket.write_all(&CONNACK).await.unwrap();

        let body = next_packet_of(&mut socket, SUBSCRIBE).await.unwrap();
        let (pid, filter) = subscribe_details(&body);
        socket.write_all(before_suback).await.unwrap();
        socket.write_all(&suback(pid, code)).await.unwrap();
        (socket, filter)
    }

    async fn local_broker() -> (TcpListener, BrokerDescriptor) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, BrokerDescriptor::new("b1", format!("tcp://127.0.0.1:{port}")))
    }

    #[test]
    fn parses_plain_urls() {
        assert_eq!(
            parse_broker_url("tcp://localhost:1883").unwrap(),
            Endpoint {
                host: "localhost".into(),
                port: 1883,
                tls: false
            }
        );
        assert_eq!(parse_broker_url("mqtt://10.0.0.5").unwrap().port, 1883);
    }

    #[test]
    fn parses_tls_urls() {
        let endpoint = parse_broker_url("ssl://broker.example.com:8884").unwrap();
        assert!(endpoint.tls);
        assert_eq!(endpoint.port, 8884);
        assert_eq!(parse_broker_url("mqtts://broker.example.com").unwrap().port, 8883);
    }

    #[test]
    fn parses_ipv6_hosts() {
        let endpoint = parse_broker_url("tcp://[::1]:1884/").unwrap();
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.port, 1884);
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(parse_broker_url("localhost:1883").is_err());
        assert!(parse_broker_url("http://localhost:1883").is_err());
        assert!(parse_broker_url("tcp://localhost:notaport").is_err());
        assert!(parse_broker_url("tcp://:1883").is_err());
    }

    #[tokio::test]
    async fn connector_rejects_invalid_descriptor() {
        let descriptor = BrokerDescriptor::new("b1", "ftp://nowhere");
        assert!(matches!(
            MqttConnector::new().open(&descriptor),
            Err(ConnectionError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let descriptor = BrokerDescriptor::new("b1", format!("tcp://127.0.0.1:{port}"));
        let mut connection = MqttConnector::new().open(&descriptor).unwrap();
        assert!(matches!(
            connection.connect().await,
            Err(ConnectionError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn publishes_before_suback_are_delivered_first() {
        let (listener, descriptor) = local_broker().await;
        let broker = tokio::spawn(async move {
            let (mut socket, filter) = accept_subscriber(&listener, &publish("early/topic", b"first"), 0x00).await;
            socket.write_all(&publish("late/topic", b"second")).await.unwrap();
            let said_goodbye = next_packet_of(&mut socket, DISCONNECT).await.is_some();
            (filter, said_goodbye)
        });

        timeout(TEST_DEADLINE, async {
            let mut connection = MqttConnector::new().open(&descriptor).unwrap();
            connection.connect().await.unwrap();
            connection.subscribe("#").await.unwrap();

            let first = connection.recv().await.unwrap().unwrap();
            assert_eq!(first, InboundMessage::new("early/topic", b"first".to_vec()));
            let second = connection.recv().await.unwrap().unwrap();
            assert_eq!(second, InboundMessage::new("late/topic", b"second".to_vec()));

            connection.disconnect().await.unwrap();
        })
        .await
        .unwrap();

        let (filter, said_goodbye) = broker.await.unwrap();
        assert_eq!(filter, "#");
        assert!(said_goodbye);
    }

    #[tokio::test]
    async fn refused_subscription_is_an_error() {
        let (listener, descriptor) = local_broker().await;
        let broker = tokio::spawn(async move {
            let (mut socket, _) = accept_subscriber(&listener, &[], 0x80).await;
            // hold the socket open until the client leaves
            next_packet_of(&mut socket, DISCONNECT).await;
        });

        timeout(TEST_DEADLINE, async {
            let mut connection = MqttConnector::new().open(&descriptor).unwrap();
            connection.connect().await.unwrap();
            assert!(matches!(
                connection.subscribe("#").await,
                Err(ConnectionError::Subscribe(_))
            ));
            let _ = connection.disconnect().await;
        })
        .await
        .unwrap();

        broker.await.unwrap();
    }

    #[tokio::test]
    async fn resubscribes_after_reconnect() {
        let (listener, descriptor) = local_broker().await;
        let broker = tokio::spawn(async move {
            let (mut first, _) = accept_subscriber(&listener, &[], 0x00).await;
            first.shutdown().await.unwrap();
            drop(first);

            let (mut second, filter) = accept_subscriber(&listener, &[], 0x00).await;
            second.write_all(&publish("after/reconnect", b"back")).await.unwrap();
            next_packet_of(&mut second, DISCONNECT).await;
            filter
        });

        timeout(TEST_DEADLINE, async {
            let mut connection = MqttConnector::new().open(&descriptor).unwrap();
            connection.connect().await.unwrap();
            connection.subscribe("#").await.unwrap();

            let message = connection.recv().await.unwrap().unwrap();
            assert_eq!(message.topic, "after/reconnect");
            assert_eq!(message.payload, b"back");

            connection.disconnect().await.unwrap();
        })
        .await
        .unwrap();

        assert_eq!(broker.await.unwrap(), "#");
    }
}
