//! The protocol worker: the single task that owns the Topic Index and the
//! Session Table, and the `Broker` state it mutates.
//!
//! Every other task in the process — one read half and one write half per
//! connection — only ever touches its own socket and the two channels
//! described in `kindling-broker`'s crate docs. `Broker::run` is the loop
//! that drains the handoff queue and is the sole mutator of everything
//! below.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use kindling_core::{
    codec::Encoder,
    message::Message,
    qos::QoS,
};
use kindling_packets::{
    connack::{ConnAckPacket, ConnectReturnCode},
    connect::ConnectPacket,
    pingresp::PingRespPacket,
    puback::PubAckPacket,
    pubcomp::PubCompPacket,
    publish::PublishPacket,
    pubrec::PubRecPacket,
    pubrel::PubRelPacket,
    suback::{SubAckPacket, SubscribeResult},
    subscribe::SubscribePacket,
    unsuback::UnsubAckPacket,
    unsubscribe::UnsubscribePacket,
    ControlPacket,
};
use kindling_storage::RetainedMessageStore;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::auth::AuthConfig;
use crate::inflight::PendingAck;
use crate::session::{ClientHandle, Session};
use crate::stats::Stats;
use crate::topic_tree::TopicTree;

const CLIENT_ID_PREFIX: &str = "kindling";

fn generate_client_id() -> Arc<str> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let micros = now.as_secs() * 1_000_000 + u64::from(now.subsec_micros());
    Arc::from(format!("{CLIENT_ID_PREFIX}-{micros}"))
}

/// What the connection's read task learns back about a CONNECT it handed
/// off: the (possibly server-generated) client id, and whether the I/O
/// layer should keep reading or close once the CONNACK has flushed.
pub struct ConnectDecision {
    pub client_id: Arc<str>,
    pub accepted: bool,
}

/// A unit of work handed from a connection task to the protocol worker.
pub enum WorkerMessage {
    Connect {
        connect: ConnectPacket,
        writer: mpsc::Sender<Bytes>,
        close: oneshot::Sender<()>,
        reply: oneshot::Sender<ConnectDecision>,
    },
    Packet {
        client_id: Arc<str>,
        packet: ControlPacket,
    },
    Disconnected {
        client_id: Arc<str>,
    },
}

pub struct Broker<S: RetainedMessageStore> {
    sessions: HashMap<Arc<str>, Session>,
    clients: HashMap<Arc<str>, ClientHandle>,
    topics: TopicTree,
    storage: Arc<S>,
    stats: Arc<Stats>,
    auth: AuthConfig,
}

impl<S: RetainedMessageStore> Broker<S> {
    pub fn new(storage: Arc<S>, auth: AuthConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            clients: HashMap::new(),
            topics: TopicTree::new(),
            storage,
            stats: Arc::new(Stats::default()),
            auth,
        }
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// The protocol worker's main loop: the only place `Broker` state is
    /// ever mutated. Runs until every handoff sender has been dropped.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<WorkerMessage>) {
        while let Some(message) = inbox.recv().await {
            match message {
                WorkerMessage::Connect { connect, writer, close, reply } => {
                    let decision = self.handle_connect(connect, writer, close).await;
                    let _ = reply.send(decision);
                }
                WorkerMessage::Packet { client_id, packet } => {
                    self.handle_packet(client_id, packet).await;
                }
                WorkerMessage::Disconnected { client_id } => {
                    self.handle_disconnected(&client_id).await;
                }
            }
        }
    }

    async fn handle_packet(&mut self, client_id: Arc<str>, packet: ControlPacket) {
        self.stats.record_recv();

        let reply = match packet {
            ControlPacket::Publish(p) => self.handle_publish(&client_id, p).await,
            ControlPacket::PubAck(p) => {
                self.handle_puback(&client_id, p);
                None
            }
            ControlPacket::PubRec(p) => self.handle_pubrec(&client_id, p),
            ControlPacket::PubRel(p) => self.handle_pubrel(&client_id, p).await,
            ControlPacket::PubComp(p) => {
                self.handle_pubcomp(&client_id, p);
                None
            }
            ControlPacket::Subscribe(p) => self.handle_subscribe(&client_id, p).await,
            ControlPacket::Unsubscribe(p) => Some(self.handle_unsubscribe(&client_id, p)),
            ControlPacket::PingReq(_) => Some(ControlPacket::PingResp(PingRespPacket {})),
            ControlPacket::Disconnect(_) => {
                self.handle_graceful_disconnect(&client_id);
                self.clients.remove(client_id.as_ref());
                None
            }
            // CONNECT after the handshake, and any broker->client-only
            // packet type, is a protocol error: close the connection.
            _ => {
                warn!(%client_id, "protocol error, closing connection");
                if let Some(handle) = self.clients.remove(client_id.as_ref()) {
                    handle.force_close();
                }
                None
            }
        };

        if let Some(packet) = reply {
            self.send_to(&client_id, &packet);
        }
    }

    async fn handle_connect(
        &mut self,
        connect: ConnectPacket,
        writer: mpsc::Sender<Bytes>,
        close: oneshot::Sender<()>,
    ) -> ConnectDecision {
        self.stats.record_recv();

        let flags = connect.flags;
        let payload = connect.payload;

        if self.auth.require_auth {
            let username = payload.user_name.as_deref();
            let password = payload.password.as_deref();
            if !self.auth.check(username, password) {
                let nack = ControlPacket::ConnAck(ConnAckPacket::refused(
                    ConnectReturnCode::BadUsernameOrPassword,
                ));
                send_frame(&writer, &nack);
                return ConnectDecision {
                    client_id: Arc::from(""),
                    accepted: false,
                };
            }
        }

        if payload.client_id.is_empty() && !flags.clean_session {
            let nack = ControlPacket::ConnAck(ConnAckPacket::refused(ConnectReturnCode::NotAuthorized));
            send_frame(&writer, &nack);
            return ConnectDecision {
                client_id: Arc::from(""),
                accepted: false,
            };
        }

        let client_id: Arc<str> = if payload.client_id.is_empty() {
            generate_client_id()
        } else {
            Arc::from(payload.client_id.as_str())
        };

        if let Some(existing) = self.clients.remove(client_id.as_ref()) {
            info!(%client_id, "closing existing connection for duplicate client id");
            existing.force_close();
        }

        let had_prior_session = self.sessions.contains_key(client_id.as_ref());

        let session = self
            .sessions
            .entry(Arc::clone(&client_id))
            .or_insert_with(|| Session::new(Arc::clone(&client_id), flags.clean_session));

        session.clean_session = flags.clean_session;

        if flags.clean_session {
            self.topics.remove_client(&client_id);
            session.subscriptions.clear();
            session.outgoing_msgs.clear();
        }

        if flags.will_flag {
            if let Some(topic) = payload.will_topic.clone() {
                let will_payload = payload.will_payload.clone().unwrap_or_default();
                let message = Message::new(topic.clone(), will_payload, flags.will_qos, flags.will_retain);
                session.has_lwt = true;
                session.lwt = Some(message.clone());

                if flags.will_retain {
                    let _ = self.storage.store_retained(&topic, Some(message)).await;
                }
            }
        }

        let offline_messages = if !flags.clean_session && had_prior_session {
            session.drain_offline()
        } else {
            Default::default()
        };

        self.clients
            .insert(Arc::clone(&client_id), ClientHandle::new(Arc::clone(&client_id), writer.clone(), close));

        let session_present = had_prior_session && !flags.clean_session;
        let connack = ControlPacket::ConnAck(ConnAckPacket::accepted(session_present));
        send_frame(&writer, &connack);
        self.stats.record_sent();

        for message in offline_messages {
            self.deliver(&client_id, message);
        }

        ConnectDecision {
            client_id,
            accepted: true,
        }
    }

    async fn handle_publish(&mut self, client_id: &Arc<str>, publish: PublishPacket) -> Option<ControlPacket> {
        let reply = match publish.qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => publish.packet_id.map(|mid| ControlPacket::PubAck(PubAckPacket { packet_id: mid })),
            QoS::ExactlyOnce => {
                let mid = publish.packet_id?;
                let fresh = if let Some(session) = self.sessions.get_mut(client_id.as_ref()) {
                    let message = Message::new(
                        publish.topic_name.clone(),
                        publish.payload.clone(),
                        publish.qos,
                        publish.retain,
                    );
                    session.inflight.record_inbound(mid, message)
                } else {
                    true
                };

                if fresh {
                    self.fan_out(&publish).await;
                }
                return Some(ControlPacket::PubRec(PubRecPacket { packet_id: mid }));
            }
            QoS::Invalid => return None,
        };

        self.fan_out(&publish).await;
        reply
    }

    async fn fan_out(&mut self, publish: &PublishPacket) {
        if publish.retain {
            let retained = if publish.payload.is_empty() {
                None
            } else {
                Some(Message::new(
                    publish.topic_name.clone(),
                    publish.payload.clone(),
                    publish.qos,
                    true,
                ))
            };
            let _ = self.storage.store_retained(&publish.topic_name, retained).await;
        }

        let targets = self.topics.matching_subscribers(&publish.topic_name);
        for (subscriber_id, subscribed_qos) in targets {
            self.deliver_publish(&subscriber_id, publish, subscribed_qos);
        }
    }

    fn deliver_publish(&mut self, subscriber_id: &Arc<str>, publish: &PublishPacket, subscribed_qos: QoS) {
        let effective_qos = QoS::downgrade(publish.qos, subscribed_qos);

        let online = self.clients.contains_key(subscriber_id.as_ref());
        if !online {
            if let Some(session) = self.sessions.get_mut(subscriber_id.as_ref()) {
                if !session.clean_session {
                    let message = Message::new(
                        publish.topic_name.clone(),
                        publish.payload.clone(),
                        effective_qos,
                        publish.retain,
                    );
                    session.queue_offline(message);
                }
            }
            return;
        }

        let mut frame = PublishPacket {
            dup: false,
            qos: effective_qos,
            retain: publish.retain,
            topic_name: publish.topic_name.clone(),
            packet_id: None,
            payload: publish.payload.clone(),
        };

        if effective_qos != QoS::AtMostOnce {
            let Some(session) = self.sessions.get_mut(subscriber_id.as_ref()) else {
                return;
            };
            let Some(mid) = session.inflight.next_free_mid() else {
                warn!(client_id = %subscriber_id, topic = %publish.topic_name, "no free packet identifier, dropping publish");
                return;
            };
            frame.packet_id = Some(mid);

            let ack = if effective_qos == QoS::AtLeastOnce {
                PendingAck::PubAck
            } else {
                PendingAck::PubRec
            };
            let message = Message::new(
                frame.topic_name.clone(),
                frame.payload.clone(),
                effective_qos,
                frame.retain,
            );
            session.inflight.record_outbound(mid, message, ack);
        }

        self.send_to(subscriber_id, &ControlPacket::Publish(frame));
    }

    /// Delivers a previously-queued offline message on reconnect, matching
    /// the fan-out path's inflight bookkeeping for QoS > 0.
    fn deliver(&mut self, client_id: &Arc<str>, message: Message) {
        let publish = PublishPacket {
            dup: false,
            qos: message.qos,
            retain: message.retain,
            topic_name: message.topic.to_string(),
            packet_id: None,
            payload: message.payload,
        };
        self.deliver_publish(client_id, &publish, message.qos);
    }

    fn handle_puback(&mut self, client_id: &Arc<str>, ack: PubAckPacket) {
        if let Some(session) = self.sessions.get_mut(client_id.as_ref()) {
            session.inflight.complete_puback(ack.packet_id);
        }
    }

    fn handle_pubrec(&mut self, client_id: &Arc<str>, ack: PubRecPacket) -> Option<ControlPacket> {
        if let Some(session) = self.sessions.get_mut(client_id.as_ref()) {
            session.inflight.promote_to_pubrel(ack.packet_id);
        }
        Some(ControlPacket::PubRel(PubRelPacket { packet_id: ack.packet_id }))
    }

    async fn handle_pubrel(&mut self, client_id: &Arc<str>, rel: PubRelPacket) -> Option<ControlPacket> {
        if let Some(session) = self.sessions.get_mut(client_id.as_ref()) {
            session.inflight.complete_pubrel(rel.packet_id);
        }
        Some(ControlPacket::PubComp(PubCompPacket { packet_id: rel.packet_id }))
    }

    fn handle_pubcomp(&mut self, client_id: &Arc<str>, ack: PubCompPacket) {
        if let Some(session) = self.sessions.get_mut(client_id.as_ref()) {
            session.inflight.complete_pubcomp(ack.packet_id);
        }
    }

    async fn handle_subscribe(&mut self, client_id: &Arc<str>, subscribe: SubscribePacket) -> Option<ControlPacket> {
        let mut results = Vec::with_capacity(subscribe.payload.len());
        let mut retained_frames = Vec::new();

        for entry in &subscribe.payload {
            self.topics.subscribe(Arc::clone(client_id), &entry.topic_filter, entry.qos);

            if let Some(session) = self.sessions.get_mut(client_id.as_ref()) {
                if !session.clean_session {
                    session.subscriptions.insert(entry.topic_filter.clone());
                }
            }

            results.push(SubscribeResult::Granted(entry.qos));

            if let Ok(matches) = self.storage.get_retained(&entry.topic_filter).await {
                retained_frames.extend(matches);
            }
        }

        for message in retained_frames {
            let mut frame = PublishPacket {
                dup: false,
                qos: message.qos,
                retain: true,
                topic_name: message.topic.to_string(),
                packet_id: None,
                payload: message.payload,
            };

            if message.qos != QoS::AtMostOnce {
                let Some(session) = self.sessions.get_mut(client_id.as_ref()) else {
                    continue;
                };
                let Some(mid) = session.inflight.next_free_mid() else {
                    warn!(%client_id, topic = %frame.topic_name, "no free packet identifier, dropping retained publish");
                    continue;
                };
                frame.packet_id = Some(mid);

                let ack = if message.qos == QoS::AtLeastOnce {
                    PendingAck::PubAck
                } else {
                    PendingAck::PubRec
                };
                let outbound = Message::new(frame.topic_name.clone(), frame.payload.clone(), message.qos, true);
                session.inflight.record_outbound(mid, outbound, ack);
            }

            self.send_to(client_id, &ControlPacket::Publish(frame));
        }

        Some(ControlPacket::SubAck(SubAckPacket {
            packet_id: subscribe.packet_id,
            results,
        }))
    }

    fn handle_unsubscribe(&mut self, client_id: &Arc<str>, unsubscribe: UnsubscribePacket) -> ControlPacket {
        for filter in &unsubscribe.topic_filters {
            self.topics.unsubscribe(client_id, filter);
            if let Some(session) = self.sessions.get_mut(client_id.as_ref()) {
                session.subscriptions.remove(filter);
            }
        }

        ControlPacket::UnsubAck(UnsubAckPacket {
            packet_id: unsubscribe.packet_id,
        })
    }

    fn handle_graceful_disconnect(&mut self, client_id: &Arc<str>) {
        let clean = self
            .sessions
            .get(client_id.as_ref())
            .map(|s| s.clean_session)
            .unwrap_or(true);

        if clean {
            self.topics.remove_client(client_id);
            self.sessions.remove(client_id.as_ref());
        } else if let Some(session) = self.sessions.get_mut(client_id.as_ref()) {
            // A graceful DISCONNECT never publishes the Will, regardless of
            // session type.
            session.has_lwt = false;
            session.lwt = None;
        }
    }

    /// Called when a connection's read task observes EOF or an I/O error
    /// without a preceding DISCONNECT — the abrupt-close path, which does
    /// publish the Will if one is set.
    async fn handle_disconnected(&mut self, client_id: &Arc<str>) {
        self.clients.remove(client_id.as_ref());

        let will = self.sessions.get_mut(client_id.as_ref()).and_then(|s| {
            if s.has_lwt {
                s.has_lwt = false;
                s.lwt.take()
            } else {
                None
            }
        });

        let clean = self
            .sessions
            .get(client_id.as_ref())
            .map(|s| s.clean_session)
            .unwrap_or(true);

        if clean {
            self.topics.remove_client(client_id);
            self.sessions.remove(client_id.as_ref());
        }

        if let Some(message) = will {
            let publish = PublishPacket {
                dup: false,
                qos: message.qos,
                retain: message.retain,
                topic_name: message.topic.to_string(),
                packet_id: None,
                payload: message.payload,
            };
            self.fan_out(&publish).await;
        }
    }

    fn send_to(&mut self, client_id: &Arc<str>, packet: &ControlPacket) {
        let Some(handle) = self.clients.get(client_id.as_ref()) else {
            return;
        };

        let mut buffer = BytesMut::new();
        packet.encode(&mut buffer);

        if handle.request_write(buffer.freeze()) {
            self.stats.record_sent();
        } else {
            self.clients.remove(client_id.as_ref());
        }
    }
}

fn send_frame(writer: &mpsc::Sender<Bytes>, packet: &ControlPacket) {
    let mut buffer = BytesMut::new();
    packet.encode(&mut buffer);
    let _ = writer.try_send(buffer.freeze());
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindling_core::protocol::ProtocolVersion;
    use kindling_packets::connect::{ConnectFlags, ConnectPayload};
    use kindling_storage::memory::MemoryStore;

    fn connect(client_id: &str, clean_session: bool) -> ConnectPacket {
        ConnectPacket {
            protocol_version: ProtocolVersion::V3_1_1,
            flags: ConnectFlags {
                clean_session,
                ..Default::default()
            },
            keep_alive: 60,
            payload: ConnectPayload {
                client_id: client_id.to_string(),
                ..Default::default()
            },
        }
    }

    fn new_broker() -> Broker<MemoryStore> {
        Broker::new(Arc::new(MemoryStore::new()), AuthConfig::disabled())
    }

    /// A close signal nothing ever observes, for tests that don't exercise
    /// forced connection teardown.
    fn dummy_close() -> oneshot::Sender<()> {
        oneshot::channel().0
    }

    async fn recv_decoded(rx: &mut mpsc::Receiver<Bytes>) -> ControlPacket {
        let mut frame = bytes::BytesMut::from(&rx.recv().await.expect("frame expected")[..]);
        ControlPacket::parse(&mut frame).expect("decode failed")
    }

    #[tokio::test]
    async fn empty_client_id_with_clean_session_is_generated() {
        let mut broker = new_broker();
        let (tx, mut rx) = mpsc::channel(8);

        let decision = broker.handle_connect(connect("", true), tx, dummy_close()).await;
        assert!(decision.accepted);
        assert!(decision.client_id.starts_with("kindling-"));

        match recv_decoded(&mut rx).await {
            ControlPacket::ConnAck(ack) => assert_eq!(ack.return_code, ConnectReturnCode::Accepted),
            other => panic!("expected ConnAck, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_client_id_without_clean_session_is_rejected() {
        let mut broker = new_broker();
        let (tx, mut rx) = mpsc::channel(8);

        let decision = broker.handle_connect(connect("", false), tx, dummy_close()).await;
        assert!(!decision.accepted);

        match recv_decoded(&mut rx).await {
            ControlPacket::ConnAck(ack) => assert_eq!(ack.return_code, ConnectReturnCode::NotAuthorized),
            other => panic!("expected ConnAck, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_connect_with_same_id_closes_the_first() {
        let mut broker = new_broker();
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let (close1, close1_rx) = oneshot::channel();

        broker.handle_connect(connect("dup", true), tx1, close1).await;
        assert!(broker.clients.contains_key("dup"));

        let decision = broker.handle_connect(connect("dup", true), tx2, dummy_close()).await;
        assert!(decision.accepted);

        // The first connection's connection task is signaled to tear itself
        // down, not merely forgotten.
        assert!(close1_rx.await.is_ok());

        match recv_decoded(&mut rx2).await {
            ControlPacket::ConnAck(ack) => assert_eq!(ack.return_code, ConnectReturnCode::Accepted),
            other => panic!("expected ConnAck, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn qos0_publish_fans_out_without_packet_id() {
        let mut broker = new_broker();
        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        broker.handle_connect(connect("pub", true), tx_a, dummy_close()).await;
        broker.handle_connect(connect("sub", true), tx_b, dummy_close()).await;

        broker
            .handle_subscribe(
                &Arc::from("sub"),
                SubscribePacket {
                    packet_id: 1,
                    payload: vec![kindling_packets::subscribe::SubscribePayload {
                        topic_filter: "a/b".to_string(),
                        qos: QoS::AtMostOnce,
                    }],
                },
            )
            .await;
        recv_decoded(&mut rx_b).await; // SUBACK

        broker
            .handle_publish(
                &Arc::from("pub"),
                PublishPacket {
                    dup: false,
                    qos: QoS::AtMostOnce,
                    retain: false,
                    topic_name: "a/b".to_string(),
                    packet_id: None,
                    payload: Bytes::from("hi"),
                },
            )
            .await;

        match recv_decoded(&mut rx_b).await {
            ControlPacket::Publish(p) => {
                assert_eq!(p.packet_id, None);
                assert_eq!(p.payload, Bytes::from("hi"));
            }
            other => panic!("expected Publish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn qos_is_downgraded_to_the_subscribers_grant() {
        let mut broker = new_broker();
        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        broker.handle_connect(connect("pub", true), tx_a, dummy_close()).await;
        broker.handle_connect(connect("sub", true), tx_b, dummy_close()).await;

        broker
            .handle_subscribe(
                &Arc::from("sub"),
                SubscribePacket {
                    packet_id: 1,
                    payload: vec![kindling_packets::subscribe::SubscribePayload {
                        topic_filter: "a/b".to_string(),
                        qos: QoS::AtMostOnce,
                    }],
                },
            )
            .await;
        recv_decoded(&mut rx_b).await; // SUBACK

        broker
            .handle_publish(
                &Arc::from("pub"),
                PublishPacket {
                    dup: false,
                    qos: QoS::ExactlyOnce,
                    retain: false,
                    topic_name: "a/b".to_string(),
                    packet_id: Some(9),
                    payload: Bytes::from("hi"),
                },
            )
            .await;

        match recv_decoded(&mut rx_b).await {
            ControlPacket::Publish(p) => assert_eq!(p.qos, QoS::AtMostOnce),
            other => panic!("expected Publish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retained_message_is_delivered_on_subscribe_at_its_own_qos() {
        let mut broker = new_broker();
        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        broker.handle_connect(connect("pub", true), tx_a, dummy_close()).await;

        broker
            .handle_publish(
                &Arc::from("pub"),
                PublishPacket {
                    dup: false,
                    qos: QoS::AtLeastOnce,
                    retain: true,
                    topic_name: "a/b".to_string(),
                    packet_id: Some(1),
                    payload: Bytes::from("retained"),
                },
            )
            .await;

        broker.handle_connect(connect("sub", true), tx_b, dummy_close()).await;
        recv_decoded(&mut rx_b).await; // CONNACK

        broker
            .handle_subscribe(
                &Arc::from("sub"),
                SubscribePacket {
                    packet_id: 1,
                    payload: vec![kindling_packets::subscribe::SubscribePayload {
                        topic_filter: "a/b".to_string(),
                        qos: QoS::AtMostOnce,
                    }],
                },
            )
            .await;

        match recv_decoded(&mut rx_b).await {
            ControlPacket::Publish(p) => {
                assert!(p.retain);
                assert_eq!(p.qos, QoS::AtLeastOnce);
                assert_eq!(p.payload, Bytes::from("retained"));
            }
            other => panic!("expected retained Publish before SUBACK, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_non_clean_session_receives_queued_messages_on_reconnect() {
        let mut broker = new_broker();
        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        broker.handle_connect(connect("pub", true), tx_a, dummy_close()).await;
        broker.handle_connect(connect("sub", false), tx_b, dummy_close()).await;
        recv_decoded(&mut rx_b).await; // CONNACK

        broker
            .handle_subscribe(
                &Arc::from("sub"),
                SubscribePacket {
                    packet_id: 1,
                    payload: vec![kindling_packets::subscribe::SubscribePayload {
                        topic_filter: "a/b".to_string(),
                        qos: QoS::AtLeastOnce,
                    }],
                },
            )
            .await;
        recv_decoded(&mut rx_b).await; // SUBACK

        broker.clients.remove("sub");

        broker
            .handle_publish(
                &Arc::from("pub"),
                PublishPacket {
                    dup: false,
                    qos: QoS::AtLeastOnce,
                    retain: false,
                    topic_name: "a/b".to_string(),
                    packet_id: Some(2),
                    payload: Bytes::from("while offline"),
                },
            )
            .await;

        let (tx_b2, mut rx_b2) = mpsc::channel(8);
        broker.handle_connect(connect("sub", false), tx_b2, dummy_close()).await;
        recv_decoded(&mut rx_b2).await; // CONNACK

        match recv_decoded(&mut rx_b2).await {
            ControlPacket::Publish(p) => assert_eq!(p.payload, Bytes::from("while offline")),
            other => panic!("expected queued Publish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn qos2_exchange_runs_publish_pubrec_pubrel_pubcomp() {
        let mut broker = new_broker();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        broker.handle_connect(connect("c1", true), tx_a, dummy_close()).await;
        recv_decoded(&mut rx_a).await; // CONNACK

        let pubrec = broker
            .handle_publish(
                &Arc::from("c1"),
                PublishPacket {
                    dup: false,
                    qos: QoS::ExactlyOnce,
                    retain: false,
                    topic_name: "a/b".to_string(),
                    packet_id: Some(5),
                    payload: Bytes::from("qos2"),
                },
            )
            .await;
        assert!(matches!(pubrec, Some(ControlPacket::PubRec(p)) if p.packet_id == 5));

        let pubcomp = broker
            .handle_pubrel(&Arc::from("c1"), PubRelPacket { packet_id: 5 })
            .await;
        assert!(matches!(pubcomp, Some(ControlPacket::PubComp(p)) if p.packet_id == 5));
    }

    #[tokio::test]
    async fn duplicate_qos2_publish_does_not_fan_out_twice() {
        let mut broker = new_broker();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        broker.handle_connect(connect("pub", true), tx_a, dummy_close()).await;
        recv_decoded(&mut rx_a).await;
        broker.handle_connect(connect("sub", true), tx_b, dummy_close()).await;
        recv_decoded(&mut rx_b).await;

        broker
            .handle_subscribe(
                &Arc::from("sub"),
                SubscribePacket {
                    packet_id: 1,
                    payload: vec![kindling_packets::subscribe::SubscribePayload {
                        topic_filter: "a/b".to_string(),
                        qos: QoS::ExactlyOnce,
                    }],
                },
            )
            .await;
        recv_decoded(&mut rx_b).await; // SUBACK

        let publish = PublishPacket {
            dup: false,
            qos: QoS::ExactlyOnce,
            retain: false,
            topic_name: "a/b".to_string(),
            packet_id: Some(1),
            payload: Bytes::from("once"),
        };

        broker.handle_publish(&Arc::from("pub"), publish.clone()).await;
        recv_decoded(&mut rx_b).await; // the one fan-out delivery

        broker.handle_publish(&Arc::from("pub"), publish).await; // duplicate
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn abrupt_disconnect_publishes_the_will() {
        let mut broker = new_broker();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        let mut will_connect = connect("a1", true);
        will_connect.flags.will_flag = true;
        will_connect.payload.will_topic = Some("a1/status".to_string());
        will_connect.payload.will_payload = Some(Bytes::from("offline"));

        broker.handle_connect(will_connect, tx_a, dummy_close()).await;
        recv_decoded(&mut rx_a).await; // CONNACK

        broker.handle_connect(connect("sub", true), tx_b, dummy_close()).await;
        recv_decoded(&mut rx_b).await; // CONNACK

        broker
            .handle_subscribe(
                &Arc::from("sub"),
                SubscribePacket {
                    packet_id: 1,
                    payload: vec![kindling_packets::subscribe::SubscribePayload {
                        topic_filter: "a1/status".to_string(),
                        qos: QoS::AtMostOnce,
                    }],
                },
            )
            .await;
        recv_decoded(&mut rx_b).await; // SUBACK

        broker.handle_disconnected(&Arc::from("a1")).await;

        match recv_decoded(&mut rx_b).await {
            ControlPacket::Publish(p) => {
                assert_eq!(p.topic_name, "a1/status");
                assert_eq!(p.payload, Bytes::from("offline"));
            }
            other => panic!("expected Will Publish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn graceful_disconnect_does_not_publish_the_will() {
        let mut broker = new_broker();
        let (tx_a, mut rx_a) = mpsc::channel(8);

        let mut will_connect = connect("a1", true);
        will_connect.flags.will_flag = true;
        will_connect.payload.will_topic = Some("a1/status".to_string());
        will_connect.payload.will_payload = Some(Bytes::from("offline"));

        broker.handle_connect(will_connect, tx_a, dummy_close()).await;
        recv_decoded(&mut rx_a).await; // CONNACK

        broker.handle_packet(Arc::from("a1"), ControlPacket::Disconnect(Default::default())).await;

        assert!(!broker.sessions.contains_key("a1"));
        assert!(!broker.clients.contains_key("a1"));
    }

    #[tokio::test]
    async fn clean_session_disconnect_clears_subscriptions() {
        let mut broker = new_broker();
        let (tx, mut rx) = mpsc::channel(8);
        broker.handle_connect(connect("c1", true), tx, dummy_close()).await;
        recv_decoded(&mut rx).await; // CONNACK

        broker
            .handle_subscribe(
                &Arc::from("c1"),
                SubscribePacket {
                    packet_id: 1,
                    payload: vec![kindling_packets::subscribe::SubscribePayload {
                        topic_filter: "a/b".to_string(),
                        qos: QoS::AtMostOnce,
                    }],
                },
            )
            .await;
        recv_decoded(&mut rx).await; // SUBACK

        broker.handle_packet(Arc::from("c1"), ControlPacket::Disconnect(Default::default())).await;

        assert_eq!(broker.topics.matching_subscribers("a/b").len(), 0);
    }

    #[tokio::test]
    async fn protocol_error_forces_the_connection_closed() {
        let mut broker = new_broker();
        let (tx, mut rx) = mpsc::channel(8);
        let (close, close_rx) = oneshot::channel();
        broker.handle_connect(connect("c1", true), tx, close).await;
        recv_decoded(&mut rx).await; // CONNACK

        // A second CONNECT on an already-established connection is a
        // protocol error: the worker must not just forget the client, it
        // must signal the connection task to tear the socket down.
        broker.handle_packet(Arc::from("c1"), ControlPacket::Connect(connect("c1", true))).await;

        assert!(!broker.clients.contains_key("c1"));
        assert!(close_rx.await.is_ok());
    }
}
