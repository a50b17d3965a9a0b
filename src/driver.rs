use std::sync::Arc;
use bytes::{Bytes, BytesMut};
use tokio::select;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{self, Instant};
use tracing::{error, info, span, warn, Level};
use crate::api::request::ApiRequest;
use crate::api::response::ApiResponse;
use crate::config::TransportConfig;
use crate::engine::TransportEngine;
use crate::registry::local_port::LocalPort;
use crate::sink::PacketSink;
use crate::wire::address_path::AddressPath;
use crate::wire::packet::NetworkPacket;


/// A [TransportEngine] running on a tokio task, fed through channels for its four input
///  ports. Everything the engine emits arrives in serialized form on the receivers in
///  [NodeOutputs].
///
/// The node shuts down when the [TransportNode] is dropped.
pub struct TransportNode {
    engine: Arc<Mutex<TransportEngine>>,
    application: mpsc::Sender<(LocalPort, Bytes)>,
    network: mpsc::Sender<Bytes>,
    cache: mpsc::Sender<Bytes>,
    topology: mpsc::Sender<Bytes>,
}

pub struct NodeOutputs {
    pub network: mpsc::UnboundedReceiver<Bytes>,
    pub cache: mpsc::UnboundedReceiver<Bytes>,
    pub application: mpsc::UnboundedReceiver<(LocalPort, Bytes)>,
}

struct NodeInputs {
    application: mpsc::Receiver<(LocalPort, Bytes)>,
    network: mpsc::Receiver<Bytes>,
    cache: mpsc::Receiver<Bytes>,
    topology: mpsc::Receiver<Bytes>,
}

impl TransportNode {
    const INPUT_CHANNEL_SIZE: usize = 1024;

    pub fn spawn(config: TransportConfig) -> anyhow::Result<(TransportNode, NodeOutputs)> {
        let (network_out, network_out_recv) = mpsc::unbounded_channel();
        let (cache_out, cache_out_recv) = mpsc::unbounded_channel();
        let (application_out, application_out_recv) = mpsc::unbounded_channel();

        let sink = Arc::new(ChannelSink {
            network: network_out,
            cache: cache_out,
            application: application_out,
        });
        let engine = Arc::new(Mutex::new(TransportEngine::new(Arc::new(config), sink)?));

        let (application, application_recv) = mpsc::channel(Self::INPUT_CHANNEL_SIZE);
        let (network, network_recv) = mpsc::channel(Self::INPUT_CHANNEL_SIZE);
        let (cache, cache_recv) = mpsc::channel(Self::INPUT_CHANNEL_SIZE);
        let (topology, topology_recv) = mpsc::channel(Self::INPUT_CHANNEL_SIZE);

        tokio::spawn(run_node(engine.clone(), NodeInputs {
            application: application_recv,
            network: network_recv,
            cache: cache_recv,
            topology: topology_recv,
        }));

        Ok((
            TransportNode { engine, application, network, cache, topology },
            NodeOutputs {
                network: network_out_recv,
                cache: cache_out_recv,
                application: application_out_recv,
            },
        ))
    }

    pub async fn application_request(&self, port: LocalPort, request: &ApiRequest) -> anyhow::Result<()> {
        let mut buf = BytesMut::new();
        request.ser(&mut buf);
        self.application.send((port, buf.freeze())).await?;
        Ok(())
    }

    pub async fn network_packet(&self, raw: Bytes) -> anyhow::Result<()> {
        self.network.send(raw).await?;
        Ok(())
    }

    pub async fn cache_packet(&self, raw: Bytes) -> anyhow::Result<()> {
        self.cache.send(raw).await?;
        Ok(())
    }

    /// notifies the node that it is now attached to the network reachable through `route`
    pub async fn topology_update(&self, route: &AddressPath) -> anyhow::Result<()> {
        self.topology.send(Bytes::from(route.to_string())).await?;
        Ok(())
    }

    pub async fn local_address(&self) -> AddressPath {
        self.engine.lock().await
            .local_address()
            .clone()
    }
}

async fn run_node(engine: Arc<Mutex<TransportEngine>>, mut inputs: NodeInputs) {
    info!("starting transport node for {}", engine.lock().await.local_address());

    loop {
        let wakeup = engine.lock().await.next_wakeup();

        select! {
            msg = inputs.application.recv() => {
                let Some((port, mut raw)) = msg else {
                    info!("application channel closed, shutting down transport node");
                    return;
                };
                match ApiRequest::deser(&mut raw) {
                    Ok(request) => engine.lock().await.on_application(port, request, Instant::now()),
                    Err(e) => warn!("unparsable request from {:?}, dropping: {}", port, e),
                }
            }
            Some(mut raw) = inputs.network.recv() => {
                match NetworkPacket::deser(&mut raw) {
                    Ok(packet) => engine.lock().await.on_network(packet, Instant::now()),
                    Err(e) => warn!("unparsable packet from the network, dropping: {}", e),
                }
            }
            Some(mut raw) = inputs.cache.recv() => {
                match NetworkPacket::deser(&mut raw) {
                    Ok(packet) => engine.lock().await.on_cache(packet),
                    Err(e) => warn!("unparsable packet from the content cache, dropping: {}", e),
                }
            }
            Some(raw) = inputs.topology.recv() => {
                engine.lock().await.on_topology_update(&raw);
            }
            _ = sleep_until_alarm(wakeup) => {
                let span = span!(Level::TRACE, "alarm");
                let _entered = span.enter();
                engine.lock().await.on_timer(Instant::now());
            }
        }
    }
}

async fn sleep_until_alarm(wakeup: Option<Instant>) {
    match wakeup {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Forwards the engine's output in serialized form
struct ChannelSink {
    network: mpsc::UnboundedSender<Bytes>,
    cache: mpsc::UnboundedSender<Bytes>,
    application: mpsc::UnboundedSender<(LocalPort, Bytes)>,
}

impl PacketSink for ChannelSink {
    fn to_network(&self, packet: NetworkPacket) {
        if self.network.send(packet.to_bytes()).is_err() {
            error!("network channel is closed, dropping packet");
        }
    }

    fn to_cache(&self, packet: NetworkPacket) {
        if self.cache.send(packet.to_bytes()).is_err() {
            error!("content cache channel is closed, dropping packet");
        }
    }

    fn to_application(&self, port: LocalPort, response: ApiResponse) {
        let mut buf = BytesMut::new();
        response.ser(&mut buf);
        if self.application.send((port, buf.freeze())).is_err() {
            error!("application channel is closed, dropping response for {:?}", port);
        }
    }
}
