use super::registry::{ConnectionHandle, ConnectionRegistry, RegistryStats, Role};
use crate::access::AccessController;
use crate::error::RelayError;
use crate::events::{BrokerEvent, EventBus};
use crate::frame::{Frame, FrameKind};
use crate::recognition::RecognitionService;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// How published frames reach recognition
#[derive(Clone)]
pub struct RecognitionHook {
    pub service: Arc<RecognitionService>,
    pub queue: usize,
    pub sample_every: u32,
}

/// Shared state for the relay routes
#[derive(Clone)]
pub struct RelayState {
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) recognition: Option<RecognitionHook>,
    pub(crate) access: Option<Arc<AccessController>>,
    pub(crate) shutdown: CancellationToken,
}

/// Upgrade handler for `GET /publish/{camera_id}`
pub async fn publish_handler(
    ws: WebSocketUpgrade,
    Path(camera_id): Path<String>,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_publisher(socket, camera_id, state))
}

/// Upgrade handler for `GET /view/{camera_id}`
pub async fn view_handler(
    ws: WebSocketUpgrade,
    Path(camera_id): Path<String>,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_subscriber(socket, camera_id, state))
}

async fn handle_publisher(mut socket: WebSocket, camera_id: String, state: RelayState) {
    let handle = match state.registry.publish(&camera_id) {
        Ok(handle) => handle,
        Err(e) => {
            debug!("Refusing publisher: {}", e);
            let _ = state
                .event_bus
                .publish(BrokerEvent::PublisherRejected {
                    camera_id: camera_id.clone(),
                })
                .await;
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "camera already has a publisher".into(),
                })))
                .await;
            return;
        }
    };

    let _ = state
        .event_bus
        .publish(BrokerEvent::PublisherConnected {
            camera_id: camera_id.clone(),
        })
        .await;

    let pipeline = state
        .recognition
        .as_ref()
        .map(|hook| hook.service.start_pipeline(&camera_id, hook.queue, hook.sample_every));

    let mut seq = 0u64;
    loop {
        let message = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            message = socket.recv() => message,
        };

        let frame = match message {
            Some(Ok(Message::Binary(data))) => Frame::binary(seq, data),
            Some(Ok(Message::Text(text))) => Frame::text(seq, text),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                let error = RelayError::Transport {
                    camera_id: camera_id.clone(),
                    details: e.to_string(),
                };
                warn!("Publisher dropped: {}", error);
                break;
            }
        };
        seq += 1;

        let outcome = state.registry.relay(&camera_id, &frame);
        trace!(
            "Camera {}: frame {} to {} subscriber(s), {} dropped",
            camera_id,
            frame.seq,
            outcome.delivered,
            outcome.dropped
        );

        if let Some(pipeline) = &pipeline {
            pipeline.offer(&frame);
        }
    }

    if let Some(pipeline) = pipeline {
        pipeline.stop().await;
    }
    close(&state, &handle).await;
    info!("Camera {} stopped publishing after {} frame(s)", camera_id, seq);
}

async fn handle_subscriber(socket: WebSocket, camera_id: String, state: RelayState) {
    let (handle, mut frames) = state.registry.subscribe(&camera_id);
    let (mut sender, mut receiver) = socket.split();

    let _ = state
        .event_bus
        .publish(BrokerEvent::SubscriberConnected {
            camera_id: camera_id.clone(),
        })
        .await;

    let send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sender.send(to_message(frame)).await.is_err() {
                break;
            }
        }
    });

    let connection = handle.id;
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => trace!("Ignoring message from subscriber {}", connection),
                Err(e) => {
                    debug!("Subscriber {} connection error: {}", connection, e);
                    break;
                }
            }
        }
    });

    let send_abort = send_task.abort_handle();
    let recv_abort = recv_task.abort_handle();
    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
        _ = state.shutdown.cancelled() => {}
    }
    send_abort.abort();
    recv_abort.abort();

    close(&state, &handle).await;
}

async fn close(state: &RelayState, handle: &ConnectionHandle) {
    state.registry.disconnect(handle);
    let camera_id = handle.camera_id.clone();
    let event = match handle.role {
        Role::Publisher => BrokerEvent::PublisherDisconnected { camera_id },
        Role::Subscriber => BrokerEvent::SubscriberDisconnected { camera_id },
    };
    let _ = state.event_bus.publish(event).await;
}

/// Forward a frame as the message kind it arrived as
fn to_message(frame: Frame) -> Message {
    match frame.kind {
        FrameKind::Binary => Message::Binary(frame.payload.to_vec()),
        FrameKind::Text => match String::from_utf8(frame.payload.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        },
    }
}

#[derive(Debug, Serialize)]
pub struct CameraLockView {
    pub camera_id: String,
    pub status: &'static str,
    pub relocks_in_ms: Option<u128>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub registry: RegistryStats,
    pub cameras: Vec<CameraLockView>,
}

/// Handler for `GET /health`
pub async fn health_handler(State(state): State<RelayState>) -> Json<HealthResponse> {
    let cameras = state
        .access
        .as_ref()
        .map(|access| {
            access
                .snapshots()
                .into_iter()
                .map(|lock| CameraLockView {
                    status: lock.status.as_str(),
                    relocks_in_ms: lock.remaining().map(|d| d.as_millis()),
                    camera_id: lock.camera_id,
                })
                .collect()
        })
        .unwrap_or_default();

    Json(HealthResponse {
        status: "ok",
        registry: state.registry.stats(),
        cameras,
    })
}
