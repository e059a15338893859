//! BACnet/SC hub: the same APDU semantics as BACnet/IP, framed in BVLC-SC
//! over a WebSocket. TLS is terminated by the external proxy; this
//! endpoint speaks plain `ws` behind it.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec::{handle_apdu, npdu_strip, npdu_wrap, ObjectMap};
use crate::engine::World;

const BVLC_SC_ENCAPSULATED_NPDU: u8 = 0x02;
const BVLC_SC_CONNECT_REQUEST: u8 = 0x04;
const BVLC_SC_CONNECT_ACCEPT: u8 = 0x05;
const BVLC_SC_HEARTBEAT_REQUEST: u8 = 0x08;
const BVLC_SC_HEARTBEAT_ACK: u8 = 0x09;

const HUB_VMAC: [u8; 6] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x01];
const HUB_UUID: [u8; 16] = [
    0xBA, 0x51, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x01,
];
const MAX_BVLC: u16 = 1497;

#[derive(Clone)]
pub struct BacnetScState {
    world: Arc<World>,
    objects: Arc<ObjectMap>,
    device_id: u32,
    /// Device UUIDs currently connected; duplicates are refused.
    connected: Arc<Mutex<HashSet<[u8; 16]>>>,
}

impl BacnetScState {
    pub fn new(world: Arc<World>, objects: Arc<ObjectMap>, device_id: u32) -> Self {
        Self {
            world,
            objects,
            device_id,
            connected: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

pub fn router(state: BacnetScState) -> Router {
    Router::new()
        .route("/bacnet-sc", get(upgrade_handler))
        .with_state(state)
}

pub async fn serve(state: BacnetScState, addr: SocketAddr) -> std::io::Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "BACnet/SC hub listening at /bacnet-sc");
    let app = router(state);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "BACnet/SC hub stopped");
        }
    }))
}

async fn upgrade_handler(
    State(state): State<BacnetScState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.protocols(["hub.bsc.bacnet.org", "bacnet-sc"])
        .on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: BacnetScState, mut socket: WebSocket) {
    let mut client_uuid: Option<[u8; 16]> = None;

    while let Some(Ok(message)) = socket.recv().await {
        let frame = match message {
            Message::Binary(frame) => frame,
            Message::Close(_) => break,
            _ => continue,
        };
        match handle_frame(&state, &frame, &mut client_uuid).await {
            FrameAction::Reply(response) => {
                if socket.send(Message::Binary(response)).await.is_err() {
                    break;
                }
            }
            FrameAction::RefuseDuplicate => {
                debug!("duplicate BACnet/SC device UUID refused");
                break;
            }
            FrameAction::Ignore => {}
        }
    }

    if let Some(uuid) = client_uuid {
        state.connected.lock().await.remove(&uuid);
    }
}

enum FrameAction {
    Reply(Vec<u8>),
    RefuseDuplicate,
    Ignore,
}

async fn handle_frame(
    state: &BacnetScState,
    frame: &[u8],
    client_uuid: &mut Option<[u8; 16]>,
) -> FrameAction {
    let Some(&function) = frame.first() else {
        return FrameAction::Ignore;
    };
    match function {
        BVLC_SC_CONNECT_REQUEST => {
            // VMAC(6) UUID(16) max-BVLC(2) max-NPDU(2)
            if frame.len() < 27 {
                return FrameAction::Ignore;
            }
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(&frame[7..23]);
            {
                let mut connected = state.connected.lock().await;
                if !connected.insert(uuid) {
                    return FrameAction::RefuseDuplicate;
                }
            }
            *client_uuid = Some(uuid);
            debug!("BACnet/SC device connected");

            let mut response = Vec::with_capacity(27);
            response.push(BVLC_SC_CONNECT_ACCEPT);
            response.extend_from_slice(&HUB_VMAC);
            response.extend_from_slice(&HUB_UUID);
            response.extend_from_slice(&MAX_BVLC.to_be_bytes());
            response.extend_from_slice(&MAX_BVLC.to_be_bytes());
            FrameAction::Reply(response)
        }
        BVLC_SC_HEARTBEAT_REQUEST => FrameAction::Reply(vec![BVLC_SC_HEARTBEAT_ACK]),
        BVLC_SC_ENCAPSULATED_NPDU => {
            // Sessions start with Connect-Request; drop traffic before it
            if client_uuid.is_none() {
                return FrameAction::Ignore;
            }
            // DestVMAC(6) SrcVMAC(6) MsgID(2) NPDU...
            if frame.len() < 15 {
                return FrameAction::Ignore;
            }
            let src_vmac = &frame[7..13];
            let msg_id = &frame[13..15];
            let Some(apdu) = npdu_strip(&frame[15..]) else {
                return FrameAction::Ignore;
            };
            let Some(response_apdu) = handle_apdu(
                &state.world,
                &state.objects,
                state.device_id,
                "bacnet-sc",
                apdu,
            ) else {
                return FrameAction::Ignore;
            };

            let npdu = npdu_wrap(&response_apdu);
            let mut out = Vec::with_capacity(npdu.len() + 15);
            out.push(BVLC_SC_ENCAPSULATED_NPDU);
            out.extend_from_slice(src_vmac);
            out.extend_from_slice(&HUB_VMAC);
            out.extend_from_slice(msg_id);
            out.extend_from_slice(&npdu);
            FrameAction::Reply(out)
        }
        other => {
            debug!(function = other, "unhandled BVLC-SC function");
            FrameAction::Ignore
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, CampusSize};
    use crate::engine::Engine;

    fn state() -> BacnetScState {
        let cfg = AppConfig {
            campus_size: CampusSize::Small,
            ..AppConfig::default()
        };
        let mut engine = Engine::new(cfg).unwrap();
        engine.run_for(2);
        let world = engine.world();
        let objects = Arc::new(ObjectMap::from_registry(&world.registry));
        BacnetScState::new(world, objects, 389999)
    }

    fn connect_request(uuid: [u8; 16]) -> Vec<u8> {
        let mut frame = vec![BVLC_SC_CONNECT_REQUEST];
        frame.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x42]);
        frame.extend_from_slice(&uuid);
        frame.extend_from_slice(&MAX_BVLC.to_be_bytes());
        frame.extend_from_slice(&MAX_BVLC.to_be_bytes());
        frame
    }

    #[tokio::test]
    async fn connect_request_yields_connect_accept() {
        let state = state();
        let mut uuid_slot = None;
        let action = handle_frame(&state, &connect_request([7u8; 16]), &mut uuid_slot).await;
        match action {
            FrameAction::Reply(frame) => {
                assert_eq!(frame[0], BVLC_SC_CONNECT_ACCEPT);
                assert_eq!(&frame[1..7], &HUB_VMAC);
                assert_eq!(frame.len(), 27);
            }
            _ => panic!("expected Connect-Accept"),
        }
        assert!(uuid_slot.is_some());
    }

    #[tokio::test]
    async fn duplicate_device_uuid_is_refused() {
        let state = state();
        let mut first = None;
        handle_frame(&state, &connect_request([9u8; 16]), &mut first).await;
        let mut second = None;
        let action = handle_frame(&state, &connect_request([9u8; 16]), &mut second).await;
        assert!(matches!(action, FrameAction::RefuseDuplicate));
    }

    #[tokio::test]
    async fn heartbeat_is_acked() {
        let state = state();
        let mut uuid_slot = None;
        let action = handle_frame(&state, &[BVLC_SC_HEARTBEAT_REQUEST], &mut uuid_slot).await;
        match action {
            FrameAction::Reply(frame) => assert_eq!(frame, vec![BVLC_SC_HEARTBEAT_ACK]),
            _ => panic!("expected heartbeat ack"),
        }
    }

    #[tokio::test]
    async fn encapsulated_who_is_round_trips() {
        let state = state();
        let mut uuid_slot = None;
        handle_frame(&state, &connect_request([3u8; 16]), &mut uuid_slot).await;

        let mut frame = vec![BVLC_SC_ENCAPSULATED_NPDU];
        frame.extend_from_slice(&HUB_VMAC); // dest
        frame.extend_from_slice(&[0, 0, 0, 0, 0, 0x42]); // src
        frame.extend_from_slice(&[0x00, 0x07]); // message id
        frame.extend_from_slice(&npdu_wrap(&[0x10, 0x08]));

        let action = handle_frame(&state, &frame, &mut uuid_slot).await;
        match action {
            FrameAction::Reply(response) => {
                assert_eq!(response[0], BVLC_SC_ENCAPSULATED_NPDU);
                // addressed back to the requester, from the hub
                assert_eq!(&response[1..7], &[0, 0, 0, 0, 0, 0x42]);
                assert_eq!(&response[7..13], &HUB_VMAC);
                assert_eq!(&response[13..15], &[0x00, 0x07]);
                // I-Am APDU after the NPDU header
                assert_eq!(&response[17..19], &[0x10, 0x00]);
            }
            _ => panic!("expected encapsulated response"),
        }
    }

    #[tokio::test]
    async fn traffic_before_connect_is_ignored() {
        let state = state();
        let mut uuid_slot = None;
        let mut frame = vec![BVLC_SC_ENCAPSULATED_NPDU];
        frame.extend_from_slice(&[0u8; 12]);
        frame.extend_from_slice(&[0x00, 0x01]);
        frame.extend_from_slice(&npdu_wrap(&[0x10, 0x08]));
        let action = handle_frame(&state, &frame, &mut uuid_slot).await;
        assert!(matches!(action, FrameAction::Ignore));
    }
}
