use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec::{handle_apdu, npdu_strip, npdu_wrap, ObjectMap};
use crate::engine::World;

const BVLL_TYPE_IP: u8 = 0x81;
const BVLC_ORIGINAL_UNICAST: u8 = 0x0A;
const BVLC_ORIGINAL_BROADCAST: u8 = 0x0B;

/// BACnet/IP gateway on UDP 47808: BVLL framing around the shared APDU
/// codec.
pub struct BacnetIpServer {
    world: Arc<World>,
    objects: Arc<ObjectMap>,
    device_id: u32,
}

impl BacnetIpServer {
    pub fn new(world: Arc<World>, objects: Arc<ObjectMap>, device_id: u32) -> Self {
        Self {
            world,
            objects,
            device_id,
        }
    }

    pub async fn serve(self, addr: SocketAddr) -> std::io::Result<JoinHandle<()>> {
        let socket = UdpSocket::bind(addr).await?;
        info!(%addr, objects = self.objects.len(), device_id = self.device_id, "BACnet/IP server listening");
        Ok(tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                let (len, peer) = match socket.recv_from(&mut buf).await {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "bacnet/ip recv failed");
                        continue;
                    }
                };
                if let Some(response) = self.handle_datagram(&buf[..len]) {
                    if let Err(e) = socket.send_to(&response, peer).await {
                        debug!(%peer, error = %e, "bacnet/ip send failed");
                    }
                }
            }
        }))
    }

    /// One BVLL datagram in, optionally one out.
    pub fn handle_datagram(&self, datagram: &[u8]) -> Option<Vec<u8>> {
        if datagram.len() < 4 || datagram[0] != BVLL_TYPE_IP {
            return None;
        }
        let function = datagram[1];
        let length = u16::from_be_bytes([datagram[2], datagram[3]]) as usize;
        if length != datagram.len() {
            return None;
        }
        if function != BVLC_ORIGINAL_UNICAST && function != BVLC_ORIGINAL_BROADCAST {
            return None;
        }
        let apdu = npdu_strip(&datagram[4..])?;
        let response_apdu = handle_apdu(
            &self.world,
            &self.objects,
            self.device_id,
            "bacnet",
            apdu,
        )?;
        let npdu = npdu_wrap(&response_apdu);
        let mut out = Vec::with_capacity(npdu.len() + 4);
        out.push(BVLL_TYPE_IP);
        out.push(BVLC_ORIGINAL_UNICAST);
        out.extend_from_slice(&((npdu.len() + 4) as u16).to_be_bytes());
        out.extend_from_slice(&npdu);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, CampusSize};
    use crate::engine::Engine;

    fn server() -> BacnetIpServer {
        let cfg = AppConfig {
            campus_size: CampusSize::Small,
            ..AppConfig::default()
        };
        let mut engine = Engine::new(cfg).unwrap();
        engine.run_for(2);
        let world = engine.world();
        let objects = Arc::new(ObjectMap::from_registry(&world.registry));
        BacnetIpServer::new(world, objects, 389999)
    }

    fn bvll(function: u8, npdu: &[u8]) -> Vec<u8> {
        let mut out = vec![BVLL_TYPE_IP, function];
        out.extend_from_slice(&((npdu.len() + 4) as u16).to_be_bytes());
        out.extend_from_slice(npdu);
        out
    }

    #[test]
    fn broadcast_who_is_gets_unicast_i_am() {
        let server = server();
        let datagram = bvll(BVLC_ORIGINAL_BROADCAST, &npdu_wrap(&[0x10, 0x08]));
        let response = server.handle_datagram(&datagram).unwrap();
        assert_eq!(response[0], BVLL_TYPE_IP);
        assert_eq!(response[1], BVLC_ORIGINAL_UNICAST);
        // BVLL length matches the frame
        let length = u16::from_be_bytes([response[2], response[3]]) as usize;
        assert_eq!(length, response.len());
        // I-Am inside
        assert_eq!(&response[6..8], &[0x10, 0x00]);
    }

    #[test]
    fn bad_bvll_type_is_dropped() {
        let server = server();
        assert!(server.handle_datagram(&[0x55, 0x0A, 0x00, 0x04]).is_none());
    }

    #[test]
    fn length_mismatch_is_dropped() {
        let server = server();
        let mut datagram = bvll(BVLC_ORIGINAL_UNICAST, &npdu_wrap(&[0x10, 0x08]));
        datagram[3] = datagram[3].wrapping_add(1);
        assert!(server.handle_datagram(&datagram).is_none());
    }
}
