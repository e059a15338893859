use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::World;
use crate::points::{PointKind, PointRegistry};

pub const MODBUS_UNIT_ID: u8 = 1;
const OVERRIDE_PRIORITY: u8 = 8;
const OVERRIDE_SOURCE: &str = "modbus";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
}

/// One point's holding-register footprint. Analog points occupy two
/// consecutive registers carrying an f32 big-endian; binary and
/// multi-state points occupy one.
#[derive(Debug, Clone)]
pub struct Binding {
    pub start: u16,
    pub width: u16,
    pub path: String,
    pub kind: PointKind,
}

/// Static register map generated at assembly time from point metadata.
pub struct RegisterMap {
    bindings: Vec<Binding>,
    by_register: HashMap<u16, (usize, u16)>,
}

impl RegisterMap {
    pub fn from_registry(registry: &PointRegistry) -> Self {
        let mut bindings = Vec::new();
        let mut by_register = HashMap::new();
        let mut next: u32 = 0;
        for path in registry.paths() {
            let meta = registry.meta(path).expect("path from registry");
            let width: u16 = match meta.kind {
                PointKind::Analog => 2,
                PointKind::Binary | PointKind::MultiState => 1,
                PointKind::Text => continue,
            };
            if next + width as u32 > u16::MAX as u32 {
                warn!(path, "register space exhausted, remaining points unmapped");
                break;
            }
            let index = bindings.len();
            for word in 0..width {
                by_register.insert(next as u16 + word, (index, word));
            }
            bindings.push(Binding {
                start: next as u16,
                width,
                path: path.to_string(),
                kind: meta.kind,
            });
            next += width as u32;
        }
        Self {
            bindings,
            by_register,
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn binding_for(&self, path: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.path == path)
    }

    fn at(&self, register: u16) -> Option<(&Binding, u16)> {
        self.by_register
            .get(&register)
            .map(|&(index, word)| (&self.bindings[index], word))
    }

    /// Current wire value of one register.
    fn register_value(&self, world: &World, register: u16) -> Result<u16, ExceptionCode> {
        let (binding, word) = self.at(register).ok_or(ExceptionCode::IllegalDataAddress)?;
        let value = world
            .registry
            .effective_f64(&binding.path)
            .map_err(|_| ExceptionCode::IllegalDataAddress)?;
        Ok(match binding.kind {
            PointKind::Analog => {
                let bits = (value as f32).to_bits();
                if word == 0 {
                    (bits >> 16) as u16
                } else {
                    bits as u16
                }
            }
            PointKind::Binary => (value != 0.0) as u16,
            PointKind::MultiState => value as u16,
            PointKind::Text => 0,
        })
    }
}

/// Modbus/TCP gateway: answers FC 03/04/06/16 against the live registry.
/// Writes land as priority-8 overrides; the wire has no priority slot.
pub struct ModbusServer {
    world: Arc<World>,
    map: Arc<RegisterMap>,
}

impl ModbusServer {
    pub fn new(world: Arc<World>, map: Arc<RegisterMap>) -> Self {
        Self { world, map }
    }

    pub async fn serve(self, addr: SocketAddr) -> std::io::Result<JoinHandle<()>> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, registers = self.map.len(), "Modbus/TCP server listening");
        let server = Arc::new(self);
        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "modbus client connected");
                        let server = server.clone();
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream).await {
                                debug!(%peer, error = %e, "modbus connection closed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "modbus accept failed");
                    }
                }
            }
        }))
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        loop {
            // MBAP header: transaction(2) protocol(2) length(2) unit(1)
            let mut header = [0u8; 7];
            if stream.read_exact(&mut header).await.is_err() {
                return Ok(());
            }
            let transaction_id = u16::from_be_bytes([header[0], header[1]]);
            let length = u16::from_be_bytes([header[4], header[5]]) as usize;
            let unit_id = header[6];
            if length < 2 || length > 260 {
                return Ok(());
            }
            let mut pdu = vec![0u8; length - 1];
            stream.read_exact(&mut pdu).await?;

            let response_pdu = self.process_pdu(&pdu);
            let mut frame = Vec::with_capacity(7 + response_pdu.len());
            frame.extend_from_slice(&transaction_id.to_be_bytes());
            frame.extend_from_slice(&[0, 0]);
            frame.extend_from_slice(&((response_pdu.len() + 1) as u16).to_be_bytes());
            frame.push(unit_id);
            frame.extend_from_slice(&response_pdu);
            stream.write_all(&frame).await?;
        }
    }

    /// Handle one request PDU (function code + data), returning the
    /// response PDU.
    pub fn process_pdu(&self, pdu: &[u8]) -> Vec<u8> {
        if pdu.is_empty() {
            return Vec::new();
        }
        let function = pdu[0];
        let data = &pdu[1..];
        let result = match function {
            0x03 | 0x04 => self.read_registers(data),
            0x06 => self.write_single_register(data),
            0x10 => self.write_multiple_registers(data),
            _ => Err(ExceptionCode::IllegalFunction),
        };
        match result {
            Ok(mut body) => {
                let mut out = vec![function];
                out.append(&mut body);
                out
            }
            Err(code) => vec![function | 0x80, code as u8],
        }
    }

    fn read_registers(&self, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
        if data.len() < 4 {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let start = u16::from_be_bytes([data[0], data[1]]);
        let quantity = u16::from_be_bytes([data[2], data[3]]);
        if quantity == 0 || quantity > 125 {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let mut body = vec![(quantity * 2) as u8];
        for i in 0..quantity {
            let register = start
                .checked_add(i)
                .ok_or(ExceptionCode::IllegalDataAddress)?;
            let value = self.map.register_value(&self.world, register)?;
            body.extend_from_slice(&value.to_be_bytes());
        }
        Ok(body)
    }

    fn write_single_register(&self, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
        if data.len() < 4 {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let register = u16::from_be_bytes([data[0], data[1]]);
        let raw = u16::from_be_bytes([data[2], data[3]]);

        let (binding, _) = self
            .map
            .at(register)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        // A lone 16-bit word cannot carry half an f32
        if binding.kind == PointKind::Analog {
            return Err(ExceptionCode::IllegalDataValue);
        }
        self.world
            .override_point(
                &binding.path,
                raw as f64,
                OVERRIDE_PRIORITY,
                OVERRIDE_SOURCE,
                None,
            )
            .map_err(|_| ExceptionCode::IllegalDataValue)?;
        Ok(data[..4].to_vec())
    }

    fn write_multiple_registers(&self, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
        if data.len() < 5 {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let start = u16::from_be_bytes([data[0], data[1]]);
        let quantity = u16::from_be_bytes([data[2], data[3]]);
        let byte_count = data[4] as usize;
        if quantity == 0 || quantity > 123 || byte_count != quantity as usize * 2 {
            return Err(ExceptionCode::IllegalDataValue);
        }
        if data.len() < 5 + byte_count {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let words: Vec<u16> = (0..quantity as usize)
            .map(|i| u16::from_be_bytes([data[5 + i * 2], data[6 + i * 2]]))
            .collect();

        // The write must align to whole bindings
        let mut offset = 0usize;
        while offset < words.len() {
            let register = start + offset as u16;
            let (binding, word) = self
                .map
                .at(register)
                .ok_or(ExceptionCode::IllegalDataAddress)?;
            if word != 0 || offset + binding.width as usize > words.len() {
                return Err(ExceptionCode::IllegalDataValue);
            }
            let raw = match binding.kind {
                PointKind::Analog => {
                    let bits = ((words[offset] as u32) << 16) | words[offset + 1] as u32;
                    f32::from_bits(bits) as f64
                }
                PointKind::Binary | PointKind::MultiState => words[offset] as f64,
                PointKind::Text => return Err(ExceptionCode::IllegalDataValue),
            };
            self.world
                .override_point(
                    &binding.path,
                    raw,
                    OVERRIDE_PRIORITY,
                    OVERRIDE_SOURCE,
                    None,
                )
                .map_err(|_| ExceptionCode::IllegalDataValue)?;
            offset += binding.width as usize;
        }

        let mut body = Vec::with_capacity(4);
        body.extend_from_slice(&start.to_be_bytes());
        body.extend_from_slice(&quantity.to_be_bytes());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, CampusSize};
    use crate::engine::Engine;

    fn server() -> (ModbusServer, Arc<World>, Arc<RegisterMap>) {
        let cfg = AppConfig {
            campus_size: CampusSize::Small,
            ..AppConfig::default()
        };
        let mut engine = Engine::new(cfg).unwrap();
        engine.run_for(3);
        let world = engine.world();
        let map = Arc::new(RegisterMap::from_registry(&world.registry));
        (ModbusServer::new(world.clone(), map.clone()), world, map)
    }

    fn read_request(start: u16, quantity: u16) -> Vec<u8> {
        let mut pdu = vec![0x03];
        pdu.extend_from_slice(&start.to_be_bytes());
        pdu.extend_from_slice(&quantity.to_be_bytes());
        pdu
    }

    #[test]
    fn analog_point_round_trips_as_f32_pair() {
        let (server, world, map) = server();
        let binding = map
            .binding_for("CentralPlant.Chiller_1.chw_supply_temp")
            .expect("chiller supply mapped")
            .clone();
        assert_eq!(binding.width, 2);

        let response = server.process_pdu(&read_request(binding.start, 2));
        assert_eq!(response[0], 0x03);
        assert_eq!(response[1], 4);
        let bits = u32::from_be_bytes([response[2], response[3], response[4], response[5]]);
        let wire = f32::from_bits(bits) as f64;
        let expected = world
            .registry
            .effective_f64("CentralPlant.Chiller_1.chw_supply_temp")
            .unwrap();
        assert!((wire - expected).abs() < 0.01, "wire {wire} vs {expected}");
    }

    #[test]
    fn fc16_write_sets_priority_8_override() {
        let (server, world, map) = server();
        let binding = map
            .binding_for("CentralPlant.Chiller_1.chw_supply_temp")
            .unwrap()
            .clone();

        let bits = (45.0_f32).to_bits();
        let mut pdu = vec![0x10];
        pdu.extend_from_slice(&binding.start.to_be_bytes());
        pdu.extend_from_slice(&2u16.to_be_bytes());
        pdu.push(4);
        pdu.extend_from_slice(&((bits >> 16) as u16).to_be_bytes());
        pdu.extend_from_slice(&(bits as u16).to_be_bytes());

        let response = server.process_pdu(&pdu);
        assert_eq!(response[0], 0x10);

        let reading = world
            .registry
            .read("CentralPlant.Chiller_1.chw_supply_temp")
            .unwrap();
        assert_eq!(reading.override_priority, Some(8));
        assert!(
            (world
                .registry
                .effective_f64("CentralPlant.Chiller_1.chw_supply_temp")
                .unwrap()
                - 45.0)
                .abs()
                < 0.001
        );
    }

    #[test]
    fn fc06_write_to_binary_point() {
        let (server, world, map) = server();
        let binding = map
            .binding_for("CentralPlant.Chiller_1.status")
            .unwrap()
            .clone();
        assert_eq!(binding.width, 1);

        let mut pdu = vec![0x06];
        pdu.extend_from_slice(&binding.start.to_be_bytes());
        pdu.extend_from_slice(&1u16.to_be_bytes());
        let response = server.process_pdu(&pdu);
        assert_eq!(response[0], 0x06);
        assert_eq!(
            world
                .registry
                .effective_f64("CentralPlant.Chiller_1.status")
                .unwrap(),
            1.0
        );
    }

    #[test]
    fn fc06_on_analog_register_is_illegal_value() {
        let (server, _, map) = server();
        let binding = map
            .binding_for("CentralPlant.Chiller_1.chw_supply_temp")
            .unwrap()
            .clone();
        let mut pdu = vec![0x06];
        pdu.extend_from_slice(&binding.start.to_be_bytes());
        pdu.extend_from_slice(&10u16.to_be_bytes());
        let response = server.process_pdu(&pdu);
        assert_eq!(response[0], 0x86);
        assert_eq!(response[1], ExceptionCode::IllegalDataValue as u8);
    }

    #[test]
    fn unknown_register_is_illegal_address() {
        let (server, _, _) = server();
        let response = server.process_pdu(&read_request(0xFF00, 1));
        assert_eq!(response[0], 0x83);
        assert_eq!(response[1], ExceptionCode::IllegalDataAddress as u8);
    }

    #[test]
    fn unsupported_function_is_illegal_function() {
        let (server, _, _) = server();
        let response = server.process_pdu(&[0x2B, 0x00]);
        assert_eq!(response[0], 0xAB);
        assert_eq!(response[1], ExceptionCode::IllegalFunction as u8);
    }

    #[test]
    fn non_writable_point_rejects_write() {
        let (server, _, map) = server();
        // kw is a computed measurement, never writable
        let binding = map
            .binding_for("CentralPlant.Chiller_1.kw")
            .unwrap()
            .clone();
        let bits = (1.0_f32).to_bits();
        let mut pdu = vec![0x10];
        pdu.extend_from_slice(&binding.start.to_be_bytes());
        pdu.extend_from_slice(&2u16.to_be_bytes());
        pdu.push(4);
        pdu.extend_from_slice(&((bits >> 16) as u16).to_be_bytes());
        pdu.extend_from_slice(&(bits as u16).to_be_bytes());
        let response = server.process_pdu(&pdu);
        assert_eq!(response[0], 0x90);
        assert_eq!(response[1], ExceptionCode::IllegalDataValue as u8);
    }
}
