//! BACnet APDU encode/decode shared by the IP and SC transports. Only the
//! services the gateway answers are implemented: Who-Is/I-Am,
//! ReadProperty, ReadPropertyMultiple and WriteProperty.

use std::collections::HashMap;

use crate::engine::World;
use crate::error::SimError;
use crate::points::{PointKind, PointRegistry, PointValue};

pub const OBJECT_ANALOG_VALUE: u16 = 2;
pub const OBJECT_BINARY_VALUE: u16 = 5;
pub const OBJECT_DEVICE: u16 = 8;
pub const OBJECT_MULTI_STATE_VALUE: u16 = 19;

pub const PROP_OBJECT_IDENTIFIER: u32 = 75;
pub const PROP_OBJECT_LIST: u32 = 76;
pub const PROP_OBJECT_NAME: u32 = 77;
pub const PROP_PRESENT_VALUE: u32 = 85;

const VENDOR_ID: u8 = 15;

// Error class/code enumerations used in Error PDUs
const ERROR_CLASS_OBJECT: u8 = 1;
const ERROR_CLASS_PROPERTY: u8 = 2;
const ERROR_CODE_UNKNOWN_OBJECT: u8 = 31;
const ERROR_CODE_UNKNOWN_PROPERTY: u8 = 32;
const ERROR_CODE_WRITE_ACCESS_DENIED: u8 = 40;
const ERROR_CODE_VALUE_OUT_OF_RANGE: u8 = 37;

/// Static object table: one value object per non-text point, instances
/// assigned in registration order within each object type.
pub struct ObjectMap {
    analogs: Vec<String>,
    binaries: Vec<String>,
    multis: Vec<String>,
    by_path: HashMap<String, (u16, u32)>,
}

impl ObjectMap {
    pub fn from_registry(registry: &PointRegistry) -> Self {
        let mut analogs = Vec::new();
        let mut binaries = Vec::new();
        let mut multis = Vec::new();
        let mut by_path = HashMap::new();
        for path in registry.paths() {
            let meta = registry.meta(path).expect("path from registry");
            let (object_type, list) = match meta.kind {
                PointKind::Analog => (OBJECT_ANALOG_VALUE, &mut analogs),
                PointKind::Binary => (OBJECT_BINARY_VALUE, &mut binaries),
                PointKind::MultiState => (OBJECT_MULTI_STATE_VALUE, &mut multis),
                PointKind::Text => continue,
            };
            list.push(path.to_string());
            by_path.insert(path.to_string(), (object_type, list.len() as u32));
        }
        Self {
            analogs,
            binaries,
            multis,
            by_path,
        }
    }

    pub fn len(&self) -> usize {
        self.analogs.len() + self.binaries.len() + self.multis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resolve(&self, object_type: u16, instance: u32) -> Option<&str> {
        if instance == 0 {
            return None;
        }
        let list = match object_type {
            OBJECT_ANALOG_VALUE => &self.analogs,
            OBJECT_BINARY_VALUE => &self.binaries,
            OBJECT_MULTI_STATE_VALUE => &self.multis,
            _ => return None,
        };
        list.get(instance as usize - 1).map(String::as_str)
    }

    pub fn object_for(&self, path: &str) -> Option<(u16, u32)> {
        self.by_path.get(path).copied()
    }

    /// All value objects plus the device object, in object-list order.
    pub fn object_ids(&self, device_id: u32) -> Vec<(u16, u32)> {
        let mut ids = Vec::with_capacity(self.len() + 1);
        ids.push((OBJECT_DEVICE, device_id));
        ids.extend((1..=self.analogs.len() as u32).map(|i| (OBJECT_ANALOG_VALUE, i)));
        ids.extend((1..=self.binaries.len() as u32).map(|i| (OBJECT_BINARY_VALUE, i)));
        ids.extend((1..=self.multis.len() as u32).map(|i| (OBJECT_MULTI_STATE_VALUE, i)));
        ids
    }
}

fn pack_object_id(object_type: u16, instance: u32) -> [u8; 4] {
    (((object_type as u32) << 22) | (instance & 0x3F_FFFF)).to_be_bytes()
}

fn unpack_object_id(raw: u32) -> (u16, u32) {
    (((raw >> 22) & 0x3FF) as u16, raw & 0x3F_FFFF)
}

/// Application-tagged character string (UTF-8, charset octet 0).
fn encode_character_string(s: &str) -> Vec<u8> {
    let payload_len = s.len() + 1;
    let mut out = Vec::with_capacity(payload_len + 2);
    if payload_len <= 4 {
        out.push(0x70 | payload_len as u8);
    } else {
        out.push(0x75);
        out.push(payload_len.min(253) as u8);
    }
    out.push(0x00);
    out.extend_from_slice(&s.as_bytes()[..s.len().min(252)]);
    out
}

fn encode_application_object_id(object_type: u16, instance: u32) -> Vec<u8> {
    let mut out = vec![0xC4];
    out.extend_from_slice(&pack_object_id(object_type, instance));
    out
}

fn encode_unsigned(value: u32) -> Vec<u8> {
    if value <= 0xFF {
        vec![0x21, value as u8]
    } else if value <= 0xFFFF {
        let b = (value as u16).to_be_bytes();
        vec![0x22, b[0], b[1]]
    } else {
        let b = value.to_be_bytes();
        vec![0x24, b[0], b[1], b[2], b[3]]
    }
}

/// Encode a point's present value with the application tag its object
/// type calls for. Multi-state values go 1-based on the wire.
fn encode_present_value(value: &PointValue) -> Vec<u8> {
    match value {
        PointValue::Analog(v) => {
            let mut out = vec![0x44];
            out.extend_from_slice(&(*v as f32).to_be_bytes());
            out
        }
        PointValue::Binary(b) => vec![0x91, *b as u8],
        PointValue::MultiState(s) => encode_unsigned(*s as u32 + 1),
        PointValue::Text(_) => vec![0x00],
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Decoded {
    Null,
    Number(f64),
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

#[derive(Debug, Clone, Copy)]
struct Tag {
    number: u8,
    context: bool,
    opening: bool,
    closing: bool,
    length: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn byte(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn peek_tag(&self) -> Option<Tag> {
        let mut clone = Reader {
            data: self.data,
            pos: self.pos,
        };
        clone.tag()
    }

    fn tag(&mut self) -> Option<Tag> {
        let first = self.byte()?;
        let number = (first >> 4) & 0x0F;
        let context = first & 0x08 != 0;
        let lvt = first & 0x07;
        let number = if number == 0x0F { self.byte()? } else { number };
        match lvt {
            6 => Some(Tag {
                number,
                context,
                opening: true,
                closing: false,
                length: 0,
            }),
            7 => Some(Tag {
                number,
                context,
                opening: false,
                closing: true,
                length: 0,
            }),
            5 => {
                let len = self.byte()? as usize;
                Some(Tag {
                    number,
                    context,
                    opening: false,
                    closing: false,
                    length: len,
                })
            }
            n => Some(Tag {
                number,
                context,
                opening: false,
                closing: false,
                length: n as usize,
            }),
        }
    }

    fn unsigned(&mut self, length: usize) -> Option<u32> {
        let raw = self.bytes(length)?;
        let mut value: u32 = 0;
        for b in raw {
            value = (value << 8) | *b as u32;
        }
        Some(value)
    }

    /// One application-tagged value from a WriteProperty body.
    fn application_value(&mut self) -> Option<Decoded> {
        let tag = self.tag()?;
        if tag.context || tag.opening || tag.closing {
            return None;
        }
        match tag.number {
            0 => Some(Decoded::Null),
            // Boolean packs its value into the length field
            1 => Some(Decoded::Number(tag.length as f64)),
            2 | 9 => self.unsigned(tag.length).map(|v| Decoded::Number(v as f64)),
            3 => {
                // Signed integer
                let raw = self.bytes(tag.length)?;
                let mut value: i64 = if raw.first().map_or(false, |b| b & 0x80 != 0) {
                    -1
                } else {
                    0
                };
                for b in raw {
                    value = (value << 8) | *b as i64;
                }
                Some(Decoded::Number(value as f64))
            }
            4 => {
                let raw = self.bytes(4)?;
                Some(Decoded::Number(
                    f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
                ))
            }
            _ => None,
        }
    }
}

/// Outcome of one APDU: an optional response to send back.
pub fn handle_apdu(
    world: &World,
    objects: &ObjectMap,
    device_id: u32,
    source: &str,
    apdu: &[u8],
) -> Option<Vec<u8>> {
    if apdu.is_empty() {
        return None;
    }
    match apdu[0] >> 4 {
        // Unconfirmed-Request
        0x01 => {
            let service = *apdu.get(1)?;
            if service == 0x08 {
                handle_who_is(device_id, &apdu[2..])
            } else {
                None
            }
        }
        // Confirmed-Request
        0x00 => {
            if apdu.len() < 4 {
                return None;
            }
            let invoke_id = apdu[2];
            let service = apdu[3];
            let body = &apdu[4..];
            Some(match service {
                0x0C => handle_read_property(world, objects, device_id, invoke_id, body),
                0x0E => handle_read_property_multiple(world, objects, device_id, invoke_id, body),
                0x0F => handle_write_property(world, objects, source, invoke_id, body),
                _ => reject_pdu(invoke_id),
            })
        }
        _ => None,
    }
}

/// I-Am, sent in reply to a Who-Is that matches our device instance.
pub fn encode_i_am(device_id: u32) -> Vec<u8> {
    let mut out = vec![0x10, 0x00];
    out.extend_from_slice(&encode_application_object_id(OBJECT_DEVICE, device_id));
    // max APDU 1476
    out.extend_from_slice(&[0x22, 0x05, 0xC4]);
    // segmentation: none
    out.extend_from_slice(&[0x91, 0x03]);
    out.extend_from_slice(&[0x21, VENDOR_ID]);
    out
}

fn handle_who_is(device_id: u32, body: &[u8]) -> Option<Vec<u8>> {
    if !body.is_empty() {
        let mut reader = Reader::new(body);
        let low_tag = reader.tag()?;
        let low = reader.unsigned(low_tag.length)?;
        let high_tag = reader.tag()?;
        let high = reader.unsigned(high_tag.length)?;
        if device_id < low || device_id > high {
            return None;
        }
    }
    Some(encode_i_am(device_id))
}

fn simple_ack(invoke_id: u8, service: u8) -> Vec<u8> {
    vec![0x20, invoke_id, service]
}

fn reject_pdu(invoke_id: u8) -> Vec<u8> {
    // Reject: unrecognized-service (9)
    vec![0x60, invoke_id, 0x09]
}

fn error_pdu(invoke_id: u8, service: u8, class: u8, code: u8) -> Vec<u8> {
    vec![0x50, invoke_id, service, 0x91, class, 0x91, code]
}

fn sim_error_pdu(invoke_id: u8, service: u8, err: &SimError) -> Vec<u8> {
    let (class, code) = match err {
        SimError::UnknownPoint(_) => (ERROR_CLASS_OBJECT, ERROR_CODE_UNKNOWN_OBJECT),
        SimError::NotWritable(_) => (ERROR_CLASS_PROPERTY, ERROR_CODE_WRITE_ACCESS_DENIED),
        SimError::BadPriority(_) | SimError::BadType(_) => {
            (ERROR_CLASS_PROPERTY, ERROR_CODE_VALUE_OUT_OF_RANGE)
        }
        _ => (ERROR_CLASS_PROPERTY, ERROR_CODE_VALUE_OUT_OF_RANGE),
    };
    error_pdu(invoke_id, service, class, code)
}

/// Fetch one property's encoded value, or the error class/code pair.
fn property_value(
    world: &World,
    objects: &ObjectMap,
    device_id: u32,
    object_type: u16,
    instance: u32,
    property: u32,
    array_index: Option<u32>,
) -> Result<Vec<u8>, (u8, u8)> {
    if object_type == OBJECT_DEVICE {
        if instance != device_id {
            return Err((ERROR_CLASS_OBJECT, ERROR_CODE_UNKNOWN_OBJECT));
        }
        return match property {
            PROP_OBJECT_NAME => Ok(encode_character_string("BASim Campus Gateway")),
            PROP_OBJECT_IDENTIFIER => Ok(encode_application_object_id(OBJECT_DEVICE, device_id)),
            PROP_OBJECT_LIST => {
                let ids = objects.object_ids(device_id);
                match array_index {
                    Some(0) => Ok(encode_unsigned(ids.len() as u32)),
                    Some(n) => ids
                        .get(n as usize - 1)
                        .map(|(t, i)| encode_application_object_id(*t, *i))
                        .ok_or((ERROR_CLASS_PROPERTY, ERROR_CODE_VALUE_OUT_OF_RANGE)),
                    None => {
                        let mut out = Vec::with_capacity(ids.len() * 5);
                        for (t, i) in ids {
                            out.extend_from_slice(&encode_application_object_id(t, i));
                        }
                        Ok(out)
                    }
                }
            }
            _ => Err((ERROR_CLASS_PROPERTY, ERROR_CODE_UNKNOWN_PROPERTY)),
        };
    }

    let path = objects
        .resolve(object_type, instance)
        .ok_or((ERROR_CLASS_OBJECT, ERROR_CODE_UNKNOWN_OBJECT))?;
    match property {
        PROP_PRESENT_VALUE => {
            let reading = world
                .registry
                .read(path)
                .map_err(|_| (ERROR_CLASS_OBJECT, ERROR_CODE_UNKNOWN_OBJECT))?;
            Ok(encode_present_value(&reading.value))
        }
        PROP_OBJECT_NAME => Ok(encode_character_string(path)),
        PROP_OBJECT_IDENTIFIER => Ok(encode_application_object_id(object_type, instance)),
        _ => Err((ERROR_CLASS_PROPERTY, ERROR_CODE_UNKNOWN_PROPERTY)),
    }
}

fn handle_read_property(
    world: &World,
    objects: &ObjectMap,
    device_id: u32,
    invoke_id: u8,
    body: &[u8],
) -> Vec<u8> {
    let mut reader = Reader::new(body);
    let parsed = (|| {
        let obj_tag = reader.tag()?;
        if !obj_tag.context || obj_tag.number != 0 {
            return None;
        }
        let raw = reader.unsigned(obj_tag.length)?;
        let (object_type, instance) = unpack_object_id(raw);
        let prop_tag = reader.tag()?;
        if !prop_tag.context || prop_tag.number != 1 {
            return None;
        }
        let property = reader.unsigned(prop_tag.length)?;
        let array_index = match reader.peek_tag() {
            Some(tag) if tag.context && tag.number == 2 && !tag.opening && !tag.closing => {
                let _ = reader.tag();
                Some(reader.unsigned(tag.length)?)
            }
            _ => None,
        };
        Some((object_type, instance, property, array_index))
    })();

    let (object_type, instance, property, array_index) = match parsed {
        Some(p) => p,
        None => return reject_pdu(invoke_id),
    };

    match property_value(
        world,
        objects,
        device_id,
        object_type,
        instance,
        property,
        array_index,
    ) {
        Ok(value) => {
            let mut out = vec![0x30, invoke_id, 0x0C];
            out.push(0x0C);
            out.extend_from_slice(&pack_object_id(object_type, instance));
            if property <= 0xFF {
                out.extend_from_slice(&[0x19, property as u8]);
            } else {
                out.push(0x1A);
                out.extend_from_slice(&(property as u16).to_be_bytes());
            }
            if let Some(idx) = array_index {
                out.push(0x29);
                out.push(idx as u8);
            }
            out.push(0x3E);
            out.extend_from_slice(&value);
            out.push(0x3F);
            out
        }
        Err((class, code)) => error_pdu(invoke_id, 0x0C, class, code),
    }
}

fn handle_read_property_multiple(
    world: &World,
    objects: &ObjectMap,
    device_id: u32,
    invoke_id: u8,
    body: &[u8],
) -> Vec<u8> {
    let mut reader = Reader::new(body);
    let mut out = vec![0x30, invoke_id, 0x0E];

    loop {
        let obj_tag = match reader.tag() {
            Some(t) if t.context && t.number == 0 => t,
            Some(_) => return reject_pdu(invoke_id),
            None => break,
        };
        let raw = match reader.unsigned(obj_tag.length) {
            Some(v) => v,
            None => return reject_pdu(invoke_id),
        };
        let (object_type, instance) = unpack_object_id(raw);

        // listOfPropertyReferences inside opening/closing context tag 1
        match reader.tag() {
            Some(t) if t.opening && t.number == 1 => {}
            _ => return reject_pdu(invoke_id),
        }
        let mut properties = Vec::new();
        loop {
            match reader.tag() {
                Some(t) if t.closing && t.number == 1 => break,
                Some(t) if t.context && t.number == 0 => match reader.unsigned(t.length) {
                    Some(p) => properties.push(p),
                    None => return reject_pdu(invoke_id),
                },
                _ => return reject_pdu(invoke_id),
            }
        }

        out.push(0x0C);
        out.extend_from_slice(&pack_object_id(object_type, instance));
        out.push(0x1E);
        for property in properties {
            out.push(0x29);
            out.push(property.min(255) as u8);
            match property_value(
                world,
                objects,
                device_id,
                object_type,
                instance,
                property,
                None,
            ) {
                Ok(value) => {
                    out.push(0x4E);
                    out.extend_from_slice(&value);
                    out.push(0x4F);
                }
                Err((class, code)) => {
                    out.push(0x5E);
                    out.extend_from_slice(&[0x91, class, 0x91, code]);
                    out.push(0x5F);
                }
            }
        }
        out.push(0x1F);
    }
    out
}

fn handle_write_property(
    world: &World,
    objects: &ObjectMap,
    source: &str,
    invoke_id: u8,
    body: &[u8],
) -> Vec<u8> {
    let mut reader = Reader::new(body);
    let parsed = (|| {
        let obj_tag = reader.tag()?;
        if !obj_tag.context || obj_tag.number != 0 {
            return None;
        }
        let raw = reader.unsigned(obj_tag.length)?;
        let (object_type, instance) = unpack_object_id(raw);

        let prop_tag = reader.tag()?;
        if !prop_tag.context || prop_tag.number != 1 {
            return None;
        }
        let property = reader.unsigned(prop_tag.length)?;

        // Optional property-array-index (context 2)
        if let Some(tag) = reader.peek_tag() {
            if tag.context && tag.number == 2 && !tag.opening && !tag.closing {
                let _ = reader.tag();
                reader.unsigned(tag.length)?;
            }
        }

        let open = reader.tag()?;
        if !open.opening || open.number != 3 {
            return None;
        }
        let value = reader.application_value()?;
        let close = reader.tag()?;
        if !close.closing || close.number != 3 {
            return None;
        }

        let priority = match reader.peek_tag() {
            Some(tag) if tag.context && tag.number == 4 => {
                let _ = reader.tag();
                reader.unsigned(tag.length)? as u8
            }
            _ => 16,
        };
        Some((object_type, instance, property, value, priority))
    })();

    let (object_type, instance, property, value, priority) = match parsed {
        Some(p) => p,
        None => return reject_pdu(invoke_id),
    };

    if property != PROP_PRESENT_VALUE {
        return error_pdu(invoke_id, 0x0F, ERROR_CLASS_PROPERTY, ERROR_CODE_WRITE_ACCESS_DENIED);
    }
    let path = match objects.resolve(object_type, instance) {
        Some(p) => p,
        None => return error_pdu(invoke_id, 0x0F, ERROR_CLASS_OBJECT, ERROR_CODE_UNKNOWN_OBJECT),
    };

    let result = match value {
        // Writing Null relinquishes the slot
        Decoded::Null => world.release_point(path, Some(priority)).map(|_| ()),
        Decoded::Number(raw) => {
            // Multi-state present values are 1-based on the wire
            let raw = if object_type == OBJECT_MULTI_STATE_VALUE {
                raw - 1.0
            } else {
                raw
            };
            world.override_point(path, raw, priority, source, None)
        }
    };
    match result {
        Ok(()) => simple_ack(invoke_id, 0x0F),
        Err(err) => sim_error_pdu(invoke_id, 0x0F, &err),
    }
}

/// Strip an incoming NPDU down to its APDU. Handles the version/control
/// header plus optional destination and source addressing.
pub fn npdu_strip(npdu: &[u8]) -> Option<&[u8]> {
    if npdu.len() < 2 || npdu[0] != 0x01 {
        return None;
    }
    let control = npdu[1];
    // Network-layer messages carry no APDU
    if control & 0x80 != 0 {
        return None;
    }
    let mut offset = 2;
    if control & 0x20 != 0 {
        // DNET(2) DLEN(1) DADR(DLEN)
        let dlen = *npdu.get(offset + 2)? as usize;
        offset += 3 + dlen;
    }
    if control & 0x08 != 0 {
        let slen = *npdu.get(offset + 2)? as usize;
        offset += 3 + slen;
    }
    if control & 0x20 != 0 {
        // Hop count trails the addressing block
        offset += 1;
    }
    npdu.get(offset..)
}

/// Wrap an APDU in a plain local NPDU.
pub fn npdu_wrap(apdu: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(apdu.len() + 2);
    out.push(0x01);
    out.push(0x00);
    out.extend_from_slice(apdu);
    out
}
