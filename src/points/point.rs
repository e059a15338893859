use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// Data shape of a point. `Text` carries state labels (generator status
/// strings and the like); the numeric kinds map onto BACnet AV/BV/MSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    Analog,
    Binary,
    MultiState,
    Text,
}

/// A point's value. Binary and multi-state values are carried natively so
/// protocol encodings stay exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Analog(f64),
    Binary(bool),
    MultiState(u16),
    Text(String),
}

impl PointValue {
    pub fn kind(&self) -> PointKind {
        match self {
            PointValue::Analog(_) => PointKind::Analog,
            PointValue::Binary(_) => PointKind::Binary,
            PointValue::MultiState(_) => PointKind::MultiState,
            PointValue::Text(_) => PointKind::Text,
        }
    }

    /// Numeric projection used by the wire protocols; text points have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PointValue::Analog(v) => Some(*v),
            PointValue::Binary(b) => Some(if *b { 1.0 } else { 0.0 }),
            PointValue::MultiState(s) => Some(*s as f64),
            PointValue::Text(_) => None,
        }
    }

    /// Coerce a raw numeric write into this point kind's value space.
    pub fn coerce_for(kind: PointKind, raw: f64, path: &str) -> SimResult<PointValue> {
        if !raw.is_finite() {
            return Err(SimError::BadType(path.to_string()));
        }
        match kind {
            PointKind::Analog => Ok(PointValue::Analog(raw)),
            PointKind::Binary => {
                if raw == 0.0 || raw == 1.0 {
                    Ok(PointValue::Binary(raw != 0.0))
                } else {
                    Err(SimError::BadType(path.to_string()))
                }
            }
            PointKind::MultiState => {
                if raw >= 0.0 && raw <= u16::MAX as f64 && raw.fract() == 0.0 {
                    Ok(PointValue::MultiState(raw as u16))
                } else {
                    Err(SimError::BadType(path.to_string()))
                }
            }
            PointKind::Text => Err(SimError::BadType(path.to_string())),
        }
    }
}

impl From<f64> for PointValue {
    fn from(v: f64) -> Self {
        PointValue::Analog(v)
    }
}

impl From<bool> for PointValue {
    fn from(v: bool) -> Self {
        PointValue::Binary(v)
    }
}

impl From<u16> for PointValue {
    fn from(v: u16) -> Self {
        PointValue::MultiState(v)
    }
}

/// Static description of a point, fixed at assembly time.
#[derive(Debug, Clone, Serialize)]
pub struct PointMeta {
    pub kind: PointKind,
    pub units: &'static str,
    pub writable: bool,
}

/// One occupied slot in a priority array.
#[derive(Debug, Clone, Serialize)]
pub struct OverrideSlot {
    pub value: PointValue,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<f64>,
}

pub const PRIORITY_SLOTS: usize = 16;

/// BACnet-style 16-slot priority array; the lowest occupied index wins.
#[derive(Debug, Clone, Default)]
pub struct PriorityArray {
    slots: [Option<OverrideSlot>; PRIORITY_SLOTS],
}

impl PriorityArray {
    pub fn set(&mut self, priority: u8, slot: OverrideSlot) -> SimResult<()> {
        let idx = slot_index(priority)?;
        self.slots[idx] = Some(slot);
        Ok(())
    }

    pub fn clear(&mut self, priority: u8) -> SimResult<bool> {
        let idx = slot_index(priority)?;
        Ok(self.slots[idx].take().is_some())
    }

    pub fn clear_all(&mut self) -> bool {
        let any = self.slots.iter().any(Option::is_some);
        self.slots = Default::default();
        any
    }

    /// Winning override, if any slot is occupied.
    pub fn effective(&self) -> Option<(u8, &OverrideSlot)> {
        self.slots
            .iter()
            .enumerate()
            .find_map(|(i, s)| s.as_ref().map(|slot| (i as u8 + 1, slot)))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn expire(&mut self, now: f64) {
        for slot in self.slots.iter_mut() {
            let due = slot
                .as_ref()
                .and_then(|s| s.expires_at)
                .map_or(false, |at| at <= now);
            if due {
                *slot = None;
            }
        }
    }

    pub fn occupied(&self) -> impl Iterator<Item = (u8, &OverrideSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|slot| (i as u8 + 1, slot)))
    }
}

fn slot_index(priority: u8) -> SimResult<usize> {
    if (1..=PRIORITY_SLOTS as u8).contains(&priority) {
        Ok(priority as usize - 1)
    } else {
        Err(SimError::BadPriority(priority))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(v: f64) -> OverrideSlot {
        OverrideSlot {
            value: PointValue::Analog(v),
            source: "test".into(),
            expires_at: None,
        }
    }

    #[test]
    fn lowest_priority_index_wins() {
        let mut arr = PriorityArray::default();
        arr.set(8, slot(8.0)).unwrap();
        arr.set(4, slot(4.0)).unwrap();
        arr.set(12, slot(12.0)).unwrap();
        let (pr, s) = arr.effective().unwrap();
        assert_eq!(pr, 4);
        assert_eq!(s.value, PointValue::Analog(4.0));
        arr.clear(4).unwrap();
        assert_eq!(arr.effective().unwrap().0, 8);
    }

    #[test]
    fn priority_out_of_range_is_rejected() {
        let mut arr = PriorityArray::default();
        assert!(matches!(arr.set(0, slot(1.0)), Err(SimError::BadPriority(0))));
        assert!(matches!(
            arr.set(17, slot(1.0)),
            Err(SimError::BadPriority(17))
        ));
    }

    #[test]
    fn expiry_clears_due_slots_only() {
        let mut arr = PriorityArray::default();
        arr.set(
            3,
            OverrideSlot {
                value: PointValue::Analog(1.0),
                source: "a".into(),
                expires_at: Some(100.0),
            },
        )
        .unwrap();
        arr.set(5, slot(2.0)).unwrap();
        arr.expire(99.0);
        assert_eq!(arr.effective().unwrap().0, 3);
        arr.expire(100.0);
        assert_eq!(arr.effective().unwrap().0, 5);
    }

    #[test]
    fn coerce_respects_kind() {
        assert!(PointValue::coerce_for(PointKind::Binary, 1.0, "p").is_ok());
        assert!(PointValue::coerce_for(PointKind::Binary, 0.5, "p").is_err());
        assert!(PointValue::coerce_for(PointKind::MultiState, 3.0, "p").is_ok());
        assert!(PointValue::coerce_for(PointKind::MultiState, 3.5, "p").is_err());
        assert!(PointValue::coerce_for(PointKind::Analog, f64::NAN, "p").is_err());
    }
}
