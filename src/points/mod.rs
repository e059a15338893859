pub mod point;

pub use point::{OverrideSlot, PointKind, PointMeta, PointValue, PriorityArray};

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::error::{SimError, SimResult};

/// What a registry read returns: the effective value plus enough metadata
/// for any protocol to encode it.
#[derive(Debug, Clone, Serialize)]
pub struct PointReading {
    pub value: PointValue,
    pub kind: PointKind,
    pub units: &'static str,
    pub writable: bool,
    pub overridden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_priority: Option<u8>,
}

struct Entry {
    meta: PointMeta,
    overrides: RwLock<PriorityArray>,
}

/// Address space of the simulated world.
///
/// The path set is fixed at assembly time; only values change afterwards.
/// Present values live in a snapshot map swapped once per tick, so readers
/// always observe a whole tick. Priority arrays are per-point locks updated
/// live by protocol writes.
pub struct PointRegistry {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
    present: RwLock<Arc<HashMap<String, PointValue>>>,
}

/// Assembly-time constructor for the registry.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
    initial: HashMap<String, PointValue>,
}

impl RegistryBuilder {
    pub fn register(
        &mut self,
        path: impl Into<String>,
        kind: PointKind,
        units: &'static str,
        writable: bool,
        initial: PointValue,
    ) {
        let path = path.into();
        debug_assert!(
            !self.entries.contains_key(&path),
            "duplicate point path {path}"
        );
        self.entries.insert(
            path.clone(),
            Entry {
                meta: PointMeta {
                    kind,
                    units,
                    writable,
                },
                overrides: RwLock::new(PriorityArray::default()),
            },
        );
        self.initial.insert(path.clone(), initial);
        self.order.push(path);
    }

    pub fn build(self) -> PointRegistry {
        PointRegistry {
            entries: self.entries,
            order: self.order,
            present: RwLock::new(Arc::new(self.initial)),
        }
    }
}

impl PointRegistry {
    fn entry(&self, path: &str) -> SimResult<&Entry> {
        self.entries
            .get(path)
            .ok_or_else(|| SimError::UnknownPoint(path.to_string()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn meta(&self, path: &str) -> SimResult<&PointMeta> {
        Ok(&self.entry(path)?.meta)
    }

    /// All paths in registration order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Read the effective value of one point.
    pub fn read(&self, path: &str) -> SimResult<PointReading> {
        let entry = self.entry(path)?;
        let present = self.present.read().expect("present lock").clone();
        let overrides = entry.overrides.read().expect("override lock");
        let (priority, value) = match overrides.effective() {
            Some((pr, slot)) => (Some(pr), slot.value.clone()),
            None => (
                None,
                present
                    .get(path)
                    .cloned()
                    .unwrap_or(PointValue::Analog(0.0)),
            ),
        };
        Ok(PointReading {
            value,
            kind: entry.meta.kind,
            units: entry.meta.units,
            writable: entry.meta.writable,
            overridden: priority.is_some(),
            override_priority: priority,
        })
    }

    /// Numeric effective value, for protocol encodings and model feedback.
    pub fn effective_f64(&self, path: &str) -> SimResult<f64> {
        let reading = self.read(path)?;
        reading
            .value
            .as_f64()
            .ok_or_else(|| SimError::BadType(path.to_string()))
    }

    /// Winning override only, ignoring the model's present value. Equipment
    /// models use this to let a client-commanded value steer the physics.
    pub fn override_f64(&self, path: &str) -> Option<f64> {
        let entry = self.entries.get(path)?;
        let overrides = entry.overrides.read().expect("override lock");
        overrides.effective().and_then(|(_, s)| s.value.as_f64())
    }

    /// Apply a client override at `priority`, replacing any value already in
    /// that slot.
    pub fn override_point(
        &self,
        path: &str,
        raw: f64,
        priority: u8,
        source: &str,
        duration_seconds: Option<f64>,
        sim_now: f64,
    ) -> SimResult<()> {
        let entry = self.entry(path)?;
        if !entry.meta.writable {
            return Err(SimError::NotWritable(path.to_string()));
        }
        if !(1..=16).contains(&priority) {
            return Err(SimError::BadPriority(priority));
        }
        let value = PointValue::coerce_for(entry.meta.kind, raw, path)?;
        let expires_at = duration_seconds.map(|d| sim_now + d.max(0.0));
        let mut overrides = entry.overrides.write().expect("override lock");
        overrides.set(
            priority,
            OverrideSlot {
                value,
                source: source.to_string(),
                expires_at,
            },
        )
    }

    /// Clear one slot (priority given) or the whole array (omitted).
    pub fn release(&self, path: &str, priority: Option<u8>) -> SimResult<bool> {
        let entry = self.entry(path)?;
        let mut overrides = entry.overrides.write().expect("override lock");
        match priority {
            Some(pr) => overrides.clear(pr),
            None => Ok(overrides.clear_all()),
        }
    }

    /// Drop every slot whose expiry is due. Called once at the top of each
    /// tick.
    pub fn expire(&self, now: f64) {
        for entry in self.entries.values() {
            let needs_expiry = {
                let overrides = entry.overrides.read().expect("override lock");
                let any_expired = overrides
                    .occupied()
                    .any(|(_, s)| matches!(s.expires_at, Some(at) if at <= now));
                any_expired
            };
            if needs_expiry {
                entry.overrides.write().expect("override lock").expire(now);
            }
        }
    }

    /// Swap in a new present-value snapshot containing this tick's writes.
    /// Only the tick driver calls this; ownership of present values is a
    /// structural property of assembly.
    pub(crate) fn publish_tick(&self, batch: Vec<(String, PointValue)>) {
        let current = self.present.read().expect("present lock").clone();
        let mut next: HashMap<String, PointValue> = (*current).clone();
        for (path, value) in batch {
            debug_assert!(self.entries.contains_key(&path), "unowned path {path}");
            next.insert(path, value);
        }
        *self.present.write().expect("present lock") = Arc::new(next);
    }

    /// Point-in-time copy of every point under `prefix` (or all points).
    pub fn snapshot(&self, prefix: Option<&str>) -> BTreeMap<String, PointReading> {
        let present = self.present.read().expect("present lock").clone();
        let mut out = BTreeMap::new();
        for path in &self.order {
            if let Some(pfx) = prefix {
                if !path.starts_with(pfx) {
                    continue;
                }
            }
            let entry = &self.entries[path];
            let overrides = entry.overrides.read().expect("override lock");
            let (priority, value) = match overrides.effective() {
                Some((pr, slot)) => (Some(pr), slot.value.clone()),
                None => (
                    None,
                    present
                        .get(path)
                        .cloned()
                        .unwrap_or(PointValue::Analog(0.0)),
                ),
            };
            out.insert(
                path.clone(),
                PointReading {
                    value,
                    kind: entry.meta.kind,
                    units: entry.meta.units,
                    writable: entry.meta.writable,
                    overridden: priority.is_some(),
                    override_priority: priority,
                },
            );
        }
        out
    }

    /// Every occupied override slot: path → priority → slot.
    pub fn overrides_map(&self) -> BTreeMap<String, BTreeMap<u8, OverrideSlot>> {
        let mut out = BTreeMap::new();
        for path in &self.order {
            let entry = &self.entries[path];
            let overrides = entry.overrides.read().expect("override lock");
            let slots: BTreeMap<u8, OverrideSlot> = overrides
                .occupied()
                .map(|(pr, s)| (pr, s.clone()))
                .collect();
            if !slots.is_empty() {
                out.insert(path.clone(), slots);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PointRegistry {
        let mut b = RegistryBuilder::default();
        b.register(
            "Plant.Chiller_1.chw_supply_temp",
            PointKind::Analog,
            "°F",
            true,
            PointValue::Analog(44.0),
        );
        b.register(
            "Plant.Chiller_1.status",
            PointKind::Binary,
            "",
            true,
            PointValue::Binary(false),
        );
        b.register(
            "Plant.Chiller_1.kw",
            PointKind::Analog,
            "kW",
            false,
            PointValue::Analog(0.0),
        );
        b.build()
    }

    #[test]
    fn read_unknown_point_fails() {
        let reg = registry();
        assert!(matches!(
            reg.read("Nope.missing"),
            Err(SimError::UnknownPoint(_))
        ));
    }

    #[test]
    fn override_shadows_present_value() {
        let reg = registry();
        reg.override_point("Plant.Chiller_1.chw_supply_temp", 50.0, 8, "test", None, 0.0)
            .unwrap();
        let reading = reg.read("Plant.Chiller_1.chw_supply_temp").unwrap();
        assert_eq!(reading.value, PointValue::Analog(50.0));
        assert_eq!(reading.override_priority, Some(8));

        // lower index beats it
        reg.override_point("Plant.Chiller_1.chw_supply_temp", 40.0, 3, "test", None, 0.0)
            .unwrap();
        assert_eq!(
            reg.effective_f64("Plant.Chiller_1.chw_supply_temp").unwrap(),
            40.0
        );
    }

    #[test]
    fn release_restores_pre_override_value() {
        let reg = registry();
        let before = reg.effective_f64("Plant.Chiller_1.chw_supply_temp").unwrap();
        reg.override_point("Plant.Chiller_1.chw_supply_temp", 60.0, 8, "test", None, 0.0)
            .unwrap();
        reg.release("Plant.Chiller_1.chw_supply_temp", Some(8))
            .unwrap();
        assert_eq!(
            reg.effective_f64("Plant.Chiller_1.chw_supply_temp").unwrap(),
            before
        );
    }

    #[test]
    fn non_writable_point_rejects_override() {
        let reg = registry();
        assert!(matches!(
            reg.override_point("Plant.Chiller_1.kw", 1.0, 8, "test", None, 0.0),
            Err(SimError::NotWritable(_))
        ));
    }

    #[test]
    fn binary_point_rejects_non_boolean() {
        let reg = registry();
        assert!(matches!(
            reg.override_point("Plant.Chiller_1.status", 0.5, 8, "test", None, 0.0),
            Err(SimError::BadType(_))
        ));
        reg.override_point("Plant.Chiller_1.status", 1.0, 8, "test", None, 0.0)
            .unwrap();
        assert_eq!(reg.effective_f64("Plant.Chiller_1.status").unwrap(), 1.0);
    }

    #[test]
    fn expiry_clears_slot_after_duration() {
        let reg = registry();
        reg.override_point(
            "Plant.Chiller_1.chw_supply_temp",
            55.0,
            4,
            "test",
            Some(60.0),
            100.0,
        )
        .unwrap();
        reg.expire(159.0);
        assert!(reg
            .read("Plant.Chiller_1.chw_supply_temp")
            .unwrap()
            .overridden);
        reg.expire(161.0);
        let reading = reg.read("Plant.Chiller_1.chw_supply_temp").unwrap();
        assert!(!reading.overridden);
        assert!(reg.overrides_map().is_empty());
    }

    #[test]
    fn publish_tick_swaps_snapshot_atomically() {
        let reg = registry();
        reg.publish_tick(vec![
            (
                "Plant.Chiller_1.chw_supply_temp".to_string(),
                PointValue::Analog(45.5),
            ),
            ("Plant.Chiller_1.kw".to_string(), PointValue::Analog(120.0)),
        ]);
        let snap = reg.snapshot(Some("Plant.Chiller_1"));
        assert_eq!(
            snap["Plant.Chiller_1.chw_supply_temp"].value,
            PointValue::Analog(45.5)
        );
        assert_eq!(snap["Plant.Chiller_1.kw"].value, PointValue::Analog(120.0));
    }
}
