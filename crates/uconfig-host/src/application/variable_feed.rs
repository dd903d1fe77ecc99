//! VariableFeed: schema-checked values of one device's variables.
//!
//! A device declares the type of every variable in its schema.  Broadcasts
//! are untrusted, so the feed only exposes a broadcast value when the named
//! variable exists and the value has the declared type.  Everything else is
//! logged and counted.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::{debug, warn};
use uconfig_core::{DeviceSchema, Value, VariableSpec};

use crate::application::device_registry::BroadcastSubscriber;

struct VariableSlot {
    spec: VariableSpec,
    value: watch::Sender<Option<Value>>,
}

/// Per-variable observable values, fed by a device's broadcasts.
///
/// Subscribe it to a device with
/// [`Device::subscribe`](crate::application::device_registry::Device::subscribe).
pub struct VariableFeed {
    slots: HashMap<String, VariableSlot>,
    mismatched: AtomicU64,
    unknown: AtomicU64,
}

impl VariableFeed {
    /// Creates a feed with one empty slot per variable in `schema`.
    pub fn new(schema: &DeviceSchema) -> Self {
        let slots = schema
            .variables
            .iter()
            .map(|spec| {
                let (value, _) = watch::channel(None);
                (
                    spec.name.clone(),
                    VariableSlot {
                        spec: spec.clone(),
                        value,
                    },
                )
            })
            .collect();
        Self {
            slots,
            mismatched: AtomicU64::new(0),
            unknown: AtomicU64::new(0),
        }
    }

    /// Follows one variable.  `None` if the schema does not declare it.
    pub fn watch(&self, name: &str) -> Option<watch::Receiver<Option<Value>>> {
        self.slots.get(name).map(|slot| slot.value.subscribe())
    }

    /// Latest accepted value of a variable.
    pub fn latest(&self, name: &str) -> Option<Value> {
        self.slots
            .get(name)
            .and_then(|slot| slot.value.borrow().clone())
    }

    pub fn spec(&self, name: &str) -> Option<&VariableSpec> {
        self.slots.get(name).map(|slot| &slot.spec)
    }

    /// Broadcasts rejected because the value type differs from the schema.
    pub fn mismatches(&self) -> u64 {
        self.mismatched.load(Ordering::Relaxed)
    }

    /// Broadcasts rejected because the schema has no such variable.
    pub fn unknown_variables(&self) -> u64 {
        self.unknown.load(Ordering::Relaxed)
    }
}

impl BroadcastSubscriber for VariableFeed {
    fn on_broadcast(&self, device: IpAddr, name: &str, value: &Value) {
        let Some(slot) = self.slots.get(name) else {
            self.unknown.fetch_add(1, Ordering::Relaxed);
            debug!("{device}: broadcast for undeclared variable {name:?}; ignored");
            return;
        };

        if value.value_type() != slot.spec.value_type {
            self.mismatched.fetch_add(1, Ordering::Relaxed);
            warn!(
                "{device}: variable {name:?} is declared {} but broadcast a {}; ignored",
                slot.spec.value_type,
                value.value_type()
            );
            return;
        }

        slot.value.send_replace(Some(value.clone()));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
