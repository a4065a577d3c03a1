//! Stream ports - Streaming/DMA windows published next to the registers
//!
//! Ports live in their own region. Every from-host port is placed before
//! every to-host port, each group in request order, one window per port.

use serde::Deserialize;

use crate::resource::validate_name;
use crate::{ComponentId, CsrError, LayoutConfig, Permission, Registry, Result};

/// Direction of a stream port, seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamDirection {
    FromHost,
    ToHost,
}

impl StreamDirection {
    /// The host writes into from-host ports and reads from to-host ports
    pub fn permission(self) -> Permission {
        match self {
            StreamDirection::FromHost => Permission::WRITE,
            StreamDirection::ToHost => Permission::READ,
        }
    }
}

/// Opaque handle for a requested stream port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub(crate) usize);

/// A requested stream port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPort {
    pub name: String,
    pub component: ComponentId,
    pub direction: StreamDirection,
    pub data_width: u32,
}

/// Window assigned to a stream port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSlot {
    pub stream: StreamId,
    pub base_address: u32,
    pub length: u32,
}

/// Allocated stream region
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMap {
    slots: Vec<StreamSlot>,
}

impl StreamMap {
    /// Slots in allocation order (from-host first)
    pub fn slots(&self) -> &[StreamSlot] {
        &self.slots
    }

    pub fn slot(&self, stream: StreamId) -> Option<&StreamSlot> {
        self.slots.iter().find(|s| s.stream == stream)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Registry {
    /// Request a stream port for `component`
    ///
    /// Stream names share the namespace of register and memory symbols.
    pub fn request_stream(
        &mut self,
        component: ComponentId,
        name: impl Into<String>,
        direction: StreamDirection,
        data_width: u32,
    ) -> Result<StreamId> {
        let name = name.into();
        self.check_component(component)?;
        validate_name(&name)?;
        if data_width == 0 {
            return Err(CsrError::InvalidShape {
                name,
                reason: "stream has zero data width".into(),
            });
        }
        self.claim_name(&name)?;

        let id = StreamId(self.streams.len());
        log::debug!("Stream {} requested ({:?}, {} bits)", name, direction, data_width);
        self.streams.push(StreamPort {
            name,
            component,
            direction,
            data_width,
        });
        Ok(id)
    }

    /// Stream ports in request order
    pub fn streams(&self) -> &[StreamPort] {
        &self.streams
    }

    pub fn stream(&self, id: StreamId) -> Option<&StreamPort> {
        self.streams.get(id.0)
    }
}

pub(crate) fn allocate_streams(registry: &Registry, layout: &LayoutConfig) -> Result<StreamMap> {
    let mut map = StreamMap::default();
    let mut offset = 0u64;

    for direction in [StreamDirection::FromHost, StreamDirection::ToHost] {
        for (index, port) in registry.streams().iter().enumerate() {
            if port.direction != direction {
                continue;
            }
            let end = offset + layout.stream_port_range as u64;
            if end > layout.stream_region_size as u64 {
                return Err(CsrError::AddressSpaceExhausted {
                    name: port.name.clone(),
                    requested: end,
                    available: layout.stream_region_size as u64,
                });
            }
            map.slots.push(StreamSlot {
                stream: StreamId(index),
                base_address: layout.stream_base + offset as u32,
                length: layout.stream_port_range,
            });
            offset = end;
        }
    }

    Ok(map)
}
