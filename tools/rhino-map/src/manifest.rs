//! Design manifest - TOML description of a RHINO system
//!
//! ```toml
//! name = "led_flasher"
//!
//! [layout]
//! memory_overflow = "reject"
//!
//! [bridge]
//! timeout_cycles = 256
//!
//! [[component]]
//! name = "leds"
//! uid = 1
//!
//! [[component.resource]]
//! kind = "register"
//! name = "out"
//! fields = [{ name = "out", width = 8, access = "rw" }]
//!
//! [[stream]]
//! component = "dma"
//! name = "adc"
//! direction = "to_host"
//! width = 16
//! ```
//!
//! A component with a `uid` or `bank = true` declares one bank named after
//! the component. Otherwise each of its resources is registered on its own
//! under its bare name.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rhino_bridge::{BridgeConfig, ClockConfig};
use rhino_csr::{BankDecl, ComponentId, Field, LayoutConfig, Registry, ResourceShape, StreamDirection};
use serde::Deserialize;

/// Complete design description
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Design {
    pub name: Option<String>,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub clocks: ClockConfig,
    #[serde(default, rename = "component")]
    pub components: Vec<ComponentEntry>,
    #[serde(default, rename = "stream")]
    pub streams: Vec<StreamEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentEntry {
    pub name: String,
    pub uid: Option<u32>,
    #[serde(default)]
    pub bank: bool,
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceEntry {
    Register {
        name: String,
        fields: Vec<Field>,
    },
    Raw {
        name: String,
        width: u32,
    },
    Memory {
        name: String,
        width: u32,
        depth: u32,
        #[serde(default)]
        read_only: bool,
    },
}

impl ResourceEntry {
    fn to_parts(&self) -> (String, ResourceShape) {
        match self {
            ResourceEntry::Register { name, fields } => (name.clone(), ResourceShape::register(fields.clone())),
            ResourceEntry::Raw { name, width } => (name.clone(), ResourceShape::raw(*width)),
            ResourceEntry::Memory {
                name,
                width,
                depth,
                read_only,
            } => {
                let shape = if *read_only {
                    ResourceShape::read_only_memory(*width, *depth)
                } else {
                    ResourceShape::memory(*width, *depth)
                };
                (name.clone(), shape)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamEntry {
    pub component: String,
    pub name: String,
    pub direction: StreamDirection,
    pub width: u32,
}

impl Design {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read design {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid design {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let design: Design = toml::from_str(text)?;
        design.layout.validate()?;
        Ok(design)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("design")
    }

    /// Register every component, resource and stream in manifest order
    pub fn registry(&self) -> Result<Registry> {
        let mut registry = Registry::new();
        let mut ids: HashMap<String, ComponentId> = HashMap::new();

        for component in &self.components {
            let id = registry.add_component(component.name.clone());
            ids.insert(component.name.clone(), id);

            if component.uid.is_some() || component.bank {
                let mut bank = BankDecl::new(component.name.clone());
                if let Some(uid) = component.uid {
                    bank = bank.uid(uid);
                }
                for entry in &component.resources {
                    let (name, shape) = entry.to_parts();
                    bank = bank.resource(name, shape);
                }
                registry
                    .declare_bank(id, bank)
                    .with_context(|| format!("Component '{}'", component.name))?;
            } else {
                for entry in &component.resources {
                    let (name, shape) = entry.to_parts();
                    registry
                        .register(id, name, shape)
                        .with_context(|| format!("Component '{}'", component.name))?;
                }
            }
        }

        for stream in &self.streams {
            let id = *ids
                .entry(stream.component.clone())
                .or_insert_with(|| registry.add_component(stream.component.clone()));
            registry
                .request_stream(id, stream.name.clone(), stream.direction, stream.width)
                .with_context(|| format!("Stream '{}'", stream.name))?;
        }

        log::debug!("Design: {} resources registered", registry.len());
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhino_bridge::MetastablePolicy;
    use rhino_csr::{MemoryOverflow, ResourceTable};

    const DESIGN: &str = r#"
name = "demo"

[layout]
memory_overflow = "truncate"

[bridge]
timeout_cycles = 32
metastable_policy = "resolve_old"

[[component]]
name = "ctrl"

[[component.resource]]
kind = "register"
name = "ctrl"
fields = [
    { name = "mode", width = 8, access = "rw" },
    { name = "level", width = 8, access = "ro", reset = 3 },
]

[[component]]
name = "status"

[[component.resource]]
kind = "raw"
name = "status"
width = 8

[[component]]
name = "wave"
uid = 7

[[component.resource]]
kind = "memory"
name = "capture"
width = 8
depth = 64
read_only = true

[[stream]]
component = "dma"
name = "adc"
direction = "to_host"
width = 16
"#;

    #[test]
    fn test_parse_design() {
        let design = Design::parse(DESIGN).unwrap();

        assert_eq!(design.display_name(), "demo");
        assert_eq!(design.layout.memory_overflow, MemoryOverflow::Truncate);
        assert_eq!(design.bridge.timeout_cycles, Some(32));
        assert_eq!(design.bridge.metastable_policy, MetastablePolicy::ResolveOld);
        assert_eq!(design.components.len(), 3);
        assert_eq!(design.streams.len(), 1);
    }

    #[test]
    fn test_registry_naming() {
        let registry = Design::parse(DESIGN).unwrap().registry().unwrap();
        let table = ResourceTable::build(&registry, &LayoutConfig::default()).unwrap();

        let names: Vec<&str> = table.symbols().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["ctrl", "status", "wave_magic", "wave_uid", "wave_capture", "adc"]
        );
        assert_eq!(
            table.symbols().lookup("ctrl").unwrap().to_string(),
            "ctrl\t3\t0x08000000\t0x4\n"
        );
    }

    #[test]
    fn test_duplicate_names_are_reported() {
        let text = r#"
[[component]]
name = "a"
[[component.resource]]
kind = "raw"
name = "x"
width = 8

[[component]]
name = "b"
[[component.resource]]
kind = "raw"
name = "x"
width = 8
"#;
        let err = Design::parse(text).unwrap().registry().unwrap_err();
        assert!(format!("{err:#}").contains("Component 'b'"));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(Design::parse("colour = \"blue\"").is_err());
        assert!(Design::parse("[layout]\nbank_stride = 3").is_err());
    }

    #[test]
    fn test_shipped_design_runs_through_bridge() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("designs/led_flasher.toml");
        let design = Design::load(&path).unwrap();
        let registry = design.registry().unwrap();
        let table = ResourceTable::build(&registry, &design.layout).unwrap();

        let bridge = rhino_bridge::BusBridge::new(design.bridge.clone(), &table).unwrap();
        let file = rhino_bridge::RegisterFile::new(&table);
        let mut sim = rhino_bridge::Simulation::new(bridge, file, design.clocks.clone()).unwrap();

        let out = table.csr_address_of("leds_out").unwrap() as u16;
        sim.write(out, 0x81).unwrap();
        assert_eq!(sim.read(out).unwrap(), 0x81);

        let ctrl = table.csr_address_of("leds_ctrl").unwrap() as u16;
        assert_eq!(sim.read(ctrl).unwrap(), 0x10);
    }
}
