//! Resource Declaration - Components register their host-visible resources
//!
//! A component obtains a [`ComponentId`] from the [`Registry`] and declares
//! registers, raw (strobe) registers and memories against it. Declarations
//! are appended in order and never reordered: the host driver's view of the
//! address space depends on that order.
//!
//! # Example
//! ```
//! use rhino_csr::{BankDecl, BusAccess, Field, Registry};
//!
//! let mut registry = Registry::new();
//! let wave = registry.add_component("wave");
//! let ids = registry.declare_bank(wave, BankDecl::new("wave")
//!     .uid(7)
//!     .register("period", vec![Field::new("period", 16, BusAccess::ReadWrite)])
//!     .raw("trigger", 8)
//!     .memory("samples", 16, 256)).unwrap();
//!
//! // magic + uid + period + trigger + samples
//! assert_eq!(ids.len(), 5);
//! assert_eq!(registry.resource(ids[2]).unwrap().name(), "wave_period");
//! ```

use std::collections::HashSet;

use serde::Deserialize;

use crate::{CsrError, Result};

/// Magic word presented by the first register of every UID bank
pub const UID_MAGIC: u32 = 0xc2d5_e717;

/// Widest register, raw register or memory element a resource may declare
pub const MAX_WIDTH_BITS: u32 = 64;

/// Opaque handle for a declaring component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) usize);

/// Opaque handle for a declared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) usize);

impl ResourceId {
    /// Position of the resource in declaration order
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Access mode of a field as seen from the host bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusAccess {
    #[serde(alias = "ro")]
    ReadOnly,
    #[serde(alias = "wo")]
    WriteOnly,
    #[serde(alias = "rw")]
    ReadWrite,
}

impl BusAccess {
    pub fn readable(self) -> bool {
        matches!(self, BusAccess::ReadOnly | BusAccess::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, BusAccess::WriteOnly | BusAccess::ReadWrite)
    }
}

/// A named bit field inside a register
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Field {
    pub name: String,
    pub width: u32,
    pub access: BusAccess,
    /// Value driven by the hardware until the host writes the field
    #[serde(default)]
    pub reset: u64,
}

impl Field {
    pub fn new(name: impl Into<String>, width: u32, access: BusAccess) -> Self {
        Self {
            name: name.into(),
            width,
            access,
            reset: 0,
        }
    }

    pub fn with_reset(mut self, reset: u64) -> Self {
        self.reset = reset;
        self
    }
}

/// Kind of a declared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Register,
    RawRegister,
    Memory,
}

/// Shape of a resource as declared by its component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceShape {
    /// Register made of ordered fields, first field in the least significant bits
    Register { fields: Vec<Field> },

    /// Strobe register: every host read and write is an event for the component
    RawRegister { width: u32 },

    /// Memory of `depth` elements, each `width` bits wide
    Memory {
        width: u32,
        depth: u32,
        host_read_only: bool,
    },
}

impl ResourceShape {
    pub fn register(fields: Vec<Field>) -> Self {
        ResourceShape::Register { fields }
    }

    pub fn raw(width: u32) -> Self {
        ResourceShape::RawRegister { width }
    }

    pub fn memory(width: u32, depth: u32) -> Self {
        ResourceShape::Memory {
            width,
            depth,
            host_read_only: false,
        }
    }

    pub fn read_only_memory(width: u32, depth: u32) -> Self {
        ResourceShape::Memory {
            width,
            depth,
            host_read_only: true,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceShape::Register { .. } => ResourceKind::Register,
            ResourceShape::RawRegister { .. } => ResourceKind::RawRegister,
            ResourceShape::Memory { .. } => ResourceKind::Memory,
        }
    }

    /// Width in bits of the register, or of one memory element
    pub fn bits(&self) -> u32 {
        match self {
            ResourceShape::Register { fields } => fields.iter().map(|f| f.width).sum(),
            ResourceShape::RawRegister { width } => *width,
            ResourceShape::Memory { width, .. } => *width,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        let invalid = |reason: String| CsrError::InvalidShape {
            name: name.into(),
            reason,
        };

        match self {
            ResourceShape::Register { fields } => {
                if fields.is_empty() {
                    return Err(invalid("register declares no fields".into()));
                }
                let mut seen = HashSet::new();
                for field in fields {
                    validate_name(&field.name)?;
                    if !seen.insert(field.name.as_str()) {
                        return Err(CsrError::DuplicateName {
                            name: format!("{}.{}", name, field.name),
                        });
                    }
                    if field.width == 0 {
                        return Err(invalid(format!("field {} has zero width", field.name)));
                    }
                    if field.width < 64 && field.reset >> field.width != 0 {
                        return Err(invalid(format!(
                            "reset value {:#x} does not fit field {} ({} bits)",
                            field.reset, field.name, field.width
                        )));
                    }
                }
            }
            ResourceShape::RawRegister { width } if *width == 0 => {
                return Err(invalid("raw register has zero width".into()));
            }
            ResourceShape::Memory { width, depth, .. } => {
                if *width == 0 {
                    return Err(invalid("memory elements have zero width".into()));
                }
                if *depth == 0 {
                    return Err(invalid("memory has zero depth".into()));
                }
            }
            ResourceShape::RawRegister { .. } => {}
        }

        if self.bits() > MAX_WIDTH_BITS {
            return Err(invalid(format!(
                "{} bits exceeds the {} bit limit",
                self.bits(),
                MAX_WIDTH_BITS
            )));
        }
        Ok(())
    }
}

/// A declared resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    name: String,
    component: ComponentId,
    shape: ResourceShape,
}

impl Resource {
    /// Symbol name, unique across the registry
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn component(&self) -> ComponentId {
        self.component
    }

    pub fn shape(&self) -> &ResourceShape {
        &self.shape
    }

    pub fn kind(&self) -> ResourceKind {
        self.shape.kind()
    }
}

/// Several resources declared in one call and packed into one register bank
#[derive(Debug, Clone, Default)]
pub struct BankDecl {
    name: String,
    uid: Option<u32>,
    resources: Vec<(String, ResourceShape)>,
}

impl BankDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: None,
            resources: Vec::new(),
        }
    }

    /// Prefix the bank with read-only `magic` and `uid` identification registers
    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn resource(mut self, name: impl Into<String>, shape: ResourceShape) -> Self {
        self.resources.push((name.into(), shape));
        self
    }

    pub fn register(self, name: impl Into<String>, fields: Vec<Field>) -> Self {
        self.resource(name, ResourceShape::register(fields))
    }

    pub fn raw(self, name: impl Into<String>, width: u32) -> Self {
        self.resource(name, ResourceShape::raw(width))
    }

    pub fn memory(self, name: impl Into<String>, width: u32, depth: u32) -> Self {
        self.resource(name, ResourceShape::memory(width, depth))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn expand(self) -> (String, Vec<(String, ResourceShape)>) {
        let mut resources = Vec::with_capacity(self.resources.len() + 2);
        if let Some(uid) = self.uid {
            resources.push(uid_register("magic", UID_MAGIC));
            resources.push(uid_register("uid", uid));
        }
        resources.extend(self.resources);
        (self.name, resources)
    }
}

fn uid_register(name: &str, value: u32) -> (String, ResourceShape) {
    let field = Field::new(name, 32, BusAccess::ReadOnly).with_reset(value as u64);
    (name.into(), ResourceShape::register(vec![field]))
}

/// One registration call, kept so the allocator can pack its registers together
#[derive(Debug, Clone)]
pub(crate) struct Declaration {
    pub(crate) name: String,
    pub(crate) resources: Vec<ResourceId>,
}

/// Ordered, append-only registry of component resources
#[derive(Debug, Default)]
pub struct Registry {
    components: Vec<String>,
    resources: Vec<Resource>,
    declarations: Vec<Declaration>,
    pub(crate) streams: Vec<crate::StreamPort>,
    names: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle for a declaring component
    pub fn add_component(&mut self, name: impl Into<String>) -> ComponentId {
        let id = ComponentId(self.components.len());
        self.components.push(name.into());
        id
    }

    pub fn component_name(&self, id: ComponentId) -> Option<&str> {
        self.components.get(id.0).map(String::as_str)
    }

    /// Declare a single resource
    ///
    /// A register gets a bank of its own; a memory gets its own slot.
    ///
    /// # Errors
    /// - `DuplicateName` if `name` is already registered
    /// - `InvalidName` / `InvalidShape` if the declaration is malformed
    /// - `UnknownComponent` if `component` was not issued by this registry
    pub fn register(
        &mut self,
        component: ComponentId,
        name: impl Into<String>,
        shape: ResourceShape,
    ) -> Result<ResourceId> {
        let name = name.into();
        let ids = self.declare(component, name.clone(), vec![(name, shape)], None)?;
        Ok(ids[0])
    }

    /// Declare several resources packed into one register bank
    ///
    /// Symbols are named `<bank>_<resource>`. Nothing is appended if any
    /// resource of the bank is rejected.
    pub fn declare_bank(&mut self, component: ComponentId, bank: BankDecl) -> Result<Vec<ResourceId>> {
        let (name, resources) = bank.expand();
        validate_name(&name)?;
        if resources.is_empty() {
            return Err(CsrError::InvalidShape {
                name,
                reason: "bank declares no resources".into(),
            });
        }
        self.declare(component, name.clone(), resources, Some(&name))
    }

    fn declare(
        &mut self,
        component: ComponentId,
        declaration: String,
        resources: Vec<(String, ResourceShape)>,
        prefix: Option<&str>,
    ) -> Result<Vec<ResourceId>> {
        self.check_component(component)?;

        let mut staged = Vec::with_capacity(resources.len());
        let mut batch = HashSet::new();
        for (local, shape) in resources {
            validate_name(&local)?;
            let name = match prefix {
                Some(prefix) => format!("{}_{}", prefix, local),
                None => local,
            };
            shape.validate(&name)?;
            if self.names.contains(&name) || !batch.insert(name.clone()) {
                return Err(CsrError::DuplicateName { name });
            }
            staged.push(Resource {
                name,
                component,
                shape,
            });
        }

        let mut ids = Vec::with_capacity(staged.len());
        for resource in staged {
            let id = ResourceId(self.resources.len());
            log::debug!(
                "Registered {} ({:?}, {} bits) for component {}",
                resource.name,
                resource.kind(),
                resource.shape.bits(),
                self.components[component.0]
            );
            self.names.insert(resource.name.clone());
            self.resources.push(resource);
            ids.push(id);
        }

        self.declarations.push(Declaration {
            name: declaration,
            resources: ids.clone(),
        });
        Ok(ids)
    }

    pub(crate) fn check_component(&self, component: ComponentId) -> Result<()> {
        if component.0 >= self.components.len() {
            return Err(CsrError::UnknownComponent(component));
        }
        Ok(())
    }

    /// Reserve a symbol name shared with the stream namespace
    pub(crate) fn claim_name(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        if !self.names.insert(name.to_string()) {
            return Err(CsrError::DuplicateName { name: name.into() });
        }
        Ok(())
    }

    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id.0)
    }

    /// All resources in declaration order
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn find(&self, name: &str) -> Option<ResourceId> {
        self.resources
            .iter()
            .position(|r| r.name == name)
            .map(ResourceId)
    }

    pub(crate) fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Names end up in a tab-separated text format, so whitespace is rejected
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CsrError::InvalidName { name: name.into() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw(name: &str, width: u32) -> Field {
        Field::new(name, width, BusAccess::ReadWrite)
    }

    #[test]
    fn test_register_preserves_declaration_order() {
        let mut registry = Registry::new();
        let comp = registry.add_component("comp");

        let a = registry.register(comp, "a", ResourceShape::raw(8)).unwrap();
        let b = registry.register(comp, "b", ResourceShape::memory(8, 16)).unwrap();
        let c = registry
            .register(comp, "c", ResourceShape::register(vec![rw("x", 4)]))
            .unwrap();

        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
        let names: Vec<_> = registry.resources().iter().map(Resource::name).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(registry.find("b"), Some(b));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = Registry::new();
        let first = registry.add_component("first");
        let second = registry.add_component("second");

        registry.register(first, "ctrl", ResourceShape::raw(8)).unwrap();
        let err = registry
            .register(second, "ctrl", ResourceShape::raw(8))
            .unwrap_err();

        assert_eq!(err, CsrError::DuplicateName { name: "ctrl".into() });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut registry = Registry::new();
        let comp = registry.add_component("comp");

        let err = registry
            .register(comp, "ctrl", ResourceShape::register(vec![rw("en", 1), rw("en", 1)]))
            .unwrap_err();
        assert!(matches!(err, CsrError::DuplicateName { name } if name == "ctrl.en"));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut registry = Registry::new();
        let comp = registry.add_component("comp");

        for name in ["", "has space", "tab\there", "new\nline"] {
            let err = registry.register(comp, name, ResourceShape::raw(8)).unwrap_err();
            assert!(matches!(err, CsrError::InvalidName { .. }), "{name:?}");
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_shapes_rejected() {
        let mut registry = Registry::new();
        let comp = registry.add_component("comp");

        let shapes = [
            ResourceShape::register(vec![]),
            ResourceShape::register(vec![rw("zero", 0)]),
            ResourceShape::register(vec![rw("a", 40), rw("b", 40)]),
            ResourceShape::raw(0),
            ResourceShape::memory(8, 0),
            ResourceShape::memory(0, 8),
            ResourceShape::register(vec![rw("small", 4).with_reset(0x10)]),
        ];
        for shape in shapes {
            let err = registry.register(comp, "r", shape.clone()).unwrap_err();
            assert!(matches!(err, CsrError::InvalidShape { .. }), "{shape:?}");
        }
    }

    #[test]
    fn test_unknown_component_rejected() {
        let mut other = Registry::new();
        other.add_component("a");
        let foreign = other.add_component("b");

        let mut registry = Registry::new();
        registry.add_component("only");
        let err = registry.register(foreign, "x", ResourceShape::raw(8)).unwrap_err();
        assert_eq!(err, CsrError::UnknownComponent(foreign));
    }

    #[test]
    fn test_bank_prefixes_names_and_adds_uid() {
        let mut registry = Registry::new();
        let comp = registry.add_component("leds");

        let ids = registry
            .declare_bank(comp, BankDecl::new("leds").uid(1).register("out", vec![rw("out", 8)]))
            .unwrap();

        let names: Vec<_> = ids
            .iter()
            .map(|id| registry.resource(*id).unwrap().name().to_string())
            .collect();
        assert_eq!(names, ["leds_magic", "leds_uid", "leds_out"]);

        let magic = registry.resource(ids[0]).unwrap();
        match magic.shape() {
            ResourceShape::Register { fields } => {
                assert_eq!(fields[0].reset, UID_MAGIC as u64);
                assert_eq!(fields[0].access, BusAccess::ReadOnly);
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn test_rejected_bank_appends_nothing() {
        let mut registry = Registry::new();
        let comp = registry.add_component("comp");
        registry.register(comp, "bank_b", ResourceShape::raw(8)).unwrap();

        let err = registry
            .declare_bank(comp, BankDecl::new("bank").raw("a", 8).raw("b", 8))
            .unwrap_err();

        assert_eq!(err, CsrError::DuplicateName { name: "bank_b".into() });
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.declarations().len(), 1);
    }

    #[test]
    fn test_bus_access_deserializes_short_forms() {
        #[derive(Deserialize)]
        struct Wrapper {
            access: Vec<BusAccess>,
        }

        let parsed: Wrapper = toml::from_str(r#"access = ["ro", "write_only", "rw"]"#).unwrap();
        assert_eq!(
            parsed.access,
            [BusAccess::ReadOnly, BusAccess::WriteOnly, BusAccess::ReadWrite]
        );
    }
}
