//! Permission Deriver - Host access rights of a resource
//!
//! The bits match the symbol table format: READ = 0x01, WRITE = 0x02.

use bitflags::bitflags;

use crate::{BusAccess, Resource, ResourceShape};

bitflags! {
    /// Host access rights published in the symbol table
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Permission: u8 {
        const READ  = 0x01;
        const WRITE = 0x02;
    }
}

impl Permission {
    /// Rights contributed by a single field
    pub fn of_access(access: BusAccess) -> Self {
        let mut permission = Permission::empty();
        if access.readable() {
            permission |= Permission::READ;
        }
        if access.writable() {
            permission |= Permission::WRITE;
        }
        permission
    }
}

/// Derive the permission bitmask of a resource from its shape
pub fn derive(resource: &Resource) -> Permission {
    derive_shape(resource.shape())
}

pub(crate) fn derive_shape(shape: &ResourceShape) -> Permission {
    match shape {
        ResourceShape::Register { fields } => fields
            .iter()
            .fold(Permission::empty(), |acc, f| acc | Permission::of_access(f.access)),
        ResourceShape::RawRegister { .. } => Permission::READ | Permission::WRITE,
        ResourceShape::Memory { host_read_only, .. } => {
            if *host_read_only {
                Permission::READ
            } else {
                Permission::READ | Permission::WRITE
            }
        }
    }
}
