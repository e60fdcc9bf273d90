//! Opaque Metadata Handles
//!
//! Handles are small copyable identifiers issued by the type system. The
//! resolution stage never looks inside them; it only compares them and hands
//! them back to the services that issued them.

use std::fmt;

// =============================================================================
// Class / Method Handles
// =============================================================================

/// Identifies a class (reference type, value type or interface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassHandle(pub u32);

impl ClassHandle {
    /// Create a new class handle.
    #[inline]
    pub const fn new(id: u32) -> Self {
        ClassHandle(id)
    }

    /// Get the raw handle value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClassHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// Identifies a method (a specific instantiation when generic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodHandle(pub u32);

impl MethodHandle {
    /// Create a new method handle.
    #[inline]
    pub const fn new(id: u32) -> Self {
        MethodHandle(id)
    }

    /// Get the raw handle value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method#{}", self.0)
    }
}

// =============================================================================
// Call Site Identity
// =============================================================================

/// Identifies one call instruction: the method containing it and the
/// bytecode offset of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSiteId {
    /// Method whose body contains the call.
    pub method: MethodHandle,
    /// Bytecode offset of the call instruction.
    pub il_offset: u32,
}

impl CallSiteId {
    /// Create a new call-site identifier.
    #[inline]
    pub const fn new(method: MethodHandle, il_offset: u32) -> Self {
        Self { method, il_offset }
    }
}

impl fmt::Display for CallSiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@IL_{:04x}", self.method, self.il_offset)
    }
}

// =============================================================================
// Exact Generic Context
// =============================================================================

/// The generic context a resolved method runs under.
///
/// Shared generic code needs either the owning class or the exact method
/// instantiation to recover its type arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExactContext {
    /// Context is the exact owning class.
    Class(ClassHandle),
    /// Context is the exact method instantiation.
    Method(MethodHandle),
}

impl ExactContext {
    /// The class when this is a class context.
    #[inline]
    pub fn class(self) -> Option<ClassHandle> {
        match self {
            ExactContext::Class(cls) => Some(cls),
            ExactContext::Method(_) => None,
        }
    }

    /// The method when this is a method context.
    #[inline]
    pub fn method(self) -> Option<MethodHandle> {
        match self {
            ExactContext::Method(m) => Some(m),
            ExactContext::Class(_) => None,
        }
    }
}

impl fmt::Display for ExactContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExactContext::Class(cls) => write!(f, "ctx({})", cls),
            ExactContext::Method(m) => write!(f, "ctx({})", m),
        }
    }
}

/// Importer-local temporary created by a receiver rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

/// Importer-owned expression the receiver or an argument refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        assert_eq!(ClassHandle::new(7).to_string(), "class#7");
        assert_eq!(MethodHandle::new(3).to_string(), "method#3");
        let site = CallSiteId::new(MethodHandle::new(1), 0x1a);
        assert_eq!(site.to_string(), "method#1@IL_001a");
    }

    #[test]
    fn test_exact_context_accessors() {
        let cls = ExactContext::Class(ClassHandle::new(2));
        assert_eq!(cls.class(), Some(ClassHandle::new(2)));
        assert_eq!(cls.method(), None);

        let m = ExactContext::Method(MethodHandle::new(9));
        assert_eq!(m.method(), Some(MethodHandle::new(9)));
        assert_eq!(m.class(), None);
    }
}
