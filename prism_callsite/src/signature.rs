//! Method Signatures and Calling Conventions
//!
//! Only the parts of a signature the resolution stage reasons about are
//! modelled: parameter and return types, whether an implicit `this` is
//! passed, and the calling convention.

use crate::handles::ClassHandle;
use serde::Deserialize;
use smallvec::SmallVec;

// =============================================================================
// Signature Types
// =============================================================================

/// A parameter or return type as seen by the call-site stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigType {
    /// No value.
    Void,
    /// Boolean (1 byte).
    Bool,
    /// UTF-16 code unit (2 bytes).
    Char,
    /// Integer of the given byte width.
    Int { size: u8, signed: bool },
    /// Floating point of the given byte width.
    Float { size: u8 },
    /// Object reference.
    Ref,
    /// Managed pointer.
    ByRef,
    /// Native-sized integer / unmanaged pointer.
    NativeInt,
    /// Value type with an explicit layout.
    Struct { layout: ClassHandle, size: u32 },
}

impl SigType {
    /// 32-bit signed integer.
    pub const I4: SigType = SigType::Int {
        size: 4,
        signed: true,
    };

    /// 64-bit signed integer.
    pub const I8: SigType = SigType::Int {
        size: 8,
        signed: true,
    };

    /// Size of the type in bytes, `None` for `Void`.
    pub fn size(self) -> Option<u32> {
        match self {
            SigType::Void => None,
            SigType::Bool => Some(1),
            SigType::Char => Some(2),
            SigType::Int { size, .. } | SigType::Float { size } => Some(size as u32),
            SigType::Ref | SigType::ByRef | SigType::NativeInt => Some(8),
            SigType::Struct { size, .. } => Some(size),
        }
    }

    /// Whether this is an integral type that is widened to 4 bytes when
    /// returned in a register.
    #[inline]
    pub fn is_small_integral(self) -> bool {
        match self {
            SigType::Bool | SigType::Char => true,
            SigType::Int { size, .. } => size <= 4,
            _ => false,
        }
    }

    /// Whether this is a struct.
    #[inline]
    pub fn is_struct(self) -> bool {
        matches!(self, SigType::Struct { .. })
    }
}

// =============================================================================
// Calling Convention
// =============================================================================

/// Calling convention declared by a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallConv {
    /// Managed default convention.
    #[default]
    Managed,
    /// Managed variable-argument convention, where the caller pops arguments.
    VarArgs,
    /// Unmanaged (native) convention.
    Unmanaged,
}

impl CallConv {
    /// Whether an indirect call with this convention carries a
    /// calling-convention cookie.
    #[inline]
    pub fn needs_cookie(self) -> bool {
        !matches!(self, CallConv::Managed)
    }
}

/// Target ABI, used for the multi-register struct return rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetAbi {
    /// System V AMD64 ABI.
    #[default]
    SysV64,
    /// Microsoft x64 ABI.
    Win64,
    /// AArch64 procedure call standard.
    Arm64,
}

impl TargetAbi {
    /// Whether a struct of `size` bytes is returned in more than one register.
    pub fn returns_struct_in_multiple_regs(self, size: u32) -> bool {
        match self {
            TargetAbi::SysV64 | TargetAbi::Arm64 => size > 8 && size <= 16,
            TargetAbi::Win64 => false,
        }
    }
}

// =============================================================================
// Signature
// =============================================================================

/// A method or call-site signature.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    /// Declared parameter types, excluding `this`.
    pub params: SmallVec<[SigType; 4]>,
    /// Return type.
    pub ret: SigType,
    /// Whether an implicit `this` is passed.
    pub has_this: bool,
    /// Calling convention.
    pub conv: CallConv,
}

impl Default for SigType {
    fn default() -> Self {
        SigType::Void
    }
}

impl Signature {
    /// Create a managed signature.
    pub fn new(params: &[SigType], ret: SigType) -> Self {
        Self {
            params: params.iter().copied().collect(),
            ret,
            has_this: false,
            conv: CallConv::Managed,
        }
    }

    /// Mark as an instance signature.
    pub fn with_this(mut self) -> Self {
        self.has_this = true;
        self
    }

    /// Set the calling convention.
    pub fn with_conv(mut self, conv: CallConv) -> Self {
        self.conv = conv;
        self
    }

    /// Number of declared parameters.
    #[inline]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Whether `other` accepts exactly the same explicit arguments.
    pub fn params_match(&self, other: &Signature) -> bool {
        self.params == other.params
    }
}
