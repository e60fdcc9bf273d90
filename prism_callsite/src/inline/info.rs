//! Inline candidate snapshot attached to eligible call sites and guesses.

use crate::handles::{ExactContext, MethodHandle};
use crate::services::{ClassAttributes, MethodAttributes, MethodBodyInfo};
use crate::signature::{SigType, TargetAbi};

/// How the callee hands back a struct return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructReturnShape {
    /// The callee does not return a struct.
    NotStruct,
    /// Returned in one register.
    SingleReg { size: u32 },
    /// Returned in a register pair.
    MultiReg { size: u32 },
    /// Returned through a caller-allocated buffer.
    HiddenBuffer { size: u32 },
}

impl StructReturnShape {
    /// Classify a return type under `abi`.
    pub fn of(ret: SigType, abi: TargetAbi) -> Self {
        let SigType::Struct { size, .. } = ret else {
            return StructReturnShape::NotStruct;
        };
        let single = match abi {
            TargetAbi::Win64 => matches!(size, 1 | 2 | 4 | 8),
            TargetAbi::SysV64 | TargetAbi::Arm64 => size > 0 && size <= 8,
        };
        if single {
            StructReturnShape::SingleReg { size }
        } else if abi.returns_struct_in_multiple_regs(size) {
            StructReturnShape::MultiReg { size }
        } else {
            StructReturnShape::HiddenBuffer { size }
        }
    }
}

/// Facts captured when a target is found eligible for inlining.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineCandidateInfo {
    /// Method whose body would be inlined.
    pub callee: MethodHandle,
    /// Body facts of `callee`.
    pub body: MethodBodyInfo,
    /// Attributes of the owning class.
    pub class_attrs: ClassAttributes,
    /// Attributes of `callee`.
    pub method_attrs: MethodAttributes,
    /// Generic context the body runs under.
    pub exact_context: ExactContext,
    /// Struct return shape.
    pub struct_return: StructReturnShape,
    /// The callee asks to always be inlined.
    pub force_inline: bool,
    /// Guess likelihood, for guarded candidates.
    pub guard_likelihood: Option<u32>,
}
