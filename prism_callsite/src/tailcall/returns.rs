//! Return-type compatibility between a tail caller and its callee.

use crate::signature::{SigType, TargetAbi};

/// Whether `callee_ret` can be returned directly as the caller's result.
///
/// `explicit` is true for `tail.` prefixed calls, `both_managed` when caller
/// and callee use the managed convention.
pub fn returns_compatible(
    caller_ret: SigType,
    callee_ret: SigType,
    explicit: bool,
    both_managed: bool,
    abi: TargetAbi,
) -> bool {
    if caller_ret == callee_ret {
        return true;
    }
    match (caller_ret, callee_ret) {
        // A void caller discards whatever the callee leaves behind.
        (SigType::Void, _) => true,
        (caller, callee) if caller.is_small_integral() && callee.is_small_integral() => {
            !explicit && both_managed && callee.size() <= caller.size()
        }
        (
            SigType::Struct {
                layout: a,
                size: caller_size,
            },
            SigType::Struct {
                layout: b,
                size: callee_size,
            },
        ) => {
            a == b
                || (caller_size == callee_size && abi.returns_struct_in_multiple_regs(caller_size))
        }
        _ => false,
    }
}
