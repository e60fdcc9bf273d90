//! Unboxed Entry Points
//!
//! A virtual method implemented by a value type expects a boxed `this`. Most
//! such methods also have an unboxed entry that takes the value directly.
//! When devirtualization lands on one, the receiver is rewritten:
//!
//! - **Box eliminated**: the box is visible and this call is its only
//!   consumer, so the boxed value is copied to a temp and passed directly.
//! - **Payload addressed**: the box stays alive (other consumers, or it is
//!   not visible) and the call receives the address of its payload.
//!
//! Shared generic unboxed entries additionally take the owning type handle as
//! a hidden first argument.

use crate::handles::{ClassHandle, MethodHandle};
use crate::services::TypeSystem;
use crate::site::{CallArg, CallSite, CallerContext, ReceiverExpr};

/// How the receiver was rewritten for an unboxed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnboxRewrite {
    /// The box allocation was removed.
    BoxEliminated,
    /// The box is kept and its payload address is passed.
    PayloadAddressed,
}

/// Unboxed entry for `method` when its owner is a value type.
pub(crate) fn unboxed_entry_for(
    types: &dyn TypeSystem,
    method: MethodHandle,
) -> Option<MethodHandle> {
    let attrs = types.method_attributes(method)?;
    let owner = types.class_attributes(attrs.owner)?;
    if !owner.is_value_type {
        return None;
    }
    types.unboxed_entry(method)
}

/// Retarget `site` at `entry`, rewriting its receiver for value type `class`.
pub(crate) fn retarget_to_unboxed_entry(
    site: &mut CallSite,
    entry: MethodHandle,
    class: ClassHandle,
    types: &dyn TypeSystem,
    caller: &mut CallerContext,
) -> UnboxRewrite {
    let (receiver, rewrite) = match site.receiver_expr.take() {
        Some(ReceiverExpr::Boxed(b)) if b.other_uses == 0 => (
            ReceiverExpr::UnboxedLocal {
                local: caller.grab_temp(),
                value: b.value,
                class: b.class,
            },
            UnboxRewrite::BoxEliminated,
        ),
        Some(other) => (
            ReceiverExpr::BoxPayload {
                boxed: Box::new(other),
                class,
            },
            UnboxRewrite::PayloadAddressed,
        ),
        // Devirtualization always has a receiver; keep the shape consistent
        // if a caller built a site without one.
        None => {
            site.callee = Some(entry);
            site.callee_attrs = types.method_attributes(entry);
            return UnboxRewrite::PayloadAddressed;
        }
    };
    site.receiver_expr = Some(receiver);

    let entry_attrs = types.method_attributes(entry);
    if entry_attrs.is_some_and(|a| a.requires_inst_arg) {
        site.args.insert(0, CallArg::TypeHandle(class));
    }
    site.callee = Some(entry);
    site.callee_attrs = entry_attrs;
    if rewrite == UnboxRewrite::BoxEliminated {
        // A local copy of a value type is never null.
        site.requires_null_check = false;
    }
    rewrite
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::{CallSiteId, ExprId, LocalId};
    use crate::registry::TypeRegistry;
    use crate::services::{ClassAttributes, MethodAttributes};
    use crate::signature::{SigType, Signature};
    use crate::site::{BoxExpr, CallKind};

    fn setup() -> (TypeRegistry, ClassHandle, MethodHandle, MethodHandle) {
        let types = TypeRegistry::new();
        let point = types.define_class(
            ClassAttributes {
                is_value_type: true,
                is_sealed: true,
                ..Default::default()
            },
            None,
        );
        let sig = Signature::new(&[], SigType::I4).with_this();
        let boxed = types.define_method(MethodAttributes::virtual_method(point), sig.clone());
        let unboxed = types.define_method(MethodAttributes::instance(point), sig);
        types.set_unboxed_entry(boxed, unboxed);
        (types, point, boxed, unboxed)
    }

    fn site_with(receiver: ReceiverExpr) -> CallSite {
        let mut site = CallSite::new(
            CallSiteId::new(MethodHandle::new(50), 0),
            CallKind::Direct,
            None,
            Signature::new(&[], SigType::I4).with_this(),
        )
        .with_receiver_expr(receiver)
        .with_args(&[CallArg::Expr(ExprId(9))]);
        site.requires_null_check = true;
        site
    }

    #[test]
    fn test_unboxed_entry_only_for_value_types() {
        let (types, _, boxed, unboxed) = setup();
        assert_eq!(unboxed_entry_for(&types, boxed), Some(unboxed));

        let obj = types.define_class(ClassAttributes::default(), None);
        let m = types.define_method(MethodAttributes::virtual_method(obj), Signature::default());
        types.set_unboxed_entry(m, unboxed);
        assert_eq!(unboxed_entry_for(&types, m), None);
    }

    #[test]
    fn test_box_eliminated_when_sole_consumer() {
        let (types, point, _, unboxed) = setup();
        let mut caller = CallerContext::new(MethodHandle::new(50), Signature::default())
            .with_local_count(2);
        let mut site = site_with(ReceiverExpr::Boxed(BoxExpr {
            value: ExprId(3),
            class: point,
            other_uses: 0,
        }));

        let rewrite = retarget_to_unboxed_entry(&mut site, unboxed, point, &types, &mut caller);
        assert_eq!(rewrite, UnboxRewrite::BoxEliminated);
        assert_eq!(
            site.receiver_expr,
            Some(ReceiverExpr::UnboxedLocal {
                local: LocalId(2),
                value: ExprId(3),
                class: point,
            })
        );
        assert_eq!(site.callee, Some(unboxed));
        assert!(!site.requires_null_check);
        assert_eq!(site.args.len(), 1);
    }

    #[test]
    fn test_payload_addressed_when_box_shared() {
        let (types, point, _, unboxed) = setup();
        let mut caller = CallerContext::new(MethodHandle::new(50), Signature::default());
        let boxed = ReceiverExpr::Boxed(BoxExpr {
            value: ExprId(3),
            class: point,
            other_uses: 2,
        });
        let mut site = site_with(boxed.clone());

        let rewrite = retarget_to_unboxed_entry(&mut site, unboxed, point, &types, &mut caller);
        assert_eq!(rewrite, UnboxRewrite::PayloadAddressed);
        assert_eq!(
            site.receiver_expr,
            Some(ReceiverExpr::BoxPayload {
                boxed: Box::new(boxed),
                class: point,
            })
        );
        assert_eq!(caller.local_count(), 0);
    }

    #[test]
    fn test_shared_generic_entry_gets_type_handle() {
        let (types, point, _, unboxed) = setup();
        types.update_method_attributes(unboxed, |a| a.requires_inst_arg = true);
        let mut caller = CallerContext::new(MethodHandle::new(50), Signature::default());
        let mut site = site_with(ReceiverExpr::opaque(ExprId(1)));

        retarget_to_unboxed_entry(&mut site, unboxed, point, &types, &mut caller);
        assert_eq!(site.args[0], CallArg::TypeHandle(point));
        assert_eq!(site.args[1], CallArg::Expr(ExprId(9)));
    }
}
