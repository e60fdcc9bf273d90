//! Call Classification
//!
//! Assigns each call instruction a [`CallKind`] from the decoded descriptor
//! and the type system's call resolution. Classification runs once when the
//! call site is built, never consults profile data, and is idempotent.

use crate::error::{CompileError, CompileResult};
use crate::handles::CallSiteId;
use crate::services::{CallResolution, TypeSystem};
use crate::site::{CallDescriptor, CallKind, CallSite, CallTarget, StubAddress};
use tracing::trace;

/// Classify a call.
///
/// `resolution` is the type system's answer for the descriptor's method
/// token and is ignored for indirect calls.
pub fn classify(
    site: CallSiteId,
    desc: &CallDescriptor,
    resolution: Option<CallResolution>,
) -> CompileResult<CallKind> {
    let kind = match desc.target {
        CallTarget::Indirect {
            fn_ptr_on_stack: true,
        } => CallKind::IndirectCalli,
        CallTarget::Indirect {
            fn_ptr_on_stack: false,
        } => return Err(CompileError::MissingCallTarget { site }),
        CallTarget::Token(_) => match resolution {
            None => return Err(CompileError::UnresolvedToken { site }),
            Some(CallResolution::Direct) => CallKind::Direct,
            Some(CallResolution::VirtualStub { address_known }) => CallKind::VirtualDispatchStub {
                address: if address_known {
                    StubAddress::Known
                } else {
                    StubAddress::RuntimeLookup
                },
            },
            Some(CallResolution::VTableSlot { slot }) => CallKind::VirtualDispatchVTable { slot },
            Some(CallResolution::RuntimeCodePointer) => {
                CallKind::IndirectThroughResolvedFunctionPointer
            }
        },
    };

    trace!(site = %site, kind = kind.name(), "classified call");
    Ok(kind)
}

/// Build a call site from a decoded descriptor, classifying it and
/// snapshotting the callee's attributes.
pub fn build_call_site(
    id: CallSiteId,
    desc: &CallDescriptor,
    types: &dyn TypeSystem,
) -> CompileResult<CallSite> {
    let method = desc.method();
    let resolution = match method.and_then(|m| types.call_resolution(m)) {
        // A non-virtual call instruction binds to the named method itself.
        Some(CallResolution::VirtualStub { .. } | CallResolution::VTableSlot { .. })
            if !desc.is_virtual =>
        {
            Some(CallResolution::Direct)
        }
        other => other,
    };
    let kind = classify(id, desc, resolution)?;

    let mut site = CallSite::new(id, kind, method, desc.sig.clone());
    site.is_virtual = desc.is_virtual;
    site.is_interface_call = desc.is_interface;
    site.is_delegate_invoke = desc.is_delegate_invoke;
    site.is_explicit_tail = desc.explicit_tail;
    site.is_implicit_tail = desc.implicit_tail;
    site.callee_attrs = method.and_then(|m| types.method_attributes(m));

    // callvirt on a method the runtime calls directly still needs the null
    // check the dispatch would have performed.
    if desc.is_virtual && kind == CallKind::Direct {
        site.requires_null_check = true;
    }

    Ok(site)
}

impl CallSite {
    /// Build a classified call site from a decoded descriptor.
    pub fn from_descriptor(
        id: CallSiteId,
        desc: &CallDescriptor,
        types: &dyn TypeSystem,
    ) -> CompileResult<CallSite> {
        build_call_site(id, desc, types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::MethodHandle;
    use crate::signature::{SigType, Signature};

    fn id() -> CallSiteId {
        CallSiteId::new(MethodHandle::new(1), 0)
    }

    fn desc() -> CallDescriptor {
        CallDescriptor::token(MethodHandle::new(5), Signature::new(&[], SigType::Void))
    }

    #[test]
    fn test_classify_calli() {
        let d = CallDescriptor::calli(Signature::default());
        assert_eq!(classify(id(), &d, None), Ok(CallKind::IndirectCalli));
    }

    #[test]
    fn test_classify_indirect_without_pointer_fails() {
        let mut d = desc();
        d.target = CallTarget::Indirect {
            fn_ptr_on_stack: false,
        };
        assert_eq!(
            classify(id(), &d, None),
            Err(CompileError::MissingCallTarget { site: id() })
        );
    }

    #[test]
    fn test_classify_unresolved_token_fails() {
        assert!(matches!(
            classify(id(), &desc(), None),
            Err(CompileError::UnresolvedToken { .. })
        ));
    }

    #[test]
    fn test_classify_stub_variants_share_kind() {
        let known = classify(
            id(),
            &desc(),
            Some(CallResolution::VirtualStub {
                address_known: true,
            }),
        )
        .unwrap();
        let lookup = classify(
            id(),
            &desc(),
            Some(CallResolution::VirtualStub {
                address_known: false,
            }),
        )
        .unwrap();
        assert_eq!(
            known,
            CallKind::VirtualDispatchStub {
                address: StubAddress::Known
            }
        );
        assert!(known.same_kind(lookup));
    }

    #[test]
    fn test_classify_vtable_and_fptr() {
        assert_eq!(
            classify(id(), &desc(), Some(CallResolution::VTableSlot { slot: 7 })),
            Ok(CallKind::VirtualDispatchVTable { slot: 7 })
        );
        assert_eq!(
            classify(id(), &desc(), Some(CallResolution::RuntimeCodePointer)),
            Ok(CallKind::IndirectThroughResolvedFunctionPointer)
        );
        assert_eq!(
            classify(id(), &desc(), Some(CallResolution::Direct)),
            Ok(CallKind::Direct)
        );
    }

    #[test]
    fn test_classify_is_idempotent() {
        let d = desc();
        let res = Some(CallResolution::VTableSlot { slot: 2 });
        assert_eq!(classify(id(), &d, res), classify(id(), &d, res));
    }

    #[test]
    fn test_build_call_site_flags() {
        use crate::registry::TypeRegistry;
        use crate::services::{ClassAttributes, MethodAttributes};

        let types = TypeRegistry::new();
        let class = types.define_class(ClassAttributes::default(), None);
        let plain = types.define_method(MethodAttributes::instance(class), Signature::default());
        let desc = CallDescriptor {
            is_virtual: true,
            explicit_tail: true,
            ..CallDescriptor::token(plain, Signature::default())
        };

        let site = CallSite::from_descriptor(id(), &desc, &types).unwrap();
        assert_eq!(site.kind(), CallKind::Direct);
        assert!(site.is_virtual);
        assert!(site.is_explicit_tail);
        assert!(site.requires_null_check);
        assert_eq!(site.callee_attrs.map(|a| a.owner), Some(class));
    }

    #[test]
    fn test_non_virtual_call_to_virtual_method_is_direct() {
        use crate::registry::TypeRegistry;
        use crate::services::{ClassAttributes, MethodAttributes};

        let types = TypeRegistry::new();
        let class = types.define_class(ClassAttributes::default(), None);
        let speak =
            types.define_method(MethodAttributes::virtual_method(class), Signature::default());

        let desc = CallDescriptor::token(speak, Signature::default());
        let call = CallSite::from_descriptor(id(), &desc, &types).unwrap();
        assert_eq!(call.kind(), CallKind::Direct);
        assert!(!call.requires_null_check);

        let callvirt = CallDescriptor {
            is_virtual: true,
            ..CallDescriptor::token(speak, Signature::default())
        };
        let site = CallSite::from_descriptor(id(), &callvirt, &types).unwrap();
        assert!(site.kind().is_virtual_dispatch());
    }
}
