//! In-Memory Service Implementations
//!
//! Thread-safe implementations of the collaborator services, used when the
//! resolution stage is embedded without a full runtime and throughout the
//! tests:
//!
//! - [`TypeRegistry`]: class/method metadata with override tables
//! - [`ProfileRegistry`]: per-call-site histograms of observed targets
//! - [`RuntimePolicy`]: inlining and tail-call permission lists
//!
//! All three use a read-mostly `RwLock` around Fx hash maps; lookups take the
//! read lock only.

use crate::handles::{CallSiteId, ClassHandle, ExactContext, MethodHandle};
use crate::services::{
    CallResolution, ClassAttributes, ClassInitResult, InlinePermission, MethodAttributes,
    MethodBodyInfo, ProfileStore, Runtime, TypeSystem,
};
use crate::signature::{CallConv, Signature};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Type Registry
// =============================================================================

#[derive(Debug, Clone)]
struct ClassEntry {
    attrs: ClassAttributes,
    parent: Option<ClassHandle>,
    closed_implementors: Option<Vec<ClassHandle>>,
}

#[derive(Debug, Clone)]
struct MethodEntry {
    attrs: MethodAttributes,
    signature: Signature,
    body: Option<MethodBodyInfo>,
    resolution: CallResolution,
    unboxed_entry: Option<MethodHandle>,
    class_init: ClassInitResult,
}

#[derive(Debug, Default)]
struct TypeTables {
    classes: FxHashMap<ClassHandle, ClassEntry>,
    methods: FxHashMap<MethodHandle, MethodEntry>,
    /// (base method, implementing class) -> implementation.
    overrides: FxHashMap<(MethodHandle, ClassHandle), MethodHandle>,
    non_embeddable: FxHashSet<ExactContext>,
    next_class: u32,
    next_method: u32,
    next_slot: u16,
}

/// Metadata table implementing [`TypeSystem`].
#[derive(Debug, Default)]
pub struct TypeRegistry {
    tables: RwLock<TypeTables>,
}

impl TypeRegistry {
    /// Default bytecode facts for a method defined without an explicit body.
    pub const DEFAULT_BODY: MethodBodyInfo = MethodBodyInfo {
        il_size: 16,
        max_stack: 2,
        local_count: 0,
        has_eh: false,
    };

    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a class deriving from `parent`.
    pub fn define_class(&self, attrs: ClassAttributes, parent: Option<ClassHandle>) -> ClassHandle {
        let mut tables = self.tables.write();
        tables.next_class += 1;
        let handle = ClassHandle::new(tables.next_class);
        tables.classes.insert(
            handle,
            ClassEntry {
                attrs,
                parent,
                closed_implementors: None,
            },
        );
        handle
    }

    /// Define a method. Virtual methods get a vtable slot, interface methods
    /// a stub, everything else a direct entry point.
    pub fn define_method(&self, attrs: MethodAttributes, signature: Signature) -> MethodHandle {
        let mut tables = self.tables.write();
        let owner_is_interface = tables
            .classes
            .get(&attrs.owner)
            .map(|c| c.attrs.is_interface)
            .unwrap_or(false);

        let resolution = if attrs.is_virtual && owner_is_interface {
            CallResolution::VirtualStub {
                address_known: true,
            }
        } else if attrs.is_virtual {
            tables.next_slot += 1;
            CallResolution::VTableSlot {
                slot: tables.next_slot,
            }
        } else {
            CallResolution::Direct
        };

        let body = if attrs.is_abstract {
            None
        } else {
            Some(Self::DEFAULT_BODY)
        };

        tables.next_method += 1;
        let handle = MethodHandle::new(tables.next_method);
        tables.methods.insert(
            handle,
            MethodEntry {
                attrs,
                signature,
                body,
                resolution,
                unboxed_entry: None,
                class_init: ClassInitResult::Ok,
            },
        );
        handle
    }

    /// Record that `class` implements `base` with `method`.
    pub fn add_override(&self, base: MethodHandle, class: ClassHandle, method: MethodHandle) {
        self.tables.write().overrides.insert((base, class), method);
    }

    /// Set the unboxed entry point of a value-type method.
    pub fn set_unboxed_entry(&self, method: MethodHandle, entry: MethodHandle) {
        if let Some(m) = self.tables.write().methods.get_mut(&method) {
            m.unboxed_entry = Some(entry);
        }
    }

    /// Replace the body facts of a method (`None` = unavailable).
    pub fn set_body(&self, method: MethodHandle, body: Option<MethodBodyInfo>) {
        if let Some(m) = self.tables.write().methods.get_mut(&method) {
            m.body = body;
        }
    }

    /// Override how calls to a method are resolved.
    pub fn set_resolution(&self, method: MethodHandle, resolution: CallResolution) {
        if let Some(m) = self.tables.write().methods.get_mut(&method) {
            m.resolution = resolution;
        }
    }

    /// Set the speculative class-initialization answer for a method.
    pub fn set_class_init(&self, method: MethodHandle, result: ClassInitResult) {
        if let Some(m) = self.tables.write().methods.get_mut(&method) {
            m.class_init = result;
        }
    }

    /// Declare the complete set of concrete implementors of `base`.
    pub fn set_closed_hierarchy(&self, base: ClassHandle, implementors: Vec<ClassHandle>) {
        if let Some(c) = self.tables.write().classes.get_mut(&base) {
            c.closed_implementors = Some(implementors);
        }
    }

    /// Mark a generic context as requiring a runtime lookup.
    pub fn set_context_not_embeddable(&self, context: ExactContext) {
        self.tables.write().non_embeddable.insert(context);
    }

    /// Update a method's attributes in place.
    pub fn update_method_attributes(
        &self,
        method: MethodHandle,
        f: impl FnOnce(&mut MethodAttributes),
    ) {
        if let Some(m) = self.tables.write().methods.get_mut(&method) {
            f(&mut m.attrs);
        }
    }

    fn is_subclass_of(tables: &TypeTables, class: ClassHandle, ancestor: ClassHandle) -> bool {
        let mut current = Some(class);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = tables.classes.get(&c).and_then(|e| e.parent);
        }
        false
    }
}

impl TypeSystem for TypeRegistry {
    fn resolve_virtual_target(
        &self,
        base_method: MethodHandle,
        receiver_class: ClassHandle,
    ) -> Option<(MethodHandle, ExactContext)> {
        let tables = self.tables.read();
        let receiver = tables.classes.get(&receiver_class)?;
        if receiver.attrs.is_interface {
            return None;
        }
        let base = tables.methods.get(&base_method)?;

        // Most-derived implementation wins.
        let mut current = Some(receiver_class);
        let mut found = None;
        while let Some(c) = current {
            if let Some(&m) = tables.overrides.get(&(base_method, c)) {
                found = Some(m);
                break;
            }
            current = tables.classes.get(&c).and_then(|e| e.parent);
        }

        let resolved = match found {
            Some(m) => m,
            None if Self::is_subclass_of(&tables, receiver_class, base.attrs.owner) => base_method,
            None => return None,
        };

        let entry = tables.methods.get(&resolved)?;
        if entry.attrs.is_abstract {
            return None;
        }
        Some((resolved, ExactContext::Class(receiver_class)))
    }

    fn class_attributes(&self, class: ClassHandle) -> Option<ClassAttributes> {
        self.tables.read().classes.get(&class).map(|c| c.attrs)
    }

    fn method_attributes(&self, method: MethodHandle) -> Option<MethodAttributes> {
        self.tables.read().methods.get(&method).map(|m| m.attrs)
    }

    fn method_signature(&self, method: MethodHandle) -> Option<Signature> {
        self.tables
            .read()
            .methods
            .get(&method)
            .map(|m| m.signature.clone())
    }

    fn unboxed_entry(&self, method: MethodHandle) -> Option<MethodHandle> {
        self.tables
            .read()
            .methods
            .get(&method)
            .and_then(|m| m.unboxed_entry)
    }

    fn enumerate_implementors(&self, base: ClassHandle, limit: usize) -> Option<Vec<ClassHandle>> {
        let tables = self.tables.read();
        let implementors = tables.classes.get(&base)?.closed_implementors.as_ref()?;
        if implementors.is_empty() || implementors.len() > limit {
            return None;
        }
        Some(implementors.clone())
    }

    fn call_resolution(&self, method: MethodHandle) -> Option<CallResolution> {
        self.tables.read().methods.get(&method).map(|m| m.resolution)
    }

    fn method_body(&self, method: MethodHandle) -> Option<MethodBodyInfo> {
        self.tables.read().methods.get(&method).and_then(|m| m.body)
    }

    fn speculative_class_init(
        &self,
        method: MethodHandle,
        _context: ExactContext,
    ) -> ClassInitResult {
        self.tables
            .read()
            .methods
            .get(&method)
            .map(|m| m.class_init)
            .unwrap_or(ClassInitResult::Ok)
    }

    fn can_embed_context(&self, context: ExactContext) -> bool {
        !self.tables.read().non_embeddable.contains(&context)
    }
}

// =============================================================================
// Profile Registry
// =============================================================================

/// Observed-target counts for one call site.
#[derive(Debug, Clone, Default)]
pub struct SiteHistogram {
    classes: FxHashMap<ClassHandle, u64>,
    methods: FxHashMap<MethodHandle, u64>,
    class_total: u64,
    method_total: u64,
}

impl SiteHistogram {
    /// Total class observations.
    #[inline]
    pub fn class_total(&self) -> u64 {
        self.class_total
    }

    /// Total method observations.
    #[inline]
    pub fn method_total(&self) -> u64 {
        self.method_total
    }

    fn ranked<K: Copy + Ord>(
        counts: &FxHashMap<K, u64>,
        total: u64,
        limit: usize,
    ) -> Vec<(K, u32)> {
        if total == 0 {
            return Vec::new();
        }
        let mut ranked: Vec<(K, u64)> = counts.iter().map(|(&k, &c)| (k, c)).collect();
        // Descending by count; ties broken by handle so results are stable.
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(limit)
            .map(|(k, c)| (k, (u128::from(c) * 100 / u128::from(total)) as u32))
            .collect()
    }
}

/// Profile data for all call sites, implementing [`ProfileStore`].
#[derive(Debug, Default)]
pub struct ProfileRegistry {
    sites: RwLock<FxHashMap<CallSiteId, SiteHistogram>>,
}

impl ProfileRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `count` observations of receiver class `class` at `site`.
    pub fn record_class(&self, site: CallSiteId, class: ClassHandle, count: u64) {
        let mut sites = self.sites.write();
        let hist = sites.entry(site).or_default();
        let slot = hist.classes.entry(class).or_insert(0);
        *slot = slot.saturating_add(count);
        hist.class_total = hist.class_total.saturating_add(count);
    }

    /// Record `count` observations of target method `method` at `site`.
    pub fn record_method(&self, site: CallSiteId, method: MethodHandle, count: u64) {
        let mut sites = self.sites.write();
        let hist = sites.entry(site).or_default();
        let slot = hist.methods.entry(method).or_insert(0);
        *slot = slot.saturating_add(count);
        hist.method_total = hist.method_total.saturating_add(count);
    }

    /// Snapshot of one site's histogram.
    pub fn histogram(&self, site: CallSiteId) -> Option<SiteHistogram> {
        self.sites.read().get(&site).cloned()
    }

    /// Drop all profile data.
    pub fn clear(&self) {
        self.sites.write().clear();
    }
}

impl ProfileStore for ProfileRegistry {
    fn likely_classes(&self, site: CallSiteId, limit: usize) -> Vec<(ClassHandle, u32)> {
        self.sites
            .read()
            .get(&site)
            .map(|h| SiteHistogram::ranked(&h.classes, h.class_total, limit))
            .unwrap_or_default()
    }

    fn likely_methods(&self, site: CallSiteId, limit: usize) -> Vec<(MethodHandle, u32)> {
        self.sites
            .read()
            .get(&site)
            .map(|h| SiteHistogram::ranked(&h.methods, h.method_total, limit))
            .unwrap_or_default()
    }

    fn has_profile(&self, site: CallSiteId) -> bool {
        self.sites
            .read()
            .get(&site)
            .map(|h| h.class_total > 0 || h.method_total > 0)
            .unwrap_or(false)
    }
}

// =============================================================================
// Runtime Policy
// =============================================================================

/// Permission lists implementing [`Runtime`].
#[derive(Debug, Default)]
pub struct RuntimePolicy {
    inline_denials: RwLock<FxHashMap<MethodHandle, InlinePermission>>,
    tail_denials: RwLock<FxHashSet<MethodHandle>>,
    deny_all_tail_calls: RwLock<bool>,
    withheld_cookies: RwLock<FxHashSet<CallConv>>,
    inline_queries: AtomicU64,
    tail_queries: AtomicU64,
}

impl RuntimePolicy {
    /// Allow everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny inlining `callee` into any caller.
    pub fn deny_inline(&self, callee: MethodHandle, permanently: bool) {
        let permission = if permanently {
            InlinePermission::DenyPermanently
        } else {
            InlinePermission::Deny
        };
        self.inline_denials.write().insert(callee, permission);
    }

    /// Deny tail calls to `callee`.
    pub fn deny_tail_call(&self, callee: MethodHandle) {
        self.tail_denials.write().insert(callee);
    }

    /// Deny every tail call.
    pub fn deny_all_tail_calls(&self) {
        *self.deny_all_tail_calls.write() = true;
    }

    /// Refuse to provide convention cookies for `conv`.
    pub fn withhold_cookie(&self, conv: CallConv) {
        self.withheld_cookies.write().insert(conv);
    }

    /// Number of `can_inline` queries answered.
    pub fn inline_queries(&self) -> u64 {
        self.inline_queries.load(Ordering::Relaxed)
    }

    /// Number of `can_tail_call` queries answered.
    pub fn tail_queries(&self) -> u64 {
        self.tail_queries.load(Ordering::Relaxed)
    }
}

impl Runtime for RuntimePolicy {
    fn can_inline(&self, _caller: MethodHandle, callee: MethodHandle) -> InlinePermission {
        self.inline_queries.fetch_add(1, Ordering::Relaxed);
        self.inline_denials
            .read()
            .get(&callee)
            .copied()
            .unwrap_or(InlinePermission::Allow)
    }

    fn can_tail_call(
        &self,
        _caller: MethodHandle,
        declared: Option<MethodHandle>,
        exact: Option<MethodHandle>,
        _explicit: bool,
    ) -> bool {
        self.tail_queries.fetch_add(1, Ordering::Relaxed);
        if *self.deny_all_tail_calls.read() {
            return false;
        }
        let denials = self.tail_denials.read();
        ![declared, exact]
            .into_iter()
            .flatten()
            .any(|m| denials.contains(&m))
    }

    fn has_convention_cookie(&self, conv: CallConv) -> bool {
        !self.withheld_cookies.read().contains(&conv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SigType;

    fn sig() -> Signature {
        Signature::new(&[], SigType::Void).with_this()
    }

    fn site(offset: u32) -> CallSiteId {
        CallSiteId::new(MethodHandle::new(100), offset)
    }

    // =========================================================================
    // TypeRegistry Tests
    // =========================================================================

    #[test]
    fn test_resolve_override_in_subclass() {
        let reg = TypeRegistry::new();
        let animal = reg.define_class(ClassAttributes::default(), None);
        let dog = reg.define_class(
            ClassAttributes {
                is_sealed: true,
                ..Default::default()
            },
            Some(animal),
        );
        let speak = reg.define_method(MethodAttributes::virtual_method(animal), sig());
        let dog_speak = reg.define_method(MethodAttributes::virtual_method(dog), sig());
        reg.add_override(speak, dog, dog_speak);

        assert_eq!(
            reg.resolve_virtual_target(speak, dog),
            Some((dog_speak, ExactContext::Class(dog)))
        );
        assert_eq!(
            reg.resolve_virtual_target(speak, animal),
            Some((speak, ExactContext::Class(animal)))
        );
    }

    #[test]
    fn test_resolve_inherited_override() {
        let reg = TypeRegistry::new();
        let a = reg.define_class(ClassAttributes::default(), None);
        let b = reg.define_class(ClassAttributes::default(), Some(a));
        let c = reg.define_class(ClassAttributes::default(), Some(b));
        let base = reg.define_method(MethodAttributes::virtual_method(a), sig());
        let over = reg.define_method(MethodAttributes::virtual_method(b), sig());
        reg.add_override(base, b, over);

        assert_eq!(reg.resolve_virtual_target(base, c).map(|r| r.0), Some(over));
    }

    #[test]
    fn test_resolve_fails_for_unrelated_or_interface() {
        let reg = TypeRegistry::new();
        let iface = reg.define_class(
            ClassAttributes {
                is_interface: true,
                is_abstract: true,
                ..Default::default()
            },
            None,
        );
        let other = reg.define_class(ClassAttributes::default(), None);
        let m = reg.define_method(MethodAttributes::virtual_method(iface), sig());

        assert_eq!(reg.resolve_virtual_target(m, iface), None);
        assert_eq!(reg.resolve_virtual_target(m, other), None);
        assert_eq!(
            reg.call_resolution(m),
            Some(CallResolution::VirtualStub {
                address_known: true
            })
        );
    }

    #[test]
    fn test_enumerate_implementors_respects_limit() {
        let reg = TypeRegistry::new();
        let base = reg.define_class(ClassAttributes::default(), None);
        let a = reg.define_class(ClassAttributes::default(), Some(base));
        let b = reg.define_class(ClassAttributes::default(), Some(base));
        assert_eq!(reg.enumerate_implementors(base, 4), None);

        reg.set_closed_hierarchy(base, vec![a, b]);
        assert_eq!(reg.enumerate_implementors(base, 4), Some(vec![a, b]));
        assert_eq!(reg.enumerate_implementors(base, 1), None);
    }

    // =========================================================================
    // ProfileRegistry Tests
    // =========================================================================

    #[test]
    fn test_profile_likelihoods() {
        let profiles = ProfileRegistry::new();
        let s = site(4);
        profiles.record_class(s, ClassHandle::new(1), 72);
        profiles.record_class(s, ClassHandle::new(2), 15);
        profiles.record_class(s, ClassHandle::new(3), 13);

        let likely = profiles.likely_classes(s, 2);
        assert_eq!(likely, vec![(ClassHandle::new(1), 72), (ClassHandle::new(2), 15)]);
        assert!(profiles.has_profile(s));
        assert!(!profiles.has_profile(site(8)));
        assert!(profiles.likely_classes(site(8), 2).is_empty());
    }

    #[test]
    fn test_profile_large_counts_saturate() {
        let profiles = ProfileRegistry::new();
        let s = site(12);
        profiles.record_class(s, ClassHandle::new(1), u64::MAX / 2);
        profiles.record_class(s, ClassHandle::new(2), u64::MAX / 2);
        profiles.record_class(s, ClassHandle::new(1), u64::MAX / 2);

        assert_eq!(profiles.histogram(s).map(|h| h.class_total()), Some(u64::MAX));
        let likely = profiles.likely_classes(s, 2);
        assert_eq!(likely[0].0, ClassHandle::new(1));
        assert_eq!(likely[0].1, 99);
        assert_eq!(likely[1].1, 49);
    }

    #[test]
    fn test_profile_methods_and_clear() {
        let profiles = ProfileRegistry::new();
        let s = site(0);
        profiles.record_method(s, MethodHandle::new(9), 3);
        profiles.record_method(s, MethodHandle::new(8), 1);
        assert_eq!(profiles.likely_methods(s, 1), vec![(MethodHandle::new(9), 75)]);
        assert_eq!(profiles.histogram(s).map(|h| h.method_total()), Some(4));

        profiles.clear();
        assert!(!profiles.has_profile(s));
    }

    // =========================================================================
    // RuntimePolicy Tests
    // =========================================================================

    #[test]
    fn test_runtime_policy() {
        let rt = RuntimePolicy::new();
        let caller = MethodHandle::new(1);
        let callee = MethodHandle::new(2);
        assert_eq!(rt.can_inline(caller, callee), InlinePermission::Allow);
        rt.deny_inline(callee, true);
        assert_eq!(rt.can_inline(caller, callee), InlinePermission::DenyPermanently);
        assert_eq!(rt.inline_queries(), 2);

        assert!(rt.can_tail_call(caller, Some(callee), None, false));
        rt.deny_tail_call(callee);
        assert!(!rt.can_tail_call(caller, Some(callee), None, false));
        assert!(rt.can_tail_call(caller, Some(caller), None, true));
        // A denied nominal callee is refused even when the exact target differs.
        assert!(!rt.can_tail_call(caller, Some(callee), Some(MethodHandle::new(3)), true));
        rt.deny_all_tail_calls();
        assert!(!rt.can_tail_call(caller, None, None, true));
    }

    #[test]
    fn test_runtime_policy_cookies() {
        let rt = RuntimePolicy::new();
        assert!(rt.has_convention_cookie(CallConv::Unmanaged));
        rt.withhold_cookie(CallConv::Unmanaged);
        assert!(!rt.has_convention_cookie(CallConv::Unmanaged));
        assert!(rt.has_convention_cookie(CallConv::VarArgs));
    }
}
