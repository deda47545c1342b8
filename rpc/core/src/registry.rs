//! Process-wide service registry: the reflection bridge the RPC core
//! consumes. Populated out-of-band — hand-written registration calls, or the
//! `helianthus_rpc_macros` attribute macros expanding to the same calls — and
//! read only through [`list_services`], [`get_meta`], and [`create`]. The
//! core never parses source code; it only reads this in-memory map.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    pin::Pin,
    sync::{Arc, RwLock},
};

use bytes::Bytes;
use once_cell::sync::Lazy;

use crate::{context::RpcContext, error::RpcOutcome};

/// The future a method handler returns. Boxed so the registry can hold
/// handlers for arbitrarily different concrete `async fn` bodies behind one
/// type.
pub type HandlerFuture = Pin<Box<dyn Future<Output = RpcOutcome<Bytes>> + Send>>;

/// A bound method handler: takes the call's context and opaque parameter
/// bytes, returns opaque result bytes or an error. Synchronous handlers are
/// just ones whose future resolves immediately; the dispatcher does not
/// distinguish the two, matching the host runtime's usual treatment of
/// "sync" vs "async" work as just short vs long futures.
pub type MethodHandler = Arc<dyn Fn(RpcContext, Bytes) -> HandlerFuture + Send + Sync>;

/// Produces a fresh [`ServiceInstance`] on demand. Registered once per
/// service name; invoked every time the registry or a `Server` needs to
/// mount that service.
pub type ServiceFactory = Arc<dyn Fn() -> ServiceInstance + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessModifier {
    Public,
    Protected,
    Private,
}

impl Default for AccessModifier {
    fn default() -> Self {
        AccessModifier::Public
    }
}

/// Reflection metadata for a single method, supplied by an external emitter
/// (hand-written or macro-generated) and consumed read-only by the core.
#[derive(Debug, Clone, Default)]
pub struct MethodMeta {
    pub name: String,
    pub tags: HashSet<String>,
    pub return_type_name: String,
    pub param_names: Vec<String>,
    pub access: AccessModifier,
    pub is_static: bool,
    pub is_const: bool,
    pub is_noexcept: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_final: bool,
    pub is_inline: bool,
    pub is_deprecated: bool,
    pub priority: i32,
    pub description: String,
}

impl MethodMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 100,
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// True if this method carries every tag in `required`.
    pub fn satisfies(&self, required: &HashSet<String>) -> bool {
        required.is_subset(&self.tags)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceMeta {
    pub service_name: String,
    pub version: String,
    /// Registration order, preserved — `RegisterMethod` appends.
    pub methods: Vec<MethodMeta>,
}

impl ServiceMeta {
    /// Names of methods carrying every tag in `required`, in registration
    /// order. Empty if no method qualifies — the caller (`mount_by_tags`)
    /// treats that as "don't mount this service".
    pub fn methods_satisfying(&self, required: &HashSet<String>) -> HashSet<String> {
        self.methods
            .iter()
            .filter(|m| m.satisfies(required))
            .map(|m| m.name.clone())
            .collect()
    }
}

/// An instantiated service: a name plus a method table built by whoever
/// implements the factory. Lifetime matches whatever owns the `Arc` — by
/// convention a `Server` holds one shared instance per mounted service, so
/// handlers must be `Send + Sync` and safe to call concurrently from many
/// connections.
pub struct ServiceInstance {
    name: String,
    methods: HashMap<String, MethodHandler>,
}

impl ServiceInstance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_method(mut self, name: impl Into<String>, handler: MethodHandler) -> Self {
        self.methods.insert(name.into(), handler);
        self
    }

    pub fn insert_method(&mut self, name: impl Into<String>, handler: MethodHandler) {
        self.methods.insert(name.into(), handler);
    }

    pub fn method(&self, name: &str) -> Option<&MethodHandler> {
        self.methods.get(name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Drops every method whose name is not in `keep`. Used by
    /// `mount_by_tags` to hide methods that don't carry the required tags
    /// from dispatch, while still exposing the rest of the service.
    pub fn retain_methods(&mut self, keep: &HashSet<String>) {
        self.methods.retain(|name, _| keep.contains(name));
    }
}

struct RegistryState {
    factories: HashMap<String, ServiceFactory>,
    metas: HashMap<String, ServiceMeta>,
}

static REGISTRY: Lazy<RwLock<RegistryState>> = Lazy::new(|| {
    RwLock::new(RegistryState {
        factories: HashMap::new(),
        metas: HashMap::new(),
    })
});

/// Registers (or replaces) the factory for `service_name`. Idempotent by
/// name: registering twice replaces the factory but leaves any
/// already-registered method metadata untouched, matching
/// `RpcServiceRegistry::RegisterService`.
pub fn register_service(service_name: impl Into<String>, version: impl Into<String>, factory: ServiceFactory) {
    let service_name = service_name.into();
    let version = version.into();
    let mut state = REGISTRY.write().expect("service registry lock poisoned");
    state.factories.insert(service_name.clone(), factory);
    let meta = state.metas.entry(service_name.clone()).or_default();
    meta.service_name = service_name;
    meta.version = version;
}

/// Appends a method's metadata to its service's method list. Order is
/// preserved. Auto-vivifies the service's metadata entry if `RegisterService`
/// has not run yet, matching the original's `unordered_map` `operator[]`
/// semantics — a factory-less meta entry just can't be `Create`d until one
/// is registered.
pub fn register_method(service_name: &str, meta: MethodMeta) {
    let mut state = REGISTRY.write().expect("service registry lock poisoned");
    let entry = state.metas.entry(service_name.to_string()).or_default();
    entry.service_name = service_name.to_string();
    entry.methods.push(meta);
}

/// Every registered service name. Sorted for reproducible iteration — the
/// original's `unordered_map` gives no ordering guarantee, and this crate
/// has no reason to reproduce that nondeterminism.
pub fn list_services() -> Vec<String> {
    let state = REGISTRY.read().expect("service registry lock poisoned");
    let mut names: Vec<String> = state.factories.keys().cloned().collect();
    names.sort();
    names
}

pub fn has_service(service_name: &str) -> bool {
    let state = REGISTRY.read().expect("service registry lock poisoned");
    state.factories.contains_key(service_name)
}

pub fn get_meta(service_name: &str) -> Option<ServiceMeta> {
    let state = REGISTRY.read().expect("service registry lock poisoned");
    state.metas.get(service_name).cloned()
}

/// Produces a fresh `ServiceInstance` by invoking the registered factory.
/// The registry lock is held only long enough to clone the factory handle;
/// the factory itself runs outside the lock, so a slow or reentrant factory
/// can never block other registry readers.
pub fn create(service_name: &str) -> Option<ServiceInstance> {
    let factory = {
        let state = REGISTRY.read().expect("service registry lock poisoned");
        state.factories.get(service_name).cloned()?
    };
    Some(factory())
}

/// Mounts one instance of every registered service onto `server`. Per
/// service, invokes the factory once and hands the resulting
/// [`ServiceInstance`] to `server.register_service_instance`.
pub fn mount_all(server: &crate::server::RpcServer) {
    for name in list_services() {
        if let Some(instance) = create(&name) {
            server.register_service_instance(instance);
        }
    }
}

/// Mounts a service only if at least one of its methods carries every tag in
/// `required_tags`; methods that don't satisfy the filter are dropped from
/// the mounted instance, hiding them from dispatch while the rest of the
/// service stays reachable. A service with no method satisfying the filter
/// is not mounted at all.
pub fn mount_by_tags(server: &crate::server::RpcServer, required_tags: &HashSet<String>) {
    for name in list_services() {
        let Some(meta) = get_meta(&name) else { continue };
        let kept = meta.methods_satisfying(required_tags);
        if kept.is_empty() {
            continue;
        }
        if let Some(mut instance) = create(&name) {
            instance.retain_methods(&kept);
            server.register_service_instance(instance);
        }
    }
}

/// Test-only: clears every registration. Tests in this crate (and in
/// downstream crates' test suites, via the `test-util` feature — an
/// integration test in another crate links `helianthus_rpc` as an ordinary
/// dependency, not under `cfg(test)`, so gating this on `cfg(test)` alone
/// would hide it from exactly the macro-expansion tests that need it) share
/// one process-wide registry, so each test that registers services must
/// call this first to avoid cross-test interference.
#[cfg(any(test, feature = "test-util"))]
pub fn clear_for_tests() {
    let mut state = REGISTRY.write().expect("service registry lock poisoned");
    state.factories.clear();
    state.metas.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> MethodHandler {
        Arc::new(|_ctx, params| Box::pin(async move { Ok(params) }))
    }

    #[test]
    fn register_then_create_round_trips() {
        clear_for_tests();
        register_service(
            "EchoService",
            "1.0",
            Arc::new(|| ServiceInstance::new("EchoService").with_method("echo", noop_handler())),
        );
        register_method("EchoService", MethodMeta::new("echo").with_tags(["Utility"]));

        assert!(has_service("EchoService"));
        let meta = get_meta("EchoService").unwrap();
        assert_eq!(meta.methods.len(), 1);
        assert_eq!(meta.methods[0].name, "echo");

        let instance = create("EchoService").unwrap();
        assert!(instance.has_method("echo"));
    }

    #[test]
    fn create_returns_none_for_unknown_service() {
        clear_for_tests();
        assert!(create("NoSuchService").is_none());
    }

    #[test]
    fn registering_service_twice_replaces_factory_but_keeps_methods() {
        clear_for_tests();
        register_service("Svc", "1.0", Arc::new(|| ServiceInstance::new("Svc")));
        register_method("Svc", MethodMeta::new("m1"));
        register_service(
            "Svc",
            "2.0",
            Arc::new(|| ServiceInstance::new("Svc").with_method("m1", noop_handler())),
        );

        let meta = get_meta("Svc").unwrap();
        assert_eq!(meta.version, "2.0");
        assert_eq!(meta.methods.len(), 1);
    }

    #[test]
    fn methods_satisfying_filters_by_tag_superset() {
        let meta = ServiceMeta {
            service_name: "Svc".into(),
            version: "1.0".into(),
            methods: vec![
                MethodMeta::new("admin_only").with_tags(["Admin"]),
                MethodMeta::new("pure_fn").with_tags(["PureFunction", "Math"]),
            ],
        };
        let required: HashSet<String> = ["Admin"].into_iter().map(String::from).collect();
        let kept = meta.methods_satisfying(&required);
        assert!(kept.contains("admin_only"));
        assert!(!kept.contains("pure_fn"));
    }

    #[test]
    fn mount_all_registers_every_service_on_the_server() {
        clear_for_tests();
        register_service(
            "Svc",
            "1.0",
            Arc::new(|| ServiceInstance::new("Svc").with_method("m", noop_handler())),
        );
        register_method("Svc", MethodMeta::new("m"));

        let server = crate::server::RpcServer::new(crate::config::RpcConfig::default()).unwrap();
        mount_all(&server);
        assert!(server.has_service("Svc"));
    }

    #[test]
    fn mount_by_tags_skips_services_with_no_matching_method() {
        clear_for_tests();
        register_service(
            "AdminSvc",
            "1.0",
            Arc::new(|| ServiceInstance::new("AdminSvc").with_method("reset", noop_handler())),
        );
        register_method("AdminSvc", MethodMeta::new("reset").with_tags(["Admin"]));

        register_service(
            "MathSvc",
            "1.0",
            Arc::new(|| ServiceInstance::new("MathSvc").with_method("add", noop_handler())),
        );
        register_method("MathSvc", MethodMeta::new("add").with_tags(["PureFunction"]));

        let server = crate::server::RpcServer::new(crate::config::RpcConfig::default()).unwrap();
        let required: HashSet<String> = ["Admin"].into_iter().map(String::from).collect();
        mount_by_tags(&server, &required);

        assert!(server.has_service("AdminSvc"));
        assert!(!server.has_service("MathSvc"));
    }
}
