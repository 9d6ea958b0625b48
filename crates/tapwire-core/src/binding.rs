//! Method resolution for the proxied service.
//!
//! Built once at startup from a descriptor pool; request and response types
//! resolve through the `<Method>Request` / `<Method>Response` naming
//! convention unless the override table names an exception.

use std::collections::{HashMap, HashSet};

use prost_reflect::{DescriptorPool, MessageDescriptor};
use tonic::codegen::http::uri::PathAndQuery;

use crate::error::{ProxyError, ProxyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Unary,
    ServerStreaming,
    Duplex,
}

#[derive(Debug, Clone)]
pub struct MethodBinding {
    pub name: String,
    pub path: PathAndQuery,
    pub request: MessageDescriptor,
    pub response: MessageDescriptor,
    pub kind: MethodKind,
}

/// Immutable map from method name to its binding. Cheap to clone and safe to
/// share; nothing mutates after `build`.
#[derive(Debug, Clone)]
pub struct ServiceBinding {
    service: String,
    methods: HashMap<String, MethodBinding>,
}

impl ServiceBinding {
    pub fn build(
        pool: &DescriptorPool,
        service_full_name: &str,
        overrides: &HashMap<String, String>,
    ) -> ProxyResult<Self> {
        let service = pool
            .get_service_by_name(service_full_name)
            .ok_or_else(|| ProxyError::UnknownService(service_full_name.to_string()))?;
        let package = service.parent_file().package_name().to_string();

        let mut methods = HashMap::new();
        for method in service.methods() {
            let name = method.name().to_string();
            let kind = match (method.is_client_streaming(), method.is_server_streaming()) {
                (false, false) => MethodKind::Unary,
                (false, true) => MethodKind::ServerStreaming,
                (true, true) => MethodKind::Duplex,
                (true, false) => return Err(ProxyError::UnsupportedMethod(name)),
            };
            let request = resolve_type(pool, &package, overrides, &name, "Request")?;
            let response = resolve_type(pool, &package, overrides, &name, "Response")?;
            if request.full_name() != method.input().full_name() {
                tracing::warn!(
                    method = %name,
                    resolved = %request.full_name(),
                    declared = %method.input().full_name(),
                    "resolved request type differs from the method descriptor"
                );
            }
            if response.full_name() != method.output().full_name() {
                tracing::warn!(
                    method = %name,
                    resolved = %response.full_name(),
                    declared = %method.output().full_name(),
                    "resolved response type differs from the method descriptor"
                );
            }
            let path: PathAndQuery = format!("/{service_full_name}/{name}")
                .parse()
                .map_err(|err| ProxyError::Internal(format!("invalid route for {name}: {err}")))?;
            methods.insert(
                name.clone(),
                MethodBinding {
                    name,
                    path,
                    request,
                    response,
                    kind,
                },
            );
        }

        Ok(Self {
            service: service_full_name.to_string(),
            methods,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }

    pub fn resolve(&self, method: &str) -> ProxyResult<&MethodBinding> {
        self.methods
            .get(method)
            .ok_or_else(|| ProxyError::UnknownMethod(method.to_string()))
    }

    /// The fixed duplex-stream set; these methods are never intercepted.
    pub fn duplex_methods(&self) -> HashSet<String> {
        self.methods
            .values()
            .filter(|m| m.kind == MethodKind::Duplex)
            .map(|m| m.name.clone())
            .collect()
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodBinding> {
        self.methods.values()
    }
}

fn resolve_type(
    pool: &DescriptorPool,
    package: &str,
    overrides: &HashMap<String, String>,
    method: &str,
    suffix: &str,
) -> ProxyResult<MessageDescriptor> {
    let conventional = format!("{method}{suffix}");
    let simple = overrides.get(&conventional).cloned().unwrap_or(conventional);
    let full = if package.is_empty() {
        simple
    } else {
        format!("{package}.{simple}")
    };
    pool.get_message_by_name(&full)
        .ok_or_else(|| ProxyError::UnresolvedType {
            method: method.to_string(),
            type_name: full,
        })
}
