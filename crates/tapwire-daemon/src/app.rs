//! Wiring of the demo contract to a backend channel.

use std::sync::Arc;

use prost_reflect::DescriptorPool;
use tonic::transport::Channel;

use tapwire_core::binding::ServiceBinding;
use tapwire_core::dispatch::{Dispatcher, DispatcherConfig, ProxiedService, ProxyServer};
use tapwire_core::error::{ProxyError, ProxyResult};
use tapwire_core::panel::OperatorPanel;

/// Route identity of the proxied demo service.
pub struct ExampleServiceProxy;

impl ProxiedService for ExampleServiceProxy {
    const NAME: &'static str = "example.ExampleService";
}

pub struct ProxyApp {
    /// Operator handle: inspect calls, edit text, release gates.
    pub panel: Arc<OperatorPanel>,
    /// The service to register with the transport.
    pub service: ProxyServer<ExampleServiceProxy>,
}

/// Builds the full proxy stack: descriptor pool, service binding with the
/// override table, operator panel, dispatcher, route service.
pub fn build(backend: Channel, intercept: &str, config: DispatcherConfig) -> ProxyResult<ProxyApp> {
    let pool = DescriptorPool::decode(tapwire_protocol::FILE_DESCRIPTOR_SET)
        .map_err(|err| ProxyError::Internal(format!("descriptor set decode failed: {err}")))?;
    let overrides = tapwire_protocol::type_name_overrides();
    let binding = ServiceBinding::build(&pool, tapwire_protocol::EXAMPLE_SERVICE, &overrides)?;
    let panel = Arc::new(OperatorPanel::new(binding.duplex_methods()));
    panel.set_intercept_pattern(intercept);
    let dispatcher = Dispatcher::new(binding, backend, panel.clone(), config);
    let service = ProxyServer::new(dispatcher)?;
    Ok(ProxyApp { panel, service })
}
