//! Engine configuration.

use crate::codegen::StubTemplate;
use crate::x86::Addr;

/// Configuration for the [`Engine`](crate::Engine)
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Template instantiated into every call cave slot
    pub stub: StubTemplate,
    /// Address the stubs call. `None` uses [`breakpoint_process`](crate::dispatch::breakpoint_process),
    /// which only works when it lives in the 32-bit address space being patched.
    pub dispatch_address: Option<Addr>,
}

impl EngineConfig {
    /// Create a new configuration builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for EngineConfig
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    stub: Option<StubTemplate>,
    dispatch_address: Option<Addr>,
}

impl EngineConfigBuilder {
    /// Use a custom stub template
    pub fn stub(mut self, stub: StubTemplate) -> Self {
        self.stub = Some(stub);
        self
    }

    /// Call this address from every stub instead of the built-in dispatcher
    pub fn dispatch_address(mut self, address: Addr) -> Self {
        self.dispatch_address = Some(address);
        self
    }

    /// Build the configuration
    pub fn build(self) -> EngineConfig {
        let default = EngineConfig::default();
        EngineConfig {
            stub: self.stub.unwrap_or(default.stub),
            dispatch_address: self.dispatch_address.or(default.dispatch_address),
        }
    }
}
