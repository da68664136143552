use async_trait::async_trait;

use super::HostPathBackend;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::types::{PluginCapability, PluginInfo};

#[async_trait]
impl CsiIdentity for HostPathBackend {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: self.config.plugin_name.clone(),
            vendor_version: self.config.vendor_version.clone(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(self.registry.is_ready())
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![PluginCapability::ControllerService])
    }
}
