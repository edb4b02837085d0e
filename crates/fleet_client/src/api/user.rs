use serde::{Deserialize, Serialize};

use super::client::FleetClient;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionResponse {
    pub region: String,
    pub fleet_api_base_url: String,
}

impl FleetClient {
    /// Fetches the user's region and the API host that serves it.
    pub async fn user_region(&self) -> Result<RegionResponse> {
        self.get_json(&format!("{}/users/region", self.base_url()))
            .await
    }
}
