// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Registry configuration

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};

/// Payload indices are 32-bit.
pub const MAX_STORE_CAPACITY: usize = u32::MAX as usize;

/// Sizing limits for one registry, fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum number of live slots
    pub slot_capacity: usize,
    /// Maximum number of payloads ever constructed (indices are not reused)
    pub store_capacity: usize,
    /// Maximum resource name length in bytes
    pub max_name_len: usize,
}

impl RegistryConfig {
    pub fn new(slot_capacity: usize, store_capacity: usize) -> Self {
        Self {
            slot_capacity,
            store_capacity,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: RegistryConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.slot_capacity == 0 {
            return Err(RegistryError::Config(
                "slot_capacity must be greater than zero".to_string(),
            ));
        }
        if self.store_capacity > MAX_STORE_CAPACITY {
            return Err(RegistryError::Config(format!(
                "store_capacity ({}) exceeds the addressable maximum ({MAX_STORE_CAPACITY})",
                self.store_capacity
            )));
        }
        if self.store_capacity < self.slot_capacity {
            return Err(RegistryError::Config(format!(
                "store_capacity ({}) must be at least slot_capacity ({})",
                self.store_capacity, self.slot_capacity
            )));
        }
        if self.max_name_len == 0 {
            return Err(RegistryError::Config(
                "max_name_len must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            slot_capacity: 256,
            store_capacity: 1024,
            max_name_len: 256,
        }
    }
}
