// Copyright 2024 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use keepwire_error::{Error, ErrorType::*, OrErr, Result};
use log::trace;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of a pooled websocket connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConnectionConf {
    /// How long a connection may sit idle in the pool before it is considered expired.
    pub idle_timeout_ms: u64,
    /// Upper bound of the graceful close handshake on teardown.
    pub close_timeout_ms: u64,
    /// Size of the buffer each receive of a text message reads into.
    pub receive_buffer_size: usize,
}

impl Default for WsConnectionConf {
    fn default() -> Self {
        WsConnectionConf {
            idle_timeout_ms: 60_000,
            close_timeout_ms: 1_000,
            receive_buffer_size: 10_000,
        }
    }
}

impl WsConnectionConf {
    pub fn from_yaml(conf_str: &str) -> Result<Self> {
        trace!("Read conf: {conf_str}");
        let conf: WsConnectionConf = serde_yaml::from_str(conf_str)
            .or_err_with(InvalidConfig, || format!("Unable to parse yaml conf {conf_str}"))?;
        conf.validate()
    }

    pub fn validate(self) -> Result<Self> {
        if self.receive_buffer_size == 0 {
            return Error::e_explain(InvalidConfig, "receive_buffer_size must be greater than 0");
        }
        if self.close_timeout_ms == 0 {
            return Error::e_explain(InvalidConfig, "close_timeout_ms must be greater than 0");
        }
        Ok(self)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}
