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

//! Pool configuration
//!
//! Configuration is read from YAML. Unknown keys are ignored so that the pool settings can
//! live in a larger configuration file.

use keepwire_error::{Error, ErrorType::*, OrErr, Result};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// How many idle connections are kept per endpoint key unless configured otherwise.
pub const DEFAULT_CAPACITY_PER_KEY: usize = 5;

/// Settings of a [crate::ConnectionPool]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConf {
    /// The maximum number of idle connections kept for a single key. When a connection is
    /// returned to a full bucket, the oldest idle ones are destroyed.
    ///
    /// `0` disables reuse: every returned connection is destroyed right away.
    pub capacity_per_key: usize,
    /// How often the idle reaper sweeps expired connections, in milliseconds. `None` means
    /// expired connections are only purged lazily by `take()`.
    pub reap_interval_ms: Option<u64>,
}

impl Default for PoolConf {
    fn default() -> Self {
        PoolConf {
            capacity_per_key: DEFAULT_CAPACITY_PER_KEY,
            reap_interval_ms: None,
        }
    }
}

impl PoolConf {
    pub fn load_from_yaml<P>(path: P) -> Result<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).or_err_with(ReadError, || {
            format!("Unable to read conf file from {path}")
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> Result<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: PoolConf = serde_yaml::from_str(conf_str).or_err_with(InvalidConfig, || {
            format!("Unable to parse yaml conf {conf_str}")
        })?;
        trace!("Loaded conf: {conf:?}");
        conf.validate()
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).or_err(InvalidConfig, "Unable to serialize pool conf")
    }

    pub fn validate(self) -> Result<Self> {
        if self.reap_interval_ms == Some(0) {
            return Error::e_explain(InvalidConfig, "reap_interval_ms must be greater than 0");
        }
        Ok(self)
    }

    pub fn reap_interval(&self) -> Option<Duration> {
        self.reap_interval_ms.map(Duration::from_millis)
    }
}
