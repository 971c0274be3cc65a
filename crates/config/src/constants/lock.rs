// Copyright 2024 RustFS Team
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

use const_str::concat;

use super::app::ENV_PREFIX;

/// Default port a lock server listens on
pub const DEFAULT_PORT: u16 = 8422;

/// Default bind address of a lock server
/// Default value: 0.0.0.0:8422
/// Environment variable: DLOCK_ADDRESS
/// Command line argument: --address
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:8422";
pub const ENV_ADDRESS: &str = concat!(ENV_PREFIX, "ADDRESS");

/// Identify lock holders by peer address plus entity instead of entity alone
/// Default value: false
/// Environment variable: DLOCK_PEER_SCOPED_ENTITIES
pub const DEFAULT_PEER_SCOPED_ENTITIES: bool = false;
pub const ENV_PEER_SCOPED_ENTITIES: &str = concat!(ENV_PREFIX, "PEER_SCOPED_ENTITIES");

/// Comma separated `host:port` list of cluster members
/// Environment variable: DLOCK_CLUSTER
/// Command line argument: --cluster
pub const ENV_CLUSTER: &str = concat!(ENV_PREFIX, "CLUSTER");

/// Delay between two quorum attempts of a blocking cluster acquire, in milliseconds
/// Default value: 250
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 250;

/// Timeout for establishing a connection to a lock server, in milliseconds
/// Default value: 5000
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Longest accepted protocol line, in bytes
/// Default value: 8192
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;

/// Capacity of the lock manager command channel
/// Default value: 1024
pub const DEFAULT_MANAGER_QUEUE_DEPTH: usize = 1024;

/// Capacity of the per connection outbound message queue
/// Default value: 256
pub const DEFAULT_OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Capacity of the client request queue feeding a connection writer
/// Default value: 256
pub const DEFAULT_REQUEST_QUEUE_DEPTH: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_address_uses_default_port() {
        assert!(DEFAULT_ADDRESS.ends_with(&format!(":{DEFAULT_PORT}")));
    }

    #[test]
    fn test_env_names_share_prefix() {
        for name in [ENV_ADDRESS, ENV_PEER_SCOPED_ENTITIES, ENV_CLUSTER] {
            assert!(name.starts_with(ENV_PREFIX), "{name} should start with {ENV_PREFIX}");
        }
        assert_eq!(ENV_CLUSTER, "DLOCK_CLUSTER");
    }
}
