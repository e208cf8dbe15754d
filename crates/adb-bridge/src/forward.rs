//! Port Forwarding
//!
//! Tracks the `adb forward` tunnels created for a debug session so they
//! can be removed again when the session ends.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adb::{AdbCommand, AdbError, AdbRunner};

/// An active local -> device tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedSocket {
    /// e.g. `tcp:9222`
    pub local: String,
    /// e.g. `localabstract:chrome_devtools_remote`
    pub remote: String,
}

impl ForwardedSocket {
    /// TCP port of the local side
    pub fn local_port(&self) -> Option<u16> {
        self.local.strip_prefix("tcp:")?.parse().ok()
    }
}

/// Creates and removes forwards, keeping a registry of the live ones.
///
/// Local addresses in the registry are unique.
pub struct PortForwardManager {
    runner: Arc<dyn AdbRunner>,
    sockets: Mutex<Vec<ForwardedSocket>>,
}

impl PortForwardManager {
    pub fn new(runner: Arc<dyn AdbRunner>) -> Self {
        Self {
            runner,
            sockets: Mutex::new(Vec::new()),
        }
    }

    /// Forward a local TCP port to an abstract socket on the device.
    ///
    /// With `port` unset adb picks a free port. Requesting a port this
    /// manager already forwards replaces that forward.
    pub async fn forward(
        &self,
        serial: &str,
        remote_socket: &str,
        port: Option<u16>,
    ) -> Result<u16, AdbError> {
        // tcp:0 always means "let adb pick"
        let port = port.filter(|p| *p != 0);
        let local = format!("tcp:{}", port.unwrap_or(0));

        if port.is_some() {
            let existing = self.sockets.lock().iter().any(|s| s.local == local);
            if existing {
                if let Err(e) = self.remove(&local).await {
                    debug!("Ignoring failure to remove {}: {}", local, e);
                }
                self.sockets.lock().retain(|s| s.local != local);
            }
        }

        let remote = format!("localabstract:{}", remote_socket);
        let output = AdbCommand::new()
            .device(serial)
            .args(&["forward", &local, &remote])
            .run(self.runner.as_ref())
            .await?;

        let local_port = match port {
            Some(port) => port,
            None => parse_assigned_port(&output)
                .ok_or_else(|| AdbError::InvalidResponse(output.trim().to_string()))?,
        };

        let forwarded = ForwardedSocket {
            local: format!("tcp:{}", local_port),
            remote,
        };
        info!("Forwarded {} -> {} on {}", forwarded.local, forwarded.remote, serial);

        let mut sockets = self.sockets.lock();
        sockets.retain(|s| s.local != forwarded.local);
        sockets.push(forwarded);

        Ok(local_port)
    }

    /// Remove one forward by its local address (e.g. `tcp:9222`)
    pub async fn unforward(&self, local: &str) -> Result<(), AdbError> {
        let result = self.remove(local).await;
        self.sockets.lock().retain(|s| s.local != local);
        result.map(|_| ())
    }

    /// Remove every forward created through this manager.
    ///
    /// Removal failures are ignored; the registry always ends up empty.
    pub async fn unforward_all(&self) {
        let sockets = std::mem::take(&mut *self.sockets.lock());
        if sockets.is_empty() {
            return;
        }

        let results = join_all(sockets.iter().map(|s| self.remove(&s.local))).await;
        for (socket, result) in sockets.iter().zip(results) {
            if let Err(e) = result {
                debug!("Ignoring failure to remove {}: {}", socket.local, e);
            }
        }
        info!("Removed {} forward(s)", sockets.len());
    }

    /// Snapshot of the live forwards
    pub fn forwarded_sockets(&self) -> Vec<ForwardedSocket> {
        self.sockets.lock().clone()
    }

    async fn remove(&self, local: &str) -> Result<String, AdbError> {
        AdbCommand::new()
            .args(&["forward", "--remove", local])
            .run(self.runner.as_ref())
            .await
    }
}

/// adb prints the port it picked for `tcp:0` on stdout
fn parse_assigned_port(output: &str) -> Option<u16> {
    output
        .split(|c: char| !c.is_ascii_digit())
        .find(|s| !s.is_empty())?
        .parse()
        .ok()
}
