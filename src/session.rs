//! Debug session
//!
//! Owns the bridge, the forward registry and the event bus for one run of
//! the tool. Everything forwarded through the session is removed again by
//! [`DebugSession::teardown`].

use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;
use tracing::info;

use droidlink_adb_bridge::{
    AdbClient, AdbRunner, DeviceEnumerator, PortForwardManager, WebViewDiscovery,
};
use droidlink_core::{AppConfig, Event, EventBus};

use crate::resolver::{DebugConfigurationResolver, ResolverOptions};

/// Load `path`, or the default config file when none is given.
///
/// Errors carry the config error's user-facing message.
pub async fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let loaded = match path {
        Some(path) => AppConfig::load_from(path).await,
        None => AppConfig::load().await,
    };
    loaded.map_err(|e| match path {
        Some(path) => anyhow!("{} ({})", e.user_message(), path.display()),
        None => anyhow!("{}", e.user_message()),
    })
}

pub struct DebugSession {
    adb: Arc<dyn AdbRunner>,
    forwards: Arc<PortForwardManager>,
    events: Arc<EventBus>,
    options: ResolverOptions,
    cancel: CancellationToken,
}

impl DebugSession {
    pub fn new(adb: Arc<dyn AdbRunner>, config: &AppConfig) -> Self {
        Self {
            forwards: Arc::new(PortForwardManager::new(adb.clone())),
            adb,
            events: Arc::new(EventBus::new()),
            options: ResolverOptions::from(&config.debug),
            cancel: CancellationToken::new(),
        }
    }

    /// Session backed by the real adb executable named in `config`.
    ///
    /// Relative executable paths are taken relative to `workspace_root`.
    pub fn from_config(config: &AppConfig, workspace_root: &Path) -> Self {
        let client = AdbClient::from_config(
            &config.adb.executable(),
            config.adb.extra_args.clone(),
            workspace_root,
        );
        info!("Using adb at {}", client.executable().display());
        Self::new(Arc::new(client), config)
    }

    pub fn adb(&self) -> &Arc<dyn AdbRunner> {
        &self.adb
    }

    pub fn devices(&self) -> DeviceEnumerator {
        DeviceEnumerator::new(self.adb.clone())
    }

    pub fn discovery(&self) -> WebViewDiscovery {
        WebViewDiscovery::new(self.adb.clone())
    }

    pub fn forwards(&self) -> &Arc<PortForwardManager> {
        &self.forwards
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// A resolver sharing this session's forwards and events. Tearing the
    /// session down cancels any attach it is still polling for.
    pub fn resolver(&self) -> DebugConfigurationResolver {
        DebugConfigurationResolver::new(self.adb.clone(), self.forwards.clone(), self.events.clone())
            .with_options(self.options)
            .with_cancellation(self.cancel.child_token())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel pending work and remove every forward made in this session
    pub async fn teardown(&self) {
        self.cancel.cancel();

        let sockets = self.forwards.forwarded_sockets();
        self.forwards.unforward_all().await;
        for socket in sockets {
            self.events.emit(Event::PortUnforwarded { local: socket.local });
        }

        self.events.emit(Event::Shutdown);
        info!("Session closed");
    }
}
