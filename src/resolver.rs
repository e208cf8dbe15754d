//! Debug Configuration Resolver
//!
//! Turns an `android-webview` attach request into a forwarded local port:
//!
//! 1. check adb can be run at all
//! 2. list devices
//! 3. with a package name, poll every device until one runs that package
//! 4. otherwise poll the only device for any web view
//! 5. forward the web view's socket and complete the request

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use droidlink_adb_bridge::{
    AdbError, AdbRunner, Device, DeviceEnumerator, PortForwardManager, WebView, WebViewDiscovery,
};
use droidlink_core::{DebugConfig, Event, EventBus, ResolveStage};

use crate::poll::{poll, PollOutcome};
use crate::request::AttachRequest;

/// Why an attach request could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveFailure {
    #[error("Cannot find executable")]
    ExecutableNotFound,
    #[error("No devices found")]
    NoDevices,
    #[error("Web view is not running on a device")]
    WebViewNotRunning,
    #[error("Web view not found")]
    WebViewNotFound,
    #[error("Web view is running on more than one device: {}", .serials.join(", "))]
    AmbiguousTarget { serials: Vec<String> },
    #[error("Cancelled")]
    Cancelled,
}

/// A request that was resolved to a forwarded web view
#[derive(Debug, Clone)]
pub struct ResolvedAttach {
    /// The incoming request with `port` and `browserAttachLocation` filled in
    pub configuration: AttachRequest,
    pub webview: WebView,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    /// Not an `android-webview` request, returned as it came in
    Ignored(AttachRequest),
    Resolved(ResolvedAttach),
    Failed(ResolveFailure),
}

/// Poll timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverOptions {
    pub package_poll_interval: Duration,
    pub webview_poll_interval: Duration,
    /// Used for the single-device search when the request has no timeout
    pub default_webview_timeout: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self::from(&DebugConfig::default())
    }
}

impl From<&DebugConfig> for ResolverOptions {
    fn from(config: &DebugConfig) -> Self {
        Self {
            package_poll_interval: Duration::from_millis(config.package_poll_interval_ms),
            webview_poll_interval: Duration::from_millis(config.webview_poll_interval_ms),
            default_webview_timeout: Duration::from_millis(config.default_webview_timeout_ms),
        }
    }
}

pub struct DebugConfigurationResolver {
    adb: Arc<dyn AdbRunner>,
    devices: DeviceEnumerator,
    discovery: WebViewDiscovery,
    forwards: Arc<PortForwardManager>,
    events: Arc<EventBus>,
    options: ResolverOptions,
    cancel: CancellationToken,
}

impl DebugConfigurationResolver {
    pub fn new(
        adb: Arc<dyn AdbRunner>,
        forwards: Arc<PortForwardManager>,
        events: Arc<EventBus>,
    ) -> Self {
        events.emit(Event::StageChanged(ResolveStage::Idle));
        Self {
            devices: DeviceEnumerator::new(adb.clone()),
            discovery: WebViewDiscovery::new(adb.clone()),
            adb,
            forwards,
            events,
            options: ResolverOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: ResolverOptions) -> Self {
        self.options = options;
        self
    }

    /// Cancelling `cancel` stops any poll in progress
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve `request`, forwarding the chosen web view on success.
    ///
    /// Errors from adb itself (other than a missing executable) are
    /// returned as `Err`; every other way of not finding a target is a
    /// [`Resolution::Failed`].
    pub async fn resolve(&self, request: AttachRequest) -> Result<Resolution, AdbError> {
        if !request.is_attach() {
            return Ok(Resolution::Ignored(request));
        }

        let result = self.run(request).await;
        match &result {
            Ok(Resolution::Resolved(resolved)) => {
                info!(
                    "Attached to {} on port {}",
                    resolved.webview.display_name(),
                    resolved.port
                );
                self.enter(ResolveStage::Resolved);
            }
            Ok(Resolution::Failed(failure)) => {
                warn!("Could not resolve attach request: {}", failure);
                self.enter(ResolveStage::Failed);
            }
            Ok(Resolution::Ignored(_)) => {}
            Err(e) => {
                warn!("Attach failed: {}", e);
                self.enter(ResolveStage::Failed);
            }
        }
        result
    }

    async fn run(&self, mut request: AttachRequest) -> Result<Resolution, AdbError> {
        self.enter(ResolveStage::Verifying);
        match self.adb.version().await {
            Ok(_) => {}
            Err(AdbError::ExecutableNotFound(path)) => {
                debug!("adb not found at {}", path);
                return Ok(Resolution::Failed(ResolveFailure::ExecutableNotFound));
            }
            Err(e) => return Err(e),
        }

        self.enter(ResolveStage::EnumeratingDevices);
        let devices = self.devices.list_devices().await?;
        if devices.is_empty() {
            return Ok(Resolution::Failed(ResolveFailure::NoDevices));
        }

        let package = request.package_name.clone();

        let (device, found) = match package.as_deref() {
            Some(package) => {
                let timeout = request.connect_timeout().unwrap_or(Duration::ZERO);
                match self.locate_by_package(&devices, package, timeout).await {
                    Ok(webview) => (webview.device.clone(), Some(webview)),
                    Err(failure) => return Ok(Resolution::Failed(failure)),
                }
            }
            None if devices.len() == 1 => (devices[0].clone(), None),
            None => {
                let serials = devices.iter().map(|d| d.serial.clone()).collect();
                return Ok(Resolution::Failed(ResolveFailure::AmbiguousTarget { serials }));
            }
        };

        let webview = match found {
            Some(webview) => webview,
            None => {
                let timeout = request
                    .connect_timeout()
                    .unwrap_or(self.options.default_webview_timeout);
                match self.locate_on_device(&device, package.as_deref(), timeout).await? {
                    Ok(webview) => webview,
                    Err(failure) => return Ok(Resolution::Failed(failure)),
                }
            }
        };

        self.enter(ResolveStage::Forwarding);
        let port = self
            .forwards
            .forward(&device.serial, &webview.socket, request.port)
            .await?;
        self.events.emit(Event::PortForwarded {
            serial: device.serial.clone(),
            local: format!("tcp:{}", port),
            remote: format!("localabstract:{}", webview.socket),
        });

        request.complete(port);
        Ok(Resolution::Resolved(ResolvedAttach {
            configuration: request,
            webview,
            port,
        }))
    }

    /// Poll all devices until exactly one of them runs `package`
    async fn locate_by_package(
        &self,
        devices: &[Device],
        package: &str,
        timeout: Duration,
    ) -> Result<WebView, ResolveFailure> {
        self.enter(ResolveStage::LocatingByPackage);

        let outcome = poll(
            move || self.search_devices(devices, package),
            timeout,
            self.options.package_poll_interval,
            &self.cancel,
        )
        .await;

        let mut matches = match outcome {
            PollOutcome::Ready(matches) => matches,
            PollOutcome::TimedOut => return Err(ResolveFailure::WebViewNotRunning),
            PollOutcome::Cancelled => return Err(ResolveFailure::Cancelled),
        };

        if matches.len() > 1 {
            let serials = matches.iter().map(|w| w[0].device.serial.clone()).collect();
            return Err(ResolveFailure::AmbiguousTarget { serials });
        }
        Ok(matches.remove(0).remove(0))
    }

    /// Per-device web views for `package`, one entry per device that has
    /// any. A device that can't be searched counts as having none.
    async fn search_devices(&self, devices: &[Device], package: &str) -> Option<Vec<Vec<WebView>>> {
        let searches = devices.iter().map(|device| async move {
            match self.discovery.find_webviews(device, Some(package)).await {
                Ok(webviews) => webviews,
                Err(e) => {
                    warn!("Could not list web views on {}: {}", device.serial, e);
                    self.events.emit(Event::DeviceQueryFailed {
                        serial: device.serial.clone(),
                        message: e.to_string(),
                    });
                    Vec::new()
                }
            }
        });

        let matches: Vec<Vec<WebView>> = join_all(searches)
            .await
            .into_iter()
            .filter(|webviews| !webviews.is_empty())
            .collect();
        (!matches.is_empty()).then_some(matches)
    }

    /// Poll one device for a web view, optionally of a given package
    async fn locate_on_device(
        &self,
        device: &Device,
        package: Option<&str>,
        timeout: Duration,
    ) -> Result<Result<WebView, ResolveFailure>, AdbError> {
        self.enter(ResolveStage::LocatingWebViewOnDevice);

        let discovery = &self.discovery;
        let outcome = poll(
            move || async move {
                match discovery.find_webviews(device, package).await {
                    Ok(webviews) if webviews.is_empty() => None,
                    other => Some(other),
                }
            },
            timeout,
            self.options.webview_poll_interval,
            &self.cancel,
        )
        .await;

        Ok(match outcome {
            PollOutcome::Ready(webviews) => Ok(webviews?.remove(0)),
            PollOutcome::TimedOut => Err(ResolveFailure::WebViewNotFound),
            PollOutcome::Cancelled => Err(ResolveFailure::Cancelled),
        })
    }

    fn enter(&self, stage: ResolveStage) {
        debug!("Resolver stage: {:?}", stage);
        self.events.emit(Event::StageChanged(stage));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use droidlink_adb_bridge::testing::ScriptedAdb;
    use droidlink_core::EventSubscription;
    use tokio::time::Instant;

    const SOCKETS: &str = "\
Num               RefCount Protocol Flags    Type St Inode Path
0000000000000000: 00000002 00000000 00010000 0001 01  3072 @chrome_devtools_remote
0000000000000000: 00000002 00000000 00010000 0001 01 81234 @webview_devtools_remote_4567
";

    const PS: &str = "\
USER           PID  PPID     VSZ    RSS WCHAN            ADDR S NAME
u0_a123       4567   612 1398788  98440 SyS_epoll_          0 S com.example.app
";

    const PACKAGES: &str = "\
  Package [com.example.app] (8f3e2a1):
    versionName=2.3.1
";

    const NO_SOCKETS: &str =
        "Num               RefCount Protocol Flags    Type St Inode Path\n";

    /// Answers the device listing with `devices` and serves web views on
    /// serials for which `has_webviews` returns true.
    fn bridge(
        devices: &'static str,
        has_webviews: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Arc<ScriptedAdb> {
        Arc::new(ScriptedAdb::new(move |args| {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            match args.as_slice() {
                ["version"] => Ok("Android Debug Bridge version 1.0.41\n".to_string()),
                ["devices", "-l"] => Ok(devices.to_string()),
                ["-s", serial, "shell", "cat /proc/net/unix"] => Ok(if has_webviews(serial) {
                    SOCKETS.to_string()
                } else {
                    NO_SOCKETS.to_string()
                }),
                ["-s", _, "shell", "ps"] => Ok(PS.to_string()),
                ["-s", _, "shell", "dumpsys package packages"] => Ok(PACKAGES.to_string()),
                ["-s", _, "forward", "tcp:0", _] => Ok("41235\n".to_string()),
                ["-s", _, "forward", _, _] => Ok(String::new()),
                other => Err(AdbError::ProcessFailure(format!("unexpected: {:?}", other))),
            }
        }))
    }

    const ONE_DEVICE: &str = "List of devices attached\nemulator-5554 device model:Pixel_7 transport_id:1\n";
    const TWO_DEVICES: &str = "List of devices attached\nemulator-5554 device transport_id:1\nR58N12ABCDE device usb:1-1 transport_id:2\n";
    const NO_DEVICES: &str = "List of devices attached\n\n";

    fn resolver(adb: Arc<ScriptedAdb>) -> (DebugConfigurationResolver, EventSubscription) {
        let events = Arc::new(EventBus::new());
        let subscription = events.subscribe();
        let forwards = Arc::new(PortForwardManager::new(adb.clone()));
        (DebugConfigurationResolver::new(adb, forwards, events), subscription)
    }

    fn request(package: Option<&str>, timeout_ms: Option<u64>) -> AttachRequest {
        let mut request = AttachRequest::new(package.map(str::to_string));
        request.connect_timeout = timeout_ms;
        request
    }

    fn stages(subscription: &EventSubscription) -> Vec<ResolveStage> {
        subscription
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                Event::StageChanged(stage) => Some(stage),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_resolves_package_on_single_device() {
        let adb = bridge(ONE_DEVICE, |_| true);
        let (resolver, events) = resolver(adb.clone());

        let resolution = resolver
            .resolve(request(Some("com.example.app"), None))
            .await
            .unwrap();
        let Resolution::Resolved(resolved) = resolution else {
            panic!("expected a resolved configuration, got {:?}", resolution);
        };

        assert_eq!(resolved.port, 41235);
        assert_eq!(resolved.webview.socket, "webview_devtools_remote_4567");
        assert_eq!(resolved.webview.device.serial, "emulator-5554");
        assert_eq!(resolved.configuration.port, Some(41235));
        assert_eq!(
            resolved.configuration.browser_attach_location.as_deref(),
            Some("workspace")
        );
        assert_eq!(
            adb.count(&["-s", "emulator-5554", "forward", "tcp:0"]),
            1
        );

        assert_eq!(
            stages(&events),
            vec![
                ResolveStage::Idle,
                ResolveStage::Verifying,
                ResolveStage::EnumeratingDevices,
                ResolveStage::LocatingByPackage,
                ResolveStage::Forwarding,
                ResolveStage::Resolved,
            ]
        );
    }

    #[tokio::test]
    async fn test_no_devices_fails_without_polling() {
        let adb = bridge(NO_DEVICES, |_| true);
        let (resolver, _events) = resolver(adb.clone());

        let resolution = resolver
            .resolve(request(Some("com.example.app"), Some(5000)))
            .await
            .unwrap();
        assert!(matches!(
            resolution,
            Resolution::Failed(ResolveFailure::NoDevices)
        ));
        assert_eq!(adb.count(&["-s"]), 0);
        assert_eq!(ResolveFailure::NoDevices.to_string(), "No devices found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_package_not_running_fails_after_timeout() {
        let adb = bridge(ONE_DEVICE, |_| false);
        let (resolver, _events) = resolver(adb.clone());

        let start = Instant::now();
        let resolution = resolver
            .resolve(request(Some("com.example.app"), Some(2000)))
            .await
            .unwrap();

        assert!(matches!(
            resolution,
            Resolution::Failed(ResolveFailure::WebViewNotRunning)
        ));
        assert!(start.elapsed() >= Duration::from_millis(2000));
        assert_eq!(adb.count(&["-s", "emulator-5554", "shell", "cat /proc/net/unix"]), 5);
        assert_eq!(
            ResolveFailure::WebViewNotRunning.to_string(),
            "Web view is not running on a device"
        );
    }

    #[tokio::test]
    async fn test_default_package_search_is_single_attempt() {
        let adb = bridge(ONE_DEVICE, |_| false);
        let (resolver, _events) = resolver(adb.clone());

        let resolution = resolver
            .resolve(request(Some("com.example.app"), None))
            .await
            .unwrap();
        assert!(matches!(
            resolution,
            Resolution::Failed(ResolveFailure::WebViewNotRunning)
        ));
        assert_eq!(adb.count(&["-s", "emulator-5554", "shell", "cat /proc/net/unix"]), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_web_view_appearing_later_is_found() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let adb = bridge(ONE_DEVICE, move |_| counter.fetch_add(1, Ordering::SeqCst) >= 2);
        let (resolver, _events) = resolver(adb);

        let start = Instant::now();
        let resolution = resolver
            .resolve(request(Some("com.example.app"), Some(10_000)))
            .await
            .unwrap();

        assert!(matches!(resolution, Resolution::Resolved(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(start.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_package_on_two_devices_is_ambiguous() {
        let adb = bridge(TWO_DEVICES, |_| true);
        let (resolver, _events) = resolver(adb.clone());

        let resolution = resolver
            .resolve(request(Some("com.example.app"), None))
            .await
            .unwrap();
        match resolution {
            Resolution::Failed(ResolveFailure::AmbiguousTarget { serials }) => {
                assert_eq!(serials, vec!["emulator-5554", "R58N12ABCDE"]);
            }
            other => panic!("expected ambiguous target, got {:?}", other),
        }
        assert_eq!(adb.count(&["-s", "emulator-5554", "forward"]), 0);
        assert_eq!(adb.count(&["-s", "R58N12ABCDE", "forward"]), 0);
    }

    #[tokio::test]
    async fn test_failing_device_is_skipped_with_warning() {
        let adb = Arc::new(ScriptedAdb::new(|args| {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            match args.as_slice() {
                ["version"] => Ok("Android Debug Bridge version 1.0.41\n".to_string()),
                ["devices", "-l"] => Ok(TWO_DEVICES.to_string()),
                ["-s", "emulator-5554", "shell", _] => {
                    Err(AdbError::ProcessFailure("error: device offline".into()))
                }
                ["-s", _, "shell", "cat /proc/net/unix"] => Ok(SOCKETS.to_string()),
                ["-s", _, "shell", "ps"] => Ok(PS.to_string()),
                ["-s", _, "shell", _] => Ok(PACKAGES.to_string()),
                ["-s", _, "forward", _, _] => Ok(String::new()),
                other => Err(AdbError::ProcessFailure(format!("unexpected: {:?}", other))),
            }
        }));
        let (resolver, events) = resolver(adb);

        let mut req = request(Some("com.example.app"), None);
        req.port = Some(9222);
        let resolution = resolver.resolve(req).await.unwrap();

        let Resolution::Resolved(resolved) = resolution else {
            panic!("expected a resolved configuration, got {:?}", resolution);
        };
        assert_eq!(resolved.port, 9222);
        assert_eq!(resolved.webview.device.serial, "R58N12ABCDE");

        let failures: Vec<Event> = events
            .drain()
            .into_iter()
            .filter(|e| matches!(e, Event::DeviceQueryFailed { .. }))
            .collect();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            &failures[0],
            Event::DeviceQueryFailed { serial, .. } if serial == "emulator-5554"
        ));
    }

    #[tokio::test]
    async fn test_without_package_uses_only_device() {
        let adb = bridge(ONE_DEVICE, |_| true);
        let (resolver, events) = resolver(adb.clone());

        let mut req = request(None, None);
        req.port = Some(9222);
        let resolution = resolver.resolve(req).await.unwrap();

        let Resolution::Resolved(resolved) = resolution else {
            panic!("expected a resolved configuration, got {:?}", resolution);
        };
        // first socket in table order
        assert_eq!(resolved.webview.socket, "chrome_devtools_remote");
        assert_eq!(resolved.port, 9222);
        assert_eq!(
            adb.count(&[
                "-s",
                "emulator-5554",
                "forward",
                "tcp:9222",
                "localabstract:chrome_devtools_remote"
            ]),
            1
        );
        assert!(stages(&events).contains(&ResolveStage::LocatingWebViewOnDevice));
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_package_times_out_on_empty_device() {
        let adb = bridge(ONE_DEVICE, |_| false);
        let (resolver, _events) = resolver(adb.clone());

        let start = Instant::now();
        let resolution = resolver.resolve(request(None, None)).await.unwrap();

        assert!(matches!(
            resolution,
            Resolution::Failed(ResolveFailure::WebViewNotFound)
        ));
        assert!(start.elapsed() >= Duration::from_millis(1000));
        // t = 0 and t = 1000
        assert_eq!(adb.count(&["-s", "emulator-5554", "shell", "cat /proc/net/unix"]), 2);
    }

    #[tokio::test]
    async fn test_without_package_on_two_devices_is_ambiguous() {
        let adb = bridge(TWO_DEVICES, |_| true);
        let (resolver, _events) = resolver(adb);

        let resolution = resolver.resolve(request(None, None)).await.unwrap();
        assert!(matches!(
            resolution,
            Resolution::Failed(ResolveFailure::AmbiguousTarget { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_executable_is_a_failure() {
        let adb = Arc::new(ScriptedAdb::new(|_| {
            Err(AdbError::ExecutableNotFound("adb".into()))
        }));
        let (resolver, events) = resolver(adb.clone());

        let resolution = resolver.resolve(request(Some("com.example.app"), None)).await.unwrap();
        assert!(matches!(
            resolution,
            Resolution::Failed(ResolveFailure::ExecutableNotFound)
        ));
        assert_eq!(adb.calls().len(), 1);
        assert_eq!(
            stages(&events),
            vec![ResolveStage::Idle, ResolveStage::Verifying, ResolveStage::Failed]
        );
    }

    #[tokio::test]
    async fn test_other_verification_errors_propagate() {
        let adb = Arc::new(ScriptedAdb::new(|_| {
            Err(AdbError::ProcessFailure("adb server version (40) doesn't match".into()))
        }));
        let (resolver, _events) = resolver(adb);

        let result = resolver.resolve(request(Some("com.example.app"), None)).await;
        assert!(matches!(result, Err(AdbError::ProcessFailure(_))));
    }

    #[tokio::test]
    async fn test_other_request_types_are_ignored() {
        let adb = bridge(ONE_DEVICE, |_| true);
        let (resolver, _events) = resolver(adb.clone());

        let mut req = request(Some("com.example.app"), None);
        req.kind = "chrome".to_string();
        let resolution = resolver.resolve(req.clone()).await.unwrap();

        match resolution {
            Resolution::Ignored(returned) => assert_eq!(returned, req),
            other => panic!("expected the request back, got {:?}", other),
        }
        assert!(adb.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let adb = bridge(ONE_DEVICE, |_| false);
        let cancel = CancellationToken::new();
        let (resolver, _events) = resolver(adb);
        let resolver = resolver.with_cancellation(cancel.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            cancel.cancel();
        });

        let start = Instant::now();
        let resolution = resolver
            .resolve(request(Some("com.example.app"), Some(60_000)))
            .await
            .unwrap();
        assert!(matches!(
            resolution,
            Resolution::Failed(ResolveFailure::Cancelled)
        ));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_options_from_config() {
        let options = ResolverOptions::default();
        assert_eq!(options.package_poll_interval, Duration::from_millis(500));
        assert_eq!(options.webview_poll_interval, Duration::from_millis(1000));
        assert_eq!(options.default_webview_timeout, Duration::from_millis(1000));
    }
}
