//! CLI commands for droidlink
//!
//! Each command runs against a [`DebugSession`]; commands that create
//! forwards hold them until Ctrl-C and then tear the session down.

use std::path::PathBuf;
use std::thread::JoinHandle;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use droidlink_adb_bridge::{DevToolsClient, Device, WebView};
use droidlink_core::{Event, EventSubscription};

use crate::request::AttachRequest;
use crate::resolver::Resolution;
use crate::session::DebugSession;

/// How results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Text
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One log line per session event worth showing
fn describe(event: &Event) -> Option<String> {
    match event {
        Event::StageChanged(stage) => Some(format!("Stage: {:?}", stage)),
        Event::DeviceQueryFailed { serial, message } => {
            Some(format!("Skipping {}: {}", serial, message))
        }
        Event::PortForwarded {
            serial,
            local,
            remote,
        } => Some(format!("Forwarding {} -> {} on {}", local, remote, serial)),
        Event::PortUnforwarded { local } => Some(format!("Removed forward {}", local)),
        Event::Shutdown => None,
    }
}

/// Log session events until the session shuts down
fn report_events(events: EventSubscription) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while let Ok(event) = events.recv() {
            if event == Event::Shutdown {
                break;
            }
            if let Some(line) = describe(&event) {
                debug!("{}", line);
            }
        }
    })
}

/// Block until Ctrl-C, then remove everything the session forwarded
async fn hold_until_interrupted(session: &DebugSession) -> Result<()> {
    eprintln!("Press Ctrl-C to stop forwarding");
    let interrupted = tokio::signal::ctrl_c().await;
    session.teardown().await;
    interrupted.context("Failed to listen for Ctrl-C")
}

/// Device list command
pub struct DevicesCommand;

impl DevicesCommand {
    /// List all connected devices
    pub async fn execute(&self, session: &DebugSession, format: OutputFormat) -> Result<()> {
        let devices = session.devices().list_devices().await?;

        if format == OutputFormat::Json {
            return print_json(&devices);
        }

        if devices.is_empty() {
            println!("No devices connected");
        } else {
            println!("Connected devices:");
            for device in devices {
                println!("  {} - {}", device.display_name(), device.state);
            }
        }
        Ok(())
    }
}

/// Web view listing command
pub struct WebViewsCommand {
    pub serial: Option<String>,
    pub package: Option<String>,
}

impl WebViewsCommand {
    /// Web views on the selected device, or on every usable device
    pub async fn collect(&self, session: &DebugSession) -> Result<Vec<WebView>> {
        let devices = self.target_devices(session).await?;
        let discovery = session.discovery();

        let mut webviews = Vec::new();
        for device in &devices {
            match discovery.find_webviews(device, self.package.as_deref()).await {
                Ok(found) => webviews.extend(found),
                // one broken device shouldn't hide the others
                Err(e) if self.serial.is_none() => {
                    warn!("Could not list web views on {}: {}", device.serial, e)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(webviews)
    }

    async fn target_devices(&self, session: &DebugSession) -> Result<Vec<Device>> {
        let enumerator = session.devices();
        match &self.serial {
            Some(serial) => {
                let device = enumerator
                    .get_device(serial)
                    .await?
                    .ok_or_else(|| anyhow!("Device not found: {}", serial))?;
                if !device.is_usable() {
                    bail!("Device {} is {}", serial, device.state);
                }
                Ok(vec![device])
            }
            None => Ok(enumerator
                .list_devices()
                .await?
                .into_iter()
                .filter(Device::is_usable)
                .collect()),
        }
    }

    /// List web views
    pub async fn execute(&self, session: &DebugSession, format: OutputFormat) -> Result<()> {
        let webviews = self.collect(session).await?;

        if format == OutputFormat::Json {
            return print_json(&webviews);
        }

        if webviews.is_empty() {
            println!("No web views found");
        } else {
            for webview in webviews {
                println!(
                    "  {}  {:<9} {}  @{}",
                    webview.device.serial,
                    webview.kind.as_str(),
                    webview.display_name(),
                    webview.socket
                );
            }
        }
        Ok(())
    }
}

/// Port forward command
pub struct ForwardCommand {
    pub serial: String,
    pub socket: String,
    pub port: Option<u16>,
}

impl ForwardCommand {
    /// Forward the socket and keep it open until interrupted
    pub async fn execute(&self, session: &DebugSession, format: OutputFormat) -> Result<()> {
        let reporter = report_events(session.events().subscribe());

        let socket = self.socket.trim_start_matches('@');
        let port = session
            .forwards()
            .forward(&self.serial, socket, self.port)
            .await?;
        session.events().emit(Event::PortForwarded {
            serial: self.serial.clone(),
            local: format!("tcp:{}", port),
            remote: format!("localabstract:{}", socket),
        });

        if format == OutputFormat::Json {
            print_json(&session.forwards().forwarded_sockets())?;
        } else {
            println!("tcp:{} -> localabstract:{} on {}", port, socket, self.serial);
        }

        let held = hold_until_interrupted(session).await;
        let _ = reporter.join();
        held
    }
}

/// Debug attach command
pub struct AttachCommand {
    /// JSON attach configuration; flags override its fields
    pub file: Option<PathBuf>,
    pub package: Option<String>,
    pub timeout: Option<u64>,
    pub port: Option<u16>,
}

impl AttachCommand {
    /// The attach request described by the file and flags
    pub async fn request(&self) -> Result<AttachRequest> {
        let mut request = match &self.file {
            Some(path) => {
                let contents = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("Invalid attach configuration in {}", path.display()))?
            }
            None => AttachRequest::new(None),
        };

        if let Some(package) = &self.package {
            request.package_name = Some(package.clone());
        }
        if let Some(timeout) = self.timeout {
            request.connect_timeout = Some(timeout);
        }
        if let Some(port) = self.port {
            request.port = Some(port);
        }
        Ok(request)
    }

    /// Resolve the request, print the completed configuration and hold
    /// the forward until interrupted
    pub async fn execute(&self, session: &DebugSession, format: OutputFormat) -> Result<()> {
        let request = self.request().await?;
        let _reporter = report_events(session.events().subscribe());
        let resolver = session.resolver();

        let resolution = tokio::select! {
            resolution = resolver.resolve(request) => resolution,
            _ = tokio::signal::ctrl_c() => {
                session.teardown().await;
                bail!("Interrupted");
            }
        };
        let resolution = match resolution {
            Ok(resolution) => resolution,
            Err(e) => {
                session.teardown().await;
                return Err(e.into());
            }
        };

        let resolved = match resolution {
            Resolution::Resolved(resolved) => resolved,
            Resolution::Failed(failure) => {
                session.teardown().await;
                return Err(failure.into());
            }
            Resolution::Ignored(request) => {
                session.teardown().await;
                bail!("Not an android-webview configuration (type is {:?})", request.kind)
            }
        };

        if format == OutputFormat::Text {
            info!(
                "{} on {} is available at http://127.0.0.1:{}",
                resolved.webview.display_name(),
                resolved.webview.device.serial,
                resolved.port
            );
        }
        print_json(&resolved.configuration)?;

        hold_until_interrupted(session).await
    }
}

/// DevTools page listing command
pub struct PagesCommand {
    pub port: u16,
}

impl PagesCommand {
    /// List the pages behind a forwarded port
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let pages = DevToolsClient::new(self.port)
            .pages()
            .await
            .with_context(|| format!("No DevTools endpoint on port {}", self.port))?;

        if format == OutputFormat::Json {
            return print_json(&pages);
        }

        if pages.is_empty() {
            println!("No pages");
        }
        for page in pages {
            let title = if page.title.is_empty() { &page.url } else { &page.title };
            println!("  [{}] {}  {}", page.kind, title, page.url);
        }
        Ok(())
    }
}
