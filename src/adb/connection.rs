//! Reaching devices: `adb connect`, `adb disconnect` and `adb devices -l`.

use std::fmt;

use thiserror::Error;
use tokio::process::Command;

/// Port `adb connect` uses when the address has none.
pub const DEFAULT_ADB_PORT: u16 = 5555;

#[derive(Error, Debug)]
pub enum AdbError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("adb connect {address} refused: {output}")]
    ConnectRefused { address: String, output: String },
}

/// How a device is attached, judged from its serial and transport fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Usb,
    Wifi,
    /// `host:port` serial from `adb connect`.
    Remote,
    Emulator,
}

impl ConnectionType {
    fn classify(serial: &str, fields: &[&str]) -> Self {
        if serial.starts_with("emulator-") {
            Self::Emulator
        } else if serial.contains(':') {
            Self::Remote
        } else if fields.iter().any(|f| f.starts_with("usb:")) {
            Self::Usb
        } else {
            // mDNS pairing serials carry neither a port nor a usb path.
            Self::Wifi
        }
    }
}

/// The state column of `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
    Ready,
    Offline,
    Unauthorized,
    Other(String),
}

impl From<&str> for DeviceState {
    fn from(state: &str) -> Self {
        match state {
            "device" => Self::Ready,
            "offline" => Self::Offline,
            "unauthorized" => Self::Unauthorized,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Ready => "device",
            Self::Offline => "offline",
            Self::Unauthorized => "unauthorized",
            Self::Other(state) => state,
        })
    }
}

/// One row of `adb devices -l`.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub device_id: String,
    pub status: DeviceState,
    pub connection_type: ConnectionType,
    pub model: Option<String>,
}

impl DeviceInfo {
    fn from_line(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let serial = fields.next()?;
        let state = fields.next()?;
        let rest: Vec<&str> = fields.collect();

        Some(Self {
            device_id: serial.to_string(),
            status: DeviceState::from(state),
            connection_type: ConnectionType::classify(serial, &rest),
            model: rest
                .iter()
                .find_map(|f| f.strip_prefix("model:"))
                .map(str::to_string),
        })
    }

    /// Attached and authorized.
    pub fn is_ready(&self) -> bool {
        self.status == DeviceState::Ready
    }
}

/// `adb` command addressed at one device, or at whichever is attached.
pub(crate) fn adb_command(adb_path: &str, device_id: Option<&str>) -> Command {
    let mut cmd = Command::new(adb_path);
    if let Some(id) = device_id {
        cmd.args(["-s", id]);
    }
    cmd.kill_on_drop(true);
    cmd
}

/// Server-level adb operations that are not tied to one device.
///
/// # Example
/// ```rust,no_run
/// use device_agent::adb::AdbConnection;
///
/// # async fn demo() -> Result<(), device_agent::adb::AdbError> {
/// let adb = AdbConnection::new();
/// adb.connect("192.168.1.100").await?;
/// for device in adb.list_devices().await? {
///     println!("{} {}", device.device_id, device.status);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AdbConnection {
    adb_path: String,
}

impl Default for AdbConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl AdbConnection {
    pub fn new() -> Self {
        Self::with_path("adb")
    }

    pub fn with_path(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
        }
    }

    async fn output(&self, args: &[&str]) -> Result<String, AdbError> {
        tracing::debug!(args = ?args, "adb");
        let output = adb_command(&self.adb_path, None)
            .args(args)
            .output()
            .await
            .map_err(|source| AdbError::Spawn {
                program: self.adb_path.clone(),
                source,
            })?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text.trim().to_string())
    }

    /// `adb connect`; a bare host gets [`DEFAULT_ADB_PORT`].
    pub async fn connect(&self, address: &str) -> Result<String, AdbError> {
        let address = with_default_port(address);
        let output = self.output(&["connect", &address]).await?;
        if connect_succeeded(&output) {
            tracing::info!(address = %address, "device connected");
            Ok(output)
        } else {
            Err(AdbError::ConnectRefused { address, output })
        }
    }

    /// Drop one remote device, or every remote device when `address` is `None`.
    pub async fn disconnect(&self, address: Option<&str>) -> Result<String, AdbError> {
        match address {
            Some(address) => {
                self.output(&["disconnect", &with_default_port(address)])
                    .await
            }
            None => self.output(&["disconnect"]).await,
        }
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>, AdbError> {
        Ok(parse_device_list(&self.output(&["devices", "-l"]).await?))
    }
}

fn with_default_port(address: &str) -> String {
    if address.contains(':') {
        address.to_string()
    } else {
        format!("{}:{}", address, DEFAULT_ADB_PORT)
    }
}

// adb exits 0 on refused connections, so the text is all there is.
fn connect_succeeded(output: &str) -> bool {
    let output = output.to_lowercase();
    output.contains("connected to") && !output.contains("cannot") && !output.contains("failed")
}

/// Rows of `adb devices -l`, skipping the header and daemon chatter.
pub(crate) fn parse_device_list(stdout: &str) -> Vec<DeviceInfo> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('*') && !line.starts_with("List of"))
        .filter_map(DeviceInfo::from_line)
        .collect()
}
