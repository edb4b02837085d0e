//! Pluggable second-factor and captcha capabilities used during login.

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const MFA_PASSCODE_LENGTH: usize = 6;

/// An enrolled second factor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(rename = "factorType", default)]
    pub factor_type: String,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Picks one device out of the enrolled list and supplies its passcode.
#[async_trait]
pub trait DeviceSelector: Send + Sync {
    async fn select_device(&self, devices: &[Device]) -> anyhow::Result<(Device, String)>;
}

/// Turns a captcha image (SVG bytes) into its text.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, image: &[u8]) -> anyhow::Result<String>;
}

/// Default selector for callers that never configured MFA.
#[derive(Debug, Default, Clone, Copy)]
pub struct MfaUnsupported;

#[async_trait]
impl DeviceSelector for MfaUnsupported {
    async fn select_device(&self, _devices: &[Device]) -> anyhow::Result<(Device, String)> {
        bail!("multi factor authentication is not supported")
    }
}

pub fn validate_passcode(passcode: &str) -> anyhow::Result<()> {
    if passcode.len() != MFA_PASSCODE_LENGTH {
        bail!(
            "passcode must be {MFA_PASSCODE_LENGTH} digits, got {}",
            passcode.len()
        );
    }
    if !passcode.bytes().all(|b| b.is_ascii_digit()) {
        bail!("passcode must contain only digits");
    }
    Ok(())
}

/// Terminal (or scripted) input used by [`PromptingSelector`].
pub trait MfaPrompt: Send + Sync {
    /// Index into `devices` chosen by the user.
    fn choose_device(&self, devices: &[Device]) -> anyhow::Result<usize>;

    fn read_passcode(&self, device: &Device) -> anyhow::Result<String>;
}

/// Selection policy shared by interactive callers: a sole device is used
/// without asking, several devices are offered for choice, and the passcode
/// is checked locally before it ever reaches the server.
#[derive(Debug, Clone)]
pub struct PromptingSelector<P> {
    prompt: P,
}

impl<P: MfaPrompt> PromptingSelector<P> {
    pub fn new(prompt: P) -> Self {
        PromptingSelector { prompt }
    }
}

#[async_trait]
impl<P: MfaPrompt> DeviceSelector for PromptingSelector<P> {
    async fn select_device(&self, devices: &[Device]) -> anyhow::Result<(Device, String)> {
        let index = match devices.len() {
            0 => bail!("no MFA devices enrolled"),
            1 => 0,
            _ => self.prompt.choose_device(devices)?,
        };
        let device = devices
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("device index {index} out of range"))?;

        let passcode = self.prompt.read_passcode(&device)?;
        let passcode = passcode.trim().to_string();
        validate_passcode(&passcode)?;
        Ok((device, passcode))
    }
}
