use std::io::{self, BufRead, Write};

use anyhow::{bail, Context};
use async_trait::async_trait;
use fleet_client::{CaptchaSolver, Device, MfaPrompt};

/// Prints `label` and reads one trimmed line from stdin.
pub fn read_line(label: &str) -> anyhow::Result<String> {
    read_line_from(&mut io::stdin().lock(), &mut io::stderr(), label)
}

/// Reads a secret from the terminal without echoing it.
pub fn read_secret(label: &str) -> anyhow::Result<String> {
    let secret = rpassword::prompt_password(format!("{label}: "))
        .with_context(|| format!("reading {label}"))?;
    Ok(secret.trim_end_matches(['\r', '\n']).to_string())
}

fn read_line_from(
    input: &mut impl BufRead,
    output: &mut impl Write,
    label: &str,
) -> anyhow::Result<String> {
    write!(output, "{label}: ")?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        bail!("input closed while waiting for {label}");
    }
    Ok(line.trim().to_string())
}

/// MFA prompts on the controlling terminal.
pub struct TerminalPrompt;

impl MfaPrompt for TerminalPrompt {
    fn choose_device(&self, devices: &[Device]) -> anyhow::Result<usize> {
        eprintln!("Choose an MFA device:");
        for (i, device) in devices.iter().enumerate() {
            eprintln!("  {}) {}", i + 1, device.name);
        }
        let answer = read_line("Device")?;
        parse_choice(&answer, devices.len())
    }

    fn read_passcode(&self, device: &Device) -> anyhow::Result<String> {
        read_line(&format!("Passcode from {}", device.name))
    }
}

fn parse_choice(answer: &str, count: usize) -> anyhow::Result<usize> {
    let choice: usize = answer
        .parse()
        .with_context(|| format!("'{answer}' is not a device number"))?;
    if choice == 0 || choice > count {
        bail!("device number must be between 1 and {count}");
    }
    Ok(choice - 1)
}

/// Saves the captcha image to a temporary SVG and asks the user to type it.
pub struct TerminalCaptcha;

#[async_trait]
impl CaptchaSolver for TerminalCaptcha {
    async fn solve(&self, image: &[u8]) -> anyhow::Result<String> {
        let mut file = tempfile::Builder::new()
            .prefix("fleet-captcha-")
            .suffix(".svg")
            .tempfile()
            .context("creating captcha file")?;
        file.write_all(image)?;
        file.flush()?;

        eprintln!("Captcha saved to {}", file.path().display());
        // The file is removed when `file` drops, after the answer is read.
        read_line("Captcha")
    }
}
