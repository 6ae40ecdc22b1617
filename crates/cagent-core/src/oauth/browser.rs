//! Validated browser launch for the authorization URL.

use anyhow::{Context, Result};
use url::Url;

/// Characters that must never reach a shell-adjacent spawn.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '<', '>', '(', ')', '{', '}', '\n', '\r', '"', '\'', '\\',
];

/// Reject anything that is not a plain http(s) URL with a host.
pub fn validate_auth_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).context("unparseable authorization URL")?;

    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("authorization URL must be http or https, got {}", url.scheme());
    }
    if url.host_str().map_or(true, str::is_empty) {
        anyhow::bail!("authorization URL has no host");
    }
    if raw.contains(SHELL_METACHARACTERS) {
        anyhow::bail!("authorization URL contains shell metacharacters");
    }

    Ok(url)
}

/// Open the default browser of the host OS.
pub fn open(url: &Url) -> Result<()> {
    use std::process::{Command, Stdio};

    #[cfg(target_os = "linux")]
    let mut command = {
        let mut c = Command::new("xdg-open");
        c.arg(url.as_str());
        c
    };

    #[cfg(target_os = "macos")]
    let mut command = {
        let mut c = Command::new("open");
        c.arg(url.as_str());
        c
    };

    #[cfg(target_os = "windows")]
    let mut command = {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", "", url.as_str()]);
        c
    };

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to open browser")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_https() {
        assert!(validate_auth_url("https://auth.example.com/authorize?a=b").is_ok());
        assert!(validate_auth_url("http://localhost:8083/authorize").is_ok());
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(validate_auth_url("file:///etc/passwd").is_err());
        assert!(validate_auth_url("javascript:alert(1)").is_err());
    }

    #[test]
    fn rejects_metacharacters() {
        assert!(validate_auth_url("https://example.com/a?x=`id`").is_err());
        assert!(validate_auth_url("https://example.com/a;rm -rf /").is_err());
    }
}
