use super::TunnelError;
use crate::runner::escape_shell_argument;
use regex::Regex;

/// Placeholder substituted with the local port in command templates.
pub const PORT_PLACEHOLDER: &str = "{port}";

pub const CLOUDFLARED_PATTERN: &str = r"[\w-]+\.trycloudflare\.com";
pub const LOCALTUNNEL_PATTERN: &str = r"[\w-]+\.loca\.lt";
pub const ZROK_PATTERN: &str = r"[\w-]+\.share\.zrok\.io";

/// Immutable description of one tunnel.
#[derive(Debug, Clone)]
pub struct TunnelSpec {
    command_template: String,
    name: String,
    url_pattern: Regex,
    note: Option<String>,
}

impl TunnelSpec {
    /// Compile `url_pattern` and build the spec. The pattern is matched anywhere in a line.
    pub fn new(
        command_template: impl Into<String>,
        name: impl Into<String>,
        url_pattern: &str,
        note: Option<String>,
    ) -> Result<Self, TunnelError> {
        let name = name.into();
        let url_pattern = Regex::new(url_pattern).map_err(|source| TunnelError::InvalidPattern {
            name: name.clone(),
            source,
        })?;
        Ok(Self {
            command_template: command_template.into(),
            name,
            url_pattern,
            note,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn url_pattern(&self) -> &Regex {
        &self.url_pattern
    }

    /// The shell command with `{port}` substituted.
    pub fn command_for(&self, port: u16) -> String {
        self.command_template
            .replace(PORT_PLACEHOLDER, &port.to_string())
    }

    /// First word of the template, used to check the binary exists before spawning.
    pub fn program(&self) -> Option<&str> {
        self.command_template.split_whitespace().next()
    }
}

/// First match of `pattern` in `line`.
pub fn extract_url<'a>(pattern: &Regex, line: &'a str) -> Option<&'a str> {
    pattern.find(line).map(|m| m.as_str())
}

/// The tunnels opened for every launch: cloudflared, localtunnel and, with a token, zrok.
///
/// `public_ip` becomes the localtunnel password note; it is omitted when unknown.
pub fn default_tunnels(
    public_ip: Option<&str>,
    with_zrok: bool,
) -> Result<Vec<TunnelSpec>, TunnelError> {
    let mut specs = vec![
        TunnelSpec::new(
            "cl tunnel --url localhost:{port}",
            "cloudflared",
            CLOUDFLARED_PATTERN,
            None,
        )?,
        TunnelSpec::new(
            "lt --port {port}",
            "localtunnel",
            LOCALTUNNEL_PATTERN,
            public_ip.map(|ip| format!("Password : {ip} rerun cell if 404 error.")),
        )?,
    ];
    if with_zrok {
        specs.push(TunnelSpec::new(
            "zrok share public http://localhost:{port}/ --headless",
            "zrok",
            ZROK_PATTERN,
            None,
        )?);
    }
    Ok(specs)
}

/// Shell command that registers this environment with zrok. Must succeed before the
/// zrok tunnel can share anything.
pub fn zrok_enable_command(token: &str) -> String {
    format!("zrok enable {}", escape_shell_argument(token))
}
