use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::gate::is_valid_e164;

pub const CONFIG_FILE_NAME: &str = "outreach.toml";

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct OutreachConfig {
    pub project: ProjectConfig,
    pub dispatch: DispatchConfig,
    pub campaigns: CampaignsConfig,
    pub gateway: GatewayConfig,
    pub preview: PreviewConfig,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ProjectConfig {
    pub state_path: String,
    pub lead_prefix: String,
    pub campaign_prefix: String,
    pub pool_prefix: String,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Minimum gap between successive gateway calls on one channel.
    pub pacing_ms: u64,
    pub result_log_capacity: usize,
    /// Extra attempts after a gate check comes back Unknown.
    pub gate_check_retries: u32,
    pub gate_retry_backoff_ms: u64,
}

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CampaignsConfig {
    /// Captured into each campaign at creation.
    pub requires_approval: bool,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub email_command: Vec<String>,
    pub sms_command: Vec<String>,
    pub call_command: Vec<String>,
    pub timeout_seconds: u64,
}

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PreviewConfig {
    pub test_email: Option<String>,
    pub test_phone: Option<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            state_path: "outreach-state.json".to_string(),
            lead_prefix: "LEAD".to_string(),
            campaign_prefix: "CMP".to_string(),
            pool_prefix: "POOL".to_string(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pacing_ms: 1200,
            result_log_capacity: 100,
            gate_check_retries: 2,
            gate_retry_backoff_ms: 250,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            email_command: Vec::new(),
            sms_command: Vec::new(),
            call_command: Vec::new(),
            timeout_seconds: 30,
        }
    }
}

impl DispatchConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn gate_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.gate_retry_backoff_ms)
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

pub fn validate(config: &OutreachConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.dispatch.pacing_ms < 1 {
        errors.push("dispatch.pacing_ms must be >= 1".to_string());
    }

    if config.dispatch.result_log_capacity < 1 {
        errors.push("dispatch.result_log_capacity must be >= 1".to_string());
    }

    if config.gateway.timeout_seconds < 1 {
        errors.push("gateway.timeout_seconds must be >= 1".to_string());
    }

    for (key, prefix) in [
        ("project.lead_prefix", &config.project.lead_prefix),
        ("project.campaign_prefix", &config.project.campaign_prefix),
        ("project.pool_prefix", &config.project.pool_prefix),
    ] {
        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            errors.push(format!(
                "{} must be non-empty and contain only alphanumerics or underscores",
                key
            ));
        }
    }

    let prefixes = [
        &config.project.lead_prefix,
        &config.project.campaign_prefix,
        &config.project.pool_prefix,
    ];
    if prefixes[0] == prefixes[1] || prefixes[0] == prefixes[2] || prefixes[1] == prefixes[2] {
        errors.push("project prefixes must be distinct".to_string());
    }

    if config.project.state_path.trim().is_empty() {
        errors.push("project.state_path must not be empty".to_string());
    }

    if let Some(ref phone) = config.preview.test_phone {
        if !is_valid_e164(phone) {
            errors.push(format!("preview.test_phone '{}' is not E.164", phone));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Load `outreach.toml` from `project_root`, or defaults when it is absent.
pub fn load_config(project_root: &Path) -> Result<OutreachConfig, String> {
    load_config_from(&project_root.join(CONFIG_FILE_NAME))
}

pub fn load_config_from(config_path: &Path) -> Result<OutreachConfig, String> {
    if !config_path.exists() {
        return Ok(OutreachConfig::default());
    }

    let contents = std::fs::read_to_string(config_path)
        .map_err(|e| format!("Failed to read {}: {}", config_path.display(), e))?;

    let config: OutreachConfig = toml::from_str(&contents)
        .map_err(|e| format!("Failed to parse {}: {}", config_path.display(), e))?;

    validate(&config).map_err(|errors| {
        format!(
            "Config validation failed:\n{}",
            errors
                .iter()
                .map(|e| format!("  - {}", e))
                .collect::<Vec<_>>()
                .join("\n")
        )
    })?;

    Ok(config)
}
