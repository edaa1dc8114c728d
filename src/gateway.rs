use std::collections::HashMap;
use std::time::Duration;

use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{GatewayConfig, PreviewConfig};
use crate::types::{Channel, Lead};
use crate::{log_debug, log_warn};

const SIGTERM_GRACE_PERIOD_SECONDS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("no gateway configured for {0}")]
    NotConfigured(Channel),

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("provider rejected the request: {0}")]
    Rejected(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("malformed provider response: {0}")]
    Protocol(String),
}

/// Outbound contact provider. One method per channel; each returns the
/// provider's reference for the accepted request.
pub trait ChannelGateway: Send + Sync {
    fn send_email(
        &self,
        lead_id: &str,
        to: &str,
        content: &str,
    ) -> impl std::future::Future<Output = Result<String, GatewayError>> + Send;

    fn send_sms(
        &self,
        lead_id: &str,
        to: &str,
        content: &str,
    ) -> impl std::future::Future<Output = Result<String, GatewayError>> + Send;

    fn start_call(
        &self,
        lead_id: &str,
        to: &str,
    ) -> impl std::future::Future<Output = Result<String, GatewayError>> + Send;
}

/// Route one dispatch to the gateway method for `channel`, addressed to the
/// lead's own email or phone.
pub async fn deliver<G: ChannelGateway>(
    gateway: &G,
    lead: &Lead,
    channel: Channel,
    payload: Option<&str>,
) -> Result<String, GatewayError> {
    let content = payload.unwrap_or_default();
    match channel {
        Channel::Email => {
            let to = destination(lead.email.as_deref(), "email address", &lead.id)?;
            gateway.send_email(&lead.id, to, content).await
        }
        Channel::Sms => {
            let to = destination(lead.phone.as_deref(), "phone number", &lead.id)?;
            gateway.send_sms(&lead.id, to, content).await
        }
        Channel::Phone => {
            let to = destination(lead.phone.as_deref(), "phone number", &lead.id)?;
            gateway.start_call(&lead.id, to).await
        }
    }
}

fn destination<'a>(value: Option<&'a str>, what: &str, lead_id: &str) -> Result<&'a str, GatewayError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::InvalidDestination(format!("lead {} has no {}", lead_id, what)))
}

// --- Command gateway ---

/// JSON written to the provider command's stdin.
#[derive(Serialize, Debug)]
struct GatewayRequest<'a> {
    channel: Channel,
    lead_id: &'a str,
    to: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
}

/// JSON expected on the provider command's stdout.
#[derive(Deserialize, Debug)]
struct GatewayReply {
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Gateway that hands each request to an external command, one process per
/// call. The request goes in on stdin as JSON; the command prints
/// `{"reference": "..."}` on success or `{"error": "..."}` on rejection.
pub struct CommandChannelGateway {
    config: GatewayConfig,
}

impl CommandChannelGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    fn command_for(&self, channel: Channel) -> Result<&[String], GatewayError> {
        let argv = match channel {
            Channel::Email => &self.config.email_command,
            Channel::Sms => &self.config.sms_command,
            Channel::Phone => &self.config.call_command,
        };
        if argv.is_empty() {
            return Err(GatewayError::NotConfigured(channel));
        }
        Ok(argv)
    }

    async fn invoke(
        &self,
        channel: Channel,
        lead_id: &str,
        to: &str,
        content: Option<&str>,
    ) -> Result<String, GatewayError> {
        let argv = self.command_for(channel)?;
        let request = GatewayRequest {
            channel,
            lead_id,
            to,
            content,
        };
        let body = serde_json::to_vec(&request)
            .map_err(|e| GatewayError::Protocol(format!("failed to encode request: {}", e)))?;

        let mut cmd = tokio::process::Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        run_gateway_command(cmd, &body, self.config.timeout()).await
    }
}

impl ChannelGateway for CommandChannelGateway {
    async fn send_email(&self, lead_id: &str, to: &str, content: &str) -> Result<String, GatewayError> {
        self.invoke(Channel::Email, lead_id, to, Some(content)).await
    }

    async fn send_sms(&self, lead_id: &str, to: &str, content: &str) -> Result<String, GatewayError> {
        self.invoke(Channel::Sms, lead_id, to, Some(content)).await
    }

    async fn start_call(&self, lead_id: &str, to: &str) -> Result<String, GatewayError> {
        self.invoke(Channel::Phone, lead_id, to, None).await
    }
}

/// Spawn a provider command, feed it `request`, enforce `timeout`, parse its reply.
///
/// The child runs in its own process group so a timeout kills anything it spawned.
pub async fn run_gateway_command(
    mut cmd: tokio::process::Command,
    request: &[u8],
    timeout: Duration,
) -> Result<String, GatewayError> {
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::inherit());
    cmd.kill_on_drop(true);

    // SAFETY: pre_exec runs between fork() and exec() where only async-signal-safe
    // functions are permitted. setpgid is async-signal-safe per POSIX.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                .map_err(std::io::Error::other)?;
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| GatewayError::Unavailable(format!("failed to spawn provider command: {}", e)))?;
    let child_pid = child
        .id()
        .ok_or_else(|| GatewayError::Unavailable("failed to get provider PID".to_string()))?
        as i32;
    log_debug!("[gateway] Provider spawned (pid={})", child_pid);

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(request).await {
            log_warn!("[gateway] Failed to write request to provider: {}", e);
        }
    }

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| GatewayError::Unavailable("provider stdout not captured".to_string()))?;

    let wait = async {
        let mut output = Vec::new();
        stdout.read_to_end(&mut output).await?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, output))
    };

    let waited = tokio::time::timeout(timeout, wait).await;
    let (status, output) = match waited {
        Err(_) => {
            log_debug!("[gateway] TIMEOUT after {}s, killing process group", timeout.as_secs());
            terminate_provider(&mut child, child_pid).await;
            return Err(GatewayError::Timeout(timeout));
        }
        Ok(Err(e)) => {
            return Err(GatewayError::Unavailable(format!(
                "error waiting for provider: {}",
                e
            )))
        }
        Ok(Ok(done)) => done,
    };
    log_debug!("[gateway] Provider exited (status={:?})", status.code());

    let reply: Result<GatewayReply, _> = serde_json::from_slice(&output);
    match (status.success(), reply) {
        (_, Ok(GatewayReply { error: Some(error), .. })) => Err(GatewayError::Rejected(error)),
        (true, Ok(GatewayReply {
            reference: Some(reference),
            ..
        })) if !reference.trim().is_empty() => Ok(reference),
        (true, Ok(_)) => Err(GatewayError::Protocol(
            "provider reply carries no reference".to_string(),
        )),
        (true, Err(e)) => Err(GatewayError::Protocol(format!(
            "failed to parse provider reply: {}",
            e
        ))),
        (false, _) => Err(GatewayError::Rejected(format!(
            "provider exited with code {:?}",
            status.code()
        ))),
    }
}

/// Stop a provider that outlived its timeout. The whole group gets SIGTERM;
/// if the provider itself is still running after the grace period, SIGKILL.
async fn terminate_provider(child: &mut tokio::process::Child, pgid: i32) {
    use nix::sys::signal::{killpg, Signal};

    let group = Pid::from_raw(pgid);
    if killpg(group, Signal::SIGTERM).is_ok() {
        let grace = Duration::from_secs(SIGTERM_GRACE_PERIOD_SECONDS);
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        log_warn!("[gateway] Provider group {} ignored SIGTERM, sending SIGKILL", pgid);
        let _ = killpg(group, Signal::SIGKILL);
    }
    if let Err(e) = child.wait().await {
        log_warn!("[gateway] Failed to reap provider {}: {}", pgid, e);
    }
}

// --- Mock gateway ---

/// A call observed by `MockChannelGateway`.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCall {
    pub lead_id: String,
    pub channel: Channel,
    pub to: String,
    pub content: Option<String>,
}

/// Mock gateway for dispatcher tests.
///
/// Accepts every request unless told otherwise with `fail_for`. References
/// are `mock-<n>` in call order.
#[derive(Default)]
pub struct MockChannelGateway {
    calls: Mutex<Vec<GatewayCall>>,
    failures: HashMap<String, GatewayError>,
    cancel_after: Option<(usize, CancellationToken)>,
    delay: Option<Duration>,
}

impl MockChannelGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every request for `lead_id`.
    pub fn fail_for(mut self, lead_id: &str, message: &str) -> Self {
        self.failures
            .insert(lead_id.to_string(), GatewayError::Rejected(message.to_string()));
        self
    }

    /// Cancel `token` as soon as the `n`th call has been answered.
    pub fn cancel_after(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    /// Hold every call for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    async fn record(
        &self,
        channel: Channel,
        lead_id: &str,
        to: &str,
        content: Option<&str>,
    ) -> Result<String, GatewayError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let count = {
            let mut calls = self.calls.lock().await;
            calls.push(GatewayCall {
                lead_id: lead_id.to_string(),
                channel,
                to: to.to_string(),
                content: content.map(str::to_string),
            });
            calls.len()
        };

        if let Some((n, ref token)) = self.cancel_after {
            if count >= n {
                token.cancel();
            }
        }

        match self.failures.get(lead_id) {
            Some(err) => Err(err.clone()),
            None => Ok(format!("mock-{}", count)),
        }
    }
}

impl ChannelGateway for MockChannelGateway {
    async fn send_email(&self, lead_id: &str, to: &str, content: &str) -> Result<String, GatewayError> {
        self.record(Channel::Email, lead_id, to, Some(content)).await
    }

    async fn send_sms(&self, lead_id: &str, to: &str, content: &str) -> Result<String, GatewayError> {
        self.record(Channel::Sms, lead_id, to, Some(content)).await
    }

    async fn start_call(&self, lead_id: &str, to: &str) -> Result<String, GatewayError> {
        self.record(Channel::Phone, lead_id, to, None).await
    }
}

// --- Test-mode gateway ---

/// A message captured by `TestChannelGateway`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    pub lead_id: String,
    pub channel: Channel,
    /// The configured test destination, never the lead's own.
    pub to: String,
    pub content: Option<String>,
    pub reference: String,
}

/// Sandbox gateway used for previews.
///
/// Every request is rerouted to the configured test email or phone and kept
/// in an in-memory outbox. Nothing reaches a real lead.
pub struct TestChannelGateway {
    test_email: Option<String>,
    test_phone: Option<String>,
    outbox: Mutex<Vec<OutboxMessage>>,
}

impl TestChannelGateway {
    pub fn new(test_email: Option<String>, test_phone: Option<String>) -> Self {
        Self {
            test_email,
            test_phone,
            outbox: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &PreviewConfig) -> Self {
        Self::new(config.test_email.clone(), config.test_phone.clone())
    }

    pub async fn outbox(&self) -> Vec<OutboxMessage> {
        self.outbox.lock().await.clone()
    }

    async fn capture(
        &self,
        channel: Channel,
        lead_id: &str,
        content: Option<&str>,
    ) -> Result<String, GatewayError> {
        let to = match channel {
            Channel::Email => self.test_email.as_deref(),
            Channel::Sms | Channel::Phone => self.test_phone.as_deref(),
        }
        .ok_or(GatewayError::NotConfigured(channel))?;

        let mut outbox = self.outbox.lock().await;
        let reference = format!("test-{}", outbox.len() + 1);
        outbox.push(OutboxMessage {
            lead_id: lead_id.to_string(),
            channel,
            to: to.to_string(),
            content: content.map(str::to_string),
            reference: reference.clone(),
        });
        Ok(reference)
    }
}

impl ChannelGateway for TestChannelGateway {
    async fn send_email(&self, lead_id: &str, _to: &str, content: &str) -> Result<String, GatewayError> {
        self.capture(Channel::Email, lead_id, Some(content)).await
    }

    async fn send_sms(&self, lead_id: &str, _to: &str, content: &str) -> Result<String, GatewayError> {
        self.capture(Channel::Sms, lead_id, Some(content)).await
    }

    async fn start_call(&self, lead_id: &str, _to: &str) -> Result<String, GatewayError> {
        self.capture(Channel::Phone, lead_id, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead() -> Lead {
        Lead::new(
            "LEAD-001",
            "Ada",
            Some("ada@example.com".to_string()),
            Some("+15551234567".to_string()),
        )
    }

    #[tokio::test]
    async fn deliver_routes_to_lead_destination() {
        let gateway = MockChannelGateway::new();
        let reference = deliver(&gateway, &lead(), Channel::Sms, Some("hi")).await.unwrap();
        assert_eq!(reference, "mock-1");

        let calls = gateway.calls().await;
        assert_eq!(calls[0].to, "+15551234567");
        assert_eq!(calls[0].content.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn deliver_without_destination_fails_before_calling() {
        let gateway = MockChannelGateway::new();
        let mut lead = lead();
        lead.email = None;
        let err = deliver(&gateway, &lead, Channel::Email, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidDestination(_)));
        assert_eq!(gateway.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_gateway_reroutes_to_test_destination() {
        let gateway = TestChannelGateway::new(Some("qa@example.com".to_string()), None);
        let reference = deliver(&gateway, &lead(), Channel::Email, Some("hello")).await.unwrap();
        assert_eq!(reference, "test-1");

        let outbox = gateway.outbox().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].to, "qa@example.com");

        let err = deliver(&gateway, &lead(), Channel::Sms, None).await.unwrap_err();
        assert_eq!(err, GatewayError::NotConfigured(Channel::Sms));
    }

    #[tokio::test]
    async fn command_gateway_without_command_is_not_configured() {
        let gateway = CommandChannelGateway::new(GatewayConfig::default());
        let err = gateway.send_email("LEAD-001", "a@b.c", "x").await.unwrap_err();
        assert_eq!(err, GatewayError::NotConfigured(Channel::Email));
    }

    #[tokio::test]
    async fn command_gateway_parses_reference() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", "cat > /dev/null; echo '{\"reference\": \"prov-42\"}'"]);
        let reference = run_gateway_command(cmd, b"{}", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(reference, "prov-42");
    }

    #[tokio::test]
    async fn command_gateway_reports_rejection() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", "cat > /dev/null; echo '{\"error\": \"bounced\"}'; exit 1"]);
        let err = run_gateway_command(cmd, b"{}", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Rejected("bounced".to_string()));
    }

    #[tokio::test]
    async fn command_gateway_times_out() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", "sleep 30"]);
        let err = run_gateway_command(cmd, b"{}", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)));
    }
}
