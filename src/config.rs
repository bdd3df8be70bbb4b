use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use regex::Regex;
use serde::Deserialize;
use tracing::trace;

use crate::alerts::rate_limit::{MAX_WINDOW_SECS, RateLimitConfig};
use crate::alerts::rules::{AlertRule, Condition};
use crate::alerts::suppression::{QuietHours, SuppressionPolicy};
use crate::alerts::template::{Template, TemplateError};
use crate::backoff::BackoffPolicy;
use crate::model::{HealthStatus, Severity};
use crate::notify::channel::{Channel, ChannelKind, ChannelTransport};
use crate::probes::dns::DnsProbe;
use crate::probes::http::{HttpMethod, HttpProbe};
use crate::probes::tcp::TcpProbe;
use crate::probes::{Probe, ProbeKind, ProbeRegistry};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,

    #[serde(default)]
    pub suppression: SuppressionConfig,

    /// Global ceiling on dispatches per window, across all rules
    pub rate_limit: Option<RateLimitConfig>,

    /// Result history kept for the snapshot API (optional - defaults apply)
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound of probe attempts in flight at once
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,

    /// Window over which initial probes are spread; defaults to each service's interval
    pub stagger_secs: Option<u64>,

    /// Ratio by which every period deviates from the interval, within `[0, 0.5]`
    #[serde(default = "default_interval_jitter")]
    pub interval_jitter: f64,

    #[serde(default = "default_buffer")]
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_probes: default_max_concurrent_probes(),
            stagger_secs: None,
            interval_jitter: default_interval_jitter(),
            event_buffer: default_buffer(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EngineConfig {
    /// Evaluator shards; events of one fingerprint always land on the same shard
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Resolve alerts that saw no re-fire for this long
    pub alert_ttl_secs: Option<u64>,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_buffer")]
    pub dispatch_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            alert_ttl_secs: None,
            sweep_interval_secs: default_sweep_interval_secs(),
            dispatch_buffer: default_buffer(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_history_per_service")]
    pub history_per_service: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_per_service: default_history_per_service(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Http,
    Tcp,
    Dns,
    Database,
    Custom,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ServiceType,

    /// URL, `host:port`, host name or connection string depending on `type`
    pub endpoint: String,

    /// Seconds between probe cycles
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Seconds a single attempt may take
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default)]
    pub backoff: BackoffPolicy,

    /// Accepted HTTP status codes (any 2xx if not specified)
    pub expected_status: Option<Vec<u16>>,

    /// Response time ceiling; slower successful attempts are `degraded`
    pub max_latency_ms: Option<u64>,

    pub body_pattern: Option<String>,

    #[serde(default)]
    pub method: HttpMethod,

    pub expected_addresses: Option<Vec<IpAddr>>,

    /// Name of a registered custom probe (`type: custom` only)
    pub custom_check: Option<String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConditionConfig {
    /// Regex over the service name
    pub service: Option<String>,
    pub signal: Option<String>,
    pub statuses: Option<Vec<HealthStatus>>,
    pub min_severity: Option<Severity>,
    /// tag key -> regex over the tag value
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub name: String,

    #[serde(default)]
    pub condition: ConditionConfig,

    pub severity: Severity,

    pub message_template: String,

    #[serde(default = "default_resolve_template")]
    pub resolve_template: String,

    pub channels: Vec<String>,

    /// Seconds between dispatches for the same fingerprint
    #[serde(default = "default_cooldown")]
    pub cooldown: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ChannelKind,

    /// Transport settings, shape depends on `type`
    #[serde(default)]
    pub config: serde_json::Value,

    /// Alerts below this severity never reach the channel
    pub severity_filter: Option<Severity>,

    #[serde(default = "default_channel_retries")]
    pub retries: u32,

    #[serde(default)]
    pub backoff: BackoffPolicy,

    /// Per-channel delivery ceiling; excess deliveries wait for the next window
    pub rate_limit: Option<RateLimitConfig>,

    #[serde(default = "default_send_resolved")]
    pub send_resolved: bool,

    /// Seconds a single delivery attempt may take
    #[serde(default = "default_channel_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuppressionConfig {
    #[serde(default)]
    pub quiet_hours: Vec<QuietHoursConfig>,

    /// tag key -> value that suppresses dispatch
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    pub severity_floor: Option<Severity>,
}

/// `"HH:MM"` bounds, interpreted in UTC
#[derive(Debug, Clone, Deserialize)]
pub struct QuietHoursConfig {
    pub start: String,
    pub end: String,
}

fn default_max_concurrent_probes() -> usize {
    16
}

fn default_interval_jitter() -> f64 {
    0.1
}

fn default_buffer() -> usize {
    256
}

fn default_workers() -> usize {
    4
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_history_per_service() -> usize {
    100
}

fn default_interval() -> u64 {
    30
}

fn default_timeout() -> u64 {
    5
}

fn default_retries() -> u32 {
    2
}

fn default_cooldown() -> u64 {
    300
}

fn default_resolve_template() -> String {
    "{{service}} recovered ({{rule}})".to_string()
}

fn default_channel_retries() -> u32 {
    3
}

fn default_send_resolved() -> bool {
    true
}

fn default_channel_timeout() -> u64 {
    10
}

/// Fatal problems found while resolving a configuration
#[derive(Debug)]
pub enum ConfigError {
    /// Two entries of one section share a name
    DuplicateName { section: &'static str, name: String },

    /// A service references a custom probe nobody registered
    UnknownProbe { service: String, probe: String },

    /// A `custom` service without `custom_check`
    MissingCustomCheck { service: String },

    /// A rule references a channel that is not configured
    UnknownChannel { rule: String, channel: String },

    InvalidRegex { context: String, source: regex::Error },

    UnknownPlaceholder { rule: String, placeholder: String },

    InvalidQuietHours(String),

    /// Zero interval/timeout or a backoff that cannot work
    InvalidValue { context: String, reason: String },

    /// The channel's `config` does not fit its `type`
    InvalidChannel { channel: String, reason: String },

    /// The service needs a cargo feature this build does not have
    FeatureDisabled { service: String, feature: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DuplicateName { section, name } => {
                write!(f, "duplicate {} name '{}'", section, name)
            }
            ConfigError::UnknownProbe { service, probe } => {
                write!(f, "service '{}' references unknown custom probe '{}'", service, probe)
            }
            ConfigError::MissingCustomCheck { service } => {
                write!(f, "custom service '{}' has no custom_check", service)
            }
            ConfigError::UnknownChannel { rule, channel } => {
                write!(f, "rule '{}' references unknown channel '{}'", rule, channel)
            }
            ConfigError::InvalidRegex { context, source } => {
                write!(f, "invalid regex in {}: {}", context, source)
            }
            ConfigError::UnknownPlaceholder { rule, placeholder } => {
                write!(f, "rule '{}' uses unknown placeholder '{{{{{}}}}}'", rule, placeholder)
            }
            ConfigError::InvalidQuietHours(msg) => write!(f, "invalid quiet hours: {}", msg),
            ConfigError::InvalidValue { context, reason } => write!(f, "{}: {}", context, reason),
            ConfigError::InvalidChannel { channel, reason } => {
                write!(f, "invalid config for channel '{}': {}", channel, reason)
            }
            ConfigError::FeatureDisabled { service, feature } => {
                write!(f, "service '{}' needs the '{}' feature", service, feature)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidRegex { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A service ready to be scheduled
#[derive(Clone)]
pub struct ResolvedServiceConfig {
    pub name: String,
    pub kind: ProbeKind,
    pub target: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: BackoffPolicy,
    pub max_latency: Option<Duration>,
    pub tags: BTreeMap<String, String>,
    pub probe: Arc<dyn Probe>,
}

impl fmt::Debug for ResolvedServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedServiceConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

/// Validated runtime configuration
#[derive(Debug)]
pub struct ResolvedConfig {
    pub scheduler: SchedulerConfig,
    pub engine: EngineConfig,
    pub services: Vec<ResolvedServiceConfig>,
    pub rules: Vec<AlertRule>,
    pub channels: Vec<Channel>,
    pub suppression: SuppressionPolicy,
    pub rate_limit: Option<RateLimitConfig>,
    pub storage: StorageConfig,
}

impl Config {
    /// Validate everything and bind custom probes; any problem is fatal
    pub fn resolve(self, registry: &ProbeRegistry) -> Result<ResolvedConfig, ConfigError> {
        ensure_unique("service", self.services.iter().map(|s| s.name.as_str()))?;
        ensure_unique("rule", self.rules.iter().map(|r| r.name.as_str()))?;
        ensure_unique("channel", self.channels.iter().map(|c| c.name.as_str()))?;

        if self.engine.workers == 0 {
            return Err(invalid("engine.workers", "must be at least 1"));
        }
        if self.scheduler.max_concurrent_probes == 0 {
            return Err(invalid("scheduler.max_concurrent_probes", "must be at least 1"));
        }
        if !(0.0..=0.5).contains(&self.scheduler.interval_jitter) {
            return Err(invalid("scheduler.interval_jitter", "must be within [0, 0.5]"));
        }
        if let Some(rate_limit) = &self.rate_limit {
            validate_rate_limit(rate_limit, "rate_limit")?;
        }

        let services = self
            .services
            .iter()
            .map(|service| resolve_service(service, registry))
            .collect::<Result<Vec<_>, _>>()?;

        let channels = self
            .channels
            .into_iter()
            .map(resolve_channel)
            .collect::<Result<Vec<_>, _>>()?;

        let channel_names: HashSet<&str> = channels.iter().map(|c| c.name.as_str()).collect();
        let rules = self
            .rules
            .iter()
            .map(|rule| resolve_rule(rule, &channel_names))
            .collect::<Result<Vec<_>, _>>()?;

        let suppression = resolve_suppression(self.suppression)?;

        trace!(
            "resolved {} services, {} rules, {} channels",
            services.len(),
            rules.len(),
            channels.len()
        );

        Ok(ResolvedConfig {
            scheduler: self.scheduler,
            engine: self.engine,
            services,
            rules,
            channels,
            suppression,
            rate_limit: self.rate_limit,
            storage: self.storage,
        })
    }
}

fn invalid(context: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        context: context.into(),
        reason: reason.into(),
    }
}

fn ensure_unique<'a>(section: &'static str, names: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateName {
                section,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn compile(pattern: &str, context: impl Into<String>) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::InvalidRegex {
        context: context.into(),
        source,
    })
}

fn validate_backoff(backoff: &BackoffPolicy, context: &str) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&backoff.jitter) {
        return Err(invalid(format!("{context}.backoff"), "jitter must be within [0, 1]"));
    }
    if backoff.factor < 1.0 {
        return Err(invalid(format!("{context}.backoff"), "factor must be at least 1"));
    }
    Ok(())
}

fn validate_rate_limit(rate_limit: &RateLimitConfig, context: &str) -> Result<(), ConfigError> {
    if rate_limit.window_secs == 0 {
        return Err(invalid(format!("{context}.window_secs"), "must be positive"));
    }
    if rate_limit.window_secs > MAX_WINDOW_SECS {
        return Err(invalid(
            format!("{context}.window_secs"),
            format!("must not exceed {MAX_WINDOW_SECS}"),
        ));
    }
    Ok(())
}

fn resolve_service(service: &ServiceConfig, registry: &ProbeRegistry) -> Result<ResolvedServiceConfig, ConfigError> {
    let context = format!("service '{}'", service.name);
    if service.interval == 0 {
        return Err(invalid(&context, "interval must be positive"));
    }
    if service.timeout == 0 {
        return Err(invalid(&context, "timeout must be positive"));
    }
    validate_backoff(&service.backoff, &context)?;

    let (kind, probe): (ProbeKind, Arc<dyn Probe>) = match service.kind {
        ServiceType::Http => {
            let body_pattern = service
                .body_pattern
                .as_deref()
                .map(|pattern| compile(pattern, format!("{context} body_pattern")))
                .transpose()?;
            let probe = HttpProbe::new(service.method, service.expected_status.clone(), body_pattern);
            (ProbeKind::Http, Arc::new(probe))
        }
        ServiceType::Tcp => (ProbeKind::Tcp, Arc::new(TcpProbe)),
        ServiceType::Dns => {
            let probe = DnsProbe::new(service.expected_addresses.clone());
            (ProbeKind::Dns, Arc::new(probe))
        }
        #[cfg(feature = "db-probe")]
        ServiceType::Database => {
            let probe = crate::probes::database::DatabaseProbe::new();
            (ProbeKind::Database, Arc::new(probe))
        }
        #[cfg(not(feature = "db-probe"))]
        ServiceType::Database => {
            return Err(ConfigError::FeatureDisabled {
                service: service.name.clone(),
                feature: "db-probe",
            });
        }
        ServiceType::Custom => {
            let Some(name) = &service.custom_check else {
                return Err(ConfigError::MissingCustomCheck {
                    service: service.name.clone(),
                });
            };
            let probe = registry.get(name).ok_or_else(|| ConfigError::UnknownProbe {
                service: service.name.clone(),
                probe: name.clone(),
            })?;
            (ProbeKind::Custom(name.clone()), probe)
        }
    };

    Ok(ResolvedServiceConfig {
        name: service.name.clone(),
        kind,
        target: service.endpoint.clone(),
        interval: Duration::from_secs(service.interval),
        timeout: Duration::from_secs(service.timeout),
        retries: service.retries,
        backoff: service.backoff,
        max_latency: service.max_latency_ms.map(Duration::from_millis),
        tags: service.tags.clone(),
        probe,
    })
}

fn resolve_rule(rule: &RuleConfig, channels: &HashSet<&str>) -> Result<AlertRule, ConfigError> {
    if let Some(channel) = rule.channels.iter().find(|c| !channels.contains(c.as_str())) {
        return Err(ConfigError::UnknownChannel {
            rule: rule.name.clone(),
            channel: channel.clone(),
        });
    }

    let context = format!("rule '{}'", rule.name);
    let condition = Condition {
        service: rule
            .condition
            .service
            .as_deref()
            .map(|pattern| compile(pattern, format!("{context} condition.service")))
            .transpose()?,
        signal: rule.condition.signal.clone(),
        statuses: rule.condition.statuses.clone(),
        min_severity: rule.condition.min_severity,
        tags: rule
            .condition
            .tags
            .iter()
            .map(|(key, pattern)| -> Result<(String, Regex), ConfigError> {
                Ok((key.clone(), compile(pattern, format!("{context} condition.tags.{key}"))?))
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    let parse_template = |source: &str| {
        Template::parse(source).map_err(|TemplateError::UnknownPlaceholder(placeholder)| ConfigError::UnknownPlaceholder {
            rule: rule.name.clone(),
            placeholder,
        })
    };

    Ok(AlertRule {
        name: rule.name.clone(),
        condition,
        severity: rule.severity,
        template: parse_template(&rule.message_template)?,
        resolve_template: parse_template(&rule.resolve_template)?,
        channels: rule.channels.clone(),
        cooldown: Duration::from_secs(rule.cooldown),
    })
}

fn resolve_channel(channel: ChannelConfig) -> Result<Channel, ConfigError> {
    let context = format!("channel '{}'", channel.name);
    validate_backoff(&channel.backoff, &context)?;
    if channel.timeout == 0 {
        return Err(invalid(&context, "timeout must be positive"));
    }
    if let Some(rate_limit) = &channel.rate_limit {
        validate_rate_limit(rate_limit, &format!("{context} rate_limit"))?;
    }

    let transport = ChannelTransport::from_config(channel.kind, channel.config).map_err(|err| {
        ConfigError::InvalidChannel {
            channel: channel.name.clone(),
            reason: err.to_string(),
        }
    })?;

    Ok(Channel {
        name: channel.name,
        transport,
        severity_filter: channel.severity_filter,
        retries: channel.retries,
        backoff: channel.backoff,
        rate_limit: channel.rate_limit,
        send_resolved: channel.send_resolved,
        timeout: Duration::from_secs(channel.timeout),
    })
}

fn parse_time(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| ConfigError::InvalidQuietHours(format!("'{value}' is not HH:MM")))
}

fn resolve_suppression(config: SuppressionConfig) -> Result<SuppressionPolicy, ConfigError> {
    let quiet_hours = config
        .quiet_hours
        .iter()
        .map(|window| -> Result<QuietHours, ConfigError> {
            let start = parse_time(&window.start)?;
            let end = parse_time(&window.end)?;
            if start == end {
                return Err(ConfigError::InvalidQuietHours(format!(
                    "window {}-{} is empty",
                    window.start, window.end
                )));
            }
            Ok(QuietHours { start, end })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SuppressionPolicy::new(
        quiet_hours,
        config.tags.into_iter().collect(),
        config.severity_floor,
    ))
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|err| anyhow::anyhow!("Invalid configuration file provided: {err}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
