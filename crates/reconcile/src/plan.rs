//! Plan loader - parses and validates a declarative stack file
//!
//! Loading is pure: the file is parsed into raw serde structures, every
//! field is validated with its path (e.g. `services[1].volumes[0].host_path`),
//! the dependency graph is checked for cycles, and services are put into a
//! deterministic topological order.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::spec::{
    HealthCheck, MountMode, OwnershipPolicy, PortMapping, Probe, PublicEndpoint, ResourceLimits,
    Route, ServiceSpec, VolumeBinding,
};
use crate::units::{parse_duration, parse_mode, parse_size};

static SERVICE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.-]*$").expect("valid regex"));

// ============================================================================
// Raw file schema
// ============================================================================

/// Top-level stack file as written by the operator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackFile {
    #[serde(default)]
    pub stack: StackSection,

    #[serde(default)]
    pub services: Vec<RawService>,

    #[serde(default)]
    pub proxy: Option<ProxySettings>,

    #[serde(default)]
    pub certificates: Option<CertificateSettings>,
}

/// Stack-wide settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackSection {
    /// Stack name, used as the container label value and name prefix
    #[serde(default)]
    pub name: Option<String>,

    /// Maximum number of independent services applied concurrently
    #[serde(default)]
    pub workers: Option<usize>,

    /// Bound for each WaitHealthy action
    #[serde(default)]
    pub health_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawService {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub volumes: Vec<RawVolume>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// "host:container" pairs
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub resources: Option<RawResources>,
    #[serde(default)]
    pub health: Option<RawHealth>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub public: Option<RawPublic>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawVolume {
    pub host_path: String,
    pub container_path: String,
    #[serde(default)]
    pub mode: MountMode,
    pub uid: u32,
    pub gid: u32,
    #[serde(default = "default_permissions")]
    pub permissions: String,
    #[serde(default)]
    pub ownership_policy: OwnershipPolicy,
}

fn default_permissions() -> String {
    "0755".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawResources {
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub cpu_shares: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawHealth {
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub http: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub retries: Option<i64>,
    #[serde(default)]
    pub start_period: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPublic {
    pub hostname: String,
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
}

fn default_true() -> bool {
    true
}

/// Reverse proxy settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Site file the rendered routes are written to
    pub config_path: String,

    /// Syntax check command, `{config}` is replaced by the candidate file
    #[serde(default = "default_validate_command")]
    pub validate_command: Vec<String>,

    /// Reload via command (e.g. `nginx -s reload`)
    #[serde(default)]
    pub reload_command: Option<Vec<String>>,

    /// Reload via HTTP admin endpoint (POST)
    #[serde(default)]
    pub reload_url: Option<String>,

    /// Directory served for ACME http-01 challenges
    #[serde(default)]
    pub acme_webroot: Option<String>,
}

fn default_validate_command() -> Vec<String> {
    vec!["nginx".into(), "-t".into()]
}

/// Certificate renewal settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSettings {
    /// Account email handed to the ACME agent
    pub email: String,

    /// Webroot used for http-01 validation
    pub webroot: String,

    /// Renew when remaining validity drops below this
    #[serde(default = "default_renew_before")]
    pub renew_before: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base: String,

    #[serde(default = "default_backoff_max")]
    pub backoff_max: String,

    /// Agent executable
    #[serde(default = "default_agent")]
    pub agent: String,

    /// Where the agent stores live certificates
    #[serde(default = "default_live_dir")]
    pub live_dir: String,

    /// Optional webhook notified when renewal is escalated
    #[serde(default)]
    pub alert_webhook: Option<String>,
}

fn default_renew_before() -> String {
    "30d".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base() -> String {
    "30s".to_string()
}

fn default_backoff_max() -> String {
    "10m".to_string()
}

fn default_agent() -> String {
    "certbot".to_string()
}

fn default_live_dir() -> String {
    "/etc/letsencrypt/live".to_string()
}

/// Parsed certificate timing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificatePolicy {
    pub renew_before: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for CertificatePolicy {
    fn default() -> Self {
        Self {
            renew_before: Duration::from_secs(30 * 86_400),
            max_attempts: 5,
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(600),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// File format of a stack description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
}

impl Format {
    /// Pick the format from a file extension, defaulting to TOML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Format::Json,
            _ => Format::Toml,
        }
    }
}

/// A validated plan, with services in deterministic topological order
#[derive(Debug, Clone)]
pub struct Plan {
    pub name: String,
    /// Services ordered by dependency depth, ties by declaration order
    pub services: Vec<ServiceSpec>,
    pub workers: usize,
    pub health_timeout: Duration,
    pub proxy: Option<ProxySettings>,
    pub certificates: Option<CertificateSettings>,
    pub certificate_policy: CertificatePolicy,
    depth: HashMap<String, usize>,
}

impl Plan {
    /// Load and validate a stack file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                path.display().to_string(),
                format!("could not read stack file: {}", e),
            )
        })?;
        Self::parse(&content, Format::from_path(path))
    }

    /// Parse and validate stack file content
    pub fn parse(content: &str, format: Format) -> Result<Self> {
        let file: StackFile = match format {
            Format::Toml => toml::from_str(content)
                .map_err(|e| Error::config("document", e.to_string().trim_end()))?,
            Format::Json => serde_json::from_str(content)
                .map_err(|e| Error::config("document", e.to_string()))?,
        };
        Self::from_file(file)
    }

    /// Validate an already-deserialized stack file
    pub fn from_file(file: StackFile) -> Result<Self> {
        let name = file.stack.name.clone().unwrap_or_else(|| "keel".to_string());
        if !SERVICE_NAME.is_match(&name) {
            return Err(Error::config(
                "stack.name",
                format!("'{}' must match {}", name, SERVICE_NAME.as_str()),
            ));
        }

        let workers = file.stack.workers.unwrap_or(4);
        if workers == 0 {
            return Err(Error::config("stack.workers", "must be positive"));
        }

        let health_timeout =
            duration_field("stack.health_timeout", file.stack.health_timeout.as_deref(), "5m")?;

        if file.services.is_empty() {
            return Err(Error::config("services", "at least one service is required"));
        }

        let mut declared: Vec<ServiceSpec> = Vec::with_capacity(file.services.len());
        let mut seen = HashSet::new();
        for (index, raw) in file.services.iter().enumerate() {
            let spec = validate_service(index, raw)?;
            if !seen.insert(spec.name.clone()) {
                return Err(Error::config(
                    format!("services[{}].name", index),
                    format!("duplicate service name '{}'", spec.name),
                ));
            }
            declared.push(spec);
        }

        let mut plan = Self::from_services(&name, declared)?;
        plan.workers = workers;
        plan.health_timeout = health_timeout;

        if let Some(proxy) = &file.proxy {
            validate_proxy(proxy)?;
        }
        if let Some(certs) = &file.certificates {
            plan.certificate_policy = validate_certificates(certs)?;
        }
        plan.proxy = file.proxy;
        plan.certificates = file.certificates;

        Ok(plan)
    }

    /// Build a plan from already validated specs, in declaration order
    ///
    /// Checks the dependency graph and hostnames, then orders the services.
    /// Stack settings take their defaults.
    pub fn from_services(name: &str, declared: Vec<ServiceSpec>) -> Result<Self> {
        validate_dependencies(&declared)?;
        validate_hostnames(&declared)?;

        if let Some(cycle) = find_cycle(&declared) {
            return Err(Error::DependencyCycle { path: cycle });
        }

        let depth = dependency_depths(&declared);
        let mut services: Vec<(usize, ServiceSpec)> = declared.into_iter().enumerate().collect();
        services.sort_by_key(|(index, spec)| (depth[&spec.name], *index));
        let services = services.into_iter().map(|(_, spec)| spec).collect();

        Ok(Self {
            name: name.to_string(),
            services,
            workers: 4,
            health_timeout: Duration::from_secs(300),
            proxy: None,
            certificates: None,
            certificate_policy: CertificatePolicy::default(),
            depth,
        })
    }

    /// Find a service by name
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Service names in execution order
    pub fn order(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    /// Dependency depth of a service (0 for services without dependencies)
    pub fn depth(&self, name: &str) -> Option<usize> {
        self.depth.get(name).copied()
    }

    /// Services transitively depending on `name` (its dependency subtree)
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        let mut found: Vec<&str> = Vec::new();
        let mut frontier = vec![name];
        while let Some(current) = frontier.pop() {
            for spec in &self.services {
                if spec.depends_on.iter().any(|d| d == current) && !found.contains(&spec.name.as_str())
                {
                    found.push(&spec.name);
                    frontier.push(&spec.name);
                }
            }
        }
        found.sort_by_key(|n| self.services.iter().position(|s| s.name == *n));
        found
    }

    /// Routes for every service with a public endpoint
    pub fn routes(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self.services.iter().filter_map(Route::for_service).collect();
        routes.sort();
        routes
    }

    /// Hostnames that need a TLS certificate, in route order
    pub fn tls_domains(&self) -> Vec<String> {
        self.routes()
            .into_iter()
            .filter(|r| r.tls)
            .map(|r| r.hostname)
            .collect()
    }

    /// Whether a reverse proxy is managed by this stack
    pub fn manages_proxy(&self) -> bool {
        self.proxy.is_some()
    }

    /// Whether certificates are managed by this stack
    pub fn manages_certificates(&self) -> bool {
        self.certificates.is_some() && !self.tls_domains().is_empty()
    }
}

// ============================================================================
// Validation
// ============================================================================

fn duration_field(field: &str, value: Option<&str>, default: &str) -> Result<Duration> {
    let raw = value.unwrap_or(default);
    let duration = parse_duration(raw).map_err(|e| Error::config(field, e))?;
    if duration.is_zero() {
        return Err(Error::config(field, "must be positive"));
    }
    Ok(duration)
}

fn validate_service(index: usize, raw: &RawService) -> Result<ServiceSpec> {
    let at = |field: &str| format!("services[{}].{}", index, field);

    if !SERVICE_NAME.is_match(&raw.name) {
        return Err(Error::config(
            at("name"),
            format!("'{}' must match {}", raw.name, SERVICE_NAME.as_str()),
        ));
    }
    if raw.image.trim().is_empty() {
        return Err(Error::config(at("image"), "must not be empty"));
    }
    if let Some(cmd) = &raw.command
        && cmd.is_empty()
    {
        return Err(Error::config(at("command"), "must not be an empty list"));
    }

    let mut volumes = Vec::with_capacity(raw.volumes.len());
    for (vi, volume) in raw.volumes.iter().enumerate() {
        let vat = |field: &str| at(&format!("volumes[{}].{}", vi, field));
        let host_path = PathBuf::from(&volume.host_path);
        if !host_path.is_absolute() {
            return Err(Error::config(
                vat("host_path"),
                format!("'{}' must be an absolute path", volume.host_path),
            ));
        }
        if !volume.container_path.starts_with('/') {
            return Err(Error::config(
                vat("container_path"),
                format!("'{}' must be an absolute path", volume.container_path),
            ));
        }
        let permissions =
            parse_mode(&volume.permissions).map_err(|e| Error::config(vat("permissions"), e))?;
        if permissions > 0o7777 {
            return Err(Error::config(vat("permissions"), "mode bits exceed 07777"));
        }
        volumes.push(VolumeBinding {
            host_path,
            container_path: volume.container_path.clone(),
            mode: volume.mode,
            uid: volume.uid,
            gid: volume.gid,
            permissions,
            policy: volume.ownership_policy,
        });
    }

    let mut ports = Vec::with_capacity(raw.ports.len());
    for (pi, mapping) in raw.ports.iter().enumerate() {
        ports.push(parse_port(mapping).map_err(|e| Error::config(at(&format!("ports[{}]", pi)), e))?);
    }

    let limits = match &raw.resources {
        None => ResourceLimits::default(),
        Some(res) => {
            let memory = match &res.memory {
                None => None,
                Some(m) => {
                    let bytes =
                        parse_size(m).map_err(|e| Error::config(at("resources.memory"), e))?;
                    if bytes == 0 {
                        return Err(Error::config(at("resources.memory"), "must be positive"));
                    }
                    Some(bytes)
                }
            };
            let cpu_shares = match res.cpu_shares {
                None => None,
                Some(shares) if shares > 0 => Some(shares as u64),
                Some(_) => {
                    return Err(Error::config(at("resources.cpu_shares"), "must be positive"));
                }
            };
            ResourceLimits { memory, cpu_shares }
        }
    };

    let health = match &raw.health {
        None => None,
        Some(h) => Some(validate_health(&at("health"), h)?),
    };

    let public = match &raw.public {
        None => None,
        Some(p) => {
            if p.hostname.trim().is_empty() || p.hostname.contains(char::is_whitespace) {
                return Err(Error::config(at("public.hostname"), "must be a hostname"));
            }
            if p.port == 0 {
                return Err(Error::config(at("public.port"), "must be positive"));
            }
            Some(PublicEndpoint {
                hostname: p.hostname.to_lowercase(),
                port: p.port,
                tls: p.tls,
            })
        }
    };

    Ok(ServiceSpec {
        name: raw.name.clone(),
        image: raw.image.clone(),
        command: raw.command.clone(),
        volumes,
        env: raw.env.clone(),
        ports,
        limits,
        health,
        depends_on: raw.depends_on.clone(),
        public,
    })
}

fn validate_health(field: &str, raw: &RawHealth) -> Result<HealthCheck> {
    let probe = match (&raw.command, &raw.http) {
        (Some(cmd), None) if !cmd.is_empty() => Probe::Command(cmd.clone()),
        (None, Some(url)) if url.starts_with("http://") || url.starts_with("https://") => {
            Probe::Http(url.clone())
        }
        (None, Some(url)) => {
            return Err(Error::config(
                format!("{}.http", field),
                format!("'{}' is not an http(s) URL", url),
            ));
        }
        _ => {
            return Err(Error::config(
                field,
                "exactly one of 'command' or 'http' is required",
            ));
        }
    };

    let retries = match raw.retries {
        None => 3,
        Some(r) if r > 0 => r as u32,
        Some(_) => return Err(Error::config(format!("{}.retries", field), "must be positive")),
    };

    Ok(HealthCheck {
        probe,
        interval: duration_field(&format!("{}.interval", field), raw.interval.as_deref(), "10s")?,
        timeout: duration_field(&format!("{}.timeout", field), raw.timeout.as_deref(), "5s")?,
        retries,
        start_period: duration_field(
            &format!("{}.start_period", field),
            raw.start_period.as_deref(),
            "60s",
        )?,
    })
}

fn parse_port(mapping: &str) -> std::result::Result<PortMapping, String> {
    let (host, container) = mapping
        .split_once(':')
        .ok_or_else(|| format!("'{}' must be host:container", mapping))?;
    let parse = |s: &str| -> std::result::Result<u16, String> {
        match s.trim().parse::<u16>() {
            Ok(0) | Err(_) => Err(format!("invalid port '{}'", s.trim())),
            Ok(p) => Ok(p),
        }
    };
    Ok(PortMapping {
        host: parse(host)?,
        container: parse(container)?,
    })
}

fn validate_dependencies(services: &[ServiceSpec]) -> Result<()> {
    let names: HashSet<&str> = services.iter().map(|s| s.name.as_str()).collect();
    for (index, spec) in services.iter().enumerate() {
        for (di, dep) in spec.depends_on.iter().enumerate() {
            let field = format!("services[{}].depends_on[{}]", index, di);
            if dep == &spec.name {
                return Err(Error::DependencyCycle {
                    path: vec![spec.name.clone(), spec.name.clone()],
                });
            }
            if !names.contains(dep.as_str()) {
                return Err(Error::config(field, format!("unknown service '{}'", dep)));
            }
        }
    }
    Ok(())
}

fn validate_hostnames(services: &[ServiceSpec]) -> Result<()> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for (index, spec) in services.iter().enumerate() {
        if let Some(public) = &spec.public
            && let Some(other) = seen.insert(&public.hostname, &spec.name)
        {
            return Err(Error::config(
                format!("services[{}].public.hostname", index),
                format!("'{}' is already routed to '{}'", public.hostname, other),
            ));
        }
    }
    Ok(())
}

fn validate_proxy(proxy: &ProxySettings) -> Result<()> {
    if proxy.config_path.trim().is_empty() {
        return Err(Error::config("proxy.config_path", "must not be empty"));
    }
    if proxy.validate_command.is_empty() {
        return Err(Error::config("proxy.validate_command", "must not be empty"));
    }
    match (&proxy.reload_command, &proxy.reload_url) {
        (Some(cmd), None) if !cmd.is_empty() => Ok(()),
        (None, Some(url)) if url.starts_with("http://") || url.starts_with("https://") => Ok(()),
        _ => Err(Error::config(
            "proxy",
            "exactly one of 'reload_command' or 'reload_url' (http) is required",
        )),
    }
}

fn validate_certificates(certs: &CertificateSettings) -> Result<CertificatePolicy> {
    if !certs.email.contains('@') {
        return Err(Error::config("certificates.email", "must be an email address"));
    }
    if certs.webroot.trim().is_empty() {
        return Err(Error::config("certificates.webroot", "must not be empty"));
    }
    if certs.max_attempts == 0 {
        return Err(Error::config("certificates.max_attempts", "must be positive"));
    }
    Ok(CertificatePolicy {
        renew_before: duration_field(
            "certificates.renew_before",
            Some(&certs.renew_before),
            "30d",
        )?,
        max_attempts: certs.max_attempts,
        backoff_base: duration_field("certificates.backoff_base", Some(&certs.backoff_base), "30s")?,
        backoff_max: duration_field("certificates.backoff_max", Some(&certs.backoff_max), "10m")?,
    })
}

/// Depth-first search for a dependency cycle, returning the full cycle path
fn find_cycle(services: &[ServiceSpec]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit<'a>(
        name: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(name, Mark::InProgress);
        stack.push(name);

        for &dep in edges.get(name).map(Vec::as_slice).unwrap_or_default() {
            match marks.get(dep).copied().unwrap_or(Mark::Unvisited) {
                Mark::InProgress => {
                    let start = stack.iter().position(|n| *n == dep).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|n| n.to_string()).collect();
                    path.push(dep.to_string());
                    return Some(path);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(dep, edges, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks.insert(name, Mark::Done);
        None
    }

    let edges: HashMap<&str, Vec<&str>> = services
        .iter()
        .map(|s| (s.name.as_str(), s.depends_on.iter().map(String::as_str).collect()))
        .collect();
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for spec in services {
        if marks.get(spec.name.as_str()).copied().unwrap_or(Mark::Unvisited) == Mark::Unvisited {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(&spec.name, &edges, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Longest dependency chain below each service; requires an acyclic graph
fn dependency_depths(services: &[ServiceSpec]) -> HashMap<String, usize> {
    fn depth_of(
        name: &str,
        by_name: &HashMap<&str, &ServiceSpec>,
        memo: &mut HashMap<String, usize>,
    ) -> usize {
        if let Some(d) = memo.get(name) {
            return *d;
        }
        let depth = by_name
            .get(name)
            .map(|spec| {
                spec.depends_on
                    .iter()
                    .map(|dep| depth_of(dep, by_name, memo) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        memo.insert(name.to_string(), depth);
        depth
    }

    let by_name: HashMap<&str, &ServiceSpec> =
        services.iter().map(|s| (s.name.as_str(), s)).collect();
    let mut memo = HashMap::new();
    for spec in services {
        depth_of(&spec.name, &by_name, &mut memo);
    }
    memo
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK: &str = r#"
[stack]
name = "sonar"

[[services]]
name = "db"
image = "postgres:15"
env = { POSTGRES_USER = "sonar" }

[[services.volumes]]
host_path = "/srv/postgresql"
container_path = "/var/lib/postgresql/data"
uid = 999
gid = 999
permissions = "0700"

[services.health]
command = ["pg_isready", "-U", "sonar"]
interval = "5s"
retries = 5
start_period = "30s"

[[services]]
name = "app"
image = "sonarqube:lts-community"
depends_on = ["db"]
ports = ["9000:9000"]

[services.resources]
memory = "4GB"
cpu_shares = 1024

[services.health]
http = "http://127.0.0.1:9000/api/system/status"

[services.public]
hostname = "Sonar.Example.com"
port = 9000

[proxy]
config_path = "/etc/nginx/conf.d/sonar.conf"
reload_command = ["nginx", "-s", "reload"]
"#;

    fn raw(name: &str, deps: &[&str]) -> RawService {
        RawService {
            name: name.to_string(),
            image: format!("example/{}", name),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    fn stack(services: Vec<RawService>) -> StackFile {
        StackFile {
            services,
            ..Default::default()
        }
    }

    fn field_of(err: Error) -> String {
        match err {
            Error::Config { field, .. } => field,
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_toml_stack() {
        let plan = Plan::parse(STACK, Format::Toml).unwrap();
        assert_eq!(plan.name, "sonar");
        assert_eq!(plan.order(), vec!["db", "app"]);
        assert_eq!(plan.workers, 4);
        assert_eq!(plan.health_timeout, Duration::from_secs(300));

        let db = plan.service("db").unwrap();
        assert_eq!(db.volumes[0].permissions, 0o700);
        assert_eq!(db.volumes[0].uid, 999);
        let health = db.health.as_ref().unwrap();
        assert_eq!(health.interval, Duration::from_secs(5));
        assert_eq!(health.timeout, Duration::from_secs(5));
        assert_eq!(health.retries, 5);

        let app = plan.service("app").unwrap();
        assert_eq!(app.limits.memory, Some(4 * 1024 * 1024 * 1024));
        assert_eq!(app.ports[0].host, 9000);
        assert_eq!(plan.tls_domains(), vec!["sonar.example.com".to_string()]);
        assert!(plan.manages_proxy());
        assert!(!plan.manages_certificates());
    }

    #[test]
    fn test_parse_json_stack() {
        let json = r#"{
            "services": [
                {"name": "db", "image": "postgres:15"},
                {"name": "app", "image": "sonarqube", "depends_on": ["db"]}
            ]
        }"#;
        let plan = Plan::parse(json, Format::Json).unwrap();
        assert_eq!(plan.order(), vec!["db", "app"]);
        assert_eq!(plan.name, "keel");
    }

    #[test]
    fn test_load_picks_format_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("stack.json");
        std::fs::write(&json, r#"{"services": [{"name": "db", "image": "postgres:15"}]}"#)
            .unwrap();
        assert_eq!(Plan::load(&json).unwrap().order(), vec!["db"]);

        let toml = dir.path().join("keel.toml");
        std::fs::write(&toml, STACK).unwrap();
        assert_eq!(Plan::load(&toml).unwrap().name, "sonar");

        let missing = Plan::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, Error::Config { .. }));
    }

    #[test]
    fn test_syntax_error_is_config_error() {
        let err = Plan::parse("[[services]\nname=", Format::Toml).unwrap_err();
        assert_eq!(field_of(err), "document");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = Plan::from_file(stack(vec![raw("db", &[]), raw("db", &[])])).unwrap_err();
        assert_eq!(field_of(err), "services[1].name");
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = Plan::from_file(stack(vec![raw("app", &["db"])])).unwrap_err();
        assert_eq!(field_of(err), "services[0].depends_on[0]");
    }

    #[test]
    fn test_cycle_reported_with_full_path() {
        let err = Plan::from_file(stack(vec![
            raw("a", &["b"]),
            raw("b", &["c"]),
            raw("c", &["a"]),
        ]))
        .unwrap_err();
        match err {
            Error::DependencyCycle { path } => assert_eq!(path, vec!["a", "b", "c", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = Plan::from_file(stack(vec![raw("a", &["a"])])).unwrap_err();
        assert!(matches!(err, Error::DependencyCycle { .. }));
    }

    #[test]
    fn test_relative_volume_path_rejected() {
        let mut db = raw("db", &[]);
        db.volumes.push(RawVolume {
            host_path: "data/pg".into(),
            container_path: "/data".into(),
            uid: 1,
            gid: 1,
            permissions: "0750".into(),
            ..Default::default()
        });
        let err = Plan::from_file(stack(vec![db])).unwrap_err();
        assert_eq!(field_of(err), "services[0].volumes[0].host_path");
    }

    #[test]
    fn test_non_positive_limits_rejected() {
        let mut app = raw("app", &[]);
        app.resources = Some(RawResources {
            memory: Some("0".into()),
            cpu_shares: None,
        });
        let err = Plan::from_file(stack(vec![app])).unwrap_err();
        assert_eq!(field_of(err), "services[0].resources.memory");

        let mut app = raw("app", &[]);
        app.resources = Some(RawResources {
            memory: None,
            cpu_shares: Some(-5),
        });
        let err = Plan::from_file(stack(vec![app])).unwrap_err();
        assert_eq!(field_of(err), "services[0].resources.cpu_shares");
    }

    #[test]
    fn test_health_requires_one_probe() {
        let mut app = raw("app", &[]);
        app.health = Some(RawHealth {
            command: Some(vec!["true".into()]),
            http: Some("http://localhost".into()),
            ..Default::default()
        });
        let err = Plan::from_file(stack(vec![app])).unwrap_err();
        assert_eq!(field_of(err), "services[0].health");
    }

    #[test]
    fn test_invalid_service_name_rejected() {
        let err = Plan::from_file(stack(vec![raw("My App", &[])])).unwrap_err();
        assert_eq!(field_of(err), "services[0].name");
    }

    #[test]
    fn test_duplicate_hostname_rejected() {
        let public = RawPublic {
            hostname: "a.example.com".into(),
            port: 80,
            tls: false,
        };
        let mut one = raw("one", &[]);
        one.public = Some(public.clone());
        let mut two = raw("two", &[]);
        two.public = Some(public);
        let err = Plan::from_file(stack(vec![one, two])).unwrap_err();
        assert_eq!(field_of(err), "services[1].public.hostname");
    }

    #[test]
    fn test_topological_order_by_depth_then_declaration() {
        let plan = Plan::from_file(stack(vec![
            raw("web", &["api", "cache"]),
            raw("api", &["db"]),
            raw("cache", &[]),
            raw("db", &[]),
        ]))
        .unwrap();
        assert_eq!(plan.order(), vec!["cache", "db", "api", "web"]);
        assert_eq!(plan.depth("web"), Some(2));
        assert_eq!(plan.depth("cache"), Some(0));
    }

    #[test]
    fn test_order_is_deterministic() {
        let build = || {
            Plan::from_file(stack(vec![
                raw("a", &[]),
                raw("b", &["a"]),
                raw("c", &[]),
                raw("d", &["c", "b"]),
                raw("e", &[]),
            ]))
            .unwrap()
            .order()
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
        };
        let first = build();
        for _ in 0..10 {
            assert_eq!(build(), first);
        }
        assert_eq!(first, vec!["a", "c", "e", "b", "d"]);
    }

    #[test]
    fn test_dependents_is_transitive() {
        let plan = Plan::from_file(stack(vec![
            raw("db", &[]),
            raw("app", &["db"]),
            raw("worker", &["app"]),
            raw("cache", &[]),
        ]))
        .unwrap();
        assert_eq!(plan.dependents("db"), vec!["app", "worker"]);
        assert!(plan.dependents("cache").is_empty());
    }

    #[test]
    fn test_proxy_requires_one_reload_method() {
        let mut file = stack(vec![raw("app", &[])]);
        file.proxy = Some(ProxySettings {
            config_path: "/etc/nginx/conf.d/app.conf".into(),
            validate_command: default_validate_command(),
            reload_command: None,
            reload_url: None,
            acme_webroot: None,
        });
        let err = Plan::from_file(file).unwrap_err();
        assert_eq!(field_of(err), "proxy");
    }

    #[test]
    fn test_certificate_policy_defaults() {
        let mut file = stack(vec![raw("app", &[])]);
        file.certificates = Some(CertificateSettings {
            email: "ops@example.com".into(),
            webroot: "/var/www/acme".into(),
            renew_before: default_renew_before(),
            max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
            agent: default_agent(),
            live_dir: default_live_dir(),
            alert_webhook: None,
        });
        let plan = Plan::from_file(file).unwrap();
        assert_eq!(plan.certificate_policy, CertificatePolicy::default());
    }
}
