use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    pub paths: PathsConfig,
    pub limits: LimitsConfig,
    pub email: EmailConfig,
    pub minting: MintingConfig,
    pub links: LinksConfig,
    pub search: SearchConfig,
}

impl ExportConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `BIOEXPORT_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to
    /// `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("BIOEXPORT_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            paths: PathsConfig::from_env_profiled(p),
            limits: LimitsConfig::from_env_profiled(p),
            email: EmailConfig::from_env_profiled(p),
            minting: MintingConfig::from_env_profiled(p),
            links: LinksConfig::from_env_profiled(p),
            search: SearchConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  paths:    export_dir={}, spool_dir={}",
            self.paths.export_dir.display(),
            self.paths.spool_dir.display()
        );
        tracing::info!(
            "  limits:   max_records={}, shared_pool={}, pools={}",
            self.limits.max_records,
            self.limits.shared_pool_size,
            if self.limits.pools_json.is_some() { "configured" } else { "(builtin)" }
        );
        tracing::info!(
            "  email:    enabled={}, from={}, smtp={}:{}",
            self.email.enabled,
            self.email.from,
            self.email.smtp_host,
            self.email.smtp_port
        );
        tracing::info!(
            "  minting:  service={}, propagation_delay_ms={}",
            self.minting.service_url.as_deref().unwrap_or("(disabled)"),
            self.minting.propagation_delay_ms
        );
        tracing::info!(
            "  links:    base={}, hub={}",
            self.links.base_url,
            self.links.hub_name
        );
        tracing::info!("  search:   service={}", self.search.service_url);
    }
}

// ── Paths ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the per-job output tree (archives, status records).
    pub export_dir: PathBuf,
    /// Spool directory holding one file per queued job.
    pub spool_dir: PathBuf,
    /// Optional directory overriding the built-in email templates.
    pub template_dir: Option<PathBuf>,
}

impl PathsConfig {
    fn from_env_profiled(p: &str) -> Self {
        let export_dir = PathBuf::from(profiled_env_or(p, "EXPORT_DIR", "data/exports"));
        let spool_dir = PathBuf::from(profiled_env_or(
            p,
            "EXPORT_SPOOL_DIR",
            export_dir.join("spool").to_str().unwrap_or("data/exports/spool"),
        ));
        Self {
            export_dir,
            spool_dir,
            template_dir: profiled_env_opt(p, "TEMPLATE_DIR").map(PathBuf::from),
        }
    }
}

// ── Limits ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Admission ceiling: requests estimated above this are skipped.
    pub max_records: u64,
    /// Permits on the shared execution pool, across all dispatchers.
    pub shared_pool_size: usize,
    /// Pool layout as JSON text; unset means the built-in tiers.
    pub pools_json: Option<String>,
}

impl LimitsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_records: profiled_env_u64(p, "EXPORT_MAX_RECORDS", 100_000_000),
            shared_pool_size: profiled_env_usize(p, "EXPORT_SHARED_POOL_SIZE", 30),
            pools_json: profiled_env_opt(p, "EXPORT_POOLS"),
        }
    }
}

// ── Email / SMTP ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub enabled: bool,
    pub from: String,
    /// Operations address cc'd on failure notifications.
    pub support: Option<String>,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub completion_subject: String,
    pub failure_subject: String,
}

impl EmailConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            enabled: profiled_env_or(p, "EMAIL_ENABLED", "true") == "true",
            from: profiled_env_or(p, "EMAIL_FROM", "exports@localhost"),
            support: profiled_env_opt(p, "EMAIL_SUPPORT"),
            smtp_host: profiled_env_or(p, "SMTP_HOST", "localhost"),
            smtp_port: profiled_env_u16(p, "SMTP_PORT", 25),
            completion_subject: profiled_env_or(
                p,
                "EMAIL_COMPLETION_SUBJECT",
                "Your occurrence export is ready",
            ),
            failure_subject: profiled_env_or(
                p,
                "EMAIL_FAILURE_SUBJECT",
                "Your occurrence export failed",
            ),
        }
    }
}

// ── Identifier minting ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintingConfig {
    /// Base URL of the minting service; unset disables minting.
    pub service_url: Option<String>,
    /// Resolver prefix for presenting minted identifiers.
    pub resolver_base: String,
    /// Wait before notifying, to tolerate resolver propagation lag.
    pub propagation_delay_ms: u64,
    /// Shown in the completion email when minting fails.
    pub failure_message: String,
}

impl MintingConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            service_url: profiled_env_opt(p, "MINT_SERVICE_URL"),
            resolver_base: profiled_env_or(p, "MINT_RESOLVER_BASE", "https://doi.org/"),
            propagation_delay_ms: profiled_env_u64(p, "MINT_PROPAGATION_DELAY_MS", 60_000),
            failure_message: profiled_env_or(
                p,
                "MINT_FAILURE_MESSAGE",
                "A citation identifier could not be created for this export. \
                 Please cite the download URL instead.",
            ),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.service_url.is_some()
    }
}

// ── Links (email placeholders) ────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinksConfig {
    /// Public base URL under which finished archives are served.
    pub base_url: String,
    /// Occurrence search UI, used for "rerun this search" links.
    pub search_ui_url: String,
    pub my_exports_url: String,
    pub hub_name: String,
}

impl LinksConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            base_url: profiled_env_or(p, "BASE_URL", "http://localhost:8080/exports"),
            search_ui_url: profiled_env_or(p, "SEARCH_UI_URL", "http://localhost:8080/search"),
            my_exports_url: profiled_env_or(
                p,
                "MY_EXPORTS_URL",
                "http://localhost:8080/my-exports",
            ),
            hub_name: profiled_env_or(p, "HUB_NAME", "Biodiversity Hub"),
        }
    }
}

// ── Search collaborator ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the occurrence search service.
    pub service_url: String,
}

impl SearchConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            service_url: profiled_env_or(p, "SEARCH_SERVICE_URL", "http://localhost:9000"),
        }
    }
}
