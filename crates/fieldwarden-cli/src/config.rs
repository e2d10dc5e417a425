//! CLI configuration.

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "fieldwarden=info";

/// Default location of the audit trail.
pub const DEFAULT_AUDIT_PATH: &str = "./audit.jsonl";

/// Where audit entries are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuditSinkKind {
    /// Structured log events on the `fieldwarden::audit` target.
    Tracing,
    /// Append-only JSON-lines file.
    File,
    /// Embedded sled database.
    Sled,
    /// Kept in memory for the lifetime of the process.
    Memory,
    /// Discarded.
    Null,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Policy document; the built-in user-accounts table when absent.
    pub policy_path: Option<PathBuf>,

    /// Audit sink to write to.
    pub audit_sink: AuditSinkKind,

    /// File path (file sink) or directory (sled sink) of the audit trail.
    pub audit_path: PathBuf,

    /// Log filter directive.
    pub log_filter: String,
}

impl EngineConfig {
    /// Create a configuration with the built-in registry and a file sink.
    pub fn new() -> Self {
        Self {
            policy_path: None,
            audit_sink: AuditSinkKind::File,
            audit_path: PathBuf::from(DEFAULT_AUDIT_PATH),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }

    /// Load policies from a JSON document.
    pub fn with_policy_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.policy_path = Some(path.into());
        self
    }

    /// Set the audit sink.
    pub fn with_audit_sink(mut self, sink: AuditSinkKind) -> Self {
        self.audit_sink = sink;
        self
    }

    /// Set the audit trail location.
    pub fn with_audit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_path = path.into();
        self
    }

    /// Set the log filter.
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Whether the audit trail persists beyond the process.
    pub fn has_durable_audit(&self) -> bool {
        matches!(self.audit_sink, AuditSinkKind::File | AuditSinkKind::Sled)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "fieldwarden")]
#[command(version, about = "Field-level access control for user records", long_about = None)]
pub struct Args {
    /// Policy document (JSON). Uses the built-in user-accounts table if omitted.
    #[arg(short, long, global = true)]
    pub policy: Option<PathBuf>,

    /// Audit sink.
    #[arg(long, value_enum, default_value = "file", global = true)]
    pub audit_sink: AuditSinkKind,

    /// Audit file (file sink) or database directory (sled sink).
    #[arg(long, default_value = DEFAULT_AUDIT_PATH, global = true)]
    pub audit_path: PathBuf,

    /// Log filter, overridden by RUST_LOG.
    #[arg(long, default_value = DEFAULT_LOG_FILTER, global = true)]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Convert arguments into engine configuration.
    pub fn into_config(self) -> (EngineConfig, Command) {
        let mut config = EngineConfig::new()
            .with_audit_sink(self.audit_sink)
            .with_audit_path(self.audit_path)
            .with_log_filter(self.log_filter);

        if let Some(path) = self.policy {
            config = config.with_policy_path(path);
        }

        (config, self.command)
    }
}

/// The acting principal.
#[derive(ClapArgs, Debug, Clone)]
pub struct PrincipalArgs {
    /// Actor identifier.
    #[arg(long = "actor-id")]
    pub actor_id: String,

    /// Actor label (email).
    #[arg(long = "actor")]
    pub actor_label: String,

    /// Role marker established at login.
    #[arg(long)]
    pub role: Option<String>,

    /// X-Forwarded-For header value.
    #[arg(long)]
    pub forwarded_for: Option<String>,

    /// Peer address.
    #[arg(long)]
    pub remote_addr: Option<String>,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the detail fieldset for a role, grouped by section.
    Fieldset {
        /// Role to list fields for.
        #[arg(long)]
        role: String,
    },

    /// Open one record and print the fields the actor may see.
    View {
        #[command(flatten)]
        principal: PrincipalArgs,

        /// Subject record (JSON object).
        #[arg(long)]
        subject: PathBuf,

        /// Comma-separated fields; the actor's fieldset if omitted.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },

    /// List records with the list columns.
    List {
        #[command(flatten)]
        principal: PrincipalArgs,

        /// Subject records (JSON array of objects).
        #[arg(long)]
        subjects: PathBuf,
    },

    /// Check proposed changes against the actor's edit rights.
    Edit {
        #[command(flatten)]
        principal: PrincipalArgs,

        /// Subject record (JSON object).
        #[arg(long)]
        subject: PathBuf,

        /// Proposed changes (JSON object of field to new value).
        #[arg(long)]
        changes: PathBuf,
    },

    /// Verify the audit trail's hash chain.
    Verify,

    /// Print the active policy document.
    Policy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_config_defaults() {
        let args = Args::parse_from(["fieldwarden", "policy"]);
        let (config, command) = args.into_config();

        assert_eq!(config.audit_sink, AuditSinkKind::File);
        assert_eq!(config.audit_path, PathBuf::from(DEFAULT_AUDIT_PATH));
        assert!(config.policy_path.is_none());
        assert!(config.has_durable_audit());
        assert!(matches!(command, Command::Policy));
    }

    #[test]
    fn test_view_arguments() {
        let args = Args::parse_from([
            "fieldwarden",
            "--audit-sink",
            "memory",
            "view",
            "--actor-id",
            "7",
            "--actor",
            "support@example.com",
            "--role",
            "staff",
            "--subject",
            "user.json",
            "--fields",
            "email,phone_number",
        ]);
        let (config, command) = args.into_config();

        assert_eq!(config.audit_sink, AuditSinkKind::Memory);
        assert!(!config.has_durable_audit());
        match command {
            Command::View {
                principal, fields, ..
            } => {
                assert_eq!(principal.role.as_deref(), Some("staff"));
                assert_eq!(fields, vec!["email", "phone_number"]);
            }
            other => panic!("expected view, got {:?}", other),
        }
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::default()
            .with_policy_path("policy.json")
            .with_audit_sink(AuditSinkKind::Sled)
            .with_log_filter("fieldwarden=debug");

        assert_eq!(config.policy_path, Some(PathBuf::from("policy.json")));
        assert_eq!(config.log_filter, "fieldwarden=debug");
        assert!(config.has_durable_audit());
    }
}
