use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tel",
    about = "Tamper-evident ledger: append-only hash chains with Merkle proofs",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Ledger data directory (overrides the config file; default `.tel`)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Append a JSON object payload to a chain
    Append(AppendArgs),
    /// Show the latest entry of a chain
    Tail(ScopeArgs),
    /// Show one entry
    Show(ShowArgs),
    /// List entries in a sequence range
    List(ListArgs),
    /// List chain scopes
    Scopes(ScopesArgs),
    /// Verify one chain, or every chain
    Verify(VerifyArgs),
    /// Print the Merkle root of a chain
    Root(ScopeArgs),
    /// Build a Merkle inclusion proof for an entry
    Proof(ProofArgs),
    /// Check an inclusion proof against a root
    VerifyProof(VerifyProofArgs),
    /// Export a chain (or a filtered subset) as a package
    Export(ExportArgs),
    /// Verify an export package offline
    CheckExport(CheckExportArgs),
    /// Generate an Ed25519 key for signing packages
    Keygen(KeygenArgs),
    /// Compare persisted segments with the loaded chains
    Fsck(FsckArgs),
}

#[derive(Args)]
pub struct AppendArgs {
    pub scope: String,
    /// JSON object, e.g. '{"event":"A"}'
    pub payload: String,
}

#[derive(Args)]
pub struct ScopeArgs {
    pub scope: String,
}

#[derive(Args)]
pub struct ShowArgs {
    pub scope: String,
    pub sequence: u64,
}

#[derive(Args)]
pub struct ListArgs {
    pub scope: String,
    #[arg(long, default_value = "0")]
    pub from: u64,
    /// Inclusive; defaults to the tail
    #[arg(long)]
    pub to: Option<u64>,
}

#[derive(Args)]
pub struct ScopesArgs {}

#[derive(Args)]
pub struct VerifyArgs {
    /// Omit to verify every chain
    pub scope: Option<String>,
}

#[derive(Args)]
pub struct ProofArgs {
    pub scope: String,
    pub sequence: u64,
    /// Write the proof JSON here instead of stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args)]
pub struct VerifyProofArgs {
    /// Proof JSON file
    pub proof: PathBuf,
    /// Expected Merkle root (64 lowercase hex)
    pub root: String,
}

#[derive(Args)]
pub struct ExportArgs {
    pub scope: String,
    /// Only entries whose payload has this field...
    #[arg(long, requires = "value")]
    pub field: Option<String>,
    /// ...equal to this value (parsed as JSON, else taken as a string)
    #[arg(long, requires = "field")]
    pub value: Option<String>,
    #[arg(long)]
    pub from: Option<u64>,
    #[arg(long)]
    pub to: Option<u64>,
    /// Hex secret key file from `tel keygen`
    #[arg(long)]
    pub sign_key: Option<PathBuf>,
    #[arg(short, long)]
    pub out: PathBuf,
}

#[derive(Args)]
pub struct CheckExportArgs {
    pub file: PathBuf,
}

#[derive(Args)]
pub struct KeygenArgs {
    #[arg(short, long)]
    pub out: PathBuf,
}

#[derive(Args)]
pub struct FsckArgs {
    /// Truncate torn tails left by interrupted writes before checking
    #[arg(long)]
    pub repair: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_append() {
        let cli = Cli::try_parse_from(["tel", "append", "org-1", r#"{"event":"A"}"#]).unwrap();
        let Command::Append(args) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(args.scope, "org-1");
        assert_eq!(args.payload, r#"{"event":"A"}"#);
    }

    #[test]
    fn parse_list_range() {
        let cli = Cli::try_parse_from(["tel", "list", "org-1", "--from", "2", "--to", "5"]).unwrap();
        let Command::List(args) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(args.from, 2);
        assert_eq!(args.to, Some(5));
    }

    #[test]
    fn parse_list_defaults() {
        let cli = Cli::try_parse_from(["tel", "list", "org-1"]).unwrap();
        let Command::List(args) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(args.from, 0);
        assert!(args.to.is_none());
    }

    #[test]
    fn parse_verify_all() {
        let cli = Cli::try_parse_from(["tel", "verify"]).unwrap();
        let Command::Verify(args) = cli.command else {
            panic!("wrong command");
        };
        assert!(args.scope.is_none());
    }

    #[test]
    fn parse_proof() {
        let cli = Cli::try_parse_from(["tel", "proof", "org-1", "3", "-o", "p.json"]).unwrap();
        let Command::Proof(args) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(args.sequence, 3);
        assert_eq!(args.out, Some(PathBuf::from("p.json")));
    }

    #[test]
    fn parse_verify_proof() {
        let cli = Cli::try_parse_from(["tel", "verify-proof", "p.json", "ab"]).unwrap();
        assert!(matches!(cli.command, Command::VerifyProof(_)));
    }

    #[test]
    fn parse_export_with_field() {
        let cli = Cli::try_parse_from([
            "tel", "export", "org-1", "--field", "control_id", "--value", "CC1", "--out", "x.json",
        ])
        .unwrap();
        let Command::Export(args) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(args.field.as_deref(), Some("control_id"));
        assert_eq!(args.value.as_deref(), Some("CC1"));
        assert_eq!(args.out, PathBuf::from("x.json"));
    }

    #[test]
    fn export_field_requires_value() {
        assert!(Cli::try_parse_from(["tel", "export", "org-1", "--field", "k", "--out", "x"]).is_err());
    }

    #[test]
    fn export_requires_out() {
        assert!(Cli::try_parse_from(["tel", "export", "org-1"]).is_err());
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from([
            "tel", "--verbose", "--format", "json", "--data-dir", "/tmp/l", "scopes",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.format, OutputFormat::Json));
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/l")));
        assert!(matches!(cli.command, Command::Scopes(_)));
    }

    #[test]
    fn parse_fsck_with_config() {
        let cli = Cli::try_parse_from(["tel", "fsck", "--config", "tel.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("tel.toml")));
        let Command::Fsck(args) = cli.command else {
            panic!("wrong command");
        };
        assert!(!args.repair);
    }

    #[test]
    fn parse_fsck_repair() {
        let cli = Cli::try_parse_from(["tel", "fsck", "--repair"]).unwrap();
        let Command::Fsck(args) = cli.command else {
            panic!("wrong command");
        };
        assert!(args.repair);
    }
}
