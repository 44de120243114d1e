use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use tel_crypto::SigningKey;
use tel_ledger::{
    verify_proof, CancelToken, ChainStore, ChainVerifier, ExportFilter, ExportPackage, Exporter,
    LedgerConfig, LedgerEntry, LedgerReader, LedgerWriter, MerkleBuilder, MerkleProof,
    PackageReport, VerificationReport, WalBackend,
};
use tel_types::{payload_from, ChainScope, Digest};

use crate::cli::*;

const DEFAULT_DATA_DIR: &str = ".tel";

struct Session {
    format: OutputFormat,
    data_dir: PathBuf,
    config: LedgerConfig,
}

impl Session {
    fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let config = match &cli.config {
            Some(path) => LedgerConfig::load(path)?,
            None => LedgerConfig::default(),
        };
        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| config.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        Ok(Self {
            format: cli.format.clone(),
            data_dir,
            config,
        })
    }

    fn open_store(&self) -> anyhow::Result<ChainStore<WalBackend>> {
        ChainStore::open(&self.data_dir, &self.config)
            .with_context(|| format!("opening ledger at {}", self.data_dir.display()))
    }

    /// Print `value` as JSON, or run `text` for human output.
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce()) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => text(),
        }
        Ok(())
    }
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let ctx = Session::from_cli(&cli)?;
    match cli.command {
        Command::Append(args) => cmd_append(&ctx, args).await,
        Command::Tail(args) => cmd_tail(&ctx, args),
        Command::Show(args) => cmd_show(&ctx, args),
        Command::List(args) => cmd_list(&ctx, args),
        Command::Scopes(_) => cmd_scopes(&ctx),
        Command::Verify(args) => cmd_verify(&ctx, args),
        Command::Root(args) => cmd_root(&ctx, args),
        Command::Proof(args) => cmd_proof(&ctx, args),
        Command::VerifyProof(args) => cmd_verify_proof(&ctx, args),
        Command::Export(args) => cmd_export(&ctx, args),
        Command::CheckExport(args) => cmd_check_export(&ctx, args),
        Command::Keygen(args) => cmd_keygen(&ctx, args),
        Command::Fsck(args) => cmd_fsck(&ctx, args).await,
    }
}

fn scope(name: &str) -> anyhow::Result<ChainScope> {
    ChainScope::new(name).with_context(|| format!("invalid scope {name:?}"))
}

fn print_entry(entry: &LedgerEntry) {
    println!(
        "{}  {}  {}",
        format!("#{}", entry.sequence).yellow().bold(),
        entry.entry_hash.short_hex().dimmed(),
        entry.created_at.to_rfc3339().dimmed()
    );
    println!("  prev:    {}", entry.previous_hash);
    println!("  hash:    {}", entry.entry_hash);
    println!("  payload: {}", serde_json::Value::Object(entry.payload.clone()));
}

async fn cmd_append(ctx: &Session, args: AppendArgs) -> anyhow::Result<()> {
    let scope = scope(&args.scope)?;
    let value: serde_json::Value =
        serde_json::from_str(&args.payload).context("payload is not valid JSON")?;
    let payload = payload_from(&value)?;
    let store = ctx.open_store()?;
    let entry = store.append(&scope, payload).await?;
    ctx.emit(&entry, || {
        println!("{} Appended to {}", "✓".green().bold(), scope.as_str().cyan());
        print_entry(&entry);
    })
}

fn cmd_tail(ctx: &Session, args: ScopeArgs) -> anyhow::Result<()> {
    let scope = scope(&args.scope)?;
    let tail = ctx.open_store()?.get_tail(&scope)?;
    ctx.emit(&tail, || match &tail {
        Some(entry) => print_entry(entry),
        None => println!("Chain {} is empty.", scope.as_str().cyan()),
    })
}

fn cmd_show(ctx: &Session, args: ShowArgs) -> anyhow::Result<()> {
    let entry = ctx.open_store()?.get_entry(&scope(&args.scope)?, args.sequence)?;
    ctx.emit(&entry, || print_entry(&entry))
}

fn cmd_list(ctx: &Session, args: ListArgs) -> anyhow::Result<()> {
    let entries = ctx.open_store()?.list_entries(
        &scope(&args.scope)?,
        args.from,
        args.to.unwrap_or(u64::MAX),
    )?;
    ctx.emit(&entries, || {
        for entry in &entries {
            println!("{}", entry.summary());
        }
    })
}

fn cmd_scopes(ctx: &Session) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let scopes = store.scopes()?;
    let counts: Vec<(String, u64)> = scopes
        .iter()
        .map(|s| Ok((s.to_string(), store.entry_count(s)?)))
        .collect::<Result<_, tel_ledger::LedgerError>>()?;
    ctx.emit(&counts, || {
        if counts.is_empty() {
            println!("No chains.");
        }
        for (name, count) in &counts {
            println!("{}  {} entries", name.cyan(), count);
        }
    })
}

fn print_report(report: &VerificationReport) {
    if report.is_valid {
        println!(
            "{} {}: {} entries, chain intact",
            "✓".green().bold(),
            report.chain_scope.as_str().cyan(),
            report.entries_checked
        );
    } else {
        println!(
            "{} {}: {} of {} entries broken",
            "✗".red().bold(),
            report.chain_scope.as_str().cyan(),
            report.broken_sequences().len(),
            report.entries_checked
        );
        for broken in &report.broken_entries {
            println!("  #{} {}", broken.sequence, broken.reason.as_str().red());
        }
    }
}

fn cmd_verify(ctx: &Session, args: VerifyArgs) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let reports = match &args.scope {
        Some(name) => vec![ChainVerifier::verify_chain(&store, &scope(name)?)?],
        None => ChainVerifier::verify_all(&store, &CancelToken::new())?,
    };
    ctx.emit(&reports, || {
        if reports.is_empty() {
            println!("No chains to verify.");
        }
        reports.iter().for_each(print_report);
    })?;

    let broken = reports.iter().filter(|r| !r.is_valid).count();
    if broken > 0 {
        bail!("{broken} chain(s) failed verification");
    }
    Ok(())
}

fn cmd_root(ctx: &Session, args: ScopeArgs) -> anyhow::Result<()> {
    let root = MerkleBuilder::build_root(&ctx.open_store()?, &scope(&args.scope)?)?;
    ctx.emit(&root, || println!("{root}"))
}

fn cmd_proof(ctx: &Session, args: ProofArgs) -> anyhow::Result<()> {
    let proof = MerkleBuilder::build_proof(&ctx.open_store()?, &scope(&args.scope)?, args.sequence)?;
    match &args.out {
        Some(path) => {
            write_json(path, &proof)?;
            println!(
                "{} Proof for #{} ({} steps) written to {}",
                "✓".green().bold(),
                proof.target_sequence,
                proof.sibling_path.len(),
                path.display()
            );
            Ok(())
        }
        None => {
            println!("{}", serde_json::to_string_pretty(&proof)?);
            Ok(())
        }
    }
}

fn cmd_verify_proof(ctx: &Session, args: VerifyProofArgs) -> anyhow::Result<()> {
    let proof: MerkleProof = read_json(&args.proof)?;
    let root = Digest::from_hex(args.root.trim()).context("root must be 64 lowercase hex characters")?;
    let valid = verify_proof(&proof, &root);
    ctx.emit(&serde_json::json!({ "valid": valid }), || {
        if valid {
            println!("{} Entry #{} is included under {}", "✓".green().bold(), proof.target_sequence, root.short_hex());
        } else {
            println!("{} Proof does not reproduce {}", "✗".red().bold(), root.short_hex());
        }
    })?;
    if !valid {
        bail!("inclusion proof is invalid");
    }
    Ok(())
}

fn parse_filter(args: &ExportArgs) -> ExportFilter {
    let mut filters = Vec::new();
    if let (Some(field), Some(raw)) = (&args.field, &args.value) {
        let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
        filters.push(ExportFilter::PayloadField { field: field.clone(), value });
    }
    if args.from.is_some() || args.to.is_some() {
        filters.push(ExportFilter::SequenceRange {
            from: args.from.unwrap_or(0),
            to: args.to.unwrap_or(u64::MAX),
        });
    }
    match filters.len() {
        0 => ExportFilter::All,
        1 => filters.remove(0),
        _ => ExportFilter::custom(move |entry| filters.iter().all(|f| f.matches(entry))),
    }
}

fn cmd_export(ctx: &Session, args: ExportArgs) -> anyhow::Result<()> {
    let scope = scope(&args.scope)?;
    if let (Some(from), Some(to)) = (args.from, args.to) {
        if from > to {
            bail!("--from {from} is after --to {to}");
        }
    }
    let filter = parse_filter(&args);
    let mut package = Exporter::export(&ctx.open_store()?, &scope, &filter)?;
    if let Some(key_path) = &args.sign_key {
        let secret = std::fs::read_to_string(key_path)
            .with_context(|| format!("reading {}", key_path.display()))?;
        package.sign(&SigningKey::from_hex(&secret)?);
    }
    package.write_to(&args.out)?;

    ctx.emit(&package, || {
        println!(
            "{} Exported {} entries of {} to {}",
            "✓".green().bold(),
            package.entry_count(),
            scope.as_str().cyan(),
            args.out.display()
        );
        println!("  package: {}", package.package_id);
        println!("  hash:    {}", package.package_hash);
        println!("  root:    {}", package.merkle_root);
        if package.seal.is_some() {
            println!("  signed:  {}", "yes".green());
        }
    })
}

fn print_package_report(report: &PackageReport) {
    let mark = |ok: bool| if ok { "ok".green() } else { "FAILED".red().bold() };
    println!("Package {}", report.package_id.to_string().yellow());
    println!("  format:       {}", mark(report.format_supported));
    println!("  entries:      {} ({} checked)", mark(report.entries.is_valid), report.entries.entries_checked);
    for broken in &report.entries.broken_entries {
        println!("    #{} {}", broken.sequence, broken.reason.as_str().red());
    }
    println!("  package hash: {}", mark(report.package_hash_valid));
    println!("  merkle root:  {}", mark(report.merkle_root_valid));
    match report.signature_valid {
        Some(ok) => println!("  signature:    {}", mark(ok)),
        None => println!("  signature:    {}", "unsigned".dimmed()),
    }
    if report.is_valid {
        println!("{} Package verified", "✓".green().bold());
    } else {
        println!("{} Package failed verification", "✗".red().bold());
    }
}

fn cmd_check_export(ctx: &Session, args: CheckExportArgs) -> anyhow::Result<()> {
    let package = ExportPackage::read_from(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let report = package.verify()?;
    ctx.emit(&report, || print_package_report(&report))?;
    if !report.is_valid {
        bail!("export package failed verification");
    }
    Ok(())
}

fn cmd_keygen(ctx: &Session, args: KeygenArgs) -> anyhow::Result<()> {
    if args.out.exists() {
        bail!("{} already exists", args.out.display());
    }
    let key = SigningKey::generate();
    std::fs::write(&args.out, key.to_hex())?;
    let public = key.verifying_key();
    ctx.emit(&serde_json::json!({ "public_key": public }), || {
        println!("{} Secret key written to {}", "✓".green().bold(), args.out.display());
        println!("  public key: {}", public.to_hex());
    })
}

async fn cmd_fsck(ctx: &Session, args: FsckArgs) -> anyhow::Result<()> {
    if args.repair {
        let repaired = WalBackend::new(&ctx.data_dir, ctx.config.wal.clone())?.repair()?;
        if matches!(ctx.format, OutputFormat::Text) {
            for segment in &repaired {
                println!(
                    "{} {}: dropped {} torn bytes, kept {} entries",
                    "!".yellow().bold(),
                    segment.scope.as_str().cyan(),
                    segment.bytes_dropped,
                    segment.entries_kept
                );
            }
        }
    }
    let report = ctx.open_store()?.fsck().await?;
    ctx.emit(&report, || {
        println!(
            "{} {} chains, {} entries match their segments",
            "✓".green().bold(),
            report.scopes_checked,
            report.entries_checked
        );
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    std::fs::write(path, serde_json::to_vec_pretty(value)?)
        .with_context(|| format!("writing {}", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}
