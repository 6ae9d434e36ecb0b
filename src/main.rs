use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use wxrescue::archive::{self, OpenOptions, Package, PackageError, RunOptions, SourceKind};
use wxrescue::crypto;
use wxrescue::logging::init_tracing;
use wxrescue::recovery::reference::{load_references, Reference};
use wxrescue::recovery::RecoveryOptions;
use wxrescue::report::{render_index, RunReport};

/// Exit status when every input ran but some result is incomplete: an
/// unverified rebuild, unexplained index bytes or a failed write.
const EXIT_INCOMPLETE: u8 = 2;

#[derive(Parser)]
#[command(name = "wxrescue", version, about = "Recover and rebuild the index of .wxapkg packages")]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// App id whose key material decrypts the package head
    #[arg(long, conflicts_with = "plain")]
    app_id: Option<String>,
    /// Input is an already decrypted container
    #[arg(long)]
    plain: bool,
    /// Body mask byte in hex, e.g. 66 or 0x66
    #[arg(long, value_parser = parse_hex_byte)]
    xor_key: Option<u8>,
}

impl SourceArgs {
    fn open_options(&self) -> OpenOptions {
        let source = match (&self.app_id, self.plain) {
            (_, true)       => SourceKind::Plain,
            (Some(_), _)    => SourceKind::Encrypted,
            (None, false)   => SourceKind::Raw,
        };
        OpenOptions { source, app_id: self.app_id.clone(), xor_key: self.xor_key, ..Default::default() }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt an on-disk package into a plain container
    Decrypt {
        input: PathBuf,
        #[arg(long)]
        app_id: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List the index a package declares, without recovery
    Inspect {
        input: PathBuf,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Recover unindexed files, rebuild the index and export everything
    Recover {
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Output root (default: next to each input, as <name>.restored)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Directory of known files to match verbatim
        #[arg(long)]
        references: Option<PathBuf>,
        #[command(flatten)]
        source: SourceArgs,
        /// Skip image carving
        #[arg(long)]
        no_images: bool,
        /// Drop recovered spans that start inside an earlier claim
        #[arg(long)]
        reject_overlaps: bool,
        /// Skip the missing-index audit and its placeholder entry
        #[arg(long)]
        no_audit: bool,
        /// Analyse only, write nothing
        #[arg(long)]
        dry_run: bool,
        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {

        // ── Decrypt ──────────────────────────────────────────────────────────
        Commands::Decrypt { input, app_id, output } => {
            let raw = std::fs::read(&input)?;
            let pkg = crypto::decrypt_package(&raw, &app_id)?;
            std::fs::write(&output, &pkg.plain)?;
            println!("Decrypted {} → {} ({} B)", input.display(), output.display(), pkg.plain.len());
            Ok(ExitCode::SUCCESS)
        }

        // ── Inspect ──────────────────────────────────────────────────────────
        Commands::Inspect { input, source } => {
            let pkg = Package::open(&input, &source.open_options())?;
            println!("Package: {}", input.display());
            print!("{}", render_index(pkg.index()));
            Ok(ExitCode::SUCCESS)
        }

        // ── Recover ──────────────────────────────────────────────────────────
        Commands::Recover {
            input, output, references, source, no_images, reject_overlaps, no_audit, dry_run, json,
        } => {
            let refs: Vec<Reference> = match &references {
                Some(dir) => load_references(dir)?,
                None      => Vec::new(),
            };
            let recovery = RecoveryOptions {
                images: !no_images,
                reject_overlaps,
                audit: !no_audit,
                ..Default::default()
            };
            let open = source.open_options();
            let jobs: Vec<(PathBuf, RunOptions)> = input
                .iter()
                .map(|path| {
                    let out = (!dry_run).then(|| output_dir(output.as_deref(), path, input.len() > 1));
                    let opts = RunOptions { open: open.clone(), recovery: recovery.clone(), output: out };
                    (path.clone(), opts)
                })
                .collect();

            let results = run_all(&jobs, &refs);
            let mut reports = Vec::new();
            let mut failed = false;
            for (path, result) in results {
                match result {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        eprintln!("{}: {e}", path.display());
                        failed = true;
                    }
                }
            }

            if json {
                match reports.as_slice() {
                    [single] => println!("{}", single.to_json()?),
                    many     => println!("{}", serde_json::to_string_pretty(many)?),
                }
            } else {
                for r in &reports {
                    print!("{r}");
                }
            }

            let incomplete = reports.iter().any(|r| !r.is_clean());
            Ok(if failed {
                ExitCode::FAILURE
            } else if incomplete {
                ExitCode::from(EXIT_INCOMPLETE)
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

#[cfg(feature = "parallel")]
fn run_all(jobs: &[(PathBuf, RunOptions)], refs: &[Reference]) -> Vec<(PathBuf, Result<RunReport, PackageError>)> {
    use rayon::prelude::*;
    jobs.par_iter()
        .map(|(path, opts)| (path.clone(), archive::run(path, refs, opts)))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn run_all(jobs: &[(PathBuf, RunOptions)], refs: &[Reference]) -> Vec<(PathBuf, Result<RunReport, PackageError>)> {
    jobs.iter()
        .map(|(path, opts)| (path.clone(), archive::run(path, refs, opts)))
        .collect()
}

/// `<root>` for a single input with an explicit root, otherwise
/// `<root or input dir>/<input stem>.restored`.
fn output_dir(root: Option<&Path>, input: &Path, many: bool) -> PathBuf {
    if let (Some(root), false) = (root, many) {
        return root.to_owned();
    }
    let base = root
        .map(Path::to_owned)
        .or_else(|| input.parent().map(Path::to_owned))
        .unwrap_or_default();
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "package".into());
    base.join(format!("{stem}.restored"))
}

fn parse_hex_byte(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid hex byte '{s}': {e}"))
}
