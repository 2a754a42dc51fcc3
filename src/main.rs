use clap::{Args, Parser, Subcommand};
use ebzip::archive::{write_report, BookFile, BookFormat, FsOpener, ZipOptions};
use ebzip::batch::{run_batch, Action, BatchSummary, Job, Outcome};
use ebzip::index::{DEFAULT_LEVEL, MAX_LEVEL};
use ebzip::legacy::fix_legacy_index;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "ebzip", version, about = "Compress/Decompress EPWING data (.ebz)")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Suppress progress and result messages
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Print the per-file summary as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Compression level (0..=5); slice size is 2048 << level
    #[arg(short, long, default_value_t = DEFAULT_LEVEL,
          value_parser = clap::value_parser!(u8).range(0..=MAX_LEVEL as i64))]
    level: u8,
    /// Overwrite output files
    #[arg(long)]
    overwrite: bool,
    /// Keep (don't delete) original files
    #[arg(short, long)]
    keep: bool,
    /// Output files under DIRECTORY
    #[arg(short = 'o', long = "output-directory", default_value = ".")]
    output_dir: PathBuf,
    /// Book root the inputs are relative to
    #[arg(short = 'b', long = "book-directory", default_value = ".")]
    book_dir: PathBuf,
    /// Copy these inputs verbatim instead of compressing them
    #[arg(long = "copy-only")]
    copy_only: Vec<PathBuf>,
    #[arg(required = true, num_args = 1..)]
    files: Vec<PathBuf>,
}

impl RunArgs {
    fn options(&self) -> ZipOptions {
        ZipOptions {
            level:     self.level,
            overwrite: self.overwrite,
            keep:      self.keep,
            out_dir:   self.output_dir.clone(),
            book_dir:  self.book_dir.clone(),
        }
    }

    fn jobs(&self, action: Action) -> Vec<Job> {
        self.files
            .iter()
            .map(|path| {
                let file = BookFile::new(path.clone(), BookFormat::from_path(path));
                let action = if action == Action::Compress && self.copy_only.contains(path) {
                    Action::Copy
                } else {
                    action
                };
                Job::new(file, action)
            })
            .collect()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compress files into .ebz containers
    Compress(RunArgs),
    /// Uncompress .ebz containers (plain files are copied)
    Uncompress(RunArgs),
    /// List information of compressed files
    Info {
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,
    },
    /// Strip S-EBXA index records from already-uncompressed files
    Fix {
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.quiet { "warn" } else { "info" }));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let summary = match &cli.command {
        Commands::Compress(args) => {
            run_batch(&args.jobs(Action::Compress), &args.options(), &FsOpener)
        }
        Commands::Uncompress(args) => {
            run_batch(&args.jobs(Action::Uncompress), &args.options(), &FsOpener)
        }
        Commands::Info { files } => {
            let jobs: Vec<Job> = files
                .iter()
                .map(|p| Job::new(BookFile::new(p.clone(), BookFormat::from_path(p)), Action::Info))
                .collect();
            let summary = run_batch(&jobs, &ZipOptions::default(), &FsOpener);
            if !cli.json {
                print_reports(&summary)?;
            }
            summary
        }
        Commands::Fix { files } => {
            let mut failed = 0;
            for path in files {
                if let Err(e) = fix_legacy_index(path) {
                    tracing::error!(path = %path.display(), "{e}");
                    failed += 1;
                }
            }
            if failed > 0 {
                std::process::exit(2);
            }
            return Ok(());
        }
    };

    if cli.json {
        println!("{}", summary.to_json()?);
    }
    if !summary.is_success() {
        std::process::exit(2);
    }
    Ok(())
}

fn print_reports(summary: &BatchSummary) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for r in &summary.results {
        if let Outcome::Reported { report } = &r.outcome {
            write_report(&mut out, &r.path, report)?;
        }
    }
    Ok(())
}
