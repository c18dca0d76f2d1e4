use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dockaudit::analysis::Language;
use dockaudit::config::{Config, ToolOverrides};
use dockaudit::dynamic::FuzzRequest;
use dockaudit::error::{AuditError, Result};
use dockaudit::exec::SystemRunner;
use dockaudit::monitor::{LogTailer, Observer};
use dockaudit::report;
use dockaudit::scanner::trivy::{self, Passthrough};
use dockaudit::scanner::{TrivyMode, TrivyTableExtractor};
use dockaudit::{ContainerAuditOptions, ImageAuditOptions};

#[derive(Parser)]
#[command(
    name = "dockaudit",
    about = "Security auditing for container images and running containers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(long, short = 'c', global = true, default_value = ".dockaudit.toml")]
    config: PathBuf,

    /// Verbose output (debug logging unless RUST_LOG is set)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit an image: CIS baseline, vulnerability scan and code analysis
    Static {
        /// Complete name of the image (e.g. nginx:latest)
        #[arg(long)]
        image: String,

        /// Application language (python, java)
        #[arg(long)]
        lang: String,

        /// Source directory inside the image; read from the image metadata if omitted
        #[arg(long)]
        workdir: Option<String>,

        /// Reports are written to this folder
        #[arg(long, default_value = "reports")]
        outfolder: PathBuf,

        /// Comma-separated absolute paths to leave out of the code analysis
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,

        /// Scanner detection priority (precise, comprehensive)
        #[arg(long, default_value = "precise")]
        trivy_mode: String,

        /// Folder containing spotbugs.jar
        #[arg(long, env = "SPOTBUGS_PATH")]
        spotbugs_path: Option<PathBuf>,

        /// Folder containing docker-bench-security.sh
        #[arg(long, env = "DOCKERBENCH_PATH")]
        docker_bench_path: Option<PathBuf>,

        /// The image only exists locally; skip pulling it
        #[arg(long)]
        local: bool,

        /// Delete the pulled image once the audit is done
        #[arg(long)]
        cleanup: bool,

        /// Keep files installed by the package manager in the code analysis
        #[arg(long)]
        include_pkg: bool,
    },

    /// Audit a running container, optionally fuzzing its REST API
    Dynamic {
        /// Name of the running container
        #[arg(long)]
        name: String,

        /// Reports are written to this folder
        #[arg(long, default_value = "report")]
        outfolder: PathBuf,

        /// Folder containing docker-bench-security.sh
        #[arg(long, env = "DOCKERBENCH_PATH")]
        docker_bench_path: Option<PathBuf>,

        /// Folder containing cats.jar
        #[arg(long, env = "CATS_PATH")]
        cats_path: Option<PathBuf>,

        /// OpenAPI specification of the API to fuzz
        #[arg(long)]
        apispec: Option<PathBuf>,

        /// Container port serving the API (required with --apispec)
        #[arg(long)]
        port: Option<u16>,

        /// Path prefix added in front of every path of the API document
        #[arg(long)]
        prefix: Option<String>,

        /// The API is served over https
        #[arg(long)]
        https: bool,
    },

    /// Follow the security-event log and probe ports opened by containers
    Observe {
        /// Event log to follow
        #[arg(long)]
        log: Option<PathBuf>,

        /// Folder receiving the probe reports
        #[arg(long)]
        outfolder: Option<PathBuf>,

        /// Number of concurrent probes
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Run the vulnerability scanner with arbitrary arguments
    Trivy {
        /// Arguments passed to the scanner
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },

    /// Generate a starter .dockaudit.toml config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config;
    let subcommand = cli.command.name();
    let result = match cli.command {
        Commands::Static {
            image,
            lang,
            workdir,
            outfolder,
            exclude,
            trivy_mode,
            spotbugs_path,
            docker_bench_path,
            local,
            cleanup,
            include_pkg,
        } => load_config(
            &config_path,
            ToolOverrides {
                docker_bench_dir: docker_bench_path,
                spotbugs_dir: spotbugs_path,
                cats_dir: None,
            },
        )
        .and_then(|config| {
            let language = Language::from_str_lenient(&lang).ok_or_else(|| {
                AuditError::Usage(format!(
                    "Language '{}' not supported (expected python or java)",
                    lang
                ))
            })?;
            let trivy_mode = TrivyMode::from_str_lenient(&trivy_mode).ok_or_else(|| {
                AuditError::Usage(format!(
                    "--trivy-mode must be 'precise' or 'comprehensive', got '{}'",
                    trivy_mode
                ))
            })?;
            let options = ImageAuditOptions {
                image,
                language,
                workdir,
                output_dir: outfolder,
                exclusions: exclude,
                trivy_mode,
                local,
                cleanup,
                include_system_packages: include_pkg,
            };
            cmd_static(&options, &config)
        }),
        Commands::Dynamic {
            name,
            outfolder,
            docker_bench_path,
            cats_path,
            apispec,
            port,
            prefix,
            https,
        } => load_config(
            &config_path,
            ToolOverrides {
                docker_bench_dir: docker_bench_path,
                spotbugs_dir: None,
                cats_dir: cats_path,
            },
        )
        .and_then(|config| {
            let options = ContainerAuditOptions {
                name,
                output_dir: outfolder,
                fuzz: FuzzRequest::from_args(apispec, port, prefix, https)?,
            };
            cmd_dynamic(&options, &config)
        }),
        Commands::Observe {
            log,
            outfolder,
            workers,
        } => load_config(&config_path, ToolOverrides::default()).and_then(|mut config| {
            if let Some(log) = log {
                config.observer.log_path = log;
            }
            if let Some(dir) = outfolder {
                config.observer.output_dir = dir;
            }
            if let Some(workers) = workers {
                config.observer.workers = workers.max(1);
            }
            cmd_observe(config)
        }),
        Commands::Trivy { args } => load_config(&config_path, ToolOverrides::default())
            .and_then(|config| cmd_trivy(&args, &config)),
        Commands::Init { force } => cmd_init(&config_path, force),
    };

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_usage() {
                if let Some(help) = usage_help(subcommand) {
                    eprintln!("\n{}", help);
                }
            }
            process::exit(e.exit_code());
        }
    }
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Static { .. } => "static",
            Self::Dynamic { .. } => "dynamic",
            Self::Observe { .. } => "observe",
            Self::Trivy { .. } => "trivy",
            Self::Init { .. } => "init",
        }
    }
}

/// Help text of a subcommand, shown after user-input errors.
fn usage_help(subcommand: &str) -> Option<String> {
    let mut cmd = Cli::command();
    cmd.build();
    cmd.find_subcommand_mut(subcommand)
        .map(|sub| sub.render_help().to_string())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: &std::path::Path, overrides: ToolOverrides) -> Result<Config> {
    let mut config = Config::load(path)?;
    config.apply_overrides(overrides);
    Ok(config)
}

fn cmd_static(options: &ImageAuditOptions, config: &Config) -> Result<i32> {
    let outcome = dockaudit::audit_image(options, config, &SystemRunner)?;
    print!("{}", report::console::render(&outcome.report));
    Ok(0)
}

fn cmd_dynamic(options: &ContainerAuditOptions, config: &Config) -> Result<i32> {
    let outcome = dockaudit::audit_container(options, config, &SystemRunner)?;
    if let Some(server) = &outcome.fuzzed_server {
        println!("Fuzzed API at {}", server);
    }
    println!("Reports generated at {}", outcome.output_dir.display());
    Ok(0)
}

fn cmd_observe(config: Config) -> Result<i32> {
    let tailer = LogTailer::open(&config.observer.log_path).map_err(|e| {
        AuditError::Usage(format!(
            "cannot follow {}: {}",
            config.observer.log_path.display(),
            e
        ))
    })?;
    let observer = Observer::new(config.observer, config.tools, Arc::new(SystemRunner));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(observer.run(tailer, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }));
    // In-flight probes are abandoned, not awaited.
    runtime.shutdown_background();

    let stats = result?;
    println!(
        "Observed {} events ({} malformed lines dropped)",
        stats.events, stats.malformed
    );
    Ok(0)
}

fn cmd_trivy(args: &[String], config: &Config) -> Result<i32> {
    match trivy::passthrough(&SystemRunner, &config.tools, &TrivyTableExtractor, args)? {
        Passthrough::Usage { stdout, stderr } => {
            print!("{}", stdout);
            eprint!("{}", stderr);
            Ok(2)
        }
        Passthrough::Scanned { summary, console } => {
            match &summary.detected_os {
                Some(os) => println!("Detected OS: {}", os),
                None => println!("Detected OS: unsupported"),
            }
            println!("Language-specific files: {}", summary.language_files);
            print!("{}", console);
            Ok(0)
        }
    }
}

fn cmd_init(path: &std::path::Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        eprintln!("{} already exists. Use --force to overwrite.", path.display());
        return Ok(1);
    }

    std::fs::write(path, Config::starter_toml())?;
    println!("Created {}", path.display());

    Ok(0)
}
