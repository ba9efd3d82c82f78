use clap::Parser;
use std::{path::PathBuf, process::ExitCode};
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod dex;
pub mod error;
pub mod linker;
pub mod types;
pub mod utils;
pub mod value;
pub mod vm;

use config::LinkerConfig;
use dex::{builder::DexFileBuilder, DexFile};
use error::LinkError;
use linker::{loader::ClassLoader, ClassLinker};
use utils::sync::Arc;

/// Options shared by every binary that builds a linker.
#[derive(clap::Args, Debug)]
pub struct LinkerArgs {
    /// Compiled unit (JSON) to put on the boot class path; repeatable
    #[arg(long, value_name = "JSON")]
    pub boot: Vec<PathBuf>,
    /// Compiled unit (JSON) for an application path loader; repeatable
    #[arg(long, value_name = "JSON")]
    pub app: Vec<PathBuf>,
    /// Prepend the built-in core library to the boot class path
    #[arg(long)]
    pub core: bool,
    /// Linker settings (JSON); environment overrides still apply
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,
}

impl LinkerArgs {
    pub fn linker_config(&self) -> Result<LinkerConfig, String> {
        match &self.config {
            None => Ok(LinkerConfig::from_env()),
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
                serde_json::from_str::<LinkerConfig>(&text)
                    .map(LinkerConfig::with_env_overrides)
                    .map_err(|e| format!("Invalid config {}: {}", path.display(), e))
            }
        }
    }

    /// Builds the linker and the loader descriptors are looked up from: the
    /// application loader when `--app` was given, the boot loader otherwise.
    pub fn build(&self) -> Result<(ClassLinker, Arc<ClassLoader>), String> {
        let mut boot_class_path = vec![];
        if self.core {
            boot_class_path.push(DexFileBuilder::new("core.dex").with_core_library().build_arc());
        }
        for path in &self.boot {
            boot_class_path.push(DexFile::from_json_path(path).map_err(|e| e.to_string())?);
        }
        let app = self
            .app
            .iter()
            .map(DexFile::from_json_path)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;

        let linker = ClassLinker::builder(boot_class_path)
            .config(self.linker_config()?)
            .build();
        let loader = if app.is_empty() {
            Arc::clone(linker.boot_loader())
        } else {
            linker.create_path_class_loader(app)
        };
        Ok((linker, loader))
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Link (and optionally initialize) types from compiled units"
)]
pub struct Args {
    #[command(flatten)]
    pub linker: LinkerArgs,
    /// Run static initializers after linking
    #[arg(long)]
    pub init: bool,
    /// Print the linker counters as JSON when done
    #[arg(long)]
    pub metrics: bool,
    /// Type descriptors to link, e.g. Ljava/lang/String;
    #[arg(value_name = "DESCRIPTOR", required = true)]
    pub descriptors: Vec<String>,
}

/// Installs the stderr log subscriber. `RUST_LOG` selects the filter,
/// `warn` when unset.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    debug!("tracing initialized");
}

/// Prints a failure the way a runtime would report the managed error.
pub fn report_error(descriptor: &str, error: &LinkError) {
    eprintln!("{}: {}: {}", descriptor, error.managed_class(), error);
    let mut cause = std::error::Error::source(error);
    while let Some(inner) = cause {
        eprintln!("  caused by: {}", inner);
        cause = inner.source();
    }
}

pub fn run_cli() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    let (linker, loader) = match args.linker.build() {
        Ok(built) => built,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };

    let mut failed = false;
    for descriptor in &args.descriptors {
        let result = linker.find_class(descriptor, &loader).and_then(|class| {
            if args.init {
                linker.ensure_initialized(&class, true, true)?;
            }
            Ok(class)
        });
        match result {
            Ok(class) => println!("{} {}", class.descriptor(), class.status()),
            Err(error) => {
                report_error(descriptor, &error);
                failed = true;
            }
        }
    }
    if args.init {
        linker.make_initialized_classes_visibly_initialized(true);
    }

    if args.metrics {
        match serde_json::to_string_pretty(&linker.metrics().snapshot()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize metrics: {}", e),
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
