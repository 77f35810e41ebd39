//! mptf cli interface

use clap::{Args, Parser, Subcommand, ValueEnum};
use mptf::config::VarBinding;
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; mptf ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the transforms that would be applied
    Plan(TransformCommand),

    /// Apply transforms
    ///
    /// Every target directory is backed up first. When any transform fails all
    /// directories are restored.
    #[command(alias = "apply")]
    Transform(TransformCommand),

    /// Evaluate expressions interactively
    ///
    /// Reads one expression per line from stdin. `quit` or `exit` leaves.
    Debug(DebugCommand),

    /// Restore backups left behind by an interrupted transform
    Reset(TargetArgs),

    /// Discard backups, removing files created since they were taken
    CleanBackup(TargetArgs),
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Terraform root module
    #[arg(long = "tf-dir", default_value = ".")]
    pub tf_dir: PathBuf,

    /// Include every module listed in .terraform/modules/modules.json
    #[arg(short = 'r', long = "recursive")]
    pub recursive: bool,
}

#[derive(Args, Debug)]
pub struct VarArgs {
    /// Set a variable (name=value)
    ///
    /// The value is read as an HCL expression, falling back to a plain string.
    #[arg(long = "var")]
    pub vars: Vec<VarBinding>,

    /// Load variables from an HCL file
    #[arg(long = "var-file")]
    pub var_files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TransformCommand {
    #[clap(flatten)]
    pub target: TargetArgs,

    /// Directory with *.mptf.hcl files
    ///
    /// Can be specified multiple times, directories are processed in order.
    #[arg(long = "mptf-dir", required = true)]
    pub mptf_dirs: Vec<PathBuf>,

    #[clap(flatten)]
    pub vars: VarArgs,
}

#[derive(Args, Debug)]
pub struct DebugCommand {
    /// Terraform module
    #[arg(long = "tf-dir", default_value = ".")]
    pub tf_dir: PathBuf,

    /// Directory with *.mptf.hcl files
    #[arg(long = "mptf-dir")]
    pub mptf_dir: PathBuf,

    #[clap(flatten)]
    pub vars: VarArgs,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}
