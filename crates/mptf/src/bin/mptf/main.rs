mod cli;

use mptf::backup;
use mptf::config::{Config, VarBindings};
use mptf::fs::{absolute, FileSystem, OsFs};
use mptf::module::{Module, ModuleRef};
use mptf::mptf_documents::MptfDocuments;
use mptf::plan::Plan;
use mptf::value::Value;
use rustyline::error::ReadlineError;
use std::path::Path;
use std::sync::Arc;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("MPTF_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let fs: Arc<dyn FileSystem> = Arc::new(OsFs);
    let command_result = match cli.command {
        cli::Command::Plan(command) => plan(fs, command),
        cli::Command::Transform(command) => transform(fs, command),
        cli::Command::Debug(command) => debug(fs, command),
        cli::Command::Reset(target) => reset(fs, target),
        cli::Command::CleanBackup(target) => clean_backup(fs, target),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

fn targets(fs: &dyn FileSystem, target: &cli::TargetArgs) -> anyhow::Result<Vec<ModuleRef>> {
    if target.recursive {
        return Ok(mptf::resolver::module_refs(fs, &target.tf_dir)?);
    }

    Ok(vec![ModuleRef::root(
        &target.tf_dir,
        absolute(&target.tf_dir)?,
    )])
}

fn var_bindings(fs: &dyn FileSystem, vars: &cli::VarArgs) -> anyhow::Result<VarBindings> {
    let mut bindings = VarBindings::default();
    for var_file in &vars.var_files {
        bindings.load_file(fs, var_file)?;
    }
    for binding in &vars.vars {
        bindings.insert(binding.clone());
    }
    Ok(bindings)
}

fn load_documents(fs: &dyn FileSystem, dir: &Path) -> anyhow::Result<Arc<MptfDocuments>> {
    let mut documents = MptfDocuments::default();
    documents.load_directory(fs, dir)?;
    Ok(Arc::new(documents))
}

fn load_config(
    fs: &Arc<dyn FileSystem>,
    module_ref: &ModuleRef,
    documents: &Arc<MptfDocuments>,
    bindings: &VarBindings,
) -> anyhow::Result<Config> {
    let module = Module::load(fs.clone(), module_ref)?;
    Ok(Config::new(module, documents.clone(), bindings)?)
}

fn print_plan(module_ref: &ModuleRef, plan: &Plan) {
    println!("# {}", module_ref.dir.display());
    print!("{plan}");
}

pub fn plan(fs: Arc<dyn FileSystem>, command: cli::TransformCommand) -> anyhow::Result<()> {
    let module_refs = targets(fs.as_ref(), &command.target)?;
    let bindings = var_bindings(fs.as_ref(), &command.vars)?;

    for mptf_dir in &command.mptf_dirs {
        let documents = load_documents(fs.as_ref(), mptf_dir)?;
        for module_ref in &module_refs {
            let config = load_config(&fs, module_ref, &documents, &bindings)?;
            let plan = Plan::compute(&config)?;
            print_plan(module_ref, &plan);
        }
    }

    Ok(())
}

/// Backs up every target, applies all plans and commits, or restores every target on failure
pub fn transform(fs: Arc<dyn FileSystem>, command: cli::TransformCommand) -> anyhow::Result<()> {
    let module_refs = targets(fs.as_ref(), &command.target)?;
    let bindings = var_bindings(fs.as_ref(), &command.vars)?;

    for module_ref in &module_refs {
        backup::backup_folder(fs.as_ref(), &module_ref.abs_dir)?;
    }

    let applied = (|| -> anyhow::Result<()> {
        for mptf_dir in &command.mptf_dirs {
            let documents = load_documents(fs.as_ref(), mptf_dir)?;
            for module_ref in &module_refs {
                let config = load_config(&fs, module_ref, &documents, &bindings)?;
                let plan = Plan::compute(&config)?;
                print_plan(module_ref, &plan);
                plan.apply()?;
            }
        }
        Ok(())
    })();

    if let Err(err) = applied {
        tracing::error!("transform failed, restoring backups");
        for module_ref in &module_refs {
            if let Err(reset_err) = backup::reset(fs.as_ref(), &module_ref.abs_dir) {
                eprintln!("{reset_err}");
            }
        }
        return Err(err);
    }

    for module_ref in &module_refs {
        backup::commit_folder(fs.as_ref(), &module_ref.abs_dir)?;
    }

    Ok(())
}

/// Loads the module and meta sources of a debug session and prints their plan
fn debug_config(fs: &Arc<dyn FileSystem>, command: &cli::DebugCommand) -> anyhow::Result<Config> {
    let bindings = var_bindings(fs.as_ref(), &command.vars)?;
    let documents = load_documents(fs.as_ref(), &command.mptf_dir)?;
    let module_ref = ModuleRef::root(&command.tf_dir, absolute(&command.tf_dir)?);
    let config = load_config(fs, &module_ref, &documents, &bindings)?;

    print_plan(&module_ref, &Plan::compute(&config)?);

    Ok(config)
}

pub fn debug(fs: Arc<dyn FileSystem>, command: cli::DebugCommand) -> anyhow::Result<()> {
    let config = debug_config(&fs, &command)?;

    let mut editor = rustyline::DefaultEditor::new()?;
    loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => break,
            Err(err) => return Err(err.into()),
        };

        let line = line.trim();
        match line {
            "" => continue,
            "quit" | "exit" => break,
            _ => {}
        }
        editor.add_history_entry(line)?;

        let result = line
            .parse::<hcl_edit::expr::Expression>()
            .map_err(anyhow::Error::from)
            .and_then(|expr| Ok(config.evaluate(&expr.into())?));
        match result {
            Ok(value) => output(&command.output, &value.into())?,
            Err(err) => eprintln!("{err}"),
        }
    }

    Ok(())
}

fn output(output: &cli::OutputArgs, value: &Value) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json => {
            serde_json::to_writer_pretty(std::io::stdout(), value)?;
            println!();
        }
    };

    Ok(())
}

pub fn reset(fs: Arc<dyn FileSystem>, target: cli::TargetArgs) -> anyhow::Result<()> {
    for module_ref in targets(fs.as_ref(), &target)? {
        backup::reset(fs.as_ref(), &module_ref.abs_dir)?;
    }
    Ok(())
}

pub fn clean_backup(fs: Arc<dyn FileSystem>, target: cli::TargetArgs) -> anyhow::Result<()> {
    for module_ref in targets(fs.as_ref(), &target)? {
        backup::clear_backup(fs.as_ref(), &module_ref.abs_dir)?;
    }
    Ok(())
}
