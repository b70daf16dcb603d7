mod console;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gcc_target::GccTarget;
use kiss_core::{
    init_logging, AppDirs, BuildReport, CompileOutput, CompileOutputParser, Config, PluginHandle,
    ProtocolLine,
};
use kiss_target::{TargetRegistry, TargetSession, TARGET_FILE_EXTENSION};
use sim_target::SimTarget;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(name = "kiss", version, about = "KISS target toolchain")]
struct Cli {
    /// Target name or path to a .target file (takes precedence over config)
    #[arg(long, global = true)]
    target: Option<String>,
    /// Port override for the selected target
    #[arg(long, global = true)]
    port: Option<String>,
    /// Also print the raw tool output of builds
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Target catalogue commands
    #[command(subcommand)]
    Targets(TargetsCommand),
    /// Compile a source file
    Compile { file: PathBuf },
    /// Build and transfer a program to the target
    Download { file: PathBuf },
    /// Run a downloaded program
    Run { file: PathBuf },
    /// Run a program in the target's simulator
    Simulate { file: PathBuf },
    /// Stop the program running on the target
    Stop,
    /// Debug a program interactively
    Debug(DebugArgs),
    /// Categorize compiler or linker output read from a file or stdin
    ParseOutput(ParseOutputArgs),
}

#[derive(Debug, Subcommand)]
enum TargetsCommand {
    /// List the targets found in the targets directory
    List,
    /// Show one target's settings and capabilities
    Show { target: String },
}

#[derive(Debug, Parser, Clone)]
struct DebugArgs {
    file: PathBuf,
    /// Set a breakpoint before starting (1-based line, repeatable)
    #[arg(long = "break", value_name = "LINE")]
    breakpoints: Vec<u32>,
}

#[derive(Debug, Parser, Clone)]
struct ParseOutputArgs {
    /// Treat the input as linker output
    #[arg(long)]
    linker: bool,
    file: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("no target selected; pass --target or set default_target in config.toml")]
    NoTarget,
    #[error("unknown target '{name}' (available: {available})")]
    UnknownTarget { name: String, available: String },
    #[error("the debugger is disabled in config.toml")]
    DebuggerDisabled,
    #[error("build failed")]
    BuildFailed,
}

const BUILTIN_TARGETS: [(&str, &str); 2] = [
    (
        "gcc",
        "name = \"gcc\"\ndisplay_name = \"Host GCC\"\nextensions = \"c|h\"\ndefault_extension = \"c\"\n",
    ),
    (
        "sim",
        "name = \"sim\"\ndisplay_name = \"Simulator\"\nextensions = \"c|h\"\ndefault_extension = \"c\"\n",
    ),
];

fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = AppDirs::discover()?;
    let config = Config::load_or_default(&dirs)?;
    let dirs = config.apply_dirs(dirs);
    dirs.ensure_exists()?;
    let _logging = init_logging(&config.logging, &dirs)?;

    if let Command::ParseOutput(args) = &cli.command {
        return parse_output(args);
    }

    seed_builtin_targets(dirs.targets_dir())?;
    let registry = Arc::new(build_registry(dirs.targets_dir()));
    let result = dispatch(&cli, &config, &registry);
    registry.shutdown();
    result
}

/// Write settings files for the built-in targets unless the user already has them.
fn seed_builtin_targets(dir: &Path) -> Result<()> {
    for (name, contents) in BUILTIN_TARGETS {
        let path = dir.join(format!("{name}.{TARGET_FILE_EXTENSION}"));
        if !path.exists() {
            std::fs::write(&path, contents)
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), "installed built-in target file");
        }
    }
    Ok(())
}

fn build_registry(targets_dir: &Path) -> TargetRegistry {
    let mut registry = TargetRegistry::new();
    registry.register(gcc_target::PLUGIN_NAME, || {
        Ok(Arc::new(GccTarget::default()) as PluginHandle)
    });
    registry.register(sim_target::PLUGIN_NAME, || {
        Ok(Arc::new(SimTarget::new()) as PluginHandle)
    });
    registry.discover(targets_dir);
    registry
}

fn dispatch(cli: &Cli, config: &Config, registry: &Arc<TargetRegistry>) -> Result<()> {
    match &cli.command {
        Command::Targets(TargetsCommand::List) => {
            print_targets(registry, config);
            return Ok(());
        }
        Command::Targets(TargetsCommand::Show { target }) => {
            let path = resolve_target_file(registry, Some(target))?;
            return show_target(registry, &path);
        }
        Command::ParseOutput(args) => return parse_output(args),
        _ => {}
    }

    let selector = cli.target.as_deref().or(config.default_target.as_deref());
    let path = resolve_target_file(registry, selector)?;
    let mut session = TargetSession::new(Arc::clone(registry));
    session.set_target_file(&path)?;
    if cli.port.is_some() {
        session.set_port(cli.port.clone());
    }
    tracing::info!(
        target_name = session.name().unwrap_or_default(),
        port = session.port().unwrap_or("-"),
        "target selected"
    );

    match &cli.command {
        Command::Compile { file } => {
            let report = session.compile(file)?;
            finish_build(&report, cli.verbose)
        }
        Command::Download { file } => {
            let report = session.download(file)?;
            finish_build(&report, cli.verbose)
        }
        Command::Run { file } => {
            session.run(file)?;
            println!("Program started.");
            if session.has_stop() && std::io::stdin().is_terminal() {
                println!("Press Enter to stop it.");
                let mut line = String::new();
                std::io::stdin().read_line(&mut line)?;
                session.stop()?;
            }
            Ok(())
        }
        Command::Simulate { file } => Ok(session.simulate(file)?),
        Command::Stop => Ok(session.stop()?),
        Command::Debug(args) => {
            if !config.debugger_enabled {
                bail!(CliError::DebuggerDisabled);
            }
            let debug = session.debug(&args.file)?;
            let lines: Vec<ProtocolLine> =
                args.breakpoints.iter().copied().map(ProtocolLine).collect();
            console::run_console(debug, &args.file.display().to_string(), &lines);
            Ok(())
        }
        Command::Targets(_) | Command::ParseOutput(_) => Ok(()),
    }
}

/// A target argument is either a path to a settings file or a catalogue name.
fn resolve_target_file(registry: &TargetRegistry, selector: Option<&str>) -> Result<PathBuf> {
    let selector = selector.ok_or(CliError::NoTarget)?;
    let as_path = Path::new(selector);
    if as_path.extension().is_some_and(|ext| ext == TARGET_FILE_EXTENSION) || as_path.is_file() {
        return Ok(as_path.to_path_buf());
    }
    registry.target_file_path(selector).ok_or_else(|| {
        CliError::UnknownTarget {
            name: selector.to_string(),
            available: registry.available_targets().join(", "),
        }
        .into()
    })
}

fn print_targets(registry: &TargetRegistry, config: &Config) {
    let targets = registry.available_targets();
    if targets.is_empty() {
        println!("No targets found. Add *.target files to the targets directory.");
        return;
    }

    for name in targets {
        let default_marker = if config.default_target.as_deref() == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        let display = registry.display_name(&name).unwrap_or_else(|| name.clone());
        println!("{}{}: {}", name, default_marker, display);
    }
}

fn show_target(registry: &TargetRegistry, path: &Path) -> Result<()> {
    let descriptor = kiss_target::TargetDescriptor::load(path)?;
    let caps = registry.capabilities(descriptor.plugin_name());
    println!("Target:     {}", descriptor.name);
    println!("Name:       {}", descriptor.display_name());
    println!("Plugin:     {}", descriptor.plugin_name());
    println!("File:       {}", descriptor.config_path.display());
    println!("Extensions: {}", descriptor.source_extensions().join(", "));
    if let Some(port) = &descriptor.port {
        println!("Port:       {}", port);
    }
    if let Some(template) = &descriptor.template_path {
        println!("Template:   {}", template.display());
    }
    if let Some(manual) = &descriptor.manual_path {
        println!("Manual:     {}", manual.display());
    }
    let operations: Vec<&str> = caps.operations().iter().map(|op| op.as_str()).collect();
    if operations.is_empty() {
        println!("Operations: (plugin unavailable)");
    } else {
        println!("Operations: {}", operations.join(", "));
    }
    Ok(())
}

fn finish_build(report: &BuildReport, verbose: bool) -> Result<()> {
    print_output(&report.output, verbose);
    if report.success {
        println!("Build succeeded.");
        Ok(())
    } else {
        bail!(CliError::BuildFailed)
    }
}

fn print_output(output: &CompileOutput, verbose: bool) {
    if verbose {
        for line in &output.verbose {
            println!("{}", line);
        }
    }
    for line in &output.errors {
        println!("error:   {}", line);
    }
    for line in &output.warnings {
        println!("warning: {}", line);
    }
    for line in &output.linker {
        println!("linker:  {}", line);
    }
}

fn parse_output(args: &ParseOutputArgs) -> Result<()> {
    let text = match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            text
        }
    };
    let output = if args.linker {
        CompileOutputParser::linker_text(&text)
    } else {
        CompileOutputParser::compiler_text(&text)
    };
    print_output(&output, false);
    for marker in output.markers() {
        println!(
            "marker:  {}:{} {:?}",
            marker.file,
            marker.line.to_protocol(),
            marker.severity
        );
    }
    Ok(())
}
