//! Host target: builds with the system C compiler and runs the result locally.

use kiss_core::{
    BuildReport, CompileOutput, CompileOutputParser, TargetCapabilities, TargetError,
    TargetPlugin, TargetResult,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const PLUGIN_NAME: &str = "gcc";

#[derive(Debug, Clone)]
pub struct GccConfig {
    /// Compiler driver; also used as the linker.
    pub compiler: PathBuf,
    pub cflags: Vec<String>,
    pub ldflags: Vec<String>,
    /// Where objects and executables go; next to the source when `None`.
    pub output_dir: Option<PathBuf>,
}

impl Default for GccConfig {
    fn default() -> Self {
        Self {
            compiler: PathBuf::from("gcc"),
            cflags: vec!["-Wall".to_string()],
            ldflags: vec!["-lm".to_string()],
            output_dir: None,
        }
    }
}

/// Compile, link ("download") and run programs on the host machine.
#[derive(Debug)]
pub struct GccTarget {
    config: GccConfig,
    running: Mutex<Option<Child>>,
}

impl Default for GccTarget {
    fn default() -> Self {
        Self::new(GccConfig::default())
    }
}

impl GccTarget {
    pub fn new(config: GccConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
        }
    }

    fn caps() -> TargetCapabilities {
        TargetCapabilities {
            compile: true,
            download: true,
            run: true,
            stop: true,
            simulate: false,
            debug: false,
        }
    }

    pub fn object_path(&self, file: &Path) -> PathBuf {
        self.artifact(file).with_extension("o")
    }

    pub fn executable_path(&self, file: &Path) -> PathBuf {
        self.artifact(file)
            .with_extension(std::env::consts::EXE_EXTENSION)
    }

    /// Whether a program started by [`TargetPlugin::run`] is still alive.
    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_mut()
            .map(|child| child.try_wait().ok().flatten().is_none())
            .unwrap_or(false)
    }

    fn artifact(&self, file: &Path) -> PathBuf {
        let stem = file.file_stem().unwrap_or(file.as_os_str());
        let dir = match &self.config.output_dir {
            Some(dir) => dir.as_path(),
            None => file.parent().unwrap_or_else(|| Path::new("")),
        };
        dir.join(stem)
    }

    fn invoke(&self, args: &[&OsStr]) -> TargetResult<Output> {
        let tool = self.config.compiler.display().to_string();
        tracing::debug!(%tool, ?args, "invoking compiler");
        Command::new(&self.config.compiler)
            .args(args)
            // diagnostics are categorized by their English keywords
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .output()
            .map_err(|source| TargetError::Launch { tool, source })
    }

    fn compile_object(&self, file: &Path) -> TargetResult<(bool, CompileOutput)> {
        require_file(file)?;
        let object = self.object_path(file);
        let mut args: Vec<&OsStr> = self.config.cflags.iter().map(OsStr::new).collect();
        args.extend([
            OsStr::new("-c"),
            file.as_os_str(),
            OsStr::new("-o"),
            object.as_os_str(),
        ]);
        let output = self.invoke(&args)?;
        let diagnostics =
            CompileOutputParser::compiler_text(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), diagnostics))
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Child>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn kill_running(&self) {
        if let Some(mut child) = self.lock_running().take() {
            tracing::info!(pid = child.id(), "stopping program");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn require_file(file: &Path) -> TargetResult<()> {
    if file.is_file() {
        Ok(())
    } else {
        Err(TargetError::MissingFile {
            path: file.display().to_string(),
        })
    }
}

impl TargetPlugin for GccTarget {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn display_name(&self) -> &str {
        "Host GCC"
    }

    fn capabilities(&self) -> TargetCapabilities {
        Self::caps()
    }

    fn compile(&self, file: &Path, _port: Option<&str>) -> TargetResult<BuildReport> {
        let (success, output) = self.compile_object(file)?;
        Ok(BuildReport::new(success, output))
    }

    /// Compile, then link the object into an executable next to it.
    fn download(&self, file: &Path, _port: Option<&str>) -> TargetResult<BuildReport> {
        let (compiled, mut output) = self.compile_object(file)?;
        if !compiled {
            return Ok(BuildReport::new(false, output));
        }

        let object = self.object_path(file);
        let executable = self.executable_path(file);
        let mut args: Vec<&OsStr> = vec![
            object.as_os_str(),
            OsStr::new("-o"),
            executable.as_os_str(),
        ];
        args.extend(self.config.ldflags.iter().map(OsStr::new));
        let linked = self.invoke(&args)?;
        output.extend(CompileOutputParser::linker_text(&String::from_utf8_lossy(
            &linked.stderr,
        )));
        Ok(BuildReport::new(linked.status.success(), output))
    }

    /// Start the executable produced by the last download; replaces any running program.
    ///
    /// The program is not tied to the toolchain's lifetime; only [`TargetPlugin::stop`] ends it.
    fn run(&self, file: &Path, _port: Option<&str>) -> TargetResult<()> {
        let executable = self.executable_path(file);
        require_file(&executable)?;
        self.kill_running();

        let child = Command::new(&executable)
            .spawn()
            .map_err(|source| TargetError::Launch {
                tool: executable.display().to_string(),
                source,
            })?;
        tracing::info!(pid = child.id(), program = %executable.display(), "program started");
        *self.lock_running() = Some(child);
        Ok(())
    }

    fn stop(&self, _port: Option<&str>) -> TargetResult<()> {
        self.kill_running();
        Ok(())
    }
}
