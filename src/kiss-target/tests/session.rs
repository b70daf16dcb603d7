use kiss_core::{
    BuildReport, CompileOutputParser, DebugConnection, DebugState, PluginHandle,
    ProtocolBreakpoint, ProtocolLocation, StackFrame, TargetCapabilities, TargetError,
    TargetOperation, TargetPlugin, TargetResult, TransportError, Variable,
};
use kiss_target::{SessionError, TargetLoadError, TargetRegistry, TargetSession};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

type CallLog = Arc<Mutex<Vec<String>>>;

struct RecordingTarget {
    name: &'static str,
    caps: TargetCapabilities,
    calls: CallLog,
}

impl RecordingTarget {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl TargetPlugin for RecordingTarget {
    fn name(&self) -> &str {
        self.name
    }

    fn capabilities(&self) -> TargetCapabilities {
        self.caps
    }

    fn compile(&self, file: &Path, port: Option<&str>) -> TargetResult<BuildReport> {
        self.record(format!("compile {} {:?}", file.display(), port));
        let output = CompileOutputParser::compiler([
            "main.c:10:5: error: foo",
            "main.c:12:3: warning: bar",
        ]);
        Ok(BuildReport::new(false, output))
    }

    fn run(&self, file: &Path, port: Option<&str>) -> TargetResult<()> {
        self.record(format!("run {} {:?}", file.display(), port));
        Ok(())
    }

    fn stop(&self, port: Option<&str>) -> TargetResult<()> {
        self.record(format!("stop {:?}", port));
        Ok(())
    }

    fn debug(&self, file: &Path, _port: Option<&str>) -> TargetResult<Box<dyn DebugConnection>> {
        self.record(format!("debug {}", file.display()));
        Ok(Box::new(IdleConnection))
    }
}

struct IdleConnection;

impl DebugConnection for IdleConnection {
    fn run(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn pause(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn step(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn send_input(&mut self, _text: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn add_breakpoint(&mut self, _location: &ProtocolLocation) -> Result<(), TransportError> {
        Ok(())
    }

    fn remove_breakpoint(&mut self, _location: &ProtocolLocation) -> Result<(), TransportError> {
        Ok(())
    }

    fn backtrace(&mut self) -> Result<Vec<StackFrame>, TransportError> {
        Ok(Vec::new())
    }

    fn variables(&mut self) -> Result<Vec<Variable>, TransportError> {
        Ok(Vec::new())
    }

    fn breakpoints(&mut self) -> Result<Vec<ProtocolBreakpoint>, TransportError> {
        Err(TransportError::Io("not wired".into()))
    }
}

struct Fixture {
    dir: TempDir,
    registry: Arc<TargetRegistry>,
    calls: CallLog,
    loads: Arc<Mutex<usize>>,
}

impl Fixture {
    fn new() -> Self {
        let calls = CallLog::default();
        let loads = Arc::new(Mutex::new(0));
        let mut registry = TargetRegistry::new();

        let log = Arc::clone(&calls);
        let counter = Arc::clone(&loads);
        registry.register("host", move || {
            *counter.lock().unwrap() += 1;
            Ok(Arc::new(RecordingTarget {
                name: "host",
                caps: TargetCapabilities {
                    compile: true,
                    run: true,
                    stop: true,
                    debug: true,
                    ..TargetCapabilities::none()
                },
                calls: Arc::clone(&log),
            }) as PluginHandle)
        });

        let log = Arc::clone(&calls);
        registry.register("compiler", move || {
            Ok(Arc::new(RecordingTarget {
                name: "compiler",
                caps: TargetCapabilities {
                    compile: true,
                    ..TargetCapabilities::none()
                },
                calls: Arc::clone(&log),
            }) as PluginHandle)
        });

        registry.register("broken", || {
            Err(TargetError::Other {
                message: "toolchain missing".to_string(),
            })
        });

        Self {
            dir: TempDir::new().unwrap(),
            registry: Arc::new(registry),
            calls,
            loads,
        }
    }

    fn target_file(&self, file_name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(file_name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn session(&self) -> TargetSession {
        TargetSession::new(Arc::clone(&self.registry))
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[test]
fn binding_resolves_base_target_and_snapshots_capabilities() {
    let fx = Fixture::new();
    let path = fx.target_file(
        "robot.target",
        "name = \"robot\"\nbase_target = \"host\"\ndisplay_name = \"Robot\"\nextensions = \"c|h|cpp\"\ndefault_extension = \"cpp\"\n",
    );

    let mut session = fx.session();
    assert!(!session.is_valid());
    session.set_target_file(&path).unwrap();

    assert!(session.is_valid());
    assert_eq!(session.name(), Some("robot"));
    assert_eq!(session.display_name(), Some("Robot"));
    assert_eq!(session.target_file(), Some(path.as_path()));
    assert_eq!(session.source_extensions(), vec!["cpp", "c", "h"]);
    assert_eq!(session.default_extension(), Some("cpp"));
    assert!(session.has_compile());
    assert!(session.has_run());
    assert!(session.has_stop());
    assert!(session.has_debug());
    assert!(!session.has_download());
    assert!(!session.has_simulate());
}

#[test]
fn name_is_used_when_there_is_no_base_target() {
    let fx = Fixture::new();
    let path = fx.target_file("compiler.target", "name = \"compiler\"\n");

    let mut session = fx.session();
    session.set_target_file(&path).unwrap();
    assert_eq!(
        session.capabilities().operations(),
        vec![TargetOperation::Compile]
    );
}

#[test]
fn unknown_plugin_keeps_the_previous_binding() {
    let fx = Fixture::new();
    let good = fx.target_file("good.target", "name = \"good\"\nbase_target = \"host\"\n");
    let unknown = fx.target_file("unknown.target", "name = \"mystery\"\n");
    let broken = fx.target_file("broken.target", "name = \"broken\"\n");
    let garbled = fx.target_file("garbled.target", "name = \n");

    let mut session = fx.session();
    session.set_target_file(&good).unwrap();

    match session.set_target_file(&unknown) {
        Err(TargetLoadError::PluginNotFound { plugin }) => assert_eq!(plugin, "mystery"),
        other => panic!("expected PluginNotFound, got {other:?}"),
    }
    assert!(matches!(
        session.set_target_file(&broken),
        Err(TargetLoadError::PluginUnavailable { .. })
    ));
    assert!(matches!(
        session.set_target_file(&garbled),
        Err(TargetLoadError::Parse { .. })
    ));
    assert!(matches!(
        session.set_target_file(fx.dir.path().join("absent.target")),
        Err(TargetLoadError::Io { .. })
    ));

    assert_eq!(session.name(), Some("good"));
    assert!(session.has_run());
}

#[test]
fn target_with_an_unknown_plugin_reports_no_capabilities() {
    let fx = Fixture::new();
    let unknown = fx.target_file("unknown.target", "name = \"mystery\"\n");

    let mut session = fx.session();
    assert!(session.set_target_file(&unknown).is_err());

    assert!(!session.is_valid());
    assert!(!session.has_compile());
    assert!(!session.has_download());
    assert!(!session.has_run());
    assert!(!session.has_stop());
    assert!(!session.has_simulate());
    assert!(!session.has_debug());
    assert!(matches!(
        session.compile(Path::new("main.c")),
        Err(SessionError::Unbound)
    ));
    assert!(fx.calls().is_empty());
}

#[test]
fn rebinding_the_same_file_is_a_no_op_and_empty_path_unbinds() {
    let fx = Fixture::new();
    let path = fx.target_file(
        "robot.target",
        "name = \"robot\"\nbase_target = \"host\"\nport = \"/dev/ttyACM0\"\n",
    );

    let mut session = fx.session();
    session.set_target_file(&path).unwrap();
    session.set_port(Some("/dev/ttyACM1".to_string()));
    session.set_target_file(&path).unwrap();
    assert_eq!(session.port(), Some("/dev/ttyACM1"));

    let mut other = fx.session();
    other.set_target_file(&path).unwrap();
    assert_eq!(other.port(), Some("/dev/ttyACM0"));
    assert_eq!(*fx.loads.lock().unwrap(), 1);

    session.set_target_file("").unwrap();
    assert!(!session.is_valid());
    assert_eq!(session.capabilities(), TargetCapabilities::none());
    assert!(session.source_extensions().is_empty());
    assert!(matches!(
        session.run(Path::new("main.c")),
        Err(SessionError::Unbound)
    ));
}

#[test]
fn unsupported_operations_never_reach_the_plugin() {
    let fx = Fixture::new();
    let path = fx.target_file("compiler.target", "name = \"compiler\"\n");
    let mut session = fx.session();
    session.set_target_file(&path).unwrap();

    let file = Path::new("main.c");
    assert!(matches!(
        session.download(file),
        Err(SessionError::Unsupported(TargetOperation::Download))
    ));
    assert!(matches!(
        session.run(file),
        Err(SessionError::Unsupported(TargetOperation::Run))
    ));
    assert!(matches!(
        session.stop(),
        Err(SessionError::Unsupported(TargetOperation::Stop))
    ));
    assert!(matches!(
        session.simulate(file),
        Err(SessionError::Unsupported(TargetOperation::Simulate))
    ));
    assert!(matches!(
        session.debug(file),
        Err(SessionError::Unsupported(TargetOperation::Debug))
    ));
    assert!(fx.calls().is_empty());
}

#[test]
fn operations_forward_the_session_port() {
    let fx = Fixture::new();
    let path = fx.target_file(
        "robot.target",
        "name = \"robot\"\nbase_target = \"host\"\nport = \"tcp:192.168.125.1\"\n",
    );
    let mut session = fx.session();
    session.set_target_file(&path).unwrap();

    session.run(Path::new("main.c")).unwrap();
    session.set_port(None);
    session.stop().unwrap();

    assert_eq!(
        fx.calls(),
        vec![
            "run main.c Some(\"tcp:192.168.125.1\")".to_string(),
            "stop None".to_string(),
        ]
    );
}

#[test]
fn compile_keeps_the_last_build_report() {
    let fx = Fixture::new();
    let path = fx.target_file("robot.target", "name = \"robot\"\nbase_target = \"host\"\n");
    let mut session = fx.session();
    session.set_target_file(&path).unwrap();
    assert!(session.last_build().is_none());

    let report = session.compile(Path::new("main.c")).unwrap();
    assert!(!report.success);
    assert_eq!(report.output.errors, vec!["main.c:10:error:foo"]);
    assert_eq!(report.output.warnings, vec!["main.c:12:warning:bar"]);
    assert_eq!(report.output.verbose.len(), 2);
    assert_eq!(session.last_build(), Some(&report));
}

#[test]
fn template_and_manual_come_from_the_target_directory() {
    let fx = Fixture::new();
    std::fs::write(fx.dir.path().join("template.c"), "int main() { return 0; }\n").unwrap();
    let path = fx.target_file(
        "robot.target",
        "name = \"robot\"\nbase_target = \"host\"\ntemplate = \"template.c\"\nmanual = \"manual.html\"\n",
    );
    let mut session = fx.session();
    session.set_target_file(&path).unwrap();

    assert_eq!(
        session.source_template().as_deref(),
        Some("int main() { return 0; }\n")
    );
    assert_eq!(
        session.manual_path(),
        Some(fx.dir.path().join("manual.html").as_path())
    );
}

#[test]
fn debug_hands_back_a_stopped_session() {
    let fx = Fixture::new();
    let path = fx.target_file("robot.target", "name = \"robot\"\nbase_target = \"host\"\n");
    let mut session = fx.session();
    session.set_target_file(&path).unwrap();

    let mut debug = session.debug(Path::new("main.c")).unwrap();
    assert_eq!(debug.state(), DebugState::Stopped);
    debug.set_observer(|_event: &kiss_core::DebugEvent| {});
    debug.run().unwrap();
    debug.pause().unwrap();

    // the connection fails while fetching breakpoints
    assert!(!debug.flush(Duration::from_secs(5)));
    assert_eq!(debug.state(), DebugState::Terminated);
    assert_eq!(fx.calls(), vec!["debug main.c".to_string()]);
}
