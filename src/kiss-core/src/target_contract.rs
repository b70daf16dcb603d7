use crate::debug::EventSink;
use crate::target::{TargetError, TargetOperation, TargetPlugin};
use std::path::PathBuf;
use thiserror::Error;

/// Fixtures a plugin implementation supplies to run the shared contract suite.
#[derive(Debug, Clone)]
pub struct TargetContractExpectations {
    /// Name the plugin must report.
    pub name: String,
    /// A source file the plugin can build without diagnostics.
    pub fixture: PathBuf,
    pub port: Option<String>,
}

/// Errors surfaced by the target contract test harness.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetContractError {
    #[error("plugin reported name {actual:?}, expected {expected:?}")]
    NameMismatch { expected: String, actual: String },
    #[error("plugin does not advertise {operation} but did not return NotSupported")]
    NotSupportedExpected { operation: TargetOperation },
    #[error("plugin advertises compile but the fixture did not build cleanly")]
    FixtureBuildFailed,
    #[error("plugin error while running contract: {0}")]
    TargetFailure(String),
}

/// Run the shared target contract suite against a plugin implementation.
///
/// Unadvertised operations must be refused without side effects; advertised
/// compile and debug must work on the fixture. Run/download/stop are not
/// exercised because they act on real devices or processes.
pub fn run_target_contract<P: TargetPlugin + ?Sized>(
    plugin: &P,
    expectations: &TargetContractExpectations,
) -> Result<(), TargetContractError> {
    verify_identity(plugin, expectations)?;
    verify_refusals(plugin, expectations)?;
    verify_compile(plugin, expectations)?;
    verify_debug(plugin, expectations)?;
    Ok(())
}

fn verify_identity<P: TargetPlugin + ?Sized>(
    plugin: &P,
    expectations: &TargetContractExpectations,
) -> Result<(), TargetContractError> {
    if plugin.name() != expectations.name {
        return Err(TargetContractError::NameMismatch {
            expected: expectations.name.clone(),
            actual: plugin.name().to_string(),
        });
    }
    Ok(())
}

fn verify_refusals<P: TargetPlugin + ?Sized>(
    plugin: &P,
    expectations: &TargetContractExpectations,
) -> Result<(), TargetContractError> {
    let caps = plugin.capabilities();
    let file = expectations.fixture.as_path();
    let port = expectations.port.as_deref();

    for operation in TargetOperation::ALL {
        if caps.supports(operation) {
            continue;
        }
        let result = match operation {
            TargetOperation::Compile => plugin.compile(file, port).map(|_| ()),
            TargetOperation::Download => plugin.download(file, port).map(|_| ()),
            TargetOperation::Run => plugin.run(file, port),
            TargetOperation::Stop => plugin.stop(port),
            TargetOperation::Simulate => plugin.simulate(file, port),
            TargetOperation::Debug => plugin.debug(file, port).map(|_| ()),
        };
        match result {
            Err(TargetError::NotSupported { operation: refused }) if refused == operation => {}
            _ => return Err(TargetContractError::NotSupportedExpected { operation }),
        }
    }
    Ok(())
}

fn verify_compile<P: TargetPlugin + ?Sized>(
    plugin: &P,
    expectations: &TargetContractExpectations,
) -> Result<(), TargetContractError> {
    if !plugin.capabilities().compile {
        return Ok(());
    }
    let report = plugin
        .compile(&expectations.fixture, expectations.port.as_deref())
        .map_err(|e| TargetContractError::TargetFailure(e.to_string()))?;
    if !report.success || report.output.has_errors() {
        return Err(TargetContractError::FixtureBuildFailed);
    }
    Ok(())
}

fn verify_debug<P: TargetPlugin + ?Sized>(
    plugin: &P,
    expectations: &TargetContractExpectations,
) -> Result<(), TargetContractError> {
    if !plugin.capabilities().debug {
        return Ok(());
    }
    let mut connection = plugin
        .debug(&expectations.fixture, expectations.port.as_deref())
        .map_err(|e| TargetContractError::TargetFailure(e.to_string()))?;
    let (sink, _events) = EventSink::channel();
    let result = connection
        .attach(sink)
        .and_then(|_| connection.breakpoints())
        .map(|_| ())
        .map_err(|e| TargetContractError::TargetFailure(e.to_string()));
    connection.close();
    result
}
