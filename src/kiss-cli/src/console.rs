//! Line-based debugger console driving a [`DebugSession`].

use kiss_core::{BreakpointLocation, DebugEvent, OutputStream, ProtocolLine};
use kiss_debug::{DebugSession, Dispatch};
use std::io::BufRead;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

pub const HELP: &str = "\
commands:
  run | r              start or continue until a breakpoint or exit
  pause | p            pause and show stack, variables, breakpoints
  step | s             execute one line and show the new state (while paused)
  stop                 stop the program
  break | b LINE       set a breakpoint on LINE
  clear LINE           remove the breakpoint on LINE
  input TEXT           send TEXT to the program's stdin
  bt | vars | breaks   show the last reported stack, variables or breakpoints
  help                 show this text
  quit | q             stop and leave the debugger";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Run,
    Pause,
    Step,
    Stop,
    Break(ProtocolLine),
    Clear(ProtocolLine),
    Input(String),
    Backtrace,
    Variables,
    Breakpoints,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("'{command}' needs a line number >= 1")]
    BadLine { command: &'static str },
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Option<Self>, ConsoleError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let command = match word {
            "run" | "r" | "continue" | "c" => Self::Run,
            "pause" | "p" => Self::Pause,
            "step" | "s" | "next" | "n" => Self::Step,
            "stop" => Self::Stop,
            "break" | "b" => Self::Break(parse_line(rest, "break")?),
            "clear" => Self::Clear(parse_line(rest, "clear")?),
            "input" => Self::Input(format!("{rest}\n")),
            "bt" | "backtrace" => Self::Backtrace,
            "vars" | "variables" => Self::Variables,
            "breaks" | "breakpoints" => Self::Breakpoints,
            "help" | "h" | "?" => Self::Help,
            "quit" | "q" | "exit" => Self::Quit,
            other => return Err(ConsoleError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn parse_line(text: &str, command: &'static str) -> Result<ProtocolLine, ConsoleError> {
    match text.parse::<u32>() {
        Ok(line) if line >= 1 => Ok(ProtocolLine(line)),
        _ => Err(ConsoleError::BadLine { command }),
    }
}

/// How one debug event reads on the console.
pub fn render_event(event: &DebugEvent) -> Option<String> {
    match event {
        DebugEvent::StateChanged(state) => Some(format!("[{state}]")),
        DebugEvent::StackUpdated(frames) if frames.is_empty() => None,
        DebugEvent::StackUpdated(frames) => Some(
            frames
                .iter()
                .enumerate()
                .map(|(depth, frame)| format!("#{depth} {frame}"))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        DebugEvent::VariablesUpdated(vars) if vars.is_empty() => None,
        DebugEvent::VariablesUpdated(vars) => Some(
            vars.iter()
                .map(|v| format!("  {v}"))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        DebugEvent::BreakpointsUpdated(bps) if bps.is_empty() => None,
        DebugEvent::BreakpointsUpdated(bps) => Some(
            bps.iter()
                .map(|bp| format!("  {bp}"))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        DebugEvent::Output {
            stream: OutputStream::Stdout,
            text,
        } => Some(text.trim_end_matches('\n').to_string()),
        DebugEvent::Output {
            stream: OutputStream::Stderr,
            text,
        } => Some(format!("stderr: {}", text.trim_end_matches('\n'))),
        DebugEvent::Output {
            stream: OutputStream::DebugLog,
            text,
        } => Some(format!("(debugger) {}", text.trim_end_matches('\n'))),
    }
}

/// Drive `session` from stdin until the user quits or the connection ends.
pub fn run_console(mut session: DebugSession, file: &str, breakpoints: &[ProtocolLine]) {
    session.set_observer(|event: &DebugEvent| {
        if let Some(text) = render_event(event) {
            println!("{text}");
        }
    });

    for line in breakpoints {
        apply(&mut session, file, ConsoleCommand::Break(*line));
    }
    println!("{HELP}");

    let (lines_tx, lines_rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines().map_while(Result::ok) {
            if lines_tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        session.process_events();
        if session.state().is_terminal() {
            println!("debug connection closed");
            break;
        }
        let line = match lines_rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match ConsoleCommand::parse(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => apply(&mut session, file, command),
            Err(err) => println!("{err}"),
        }
    }

    if !session.state().is_terminal() {
        let _ = session.stop();
        session.flush(FLUSH_TIMEOUT);
    }
    session.close();
}

fn apply(session: &mut DebugSession, file: &str, command: ConsoleCommand) {
    let at = |line: ProtocolLine| line.to_editor().map(|l| BreakpointLocation::new(file, l));
    let result = match command {
        ConsoleCommand::Run => session.run(),
        ConsoleCommand::Pause => session.pause(),
        // a step produces no snapshot of its own
        ConsoleCommand::Step => session.step().and_then(|dispatch| match dispatch {
            Dispatch::Accepted => session.refresh(),
            ignored => Ok(ignored),
        }),
        ConsoleCommand::Stop => session.stop(),
        ConsoleCommand::Break(line) => match at(line) {
            Some(location) => session.add_breakpoint(location),
            None => return,
        },
        ConsoleCommand::Clear(line) => match at(line) {
            Some(location) => session.remove_breakpoint(location),
            None => return,
        },
        ConsoleCommand::Input(text) => session.send_input(text),
        ConsoleCommand::Backtrace => {
            for (depth, frame) in session.stack().iter().enumerate() {
                println!("#{depth} {frame}");
            }
            return;
        }
        ConsoleCommand::Variables => {
            for variable in session.variables() {
                println!("  {variable}");
            }
            return;
        }
        ConsoleCommand::Breakpoints => {
            if session.breakpoint_view().is_empty() {
                for bp in session.breakpoints().iter() {
                    println!("  {bp}");
                }
            } else {
                for bp in session.breakpoint_view() {
                    println!("  {bp}");
                }
            }
            return;
        }
        ConsoleCommand::Help => {
            println!("{HELP}");
            return;
        }
        ConsoleCommand::Quit => return,
    };

    match result {
        Ok(Dispatch::Accepted) => {
            session.flush(FLUSH_TIMEOUT);
        }
        Ok(Dispatch::Ignored) => println!("(not possible in state {})", session.state()),
        Err(err) => println!("{err}"),
    }
}
