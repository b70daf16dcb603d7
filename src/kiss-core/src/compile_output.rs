//! Categorization of raw compiler and linker output.
//!
//! The parser never fails. Lines that do not look like `file:line: category:
//! message` degrade to `file:message` and are kept as ambiguous diagnostics.

use crate::lines::{EditorLine, ProtocolLine};
use serde::{Deserialize, Serialize};

const ERROR_CATEGORY: &str = "error";
const WARNING_CATEGORY: &str = "warning";

/// Categorized build output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOutput {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub linker: Vec<String>,
    /// Every input line, in order, without its line terminator.
    pub verbose: Vec<String>,
}

impl CompileOutput {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Append the result of a later build stage (typically the link step).
    pub fn extend(&mut self, other: CompileOutput) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.linker.extend(other.linker);
        self.verbose.extend(other.verbose);
    }

    /// Editor markers for every error and warning that names a file and line.
    pub fn markers(&self) -> Vec<DiagnosticMarker> {
        let errors = self
            .errors
            .iter()
            .filter_map(|m| DiagnosticMarker::from_message(m, Severity::Error));
        let warnings = self
            .warnings
            .iter()
            .filter_map(|m| DiagnosticMarker::from_message(m, Severity::Warning));
        errors.chain(warnings).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A request for the editor to mark a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticMarker {
    pub file: String,
    pub line: EditorLine,
    pub severity: Severity,
}

impl DiagnosticMarker {
    fn from_message(message: &str, severity: Severity) -> Option<Self> {
        let mut fields = message.split(':');
        let file = fields.next()?.trim();
        let line: u32 = fields.next()?.trim().parse().ok()?;
        if file.is_empty() {
            return None;
        }
        Some(Self {
            file: file.to_string(),
            line: ProtocolLine(line).to_editor()?,
            severity,
        })
    }
}

/// Stateless parser for build tool output.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOutputParser;

impl CompileOutputParser {
    /// Categorize compiler output lines.
    pub fn compiler<I, S>(lines: I) -> CompileOutput
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut output = CompileOutput::default();
        let mut found_error = false;
        let mut found_warning = false;

        for raw in lines {
            let line = strip_terminator(raw.as_ref());
            output.verbose.push(line.to_string());

            let input = strip_location_prefix(line);
            match normalize(input) {
                Normalized::Categorized { category, text } if category == ERROR_CATEGORY => {
                    output.errors.push(text);
                    found_error = true;
                }
                Normalized::Categorized { category, text } if category == WARNING_CATEGORY => {
                    output.warnings.push(text);
                    found_warning = true;
                }
                _ => {
                    output.errors.push(input.to_string());
                    output.warnings.push(input.to_string());
                }
            }
        }

        match (found_error, found_warning) {
            (false, false) => {
                output.errors.clear();
                output.warnings.clear();
            }
            (false, true) => output.errors.clear(),
            (true, false) => output.warnings.clear(),
            (true, true) => {}
        }

        output
    }

    /// Linker output is not field-parsed: every line is reported verbatim.
    pub fn linker<I, S>(lines: I) -> CompileOutput
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut output = CompileOutput::default();
        for raw in lines {
            let line = strip_terminator(raw.as_ref()).to_string();
            output.verbose.push(line.clone());
            output.linker.push(line);
        }
        output
    }

    pub fn compiler_text(text: &str) -> CompileOutput {
        Self::compiler(text.split_inclusive('\n'))
    }

    pub fn linker_text(text: &str) -> CompileOutput {
        Self::linker(text.split_inclusive('\n'))
    }
}

enum Normalized {
    Categorized { category: String, text: String },
    Degraded,
}

fn strip_terminator(line: &str) -> &str {
    match line.strip_suffix('\n') {
        Some(rest) => rest.trim_end_matches('\r'),
        None => line,
    }
}

/// Drop a `C:` drive prefix and any absolute directory in front of `file:`.
fn strip_location_prefix(line: &str) -> &str {
    let line = line.strip_prefix("C:").unwrap_or(line);
    if !line.starts_with('/') {
        return line;
    }
    // the longest directory prefix whose remainder still starts with a `name:` token
    line.match_indices('/')
        .rev()
        .map(|(idx, _)| &line[idx + 1..])
        .find(|rest| starts_with_file_token(rest))
        .unwrap_or(line)
}

fn starts_with_file_token(text: &str) -> bool {
    for c in text.chars() {
        if c == ':' {
            return true;
        }
        if c.is_whitespace() {
            return false;
        }
    }
    false
}

fn normalize(input: &str) -> Normalized {
    let fields: Vec<&str> = input.split(':').collect();
    let field = |idx: usize| fields.get(idx).copied().unwrap_or("");

    // `file:line:column: category: message`
    let category_idx = if fields.len() > 3 && is_number(field(2)) {
        3
    } else {
        2
    };
    let category = field(category_idx).trim();
    if category.is_empty() {
        return Normalized::Degraded;
    }

    let category = category.to_lowercase();
    let message = fields
        .get(category_idx + 1..)
        .map(|rest| rest.join(":"))
        .unwrap_or_default();
    let text = format!(
        "{}:{}:{}:{}",
        field(0),
        field(1).trim(),
        category,
        message.trim()
    );
    Normalized::Categorized { category, text }
}

fn is_number(field: &str) -> bool {
    let field = field.trim();
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit())
}
