//! A tiny C-like program model: enough structure to check, execute and
//! single-step a student's source file line by line.

use kiss_core::{ProtocolLine, Variable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    /// `printf("...")`; the literal with `\n` and `\t` unescaped.
    Print(String),
    /// `int x = 5;` or `x = 7;`
    Assign { name: String, value: String },
    /// Any other statement; executes without effect.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Statement {
    pub line: ProtocolLine,
    pub function: String,
    pub action: Action,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Program {
    pub file: String,
    pub statements: Vec<Statement>,
    /// gcc-style diagnostics found while reading the source.
    pub diagnostics: Vec<String>,
}

const TYPES: [&str; 6] = ["int", "float", "double", "char", "long", "short"];

impl Program {
    pub fn parse(file: &str, source: &str) -> Self {
        let mut program = Program {
            file: file.to_string(),
            ..Program::default()
        };
        let mut depth: i64 = 0;
        let mut function = String::new();
        let mut saw_main = false;
        let mut last_line = 0;

        for (index, raw) in source.lines().enumerate() {
            let number = index as u32 + 1;
            last_line = number;
            let code = strip_comment(raw).trim();
            if code.is_empty() || code.starts_with('#') {
                continue;
            }

            let opens = code.matches('{').count() as i64;
            let closes = code.matches('}').count() as i64;

            if depth == 0 {
                if let Some(name) = function_name(code) {
                    saw_main |= name == "main";
                    function = name;
                }
            } else if !is_brace_only(code) {
                if !code.ends_with(';') && !code.ends_with('{') && !code.ends_with('}') {
                    program.diagnostic(number, column_of_end(raw), "error", "expected ';' after statement");
                }
                program.statements.push(Statement {
                    line: ProtocolLine(number),
                    function: function.clone(),
                    action: action_for(code),
                });
            }

            depth += opens - closes;
            if depth < 0 {
                program.diagnostic(number, 1, "error", "expected declaration or statement before '}' token");
                depth = 0;
            }
        }

        if depth > 0 {
            program.diagnostic(last_line.max(1), 1, "error", "expected '}' at end of input");
        }
        if !saw_main {
            program.diagnostic(1, 1, "warning", "program has no 'main' function");
        }
        program
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.contains(": error: "))
    }

    fn diagnostic(&mut self, line: u32, column: usize, category: &str, message: &str) {
        self.diagnostics
            .push(format!("{}:{}:{}: {}: {}", self.file, line, column, category, message));
    }
}

/// Executes statements and keeps the variables they assign.
#[derive(Debug, Clone, Default)]
pub(crate) struct Machine {
    pub pc: usize,
    pub variables: Vec<Variable>,
}

impl Machine {
    /// Run the statement at `pc`; returns what it printed, if anything.
    pub fn execute(&mut self, program: &Program) -> Option<String> {
        let statement = program.statements.get(self.pc)?;
        self.pc += 1;
        match &statement.action {
            Action::Print(text) => Some(text.clone()),
            Action::Assign { name, value } => {
                match self.variables.iter_mut().find(|v| &v.name == name) {
                    Some(existing) => existing.value = value.clone(),
                    None => self.variables.push(Variable::new(name.clone(), value.clone())),
                }
                None
            }
            Action::Other => None,
        }
    }

    pub fn finished(&self, program: &Program) -> bool {
        self.pc >= program.statements.len()
    }

    pub fn current<'p>(&self, program: &'p Program) -> Option<&'p Statement> {
        program.statements.get(self.pc)
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(at) if !line[..at].contains('"') => &line[..at],
        _ => line,
    }
}

fn is_brace_only(code: &str) -> bool {
    code.chars().all(|c| c == '{' || c == '}' || c == ';' || c.is_whitespace())
}

fn column_of_end(raw: &str) -> usize {
    raw.trim_end().chars().count().max(1)
}

/// `int main(void) {` -> `main`
fn function_name(code: &str) -> Option<String> {
    let open = code.find('(')?;
    if !code[open..].contains(')') {
        return None;
    }
    let head = code[..open].trim();
    let name = head.rsplit(|c: char| c.is_whitespace() || c == '*').next()?;
    if head == name || !is_identifier(name) {
        return None;
    }
    Some(name.to_string())
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn action_for(code: &str) -> Action {
    if let Some(text) = print_literal(code) {
        return Action::Print(text);
    }
    if let Some((name, value)) = assignment(code) {
        return Action::Assign { name, value };
    }
    Action::Other
}

fn print_literal(code: &str) -> Option<String> {
    let args = code.strip_prefix("printf")?.trim_start().strip_prefix('(')?;
    let start = args.find('"')?;
    let end = args.rfind('"')?;
    if end <= start {
        return None;
    }
    Some(
        args[start + 1..end]
            .replace("\\n", "\n")
            .replace("\\t", "\t")
            .replace("\\\"", "\""),
    )
}

fn assignment(code: &str) -> Option<(String, String)> {
    let statement = code.strip_suffix(';')?;
    let (lhs, rhs) = statement.split_once('=')?;
    if rhs.starts_with('=') || lhs.ends_with(['!', '<', '>']) {
        return None;
    }
    let mut words = lhs.split_whitespace();
    let name = match (words.next(), words.next(), words.next()) {
        (Some(ty), Some(name), None) if TYPES.contains(&ty) => name,
        (Some(name), None, None) => name,
        _ => return None,
    };
    if !is_identifier(name) {
        return None;
    }
    Some((name.to_string(), rhs.trim().to_string()))
}
