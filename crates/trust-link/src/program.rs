//! Structured Text program validation.
//!
//! A shallow, declaration-level check of a `.st` source file. It verifies
//! that program units and `VAR` blocks are balanced and that every
//! declaration has the `name : TYPE [:= init];` shape, then collects the
//! variables declared by `PROGRAM` units. Those names are what the hub
//! subscribes to when a program is opened for watching.

#![allow(missing_docs)]

use std::fmt;
use std::path::Path;

use indexmap::IndexSet;
use logos::Logos;
use smol_str::SmolStr;

fn lex_block_comment(lex: &mut logos::Lexer<StToken>) -> bool {
    let mut depth = 1usize;
    let bytes = lex.remainder().as_bytes();
    let mut i = 0usize;

    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'(', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b')') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    lex.bump(i);
                    return true;
                }
            }
            _ => i += 1,
        }
    }

    lex.bump(bytes.len());
    false
}

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
enum StToken {
    #[regex(r"[ \t\r\n\f]+")]
    Whitespace,

    #[regex(r"//[^\r\n]*")]
    LineComment,

    #[token("(*", lex_block_comment)]
    BlockComment,

    #[regex(r"\{[^}]*\}")]
    Pragma,

    #[token(";")]
    Semicolon,

    #[token(":")]
    Colon,

    #[token(":=")]
    Assign,

    #[token(",")]
    Comma,

    #[token("PROGRAM", ignore(ascii_case))]
    KwProgram,

    #[token("END_PROGRAM", ignore(ascii_case))]
    KwEndProgram,

    #[token("FUNCTION_BLOCK", ignore(ascii_case))]
    KwFunctionBlock,

    #[token("END_FUNCTION_BLOCK", ignore(ascii_case))]
    KwEndFunctionBlock,

    #[token("FUNCTION", ignore(ascii_case))]
    KwFunction,

    #[token("END_FUNCTION", ignore(ascii_case))]
    KwEndFunction,

    #[token("VAR", ignore(ascii_case))]
    #[token("VAR_INPUT", ignore(ascii_case))]
    #[token("VAR_OUTPUT", ignore(ascii_case))]
    #[token("VAR_IN_OUT", ignore(ascii_case))]
    #[token("VAR_TEMP", ignore(ascii_case))]
    #[token("VAR_GLOBAL", ignore(ascii_case))]
    #[token("VAR_EXTERNAL", ignore(ascii_case))]
    KwVar,

    #[token("END_VAR", ignore(ascii_case))]
    KwEndVar,

    #[token("CONSTANT", ignore(ascii_case))]
    #[token("RETAIN", ignore(ascii_case))]
    #[token("NON_RETAIN", ignore(ascii_case))]
    #[token("PERSISTENT", ignore(ascii_case))]
    Qualifier,

    #[token("AT", ignore(ascii_case))]
    KwAt,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,

    #[regex(r"[0-9][0-9A-Za-z_.#]*")]
    Number,

    #[regex(r"'[^'\r\n]*'")]
    #[regex(r#""[^"\r\n]*""#)]
    StringLiteral,

    #[regex(r"%[IQM][XBWDL]?[0-9]+(\.[0-9]+)*")]
    DirectAddress,

    #[regex(r"[\[\]().+\-*/<>=#^@&]|<=|>=|<>|=>|\*\*|\.\.")]
    Punct,
}

impl StToken {
    fn is_trivia(self) -> bool {
        matches!(
            self,
            Self::Whitespace | Self::LineComment | Self::BlockComment | Self::Pragma
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// 1-based source line.
    pub line: u32,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}: {}", self.line, self.severity, self.message)
    }
}

/// Declarations extracted from a valid program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramAst {
    namespace: SmolStr,
    programs: Vec<SmolStr>,
    variables: IndexSet<SmolStr>,
}

impl ProgramAst {
    /// Variables declared in `PROGRAM` units, in declaration order.
    #[must_use]
    pub fn watch_list(&self) -> Vec<SmolStr> {
        self.variables.iter().cloned().collect()
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.namespace.as_str()
    }

    #[must_use]
    pub fn programs(&self) -> &[SmolStr] {
        &self.programs
    }
}

/// Validator result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
    /// Present only when `success` is true.
    pub ast: Option<ProgramAst>,
}

impl CompileOutput {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.severity == Severity::Error)
    }
}

/// Namespace tag for a source file: its file name with dots replaced by `-`.
#[must_use]
pub fn namespace_for_path(path: &Path) -> SmolStr {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| SmolStr::from(name.replace('.', "-")))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| SmolStr::new("program"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    Program,
    FunctionBlock,
    Function,
}

impl UnitKind {
    fn keyword(self) -> &'static str {
        match self {
            Self::Program => "PROGRAM",
            Self::FunctionBlock => "FUNCTION_BLOCK",
            Self::Function => "FUNCTION",
        }
    }

    fn end_keyword(self) -> &'static str {
        match self {
            Self::Program => "END_PROGRAM",
            Self::FunctionBlock => "END_FUNCTION_BLOCK",
            Self::Function => "END_FUNCTION",
        }
    }
}

#[derive(Debug)]
struct Unit {
    kind: UnitKind,
    line: u32,
}

#[derive(Debug, Clone, Copy)]
struct Lexeme<'src> {
    kind: StToken,
    text: &'src str,
    line: u32,
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(offset, _)| offset + 1))
            .collect();
        Self { starts }
    }

    fn line(&self, offset: usize) -> u32 {
        let line = self.starts.partition_point(|start| *start <= offset);
        u32::try_from(line).unwrap_or(u32::MAX)
    }
}

#[derive(Default)]
struct Validator<'src> {
    diagnostics: Vec<Diagnostic>,
    units: Vec<Unit>,
    programs: Vec<SmolStr>,
    variables: IndexSet<SmolStr>,
    var_block: Option<u32>,
    declaration: Vec<Lexeme<'src>>,
    expect_unit_name: Option<UnitKind>,
}

/// Validate `source` and collect its watchable variables.
#[must_use]
pub fn validate(namespace: &str, source: &str) -> CompileOutput {
    let index = LineIndex::new(source);
    let mut validator = Validator::default();
    let mut lexer = StToken::lexer(source);
    while let Some(token) = lexer.next() {
        let span = lexer.span();
        let line = index.line(span.start);
        let text = lexer.slice();
        match token {
            Ok(kind) if kind.is_trivia() => {}
            Ok(kind) => validator.token(Lexeme { kind, text, line }),
            Err(()) if text.starts_with("(*") => {
                validator.error(line, "unterminated comment");
            }
            Err(()) => validator.error(line, format!("unexpected character `{text}`")),
        }
    }
    let last_line = index.line(source.len());
    validator.finish(last_line);

    let Validator {
        diagnostics,
        programs,
        variables,
        ..
    } = validator;
    let success = diagnostics
        .iter()
        .all(|diagnostic| diagnostic.severity != Severity::Error);
    let ast = success.then(|| ProgramAst {
        namespace: SmolStr::new(namespace),
        programs,
        variables,
    });
    CompileOutput {
        success,
        diagnostics,
        ast,
    }
}

impl<'src> Validator<'src> {
    fn error(&mut self, line: u32, message: impl Into<String>) {
        self.push(line, Severity::Error, message);
    }

    fn push(&mut self, line: u32, severity: Severity, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            line,
            severity,
            message: message.into(),
        });
    }

    fn token(&mut self, lexeme: Lexeme<'src>) {
        if let Some(kind) = self.expect_unit_name.take() {
            if lexeme.kind == StToken::Ident {
                if kind == UnitKind::Program {
                    self.programs.push(SmolStr::new(lexeme.text));
                }
                return;
            }
            self.error(
                lexeme.line,
                format!("expected a name after `{}`", kind.keyword()),
            );
        }
        if self.var_block.is_some() {
            self.var_token(lexeme);
            return;
        }
        match lexeme.kind {
            StToken::KwProgram => self.open_unit(UnitKind::Program, lexeme.line),
            StToken::KwFunctionBlock => self.open_unit(UnitKind::FunctionBlock, lexeme.line),
            StToken::KwFunction => self.open_unit(UnitKind::Function, lexeme.line),
            StToken::KwEndProgram => self.close_unit(UnitKind::Program, lexeme.line),
            StToken::KwEndFunctionBlock => self.close_unit(UnitKind::FunctionBlock, lexeme.line),
            StToken::KwEndFunction => self.close_unit(UnitKind::Function, lexeme.line),
            StToken::KwVar => {
                if self.units.is_empty() {
                    self.error(lexeme.line, "`VAR` block outside of a program unit");
                }
                self.var_block = Some(lexeme.line);
            }
            StToken::KwEndVar => self.error(lexeme.line, "`END_VAR` without a matching `VAR`"),
            _ if self.units.is_empty() => {
                self.error(
                    lexeme.line,
                    format!("unexpected `{}` outside of a program unit", lexeme.text),
                );
            }
            _ => {}
        }
    }

    fn open_unit(&mut self, kind: UnitKind, line: u32) {
        if let Some(outer) = self.units.last() {
            self.error(
                line,
                format!(
                    "`{}` inside `{}` opened on line {}",
                    kind.keyword(),
                    outer.kind.keyword(),
                    outer.line
                ),
            );
        }
        self.units.push(Unit { kind, line });
        self.expect_unit_name = Some(kind);
    }

    fn close_unit(&mut self, kind: UnitKind, line: u32) {
        match self.units.pop() {
            Some(unit) if unit.kind == kind => {}
            Some(unit) => self.error(
                line,
                format!(
                    "`{}` does not close `{}` opened on line {}",
                    kind.end_keyword(),
                    unit.kind.keyword(),
                    unit.line
                ),
            ),
            None => self.error(
                line,
                format!("`{}` without a matching `{}`", kind.end_keyword(), kind.keyword()),
            ),
        }
    }

    fn var_token(&mut self, lexeme: Lexeme<'src>) {
        match lexeme.kind {
            StToken::KwEndVar => {
                if let Some(first) = self.declaration.first() {
                    let line = first.line;
                    self.error(line, "declaration is missing a terminating `;`");
                    self.declaration.clear();
                }
                self.var_block = None;
            }
            StToken::Qualifier if self.declaration.is_empty() => {}
            StToken::KwProgram
            | StToken::KwEndProgram
            | StToken::KwFunctionBlock
            | StToken::KwEndFunctionBlock
            | StToken::KwFunction
            | StToken::KwEndFunction
            | StToken::KwVar => {
                let opened = self.var_block.unwrap_or(lexeme.line);
                self.error(
                    lexeme.line,
                    format!("`{}` before `END_VAR` of the block opened on line {opened}", lexeme.text),
                );
                self.declaration.clear();
                self.var_block = None;
                self.token(lexeme);
            }
            StToken::Semicolon => {
                let declaration = std::mem::take(&mut self.declaration);
                self.declaration(&declaration, lexeme.line);
            }
            _ => self.declaration.push(lexeme),
        }
    }

    /// Check `name[, name] [AT addr] : TYPE [:= init]` and record its names.
    fn declaration(&mut self, tokens: &[Lexeme<'src>], end_line: u32) {
        let Some(first) = tokens.first() else {
            return;
        };
        let line = first.line;
        let Some(colon) = tokens.iter().position(|token| token.kind == StToken::Colon) else {
            self.error(line, "expected `name : TYPE;` declaration");
            return;
        };
        let (head, rest) = tokens.split_at(colon);
        let type_tokens = rest[1..]
            .iter()
            .take_while(|token| token.kind != StToken::Assign)
            .count();
        if type_tokens == 0 {
            self.error(end_line, "declaration is missing a type");
            return;
        }
        let names_end = head
            .iter()
            .position(|token| token.kind == StToken::KwAt)
            .unwrap_or(head.len());
        let mut names = Vec::new();
        let mut expect_name = true;
        for token in &head[..names_end] {
            match (token.kind, expect_name) {
                (StToken::Ident, true) => {
                    names.push(SmolStr::new(token.text));
                    expect_name = false;
                }
                (StToken::Comma, false) => expect_name = true,
                _ => {
                    self.error(
                        token.line,
                        format!("unexpected `{}` in declaration", token.text),
                    );
                    return;
                }
            }
        }
        if names.is_empty() || expect_name {
            self.error(line, "declaration is missing a variable name");
            return;
        }
        let in_program = self
            .units
            .last()
            .is_some_and(|unit| unit.kind == UnitKind::Program);
        if in_program {
            for name in names {
                if !self.variables.insert(name.clone()) {
                    self.push(
                        line,
                        Severity::Warning,
                        format!("variable `{name}` is declared more than once"),
                    );
                }
            }
        }
    }

    fn finish(&mut self, last_line: u32) {
        if let Some(kind) = self.expect_unit_name.take() {
            self.error(
                last_line,
                format!("expected a name after `{}`", kind.keyword()),
            );
        }
        if let Some(opened) = self.var_block.take() {
            self.error(opened, "`VAR` block is never closed with `END_VAR`");
        }
        while let Some(unit) = self.units.pop() {
            self.error(
                unit.line,
                format!(
                    "`{}` is never closed with `{}`",
                    unit.kind.keyword(),
                    unit.kind.end_keyword()
                ),
            );
        }
        self.diagnostics.sort_by_key(|diagnostic| diagnostic.line);
        if self.programs.is_empty() {
            self.push(
                last_line,
                Severity::Warning,
                "no `PROGRAM` found; nothing to watch",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    fn render(output: &CompileOutput) -> String {
        output
            .diagnostics
            .iter()
            .map(|diagnostic| format!("{diagnostic}\n"))
            .collect()
    }

    #[test]
    fn collects_program_variables() {
        let source = "\
(* conveyor (* nested *) *)
PROGRAM Main
VAR
    Counter : INT := 0;
    Speed, Level : REAL;
    Lamp AT %QX0.0 : BOOL;
END_VAR
VAR RETAIN
    Total : DINT;
END_VAR
Counter := Counter + 1; // step
END_PROGRAM
";
        let output = validate("main-st", source);
        assert!(output.success, "{:?}", output.diagnostics);
        assert!(output.diagnostics.is_empty());
        let ast = output.ast.unwrap();
        assert_eq!(ast.namespace(), "main-st");
        assert_eq!(ast.programs(), ["Main"]);
        assert_eq!(
            ast.watch_list(),
            ["Counter", "Speed", "Level", "Lamp", "Total"]
        );
    }

    #[test]
    fn function_block_locals_are_not_watched() {
        let source = "\
FUNCTION_BLOCK Blink
VAR_INPUT
    Enable : BOOL;
END_VAR
END_FUNCTION_BLOCK

program Main
var
    Blinker : Blink;
end_var
end_program
";
        let output = validate("blink-st", source);
        assert!(output.success);
        assert_eq!(output.ast.unwrap().watch_list(), ["Blinker"]);
    }

    #[test]
    fn reports_structural_errors() {
        let source = "\
PROGRAM Main
VAR
    Counter INT;
    Speed : ;
    Level : REAL
END_VAR
END_FUNCTION_BLOCK
";
        let output = validate("main-st", source);
        assert!(!output.success);
        assert!(output.ast.is_none());
        expect![[r#"
            line 3: error: expected `name : TYPE;` declaration
            line 4: error: declaration is missing a type
            line 5: error: declaration is missing a terminating `;`
            line 7: error: `END_FUNCTION_BLOCK` does not close `PROGRAM` opened on line 1
        "#]]
        .assert_eq(&render(&output));
    }

    #[test]
    fn keyword_inside_var_block_and_open_comment() {
        let output = validate("x", "PROGRAM P\nVAR\n  a : INT;\nEND_PROGRAM\n(* open");
        assert!(!output.success);
        expect![[r#"
            line 4: `END_PROGRAM` before `END_VAR` of the block opened on line 2
            line 5: unterminated comment
        "#]]
        .assert_eq(
            &output
                .errors()
                .map(|diagnostic| format!("line {}: {}\n", diagnostic.line, diagnostic.message))
                .collect::<String>(),
        );
    }

    #[test]
    fn source_without_program_warns() {
        let output = validate("lib-st", "FUNCTION_BLOCK F\nEND_FUNCTION_BLOCK\n");
        assert!(output.success);
        assert_eq!(output.diagnostics.len(), 1);
        assert_eq!(output.diagnostics[0].severity, Severity::Warning);
        assert!(output.ast.unwrap().watch_list().is_empty());
    }

    #[test]
    fn namespace_from_file_name() {
        assert_eq!(namespace_for_path(Path::new("main.st")), "main-st");
        assert_eq!(
            namespace_for_path(Path::new("/plant/line.one.st")),
            "line-one-st"
        );
        assert_eq!(namespace_for_path(Path::new("/")), "program");
    }
}
