//! The checked-script compiler.
//!
//! Every action compiles to one or more [Fragment]s: a label plus an ordered list of shell
//! statements. When rendered, each statement is followed by an exit-status test; the first failing
//! statement prints `<label> failed: <statement>` to stderr and ends the fragment. Fragments are
//! then grouped into [Segment]s (one remote `sh` invocation each) and interleaved with uploads and
//! controller-side commands to form a [HostScript].
//!
//! Compilation is pure: the same inputs always render to byte-identical text.

use crate::core::context::ExecMode;
use regex::Regex;
use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Quotes `word` for a POSIX shell, leaving it untouched if no quoting is needed.
///
/// NUL bytes cannot be represented in a shell word and are removed.
pub fn quote(word: &str) -> Cow<'_, str> {
    match shlex::try_quote(word) {
        Ok(quoted) => quoted,
        Err(_) => {
            let stripped: String = word.chars().filter(|c| *c != '\0').collect();
            Cow::Owned(
                shlex::try_quote(&stripped)
                    .map(Cow::into_owned)
                    .unwrap_or_default(),
            )
        }
    }
}

/// Wraps `text` in double quotes, escaping everything the shell would expand.
pub fn double_quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    push_double_quoted(&mut out, text);
    out.push('"');
    out
}

fn push_double_quoted(out: &mut String, text: &str) {
    for c in text.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        if c != '\0' {
            out.push(c);
        }
    }
}

/// A labeled, fail-fast sequence of shell statements.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    label: String,
    statements: Vec<String>,
}

/// Builds a [Fragment] from plain shell statements.
///
/// Trailing semicolons and white space are dropped from each statement; the renderer supplies its
/// own terminators.
pub fn checked<I, S>(label: impl Into<String>, statements: I) -> Fragment
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Fragment {
        label: label.into(),
        statements: statements
            .into_iter()
            .map(|s| tidy(&s.into()))
            .filter(|s| !s.is_empty())
            .collect(),
    }
}

/// Builds a [Fragment] from control-flow [Form]s. Each top-level form is one checked statement.
pub fn checked_from_script<I>(label: impl Into<String>, forms: I) -> Fragment
where
    I: IntoIterator<Item = Form>,
{
    let label = label.into();
    let statements: Vec<String> = forms.into_iter().map(|form| form.render(&label)).collect();
    checked(label, statements)
}

fn tidy(statement: &str) -> String {
    statement
        .trim()
        .trim_end_matches(';')
        .trim_end()
        .to_owned()
}

/// `printf` that writes `message` and a newline.
fn announce(message: &str) -> String {
    format!("printf '%s\\n' {}", quote(message))
}

/// The handler that runs when a statement in a fragment labeled `label` fails.
fn failure(label: &str, statement: &str) -> String {
    let shown = match statement.split_once('\n') {
        Some((first, _)) => format!("{first} ..."),
        None => statement.to_owned(),
    };
    format!(
        "{{ {} >&2; exit 1; }}",
        announce(&format!("{label} failed: {shown}"))
    )
}

impl Fragment {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Renders the fragment as shell text.
    pub fn render(&self) -> String {
        let mut out = announce(&format!("{}...", self.label));
        out.push('\n');
        for statement in &self.statements {
            let on_failure = failure(&self.label, statement);
            if statement.contains('\n') {
                out += &format!("{{\n{statement}\n}} || {on_failure}\n");
            } else {
                out += &format!("{{ {statement}; }} || {on_failure}\n");
            }
        }
        out += &announce(&format!("{}...done", self.label));
        out.push('\n');
        out
    }
}

/// One word of a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Word {
    /// Literal text, quoted as needed.
    Literal(String),

    /// A shell variable reference, rendered as `"$name"`.
    Var(String),

    /// Text with embedded `${name}` references, rendered inside double quotes.
    Interpolated(Vec<Piece>),
}

/// Part of an [Word::Interpolated] word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Piece {
    Text(String),
    Var(String),
}

impl Word {
    pub fn lit(text: impl Into<String>) -> Self {
        Word::Literal(text.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Word::Var(name.into())
    }

    /// Parses `template`, treating each `${name}` as a variable reference.
    pub fn interpolate(template: &str) -> Self {
        static VAR: OnceLock<Regex> = OnceLock::new();
        let regex = VAR.get_or_init(|| {
            Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("variable pattern is valid")
        });

        let mut pieces = vec![];
        let mut last = 0;
        for captures in regex.captures_iter(template) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if whole.start() > last {
                pieces.push(Piece::Text(template[last..whole.start()].to_owned()));
            }
            pieces.push(Piece::Var(name.as_str().to_owned()));
            last = whole.end();
        }
        if last < template.len() {
            pieces.push(Piece::Text(template[last..].to_owned()));
        }
        Word::Interpolated(pieces)
    }

    pub fn render(&self) -> String {
        match self {
            Word::Literal(text) => quote(text).into_owned(),
            Word::Var(name) => format!("\"${name}\""),
            Word::Interpolated(pieces) => {
                let mut out = String::from('"');
                for piece in pieces {
                    match piece {
                        Piece::Text(text) => push_double_quoted(&mut out, text),
                        Piece::Var(name) => out += &format!("${{{name}}}"),
                    }
                }
                out.push('"');
                out
            }
        }
    }
}

impl From<&str> for Word {
    fn from(text: &str) -> Self {
        Word::lit(text)
    }
}

impl From<String> for Word {
    fn from(text: String) -> Self {
        Word::Literal(text)
    }
}

fn render_words(words: &[Word]) -> String {
    words.iter().map(Word::render).collect::<Vec<_>>().join(" ")
}

/// Higher-level shell constructs accepted by [checked_from_script].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Form {
    /// A statement used verbatim.
    Raw(String),

    /// A simple command.
    Exec(Vec<Word>),

    /// `var=value`
    Set { var: String, value: Word },

    If {
        test: Test,
        then: Vec<Form>,
        otherwise: Vec<Form>,
    },

    /// A loop over a fixed list of words.
    For {
        var: String,
        items: Vec<Word>,
        body: Vec<Form>,
    },
}

impl Form {
    pub fn raw(statement: impl Into<String>) -> Self {
        Form::Raw(statement.into())
    }

    pub fn exec<I, W>(words: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: Into<Word>,
    {
        Form::Exec(words.into_iter().map(Into::into).collect())
    }

    pub fn when(test: Test, then: Vec<Form>) -> Self {
        Form::If {
            test,
            then,
            otherwise: vec![],
        }
    }

    fn render(&self, label: &str) -> String {
        match self {
            Form::Raw(statement) => tidy(statement),
            Form::Exec(words) => render_words(words),
            Form::Set { var, value } => format!("{var}={}", value.render()),
            Form::If {
                test,
                then,
                otherwise,
            } => {
                let mut out = format!("if {}; then\n{}\n", test.render(), block(then, label));
                if !otherwise.is_empty() {
                    out += &format!("else\n{}\n", block(otherwise, label));
                }
                out + "fi"
            }
            Form::For { var, items, body } => {
                let head = format!("for {var} in {}", render_words(items));
                let guarded = format!(
                    "{{\n{}\n}} || {}",
                    block(body, label),
                    failure(label, &head)
                );
                format!("{head}; do\n{}\ndone", indent(&guarded))
            }
        }
    }
}

/// Renders nested forms so that the first failure ends the block with a non-zero status.
fn block(forms: &[Form], label: &str) -> String {
    if forms.is_empty() {
        return indent(":");
    }
    let body = forms
        .iter()
        .map(|form| form.render(label))
        .collect::<Vec<_>>()
        .join(" &&\n");
    indent(&body)
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Conditions for [Form::If].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Test {
    Exists(Word),
    File(Word),
    Dir(Word),
    Symlink(Word),
    Pipe(Word),
    Equal(Word, Word),

    /// A command run for its exit status alone, with its output discarded.
    Quiet(Vec<Word>),

    Raw(String),
    Not(Box<Test>),
    And(Box<Test>, Box<Test>),
    Or(Box<Test>, Box<Test>),
}

impl Test {
    pub fn quiet<I, W>(words: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: Into<Word>,
    {
        Test::Quiet(words.into_iter().map(Into::into).collect())
    }

    pub fn not(test: Test) -> Self {
        Test::Not(Box::new(test))
    }

    pub fn and(self, other: Test) -> Self {
        Test::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Test) -> Self {
        Test::Or(Box::new(self), Box::new(other))
    }

    pub fn render(&self) -> String {
        use Test::*;
        match self {
            Exists(path) => format!("[ -e {} ]", path.render()),
            File(path) => format!("[ -f {} ]", path.render()),
            Dir(path) => format!("[ -d {} ]", path.render()),
            Symlink(path) => format!("[ -L {} ]", path.render()),
            Pipe(path) => format!("[ -p {} ]", path.render()),
            Equal(left, right) => format!("[ {} = {} ]", left.render(), right.render()),
            Quiet(words) => format!("{} >/dev/null 2>&1", render_words(words)),
            Raw(test) => test.clone(),
            Not(test) => format!("! {}", test.operand()),
            And(left, right) => format!("{} && {}", left.operand(), right.operand()),
            Or(left, right) => format!("{} || {}", left.operand(), right.operand()),
        }
    }

    fn operand(&self) -> String {
        match self {
            Test::And(..) | Test::Or(..) => format!("{{ {}; }}", self.render()),
            _ => self.render(),
        }
    }
}

/// Fragments that run in one remote `sh` invocation with the same privileges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub mode: ExecMode,

    /// The `sudo` target in [ExecMode::Privileged]. Ignored otherwise.
    pub user: String,

    pub fragments: Vec<Fragment>,
}

impl Segment {
    pub fn new(mode: ExecMode, user: impl Into<String>) -> Self {
        Segment {
            mode,
            user: user.into(),
            fragments: vec![],
        }
    }

    /// Whether a fragment compiled under `mode` and `user` can join this segment.
    pub fn accepts(&self, mode: ExecMode, user: &str) -> bool {
        self.mode == mode && (mode == ExecMode::Unprivileged || self.user == user)
    }

    /// Renders the segment as a standalone `sh` script.
    ///
    /// Each fragment runs in its own subshell, so a failure ends that fragment only. The script
    /// exits non-zero if any fragment failed.
    pub fn render(&self) -> String {
        let mut out = String::from("#!/bin/sh\ncairn_status=0\n");
        for fragment in &self.fragments {
            out += &format!("(\n{}) || cairn_status=1\n", fragment.render());
        }
        out += "exit $cairn_status\n";
        out
    }

    /// The remote command line, minus the script itself, that runs this segment.
    pub fn command(&self) -> Vec<String> {
        let mut argv = vec![];
        if self.mode == ExecMode::Privileged {
            argv.extend(["sudo", "-n", "-u", self.user.as_str()].map(str::to_owned));
        }
        argv.extend(["sh", "-c"].map(str::to_owned));
        argv
    }

    pub fn labels(&self) -> Vec<&str> {
        self.fragments.iter().map(Fragment::label).collect()
    }
}

/// One unit of work against a host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Remote(Segment),

    /// Copy a controller-side file to the host as the login user.
    Upload { from: PathBuf, to: String },

    /// A fragment that runs on the controller.
    Local(Fragment),
}

impl Step {
    /// A one-line description of the step for user output.
    pub fn title(&self) -> String {
        match self {
            Step::Remote(segment) => {
                let who = match segment.mode {
                    ExecMode::Privileged => format!("sudo {}", segment.user),
                    ExecMode::Unprivileged => "login user".to_owned(),
                };
                format!("script ({who}): {}", segment.labels().join(", "))
            }
            Step::Upload { from, to } => format!("upload: {} -> {to}", from.display()),
            Step::Local(fragment) => format!("local: {}", fragment.label()),
        }
    }
}

/// Everything that runs on one host, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostScript {
    pub host: String,
    pub steps: Vec<Step>,
}

impl HostScript {
    /// All remote fragments, in order.
    pub fn fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.steps.iter().flat_map(|step| match step {
            Step::Remote(segment) => segment.fragments.iter().collect::<Vec<_>>(),
            _ => vec![],
        })
    }

    /// Renders every step for review on the controller.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            out += &format!("# [{}] step {}: {}\n", self.host, i + 1, step.title());
            match step {
                Step::Remote(segment) => out += &segment.render(),
                Step::Upload { .. } => (),
                Step::Local(fragment) => out += &fragment.render(),
            }
        }
        out
    }
}
