//! Dockerfile instruction documents.
//!
//! A document is the ordered list of instructions in a Dockerfile. Each
//! instruction keeps its source text verbatim, so rendering a document that
//! was never modified reproduces the input exactly. Comment and blank lines
//! are kept as trivia attached to the instruction that follows them.

use thiserror::Error;

/// Default escape character.
pub const DEFAULT_ESCAPE: char = '\\';

/// UTF-8 byte order mark.
const BOM: char = '\u{feff}';

/// Instructions that may carry heredoc bodies.
const HEREDOC_KINDS: [&str; 3] = ["RUN", "COPY", "ADD"];

/// Error splitting a Dockerfile into instructions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A line that should start an instruction does not.
    #[error("line {line}: invalid instruction '{token}'")]
    InvalidInstruction {
        /// 1-based line number.
        line: usize,
        /// The offending token.
        token: String,
    },

    /// A heredoc was never closed.
    #[error("line {line}: unterminated heredoc '{delimiter}'")]
    UnterminatedHeredoc {
        /// 1-based line number of the instruction.
        line: usize,
        /// The missing terminator.
        delimiter: String,
    },

    /// An unsupported escape parser directive.
    #[error("line {line}: invalid escape directive '{value}'")]
    InvalidEscape {
        /// 1-based line number.
        line: usize,
        /// The directive value.
        value: String,
    },
}

/// One Dockerfile instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Upper-cased directive keyword (e.g. `FROM`).
    pub kind: String,
    /// Source text including the keyword, continuation lines and heredoc bodies.
    pub original_text: String,
    /// First physical line (1-based).
    pub start_line: usize,
    /// Last physical line (1-based).
    pub end_line: usize,
    /// Comment and blank lines preceding the instruction.
    pub leading_trivia: Vec<String>,
}

impl Instruction {
    /// Create an instruction with no surrounding trivia.
    pub fn new(kind: impl Into<String>, text: impl Into<String>, start_line: usize, end_line: usize) -> Self {
        Self {
            kind: kind.into(),
            original_text: text.into(),
            start_line,
            end_line,
            leading_trivia: Vec::new(),
        }
    }

    /// Whether the directive contains `keyword` (case-sensitive substring match).
    #[must_use]
    pub fn is(&self, keyword: &str) -> bool {
        self.kind.contains(keyword)
    }

    /// Everything after the directive keyword, with continuations joined.
    #[must_use]
    pub fn arguments(&self, escape: char) -> String {
        let logical = logical_text(&self.original_text, escape);
        let trimmed = logical.trim_start();
        let keyword_len = trimmed
            .find(char::is_whitespace)
            .unwrap_or(trimmed.len());
        trimmed[keyword_len..].trim().to_string()
    }
}

/// An ordered sequence of Dockerfile instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionDocument {
    instructions: Vec<Instruction>,
    trailing_trivia: Vec<String>,
    escape: char,
}

impl Default for InstructionDocument {
    fn default() -> Self {
        Self {
            instructions: Vec::new(),
            trailing_trivia: Vec::new(),
            escape: DEFAULT_ESCAPE,
        }
    }
}

impl InstructionDocument {
    /// Split Dockerfile source into instructions.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for lines that do not start with a directive,
    /// unterminated heredocs, and unsupported escape directives.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let mut lines: Vec<&str> = source.split('\n').collect();
        if lines.last() == Some(&"") {
            lines.pop();
        }

        let mut doc = Self::default();
        let mut trivia = Vec::new();
        let mut directives_open = true;
        let mut i = 0;

        while i < lines.len() {
            let line = lines[i];
            // A byte order mark stays in the source text but is not part of the directive.
            let trimmed = if i == 0 {
                line.trim_start_matches(BOM).trim()
            } else {
                line.trim()
            };

            if trimmed.is_empty() || trimmed.starts_with('#') {
                if directives_open {
                    directives_open = doc.parser_directive(trimmed, i + 1)?;
                }
                trivia.push(line.to_string());
                i += 1;
                continue;
            }
            directives_open = false;

            let token = trimmed
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .trim_end_matches(doc.escape);
            if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ParseError::InvalidInstruction {
                    line: i + 1,
                    token: token.to_string(),
                });
            }
            let kind = token.to_ascii_uppercase();

            let start = i;
            let mut end = i;
            let mut continues = ends_with_escape(line, doc.escape);
            while continues && end + 1 < lines.len() {
                end += 1;
                let next = lines[end].trim();
                if next.is_empty() || next.starts_with('#') {
                    continue;
                }
                continues = ends_with_escape(lines[end], doc.escape);
            }

            if HEREDOC_KINDS.contains(&kind.as_str()) {
                let logical = logical_text(&lines[start..=end].join("\n"), doc.escape);
                for heredoc in heredocs(&logical) {
                    end = heredoc_end(&lines, end, &heredoc).ok_or_else(|| {
                        ParseError::UnterminatedHeredoc {
                            line: start + 1,
                            delimiter: heredoc.delimiter.clone(),
                        }
                    })?;
                }
            }

            doc.instructions.push(Instruction {
                kind,
                original_text: lines[start..=end].join("\n"),
                start_line: start + 1,
                end_line: end + 1,
                leading_trivia: std::mem::take(&mut trivia),
            });
            i = end + 1;
        }

        doc.trailing_trivia = trivia;
        Ok(doc)
    }

    /// Handle a comment line while parser directives are still allowed.
    ///
    /// Returns whether further directives may follow.
    fn parser_directive(&mut self, trimmed: &str, line: usize) -> Result<bool, ParseError> {
        let Some(body) = trimmed.strip_prefix('#') else {
            return Ok(false);
        };
        let Some((key, value)) = body.split_once('=') else {
            return Ok(false);
        };
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Ok(false);
        }

        if key.eq_ignore_ascii_case("escape") {
            self.escape = match value.trim() {
                "\\" => '\\',
                "`" => '`',
                other => {
                    return Err(ParseError::InvalidEscape {
                        line,
                        value: other.to_string(),
                    });
                }
            };
        }
        Ok(true)
    }

    /// Escape character in effect for this document.
    #[must_use]
    pub const fn escape(&self) -> char {
        self.escape
    }

    /// All instructions in file order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the document has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Index of the first instruction whose directive contains `keyword`.
    #[must_use]
    pub fn find_first(&self, keyword: &str) -> Option<usize> {
        self.instructions.iter().position(|i| i.is(keyword))
    }

    /// Last physical line covered by an instruction, or 0 for an empty document.
    #[must_use]
    pub fn last_line(&self) -> usize {
        self.instructions.last().map_or(0, |i| i.end_line)
    }

    /// Append an instruction after the last one. Returns its index.
    pub fn append(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    /// Replace the text of an existing instruction.
    ///
    /// Returns `None` if `index` is out of range.
    pub fn rewrite(&mut self, index: usize, text: impl Into<String>) -> Option<&Instruction> {
        let instruction = self.instructions.get_mut(index)?;
        instruction.original_text = text.into();
        Some(instruction)
    }

    /// Render the document back to Dockerfile text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for instruction in &self.instructions {
            for line in &instruction.leading_trivia {
                out.push_str(line);
                out.push('\n');
            }
            out.push_str(&instruction.original_text);
            out.push('\n');
        }
        for line in &self.trailing_trivia {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

fn ends_with_escape(line: &str, escape: char) -> bool {
    line.trim_end().ends_with(escape)
}

/// Join continuation lines, dropping escapes and interleaved comments.
fn logical_text(text: &str, escape: char) -> String {
    let mut out = String::new();
    for (n, line) in text.split('\n').enumerate() {
        let trimmed = line.trim();
        if n > 0 && (trimmed.is_empty() || trimmed.starts_with('#')) {
            continue;
        }
        let line = line.trim_end();
        match line.strip_suffix(escape) {
            Some(head) => out.push_str(head),
            None => out.push_str(line),
        }
    }
    out
}

#[derive(Debug)]
struct Heredoc {
    delimiter: String,
    strip_tabs: bool,
}

/// Find `<<WORD`, `<<-WORD` and quoted variants in a logical instruction line.
///
/// Only words that start with `<<` outside of quotes open a heredoc, so
/// `echo "a<<b"` and `$((1<<2))` do not.
fn heredocs(logical: &str) -> Vec<Heredoc> {
    let mut found = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut word_start = true;

    for (pos, c) in logical.char_indices() {
        if escaped {
            escaped = false;
            word_start = false;
            continue;
        }
        if let Some(q) = quote {
            if c == q {
                quote = None;
            } else if c == '\\' && q == '"' {
                escaped = true;
            }
            continue;
        }

        match c {
            c if c.is_whitespace() => {
                word_start = true;
                continue;
            }
            '<' if word_start => found.extend(heredoc_word(&logical[pos..])),
            '"' | '\'' => quote = Some(c),
            '\\' => escaped = true,
            _ => {}
        }
        word_start = false;
    }
    found
}

/// Parse a word starting with `<<` as a heredoc marker.
fn heredoc_word(word: &str) -> Option<Heredoc> {
    let rest = word.strip_prefix("<<")?;
    let (strip_tabs, body) = match rest.strip_prefix('-') {
        Some(body) => (true, body),
        None => (false, rest),
    };
    let body = body.trim_start_matches(['"', '\'']);
    let delimiter: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    delimiter
        .starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        .then_some(Heredoc {
            delimiter,
            strip_tabs,
        })
}

/// Index of the line terminating `heredoc`, searching after `from`.
fn heredoc_end(lines: &[&str], from: usize, heredoc: &Heredoc) -> Option<usize> {
    (from + 1..lines.len()).find(|&n| {
        let line = lines[n].trim_end_matches('\r');
        let line = if heredoc.strip_tabs {
            line.trim_start_matches('\t')
        } else {
            line
        };
        line == heredoc.delimiter
    })
}
