//! Line splicing, comment removal and preprocessing tokens.

/// Token classes the preprocessor distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Ident,
    Number,
    /// String or character literal, quotes included.
    Literal,
    Punct,
    Space,
    Newline,
    /// Empty argument marker used while pasting.
    Placemarker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Macros that must not expand this token again.
    pub hide: Vec<String>,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            hide: Vec::new(),
        }
    }

    pub fn space() -> Self {
        Self::new(TokenKind::Space, " ")
    }

    pub fn is_space(&self) -> bool {
        matches!(self.kind, TokenKind::Space | TokenKind::Newline)
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    pub fn is_hidden(&self, name: &str) -> bool {
        self.hide.iter().any(|h| h == name)
    }

    pub fn hide_with(&mut self, hide: &[String], name: &str) {
        for h in hide.iter().map(String::as_str).chain(std::iter::once(name)) {
            if !self.is_hidden(h) {
                self.hide.push(h.to_string());
            }
        }
    }
}

const PUNCT3: [&str; 3] = ["<<=", ">>=", "..."];
const PUNCT2: [&str; 20] = [
    "##", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "++", "--", "->", "+=", "-=", "*=", "/=", "%=",
    "&=", "|=", "^=",
];

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Splits `text` into preprocessing tokens. Whitespace is kept so
/// untouched text round-trips exactly.
pub(crate) fn tokenize(text: &str) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        let kind = if c == '\n' {
            i += 1;
            TokenKind::Newline
        } else if c.is_whitespace() {
            while i < chars.len() && chars[i] != '\n' && chars[i].is_whitespace() {
                i += 1;
            }
            TokenKind::Space
        } else if is_ident_start(c) {
            while i < chars.len() && is_ident_continue(chars[i]) {
                i += 1;
            }
            TokenKind::Ident
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            i += 1;
            while i < chars.len() {
                let d = chars[i];
                if matches!(d, 'e' | 'E' | 'p' | 'P') && matches!(chars.get(i + 1), Some('+' | '-')) {
                    i += 2;
                } else if is_ident_continue(d) || d == '.' {
                    i += 1;
                } else {
                    break;
                }
            }
            TokenKind::Number
        } else if c == '"' || c == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != c && chars[i] != '\n' {
                if chars[i] == '\\' {
                    i += 1;
                }
                i += 1;
            }
            i = (i + 1).min(chars.len());
            TokenKind::Literal
        } else {
            let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
            let len = if PUNCT3.iter().any(|p| rest.starts_with(p)) {
                3
            } else if PUNCT2.iter().any(|p| rest.starts_with(p)) {
                2
            } else {
                1
            };
            i += len;
            TokenKind::Punct
        };
        tokens.push(Token::new(kind, chars[start..i].iter().collect::<String>()));
    }
    tokens
}

/// Concatenated text of `tokens`, placemarkers dropped.
pub(crate) fn to_text(tokens: &[Token]) -> String {
    tokens
        .iter()
        .filter(|t| t.kind != TokenKind::Placemarker)
        .map(|t| t.text.as_str())
        .collect()
}

/// Drops leading and trailing whitespace tokens.
pub(crate) fn trim(tokens: &[Token]) -> &[Token] {
    let start = tokens.iter().position(|t| !t.is_space()).unwrap_or(tokens.len());
    let end = tokens.iter().rposition(|t| !t.is_space()).map_or(start, |e| e + 1);
    &tokens[start..end]
}

/// Source split in logical lines: backslash-newline sequences are joined
/// and comments become a single space. Each line carries the 1-based
/// number of its first physical line.
pub(crate) fn logical_lines(source: &str) -> Vec<(usize, String)> {
    if source.is_empty() {
        return Vec::new();
    }
    let source = source.strip_suffix('\n').unwrap_or(source);
    let mut spliced: Vec<(usize, String)> = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (index, raw) in source.split('\n').enumerate() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        let (number, mut line) = pending.take().unwrap_or((index + 1, String::new()));
        if let Some(joined) = raw.strip_suffix('\\') {
            line.push_str(joined);
            pending = Some((number, line));
        } else {
            line.push_str(raw);
            spliced.push((number, line));
        }
    }
    if let Some(last) = pending {
        spliced.push(last);
    }

    let mut in_block = false;
    spliced
        .into_iter()
        .map(|(number, line)| {
            let (stripped, still_open) = strip_comments(&line, in_block);
            in_block = still_open;
            (number, stripped)
        })
        .collect()
}

fn strip_comments(line: &str, mut in_block: bool) -> (String, bool) {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if in_block {
            if c == '*' && next == Some('/') {
                in_block = false;
                out.push(' ');
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(n) = next {
                    out.push(n);
                    i += 1;
                }
            } else if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match (c, next) {
            ('/', Some('/')) => break,
            ('/', Some('*')) => {
                in_block = true;
                i += 2;
            }
            ('"' | '\'', _) => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    (out, in_block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip_the_source() {
        let line = "vOutput.VertexPosition = vec4(1.0e-3, 0x1Fu, 'a') << 2;";
        let tokens = tokenize(line);
        assert_eq!(to_text(&tokens), line);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Number && t.text == "1.0e-3"));
        assert!(tokens.iter().any(|t| t.is_punct("<<")));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Literal && t.text == "'a'"));
    }

    #[test]
    fn continuations_and_comments_fold_into_logical_lines() {
        let source = "#define A(x) \\\n\t(x + 1) // trailing\nint b; /* open\nstill comment */ int c;\nstr = \"//kept\";";
        let lines = logical_lines(source);
        assert_eq!(lines[0], (1, "#define A(x) \t(x + 1) ".to_string()));
        assert_eq!(lines[1], (3, "int b; ".to_string()));
        assert_eq!(lines[2], (4, "  int c;".to_string()));
        assert_eq!(lines[3], (5, "str = \"//kept\";".to_string()));
    }

    #[test]
    fn trim_drops_surrounding_whitespace() {
        let tokens = tokenize("  a b \n");
        assert_eq!(to_text(trim(&tokens)), "a b");
        assert!(trim(&tokenize("   ")).is_empty());
    }
}
