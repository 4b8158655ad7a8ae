//! Macro table and expansion.
//!
//! Expansion follows the hide-set algorithm: every token produced by a
//! macro remembers which macros it came from and is never expanded by
//! them again, so self-referencing macros terminate.

use std::collections::{HashMap, VecDeque};

use super::lexer::{self, tokenize, trim, Token, TokenKind};

const VA_ARGS: &str = "__VA_ARGS__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Macro {
    /// `None` for object-like macros.
    params: Option<Vec<String>>,
    variadic: bool,
    body: Vec<Token>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MacroTable {
    macros: HashMap<String, Macro>,
}

impl MacroTable {
    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn undefine(&mut self, name: &str) {
        self.macros.remove(name);
    }

    /// `NAME`, `NAME=VALUE` or `NAME(args)=VALUE`, as given on a compiler
    /// command line. A bare name is defined to `1`.
    pub fn define_option(&mut self, option: &str) -> Result<(), String> {
        match option.split_once('=') {
            Some((name, value)) => self.define(&format!("{name} {value}")),
            None => self.define(&format!("{option} 1")),
        }
    }

    /// Parses the text after `#define`.
    pub fn define(&mut self, text: &str) -> Result<(), String> {
        let tokens = tokenize(text.trim());
        let mut iter = tokens.iter().peekable();
        let name = match iter.next() {
            Some(t) if t.kind == TokenKind::Ident => t.text.clone(),
            _ => return Err("macro names must be identifiers".to_string()),
        };

        let mut params = None;
        let mut variadic = false;
        // A parenthesis glued to the name makes a function-like macro.
        if iter.peek().is_some_and(|t| t.is_punct("(")) {
            iter.next();
            let mut names = Vec::new();
            loop {
                match iter.find(|t| !t.is_space()) {
                    Some(t) if t.is_punct(")") && names.is_empty() && !variadic => break,
                    Some(t) if t.kind == TokenKind::Ident && !variadic => names.push(t.text.clone()),
                    Some(t) if t.is_punct("...") && !variadic => variadic = true,
                    _ => return Err(format!("malformed parameter list for macro '{name}'")),
                }
                match iter.find(|t| !t.is_space()) {
                    Some(t) if t.is_punct(")") => break,
                    Some(t) if t.is_punct(",") && !variadic => {}
                    _ => return Err(format!("malformed parameter list for macro '{name}'")),
                }
            }
            if variadic {
                names.push(VA_ARGS.to_string());
            }
            params = Some(names);
        }

        let rest: Vec<Token> = iter.cloned().collect();
        let mut body = Vec::new();
        for token in trim(&rest) {
            if token.is_space() {
                if !body.last().is_some_and(Token::is_space) {
                    body.push(Token::space());
                }
            } else {
                body.push(token.clone());
            }
        }
        if body.first().is_some_and(|t| t.is_punct("##")) || body.last().is_some_and(|t| t.is_punct("##")) {
            return Err("'##' cannot appear at either end of a macro expansion".to_string());
        }

        self.macros.insert(name, Macro { params, variadic, body });
        Ok(())
    }

    /// Fully expands `tokens`.
    pub fn expand(&self, tokens: Vec<Token>) -> Result<Vec<Token>, String> {
        let mut input: VecDeque<Token> = tokens.into();
        let mut output = Vec::with_capacity(input.len());

        while let Some(token) = input.pop_front() {
            let found = match token.kind {
                TokenKind::Ident if !token.is_hidden(&token.text) => self.macros.get(&token.text),
                _ => None,
            };
            let Some(definition) = found else {
                output.push(token);
                continue;
            };

            let replacement = match &definition.params {
                None => {
                    let body = paste(definition.body.clone())?;
                    hide_all(body, &token.hide, &token.text)
                }
                Some(params) => {
                    let Some(open) = input.iter().position(|t| !t.is_space()) else {
                        output.push(token);
                        continue;
                    };
                    if !input[open].is_punct("(") {
                        output.push(token);
                        continue;
                    }
                    input.drain(..=open);
                    let args = collect_arguments(&mut input, &token.text)?;
                    let args = bind_arguments(&token.text, params, definition.variadic, args)?;
                    let body = self.substitute(definition, params, &args)?;
                    hide_all(body, &token.hide, &token.text)
                }
            };
            for t in replacement.into_iter().rev() {
                input.push_front(t);
            }
        }
        Ok(output)
    }

    fn substitute(&self, definition: &Macro, params: &[String], args: &[Vec<Token>]) -> Result<Vec<Token>, String> {
        let body = &definition.body;
        let param_index = |t: &Token| {
            (t.kind == TokenKind::Ident)
                .then(|| params.iter().position(|p| *p == t.text))
                .flatten()
        };
        let next_solid = |from: usize| (from..body.len()).find(|&j| !body[j].is_space());

        let mut result: Vec<Token> = Vec::new();
        let mut i = 0;
        while i < body.len() {
            let token = &body[i];

            if token.is_punct("#") {
                if let Some(j) = next_solid(i + 1) {
                    if let Some(p) = param_index(&body[j]) {
                        result.push(stringify(&args[p]));
                        i = j + 1;
                        continue;
                    }
                }
            }

            if let Some(p) = param_index(token) {
                let pasted_after = next_solid(i + 1).is_some_and(|j| body[j].is_punct("##"));
                let pasted_before = result.iter().rev().find(|t| !t.is_space()).is_some_and(|t| t.is_punct("##"));
                let arg = trim(&args[p]);
                if pasted_after || pasted_before {
                    if arg.is_empty() {
                        result.push(Token::new(TokenKind::Placemarker, ""));
                    } else {
                        result.extend(arg.iter().cloned());
                    }
                } else {
                    result.extend(self.expand(arg.to_vec())?);
                }
                i += 1;
                continue;
            }

            result.push(token.clone());
            i += 1;
        }
        paste(result)
    }
}

fn hide_all(mut tokens: Vec<Token>, hide: &[String], name: &str) -> Vec<Token> {
    for token in &mut tokens {
        token.hide_with(hide, name);
    }
    tokens
}

/// Arguments of a call whose `(` was consumed, split on top-level commas.
fn collect_arguments(input: &mut VecDeque<Token>, name: &str) -> Result<Vec<Vec<Token>>, String> {
    let mut args = vec![Vec::new()];
    let mut depth = 0usize;
    loop {
        let Some(mut token) = input.pop_front() else {
            return Err(format!("unterminated argument list invoking macro '{name}'"));
        };
        if token.kind == TokenKind::Newline {
            token = Token::space();
        }
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            if depth == 0 {
                return Ok(args);
            }
            depth -= 1;
        } else if token.is_punct(",") && depth == 0 {
            args.push(Vec::new());
            continue;
        }
        if let Some(current) = args.last_mut() {
            current.push(token);
        }
    }
}

fn bind_arguments(
    name: &str,
    params: &[String],
    variadic: bool,
    mut args: Vec<Vec<Token>>,
) -> Result<Vec<Vec<Token>>, String> {
    if params.is_empty() && args.len() == 1 && trim(&args[0]).is_empty() {
        return Ok(Vec::new());
    }
    if variadic {
        let named = params.len() - 1;
        if args.len() < named {
            return Err(format!(
                "macro '{name}' requires at least {named} arguments, but only {} given",
                args.len()
            ));
        }
        let mut rest: Vec<Token> = Vec::new();
        for (n, arg) in args.drain(named.min(args.len())..).enumerate() {
            if n > 0 {
                rest.push(Token::new(TokenKind::Punct, ","));
            }
            rest.extend(arg);
        }
        args.push(rest);
        return Ok(args);
    }
    if args.len() != params.len() {
        return Err(format!(
            "macro '{name}' requires {} arguments, but {} given",
            params.len(),
            args.len()
        ));
    }
    Ok(args)
}

fn stringify(arg: &[Token]) -> Token {
    let mut text = String::from("\"");
    let mut pending_space = false;
    for token in trim(arg) {
        if token.is_space() {
            pending_space = true;
            continue;
        }
        if pending_space {
            text.push(' ');
            pending_space = false;
        }
        if token.kind == TokenKind::Literal {
            text.push_str(&token.text.replace('\\', "\\\\").replace('"', "\\\""));
        } else {
            text.push_str(&token.text);
        }
    }
    text.push('"');
    Token::new(TokenKind::Literal, text)
}

/// Applies every `##` of `tokens`.
fn paste(tokens: Vec<Token>) -> Result<Vec<Token>, String> {
    if !tokens.iter().any(|t| t.is_punct("##")) {
        return Ok(tokens.into_iter().filter(|t| t.kind != TokenKind::Placemarker).collect());
    }

    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter();
    while let Some(token) = iter.next() {
        if !token.is_punct("##") {
            out.push(token);
            continue;
        }
        while out.last().is_some_and(Token::is_space) {
            out.pop();
        }
        let left = out.pop();
        let right = iter.find(|t| !t.is_space());
        let joined = match (left, right) {
            (Some(l), Some(r)) if l.kind == TokenKind::Placemarker => r,
            (Some(l), Some(r)) if r.kind == TokenKind::Placemarker => l,
            (Some(l), Some(r)) => {
                let text = format!("{}{}", l.text, r.text);
                let mut pasted = lexer::tokenize(&text);
                if pasted.len() != 1 {
                    return Err(format!(
                        "pasting \"{}\" and \"{}\" does not give a valid preprocessing token",
                        l.text, r.text
                    ));
                }
                let mut token = pasted.remove(0);
                token.hide = l.hide;
                token
            }
            _ => return Err("'##' cannot appear at either end of a macro expansion".to_string()),
        };
        out.push(joined);
    }
    Ok(out.into_iter().filter(|t| t.kind != TokenKind::Placemarker).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::lexer::to_text;

    fn expand_text(table: &MacroTable, text: &str) -> Result<String, String> {
        table.expand(tokenize(text)).map(|t| to_text(&t))
    }

    fn table(defines: &[&str]) -> MacroTable {
        let mut table = MacroTable::default();
        for define in defines {
            table.define(define).unwrap();
        }
        table
    }

    #[test]
    fn object_and_function_like_macros_expand() {
        let t = table(&[
            "VEC4_ZERO float4(0,0,0,0)",
            "SAMPLE(_sampler, _uv) Tex_ ## _sampler.sample(Sampler_ ## _sampler, _uv)",
        ]);
        assert_eq!(
            expand_text(&t, "c = SAMPLE(Diffuse, fInput.uv) + VEC4_ZERO;").unwrap(),
            "c = Tex_Diffuse.sample(Sampler_Diffuse, fInput.uv) + float4(0,0,0,0);"
        );
    }

    #[test]
    fn function_like_name_without_call_is_kept() {
        let t = table(&["mul(_a, _b) ((_a) * (_b))"]);
        assert_eq!(expand_text(&t, "float mul;").unwrap(), "float mul;");
    }

    #[test]
    fn self_reference_terminates() {
        let t = table(&["foo foo + 1", "bar(x) bar(x * 2)"]);
        assert_eq!(expand_text(&t, "foo").unwrap(), "foo + 1");
        assert_eq!(expand_text(&t, "bar(3)").unwrap(), "bar(3 * 2)");
    }

    #[test]
    fn stringify_and_paste_use_raw_arguments() {
        let t = table(&["STR(x) #x", "GLUE(_a, _b) _a ## _b", "N 4"]);
        assert_eq!(expand_text(&t, "STR(  a   + N )").unwrap(), "\"a + N\"");
        assert_eq!(expand_text(&t, "GLUE(VEC, N)").unwrap(), "VECN");
        assert_eq!(expand_text(&t, "GLUE(, N)").unwrap(), "4");
    }

    #[test]
    fn nested_and_multi_line_arguments() {
        let t = table(&["MAX(a, b) ((a) > (b) ? (a) : (b))"]);
        assert_eq!(
            expand_text(&t, "MAX(f(1, 2),\n\tMAX(3, 4))").unwrap(),
            "((f(1, 2)) > (((3) > (4) ? (3) : (4))) ? (f(1, 2)) : (((3) > (4) ? (3) : (4))))"
        );
    }

    #[test]
    fn variadic_macros_forward_the_rest() {
        let t = table(&["CALL(f, ...) f(__VA_ARGS__)"]);
        assert_eq!(expand_text(&t, "CALL(g, 1, 2)").unwrap(), "g(1, 2)");
        assert_eq!(expand_text(&t, "CALL(g)").unwrap(), "g()");
    }

    #[test]
    fn argument_count_is_checked() {
        let t = table(&["PAIR(a, b) a b"]);
        let err = expand_text(&t, "PAIR(1)").unwrap_err();
        assert!(err.contains("requires 2 arguments"));
        assert!(expand_text(&t, "PAIR(1, 2").unwrap_err().contains("unterminated"));
    }

    #[test]
    fn command_line_options() {
        let mut t = MacroTable::default();
        t.define_option("BB_Feature_Atlas").unwrap();
        t.define_option("MAX_LIGHTS=4").unwrap();
        assert_eq!(expand_text(&t, "BB_Feature_Atlas MAX_LIGHTS").unwrap(), "1 4");
        t.undefine("MAX_LIGHTS");
        assert!(!t.is_defined("MAX_LIGHTS"));
    }

    #[test]
    fn directive_text_in_a_body_stays_text() {
        let t = table(&["VERSION #version 430"]);
        assert_eq!(expand_text(&t, "VERSION").unwrap(), "#version 430");
    }
}
