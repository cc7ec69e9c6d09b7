//! Textual IR parser (spec §4.2, §6 grammar): turns the small Venom
//! surface syntax into a [`Context`]. Grounded on the same error-reporting
//! shape as `cranelift-reader`'s `error.rs` (`Location`, `ParseError`
//! carrying a message and a line/column) already captured in
//! [`crate::errors`].
//!
//! ```text
//! program       := function* data_segment?
//! function      := "function" name "{" (label_decl | statement)* "}"
//! label_decl    := name ":"
//! statement     := var "=" operand | (var "=")? opcode operand ("," operand)*
//! operand       := var | literal | "@" label
//! data_segment  := "data" "readonly" "{" data_section* "}"
//! data_section  := "dbsection" label ":" ("db" (hexstring | "@" label))*
//! ```
//!
//! Whitespace (including newlines) is pure trivia, so a statement's operand
//! list can't be bounded by watching for "the next token looks like it
//! starts a new statement" — a leading variable operand (`return %1, 32`)
//! and the next statement's own output variable are the same token kind.
//! Operand parsing is instead driven by the opcode's arity
//! ([`crate::ir::Opcode::is_nullary`]), with `ret`'s genuinely variable
//! 0-or-more arity resolved by it always being a block's last instruction
//! (so "no more operands" and "the block ends here" coincide).
//!
//! Two conventions differ between textual and internal form: operands
//! appear left-to-right in source order in the text; internally they are
//! stored reversed (see [`crate::ir::Instruction::operands_in_source_order`])
//! except for `jmp`/`jnz`/`djmp`/`phi`, and except for `invoke`'s leading
//! callee label.

use std::str::FromStr;

use alloy_primitives::U256;

use crate::errors::{parse_err, Location, VenomError, VenomResult};
use crate::ir::{
    BasicBlock, Context, DataItem, DataSection, Function, Instruction, Label, Opcode, Operand, Variable,
};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    QuotedString(String),
    Var(String, Option<u32>),
    Number(U256),
    HexBytes(Vec<u8>),
    Comma,
    Colon,
    LBrace,
    RBrace,
    Eq,
    At,
    Eof,
}

struct Spanned {
    token: Token,
    loc: Location,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer { chars: src.char_indices().peekable(), src, line: 1, col: 1 }
    }

    fn loc(&self) -> Location {
        Location { line: self.line, column: self.col }
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some(';') | Some('#') => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') => {
                    let mut clone = self.chars.clone();
                    clone.next();
                    if matches!(clone.peek(), Some((_, '/'))) {
                        while let Some(c) = self.peek_char() {
                            if c == '\n' {
                                break;
                            }
                            self.bump();
                        }
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> VenomResult<Spanned> {
        self.skip_trivia();
        let loc = self.loc();
        let Some(c) = self.peek_char() else {
            return Ok(Spanned { token: Token::Eof, loc });
        };
        let token = match c {
            ',' => {
                self.bump();
                Token::Comma
            }
            ':' => {
                self.bump();
                Token::Colon
            }
            '{' => {
                self.bump();
                Token::LBrace
            }
            '}' => {
                self.bump();
                Token::RBrace
            }
            '=' => {
                self.bump();
                Token::Eq
            }
            '@' => {
                self.bump();
                Token::At
            }
            '"' => self.lex_quoted_string(loc)?,
            '%' => self.lex_variable(loc)?,
            'x' if self.starts_hex_bytes() => self.lex_hex_bytes(loc)?,
            c if c.is_ascii_digit() => self.lex_number(loc)?,
            c if c.is_ascii_alphabetic() || c == '_' => self.lex_ident(),
            other => parse_err!(loc, "unexpected character {:?}", other),
        };
        Ok(Spanned { token, loc })
    }

    fn starts_hex_bytes(&mut self) -> bool {
        let mut clone = self.chars.clone();
        matches!(clone.next(), Some((_, 'x'))) && matches!(clone.next(), Some((_, '"')))
    }

    fn lex_ident(&mut self) -> Token {
        let mut s = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '_' {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Token::Ident(s)
    }

    fn lex_quoted_string(&mut self, loc: Location) -> VenomResult<Token> {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some(c) => s.push(c),
                    None => parse_err!(loc, "unterminated string escape"),
                },
                Some(c) => s.push(c),
                None => parse_err!(loc, "unterminated string literal"),
            }
        }
        Ok(Token::QuotedString(s))
    }

    fn lex_variable(&mut self, loc: Location) -> VenomResult<Token> {
        self.bump(); // '%'
        let mut name = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if name.is_empty() {
            parse_err!(loc, "expected identifier after '%'");
        }
        let version = if self.peek_char() == Some(':') {
            self.bump();
            let mut digits = String::new();
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            Some(digits.parse::<u32>().map_err(|_| VenomError::parse("invalid variable version", loc))?)
        } else {
            None
        };
        Ok(Token::Var(name, version))
    }

    fn lex_number(&mut self, loc: Location) -> VenomResult<Token> {
        let mut s = String::new();
        if self.peek_char() == Some('0') {
            s.push(self.bump().unwrap());
            if self.peek_char() == Some('x') {
                s.push(self.bump().unwrap());
                while let Some(c) = self.peek_char() {
                    if c.is_ascii_hexdigit() || c == '_' {
                        s.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                let cleaned: String = s[2..].chars().filter(|c| *c != '_').collect();
                let value = U256::from_str_radix(&cleaned, 16)
                    .map_err(|_| VenomError::parse(format!("invalid hex literal {s}"), loc))?;
                return Ok(Token::Number(value));
            }
        }
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() || c == '_' {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let cleaned: String = s.chars().filter(|c| *c != '_').collect();
        let value = U256::from_str(&cleaned).map_err(|_| VenomError::parse(format!("invalid literal {s}"), loc))?;
        Ok(Token::Number(value))
    }

    fn lex_hex_bytes(&mut self, loc: Location) -> VenomResult<Token> {
        self.bump(); // 'x'
        self.bump(); // '"'
        let mut hex = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                Some('_') => {}
                Some(c) => parse_err!(loc, "invalid character {:?} in hex byte string", c),
                None => parse_err!(loc, "unterminated hex byte string"),
            }
        }
        if hex.len() % 2 != 0 {
            parse_err!(loc, "hex byte string has an odd number of digits");
        }
        let mut bytes = Vec::with_capacity(hex.len() / 2);
        for chunk in hex.as_bytes().chunks(2) {
            let byte_str = std::str::from_utf8(chunk).unwrap();
            bytes.push(u8::from_str_radix(byte_str, 16).unwrap());
        }
        Ok(Token::HexBytes(bytes))
    }
}

/// Wraps the lexer with one token of lookahead.
struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Spanned,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> VenomResult<Self> {
        let mut lexer = Lexer::new(src);
        let lookahead = lexer.next_token()?;
        Ok(Parser { lexer, lookahead })
    }

    fn loc(&self) -> Location {
        self.lookahead.loc
    }

    fn bump(&mut self) -> VenomResult<Token> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.lookahead, next).token)
    }

    fn expect_ident(&mut self, expected: &str) -> VenomResult<()> {
        let loc = self.loc();
        match self.bump()? {
            Token::Ident(s) if s == expected => Ok(()),
            other => parse_err!(loc, "expected '{}', found {:?}", expected, other),
        }
    }

    fn expect(&mut self, expected: Token) -> VenomResult<()> {
        let loc = self.loc();
        let got = self.bump()?;
        if got == expected {
            Ok(())
        } else {
            parse_err!(loc, "expected {:?}, found {:?}", expected, got)
        }
    }

    fn at(&self, token: &Token) -> bool {
        &self.lookahead.token == token
    }

    fn parse_name(&mut self) -> VenomResult<String> {
        let loc = self.loc();
        match self.bump()? {
            Token::Ident(s) => Ok(s),
            Token::QuotedString(s) => Ok(s),
            other => parse_err!(loc, "expected a name, found {:?}", other),
        }
    }

    fn parse_program(&mut self) -> VenomResult<Context> {
        let mut ctx = Context::new();
        loop {
            match &self.lookahead.token {
                Token::Ident(kw) if kw == "function" => {
                    let func = self.parse_function()?;
                    ctx.add_function(func);
                }
                Token::Ident(kw) if kw == "data" => {
                    self.parse_data_segment(&mut ctx)?;
                }
                Token::Eof => break,
                other => parse_err!(self.loc(), "expected 'function' or 'data', found {:?}", other),
            }
        }
        Ok(ctx)
    }

    fn parse_function(&mut self) -> VenomResult<Function> {
        self.expect_ident("function")?;
        let name = self.parse_name()?;
        let mut func = Function::new(Label::new(name));
        let placeholder = func.entry_label().clone();
        self.expect(Token::LBrace)?;

        let mut current_block: Option<Label> = None;
        let mut first_label: Option<Label> = None;
        while !self.at(&Token::RBrace) {
            if self.is_label_decl()? {
                let label_name = self.parse_name()?;
                self.expect(Token::Colon)?;
                let label = Label::new(label_name);
                if first_label.is_none() {
                    first_label = Some(label.clone());
                }
                func.add_block(BasicBlock::new(label.clone()));
                current_block = Some(label);
            } else {
                let block_label = current_block
                    .clone()
                    .ok_or_else(|| VenomError::parse("statement before any label", self.loc()))?;
                let inst = self.parse_statement()?;
                func.get_block_mut(&block_label).expect("just inserted").append_instruction(inst);
            }
        }
        self.expect(Token::RBrace)?;
        if let Some(entry) = first_label {
            if entry != placeholder {
                func.remove_block(&placeholder);
            }
            func.set_entry_label(entry);
        }
        Ok(func)
    }

    /// Disambiguates `name:` (a label declaration) from the start of a
    /// statement, both of which begin with an identifier.
    fn is_label_decl(&mut self) -> VenomResult<bool> {
        if !matches!(self.lookahead.token, Token::Ident(_) | Token::QuotedString(_)) {
            return Ok(false);
        }
        // Peek one token further without losing it: clone the sub-lexer.
        let mut probe = Lexer { chars: self.lexer.chars.clone(), src: self.lexer.src, line: self.lexer.line, col: self.lexer.col };
        let after = probe.next_token()?;
        Ok(after.token == Token::Colon)
    }

    fn parse_statement(&mut self) -> VenomResult<Instruction> {
        let loc = self.loc();
        let output = if let Token::Var(_, _) = &self.lookahead.token {
            let mut probe = Lexer { chars: self.lexer.chars.clone(), src: self.lexer.src, line: self.lexer.line, col: self.lexer.col };
            let after = probe.next_token()?;
            if after.token == Token::Eq {
                let Token::Var(name, version) = self.bump()? else { unreachable!() };
                self.expect(Token::Eq)?;
                Some(match version {
                    Some(v) => Variable::versioned(name, v),
                    None => Variable::new(name),
                })
            } else {
                None
            }
        } else {
            None
        };

        // `%dst = <operand>` with no opcode name is `store`/`assign` sugar:
        // the token right after `=` is itself an operand, not an `Ident`
        // naming an opcode.
        if output.is_some() && matches!(self.lookahead.token, Token::Var(..) | Token::Number(_) | Token::At) {
            let operand = self.parse_operand()?;
            return Ok(Instruction::new(Opcode::Store, vec![operand], output));
        }

        let opcode_name = self.parse_name()?;
        let opcode = Opcode::from_str(&opcode_name)
            .map_err(|_| VenomError::parse(format!("unknown opcode '{opcode_name}'"), loc))?;

        let mut operands = Vec::new();
        if opcode == Opcode::Ret {
            // The one opcode whose arity alone doesn't settle it (0 or more
            // return values); since `ret` is always a block's last
            // instruction, "nothing left to parse" is exactly "the block
            // ends here".
            if !self.at(&Token::RBrace) && !self.at(&Token::Eof) && !self.is_label_decl()? {
                operands.push(self.parse_operand()?);
                while self.at(&Token::Comma) {
                    self.bump()?;
                    operands.push(self.parse_operand()?);
                }
            }
        } else if !opcode.is_nullary() {
            operands.push(self.parse_operand()?);
            while self.at(&Token::Comma) {
                self.bump()?;
                operands.push(self.parse_operand()?);
            }
        }

        let stored = reorder_for_storage(opcode, operands);
        Ok(Instruction::new(opcode, stored, output))
    }

    fn parse_operand(&mut self) -> VenomResult<Operand> {
        let loc = self.loc();
        match self.bump()? {
            Token::Var(name, version) => Ok(Operand::Variable(match version {
                Some(v) => Variable::versioned(name, v),
                None => Variable::new(name),
            })),
            Token::Number(n) => Ok(Operand::Literal(n)),
            Token::At => {
                let name = self.parse_name()?;
                Ok(Operand::Label(Label::new(name)))
            }
            other => parse_err!(loc, "expected an operand, found {:?}", other),
        }
    }

    fn parse_data_segment(&mut self, ctx: &mut Context) -> VenomResult<()> {
        self.expect_ident("data")?;
        self.expect_ident("readonly")?;
        self.expect(Token::LBrace)?;
        while !self.at(&Token::RBrace) {
            self.expect_ident("dbsection")?;
            let label = Label::new(self.parse_name()?);
            self.expect(Token::Colon)?;
            let mut items = Vec::new();
            while matches!(&self.lookahead.token, Token::Ident(s) if s == "db") {
                self.bump()?;
                let loc = self.loc();
                match self.bump()? {
                    Token::HexBytes(bytes) => items.push(DataItem::Bytes(bytes)),
                    Token::At => items.push(DataItem::LabelRef(Label::new(self.parse_name()?))),
                    other => parse_err!(loc, "expected hex bytes or '@label' after 'db', found {:?}", other),
                }
            }
            ctx.append_data_section(DataSection { label, items });
        }
        self.expect(Token::RBrace)?;
        Ok(())
    }
}

/// Operands arrive from [`Parser::parse_operand`] in source order
/// (left-to-right); convert to internal storage order per opcode.
fn reorder_for_storage(opcode: Opcode, mut operands: Vec<Operand>) -> Vec<Operand> {
    match opcode {
        Opcode::Jmp | Opcode::Jnz | Opcode::DJmp | Opcode::Phi => operands,
        Opcode::Invoke => {
            if operands.is_empty() {
                operands
            } else {
                let callee = operands.remove(0);
                operands.reverse();
                operands.insert(0, callee);
                operands
            }
        }
        _ => {
            operands.reverse();
            operands
        }
    }
}

pub fn parse_context(src: &str) -> VenomResult<Context> {
    let mut parser = Parser::new(src)?;
    parser.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_function() {
        let src = "function main {\nmain:\n%1 = add 10, 32\nstop\n}\n";
        let ctx = parse_context(src).unwrap();
        let func = ctx.get_function(&Label::new("main")).unwrap();
        let block = func.get_block(&Label::new("main")).unwrap();
        assert_eq!(block.instructions.len(), 2);
        assert_eq!(block.instructions[0].opcode, Opcode::Add);
        // source order `10, 32` stores reversed: operands[-1] == 10 (stack top).
        assert_eq!(block.instructions[0].operands[1].as_literal(), Some(U256::from(10u64)));
        assert_eq!(block.instructions[0].operands[0].as_literal(), Some(U256::from(32u64)));
    }

    #[test]
    fn jnz_keeps_source_order() {
        let src = "function f {\nentry:\njnz %cond, @t, @f2\nt:\nstop\nf2:\nstop\n}\n";
        let ctx = parse_context(src).unwrap();
        let func = ctx.get_function(&Label::new("f")).unwrap();
        let block = func.get_block(&Label::new("entry")).unwrap();
        let jnz = &block.instructions[0];
        assert_eq!(jnz.operands[1].as_label().unwrap().name(), "t");
        assert_eq!(jnz.operands[2].as_label().unwrap().name(), "f2");
    }

    #[test]
    fn parses_data_segment() {
        let src = "function f {\nentry:\nstop\n}\ndata readonly {\n  dbsection seg:\n    db x\"deadbeef\"\n    db @seg\n}\n";
        let ctx = parse_context(src).unwrap();
        assert_eq!(ctx.data_segments.len(), 1);
        assert_eq!(ctx.data_segments[0].items.len(), 2);
    }

    #[test]
    fn rejects_unknown_opcode() {
        let src = "function f {\nentry:\nbogus_op 1\n}\n";
        assert!(parse_context(src).is_err());
    }
}
