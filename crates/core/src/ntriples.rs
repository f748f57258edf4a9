//! N-Triples codec for durable snapshots.
//!
//! One `subject predicate object .` statement per line. Subjects are IRIs or
//! blank nodes, predicates are IRIs, objects may also be literals with an
//! optional language tag or datatype. Output lines are sorted, so saving the
//! same set twice produces byte-identical files.

use crate::{
    EntityId, GraphError, Literal, LiteralKind, Predicate, Result, Triple, TripleRef, TripleStore,
    Value,
};

/// Serialize the full store.
///
/// Fails with [`GraphError::Persistence`] if any term could not be read back
/// by [`parse`]: a relative IRI, a malformed blank node label or language tag.
pub fn serialize(store: &TripleStore) -> Result<String> {
    let mut lines = store.iter().map(format_triple).collect::<Result<Vec<_>>>()?;
    lines.sort_unstable();
    let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Parse a whole document. Any malformed line rejects the document.
pub fn parse(text: &str) -> Result<TripleStore> {
    let mut store = TripleStore::new();
    for (index, line) in text.lines().enumerate() {
        if let Some(triple) = LineParser::new(line, index + 1).parse()? {
            store.insert(triple);
        }
    }
    Ok(store)
}

/// Render one statement, without the trailing newline.
pub fn format_triple(triple: TripleRef<'_>) -> Result<String> {
    let mut out = String::new();
    write_entity(&mut out, triple.subject)?;
    out.push(' ');
    write_iri(&mut out, triple.predicate.as_str())?;
    out.push(' ');
    match triple.object {
        Value::Entity(id) => write_entity(&mut out, id)?,
        Value::Literal(lit) => write_literal(&mut out, lit)?,
    }
    out.push_str(" .");
    Ok(out)
}

fn unwritable(what: &str, term: &str) -> GraphError {
    GraphError::Persistence(format!("cannot write {what} {term:?} as N-Triples"))
}

fn write_entity(out: &mut String, id: &EntityId) -> Result<()> {
    if id.is_blank() {
        if !is_blank_label(&id.as_str()[2..]) {
            return Err(unwritable("blank node", id.as_str()));
        }
        out.push_str(id.as_str());
        Ok(())
    } else {
        write_iri(out, id.as_str())
    }
}

fn write_iri(out: &mut String, iri: &str) -> Result<()> {
    if !is_absolute_iri(iri) {
        return Err(unwritable("relative IRI", iri));
    }
    out.push('<');
    for ch in iri.chars() {
        if is_forbidden_in_iri(ch) {
            push_unicode_escape(out, ch);
        } else {
            out.push(ch);
        }
    }
    out.push('>');
    Ok(())
}

fn write_literal(out: &mut String, lit: &Literal) -> Result<()> {
    out.push('"');
    for ch in lit.lexical.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => push_unicode_escape(out, c),
            c => out.push(c),
        }
    }
    out.push('"');
    match &lit.kind {
        LiteralKind::Plain => {}
        LiteralKind::Language(tag) => {
            if !is_language_tag(tag) {
                return Err(unwritable("language tag", tag));
            }
            out.push('@');
            out.push_str(tag);
        }
        LiteralKind::Typed(datatype) => {
            out.push_str("^^");
            write_iri(out, datatype)?;
        }
    }
    Ok(())
}

fn is_absolute_iri(iri: &str) -> bool {
    iri.contains(':')
}

/// Labels the parser reads back whole: a trailing `.` would end the statement.
fn is_blank_label(label: &str) -> bool {
    !label.is_empty()
        && !label.ends_with('.')
        && label
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn is_language_tag(tag: &str) -> bool {
    let mut parts = tag.split('-');
    let primary_ok = parts
        .next()
        .is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphabetic()));
    primary_ok && parts.all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric()))
}

fn is_forbidden_in_iri(ch: char) -> bool {
    matches!(ch, '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\') || ch <= ' '
}

fn push_unicode_escape(out: &mut String, ch: char) {
    let code = ch as u32;
    if code <= 0xFFFF {
        out.push_str(&format!("\\u{code:04X}"));
    } else {
        out.push_str(&format!("\\U{code:08X}"));
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

struct LineParser<'a> {
    rest: &'a str,
    line: usize,
}

impl<'a> LineParser<'a> {
    fn new(text: &'a str, line: usize) -> Self {
        Self { rest: text, line }
    }

    fn error(&self, reason: impl Into<String>) -> GraphError {
        GraphError::CorruptOntology {
            line: self.line,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.rest = &self.rest[c.len_utf8()..];
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        self.rest = self.rest.trim_start_matches([' ', '\t']);
    }

    fn at_end_or_comment(&self) -> bool {
        matches!(self.peek(), None | Some('#'))
    }

    fn expect(&mut self, wanted: char) -> Result<()> {
        match self.bump() {
            Some(c) if c == wanted => Ok(()),
            Some(c) => Err(self.error(format!("expected '{wanted}', found '{c}'"))),
            None => Err(self.error(format!("expected '{wanted}', found end of line"))),
        }
    }

    fn parse(mut self) -> Result<Option<Triple>> {
        self.skip_whitespace();
        if self.at_end_or_comment() {
            return Ok(None);
        }

        let subject = match self.peek() {
            Some('<') => EntityId(self.iri()?),
            Some('_') => self.blank_node()?,
            _ => return Err(self.error("subject must be an IRI or blank node")),
        };
        self.skip_whitespace();

        if self.peek() != Some('<') {
            return Err(self.error("predicate must be an IRI"));
        }
        let predicate = Predicate(self.iri()?);
        self.skip_whitespace();

        let object = match self.peek() {
            Some('<') => Value::Entity(EntityId(self.iri()?)),
            Some('_') => Value::Entity(self.blank_node()?),
            Some('"') => Value::Literal(self.literal()?),
            _ => return Err(self.error("object must be an IRI, blank node or literal")),
        };
        self.skip_whitespace();
        self.expect('.')?;
        self.skip_whitespace();
        if !self.at_end_or_comment() {
            return Err(self.error("unexpected content after statement"));
        }

        Ok(Some(Triple {
            subject,
            predicate,
            object,
        }))
    }

    fn iri(&mut self) -> Result<String> {
        self.expect('<')?;
        let mut iri = String::new();
        loop {
            match self.bump() {
                Some('>') => break,
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('u') => self.hex_escape(4)?,
                        Some('U') => self.hex_escape(8)?,
                        _ => return Err(self.error("invalid escape in IRI")),
                    };
                    iri.push(escaped);
                }
                Some(c) if is_forbidden_in_iri(c) => {
                    return Err(self.error(format!("character {c:?} not allowed in IRI")))
                }
                Some(c) => iri.push(c),
                None => return Err(self.error("unterminated IRI")),
            }
        }
        if !is_absolute_iri(&iri) {
            return Err(self.error(format!("IRI <{iri}> is not absolute")));
        }
        Ok(iri)
    }

    fn blank_node(&mut self) -> Result<EntityId> {
        self.expect('_')?;
        self.expect(':')?;
        let end = self
            .rest
            .find(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.')))
            .unwrap_or(self.rest.len());
        // A trailing dot terminates the statement, not the label.
        let label = self.rest[..end].trim_end_matches('.');
        if label.is_empty() {
            return Err(self.error("empty blank node label"));
        }
        self.rest = &self.rest[label.len()..];
        Ok(EntityId::blank(label))
    }

    fn literal(&mut self) -> Result<Literal> {
        self.expect('"')?;
        let mut lexical = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('t') => '\t',
                        Some('b') => '\u{8}',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('f') => '\u{c}',
                        Some('"') => '"',
                        Some('\'') => '\'',
                        Some('\\') => '\\',
                        Some('u') => self.hex_escape(4)?,
                        Some('U') => self.hex_escape(8)?,
                        _ => return Err(self.error("invalid escape in literal")),
                    };
                    lexical.push(escaped);
                }
                Some(c) => lexical.push(c),
                None => return Err(self.error("unterminated literal")),
            }
        }

        let kind = match self.peek() {
            Some('@') => {
                self.bump();
                LiteralKind::Language(self.language_tag()?)
            }
            Some('^') => {
                self.bump();
                self.expect('^')?;
                if self.peek() != Some('<') {
                    return Err(self.error("datatype must be an IRI"));
                }
                LiteralKind::Typed(self.iri()?)
            }
            _ => LiteralKind::Plain,
        };
        Ok(Literal { lexical, kind })
    }

    fn language_tag(&mut self) -> Result<String> {
        let mut tag = String::new();
        while let Some(c) = self.peek().filter(|c| c.is_ascii_alphanumeric() || *c == '-') {
            tag.push(c);
            self.bump();
        }
        if !is_language_tag(&tag) {
            return Err(self.error(format!("malformed language tag '{tag}'")));
        }
        Ok(tag)
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char> {
        let mut code = 0u32;
        for _ in 0..digits {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("invalid unicode escape"))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| self.error(format!("invalid code point U+{code:X}")))
    }
}
