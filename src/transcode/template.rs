//! HTTP path template compiler.
//!
//! Grammar (the google.api.http subset):
//!
//! ```text
//! Template  = "/" | "/" Segments [ Verb ] ;
//! Segments  = Segment { "/" Segment } ;
//! Segment   = "*" | "**" | LITERAL | Variable ;
//! Variable  = "{" FieldPath [ "=" Segments ] "}" ;
//! FieldPath = IDENT { "." IDENT } ;
//! Verb      = ":" LITERAL ;
//! ```
//!
//! The parser is single pass with one character of lookahead. `{x}` compiles
//! to a [`Segment::Parameter`], a bare or bound `*` to [`Segment::Wildcard`]
//! and `**` to [`Segment::MultiWildcard`].
//!
//! # Example
//!
//! ```
//! use grpc_wire::transcode::{HttpTemplate, Segment};
//!
//! let template = HttpTemplate::parse("/v1/{name=shelves/*}/books:search").unwrap();
//! assert_eq!(template.segments().len(), 4);
//! assert_eq!(template.verb(), Some("search"));
//! assert_eq!(template.variables()[0].field_path, vec!["name".to_string()]);
//! assert_eq!(template.segments()[2], Segment::Wildcard);
//! ```

use std::fmt;

use crate::error::{GrpcWireError, Result};

/// One compiled path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Matches exactly this text.
    Literal(String),
    /// `{field}`: one segment bound to a field.
    Parameter,
    /// `*`: any one segment.
    Wildcard,
    /// `**`: any number of segments.
    MultiWildcard,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(lit) => f.write_str(lit),
            Self::Parameter | Self::Wildcard => f.write_str("*"),
            Self::MultiWildcard => f.write_str("**"),
        }
    }
}

/// A variable bound to the segment range `[start_segment, end_segment)`.
///
/// For wildcard variables `end_segment` is stored relative to the end of the
/// path: `-1` is the end of the request path, so the matcher can recover the
/// range for any concrete path length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVariable {
    pub field_path: Vec<String>,
    pub start_segment: usize,
    pub end_segment: isize,
    pub wildcard: bool,
}

impl TemplateVariable {
    /// Resolve `end_segment` against a concrete path of `path_len` segments.
    pub fn resolved_end(&self, path_len: usize) -> usize {
        if self.end_segment >= 0 {
            self.end_segment as usize
        } else {
            (path_len as isize + self.end_segment + 1).max(0) as usize
        }
    }
}

/// A compiled path template. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTemplate {
    segments: Vec<Segment>,
    verb: Option<String>,
    variables: Vec<TemplateVariable>,
}

impl HttpTemplate {
    /// Compile a template string.
    ///
    /// # Errors
    ///
    /// Returns [`GrpcWireError::InvalidTemplate`] on any grammar violation.
    pub fn parse(template: &str) -> Result<Self> {
        if template == "/" {
            return Ok(Self {
                segments: Vec::new(),
                verb: None,
                variables: Vec::new(),
            });
        }
        Parser::new(template).parse()
    }

    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[inline]
    pub fn verb(&self) -> Option<&str> {
        self.verb.as_deref()
    }

    #[inline]
    pub fn variables(&self) -> &[TemplateVariable] {
        &self.variables
    }

    /// Dotted field paths of every variable, in template order.
    pub fn field_names(&self) -> Vec<String> {
        self.variables
            .iter()
            .map(|var| var.field_path.join("."))
            .collect()
    }
}

/// Canonical rendering; parsing the output yields an equal template.
impl fmt::Display for HttpTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            f.write_str("/")?;
        }
        let len = self.segments.len();
        let mut i = 0;
        while i < len {
            match self.variables.iter().find(|var| var.start_segment == i) {
                Some(var) => {
                    let end = var.resolved_end(len);
                    write!(f, "/{{{}", var.field_path.join("."))?;
                    if !(end == i + 1 && self.segments[i] == Segment::Parameter) {
                        f.write_str("=")?;
                        for (n, segment) in self.segments[i..end].iter().enumerate() {
                            if n > 0 {
                                f.write_str("/")?;
                            }
                            write!(f, "{}", segment)?;
                        }
                    }
                    f.write_str("}")?;
                    i = end.max(i + 1);
                }
                None => {
                    write!(f, "/{}", self.segments[i])?;
                    i += 1;
                }
            }
        }
        if let Some(verb) = &self.verb {
            write!(f, ":{}", verb)?;
        }
        Ok(())
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    segments: Vec<Segment>,
    variables: Vec<TemplateVariable>,
    in_variable: bool,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            segments: Vec::new(),
            variables: Vec::new(),
            in_variable: false,
        }
    }

    fn error(&self, reason: &str) -> GrpcWireError {
        GrpcWireError::InvalidTemplate(format!(
            "{} at offset {} in {:?}",
            reason, self.pos, self.input
        ))
    }

    #[inline]
    fn current(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn consume(&mut self, c: u8) -> bool {
        if self.current() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse(mut self) -> Result<HttpTemplate> {
        if !self.consume(b'/') {
            return Err(self.error("template must start with '/'"));
        }
        self.parse_segments()?;

        let verb = if self.consume(b':') {
            Some(self.parse_literal()?)
        } else {
            None
        };
        if self.current().is_some() {
            return Err(self.error("unexpected character"));
        }
        self.validate()?;

        let total = self.segments.len() as isize;
        for var in &mut self.variables {
            if var.wildcard {
                var.end_segment -= total + 1;
            }
        }

        Ok(HttpTemplate {
            segments: self.segments,
            verb,
            variables: self.variables,
        })
    }

    fn parse_segments(&mut self) -> Result<()> {
        loop {
            self.parse_segment()?;
            if !self.consume(b'/') {
                return Ok(());
            }
        }
    }

    fn parse_segment(&mut self) -> Result<()> {
        match self.current() {
            Some(b'*') => {
                self.pos += 1;
                if self.consume(b'*') {
                    self.segments.push(Segment::MultiWildcard);
                    if self.in_variable {
                        if let Some(var) = self.variables.last_mut() {
                            var.wildcard = true;
                        }
                    }
                } else {
                    self.segments.push(Segment::Wildcard);
                }
                Ok(())
            }
            Some(b'{') => self.parse_variable(),
            Some(_) => {
                let literal = self.parse_literal()?;
                self.segments.push(Segment::Literal(literal));
                Ok(())
            }
            None => Err(self.error("expected segment")),
        }
    }

    fn parse_variable(&mut self) -> Result<()> {
        if !self.consume(b'{') {
            return Err(self.error("expected '{'"));
        }
        if self.in_variable {
            return Err(self.error("nested variable"));
        }
        self.in_variable = true;

        let field_path = self.parse_field_path()?;
        let start_segment = self.segments.len();
        self.variables.push(TemplateVariable {
            field_path,
            start_segment,
            end_segment: 0,
            wildcard: false,
        });

        if self.consume(b'=') {
            self.parse_segments()?;
        } else {
            self.segments.push(Segment::Parameter);
        }

        if !self.consume(b'}') {
            return Err(self.error("expected '}'"));
        }
        self.in_variable = false;

        let end_segment = self.segments.len();
        let has_wildcard = self.variables.last().is_some_and(|var| var.wildcard);
        if has_wildcard && self.segments.last() != Some(&Segment::MultiWildcard) {
            return Err(self.error("'**' must be the last segment of a variable"));
        }
        if let Some(var) = self.variables.last_mut() {
            var.end_segment = end_segment as isize;
        }
        Ok(())
    }

    fn parse_field_path(&mut self) -> Result<Vec<String>> {
        let mut path = vec![self.parse_identifier()?];
        while self.consume(b'.') {
            path.push(self.parse_identifier()?);
        }
        Ok(path)
    }

    fn parse_identifier(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.current() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error("expected identifier"));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_literal(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.current() {
            if matches!(c, b'/' | b'{' | b'}' | b':' | b'*' | b'=' | b'?' | b'#') {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected literal"));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    /// After a top-level `**`, only literal segments may follow.
    fn validate(&self) -> Result<()> {
        let mut after_multi = false;
        for segment in &self.segments {
            if after_multi && !matches!(segment, Segment::Literal(_)) {
                return Err(GrpcWireError::InvalidTemplate(format!(
                    "no variable or wildcard may follow '**' in {:?}",
                    self.input
                )));
            }
            if *segment == Segment::MultiWildcard {
                after_multi = true;
            }
        }
        Ok(())
    }
}
