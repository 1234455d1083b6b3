//! The selector subset used to address elements: type, `*`, `#id`, `.class`,
//! `[attr]`, `[attr=value]`, descendant and child combinators and `,` groups.

use super::*;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Simple {
    Tag(String),
    Id(String),
    Class(String),
    HasAttr(String),
    AttrEq(String, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

/// Simple selectors that must all hold for one element. An empty list is `*`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    simples: Vec<Simple>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    subject: Compound,
    // nearest ancestor first
    ancestors: Vec<(Combinator, Compound)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Selector {
    alternatives: Vec<Complex>,
}

impl Selector {
    pub(crate) fn parse(src: &str) -> Result<Self> {
        let mut scanner = Scanner::new(src);
        let mut alternatives = Vec::new();
        loop {
            alternatives.push(scanner.complex()?);
            scanner.skip_ws();
            match scanner.bump() {
                None => break,
                Some(',') => continue,
                Some(_) => return Err(scanner.unsupported()),
            }
        }
        Ok(Self { alternatives })
    }

    /// The id when the selector is a bare `#id`.
    pub(crate) fn as_id(&self) -> Option<&str> {
        let [complex] = self.alternatives.as_slice() else {
            return None;
        };
        match (complex.subject.simples.as_slice(), complex.ancestors.is_empty()) {
            ([Simple::Id(id)], true) => Some(id),
            _ => None,
        }
    }

    pub(crate) fn matches(&self, dom: &Dom, node: NodeId) -> bool {
        self.alternatives.iter().any(|complex| {
            complex.subject.matches(dom, node) && ancestors_match(dom, node, &complex.ancestors)
        })
    }
}

impl Compound {
    fn matches(&self, dom: &Dom, node: NodeId) -> bool {
        dom.is_element(node)
            && self.simples.iter().all(|simple| match simple {
                Simple::Tag(tag) => dom
                    .tag_name(node)
                    .is_some_and(|name| name.eq_ignore_ascii_case(tag)),
                Simple::Id(id) => dom.attr(node, "id").as_deref() == Some(id.as_str()),
                Simple::Class(class_name) => dom.has_class(node, class_name),
                Simple::HasAttr(name) => dom.has_attr(node, name),
                Simple::AttrEq(name, value) => {
                    dom.attr(node, name).as_deref() == Some(value.as_str())
                }
            })
    }
}

// Backtracks over descendant combinators, so `a b > c` finds any `a` above
// the `b` that parents `c`.
fn ancestors_match(dom: &Dom, node: NodeId, rest: &[(Combinator, Compound)]) -> bool {
    let Some(((combinator, compound), rest)) = rest.split_first() else {
        return true;
    };
    let mut cursor = dom.parent(node);
    while let Some(candidate) = cursor {
        if compound.matches(dom, candidate) && ancestors_match(dom, candidate, rest) {
            return true;
        }
        if *combinator == Combinator::Child {
            return false;
        }
        cursor = dom.parent(candidate);
    }
    false
}

struct Scanner<'a> {
    src: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn unsupported(&self) -> Error {
        Error::UnsupportedSelector(self.src.to_string())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    /// Returns whether any whitespace was skipped.
    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn complex(&mut self) -> Result<Complex> {
        self.skip_ws();
        let mut compounds = vec![self.compound()?];
        let mut combinators = Vec::new();
        loop {
            let spaced = self.skip_ws();
            match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_ws();
                    combinators.push(Combinator::Child);
                }
                Some(_) if spaced => combinators.push(Combinator::Descendant),
                Some(_) => return Err(self.unsupported()),
            }
            compounds.push(self.compound()?);
        }

        let subject = compounds.pop().ok_or_else(|| self.unsupported())?;
        let ancestors = combinators
            .into_iter()
            .rev()
            .zip(compounds.into_iter().rev())
            .collect();
        Ok(Complex { subject, ancestors })
    }

    fn compound(&mut self) -> Result<Compound> {
        let start = self.pos;
        let mut compound = Compound::default();
        while let Some(ch) = self.peek() {
            match ch {
                '*' if self.pos == start => self.pos += 1,
                '#' => {
                    self.pos += 1;
                    compound.simples.push(Simple::Id(self.ident()?));
                }
                '.' => {
                    self.pos += 1;
                    compound.simples.push(Simple::Class(self.ident()?));
                }
                '[' => {
                    self.pos += 1;
                    let simple = self.attribute()?;
                    compound.simples.push(simple);
                }
                ch if self.pos == start && is_ident_char(ch) => {
                    let tag = self.ident()?.to_ascii_lowercase();
                    compound.simples.push(Simple::Tag(tag));
                }
                _ => break,
            }
        }
        if self.pos == start {
            return Err(self.unsupported());
        }
        Ok(compound)
    }

    // A backslash escapes the next character, as in `[az-bind\:text]`.
    fn ident(&mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(ch) = self.peek() {
            if ch == '\\' {
                self.pos += 1;
                out.push(self.bump().ok_or_else(|| self.unsupported())?);
            } else if is_ident_char(ch) {
                self.pos += 1;
                out.push(ch);
            } else {
                break;
            }
        }
        if out.is_empty() {
            return Err(self.unsupported());
        }
        Ok(out)
    }

    fn attribute(&mut self) -> Result<Simple> {
        self.skip_ws();
        let name = self.ident()?.to_ascii_lowercase();
        self.skip_ws();
        let simple = match self.bump() {
            Some(']') => return Ok(Simple::HasAttr(name)),
            Some('=') => {
                self.skip_ws();
                let value = match self.peek() {
                    Some(quote @ ('"' | '\'')) => {
                        self.pos += 1;
                        let mut value = String::new();
                        loop {
                            match self.bump() {
                                Some(ch) if ch == quote => break,
                                Some(ch) => value.push(ch),
                                None => return Err(self.unsupported()),
                            }
                        }
                        value
                    }
                    _ => self.ident()?,
                };
                Simple::AttrEq(name, value)
            }
            _ => return Err(self.unsupported()),
        };
        self.skip_ws();
        match self.bump() {
            Some(']') => Ok(simple),
            _ => Err(self.unsupported()),
        }
    }
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'
}
