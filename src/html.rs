use super::*;

use crate::dom::is_void_tag;
use std::collections::BTreeMap;

/// Parses a document or fragment into a fresh arena.
pub(crate) fn parse_html(html: &str) -> Result<Dom> {
    let mut dom = Dom::new();
    let mut open = vec![dom.root()];
    let mut cursor = Cursor { src: html, pos: 0 };

    while !cursor.at_end() {
        let parent = open.last().copied().unwrap_or(dom.root());
        if cursor.eat("<!--") {
            cursor.skip_past("-->", "unclosed HTML comment")?;
        } else if cursor.eat("<!") {
            // doctype and other declarations carry nothing we model
            cursor.skip_past(">", "unclosed declaration")?;
        } else if cursor.looking_at_start_tag() {
            let tag = cursor.start_tag()?;
            let node = dom.create_element(parent, tag.name.clone(), tag.attrs);
            if is_raw_text_tag(&tag.name) {
                let body = cursor.raw_text_until_end_tag(&tag.name)?;
                if !body.is_empty() {
                    dom.create_text(node, body.to_string());
                }
            } else if !tag.self_closing && !is_void_tag(&tag.name) {
                open.push(node);
            }
        } else if cursor.rest().starts_with("</") {
            let name = cursor.end_tag()?;
            // stray end tags that close nothing open are dropped
            if let Some(depth) = open
                .iter()
                .skip(1)
                .rposition(|&node| dom.tag_name(node) == Some(name.as_str()))
            {
                open.truncate(depth + 1);
            }
        } else {
            let text = cursor.text();
            dom.create_text(parent, decode_entities(text));
        }
    }

    dom.initialize_form_control_values();
    Ok(dom)
}

struct StartTag {
    name: String,
    attrs: BTreeMap<String, String>,
    self_closing: bool,
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn rest(&self) -> &'a str {
        self.src.get(self.pos..).unwrap_or_default()
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            return true;
        }
        false
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn skip_past(&mut self, terminator: &str, unclosed: &str) -> Result<()> {
        let end = self
            .rest()
            .find(terminator)
            .ok_or_else(|| Error::HtmlParse(unclosed.into()))?;
        self.pos += end + terminator.len();
        Ok(())
    }

    fn take_while(&mut self, accept: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&accept) {
            self.pos += 1;
        }
        self.src.get(start..self.pos).unwrap_or_default()
    }

    fn looking_at_start_tag(&self) -> bool {
        let bytes = self.rest().as_bytes();
        bytes.first() == Some(&b'<') && bytes.get(1).is_some_and(u8::is_ascii_alphabetic)
    }

    fn text(&mut self) -> &'a str {
        let start = self.pos;
        self.pos += 1;
        self.take_while(|b| b != b'<');
        self.src.get(start..self.pos).unwrap_or_default()
    }

    fn start_tag(&mut self) -> Result<StartTag> {
        self.pos += 1;
        let name = self.take_while(is_tag_char).to_ascii_lowercase();
        let mut attrs = BTreeMap::new();
        loop {
            self.skip_ws();
            if self.at_end() {
                return Err(Error::HtmlParse(format!("unclosed start tag <{name}>")));
            }
            if self.eat(">") {
                return Ok(StartTag {
                    name,
                    attrs,
                    self_closing: false,
                });
            }
            if self.eat("/>") {
                return Ok(StartTag {
                    name,
                    attrs,
                    self_closing: true,
                });
            }

            let attr = self.take_while(is_attr_name_char).to_ascii_lowercase();
            if attr.is_empty() {
                return Err(Error::HtmlParse(format!(
                    "invalid attribute name in <{name}> at byte {}",
                    self.pos
                )));
            }
            self.skip_ws();
            let value = if self.eat("=") {
                self.skip_ws();
                self.attr_value()?
            } else {
                String::new()
            };
            attrs.entry(attr).or_insert(value);
        }
    }

    fn attr_value(&mut self) -> Result<String> {
        match self.peek() {
            None => Err(Error::HtmlParse("missing attribute value".into())),
            Some(quote @ (b'"' | b'\'')) => {
                self.pos += 1;
                let raw = self.take_while(|b| b != quote);
                if !self.eat(if quote == b'"' { "\"" } else { "'" }) {
                    return Err(Error::HtmlParse("unclosed quoted attribute value".into()));
                }
                Ok(decode_entities(raw))
            }
            Some(_) => {
                let start = self.pos;
                while let Some(b) = self.peek() {
                    if b.is_ascii_whitespace() || b == b'>' || self.rest().starts_with("/>") {
                        break;
                    }
                    self.pos += 1;
                }
                Ok(decode_entities(self.src.get(start..self.pos).unwrap_or_default()))
            }
        }
    }

    fn end_tag(&mut self) -> Result<String> {
        self.pos += 2;
        self.skip_ws();
        let name = self.take_while(is_tag_char).to_ascii_lowercase();
        self.skip_past(">", "unclosed end tag")?;
        Ok(name)
    }

    // Content of script-like elements is not markup.
    fn raw_text_until_end_tag(&mut self, name: &str) -> Result<&'a str> {
        let needle = format!("</{name}");
        let rest = self.rest();
        let offset = rest
            .to_ascii_lowercase()
            .find(&needle)
            .ok_or_else(|| Error::HtmlParse(format!("unclosed <{name}>")))?;
        let body = rest.get(..offset).unwrap_or_default();
        self.pos += offset;
        self.end_tag()?;
        Ok(body)
    }
}

/// Decodes the character references markup authors and servers emit in
/// practice; anything unrecognised is kept verbatim.
pub(crate) fn decode_entities(src: &str) -> String {
    if !src.contains('&') {
        return src.to_string();
    }

    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let Some(end) = tail.find(';').filter(|end| *end <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let name = &tail[1..end];
        let decoded = match name {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ => name
                .strip_prefix("#x")
                .or_else(|| name.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| name.strip_prefix('#').and_then(|dec| dec.parse::<u32>().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub(crate) fn escape_text(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for ch in src.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub(crate) fn escape_attr(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for ch in src.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn is_tag_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

fn is_attr_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.' | b'@')
}

fn is_raw_text_tag(tag: &str) -> bool {
    matches!(tag, "script" | "style" | "textarea")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_quoted_scope_json_survives_parsing() -> Result<()> {
        let dom = parse_html(r#"<div id="s" az-scope='{"a":"x y","b":1}'></div>"#)?;
        let node = dom.by_id("s").ok_or_else(|| Error::SelectorNotFound("#s".into()))?;
        assert_eq!(dom.attr(node, "az-scope").as_deref(), Some(r#"{"a":"x y","b":1}"#));
        Ok(())
    }

    #[test]
    fn double_quoted_values_decode_entities() -> Result<()> {
        let dom = parse_html(r#"<div id="s" az-scope="{&quot;n&quot;:2}">a &amp; b</div>"#)?;
        let node = dom.by_id("s").ok_or_else(|| Error::SelectorNotFound("#s".into()))?;
        assert_eq!(dom.attr(node, "az-scope").as_deref(), Some(r#"{"n":2}"#));
        assert_eq!(dom.text_content(node), "a & b");
        Ok(())
    }

    #[test]
    fn binding_attribute_names_keep_colons_and_dots() -> Result<()> {
        let dom = parse_html(r#"<b id="x" az-bind:class.on="liked" az-bind:text="count"></b>"#)?;
        let node = dom.by_id("x").ok_or_else(|| Error::SelectorNotFound("#x".into()))?;
        assert_eq!(dom.attr(node, "az-bind:class.on").as_deref(), Some("liked"));
        assert_eq!(dom.attr(node, "az-bind:text").as_deref(), Some("count"));
        Ok(())
    }

    #[test]
    fn stray_end_tags_and_doctype_are_ignored() -> Result<()> {
        let dom = parse_html("<!DOCTYPE html><p id='p'>one</span>two</p><br>")?;
        let node = dom.by_id("p").ok_or_else(|| Error::SelectorNotFound("#p".into()))?;
        assert_eq!(dom.text_content(node), "onetwo");
        Ok(())
    }

    #[test]
    fn unclosed_comment_is_an_error() {
        assert!(matches!(
            parse_html("<p><!-- nope"),
            Err(Error::HtmlParse(_))
        ));
    }

    #[test]
    fn unknown_entities_stay_verbatim() {
        assert_eq!(decode_entities("a &bogus; b & c"), "a &bogus; b & c");
        assert_eq!(decode_entities("&#39;&#x27;"), "''");
    }
}
