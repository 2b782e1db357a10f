//! Streaming scanner for extracted page files
//!
//! A page file holds a single JSON object in which the records to load
//! appear as an array value of a top-level member. The scanner walks the
//! document byte by byte and parses one record object at a time into a
//! [`serde_json::Map`], so memory use is bounded by the largest record
//! rather than the page size. Trailing commas inside objects and arrays are
//! tolerated, since the upstream service has been observed to emit them.
//!
//! Before a record is handed to the [`RecordHandler`], its members are
//! sorted into canonical order: `id` first, remaining keys lexicographic,
//! applied recursively. This keeps the stored document byte-identical
//! across runs for unchanged records.

use anyhow::{bail, Result};
use serde_json::{Map, Number, Value};
use std::io::{Bytes, Read};

/// Receives each record object parsed from a page file
pub trait RecordHandler {
    fn on_record(&mut self, record: Map<String, Value>) -> Result<()>;
}

/// Incremental parser over one page file
pub struct PageScanner<R: Read> {
    bytes: Bytes<R>,
    peeked: Option<u8>,
    pos: u64,
}

impl<R: Read> PageScanner<R> {
    pub fn new(input: R) -> Self {
        PageScanner {
            bytes: input.bytes(),
            peeked: None,
            pos: 0,
        }
    }

    /// Scan the whole page, delivering each record to `handler`
    ///
    /// Returns the number of records delivered. Any malformed JSON is an
    /// error; the caller treats it as fatal for the table being loaded.
    pub fn scan(mut self, handler: &mut dyn RecordHandler) -> Result<u64> {
        self.skip_ws()?;
        match self.peek()? {
            Some(b'{') => {}
            _ => bail!("page file does not start with a JSON object"),
        }
        let count = self.scan_top_level(handler)?;
        self.skip_ws()?;
        if let Some(c) = self.peek()? {
            bail!("trailing content at byte {}: {:?}", self.pos, c as char);
        }
        Ok(count)
    }

    /// Walk the top-level object; every array-valued member is treated as
    /// a records array and its element objects are delivered in order.
    fn scan_top_level(&mut self, handler: &mut dyn RecordHandler) -> Result<u64> {
        self.expect(b'{')?;
        let mut count = 0u64;
        loop {
            self.skip_ws()?;
            match self.peek()? {
                Some(b'}') => {
                    self.advance()?;
                    return Ok(count);
                }
                Some(b'"') => {}
                Some(c) => bail!("expected member name at byte {}, found {:?}", self.pos, c as char),
                None => bail!("unexpected end of page file"),
            }
            self.parse_string()?;
            self.skip_ws()?;
            self.expect(b':')?;
            self.skip_ws()?;
            if self.peek()? == Some(b'[') {
                count += self.scan_records_array(handler)?;
            } else {
                self.skip_value()?;
            }
            self.skip_ws()?;
            match self.peek()? {
                Some(b',') => {
                    self.advance()?;
                }
                Some(b'}') => {
                    self.advance()?;
                    return Ok(count);
                }
                Some(c) => bail!("expected ',' or '}}' at byte {}, found {:?}", self.pos, c as char),
                None => bail!("unexpected end of page file"),
            }
        }
    }

    fn scan_records_array(&mut self, handler: &mut dyn RecordHandler) -> Result<u64> {
        self.expect(b'[')?;
        let mut count = 0u64;
        loop {
            self.skip_ws()?;
            match self.peek()? {
                Some(b']') => {
                    self.advance()?;
                    return Ok(count);
                }
                Some(b'{') => {}
                Some(c) => bail!(
                    "record at byte {} is not an object: starts with {:?}",
                    self.pos,
                    c as char
                ),
                None => bail!("unexpected end of page file"),
            }
            let mut record = self.parse_object()?;
            canonical_sort(&mut record);
            handler.on_record(record)?;
            count += 1;
            self.skip_ws()?;
            match self.peek()? {
                Some(b',') => {
                    self.advance()?;
                }
                Some(b']') => {
                    self.advance()?;
                    return Ok(count);
                }
                Some(c) => bail!("expected ',' or ']' at byte {}, found {:?}", self.pos, c as char),
                None => bail!("unexpected end of page file"),
            }
        }
    }

    // --- value parsing -------------------------------------------------

    fn parse_value(&mut self) -> Result<Value> {
        match self.peek()? {
            Some(b'{') => Ok(Value::Object(self.parse_object()?)),
            Some(b'[') => Ok(Value::Array(self.parse_array()?)),
            Some(b'"') => Ok(Value::String(self.parse_string()?)),
            Some(b't') => {
                self.expect_literal(b"true")?;
                Ok(Value::Bool(true))
            }
            Some(b'f') => {
                self.expect_literal(b"false")?;
                Ok(Value::Bool(false))
            }
            Some(b'n') => {
                self.expect_literal(b"null")?;
                Ok(Value::Null)
            }
            Some(c) if c == b'-' || c.is_ascii_digit() => Ok(Value::Number(self.parse_number()?)),
            Some(c) => bail!("unexpected character {:?} at byte {}", c as char, self.pos),
            None => bail!("unexpected end of page file"),
        }
    }

    fn parse_object(&mut self) -> Result<Map<String, Value>> {
        self.expect(b'{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws()?;
            match self.peek()? {
                Some(b'}') => {
                    self.advance()?;
                    return Ok(map);
                }
                Some(b'"') => {}
                Some(c) => bail!("expected member name at byte {}, found {:?}", self.pos, c as char),
                None => bail!("unexpected end of page file"),
            }
            let key = self.parse_string()?;
            self.skip_ws()?;
            self.expect(b':')?;
            self.skip_ws()?;
            let value = self.parse_value()?;
            map.insert(key, value);
            self.skip_ws()?;
            match self.peek()? {
                Some(b',') => {
                    self.advance()?;
                }
                Some(b'}') => {
                    self.advance()?;
                    return Ok(map);
                }
                Some(c) => bail!("expected ',' or '}}' at byte {}, found {:?}", self.pos, c as char),
                None => bail!("unexpected end of page file"),
            }
        }
    }

    fn parse_array(&mut self) -> Result<Vec<Value>> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws()?;
            match self.peek()? {
                Some(b']') => {
                    self.advance()?;
                    return Ok(items);
                }
                Some(_) => {}
                None => bail!("unexpected end of page file"),
            }
            items.push(self.parse_value()?);
            self.skip_ws()?;
            match self.peek()? {
                Some(b',') => {
                    self.advance()?;
                }
                Some(b']') => {
                    self.advance()?;
                    return Ok(items);
                }
                Some(c) => bail!("expected ',' or ']' at byte {}, found {:?}", self.pos, c as char),
                None => bail!("unexpected end of page file"),
            }
        }
    }

    fn parse_string(&mut self) -> Result<String> {
        self.expect(b'"')?;
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let c = match self.next_byte()? {
                Some(c) => c,
                None => bail!("unterminated string at byte {}", self.pos),
            };
            match c {
                b'"' => break,
                b'\\' => {
                    let esc = match self.next_byte()? {
                        Some(e) => e,
                        None => bail!("unterminated escape at byte {}", self.pos),
                    };
                    match esc {
                        b'"' => buf.push(b'"'),
                        b'\\' => buf.push(b'\\'),
                        b'/' => buf.push(b'/'),
                        b'b' => buf.push(0x08),
                        b'f' => buf.push(0x0c),
                        b'n' => buf.push(b'\n'),
                        b'r' => buf.push(b'\r'),
                        b't' => buf.push(b'\t'),
                        b'u' => {
                            let cp = self.parse_unicode_escape()?;
                            let mut utf8 = [0u8; 4];
                            buf.extend_from_slice(cp.encode_utf8(&mut utf8).as_bytes());
                        }
                        _ => bail!("invalid escape \\{} at byte {}", esc as char, self.pos),
                    }
                }
                _ => buf.push(c),
            }
        }
        String::from_utf8(buf)
            .map_err(|_| anyhow::anyhow!("invalid UTF-8 in string ending at byte {}", self.pos))
    }

    /// Decode \uXXXX after the backslash-u, pairing surrogates
    fn parse_unicode_escape(&mut self) -> Result<char> {
        let unit = self.parse_hex4()?;
        if (0xd800..0xdc00).contains(&unit) {
            // High surrogate must be followed by \uXXXX low surrogate
            if self.next_byte()? != Some(b'\\') || self.next_byte()? != Some(b'u') {
                bail!("unpaired surrogate at byte {}", self.pos);
            }
            let low = self.parse_hex4()?;
            if !(0xdc00..0xe000).contains(&low) {
                bail!("invalid low surrogate at byte {}", self.pos);
            }
            let cp = 0x10000 + ((unit as u32 - 0xd800) << 10) + (low as u32 - 0xdc00);
            return char::from_u32(cp)
                .ok_or_else(|| anyhow::anyhow!("invalid code point at byte {}", self.pos));
        }
        if (0xdc00..0xe000).contains(&unit) {
            bail!("unpaired surrogate at byte {}", self.pos);
        }
        char::from_u32(unit as u32)
            .ok_or_else(|| anyhow::anyhow!("invalid code point at byte {}", self.pos))
    }

    fn parse_hex4(&mut self) -> Result<u16> {
        let mut value: u16 = 0;
        for _ in 0..4 {
            let c = match self.next_byte()? {
                Some(c) => c,
                None => bail!("unterminated unicode escape at byte {}", self.pos),
            };
            let digit = (c as char)
                .to_digit(16)
                .ok_or_else(|| anyhow::anyhow!("invalid hex digit at byte {}", self.pos))?;
            value = (value << 4) | digit as u16;
        }
        Ok(value)
    }

    fn parse_number(&mut self) -> Result<Number> {
        let mut literal = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek()? {
            match c {
                b'0'..=b'9' | b'-' | b'+' => literal.push(c as char),
                b'.' | b'e' | b'E' => {
                    is_float = true;
                    literal.push(c as char);
                }
                _ => break,
            }
            self.advance()?;
        }
        if !is_float {
            if let Ok(i) = literal.parse::<i64>() {
                return Ok(Number::from(i));
            }
            if let Ok(u) = literal.parse::<u64>() {
                return Ok(Number::from(u));
            }
        }
        let d: f64 = literal
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid number {:?} at byte {}", literal, self.pos))?;
        Number::from_f64(d)
            .ok_or_else(|| anyhow::anyhow!("non-finite number {:?} at byte {}", literal, self.pos))
    }

    // --- value skipping ------------------------------------------------

    /// Parse and discard a value without building a tree
    fn skip_value(&mut self) -> Result<()> {
        match self.peek()? {
            Some(b'{') => self.skip_container(b'{', b'}'),
            Some(b'[') => self.skip_container(b'[', b']'),
            Some(b'"') => {
                self.parse_string()?;
                Ok(())
            }
            Some(b't') => self.expect_literal(b"true"),
            Some(b'f') => self.expect_literal(b"false"),
            Some(b'n') => self.expect_literal(b"null"),
            Some(c) if c == b'-' || c.is_ascii_digit() => {
                self.parse_number()?;
                Ok(())
            }
            Some(c) => bail!("unexpected character {:?} at byte {}", c as char, self.pos),
            None => bail!("unexpected end of page file"),
        }
    }

    /// Skip a balanced container by depth counting, honoring strings
    fn skip_container(&mut self, open: u8, close: u8) -> Result<()> {
        self.expect(open)?;
        let mut depth = 1usize;
        loop {
            let c = match self.next_byte()? {
                Some(c) => c,
                None => bail!("unterminated {:?} at byte {}", open as char, self.pos),
            };
            if c == b'"' {
                // Back up into parse_string's framing by consuming the rest
                // of the string here: escapes only matter for '"' and '\\'.
                loop {
                    match self.next_byte()? {
                        Some(b'"') => break,
                        Some(b'\\') => {
                            self.next_byte()?;
                        }
                        Some(_) => {}
                        None => bail!("unterminated string at byte {}", self.pos),
                    }
                }
            } else if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
        }
    }

    // --- low-level input -----------------------------------------------

    fn next_byte(&mut self) -> Result<Option<u8>> {
        if let Some(c) = self.peeked.take() {
            self.pos += 1;
            return Ok(Some(c));
        }
        match self.bytes.next() {
            Some(Ok(c)) => {
                self.pos += 1;
                Ok(Some(c))
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        if self.peeked.is_none() {
            self.peeked = match self.bytes.next() {
                Some(Ok(c)) => Some(c),
                Some(Err(e)) => return Err(e.into()),
                None => None,
            };
        }
        Ok(self.peeked)
    }

    fn advance(&mut self) -> Result<()> {
        self.next_byte()?;
        Ok(())
    }

    fn skip_ws(&mut self) -> Result<()> {
        while let Some(c) = self.peek()? {
            match c {
                b' ' | b'\t' | b'\n' | b'\r' => {
                    self.advance()?;
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn expect(&mut self, expected: u8) -> Result<()> {
        match self.next_byte()? {
            Some(c) if c == expected => Ok(()),
            Some(c) => bail!(
                "expected {:?} at byte {}, found {:?}",
                expected as char,
                self.pos,
                c as char
            ),
            None => bail!("unexpected end of page file"),
        }
    }

    fn expect_literal(&mut self, literal: &[u8]) -> Result<()> {
        for &expected in literal {
            self.expect(expected)?;
        }
        Ok(())
    }
}

/// Sort object members into canonical order: `id` first, then lexicographic
///
/// Applied recursively so nested objects serialize identically across runs.
pub fn canonical_sort(map: &mut Map<String, Value>) {
    let mut entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
    entries.sort_by(|(a, _), (b, _)| compare_member_names(a, b));
    for (key, mut value) in entries {
        canonical_sort_value(&mut value);
        map.insert(key, value);
    }
}

fn canonical_sort_value(value: &mut Value) {
    match value {
        Value::Object(map) => canonical_sort(map),
        Value::Array(items) => {
            for item in items {
                canonical_sort_value(item);
            }
        }
        _ => {}
    }
}

fn compare_member_names(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a == "id", b == "id") {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}
