//! Incremental JSON record extraction.
//!
//! The extractor is fed arbitrary byte chunks and validates the document
//! structure as it goes. Values whose position matches the selection path
//! are assembled into [`Value`]s and handed out the moment their closing
//! byte is seen; everything else is checked and discarded. Memory is bounded
//! by the nesting depth plus the record currently being assembled.

use serde_json::{Map, Number, Value};

use crate::core::selection::SelectionPath;
use crate::error::{ParseError, ParseErrorKind};

#[derive(Debug)]
enum Lex {
    Idle,
    String { raw: Vec<u8>, escaped: bool },
    Number(Vec<u8>),
    Literal(Vec<u8>),
}

#[derive(Debug)]
enum Token {
    BeginObject,
    EndObject,
    BeginArray,
    EndArray,
    Colon,
    Comma,
    String(String),
    Scalar(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectState {
    KeyOrEnd,
    Key,
    Colon,
    Value,
    CommaOrEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayState {
    ValueOrEnd,
    Value,
    CommaOrEnd,
}

#[derive(Debug)]
enum Frame {
    Object { key: Option<String>, state: ObjectState },
    Array { index: usize, state: ArrayState },
}

#[derive(Debug)]
enum Partial {
    Object(Map<String, Value>),
    Array(Vec<Value>),
}

#[derive(Debug, Clone, Copy)]
struct Position {
    offset: u64,
    line:   u64,
    column: u64,
}

/// Push-driven JSON parser that emits the values selected by a path.
///
/// Several top-level values are accepted, so newline-delimited JSON works
/// with the same selection applied per line. Consecutive top-level values
/// must be separated by whitespace.
#[derive(Debug)]
pub struct RecordExtractor {
    selection: SelectionPath,
    lex:       Lex,
    frames:    Vec<Frame>,
    partials:  Vec<Partial>,
    capturing: bool,
    separate:  bool,
    position:  Position,
    poisoned:  Option<ParseError>,
}

impl RecordExtractor {
    pub fn new(selection: SelectionPath) -> Self {
        Self {
            selection,
            lex: Lex::Idle,
            frames: Vec::new(),
            partials: Vec::new(),
            capturing: false,
            separate: false,
            position: Position {
                offset: 0,
                line:   1,
                column: 1,
            },
            poisoned: None,
        }
    }

    pub fn selection(&self) -> &SelectionPath { &self.selection }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 { self.position.offset }

    /// Consume a chunk, calling `emit` for every record completed inside it.
    ///
    /// Records completed before a malformed byte are emitted before the
    /// error is returned. Once an error is returned, every later call
    /// returns it again.
    pub fn feed(&mut self, chunk: &[u8], emit: &mut impl FnMut(Value)) -> Result<(), ParseError> {
        if let Some(ref err) = self.poisoned {
            return Err(err.clone());
        }
        for &b in chunk {
            if let Err(err) = self.step(b, emit) {
                self.poisoned = Some(err.clone());
                return Err(err);
            }
            self.advance(b);
        }
        Ok(())
    }

    /// Signal end of input. Fails if a value is still open.
    pub fn finish(&mut self, emit: &mut impl FnMut(Value)) -> Result<(), ParseError> {
        if let Some(ref err) = self.poisoned {
            return Err(err.clone());
        }
        let result = match self.lex {
            Lex::String { .. } => Err(self.error(ParseErrorKind::UnexpectedEof)),
            Lex::Number(_) | Lex::Literal(_) => self.finish_scalar(emit),
            Lex::Idle => Ok(()),
        }
        .and_then(|()| {
            if self.frames.is_empty() {
                Ok(())
            } else {
                Err(self.error(ParseErrorKind::UnexpectedEof))
            }
        });
        if let Err(ref err) = result {
            self.poisoned = Some(err.clone());
        }
        result
    }

    fn advance(&mut self, b: u8) {
        self.position.offset += 1;
        if b == b'\n' {
            self.position.line += 1;
            self.position.column = 1;
        } else {
            self.position.column += 1;
        }
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            kind,
            offset: self.position.offset,
            line: self.position.line,
            column: self.position.column,
        }
    }

    fn step(&mut self, b: u8, emit: &mut impl FnMut(Value)) -> Result<(), ParseError> {
        match &mut self.lex {
            Lex::Idle => self.start_token(b, emit),
            Lex::String { raw, escaped } => {
                raw.push(b);
                if *escaped {
                    *escaped = false;
                } else if b == b'\\' {
                    *escaped = true;
                } else if b == b'"' {
                    let raw = std::mem::take(raw);
                    self.lex = Lex::Idle;
                    let s: String = serde_json::from_slice(&raw)
                        .map_err(|_| self.error(ParseErrorKind::InvalidString))?;
                    return self.on_token(Token::String(s), emit);
                }
                Ok(())
            }
            Lex::Number(buf) => {
                if matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') {
                    buf.push(b);
                    return Ok(());
                }
                self.finish_scalar(emit)?;
                self.start_token(b, emit)
            }
            Lex::Literal(buf) => {
                if b.is_ascii_alphabetic() {
                    if buf.len() >= 5 {
                        return Err(self.error(ParseErrorKind::InvalidLiteral));
                    }
                    buf.push(b);
                    return Ok(());
                }
                self.finish_scalar(emit)?;
                self.start_token(b, emit)
            }
        }
    }

    fn start_token(&mut self, b: u8, emit: &mut impl FnMut(Value)) -> Result<(), ParseError> {
        match b {
            b' ' | b'\t' | b'\n' | b'\r' => {
                self.separate = false;
                Ok(())
            }
            // A top-level value just ended without whitespace after it.
            _ if self.separate => Err(self.error(ParseErrorKind::UnexpectedByte(b))),
            b'{' => self.on_token(Token::BeginObject, emit),
            b'}' => self.on_token(Token::EndObject, emit),
            b'[' => self.on_token(Token::BeginArray, emit),
            b']' => self.on_token(Token::EndArray, emit),
            b':' => self.on_token(Token::Colon, emit),
            b',' => self.on_token(Token::Comma, emit),
            b'"' => {
                self.lex = Lex::String {
                    raw:     vec![b'"'],
                    escaped: false,
                };
                Ok(())
            }
            b'-' | b'0'..=b'9' => {
                self.lex = Lex::Number(vec![b]);
                Ok(())
            }
            b't' | b'f' | b'n' => {
                self.lex = Lex::Literal(vec![b]);
                Ok(())
            }
            _ => Err(self.error(ParseErrorKind::UnexpectedByte(b))),
        }
    }

    fn finish_scalar(&mut self, emit: &mut impl FnMut(Value)) -> Result<(), ParseError> {
        let value = match std::mem::replace(&mut self.lex, Lex::Idle) {
            Lex::Number(buf) => serde_json::from_slice::<Number>(&buf)
                .map(Value::Number)
                .map_err(|_| self.error(ParseErrorKind::InvalidNumber))?,
            Lex::Literal(buf) => match buf.as_slice() {
                b"true" => Value::Bool(true),
                b"false" => Value::Bool(false),
                b"null" => Value::Null,
                _ => return Err(self.error(ParseErrorKind::InvalidLiteral)),
            },
            other => {
                self.lex = other;
                return Ok(());
            }
        };
        self.on_token(Token::Scalar(value), emit)
    }

    fn on_token(&mut self, token: Token, emit: &mut impl FnMut(Value)) -> Result<(), ParseError> {
        match token {
            Token::Colon => match self.frames.last_mut() {
                Some(Frame::Object { state, .. }) if *state == ObjectState::Colon => {
                    *state = ObjectState::Value;
                    Ok(())
                }
                _ => Err(self.error(ParseErrorKind::UnexpectedToken("':'"))),
            },
            Token::Comma => match self.frames.last_mut() {
                Some(Frame::Object { state, .. }) if *state == ObjectState::CommaOrEnd => {
                    *state = ObjectState::Key;
                    Ok(())
                }
                Some(Frame::Array { index, state }) if *state == ArrayState::CommaOrEnd => {
                    *state = ArrayState::Value;
                    *index += 1;
                    Ok(())
                }
                _ => Err(self.error(ParseErrorKind::UnexpectedToken("','"))),
            },
            Token::EndObject => match self.frames.last() {
                Some(Frame::Object {
                    state: ObjectState::KeyOrEnd | ObjectState::CommaOrEnd,
                    ..
                }) => {
                    self.frames.pop();
                    self.close_container(emit);
                    Ok(())
                }
                _ => Err(self.error(ParseErrorKind::UnexpectedToken("'}'"))),
            },
            Token::EndArray => match self.frames.last() {
                Some(Frame::Array {
                    state: ArrayState::ValueOrEnd | ArrayState::CommaOrEnd,
                    ..
                }) => {
                    self.frames.pop();
                    self.close_container(emit);
                    Ok(())
                }
                _ => Err(self.error(ParseErrorKind::UnexpectedToken("']'"))),
            },
            Token::String(s) => {
                if let Some(Frame::Object { key, state }) = self.frames.last_mut() {
                    if matches!(*state, ObjectState::KeyOrEnd | ObjectState::Key) {
                        *key = Some(s);
                        *state = ObjectState::Colon;
                        return Ok(());
                    }
                }
                self.begin_value(Token::Scalar(Value::String(s)), emit)
            }
            value @ (Token::BeginObject | Token::BeginArray | Token::Scalar(_)) => {
                self.begin_value(value, emit)
            }
        }
    }

    fn begin_value(&mut self, token: Token, emit: &mut impl FnMut(Value)) -> Result<(), ParseError> {
        let allowed = match self.frames.last() {
            None => true,
            Some(Frame::Object { state, .. }) => *state == ObjectState::Value,
            Some(Frame::Array { state, .. }) => {
                matches!(*state, ArrayState::ValueOrEnd | ArrayState::Value)
            }
        };
        if !allowed {
            let what = match token {
                Token::BeginObject => "'{'",
                Token::BeginArray => "'['",
                _ => "value",
            };
            return Err(self.error(ParseErrorKind::UnexpectedToken(what)));
        }

        if !self.capturing && self.is_selected() {
            self.capturing = true;
        }

        match token {
            Token::BeginObject => {
                self.frames.push(Frame::Object {
                    key:   None,
                    state: ObjectState::KeyOrEnd,
                });
                if self.capturing {
                    self.partials.push(Partial::Object(Map::new()));
                }
            }
            Token::BeginArray => {
                self.frames.push(Frame::Array {
                    index: 0,
                    state: ArrayState::ValueOrEnd,
                });
                if self.capturing {
                    self.partials.push(Partial::Array(Vec::new()));
                }
            }
            Token::Scalar(value) => {
                let captured = self.capturing.then_some(value);
                self.complete_value(captured, emit);
            }
            _ => {}
        }
        Ok(())
    }

    fn is_selected(&self) -> bool {
        let segments = self.selection.segments();
        segments.len() == self.frames.len()
            && segments
                .iter()
                .zip(&self.frames)
                .all(|(segment, frame)| match frame {
                    Frame::Object { key, .. } => {
                        key.as_deref().is_some_and(|k| segment.matches_key(k))
                    }
                    Frame::Array { index, .. } => segment.matches_index(*index),
                })
    }

    fn close_container(&mut self, emit: &mut impl FnMut(Value)) {
        let captured = if self.capturing {
            match self.partials.pop() {
                Some(Partial::Object(map)) => Some(Value::Object(map)),
                Some(Partial::Array(items)) => Some(Value::Array(items)),
                None => None,
            }
        } else {
            None
        };
        self.complete_value(captured, emit);
    }

    /// Record that the value in the current position has ended. `captured`
    /// carries it when it is part of a selected record.
    fn complete_value(&mut self, captured: Option<Value>, emit: &mut impl FnMut(Value)) {
        if let Some(value) = captured {
            match self.partials.last_mut() {
                None => {
                    self.capturing = false;
                    emit(value);
                }
                Some(Partial::Array(items)) => items.push(value),
                Some(Partial::Object(map)) => {
                    if let Some(Frame::Object { key, .. }) = self.frames.last_mut() {
                        map.insert(key.take().unwrap_or_default(), value);
                    }
                }
            }
        }

        match self.frames.last_mut() {
            Some(Frame::Object { state, .. }) => *state = ObjectState::CommaOrEnd,
            Some(Frame::Array { state, .. }) => *state = ArrayState::CommaOrEnd,
            None => self.separate = true,
        }
    }
}
