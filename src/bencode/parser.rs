use nom::{
    IResult, Parser,
    bytes::complete::take,
    character::complete::{char, digit1},
    combinator::{opt, recognize},
    sequence::pair,
};
use sha1::{Digest, Sha1};

use crate::bencode::error::{BencodeError, RawError};

/// Nesting deeper than this is rejected rather than risking the call stack.
const MAX_DEPTH: usize = 64;

type BenResult<'a> = IResult<&'a [u8], Value, RawError<'a>>;

/// A single bencoded value.
///
/// Byte strings are opaque: torrent metadata mixes UTF-8 names with raw
/// SHA-1 blobs, so interpretation is left to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dictionary(Dictionary),
}

/// A bencoded dictionary, preserving insertion order so re-encoding
/// reproduces the input bytes.
///
/// `hash` is the SHA-1 digest of the dictionary's own raw span (`d...e`
/// inclusive), captured during parsing. For a torrent's `info` dictionary
/// this is the info hash, obtained without re-encoding anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dictionary {
    entries: Vec<(Vec<u8>, Value)>,
    hash: [u8; 20],
}

impl Dictionary {
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_slice() == key)
            .map(|(_, v)| v)
    }

    pub fn entries(&self) -> &[(Vec<u8>, Value)] {
        &self.entries
    }

    pub fn hash(&self) -> [u8; 20] {
        self.hash
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decodes the first bencoded value in `input`, returning it along with the
/// number of bytes consumed.
pub fn decode(input: &[u8]) -> Result<(Value, usize), BencodeError> {
    match parse_value(input, 0) {
        Ok((rest, value)) => Ok((value, input.len() - rest.len())),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(e.into_public(input)),
        Err(nom::Err::Incomplete(_)) => Err(BencodeError::Truncated(input.len())),
    }
}

fn parse_value(input: &[u8], depth: usize) -> BenResult<'_> {
    if depth > MAX_DEPTH {
        return Err(nom::Err::Failure(RawError::TooDeep(input)));
    }
    match input.first() {
        None => Err(nom::Err::Failure(RawError::Truncated(input))),
        Some(b'0'..=b'9') => {
            let (rest, data) = parse_raw_bytes(input)?;
            Ok((rest, Value::Bytes(data.to_vec())))
        }
        Some(b'i') => parse_integer(input),
        Some(b'l') => parse_list(input, depth),
        Some(b'd') => parse_dict(input, depth),
        Some(&byte) => Err(nom::Err::Failure(RawError::UnknownPrefix(input, byte))),
    }
}

/// `<len>:<bytes>`, used both for string values and dictionary keys.
fn parse_raw_bytes(start_inp: &[u8]) -> IResult<&[u8], &[u8], RawError<'_>> {
    let (inp, length) = digit1(start_inp)?;
    let (inp, _) = char(':')(inp)?;

    let length = std::str::from_utf8(length)
        .expect("digit1 only matches ASCII digits")
        .parse::<u64>()
        .map_err(|_| nom::Err::Failure(RawError::LengthPastEnd(start_inp)))?;

    if length > inp.len() as u64 {
        return Err(nom::Err::Failure(RawError::LengthPastEnd(start_inp)));
    }

    take(length as usize)(inp)
}

/// `i<digits>e`, optional leading minus. Decoding is permissive about
/// non-canonical spellings such as `i-0e` or leading zeros.
fn parse_integer(start_inp: &[u8]) -> BenResult<'_> {
    let (inp, _) = char('i')(start_inp)?;

    let (inp, body) = recognize(pair(opt(char('-')), digit1))
        .parse(inp)
        .map_err(|_: nom::Err<RawError>| nom::Err::Failure(RawError::InvalidInteger(start_inp)))?;

    let (inp, _) = char('e')(inp)
        .map_err(|_: nom::Err<RawError>| nom::Err::Failure(RawError::UnterminatedInteger(start_inp)))?;

    let value = std::str::from_utf8(body)
        .expect("integer body is ASCII by construction")
        .parse::<i64>()
        .map_err(|_| nom::Err::Failure(RawError::InvalidInteger(start_inp)))?;

    Ok((inp, Value::Integer(value)))
}

fn parse_list(start_inp: &[u8], depth: usize) -> BenResult<'_> {
    let mut inp = &start_inp[1..];
    let mut items = Vec::new();
    loop {
        match inp.first() {
            None => return Err(nom::Err::Failure(RawError::Truncated(inp))),
            Some(b'e') => return Ok((&inp[1..], Value::List(items))),
            Some(_) => {
                let (rest, value) = parse_value(inp, depth + 1)?;
                items.push(value);
                inp = rest;
            }
        }
    }
}

fn parse_dict(start_inp: &[u8], depth: usize) -> BenResult<'_> {
    let mut inp = &start_inp[1..];
    let mut entries: Vec<(Vec<u8>, Value)> = Vec::new();
    loop {
        match inp.first() {
            None => return Err(nom::Err::Failure(RawError::Truncated(inp))),
            Some(b'e') => {
                let rest = &inp[1..];
                let span = &start_inp[..start_inp.len() - rest.len()];
                let hash = Sha1::digest(span).into();
                return Ok((rest, Value::Dictionary(Dictionary { entries, hash })));
            }
            Some(b'0'..=b'9') => {
                let (rest, key) = parse_raw_bytes(inp)?;
                if entries.iter().any(|(k, _)| k.as_slice() == key) {
                    return Err(nom::Err::Failure(RawError::DuplicateKey(inp)));
                }
                let (rest, value) = parse_value(rest, depth + 1)?;
                entries.push((key.to_vec(), value));
                inp = rest;
            }
            Some(_) => return Err(nom::Err::Failure(RawError::NonStringKey(inp))),
        }
    }
}
