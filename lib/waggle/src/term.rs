//! Self-describing binary term codec used on connected distribution links.
//!
//! Every top-level term on the wire starts with the format version byte 131;
//! nested terms do not repeat it. All multi-byte integers are big-endian.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::error;
use std::fmt;

pub const FORMAT_VERSION: u8 = 131;

const TAG_SMALL_INT: u8 = b'a';
const TAG_INT: u8 = b'b';
const TAG_ATOM: u8 = b'd';
const TAG_PID: u8 = b'g';
const TAG_SMALL_TUPLE: u8 = b'h';
const TAG_LARGE_TUPLE: u8 = b'i';
const TAG_NIL: u8 = b'j';
const TAG_NEW_REF: u8 = b'r';

/// A decoded term. Nested terms are held by value; pids and references embed
/// their node atom directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Int(i32),
    Atom(String),
    Tuple(Vec<Term>),
    Nil,
    Pid(Pid),
    Ref(Ref),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pid {
    pub node: String,
    pub id: u32,
    pub serial: u32,
    pub creation: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    pub node: String,
    pub creation: u8,
    pub ids: Vec<u32>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TermError {
    /// The requested length exceeds the available bytes.
    Truncated,
    /// A nested position holds a tag this codec cannot skip.
    UnknownTag,
    /// The leading byte of a top-level term is not the format version.
    BadVersion,
    /// An atom payload is not valid UTF-8.
    BadAtom,
}

impl fmt::Display for TermError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TermError::Truncated => write!(f, "truncated term"),
            TermError::UnknownTag => write!(f, "unknown tag in nested term"),
            TermError::BadVersion => write!(f, "bad term format version"),
            TermError::BadAtom => write!(f, "atom payload is not valid utf-8"),
        }
    }
}

impl error::Error for TermError {}

/// Appends the encoding of a single top-level term, version byte included.
pub fn encode(term: &Term, out: &mut Vec<u8>) {
    out.push(FORMAT_VERSION);
    encode_term(term, out);
}

fn encode_term(term: &Term, out: &mut Vec<u8>) {
    match term {
        Term::Int(value) => match u8::try_from(*value) {
            Ok(small) => {
                out.push(TAG_SMALL_INT);
                out.push(small);
            }
            Err(_) => {
                out.push(TAG_INT);
                out.write_i32::<BigEndian>(*value).expect("vec write");
            }
        },
        Term::Atom(name) => encode_atom(name, out),
        Term::Tuple(elements) => {
            if elements.len() < 256 {
                out.push(TAG_SMALL_TUPLE);
                out.push(elements.len() as u8);
            } else {
                out.push(TAG_LARGE_TUPLE);
                out.write_u32::<BigEndian>(elements.len() as u32).expect("vec write");
            }
            for element in elements {
                encode_term(element, out);
            }
        }
        Term::Nil => out.push(TAG_NIL),
        Term::Pid(pid) => {
            out.push(TAG_PID);
            encode_atom(&pid.node, out);
            out.write_u32::<BigEndian>(pid.id).expect("vec write");
            out.write_u32::<BigEndian>(pid.serial).expect("vec write");
            out.push(pid.creation);
        }
        Term::Ref(reference) => {
            out.push(TAG_NEW_REF);
            out.write_u16::<BigEndian>(reference.ids.len() as u16)
                .expect("vec write");
            encode_atom(&reference.node, out);
            out.push(reference.creation);
            for id in &reference.ids {
                out.write_u32::<BigEndian>(*id).expect("vec write");
            }
        }
    }
}

fn encode_atom(name: &str, out: &mut Vec<u8>) {
    out.push(TAG_ATOM);
    out.write_u16::<BigEndian>(name.len() as u16).expect("vec write");
    out.extend_from_slice(name.as_bytes());
}

/// Decodes one top-level term from the front of `buf`.
///
/// Returns the term and the exact number of bytes consumed. `Ok(None)` means
/// the caller should stop draining the frame: either `buf` is empty or the
/// term carries a tag this codec does not understand. Truncation is fatal.
pub fn decode(buf: &[u8]) -> Result<Option<(Term, usize)>, TermError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != FORMAT_VERSION {
        return Err(TermError::BadVersion);
    }
    match decode_term(&buf[1..])? {
        Some((term, used)) => Ok(Some((term, used + 1))),
        None => Ok(None),
    }
}

fn decode_term(buf: &[u8]) -> Result<Option<(Term, usize)>, TermError> {
    let (&tag, rest) = buf.split_first().ok_or(TermError::Truncated)?;

    match tag {
        TAG_SMALL_INT => {
            need(rest, 1)?;
            Ok(Some((Term::Int(i32::from(rest[0])), 2)))
        }
        TAG_INT => {
            need(rest, 4)?;
            Ok(Some((Term::Int(BigEndian::read_i32(&rest[..4])), 5)))
        }
        TAG_ATOM => {
            let (name, used) = read_atom_body(rest)?;
            Ok(Some((Term::Atom(name), used + 1)))
        }
        TAG_SMALL_TUPLE => {
            need(rest, 1)?;
            let (elements, used) = decode_sequence(&rest[1..], usize::from(rest[0]))?;
            Ok(Some((Term::Tuple(elements), used + 2)))
        }
        TAG_LARGE_TUPLE => {
            need(rest, 4)?;
            let arity = BigEndian::read_u32(&rest[..4]) as usize;
            let (elements, used) = decode_sequence(&rest[4..], arity)?;
            Ok(Some((Term::Tuple(elements), used + 5)))
        }
        TAG_NIL => Ok(Some((Term::Nil, 1))),
        TAG_PID => {
            let (node, mut offset) = read_atom_term(rest)?;
            need(rest, offset + 9)?;
            let id = BigEndian::read_u32(&rest[offset..offset + 4]);
            let serial = BigEndian::read_u32(&rest[offset + 4..offset + 8]);
            let creation = rest[offset + 8];
            offset += 9;
            Ok(Some((
                Term::Pid(Pid {
                    node,
                    id,
                    serial,
                    creation,
                }),
                offset + 1,
            )))
        }
        TAG_NEW_REF => {
            need(rest, 2)?;
            let id_count = usize::from(BigEndian::read_u16(&rest[..2]));
            let (node, atom_used) = read_atom_term(&rest[2..])?;
            let mut offset = 2 + atom_used;
            need(rest, offset + 1 + 4 * id_count)?;
            let creation = rest[offset];
            offset += 1;
            let mut ids = Vec::with_capacity(id_count);
            for _ in 0..id_count {
                ids.push(BigEndian::read_u32(&rest[offset..offset + 4]));
                offset += 4;
            }
            Ok(Some((
                Term::Ref(Ref {
                    node,
                    creation,
                    ids,
                }),
                offset + 1,
            )))
        }
        _ => Ok(None),
    }
}

/// Decodes `arity` consecutive nested terms. An unknown tag inside a
/// sequence is fatal since the element boundary cannot be recovered.
fn decode_sequence(buf: &[u8], arity: usize) -> Result<(Vec<Term>, usize), TermError> {
    let mut elements = Vec::with_capacity(arity.min(256));
    let mut offset = 0;
    for _ in 0..arity {
        match decode_term(&buf[offset..])? {
            Some((element, used)) => {
                elements.push(element);
                offset += used;
            }
            None => return Err(TermError::UnknownTag),
        }
    }
    Ok((elements, offset))
}

fn read_atom_term(buf: &[u8]) -> Result<(String, usize), TermError> {
    let (&tag, rest) = buf.split_first().ok_or(TermError::Truncated)?;
    if tag != TAG_ATOM {
        return Err(TermError::UnknownTag);
    }
    let (name, used) = read_atom_body(rest)?;
    Ok((name, used + 1))
}

fn read_atom_body(buf: &[u8]) -> Result<(String, usize), TermError> {
    need(buf, 2)?;
    let len = usize::from(BigEndian::read_u16(&buf[..2]));
    need(buf, 2 + len)?;
    let name = String::from_utf8(buf[2..2 + len].to_vec()).map_err(|_| TermError::BadAtom)?;
    Ok((name, 2 + len))
}

#[inline]
fn need(buf: &[u8], len: usize) -> Result<(), TermError> {
    if buf.len() < len {
        return Err(TermError::Truncated);
    }
    Ok(())
}
