//! The stable byte encodings the on-disk layout is made of.
//!
//! All multi-byte integers are big-endian so that lexicographic byte order
//! coincides with numeric order. Term encodings are the input of the
//! dictionary hash and must never change shape.

use crate::model::Term;
use crate::storage::error::CodecError;
use std::mem::size_of;
use uuid::Uuid;

/// Width of a term or quad id.
pub const ID_SIZE: usize = size_of::<u64>();
/// Width of an encoded (s, p, o, g) id-tuple.
pub const ID_TUPLE_SIZE: usize = 4 * ID_SIZE;

// Term tag bytes. The value part follows a 0x22 separator; `L` and `D` carry
// the language tag or datatype IRI between the tag and the separator.
const TAG_IRI: u8 = b'I';
const TAG_BLANK: u8 = b'B';
const TAG_LANGUAGE_LITERAL: u8 = b'L';
const TAG_STRING_LITERAL: u8 = b'S';
const TAG_INTEGER_LITERAL: u8 = b'i';
const TAG_DATATYPE_LITERAL: u8 = b'D';
// 17-byte compressed forms: tag + the 16 raw UUID bytes.
const TAG_IRI_UUID: u8 = b'U';
const TAG_BLANK_UUID: u8 = b'u';

const SEPARATOR: u8 = b'"';
const UUID_IRI_PREFIX: &str = "urn:uuid:";

/// Encodes a term to its stable byte representation.
///
/// `urn:uuid:` IRIs in canonical lowercase form and blank nodes whose id is
/// an uppercase canonical UUID compress to 17 bytes; everything else is the
/// tag-byte scheme. Encoding is total: every [`Term`] has a representation.
pub fn encode_term(term: &Term) -> Vec<u8> {
    match term {
        Term::Iri(iri) => {
            if let Some(uuid) = iri
                .strip_prefix(UUID_IRI_PREFIX)
                .and_then(|suffix| parse_uuid_exact(suffix, false))
            {
                let mut buffer = Vec::with_capacity(17);
                buffer.push(TAG_IRI_UUID);
                buffer.extend_from_slice(uuid.as_bytes());
                return buffer;
            }
            encode_tagged(TAG_IRI, "", iri)
        }
        Term::Blank(id) => {
            if let Some(uuid) = parse_uuid_exact(id, true) {
                let mut buffer = Vec::with_capacity(17);
                buffer.push(TAG_BLANK_UUID);
                buffer.extend_from_slice(uuid.as_bytes());
                return buffer;
            }
            encode_tagged(TAG_BLANK, "", id)
        }
        Term::LanguageLiteral { value, language } => {
            encode_tagged(TAG_LANGUAGE_LITERAL, language, value)
        }
        Term::StringLiteral(value) => encode_tagged(TAG_STRING_LITERAL, "", value),
        Term::IntegerLiteral(value) => encode_tagged(TAG_INTEGER_LITERAL, "", &value.to_string()),
        Term::DatatypeLiteral { value, datatype } => {
            encode_tagged(TAG_DATATYPE_LITERAL, datatype, value)
        }
    }
}

/// Decodes a term from the bytes produced by [`encode_term`].
pub fn decode_term(buffer: &[u8]) -> Result<Term, CodecError> {
    let Some((&tag, rest)) = buffer.split_first() else {
        return Err(CodecError::msg("empty term encoding"));
    };
    match tag {
        TAG_IRI_UUID => {
            let uuid = read_uuid(rest)?;
            Ok(Term::Iri(format!("{UUID_IRI_PREFIX}{}", uuid.hyphenated())))
        }
        TAG_BLANK_UUID => {
            // Blank UUID ids render in the uppercase canonical form.
            let uuid = read_uuid(rest)?;
            Ok(Term::Blank(
                uuid.hyphenated().to_string().to_ascii_uppercase(),
            ))
        }
        TAG_IRI => Ok(Term::Iri(read_value_only(rest)?.to_owned())),
        TAG_BLANK => Ok(Term::Blank(read_value_only(rest)?.to_owned())),
        TAG_STRING_LITERAL => Ok(Term::StringLiteral(read_value_only(rest)?.to_owned())),
        TAG_INTEGER_LITERAL => {
            let lexical = read_value_only(rest)?;
            let value = lexical
                .parse()
                .map_err(|_| CodecError::msg(format!("invalid integer lexical form {lexical:?}")))?;
            Ok(Term::IntegerLiteral(value))
        }
        TAG_LANGUAGE_LITERAL => {
            let (language, value) = split_tagged(rest)?;
            Ok(Term::LanguageLiteral {
                value: value.to_owned(),
                language: language.to_owned(),
            })
        }
        TAG_DATATYPE_LITERAL => {
            let (datatype, value) = split_tagged(rest)?;
            Ok(Term::DatatypeLiteral {
                value: value.to_owned(),
                datatype: datatype.to_owned(),
            })
        }
        tag => Err(CodecError::UnknownTag(tag)),
    }
}

fn encode_tagged(tag: u8, head: &str, value: &str) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(2 + head.len() + value.len());
    buffer.push(tag);
    buffer.extend_from_slice(head.as_bytes());
    buffer.push(SEPARATOR);
    buffer.extend_from_slice(value.as_bytes());
    buffer
}

/// Splits at the first 0x22 byte into (head, value).
fn split_tagged(buffer: &[u8]) -> Result<(&str, &str), CodecError> {
    let separator = buffer
        .iter()
        .position(|&b| b == SEPARATOR)
        .ok_or(CodecError::MissingSeparator)?;
    Ok((
        std::str::from_utf8(&buffer[..separator])?,
        std::str::from_utf8(&buffer[separator + 1..])?,
    ))
}

fn read_value_only(buffer: &[u8]) -> Result<&str, CodecError> {
    let (head, value) = split_tagged(buffer)?;
    if head.is_empty() {
        Ok(value)
    } else {
        Err(CodecError::msg("unexpected bytes before the separator"))
    }
}

fn read_uuid(buffer: &[u8]) -> Result<Uuid, CodecError> {
    let bytes: [u8; 16] = buffer.try_into().map_err(|_| CodecError::Length {
        expected: 16,
        found: buffer.len(),
    })?;
    Ok(Uuid::from_bytes(bytes))
}

/// Parses `text` as a UUID if and only if the compressed form round-trips,
/// i.e. the canonical rendering (uppercase for blank node ids, lowercase
/// otherwise) is byte-identical to the input.
fn parse_uuid_exact(text: &str, uppercase: bool) -> Option<Uuid> {
    let uuid = Uuid::try_parse(text).ok()?;
    let canonical = if uppercase {
        uuid.hyphenated().to_string().to_ascii_uppercase()
    } else {
        uuid.hyphenated().to_string()
    };
    (canonical == text).then_some(uuid)
}

/// Appends the big-endian encoding of `value`.
#[inline]
pub fn write_u64(buffer: &mut Vec<u8>, value: u64) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

/// Decodes a single 8-byte big-endian integer.
pub fn decode_u64(buffer: &[u8]) -> Result<u64, CodecError> {
    let bytes: [u8; ID_SIZE] = buffer.try_into().map_err(|_| CodecError::Length {
        expected: ID_SIZE,
        found: buffer.len(),
    })?;
    Ok(u64::from_be_bytes(bytes))
}

/// Encodes an (s, p, o, g) id-tuple as 32 bytes.
pub fn encode_id_tuple(tuple: &[u64; 4]) -> [u8; ID_TUPLE_SIZE] {
    let mut buffer = [0; ID_TUPLE_SIZE];
    for (chunk, id) in buffer.chunks_exact_mut(ID_SIZE).zip(tuple) {
        chunk.copy_from_slice(&id.to_be_bytes());
    }
    buffer
}

/// Decodes a 32-byte id-tuple.
pub fn decode_id_tuple(buffer: &[u8]) -> Result<[u64; 4], CodecError> {
    if buffer.len() != ID_TUPLE_SIZE {
        return Err(CodecError::Length {
            expected: ID_TUPLE_SIZE,
            found: buffer.len(),
        });
    }
    let mut tuple = [0; 4];
    for (id, chunk) in tuple.iter_mut().zip(buffer.chunks_exact(ID_SIZE)) {
        let mut bytes = [0; ID_SIZE];
        bytes.copy_from_slice(chunk);
        *id = u64::from_be_bytes(bytes);
    }
    Ok(tuple)
}

/// Decodes a concatenation of 8-byte big-endian integers (no length prefix).
pub fn decode_u64s(buffer: &[u8]) -> Result<Vec<u64>, CodecError> {
    if buffer.len() % ID_SIZE != 0 {
        return Err(CodecError::Length {
            expected: buffer.len().next_multiple_of(ID_SIZE),
            found: buffer.len(),
        });
    }
    buffer
        .chunks_exact(ID_SIZE)
        .map(decode_u64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(term: Term) {
        assert_eq!(term, decode_term(&encode_term(&term)).unwrap());
    }

    #[test]
    fn term_round_trips() {
        round_trip(Term::iri("http://example.org/s"));
        round_trip(Term::blank("b0"));
        round_trip(Term::string("o"));
        round_trip(Term::string("value with \" and \u{1F980}"));
        round_trip(Term::integer(7));
        round_trip(Term::integer(-42));
        round_trip(Term::language_literal("chat", "fr"));
        round_trip(Term::datatype_literal(
            "1.5",
            "http://www.w3.org/2001/XMLSchema#decimal",
        ));
    }

    #[test]
    fn uuid_iri_compressed_form() {
        let term = Term::iri("urn:uuid:08b7a198-7eaf-4a6a-b0f4-258cb7e299fe");
        let encoded = encode_term(&term);
        assert_eq!(
            encoded,
            [
                0x55, 0x08, 0xb7, 0xa1, 0x98, 0x7e, 0xaf, 0x4a, 0x6a, 0xb0, 0xf4, 0x25, 0x8c,
                0xb7, 0xe2, 0x99, 0xfe
            ]
        );
        assert_eq!(term, decode_term(&encoded).unwrap());
    }

    #[test]
    fn uuid_blank_compressed_form() {
        let term = Term::blank("08B7A198-7EAF-4A6A-B0F4-258CB7E299FE");
        let encoded = encode_term(&term);
        assert_eq!(
            encoded,
            [
                0x75, 0x08, 0xb7, 0xa1, 0x98, 0x7e, 0xaf, 0x4a, 0x6a, 0xb0, 0xf4, 0x25, 0x8c,
                0xb7, 0xe2, 0x99, 0xfe
            ]
        );
        assert_eq!(term, decode_term(&encoded).unwrap());
    }

    #[test]
    fn non_canonical_uuid_stays_verbose() {
        // Uppercase urn:uuid IRIs and lowercase blank UUID ids would not
        // round-trip through the compressed form, so they must not use it.
        let iri = Term::iri("urn:uuid:08B7A198-7EAF-4A6A-B0F4-258CB7E299FE");
        assert_eq!(encode_term(&iri)[0], b'I');
        round_trip(iri);

        let blank = Term::blank("08b7a198-7eaf-4a6a-b0f4-258cb7e299fe");
        assert_eq!(encode_term(&blank)[0], b'B');
        round_trip(blank);
    }

    #[test]
    fn value_may_contain_separator() {
        let term = Term::datatype_literal("a\"b", "http://example.org/dt");
        round_trip(term);
    }

    #[test]
    fn id_tuple_round_trips() {
        let tuple = [1, u64::MAX, 0, 0x0102_0304_0506_0708];
        let encoded = encode_id_tuple(&tuple);
        assert_eq!(encoded.len(), ID_TUPLE_SIZE);
        assert_eq!(tuple, decode_id_tuple(&encoded).unwrap());
    }

    #[test]
    fn tuple_length_is_checked() {
        assert!(matches!(
            decode_id_tuple(&[0; 31]),
            Err(CodecError::Length { .. })
        ));
        assert!(matches!(decode_u64(&[0; 7]), Err(CodecError::Length { .. })));
    }

    #[test]
    fn big_endian_order_matches_numeric_order() {
        let smaller = encode_id_tuple(&[1, 2, 3, 4]);
        let bigger = encode_id_tuple(&[1, 2, 3, 5]);
        assert!(smaller < bigger);
        let much_bigger = encode_id_tuple(&[2, 0, 0, 0]);
        assert!(bigger < much_bigger);
    }
}
