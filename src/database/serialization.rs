//! Wire format for stored choice sequences.
//!
//! ```text
//! u8   version (currently 1)
//! u32  number of choices
//! then per choice, a tag byte and a payload:
//!   0 boolean  u8 (0 or 1)
//!   1 integer  i128 as high u64, low u64
//!   2 float    u64 IEEE-754 bits
//!   3 bytes    u32 length, raw bytes
//!   4 string   u32 length, UTF-8 bytes
//!   5 index    u64
//! ```
//!
//! All integers are big-endian. Anything that does not parse exactly,
//! including trailing bytes, is reported as corruption.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{DatabaseError, DatabaseResult};
use crate::choice::ChoiceValue;

pub const FORMAT_VERSION: u8 = 1;

const TAG_BOOLEAN: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_BYTES: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_INDEX: u8 = 5;

pub fn choices_to_bytes(values: &[ChoiceValue]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(5 + values.len() * 9);
    // Writes into a Vec cannot fail.
    let _ = write_choices(&mut buffer, values);
    buffer
}

fn write_choices(buffer: &mut Vec<u8>, values: &[ChoiceValue]) -> std::io::Result<()> {
    buffer.write_u8(FORMAT_VERSION)?;
    buffer.write_u32::<BigEndian>(values.len() as u32)?;
    for value in values {
        match value {
            ChoiceValue::Boolean(b) => {
                buffer.write_u8(TAG_BOOLEAN)?;
                buffer.write_u8(*b as u8)?;
            }
            ChoiceValue::Integer(i) => {
                let bits = *i as u128;
                buffer.write_u8(TAG_INTEGER)?;
                buffer.write_u64::<BigEndian>((bits >> 64) as u64)?;
                buffer.write_u64::<BigEndian>(bits as u64)?;
            }
            ChoiceValue::Float(f) => {
                buffer.write_u8(TAG_FLOAT)?;
                buffer.write_u64::<BigEndian>(f.to_bits())?;
            }
            ChoiceValue::Bytes(bytes) => {
                buffer.write_u8(TAG_BYTES)?;
                buffer.write_u32::<BigEndian>(bytes.len() as u32)?;
                buffer.extend_from_slice(bytes);
            }
            ChoiceValue::String(s) => {
                buffer.write_u8(TAG_STRING)?;
                buffer.write_u32::<BigEndian>(s.len() as u32)?;
                buffer.extend_from_slice(s.as_bytes());
            }
            ChoiceValue::Index(i) => {
                buffer.write_u8(TAG_INDEX)?;
                buffer.write_u64::<BigEndian>(*i)?;
            }
        }
    }
    Ok(())
}

fn truncated(_: std::io::Error) -> DatabaseError {
    DatabaseError::Corruption("entry is truncated".to_string())
}

fn read_blob(cursor: &mut Cursor<&[u8]>) -> DatabaseResult<Vec<u8>> {
    let len = cursor.read_u32::<BigEndian>().map_err(truncated)? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(DatabaseError::Corruption(format!("length {} exceeds the {} remaining bytes", len, remaining)));
    }
    let mut blob = vec![0; len];
    cursor.read_exact(&mut blob).map_err(truncated)?;
    Ok(blob)
}

pub fn choices_from_bytes(data: &[u8]) -> DatabaseResult<Vec<ChoiceValue>> {
    let mut cursor = Cursor::new(data);
    let version = cursor.read_u8().map_err(truncated)?;
    if version != FORMAT_VERSION {
        return Err(DatabaseError::Corruption(format!("unknown format version {}", version)));
    }
    let count = cursor.read_u32::<BigEndian>().map_err(truncated)? as usize;
    // Every record takes at least two bytes.
    let mut values = Vec::with_capacity(count.min(data.len() / 2));
    for _ in 0..count {
        let tag = cursor.read_u8().map_err(truncated)?;
        let value = match tag {
            TAG_BOOLEAN => match cursor.read_u8().map_err(truncated)? {
                0 => ChoiceValue::Boolean(false),
                1 => ChoiceValue::Boolean(true),
                other => return Err(DatabaseError::Corruption(format!("invalid boolean byte {}", other))),
            },
            TAG_INTEGER => {
                let high = cursor.read_u64::<BigEndian>().map_err(truncated)? as u128;
                let low = cursor.read_u64::<BigEndian>().map_err(truncated)? as u128;
                ChoiceValue::Integer(((high << 64) | low) as i128)
            }
            TAG_FLOAT => ChoiceValue::Float(f64::from_bits(cursor.read_u64::<BigEndian>().map_err(truncated)?)),
            TAG_BYTES => ChoiceValue::Bytes(read_blob(&mut cursor)?),
            TAG_STRING => {
                let bytes = read_blob(&mut cursor)?;
                let s = String::from_utf8(bytes)
                    .map_err(|e| DatabaseError::Corruption(format!("string is not UTF-8: {}", e)))?;
                ChoiceValue::String(s)
            }
            TAG_INDEX => ChoiceValue::Index(cursor.read_u64::<BigEndian>().map_err(truncated)?),
            other => return Err(DatabaseError::Corruption(format!("unknown choice tag {}", other))),
        };
        values.push(value);
    }
    if (cursor.position() as usize) != data.len() {
        return Err(DatabaseError::Corruption(format!(
            "{} trailing bytes after {} choices",
            data.len() - cursor.position() as usize,
            count
        )));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_every_kind() {
        let values = vec![
            ChoiceValue::Boolean(true),
            ChoiceValue::Integer(i128::MIN),
            ChoiceValue::Integer(-1),
            ChoiceValue::Float(-0.0),
            ChoiceValue::Float(f64::NAN),
            ChoiceValue::Bytes(vec![0, 255]),
            ChoiceValue::String("héllo".to_string()),
            ChoiceValue::Index(42),
        ];
        assert_eq!(choices_from_bytes(&choices_to_bytes(&values)).unwrap(), values);
    }

    #[test]
    fn layout_is_stable() {
        let bytes = choices_to_bytes(&[ChoiceValue::Boolean(true), ChoiceValue::Index(2)]);
        assert_eq!(bytes, vec![1, 0, 0, 0, 2, 0, 1, 5, 0, 0, 0, 0, 0, 0, 0, 2]);
        assert_eq!(choices_to_bytes(&[]), vec![1, 0, 0, 0, 0]);
    }

    #[test]
    fn malformed_input_is_corruption() {
        let good = choices_to_bytes(&[ChoiceValue::String("abc".to_string())]);
        for bad in [
            Vec::new(),
            vec![2, 0, 0, 0, 0],
            good[..good.len() - 1].to_vec(),
            [good.as_slice(), &[0]].concat(),
            vec![1, 0, 0, 0, 1, 9],
            vec![1, 0, 0, 0, 1, 0, 7],
            vec![1, 0, 0, 0, 1, 3, 255, 255, 255, 255],
            vec![1, 0, 0, 0, 1, 4, 0, 0, 0, 1, 0xff],
        ] {
            assert!(
                matches!(choices_from_bytes(&bad), Err(DatabaseError::Corruption(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }
}
