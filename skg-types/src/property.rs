/// A typed property value as read from or written to a property column.
///
/// Encoding is tag-byte-prefixed, matching the scheme the column types in
/// `ColumnType` describe: fixed-width numeric types encode to their native
/// little-endian representation, `Varchar` is length-prefixed.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    FixedBytes(Vec<u8>),
    Time(i64),
    Varchar(String),
}

impl PropertyValue {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            PropertyValue::Null => vec![0],
            PropertyValue::Int32(v) => {
                let mut out = vec![1];
                out.extend_from_slice(&v.to_le_bytes());
                out
            }
            PropertyValue::Int64(v) => {
                let mut out = vec![2];
                out.extend_from_slice(&v.to_le_bytes());
                out
            }
            PropertyValue::Float32(v) => {
                let mut out = vec![3];
                out.extend_from_slice(&v.to_le_bytes());
                out
            }
            PropertyValue::Float64(v) => {
                let mut out = vec![4];
                out.extend_from_slice(&v.to_le_bytes());
                out
            }
            PropertyValue::FixedBytes(bytes) => {
                let mut out = vec![5];
                let len = u16::try_from(bytes.len()).expect("fixed bytes width should fit in u16");
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(bytes);
                out
            }
            PropertyValue::Time(v) => {
                let mut out = vec![6];
                out.extend_from_slice(&v.to_le_bytes());
                out
            }
            PropertyValue::Varchar(s) => {
                let mut out = vec![7];
                let bytes = s.as_bytes();
                let len = u32::try_from(bytes.len()).expect("varchar length should fit in u32");
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(bytes);
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let tag = bytes[0];
        let payload = &bytes[1..];
        match tag {
            0 => Ok(PropertyValue::Null),
            1 => Ok(PropertyValue::Int32(i32::from_le_bytes(
                take::<4>(payload)?,
            ))),
            2 => Ok(PropertyValue::Int64(i64::from_le_bytes(
                take::<8>(payload)?,
            ))),
            3 => Ok(PropertyValue::Float32(f32::from_le_bytes(
                take::<4>(payload)?,
            ))),
            4 => Ok(PropertyValue::Float64(f64::from_le_bytes(
                take::<8>(payload)?,
            ))),
            5 => {
                if payload.len() < 2 {
                    return Err(DecodeError::InvalidLength);
                }
                let len = u16::from_le_bytes(payload[0..2].try_into().unwrap()) as usize;
                if payload.len() < 2 + len {
                    return Err(DecodeError::InvalidLength);
                }
                Ok(PropertyValue::FixedBytes(payload[2..2 + len].to_vec()))
            }
            6 => Ok(PropertyValue::Time(i64::from_le_bytes(
                take::<8>(payload)?,
            ))),
            7 => {
                if payload.len() < 4 {
                    return Err(DecodeError::InvalidLength);
                }
                let len = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
                if payload.len() < 4 + len {
                    return Err(DecodeError::InvalidLength);
                }
                let s = String::from_utf8(payload[4..4 + len].to_vec())
                    .map_err(|_| DecodeError::InvalidUtf8)?;
                Ok(PropertyValue::Varchar(s))
            }
            other => Err(DecodeError::UnknownTag(other)),
        }
    }
}

fn take<const N: usize>(payload: &[u8]) -> Result<[u8; N], DecodeError> {
    payload
        .get(0..N)
        .ok_or(DecodeError::InvalidLength)?
        .try_into()
        .map_err(|_| DecodeError::InvalidLength)
}

#[derive(Debug)]
pub enum DecodeError {
    Empty,
    InvalidLength,
    InvalidUtf8,
    UnknownTag(u8),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Empty => write!(f, "empty property value bytes"),
            DecodeError::InvalidLength => write!(f, "invalid property value length"),
            DecodeError::InvalidUtf8 => write!(f, "invalid utf-8 in varchar property"),
            DecodeError::UnknownTag(tag) => write!(f, "unknown property value tag: {tag}"),
        }
    }
}

impl std::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_null() {
        let v = PropertyValue::Null;
        assert_eq!(PropertyValue::decode(&v.encode()).unwrap(), v);
    }

    #[test]
    fn encode_decode_ints() {
        for v in [PropertyValue::Int32(-7), PropertyValue::Int64(i64::MAX)] {
            assert_eq!(PropertyValue::decode(&v.encode()).unwrap(), v);
        }
    }

    #[test]
    fn encode_decode_floats() {
        let v = PropertyValue::Float64(3.5);
        assert_eq!(PropertyValue::decode(&v.encode()).unwrap(), v);
        let nan = PropertyValue::Float32(f32::NAN);
        let decoded = PropertyValue::decode(&nan.encode()).unwrap();
        match decoded {
            PropertyValue::Float32(f) => assert!(f.is_nan()),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn encode_decode_varchar() {
        for s in ["", "hello", "日本語"] {
            let v = PropertyValue::Varchar(s.to_string());
            assert_eq!(PropertyValue::decode(&v.encode()).unwrap(), v);
        }
    }

    #[test]
    fn encode_decode_fixed_bytes() {
        let v = PropertyValue::FixedBytes(vec![1, 2, 3, 4]);
        assert_eq!(PropertyValue::decode(&v.encode()).unwrap(), v);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let v = PropertyValue::Int64(42);
        let encoded = v.encode();
        assert!(PropertyValue::decode(&encoded[..encoded.len() - 2]).is_err());
        assert!(matches!(
            PropertyValue::decode(&[]),
            Err(DecodeError::Empty)
        ));
    }
}
