use crate::bencode::parser::Value;

/// Encodes a value back into its bencoded form.
///
/// This is the exact inverse of [`decode`](crate::bencode::decode) for any
/// value decoding can produce: integers render as `i<decimal>e` (i64
/// formatting never emits a `+` sign or leading zeros), byte strings are
/// copied verbatim with no charset translation, and dictionaries keep their
/// insertion order.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Integer(n) => {
            out.push(b'i');
            out.extend_from_slice(n.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(bytes) => write_bytes(bytes, out),
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                write_value(item, out);
            }
            out.push(b'e');
        }
        Value::Dictionary(dict) => {
            out.push(b'd');
            for (key, val) in dict.entries() {
                write_bytes(key, out);
                write_value(val, out);
            }
            out.push(b'e');
        }
    }
}

fn write_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}
