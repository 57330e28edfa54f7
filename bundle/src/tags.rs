//! Avro-encoded item tags.
//!
//! Tags are an Avro array of `{name: bytes, value: bytes}` records. Longs are
//! zig-zag varints; an array is a sequence of blocks, each starting with an
//! item count (a negative count is followed by the block's byte size) and
//! terminated by a zero count.

use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl Tag {
    pub fn new(name: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        Self {
            name: name.as_ref().to_vec(),
            value: value.as_ref().to_vec(),
        }
    }

    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub fn value_str(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({:?}={:?})", self.name_str(), self.value_str())
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_long(&mut self) -> Result<i64, String> {
        let mut acc: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .bytes
                .get(self.pos)
                .ok_or_else(|| format!("varint runs past end at {}", self.pos))?;
            self.pos += 1;
            if shift >= 64 {
                return Err("varint longer than 10 bytes".into());
            }
            acc |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(((acc >> 1) as i64) ^ -((acc & 1) as i64))
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, String> {
        let len = self.read_long()?;
        let len = usize::try_from(len).map_err(|_| format!("negative byte length {len}"))?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| format!("byte string of {len} runs past end"))?;
        let out = self.bytes[self.pos..end].to_vec();
        self.pos = end;
        Ok(out)
    }
}

/// Decode Avro tag bytes.
pub fn decode_tags(bytes: &[u8]) -> Result<Vec<Tag>, String> {
    let mut cur = Cursor { bytes, pos: 0 };
    let mut tags = Vec::new();
    loop {
        let mut count = cur.read_long()?;
        if count == 0 {
            break;
        }
        if count < 0 {
            count = count.checked_neg().ok_or("block count overflow")?;
            cur.read_long()?;
        }
        for _ in 0..count {
            // Each record needs at least two length bytes.
            if cur.pos >= bytes.len() {
                return Err(format!("block declares {count} tags past end of input"));
            }
            let name = cur.read_bytes()?;
            let value = cur.read_bytes()?;
            tags.push(Tag { name, value });
        }
    }
    Ok(tags)
}

fn write_long(out: &mut Vec<u8>, n: i64) {
    let mut z = ((n << 1) ^ (n >> 63)) as u64;
    loop {
        if z & !0x7F == 0 {
            out.push(z as u8);
            return;
        }
        out.push((z as u8 & 0x7F) | 0x80);
        z >>= 7;
    }
}

/// Encode tags as a single Avro block. Empty input encodes to no bytes, the
/// form items without tags carry.
pub fn encode_tags(tags: &[Tag]) -> Vec<u8> {
    if tags.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    write_long(&mut out, tags.len() as i64);
    for tag in tags {
        write_long(&mut out, tag.name.len() as i64);
        out.extend_from_slice(&tag.name);
        write_long(&mut out, tag.value.len() as i64);
        out.extend_from_slice(&tag.value);
    }
    write_long(&mut out, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let tags = vec![Tag::new("Content-Type", "text/plain"), Tag::new("App", "")];
        assert_eq!(decode_tags(&encode_tags(&tags)).unwrap(), tags);
    }

    #[test]
    fn zigzag_values() {
        let mut out = Vec::new();
        write_long(&mut out, -1);
        write_long(&mut out, 1);
        write_long(&mut out, 64);
        assert_eq!(out, vec![0x01, 0x02, 0x80, 0x01]);
    }

    #[test]
    fn negative_block_count_with_size() {
        // count -1 (zigzag 0x01), block size 4 (0x08), name "a", value "b", end
        let bytes = [0x01, 0x08, 0x02, b'a', 0x02, b'b', 0x00];
        let tags = decode_tags(&bytes).unwrap();
        assert_eq!(tags, vec![Tag::new("a", "b")]);
    }

    #[test]
    fn truncated_input_errors() {
        let mut bytes = encode_tags(&[Tag::new("name", "value")]);
        bytes.truncate(bytes.len() - 3);
        assert!(decode_tags(&bytes).is_err());
    }

    #[test]
    fn huge_count_does_not_allocate() {
        // count = 2^40, then nothing
        let mut bytes = Vec::new();
        write_long(&mut bytes, 1 << 40);
        assert!(decode_tags(&bytes).is_err());
    }
}
