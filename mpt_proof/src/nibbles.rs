//! Nibble helpers for trie keys and hex prefix ("compact") encoded paths.

/// A 4-bit value. Stored in the low bits of a byte.
pub type Nibble = u8;

/// The path of a leaf or extension node once the hex prefix is stripped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodePath {
    /// The nibbles the node consumes from the key.
    pub nibbles: Vec<Nibble>,

    /// Whether the node terminates the path (leaf) or continues it
    /// (extension).
    pub is_leaf: bool,
}

/// Splits every byte of `bytes` into its high and low nibble.
pub fn to_nibbles(bytes: &[u8]) -> Vec<Nibble> {
    bytes.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect()
}

/// Decodes a hex prefix encoded path.
///
/// The high nibble of the first byte holds the flags: bit 0 is set when the
/// path has an odd number of nibbles (in which case the first nibble is
/// packed into the low half of the first byte) and bit 1 is set for leaves.
///
/// Returns the offending flag nibble when it is not one of the four valid
/// values.
pub fn decode_hex_prefix(encoded: &[u8]) -> Result<NodePath, u8> {
    let Some((&first, rest)) = encoded.split_first() else {
        return Ok(NodePath {
            nibbles: Vec::new(),
            is_leaf: false,
        });
    };

    let flags = first >> 4;
    if flags > 0b11 {
        return Err(flags);
    }

    let mut nibbles = Vec::with_capacity(rest.len() * 2 + 1);
    if flags & 0b01 == 1 {
        nibbles.push(first & 0x0f);
    }
    nibbles.extend(to_nibbles(rest));

    Ok(NodePath {
        nibbles,
        is_leaf: flags & 0b10 != 0,
    })
}

/// Length of the longest common prefix of two nibble strings.
pub fn shared_prefix_len(a: &[Nibble], b: &[Nibble]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_bytes_into_nibbles() {
        assert_eq!(to_nibbles(&[0x12, 0xab]), vec![1, 2, 0xa, 0xb]);
        assert!(to_nibbles(&[]).is_empty());
    }

    #[test]
    fn decodes_all_hex_prefix_flavours() {
        assert_eq!(
            decode_hex_prefix(&[0x00, 0x12, 0x34]),
            Ok(NodePath {
                nibbles: vec![1, 2, 3, 4],
                is_leaf: false
            })
        );
        assert_eq!(
            decode_hex_prefix(&[0x11, 0x23, 0x45]),
            Ok(NodePath {
                nibbles: vec![1, 2, 3, 4, 5],
                is_leaf: false
            })
        );
        assert_eq!(
            decode_hex_prefix(&[0x20, 0x12, 0x34]),
            Ok(NodePath {
                nibbles: vec![1, 2, 3, 4],
                is_leaf: true
            })
        );
        assert_eq!(
            decode_hex_prefix(&[0x31, 0x23, 0x45]),
            Ok(NodePath {
                nibbles: vec![1, 2, 3, 4, 5],
                is_leaf: true
            })
        );
    }

    #[test]
    fn rejects_unknown_flags() {
        assert_eq!(decode_hex_prefix(&[0x40]), Err(4));
        assert_eq!(decode_hex_prefix(&[0xf1, 0x00]), Err(0xf));
    }

    #[test]
    fn shared_prefix_stops_at_first_difference() {
        assert_eq!(shared_prefix_len(&[1, 2, 3], &[1, 2, 4]), 2);
        assert_eq!(shared_prefix_len(&[1, 2], &[1, 2, 4]), 2);
        assert_eq!(shared_prefix_len(&[], &[1]), 0);
    }
}
