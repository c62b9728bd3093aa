/// Number of bytes required to pack `count` bits
pub(crate) fn num_bytes_for_bits(count: u16) -> usize {
    (count as usize + 7) / 8
}

/// Pack a bit sequence so that item `i` occupies bit `i % 8` of byte `i / 8`.
/// Trailing bits of the last byte are left zero.
pub(crate) fn pack_bits(values: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; num_bytes_for_bits(values.len() as u16)];
    for (i, value) in values.iter().enumerate() {
        if *value {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack `count` bits packed by [`pack_bits`]
pub(crate) fn unpack_bits(bytes: &[u8], count: u16) -> Vec<bool> {
    let mut values = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let bit = match bytes.get(i / 8) {
            Some(byte) => byte & (1 << (i % 8)) != 0,
            None => false,
        };
        values.push(bit);
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_in_wire_order() {
        // CD 01 from the Modbus specification: 1100 1101 / 0000 0001
        let bits = [
            true, false, true, true, false, false, true, true, // 0xCD
            true, // 0x01
        ];
        assert_eq!(pack_bits(&bits), vec![0xCD, 0x01]);
    }

    #[test]
    fn round_trips_arbitrary_lengths(){
        for count in [1usize, 7, 8, 9, 16, 19, 2000] {
            let bits: Vec<bool> = (0..count).map(|i| i % 3 == 0).collect();
            let packed = pack_bits(&bits);
            assert_eq!(packed.len(), (count + 7) / 8);
            assert_eq!(unpack_bits(&packed, count as u16), bits);
        }
    }
}
