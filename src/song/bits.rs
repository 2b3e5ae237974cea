// ============================================================================
// BITS.RS - Bit Packing for the Song String Format
// ============================================================================
//
// The song string is made of base64 digits. Simple fields are one digit per
// value; the bar table and the note data are bit streams packed six bits per
// digit, most significant bit first.
//
// LONG-TAIL INTEGERS:
// A value v >= min is written as a unary prefix followed by a fixed-width
// remainder. Starting with `min_bits`, every leading 1 bit says "the value
// does not fit in this many bits, subtract 2^bits and widen by one". A 0 bit
// ends the prefix and the remainder follows in the current width. Small
// values cost a few bits, large values still fit.
// ============================================================================

/// Digit alphabet used by the song format
pub const BASE64_ALPHABET: &[u8; 64] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ-_";

/// Widest remainder a long-tail value may grow to before decoding stops
const LONG_TAIL_MAX_BITS: u32 = 30;

/// Converts one base64 digit to its value. Older songs used '.' for 62.
/// Unknown characters decode as 0.
#[inline]
pub fn char_to_int(c: u8) -> u32 {
    match c {
        b'0'..=b'9' => (c - b'0') as u32,
        b'a'..=b'z' => (c - b'a') as u32 + 10,
        b'A'..=b'Z' => (c - b'A') as u32 + 36,
        b'-' | b'.' => 62,
        b'_' => 63,
        _ => 0,
    }
}

/// Converts a value 0..64 to its base64 digit
#[inline]
pub fn int_to_char(value: usize) -> u8 {
    BASE64_ALPHABET[value & 0x3f]
}

// ============================================================================
// READER
// ============================================================================

/// Reads bit fields out of a run of base64 digits. Reading past the end
/// yields zero bits, so truncated strings decode to short values instead of
/// failing.
pub struct BitFieldReader {
    bits: Vec<u8>,
    read_index: usize,
}

impl BitFieldReader {
    /// Unpacks `source[start..stop]`, clipped to the source length
    pub fn new(source: &[u8], start: usize, stop: usize) -> Self {
        let stop = stop.min(source.len());
        let start = start.min(stop);
        let mut bits = Vec::with_capacity((stop - start) * 6);
        for &c in &source[start..stop] {
            let value = char_to_int(c);
            for shift in (0..6).rev() {
                bits.push(((value >> shift) & 1) as u8);
            }
        }
        Self { bits, read_index: 0 }
    }

    #[inline]
    fn next_bit(&mut self) -> u32 {
        let bit = self.bits.get(self.read_index).copied().unwrap_or(0);
        self.read_index += 1;
        bit as u32
    }

    /// Reads an unsigned field of `bit_count` bits
    pub fn read(&mut self, bit_count: u32) -> u32 {
        let mut result = 0;
        for _ in 0..bit_count {
            result = (result << 1) | self.next_bit();
        }
        result
    }

    pub fn read_long_tail(&mut self, min_value: i32, min_bits: u32) -> i32 {
        let mut result = min_value as i64;
        let mut num_bits = min_bits;
        while self.next_bit() == 1 {
            if num_bits >= LONG_TAIL_MAX_BITS {
                break;
            }
            result += 1 << num_bits;
            num_bits += 1;
        }
        while num_bits > 0 {
            num_bits -= 1;
            if self.next_bit() == 1 {
                result += 1 << num_bits;
            }
        }
        result.min(i32::MAX as i64) as i32
    }

    /// Note and rest lengths in parts
    pub fn read_part_duration(&mut self) -> i32 {
        self.read_long_tail(1, 3)
    }

    /// Lengths in rhythm steps, used before version 7
    pub fn read_legacy_part_duration(&mut self) -> i32 {
        self.read_long_tail(1, 2)
    }

    pub fn read_pin_count(&mut self) -> i32 {
        self.read_long_tail(1, 0)
    }

    /// Signed distance in "pitches not recently used"
    pub fn read_pitch_interval(&mut self) -> i32 {
        if self.read(1) == 1 { -self.read_long_tail(1, 3) } else { self.read_long_tail(1, 3) }
    }
}

// ============================================================================
// WRITER
// ============================================================================

#[derive(Default, Clone, PartialEq, Eq)]
pub struct BitFieldWriter {
    bits: Vec<u8>,
}

impl BitFieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the low `bit_count` bits of `value`, most significant first
    pub fn write(&mut self, bit_count: u32, value: u32) {
        for shift in (0..bit_count).rev() {
            self.bits.push(((value >> shift) & 1) as u8);
        }
    }

    /// Panics if `value < min_value`; callers only pass values the format
    /// can represent.
    pub fn write_long_tail(&mut self, min_value: i32, min_bits: u32, value: i32) {
        assert!(value >= min_value, "long-tail value {value} below minimum {min_value}");
        let mut value = (value - min_value) as i64;
        let mut num_bits = min_bits;
        while value >= (1 << num_bits) {
            self.bits.push(1);
            value -= 1 << num_bits;
            num_bits += 1;
        }
        self.bits.push(0);
        while num_bits > 0 {
            num_bits -= 1;
            self.bits.push(((value >> num_bits) & 1) as u8);
        }
    }

    pub fn write_part_duration(&mut self, value: i32) {
        self.write_long_tail(1, 3, value);
    }

    pub fn write_pin_count(&mut self, value: i32) {
        self.write_long_tail(1, 0, value);
    }

    pub fn write_pitch_interval(&mut self, value: i32) {
        if value < 0 {
            self.write(1, 1);
            self.write_long_tail(1, 3, -value);
        } else {
            self.write(1, 0);
            self.write_long_tail(1, 3, value);
        }
    }

    /// Appends another writer's bits
    pub fn concat(&mut self, other: &BitFieldWriter) {
        self.bits.extend_from_slice(&other.bits);
    }

    /// Packs the bits into base64 digits, zero-padding the last digit
    pub fn encode_base64(&self, buffer: &mut Vec<u8>) {
        for chunk in self.bits.chunks(6) {
            let mut value = 0usize;
            for index in 0..6 {
                value = (value << 1) | chunk.get(index).copied().unwrap_or(0) as usize;
            }
            buffer.push(int_to_char(value));
        }
    }

    /// Number of digits `encode_base64` will produce
    pub fn length_base64(&self) -> usize {
        self.bits.len().div_ceil(6)
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_for(writer: &BitFieldWriter) -> BitFieldReader {
        let mut digits = Vec::new();
        writer.encode_base64(&mut digits);
        BitFieldReader::new(&digits, 0, digits.len())
    }

    #[test]
    fn test_alphabet_round_trip() {
        for value in 0..64 {
            assert_eq!(char_to_int(int_to_char(value)) as usize, value);
        }
        assert_eq!(char_to_int(b'.'), 62);
        assert_eq!(char_to_int(b'!'), 0);
    }

    #[test]
    fn test_long_tail_values() {
        let values = [1, 2, 8, 9, 24, 96, 384, 1000];
        let mut writer = BitFieldWriter::new();
        for &value in &values {
            writer.write_part_duration(value);
        }
        writer.write_pitch_interval(-13);
        writer.write_pitch_interval(5);

        let mut reader = reader_for(&writer);
        for &value in &values {
            assert_eq!(reader.read_part_duration(), value);
        }
        assert_eq!(reader.read_pitch_interval(), -13);
        assert_eq!(reader.read_pitch_interval(), 5);
    }

    #[test]
    fn test_long_tail_bit_layout() {
        // 1 fits in the zero-width remainder: a single 0 bit
        let mut writer = BitFieldWriter::new();
        writer.write_pin_count(1);
        assert_eq!(writer.bits, vec![0]);

        // 2 needs one prefix bit then a one-bit remainder
        let mut writer = BitFieldWriter::new();
        writer.write_pin_count(2);
        assert_eq!(writer.bits, vec![1, 0, 0]);
    }

    #[test]
    fn test_reading_past_end_yields_zero() {
        let mut reader = BitFieldReader::new(b"_", 0, 5);
        assert_eq!(reader.read(6), 63);
        assert_eq!(reader.read(4), 0);
        assert_eq!(reader.read_part_duration(), 1);
    }

    #[test]
    fn test_long_tail_of_ones_terminates() {
        let source = vec![b'_'; 40];
        let mut reader = BitFieldReader::new(&source, 0, source.len());
        let value = reader.read_long_tail(1, 3);
        assert!(value > 0);
    }
}
