// Cantata
// Copyright (c) 2022-2025 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;
use std::io;

use super::vlc::{Codebook, CodebookEntry};

fn end_of_bitstream_error<T>() -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::Other, "unexpected end of bitstream"))
}

mod private {
    use std::io;

    pub trait FetchBitsRtl {
        /// Discard any remaining bits in the source and fetch new bits.
        fn fetch_bits(&mut self) -> io::Result<()>;

        /// Fetch new bits, and append them after the remaining bits.
        fn fetch_bits_partial(&mut self) -> io::Result<()>;

        /// Get all the bits in the source.
        fn get_bits(&self) -> u64;

        /// Get the number of bits left in the source.
        fn num_bits_left(&self) -> u32;

        /// Consume `num` bits from the source.
        fn consume_bits(&mut self, num: u32);
    }
}

/// A `FiniteBitStream` is a bit stream that has a known length in bits.
pub trait FiniteBitStream {
    /// Gets the number of bits left unread.
    fn bits_left(&self) -> u64;
}

/// `ReadBitsRtl` reads bits from least-significant to most-significant.
pub trait ReadBitsRtl: private::FetchBitsRtl {
    /// Discards any saved bits and resets the reader to prepare it for a byte-aligned read.
    #[inline(always)]
    fn realign(&mut self) {
        let skip = self.num_bits_left() & 0x7;
        self.consume_bits(skip);
    }

    /// Ignores the specified number of bits from the stream or returns an error.
    #[inline(always)]
    fn ignore_bits(&mut self, mut num_bits: u32) -> io::Result<()> {
        if num_bits <= self.num_bits_left() {
            self.consume_bits(num_bits);
        }
        else {
            // Consume whole bit caches directly.
            while num_bits > self.num_bits_left() {
                num_bits -= self.num_bits_left();
                self.fetch_bits()?;
            }

            if num_bits > 0 {
                // Shift out in two parts to prevent panicing when num_bits == 64.
                self.consume_bits(num_bits - 1);
                self.consume_bits(1);
            }
        }

        Ok(())
    }

    /// Ignores one bit from the stream or returns an error.
    #[inline(always)]
    fn ignore_bit(&mut self) -> io::Result<()> {
        self.ignore_bits(1)
    }

    /// Read a single bit as a boolean value or returns an error.
    #[inline(always)]
    fn read_bool(&mut self) -> io::Result<bool> {
        if self.num_bits_left() < 1 {
            self.fetch_bits()?;
        }

        let bit = (self.get_bits() & 1) == 1;

        self.consume_bits(1);
        Ok(bit)
    }

    /// Reads up to 32-bits and interprets them as an unsigned integer or returns an error.
    #[inline(always)]
    fn read_bits_leq32(&mut self, bit_width: u32) -> io::Result<u32> {
        debug_assert!(bit_width <= u32::BITS);

        let mut bits = self.get_bits();
        let mut bits_needed = bit_width;

        while bits_needed > self.num_bits_left() {
            bits_needed -= self.num_bits_left();

            self.fetch_bits()?;

            bits |= self.get_bits() << (bit_width - bits_needed);
        }

        self.consume_bits(bits_needed);

        // Since bit_width is <= 32, this shift will never panic.
        let mask = !(!0 << bit_width);

        Ok((bits & mask) as u32)
    }

    /// Reads up to 64-bits and interprets them as an unsigned integer or returns an error.
    #[inline(always)]
    fn read_bits_leq64(&mut self, bit_width: u32) -> io::Result<u64> {
        debug_assert!(bit_width <= u64::BITS);

        // Hard-code the bit_width == 0 case as it's not possible to handle both the bit_width == 0
        // and bit_width == 64 cases branchlessly. This should be optimized out when bit_width is
        // known at compile time. Since it's generally rare to need to read up-to 64-bits at a time
        // (as opposed to 32-bits), this is an acceptable solution.
        if bit_width == 0 {
            Ok(0)
        }
        else {
            let mut bits = self.get_bits();
            let mut bits_needed = bit_width;

            while bits_needed > self.num_bits_left() {
                bits_needed -= self.num_bits_left();

                self.fetch_bits()?;

                // Since bits_needed will always be > 0, this will never shift by > 63 bits if
                // bit_width == 64 and therefore will never panic.
                bits |= self.get_bits() << (bit_width - bits_needed);
            }

            // Shift in two parts to prevent panicing when bit_width == 64.
            self.consume_bits(bits_needed - 1);
            self.consume_bits(1);

            // Generate the mask in two parts to prevent panicing when bit_width == 64.
            let mask = !((!0 << (bit_width - 1)) << 1);

            Ok(bits & mask)
        }
    }

    /// Reads a codeword from the stream using the provided `Codebook` and returns the decoded
    /// value, and the number of bits consumed, or an error.
    fn read_codebook<E: CodebookEntry>(
        &mut self,
        codebook: &Codebook<E>,
    ) -> io::Result<(E::ValueType, u32)> {
        debug_assert!(!codebook.is_empty());

        // Attempt a refill before decoding so that a codeword straddling the final bytes of the
        // underlying buffer can still be serviced from the bit cache.
        if self.num_bits_left() < codebook.max_code_len {
            let _ = self.fetch_bits_partial();
        }

        // The number of bits actually buffered in the bit cache.
        let num_bits_left = self.num_bits_left();

        let mut bits = self.get_bits();

        let mut consumed = 0;

        // The table begins with a sentinel jump entry that encodes the initial block width.
        let mut entry = codebook.table[0];

        while entry.is_jump() {
            // The width of the block to be indexed.
            let block_len = entry.jump_len();

            let index = (bits & ((1 << block_len) - 1)) as usize;

            // Jump to the next entry.
            entry = codebook.table[entry.jump_offset() + index];

            // If the entry is a value entry, its codeword may be shorter than the block width and
            // only the value length is consumed below. Jump entries consume the entire block.
            if entry.is_jump() {
                consumed += block_len;
                bits >>= block_len;

                // A jump entry requires more bits than are left in the stream.
                if consumed > num_bits_left {
                    return end_of_bitstream_error();
                }
            }
        }

        // The entry is always a value entry at this point. A width of zero indicates an unused
        // slot in a sparse codebook, for which no codeword exists.
        if entry.value_len() == 0 {
            return end_of_bitstream_error();
        }

        // Consume the bits of the codeword.
        consumed += entry.value_len();

        if consumed > num_bits_left {
            return end_of_bitstream_error();
        }

        self.consume_bits(consumed);

        Ok((entry.value(), consumed))
    }
}

/// `BitReaderRtl` reads bits from least-significant to most-significant from any `&[u8]`.
///
/// Stated another way, if N-bits are read from a `BitReaderRtl` then bit 0, the first bit read,
/// is the least-significant bit, and bit N-1, the last bit read, is the most-significant.
pub struct BitReaderRtl<'a> {
    buf: &'a [u8],
    bits: u64,
    n_bits_left: u32,
}

impl<'a> BitReaderRtl<'a> {
    /// Instantiate a new `BitReaderRtl` with the given buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        BitReaderRtl { buf, bits: 0, n_bits_left: 0 }
    }
}

impl<'a> private::FetchBitsRtl for BitReaderRtl<'a> {
    fn fetch_bits_partial(&mut self) -> io::Result<()> {
        let mut buf = [0u8; std::mem::size_of::<u64>()];

        let read_len = min(self.buf.len(), (u64::BITS - self.n_bits_left) as usize >> 3);

        if read_len == 0 {
            return end_of_bitstream_error();
        }

        buf[..read_len].copy_from_slice(&self.buf[..read_len]);

        self.buf = &self.buf[read_len..];

        self.bits |= u64::from_le_bytes(buf) << self.n_bits_left;
        self.n_bits_left += (read_len as u32) << 3;

        Ok(())
    }

    fn fetch_bits(&mut self) -> io::Result<()> {
        let mut buf = [0u8; std::mem::size_of::<u64>()];

        let read_len = min(self.buf.len(), std::mem::size_of::<u64>());

        if read_len == 0 {
            return end_of_bitstream_error();
        }

        buf[..read_len].copy_from_slice(&self.buf[..read_len]);

        self.buf = &self.buf[read_len..];

        self.bits = u64::from_le_bytes(buf);
        self.n_bits_left = (read_len as u32) << 3;

        Ok(())
    }

    #[inline(always)]
    fn get_bits(&self) -> u64 {
        self.bits
    }

    #[inline(always)]
    fn num_bits_left(&self) -> u32 {
        self.n_bits_left
    }

    #[inline(always)]
    fn consume_bits(&mut self, num: u32) {
        self.n_bits_left -= num;
        self.bits >>= num;
    }
}

impl<'a> ReadBitsRtl for BitReaderRtl<'a> {}

impl<'a> FiniteBitStream for BitReaderRtl<'a> {
    fn bits_left(&self) -> u64 {
        (8 * self.buf.len() as u64) + u64::from(self.n_bits_left)
    }
}

#[cfg(test)]
mod tests {
    use super::{BitReaderRtl, FiniteBitStream, ReadBitsRtl};
    use crate::io::vlc::{BitOrder, Codebook, CodebookBuilder, Entry32x32};

    #[test]
    fn verify_read_bool() {
        let mut bs = BitReaderRtl::new(&[0b1010_1010]);

        assert!(!bs.read_bool().unwrap());
        assert!(bs.read_bool().unwrap());
        assert!(!bs.read_bool().unwrap());
        assert!(bs.read_bool().unwrap());
        assert!(!bs.read_bool().unwrap());
        assert!(bs.read_bool().unwrap());
        assert!(!bs.read_bool().unwrap());
        assert!(bs.read_bool().unwrap());

        // Error test.
        let mut bs = BitReaderRtl::new(&[]);

        assert!(bs.read_bool().is_err());
    }

    #[test]
    fn verify_read_bits_leq32() {
        let mut bs = BitReaderRtl::new(&[0b1010_0101, 0b0111_1110, 0b1101_0011]);

        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0b0101);
        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0b1010);
        assert_eq!(bs.read_bits_leq32(13).unwrap(), 0b1_0011_0111_1110);
        assert_eq!(bs.read_bits_leq32(3).unwrap(), 0b110);

        // Lower limit test.
        let mut bs = BitReaderRtl::new(&[0xff, 0xff, 0xff, 0xff]);

        assert_eq!(bs.read_bits_leq32(0).unwrap(), 0);

        // Upper limit test.
        let mut bs = BitReaderRtl::new(&[0xff, 0xff, 0xff, 0xff, 0x01]);

        assert_eq!(bs.read_bits_leq32(32).unwrap(), u32::MAX);
        assert_eq!(bs.read_bits_leq32(8).unwrap(), 0x01);

        // Cache fetch test.
        let mut bs = BitReaderRtl::new(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);

        assert_eq!(bs.read_bits_leq32(32).unwrap(), u32::MAX);
        assert_eq!(bs.read_bits_leq32(32).unwrap(), u32::MAX);
        assert_eq!(bs.read_bits_leq32(8).unwrap(), 0x01);

        // Test error cases.
        let mut bs = BitReaderRtl::new(&[0xff]);

        assert!(bs.read_bits_leq32(9).is_err());
    }

    #[test]
    fn verify_read_bits_leq64() {
        let mut bs = BitReaderRtl::new(&[
            0x99, 0xaa, 0x55, 0xff, 0xff, 0x55, 0xaa, 0x99, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66,
            0x77, 0x88,
        ]);

        assert_eq!(bs.read_bits_leq64(40).unwrap(), 0xffff55aa99);
        assert_eq!(bs.read_bits_leq64(4).unwrap(), 0x05);
        assert_eq!(bs.read_bits_leq64(4).unwrap(), 0x05);
        assert_eq!(bs.read_bits_leq64(16).unwrap(), 0x99aa);
        assert_eq!(bs.read_bits_leq64(64).unwrap(), 0x8877665544332211);

        // Lower limit test.
        let mut bs = BitReaderRtl::new(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);

        assert_eq!(bs.read_bits_leq64(0).unwrap(), 0);

        // Upper limit test.
        let mut bs = BitReaderRtl::new(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);

        assert_eq!(bs.read_bits_leq64(64).unwrap(), u64::MAX);
        assert_eq!(bs.read_bits_leq64(8).unwrap(), 0x01);

        // Test error cases.
        let mut bs = BitReaderRtl::new(&[0xff]);

        assert!(bs.read_bits_leq64(9).is_err());
    }

    #[test]
    fn verify_ignore_bits() {
        // Ignoring then reading must land on the same position as one combined read.
        let buf = [0x55, 0xaa, 0x99, 0x66, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

        for k in 0..=24u32 {
            for n in 0..=(32 - k) {
                let mut a = BitReaderRtl::new(&buf);
                let mut b = BitReaderRtl::new(&buf);

                a.ignore_bits(k).unwrap();
                let lhs = a.read_bits_leq32(n).unwrap();

                let combined = b.read_bits_leq32(k + n).unwrap();
                let rhs = if n == 0 { 0 } else { (combined >> k) & (!0u32 >> (32 - n)) };

                assert_eq!(lhs, rhs);
                assert_eq!(a.bits_left(), b.bits_left());
            }
        }

        // Ignore across cache boundaries.
        let mut bs = BitReaderRtl::new(&[0x00; 24]);

        assert!(bs.ignore_bits(64).is_ok());
        assert!(bs.ignore_bits(64).is_ok());
        assert!(bs.ignore_bits(64).is_ok());
        assert!(bs.ignore_bits(1).is_err());
    }

    #[test]
    fn verify_read_codebook() {
        // Codewords in MSb order, canonical lengths [1, 3, 3, 3, 3].
        let code_words = [0x0, 0x4, 0x5, 0x6, 0x7];
        let code_lens = [1u8, 3, 3, 3, 3];
        let values = [10u32, 20, 30, 40, 50];

        let mut builder = CodebookBuilder::new(BitOrder::Reverse);
        let codebook = builder.make::<Entry32x32>(&code_words, &code_lens, &values).unwrap();

        // The bitstream below encodes the codeword sequence 0, 100, 101, 110, 111, 0 with each
        // codeword transmitted root-first and packed LSb-first into bytes.
        let mut bs = BitReaderRtl::new(&[0xd2, 0x1d]);

        assert_eq!(bs.read_codebook(&codebook).unwrap(), (10, 1));
        assert_eq!(bs.read_codebook(&codebook).unwrap(), (20, 3));
        assert_eq!(bs.read_codebook(&codebook).unwrap(), (30, 3));
        assert_eq!(bs.read_codebook(&codebook).unwrap(), (40, 3));
        assert_eq!(bs.read_codebook(&codebook).unwrap(), (50, 3));
        assert_eq!(bs.read_codebook(&codebook).unwrap(), (10, 1));
    }
}
