//! Merging of CRC64 values computed over adjacent byte ranges.
//!
//! A CRC register update is linear over GF(2), so feeding `n` zero bytes into
//! a register is a 64x64 bit-matrix raised to the power `8n`. Given
//! `crc(A)`, `crc(B)` and `len(B)` the checksum of `A || B` is
//!
//! ```text
//! crc(A || B) = M^(8 * len(B)) * (crc(A) ^ init ^ xor_out) ^ crc(B)
//! ```
//!
//! where `M` is the "advance by one zero bit" operator. The power is taken by
//! repeated squaring, so the cost is logarithmic in `len(B)`.

use crc::Algorithm;

const GF2_DIM: usize = 64;

/// A 64x64 matrix over GF(2). Entry `n` is the image of the basis vector
/// with only bit `n` set.
pub type Gf2Matrix = [u64; GF2_DIM];

/// Multiplies `mat` by the bit-vector `vec`: the XOR of every `mat[n]` whose
/// bit `n` is set in `vec`, scanning from the low bit.
pub fn matrix_times(mat: &Gf2Matrix, mut vec: u64) -> u64 {
    let mut sum = 0;
    let mut n = 0;
    while vec != 0 {
        if vec & 1 != 0 {
            sum ^= mat[n];
        }
        vec >>= 1;
        n += 1;
    }
    sum
}

/// Writes `mat * mat` into `square`.
pub fn matrix_square(square: &mut Gf2Matrix, mat: &Gf2Matrix) {
    for (row, &col) in square.iter_mut().zip(mat.iter()) {
        *row = matrix_times(mat, col);
    }
}

/// The constants a CRC64 variant is defined by, as far as combining is
/// concerned. `poly` and `init` are stored in the bit order the register
/// uses, i.e. already reversed for reflected variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CombineParams {
    pub poly: u64,
    pub init: u64,
    pub xor_out: u64,
    pub reflected: bool,
}

impl CombineParams {
    /// Derives combine parameters from the algorithm definition used to
    /// compute the checksums themselves. Only variants with `refin == refout`
    /// are meaningful here.
    pub const fn from_algorithm(algorithm: &Algorithm<u64>) -> Self {
        let (poly, init) = if algorithm.refin {
            (algorithm.poly.reverse_bits(), algorithm.init.reverse_bits())
        } else {
            (algorithm.poly, algorithm.init)
        };
        Self {
            poly,
            init,
            xor_out: algorithm.xorout,
            reflected: algorithm.refin,
        }
    }

    /// Operator that feeds a single zero bit into the register.
    fn one_zero_bit(&self) -> Gf2Matrix {
        let mut op = [0; GF2_DIM];
        if self.reflected {
            op[0] = self.poly;
            let mut row = 1u64;
            for entry in op.iter_mut().skip(1) {
                *entry = row;
                row <<= 1;
            }
        } else {
            let mut row = 2u64;
            for entry in op.iter_mut().take(GF2_DIM - 1) {
                *entry = row;
                row <<= 1;
            }
            op[GF2_DIM - 1] = self.poly;
        }
        op
    }
}

/// Returns the checksum of `A || B` given `crc1 = crc(A)`, `crc2 = crc(B)`
/// and `len2 = len(B)` in bytes.
///
/// Both checksums must have been computed with the algorithm `params`
/// describes; mixing variants yields a plausible but wrong value.
pub fn combine(params: &CombineParams, mut crc1: u64, crc2: u64, mut len2: u64) -> u64 {
    if len2 == 0 {
        return crc1;
    }

    crc1 ^= params.init ^ params.xor_out;

    let mut odd = params.one_zero_bit();
    let mut even = [0; GF2_DIM];

    // two zero bits in even, four in odd
    matrix_square(&mut even, &odd);
    matrix_square(&mut odd, &even);

    // The first square inside the loop yields the one-zero-byte operator;
    // each later square doubles the byte count it advances by.
    loop {
        matrix_square(&mut even, &odd);
        if len2 & 1 != 0 {
            crc1 = matrix_times(&even, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }

        matrix_square(&mut odd, &even);
        if len2 & 1 != 0 {
            crc1 = matrix_times(&odd, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }
    }

    crc1 ^ crc2
}
