//! Matrix-role enum shared across geometry, hyperparameters, and codegen.
//!
//! Mirrors `MIOpenGEMM::nsHP::eMat`: three roles (A, B, C) plus a symmetric
//! workspace role used where per-matrix scratch buffers are addressed the
//! same way as A/B/C.

/// One of the three operand roles in `C ← αAB + βC`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mat {
    A,
    B,
    C,
}

impl Mat {
    /// All three roles, in a fixed, iteration-stable order.
    pub const ALL: [Mat; 3] = [Mat::A, Mat::B, Mat::C];

    /// All K-bearing roles (A and B), the two with a `non_k_dim`.
    pub const AB: [Mat; 2] = [Mat::A, Mat::B];

    /// Ordinal used to index `[T; 3]` per-matrix records.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Mat::A => 0,
            Mat::B => 1,
            Mat::C => 2,
        }
    }

    /// Single-character tag used in canonical strings (`tA`, `tB`, `tC`, ...).
    #[inline]
    pub fn letter(self) -> char {
        match self {
            Mat::A => 'A',
            Mat::B => 'B',
            Mat::C => 'C',
        }
    }
}

/// A fixed-size record with one entry per `Mat::ALL` member.
///
/// Replaces the reflection-ish `std::map<char, T>` idiom of the source with
/// a total, panic-free array indexed by `Mat::index`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct PerMat<T>(pub [T; 3]);

impl<T> PerMat<T> {
    #[inline]
    pub fn get(&self, m: Mat) -> &T {
        &self.0[m.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, m: Mat) -> &mut T {
        &mut self.0[m.index()]
    }

    #[inline]
    pub fn set(&mut self, m: Mat, v: T) {
        self.0[m.index()] = v;
    }

    pub fn from_fn(mut f: impl FnMut(Mat) -> T) -> Self {
        PerMat([f(Mat::A), f(Mat::B), f(Mat::C)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_stable_and_total() {
        assert_eq!(Mat::A.index(), 0);
        assert_eq!(Mat::B.index(), 1);
        assert_eq!(Mat::C.index(), 2);
    }

    #[test]
    fn per_mat_round_trips() {
        let mut pm: PerMat<u32> = PerMat::from_fn(|m| m.index() as u32 * 10);
        pm.set(Mat::B, 99);
        assert_eq!(*pm.get(Mat::A), 0);
        assert_eq!(*pm.get(Mat::B), 99);
        assert_eq!(*pm.get(Mat::C), 20);
    }
}
